//! Capabilities handed to OSDs during a reconfiguration
//!
//! A capability is a short-lived token that authorizes the coordinator to
//! invalidate a file's replicas and push state to them. It is signed with a
//! keyed BLAKE3 MAC derived from the secret shared with the OSDs and is never
//! persisted.

use crate::common::utils::timestamp_now_millis;
use crate::common::{CoordinatorConfig, Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Read/write access, the mode every coordinator capability carries
pub const ACCESS_MODE_RDWR: u32 = 0o2;

const KEY_CONTEXT: &str = "minimrc capability signing v1";

/// File-specific inputs to a capability, captured when the job is submitted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CapabilityContext {
    /// The file's current epoch
    pub epoch: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capability {
    pub file_id: String,
    pub access_mode: u32,
    pub issued_at_ms: u64,
    pub expires_at_ms: u64,
    pub client_identity: String,
    pub epoch: u32,
    pub signature: String,
}

impl Capability {
    pub fn is_expired_at(&self, now_ms: u64) -> bool {
        now_ms >= self.expires_at_ms
    }

    fn signing_payload(&self) -> String {
        format!(
            "{}\n{}\n{}\n{}\n{}\n{}",
            self.file_id,
            self.access_mode,
            self.issued_at_ms,
            self.expires_at_ms,
            self.client_identity,
            self.epoch
        )
    }
}

#[derive(Clone)]
pub struct CapabilityIssuer {
    key: [u8; 32],
    validity: Duration,
    client_identity: String,
}

impl std::fmt::Debug for CapabilityIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityIssuer")
            .field("validity", &self.validity)
            .field("client_identity", &self.client_identity)
            .finish_non_exhaustive()
    }
}

impl CapabilityIssuer {
    pub fn new(secret: &str, validity: Duration, client_identity: impl Into<String>) -> Self {
        Self {
            key: blake3::derive_key(KEY_CONTEXT, secret.as_bytes()),
            validity,
            client_identity: client_identity.into(),
        }
    }

    pub fn from_config(config: &CoordinatorConfig) -> Self {
        Self::new(
            &config.capability_secret,
            config.capability_timeout(),
            config.client_identity(),
        )
    }

    /// Issue a fresh read/write capability for `file_id`
    pub fn issue(&self, file_id: &str, context: &CapabilityContext) -> Capability {
        let issued_at_ms = timestamp_now_millis();
        let mut capability = Capability {
            file_id: file_id.to_string(),
            access_mode: ACCESS_MODE_RDWR,
            issued_at_ms,
            expires_at_ms: issued_at_ms + self.validity.as_millis() as u64,
            client_identity: self.client_identity.clone(),
            epoch: context.epoch,
            signature: String::new(),
        };
        capability.signature = self.sign(&capability);
        capability
    }

    fn mac(&self, capability: &Capability) -> blake3::Hash {
        blake3::keyed_hash(&self.key, capability.signing_payload().as_bytes())
    }

    fn sign(&self, capability: &Capability) -> String {
        hex::encode(self.mac(capability).as_bytes())
    }

    /// Check signature and expiry, the way an OSD would
    pub fn verify(&self, capability: &Capability) -> Result<()> {
        let bytes: [u8; 32] = hex::decode(&capability.signature)
            .ok()
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| Error::PermissionDenied("malformed capability signature".into()))?;

        // blake3::Hash equality is constant-time
        if blake3::Hash::from(bytes) != self.mac(capability) {
            return Err(Error::PermissionDenied(format!(
                "invalid capability signature for {}",
                capability.file_id
            )));
        }
        if capability.is_expired_at(timestamp_now_millis()) {
            return Err(Error::PermissionDenied(format!(
                "capability for {} expired",
                capability.file_id
            )));
        }
        Ok(())
    }
}
