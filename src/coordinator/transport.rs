//! OSD-facing types and the replica transport seam
//!
//! [`ReplicaTransport`] is what the coordinator uses to talk to a replica's head
//! OSD. The production implementation is
//! [`GrpcTransport`](crate::coordinator::osd_client::GrpcTransport); tests script
//! replica behaviour with their own implementations.

use crate::common::{Error, Result};
use crate::coordinator::capability::Capability;
use crate::coordinator::xloc::ReplicaSet;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Capability plus the replica set it applies to
#[derive(Debug, Clone)]
pub struct FileCredentials {
    pub capability: Capability,
    pub xlocs: ReplicaSet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectVersion {
    pub object_number: u64,
    pub version: u64,
}

/// A truncate recorded by a replica: objects past `last_object_number` written
/// before `version` are gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TruncateRecord {
    pub version: u64,
    pub last_object_number: u64,
}

/// A replica's report in response to an invalidate
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaStatus {
    pub truncate_epoch: u64,
    pub file_size: u64,
    pub max_object_version: u64,
    pub primary_epoch: u32,
    pub object_versions: Vec<ObjectVersion>,
    pub truncate_log: Vec<TruncateRecord>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvalidateResponse {
    /// The responder held the primary lease when invalidated
    pub is_primary: bool,
    pub status: Option<ReplicaStatus>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectVersionMapping {
    pub object_number: u64,
    pub version: u64,
    /// Head OSDs holding `version` of this object
    pub osd_uuids: Vec<String>,
}

/// The reconciled, canonical state of a file across its replicas
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthoritativeState {
    pub truncate_epoch: u64,
    pub max_object_version: u64,
    /// Sorted by object number
    pub object_versions: Vec<ObjectVersionMapping>,
    pub truncate_log: Vec<TruncateRecord>,
    /// Head OSDs that hold the authoritative version of every object
    pub replicas_holding_all: BTreeSet<String>,
}

impl AuthoritativeState {
    pub fn version_of(&self, object_number: u64) -> Option<&ObjectVersionMapping> {
        self.object_versions
            .iter()
            .find(|m| m.object_number == object_number)
    }

    pub fn holds_all(&self, osd_uuid: &str) -> bool {
        self.replicas_holding_all.contains(osd_uuid)
    }

    /// Stop counting `osd_uuids` as up to date: they are leaving the replica set.
    /// They stay listed as holders, since the survivors may still fetch from them.
    pub fn exclude<S: AsRef<str>>(&mut self, osd_uuids: &[S]) {
        for uuid in osd_uuids {
            self.replicas_holding_all.remove(uuid.as_ref());
        }
    }
}

#[tonic::async_trait]
pub trait ReplicaTransport: Send + Sync {
    /// Invalidate the replica at `address` and collect its status
    async fn invalidate(
        &self,
        address: &str,
        credentials: &FileCredentials,
        file_id: &str,
    ) -> Result<InvalidateResponse>;

    /// Make the replica at `address` fetch the authoritative state
    async fn fetch_invalidated(
        &self,
        address: &str,
        credentials: &FileCredentials,
        file_id: &str,
        state: &AuthoritativeState,
    ) -> Result<()>;
}

/// Resolves OSD UUIDs to transport addresses
#[derive(Debug, Clone, Default)]
pub struct OsdDirectory {
    addresses: HashMap<String, String>,
}

impl OsdDirectory {
    pub fn new(addresses: HashMap<String, String>) -> Self {
        Self { addresses }
    }

    pub fn register(&mut self, osd_uuid: impl Into<String>, address: impl Into<String>) {
        self.addresses.insert(osd_uuid.into(), address.into());
    }

    /// Configured address, else the UUID itself when it already is an address
    /// (`scheme://...` as-is, `host:port` as `http://host:port`).
    pub fn resolve(&self, osd_uuid: &str) -> Result<String> {
        if let Some(address) = self.addresses.get(osd_uuid) {
            return Ok(address.clone());
        }
        if osd_uuid.contains("://") {
            return Ok(osd_uuid.to_string());
        }
        match osd_uuid.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => {
                Ok(format!("http://{}", osd_uuid))
            }
            _ => Err(Error::ConnectionFailed(format!(
                "no address known for OSD {}",
                osd_uuid
            ))),
        }
    }
}
