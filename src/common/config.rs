//! Configuration for minimrc components

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Global configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Node ID (unique identifier)
    #[serde(default = "default_node_id")]
    pub node_id: String,

    /// Coordinator-specific config
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coordinator: Option<CoordinatorConfig>,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_node_id() -> String {
    "mrc-1".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Coordinator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Bind address for the admin HTTP API
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,

    /// RocksDB path for file metadata
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Address this service identifies itself with in capabilities
    #[serde(default)]
    pub advertise_address: Option<String>,

    /// Secret shared with the OSDs, used to sign capabilities
    #[serde(default = "default_capability_secret")]
    pub capability_secret: String,

    /// Capability validity; defaults to the lease timeout
    #[serde(default)]
    pub capability_timeout_secs: Option<u64>,

    /// Upper bound on the wait for the primary's invalidate response
    #[serde(default = "default_lease_timeout")]
    pub lease_timeout_ms: u64,

    /// Per-RPC timeout for OSD calls
    #[serde(default = "default_rpc_timeout")]
    pub rpc_timeout_ms: u64,

    /// Metadata master; when set, this node only serves reads and redirects writes
    #[serde(default)]
    pub metadata_master: Option<String>,

    /// OSD UUID to gRPC address
    #[serde(default)]
    pub osds: HashMap<String, String>,
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 32636))
}
fn default_db_path() -> PathBuf {
    PathBuf::from("./mrc-data")
}
fn default_capability_secret() -> String {
    "minimrc-secret".to_string()
}
fn default_lease_timeout() -> u64 {
    15_000
}
fn default_rpc_timeout() -> u64 {
    5_000
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            db_path: default_db_path(),
            advertise_address: None,
            capability_secret: default_capability_secret(),
            capability_timeout_secs: None,
            lease_timeout_ms: default_lease_timeout(),
            rpc_timeout_ms: default_rpc_timeout(),
            metadata_master: None,
            osds: HashMap::new(),
        }
    }
}

impl CoordinatorConfig {
    pub fn lease_timeout(&self) -> Duration {
        Duration::from_millis(self.lease_timeout_ms)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    /// Capability validity, falling back to the lease timeout
    pub fn capability_timeout(&self) -> Duration {
        self.capability_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or_else(|| self.lease_timeout())
    }

    /// Identity written into issued capabilities
    pub fn client_identity(&self) -> String {
        self.advertise_address
            .clone()
            .unwrap_or_else(|| self.bind_addr.to_string())
    }

    /// Validate configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.capability_secret.is_empty() {
            return Err(crate::Error::InvalidConfig(
                "capability_secret must not be empty".into(),
            ));
        }
        if self.lease_timeout_ms == 0 {
            return Err(crate::Error::InvalidConfig(
                "lease_timeout_ms must be > 0".into(),
            ));
        }
        if self.rpc_timeout_ms == 0 {
            return Err(crate::Error::InvalidConfig(
                "rpc_timeout_ms must be > 0".into(),
            ));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            coordinator: None,
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from `minimrc.toml` (optional) and `MINIMRC__*` environment
    /// variables. Falls back to defaults when nothing usable is found.
    pub fn load() -> Self {
        match Self::load_from("minimrc") {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Ignoring configuration file: {}", e);
                Self::default()
            }
        }
    }

    /// Load configuration from the given file stem (extension optional) plus environment
    pub fn load_from(path: &str) -> crate::Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(config::Environment::with_prefix("MINIMRC").separator("__"))
            .build()
            .map_err(|e| crate::Error::InvalidConfig(e.to_string()))?;

        settings
            .try_deserialize()
            .map_err(|e| crate::Error::InvalidConfig(e.to_string()))
    }
}
