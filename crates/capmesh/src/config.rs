//! Node configuration, consumed from the environment.
//!
//! Environment variables follow the pattern `CAPMESH_<KEY>`, e.g.
//! `CAPMESH_LISTEN_PORT=7411`. Everything has a default; `validate()`
//! catches combinations that cannot work.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value: {0}")]
    InvalidValue(String),

    #[error("validation failed: {0}")]
    ValidationFailed(String),
}

/// Peer topology, a static configuration choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopologyMode {
    /// Every instance discovers and syncs with every reachable instance.
    Mesh,
    /// Sync only with the configured hub endpoints; no broadcast.
    Hub,
}

impl FromStr for TopologyMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mesh" => Ok(Self::Mesh),
            "hub" => Ok(Self::Hub),
            other => Err(ConfigError::InvalidValue(format!(
                "unknown mode {other:?}, expected \"mesh\" or \"hub\""
            ))),
        }
    }
}

/// Everything a node needs to start.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Free-form classification tag ("edge", "cloud", "desktop", ...).
    pub instance_type: String,

    /// Port for the sync API. Zero asks the OS for a free port.
    pub listen_port: u16,

    /// Address peers should use to call back, when the default
    /// `http://127.0.0.1:<port>` is not reachable from them.
    pub advertised_endpoint: Option<String>,

    pub mode: TopologyMode,

    /// Hub addresses to sync against. Hub mode only.
    pub hub_endpoints: Vec<String>,

    /// Cadence of scheduled sync rounds.
    pub sync_interval: Duration,

    /// Peer cycles allowed in flight at once during a round.
    pub max_concurrent_peer_syncs: usize,

    /// Broadcast/listen for peers on the local segment (mesh mode).
    pub auto_discover: bool,

    /// UDP port for discovery announcements.
    pub discovery_port: u16,

    /// Deadline for each sync request.
    pub request_timeout: Duration,

    /// Reject pushes that do not carry a valid manifest signature.
    pub require_signed_manifests: bool,

    /// SQLite database path. None keeps records in memory only.
    pub data_path: Option<PathBuf>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            instance_type: "desktop".to_string(),
            listen_port: 7411,
            advertised_endpoint: None,
            mode: TopologyMode::Mesh,
            hub_endpoints: Vec::new(),
            sync_interval: Duration::from_secs(30),
            max_concurrent_peer_syncs: 4,
            auto_discover: true,
            discovery_port: 7410,
            request_timeout: Duration::from_secs(5),
            require_signed_manifests: false,
            data_path: None,
        }
    }
}

impl NodeConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(instance_type) = env::var("CAPMESH_INSTANCE_TYPE") {
            config.instance_type = instance_type;
        }
        if let Ok(port) = env::var("CAPMESH_LISTEN_PORT") {
            config.listen_port = port
                .parse()
                .map_err(|e| ConfigError::InvalidValue(format!("listen port: {e}")))?;
        }
        if let Ok(endpoint) = env::var("CAPMESH_ADVERTISED_ENDPOINT") {
            config.advertised_endpoint = Some(endpoint);
        }
        if let Ok(mode) = env::var("CAPMESH_MODE") {
            config.mode = mode.parse()?;
        }
        if let Ok(hubs) = env::var("CAPMESH_HUB_ENDPOINTS") {
            config.hub_endpoints = hubs
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
        if let Ok(interval) = env::var("CAPMESH_SYNC_INTERVAL_SECONDS") {
            let seconds: u64 = interval
                .parse()
                .map_err(|e| ConfigError::InvalidValue(format!("sync interval: {e}")))?;
            config.sync_interval = Duration::from_secs(seconds);
        }
        if let Ok(max) = env::var("CAPMESH_MAX_CONCURRENT_PEER_SYNCS") {
            config.max_concurrent_peer_syncs = max
                .parse()
                .map_err(|e| ConfigError::InvalidValue(format!("max concurrent syncs: {e}")))?;
        }
        if let Ok(auto) = env::var("CAPMESH_AUTO_DISCOVER") {
            config.auto_discover = auto
                .parse()
                .map_err(|e| ConfigError::InvalidValue(format!("auto discover: {e}")))?;
        }
        if let Ok(port) = env::var("CAPMESH_DISCOVERY_PORT") {
            config.discovery_port = port
                .parse()
                .map_err(|e| ConfigError::InvalidValue(format!("discovery port: {e}")))?;
        }
        if let Ok(timeout) = env::var("CAPMESH_REQUEST_TIMEOUT_SECONDS") {
            let seconds: u64 = timeout
                .parse()
                .map_err(|e| ConfigError::InvalidValue(format!("request timeout: {e}")))?;
            config.request_timeout = Duration::from_secs(seconds);
        }
        if let Ok(require) = env::var("CAPMESH_REQUIRE_SIGNED_MANIFESTS") {
            config.require_signed_manifests = require
                .parse()
                .map_err(|e| ConfigError::InvalidValue(format!("signed manifests flag: {e}")))?;
        }
        if let Ok(path) = env::var("CAPMESH_DATA_PATH") {
            config.data_path = Some(PathBuf::from(path));
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that cannot work.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sync_interval.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "sync interval must be greater than zero".into(),
            ));
        }
        if self.max_concurrent_peer_syncs == 0 {
            return Err(ConfigError::ValidationFailed(
                "max concurrent peer syncs must be greater than zero".into(),
            ));
        }
        if self.request_timeout.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "request timeout must be greater than zero".into(),
            ));
        }
        match self.mode {
            TopologyMode::Hub if self.hub_endpoints.is_empty() => {
                Err(ConfigError::ValidationFailed(
                    "hub mode requires at least one hub endpoint".into(),
                ))
            }
            TopologyMode::Mesh if !self.hub_endpoints.is_empty() => {
                Err(ConfigError::ValidationFailed(
                    "hub endpoints only apply in hub mode".into(),
                ))
            }
            _ => Ok(()),
        }
    }
}
