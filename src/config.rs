//! WolfLease Configuration
//!
//! This module provides configuration structures for a wolflease
//! participant and lease server.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::election::ElectionConfig;
use crate::store::{lease_key, HttpLeaseStore, LeaseStore, SqliteLeaseStore};

/// Main WolfLease configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WolfLeaseConfig {
    /// Node-specific configuration
    pub node: NodeConfig,

    /// Election timing configuration
    #[serde(default)]
    pub election: ElectionSection,

    /// Lease store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Lease server configuration
    #[serde(default)]
    pub api: ApiConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Node-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NodeConfig {
    /// Unique participant identity
    #[serde(default)]
    pub id: String,
}

/// Election timing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElectionSection {
    /// Lease duration in milliseconds
    #[serde(default = "default_lease_duration_ms")]
    pub lease_duration_ms: u64,

    /// Renew deadline in milliseconds (must be below the lease duration)
    #[serde(default = "default_renew_deadline_ms")]
    pub renew_deadline_ms: u64,

    /// Retry period in milliseconds (must be below the renew deadline)
    #[serde(default = "default_retry_period_ms")]
    pub retry_period_ms: u64,

    /// Renewal attempts per renew deadline
    #[serde(default = "default_renew_attempts")]
    pub renew_attempts: u32,

    /// Bound on a single store call in milliseconds (default: half the retry period)
    #[serde(default)]
    pub store_timeout_ms: Option<u64>,

    /// Upward jitter for follower polls, as a fraction of the retry period
    #[serde(default)]
    pub jitter_factor: f64,

    /// Clear the lease holder when shutting down while leading
    #[serde(default)]
    pub release_on_cancel: bool,
}

/// Lease store backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// SQLite database file shared on this host
    Sqlite,
    /// Remote lease server
    Http,
}

/// Lease store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Backend kind
    #[serde(default = "default_backend")]
    pub backend: StoreBackend,

    /// SQLite database path (sqlite backend, and `serve`)
    #[serde(default = "default_store_path")]
    pub path: PathBuf,

    /// Lease server URL (http backend)
    #[serde(default)]
    pub url: Option<String>,

    /// Lease namespace; must match on all participants
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Lease name; must match on all participants
    #[serde(default = "default_lease_name")]
    pub name: String,
}

/// Lease server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// HTTP bind address
    #[serde(default = "default_api_address")]
    pub bind_address: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (pretty, compact)
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_lease_duration_ms() -> u64 {
    15_000
}

fn default_renew_deadline_ms() -> u64 {
    10_000
}

fn default_retry_period_ms() -> u64 {
    2_000
}

fn default_renew_attempts() -> u32 {
    2
}

fn default_backend() -> StoreBackend {
    StoreBackend::Sqlite
}

fn default_store_path() -> PathBuf {
    PathBuf::from("/var/lib/wolflease/leases.db")
}

fn default_namespace() -> String {
    "default".to_string()
}

fn default_lease_name() -> String {
    "wolflease".to_string()
}

fn default_api_address() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for ElectionSection {
    fn default() -> Self {
        Self {
            lease_duration_ms: default_lease_duration_ms(),
            renew_deadline_ms: default_renew_deadline_ms(),
            retry_period_ms: default_retry_period_ms(),
            renew_attempts: default_renew_attempts(),
            store_timeout_ms: None,
            jitter_factor: 0.0,
            release_on_cancel: false,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            path: default_store_path(),
            url: None,
            namespace: default_namespace(),
            name: default_lease_name(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_address: default_api_address(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl WolfLeaseConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Load a TOML file, replacing `node.id` with `identity` when given,
    /// then validate
    pub fn load(path: &Path, identity: Option<&str>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: WolfLeaseConfig = toml::from_str(&content)?;
        if let Some(identity) = identity {
            config.node.id = identity.to_string();
        }
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> crate::Result<Self> {
        let config: WolfLeaseConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Override the participant identity (CLI / environment)
    pub fn set_identity(&mut self, identity: impl Into<String>) -> crate::Result<()> {
        self.node.id = identity.into();
        self.validate()
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.node.id.is_empty() {
            return Err(crate::Error::Config("node.id cannot be empty".into()));
        }

        if self.store.namespace.is_empty() || self.store.name.is_empty() {
            return Err(crate::Error::Config(
                "store.namespace and store.name cannot be empty".into(),
            ));
        }

        if self.store.namespace.contains('/') || self.store.name.contains('/') {
            return Err(crate::Error::Config(
                "store.namespace and store.name cannot contain '/'".into(),
            ));
        }

        if self.store.backend == StoreBackend::Http
            && self.store.url.as_deref().map_or(true, str::is_empty)
        {
            return Err(crate::Error::Config(
                "store.url is required for the http backend".into(),
            ));
        }

        self.election_config().validate()
    }

    /// Runtime election configuration
    pub fn election_config(&self) -> ElectionConfig {
        ElectionConfig {
            identity: self.node.id.clone(),
            lease_duration: Duration::from_millis(self.election.lease_duration_ms),
            renew_deadline: Duration::from_millis(self.election.renew_deadline_ms),
            retry_period: Duration::from_millis(self.election.retry_period_ms),
            renew_attempts: self.election.renew_attempts,
            store_timeout: self.election.store_timeout_ms.map(Duration::from_millis),
            jitter_factor: self.election.jitter_factor,
            release_on_cancel: self.election.release_on_cancel,
        }
    }

    /// Key of the lease record (`namespace/name`)
    pub fn lease_key(&self) -> String {
        lease_key(&self.store.namespace, &self.store.name)
    }

    /// Open the configured lease store backend
    pub fn open_store(&self) -> crate::Result<Arc<dyn LeaseStore>> {
        match self.store.backend {
            StoreBackend::Sqlite => {
                let store = SqliteLeaseStore::open(&self.store.path, self.lease_key())?;
                Ok(Arc::new(store))
            }
            StoreBackend::Http => {
                let url = self.store.url.as_deref().ok_or_else(|| {
                    crate::Error::Config("store.url is required for the http backend".into())
                })?;
                let store = HttpLeaseStore::new(
                    url,
                    &self.store.namespace,
                    &self.store.name,
                    self.election_config().store_timeout(),
                )?;
                Ok(Arc::new(store))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config() {
        let toml = r#"
[node]
id = "node-1"

[election]
lease_duration_ms = 15000
renew_deadline_ms = 10000
retry_period_ms = 2000
release_on_cancel = true

[store]
backend = "http"
url = "http://leases.internal:8080"
namespace = "lease-namespace"
name = "lease-name"
"#;

        let config = WolfLeaseConfig::from_str(toml).unwrap();
        assert_eq!(config.node.id, "node-1");
        assert_eq!(config.store.backend, StoreBackend::Http);
        assert_eq!(config.lease_key(), "lease-namespace/lease-name");

        let election = config.election_config();
        assert_eq!(election.lease_duration, Duration::from_secs(15));
        assert_eq!(election.store_timeout(), Duration::from_secs(1));
        assert!(election.release_on_cancel);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_defaults() {
        let config = WolfLeaseConfig::from_str("[node]\nid = \"node-1\"\n").unwrap();
        assert_eq!(config.store.backend, StoreBackend::Sqlite);
        assert_eq!(config.election.renew_attempts, 2);
        assert!(!config.election.release_on_cancel);
        assert_eq!(config.lease_key(), "default/wolflease");
    }

    #[test]
    fn test_invalid_timings_are_fatal() {
        let toml = r#"
[node]
id = "node-1"

[election]
lease_duration_ms = 5000
renew_deadline_ms = 10000
"#;
        assert!(matches!(
            WolfLeaseConfig::from_str(toml),
            Err(crate::Error::Config(_))
        ));
    }

    #[test]
    fn test_http_backend_needs_url() {
        let toml = r#"
[node]
id = "node-1"

[store]
backend = "http"
"#;
        assert!(WolfLeaseConfig::from_str(toml).is_err());
    }

    #[test]
    fn test_identity_override() {
        let toml = "[node]\nid = \"node-1\"\n";
        let mut config = WolfLeaseConfig::from_str(toml).unwrap();
        config.set_identity("pod-7").unwrap();
        assert_eq!(config.election_config().identity, "pod-7");
        assert!(config.set_identity("").is_err());
    }

    #[test]
    fn test_load_applies_identity_before_validation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wolflease.toml");
        std::fs::write(&path, "[node]\n\n[store]\nname = \"lease-name\"\n").unwrap();

        assert!(WolfLeaseConfig::from_file(&path).is_err());
        let config = WolfLeaseConfig::load(&path, Some("pod-3")).unwrap();
        assert_eq!(config.node.id, "pod-3");
        assert_eq!(config.lease_key(), "default/lease-name");
    }

    #[tokio::test]
    async fn test_open_sqlite_store() {
        let dir = tempfile::tempdir().unwrap();
        let toml = format!(
            "[node]\nid = \"node-1\"\n\n[store]\npath = \"{}\"\n",
            dir.path().join("nested/leases.db").display()
        );
        let config = WolfLeaseConfig::from_str(&toml).unwrap();
        let store = config.open_store().unwrap();

        assert!(store.describe().contains("default/wolflease"));
        assert!(matches!(
            store.read().await,
            Err(crate::error::StoreError::NotFound { .. })
        ));
    }
}
