//! Application Configuration
//!
//! This module provides configuration management for the application,
//! supporting YAML configuration files with sensible defaults and a small
//! set of environment overrides.

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;
use log::{info, warn};

use crate::error::{StoreError, StoreResult};

/// Default location of the configuration file
pub const DEFAULT_CONFIG_PATH: &str = "config.yaml";

/// Which side of the master/node protocol this process plays
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Master,
    Node,
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "master" => Ok(Role::Master),
            "node" => Ok(Role::Node),
            _ => Err(format!("Unknown role: {}", s)),
        }
    }
}

/// Blob storage backend types
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Local,
    Mock,
}

impl std::str::FromStr for StorageBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local" | "disk" => Ok(StorageBackend::Local),
            "mock" => Ok(StorageBackend::Mock),
            _ => Err(format!("Unknown storage backend: {}", s)),
        }
    }
}

/// Metadata backend types
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum MetadataBackend {
    #[default]
    SQLite,
    Mock,
}

impl std::str::FromStr for MetadataBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sqlite" => Ok(MetadataBackend::SQLite),
            "mock" => Ok(MetadataBackend::Mock),
            _ => Err(format!("Unknown metadata backend: {}", s)),
        }
    }
}

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub role: Role,
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub metadata: MetadataConfig,
    pub signing: SigningConfig,
    /// Master-side settings for talking to storage nodes
    pub nodes: NodesConfig,
    /// Settings used when this process runs as a storage node
    pub node: NodeRoleConfig,
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Number of worker threads
    pub workers: usize,
    /// Maximum payload size in bytes
    pub max_payload_size: usize,
    /// Public base URL used when building signed URLs
    pub base_url: String,
}

/// Local blob storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Root directory, objects live under `{base_path}/{bucket}/{object_id}`
    pub base_path: String,
    /// Capacity ceiling of the local disk in bytes
    pub max_storage: u64,
}

/// Metadata backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetadataConfig {
    pub backend: MetadataBackend,
    pub db_path: String,
    /// Enable WAL mode
    pub wal_mode: bool,
}

/// Capability token signing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SigningConfig {
    pub secret: String,
    pub min_ttl_secs: i64,
    pub max_ttl_secs: i64,
}

/// How the master reaches its nodes
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodesConfig {
    /// Timeout for liveness probes
    pub probe_timeout_secs: u64,
    /// Timeout for proxied object writes, reads and deletes
    pub proxy_timeout_secs: u64,
    pub health_sweep_enabled: bool,
    pub health_sweep_interval_secs: u64,
    /// Recompute node usage counters from the catalog after each sweep
    pub reconcile_usage: bool,
}

/// Node role configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeRoleConfig {
    pub master_url: String,
    pub name: String,
    /// URL under which the master can reach this node
    pub public_url: String,
    pub capacity: u64,
    pub priority: i32,
    /// File holding the shared secret handed out by the master
    pub secret_file: String,
    pub ping_interval_secs: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Path to log4rs configuration file
    pub config_file: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            workers: 4,
            max_payload_size: 1073741824, // 1GB
            base_url: "http://localhost:8080".to_string(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Local,
            base_path: "./data/storage".to_string(),
            max_storage: 10 * 1024 * 1024 * 1024, // 10GB
        }
    }
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            backend: MetadataBackend::SQLite,
            db_path: "./data/metadata.db".to_string(),
            wal_mode: true,
        }
    }
}

impl Default for SigningConfig {
    fn default() -> Self {
        Self {
            secret: "change-me-signature-secret".to_string(),
            min_ttl_secs: 60,
            max_ttl_secs: 604800, // 7 days
        }
    }
}

impl Default for NodesConfig {
    fn default() -> Self {
        Self {
            probe_timeout_secs: 10,
            proxy_timeout_secs: 30,
            health_sweep_enabled: true,
            health_sweep_interval_secs: 60,
            reconcile_usage: true,
        }
    }
}

impl Default for NodeRoleConfig {
    fn default() -> Self {
        Self {
            master_url: String::new(),
            name: "storage-node".to_string(),
            public_url: String::new(),
            capacity: 10 * 1024 * 1024 * 1024,
            priority: 1,
            secret_file: "./data/node_secret".to_string(),
            ping_interval_secs: 30,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            config_file: "server_log.yaml".to_string(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            role: Role::Master,
            server: ServerConfig::default(),
            storage: StorageConfig::default(),
            metadata: MetadataConfig::default(),
            signing: SigningConfig::default(),
            nodes: NodesConfig::default(),
            node: NodeRoleConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the file named by `SHARDBUCKET_CONFIG`
    /// (or `config.yaml`), use defaults if not found
    pub fn load() -> StoreResult<Self> {
        let config_path = env::var("SHARDBUCKET_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(config_path: &str) -> StoreResult<Self> {
        let mut config = if Path::new(config_path).exists() {
            let content = fs::read_to_string(config_path)?;
            let config = Self::from_yaml(&content)?;
            info!("Loaded configuration from {}", config_path);
            config
        } else {
            warn!("Config file {} not found, using defaults", config_path);
            Self::default()
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml(content: &str) -> StoreResult<Self> {
        serde_yaml::from_str(content)
            .map_err(|e| StoreError::BadRequest(format!("invalid configuration: {}", e)))
    }

    /// Apply environment overrides on top of file values
    pub fn apply_env_overrides(&mut self) {
        if let Ok(secret) = env::var("SIGNATURE_SECRET") {
            info!("Using signature secret from environment");
            self.signing.secret = secret;
        }
        if let Ok(base_url) = env::var("BASE_URL") {
            self.server.base_url = base_url;
        }
        if let Ok(path) = env::var("STORAGE_PATH") {
            info!("Using storage path from environment: {}", path);
            self.storage.base_path = path;
        }
        if let Ok(value) = env::var("MAX_STORAGE") {
            match value.parse::<u64>() {
                Ok(max_storage) => self.storage.max_storage = max_storage,
                Err(e) => warn!("Invalid MAX_STORAGE in environment: {}. Keeping {}", e, self.storage.max_storage),
            }
        }
        if let Ok(path) = env::var("DB_FILE") {
            info!("Using database path from environment: {}", path);
            self.metadata.db_path = path;
        }
        if let Ok(value) = env::var("SHARDBUCKET_ROLE") {
            match value.parse::<Role>() {
                Ok(role) => self.role = role,
                Err(e) => warn!("Invalid role in environment: {}. Keeping {:?}", e, self.role),
            }
        }
    }

    pub fn validate(&self) -> StoreResult<()> {
        if self.signing.secret.is_empty() {
            return Err(StoreError::BadRequest("signing.secret must not be empty".to_string()));
        }
        if self.signing.min_ttl_secs > self.signing.max_ttl_secs {
            return Err(StoreError::BadRequest(
                "signing.min_ttl_secs must not exceed signing.max_ttl_secs".to_string(),
            ));
        }
        if self.role == Role::Node && (self.node.master_url.is_empty() || self.node.public_url.is_empty()) {
            return Err(StoreError::BadRequest(
                "node role requires node.master_url and node.public_url".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_backend_from_str() {
        assert_eq!("local".parse::<StorageBackend>().unwrap(), StorageBackend::Local);
        assert_eq!("DISK".parse::<StorageBackend>().unwrap(), StorageBackend::Local);
        assert_eq!("Mock".parse::<StorageBackend>().unwrap(), StorageBackend::Mock);
        assert_eq!("sqlite".parse::<MetadataBackend>().unwrap(), MetadataBackend::SQLite);
        assert_eq!("NODE".parse::<Role>().unwrap(), Role::Node);
        assert!("xfs".parse::<StorageBackend>().is_err());
        assert!("postgres".parse::<MetadataBackend>().is_err());
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let yaml = r#"
storage:
  base_path: /srv/objects
  max_storage: 2048
signing:
  secret: s3cr3t
"#;
        let config = AppConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.role, Role::Master);
        assert_eq!(config.storage.base_path, "/srv/objects");
        assert_eq!(config.storage.max_storage, 2048);
        assert_eq!(config.storage.backend, StorageBackend::Local);
        assert_eq!(config.signing.secret, "s3cr3t");
        assert_eq!(config.signing.max_ttl_secs, 604800);
        assert_eq!(config.nodes.probe_timeout_secs, 10);
    }

    #[test]
    fn test_validate_rejects_node_without_master() {
        let mut config = AppConfig::default();
        config.role = Role::Node;
        assert!(config.validate().is_err());

        config.node.master_url = "http://master:8080".to_string();
        config.node.public_url = "http://node-1:8081".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_inverted_ttl_bounds() {
        let mut config = AppConfig::default();
        config.signing.min_ttl_secs = 100;
        config.signing.max_ttl_secs = 10;
        assert!(config.validate().is_err());
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        env::set_var("MAX_STORAGE", "4096");
        env::set_var("SIGNATURE_SECRET", "from-env");
        env::set_var("SHARDBUCKET_ROLE", "bogus");

        let mut config = AppConfig::default();
        config.apply_env_overrides();
        assert_eq!(config.storage.max_storage, 4096);
        assert_eq!(config.signing.secret, "from-env");
        assert_eq!(config.role, Role::Master);

        env::set_var("MAX_STORAGE", "lots");
        config.apply_env_overrides();
        assert_eq!(config.storage.max_storage, 4096);

        env::remove_var("MAX_STORAGE");
        env::remove_var("SIGNATURE_SECRET");
        env::remove_var("SHARDBUCKET_ROLE");
    }

    #[test]
    #[serial]
    fn test_load_from_missing_file_uses_defaults() {
        let config = AppConfig::load_from("definitely/not/here.yaml").unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.metadata.backend, MetadataBackend::SQLite);
    }
}
