//! Configuration management for the keel master.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::types::{ReplicaPlacement, Ttl};

/// Data center assigned to servers that do not report one.
pub const DEFAULT_DATA_CENTER: &str = "DefaultDataCenter";

/// Rack assigned to servers that do not report one.
pub const DEFAULT_RACK: &str = "DefaultRack";

/// Main configuration for the keel master.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Volume growth configuration.
    pub growth: GrowthConfig,
    /// Provisioning transport configuration.
    pub allocator: AllocatorConfig,
    /// Logging configuration.
    pub logging: LoggingConfig,
    /// Static cluster layout used to seed the topology at startup.
    pub cluster: ClusterConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path).map_err(crate::Error::Io)?;
        Self::parse(&content)
    }

    /// Load configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the string cannot be parsed or fails validation.
    pub fn parse(content: &str) -> crate::Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| crate::Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from an optional path, falling back to defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a path is given and cannot be loaded.
    pub fn load(path: Option<&Path>) -> crate::Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }

    /// Checks cross-field constraints that serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns a configuration error describing the first violation.
    pub fn validate(&self) -> crate::Result<()> {
        if self.allocator.timeout_ms == 0 {
            return Err(crate::Error::Config("allocator.timeout_ms must be positive".to_string()));
        }
        let mut seen = HashSet::new();
        for node in &self.cluster.data_nodes {
            if node.url.is_empty() {
                return Err(crate::Error::Config("cluster data node with empty url".to_string()));
            }
            if !seen.insert(node.url.as_str()) {
                return Err(crate::Error::Config(format!(
                    "cluster data node '{}' listed twice",
                    node.url
                )));
            }
        }
        Ok(())
    }
}

/// Volume growth configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GrowthConfig {
    /// Replication applied when a request does not name one.
    pub default_replication: ReplicaPlacement,
    /// TTL applied when a request does not name one.
    pub default_ttl: Ttl,
    /// Bytes each storage node should preallocate for a new volume.
    /// Default: 0 (no preallocation).
    pub preallocate_bytes: u64,
    /// Seed for the placement RNG. Unset means a fresh entropy seed per process.
    pub rng_seed: Option<u64>,
}

impl Default for GrowthConfig {
    fn default() -> Self {
        Self {
            default_replication: ReplicaPlacement::default(),
            default_ttl: Ttl::EMPTY,
            preallocate_bytes: 0,
            rng_seed: None,
        }
    }
}

/// Provisioning transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AllocatorConfig {
    /// Transport-level timeout for one allocate call, in milliseconds.
    pub timeout_ms: u64,
    /// URL scheme used to reach storage nodes.
    pub scheme: String,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self { timeout_ms: 30_000, scheme: "http".to_string() }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    pub level: String,
    /// Log output format.
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), format: LogFormat::Pretty }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable output.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

/// Static cluster layout.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Storage servers known at startup.
    pub data_nodes: Vec<DataNodeConfig>,
}

/// One storage server in the static cluster layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataNodeConfig {
    /// Data center the server lives in.
    #[serde(default = "default_data_center")]
    pub data_center: String,
    /// Rack the server lives in.
    #[serde(default = "default_rack")]
    pub rack: String,
    /// `host:port` the master uses to reach the server. Doubles as its id.
    pub url: String,
    /// `host:port` clients use to reach the server, if different from `url`.
    #[serde(default)]
    pub public_url: Option<String>,
    /// Number of volume slots on the server.
    #[serde(default = "default_max_volumes")]
    pub max_volumes: u64,
}

fn default_data_center() -> String {
    DEFAULT_DATA_CENTER.to_string()
}

fn default_rack() -> String {
    DEFAULT_RACK.to_string()
}

fn default_max_volumes() -> u64 {
    7
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.growth.default_replication.copy_count(), 1);
        assert!(config.growth.default_ttl.is_empty());
        assert_eq!(config.allocator.timeout_ms, 30_000);
        assert_eq!(config.logging.format, LogFormat::Pretty);
        assert!(config.cluster.data_nodes.is_empty());
    }

    #[test]
    fn test_parse_full() {
        let config = Config::parse(
            r#"
            [growth]
            default_replication = "010"
            default_ttl = "3d"
            preallocate_bytes = 1048576
            rng_seed = 42

            [allocator]
            timeout_ms = 5000

            [logging]
            level = "debug"
            format = "json"

            [[cluster.data_nodes]]
            data_center = "dc1"
            rack = "r1"
            url = "10.0.0.1:8080"
            max_volumes = 10

            [[cluster.data_nodes]]
            url = "10.0.0.2:8080"
            public_url = "volumes.example.com:80"
            "#,
        )
        .unwrap();

        assert_eq!(config.growth.default_replication.to_string(), "010");
        assert_eq!(config.growth.default_ttl.to_string(), "3d");
        assert_eq!(config.growth.preallocate_bytes, 1 << 20);
        assert_eq!(config.growth.rng_seed, Some(42));
        assert_eq!(config.allocator.timeout_ms, 5000);
        assert_eq!(config.allocator.scheme, "http");
        assert_eq!(config.logging.format, LogFormat::Json);

        let nodes = &config.cluster.data_nodes;
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].max_volumes, 10);
        assert_eq!(nodes[1].data_center, DEFAULT_DATA_CENTER);
        assert_eq!(nodes[1].rack, DEFAULT_RACK);
        assert_eq!(nodes[1].max_volumes, 7);
        assert_eq!(nodes[1].public_url.as_deref(), Some("volumes.example.com:80"));
    }

    #[test]
    fn test_parse_rejects_bad_replication() {
        let err = Config::parse("[growth]\ndefault_replication = \"0x0\"\n").unwrap_err();
        assert!(matches!(err, crate::Error::Config(_)));
    }

    #[test]
    fn test_validate_duplicate_nodes() {
        let err = Config::parse(
            r#"
            [[cluster.data_nodes]]
            url = "10.0.0.1:8080"

            [[cluster.data_nodes]]
            url = "10.0.0.1:8080"
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("listed twice"));
    }

    #[test]
    fn test_validate_zero_timeout() {
        let err = Config::parse("[allocator]\ntimeout_ms = 0\n").unwrap_err();
        assert!(err.to_string().contains("timeout_ms"));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[logging]\nlevel = \"warn\"").unwrap();

        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.logging.level, "warn");

        let config = Config::load(None).unwrap();
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_load_missing_file() {
        let err = Config::load(Some(Path::new("/nonexistent/keel.toml"))).unwrap_err();
        assert!(matches!(err, crate::Error::Io(_)));
    }
}
