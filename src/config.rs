use crate::lifecycle::FailureThresholds;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct SupervisorConfig {
    #[serde(default)]
    pub node: NodeConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub process: ProcessConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct NodeConfig {
    /// Node name inside the search cluster
    #[serde(default = "default_node_name")]
    pub name: String,

    /// Hostname other nodes and the REST client use to reach this node
    #[serde(default = "default_hostname")]
    pub hostname: String,

    #[serde(default = "default_cluster_name")]
    pub cluster_name: String,

    #[serde(default = "default_http_port")]
    pub http_port: u16,

    #[serde(default = "default_transport_port")]
    pub transport_port: u16,

    /// JVM heap, used for both initial and maximum heap
    #[serde(default = "default_heap")]
    pub heap: String,

    #[serde(default = "default_roles")]
    pub roles: Vec<String>,

    /// Form a single-node cluster without discovery
    #[serde(default)]
    pub single_node: bool,

    #[serde(default)]
    pub initial_cluster_manager_nodes: Vec<String>,

    /// Static seed hosts, used when the node registry knows no peers
    #[serde(default)]
    pub seed_hosts: Vec<String>,

    /// Address published to other nodes
    #[serde(default)]
    pub network_host: Option<String>,

    #[serde(default = "default_bind_host")]
    pub bind_host: String,

    #[serde(default = "default_bool_max_clause_count")]
    pub bool_max_clause_count: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PathsConfig {
    /// Root of the bundled engine distribution
    #[serde(default = "default_distribution")]
    pub distribution: String,

    /// Writable config directory, regenerated on every start
    #[serde(default = "default_config_dir")]
    pub config_dir: String,

    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    #[serde(default = "default_logs_dir")]
    pub logs_dir: String,

    /// Snapshot repository locations, enables the search role
    #[serde(default)]
    pub repo: Vec<String>,

    /// Optional `key=value` file with raw engine settings
    #[serde(default)]
    pub overrides_file: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct SecurityConfig {
    /// Start without TLS even though certificates could be configured
    #[serde(default)]
    pub insecure_startup: bool,

    /// Directory user-provided keystores are resolved against
    #[serde(default)]
    pub certificate_dir: Option<String>,

    #[serde(default)]
    pub http_certificate: Option<String>,

    #[serde(default)]
    pub http_certificate_password: Option<String>,

    #[serde(default)]
    pub transport_certificate: Option<String>,

    #[serde(default)]
    pub transport_certificate_password: Option<String>,

    /// Directory with additional DER or PEM certificates to trust
    #[serde(default)]
    pub trusted_certificates_dir: Option<String>,

    #[serde(default)]
    pub rest_username: Option<String>,

    #[serde(default)]
    pub rest_password: Option<String>,

    #[serde(default)]
    pub audit_type: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SearchConfig {
    /// Local cache for searchable snapshots, e.g. "10GB"
    #[serde(default = "default_cache_size")]
    pub cache_size: String,

    /// Object storage repository is configured (enables the search role)
    #[serde(default)]
    pub object_storage: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct HealthConfig {
    #[serde(default = "default_liveness_interval_ms")]
    pub liveness_interval_ms: u64,

    #[serde(default = "default_health_interval_ms")]
    pub health_interval_ms: u64,

    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    #[serde(default = "default_startup_failure_threshold")]
    pub startup_failure_threshold: u32,

    #[serde(default = "default_transient_failure_threshold")]
    pub transient_failure_threshold: u32,

    #[serde(default = "default_reboot_limit")]
    pub reboot_limit: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ProcessConfig {
    /// Lines of stdout/stderr kept in memory per stream
    #[serde(default = "default_log_buffer_size")]
    pub log_buffer_size: usize,

    /// How long to wait for the process to exit after SIGTERM
    #[serde(default = "default_stop_timeout_ms")]
    pub stop_timeout_ms: u64,

    /// How long to wait for the log readers to finish after exit
    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,

    /// Prefix of pass-through settings in the environment and overrides file
    #[serde(default = "default_passthrough_prefix")]
    pub passthrough_prefix: String,

    #[serde(default = "default_event_bus_capacity")]
    pub event_bus_capacity: usize,
}

impl SupervisorConfig {
    /// Load configuration from default sources (file + environment variables)
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_file("searchnode.toml")
    }

    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let settings = Config::builder()
            .add_source(File::with_name(&path_str).required(false))
            // SEARCHNODE_NODE__HTTP_PORT=9201
            .add_source(
                Environment::with_prefix("SEARCHNODE")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        let config: SupervisorConfig = settings.try_deserialize()?;

        info!("Configuration loaded successfully");
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.node.name.trim().is_empty() {
            return Err(ConfigError::Message(
                "Node name must not be empty".to_string(),
            ));
        }

        if self.node.http_port == 0 || self.node.transport_port == 0 {
            return Err(ConfigError::Message(
                "HTTP and transport ports must be greater than 0".to_string(),
            ));
        }

        if self.node.http_port == self.node.transport_port {
            return Err(ConfigError::Message(
                "HTTP and transport ports must differ".to_string(),
            ));
        }

        if self.process.log_buffer_size == 0 {
            return Err(ConfigError::Message(
                "Process log buffer size must be greater than 0".to_string(),
            ));
        }

        if self.process.event_bus_capacity == 0 {
            return Err(ConfigError::Message(
                "Event bus capacity must be greater than 0".to_string(),
            ));
        }

        if self.health.liveness_interval_ms == 0 || self.health.health_interval_ms == 0 {
            return Err(ConfigError::Message(
                "Health check intervals must be greater than 0".to_string(),
            ));
        }

        if self.health.startup_failure_threshold == 0
            || self.health.transient_failure_threshold == 0
        {
            return Err(ConfigError::Message(
                "Failure thresholds must be greater than 0".to_string(),
            ));
        }

        if self.process.passthrough_prefix.is_empty()
            || !self
                .process
                .passthrough_prefix
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        {
            return Err(ConfigError::Message(
                "Pass-through prefix must be a non-empty lowercase identifier".to_string(),
            ));
        }

        Ok(())
    }

    pub fn distribution_dir(&self) -> PathBuf {
        PathBuf::from(&self.paths.distribution)
    }

    pub fn config_dir(&self) -> PathBuf {
        PathBuf::from(&self.paths.config_dir)
    }

    /// Per-node data directory
    pub fn node_data_dir(&self) -> PathBuf {
        PathBuf::from(&self.paths.data_dir).join(&self.node.name)
    }

    pub fn node_logs_dir(&self) -> PathBuf {
        PathBuf::from(&self.paths.logs_dir).join(&self.node.name)
    }

    pub fn failure_thresholds(&self) -> FailureThresholds {
        FailureThresholds {
            startup: self.health.startup_failure_threshold,
            transient: self.health.transient_failure_threshold,
            reboot: self.health.reboot_limit,
        }
    }

    pub fn liveness_interval(&self) -> Duration {
        Duration::from_millis(self.health.liveness_interval_ms)
    }

    pub fn health_interval(&self) -> Duration {
        Duration::from_millis(self.health.health_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.health.request_timeout_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.process.stop_timeout_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.process.drain_timeout_ms)
    }

    /// Address other nodes use to reach this node's transport layer
    pub fn cluster_address(&self) -> String {
        format!("{}:{}", self.node.hostname, self.node.transport_port)
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name: default_node_name(),
            hostname: default_hostname(),
            cluster_name: default_cluster_name(),
            http_port: default_http_port(),
            transport_port: default_transport_port(),
            heap: default_heap(),
            roles: default_roles(),
            single_node: false,
            initial_cluster_manager_nodes: Vec::new(),
            seed_hosts: Vec::new(),
            network_host: None,
            bind_host: default_bind_host(),
            bool_max_clause_count: default_bool_max_clause_count(),
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            distribution: default_distribution(),
            config_dir: default_config_dir(),
            data_dir: default_data_dir(),
            logs_dir: default_logs_dir(),
            repo: Vec::new(),
            overrides_file: None,
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            cache_size: default_cache_size(),
            object_storage: false,
        }
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            liveness_interval_ms: default_liveness_interval_ms(),
            health_interval_ms: default_health_interval_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            startup_failure_threshold: default_startup_failure_threshold(),
            transient_failure_threshold: default_transient_failure_threshold(),
            reboot_limit: default_reboot_limit(),
        }
    }
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            log_buffer_size: default_log_buffer_size(),
            stop_timeout_ms: default_stop_timeout_ms(),
            drain_timeout_ms: default_drain_timeout_ms(),
            passthrough_prefix: default_passthrough_prefix(),
            event_bus_capacity: default_event_bus_capacity(),
        }
    }
}

// Default value functions
fn default_node_name() -> String {
    "node1".to_string()
}
fn default_hostname() -> String {
    "localhost".to_string()
}
fn default_cluster_name() -> String {
    "datanode-cluster".to_string()
}
fn default_http_port() -> u16 {
    9200
}
fn default_transport_port() -> u16 {
    9300
}
fn default_heap() -> String {
    "1g".to_string()
}
fn default_roles() -> Vec<String> {
    ["cluster_manager", "data", "ingest", "remote_cluster_client", "search"]
        .iter()
        .map(|r| r.to_string())
        .collect()
}
fn default_bind_host() -> String {
    "0.0.0.0".to_string()
}
fn default_bool_max_clause_count() -> u32 {
    32768
}

fn default_distribution() -> String {
    "dist".to_string()
}
fn default_config_dir() -> String {
    "datanode/config".to_string()
}
fn default_data_dir() -> String {
    "datanode/data".to_string()
}
fn default_logs_dir() -> String {
    "datanode/logs".to_string()
}

fn default_cache_size() -> String {
    "10gb".to_string()
}

fn default_liveness_interval_ms() -> u64 {
    1000
}
fn default_health_interval_ms() -> u64 {
    10_000
}
fn default_request_timeout_ms() -> u64 {
    5000
}
fn default_startup_failure_threshold() -> u32 {
    5
}
fn default_transient_failure_threshold() -> u32 {
    3
}
fn default_reboot_limit() -> u32 {
    3
}

fn default_log_buffer_size() -> usize {
    500
}
fn default_stop_timeout_ms() -> u64 {
    30_000
}
fn default_drain_timeout_ms() -> u64 {
    5000
}
fn default_passthrough_prefix() -> String {
    "opensearch".to_string()
}
fn default_event_bus_capacity() -> usize {
    256
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = SupervisorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.node.http_port, 9200);
        assert_eq!(config.failure_thresholds().startup, 5);
        assert_eq!(config.liveness_interval(), Duration::from_secs(1));
        assert_eq!(config.health_interval(), Duration::from_secs(10));
        assert_eq!(config.cluster_address(), "localhost:9300");
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::with_suffix(".toml").unwrap();
        writeln!(
            file,
            r#"
[node]
name = "alpha"
http_port = 9201
seed_hosts = ["beta:9300", "gamma:9300"]

[search]
cache_size = "2GB"
"#
        )
        .unwrap();

        let config = SupervisorConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.node.name, "alpha");
        assert_eq!(config.node.http_port, 9201);
        assert_eq!(config.node.transport_port, 9300);
        assert_eq!(config.node.seed_hosts.len(), 2);
        assert_eq!(config.search.cache_size, "2GB");
        assert_eq!(config.process.log_buffer_size, 500);
        assert_eq!(config.node_data_dir(), PathBuf::from("datanode/data/alpha"));
    }

    #[test]
    fn test_config_validation() {
        let mut config = SupervisorConfig::default();
        config.node.transport_port = config.node.http_port;
        assert!(config.validate().is_err());

        config.node.transport_port = 9300;
        config.process.passthrough_prefix = "Open-Search".to_string();
        assert!(config.validate().is_err());

        config.process.passthrough_prefix = "opensearch".to_string();
        config.health.startup_failure_threshold = 0;
        assert!(config.validate().is_err());

        config.health.startup_failure_threshold = 5;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_config_serializes_to_toml() {
        let rendered = toml::to_string_pretty(&SupervisorConfig::default()).unwrap();
        assert!(rendered.contains("[node]"));
        assert!(rendered.contains("cache_size = \"10gb\""));
    }
}
