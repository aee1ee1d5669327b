//! # Configuration
//!
//! Layered application configuration: a TOML file, overridden by
//! `ENROLLD_`-prefixed environment variables, overridden in turn by explicit
//! CLI flags — the same layering order as the teacher's `RuntimeConfig`
//! (`config` crate file+env sources) merged with `clap::Parser` (CLI flags
//! applied last, directly by the binary).

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_bind_addr() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    1515
}
fn default_request_timeout_secs() -> u64 {
    10
}
fn default_queue_capacity() -> usize {
    64
}

impl NetworkConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TlsConfig {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
    pub client_ca_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EnrollmentConfig {
    pub password: Option<String>,
    #[serde(default = "default_key_len_bytes")]
    pub key_len_bytes: usize,
}

fn default_key_len_bytes() -> usize {
    32
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClusterModeConfig {
    Standalone,
    Master,
    Worker,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClusterConfig {
    #[serde(default = "default_cluster_mode")]
    pub mode: ClusterModeConfig,
    pub master_socket: Option<PathBuf>,
}

fn default_cluster_mode() -> ClusterModeConfig {
    ClusterModeConfig::Standalone
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentsDbConfig {
    pub socket_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PathsConfig {
    pub key_file: PathBuf,
    pub timestamp_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("/var/log/enrolld")
}
fn default_log_filter() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub network: NetworkConfig,
    pub tls: TlsConfig,
    #[serde(default)]
    pub enrollment: EnrollmentConfig,
    #[serde(default)]
    pub cluster: ClusterConfig,
    #[serde(default)]
    pub agents_db: AgentsDbConfig,
    pub paths: PathsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            port: default_port(),
            request_timeout_secs: default_request_timeout_secs(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl Default for EnrollmentConfig {
    fn default() -> Self {
        Self { password: None, key_len_bytes: default_key_len_bytes() }
    }
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self { mode: default_cluster_mode(), master_socket: None }
    }
}

impl Default for AgentsDbConfig {
    fn default() -> Self {
        Self { socket_path: None }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { log_dir: default_log_dir(), filter: default_log_filter() }
    }
}

/// CLI overrides layered on top of the file+env configuration. Field names
/// mirror `AppConfig`'s dotted paths so they can be applied generically.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub config_path: Option<PathBuf>,
    pub port: Option<u16>,
    pub foreground: bool,
}

/// Load configuration from `path` (TOML), then environment variables
/// prefixed `ENROLLD_` (double-underscore separated for nested keys, e.g.
/// `ENROLLD_NETWORK__PORT`), then apply explicit CLI overrides last.
pub fn load(path: &std::path::Path, overrides: &CliOverrides) -> Result<AppConfig, ConfigError> {
    let builder = config::Config::builder()
        .add_source(config::File::from(path))
        .add_source(config::Environment::with_prefix("ENROLLD").separator("__"));

    let settings = builder.build()?;
    let mut app: AppConfig = settings.try_deserialize()?;

    if let Some(port) = overrides.port {
        app.network.port = port;
    }

    if app.paths.key_file.as_os_str().is_empty() {
        return Err(ConfigError::Invalid("paths.key_file must be set".to_string()));
    }

    Ok(app)
}
