use chrono_tz::Tz;
use serde::Deserialize;
use std::path::PathBuf;

/// Main configuration for the receiver service
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// Record storage configuration
    #[serde(default)]
    pub storage: StorageConfig,
    /// HTTP API configuration
    #[serde(default)]
    pub api: ApiConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging/metrics
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Metrics port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
    /// IANA zone for receipt timestamps
    #[serde(default = "default_time_zone")]
    pub time_zone: String,
}

/// Which medium holds records
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Local,
    S3,
}

/// Record storage configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
    /// Selected backend
    #[serde(default)]
    pub backend: BackendKind,
    /// Local directory settings
    #[serde(default)]
    pub local: LocalConfig,
    /// S3 bucket settings
    #[serde(default)]
    pub s3: S3Config,
}

/// Local directory storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LocalConfig {
    /// Directory records are written under
    #[serde(default = "default_root_dir")]
    pub root_dir: PathBuf,
    /// Directory names skipped when listing
    #[serde(default = "default_exclude_dirs")]
    pub exclude_dirs: Vec<String>,
}

/// S3 storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct S3Config {
    /// Bucket holding records
    #[serde(default)]
    pub bucket: String,
    /// AWS region
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint URL (for MinIO, LocalStack, etc.)
    pub endpoint_url: Option<String>,
    /// Force path-style access (required for MinIO)
    #[serde(default)]
    pub force_path_style: bool,
}

/// HTTP API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// API listen address
    #[serde(default = "default_api_host")]
    pub host: String,
    /// API listen port
    #[serde(default = "default_api_port")]
    pub port: u16,
    /// Enable CORS
    #[serde(default = "default_true")]
    pub cors_enabled: bool,
    /// Allowed CORS origins (empty = any)
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

// Default value functions
fn default_service_name() -> String {
    "receiver-service".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_time_zone() -> String {
    "US/Eastern".to_string()
}

fn default_root_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_exclude_dirs() -> Vec<String> {
    vec![".git".to_string(), "tmp.gitignore".to_string()]
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    8080
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from environment and config files
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .set_default("service.name", default_service_name())?
            .set_default("service.log_level", default_log_level())?
            .set_default("service.metrics_port", 9090)?
            .set_default("service.time_zone", default_time_zone())?
            .set_default("storage.backend", "local")?
            .add_source(config::File::with_name("config/receiver").required(false))
            .add_source(config::File::with_name("/etc/receiver/receiver").required(false))
            // RECEIVER__STORAGE__S3__BUCKET -> storage.s3.bucket
            .add_source(
                config::Environment::with_prefix("RECEIVER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize().map_err(Into::into)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        self.time_zone()?;

        if self.storage.backend == BackendKind::S3 && self.storage.s3.bucket.is_empty() {
            return Err(ConfigValidationError::MissingField(
                "storage.s3.bucket".to_string(),
            ));
        }

        if self.storage.backend == BackendKind::Local
            && self.storage.local.root_dir.as_os_str().is_empty()
        {
            return Err(ConfigValidationError::MissingField(
                "storage.local.root_dir".to_string(),
            ));
        }

        Ok(())
    }

    /// Parse the configured zone for receipt timestamps
    pub fn time_zone(&self) -> Result<Tz, ConfigValidationError> {
        self.service
            .time_zone
            .parse::<Tz>()
            .map_err(|e| ConfigValidationError::InvalidValue {
                field: "service.time_zone".to_string(),
                message: e.to_string(),
            })
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            metrics_port: default_metrics_port(),
            time_zone: default_time_zone(),
        }
    }
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            root_dir: default_root_dir(),
            exclude_dirs: default_exclude_dirs(),
        }
    }
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            region: default_region(),
            endpoint_url: None,
            force_path_style: false,
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            port: default_api_port(),
            cors_enabled: default_true(),
            cors_origins: Vec::new(),
        }
    }
}

/// Configuration validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}
