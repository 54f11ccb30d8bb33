//! YAML configuration for the indexer.
//!
//! ```yaml
//! storage:
//!   path: "./data"
//! retention:
//!   window_secs: 600
//!   cleanup_interval: 1000
//!   cleanup_batch_size: 100
//!   default_blocks_per_window: 50
//!   blocks_per_window:
//!     8453: 300
//! dispatch:
//!   channel_capacity: 1024
//! observability:
//!   log_level: "info"
//! ```
//!
//! Every section is optional. An explicit `blocks_per_window` table replaces
//! the built-in one.

use std::path::{Path, PathBuf};

use hybrid_projection::dispatch::DEFAULT_CHANNEL_CAPACITY;
use hybrid_projection::RetentionConfig;
use serde::Deserialize;

use crate::errors::ConfigError;

/// File name of the SQLite database inside the storage directory.
pub const DATABASE_FILE: &str = "hybrid-indexer.sqlite";

/// Root configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IndexerConfig {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub retention: RetentionConfig,

    #[serde(default)]
    pub dispatch: DispatchConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl IndexerConfig {
    pub fn database_path(&self) -> PathBuf {
        Path::new(&self.storage.path).join(DATABASE_FILE)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// Directory holding the SQLite database.
    #[serde(default = "StorageConfig::default_path")]
    pub path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: Self::default_path(),
        }
    }
}

impl StorageConfig {
    fn default_path() -> String {
        "./data".to_string()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DispatchConfig {
    /// Inputs buffered per chain before submission waits.
    #[serde(default = "DispatchConfig::default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            channel_capacity: Self::default_channel_capacity(),
        }
    }
}

impl DispatchConfig {
    const fn default_channel_capacity() -> usize {
        DEFAULT_CHANNEL_CAPACITY
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ObservabilityConfig {
    /// Log level: trace, debug, info, warn, error. Default: info.
    #[serde(default = "ObservabilityConfig::default_log_level")]
    pub log_level: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: Self::default_log_level(),
        }
    }
}

impl ObservabilityConfig {
    fn default_log_level() -> String {
        "info".to_string()
    }
}

/// Command-line overrides, applied on top of the file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub data_dir: Option<String>,
    pub log_level: Option<String>,
}

/// Load and validate configuration from a YAML file.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<IndexerConfig, ConfigError> {
    let config = parse_config_file(path.as_ref())?;
    validate_config(&config)?;
    Ok(config)
}

/// Load and validate configuration from a YAML string.
pub fn load_config_from_str(
    content: &str,
    source_name: &str,
) -> Result<IndexerConfig, ConfigError> {
    let config = parse_config(content, source_name)?;
    validate_config(&config)?;
    Ok(config)
}

/// Resolve configuration: defaults < YAML file < CLI overrides, then validate.
pub fn resolve_config(
    path: Option<&Path>,
    overrides: &Overrides,
) -> Result<IndexerConfig, ConfigError> {
    let mut config = match path {
        Some(path) => parse_config_file(path)?,
        None => IndexerConfig::default(),
    };

    if let Some(ref dir) = overrides.data_dir {
        config.storage.path = dir.clone();
    }
    if let Some(ref level) = overrides.log_level {
        config.observability.log_level = level.clone();
    }

    validate_config(&config)?;
    Ok(config)
}

fn parse_config_file(path: &Path) -> Result<IndexerConfig, ConfigError> {
    let path_str = path.display().to_string();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path_str.clone(),
        source: e,
    })?;
    parse_config(&content, &path_str)
}

fn parse_config(content: &str, source_name: &str) -> Result<IndexerConfig, ConfigError> {
    serde_yaml::from_str(content).map_err(|e| ConfigError::Parse {
        path: source_name.to_string(),
        source: e,
    })
}

/// Validate the configuration, collecting every error before returning.
pub fn validate_config(config: &IndexerConfig) -> Result<(), ConfigError> {
    let mut errors = Vec::new();

    if config.storage.path.is_empty() {
        errors.push("storage.path cannot be empty".to_string());
    }
    validate_retention_config(&config.retention, &mut errors);
    if config.dispatch.channel_capacity == 0 {
        errors.push("dispatch.channel_capacity must be greater than 0".to_string());
    }
    validate_observability_config(&config.observability, &mut errors);

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationFailed(errors))
    }
}

fn validate_retention_config(config: &RetentionConfig, errors: &mut Vec<String>) {
    let positive = [
        ("window_secs", config.window_secs),
        ("cleanup_interval", config.cleanup_interval),
        ("cleanup_batch_size", config.cleanup_batch_size),
        ("default_blocks_per_window", config.default_blocks_per_window),
    ];
    for (name, value) in positive {
        if value == 0 {
            errors.push(format!("retention.{name} must be greater than 0"));
        }
    }

    for (chain_id, blocks) in &config.blocks_per_window {
        if *chain_id == 0 {
            errors.push("retention.blocks_per_window has an entry for chain 0".to_string());
        }
        if *blocks == 0 {
            errors.push(format!(
                "retention.blocks_per_window[{chain_id}] must be greater than 0"
            ));
        }
    }
}

fn validate_observability_config(config: &ObservabilityConfig, errors: &mut Vec<String>) {
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if !valid_levels.contains(&config.log_level.to_lowercase().as_str()) {
        errors.push(format!(
            "observability.log_level '{}' is invalid. Valid levels: trace, debug, info, warn, error",
            config.log_level
        ));
    }
}
