//! Error types for the indexer binary.

use hybrid_store::StoreError;
use thiserror::Error;

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File I/O error when loading config.
    #[error("failed to read config file '{path}': {source}")]
    FileRead {
        path: String,
        source: std::io::Error,
    },

    /// YAML parsing error.
    #[error("failed to parse config file '{path}': {source}")]
    Parse {
        path: String,
        source: serde_yaml::Error,
    },

    /// Validation failed with one or more errors.
    #[error("config validation failed:\n{}", .0.join("\n"))]
    ValidationFailed(Vec<String>),
}

/// Errors that end a command.
#[derive(Debug, Error)]
pub enum IndexerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to open input '{path}': {source}")]
    Input {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to prepare data directory '{path}': {source}")]
    DataDir {
        path: String,
        source: std::io::Error,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("failed to render status: {0}")]
    Render(#[from] serde_json::Error),

    /// The replay finished but some inputs were not projected.
    #[error("replay incomplete: {failed_chains} chain(s) stopped, {rejected_lines} line(s) rejected")]
    Incomplete {
        failed_chains: usize,
        rejected_lines: usize,
    },
}
