//! Library side of the `hybrid-indexer` binary: configuration, replay input
//! and the two commands.

pub mod commands;
pub mod config;
pub mod errors;
pub mod replay;

pub use config::{resolve_config, IndexerConfig, Overrides};
pub use errors::{ConfigError, IndexerError};

use tracing_subscriber::{fmt, EnvFilter};

/// Install the global subscriber. `RUST_LOG` wins over `log_level`.
pub fn init_tracing(log_level: &str) {
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level)),
        )
        .init();
}
