//! Configuration error types.

use thiserror::Error;

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors raised while reading settings or a scripted run.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid settings: {0}")]
    Settings(#[from] toml::de::Error),

    #[error("invalid script: {0}")]
    Script(#[from] serde_json::Error),

    #[error("invalid topology: {0}")]
    Topology(String),

    #[error("host {host} cannot be used with {transport} transport")]
    IncompatibleHost { host: String, transport: String },
}
