use thiserror::Error;

/// Common error type for the Rancher exporter components.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to read '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
