//! Error types for the playground engine

use thiserror::Error;

/// Result type alias for playground operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the playground engine
///
/// None of these are fatal to an editing session: the session logs or
/// swallows them and stays interactive.
#[derive(Error, Debug)]
pub enum Error {
    /// Failed to start a surface worker or other engine component
    #[error("Initialization failed: {0}")]
    InitializationError(String),

    /// Failed to hand a document to an execution surface
    #[error("Failed to load document: {0}")]
    LoadError(String),

    /// Failed to prepare or run script inside a surface
    #[error("Script execution failed: {0}")]
    ScriptError(String),

    /// Snapshot read/write failure
    #[error("Storage error: {0}")]
    StorageError(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::StorageError(format!("snapshot serialization failed: {}", err))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::StorageError(err.to_string())
    }
}
