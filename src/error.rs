//! Error types for the knowledge-graph extraction library

use thiserror::Error;

/// Result type alias for this library
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during graph extraction
#[derive(Error, Debug)]
pub enum Error {
    /// The external syntactic parser did not return a usable parse.
    /// Fatal for the current document; the caller may retry or abandon.
    #[error("parser unavailable: {0}")]
    ParserUnavailable(String),

    /// Text could not be segmented or offsets collided.
    /// Indicates invalid encoding in the input.
    #[error("malformed input: {0}")]
    MalformedInput(String),

    /// The identity registry observed a write-write race.
    /// Recoverable; retry with a fresh snapshot.
    #[error("identity registry conflict: {0}")]
    RegistryConflict(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// The per-document deadline passed while a stage was running
    #[error("deadline exceeded during {0}")]
    DeadlineExceeded(String),

    /// Error parsing JSON (sidecar responses, checkpoints, fixtures)
    #[error("JSON parsing error: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network or HTTP error
    #[error("network error: {0}")]
    Network(String),
}
