//! Error types for the bridge.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Settings file could not be read or written.
    #[error("Settings store: {0}")]
    Settings(String),

    #[error("Invalid config: {0}")]
    Config(String),

    /// Backend child process could not be spawned or controlled.
    #[error("Backend: {0}")]
    Backend(String),

    /// Destination name that no sink route knows how to reach.
    #[error("Unknown print destination: {0}")]
    UnknownDestination(String),

    #[error("Printer {destination} unreachable: {reason}")]
    PrinterUnreachable { destination: String, reason: String },

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("No clock entries to print")]
    NoClockEntries,

    /// Media path outside the permitted directory, or no directory set.
    #[error("{0}")]
    PathRejected(String),
}

pub type BridgeResult<T> = Result<T, BridgeError>;
