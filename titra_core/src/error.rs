//! Error types for the titra_core library.

use std::io;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for titra_core operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// IO error occurred
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// TOML parsing error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Configuration validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Entry store error
    #[error("Store error: {0}")]
    Store(String),

    /// Draft lifecycle misuse (e.g. ending a draft with no active take)
    #[error("Draft error: {0}")]
    Draft(String),

    /// Malformed import payload
    #[error("Import error: {0}")]
    Import(String),

    /// Timestamp construction error
    #[error("Time error: {0}")]
    Time(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}
