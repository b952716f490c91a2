//! Error types for the storage telemetry service

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the storage telemetry service
///
/// Disk probe failures and payload shape mismatches are recovered where they
/// happen and never show up here; see [`crate::smart::ProbeError`] and
/// [`crate::protocol::client::ShapeMismatch`].
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encode/decode error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML decode error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Outbound HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Static layout could not be loaded
    #[error("Failed to load storage layout from {path}: {reason}")]
    Layout { path: String, reason: String },

    /// A snapshot collector command failed
    #[error("Collector '{command}' failed: {reason}")]
    Collector { command: String, reason: String },

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}
