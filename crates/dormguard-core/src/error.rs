//! Core error types for dormguard-core.
//!
//! Nothing in this crate treats an error as fatal. Source failures skip a
//! poll tick, malformed rows degrade to placeholders, and notification
//! failures are dropped. These types exist so callers can log and surface
//! what happened.

use std::path::PathBuf;
use thiserror::Error;

/// Core error type for dormguard-core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Snapshot source errors
    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    /// Notification delivery errors
    #[error("Notification error: {0}")]
    Notify(#[from] NotifyError),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Failures while fetching or decoding a snapshot payload.
#[derive(Error, Debug)]
pub enum SourceError {
    /// The endpoint could not be reached at all.
    #[error("Source unreachable: {0}")]
    Unreachable(String),

    /// The endpoint answered with a non-success status.
    #[error("Source returned HTTP {status}")]
    Status { status: u16 },

    /// The payload was not a recognised shape.
    #[error("Failed to decode source payload: {0}")]
    Decode(String),

    /// The payload decoded but held no usable rows.
    #[error("Source payload contained no records")]
    NoData,

    /// No endpoint has been configured.
    #[error("No source endpoint configured")]
    NotConfigured,

    /// Local file source could not be read.
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Failures while handing a notification to the platform.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NotifyError {
    /// Platform permission has not been granted.
    #[error("Notification permission not granted")]
    PermissionDenied,

    /// No delivery channel is active (e.g. webhook URL missing).
    #[error("No active notification channel")]
    NoChannel,

    /// The channel accepted the request but delivery failed.
    #[error("Notification delivery failed: {0}")]
    Delivery(String),
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to load configuration
    #[error("Failed to load configuration from {path}: {message}")]
    LoadFailed { path: PathBuf, message: String },

    /// Failed to save configuration
    #[error("Failed to save configuration to {path}: {message}")]
    SaveFailed { path: PathBuf, message: String },

    /// Invalid configuration value
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    /// Unknown dot-path key
    #[error("Unknown configuration key: {0}")]
    UnknownKey(String),

    /// Home/config directory could not be prepared
    #[error("Configuration directory unavailable: {0}")]
    DirUnavailable(String),
}

impl From<reqwest::Error> for SourceError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            SourceError::Status {
                status: status.as_u16(),
            }
        } else if err.is_decode() {
            SourceError::Decode(err.to_string())
        } else {
            SourceError::Unreachable(err.to_string())
        }
    }
}

/// Result type alias for CoreError
pub type Result<T, E = CoreError> = std::result::Result<T, E>;
