//! Unified error handling for the terminwatch crate
//!
//! Domain-specific errors live next to their modules ([`SessionError`],
//! [`ExtractError`], [`TransportError`]); this module consolidates them into a
//! single [`Error`] enum usable across module boundaries. Binaries wrap the
//! rim in `anyhow`.

use std::io;
use thiserror::Error;

// Re-export domain-specific errors for convenience
pub use crate::browser::SessionError;
pub use crate::extractor::ExtractError;
pub use crate::notify::transport::TransportError;

/// Unified error type for the terminwatch crate
#[derive(Error, Debug)]
pub enum Error {
    /// Browser-session errors (WebDriver connection, element lookup, waits)
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// Slot extraction errors (invalid profile selectors)
    #[error("Extract error: {0}")]
    Extract(#[from] ExtractError),

    /// Notification delivery errors
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Store errors (SQLite, transaction rollback)
    #[error("Storage error: {0}")]
    Storage(anyhow::Error),

    /// Database errors
    #[error("Database error: {0}")]
    Database(#[source] rusqlite::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(String),

    /// Generic error with context
    #[error("{context}")]
    Other {
        context: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a storage error from an anyhow chain
    pub fn storage(err: anyhow::Error) -> Self {
        Self::Storage(err)
    }

    /// Create a generic error with context
    pub fn other(context: impl Into<String>) -> Self {
        Self::Other {
            context: context.into(),
            source: None,
        }
    }

    /// Whether a retry on a later scheduling cycle may succeed without
    /// operator intervention.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Session(e) => e.is_transient(),
            Self::Transport(_) => true,
            Self::Io(_) => true,
            Self::Extract(_) => false,
            Self::Storage(_) | Self::Database(_) => false,
            Self::Json(_) | Self::Config(_) | Self::Other { .. } => false,
        }
    }
}

// Conversion from rusqlite::Error
impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Self::Database(err)
    }
}

/// Result type alias using the unified Error type
pub type Result<T> = std::result::Result<T, Error>;
