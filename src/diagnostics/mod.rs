//! Diagnostics sink for probe screenshots
//!
//! Every probe attempt hands a labeled PNG to the sink. Diagnostics must
//! never fail a probe: callers log sink errors and move on.

use async_trait::async_trait;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for diagnostics operations
pub type DiagnosticsResult<T> = Result<T, DiagnosticsError>;

#[derive(Error, Debug)]
pub enum DiagnosticsError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Accepts labeled image blobs per probe attempt
#[async_trait]
pub trait DiagnosticsSink: Send + Sync {
    /// Store the blob under the given label; returns an artifact reference
    /// suitable for the outcome record.
    async fn record(&self, label: &str, bytes: &[u8]) -> DiagnosticsResult<String>;
}

/// Filesystem sink writing `{label}.png` into a screenshot directory
pub struct ScreenshotDir {
    dir: PathBuf,
}

impl ScreenshotDir {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl DiagnosticsSink for ScreenshotDir {
    async fn record(&self, label: &str, bytes: &[u8]) -> DiagnosticsResult<String> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let path = self.dir.join(format!("{label}.png"));
        tokio::fs::write(&path, bytes).await?;

        tracing::debug!(path = %path.display(), "screenshot saved");
        Ok(path.display().to_string())
    }
}

/// Sink that drops everything; used when diagnostics are disabled
pub struct NullSink;

#[async_trait]
impl DiagnosticsSink for NullSink {
    async fn record(&self, label: &str, _bytes: &[u8]) -> DiagnosticsResult<String> {
        Ok(format!("discarded:{label}"))
    }
}
