//! Browser-session ports
//!
//! The probe driver talks to the external browser through the [`BrowserPage`]
//! trait and obtains one isolated session per attempt from a
//! [`SessionFactory`]. Keeping the seam here decouples the flow state machine
//! from WebDriver specifics and lets tests script a fake page per scenario.
//! The browser process itself is external; the WebDriver adapter only owns
//! sessions on a configured endpoint.

pub mod webdriver;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

pub use webdriver::WebDriverFactory;

/// Result type for browser-session operations
pub type SessionResult<T> = Result<T, SessionError>;

/// Errors surfaced by a browser session
#[derive(Error, Debug)]
pub enum SessionError {
    /// An expected element could not be located
    #[error("Element not found: {0}")]
    ElementNotFound(String),

    /// A bounded wait elapsed
    #[error("Wait timed out: {0}")]
    Timeout(String),

    /// WebDriver transport or protocol fault
    #[error("Session transport error: {0}")]
    Transport(String),

    /// Session could not be established
    #[error("Failed to open session: {0}")]
    Connect(String),
}

impl SessionError {
    /// Whether a fresh attempt on a later cycle may succeed on its own
    pub fn is_transient(&self) -> bool {
        match self {
            Self::ElementNotFound(_) => false,
            Self::Timeout(_) | Self::Transport(_) | Self::Connect(_) => true,
        }
    }
}

/// One live page in an isolated browser session.
///
/// All waits are bounded by the caller-supplied timeout; no operation blocks
/// indefinitely. Optional-action semantics (`click_first_labeled`) treat
/// absence as success, per the flow's best-effort dialog handling.
#[async_trait]
pub trait BrowserPage: Send + Sync {
    /// Navigate to a URL.
    async fn goto(&self, url: &str) -> SessionResult<()>;

    /// Try a bounded list of button labels in order; click the first that
    /// appears within `per_label_wait` and return its label. `Ok(None)` when
    /// none is present: absence is not an error, and remaining candidates
    /// stay untried after the first match.
    async fn click_first_labeled(
        &self,
        labels: &[String],
        per_label_wait: Duration,
    ) -> SessionResult<Option<String>>;

    /// Click the element whose trimmed text equals `text` exactly.
    async fn click_exact_text(&self, text: &str, wait: Duration) -> SessionResult<()>;

    /// Click the first `row_selector` element whose text contains `text`.
    async fn click_row_containing(
        &self,
        row_selector: &str,
        text: &str,
        wait: Duration,
    ) -> SessionResult<()>;

    /// Overwrite the quantity input scoped to the row matching `text`
    /// (clear-then-type), commit via a focus change, and return the value the
    /// control actually holds afterwards.
    async fn commit_row_quantity(
        &self,
        row_selector: &str,
        text: &str,
        input_selector: &str,
        value: u32,
        wait: Duration,
    ) -> SessionResult<String>;

    /// Wait until the button labeled `label` is enabled, then click it.
    async fn click_when_enabled(&self, label: &str, wait: Duration) -> SessionResult<()>;

    /// Wait for the page to reach a quiescent loaded state.
    async fn wait_for_quiescence(&self, wait: Duration) -> SessionResult<()>;

    /// Full HTML of the current page.
    async fn content(&self) -> SessionResult<String>;

    /// PNG screenshot of the current viewport.
    async fn screenshot(&self) -> SessionResult<Vec<u8>>;

    /// Tear the session down. Must be called on every exit path.
    async fn close(&self) -> SessionResult<()>;
}

/// Provider of isolated browser sessions, one per probe attempt
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn open(&self) -> SessionResult<Box<dyn BrowserPage>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_element_not_found_is_not_transient() {
        assert!(!SessionError::ElementNotFound("category".to_string()).is_transient());
    }

    #[test]
    fn test_timeout_and_transport_are_transient() {
        assert!(SessionError::Timeout("quiescence".to_string()).is_transient());
        assert!(SessionError::Transport("reset".to_string()).is_transient());
        assert!(SessionError::Connect("refused".to_string()).is_transient());
    }
}
