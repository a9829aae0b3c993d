//! WebDriver-backed implementation of the browser ports
//!
//! Connects to an external WebDriver endpoint (chromedriver, geckodriver,
//! Selenium) and opens one fresh client per probe attempt. WebDriver has no
//! network-idle primitive, so quiescence is approximated by polling
//! `document.readyState` plus a short settle delay; the orchestrator's
//! aggregate timeout still bounds the whole attempt.

use async_trait::async_trait;
use fantoccini::error::CmdError;
use fantoccini::{Client, ClientBuilder, Locator};
use std::time::Duration;
use tokio::time::Instant;

use super::{BrowserPage, SessionError, SessionFactory, SessionResult};
use crate::config::BrowserConfig;

/// Poll interval for element and state polling loops
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Settle delay after the document reports itself complete
const QUIESCENCE_SETTLE: Duration = Duration::from_millis(500);

/// Factory opening WebDriver sessions against a configured endpoint
pub struct WebDriverFactory {
    endpoint: String,
    headless: bool,
}

impl WebDriverFactory {
    pub fn new(config: &BrowserConfig) -> Self {
        Self {
            endpoint: config.webdriver_url.clone(),
            headless: config.headless,
        }
    }

    fn capabilities(&self) -> serde_json::Map<String, serde_json::Value> {
        let mut caps = serde_json::Map::new();
        if self.headless {
            caps.insert(
                "goog:chromeOptions".to_string(),
                serde_json::json!({
                    "args": ["--headless=new", "--disable-gpu", "--window-size=1280,1024"]
                }),
            );
        }
        caps
    }
}

#[async_trait]
impl SessionFactory for WebDriverFactory {
    async fn open(&self) -> SessionResult<Box<dyn BrowserPage>> {
        let mut builder = ClientBuilder::native();
        builder.capabilities(self.capabilities());

        let client = builder
            .connect(&self.endpoint)
            .await
            .map_err(|e| SessionError::Connect(format!("{}: {e}", self.endpoint)))?;

        tracing::debug!(endpoint = %self.endpoint, "webdriver session opened");
        Ok(Box::new(WebDriverPage { client }))
    }
}

/// One WebDriver session wrapped as a [`BrowserPage`]
pub struct WebDriverPage {
    client: Client,
}

impl WebDriverPage {
    /// Build an XPath string literal, handling embedded quotes via concat()
    fn xpath_literal(text: &str) -> String {
        if !text.contains('\'') {
            return format!("'{text}'");
        }
        let parts: Vec<String> = text.split('\'').map(|p| format!("'{p}'")).collect();
        format!("concat({})", parts.join(r#", "'", "#))
    }

    fn button_xpath(label: &str) -> String {
        format!("//button[normalize-space(.)={}]", Self::xpath_literal(label))
    }

    fn map_err(what: &str, err: CmdError) -> SessionError {
        match err {
            CmdError::NoSuchElement(_) => SessionError::ElementNotFound(what.to_string()),
            CmdError::WaitTimeout => SessionError::Timeout(what.to_string()),
            other => SessionError::Transport(format!("{what}: {other}")),
        }
    }

    /// Find the first row matching `row_selector` whose text contains `text`,
    /// polling until the deadline.
    async fn find_row(
        &self,
        row_selector: &str,
        text: &str,
        wait: Duration,
    ) -> SessionResult<fantoccini::elements::Element> {
        let deadline = Instant::now() + wait;
        loop {
            let rows = self
                .client
                .find_all(Locator::Css(row_selector))
                .await
                .map_err(|e| Self::map_err("row lookup", e))?;

            for row in rows {
                // Stale rows mid-render are skipped, not fatal
                if let Ok(row_text) = row.text().await {
                    if row_text.contains(text) {
                        return Ok(row);
                    }
                }
            }

            if Instant::now() >= deadline {
                return Err(SessionError::ElementNotFound(format!(
                    "row containing '{text}'"
                )));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

#[async_trait]
impl BrowserPage for WebDriverPage {
    async fn goto(&self, url: &str) -> SessionResult<()> {
        self.client
            .goto(url)
            .await
            .map_err(|e| Self::map_err("navigate", e))
    }

    async fn click_first_labeled(
        &self,
        labels: &[String],
        per_label_wait: Duration,
    ) -> SessionResult<Option<String>> {
        for label in labels {
            let xpath = Self::button_xpath(label);
            match self
                .client
                .wait()
                .at_most(per_label_wait)
                .every(POLL_INTERVAL)
                .for_element(Locator::XPath(&xpath))
                .await
            {
                Ok(element) => {
                    element
                        .click()
                        .await
                        .map_err(|e| Self::map_err("optional button", e))?;
                    return Ok(Some(label.clone()));
                }
                Err(CmdError::WaitTimeout) | Err(CmdError::NoSuchElement(_)) => continue,
                Err(e) => return Err(Self::map_err("optional button", e)),
            }
        }
        Ok(None)
    }

    async fn click_exact_text(&self, text: &str, wait: Duration) -> SessionResult<()> {
        let xpath = format!(
            "//*[normalize-space(text())={}]",
            Self::xpath_literal(text)
        );
        let what = format!("element with text '{text}'");

        let element = self
            .client
            .wait()
            .at_most(wait)
            .every(POLL_INTERVAL)
            .for_element(Locator::XPath(&xpath))
            .await
            .map_err(|e| Self::map_err(&what, e))?;

        // click() gives up the element handle since it may navigate
        element
            .click()
            .await
            .map(|_| ())
            .map_err(|e| Self::map_err(&what, e))
    }

    async fn click_row_containing(
        &self,
        row_selector: &str,
        text: &str,
        wait: Duration,
    ) -> SessionResult<()> {
        let row = self.find_row(row_selector, text, wait).await?;
        row.click()
            .await
            .map(|_| ())
            .map_err(|e| Self::map_err("service row", e))
    }

    async fn commit_row_quantity(
        &self,
        row_selector: &str,
        text: &str,
        input_selector: &str,
        value: u32,
        wait: Duration,
    ) -> SessionResult<String> {
        let row = self.find_row(row_selector, text, wait).await?;
        let input = row
            .find(Locator::Css(input_selector))
            .await
            .map_err(|e| Self::map_err("quantity input", e))?;

        // Clear-then-type: the value must be overwritten, never appended
        input
            .clear()
            .await
            .map_err(|e| Self::map_err("quantity input", e))?;
        input
            .send_keys(&value.to_string())
            .await
            .map_err(|e| Self::map_err("quantity input", e))?;
        // TAB moves focus away, which is what commits the spinner value
        input
            .send_keys("\u{E004}")
            .await
            .map_err(|e| Self::map_err("quantity input", e))?;

        let committed = input
            .prop("value")
            .await
            .map_err(|e| Self::map_err("quantity value", e))?
            .unwrap_or_default();
        Ok(committed)
    }

    async fn click_when_enabled(&self, label: &str, wait: Duration) -> SessionResult<()> {
        let xpath = Self::button_xpath(label);
        let what = format!("button '{label}'");
        let deadline = Instant::now() + wait;

        let element = self
            .client
            .wait()
            .at_most(wait)
            .every(POLL_INTERVAL)
            .for_element(Locator::XPath(&xpath))
            .await
            .map_err(|e| Self::map_err(&what, e))?;

        loop {
            let enabled = element
                .is_enabled()
                .await
                .map_err(|e| Self::map_err(&what, e))?;
            if enabled {
                break;
            }
            if Instant::now() >= deadline {
                return Err(SessionError::Timeout(format!("{what} never enabled")));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }

        element
            .click()
            .await
            .map(|_| ())
            .map_err(|e| Self::map_err(&what, e))
    }

    async fn wait_for_quiescence(&self, wait: Duration) -> SessionResult<()> {
        let deadline = Instant::now() + wait;
        loop {
            let state = self
                .client
                .execute("return document.readyState", vec![])
                .await
                .map_err(|e| Self::map_err("readyState", e))?;

            if state.as_str() == Some("complete") {
                tokio::time::sleep(QUIESCENCE_SETTLE).await;
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(SessionError::Timeout("page quiescence".to_string()));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn content(&self) -> SessionResult<String> {
        self.client
            .source()
            .await
            .map_err(|e| Self::map_err("page source", e))
    }

    async fn screenshot(&self) -> SessionResult<Vec<u8>> {
        self.client
            .screenshot()
            .await
            .map_err(|e| Self::map_err("screenshot", e))
    }

    async fn close(&self) -> SessionResult<()> {
        // Client is a handle; closing a clone ends the underlying session
        self.client
            .clone()
            .close()
            .await
            .map_err(|e| Self::map_err("close", e))
    }
}
