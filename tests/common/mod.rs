//! Common test fixtures: scripted browser pages and a collecting transport
#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use terminwatch::browser::{BrowserPage, SessionError, SessionFactory, SessionResult};
use terminwatch::notify::transport::{Transport, TransportError, TransportResult};
use terminwatch::notify::RenderedMessage;

/// Results page with two slots on one date, far enough in the future that
/// the dedup gate never treats them as stale.
pub const TWO_SLOT_HTML: &str = "<html><body>\
    <h3 class=\"ui-accordion-header\" aria-controls=\"panel-0\">Dienstag, 18.11.2035</h3>\
    <div id=\"panel-0\"><table><tr>\
    <td><button class=\"suggest_btn\">14:00 Uhr</button></td>\
    <td><button class=\"suggest_btn\">14:30 Uhr</button></td>\
    </tr></table></div>\
    </body></html>";

/// Declarative behavior of a scripted page
#[derive(Clone)]
pub struct PageScript {
    /// Terminal page HTML served by `content()`
    pub html: String,
    /// Optional-dialog button labels that are present
    pub buttons: Vec<String>,
    /// Category texts that exist on the page
    pub categories: Vec<String>,
    /// Service row texts that exist on the page
    pub rows: Vec<String>,
    /// Value the quantity input reports after commit; `None` echoes the request
    pub commit_override: Option<String>,
    /// Continue button never becomes enabled
    pub disable_continue: bool,
    /// Quiescence wait times out
    pub fail_quiescence: bool,
}

impl PageScript {
    /// A page where the whole flow succeeds for the given category/service
    pub fn happy(html: &str, category: &str, service: &str) -> Self {
        Self {
            html: html.to_string(),
            buttons: Vec::new(),
            categories: vec![category.to_string()],
            rows: vec![format!("{service} row")],
            commit_override: None,
            disable_continue: false,
            fail_quiescence: false,
        }
    }
}

/// One scripted browser page; records every operation for assertions
pub struct ScriptedPage {
    script: PageScript,
    pub ops: Arc<Mutex<Vec<String>>>,
    pub closed: Arc<AtomicBool>,
}

impl ScriptedPage {
    pub fn new(script: PageScript) -> Self {
        Self {
            script,
            ops: Arc::new(Mutex::new(Vec::new())),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    fn log(&self, op: impl Into<String>) {
        self.ops.lock().unwrap().push(op.into());
    }

    pub fn op_log(&self) -> Vec<String> {
        self.ops.lock().unwrap().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BrowserPage for ScriptedPage {
    async fn goto(&self, url: &str) -> SessionResult<()> {
        self.log(format!("goto {url}"));
        Ok(())
    }

    async fn click_first_labeled(
        &self,
        labels: &[String],
        _wait: Duration,
    ) -> SessionResult<Option<String>> {
        for label in labels {
            if self.script.buttons.contains(label) {
                self.log(format!("click_button {label}"));
                return Ok(Some(label.clone()));
            }
        }
        Ok(None)
    }

    async fn click_exact_text(&self, text: &str, _wait: Duration) -> SessionResult<()> {
        if self.script.categories.iter().any(|c| c == text) {
            self.log(format!("click_category {text}"));
            Ok(())
        } else {
            Err(SessionError::ElementNotFound(text.to_string()))
        }
    }

    async fn click_row_containing(
        &self,
        _row_selector: &str,
        text: &str,
        _wait: Duration,
    ) -> SessionResult<()> {
        if self.script.rows.iter().any(|r| r.contains(text)) {
            self.log(format!("click_row {text}"));
            Ok(())
        } else {
            Err(SessionError::ElementNotFound(format!("row '{text}'")))
        }
    }

    async fn commit_row_quantity(
        &self,
        _row_selector: &str,
        _text: &str,
        _input_selector: &str,
        value: u32,
        _wait: Duration,
    ) -> SessionResult<String> {
        self.log(format!("commit_quantity {value}"));
        Ok(self
            .script
            .commit_override
            .clone()
            .unwrap_or_else(|| value.to_string()))
    }

    async fn click_when_enabled(&self, label: &str, _wait: Duration) -> SessionResult<()> {
        if self.script.disable_continue {
            Err(SessionError::Timeout(format!("button '{label}'")))
        } else {
            self.log(format!("click_enabled {label}"));
            Ok(())
        }
    }

    async fn wait_for_quiescence(&self, _wait: Duration) -> SessionResult<()> {
        if self.script.fail_quiescence {
            Err(SessionError::Timeout("page quiescence".to_string()))
        } else {
            self.log("quiescence");
            Ok(())
        }
    }

    async fn content(&self) -> SessionResult<String> {
        Ok(self.script.html.clone())
    }

    async fn screenshot(&self) -> SessionResult<Vec<u8>> {
        Ok(vec![0x89, 0x50, 0x4e, 0x47])
    }

    async fn close(&self) -> SessionResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Factory producing one scripted page per probe attempt; keeps the closed
/// flags of every opened session for leak assertions.
pub struct ScriptedFactory {
    script: PageScript,
    pub sessions: Mutex<Vec<Arc<AtomicBool>>>,
}

impl ScriptedFactory {
    pub fn new(script: PageScript) -> Self {
        Self {
            script,
            sessions: Mutex::new(Vec::new()),
        }
    }

    pub fn opened_sessions(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    pub fn all_sessions_closed(&self) -> bool {
        self.sessions
            .lock()
            .unwrap()
            .iter()
            .all(|closed| closed.load(Ordering::SeqCst))
    }
}

#[async_trait]
impl SessionFactory for ScriptedFactory {
    async fn open(&self) -> SessionResult<Box<dyn BrowserPage>> {
        let page = ScriptedPage::new(self.script.clone());
        self.sessions.lock().unwrap().push(page.closed.clone());
        Ok(Box::new(page))
    }
}

/// Transport that records deliveries and can be switched to fail
pub struct CollectingTransport {
    pub deliveries: Mutex<Vec<(String, RenderedMessage)>>,
    pub fail: AtomicBool,
}

impl CollectingTransport {
    pub fn new() -> Self {
        Self {
            deliveries: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
        }
    }

    pub fn delivery_count(&self) -> usize {
        self.deliveries.lock().unwrap().len()
    }

    pub fn last_delivery(&self) -> Option<(String, RenderedMessage)> {
        self.deliveries.lock().unwrap().last().cloned()
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail.store(failing, Ordering::SeqCst);
    }
}

impl Default for CollectingTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for CollectingTransport {
    fn name(&self) -> &str {
        "collecting"
    }

    async fn deliver(&self, subscriber: &str, message: &RenderedMessage) -> TransportResult<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(TransportError::Rejected {
                status: 500,
                body: "transport down".to_string(),
            });
        }
        self.deliveries
            .lock()
            .unwrap()
            .push((subscriber.to_string(), message.clone()));
        Ok(())
    }
}
