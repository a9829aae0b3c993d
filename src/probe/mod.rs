//! Probe orchestrator
//!
//! One call: `probe(target) -> Outcome`. Allocates an isolated browser
//! session for the attempt's lifetime, runs the flow driver and then the
//! extractor under a single aggregate timeout, and classifies every failure
//! mode into the outcome; the call itself never errors. A diagnostic
//! screenshot labeled with the outcome kind is captured on every exit path;
//! diagnostics never fail the probe. The session is torn down on every exit
//! path, including timeout.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::browser::{BrowserPage, SessionFactory};
use crate::config::Config;
use crate::diagnostics::DiagnosticsSink;
use crate::driver::{AbortReason, DriveAbort, DriveStage, FlowDriver};
use crate::extractor::{Extraction, SlotExtractor};
use crate::models::{FailureReason, Outcome, Target};
use crate::site::ProfileStore;

/// Runs whole probe attempts against the external portal
pub struct ProbeRunner {
    sessions: Arc<dyn SessionFactory>,
    profiles: Arc<ProfileStore>,
    diagnostics: Arc<dyn DiagnosticsSink>,
    driver: FlowDriver,
    attempt_timeout: Duration,
}

impl ProbeRunner {
    pub fn new(
        sessions: Arc<dyn SessionFactory>,
        profiles: Arc<ProfileStore>,
        diagnostics: Arc<dyn DiagnosticsSink>,
        config: &Config,
    ) -> Self {
        Self {
            sessions,
            profiles,
            diagnostics,
            driver: FlowDriver::new(
                config.browser.nav_timeout(),
                config.browser.quiesce_timeout(),
            ),
            attempt_timeout: config.probe.attempt_timeout(),
        }
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    /// Run one probe attempt. Every failure mode is classified into the
    /// returned outcome.
    pub async fn probe(&self, target: &Target) -> Outcome {
        let attempt = uuid::Uuid::new_v4();
        let captured_at = Utc::now();
        let started = Instant::now();
        let profile = self.profiles.current();

        tracing::info!(
            category = %target.category,
            service = %target.service,
            %attempt,
            "probe starting"
        );

        // A broken hot-reloaded profile must not take the monitor down;
        // it fails this probe and shows up in the outcome history
        let extractor = match SlotExtractor::from_profile(&profile) {
            Ok(extractor) => extractor,
            Err(e) => {
                tracing::error!(error = %e, "site profile unusable, probe failed");
                return Outcome::failed(
                    FailureReason::TransientExternalFailure {
                        detail: format!("site profile unusable: {e}"),
                    },
                    captured_at,
                    started.elapsed().as_millis() as u64,
                );
            }
        };

        let page = match self.sessions.open().await {
            Ok(page) => page,
            Err(e) => {
                tracing::warn!(error = %e, "failed to open browser session");
                return Outcome::failed(
                    FailureReason::TransientExternalFailure {
                        detail: e.to_string(),
                    },
                    captured_at,
                    started.elapsed().as_millis() as u64,
                );
            }
        };

        let result = tokio::time::timeout(
            self.attempt_timeout,
            self.run_flow(page.as_ref(), &profile, target, &extractor),
        )
        .await;

        let duration_ms = started.elapsed().as_millis() as u64;
        let mut outcome = match result {
            Ok(Ok(Extraction::NoSlots)) => Outcome::no_slots(captured_at, duration_ms),
            Ok(Ok(Extraction::Slots(slots))) => {
                Outcome::slots_found(slots, captured_at, duration_ms)
            }
            Ok(Ok(Extraction::Indeterminate)) => Outcome::indeterminate(captured_at, duration_ms),
            Ok(Err(abort)) => {
                tracing::warn!(%abort, "probe flow aborted");
                Outcome::failed(abort.failure_reason(), captured_at, duration_ms)
            }
            Err(_) => {
                tracing::warn!(
                    timeout_secs = self.attempt_timeout.as_secs(),
                    "probe attempt exceeded aggregate timeout"
                );
                Outcome::failed(FailureReason::Timeout, captured_at, duration_ms)
            }
        };

        // Diagnostics are best-effort on every path
        let label = format!(
            "{}_{}_{}",
            outcome.kind.as_str(),
            captured_at.format("%Y%m%d_%H%M%S"),
            &attempt.simple().to_string()[..8],
        );
        match page.screenshot().await {
            Ok(bytes) => match self.diagnostics.record(&label, &bytes).await {
                Ok(reference) => outcome.screenshot_ref = Some(reference),
                Err(e) => tracing::warn!(error = %e, "diagnostics sink rejected screenshot"),
            },
            Err(e) => tracing::warn!(error = %e, "screenshot capture failed"),
        }

        // The session never leaks past this call, success or not
        if let Err(e) = page.close().await {
            tracing::warn!(error = %e, "session close failed");
        }

        tracing::info!(kind = %outcome.kind, duration_ms, "probe finished");
        outcome
    }

    async fn run_flow(
        &self,
        page: &dyn BrowserPage,
        profile: &crate::site::SiteProfile,
        target: &Target,
        extractor: &SlotExtractor,
    ) -> Result<Extraction, DriveAbort> {
        self.driver
            .drive(
                page,
                profile,
                &target.category,
                &target.service,
                target.quantity,
            )
            .await?;

        let html = page.content().await.map_err(|e| DriveAbort {
            stage: DriveStage::TerminalReached,
            reason: AbortReason::Session(e),
        })?;
        Ok(extractor.extract(&html))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::{SessionError, SessionResult};
    use crate::diagnostics::NullSink;
    use crate::models::OutcomeKind;
    use crate::site::SiteProfile;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    const RESULTS_HTML: &str = "<html><body>\
        <h3 class=\"ui-accordion-header\" aria-controls=\"p0\">Dienstag, 18.11.2025</h3>\
        <div id=\"p0\"><button class=\"suggest_btn\">14:00 Uhr</button></div>\
        </body></html>";

    /// Scripted page for orchestrator tests
    struct FakePage {
        html: String,
        closed: Arc<AtomicBool>,
        missing_category: bool,
        hang_on_quiescence: bool,
        screenshot_fails: bool,
    }

    #[async_trait]
    impl BrowserPage for FakePage {
        async fn goto(&self, _url: &str) -> SessionResult<()> {
            Ok(())
        }

        async fn click_first_labeled(
            &self,
            _labels: &[String],
            _wait: Duration,
        ) -> SessionResult<Option<String>> {
            Ok(None)
        }

        async fn click_exact_text(&self, text: &str, _wait: Duration) -> SessionResult<()> {
            if self.missing_category {
                Err(SessionError::ElementNotFound(text.to_string()))
            } else {
                Ok(())
            }
        }

        async fn click_row_containing(
            &self,
            _row: &str,
            _text: &str,
            _wait: Duration,
        ) -> SessionResult<()> {
            Ok(())
        }

        async fn commit_row_quantity(
            &self,
            _row: &str,
            _text: &str,
            _input: &str,
            value: u32,
            _wait: Duration,
        ) -> SessionResult<String> {
            Ok(value.to_string())
        }

        async fn click_when_enabled(&self, _label: &str, _wait: Duration) -> SessionResult<()> {
            Ok(())
        }

        async fn wait_for_quiescence(&self, _wait: Duration) -> SessionResult<()> {
            if self.hang_on_quiescence {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            Ok(())
        }

        async fn content(&self) -> SessionResult<String> {
            Ok(self.html.clone())
        }

        async fn screenshot(&self) -> SessionResult<Vec<u8>> {
            if self.screenshot_fails {
                Err(SessionError::Transport("no screenshot".to_string()))
            } else {
                Ok(vec![0x89, 0x50, 0x4e, 0x47])
            }
        }

        async fn close(&self) -> SessionResult<()> {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FakeFactory {
        html: String,
        closed: Arc<AtomicBool>,
        missing_category: bool,
        hang_on_quiescence: bool,
        screenshot_fails: bool,
    }

    impl FakeFactory {
        fn ok(html: &str) -> (Self, Arc<AtomicBool>) {
            let closed = Arc::new(AtomicBool::new(false));
            (
                Self {
                    html: html.to_string(),
                    closed: closed.clone(),
                    missing_category: false,
                    hang_on_quiescence: false,
                    screenshot_fails: false,
                },
                closed,
            )
        }
    }

    #[async_trait]
    impl SessionFactory for FakeFactory {
        async fn open(&self) -> SessionResult<Box<dyn BrowserPage>> {
            Ok(Box::new(FakePage {
                html: self.html.clone(),
                closed: self.closed.clone(),
                missing_category: self.missing_category,
                hang_on_quiescence: self.hang_on_quiescence,
                screenshot_fails: self.screenshot_fails,
            }))
        }
    }

    fn runner(factory: FakeFactory) -> ProbeRunner {
        ProbeRunner::new(
            Arc::new(factory),
            Arc::new(ProfileStore::fixed(SiteProfile::default())),
            Arc::new(NullSink),
            &Config::default(),
        )
    }

    fn target() -> Target {
        Target {
            id: 1,
            category: "Abholung Führerschein / Rückfragen".to_string(),
            service: "Abholung Führerschein".to_string(),
            base_url: "https://termine.example/select2?md=3".to_string(),
            quantity: 1,
            active: true,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_successful_probe_extracts_and_closes() {
        let (factory, closed) = FakeFactory::ok(RESULTS_HTML);
        let outcome = runner(factory).probe(&target()).await;

        assert_eq!(outcome.kind, OutcomeKind::SlotsFound);
        assert_eq!(outcome.slots.len(), 1);
        assert!(outcome.screenshot_ref.is_some());
        assert!(outcome.is_consistent());
        assert!(closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_missing_category_is_classified_and_closed() {
        let (mut factory, closed) = FakeFactory::ok(RESULTS_HTML);
        factory.missing_category = true;
        let outcome = runner(factory).probe(&target()).await;

        assert_eq!(outcome.kind, OutcomeKind::Failed);
        assert!(matches!(
            outcome.failure_reason,
            Some(FailureReason::NavigationNotFound { .. })
        ));
        assert!(closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_aggregate_timeout_force_closes_session() {
        let (mut factory, closed) = FakeFactory::ok(RESULTS_HTML);
        factory.hang_on_quiescence = true;

        let outcome = runner(factory)
            .with_attempt_timeout(Duration::from_millis(100))
            .probe(&target())
            .await;

        assert_eq!(outcome.kind, OutcomeKind::Failed);
        assert_eq!(outcome.failure_reason, Some(FailureReason::Timeout));
        assert!(closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_screenshot_failure_never_fails_the_probe() {
        let (mut factory, closed) = FakeFactory::ok(RESULTS_HTML);
        factory.screenshot_fails = true;
        let outcome = runner(factory).probe(&target()).await;

        assert_eq!(outcome.kind, OutcomeKind::SlotsFound);
        assert!(outcome.screenshot_ref.is_none());
        assert!(closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_session_open_failure_is_transient() {
        struct FailingFactory;

        #[async_trait]
        impl SessionFactory for FailingFactory {
            async fn open(&self) -> SessionResult<Box<dyn BrowserPage>> {
                Err(SessionError::Connect("connection refused".to_string()))
            }
        }

        let runner = ProbeRunner::new(
            Arc::new(FailingFactory),
            Arc::new(ProfileStore::fixed(SiteProfile::default())),
            Arc::new(NullSink),
            &Config::default(),
        );
        let outcome = runner.probe(&target()).await;

        assert_eq!(outcome.kind, OutcomeKind::Failed);
        assert!(matches!(
            outcome.failure_reason,
            Some(FailureReason::TransientExternalFailure { .. })
        ));
    }

    #[tokio::test]
    async fn test_no_slots_page_yields_negative_outcome() {
        let html = "<html><body><p>Zurzeit sind keine Termine frei</p></body></html>";
        let (factory, _) = FakeFactory::ok(html);
        let outcome = runner(factory).probe(&target()).await;

        assert_eq!(outcome.kind, OutcomeKind::NoSlots);
        assert!(outcome.slots.is_empty());
    }
}
