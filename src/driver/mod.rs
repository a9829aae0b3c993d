//! Probe driver: the multi-step booking-flow state machine
//!
//! Drives one browser session from the entry page to the terminal results
//! page through a fixed stage sequence, tolerant of stage-skipping (absent
//! consent banner, absent confirmation dialog) and variable markup. Every
//! external wait is bounded. The driver never retries internally: the
//! external system's session state is not observable, so resuming a partial
//! flow is unsafe; retries happen only as whole attempts on later scheduling
//! cycles.

use std::time::Duration;

use crate::browser::{BrowserPage, SessionError};
use crate::models::FailureReason;
use crate::site::SiteProfile;

/// Stages of the booking flow, in traversal order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveStage {
    Start,
    ConsentResolved,
    CategoryExpanded,
    ServiceSelected,
    QuantitySet,
    Step1Submitted,
    InterstitialResolved,
    Step2Submitted,
    TerminalReached,
}

impl DriveStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            DriveStage::Start => "start",
            DriveStage::ConsentResolved => "consent_resolved",
            DriveStage::CategoryExpanded => "category_expanded",
            DriveStage::ServiceSelected => "service_selected",
            DriveStage::QuantitySet => "quantity_set",
            DriveStage::Step1Submitted => "step1_submitted",
            DriveStage::InterstitialResolved => "interstitial_resolved",
            DriveStage::Step2Submitted => "step2_submitted",
            DriveStage::TerminalReached => "terminal_reached",
        }
    }
}

impl std::fmt::Display for DriveStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Why a drive attempt entered the absorbing `Aborted` state
#[derive(Debug)]
pub enum AbortReason {
    /// Category could not be located by exact text within the timeout
    CategoryNotFound(String),
    /// No service row contained the service name
    ServiceNotFound(String),
    /// The quantity control did not commit the configured value
    QuantityRejected { wanted: u32, committed: String },
    /// The continue control never became enabled
    ContinueDisabled,
    /// The terminal page never reached quiescence
    TerminalTimeout,
    /// Session-level fault (transport, protocol, navigation)
    Session(SessionError),
}

/// An aborted drive: the stage it died in plus the classified reason
#[derive(Debug)]
pub struct DriveAbort {
    pub stage: DriveStage,
    pub reason: AbortReason,
}

impl DriveAbort {
    fn new(stage: DriveStage, reason: AbortReason) -> Self {
        Self { stage, reason }
    }

    /// Map into the orchestrator's failure taxonomy
    pub fn failure_reason(&self) -> FailureReason {
        match &self.reason {
            AbortReason::CategoryNotFound(category) => FailureReason::NavigationNotFound {
                what: format!("category '{category}'"),
            },
            AbortReason::ServiceNotFound(service) => FailureReason::NavigationNotFound {
                what: format!("service '{service}'"),
            },
            AbortReason::QuantityRejected { wanted, committed } => {
                FailureReason::NavigationNotFound {
                    what: format!("quantity input (wanted {wanted}, committed '{committed}')"),
                }
            }
            AbortReason::ContinueDisabled => FailureReason::NavigationTimeout {
                stage: self.stage.as_str().to_string(),
            },
            AbortReason::TerminalTimeout => FailureReason::NavigationTimeout {
                stage: self.stage.as_str().to_string(),
            },
            AbortReason::Session(e) => {
                if e.is_transient() {
                    FailureReason::TransientExternalFailure {
                        detail: e.to_string(),
                    }
                } else {
                    FailureReason::NavigationNotFound {
                        what: e.to_string(),
                    }
                }
            }
        }
    }
}

impl std::fmt::Display for DriveAbort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "aborted at {}: {:?}", self.stage, self.reason)
    }
}

/// The flow state machine
pub struct FlowDriver {
    nav_timeout: Duration,
    quiesce_timeout: Duration,
    /// Per-candidate wait for optional dialogs; short, since absence is the
    /// common case and not an error
    optional_wait: Duration,
}

impl FlowDriver {
    pub fn new(nav_timeout: Duration, quiesce_timeout: Duration) -> Self {
        Self {
            nav_timeout,
            quiesce_timeout,
            optional_wait: Duration::from_secs(3),
        }
    }

    pub fn with_optional_wait(mut self, wait: Duration) -> Self {
        self.optional_wait = wait;
        self
    }

    /// Drive the session to the terminal results page.
    ///
    /// Returns `Ok(())` once `TerminalReached`, or the stage and reason of
    /// the abort. The page is left open either way; lifecycle belongs to the
    /// orchestrator.
    pub async fn drive(
        &self,
        page: &dyn BrowserPage,
        profile: &SiteProfile,
        category: &str,
        service: &str,
        quantity: u32,
    ) -> Result<(), DriveAbort> {
        let mut stage = DriveStage::Start;

        tracing::debug!(%category, %service, quantity, "starting booking flow");
        page.goto(&profile.base_url)
            .await
            .map_err(|e| DriveAbort::new(stage, AbortReason::Session(e)))?;

        // Start -> ConsentResolved: best-effort, first match wins
        match page
            .click_first_labeled(&profile.consent_labels, self.optional_wait)
            .await
        {
            Ok(Some(label)) => tracing::debug!(%label, "consent banner accepted"),
            Ok(None) => tracing::debug!("no consent banner present"),
            Err(e) => return Err(DriveAbort::new(stage, AbortReason::Session(e))),
        }
        stage = DriveStage::ConsentResolved;

        // ConsentResolved -> CategoryExpanded: exact text match, fatal on miss
        page.click_exact_text(category, self.nav_timeout)
            .await
            .map_err(|e| match e {
                SessionError::ElementNotFound(_) | SessionError::Timeout(_) => {
                    DriveAbort::new(stage, AbortReason::CategoryNotFound(category.to_string()))
                }
                other => DriveAbort::new(stage, AbortReason::Session(other)),
            })?;
        stage = DriveStage::CategoryExpanded;

        // CategoryExpanded -> ServiceSelected: first row containing the name
        page.click_row_containing(&profile.row_selector, service, self.nav_timeout)
            .await
            .map_err(|e| match e {
                SessionError::ElementNotFound(_) | SessionError::Timeout(_) => {
                    DriveAbort::new(stage, AbortReason::ServiceNotFound(service.to_string()))
                }
                other => DriveAbort::new(stage, AbortReason::Session(other)),
            })?;
        stage = DriveStage::ServiceSelected;

        // ServiceSelected -> QuantitySet: overwrite, commit, then verify
        let committed = page
            .commit_row_quantity(
                &profile.row_selector,
                service,
                &profile.quantity_input_selector,
                quantity,
                self.nav_timeout,
            )
            .await
            .map_err(|e| DriveAbort::new(stage, AbortReason::Session(e)))?;
        if committed.trim() != quantity.to_string() {
            return Err(DriveAbort::new(
                stage,
                AbortReason::QuantityRejected {
                    wanted: quantity,
                    committed,
                },
            ));
        }
        stage = DriveStage::QuantitySet;

        // QuantitySet -> Step1Submitted: continue must be enabled first
        page.click_when_enabled(&profile.continue_label, self.nav_timeout)
            .await
            .map_err(|e| match e {
                SessionError::Timeout(_) => DriveAbort::new(stage, AbortReason::ContinueDisabled),
                SessionError::ElementNotFound(_) => {
                    DriveAbort::new(stage, AbortReason::ContinueDisabled)
                }
                other => DriveAbort::new(stage, AbortReason::Session(other)),
            })?;
        stage = DriveStage::Step1Submitted;

        // Step1Submitted -> InterstitialResolved: same policy as consent
        match page
            .click_first_labeled(&profile.interstitial_labels, self.optional_wait)
            .await
        {
            Ok(Some(label)) => tracing::debug!(%label, "confirmation dialog dismissed"),
            Ok(None) => tracing::debug!("no confirmation dialog present"),
            Err(e) => return Err(DriveAbort::new(stage, AbortReason::Session(e))),
        }
        stage = DriveStage::InterstitialResolved;

        // InterstitialResolved -> Step2Submitted
        page.click_when_enabled(&profile.continue_label, self.nav_timeout)
            .await
            .map_err(|e| match e {
                SessionError::Timeout(_) | SessionError::ElementNotFound(_) => {
                    DriveAbort::new(stage, AbortReason::ContinueDisabled)
                }
                other => DriveAbort::new(stage, AbortReason::Session(other)),
            })?;
        stage = DriveStage::Step2Submitted;

        // Step2Submitted -> TerminalReached: bounded quiescence wait
        page.wait_for_quiescence(self.quiesce_timeout)
            .await
            .map_err(|e| match e {
                SessionError::Timeout(_) => DriveAbort::new(stage, AbortReason::TerminalTimeout),
                other => DriveAbort::new(stage, AbortReason::Session(other)),
            })?;

        tracing::debug!("terminal results page reached");
        Ok(())
    }
}
