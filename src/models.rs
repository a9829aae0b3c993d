// Core data structures for the terminwatch monitor

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

pub type TargetId = i64;
pub type WatchId = i64;
pub type OutcomeId = i64;

/// A monitored (category, service) combination on the external booking portal.
///
/// Identity is the (category, service) pair; `base_url` is the entry point of
/// the multi-step flow and `quantity` the number of appointments requested in
/// step one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub id: TargetId,
    pub category: String,
    pub service: String,
    pub base_url: String,
    pub quantity: u32,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

/// A subscriber's binding to a [`Target`] with its own probe cadence.
///
/// Probe-state fields (`last_probe_at`, `last_outcome_kind`,
/// `consecutive_failures`) are mutated only through the store's
/// `save_outcome` transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Watch {
    pub id: WatchId,
    pub target_id: TargetId,
    pub subscriber: String,
    pub interval_secs: i64,
    pub active: bool,
    pub last_probe_at: Option<DateTime<Utc>>,
    pub last_outcome_kind: Option<OutcomeKind>,
    pub consecutive_failures: u32,
    pub created_at: DateTime<Utc>,
}

impl Watch {
    /// Minimum time between probes.
    pub fn interval(&self) -> Duration {
        Duration::seconds(self.interval_secs)
    }

    /// A watch is due when it has never been probed, or when at least its
    /// configured interval has elapsed since the last probe. The boundary is
    /// inclusive: exactly `interval` elapsed means due.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        match self.last_probe_at {
            None => true,
            Some(last) => now - last >= self.interval(),
        }
    }
}

/// A watch joined with its target, as loaded from the store.
///
/// The core only ever holds this flat view; there are no live object-graph
/// references across suspension points.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchView {
    pub watch: Watch,
    pub target: Target,
}

/// Classification of a completed probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    /// The portal definitively reported no free appointments.
    NoSlots,
    /// At least one appointment slot was extracted.
    SlotsFound,
    /// The terminal page was reached but its structure was unrecognized.
    /// Never conflated with [`OutcomeKind::NoSlots`].
    Indeterminate,
    /// The flow did not reach the terminal page.
    Failed,
}

impl OutcomeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeKind::NoSlots => "no_slots",
            OutcomeKind::SlotsFound => "slots_found",
            OutcomeKind::Indeterminate => "indeterminate",
            OutcomeKind::Failed => "failed",
        }
    }
}

impl std::str::FromStr for OutcomeKind {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s {
            "no_slots" => OutcomeKind::NoSlots,
            "slots_found" => OutcomeKind::SlotsFound,
            "indeterminate" => OutcomeKind::Indeterminate,
            _ => OutcomeKind::Failed,
        })
    }
}

impl std::fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Machine-readable reason a probe was classified [`OutcomeKind::Failed`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FailureReason {
    /// An expected element (category, service row, continue control, quantity
    /// input) was absent from the page.
    NavigationNotFound { what: String },
    /// A bounded wait inside the flow elapsed at the named stage.
    NavigationTimeout { stage: String },
    /// Session- or transport-level fault (WebDriver connection, protocol).
    TransientExternalFailure { detail: String },
    /// The aggregate per-attempt timeout elapsed.
    Timeout,
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureReason::NavigationNotFound { what } => {
                write!(f, "navigation_not_found: {what}")
            }
            FailureReason::NavigationTimeout { stage } => {
                write!(f, "navigation_timeout: {stage}")
            }
            FailureReason::TransientExternalFailure { detail } => {
                write!(f, "transient_external_failure: {detail}")
            }
            FailureReason::Timeout => write!(f, "timeout"),
        }
    }
}

/// One concrete appointment opportunity extracted from the results page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    /// Calendar date as displayed by the portal, normalized.
    pub date: NaiveDate,
    /// Time of day as displayed by the portal; no timezone conversion.
    pub time: NaiveTime,
    /// Original header + control text, kept for audit.
    pub raw_label: String,
}

impl Slot {
    pub fn new(date: NaiveDate, time: NaiveTime, raw_label: impl Into<String>) -> Self {
        Self {
            date,
            time,
            raw_label: raw_label.into(),
        }
    }

    /// Dedup identity of this slot within a target.
    pub fn key(&self) -> SlotKey {
        SlotKey {
            date: self.date,
            time: self.time,
        }
    }

    /// Zero-padded `HH:MM` rendering.
    pub fn time_label(&self) -> String {
        self.time.format("%H:%M").to_string()
    }

    /// `YYYY-MM-DD` rendering.
    pub fn date_label(&self) -> String {
        self.date.format("%Y-%m-%d").to_string()
    }
}

/// The (date, time) pair that identifies a slot for deduplication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SlotKey {
    pub date: NaiveDate,
    pub time: NaiveTime,
}

impl SlotKey {
    pub fn new(date: NaiveDate, time: NaiveTime) -> Self {
        Self { date, time }
    }

    /// A key is expired once its calendar date lies in the past.
    pub fn is_expired(&self, today: NaiveDate) -> bool {
        self.date < today
    }
}

impl std::fmt::Display for SlotKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {}",
            self.date.format("%Y-%m-%d"),
            self.time.format("%H:%M")
        )
    }
}

/// The immutable result of one probe attempt.
///
/// Invariant: `slots` is non-empty iff `kind == SlotsFound`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    pub kind: OutcomeKind,
    pub slots: Vec<Slot>,
    pub failure_reason: Option<FailureReason>,
    pub captured_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub screenshot_ref: Option<String>,
}

impl Outcome {
    pub fn no_slots(captured_at: DateTime<Utc>, duration_ms: u64) -> Self {
        Self {
            kind: OutcomeKind::NoSlots,
            slots: Vec::new(),
            failure_reason: None,
            captured_at,
            duration_ms,
            screenshot_ref: None,
        }
    }

    pub fn slots_found(slots: Vec<Slot>, captured_at: DateTime<Utc>, duration_ms: u64) -> Self {
        Self {
            kind: OutcomeKind::SlotsFound,
            slots,
            failure_reason: None,
            captured_at,
            duration_ms,
            screenshot_ref: None,
        }
    }

    pub fn indeterminate(captured_at: DateTime<Utc>, duration_ms: u64) -> Self {
        Self {
            kind: OutcomeKind::Indeterminate,
            slots: Vec::new(),
            failure_reason: None,
            captured_at,
            duration_ms,
            screenshot_ref: None,
        }
    }

    pub fn failed(reason: FailureReason, captured_at: DateTime<Utc>, duration_ms: u64) -> Self {
        Self {
            kind: OutcomeKind::Failed,
            slots: Vec::new(),
            failure_reason: Some(reason),
            captured_at,
            duration_ms,
            screenshot_ref: None,
        }
    }

    pub fn with_screenshot(mut self, reference: impl Into<String>) -> Self {
        self.screenshot_ref = Some(reference.into());
        self
    }

    /// Completion instant of the probe; `last_probe_at` advances to this.
    pub fn completed_at(&self) -> DateTime<Utc> {
        self.captured_at + Duration::milliseconds(self.duration_ms as i64)
    }

    /// Check the kind/slots/failure consistency invariant.
    pub fn is_consistent(&self) -> bool {
        let slots_ok = match self.kind {
            OutcomeKind::SlotsFound => !self.slots.is_empty(),
            _ => self.slots.is_empty(),
        };
        let reason_ok = (self.kind == OutcomeKind::Failed) == self.failure_reason.is_some();
        slots_ok && reason_ok
    }
}
