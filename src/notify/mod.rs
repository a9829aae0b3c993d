//! Notification pipeline: dedup gate, message rendering, delivery
//!
//! The dedup gate is the single authority on what gets notified: given a
//! fresh `SlotsFound` outcome it forwards only slots whose (date, time) pair
//! is not yet in the watch's notified set, and the set is extended only
//! *after* the transport accepted the hand-off. A failed hand-off therefore
//! leaves the pairs un-notified, to be retried by the next cycle that still
//! observes them. Slots whose date has passed are stale data and never
//! forwarded.

pub mod transport;

use chrono::NaiveDate;
use std::collections::HashSet;
use std::sync::Arc;

use crate::error::Result;
use crate::models::{Outcome, OutcomeKind, Slot, SlotKey, WatchView};
use crate::storage::WatchStore;
use transport::Transport;

/// A message rendered for delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedMessage {
    pub text: String,
    pub slot_count: usize,
}

/// Pure novelty filter over a watch's notified set
pub struct DedupGate;

impl DedupGate {
    /// Forwardable subset of `slots`: not stale, not already notified, no
    /// in-batch duplicates; order preserved.
    pub fn novel(today: NaiveDate, slots: &[Slot], notified: &HashSet<SlotKey>) -> Vec<Slot> {
        let mut seen: HashSet<SlotKey> = HashSet::new();
        slots
            .iter()
            .filter(|slot| !slot.key().is_expired(today))
            .filter(|slot| !notified.contains(&slot.key()))
            .filter(|slot| seen.insert(slot.key()))
            .cloned()
            .collect()
    }
}

/// Render the subscriber-facing message for a batch of novel slots
pub fn render_message(
    view: &WatchView,
    slots: &[Slot],
    max_listed: usize,
    checked_at: chrono::DateTime<chrono::Utc>,
) -> RenderedMessage {
    let mut text = format!(
        "Appointments available!\n\nService: {}\nCategory: {}\n\nFound {} appointment(s):\n",
        view.target.service,
        view.target.category,
        slots.len(),
    );

    for (idx, slot) in slots.iter().take(max_listed).enumerate() {
        text.push_str(&format!(
            "{}. {} at {}\n",
            idx + 1,
            slot.date_label(),
            slot.time_label()
        ));
    }
    if slots.len() > max_listed {
        text.push_str(&format!(
            "... and {} more appointments\n",
            slots.len() - max_listed
        ));
    }

    text.push_str(&format!(
        "\nBook now: {}\n\nChecked at {}",
        view.target.base_url,
        checked_at.format("%Y-%m-%d %H:%M"),
    ));

    RenderedMessage {
        text,
        slot_count: slots.len(),
    }
}

/// Routes `SlotsFound` outcomes through the gate and the transport
pub struct Notifier {
    store: Arc<dyn WatchStore>,
    transport: Arc<dyn Transport>,
    max_listed: usize,
}

impl Notifier {
    pub fn new(store: Arc<dyn WatchStore>, transport: Arc<dyn Transport>, max_listed: usize) -> Self {
        Self {
            store,
            transport,
            max_listed,
        }
    }

    /// Handle one persisted outcome for a watch. Returns how many slots were
    /// forwarded. Non-`SlotsFound` outcomes forward nothing.
    pub async fn handle_outcome(&self, view: &WatchView, outcome: &Outcome) -> Result<usize> {
        if outcome.kind != OutcomeKind::SlotsFound {
            return Ok(0);
        }

        let watch_id = view.watch.id;
        let today = outcome.captured_at.date_naive();

        // Opportunistic cleanup; expired pairs can never match again
        let pruned = self
            .store
            .prune_expired_notified(watch_id, today)
            .map_err(crate::error::Error::storage)?;
        if pruned > 0 {
            tracing::debug!(watch_id, pruned, "expired notified slots pruned");
        }

        let notified = self
            .store
            .notified_set(watch_id)
            .map_err(crate::error::Error::storage)?;
        let novel = DedupGate::novel(today, &outcome.slots, &notified);
        if novel.is_empty() {
            tracing::debug!(watch_id, "no novel slots to forward");
            return Ok(0);
        }

        let message = render_message(view, &novel, self.max_listed, outcome.captured_at);

        // Hand-off first; only a successful delivery extends the set
        self.transport
            .deliver(&view.watch.subscriber, &message)
            .await?;

        let keys: Vec<SlotKey> = novel.iter().map(Slot::key).collect();
        self.store
            .extend_notified_set(watch_id, &keys)
            .map_err(crate::error::Error::storage)?;

        tracing::info!(
            watch_id,
            subscriber = %view.watch.subscriber,
            forwarded = novel.len(),
            transport = self.transport.name(),
            "novel slots notified"
        );
        Ok(novel.len())
    }
}
