//! Due-check scheduler
//!
//! One long-running loop with a fixed tick. Each tick reloads the site
//! profile if its file changed, selects the active watches whose interval
//! has elapsed, and runs one probe per due watch, sequentially, with a
//! minimum inter-probe spacing enforced by a rate limiter so the external
//! portal never sees burst load (any future concurrency must keep paying
//! the same limiter). A fault in one watch's probe is recorded against that
//! watch and never aborts the tick for the rest.
//!
//! Manual probes bypass the due gate but share the orchestrator, the
//! spacing limiter, the persistence path and the notification path, and
//! still advance `last_probe_at`.

use chrono::{DateTime, Utc};
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::config::SchedulerConfig;
use crate::error::{Error, Result};
use crate::models::{Outcome, OutcomeKind, WatchId, WatchView};
use crate::notify::Notifier;
use crate::probe::ProbeRunner;
use crate::site::ProfileStore;
use crate::storage::WatchStore;

type SpacingLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Everything the scheduler needs, passed explicitly at construction;
/// no process-wide singletons.
pub struct MonitorContext {
    pub store: Arc<dyn WatchStore>,
    pub prober: Arc<ProbeRunner>,
    pub notifier: Arc<Notifier>,
    pub profiles: Arc<ProfileStore>,
}

/// Summary of one tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Watches that were due this tick
    pub due: usize,
    /// Probes that ran and persisted an outcome (of any kind)
    pub completed: usize,
    /// Watches whose outcome could not be persisted
    pub save_failures: usize,
}

/// The due-check scheduler with explicit start/stop lifecycle
pub struct Scheduler {
    ctx: MonitorContext,
    tick_period: std::time::Duration,
    spacing: Option<SpacingLimiter>,
    is_running: Arc<RwLock<bool>>,
}

impl Scheduler {
    pub fn new(ctx: MonitorContext, config: &SchedulerConfig) -> Self {
        let spacing = Quota::with_period(config.probe_spacing()).map(RateLimiter::direct);

        Self {
            ctx,
            tick_period: config.tick(),
            spacing,
            is_running: Arc::new(RwLock::new(false)),
        }
    }

    /// Run the tick loop until [`Scheduler::stop`] is called. Ticks fire
    /// immediately on start, then every tick period.
    pub async fn run(&self) -> Result<()> {
        *self.is_running.write().await = true;
        tracing::info!(
            tick_secs = self.tick_period.as_secs(),
            "scheduler started"
        );

        while *self.is_running.read().await {
            let report = self.tick(Utc::now()).await;
            if report.due > 0 {
                tracing::info!(
                    due = report.due,
                    completed = report.completed,
                    save_failures = report.save_failures,
                    "tick finished"
                );
            }

            tokio::select! {
                _ = tokio::time::sleep(self.tick_period) => {}
                _ = self.wait_for_stop() => break,
            }
        }

        tracing::info!("scheduler stopped");
        Ok(())
    }

    /// Stop the tick loop
    pub async fn stop(&self) {
        *self.is_running.write().await = false;
    }

    /// Check if the scheduler loop is running
    pub async fn is_running(&self) -> bool {
        *self.is_running.read().await
    }

    async fn wait_for_stop(&self) {
        loop {
            if !*self.is_running.read().await {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        }
    }

    /// Run one tick: profile reload, due selection, sequential probes with
    /// per-watch isolation.
    pub async fn tick(&self, now: DateTime<Utc>) -> TickReport {
        if let Err(e) = self.ctx.profiles.reload_if_changed() {
            // Previous profile stays in effect
            tracing::error!(error = %e, "site profile reload failed");
        }

        let due = match self.ctx.store.due_watches(now) {
            Ok(due) => due,
            Err(e) => {
                tracing::error!(error = %e, "failed to load due watches, skipping tick");
                return TickReport::default();
            }
        };

        let mut report = TickReport {
            due: due.len(),
            ..Default::default()
        };

        for view in due {
            let watch_id = view.watch.id;
            match self.probe_and_record(&view).await {
                Ok(outcome) => {
                    report.completed += 1;
                    tracing::debug!(watch_id, kind = %outcome.kind, "watch probed");
                }
                Err(e) => {
                    // Isolation boundary: this watch failed, the tick goes on
                    report.save_failures += 1;
                    tracing::error!(watch_id, error = %e, "watch probe could not be recorded");
                }
            }
        }

        report
    }

    /// Run a probe for one watch immediately, bypassing the due gate.
    /// Shares the spacing limiter and the full persistence/notification
    /// path with scheduled probes.
    pub async fn check_watch_now(&self, watch_id: WatchId) -> Result<Outcome> {
        let view = self
            .ctx
            .store
            .get_watch(watch_id)
            .map_err(Error::storage)?
            .ok_or_else(|| Error::other(format!("watch {watch_id} not found")))?;

        if !view.watch.active {
            return Err(Error::other(format!("watch {watch_id} is deactivated")));
        }

        tracing::info!(watch_id, "manual probe requested");
        self.probe_and_record(&view).await
    }

    async fn probe_and_record(&self, view: &WatchView) -> Result<Outcome> {
        if let Some(limiter) = &self.spacing {
            limiter.until_ready().await;
        }

        let outcome = self.ctx.prober.probe(&view.target).await;

        // Single transaction: outcome + slots + probe-state advance. On
        // failure nothing is visible and last_probe_at is untouched.
        self.ctx
            .store
            .save_outcome(view.watch.id, &outcome)
            .map_err(Error::storage)?;

        if outcome.kind == OutcomeKind::Indeterminate
            && view.watch.last_outcome_kind == Some(OutcomeKind::Indeterminate)
        {
            tracing::warn!(
                watch_id = view.watch.id,
                category = %view.target.category,
                service = %view.target.service,
                "consecutive indeterminate outcomes: portal structure has likely drifted, \
                 site profile needs updating"
            );
        }

        if outcome.kind == OutcomeKind::SlotsFound {
            match self.ctx.notifier.handle_outcome(view, &outcome).await {
                Ok(0) => {}
                Ok(forwarded) => {
                    tracing::info!(watch_id = view.watch.id, forwarded, "slots forwarded")
                }
                Err(e) => {
                    // Notified set was not extended; the same slots retry on
                    // the next cycle that observes them
                    tracing::warn!(
                        watch_id = view.watch.id,
                        error = %e,
                        "notification hand-off failed, slots remain un-notified"
                    );
                }
            }
        }

        Ok(outcome)
    }
}
