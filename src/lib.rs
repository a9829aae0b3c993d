//! terminwatch - Appointment slot monitor
//!
//! Watches a third-party multi-step booking portal for newly released
//! appointment slots and notifies subscribers exactly once per slot.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`config`] - Process configuration (endpoints, timeouts, paths)
//! - [`site`] - Hot-reloadable site profile: selectors, labels, phrases
//! - [`browser`] - Browser-session ports and the WebDriver adapter
//! - [`driver`] - The multi-step booking-flow state machine
//! - [`extractor`] - Slot extraction from the terminal results page
//! - [`probe`] - Probe orchestrator: one session, one classified outcome
//! - [`scheduler`] - Due-check tick loop with per-watch isolation
//! - [`notify`] - Dedup gate, message rendering, delivery transports
//! - [`storage`] - Store boundary (SQLite) for watches, outcomes and the
//!   notified set
//! - [`diagnostics`] - Screenshot sink
//!
//! # Example
//!
//! ```no_run
//! use terminwatch::config::Config;
//! use terminwatch::storage::{SqliteWatchStore, WatchStore};
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let store = SqliteWatchStore::new(&config.storage.sqlite_path)?;
//!     let target = store.upsert_target(
//!         "Abholung Führerschein / Rückfragen",
//!         "Abholung Führerschein",
//!         "https://termine.duesseldorf.de/select2?md=3",
//!         1,
//!     )?;
//!     store.create_watch("alice", target.id, 3600)?;
//!     Ok(())
//! }
//! ```

pub mod browser;
pub mod config;
pub mod diagnostics;
pub mod driver;
pub mod error;
pub mod extractor;
pub mod models;
pub mod notify;
pub mod probe;
pub mod scheduler;
pub mod site;
pub mod storage;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::error::{Error, Result};
    pub use crate::models::{
        FailureReason, Outcome, OutcomeKind, Slot, SlotKey, Target, Watch, WatchView,
    };
    pub use crate::probe::ProbeRunner;
    pub use crate::scheduler::{MonitorContext, Scheduler};
    pub use crate::site::SiteProfile;
    pub use crate::storage::{SqliteWatchStore, WatchStore};
}

// Direct re-exports for convenience
pub use error::{Error, Result};
pub use models::{Outcome, OutcomeKind, Slot, SlotKey};
