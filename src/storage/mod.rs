//! Store boundary: targets, watches, outcomes and the notified set
//!
//! The core never holds live object-graph references across a suspension
//! point; everything crosses this boundary as flat records with explicit ids.
//! [`WatchStore`] is the trait the scheduler and notifier program against;
//! [`SqliteWatchStore`] is the production implementation (WAL mode, one
//! `Mutex<Connection>`, every multi-row update inside a single transaction
//! with commit-or-rollback semantics). An in-memory constructor backs tests.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::models::{
    Outcome, OutcomeId, OutcomeKind, SlotKey, Target, TargetId, Watch, WatchId, WatchView,
};

/// Fixed-width UTC timestamp format; lexicographic order equals time order,
/// which the monotonic `last_probe_at` update in SQL relies on.
const TS_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";
const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMAT: &str = "%H:%M";

fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.format(TS_FORMAT).to_string()
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    let naive = chrono::NaiveDateTime::parse_from_str(raw, TS_FORMAT)
        .with_context(|| format!("Invalid stored timestamp '{raw}'"))?;
    Ok(naive.and_utc())
}

// ============================================================================
// Store Trait
// ============================================================================

/// Repository for watch scheduling state, probe history and the notified set
pub trait WatchStore: Send + Sync {
    /// Create or update a target identified by (category, service).
    /// Re-upserting reactivates an inactive target and refreshes quantity
    /// and base URL.
    fn upsert_target(
        &self,
        category: &str,
        service: &str,
        base_url: &str,
        quantity: u32,
    ) -> Result<Target>;

    /// Create a watch binding a subscriber to a target. Idempotent per
    /// (subscriber, target): an existing watch is reactivated with the new
    /// interval instead of erroring.
    fn create_watch(&self, subscriber: &str, target_id: TargetId, interval_secs: i64)
        -> Result<Watch>;

    /// Load one watch joined with its target
    fn get_watch(&self, id: WatchId) -> Result<Option<WatchView>>;

    /// List watches, optionally restricted to one subscriber
    fn list_watches(&self, subscriber: Option<&str>) -> Result<Vec<WatchView>>;

    /// Deactivate a watch; returns whether it existed
    fn deactivate_watch(&self, id: WatchId) -> Result<bool>;

    /// All active watches with active targets
    fn active_watches(&self) -> Result<Vec<WatchView>>;

    /// Active watches whose interval has elapsed (boundary inclusive)
    fn due_watches(&self, now: DateTime<Utc>) -> Result<Vec<WatchView>> {
        Ok(self
            .active_watches()?
            .into_iter()
            .filter(|v| v.watch.is_due(now))
            .collect())
    }

    /// Persist an outcome with its slots and advance the watch's probe
    /// state, all in one transaction: `last_probe_at` moves monotonically
    /// to the probe completion time regardless of outcome kind,
    /// `consecutive_failures` increments on Failed and resets on
    /// NoSlots/SlotsFound. A failed transaction leaves no partial rows and
    /// does not touch `last_probe_at`.
    fn save_outcome(&self, watch_id: WatchId, outcome: &Outcome) -> Result<OutcomeId>;

    /// The (date, time) pairs already notified for this watch
    fn notified_set(&self, watch_id: WatchId) -> Result<HashSet<SlotKey>>;

    /// Add pairs to the notified set; duplicates are ignored. Returns the
    /// number of newly inserted pairs.
    fn extend_notified_set(&self, watch_id: WatchId, keys: &[SlotKey]) -> Result<usize>;

    /// Drop notified pairs whose date lies before `today`. Returns the
    /// number removed.
    fn prune_expired_notified(&self, watch_id: WatchId, today: NaiveDate) -> Result<usize>;
}

// ============================================================================
// SQLite Implementation
// ============================================================================

/// Raw target columns before timestamp parsing
struct TargetRow {
    id: TargetId,
    category: String,
    service: String,
    base_url: String,
    quantity: i64,
    active: i64,
    created_at: String,
}

impl TargetRow {
    fn from_row(row: &rusqlite::Row<'_>, offset: usize) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(offset)?,
            category: row.get(offset + 1)?,
            service: row.get(offset + 2)?,
            base_url: row.get(offset + 3)?,
            quantity: row.get(offset + 4)?,
            active: row.get(offset + 5)?,
            created_at: row.get(offset + 6)?,
        })
    }

    fn into_target(self) -> Result<Target> {
        Ok(Target {
            id: self.id,
            category: self.category,
            service: self.service,
            base_url: self.base_url,
            quantity: self.quantity as u32,
            active: self.active != 0,
            created_at: parse_ts(&self.created_at)?,
        })
    }
}

/// Raw watch columns (joined with the target) before timestamp parsing
struct WatchRow {
    id: WatchId,
    target_id: TargetId,
    subscriber: String,
    interval_secs: i64,
    active: bool,
    last_probe_at: Option<String>,
    last_outcome_kind: Option<String>,
    consecutive_failures: u32,
    created_at: String,
    target: TargetRow,
}

impl WatchRow {
    fn into_view(self) -> Result<WatchView> {
        let last_probe_at = self.last_probe_at.as_deref().map(parse_ts).transpose()?;
        let last_outcome_kind = self
            .last_outcome_kind
            .as_deref()
            .map(|k| k.parse::<OutcomeKind>().unwrap_or(OutcomeKind::Failed));

        Ok(WatchView {
            watch: Watch {
                id: self.id,
                target_id: self.target_id,
                subscriber: self.subscriber,
                interval_secs: self.interval_secs,
                active: self.active,
                last_probe_at,
                last_outcome_kind,
                consecutive_failures: self.consecutive_failures,
                created_at: parse_ts(&self.created_at)?,
            },
            target: self.target.into_target()?,
        })
    }
}

/// SQLite implementation of [`WatchStore`]
pub struct SqliteWatchStore {
    conn: Mutex<Connection>,
}

impl SqliteWatchStore {
    /// Open (or create) the database at `path`
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path).context("Failed to open SQLite database")?;

        // WAL for concurrent readers while the scheduler writes
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL; PRAGMA foreign_keys=ON;")?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.create_schema()?;

        tracing::info!(path = %path.display(), "SQLite store initialized");
        Ok(store)
    }

    /// Create an in-memory store (for testing)
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to create in-memory SQLite")?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.create_schema()?;
        Ok(store)
    }

    fn create_schema(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            r#"
                CREATE TABLE IF NOT EXISTS targets (
                    id INTEGER PRIMARY KEY,
                    category TEXT NOT NULL,
                    service TEXT NOT NULL,
                    base_url TEXT NOT NULL,
                    quantity INTEGER NOT NULL DEFAULT 1,
                    active INTEGER NOT NULL DEFAULT 1,
                    created_at TEXT NOT NULL,
                    UNIQUE(category, service)
                );

                CREATE TABLE IF NOT EXISTS watches (
                    id INTEGER PRIMARY KEY,
                    target_id INTEGER NOT NULL REFERENCES targets(id) ON DELETE CASCADE,
                    subscriber TEXT NOT NULL,
                    interval_secs INTEGER NOT NULL,
                    active INTEGER NOT NULL DEFAULT 1,
                    last_probe_at TEXT,
                    last_outcome_kind TEXT,
                    consecutive_failures INTEGER NOT NULL DEFAULT 0,
                    created_at TEXT NOT NULL,
                    UNIQUE(subscriber, target_id)
                );

                CREATE INDEX IF NOT EXISTS idx_watches_active
                    ON watches(active);

                CREATE TABLE IF NOT EXISTS outcomes (
                    id INTEGER PRIMARY KEY,
                    watch_id INTEGER NOT NULL REFERENCES watches(id) ON DELETE CASCADE,
                    kind TEXT NOT NULL,
                    failure_reason TEXT,
                    captured_at TEXT NOT NULL,
                    duration_ms INTEGER NOT NULL,
                    screenshot_ref TEXT
                );

                CREATE INDEX IF NOT EXISTS idx_outcomes_watch
                    ON outcomes(watch_id, captured_at);

                CREATE TABLE IF NOT EXISTS slots (
                    id INTEGER PRIMARY KEY,
                    outcome_id INTEGER NOT NULL REFERENCES outcomes(id) ON DELETE CASCADE,
                    slot_date TEXT NOT NULL,
                    slot_time TEXT NOT NULL,
                    raw_label TEXT NOT NULL,
                    UNIQUE(outcome_id, slot_date, slot_time)
                );

                CREATE TABLE IF NOT EXISTS notified_slots (
                    watch_id INTEGER NOT NULL REFERENCES watches(id) ON DELETE CASCADE,
                    slot_date TEXT NOT NULL,
                    slot_time TEXT NOT NULL,
                    notified_at TEXT NOT NULL,
                    PRIMARY KEY (watch_id, slot_date, slot_time)
                );
                "#,
        )
        .context("Failed to create SQLite schema")?;

        Ok(())
    }

    fn get_target(conn: &Connection, id: TargetId) -> Result<Option<Target>> {
        let raw = conn
            .query_row(
                "SELECT id, category, service, base_url, quantity, active, created_at
                 FROM targets WHERE id = ?1",
                params![id],
                |row| TargetRow::from_row(row, 0),
            )
            .optional()
            .context("Failed to load target")?;

        raw.map(TargetRow::into_target).transpose()
    }

    fn load_views(
        conn: &Connection,
        where_clause: &str,
        args: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<WatchView>> {
        let query = format!(
            "SELECT w.id, w.target_id, w.subscriber, w.interval_secs, w.active,
                    w.last_probe_at, w.last_outcome_kind, w.consecutive_failures, w.created_at,
                    t.id, t.category, t.service, t.base_url, t.quantity, t.active, t.created_at
             FROM watches w
             JOIN targets t ON t.id = w.target_id
             {where_clause}
             ORDER BY w.id"
        );

        let mut stmt = conn
            .prepare(&query)
            .context("Failed to prepare watch query")?;
        let rows = stmt
            .query_map(args, |row| {
                Ok(WatchRow {
                    id: row.get(0)?,
                    target_id: row.get(1)?,
                    subscriber: row.get(2)?,
                    interval_secs: row.get(3)?,
                    active: row.get::<_, i64>(4)? != 0,
                    last_probe_at: row.get(5)?,
                    last_outcome_kind: row.get(6)?,
                    consecutive_failures: row.get::<_, i64>(7)? as u32,
                    created_at: row.get(8)?,
                    target: TargetRow::from_row(row, 9)?,
                })
            })
            .context("Failed to query watches")?;

        let mut views = Vec::new();
        for row in rows {
            views.push(row.context("Failed to read watch row")?.into_view()?);
        }
        Ok(views)
    }
}

impl WatchStore for SqliteWatchStore {
    fn upsert_target(
        &self,
        category: &str,
        service: &str,
        base_url: &str,
        quantity: u32,
    ) -> Result<Target> {
        let conn = self.conn.lock().unwrap();

        let existing: Option<TargetId> = conn
            .query_row(
                "SELECT id FROM targets WHERE category = ?1 AND service = ?2",
                params![category, service],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to check for existing target")?;

        let id = match existing {
            Some(id) => {
                conn.execute(
                    "UPDATE targets SET base_url = ?1, quantity = ?2, active = 1 WHERE id = ?3",
                    params![base_url, quantity as i64, id],
                )
                .context("Failed to update target")?;
                id
            }
            None => {
                conn.execute(
                    "INSERT INTO targets (category, service, base_url, quantity, active, created_at)
                     VALUES (?1, ?2, ?3, ?4, 1, ?5)",
                    params![category, service, base_url, quantity as i64, fmt_ts(Utc::now())],
                )
                .context("Failed to insert target")?;
                conn.last_insert_rowid()
            }
        };

        Self::get_target(&conn, id)?.context("Target vanished after upsert")
    }

    fn create_watch(
        &self,
        subscriber: &str,
        target_id: TargetId,
        interval_secs: i64,
    ) -> Result<Watch> {
        anyhow::ensure!(interval_secs > 0, "interval must be positive");

        let conn = self.conn.lock().unwrap();

        let existing: Option<WatchId> = conn
            .query_row(
                "SELECT id FROM watches WHERE subscriber = ?1 AND target_id = ?2",
                params![subscriber, target_id],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to check for existing watch")?;

        let id = match existing {
            Some(id) => {
                // Reactivate rather than erroring on a duplicate binding
                conn.execute(
                    "UPDATE watches SET active = 1, interval_secs = ?1 WHERE id = ?2",
                    params![interval_secs, id],
                )
                .context("Failed to reactivate watch")?;
                id
            }
            None => {
                conn.execute(
                    "INSERT INTO watches (target_id, subscriber, interval_secs, active, created_at)
                     VALUES (?1, ?2, ?3, 1, ?4)",
                    params![target_id, subscriber, interval_secs, fmt_ts(Utc::now())],
                )
                .context("Failed to insert watch")?;
                conn.last_insert_rowid()
            }
        };

        drop(conn);
        let view = self.get_watch(id)?.context("Watch vanished after create")?;
        Ok(view.watch)
    }

    fn get_watch(&self, id: WatchId) -> Result<Option<WatchView>> {
        let conn = self.conn.lock().unwrap();
        let mut views = Self::load_views(&conn, "WHERE w.id = ?1", &[&id as &dyn rusqlite::ToSql])?;
        Ok(views.pop())
    }

    fn list_watches(&self, subscriber: Option<&str>) -> Result<Vec<WatchView>> {
        let conn = self.conn.lock().unwrap();
        match subscriber {
            Some(subscriber) => Self::load_views(
                &conn,
                "WHERE w.subscriber = ?1",
                &[&subscriber as &dyn rusqlite::ToSql],
            ),
            None => Self::load_views(&conn, "", &[]),
        }
    }

    fn deactivate_watch(&self, id: WatchId) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let changed = conn
            .execute("UPDATE watches SET active = 0 WHERE id = ?1", params![id])
            .context("Failed to deactivate watch")?;
        Ok(changed > 0)
    }

    fn active_watches(&self) -> Result<Vec<WatchView>> {
        let conn = self.conn.lock().unwrap();
        Self::load_views(&conn, "WHERE w.active = 1 AND t.active = 1", &[])
    }

    fn save_outcome(&self, watch_id: WatchId, outcome: &Outcome) -> Result<OutcomeId> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction().context("Failed to begin transaction")?;

        let failure_reason = outcome.failure_reason.as_ref().map(|r| r.to_string());
        tx.execute(
            "INSERT INTO outcomes (watch_id, kind, failure_reason, captured_at, duration_ms, screenshot_ref)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                watch_id,
                outcome.kind.as_str(),
                failure_reason,
                fmt_ts(outcome.captured_at),
                outcome.duration_ms as i64,
                outcome.screenshot_ref,
            ],
        )
        .context("Failed to insert outcome")?;
        let outcome_id = tx.last_insert_rowid();

        for slot in &outcome.slots {
            // The extractor already dedups per page; OR IGNORE keeps the
            // per-outcome uniqueness invariant even against a buggy caller
            tx.execute(
                "INSERT OR IGNORE INTO slots (outcome_id, slot_date, slot_time, raw_label)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    outcome_id,
                    slot.date.format(DATE_FORMAT).to_string(),
                    slot.time.format(TIME_FORMAT).to_string(),
                    slot.raw_label,
                ],
            )
            .context("Failed to insert slot")?;
        }

        // Monotonic advance; fixed-width timestamps make the string
        // comparison a time comparison
        let completed = fmt_ts(outcome.completed_at());
        let changed = tx
            .execute(
                "UPDATE watches SET
                     last_probe_at = CASE
                         WHEN last_probe_at IS NULL OR last_probe_at < ?1 THEN ?1
                         ELSE last_probe_at
                     END,
                     last_outcome_kind = ?2,
                     consecutive_failures = CASE ?2
                         WHEN 'failed' THEN consecutive_failures + 1
                         WHEN 'indeterminate' THEN consecutive_failures
                         ELSE 0
                     END
                 WHERE id = ?3",
                params![completed, outcome.kind.as_str(), watch_id],
            )
            .context("Failed to update watch probe state")?;
        anyhow::ensure!(changed == 1, "watch {watch_id} not found");

        tx.commit().context("Failed to commit outcome")?;
        Ok(outcome_id)
    }

    fn notified_set(&self, watch_id: WatchId) -> Result<HashSet<SlotKey>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT slot_date, slot_time FROM notified_slots WHERE watch_id = ?1")
            .context("Failed to prepare notified-set query")?;

        let rows = stmt
            .query_map(params![watch_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .context("Failed to query notified set")?;

        let mut keys = HashSet::new();
        for row in rows {
            let (date_raw, time_raw) = row.context("Failed to read notified row")?;
            let date = NaiveDate::parse_from_str(&date_raw, DATE_FORMAT)
                .with_context(|| format!("Invalid stored slot date '{date_raw}'"))?;
            let time = NaiveTime::parse_from_str(&time_raw, TIME_FORMAT)
                .with_context(|| format!("Invalid stored slot time '{time_raw}'"))?;
            keys.insert(SlotKey::new(date, time));
        }
        Ok(keys)
    }

    fn extend_notified_set(&self, watch_id: WatchId, keys: &[SlotKey]) -> Result<usize> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction().context("Failed to begin transaction")?;

        let now = fmt_ts(Utc::now());
        let mut inserted = 0;
        for key in keys {
            inserted += tx
                .execute(
                    "INSERT OR IGNORE INTO notified_slots (watch_id, slot_date, slot_time, notified_at)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![
                        watch_id,
                        key.date.format(DATE_FORMAT).to_string(),
                        key.time.format(TIME_FORMAT).to_string(),
                        now,
                    ],
                )
                .context("Failed to extend notified set")?;
        }

        tx.commit().context("Failed to commit notified set")?;
        Ok(inserted)
    }

    fn prune_expired_notified(&self, watch_id: WatchId, today: NaiveDate) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let removed = conn
            .execute(
                "DELETE FROM notified_slots WHERE watch_id = ?1 AND slot_date < ?2",
                params![watch_id, today.format(DATE_FORMAT).to_string()],
            )
            .context("Failed to prune notified set")?;
        Ok(removed)
    }
}
