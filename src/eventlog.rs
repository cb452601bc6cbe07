//! Event log
//! Mission: the durable, append-only source of truth. In-memory engine
//! state is always a projection of this stream.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::Connection;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::{BrainError, BrainResult};
use crate::models::EventLogEntry;

/// `append`/`streamFrom` contract from the external interfaces section.
/// Ids are monotonically increasing and assigned by a single writer so
/// replay is deterministic (testable property #6).
#[async_trait]
pub trait EventStore: Send + Sync {
    async fn append(&self, subject: &str, payload: serde_json::Value) -> BrainResult<EventLogEntry>;
    async fn stream_from(&self, id: u64, limit: usize) -> BrainResult<Vec<EventLogEntry>>;
    async fn len(&self) -> BrainResult<u64>;
}

/// In-memory event store. Used by unit and replay-determinism tests so
/// they never touch disk.
pub struct InMemoryEventStore {
    next_id: AtomicU64,
    entries: Mutex<Vec<EventLogEntry>>,
}

impl Default for InMemoryEventStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            entries: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append(&self, subject: &str, payload: serde_json::Value) -> BrainResult<EventLogEntry> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let entry = EventLogEntry {
            id,
            timestamp: Utc::now(),
            subject: subject.to_string(),
            payload,
        };
        self.entries.lock().push(entry.clone());
        Ok(entry)
    }

    async fn stream_from(&self, id: u64, limit: usize) -> BrainResult<Vec<EventLogEntry>> {
        let entries = self.entries.lock();
        Ok(entries
            .iter()
            .filter(|e| e.id >= id)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn len(&self) -> BrainResult<u64> {
        Ok(self.entries.lock().len() as u64)
    }
}

/// `rusqlite`-backed event store, the production repository implementation
/// (the teacher already depends on `rusqlite` with the `bundled` feature).
/// A single writer task should own one of these; `append` takes `&self` via
/// an internal mutex to match that ownership model without requiring
/// callers to hold `&mut`.
pub struct SqliteEventStore {
    conn: Mutex<Connection>,
}

impl SqliteEventStore {
    pub fn open(path: &str) -> BrainResult<Self> {
        let conn = Connection::open(path)
            .map_err(|e| BrainError::Persistence(format!("opening event log: {e}")))?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS event_log (
                id INTEGER PRIMARY KEY,
                timestamp TEXT NOT NULL,
                subject TEXT NOT NULL,
                payload TEXT NOT NULL
            )",
            [],
        )
        .map_err(|e| BrainError::Persistence(format!("creating event_log table: {e}")))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> BrainResult<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| BrainError::Persistence(format!("opening in-memory event log: {e}")))?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS event_log (
                id INTEGER PRIMARY KEY,
                timestamp TEXT NOT NULL,
                subject TEXT NOT NULL,
                payload TEXT NOT NULL
            )",
            [],
        )
        .map_err(|e| BrainError::Persistence(format!("creating event_log table: {e}")))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

#[async_trait]
impl EventStore for SqliteEventStore {
    async fn append(&self, subject: &str, payload: serde_json::Value) -> BrainResult<EventLogEntry> {
        let now = Utc::now();
        let payload_str = payload.to_string();
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO event_log (timestamp, subject, payload) VALUES (?1, ?2, ?3)",
            rusqlite::params![now.to_rfc3339(), subject, payload_str],
        )
        .map_err(|e| BrainError::Persistence(format!("appending event: {e}")))?;
        let id = conn.last_insert_rowid() as u64;
        Ok(EventLogEntry {
            id,
            timestamp: now,
            subject: subject.to_string(),
            payload,
        })
    }

    async fn stream_from(&self, id: u64, limit: usize) -> BrainResult<Vec<EventLogEntry>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT id, timestamp, subject, payload FROM event_log
                 WHERE id >= ?1 ORDER BY id ASC LIMIT ?2",
            )
            .map_err(|e| BrainError::Persistence(format!("preparing stream query: {e}")))?;

        let rows = stmt
            .query_map(rusqlite::params![id as i64, limit as i64], |row| {
                let id: i64 = row.get(0)?;
                let ts: String = row.get(1)?;
                let subject: String = row.get(2)?;
                let payload: String = row.get(3)?;
                Ok((id, ts, subject, payload))
            })
            .map_err(|e| BrainError::Persistence(format!("querying event log: {e}")))?;

        let mut out = Vec::new();
        for row in rows {
            let (id, ts, subject, payload) =
                row.map_err(|e| BrainError::Persistence(format!("reading event row: {e}")))?;
            out.push(EventLogEntry {
                id: id as u64,
                timestamp: ts
                    .parse()
                    .map_err(|e| BrainError::Persistence(format!("parsing timestamp: {e}")))?,
                subject,
                payload: serde_json::from_str(&payload)
                    .map_err(|e| BrainError::Persistence(format!("parsing payload: {e}")))?,
            });
        }
        Ok(out)
    }

    async fn len(&self) -> BrainResult<u64> {
        let conn = self.conn.lock();
        conn.query_row("SELECT COUNT(*) FROM event_log", [], |row| row.get::<_, i64>(0))
            .map(|n| n as u64)
            .map_err(|e| BrainError::Persistence(format!("counting event log: {e}")))
    }
}

/// Shared handle type used by the rest of the crate so engines don't care
/// which backing store they're writing to.
pub type SharedEventStore = Arc<dyn EventStore>;
