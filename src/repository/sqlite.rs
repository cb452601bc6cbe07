use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::Connection;

use super::{StateRepository, TreasuryState};
use crate::error::{BrainError, BrainResult};
use crate::models::{AllocationVector, Position, RiskDecision, TreasuryOperation};

/// `rusqlite`-backed repository. Latest-state rows live in small
/// single-row tables keyed by `id = 0`; append-only history uses
/// autoincrement tables, mirroring the event log's table shape.
pub struct SqliteRepository {
    conn: Mutex<Connection>,
}

impl SqliteRepository {
    pub fn open(path: &str) -> BrainResult<Self> {
        let conn = Connection::open(path).map_err(|e| BrainError::Persistence(format!("opening repository db: {e}")))?;
        Self::init(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn open_in_memory() -> BrainResult<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| BrainError::Persistence(format!("opening in-memory repository db: {e}")))?;
        Self::init(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn init(conn: &Connection) -> BrainResult<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS latest_allocation (id INTEGER PRIMARY KEY CHECK (id = 0), payload TEXT NOT NULL);
             CREATE TABLE IF NOT EXISTS latest_treasury_state (id INTEGER PRIMARY KEY CHECK (id = 0), high_watermark REAL NOT NULL, total_swept REAL NOT NULL);
             CREATE TABLE IF NOT EXISTS treasury_operations (id INTEGER PRIMARY KEY AUTOINCREMENT, payload TEXT NOT NULL);
             CREATE TABLE IF NOT EXISTS risk_decisions (id INTEGER PRIMARY KEY AUTOINCREMENT, symbol TEXT NOT NULL, payload TEXT NOT NULL);
             CREATE TABLE IF NOT EXISTS breaker_state (id INTEGER PRIMARY KEY CHECK (id = 0), is_open INTEGER NOT NULL);
             CREATE TABLE IF NOT EXISTS positions (symbol TEXT PRIMARY KEY, payload TEXT NOT NULL);",
        )
        .map_err(|e| BrainError::Persistence(format!("creating repository tables: {e}")))?;
        Ok(())
    }
}

#[async_trait]
impl StateRepository for SqliteRepository {
    async fn save_allocation(&self, vector: &AllocationVector) -> BrainResult<()> {
        let payload = serde_json::to_string(vector)?;
        self.conn
            .lock()
            .execute(
                "INSERT INTO latest_allocation (id, payload) VALUES (0, ?1)
                 ON CONFLICT(id) DO UPDATE SET payload = excluded.payload",
                rusqlite::params![payload],
            )
            .map_err(|e| BrainError::Persistence(format!("saving allocation: {e}")))?;
        Ok(())
    }

    async fn latest_allocation(&self) -> BrainResult<Option<AllocationVector>> {
        let conn = self.conn.lock();
        let result = conn.query_row("SELECT payload FROM latest_allocation WHERE id = 0", [], |row| {
            row.get::<_, String>(0)
        });
        match result {
            Ok(payload) => Ok(Some(serde_json::from_str(&payload)?)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(BrainError::Persistence(format!("loading allocation: {e}"))),
        }
    }

    async fn save_treasury_state(&self, state: TreasuryState) -> BrainResult<()> {
        self.conn
            .lock()
            .execute(
                "INSERT INTO latest_treasury_state (id, high_watermark, total_swept) VALUES (0, ?1, ?2)
                 ON CONFLICT(id) DO UPDATE SET high_watermark = excluded.high_watermark, total_swept = excluded.total_swept",
                rusqlite::params![state.high_watermark, state.total_swept],
            )
            .map_err(|e| BrainError::Persistence(format!("saving treasury state: {e}")))?;
        Ok(())
    }

    async fn latest_treasury_state(&self) -> BrainResult<Option<TreasuryState>> {
        let conn = self.conn.lock();
        let result = conn.query_row(
            "SELECT high_watermark, total_swept FROM latest_treasury_state WHERE id = 0",
            [],
            |row| Ok(TreasuryState {
                high_watermark: row.get(0)?,
                total_swept: row.get(1)?,
            }),
        );
        match result {
            Ok(state) => Ok(Some(state)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(BrainError::Persistence(format!("loading treasury state: {e}"))),
        }
    }

    async fn record_treasury_operation(&self, op: &TreasuryOperation) -> BrainResult<()> {
        let payload = serde_json::to_string(op)?;
        self.conn
            .lock()
            .execute("INSERT INTO treasury_operations (payload) VALUES (?1)", rusqlite::params![payload])
            .map_err(|e| BrainError::Persistence(format!("recording treasury operation: {e}")))?;
        Ok(())
    }

    async fn treasury_operations(&self, limit: usize) -> BrainResult<Vec<TreasuryOperation>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT payload FROM treasury_operations ORDER BY id DESC LIMIT ?1")
            .map_err(|e| BrainError::Persistence(format!("preparing treasury query: {e}")))?;
        let rows = stmt
            .query_map(rusqlite::params![limit as i64], |row| row.get::<_, String>(0))
            .map_err(|e| BrainError::Persistence(format!("querying treasury operations: {e}")))?;
        let mut out = Vec::new();
        for row in rows {
            let payload = row.map_err(|e| BrainError::Persistence(format!("reading treasury row: {e}")))?;
            out.push(serde_json::from_str(&payload)?);
        }
        Ok(out)
    }

    async fn record_decision(&self, symbol: &str, decision: &RiskDecision) -> BrainResult<()> {
        let payload = serde_json::to_string(decision)?;
        self.conn
            .lock()
            .execute(
                "INSERT INTO risk_decisions (symbol, payload) VALUES (?1, ?2)",
                rusqlite::params![symbol, payload],
            )
            .map_err(|e| BrainError::Persistence(format!("recording decision: {e}")))?;
        Ok(())
    }

    async fn recent_decisions(&self, limit: usize) -> BrainResult<Vec<(String, RiskDecision)>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT symbol, payload FROM risk_decisions ORDER BY id DESC LIMIT ?1")
            .map_err(|e| BrainError::Persistence(format!("preparing decisions query: {e}")))?;
        let rows = stmt
            .query_map(rusqlite::params![limit as i64], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(|e| BrainError::Persistence(format!("querying decisions: {e}")))?;
        let mut out = Vec::new();
        for row in rows {
            let (symbol, payload) = row.map_err(|e| BrainError::Persistence(format!("reading decision row: {e}")))?;
            out.push((symbol, serde_json::from_str(&payload)?));
        }
        Ok(out)
    }

    async fn save_breaker_open(&self, open: bool) -> BrainResult<()> {
        self.conn
            .lock()
            .execute(
                "INSERT INTO breaker_state (id, is_open) VALUES (0, ?1)
                 ON CONFLICT(id) DO UPDATE SET is_open = excluded.is_open",
                rusqlite::params![open as i64],
            )
            .map_err(|e| BrainError::Persistence(format!("saving breaker state: {e}")))?;
        Ok(())
    }

    async fn breaker_is_open(&self) -> BrainResult<bool> {
        let conn = self.conn.lock();
        let result = conn.query_row("SELECT is_open FROM breaker_state WHERE id = 0", [], |row| row.get::<_, i64>(0));
        match result {
            Ok(v) => Ok(v != 0),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(false),
            Err(e) => Err(BrainError::Persistence(format!("loading breaker state: {e}"))),
        }
    }

    async fn save_positions(&self, positions: &[Position]) -> BrainResult<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM positions", [])
            .map_err(|e| BrainError::Persistence(format!("clearing positions: {e}")))?;
        for position in positions {
            let payload = serde_json::to_string(position)?;
            conn.execute(
                "INSERT INTO positions (symbol, payload) VALUES (?1, ?2)",
                rusqlite::params![position.symbol, payload],
            )
            .map_err(|e| BrainError::Persistence(format!("saving position: {e}")))?;
        }
        Ok(())
    }

    async fn latest_positions(&self) -> BrainResult<Vec<Position>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT payload FROM positions ORDER BY symbol")
            .map_err(|e| BrainError::Persistence(format!("preparing positions query: {e}")))?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|e| BrainError::Persistence(format!("querying positions: {e}")))?;
        let mut out = Vec::new();
        for row in rows {
            let payload = row.map_err(|e| BrainError::Persistence(format!("reading position row: {e}")))?;
            out.push(serde_json::from_str(&payload)?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn allocation_upsert_keeps_single_row() {
        let repo = SqliteRepository::open_in_memory().unwrap();
        let mut v = AllocationVector {
            w1: 1.0,
            w2: 0.0,
            w3: 0.0,
            max_leverage: 3.0,
            equity: 1_000.0,
            timestamp: chrono::Utc::now(),
        };
        repo.save_allocation(&v).await.unwrap();
        v.equity = 2_000.0;
        repo.save_allocation(&v).await.unwrap();
        let loaded = repo.latest_allocation().await.unwrap().unwrap();
        assert_eq!(loaded.equity, 2_000.0);
    }

    #[tokio::test]
    async fn treasury_operations_round_trip_in_insertion_order_desc() {
        let repo = SqliteRepository::open_in_memory().unwrap();
        for i in 0..3 {
            repo.record_treasury_operation(&TreasuryOperation {
                id: uuid::Uuid::new_v4(),
                timestamp: chrono::Utc::now(),
                op_type: crate::models::TreasuryOperationType::Sweep,
                amount: i as f64,
                from_wallet: "trading".to_string(),
                to_wallet: "cold".to_string(),
                reason: None,
                high_watermark_at_time: 0.0,
            })
            .await
            .unwrap();
        }
        let ops = repo.treasury_operations(10).await.unwrap();
        assert_eq!(ops.len(), 3);
        assert_eq!(ops[0].amount, 2.0);
    }

    #[tokio::test]
    async fn breaker_state_defaults_closed() {
        let repo = SqliteRepository::open_in_memory().unwrap();
        assert!(!repo.breaker_is_open().await.unwrap());
        repo.save_breaker_open(true).await.unwrap();
        assert!(repo.breaker_is_open().await.unwrap());
    }
}
