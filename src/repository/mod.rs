//! Read-side state repository
//! Mission: durable storage for the latest materialized state of each
//! engine, so a dashboard query or a warm restart doesn't have to replay
//! the entire event log. The event log in `eventlog` remains the source of
//! truth; these are projections kept in sync with it.

mod in_memory;
mod sqlite;

pub use in_memory::InMemoryRepository;
pub use sqlite::SqliteRepository;

use async_trait::async_trait;

use crate::error::BrainResult;
use crate::models::{AllocationVector, Position, RiskDecision, TreasuryOperation};

/// Snapshot of the treasury's ratchet state, mirroring the fields
/// `CapitalFlowManager` keeps in memory.
#[derive(Debug, Clone, Copy, Default)]
pub struct TreasuryState {
    pub high_watermark: f64,
    pub total_swept: f64,
}

#[async_trait]
pub trait StateRepository: Send + Sync {
    async fn save_allocation(&self, vector: &AllocationVector) -> BrainResult<()>;
    async fn latest_allocation(&self) -> BrainResult<Option<AllocationVector>>;

    async fn save_treasury_state(&self, state: TreasuryState) -> BrainResult<()>;
    async fn latest_treasury_state(&self) -> BrainResult<Option<TreasuryState>>;
    async fn record_treasury_operation(&self, op: &TreasuryOperation) -> BrainResult<()>;
    async fn treasury_operations(&self, limit: usize) -> BrainResult<Vec<TreasuryOperation>>;

    async fn record_decision(&self, symbol: &str, decision: &RiskDecision) -> BrainResult<()>;
    async fn recent_decisions(&self, limit: usize) -> BrainResult<Vec<(String, RiskDecision)>>;

    async fn save_breaker_open(&self, open: bool) -> BrainResult<()>;
    async fn breaker_is_open(&self) -> BrainResult<bool>;

    /// Replaces the whole open-position set with `positions`, keyed by
    /// `symbol`. Called after replay and whenever a fill opens, mutates, or
    /// closes a position.
    async fn save_positions(&self, positions: &[Position]) -> BrainResult<()>;
    async fn latest_positions(&self) -> BrainResult<Vec<Position>>;
}
