use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::VecDeque;

use super::{StateRepository, TreasuryState};
use crate::error::BrainResult;
use crate::models::{AllocationVector, Position, RiskDecision, TreasuryOperation};

#[derive(Default)]
struct Inner {
    allocation: Option<AllocationVector>,
    treasury_state: Option<TreasuryState>,
    treasury_ops: VecDeque<TreasuryOperation>,
    decisions: VecDeque<(String, RiskDecision)>,
    breaker_open: bool,
    positions: Vec<Position>,
}

/// Test/dev repository backed by plain in-process state.
pub struct InMemoryRepository {
    inner: RwLock<Inner>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
        }
    }
}

impl Default for InMemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StateRepository for InMemoryRepository {
    async fn save_allocation(&self, vector: &AllocationVector) -> BrainResult<()> {
        self.inner.write().allocation = Some(*vector);
        Ok(())
    }

    async fn latest_allocation(&self) -> BrainResult<Option<AllocationVector>> {
        Ok(self.inner.read().allocation)
    }

    async fn save_treasury_state(&self, state: TreasuryState) -> BrainResult<()> {
        self.inner.write().treasury_state = Some(state);
        Ok(())
    }

    async fn latest_treasury_state(&self) -> BrainResult<Option<TreasuryState>> {
        Ok(self.inner.read().treasury_state)
    }

    async fn record_treasury_operation(&self, op: &TreasuryOperation) -> BrainResult<()> {
        let mut inner = self.inner.write();
        inner.treasury_ops.push_back(op.clone());
        if inner.treasury_ops.len() > 1_000 {
            inner.treasury_ops.pop_front();
        }
        Ok(())
    }

    async fn treasury_operations(&self, limit: usize) -> BrainResult<Vec<TreasuryOperation>> {
        let inner = self.inner.read();
        Ok(inner.treasury_ops.iter().rev().take(limit).cloned().collect())
    }

    async fn record_decision(&self, symbol: &str, decision: &RiskDecision) -> BrainResult<()> {
        let mut inner = self.inner.write();
        inner.decisions.push_back((symbol.to_string(), decision.clone()));
        if inner.decisions.len() > 1_000 {
            inner.decisions.pop_front();
        }
        Ok(())
    }

    async fn recent_decisions(&self, limit: usize) -> BrainResult<Vec<(String, RiskDecision)>> {
        let inner = self.inner.read();
        Ok(inner.decisions.iter().rev().take(limit).cloned().collect())
    }

    async fn save_breaker_open(&self, open: bool) -> BrainResult<()> {
        self.inner.write().breaker_open = open;
        Ok(())
    }

    async fn breaker_is_open(&self) -> BrainResult<bool> {
        Ok(self.inner.read().breaker_open)
    }

    async fn save_positions(&self, positions: &[Position]) -> BrainResult<()> {
        self.inner.write().positions = positions.to_vec();
        Ok(())
    }

    async fn latest_positions(&self) -> BrainResult<Vec<Position>> {
        Ok(self.inner.read().positions.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RiskMetrics;

    #[tokio::test]
    async fn round_trips_allocation() {
        let repo = InMemoryRepository::new();
        assert!(repo.latest_allocation().await.unwrap().is_none());
        let v = AllocationVector {
            w1: 1.0,
            w2: 0.0,
            w3: 0.0,
            max_leverage: 3.0,
            equity: 1_000.0,
            timestamp: chrono::Utc::now(),
        };
        repo.save_allocation(&v).await.unwrap();
        assert_eq!(repo.latest_allocation().await.unwrap().unwrap().w1, 1.0);
    }

    #[tokio::test]
    async fn recent_decisions_returns_newest_first() {
        let repo = InMemoryRepository::new();
        repo.record_decision("BTCUSDT", &RiskDecision::approved("ok", 1.0, RiskMetrics::default()))
            .await
            .unwrap();
        repo.record_decision("ETHUSDT", &RiskDecision::rejected("no", RiskMetrics::default()))
            .await
            .unwrap();
        let recent = repo.recent_decisions(10).await.unwrap();
        assert_eq!(recent[0].0, "ETHUSDT");
    }
}
