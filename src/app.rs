//! Application state
//! Mission: the single struct wiring every engine together for the control
//! surface binary. Constructed once at startup; every field is an `Arc` (or
//! cheaply `Clone`-able) so the whole state is handed to axum handlers and
//! background tasks by value.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::allocation::AllocationEngine;
use crate::auth::{AuthState, HmacSigner};
use crate::config::Config;
use crate::eventlog::SharedEventStore;
use crate::exchange::{ExchangeWalletAPI, VenueMarketDataSource};
use crate::hft::HftProcessor;
use crate::models::{AllocationVector, Position, Venue};
use crate::repository::StateRepository;
use crate::risk::RiskGuardian;
use crate::router::OrderRouter;
use crate::tracker::PerformanceTracker;
use crate::treasury::CapitalFlowManager;

/// An admin-locked allocation vector, overriding `AllocationEngine::rebalance`
/// output until `expires_at`.
#[derive(Debug, Clone)]
pub struct AllocationOverride {
    pub vector: AllocationVector,
    pub reason: String,
    pub operator_id: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub event_log: SharedEventStore,
    pub repository: Arc<dyn StateRepository>,
    pub allocation_engine: Arc<AllocationEngine>,
    pub tracker: Arc<PerformanceTracker>,
    pub risk: Arc<RiskGuardian>,
    pub treasury: Arc<CapitalFlowManager>,
    pub router: Arc<OrderRouter>,
    pub hft: Arc<HftProcessor>,
    pub wallet_api: Arc<dyn ExchangeWalletAPI>,
    pub market_data: Arc<dyn VenueMarketDataSource>,
    pub auth: AuthState,
    pub hmac_signer: Arc<HmacSigner>,

    pub equity: Arc<RwLock<f64>>,
    pub positions: Arc<RwLock<Vec<Position>>>,
    pub venues: Arc<RwLock<Vec<Venue>>>,
    /// Operator-triggered trading halt. Distinct from the HFT processor's
    /// own latency-driven `CircuitBreaker` - this one only moves on an
    /// explicit `/risk/halt` or `/breaker/reset` call.
    pub breaker_open: Arc<AtomicBool>,
    pub allocation_override: Arc<RwLock<Option<AllocationOverride>>>,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<Config>,
        event_log: SharedEventStore,
        repository: Arc<dyn StateRepository>,
        allocation_engine: Arc<AllocationEngine>,
        tracker: Arc<PerformanceTracker>,
        risk: Arc<RiskGuardian>,
        treasury: Arc<CapitalFlowManager>,
        router: Arc<OrderRouter>,
        hft: Arc<HftProcessor>,
        wallet_api: Arc<dyn ExchangeWalletAPI>,
        market_data: Arc<dyn VenueMarketDataSource>,
        auth: AuthState,
        hmac_signer: Arc<HmacSigner>,
        initial_equity: f64,
    ) -> Self {
        Self {
            config,
            event_log,
            repository,
            allocation_engine,
            tracker,
            risk,
            treasury,
            router,
            hft,
            wallet_api,
            market_data,
            auth,
            hmac_signer,
            equity: Arc::new(RwLock::new(initial_equity)),
            positions: Arc::new(RwLock::new(Vec::new())),
            venues: Arc::new(RwLock::new(Vec::new())),
            breaker_open: Arc::new(AtomicBool::new(false)),
            allocation_override: Arc::new(RwLock::new(None)),
        }
    }

    pub fn equity(&self) -> f64 {
        *self.equity.read()
    }

    pub fn set_equity(&self, equity: f64) {
        *self.equity.write() = equity;
    }

    pub fn is_halted(&self) -> bool {
        self.breaker_open.load(Ordering::SeqCst)
    }

    /// Returns the active override, clearing it first if its duration has
    /// lapsed. Rebalance callers should prefer this over the normal
    /// allocation path whenever it returns `Some`.
    pub fn active_override(&self) -> Option<AllocationVector> {
        let mut guard = self.allocation_override.write();
        if let Some(ov) = guard.as_ref() {
            if ov.expires_at <= Utc::now() {
                *guard = None;
                return None;
            }
            return Some(ov.vector.clone());
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{JwtHandler, UserStore};
    use crate::config::{AuthConfig, Config};
    use crate::eventlog::InMemoryEventStore;
    use crate::exchange::{FakeMarketDataSource, FakeWalletApi};
    use crate::hft::HftProcessor;
    use crate::repository::InMemoryRepository;
    use crate::risk::RiskGuardian;
    use crate::router::OrderRouter;
    use crate::tracker::PerformanceTracker;
    use crate::treasury::CapitalFlowManager;

    fn state() -> AppState {
        let config = Arc::new(Config::default());
        let auth_config = AuthConfig::default();
        let user_store = Arc::new(UserStore::new(":memory:").unwrap());
        let jwt_handler = Arc::new(JwtHandler::new(auth_config.jwt_secret.clone()));
        AppState::new(
            config.clone(),
            Arc::new(InMemoryEventStore::new()),
            Arc::new(InMemoryRepository::new()),
            Arc::new(AllocationEngine::new(config.equity_tiers.clone())),
            Arc::new(PerformanceTracker::new(config.performance.clone())),
            Arc::new(RiskGuardian::new(config.risk.clone())),
            Arc::new(CapitalFlowManager::new(config.treasury.clone(), 1_000.0)),
            Arc::new(OrderRouter::new(config.router.clone())),
            Arc::new(HftProcessor::new(config.hft.clone())),
            Arc::new(FakeWalletApi::new()),
            Arc::new(FakeMarketDataSource::new()),
            AuthState::new(user_store, jwt_handler),
            Arc::new(HmacSigner::new(&auth_config)),
            1_000.0,
        )
    }

    #[test]
    fn fresh_state_is_not_halted_and_has_no_override() {
        let s = state();
        assert!(!s.is_halted());
        assert!(s.active_override().is_none());
    }

    #[test]
    fn expired_override_is_cleared_on_read() {
        let s = state();
        *s.allocation_override.write() = Some(AllocationOverride {
            vector: AllocationVector {
                w1: 1.0,
                w2: 0.0,
                w3: 0.0,
                max_leverage: 1.0,
                equity: 1_000.0,
                timestamp: Utc::now(),
            },
            reason: "test".to_string(),
            operator_id: "op1".to_string(),
            expires_at: Utc::now() - chrono::Duration::seconds(1),
        });
        assert!(s.active_override().is_none());
        assert!(s.allocation_override.read().is_none());
    }

    #[test]
    fn equity_round_trips() {
        let s = state();
        s.set_equity(5_000.0);
        assert_eq!(s.equity(), 5_000.0);
    }
}
