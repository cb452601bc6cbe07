//! CapitalFlowManager
//! Mission: ratchet a high-watermark on account equity and sweep the
//! surplus above a target allocation to cold storage, so a drawdown never
//! claws back capital that already earned its way out.

use chrono::Utc;
use parking_lot::RwLock;
use tokio::time::sleep;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::TreasuryConfig;
use crate::error::BrainResult;
use crate::eventlog::EventStore;
use crate::exchange::ExchangeWalletAPI;
use crate::models::{TreasuryOperation, TreasuryOperationType};

const TRADING_WALLET: &str = "trading";
const COLD_WALLET: &str = "cold_storage";

/// Mutable treasury state. `high_watermark` and `total_swept` are
/// monotonically non-decreasing - checked by the accompanying tests - and
/// both survive process restart via event replay, never reset in place.
struct TreasuryState {
    high_watermark: f64,
    total_swept: f64,
}

pub struct CapitalFlowManager {
    config: TreasuryConfig,
    state: RwLock<TreasuryState>,
}

impl CapitalFlowManager {
    pub fn new(config: TreasuryConfig, initial_high_watermark: f64) -> Self {
        Self {
            config,
            state: RwLock::new(TreasuryState {
                high_watermark: initial_high_watermark,
                total_swept: 0.0,
            }),
        }
    }

    pub fn high_watermark(&self) -> f64 {
        self.state.read().high_watermark
    }

    pub fn total_swept(&self) -> f64 {
        self.state.read().total_swept
    }

    /// Ratchets the high watermark upward; never lowers it on a drawdown.
    pub fn update_high_watermark(&self, equity: f64) -> f64 {
        let mut state = self.state.write();
        if equity > state.high_watermark {
            state.high_watermark = equity;
        }
        state.high_watermark
    }

    /// True once equity clears `high_watermark * sweep_threshold`, i.e. the
    /// account has grown `sweep_threshold - 1.0` beyond its prior peak.
    pub fn check_sweep_conditions(&self, equity: f64) -> bool {
        let hw = self.state.read().high_watermark;
        equity >= hw * self.config.sweep_threshold
    }

    /// An equity jump of `equity_increase_sweep_trigger` or more since the
    /// last recorded equity fires a sweep check outside the normal
    /// watermark ratchet - e.g. after a large realized gain.
    pub fn should_trigger_sweep_on_equity_increase(&self, equity: f64, previous_equity: f64) -> bool {
        if previous_equity <= 0.0 {
            return false;
        }
        (equity - previous_equity) / previous_equity >= self.config.equity_increase_sweep_trigger
    }

    /// Sweeps `min(excess, balance - reserve_limit)` from the trading
    /// wallet to cold storage, where `excess = balance - target_allocation
    /// * sweep_threshold`, retrying transient exchange failures with
    /// exponential backoff.
    pub async fn execute_sweep(
        &self,
        wallet: &dyn ExchangeWalletAPI,
        event_log: &dyn EventStore,
        equity: f64,
    ) -> BrainResult<Option<TreasuryOperation>> {
        let trigger = self.config.target_allocation * self.config.sweep_threshold;
        let excess = equity - trigger;
        if excess <= 0.0 {
            return Ok(None);
        }
        let headroom_above_reserve = (equity - self.config.reserve_limit).max(0.0);
        let amount = excess.min(headroom_above_reserve);
        if amount <= 0.0 {
            return Ok(None);
        }

        let mut attempt = 0;
        loop {
            match wallet.transfer(TRADING_WALLET, COLD_WALLET, amount).await {
                Ok(()) => break,
                Err(e) if attempt < self.config.max_retries => {
                    attempt += 1;
                    let delay = self.config.retry_base_delay_ms * 2u64.pow(attempt - 1);
                    warn!(attempt, delay_ms = delay, error = %e, "sweep transfer failed, retrying");
                    sleep(std::time::Duration::from_millis(delay)).await;
                }
                Err(e) => return Err(e),
            }
        }

        let high_watermark_at_time = {
            let mut state = self.state.write();
            state.total_swept += amount;
            state.high_watermark
        };

        let op = TreasuryOperation {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            op_type: TreasuryOperationType::Sweep,
            amount,
            from_wallet: TRADING_WALLET.to_string(),
            to_wallet: COLD_WALLET.to_string(),
            reason: Some("equity surplus above target allocation".to_string()),
            high_watermark_at_time,
        };

        info!(amount, "executed treasury sweep");
        event_log
            .append("evt.treasury.sweep", serde_json::to_value(&op)?)
            .await?;

        Ok(Some(op))
    }
}
