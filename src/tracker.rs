//! PerformanceTracker
//! Mission: maintain phase-scoped PnL history, compute rolling Sharpe
//! ratios, and produce the performance modifier that scales allocation
//! weights.

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use uuid::Uuid;

use crate::config::PerformanceConfig;
use crate::models::{PhaseId, PhasePerformance, Side, TradeRecord};

/// Per-phase rolling trade log plus the Sharpe/modifier computation.
pub struct PerformanceTracker {
    config: PerformanceConfig,
    trades: RwLock<HashMap<PhaseId, Vec<TradeRecord>>>,
}

impl PerformanceTracker {
    pub fn new(config: PerformanceConfig) -> Self {
        let mut trades = HashMap::new();
        for phase in PhaseId::ALL {
            trades.insert(phase, Vec::new());
        }
        Self {
            config,
            trades: RwLock::new(trades),
        }
    }

    /// Append a trade to the phase's append-only log. `size`/`entry_price`
    /// are the resulting position snapshot for `symbol`, if the fill
    /// produced one.
    #[allow(clippy::too_many_arguments)]
    pub fn record_trade(
        &self,
        phase_id: PhaseId,
        pnl: f64,
        ts: DateTime<Utc>,
        symbol: Option<String>,
        side: Option<Side>,
        size: Option<f64>,
        entry_price: Option<f64>,
    ) -> TradeRecord {
        let record = TradeRecord {
            id: Uuid::new_v4(),
            phase_id,
            pnl,
            timestamp: ts,
            symbol,
            side,
            size,
            entry_price,
        };
        self.trades
            .write()
            .entry(phase_id)
            .or_default()
            .push(record.clone());
        record
    }

    fn trades_in_window(&self, phase_id: PhaseId, window_days: i64) -> Vec<f64> {
        let cutoff = Utc::now() - Duration::days(window_days);
        self.trades
            .read()
            .get(&phase_id)
            .map(|log| {
                log.iter()
                    .filter(|t| t.timestamp >= cutoff)
                    .map(|t| t.pnl)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Annualized Sharpe ratio over the trailing `window_days`.
    ///
    /// `mean(pnl) / stddev(pnl) * sqrt(365)`. Undefined with fewer than 2
    /// samples returns 0. A zero-variance series returns +3.0/-3.0/0.0
    /// depending on the sign of the mean, since the ratio itself is
    /// undefined there.
    pub fn sharpe(&self, phase_id: PhaseId, window_days: i64) -> f64 {
        let pnl = self.trades_in_window(phase_id, window_days);
        if pnl.len() < 2 {
            return 0.0;
        }

        let n = pnl.len() as f64;
        let mean = pnl.iter().sum::<f64>() / n;
        let variance = pnl.iter().map(|p| (p - mean).powi(2)).sum::<f64>() / n;
        let stddev = variance.sqrt();

        if stddev == 0.0 {
            return if mean > 0.0 {
                3.0
            } else if mean < 0.0 {
                -3.0
            } else {
                0.0
            };
        }

        (mean / stddev) * 365f64.sqrt()
    }

    /// Performance modifier used to scale a phase's base allocation weight.
    pub fn modifier(&self, phase_id: PhaseId) -> f64 {
        let trade_count = self.trades_in_window(phase_id, self.config.window_days).len();
        if trade_count < self.config.min_trade_count {
            return 1.0;
        }

        let sharpe = self.sharpe(phase_id, self.config.window_days);
        if sharpe < self.config.malus_threshold {
            self.config.malus_multiplier
        } else if sharpe > self.config.bonus_threshold {
            self.config.bonus_multiplier
        } else {
            1.0
        }
    }

    /// Full performance summary for one phase.
    pub fn performance(&self, phase_id: PhaseId) -> PhasePerformance {
        let pnl = self.trades_in_window(phase_id, self.config.window_days);
        let trade_count = pnl.len();
        let total_pnl: f64 = pnl.iter().sum();
        let wins: Vec<f64> = pnl.iter().copied().filter(|p| *p > 0.0).collect();
        let losses: Vec<f64> = pnl.iter().copied().filter(|p| *p < 0.0).collect();

        let win_rate = if trade_count > 0 {
            wins.len() as f64 / trade_count as f64
        } else {
            0.0
        };
        let avg_win = if wins.is_empty() {
            0.0
        } else {
            wins.iter().sum::<f64>() / wins.len() as f64
        };
        let avg_loss = if losses.is_empty() {
            0.0
        } else {
            losses.iter().sum::<f64>() / losses.len() as f64
        };

        PhasePerformance {
            phase_id,
            total_pnl,
            trade_count,
            win_rate,
            avg_win,
            avg_loss,
            sharpe: self.sharpe(phase_id, self.config.window_days),
            modifier: self.modifier(phase_id),
        }
    }

    /// Deterministic reconstruction from a replayed trade log. Clears the
    /// phase's in-memory log and replaces it wholesale.
    pub fn rebuild_from_history(&self, phase_id: PhaseId, history: Vec<TradeRecord>) {
        self.trades.write().insert(phase_id, history);
    }
}
