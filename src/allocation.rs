//! AllocationEngine
//! Mission: turn current equity and per-phase performance into a normalized
//! weight vector plus a leverage cap.

use chrono::Utc;
use tracing::info;

use crate::config::EquityTierConfig;
use crate::error::BrainResult;
use crate::eventlog::EventStore;
use crate::models::{AllocationVector, EquityTier, PhaseId};
use crate::tracker::PerformanceTracker;

pub struct AllocationEngine {
    tiers: EquityTierConfig,
}

impl AllocationEngine {
    pub fn new(tiers: EquityTierConfig) -> Self {
        Self { tiers }
    }

    /// Equity tier for leverage-cap selection. Monotone in equity.
    pub fn tier(&self, equity: f64) -> EquityTier {
        if equity < self.tiers.start_p2 {
            EquityTier::Micro
        } else if equity < self.tiers.full_p2 {
            EquityTier::Small
        } else if equity < self.tiers.start_p3 {
            EquityTier::Medium
        } else if equity < self.tiers.start_p3 * 4.0 {
            EquityTier::Large
        } else {
            EquityTier::Institutional
        }
    }

    pub fn max_leverage(&self, equity: f64) -> f64 {
        let idx = match self.tier(equity) {
            EquityTier::Micro => 0,
            EquityTier::Small => 1,
            EquityTier::Medium => 2,
            EquityTier::Large => 3,
            EquityTier::Institutional => 4,
        };
        self.tiers.leverage_caps[idx]
    }

    /// Base weights as a deterministic function of equity alone. Below
    /// `start_p2` only phase 1 participates; weights interpolate linearly
    /// through `full_p2` (phase 2 fully unlocked) up to `start_p3` (phase 3
    /// becomes active too).
    fn base_weights(&self, equity: f64) -> (f64, f64, f64) {
        if equity <= 0.0 {
            return (1.0, 0.0, 0.0);
        }

        if equity < self.tiers.start_p2 {
            return (1.0, 0.0, 0.0);
        }

        if equity < self.tiers.full_p2 {
            let t = (equity - self.tiers.start_p2) / (self.tiers.full_p2 - self.tiers.start_p2);
            let w2 = 0.4 * t;
            return (1.0 - w2, w2, 0.0);
        }

        if equity < self.tiers.start_p3 {
            let t = (equity - self.tiers.full_p2) / (self.tiers.start_p3 - self.tiers.full_p2);
            let w3 = 0.3 * t;
            let w2 = 0.4;
            return (1.0 - w2 - w3, w2, w3);
        }

        (0.3, 0.4, 0.3)
    }

    /// Run the full algorithm from spec.md 4.2: base weights -> performance
    /// modifiers -> normalize -> leverage cap -> append to the event log.
    pub async fn rebalance(
        &self,
        equity: f64,
        tracker: &PerformanceTracker,
        event_log: &dyn EventStore,
    ) -> BrainResult<AllocationVector> {
        let (b1, b2, b3) = self.base_weights(equity);

        let (w1, w2, w3) = if equity <= 0.0 {
            (1.0, 0.0, 0.0)
        } else {
            let m1 = tracker.modifier(PhaseId::Scavenger);
            let m2 = tracker.modifier(PhaseId::Hunter);
            let m3 = tracker.modifier(PhaseId::Sentinel);

            let raw1 = b1 * m1;
            let raw2 = b2 * m2;
            let raw3 = b3 * m3;
            let sum = raw1 + raw2 + raw3;

            if sum <= 0.0 {
                (1.0, 0.0, 0.0)
            } else {
                (raw1 / sum, raw2 / sum, raw3 / sum)
            }
        };

        let vector = AllocationVector {
            w1,
            w2,
            w3,
            max_leverage: self.max_leverage(equity),
            equity,
            timestamp: Utc::now(),
        };

        debug_assert!(vector.sums_to_one());
        debug_assert!(vector.weights_in_bounds());

        info!(
            w1 = vector.w1,
            w2 = vector.w2,
            w3 = vector.w3,
            max_leverage = vector.max_leverage,
            "allocation updated"
        );

        event_log
            .append("evt.allocation.updated", serde_json::to_value(&vector)?)
            .await?;

        Ok(vector)
    }
}
