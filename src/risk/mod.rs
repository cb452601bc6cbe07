//! RiskGuardian
//! Pilot in Command: Risk Engine
//! Mission: the single veto point. Every `IntentSignal` runs through the
//! gates below, in order; the first failure wins. A signal that clears
//! every gate is approved, possibly with its size scaled down by the
//! non-veto adjustment gates.

pub mod correlation;

use tracing::{debug, info, warn};

use crate::config::RiskConfig;
use crate::models::{IntentSignal, PhaseId, Position, RiskDecision, RiskMetrics, Side};
use correlation::CorrelationCache;

/// Market volatility regime, feeding the power-law/regime veto (gate 6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolatilityRegime {
    Normal,
    Expanding,
}

/// Everything the gates need beyond the signal itself: current book state,
/// the allocation-derived leverage cap, and the market regime/tail-risk
/// inputs that a volatility module would otherwise own.
pub struct RiskContext<'a> {
    pub equity: f64,
    pub positions: &'a [Position],
    /// Leverage cap coming out of the allocation engine for this equity tier.
    pub allocation_cap: f64,
    pub regime: VolatilityRegime,
    /// Power-law tail exponent (alpha). Lower values -> fatter tails.
    pub tail_alpha: f64,
    /// Current portfolio delta, signed; used by the phase-3 hedge
    /// short-circuit.
    pub portfolio_delta: f64,
}

pub struct RiskGuardian {
    config: RiskConfig,
    correlation: CorrelationCache,
}

impl RiskGuardian {
    pub fn new(config: RiskConfig) -> Self {
        let ttl = chrono::Duration::seconds(config.correlation_update_interval_secs);
        Self {
            config,
            correlation: CorrelationCache::new(ttl),
        }
    }

    pub fn correlation_cache(&self) -> &CorrelationCache {
        &self.correlation
    }

    fn existing_position_for(&self, ctx: &RiskContext, symbol: &str) -> Option<Position> {
        ctx.positions.iter().find(|p| p.symbol == symbol).cloned()
    }

    /// `projectedNotional` respecting whether the intent adds to, reduces,
    /// or flips an existing same-symbol position.
    fn projected_notional(&self, signal: &IntentSignal, ctx: &RiskContext) -> f64 {
        let price = signal.entry_price.unwrap_or(0.0);
        let new_notional = signal.requested_size * price;

        match self.existing_position_for(ctx, &signal.symbol) {
            None => new_notional,
            Some(pos) => {
                let same_direction = matches!(
                    (pos.side, signal.side),
                    (crate::models::PositionSide::Long, Side::Buy)
                        | (crate::models::PositionSide::Short, Side::Sell)
                );
                if same_direction {
                    pos.notional() + new_notional
                } else {
                    // Reducing or flipping: net against the existing notional.
                    (pos.notional() - new_notional).abs()
                }
            }
        }
    }

    /// Explicit `signal.volatility` wins; otherwise derive it from the
    /// symbol's recorded price history (stddev of returns x last price) so
    /// gate 2 isn't silently skipped just because the signal left it unset.
    fn resolve_volatility(&self, signal: &IntentSignal) -> Option<f64> {
        signal
            .volatility
            .or_else(|| self.correlation.derived_volatility(&signal.symbol))
    }

    /// Run `signal` through every gate. Returns a terminal `RiskDecision`.
    pub fn evaluate(&self, signal: &IntentSignal, ctx: &RiskContext) -> RiskDecision {
        debug!(intent_id = %signal.id, symbol = %signal.symbol, "evaluating intent");

        let mut metrics = RiskMetrics {
            current_leverage: if ctx.equity > 0.0 {
                ctx.positions.iter().map(|p| p.notional()).sum::<f64>() / ctx.equity
            } else {
                0.0
            },
            portfolio_delta: ctx.portfolio_delta,
            ..RiskMetrics::default()
        };

        // Gate 1: phase-3 hedge short-circuit.
        if signal.phase_id.is_sentinel() {
            let signed_size = match signal.side {
                Side::Buy => signal.requested_size,
                Side::Sell => -signal.requested_size,
            };
            let new_delta = ctx.portfolio_delta + signed_size;
            if new_delta.abs() < ctx.portfolio_delta.abs() {
                info!(intent_id = %signal.id, "sentinel hedge auto-approved");
                return RiskDecision::approved(
                    "sentinel hedge reduces portfolio delta",
                    signal.requested_size,
                    metrics,
                );
            }
        }

        // Gate 2: stop distance.
        if let Some(stop) = signal.stop_loss_price {
            if let Some(vol) = self.resolve_volatility(signal) {
                if let Some(entry) = signal.entry_price {
                    let distance = (entry - stop).abs();
                    let required = vol * self.config.min_stop_multiplier;
                    if distance < required {
                        return RiskDecision::rejected(
                            format!("stop distance {distance:.6} below required {required:.6}"),
                            metrics,
                        );
                    }
                }
            }
        }

        // Gate 3: policy vetos.
        let projected_notional = self.projected_notional(signal, ctx);
        if projected_notional > self.config.max_position_notional {
            return RiskDecision::rejected(
                format!(
                    "projected notional {projected_notional:.2} exceeds max {:.2}",
                    self.config.max_position_notional
                ),
                metrics,
            );
        }
        if !self.config.symbol_whitelist.is_empty()
            && !self.config.symbol_whitelist.iter().any(|s| s == &signal.symbol)
        {
            return RiskDecision::rejected(
                format!("symbol {} not whitelisted", signal.symbol),
                metrics,
            );
        }

        // Gate 4: expectancy.
        if self.config.cost_veto_enabled {
            if let (Some(entry), Some(target), Some(stop)) =
                (signal.entry_price, signal.target_price, signal.stop_loss_price)
            {
                let p = (signal.confidence / 100.0).clamp(0.0, 1.0);
                let profit = (target - entry).abs();
                let loss = (entry - stop).abs();
                let ev = p * profit - (1.0 - p) * loss;
                let cost = entry * self.config.base_fee_bps / 10_000.0;
                if ev < cost * self.config.min_expectancy_ratio {
                    return RiskDecision::rejected(
                        format!("expectancy {ev:.6} below required {:.6}", cost * self.config.min_expectancy_ratio),
                        metrics,
                    );
                }
            }
        }

        // Gate 5: latency veto.
        if let Some(profile) = &signal.latency_profile {
            if profile.end_to_end_ms > self.config.max_latency_veto_ms {
                return RiskDecision::rejected(
                    format!(
                        "end-to-end latency {:.1}ms exceeds veto threshold {:.1}ms",
                        profile.end_to_end_ms, self.config.max_latency_veto_ms
                    ),
                    metrics,
                );
            }
        }

        // Gate 6: power-law / regime vetos.
        if ctx.regime == VolatilityRegime::Expanding && matches!(signal.phase_id, PhaseId::Scavenger) {
            return RiskDecision::rejected(
                "expanding volatility regime vetoes scavenger entries",
                metrics,
            );
        }
        let projected_leverage_preview = if ctx.equity > 0.0 {
            projected_notional / ctx.equity
        } else {
            f64::INFINITY
        };
        if ctx.tail_alpha < self.config.tail_exponent_veto_threshold
            && projected_leverage_preview > self.config.tail_leverage_cap
        {
            return RiskDecision::rejected(
                format!(
                    "tail exponent {:.2} with projected leverage {projected_leverage_preview:.2} exceeds tail cap {:.2}",
                    ctx.tail_alpha, self.config.tail_leverage_cap
                ),
                metrics,
            );
        }

        // Gate 7: leverage cap.
        let projected_leverage = if ctx.equity > 0.0 {
            projected_notional / ctx.equity
        } else {
            f64::INFINITY
        };
        metrics.projected_leverage = projected_leverage;
        let leverage_limit = ctx.allocation_cap.min(self.config.max_account_leverage);
        if projected_leverage > leverage_limit {
            return RiskDecision::rejected(
                format!(
                    "Leverage: projected {projected_leverage:.2}x exceeds cap {leverage_limit:.2}x"
                ),
                metrics,
            );
        }

        // Past this point the signal is approved; gates 8-10 only adjust size.
        let mut adjusted_size = signal.requested_size;

        // Gate 8: correlation adjustment (non-veto).
        let mut max_corr: f64 = 0.0;
        let mut correlated_same_direction = false;
        for pos in ctx.positions {
            if pos.symbol == signal.symbol {
                continue;
            }
            let corr = self.correlation.correlation(&signal.symbol, &pos.symbol);
            if corr.abs() > max_corr.abs() {
                max_corr = corr;
            }
            let same_direction = matches!(
                (pos.side, signal.side),
                (crate::models::PositionSide::Long, Side::Buy)
                    | (crate::models::PositionSide::Short, Side::Sell)
            );
            if corr.abs() > self.config.max_correlation && same_direction {
                correlated_same_direction = true;
            }
        }
        metrics.max_correlation = max_corr;
        if correlated_same_direction {
            adjusted_size *= 1.0 - self.config.correlation_penalty;
        }

        // Gate 9: latency soft penalty.
        if let Some(profile) = &signal.latency_profile {
            if profile.end_to_end_ms > self.config.latency_soft_penalty_floor_ms
                && profile.end_to_end_ms <= self.config.latency_soft_penalty_ceiling_ms
            {
                adjusted_size *= self.config.latency_soft_penalty_factor;
            }
        }

        // Gate 10: power-law soft penalty.
        if ctx.tail_alpha < 3.0 {
            let factor = (0.6 * ctx.tail_alpha - 0.8).clamp(0.0, 1.0);
            adjusted_size *= factor;
        }

        if adjusted_size <= 0.0 {
            warn!(intent_id = %signal.id, "soft penalties reduced size to zero");
            return RiskDecision::rejected("adjusted size reduced to zero by penalties", metrics);
        }

        RiskDecision::approved("approved", adjusted_size, metrics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{LatencyProfile, PositionSide};
    use uuid::Uuid;

    fn base_signal() -> IntentSignal {
        IntentSignal {
            id: Uuid::new_v4(),
            phase_id: PhaseId::Hunter,
            symbol: "SOLUSDT".to_string(),
            side: Side::Buy,
            requested_size: 1_000.0,
            entry_price: Some(100.0),
            stop_loss_price: None,
            target_price: None,
            confidence: 60.0,
            volatility: None,
            latency_profile: None,
            metadata: serde_json::json!({}),
            timestamp: chrono::Utc::now(),
        }
    }

    fn ctx<'a>(positions: &'a [Position]) -> RiskContext<'a> {
        RiskContext {
            equity: 10_000.0,
            positions,
            allocation_cap: 10.0,
            regime: VolatilityRegime::Normal,
            tail_alpha: 4.0,
            portfolio_delta: 0.0,
        }
    }

    #[test]
    fn s2_leverage_veto() {
        let guardian = RiskGuardian::new(RiskConfig::default());
        let existing = Position {
            symbol: "BTCUSDT".to_string(),
            side: PositionSide::Long,
            size: 1.0,
            entry_price: 25_000.0,
            mark_price: 25_000.0,
            unrealized_pnl: 0.0,
            leverage: 2.5,
        };
        let mut signal = base_signal();
        signal.symbol = "BTCUSDT".to_string();
        signal.requested_size = 400.0; // 400 * 100 = 40_000 notional on top of 25_000
        signal.entry_price = Some(100.0);

        let positions = [existing];
        let mut c = ctx(&positions);
        c.equity = 10_000.0;
        c.allocation_cap = 5.0;

        let decision = guardian.evaluate(&signal, &c);
        assert!(!decision.approved);
        assert!(decision.reason.contains("Leverage"), "{}", decision.reason);
        assert_eq!(decision.adjusted_size, 0.0);
    }

    #[test]
    fn s3_correlation_penalty_halves_size() {
        let mut config = RiskConfig::default();
        config.max_correlation = 0.8;
        config.correlation_penalty = 0.5;
        config.max_position_notional = 10_000_000.0;
        config.max_account_leverage = 100.0;
        let guardian = RiskGuardian::new(config);

        let base = chrono::Utc::now();
        for i in 0..20 {
            let t = base + chrono::Duration::seconds(i);
            guardian.correlation.record_price("SOLUSDT", 20.0 + i as f64 * 0.3, t);
            guardian.correlation.record_price("BTCUSDT", 100.0 + i as f64 * 0.3, t);
        }

        let positions = [Position {
            symbol: "BTCUSDT".to_string(),
            side: PositionSide::Long,
            size: 1.0,
            entry_price: 100.0,
            mark_price: 100.0,
            unrealized_pnl: 0.0,
            leverage: 1.0,
        }];

        let mut signal = base_signal();
        signal.symbol = "SOLUSDT".to_string();
        signal.requested_size = 1_000.0;
        signal.entry_price = Some(1.0);

        let mut c = ctx(&positions);
        c.allocation_cap = 100.0;
        c.equity = 1_000_000.0;

        let decision = guardian.evaluate(&signal, &c);
        assert!(decision.approved);
        assert!((decision.adjusted_size - 500.0).abs() < 1e-6, "{}", decision.adjusted_size);
    }

    #[test]
    fn approved_implies_adjusted_size_in_bounds() {
        let guardian = RiskGuardian::new(RiskConfig::default());
        let signal = base_signal();
        let positions: Vec<Position> = Vec::new();
        let c = ctx(&positions);
        let decision = guardian.evaluate(&signal, &c);
        assert!(decision.is_invariant_consistent());
        if decision.approved {
            assert!(decision.adjusted_size <= signal.requested_size);
        }
    }

    #[test]
    fn sentinel_hedge_auto_approves() {
        let guardian = RiskGuardian::new(RiskConfig::default());
        let mut signal = base_signal();
        signal.phase_id = PhaseId::Sentinel;
        signal.side = Side::Sell;
        signal.requested_size = 10.0;

        let positions: Vec<Position> = Vec::new();
        let mut c = ctx(&positions);
        c.portfolio_delta = 100.0; // selling reduces a positive delta

        let decision = guardian.evaluate(&signal, &c);
        assert!(decision.approved);
        assert_eq!(decision.adjusted_size, signal.requested_size);
    }

    #[test]
    fn stop_distance_gate_uses_derived_volatility_when_unset() {
        let guardian = RiskGuardian::new(RiskConfig::default());
        let base = chrono::Utc::now();
        for (i, price) in [100.0, 101.0, 99.0, 100.5].into_iter().enumerate() {
            guardian
                .correlation
                .record_price("SOLUSDT", price, base + chrono::Duration::seconds(i as i64));
        }

        let mut signal = base_signal();
        signal.volatility = None;
        signal.entry_price = Some(100.0);
        signal.stop_loss_price = Some(99.999);

        let positions: Vec<Position> = Vec::new();
        let c = ctx(&positions);
        let decision = guardian.evaluate(&signal, &c);
        assert!(!decision.approved, "derived volatility should have triggered gate 2");
        assert!(decision.reason.contains("stop distance"), "{}", decision.reason);
    }

    #[test]
    fn latency_veto_rejects_slow_signals() {
        let guardian = RiskGuardian::new(RiskConfig::default());
        let mut signal = base_signal();
        signal.latency_profile = Some(LatencyProfile { end_to_end_ms: 600.0 });
        let positions: Vec<Position> = Vec::new();
        let c = ctx(&positions);
        let decision = guardian.evaluate(&signal, &c);
        assert!(!decision.approved);
    }

    #[test]
    fn latency_soft_penalty_scales_down_approved_size() {
        let guardian = RiskGuardian::new(RiskConfig::default());
        let mut signal = base_signal();
        signal.latency_profile = Some(LatencyProfile { end_to_end_ms: 300.0 });
        let positions: Vec<Position> = Vec::new();
        let c = ctx(&positions);
        let decision = guardian.evaluate(&signal, &c);
        assert!(decision.approved);
        assert!((decision.adjusted_size - signal.requested_size * 0.75).abs() < 1e-6);
    }
}
