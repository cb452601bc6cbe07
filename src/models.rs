//! Core data model
//! Mission: Types shared across the allocation, risk, treasury and routing engines
//!
//! These are the entities in the system's data model (AllocationVector,
//! EquityTier, PhasePerformance, TradeRecord, Position, IntentSignal,
//! RiskDecision, RiskMetrics, TreasuryOperation, RoutingDecision, Venue,
//! EventLogEntry). They are plain data; the engines in `allocation`,
//! `risk`, `treasury`, `router` and `hft` own the behavior.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifies one of the three strategy phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseId {
    /// Phase 1 - Scavenger
    Scavenger,
    /// Phase 2 - Hunter
    Hunter,
    /// Phase 3 - Sentinel
    Sentinel,
}

impl PhaseId {
    pub const ALL: [PhaseId; 3] = [PhaseId::Scavenger, PhaseId::Hunter, PhaseId::Sentinel];

    pub fn as_str(&self) -> &'static str {
        match self {
            PhaseId::Scavenger => "scavenger",
            PhaseId::Hunter => "hunter",
            PhaseId::Sentinel => "sentinel",
        }
    }

    pub fn is_sentinel(&self) -> bool {
        matches!(self, PhaseId::Sentinel)
    }
}

/// Equity tiers used to select the account-wide leverage cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EquityTier {
    Micro,
    Small,
    Medium,
    Large,
    Institutional,
}

impl EquityTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            EquityTier::Micro => "micro",
            EquityTier::Small => "small",
            EquityTier::Medium => "medium",
            EquityTier::Large => "large",
            EquityTier::Institutional => "institutional",
        }
    }
}

/// Normalized capital allocation weights across the three phases.
///
/// Invariant: `w1 + w2 + w3 = 1 ± 1e-6`, each `wi in [0,1]`. Emitted, never
/// mutated in place - a new vector replaces the old one.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AllocationVector {
    pub w1: f64,
    pub w2: f64,
    pub w3: f64,
    pub max_leverage: f64,
    pub equity: f64,
    pub timestamp: DateTime<Utc>,
}

impl AllocationVector {
    pub const WEIGHT_EPSILON: f64 = 1e-6;

    pub fn weight_for(&self, phase: PhaseId) -> f64 {
        match phase {
            PhaseId::Scavenger => self.w1,
            PhaseId::Hunter => self.w2,
            PhaseId::Sentinel => self.w3,
        }
    }

    pub fn sums_to_one(&self) -> bool {
        ((self.w1 + self.w2 + self.w3) - 1.0).abs() <= Self::WEIGHT_EPSILON
    }

    pub fn weights_in_bounds(&self) -> bool {
        [self.w1, self.w2, self.w3]
            .iter()
            .all(|w| *w >= 0.0 && *w <= 1.0)
    }
}

/// Rolling per-phase performance summary, not stored mutably - recomputed
/// from the trade log each time it is needed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PhasePerformance {
    pub phase_id: PhaseId,
    pub total_pnl: f64,
    pub trade_count: usize,
    pub win_rate: f64,
    pub avg_win: f64,
    pub avg_loss: f64,
    pub sharpe: f64,
    pub modifier: f64,
}

/// Side of a trade or intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(&self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

/// Position direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionSide {
    Long,
    Short,
}

/// Append-only record of a fill's PnL, used by the performance tracker to
/// compute rolling Sharpe ratios. `size`/`entry_price` carry the resulting
/// position snapshot for that symbol (absolute, not a delta), so replay can
/// reconstruct open positions from the fill stream alone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub id: Uuid,
    pub phase_id: PhaseId,
    pub pnl: f64,
    pub timestamp: DateTime<Utc>,
    pub symbol: Option<String>,
    pub side: Option<Side>,
    #[serde(default)]
    pub size: Option<f64>,
    #[serde(default)]
    pub entry_price: Option<f64>,
}

/// An open (or just-closed) position. Opened by a fill, mutated by
/// subsequent fills on the same symbol, closed when size reaches zero.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub side: PositionSide,
    pub size: f64,
    pub entry_price: f64,
    pub mark_price: f64,
    pub unrealized_pnl: f64,
    pub leverage: f64,
}

impl Position {
    pub fn notional(&self) -> f64 {
        self.size * self.mark_price
    }

    pub fn is_closed(&self) -> bool {
        self.size <= 0.0
    }
}

/// Latency budget attached to an intent, used by the latency veto/penalty
/// gates.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LatencyProfile {
    pub end_to_end_ms: f64,
}

/// An immutable trade intent emitted by a phase strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentSignal {
    pub id: Uuid,
    pub phase_id: PhaseId,
    pub symbol: String,
    pub side: Side,
    pub requested_size: f64,
    pub entry_price: Option<f64>,
    pub stop_loss_price: Option<f64>,
    pub target_price: Option<f64>,
    /// Confidence in [0, 100].
    pub confidence: f64,
    pub volatility: Option<f64>,
    pub latency_profile: Option<LatencyProfile>,
    pub metadata: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

/// Snapshot of risk metrics accompanying a `RiskDecision`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RiskMetrics {
    pub current_leverage: f64,
    pub projected_leverage: f64,
    pub max_correlation: f64,
    pub portfolio_delta: f64,
    pub portfolio_beta: f64,
    pub var95: Option<f64>,
}

impl Default for RiskMetrics {
    fn default() -> Self {
        Self {
            current_leverage: 0.0,
            projected_leverage: 0.0,
            max_correlation: 0.0,
            portfolio_delta: 0.0,
            portfolio_beta: 0.0,
            var95: None,
        }
    }
}

/// Outcome of running an `IntentSignal` through the `RiskGuardian` gates.
///
/// Invariant: `approved == true` implies `0 < adjusted_size <= requested_size`.
/// `approved == false` implies `adjusted_size == 0.0`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskDecision {
    pub approved: bool,
    pub reason: String,
    pub adjusted_size: f64,
    pub risk_metrics: RiskMetrics,
}

impl RiskDecision {
    pub fn rejected(reason: impl Into<String>, risk_metrics: RiskMetrics) -> Self {
        Self {
            approved: false,
            reason: reason.into(),
            adjusted_size: 0.0,
            risk_metrics,
        }
    }

    pub fn approved(reason: impl Into<String>, adjusted_size: f64, risk_metrics: RiskMetrics) -> Self {
        Self {
            approved: true,
            reason: reason.into(),
            adjusted_size,
            risk_metrics,
        }
    }

    pub fn is_invariant_consistent(&self) -> bool {
        if self.approved {
            self.adjusted_size > 0.0
        } else {
            self.adjusted_size == 0.0
        }
    }
}

/// Kind of treasury operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TreasuryOperationType {
    Sweep,
    ManualTransfer,
}

/// Append-only treasury ledger entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreasuryOperation {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub op_type: TreasuryOperationType,
    pub amount: f64,
    pub from_wallet: String,
    pub to_wallet: String,
    pub reason: Option<String>,
    pub high_watermark_at_time: f64,
}

/// Venue type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VenueType {
    Exchange,
    DarkPool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct VenueFees {
    pub maker: f64,
    pub taker: f64,
    pub rebate: Option<f64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct VenueLiquidity {
    pub market_share: f64,
}

/// A tradeable venue (exchange or dark pool).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Venue {
    pub id: String,
    pub name: String,
    pub venue_type: VenueType,
    pub active: bool,
    pub latency_micros: u64,
    pub fees: VenueFees,
    pub liquidity: VenueLiquidity,
    pub co_located: bool,
    pub network_optimized: bool,
}

/// Order type / time-in-force attached to a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderKind {
    Limit,
    Market,
    HiddenLimit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeInForce {
    Gtc,
    Ioc,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct OrderParams {
    pub kind: OrderKind,
    pub time_in_force: TimeInForce,
    /// For hidden-limit orders: the fraction of true size shown on the book.
    pub display_fraction: Option<f64>,
    pub hidden: bool,
}

/// One slice of a `RoutingDecision`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Route {
    pub venue_id: String,
    pub quantity: f64,
    pub percentage: f64,
    pub expected_price: f64,
    pub expected_fees: f64,
    pub expected_latency_micros: u64,
    pub priority: u32,
    pub order_params: OrderParams,
}

/// Execution algorithm selected for a routing request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionAlgorithm {
    Twap,
    Vwap,
    Aggressive,
    Stealth,
}

/// Output of the order router: how a sized order is split across venues.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub request_id: Uuid,
    pub algorithm: ExecutionAlgorithm,
    pub routes: Vec<Route>,
    /// Basis points of notional.
    pub total_expected_cost_bps: f64,
    pub expected_latency_micros: u64,
    pub confidence: f64,
    pub reasoning: String,
}

/// Market snapshot for one symbol, as produced by `VenueMarketDataSource`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub bid: f64,
    pub ask: f64,
    pub bid_size: f64,
    pub ask_size: f64,
    pub volume: f64,
    pub timestamp: DateTime<Utc>,
}

impl MarketSnapshot {
    pub fn mid(&self) -> f64 {
        (self.bid + self.ask) / 2.0
    }
}

/// Monotonically increasing event log entry. The durable source of truth;
/// in-memory state is a projection of a stream of these.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLogEntry {
    pub id: u64,
    pub timestamp: DateTime<Utc>,
    pub subject: String,
    pub payload: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocation_vector_sums_to_one() {
        let v = AllocationVector {
            w1: 0.5,
            w2: 0.3,
            w3: 0.2,
            max_leverage: 5.0,
            equity: 10_000.0,
            timestamp: Utc::now(),
        };
        assert!(v.sums_to_one());
        assert!(v.weights_in_bounds());
    }

    #[test]
    fn risk_decision_invariant_holds_for_approval_and_rejection() {
        let approved = RiskDecision::approved("ok", 100.0, RiskMetrics::default());
        assert!(approved.is_invariant_consistent());

        let rejected = RiskDecision::rejected("nope", RiskMetrics::default());
        assert!(rejected.is_invariant_consistent());
    }
}
