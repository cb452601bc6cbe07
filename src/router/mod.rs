//! Order-Routing Core
//! Mission: turn a sized order intent into a concrete split across venues,
//! using one of four execution algorithms, then apply co-location/network
//! adjustments before handing the decision to the HFT processor.

mod algorithms;

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::RouterConfig;
use crate::error::{BrainError, BrainResult};
use crate::models::{ExecutionAlgorithm, MarketSnapshot, RoutingDecision, Side, Venue};

pub use algorithms::{aggressive, stealth, twap, vwap};

/// Inbound order to be split across venues. Not part of the shared data
/// model - it's the router's own request shape, analogous to how
/// `RiskContext` belongs to the risk module rather than `models`.
pub struct RouteRequest<'a> {
    pub symbol: &'a str,
    pub side: Side,
    pub quantity: f64,
    /// Explicit algorithm choice wins over everything else.
    pub explicit_algorithm: Option<ExecutionAlgorithm>,
    /// A phase's strategy tag, used to pick an algorithm when none was
    /// requested explicitly.
    pub strategy_tag: Option<&'a str>,
    pub venues: &'a [Venue],
    pub market: &'a MarketSnapshot,
}

pub struct OrderRouter {
    config: RouterConfig,
}

impl OrderRouter {
    pub fn new(config: RouterConfig) -> Self {
        Self { config }
    }

    fn select_algorithm(&self, request: &RouteRequest) -> ExecutionAlgorithm {
        if let Some(explicit) = request.explicit_algorithm {
            return explicit;
        }
        match request.strategy_tag {
            Some("scalp") | Some("breakout") => ExecutionAlgorithm::Aggressive,
            Some("swing") | Some("position") => ExecutionAlgorithm::Twap,
            Some("iceberg") | Some("accumulation") => ExecutionAlgorithm::Stealth,
            _ => ExecutionAlgorithm::Vwap,
        }
    }

    fn validate(&self, request: &RouteRequest) -> BrainResult<()> {
        if request.quantity < self.config.min_order_size || request.quantity > self.config.max_order_size {
            return Err(BrainError::InvariantViolation(format!(
                "order quantity {} outside bounds [{}, {}]",
                request.quantity, self.config.min_order_size, self.config.max_order_size
            )));
        }
        let age = Utc::now() - request.market.timestamp;
        if age.num_seconds() > self.config.market_data_timeout_secs {
            return Err(BrainError::TransientExchange(format!(
                "market data for {} is {}s old, exceeds timeout of {}s",
                request.symbol,
                age.num_seconds(),
                self.config.market_data_timeout_secs
            )));
        }
        if request.venues.iter().all(|v| !v.active) {
            return Err(BrainError::TransientExchange(format!(
                "no active venues for {}",
                request.symbol
            )));
        }
        Ok(())
    }

    /// Selects an algorithm, builds the venue split, then applies
    /// co-location/network-optimization latency adjustments.
    pub fn route(&self, request: &RouteRequest) -> BrainResult<RoutingDecision> {
        self.validate(request)?;

        let active_venues: Vec<Venue> = request.venues.iter().filter(|v| v.active).cloned().collect();
        let algorithm = self.select_algorithm(request);

        let mut decision = match algorithm {
            ExecutionAlgorithm::Twap => twap(request, &active_venues, &self.config),
            ExecutionAlgorithm::Vwap => vwap(request, &active_venues),
            ExecutionAlgorithm::Aggressive => aggressive(request, &active_venues),
            ExecutionAlgorithm::Stealth => stealth(request, &active_venues),
        };

        for route in decision.routes.iter_mut() {
            let venue = active_venues.iter().find(|v| v.id == route.venue_id);
            if let Some(venue) = venue {
                let mut latency = venue.latency_micros;
                if self.config.enable_co_location && venue.co_located {
                    latency /= 2;
                }
                if self.config.enable_network_optimization && venue.network_optimized {
                    latency = (latency as f64 * 0.8) as u64;
                }
                route.expected_latency_micros = latency;
            }
        }
        decision.expected_latency_micros = decision
            .routes
            .iter()
            .map(|r| r.expected_latency_micros)
            .max()
            .unwrap_or(0);

        if decision.routes.is_empty() {
            warn!(symbol = request.symbol, "routing produced no venues");
        }
        info!(
            symbol = request.symbol,
            algorithm = ?decision.algorithm,
            routes = decision.routes.len(),
            "routing decision built"
        );

        Ok(decision)
    }
}

pub(crate) fn fee_bps_for(venue: &Venue, taker: bool) -> f64 {
    (if taker { venue.fees.taker } else { venue.fees.maker }) * 10_000.0
}

pub(crate) fn new_decision(algorithm: ExecutionAlgorithm, reasoning: impl Into<String>) -> RoutingDecision {
    RoutingDecision {
        request_id: Uuid::new_v4(),
        algorithm,
        routes: Vec::new(),
        total_expected_cost_bps: 0.0,
        expected_latency_micros: 0,
        confidence: 0.0,
        reasoning: reasoning.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{VenueFees, VenueLiquidity, VenueType};
    use chrono::Utc;

    fn venue(id: &str, market_share: f64, latency: u64, co_located: bool) -> Venue {
        Venue {
            id: id.to_string(),
            name: id.to_string(),
            venue_type: VenueType::Exchange,
            active: true,
            latency_micros: latency,
            fees: VenueFees {
                maker: 0.0002,
                taker: 0.0004,
                rebate: None,
            },
            liquidity: VenueLiquidity { market_share },
            co_located,
            network_optimized: false,
        }
    }

    fn snapshot() -> MarketSnapshot {
        MarketSnapshot {
            bid: 100.0,
            ask: 100.1,
            bid_size: 10.0,
            ask_size: 10.0,
            volume: 10_000.0,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn explicit_algorithm_wins_over_strategy_tag() {
        let router = OrderRouter::new(RouterConfig::default());
        let venues = vec![venue("a", 0.5, 100, false)];
        let snap = snapshot();
        let request = RouteRequest {
            symbol: "BTCUSDT",
            side: Side::Buy,
            quantity: 10.0,
            explicit_algorithm: Some(ExecutionAlgorithm::Stealth),
            strategy_tag: Some("scalp"),
            venues: &venues,
            market: &snap,
        };
        assert_eq!(router.select_algorithm(&request), ExecutionAlgorithm::Stealth);
    }

    #[test]
    fn rejects_quantity_outside_bounds() {
        let router = OrderRouter::new(RouterConfig::default());
        let venues = vec![venue("a", 0.5, 100, false)];
        let snap = snapshot();
        let request = RouteRequest {
            symbol: "BTCUSDT",
            side: Side::Buy,
            quantity: 0.0001,
            explicit_algorithm: None,
            strategy_tag: None,
            venues: &venues,
            market: &snap,
        };
        assert!(router.route(&request).is_err());
    }

    #[test]
    fn co_location_halves_expected_latency() {
        let router = OrderRouter::new(RouterConfig::default());
        let venues = vec![venue("a", 1.0, 1_000, true)];
        let snap = snapshot();
        let request = RouteRequest {
            symbol: "BTCUSDT",
            side: Side::Buy,
            quantity: 10.0,
            explicit_algorithm: Some(ExecutionAlgorithm::Vwap),
            strategy_tag: None,
            venues: &venues,
            market: &snap,
        };
        let decision = router.route(&request).unwrap();
        assert!(decision.routes[0].expected_latency_micros < 1_000);
    }
}
