//! The four execution algorithms. Each turns a `RouteRequest` and a slice
//! of already-active venues into a `RoutingDecision`; `route()` in `mod.rs`
//! applies co-location/network adjustments afterward.

use crate::config::RouterConfig;
use crate::models::{
    ExecutionAlgorithm, OrderKind, OrderParams, Route, RoutingDecision, Side, TimeInForce, Venue, VenueType,
};

use super::{fee_bps_for, new_decision, RouteRequest};

fn reference_price(request: &RouteRequest, aggressive_cross: bool) -> f64 {
    match (request.side, aggressive_cross) {
        (Side::Buy, false) => request.market.bid,
        (Side::Sell, false) => request.market.ask,
        (Side::Buy, true) => request.market.ask,
        (Side::Sell, true) => request.market.bid,
    }
}

fn finalize(mut decision: RoutingDecision, notional_weighted_fee_bps: f64) -> RoutingDecision {
    decision.total_expected_cost_bps = notional_weighted_fee_bps;
    decision
}

/// Splits the order equally across the top 3 venues by market share, to be
/// worked in `time_slices` equal slices over the execution window. Passive
/// limit orders, good-till-cancelled.
pub fn twap(request: &RouteRequest, venues: &[Venue], config: &RouterConfig) -> RoutingDecision {
    let mut ranked: Vec<&Venue> = venues.iter().collect();
    ranked.sort_by(|a, b| b.liquidity.market_share.partial_cmp(&a.liquidity.market_share).unwrap());
    ranked.truncate(3);

    let mut decision = new_decision(
        ExecutionAlgorithm::Twap,
        format!(
            "TWAP across top {} venues by market share, {} time slices",
            ranked.len(),
            config.time_slices
        ),
    );
    decision.confidence = 85.0;
    if ranked.is_empty() {
        return decision;
    }

    let price = reference_price(request, false);
    let per_venue_qty = request.quantity / ranked.len() as f64;
    let mut weighted_fee = 0.0;

    for (i, venue) in ranked.iter().enumerate() {
        let fee_bps = fee_bps_for(venue, false);
        weighted_fee += fee_bps / ranked.len() as f64;
        decision.routes.push(Route {
            venue_id: venue.id.clone(),
            quantity: per_venue_qty,
            percentage: 1.0 / ranked.len() as f64,
            expected_price: price,
            expected_fees: per_venue_qty * price * fee_bps / 10_000.0,
            expected_latency_micros: venue.latency_micros,
            priority: i as u32,
            order_params: OrderParams {
                kind: OrderKind::Limit,
                time_in_force: TimeInForce::Gtc,
                display_fraction: None,
                hidden: false,
            },
        });
    }

    finalize(decision, weighted_fee)
}

/// Splits proportionally to each venue's share of total visible volume,
/// skipping venues whose allocation would round to less than one unit.
/// Passive limit, immediate-or-cancel.
pub fn vwap(request: &RouteRequest, venues: &[Venue]) -> RoutingDecision {
    let mut decision = new_decision(ExecutionAlgorithm::Vwap, "VWAP proportional to venue volume share");
    decision.confidence = 90.0;

    let total_share: f64 = venues.iter().map(|v| v.liquidity.market_share).sum();
    if total_share <= 0.0 {
        return decision;
    }

    let price = reference_price(request, false);
    let mut weighted_fee = 0.0;
    let mut allocated = 0.0;

    for (i, venue) in venues.iter().enumerate() {
        let share = venue.liquidity.market_share / total_share;
        let qty = request.quantity * share;
        if qty < 1.0 {
            continue;
        }
        let fee_bps = fee_bps_for(venue, false);
        weighted_fee += fee_bps * share;
        allocated += qty;
        decision.routes.push(Route {
            venue_id: venue.id.clone(),
            quantity: qty,
            percentage: share,
            expected_price: price,
            expected_fees: qty * price * fee_bps / 10_000.0,
            expected_latency_micros: venue.latency_micros,
            priority: i as u32,
            order_params: OrderParams {
                kind: OrderKind::Limit,
                time_in_force: TimeInForce::Ioc,
                display_fraction: None,
                hidden: false,
            },
        });
    }

    if allocated > 0.0 {
        for route in decision.routes.iter_mut() {
            route.percentage = route.quantity / allocated;
        }
    }

    finalize(decision, weighted_fee)
}

/// Crosses the spread on the lowest-latency venues (up to 3), for when
/// speed of fill matters more than price improvement. Market, IOC.
pub fn aggressive(request: &RouteRequest, venues: &[Venue]) -> RoutingDecision {
    let mut ranked: Vec<&Venue> = venues.iter().collect();
    ranked.sort_by_key(|v| v.latency_micros);
    ranked.truncate(3);

    let mut decision = new_decision(
        ExecutionAlgorithm::Aggressive,
        format!("Aggressive market sweep across {} lowest-latency venues", ranked.len()),
    );
    decision.confidence = 95.0;
    if ranked.is_empty() {
        return decision;
    }

    let price = reference_price(request, true);
    let per_venue_qty = request.quantity / ranked.len() as f64;
    let mut weighted_fee = 0.0;

    for (i, venue) in ranked.iter().enumerate() {
        let fee_bps = fee_bps_for(venue, true);
        weighted_fee += fee_bps / ranked.len() as f64;
        decision.routes.push(Route {
            venue_id: venue.id.clone(),
            quantity: per_venue_qty,
            percentage: 1.0 / ranked.len() as f64,
            expected_price: price,
            expected_fees: per_venue_qty * price * fee_bps / 10_000.0,
            expected_latency_micros: venue.latency_micros,
            priority: i as u32,
            order_params: OrderParams {
                kind: OrderKind::Market,
                time_in_force: TimeInForce::Ioc,
                display_fraction: None,
                hidden: false,
            },
        });
    }

    finalize(decision, weighted_fee)
}

/// 70% routed hidden to a dark pool, 30% split across the top 2 exchange
/// venues as hidden-limit orders showing only 10% of true size - minimizes
/// information leakage for size that would otherwise move the book.
pub fn stealth(request: &RouteRequest, venues: &[Venue]) -> RoutingDecision {
    let mut decision = new_decision(
        ExecutionAlgorithm::Stealth,
        "70% dark pool, 30% hidden-limit across top 2 exchanges",
    );
    decision.confidence = 80.0;

    let price = reference_price(request, false);
    let mut weighted_fee = 0.0;

    let dark_pool = venues
        .iter()
        .filter(|v| v.venue_type == VenueType::DarkPool)
        .max_by(|a, b| a.liquidity.market_share.partial_cmp(&b.liquidity.market_share).unwrap());

    if let Some(dp) = dark_pool {
        let qty = request.quantity * 0.7;
        let fee_bps = fee_bps_for(dp, false);
        weighted_fee += fee_bps * 0.7;
        decision.routes.push(Route {
            venue_id: dp.id.clone(),
            quantity: qty,
            percentage: 0.7,
            expected_price: price,
            expected_fees: qty * price * fee_bps / 10_000.0,
            expected_latency_micros: dp.latency_micros,
            priority: 0,
            order_params: OrderParams {
                kind: OrderKind::HiddenLimit,
                time_in_force: TimeInForce::Gtc,
                display_fraction: Some(0.0),
                hidden: true,
            },
        });
    }

    let exchange_remainder = if dark_pool.is_some() { 0.3 } else { 1.0 };
    let mut exchanges: Vec<&Venue> = venues.iter().filter(|v| v.venue_type == VenueType::Exchange).collect();
    exchanges.sort_by(|a, b| b.liquidity.market_share.partial_cmp(&a.liquidity.market_share).unwrap());
    exchanges.truncate(2);

    if !exchanges.is_empty() {
        let per_venue_pct = exchange_remainder / exchanges.len() as f64;
        for (i, venue) in exchanges.iter().enumerate() {
            let qty = request.quantity * per_venue_pct;
            let fee_bps = fee_bps_for(venue, false);
            weighted_fee += fee_bps * per_venue_pct;
            decision.routes.push(Route {
                venue_id: venue.id.clone(),
                quantity: qty,
                percentage: per_venue_pct,
                expected_price: price,
                expected_fees: qty * price * fee_bps / 10_000.0,
                expected_latency_micros: venue.latency_micros,
                priority: (i + 1) as u32,
                order_params: OrderParams {
                    kind: OrderKind::HiddenLimit,
                    time_in_force: TimeInForce::Gtc,
                    display_fraction: Some(0.10),
                    hidden: true,
                },
            });
        }
    }

    finalize(decision, weighted_fee)
}
