//! State Recovery / Event Replay
//! Mission: rebuild every engine's in-memory state by replaying the event
//! log from the beginning, deterministically and without emitting any new
//! side effects (no wallet transfers, no outbound orders) along the way.

use std::collections::HashMap;

use tracing::{info, warn};

use crate::error::BrainResult;
use crate::eventlog::EventStore;
use crate::models::{AllocationVector, PhaseId, Position, PositionSide, TradeRecord, TreasuryOperation};
use crate::repository::{StateRepository, TreasuryState};
use crate::tracker::PerformanceTracker;

const REPLAY_BATCH_SIZE: usize = 1_000;

pub const SUBJECT_ALLOCATION_UPDATED: &str = "evt.allocation.updated";
pub const SUBJECT_TREASURY_SWEPT: &str = "evt.treasury.sweep";
pub const SUBJECT_TRADE_RECORDED: &str = "evt.execution.fill";
pub const SUBJECT_BREAKER_OPENED: &str = "evt.breaker.trip";
pub const SUBJECT_BREAKER_CLOSED: &str = "evt.breaker.reset";

/// Accumulated state built from the replayed stream, written out once
/// replay reaches the end of the log.
#[derive(Default)]
struct ReplayAccumulator {
    last_allocation: Option<AllocationVector>,
    treasury_state: TreasuryState,
    last_treasury_op: Option<TreasuryOperation>,
    trades_by_phase: HashMap<PhaseId, Vec<TradeRecord>>,
    breaker_open: bool,
    /// Open positions keyed by symbol, rebuilt from `evt.execution.fill`
    /// payloads - each fill's `size`/`entry_price` is the resulting
    /// snapshot for that symbol, so the latest fill per symbol wins and a
    /// fill with `size <= 0.0` closes the position.
    positions: HashMap<String, Position>,
    events_applied: u64,
}

/// Streams the full event log in ascending id order, in batches of
/// `REPLAY_BATCH_SIZE`, applying each event to an in-memory accumulator.
/// Returns the number of events replayed. If the log is empty, every
/// engine keeps its freshly-constructed default state.
pub async fn replay(
    event_log: &dyn EventStore,
    tracker: &PerformanceTracker,
    repository: &dyn StateRepository,
) -> BrainResult<u64> {
    let mut acc = ReplayAccumulator::default();
    let mut next_id = 0u64;

    loop {
        let batch = event_log.stream_from(next_id, REPLAY_BATCH_SIZE).await?;
        if batch.is_empty() {
            break;
        }
        let batch_len = batch.len();
        for entry in &batch {
            apply_event(&mut acc, entry.subject.as_str(), &entry.payload);
            acc.events_applied += 1;
        }
        next_id = batch.last().map(|e| e.id + 1).unwrap_or(next_id);
        if batch_len < REPLAY_BATCH_SIZE {
            break;
        }
    }

    for phase in PhaseId::ALL {
        let history = acc.trades_by_phase.remove(&phase).unwrap_or_default();
        tracker.rebuild_from_history(phase, history);
    }

    if let Some(vector) = &acc.last_allocation {
        repository.save_allocation(vector).await?;
    }
    repository.save_treasury_state(acc.treasury_state).await?;
    if let Some(op) = &acc.last_treasury_op {
        repository.record_treasury_operation(op).await?;
    }
    repository.save_breaker_open(acc.breaker_open).await?;
    let positions: Vec<Position> = acc.positions.into_values().collect();
    repository.save_positions(&positions).await?;

    info!(events = acc.events_applied, "event log replay complete");
    Ok(acc.events_applied)
}

fn apply_event(acc: &mut ReplayAccumulator, subject: &str, payload: &serde_json::Value) {
    match subject {
        SUBJECT_ALLOCATION_UPDATED => match serde_json::from_value::<AllocationVector>(payload.clone()) {
            Ok(v) => acc.last_allocation = Some(v),
            Err(e) => warn!(subject, error = %e, "failed to decode allocation event during replay"),
        },
        SUBJECT_TREASURY_SWEPT => match serde_json::from_value::<TreasuryOperation>(payload.clone()) {
            Ok(op) => {
                acc.treasury_state.total_swept += op.amount;
                if op.high_watermark_at_time > acc.treasury_state.high_watermark {
                    acc.treasury_state.high_watermark = op.high_watermark_at_time;
                }
                acc.last_treasury_op = Some(op);
            }
            Err(e) => warn!(subject, error = %e, "failed to decode treasury event during replay"),
        },
        SUBJECT_TRADE_RECORDED => match serde_json::from_value::<TradeRecord>(payload.clone()) {
            Ok(trade) => {
                apply_fill_to_positions(acc, &trade);
                acc.trades_by_phase.entry(trade.phase_id).or_default().push(trade);
            }
            Err(e) => warn!(subject, error = %e, "failed to decode trade event during replay"),
        },
        SUBJECT_BREAKER_OPENED => acc.breaker_open = true,
        SUBJECT_BREAKER_CLOSED => acc.breaker_open = false,
        other => warn!(subject = other, "unrecognized event subject during replay, skipping"),
    }
}

/// A fill's `size`/`entry_price` are the resulting position snapshot for
/// `symbol`, not a delta - the latest fill per symbol replaces the prior
/// entry, and `size <= 0.0` removes it.
fn apply_fill_to_positions(acc: &mut ReplayAccumulator, trade: &TradeRecord) {
    let (Some(symbol), Some(size)) = (&trade.symbol, trade.size) else {
        return;
    };
    if size <= 0.0 {
        acc.positions.remove(symbol);
        return;
    }
    let side = match trade.side {
        Some(crate::models::Side::Sell) => PositionSide::Short,
        _ => PositionSide::Long,
    };
    let entry_price = trade.entry_price.unwrap_or(0.0);
    acc.positions.insert(
        symbol.clone(),
        Position {
            symbol: symbol.clone(),
            side,
            size,
            entry_price,
            mark_price: entry_price,
            unrealized_pnl: 0.0,
            leverage: 1.0,
        },
    );
}
