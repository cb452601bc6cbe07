//! Background task wiring
//! Mission: realize the concurrency model as long-lived tokio tasks over
//! bounded channels - ingest, a risk worker pool, a single router worker,
//! the HFT batch driver, and the treasury scheduler. The event log is the
//! one piece that doesn't get its own actor: every task shares the same
//! `Arc<dyn EventStore>`, which already serializes writes behind an
//! internal mutex, so total order falls out of that shared handle rather
//! than a dedicated appender task.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::interval;
use tracing::{error, info, warn};

use crate::app::AppState;
use crate::hft::{HftTask, Priority};
use crate::models::{IntentSignal, PhaseId, Position, PositionSide, RiskDecision, Side};
use crate::risk::{RiskContext, VolatilityRegime};

pub const INTENT_CHANNEL_CAPACITY: usize = 1_024;
pub const ROUTED_CHANNEL_CAPACITY: usize = 1_024;
pub const DEFAULT_RISK_WORKER_POOL_SIZE: usize = 4;
const DEFAULT_TREASURY_CHECK_INTERVAL_SECS: u64 = 30;

/// A fill observed from a venue connector, fed into the ingest task
/// alongside fresh intents. `equity_after` is the account equity the fill
/// produced, used to drive the treasury's equity-change trigger. `size`/
/// `entry_price` are the resulting position snapshot for `symbol` (absolute,
/// not a delta) so replay can reconstruct open positions from the logged
/// fill alone; `None` for fills that don't change a position (e.g. a
/// standalone PnL adjustment).
#[derive(Debug, Clone)]
pub struct FillEvent {
    pub phase_id: PhaseId,
    pub pnl: f64,
    pub symbol: Option<String>,
    pub side: Option<Side>,
    pub size: Option<f64>,
    pub entry_price: Option<f64>,
    pub equity_after: f64,
}

#[derive(Debug, Clone)]
pub enum IngestEvent {
    Intent(IntentSignal),
    Fill(FillEvent),
}

/// Handles to every spawned background task, returned so the binary can
/// hold them for the lifetime of the process (and abort them on shutdown).
pub struct TaskHandles {
    pub ingest: tokio::task::JoinHandle<()>,
    pub risk_workers: Vec<tokio::task::JoinHandle<()>>,
    pub router_worker: tokio::task::JoinHandle<()>,
    pub hft_driver: tokio::task::JoinHandle<()>,
    pub treasury_scheduler: tokio::task::JoinHandle<()>,
}

/// Wires the full pipeline: ingest -> risk worker pool -> router worker ->
/// HFT queue, plus the independent treasury scheduler. Returns the sender
/// callers use to feed new intents and fills into the pipeline.
pub fn spawn_pipeline(state: AppState, risk_worker_count: usize) -> (mpsc::Sender<IngestEvent>, TaskHandles) {
    let (ingest_tx, ingest_rx) = mpsc::channel(INTENT_CHANNEL_CAPACITY);
    let (risk_tx, risk_rx) = mpsc::channel(INTENT_CHANNEL_CAPACITY);
    let (routed_tx, routed_rx) = mpsc::channel(ROUTED_CHANNEL_CAPACITY);

    let ingest = spawn_ingest(state.clone(), ingest_rx, risk_tx);
    let risk_workers = spawn_risk_worker_pool(risk_worker_count, state.clone(), risk_rx, routed_tx);
    let router_worker = spawn_router_worker(state.clone(), routed_rx);
    let hft_driver = spawn_hft_batch_driver(state.clone());
    let treasury_scheduler = spawn_treasury_scheduler(state);

    (
        ingest_tx,
        TaskHandles {
            ingest,
            risk_workers,
            router_worker,
            hft_driver,
            treasury_scheduler,
        },
    )
}

/// Fans incoming market data and fills out to performance and risk. An
/// intent is appended to the log then forwarded to the risk pool; a fill
/// updates the tracker and equity, then checks the treasury trigger.
fn spawn_ingest(
    state: AppState,
    mut events: mpsc::Receiver<IngestEvent>,
    risk_tx: mpsc::Sender<IntentSignal>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                IngestEvent::Intent(signal) => {
                    let payload = match serde_json::to_value(&signal) {
                        Ok(v) => v,
                        Err(e) => {
                            error!(error = %e, "failed to serialize intent");
                            continue;
                        }
                    };
                    if let Err(e) = state.event_log.append("evt.intent.received", payload).await {
                        error!(error = %e, "failed to append intent to event log");
                        continue;
                    }
                    if risk_tx.send(signal).await.is_err() {
                        warn!("risk worker pool channel closed, stopping ingest");
                        break;
                    }
                }
                IngestEvent::Fill(fill) => {
                    let symbol = fill.symbol.clone();
                    let size = fill.size;
                    let entry_price = fill.entry_price;
                    let side = fill.side;
                    let record = state.tracker.record_trade(
                        fill.phase_id,
                        fill.pnl,
                        chrono::Utc::now(),
                        fill.symbol,
                        fill.side,
                        fill.size,
                        fill.entry_price,
                    );
                    if let Ok(payload) = serde_json::to_value(&record) {
                        if let Err(e) = state.event_log.append("evt.execution.fill", payload).await {
                            error!(error = %e, "failed to append fill to event log");
                        }
                    }
                    apply_fill_to_live_positions(&state, symbol, side, size, entry_price).await;
                    let previous_equity = state.equity();
                    state.set_equity(fill.equity_after);
                    state.treasury.update_high_watermark(fill.equity_after);
                    if state
                        .treasury
                        .should_trigger_sweep_on_equity_increase(fill.equity_after, previous_equity)
                    {
                        run_sweep_check(&state).await;
                    }
                }
            }
        }
        info!("ingest task shut down");
    })
}

/// Mirrors a fill's resulting position snapshot into the live position set
/// the risk worker pool reads (`size <= 0.0` closes it), then persists the
/// set so a restart doesn't need a full replay to recover it.
async fn apply_fill_to_live_positions(
    state: &AppState,
    symbol: Option<String>,
    side: Option<Side>,
    size: Option<f64>,
    entry_price: Option<f64>,
) {
    let (Some(symbol), Some(size)) = (symbol, size) else {
        return;
    };
    {
        let mut positions = state.positions.write();
        positions.retain(|p| p.symbol != symbol);
        if size > 0.0 {
            let position_side = match side {
                Some(Side::Sell) => PositionSide::Short,
                _ => PositionSide::Long,
            };
            let entry_price = entry_price.unwrap_or(0.0);
            positions.push(Position {
                symbol,
                side: position_side,
                size,
                entry_price,
                mark_price: entry_price,
                unrealized_pnl: 0.0,
                leverage: 1.0,
            });
        }
    }
    let snapshot = state.positions.read().clone();
    if let Err(e) = state.repository.save_positions(&snapshot).await {
        error!(error = %e, "failed to persist position snapshot");
    }
}

/// N workers pulling from the same intent channel. Gate evaluation is
/// synchronous and non-suspending by design, so a worker's only suspension
/// points are the channel receive and the event-log append around it.
fn spawn_risk_worker_pool(
    count: usize,
    state: AppState,
    intents: mpsc::Receiver<IntentSignal>,
    routed_tx: mpsc::Sender<(IntentSignal, RiskDecision)>,
) -> Vec<tokio::task::JoinHandle<()>> {
    let intents = std::sync::Arc::new(tokio::sync::Mutex::new(intents));
    (0..count)
        .map(|worker_id| {
            let state = state.clone();
            let intents = intents.clone();
            let routed_tx = routed_tx.clone();
            tokio::spawn(async move {
                loop {
                    let signal = {
                        let mut rx = intents.lock().await;
                        rx.recv().await
                    };
                    let Some(signal) = signal else {
                        break;
                    };

                    if state.is_halted() {
                        let decision = RiskDecision::rejected(
                            "trading halted by operator",
                            crate::models::RiskMetrics::default(),
                        );
                        record_decision(&state, &signal, &decision).await;
                        continue;
                    }

                    let positions = state.positions.read().clone();
                    let equity = state.equity();
                    let allocation_cap = state.allocation_engine.max_leverage(equity);
                    let ctx = RiskContext {
                        equity,
                        positions: &positions,
                        allocation_cap,
                        regime: VolatilityRegime::Normal,
                        tail_alpha: 4.0,
                        portfolio_delta: 0.0,
                    };
                    let decision = state.risk.evaluate(&signal, &ctx);
                    record_decision(&state, &signal, &decision).await;

                    if decision.approved && routed_tx.send((signal, decision)).await.is_err() {
                        warn!(worker_id, "router worker channel closed, stopping risk worker");
                        break;
                    }
                }
                info!(worker_id, "risk worker shut down");
            })
        })
        .collect()
}

async fn record_decision(state: &AppState, signal: &IntentSignal, decision: &RiskDecision) {
    let payload = serde_json::json!({
        "decision": decision,
        "intentId": signal.id,
    });
    if let Err(e) = state.event_log.append("evt.risk.decision", payload).await {
        error!(error = %e, "failed to append risk decision");
    }
    if let Err(e) = state.repository.record_decision(&signal.symbol, decision).await {
        error!(error = %e, "failed to persist risk decision");
    }
}

/// A single task, so routing for a given symbol is always built against a
/// fresh snapshot taken at decision time rather than raced by a second
/// worker deciding the same symbol concurrently.
fn spawn_router_worker(
    state: AppState,
    mut routed: mpsc::Receiver<(IntentSignal, RiskDecision)>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some((signal, decision)) = routed.recv().await {
            let snapshot = match state.market_data.snapshot(&signal.symbol).await {
                Ok(s) => s,
                Err(e) => {
                    warn!(symbol = %signal.symbol, error = %e, "no market snapshot, skipping routing");
                    continue;
                }
            };
            let venues = state.venues.read().clone();
            let request = crate::router::RouteRequest {
                symbol: &signal.symbol,
                side: signal.side,
                quantity: decision.adjusted_size,
                explicit_algorithm: None,
                strategy_tag: Some(signal.phase_id.as_str()),
                venues: &venues,
                market: &snapshot,
            };
            match state.router.route(&request) {
                Ok(routing) => {
                    let task = HftTask::new(serde_json::json!({ "routing": routing }));
                    state.hft.submit(Priority::Normal, task);
                }
                Err(e) => warn!(symbol = %signal.symbol, error = %e, "routing failed"),
            }
        }
        info!("router worker shut down");
    })
}

/// Drains the HFT queue every `batchTimeoutMicros`. The handler here is
/// intentionally thin: a live `ExchangeWalletAPI`-backed order placement
/// call is the natural extension point once a real venue connector exists.
fn spawn_hft_batch_driver(state: AppState) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let period = Duration::from_micros(state.config.hft.batch_timeout_micros.max(1));
        let mut ticker = interval(period);
        loop {
            ticker.tick().await;
            let processed = state.hft.process_batch(|_task| Ok(()));
            if processed > 0 {
                info!(processed, "hft batch processed");
            }
        }
    })
}

/// Periodic sweep check; equity-change-triggered checks are run inline by
/// `spawn_ingest` on a qualifying fill instead of waiting for the next tick.
fn spawn_treasury_scheduler(state: AppState) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let check_secs = std::env::var("TREASURY_CHECK_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_TREASURY_CHECK_INTERVAL_SECS);
        let mut ticker = interval(Duration::from_secs(check_secs));
        loop {
            ticker.tick().await;
            run_sweep_check(&state).await;
        }
    })
}

pub async fn run_sweep_check(state: &AppState) {
    let equity = state.equity();
    state.treasury.update_high_watermark(equity);
    if !state.treasury.check_sweep_conditions(equity) {
        return;
    }
    match state
        .treasury
        .execute_sweep(state.wallet_api.as_ref(), state.event_log.as_ref(), equity)
        .await
    {
        Ok(Some(op)) => {
            if let Err(e) = state.repository.record_treasury_operation(&op).await {
                error!(error = %e, "failed to persist treasury operation");
            }
            let treasury_state = crate::repository::TreasuryState {
                high_watermark: state.treasury.high_watermark(),
                total_swept: state.treasury.total_swept(),
            };
            if let Err(e) = state.repository.save_treasury_state(treasury_state).await {
                error!(error = %e, "failed to persist treasury state");
            }
        }
        Ok(None) => {}
        Err(e) => error!(error = %e, "sweep execution failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocation::AllocationEngine;
    use crate::auth::{AuthState, HmacSigner, JwtHandler, UserStore};
    use crate::config::{AuthConfig, Config};
    use crate::eventlog::{EventStore, InMemoryEventStore};
    use crate::exchange::{FakeMarketDataSource, FakeWalletApi};
    use crate::hft::HftProcessor;
    use crate::models::{LatencyProfile, Side};
    use crate::repository::InMemoryRepository;
    use crate::risk::RiskGuardian;
    use crate::router::OrderRouter;
    use crate::tracker::PerformanceTracker;
    use crate::treasury::CapitalFlowManager;
    use std::sync::Arc;
    use std::time::Duration as StdDuration;
    use uuid::Uuid;

    fn test_state() -> AppState {
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
            Arc::new(FakeWalletApi::with_balance("trading", 1_000.0)),
            Arc::new(FakeMarketDataSource::new()),
            AuthState::new(user_store, jwt_handler),
            Arc::new(HmacSigner::new(&auth_config)),
            1_000.0,
        )
    }

    fn signal() -> IntentSignal {
        IntentSignal {
            id: Uuid::new_v4(),
            phase_id: PhaseId::Hunter,
            symbol: "BTCUSDT".to_string(),
            side: Side::Buy,
            requested_size: 1.0,
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

    #[tokio::test]
    async fn ingest_appends_intent_and_forwards_to_risk_pool() {
        let state = test_state();
        let (tx, rx) = mpsc::channel(8);
        let (risk_tx, mut risk_rx) = mpsc::channel(8);
        let handle = spawn_ingest(state.clone(), rx, risk_tx);

        tx.send(IngestEvent::Intent(signal())).await.unwrap();
        drop(tx);

        let forwarded = tokio::time::timeout(StdDuration::from_secs(1), risk_rx.recv())
            .await
            .unwrap();
        assert!(forwarded.is_some());
        handle.await.unwrap();

        let entries = state.event_log.stream_from(0, 10).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].subject, "evt.intent.received");
    }

    #[tokio::test]
    async fn risk_worker_pool_rejects_everything_while_halted() {
        let state = test_state();
        state.breaker_open.store(true, std::sync::atomic::Ordering::SeqCst);

        let (intent_tx, intent_rx) = mpsc::channel(8);
        let (routed_tx, mut routed_rx) = mpsc::channel(8);
        let workers = spawn_risk_worker_pool(1, state.clone(), intent_rx, routed_tx);

        intent_tx.send(signal()).await.unwrap();
        drop(intent_tx);
        for w in workers {
            w.await.unwrap();
        }

        assert!(routed_rx.try_recv().is_err());
        let entries = state.event_log.stream_from(0, 10).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].subject, "evt.risk.decision");
    }

    #[tokio::test]
    async fn latency_veto_never_reaches_the_router_worker() {
        let state = test_state();
        let (intent_tx, intent_rx) = mpsc::channel(8);
        let (routed_tx, mut routed_rx) = mpsc::channel(8);
        let workers = spawn_risk_worker_pool(1, state.clone(), intent_rx, routed_tx);

        let mut slow = signal();
        slow.latency_profile = Some(LatencyProfile { end_to_end_ms: 900.0 });
        intent_tx.send(slow).await.unwrap();
        drop(intent_tx);
        for w in workers {
            w.await.unwrap();
        }

        assert!(routed_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn sweep_check_runs_without_panicking_below_threshold() {
        let state = test_state();
        run_sweep_check(&state).await;
        assert_eq!(state.treasury.total_swept(), 0.0);
    }
}
