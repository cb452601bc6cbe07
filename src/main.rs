//! Brain control-plane binary
//! Mission: load configuration, construct every engine, replay the event
//! log to rebuild state, spawn the background task pipeline, and serve the
//! control HTTP surface.

use std::sync::Arc;

use anyhow::Context;
use axum::middleware as axum_mw;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use brain::allocation::AllocationEngine;
use brain::api::control;
use brain::auth::{self as brain_auth, auth_middleware, AuthState, HmacSigner, JwtHandler, UserStore};
use brain::config::Config;
use brain::error::exit_code;
use brain::eventlog::{EventStore, SqliteEventStore};
use brain::exchange::{FakeMarketDataSource, FakeWalletApi};
use brain::hft::HftProcessor;
use brain::middleware::{rate_limit_middleware, request_logging_simple, RateLimitConfig, RateLimitLayer};
use brain::repository::{SqliteRepository, StateRepository};
use brain::risk::RiskGuardian;
use brain::router::OrderRouter;
use brain::tracker::PerformanceTracker;
use brain::treasury::CapitalFlowManager;
use brain::{recovery, tasks, AppState, BrainError};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        tracing::error!(error = %e, "fatal startup error");
        let code = e
            .downcast_ref::<BrainError>()
            .map(BrainError::exit_code)
            .unwrap_or(exit_code::CONFIGURATION_ERROR);
        std::process::exit(code);
    }
}

async fn run() -> anyhow::Result<()> {
    init_tracing();

    let config = Arc::new(Config::load("config.toml").map_err(anyhow::Error::from)?);
    tracing::info!(port = config.port, "configuration loaded");

    let event_log: Arc<dyn EventStore> = if config.database_path.is_empty() {
        Arc::new(SqliteEventStore::open_in_memory().map_err(anyhow::Error::from)?)
    } else {
        Arc::new(SqliteEventStore::open(&config.database_path).map_err(anyhow::Error::from)?)
    };
    let repository: Arc<dyn StateRepository> = if config.database_path.is_empty() {
        Arc::new(SqliteRepository::open_in_memory().map_err(anyhow::Error::from)?)
    } else {
        Arc::new(SqliteRepository::open(&config.database_path).map_err(anyhow::Error::from)?)
    };

    let tracker = Arc::new(PerformanceTracker::new(config.performance.clone()));
    recovery::replay(event_log.as_ref(), tracker.as_ref(), repository.as_ref())
        .await
        .map_err(anyhow::Error::from)
        .context("event log replay failed")?;

    let allocation_engine = Arc::new(AllocationEngine::new(config.equity_tiers.clone()));
    let risk = Arc::new(RiskGuardian::new(config.risk.clone()));
    let treasury_state = repository
        .latest_treasury_state()
        .await
        .map_err(anyhow::Error::from)?
        .unwrap_or_default();
    let treasury = Arc::new(CapitalFlowManager::new(config.treasury.clone(), treasury_state.high_watermark));
    let router = Arc::new(OrderRouter::new(config.router.clone()));
    let hft = Arc::new(HftProcessor::new(config.hft.clone()));
    let wallet_api = Arc::new(FakeWalletApi::with_balance("trading", config.initial_capital));
    let market_data = Arc::new(FakeMarketDataSource::new());

    let auth_db_path = if config.database_path.is_empty() {
        ":memory:".to_string()
    } else {
        format!("{}.auth", config.database_path)
    };
    let user_store = Arc::new(UserStore::new(&auth_db_path).context("failed to open user store")?);
    let jwt_handler = Arc::new(JwtHandler::new(config.auth.jwt_secret.clone()));
    let auth_state = AuthState::new(user_store, jwt_handler.clone());
    let hmac_signer = Arc::new(HmacSigner::new(&config.auth));

    let breaker_open = repository.breaker_is_open().await.map_err(anyhow::Error::from)?;
    let restored_positions = repository.latest_positions().await.map_err(anyhow::Error::from)?;
    let initial_equity = if treasury_state.high_watermark > 0.0 {
        treasury_state.high_watermark
    } else {
        config.initial_capital
    };

    let state = AppState::new(
        config.clone(),
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
        auth_state,
        hmac_signer.clone(),
        initial_equity,
    );
    state.breaker_open.store(breaker_open, std::sync::atomic::Ordering::SeqCst);
    *state.positions.write() = restored_positions;

    // `_ingest_tx` has no producer wired up yet (no live venue connector in
    // this build) - held here only so dropping it doesn't close the ingest
    // task's channel out from under it.
    let (_ingest_tx, _tasks) = tasks::spawn_pipeline(state.clone(), tasks::DEFAULT_RISK_WORKER_POOL_SIZE);

    let auth_router = Router::new()
        .route("/auth/login", post(brain_auth::api::login))
        .with_state(state.auth.clone());

    let operator_router = control::router(state.clone())
        .route_layer(axum_mw::from_fn_with_state(
            hmac_signer,
            control::hmac_auth_middleware,
        ))
        .route_layer(axum_mw::from_fn_with_state(jwt_handler.clone(), auth_middleware));

    let public_router = Router::new().route("/health", get(health_check));

    let rate_limiter = RateLimitLayer::new(RateLimitConfig::default());

    let app = Router::new()
        .merge(public_router)
        .merge(auth_router)
        .merge(operator_router)
        .layer(axum_mw::from_fn_with_state(rate_limiter, rate_limit_middleware))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .layer(axum::middleware::from_fn(request_logging_simple));

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| BrainError::Configuration(format!("binding {addr}: {e}")))?;
    tracing::info!(%addr, "control surface listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await
    .context("server error")?;

    Ok(())
}

async fn health_check() -> &'static str {
    "brain control plane operational"
}
