//! Control HTTP surface
//! Mission: the small set of operator-facing endpoints that can change
//! live trading state (halt, reset, override allocation) plus read-only
//! projections for dashboards. Mutating routes sit behind both a JWT
//! bearer token and a service-level HMAC body signature; read routes need
//! only the bearer token.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::app::{AllocationOverride, AppState};
use crate::models::{AllocationVector, PhaseId, PhasePerformance};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/risk/halt", post(risk_halt))
        .route("/breaker/reset", post(breaker_reset))
        .route("/admin/override", post(admin_override))
        .route("/dashboard", get(dashboard))
        .route("/treasury", get(treasury_status))
        .route("/allocation", get(allocation_status))
        .route("/breaker", get(breaker_status))
        .route("/phases/status", get(phases_status))
        .with_state(state)
}

#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("{0}")]
    BadRequest(String),
    #[error(transparent)]
    Internal(#[from] crate::BrainError),
}

impl IntoResponse for ControlError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ControlError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ControlError::Internal(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        };
        (status, Json(ErrorBody { error: message })).into_response()
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Deserialize)]
pub struct RiskHaltRequest {
    pub operator_id: String,
    pub reason: String,
}

#[derive(Debug, Serialize)]
pub struct RiskHaltResponse {
    pub halted: bool,
    pub cancelled_orders: usize,
    pub allocation: AllocationVector,
}

/// Zeroes the allocation vector and drains the HFT queue so no open order
/// flow survives the halt. Does not touch positions already live at a
/// venue - that's an out-of-process reconciliation concern.
async fn risk_halt(
    State(state): State<AppState>,
    Json(req): Json<RiskHaltRequest>,
) -> Result<Json<RiskHaltResponse>, ControlError> {
    state.breaker_open.store(true, Ordering::SeqCst);
    let cancelled_orders = state.hft.drain_all();

    let zeroed = AllocationVector {
        w1: 0.0,
        w2: 0.0,
        w3: 0.0,
        max_leverage: 0.0,
        equity: state.equity(),
        timestamp: Utc::now(),
    };
    *state.allocation_override.write() = Some(AllocationOverride {
        vector: zeroed.clone(),
        reason: req.reason.clone(),
        operator_id: req.operator_id.clone(),
        expires_at: Utc::now() + chrono::Duration::days(365),
    });
    state.repository.save_allocation(&zeroed).await?;
    state.repository.save_breaker_open(true).await?;

    state
        .event_log
        .append(
            "evt.breaker.trip",
            serde_json::json!({ "reason": req.reason, "operatorId": req.operator_id }),
        )
        .await?;

    warn!(operator_id = %req.operator_id, reason = %req.reason, cancelled_orders, "risk halt triggered");

    Ok(Json(RiskHaltResponse {
        halted: true,
        cancelled_orders,
        allocation: zeroed,
    }))
}

#[derive(Debug, Deserialize)]
pub struct BreakerResetRequest {
    pub operator_id: String,
}

#[derive(Debug, Serialize)]
pub struct BreakerResetResponse {
    pub halted: bool,
}

async fn breaker_reset(
    State(state): State<AppState>,
    Json(req): Json<BreakerResetRequest>,
) -> Result<Json<BreakerResetResponse>, ControlError> {
    state.breaker_open.store(false, Ordering::SeqCst);
    *state.allocation_override.write() = None;
    state.repository.save_breaker_open(false).await?;

    state
        .event_log
        .append("evt.breaker.reset", serde_json::json!({ "operatorId": req.operator_id }))
        .await?;

    info!(operator_id = %req.operator_id, "breaker reset");
    Ok(Json(BreakerResetResponse { halted: false }))
}

#[derive(Debug, Deserialize)]
pub struct OverrideAllocation {
    pub w1: f64,
    pub w2: f64,
    pub w3: f64,
}

#[derive(Debug, Deserialize)]
pub struct AdminOverrideRequest {
    pub operator_id: String,
    pub allocation: OverrideAllocation,
    pub reason: String,
    pub duration_hours: i64,
}

#[derive(Debug, Serialize)]
pub struct AdminOverrideResponse {
    pub allocation: AllocationVector,
    pub expires_at: chrono::DateTime<Utc>,
}

/// Locks the allocation vector to an operator-supplied value until
/// `duration_hours` elapses. Rejects weights outside `[0, 1]` up front so a
/// fat-fingered request can't push `AllocationEngine::rebalance` callers
/// into an invariant violation downstream.
async fn admin_override(
    State(state): State<AppState>,
    Json(req): Json<AdminOverrideRequest>,
) -> Result<Json<AdminOverrideResponse>, ControlError> {
    let weights = [req.allocation.w1, req.allocation.w2, req.allocation.w3];
    if weights.iter().any(|w| !(0.0..=1.0).contains(w)) {
        return Err(ControlError::BadRequest("allocation weights must be in [0, 1]".to_string()));
    }
    if req.duration_hours <= 0 {
        return Err(ControlError::BadRequest("duration_hours must be positive".to_string()));
    }

    let equity = state.equity();
    let vector = AllocationVector {
        w1: req.allocation.w1,
        w2: req.allocation.w2,
        w3: req.allocation.w3,
        max_leverage: state.allocation_engine.max_leverage(equity),
        equity,
        timestamp: Utc::now(),
    };
    let expires_at = Utc::now() + chrono::Duration::hours(req.duration_hours);

    *state.allocation_override.write() = Some(AllocationOverride {
        vector: vector.clone(),
        reason: req.reason.clone(),
        operator_id: req.operator_id.clone(),
        expires_at,
    });
    state.repository.save_allocation(&vector).await?;

    state
        .event_log
        .append(
            "evt.config.override",
            serde_json::json!({
                "key": "allocation",
                "value": vector,
                "reason": req.reason,
                "ttlHours": req.duration_hours,
            }),
        )
        .await?;

    info!(operator_id = %req.operator_id, duration_hours = req.duration_hours, "allocation override set");
    Ok(Json(AdminOverrideResponse { allocation: vector, expires_at }))
}

#[derive(Debug, Serialize)]
pub struct DashboardResponse {
    pub equity: f64,
    pub halted: bool,
    pub allocation: Option<AllocationVector>,
    pub treasury_high_watermark: f64,
    pub treasury_total_swept: f64,
    pub hft_queue_depth: usize,
    pub hft_circuit_state: crate::hft::CircuitState,
    pub phases: Vec<PhasePerformance>,
}

async fn dashboard(State(state): State<AppState>) -> Result<Json<DashboardResponse>, ControlError> {
    let allocation = state.repository.latest_allocation().await?;
    let phases = PhaseId::ALL.iter().map(|p| state.tracker.performance(*p)).collect();

    Ok(Json(DashboardResponse {
        equity: state.equity(),
        halted: state.is_halted(),
        allocation,
        treasury_high_watermark: state.treasury.high_watermark(),
        treasury_total_swept: state.treasury.total_swept(),
        hft_queue_depth: state.hft.queue_depth(),
        hft_circuit_state: state.hft.circuit_state(),
        phases,
    }))
}

#[derive(Debug, Serialize)]
pub struct TreasuryResponse {
    pub high_watermark: f64,
    pub total_swept: f64,
    pub recent_operations: Vec<crate::models::TreasuryOperation>,
}

async fn treasury_status(State(state): State<AppState>) -> Result<Json<TreasuryResponse>, ControlError> {
    let recent_operations = state.repository.treasury_operations(20).await?;
    Ok(Json(TreasuryResponse {
        high_watermark: state.treasury.high_watermark(),
        total_swept: state.treasury.total_swept(),
        recent_operations,
    }))
}

async fn allocation_status(State(state): State<AppState>) -> Result<Json<Option<AllocationVector>>, ControlError> {
    Ok(Json(state.repository.latest_allocation().await?))
}

#[derive(Debug, Serialize)]
pub struct BreakerResponse {
    pub halted: bool,
}

async fn breaker_status(State(state): State<AppState>) -> Json<BreakerResponse> {
    Json(BreakerResponse { halted: state.is_halted() })
}

async fn phases_status(State(state): State<AppState>) -> Json<Vec<PhasePerformance>> {
    Json(PhaseId::ALL.iter().map(|p| state.tracker.performance(*p)).collect())
}

/// Verifies the `x-signature` header against the raw request body before
/// the normal `Json<T>` extractor runs. Applied only to the mutating
/// operator routes, in addition to the JWT bearer check.
pub async fn hmac_auth_middleware(
    State(signer): State<Arc<crate::auth::HmacSigner>>,
    req: axum::extract::Request,
    next: axum::middleware::Next,
) -> Result<Response, ControlError> {
    let (parts, body) = req.into_parts();
    let signature = parts
        .headers
        .get("x-signature")
        .and_then(|h| h.to_str().ok())
        .map(|s| s.to_string())
        .ok_or_else(|| ControlError::BadRequest("missing x-signature header".to_string()))?;

    let bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .map_err(|e| ControlError::BadRequest(format!("failed to read body: {e}")))?;

    signer
        .verify(&signature, &bytes, Utc::now().timestamp())
        .map_err(|e| ControlError::BadRequest(format!("hmac verification failed: {e}")))?;

    let req = axum::extract::Request::from_parts(parts, axum::body::Body::from(bytes));
    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocation::AllocationEngine;
    use crate::auth::{AuthState, HmacSigner, JwtHandler, UserStore};
    use crate::config::{AuthConfig, Config};
    use crate::eventlog::InMemoryEventStore;
    use crate::exchange::{FakeMarketDataSource, FakeWalletApi};
    use crate::hft::HftProcessor;
    use crate::repository::InMemoryRepository;
    use crate::risk::RiskGuardian;
    use crate::router::OrderRouter;
    use crate::tracker::PerformanceTracker;
    use crate::treasury::CapitalFlowManager;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn state() -> AppState {
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
            Arc::new(FakeWalletApi::new()),
            Arc::new(FakeMarketDataSource::new()),
            AuthState::new(user_store, jwt_handler),
            Arc::new(HmacSigner::new(&auth_config)),
            1_000.0,
        )
    }

    #[tokio::test]
    async fn risk_halt_zeroes_allocation_and_sets_breaker() {
        let state = state();
        let app = router(state.clone());

        let body = serde_json::json!({ "operator_id": "op1", "reason": "manual halt" });
        let req = Request::builder()
            .method("POST")
            .uri("/risk/halt")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(state.is_halted());
    }

    #[tokio::test]
    async fn breaker_reset_clears_halt() {
        let state = state();
        state.breaker_open.store(true, Ordering::SeqCst);
        let app = router(state.clone());

        let body = serde_json::json!({ "operator_id": "op1" });
        let req = Request::builder()
            .method("POST")
            .uri("/breaker/reset")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(!state.is_halted());
    }

    #[tokio::test]
    async fn admin_override_rejects_out_of_range_weights() {
        let state = state();
        let app = router(state);

        let body = serde_json::json!({
            "operator_id": "op1",
            "allocation": { "w1": 1.5, "w2": 0.0, "w3": 0.0 },
            "reason": "test",
            "duration_hours": 1,
        });
        let req = Request::builder()
            .method("POST")
            .uri("/admin/override")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn admin_override_locks_allocation_until_expiry() {
        let state = state();
        let app = router(state.clone());

        let body = serde_json::json!({
            "operator_id": "op1",
            "allocation": { "w1": 1.0, "w2": 0.0, "w3": 0.0 },
            "reason": "test",
            "duration_hours": 1,
        });
        let req = Request::builder()
            .method("POST")
            .uri("/admin/override")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let locked = state.active_override().unwrap();
        assert_eq!(locked.w1, 1.0);
    }

    #[tokio::test]
    async fn breaker_status_reflects_current_state() {
        let state = state();
        let app = router(state);
        let req = Request::builder().uri("/breaker").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
