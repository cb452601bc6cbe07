//! End-to-end exercise of the control HTTP surface: a halt zeroes the
//! allocation and is visible on the read projections, a reset clears it,
//! and an admin override is visible on `/allocation` until cleared.

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use tower::ServiceExt;

use brain::allocation::AllocationEngine;
use brain::api::control;
use brain::auth::{AuthState, HmacSigner, JwtHandler, UserStore};
use brain::config::{AuthConfig, Config};
use brain::eventlog::InMemoryEventStore;
use brain::exchange::{FakeMarketDataSource, FakeWalletApi};
use brain::hft::HftProcessor;
use brain::repository::InMemoryRepository;
use brain::risk::RiskGuardian;
use brain::router::OrderRouter;
use brain::tracker::PerformanceTracker;
use brain::treasury::CapitalFlowManager;
use brain::AppState;

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
        Arc::new(CapitalFlowManager::new(config.treasury.clone(), 10_000.0)),
        Arc::new(OrderRouter::new(config.router.clone())),
        Arc::new(HftProcessor::new(config.hft.clone())),
        Arc::new(FakeWalletApi::new()),
        Arc::new(FakeMarketDataSource::new()),
        AuthState::new(user_store, jwt_handler),
        Arc::new(HmacSigner::new(&auth_config)),
        10_000.0,
    )
}

async fn json_body(resp: axum::response::Response) -> serde_json::Value {
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn halt_then_reset_round_trips_through_the_read_surface() {
    let state = test_state();

    let halt_body = serde_json::json!({ "operator_id": "op1", "reason": "suspicious fills" });
    let resp = control::router(state.clone())
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/risk/halt")
                .header("content-type", "application/json")
                .body(Body::from(halt_body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = control::router(state.clone())
        .oneshot(Request::builder().uri("/breaker").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let body = json_body(resp).await;
    assert_eq!(body["halted"], true);

    let resp = control::router(state.clone())
        .oneshot(Request::builder().uri("/allocation").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let body = json_body(resp).await;
    assert_eq!(body["w1"], 0.0);
    assert_eq!(body["w2"], 0.0);
    assert_eq!(body["w3"], 0.0);

    let reset_body = serde_json::json!({ "operator_id": "op1" });
    let resp = control::router(state.clone())
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/breaker/reset")
                .header("content-type", "application/json")
                .body(Body::from(reset_body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = control::router(state.clone())
        .oneshot(Request::builder().uri("/breaker").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let body = json_body(resp).await;
    assert_eq!(body["halted"], false);
}

#[tokio::test]
async fn admin_override_is_visible_on_the_allocation_projection() {
    let state = test_state();

    let body = serde_json::json!({
        "operator_id": "op2",
        "allocation": { "w1": 0.2, "w2": 0.3, "w3": 0.5 },
        "reason": "manual rebalance for maintenance window",
        "duration_hours": 2,
    });
    let resp = control::router(state.clone())
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/admin/override")
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = control::router(state.clone())
        .oneshot(Request::builder().uri("/allocation").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let body = json_body(resp).await;
    assert_eq!(body["w1"], 0.2);
    assert_eq!(body["w2"], 0.3);
    assert_eq!(body["w3"], 0.5);

    assert!(state.active_override().is_some());
}

#[tokio::test]
async fn dashboard_reflects_engine_state() {
    let state = test_state();
    state.set_equity(12_345.0);

    let resp = control::router(state)
        .oneshot(Request::builder().uri("/dashboard").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = json_body(resp).await;
    assert_eq!(body["equity"], 12345.0);
    assert_eq!(body["halted"], false);
    assert_eq!(body["phases"].as_array().unwrap().len(), 3);
}
