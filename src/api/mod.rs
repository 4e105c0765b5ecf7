//! HTTP API for swap creation, swap lookup, status and health checks

use crate::config::ApiConfig;
use crate::engine::BridgeEngine;
use crate::error::{BridgeError, BridgeResult};
use crate::registry::SwapRegistry;
use crate::status::StatusReporter;
use crate::swap::{SwapId, SwapRequest};

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<BridgeEngine>,
    pub reporter: Arc<StatusReporter>,
    pub registry: Arc<dyn SwapRegistry>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/bridge/swap", post(create_swap))
        .route("/bridge/swap/:id", get(get_swap))
        .route("/bridge/status", get(get_status))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Run the HTTP API server
pub async fn run_server(config: ApiConfig, state: AppState) -> BridgeResult<()> {
    let app = router(state);

    let addr = format!("{}:{}", config.host, config.port);
    info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Health check endpoint - basic liveness
async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Readiness check - registry reachable
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let registry_ok = state.registry.health_check().await.is_ok();
    let status = if registry_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(ReadinessResponse {
            ready: registry_ok,
            registry: registry_ok,
        }),
    )
}

async fn create_swap(
    State(state): State<AppState>,
    payload: Result<Json<SwapRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(request) => request,
        Err(rejection) => {
            return error_response(BridgeError::InvalidRequest(rejection.body_text()));
        }
    };

    match state.engine.create_swap(request, Utc::now()).await {
        Ok(swap) => (
            StatusCode::CREATED,
            Json(CreateSwapResponse {
                swap_id: swap.id,
                source_deposit_address: swap.source_deposit_address,
                expires_at: swap.expires_at,
            }),
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

async fn get_swap(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let id: SwapId = match id.parse() {
        Ok(id) => id,
        Err(e) => return error_response(e),
    };

    match state.engine.get_swap(&id).await {
        Ok(swap) => Json(swap).into_response(),
        Err(e) => error_response(e),
    }
}

async fn get_status(State(state): State<AppState>) -> Response {
    match state.reporter.snapshot().await {
        Ok(snapshot) => {
            crate::metrics::record_status(&snapshot);
            Json(snapshot).into_response()
        }
        Err(e) => error_response(e),
    }
}

fn error_response(err: BridgeError) -> Response {
    let status = match &err {
        BridgeError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        BridgeError::SwapNotFound { .. } => StatusCode::NOT_FOUND,
        BridgeError::AddressIssuance(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        error!("Request failed: {}", err);
    }

    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
        }),
    )
        .into_response()
}

// Response types

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

#[derive(Serialize)]
struct ReadinessResponse {
    ready: bool,
    registry: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateSwapResponse {
    swap_id: SwapId,
    source_deposit_address: String,
    expires_at: DateTime<Utc>,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::issuer::{DepositAddressIssuer, MockKeyProvider};
    use crate::registry::InMemorySwapRegistry;
    use crate::testing::{test_bridge_config, CountingLedger, ScriptedOracle, SequentialKeyProvider};
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use bitcoin::Network;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    struct Fixture {
        app: Router,
        engine: Arc<BridgeEngine>,
        oracle: Arc<ScriptedOracle>,
    }

    fn fixture(provider: Arc<dyn crate::issuer::KeyProvider>, ledger: CountingLedger) -> Fixture {
        let registry: Arc<dyn SwapRegistry> = Arc::new(InMemorySwapRegistry::new());
        let oracle = Arc::new(ScriptedOracle::default());
        let engine = Arc::new(BridgeEngine::new(
            registry.clone(),
            DepositAddressIssuer::new(provider, Network::Regtest),
            oracle.clone(),
            Arc::new(ledger),
            test_bridge_config(),
        ));
        let app = router(AppState {
            engine: engine.clone(),
            reporter: Arc::new(StatusReporter::new(registry.clone())),
            registry,
        });
        Fixture {
            app,
            engine,
            oracle,
        }
    }

    fn app_with(provider: Arc<dyn crate::issuer::KeyProvider>) -> Router {
        fixture(provider, CountingLedger::new()).app
    }

    fn app() -> Router {
        app_with(Arc::new(SequentialKeyProvider::default()))
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    fn post_swap(body: String) -> Request<Body> {
        Request::post("/bridge/swap")
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap()
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::get(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_create_then_fetch_swap() {
        let app = app();
        let body = json!({
            "requiredAmount": 100000,
            "destinationRecipient": "0x8ba1f109551bd432803012645ac136ddd64dba72"
        });

        let (status, created) = send(&app, post_swap(body.to_string())).await;
        assert_eq!(status, StatusCode::CREATED);
        let id = created["swapId"].as_str().unwrap().to_string();
        assert!(created["sourceDepositAddress"]
            .as_str()
            .unwrap()
            .starts_with("bcrt1"));
        assert!(created["expiresAt"].is_string());

        let (status, swap) = send(&app, get_request(&format!("/bridge/swap/{}", id))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(swap["state"], "awaiting_deposit");
        assert_eq!(swap["requiredAmount"], 100000);
        assert_eq!(swap["sourceDepositAddress"], created["sourceDepositAddress"]);

        let (status, snapshot) = send(&app, get_request("/bridge/status")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            snapshot,
            json!({
                "pendingCount": 1,
                "completedCount": 0,
                "failedCount": 0,
                "expiredCount": 0
            })
        );
    }

    #[tokio::test]
    async fn test_bad_requests() {
        let app = app();

        let (status, body) = send(&app, post_swap("{not json".to_string())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());

        let zero = json!({
            "requiredAmount": 0,
            "destinationRecipient": "0x8ba1f109551bd432803012645ac136ddd64dba72"
        });
        let (status, _) = send(&app, post_swap(zero.to_string())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let bad_recipient = json!({ "requiredAmount": 5, "destinationRecipient": "alice" });
        let (status, _) = send(&app, post_swap(bad_recipient.to_string())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_unknown_swap_is_not_found() {
        let app = app();

        let (status, _) = send(&app, get_request(&format!("/bridge/swap/{}", SwapId::new()))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(&app, get_request("/bridge/swap/not-a-uuid")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_issuance_failure_is_bad_gateway() {
        let mut provider = MockKeyProvider::new();
        provider
            .expect_issue_address()
            .returning(|_| Err(BridgeError::AddressIssuance("timeout".to_string())));
        let app = app_with(Arc::new(provider));

        let body = json!({
            "requiredAmount": 100000,
            "destinationRecipient": "0x8ba1f109551bd432803012645ac136ddd64dba72"
        });
        let (status, _) = send(&app, post_swap(body.to_string())).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);

        let (_, snapshot) = send(&app, get_request("/bridge/status")).await;
        assert_eq!(snapshot["pendingCount"], 0);
    }

    #[tokio::test]
    async fn test_failed_finalization_is_visible() {
        let f = fixture(
            Arc::new(SequentialKeyProvider::default()),
            CountingLedger::failing(3),
        );
        let body = json!({
            "requiredAmount": 100000,
            "destinationRecipient": "0x8ba1f109551bd432803012645ac136ddd64dba72"
        });
        let (_, created) = send(&f.app, post_swap(body.to_string())).await;
        let address = created["sourceDepositAddress"].as_str().unwrap();
        let uri = format!("/bridge/swap/{}", created["swapId"].as_str().unwrap());

        f.oracle.set(address, 100_000, 3);
        f.engine.tick(Utc::now()).await.unwrap();
        f.engine.wait_for_finalizations().await;

        for _ in 0..2 {
            let (status, swap) = send(&f.app, get_request(&uri)).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(swap["state"], "failed");
            assert!(swap["failureReason"]
                .as_str()
                .unwrap()
                .contains("after 3 attempts"));
            assert!(swap["finalizationRef"].is_null());
        }

        let (_, snapshot) = send(&f.app, get_request("/bridge/status")).await;
        assert_eq!(snapshot["failedCount"], 1);
        assert_eq!(snapshot["pendingCount"], 0);
    }

    #[tokio::test]
    async fn test_health_and_readiness() {
        let app = app();
        let (status, body) = send(&app, get_request("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");

        let (status, body) = send(&app, get_request("/ready")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ready"], true);
    }
}
