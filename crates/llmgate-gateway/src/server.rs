//! Thin HTTP ingress.
//!
//! The transport is deliberately minimal: one processing endpoint and a
//! health endpoint. Everything interesting happens in [`Gateway`].

use crate::gateway::Gateway;
use axum::body::Body;
use axum::extract::State;
use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use llmgate_core::{ErrorCode, EventStore, HealthState, ResponseStatus};
use std::sync::Arc;
use tracing::warn;

/// Shared state threaded through axum handlers.
pub struct AppState {
    pub gateway: Arc<Gateway>,
    pub store: Arc<dyn EventStore>,
}

/// Build the ingress router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/v1/process", post(process_handler))
        .route("/v1/stats", get(stats_handler))
        .with_state(state)
}

/// Map a gateway error code onto an HTTP status.
fn http_status(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::SchemaInvalid | ErrorCode::ClockSkew => StatusCode::BAD_REQUEST,
        ErrorCode::AuthInvalid | ErrorCode::AuthExpired => StatusCode::UNAUTHORIZED,
        ErrorCode::AuthzDenied | ErrorCode::PiiRoutingBlocked => StatusCode::FORBIDDEN,
        ErrorCode::NoBackendAvailable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorCode::BackendTimeout => StatusCode::GATEWAY_TIMEOUT,
        ErrorCode::BackendError => StatusCode::BAD_GATEWAY,
        ErrorCode::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// `POST /v1/process` — the request path.
async fn process_handler(State(state): State<Arc<AppState>>, req: Request<Body>) -> Response {
    // One MiB of slack over the configured cap so the validator, not the
    // transport, produces the size rejection.
    let limit = 6 * 1024 * 1024;
    let body = match axum::body::to_bytes(req.into_body(), limit).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!("Failed to read request body: {e}");
            return (StatusCode::PAYLOAD_TOO_LARGE, "request body too large").into_response();
        }
    };

    let response = state.gateway.handle(&body).await;
    let status = match response.status {
        ResponseStatus::Ok | ResponseStatus::Queued | ResponseStatus::Processing => StatusCode::OK,
        ResponseStatus::Error => response
            .error
            .as_ref()
            .map(|e| http_status(e.code))
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
    };
    (status, Json(response)).into_response()
}

/// `GET /v1/stats` — aggregate event statistics over the last 24 hours.
async fn stats_handler(State(state): State<Arc<AppState>>) -> Response {
    match state
        .store
        .stats(std::time::Duration::from_secs(24 * 3600))
        .await
    {
        Ok(stats) => Json(stats).into_response(),
        Err(e) => {
            warn!("Failed to compute stats: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "failed to compute statistics",
            )
                .into_response()
        }
    }
}

/// `GET /health` — aggregate component health.
async fn health_handler(State(state): State<Arc<AppState>>) -> Response {
    let storage_healthy = state.store.health_check().await.is_ok();

    let snapshot = state.gateway.registry().snapshot();
    let mut backends = serde_json::Map::new();
    for adapter in snapshot.adapters() {
        let health = adapter.health().await;
        backends.insert(
            adapter.descriptor().id.clone(),
            serde_json::json!(matches!(health, HealthState::Ok | HealthState::Degraded)),
        );
    }

    let body = serde_json::json!({
        "status": if storage_healthy { "healthy" } else { "degraded" },
        "storage": { "healthy": storage_healthy },
        "registry": { "backends": snapshot.len() },
        "pipeline": {
            "queue_depth": state.gateway.pipeline().queue_depth(),
            "dropped_events": state.gateway.pipeline().dropped_events(),
        },
        "backends": backends,
    });

    let status = if storage_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditLog;
    use crate::pipeline::EventPipeline;
    use crate::registry::{build_adapters, default_descriptors, BackendRegistry};
    use llmgate_core::{GatewayConfig, Permission, Role};
    use llmgate_security::{InjectionEngine, PiiEngine};
    use llmgate_storage::InMemoryEventStore;
    use tower::ServiceExt;
    use uuid::Uuid;

    async fn test_state() -> Arc<AppState> {
        let mut config = GatewayConfig::default();
        config.auth.token_secret = "test-secret".to_string();
        config.storage.profile = "memory".to_string();

        let store: Arc<dyn EventStore> = Arc::new(InMemoryEventStore::new());
        let pii = Arc::new(PiiEngine::with_defaults().unwrap());
        let injection = Arc::new(InjectionEngine::with_defaults().unwrap());
        let registry = Arc::new(BackendRegistry::new(build_adapters(
            default_descriptors(),
            pii,
            injection,
        )));
        let pipeline = EventPipeline::start(
            &config.pipeline,
            config.anomaly.clone(),
            Arc::clone(&store),
            None,
        );
        let gateway = Arc::new(
            Gateway::new(config, registry, pipeline, AuditLog::memory()).unwrap(),
        );
        Arc::new(AppState { gateway, store })
    }

    fn request_body(state: &AppState, sensitivity: &str) -> Vec<u8> {
        let token = state
            .gateway
            .token_service()
            .issue("svc-test", Role::Service, &[Permission::Execute])
            .unwrap();
        serde_json::to_vec(&serde_json::json!({
            "mpc_version": "1.0",
            "request_id": Uuid::new_v4(),
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "source": { "application_id": "app-test" },
            "type": "process_request",
            "payload_schema": "llm.request.v1",
            "payload": { "model": "gpt-3.5-turbo", "prompt": "What is API security?" },
            "config": { "sensitivity": sensitivity },
            "auth": { "token": token }
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let state = test_state().await;
        let app = build_router(state);
        let req = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();

        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["registry"]["backends"], 6);
    }

    #[tokio::test]
    async fn test_process_endpoint_ok() {
        let state = test_state().await;
        let body = request_body(&state, "public");
        let app = build_router(state);

        let req = Request::builder()
            .method("POST")
            .uri("/v1/process")
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap();

        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["status"], "ok");
        assert!(json["processing"]["backend"].is_string());
    }

    #[tokio::test]
    async fn test_process_endpoint_maps_auth_errors() {
        let state = test_state().await;
        let mut body: serde_json::Value =
            serde_json::from_slice(&request_body(&state, "public")).unwrap();
        body["auth"]["token"] = serde_json::json!("bogus");
        let app = build_router(state);

        let req = Request::builder()
            .method("POST")
            .uri("/v1/process")
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap();

        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_stats_endpoint() {
        let state = test_state().await;
        let app = build_router(state);
        let req = Request::builder()
            .uri("/v1/stats")
            .body(Body::empty())
            .unwrap();

        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["total_events"], 0);
    }

    #[tokio::test]
    async fn test_process_endpoint_maps_schema_errors() {
        let state = test_state().await;
        let app = build_router(state);

        let req = Request::builder()
            .method("POST")
            .uri("/v1/process")
            .header("content-type", "application/json")
            .body(Body::from("{\"not\": \"a request\"}"))
            .unwrap();

        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
