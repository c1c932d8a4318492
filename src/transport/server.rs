//! HTTP server: webhook intake and the approval API.
//!
//! Routes:
//!
//! - `POST /api/v1/webhook` - signed event intake. The signature is checked
//!   against the raw body before anything is parsed; unsupported event types
//!   and filtered actions are acknowledged with `{"status": "ignored"}`, not
//!   an error, so upstream senders never retry them.
//! - `POST /api/v1/approvals/decision` - human decision callback, idempotent.
//! - `POST /api/v1/approvals/{id}/cancel` - cancel with optional reason.
//! - `GET /api/v1/approvals/{id}` / `GET /api/v1/approvals/pending` - reads.
//! - `GET /health` - liveness.

use crate::approval::engine::{ApprovalEngine, EngineError, WorkflowResult};
use crate::approval::store::StoreError;
use crate::event::Event;
use crate::transport::signature;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Event-type header for envelopes that don't carry the type in the body
/// (GitHub sends `X-Event-Type: pull_request` style headers).
pub const EVENT_TYPE_HEADER: &str = "x-event-type";

/// Delivery-id header, echoed back in webhook responses.
pub const DELIVERY_ID_HEADER: &str = "x-delivery-id";

// ============================================================================
// State and construction
// ============================================================================

/// Shared state for all handlers.
#[derive(Clone)]
pub struct AppState {
    /// The workflow engine.
    pub engine: Arc<ApprovalEngine>,
    /// Webhook HMAC secret. `None` disables verification (development only).
    pub webhook_secret: Option<Vec<u8>>,
}

impl AppState {
    /// Creates state with signature verification enabled.
    #[must_use]
    pub fn new(engine: Arc<ApprovalEngine>, webhook_secret: Option<Vec<u8>>) -> Self {
        if webhook_secret.is_none() {
            warn!("Webhook signature verification is DISABLED");
        }
        Self {
            engine,
            webhook_secret,
        }
    }
}

/// Builds the application router.
#[must_use]
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/webhook", post(webhook))
        .route("/api/v1/approvals/decision", post(decision))
        .route("/api/v1/approvals/pending", get(list_pending))
        .route("/api/v1/approvals/{id}", get(get_approval))
        .route("/api/v1/approvals/{id}/cancel", post(cancel))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Binds and serves until the shutdown token fires.
///
/// # Errors
///
/// Returns the bind or serve error.
pub async fn serve(
    addr: &str,
    state: AppState,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(addr, "HTTP server listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}

// ============================================================================
// Error mapping
// ============================================================================

struct ApiError(EngineError);

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self.0 {
            EngineError::InvalidDecision { .. } => (StatusCode::BAD_REQUEST, self.0.to_string()),
            EngineError::Store(StoreError::NotFound { .. }) => {
                (StatusCode::NOT_FOUND, self.0.to_string())
            }
            EngineError::Store(_) => {
                warn!(error = %self.0, "Storage failure serving request");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal storage error".to_string(),
                )
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

// ============================================================================
// Handlers
// ============================================================================

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// Signed webhook intake.
async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    // Verify before parsing a single byte of the payload.
    if let Some(secret) = &state.webhook_secret {
        let provided = headers
            .get(signature::SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if !signature::verify(secret, &body, provided) {
            warn!("Webhook signature missing or invalid");
            return Ok((
                StatusCode::UNAUTHORIZED,
                Json(json!({ "error": "invalid signature" })),
            )
                .into_response());
        }
    }

    let payload: Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => {
            return Ok((
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": format!("invalid JSON body: {e}") })),
            )
                .into_response());
        }
    };

    let event_type = headers
        .get(EVENT_TYPE_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| {
            payload
                .get("event_type")
                .and_then(Value::as_str)
                .map(str::to_string)
        });
    let Some(event_type) = event_type else {
        return Ok((
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "missing event_type" })),
        )
            .into_response());
    };

    let delivery_id = headers
        .get(DELIVERY_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let mut event = Event::new(event_type, payload.clone());
    if let Some(id) = &delivery_id {
        event = event.with_id(id.clone());
    }
    if let Some(action) = payload.get("action").and_then(Value::as_str) {
        event = event.with_action(action);
    }

    let result = state.engine.process_event(&event).await?;
    let mut response = match &result {
        WorkflowResult::Ignored => json!({ "status": "ignored" }),
        WorkflowResult::AutoResolved { outcome } => json!({
            "status": "auto_resolved",
            "final_decision": outcome.final_decision,
            "summary": outcome.summary,
        }),
        WorkflowResult::Suspended {
            approval_id,
            outcome,
        } => json!({
            "status": "pending_approval",
            "approval_id": approval_id,
            "final_decision": outcome.final_decision,
            "summary": outcome.summary,
        }),
        // A duplicate delivery converges on the live approval with a 200, so
        // the sender sees the same answer it got the first time.
        WorkflowResult::AlreadyPending { approval_id } => json!({
            "status": "pending_approval",
            "approval_id": approval_id,
        }),
    };
    if let Some(id) = delivery_id {
        response["delivery_id"] = Value::String(id);
    }

    Ok(Json(response).into_response())
}

#[derive(Debug, Deserialize)]
struct DecisionRequest {
    approval_id: String,
    decision: String,
    approver_id: String,
}

/// Human decision callback. Safe to replay: a repeat (or a conflicting
/// second decision) returns the stored terminal state.
async fn decision(
    State(state): State<AppState>,
    Json(req): Json<DecisionRequest>,
) -> Result<Json<Value>, ApiError> {
    let record = state
        .engine
        .resolve(&req.approval_id, &req.decision, &req.approver_id)
        .await?;

    Ok(Json(json!({
        "ok": true,
        "approval_id": record.approval_id,
        "decision": record.decision,
        "status": record.status,
    })))
}

#[derive(Debug, Default, Deserialize)]
struct CancelRequest {
    reason: Option<String>,
}

async fn cancel(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Option<Json<CancelRequest>>,
) -> Result<Json<Value>, ApiError> {
    let reason = body.and_then(|Json(req)| req.reason);
    let record = state.engine.cancel(&id, reason).await?;

    Ok(Json(json!({
        "ok": true,
        "approval_id": record.approval_id,
        "status": record.status,
    })))
}

async fn get_approval(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    match state.engine.get(&id).await? {
        Some(record) => Ok(Json(record).into_response()),
        None => Ok((
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("Approval '{id}' not found") })),
        )
            .into_response()),
    }
}

async fn list_pending(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let pending = state.engine.list_pending().await?;
    Ok(Json(json!({
        "count": pending.len(),
        "approvals": pending,
    })))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::AggregatorConfig;
    use crate::approval::engine::EngineConfig;
    use crate::approval::notify::LogNotifier;
    use crate::approval::store::MemoryApprovalStore;
    use crate::approval::ApprovalStatus;
    use crate::metrics::EngineMetrics;
    use crate::producer::release::ReleaseReviewProducer;
    use crate::producer::ProducerRegistry;
    use crate::router::Router as EventRouter;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    const SECRET: &[u8] = b"test-secret";

    fn test_state() -> AppState {
        let mut registry = ProducerRegistry::new();
        registry.register(Arc::new(ReleaseReviewProducer::new()));
        let router = EventRouter::with_default_bindings(registry);

        let engine = Arc::new(ApprovalEngine::new(
            router,
            Arc::new(MemoryApprovalStore::new()),
            Arc::new(LogNotifier),
            EngineConfig {
                approval_timeout: chrono::Duration::hours(24),
                aggregator: AggregatorConfig::default(),
            },
            EngineMetrics::disabled(),
        ));
        AppState {
            engine,
            webhook_secret: Some(SECRET.to_vec()),
        }
    }

    fn signed_webhook(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/v1/webhook")
            .header("content-type", "application/json")
            .header(
                signature::SIGNATURE_HEADER,
                signature::sign(SECRET, body.as_bytes()),
            )
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_responds_ok() {
        let app = router(test_state());
        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["status"], "ok");
    }

    #[tokio::test]
    async fn unsigned_webhook_is_rejected_before_parsing() {
        let app = router(test_state());
        let request = Request::builder()
            .method("POST")
            .uri("/api/v1/webhook")
            .header("content-type", "application/json")
            .body(Body::from("not even json"))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn tampered_signature_is_rejected() {
        let app = router(test_state());
        let body = r#"{"event_type":"pull_request","action":"opened"}"#;
        let request = Request::builder()
            .method("POST")
            .uri("/api/v1/webhook")
            .header("content-type", "application/json")
            .header(
                signature::SIGNATURE_HEADER,
                signature::sign(b"wrong-secret", body.as_bytes()),
            )
            .body(Body::from(body))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn unsupported_event_type_is_acknowledged_as_ignored() {
        let app = router(test_state());
        let response = app
            .oneshot(signed_webhook(r#"{"event_type":"star_added"}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["status"], "ignored");
    }

    #[tokio::test]
    async fn filtered_action_is_acknowledged_as_ignored() {
        let app = router(test_state());
        let response = app
            .oneshot(signed_webhook(
                r#"{"event_type":"pull_request","action":"closed"}"#,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["status"], "ignored");
    }

    #[tokio::test]
    async fn clean_pull_request_auto_resolves() {
        let app = router(test_state());
        let body = r#"{
            "event_type": "pull_request",
            "action": "opened",
            "pull_request": {"title": "Add docs", "body": "", "changed_files": 2}
        }"#;

        let response = app.oneshot(signed_webhook(body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = json_body(response).await;
        assert_eq!(json["status"], "auto_resolved");
        assert_eq!(json["final_decision"], "approve");
    }

    #[tokio::test]
    async fn risky_pull_request_suspends_and_decision_resolves() {
        let state = test_state();
        let app = router(state.clone());
        let body = r#"{
            "event_type": "pull_request",
            "action": "opened",
            "pull_request": {"title": "hotfix: drop table users", "body": "", "changed_files": 3}
        }"#;

        let response = app.clone().oneshot(signed_webhook(body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = json_body(response).await;
        assert_eq!(json["status"], "pending_approval");
        let approval_id = json["approval_id"].as_str().unwrap().to_string();

        // The record is visible through the read API.
        let response = app
            .clone()
            .oneshot(
                Request::get(format!("/api/v1/approvals/{approval_id}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["status"], "pending");

        // Resolve it.
        let decision = json!({
            "approval_id": approval_id,
            "decision": "approve",
            "approver_id": "alice",
        });
        let response = app
            .clone()
            .oneshot(
                Request::post("/api/v1/approvals/decision")
                    .header("content-type", "application/json")
                    .body(Body::from(decision.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = json_body(response).await;
        assert_eq!(json["ok"], true);
        assert_eq!(json["status"], "approved");

        // Replaying the callback returns the same terminal state.
        let replay = json!({
            "approval_id": approval_id,
            "decision": "reject",
            "approver_id": "bob",
        });
        let response = app
            .oneshot(
                Request::post("/api/v1/approvals/decision")
                    .header("content-type", "application/json")
                    .body(Body::from(replay.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["status"], "approved");
    }

    #[tokio::test]
    async fn duplicate_delivery_converges_on_the_live_approval() {
        let app = router(test_state());
        let body = r#"{
            "event_type": "pull_request",
            "action": "opened",
            "pull_request": {"title": "urgent migration", "body": "", "changed_files": 1}
        }"#;
        let request = |app: Router| {
            let mut req = signed_webhook(body);
            req.headers_mut().insert(
                DELIVERY_ID_HEADER,
                "delivery-42".parse().unwrap(),
            );
            app.oneshot(req)
        };

        let first = json_body(request(app.clone()).await.unwrap()).await;
        let second = json_body(request(app).await.unwrap()).await;

        assert_eq!(first["status"], "pending_approval");
        assert_eq!(second["status"], "pending_approval");
        assert_eq!(first["approval_id"], second["approval_id"]);
        assert_eq!(second["delivery_id"], "delivery-42");
    }

    #[tokio::test]
    async fn unknown_approval_is_404() {
        let app = router(test_state());

        let response = app
            .clone()
            .oneshot(
                Request::get("/api/v1/approvals/approval_missing0")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let decision = json!({
            "approval_id": "approval_missing0",
            "decision": "approve",
            "approver_id": "alice",
        });
        let response = app
            .oneshot(
                Request::post("/api/v1/approvals/decision")
                    .header("content-type", "application/json")
                    .body(Body::from(decision.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn invalid_decision_string_is_400() {
        let state = test_state();
        let app = router(state.clone());
        let body = r#"{
            "event_type": "pull_request",
            "action": "opened",
            "pull_request": {"title": "rollback the rollout", "body": "", "changed_files": 1}
        }"#;
        let json = json_body(app.clone().oneshot(signed_webhook(body)).await.unwrap()).await;
        let approval_id = json["approval_id"].as_str().unwrap();

        let decision = json!({
            "approval_id": approval_id,
            "decision": "maybe",
            "approver_id": "alice",
        });
        let response = app
            .oneshot(
                Request::post("/api/v1/approvals/decision")
                    .header("content-type", "application/json")
                    .body(Body::from(decision.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn cancel_accepts_an_optional_reason() {
        let state = test_state();
        let app = router(state.clone());
        let body = r#"{
            "event_type": "pull_request",
            "action": "opened",
            "pull_request": {"title": "skip ci for deploy", "body": "", "changed_files": 1}
        }"#;
        let json = json_body(app.clone().oneshot(signed_webhook(body)).await.unwrap()).await;
        let approval_id = json["approval_id"].as_str().unwrap().to_string();

        let response = app
            .clone()
            .oneshot(
                Request::post(format!("/api/v1/approvals/{approval_id}/cancel"))
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"reason":"superseded"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["status"], "cancelled");

        let record = state.engine.get(&approval_id).await.unwrap().unwrap();
        assert_eq!(record.status, ApprovalStatus::Cancelled);
        assert_eq!(
            record.resume_value.unwrap().reason.as_deref(),
            Some("superseded")
        );
    }

    #[tokio::test]
    async fn pending_list_reflects_open_approvals() {
        let state = test_state();
        let app = router(state.clone());

        let response = app
            .clone()
            .oneshot(
                Request::get("/api/v1/approvals/pending")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(json_body(response).await["count"], 0);

        let body = r#"{
            "event_type": "pull_request",
            "action": "opened",
            "pull_request": {"title": "force-push to main", "body": "", "changed_files": 1}
        }"#;
        app.clone().oneshot(signed_webhook(body)).await.unwrap();

        let response = app
            .oneshot(
                Request::get("/api/v1/approvals/pending")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let json = json_body(response).await;
        assert_eq!(json["count"], 1);
        assert_eq!(json["approvals"][0]["status"], "pending");
    }

    #[tokio::test]
    async fn missing_event_type_is_400() {
        let app = router(test_state());
        let response = app
            .oneshot(signed_webhook(r#"{"action":"opened"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn event_type_header_overrides_body_lookup() {
        let app = router(test_state());
        let body = r#"{"pull_request": {"title": "ok", "body": "", "changed_files": 1}}"#;
        let mut request = signed_webhook(body);
        request
            .headers_mut()
            .insert(EVENT_TYPE_HEADER, "pull_request".parse().unwrap());

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        // No action in the payload, so the PR filter passes it through.
        let json = json_body(response).await;
        assert_ne!(json["status"], "ignored");
    }
}
