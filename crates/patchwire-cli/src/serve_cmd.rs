use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use patchwire_core::broadcast::{BroadcastEvent, Broadcaster};
use patchwire_core::manifest::{MountedInstance, Patch, PropMap};
use patchwire_core::orchestrator::{OrchestrationResult, Orchestrator, PromptRequest, Target};
use patchwire_core::selector::PageContext;
use patchwire_core::session::SessionRegistry;

const SSE_KEEP_ALIVE: Duration = Duration::from_secs(15);

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    message: String,
    errors: Option<Vec<String>>,
}

impl AppError {
    fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
            errors: None,
        }
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }

    /// Validator rejection, carrying the individual errors.
    pub fn unprocessable(msg: impl Into<String>, errors: Vec<String>) -> Self {
        Self {
            errors: Some(errors),
            ..Self::new(StatusCode::UNPROCESSABLE_ENTITY, msg)
        }
    }

    fn unknown_session(session_id: &str) -> Self {
        Self::not_found(format!("Session '{session_id}' not found"))
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let body = match self.errors {
            Some(errors) => serde_json::json!({ "error": self.message, "errors": errors }),
            None => serde_json::json!({ "error": self.message }),
        };
        (self.status, Json(body)).into_response()
    }
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Shared handles for every request. Cloning is cheap.
#[derive(Debug, Clone)]
pub struct AppState {
    pub sessions: Arc<SessionRegistry>,
    pub broadcaster: Arc<Broadcaster>,
    pub orchestrator: Arc<Orchestrator>,
}

impl AppState {
    /// State around an orchestrator, sharing its broadcaster.
    pub fn new(orchestrator: Orchestrator) -> Self {
        Self {
            sessions: Arc::new(SessionRegistry::new()),
            broadcaster: Arc::clone(orchestrator.broadcaster()),
            orchestrator: Arc::new(orchestrator),
        }
    }

    fn require_session(&self, session_id: &str) -> Result<(), AppError> {
        if self.sessions.exists(session_id) {
            Ok(())
        } else {
            Err(AppError::unknown_session(session_id))
        }
    }
}

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptBody {
    pub session_id: Option<String>,
    pub prompt: Option<String>,
    pub snapshot: Option<Vec<MountedInstance>>,
    #[serde(flatten)]
    pub page: PageContext,
}

/// Wire shape of an orchestration result for the browser client.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptResponse {
    pub target: Option<Target>,
    pub patch: Option<Patch>,
    pub applied: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
    pub is_done: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

impl From<OrchestrationResult> for PromptResponse {
    fn from(r: OrchestrationResult) -> Self {
        Self {
            is_done: r.is_done(),
            target: r.target,
            patch: r.patch,
            applied: r.applied,
            errors: r.errors,
            reasoning: r.rationale,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchBody {
    pub session_id: Option<String>,
    pub key: Option<String>,
    pub instance_id: Option<String>,
    pub patch: Option<Patch>,
    pub source: Option<String>,
    pub request_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotBody {
    pub session_id: Option<String>,
    pub key: Option<String>,
    pub instance_id: Option<String>,
    pub state: Option<PropMap>,
}

/// Treat an empty string the same as a missing field.
fn present(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/sessions", post(create_session))
        .route("/ai/prompt", post(run_prompt))
        .route("/patches", post(apply_patch))
        .route("/snapshots", post(publish_snapshot))
        .route("/sse/{session_id}", get(subscribe))
        .route("/registry", get(list_manifests))
        .route("/registry/{key}", get(get_manifest))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub async fn run_serve(state: AppState, addr: &str) -> Result<()> {
    let app = build_router(state);
    let addr: SocketAddr = addr.parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("patchwire serve listening on http://{addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("patchwire serve shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn create_session(State(state): State<AppState>) -> impl IntoResponse {
    let session_id = state.sessions.create();
    tracing::info!(session_id = %session_id, "session created");
    (
        StatusCode::CREATED,
        Json(serde_json::json!({ "sessionId": session_id })),
    )
}

async fn run_prompt(
    State(state): State<AppState>,
    body: Result<Json<PromptBody>, JsonRejection>,
) -> Result<Json<PromptResponse>, AppError> {
    let Json(body) = body?;
    let (Some(session_id), Some(prompt), Some(snapshot)) =
        (present(body.session_id), present(body.prompt), body.snapshot)
    else {
        return Err(AppError::bad_request(
            "sessionId, prompt and snapshot are required",
        ));
    };
    state.require_session(&session_id)?;

    let request = PromptRequest {
        prompt,
        snapshot,
        page: body.page,
    };
    let result = state.orchestrator.run(&session_id, &request).await;
    Ok(Json(result.into()))
}

async fn apply_patch(
    State(state): State<AppState>,
    body: Result<Json<PatchBody>, JsonRejection>,
) -> Result<Json<serde_json::Value>, AppError> {
    let Json(body) = body?;
    let (Some(session_id), Some(key), Some(instance_id), Some(patch)) = (
        present(body.session_id),
        present(body.key),
        present(body.instance_id),
        body.patch,
    ) else {
        return Err(AppError::bad_request(
            "sessionId, key, instanceId, and patch are required",
        ));
    };
    state.require_session(&session_id)?;

    let report = state.orchestrator.registry().validate(&key, &patch);
    let ack = |applied: bool| {
        if let Some(request_id) = &body.request_id {
            state
                .broadcaster
                .publish(&session_id, &BroadcastEvent::ack(request_id, applied));
        }
    };

    if !report.valid {
        tracing::info!(session_id = %session_id, key = %key, errors = ?report.errors, "direct patch rejected");
        ack(false);
        return Err(AppError::unprocessable(
            "Patch validation failed",
            report.errors,
        ));
    }

    state.broadcaster.publish(
        &session_id,
        &BroadcastEvent::patch(&key, &instance_id, patch),
    );
    ack(true);

    let source = present(body.source).unwrap_or_else(|| "direct".to_string());
    Ok(Json(serde_json::json!({ "applied": true, "source": source })))
}

async fn publish_snapshot(
    State(state): State<AppState>,
    body: Result<Json<SnapshotBody>, JsonRejection>,
) -> Result<Json<serde_json::Value>, AppError> {
    let Json(body) = body?;
    let (Some(session_id), Some(key), Some(instance_id), Some(snapshot_state)) = (
        present(body.session_id),
        present(body.key),
        present(body.instance_id),
        body.state,
    ) else {
        return Err(AppError::bad_request(
            "sessionId, key, instanceId, and state are required",
        ));
    };
    state.require_session(&session_id)?;

    let published = state.broadcaster.publish(
        &session_id,
        &BroadcastEvent::snapshot(key, instance_id, snapshot_state),
    );
    Ok(Json(serde_json::json!({ "published": published })))
}

async fn subscribe(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    state.require_session(&session_id)?;

    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let subscription = state.broadcaster.subscribe_guarded(&session_id, tx);
    tracing::info!(session_id = %session_id, "observer connected");

    let stream = async_stream::stream! {
        // Unsubscribes when the client goes away and the stream is dropped.
        let _subscription = subscription;
        while let Some(frame) = rx.recv().await {
            yield Ok(Event::default().data(frame));
        }
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(SSE_KEEP_ALIVE)))
}

async fn list_manifests(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.orchestrator.registry().manifests().to_vec())
}

async fn get_manifest(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    state
        .orchestrator
        .registry()
        .get(&key)
        .cloned()
        .map(Json)
        .ok_or_else(|| AppError::not_found(format!("component '{key}' not found")))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
