use super::state::AppState;
use crate::error::CallError;
use crate::session::Scenario;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct StartCallRequest {
    /// Optional scenario title shown in the UI and the transcript
    pub title: Option<String>,

    /// Persona / instructions for the remote session
    pub instructions: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MuteResponse {
    pub muted: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn error_response(err: &CallError) -> Response {
    let status = match err {
        CallError::InvalidState { .. } => StatusCode::CONFLICT,
        err if err.is_fatal() => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };

    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
        }),
    )
        .into_response()
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /call/start
/// Start a conversation; responds once audio is flowing
pub async fn start_call(
    State(state): State<AppState>,
    Json(req): Json<StartCallRequest>,
) -> impl IntoResponse {
    let mut scenario = Scenario::new(req.instructions);
    scenario.title = req.title;

    match state.engine.start(scenario).await {
        Ok(session_id) => {
            info!("Call started: {}", session_id);
            (StatusCode::OK, Json(state.engine.snapshot())).into_response()
        }
        Err(e) => {
            error!("Failed to start call: {}", e);
            error_response(&e)
        }
    }
}

/// POST /call/stop
/// End the conversation (idempotent)
pub async fn stop_call(State(state): State<AppState>) -> impl IntoResponse {
    let final_state = state.engine.stop().await;
    info!("Call stopped ({})", final_state);
    (StatusCode::OK, Json(state.engine.snapshot()))
}

/// POST /call/mute
/// Toggle microphone mute
pub async fn toggle_mute(State(state): State<AppState>) -> impl IntoResponse {
    match state.engine.toggle_mute().await {
        Ok(muted) => (StatusCode::OK, Json(MuteResponse { muted })).into_response(),
        Err(e) => error_response(&e),
    }
}

/// POST /call/reset
/// Return to idle after results or an error
pub async fn reset_call(State(state): State<AppState>) -> impl IntoResponse {
    match state.engine.reset().await {
        Ok(()) => (StatusCode::OK, Json(state.engine.snapshot())).into_response(),
        Err(e) => error_response(&e),
    }
}

/// GET /call/status
pub async fn get_call_status(State(state): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, Json(state.engine.snapshot()))
}

/// GET /call/transcript
/// Committed turns plus partial text still streaming in
pub async fn get_call_transcript(State(state): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, Json(state.engine.live_transcript()))
}

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
