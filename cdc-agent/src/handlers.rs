//! HTTP request handlers for the agent control surface.

use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use cdc_core::{AgentState, ControlOutcome};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::{AgentServerError, Result};
use crate::state::AppState;

/// Body of every `/api/agent/*` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlResponse {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub state: AgentState,
}

impl ControlResponse {
    pub fn success(message: impl Into<String>, state: AgentState) -> Self {
        Self {
            status: "success".to_string(),
            message: Some(message.into()),
            state,
        }
    }

    pub fn error(message: impl Into<String>, state: AgentState) -> Self {
        Self {
            status: "error".to_string(),
            message: Some(message.into()),
            state,
        }
    }

    pub fn status_only(state: AgentState) -> Self {
        Self {
            status: "success".to_string(),
            message: None,
            state,
        }
    }
}

/// Health check response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub state: AgentState,
}

/// Health check endpoint.
///
/// The process is healthy whenever it can answer; the agent state is
/// reported alongside.
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "healthy".to_string(),
            state: state.agent.status(),
        }),
    )
}

/// Prometheus text exposition of the installed recorder.
pub async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match &state.metrics {
        Some(handle) => (StatusCode::OK, handle.render()),
        None => (
            StatusCode::NOT_FOUND,
            "metrics export disabled\n".to_string(),
        ),
    }
}

/// POST /api/agent/start
pub async fn start(State(state): State<Arc<AppState>>) -> Result<Json<ControlResponse>> {
    let agent = Arc::clone(&state.agent);
    if !agent.lifecycle().is_stopping() {
        return Err(AgentServerError::conflict(
            "Agent is already running or starting",
            agent.status(),
        ));
    }

    // Starting may join a capture thread still draining from the last stop.
    let outcome = tokio::task::spawn_blocking(move || agent.start())
        .await
        .map_err(|e| AgentServerError::Internal(format!("start task failed: {e}")))?;
    respond(outcome, "Agent started", "Agent could not be started")
}

/// POST /api/agent/pause
pub async fn pause(State(state): State<Arc<AppState>>) -> Result<Json<ControlResponse>> {
    let agent = &state.agent;
    if !agent.lifecycle().is_running() {
        return Err(AgentServerError::conflict(
            "Agent is not running and cannot be paused",
            agent.status(),
        ));
    }
    respond(agent.pause(), "Agent paused", "Agent could not be paused")
}

/// POST /api/agent/resume
pub async fn resume(State(state): State<Arc<AppState>>) -> Result<Json<ControlResponse>> {
    let agent = &state.agent;
    if !agent.lifecycle().is_paused() {
        return Err(AgentServerError::conflict(
            "Agent is not paused and cannot be resumed",
            agent.status(),
        ));
    }
    respond(agent.resume(), "Agent resumed", "Agent could not be resumed")
}

/// POST /api/agent/stop
pub async fn stop(State(state): State<Arc<AppState>>) -> Result<Json<ControlResponse>> {
    let agent = Arc::clone(&state.agent);
    if agent.lifecycle().is_stopping() {
        return Err(AgentServerError::conflict(
            "Agent is already stopped or stopping",
            agent.status(),
        ));
    }

    let outcome = tokio::task::spawn_blocking(move || agent.stop())
        .await
        .map_err(|e| AgentServerError::Internal(format!("stop task failed: {e}")))?;
    respond(outcome, "Agent stopped", "Agent could not be stopped")
}

/// GET /api/agent/status
pub async fn status(State(state): State<Arc<AppState>>) -> Json<ControlResponse> {
    Json(ControlResponse::status_only(state.agent.status()))
}

fn respond(outcome: ControlOutcome, success: &str, failure: &str) -> Result<Json<ControlResponse>> {
    if outcome.success {
        tracing::info!(state = %outcome.state, "{success}");
        Ok(Json(ControlResponse::success(success, outcome.state)))
    } else {
        Err(AgentServerError::conflict(failure, outcome.state))
    }
}
