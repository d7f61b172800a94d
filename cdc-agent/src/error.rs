//! Error types for the CDC agent server.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use cdc_core::AgentState;
use serde::Serialize;
use thiserror::Error;

use crate::handlers::ControlResponse;

/// Result type alias for the agent server.
pub type Result<T> = std::result::Result<T, AgentServerError>;

/// Errors that can occur in the CDC agent server.
#[derive(Error, Debug)]
pub enum AgentServerError {
    /// Configuration could not be loaded or failed validation.
    #[error("Configuration error: {0}")]
    Configuration(#[from] config::ConfigError),

    /// The delivery sink could not be built.
    #[error("Delivery sink error: {0}")]
    Sink(#[from] errors::DeliveryError),

    /// No capture engine could be built from configuration.
    #[error("Capture engine error: {0}")]
    Capture(String),

    /// The Prometheus recorder could not be installed.
    #[error("Metrics error: {0}")]
    Metrics(String),

    /// Server startup or runtime error.
    #[error("Server error: {0}")]
    Server(String),

    /// A control action was refused in the current state.
    #[error("{message} (state {state})")]
    Conflict { message: String, state: AgentState },

    /// Internal error for unexpected conditions.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AgentServerError {
    pub fn conflict(message: impl Into<String>, state: AgentState) -> Self {
        Self::Conflict {
            message: message.into(),
            state,
        }
    }
}

/// Error response body for non-control failures.
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl IntoResponse for AgentServerError {
    fn into_response(self) -> Response {
        if let Self::Conflict { message, state } = self {
            tracing::info!(%state, %message, "Control action refused");
            return (
                StatusCode::CONFLICT,
                Json(ControlResponse::error(message, state)),
            )
                .into_response();
        }

        tracing::error!(error = %self, "Request failed");
        let code = match &self {
            Self::Configuration(_) => "CONFIGURATION_ERROR",
            Self::Sink(_) => "SINK_ERROR",
            Self::Capture(_) => "CAPTURE_ERROR",
            Self::Metrics(_) => "METRICS_ERROR",
            Self::Server(_) => "SERVER_ERROR",
            Self::Conflict { .. } | Self::Internal(_) => "INTERNAL_ERROR",
        };

        let body = ErrorResponse {
            error: "An internal error occurred".to_string(),
            code: code.to_string(),
            details: Some(self.to_string()),
        };

        (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
    }
}
