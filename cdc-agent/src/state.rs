//! Application state for the CDC agent server.

use cdc_core::Agent;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

/// Shared state handed to every request handler.
#[derive(Clone)]
pub struct AppState {
    /// The relay under control.
    pub agent: Arc<Agent>,
    /// Renders `/metrics`; `None` when metrics export is disabled.
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(agent: Arc<Agent>, metrics: Option<PrometheusHandle>) -> Self {
        Self { agent, metrics }
    }
}
