//! Control facade tying lifecycle, capture and delivery together.

use crate::capture::{CaptureAdapter, CaptureEngine};
use crate::delivery::{EventSink, HttpDeliverySink};
use crate::lifecycle::{AgentState, Lifecycle};
use crate::pipeline::{PipelineCoordinator, PipelineMetrics};
use config::Config;
use errors::DeliveryError;
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info};

/// Result of a control action: whether it took effect, and the state after.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ControlOutcome {
    pub success: bool,
    pub state: AgentState
}

/// A running CDC relay.
///
/// Construction attaches the pipeline to the capture stream and therefore
/// needs a Tokio runtime. The agent starts in STOPPED.
pub struct Agent {
    lifecycle: Arc<Lifecycle>,
    capture: CaptureAdapter,
    pipeline: PipelineCoordinator
}

impl Agent {
    /// Wires the agent with an HTTP sink built from `config.sink`.
    pub fn new(config: &Config, engine: Arc<dyn CaptureEngine>) -> Result<Self, DeliveryError> {
        let lifecycle = Arc::new(Lifecycle::new());
        let sink = HttpDeliverySink::new(&config.sink, Arc::clone(&lifecycle))?;
        info!(url = %sink.url(), "Delivery sink configured");
        Ok(Self::assemble(config, lifecycle, engine, Arc::new(sink)))
    }

    /// Wires the agent around an arbitrary sink.
    pub fn with_sink(config: &Config, engine: Arc<dyn CaptureEngine>, sink: Arc<dyn EventSink>) -> Self {
        Self::assemble(config, Arc::new(Lifecycle::new()), engine, sink)
    }

    fn assemble(
        config: &Config,
        lifecycle: Arc<Lifecycle>,
        engine: Arc<dyn CaptureEngine>,
        sink: Arc<dyn EventSink>
    ) -> Self {
        let capture = CaptureAdapter::new(
            engine,
            Arc::clone(&lifecycle),
            config.agent.source_type.clone(),
            config.agent.stream_capacity
        );
        let pipeline = PipelineCoordinator::new(Arc::clone(&lifecycle), sink, config.sink.max_in_flight);
        pipeline.attach(capture.subscribe());

        Self {
            lifecycle,
            capture,
            pipeline
        }
    }

    pub fn start(&self) -> ControlOutcome {
        if !self.lifecycle.set_state(AgentState::Starting) {
            return self.outcome(false);
        }

        if let Err(e) = self.capture.start() {
            error!(error = %e, "Failed to start capture");
            if self.lifecycle.set_state(AgentState::Stopping) {
                self.lifecycle.set_state(AgentState::Stopped);
            }
            return self.outcome(false);
        }

        let started = self.lifecycle.set_state(AgentState::Running);
        self.outcome(started)
    }

    pub fn pause(&self) -> ControlOutcome {
        let paused = self.lifecycle.set_state(AgentState::Paused);
        self.outcome(paused)
    }

    pub fn resume(&self) -> ControlOutcome {
        let resumed = self.lifecycle.set_state(AgentState::Running);
        self.outcome(resumed)
    }

    /// In-flight deliveries are not cancelled; their retries abort on their own.
    pub fn stop(&self) -> ControlOutcome {
        if !self.lifecycle.set_state(AgentState::Stopping) {
            return self.outcome(false);
        }
        self.capture.stop();
        let stopped = self.lifecycle.set_state(AgentState::Stopped);
        self.outcome(stopped)
    }

    pub fn status(&self) -> AgentState {
        self.lifecycle.state()
    }

    pub fn lifecycle(&self) -> &Arc<Lifecycle> {
        &self.lifecycle
    }

    pub fn metrics(&self) -> PipelineMetrics {
        self.pipeline.metrics()
    }

    fn outcome(&self, success: bool) -> ControlOutcome {
        ControlOutcome {
            success,
            state: self.lifecycle.state()
        }
    }
}
