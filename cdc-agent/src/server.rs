//! Server setup and lifecycle for the CDC agent.

use cdc_core::{Agent, CaptureEngine, CommandEngine};
use config::{CaptureConfig, Config, ObservabilityConfig, ServerConfig};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;

use crate::error::{AgentServerError, Result};
use crate::routes::create_router;
use crate::state::AppState;

/// The CDC agent process: control API in front of one relay.
pub struct AgentServer {
    state: Arc<AppState>,
    server: ServerConfig,
    auto_start: bool,
}

impl AgentServer {
    /// Builds the agent around `engine` with an HTTP sink from `config`.
    pub fn new(
        config: &Config,
        engine: Arc<dyn CaptureEngine>,
        metrics: Option<PrometheusHandle>,
    ) -> Result<Self> {
        let agent = Arc::new(Agent::new(config, engine)?);
        Ok(Self {
            state: Arc::new(AppState::new(agent, metrics)),
            server: config.server.clone(),
            auto_start: config.agent.auto_start,
        })
    }

    /// Creates a server instance from an existing `AppState`.
    pub fn with_state(state: Arc<AppState>, server: ServerConfig) -> Self {
        Self {
            state,
            server,
            auto_start: false,
        }
    }

    /// Runs the HTTP server.
    ///
    /// Blocks until the server is shut down (e.g., via Ctrl+C), then stops
    /// the agent.
    pub async fn run(self) -> Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.server.host, self.server.port)
            .parse()
            .map_err(|e| AgentServerError::Server(format!("Invalid address: {e}")))?;

        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| AgentServerError::Server(format!("Failed to bind to {addr}: {e}")))?;

        if self.auto_start {
            let outcome = self.state.agent.start();
            if outcome.success {
                tracing::info!(state = %outcome.state, "Agent auto-started");
            } else {
                tracing::error!(state = %outcome.state, "Agent auto-start failed");
            }
        }

        let router = create_router(self.state.clone());
        tracing::info!(%addr, "CDC agent server starting");

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| AgentServerError::Server(format!("Server error: {e}")))?;

        let outcome = self.state.agent.stop();
        tracing::info!(state = %outcome.state, "CDC agent server stopped");
        Ok(())
    }

    /// Returns a reference to the application state.
    #[must_use]
    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }
}

/// Signal handler for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        },
        () = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        },
    }
}

/// Installs the global tracing subscriber.
///
/// `RUST_LOG` directives win over the configured level.
pub fn init_tracing(observability: &ObservabilityConfig) {
    let level = observability
        .logging_level
        .parse::<tracing::Level>()
        .unwrap_or(tracing::Level::INFO);
    let filter = tracing_subscriber::EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let installed = if observability.json_logs {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    if installed.is_err() {
        tracing::debug!("Tracing subscriber already installed");
    }
}

/// Installs the global Prometheus recorder when metrics are enabled.
pub fn init_metrics(observability: &ObservabilityConfig) -> Result<Option<PrometheusHandle>> {
    if !observability.metrics_enabled {
        tracing::info!("Metrics export disabled by configuration");
        return Ok(None);
    }
    PrometheusBuilder::new()
        .install_recorder()
        .map(Some)
        .map_err(|e| AgentServerError::Metrics(e.to_string()))
}

/// Builds the connector process engine from `capture.command`.
pub fn build_engine(capture: &CaptureConfig) -> Result<Arc<dyn CaptureEngine>> {
    let engine = CommandEngine::from_config(capture).ok_or_else(|| {
        AgentServerError::Capture(
            "no connector command configured (set capture.command or CDC_CAPTURE_COMMAND)"
                .to_string(),
        )
    })?;
    tracing::info!(
        connector = %capture.connector.name,
        class = %capture.connector.connector_class,
        "Capture engine configured"
    );
    Ok(Arc::new(engine))
}

/// Entry point for running the server from configuration.
pub async fn run_server(config: Config) -> Result<()> {
    let metrics = init_metrics(&config.observability)?;
    let engine = build_engine(&config.capture)?;
    let server = AgentServer::new(&config, engine, metrics)?;
    server.run().await
}

/// Entry point for containerized deployments: file and environment
/// configuration, then [`run_server`].
pub async fn run_from_env() -> Result<()> {
    let config = config::load()?;
    init_tracing(&config.observability);
    run_server(config).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_engine_requires_command() {
        let capture = CaptureConfig::default();
        assert!(matches!(
            build_engine(&capture),
            Err(AgentServerError::Capture(_))
        ));
    }

    #[test]
    fn test_build_engine_from_command() {
        let mut capture = CaptureConfig::default();
        capture.command = Some(config::CommandConfig {
            program: "/opt/debezium/run.sh".to_string(),
            args: vec!["--json".to_string()],
        });
        let engine = build_engine(&capture).unwrap();
        assert_eq!(engine.name(), "command");
    }

    #[test]
    fn test_metrics_disabled_installs_nothing() {
        let observability = ObservabilityConfig {
            metrics_enabled: false,
            ..ObservabilityConfig::default()
        };
        assert!(init_metrics(&observability).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_invalid_address_is_reported() {
        let engine: Arc<dyn CaptureEngine> = Arc::new(cdc_core::MemoryEngine::new());
        let agent = Arc::new(Agent::with_sink(
            &Config::default(),
            engine,
            Arc::new(NeverSink),
        ));
        let server = AgentServer::with_state(
            Arc::new(AppState::new(agent, None)),
            ServerConfig {
                host: "not a host".to_string(),
                port: 8080,
            },
        );
        assert!(matches!(server.run().await, Err(AgentServerError::Server(_))));
    }

    struct NeverSink;

    #[async_trait::async_trait]
    impl cdc_core::EventSink for NeverSink {
        async fn send(&self, _event: Arc<cdc_core::ChangeEvent>) -> bool {
            false
        }
    }
}
