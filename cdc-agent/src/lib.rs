//! # CDC Agent
//!
//! HTTP control surface and process entry point for the change data
//! capture relay in `cdc_core`.
//!
//! ## Endpoints
//!
//! - `POST /api/agent/start` - Start capture and delivery
//! - `POST /api/agent/pause` - Pause delivery; capture keeps running
//! - `POST /api/agent/resume` - Resume delivery
//! - `POST /api/agent/stop` - Stop capture and delivery
//! - `GET /api/agent/status` - Current agent state
//! - `GET /health` - Health check endpoint
//! - `GET /metrics` - Prometheus metrics endpoint
//!
//! Refused control actions answer `409 Conflict` with the current state.

pub mod error;
pub mod handlers;
pub mod routes;
pub mod server;
pub mod state;

pub use error::AgentServerError;
pub use routes::create_router;
pub use server::AgentServer;
pub use state::AppState;
