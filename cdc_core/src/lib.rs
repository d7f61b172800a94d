//! # CDC Relay Core
//!
//! Relays row-level change events captured from a database replication log
//! to a remote HTTP sink.
//!
//! - [`lifecycle`]: validated agent state machine gating capture and delivery
//! - [`capture`]: engine abstraction and the adapter publishing change events
//! - [`pipeline`]: admission control and parallel dispatch
//! - [`delivery`]: HTTP sink with bounded exponential-backoff retries
//! - [`agent`]: start/pause/resume/stop facade over all of the above

pub mod agent;
pub mod capture;
pub mod delivery;
pub mod event;
pub mod lifecycle;
pub mod pipeline;

pub use agent::{Agent, ControlOutcome};
pub use capture::{CaptureAdapter, CaptureEngine, CommandEngine, MemoryEngine, RawRecord};
pub use delivery::{EventSink, HttpDeliverySink, retry_schedule};
pub use event::{ChangeEvent, Operation, RowImage};
pub use lifecycle::{AgentState, Lifecycle};
pub use pipeline::{PipelineCoordinator, PipelineMetrics};
