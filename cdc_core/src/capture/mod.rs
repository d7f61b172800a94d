//! Change capture: engine abstraction and the adapter that owns it.
//!
//! The engine's blocking run-loop lives on one dedicated OS thread. Records
//! are converted to [`ChangeEvent`]s and published on a bounded broadcast
//! channel, but only while the lifecycle is RUNNING; everything captured in
//! any other state is dropped and not replayed.

mod command;
mod memory;
pub mod record;

pub use command::CommandEngine;
pub use memory::MemoryEngine;

use crate::event::ChangeEvent;
use crate::lifecycle::{AgentState, Lifecycle};
use errors::CaptureError;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

const WORKER_THREAD_NAME: &str = "cdc-capture";
const DEFAULT_RESTART_GRACE: Duration = Duration::from_secs(5);
const WORKER_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// One record as emitted by a capture engine.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawRecord {
    pub key: Option<String>,
    /// JSON change record; `None` for tombstones.
    pub value: Option<String>
}

impl RawRecord {
    pub fn new(key: Option<String>, value: Option<String>) -> Self {
        Self { key, value }
    }
}

/// An external change-capture engine.
///
/// Implementations must be restartable: after `run` returns, a later `run`
/// starts a fresh capture. A `close` that arrives before `run` has started
/// makes the next `run` return immediately.
pub trait CaptureEngine: Send + Sync {
    /// Blocks, handing every record to `emit`, until `close` is called or a
    /// fatal error occurs.
    fn run(&self, emit: &dyn Fn(RawRecord)) -> Result<(), CaptureError>;

    /// Ends the current or next `run`.
    fn close(&self) -> Result<(), CaptureError>;

    fn name(&self) -> &str {
        "capture-engine"
    }
}

struct Shared {
    engine: Arc<dyn CaptureEngine>,
    lifecycle: Arc<Lifecycle>,
    sender: broadcast::Sender<Arc<ChangeEvent>>,
    source_type: String,
    running: AtomicBool
}

/// Owns the capture engine lifetime and exposes its output as a stream.
pub struct CaptureAdapter {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
    restart_grace: Duration
}

impl CaptureAdapter {
    pub fn new(
        engine: Arc<dyn CaptureEngine>,
        lifecycle: Arc<Lifecycle>,
        source_type: impl Into<String>,
        capacity: usize
    ) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            shared: Arc::new(Shared {
                engine,
                lifecycle,
                sender,
                source_type: source_type.into(),
                running: AtomicBool::new(false)
            }),
            worker: Mutex::new(None),
            restart_grace: DEFAULT_RESTART_GRACE
        }
    }

    /// How long `start` waits for a run-loop left over from an earlier `stop`.
    #[must_use]
    pub fn with_restart_grace(mut self, grace: Duration) -> Self {
        self.restart_grace = grace;
        self
    }

    /// Launches the engine on its worker thread. A no-op when already running.
    ///
    /// A run-loop left draining by an earlier `stop` is joined first, so two
    /// runs of the same engine never overlap. If it does not finish within the
    /// restart grace, `start` fails with `PreviousRunActive` and the old
    /// run-loop stays tracked for the next attempt.
    pub fn start(&self) -> Result<(), CaptureError> {
        let shared = &self.shared;
        let mut worker = self.worker.lock();
        if shared.running.load(Ordering::SeqCst) {
            warn!(engine = shared.engine.name(), "Capture already running");
            return Ok(());
        }

        if let Some(previous) = worker.take() {
            if !self.await_finished(&previous) {
                warn!(
                    engine = shared.engine.name(),
                    grace_ms = self.restart_grace.as_millis() as u64,
                    "Previous capture run-loop still active, refusing to start"
                );
                *worker = Some(previous);
                return Err(CaptureError::PreviousRunActive {
                    engine: shared.engine.name().to_string()
                });
            }
            if previous.join().is_err() {
                error!("Capture worker panicked");
            }
        }

        if shared
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!(engine = shared.engine.name(), "Capture already running");
            return Ok(());
        }

        let worker_shared = Arc::clone(shared);
        let spawned = std::thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || run_worker(&worker_shared));

        match spawned {
            Ok(handle) => {
                *worker = Some(handle);
                info!(engine = shared.engine.name(), "Capture started");
                Ok(())
            }
            Err(e) => {
                shared.running.store(false, Ordering::SeqCst);
                Err(CaptureError::Io(e))
            }
        }
    }

    /// Closes the engine exactly once and releases the worker thread.
    /// Never fails; close errors are logged.
    pub fn stop(&self) {
        let shared = &self.shared;
        if shared
            .running
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!(engine = shared.engine.name(), "Capture already stopped");
            return;
        }

        if let Err(e) = shared.engine.close() {
            error!(engine = shared.engine.name(), error = %e, "Failed to close capture engine");
        }

        let mut worker = self.worker.lock();
        match worker.take() {
            Some(handle) if handle.is_finished() => {
                if handle.join().is_err() {
                    error!("Capture worker panicked");
                }
            }
            Some(handle) => {
                debug!("Capture worker still draining");
                *worker = Some(handle);
            }
            None => {}
        }
        info!(engine = shared.engine.name(), "Capture stopped");
    }

    fn await_finished(&self, handle: &JoinHandle<()>) -> bool {
        if handle.is_finished() {
            return true;
        }
        debug!("Waiting for previous capture run-loop to finish");
        let deadline = Instant::now() + self.restart_grace;
        while !handle.is_finished() {
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(WORKER_POLL_INTERVAL);
        }
        true
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<ChangeEvent>> {
        self.shared.sender.subscribe()
    }

    pub fn sender(&self) -> broadcast::Sender<Arc<ChangeEvent>> {
        self.shared.sender.clone()
    }
}

impl Drop for CaptureAdapter {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_worker(shared: &Shared) {
    let emit = |raw: RawRecord| publish(shared, raw);
    let result = shared.engine.run(&emit);

    let unexpected = shared
        .running
        .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
        .is_ok();

    if !unexpected {
        match result {
            Ok(()) => debug!(engine = shared.engine.name(), "Capture run-loop finished"),
            Err(e) => debug!(engine = shared.engine.name(), error = %e, "Capture run-loop ended after stop")
        }
        return;
    }

    match result {
        Ok(()) => error!(
            engine = shared.engine.name(),
            "Capture engine exited while running"
        ),
        Err(e) => error!(engine = shared.engine.name(), error = %e, "Capture engine failed")
    }

    // Only the caller that forced STOPPING completes it, so an operator stop
    // racing this path keeps ownership of its own STOPPED transition.
    if shared.lifecycle.set_state(AgentState::Stopping) {
        shared.lifecycle.set_state(AgentState::Stopped);
    }
}

fn publish(shared: &Shared, raw: RawRecord) {
    if !shared.lifecycle.is_running() {
        debug!(state = %shared.lifecycle.state(), "Dropping record captured while not running");
        return;
    }

    match record::convert(&raw, &shared.source_type) {
        Ok(Some(event)) => {
            debug!(event_id = %event.id, operation = %event.operation, "Captured change event");
            if shared.sender.send(Arc::new(event)).is_err() {
                debug!("No subscribers for change event");
            }
        }
        Ok(None) => {}
        Err(e) => error!(key = ?raw.key, error = %e, "Dropping malformed change record")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Condvar;

    /// Ignores `close`; each run only returns once released.
    #[derive(Default)]
    struct StubbornEngine {
        released: Mutex<bool>,
        wakeup: Condvar
    }

    impl StubbornEngine {
        fn release(&self) {
            *self.released.lock() = true;
            self.wakeup.notify_all();
        }
    }

    impl CaptureEngine for StubbornEngine {
        fn run(&self, _emit: &dyn Fn(RawRecord)) -> Result<(), CaptureError> {
            let mut released = self.released.lock();
            while !*released {
                self.wakeup.wait(&mut released);
            }
            *released = false;
            Ok(())
        }

        fn close(&self) -> Result<(), CaptureError> {
            Ok(())
        }
    }

    fn insert_record(id: u32) -> RawRecord {
        RawRecord::new(
            None,
            Some(format!(
                r#"{{"op":"c","after":{{"id":{id}}},"source":{{"db":"inventory","table":"customers"}}}}"#
            ))
        )
    }

    fn running_lifecycle() -> Arc<Lifecycle> {
        let lifecycle = Arc::new(Lifecycle::new());
        assert!(lifecycle.set_state(AgentState::Starting));
        assert!(lifecycle.set_state(AgentState::Running));
        lifecycle
    }

    fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn test_publishes_while_running() {
        let engine = Arc::new(MemoryEngine::new());
        let adapter = CaptureAdapter::new(engine.clone(), running_lifecycle(), "mysql", 16);
        let mut stream = adapter.subscribe();

        adapter.start().unwrap();
        engine.push(insert_record(1));

        assert!(wait_for(|| !stream.is_empty()));
        let event = stream.try_recv().unwrap();
        assert_eq!(event.table.as_deref(), Some("customers"));
        assert_eq!(event.after.as_ref().unwrap()["id"], 1);

        adapter.stop();
    }

    #[test]
    fn test_drops_records_while_paused() {
        let engine = Arc::new(MemoryEngine::new());
        let lifecycle = running_lifecycle();
        assert!(lifecycle.set_state(AgentState::Paused));
        let adapter = CaptureAdapter::new(engine.clone(), lifecycle.clone(), "mysql", 16);
        let mut stream = adapter.subscribe();

        adapter.start().unwrap();
        engine.push(insert_record(1));
        assert!(wait_for(|| engine.emitted() == 1));

        assert!(lifecycle.set_state(AgentState::Running));
        engine.push(insert_record(2));
        assert!(wait_for(|| !stream.is_empty()));

        let event = stream.try_recv().unwrap();
        assert_eq!(event.after.as_ref().unwrap()["id"], 2);
        assert!(stream.try_recv().is_err());

        adapter.stop();
    }

    #[test]
    fn test_malformed_record_does_not_stop_capture() {
        let engine = Arc::new(MemoryEngine::new());
        let adapter = CaptureAdapter::new(engine.clone(), running_lifecycle(), "mysql", 16);
        let mut stream = adapter.subscribe();

        adapter.start().unwrap();
        engine.push(RawRecord::new(None, Some("{broken".to_string())));
        engine.push(insert_record(3));

        assert!(wait_for(|| !stream.is_empty()));
        assert_eq!(stream.try_recv().unwrap().after.as_ref().unwrap()["id"], 3);
        assert!(adapter.is_running());

        adapter.stop();
    }

    #[test]
    fn test_start_is_idempotent() {
        let engine = Arc::new(MemoryEngine::new());
        let adapter = CaptureAdapter::new(engine.clone(), running_lifecycle(), "mysql", 16);

        adapter.start().unwrap();
        adapter.start().unwrap();
        assert!(adapter.is_running());
        assert!(wait_for(|| engine.active_runs() == 1));

        adapter.stop();
        assert_eq!(engine.close_count(), 1);
    }

    #[test]
    fn test_stop_twice_closes_once() {
        let engine = Arc::new(MemoryEngine::new());
        let adapter = CaptureAdapter::new(engine.clone(), running_lifecycle(), "mysql", 16);

        adapter.start().unwrap();
        adapter.stop();
        adapter.stop();

        assert_eq!(engine.close_count(), 1);
        assert!(!adapter.is_running());
    }

    #[test]
    fn test_concurrent_stop_closes_once() {
        let engine = Arc::new(MemoryEngine::new());
        let adapter = Arc::new(CaptureAdapter::new(
            engine.clone(),
            running_lifecycle(),
            "mysql",
            16
        ));
        adapter.start().unwrap();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let adapter = Arc::clone(&adapter);
                std::thread::spawn(move || adapter.stop())
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(engine.close_count(), 1);
    }

    #[test]
    fn test_stop_without_start_is_a_no_op() {
        let engine = Arc::new(MemoryEngine::new());
        let adapter = CaptureAdapter::new(engine.clone(), running_lifecycle(), "mysql", 16);
        adapter.stop();
        assert_eq!(engine.close_count(), 0);
    }

    #[test]
    fn test_restart_after_stop() {
        let engine = Arc::new(MemoryEngine::new());
        let adapter = CaptureAdapter::new(engine.clone(), running_lifecycle(), "mysql", 16);
        let mut stream = adapter.subscribe();

        adapter.start().unwrap();
        adapter.stop();
        assert!(wait_for(|| engine.active_runs() == 0));

        adapter.start().unwrap();
        engine.push(insert_record(4));
        assert!(wait_for(|| !stream.is_empty()));
        assert_eq!(stream.try_recv().unwrap().after.as_ref().unwrap()["id"], 4);

        adapter.stop();
        assert_eq!(engine.close_count(), 2);
    }

    #[test]
    fn test_engine_failure_forces_lifecycle_out_of_running() {
        let engine = Arc::new(MemoryEngine::new());
        let lifecycle = running_lifecycle();
        let adapter = CaptureAdapter::new(engine.clone(), lifecycle.clone(), "mysql", 16);

        adapter.start().unwrap();
        engine.fail("binlog position lost");

        assert!(wait_for(|| lifecycle.state() == AgentState::Stopped));
        assert!(!adapter.is_running());

        // Already marked not-running, so stop does not close again.
        adapter.stop();
        assert_eq!(engine.close_count(), 0);
    }

    #[test]
    fn test_start_refuses_while_previous_run_is_stuck() {
        let engine = Arc::new(StubbornEngine::default());
        let adapter = CaptureAdapter::new(engine.clone(), running_lifecycle(), "mysql", 16)
            .with_restart_grace(Duration::from_millis(50));

        adapter.start().unwrap();
        adapter.stop();

        let began = Instant::now();
        let err = adapter.start().unwrap_err();
        assert!(matches!(err, CaptureError::PreviousRunActive { .. }));
        assert!(began.elapsed() < Duration::from_secs(2));
        assert!(!adapter.is_running());

        engine.release();
        assert!(wait_for(|| adapter.start().is_ok()));
        assert!(adapter.is_running());

        adapter.stop();
        engine.release();
    }
}
