use super::{CaptureEngine, RawRecord};
use errors::CaptureError;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Default)]
struct Queue {
    records: VecDeque<RawRecord>,
    failure: Option<String>,
    close_requested: bool
}

/// In-process capture engine fed through [`MemoryEngine::push`].
///
/// Useful for embedding the agent behind another capture mechanism and for
/// driving the pipeline deterministically in tests.
#[derive(Default)]
pub struct MemoryEngine {
    queue: Mutex<Queue>,
    wakeup: Condvar,
    close_count: AtomicUsize,
    active_runs: AtomicUsize,
    emitted: AtomicUsize
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, record: RawRecord) {
        self.queue.lock().records.push_back(record);
        self.wakeup.notify_all();
    }

    /// Makes the current or next `run` return `EngineFailed`.
    pub fn fail(&self, reason: impl Into<String>) {
        self.queue.lock().failure = Some(reason.into());
        self.wakeup.notify_all();
    }

    pub fn close_count(&self) -> usize {
        self.close_count.load(Ordering::SeqCst)
    }

    pub fn active_runs(&self) -> usize {
        self.active_runs.load(Ordering::SeqCst)
    }

    /// Records handed to the run-loop's emitter so far.
    pub fn emitted(&self) -> usize {
        self.emitted.load(Ordering::SeqCst)
    }
}

impl CaptureEngine for MemoryEngine {
    fn run(&self, emit: &dyn Fn(RawRecord)) -> Result<(), CaptureError> {
        self.active_runs.fetch_add(1, Ordering::SeqCst);
        let result = self.drain(emit);
        self.active_runs.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn close(&self) -> Result<(), CaptureError> {
        self.close_count.fetch_add(1, Ordering::SeqCst);
        self.queue.lock().close_requested = true;
        self.wakeup.notify_all();
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

impl MemoryEngine {
    fn drain(&self, emit: &dyn Fn(RawRecord)) -> Result<(), CaptureError> {
        let mut queue = self.queue.lock();
        loop {
            if queue.close_requested {
                queue.close_requested = false;
                return Ok(());
            }
            if let Some(reason) = queue.failure.take() {
                return Err(CaptureError::engine_failed(reason));
            }
            match queue.records.pop_front() {
                Some(record) => {
                    // The emitter must not run under the queue lock.
                    drop(queue);
                    emit(record);
                    self.emitted.fetch_add(1, Ordering::SeqCst);
                    queue = self.queue.lock();
                }
                None => self.wakeup.wait(&mut queue)
            }
        }
    }
}
