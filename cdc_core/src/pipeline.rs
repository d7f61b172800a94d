//! Admission-controlled, parallel delivery of captured events.
//!
//! A reader task drains the capture stream and deals events round-robin to
//! a fixed set of admission rails. Each rail counts the event, applies the
//! admission rules and spawns the delivery as its own task, so a slow remote
//! never stalls stream consumption. No ordering is preserved.

use crate::event::ChangeEvent;
use crate::delivery::EventSink;
use crate::lifecycle::Lifecycle;
use metrics::{counter, gauge};
use parking_lot::Mutex;
use serde::Serialize;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const RAIL_CAPACITY: usize = 1024;

/// Point-in-time copy of the pipeline counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PipelineMetrics {
    pub events_seen: u64,
    pub events_succeeded: u64,
    pub events_failed: u64,
    /// Events overwritten in the stream before the reader got to them.
    pub events_lagged: u64,
    pub in_flight: u64
}

#[derive(Default)]
struct Counters {
    seen: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    lagged: AtomicU64,
    in_flight: AtomicUsize
}

struct Shared {
    lifecycle: Arc<Lifecycle>,
    sink: Arc<dyn EventSink>,
    max_in_flight: usize,
    counters: Counters
}

/// Releases one in-flight slot when the delivery task ends, even on panic.
struct InFlightSlot(Arc<Shared>);

impl Drop for InFlightSlot {
    fn drop(&mut self) {
        self.0.counters.in_flight.fetch_sub(1, Ordering::SeqCst);
        gauge!("cdc.requests.inflight").decrement(1.0);
    }
}

pub struct PipelineCoordinator {
    shared: Arc<Shared>,
    rails: usize,
    reader: Mutex<Option<JoinHandle<()>>>
}

impl PipelineCoordinator {
    pub fn new(lifecycle: Arc<Lifecycle>, sink: Arc<dyn EventSink>, max_in_flight: usize) -> Self {
        let rails = std::thread::available_parallelism()
            .map(NonZeroUsize::get)
            .unwrap_or(1);
        Self {
            shared: Arc::new(Shared {
                lifecycle,
                sink,
                max_in_flight,
                counters: Counters::default()
            }),
            rails,
            reader: Mutex::new(None)
        }
    }

    /// Overrides the number of admission rails.
    #[must_use]
    pub fn with_rails(mut self, rails: usize) -> Self {
        self.rails = rails.max(1);
        self
    }

    /// Starts consuming `stream`. Must be called from within a Tokio runtime;
    /// only the first call has an effect.
    pub fn attach(&self, stream: broadcast::Receiver<Arc<ChangeEvent>>) {
        let mut reader = self.reader.lock();
        if reader.is_some() {
            warn!("Pipeline already attached to a change stream");
            return;
        }

        let rails: Vec<_> = (0..self.rails)
            .map(|rail| {
                let (tx, rx) = mpsc::channel(RAIL_CAPACITY);
                tokio::spawn(run_rail(Arc::clone(&self.shared), rail, rx));
                tx
            })
            .collect();

        *reader = Some(tokio::spawn(read_stream(
            Arc::clone(&self.shared),
            stream,
            rails
        )));
        info!(rails = self.rails, max_in_flight = self.shared.max_in_flight, "Pipeline attached");
    }

    pub fn metrics(&self) -> PipelineMetrics {
        let counters = &self.shared.counters;
        PipelineMetrics {
            events_seen: counters.seen.load(Ordering::SeqCst),
            events_succeeded: counters.succeeded.load(Ordering::SeqCst),
            events_failed: counters.failed.load(Ordering::SeqCst),
            events_lagged: counters.lagged.load(Ordering::SeqCst),
            in_flight: counters.in_flight.load(Ordering::SeqCst) as u64
        }
    }

    pub fn rails(&self) -> usize {
        self.rails
    }
}

impl Drop for PipelineCoordinator {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.lock().take() {
            reader.abort();
        }
    }
}

async fn read_stream(
    shared: Arc<Shared>,
    mut stream: broadcast::Receiver<Arc<ChangeEvent>>,
    rails: Vec<mpsc::Sender<Arc<ChangeEvent>>>
) {
    let mut next = 0usize;
    loop {
        match stream.recv().await {
            Ok(event) => {
                let rail = &rails[next % rails.len()];
                next = next.wrapping_add(1);
                if rail.send(event).await.is_err() {
                    error!("Admission rail closed, stopping stream reader");
                    return;
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Pipeline fell behind the change stream, events lost");
                shared.counters.lagged.fetch_add(skipped, Ordering::SeqCst);
                counter!("cdc.events.lagged").increment(skipped);
            }
            Err(broadcast::error::RecvError::Closed) => {
                info!("Change stream closed");
                return;
            }
        }
    }
}

async fn run_rail(shared: Arc<Shared>, rail: usize, mut events: mpsc::Receiver<Arc<ChangeEvent>>) {
    while let Some(event) = events.recv().await {
        admit(&shared, rail, event);
    }
    debug!(rail, "Admission rail finished");
}

fn admit(shared: &Arc<Shared>, rail: usize, event: Arc<ChangeEvent>) {
    let counters = &shared.counters;
    counters.seen.fetch_add(1, Ordering::SeqCst);
    counter!("cdc.events.processed").increment(1);

    if !shared.lifecycle.is_running() {
        debug!(event_id = %event.id, state = %shared.lifecycle.state(), "Rejected event: agent not running");
        return;
    }

    // Load then increment: concurrent rails may overshoot the limit slightly.
    if counters.in_flight.load(Ordering::SeqCst) >= shared.max_in_flight {
        warn!(event_id = %event.id, max_in_flight = shared.max_in_flight, "Rejected event: in-flight limit reached");
        return;
    }
    counters.in_flight.fetch_add(1, Ordering::SeqCst);
    gauge!("cdc.requests.inflight").increment(1.0);

    let slot = InFlightSlot(Arc::clone(shared));
    tokio::spawn(async move {
        let shared = Arc::clone(&slot.0);
        debug!(event_id = %event.id, rail, "Dispatching event");
        let delivered = shared.sink.send(event).await;
        drop(slot);

        if delivered {
            shared.counters.succeeded.fetch_add(1, Ordering::SeqCst);
            counter!("cdc.events.success").increment(1);
        } else {
            shared.counters.failed.fetch_add(1, Ordering::SeqCst);
            counter!("cdc.events.failed").increment(1);
        }
    });
}
