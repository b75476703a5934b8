//! Size-or-time batching of events for bulk consumers.
//!
//! Events enter through a bounded input queue and collect in a buffer that is
//! flushed when it reaches `batch_size` or when `timeout` has passed since the
//! previous flush, whichever happens first. Batches leave through a bounded
//! output channel. Neither side ever waits: a full input queue rejects the
//! event and a full output channel drops the batch.

use crate::error::BatcherError;
use crate::event::Event;
use crate::handler::{Handler, HandlerResult};
use parking_lot::Mutex;
use std::borrow::Cow;
use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

pub const DEFAULT_BATCH_SIZE: usize = 50;
pub const DEFAULT_BATCH_TIMEOUT: Duration = Duration::from_millis(100);
pub const DEFAULT_INPUT_CAPACITY: usize = 1024;
pub const DEFAULT_OUTPUT_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatcherConfig {
    /// Buffer length that triggers an immediate flush.
    pub batch_size: usize,
    /// Maximum time between flushes.
    pub timeout: Duration,
    pub input_capacity: usize,
    pub output_capacity: usize,
}

impl Default for BatcherConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            timeout: DEFAULT_BATCH_TIMEOUT,
            input_capacity: DEFAULT_INPUT_CAPACITY,
            output_capacity: DEFAULT_OUTPUT_CAPACITY,
        }
    }
}

impl BatcherConfig {
    /// # Errors
    /// Returns [`BatcherError::InvalidConfiguration`] naming the first zero field.
    pub fn validate(&self) -> Result<(), BatcherError> {
        let zero = if self.batch_size == 0 {
            Some("batch_size")
        } else if self.timeout.is_zero() {
            Some("timeout")
        } else if self.input_capacity == 0 {
            Some("input_capacity")
        } else if self.output_capacity == 0 {
            Some("output_capacity")
        } else {
            None
        };
        zero.map_or(Ok(()), |field| Err(invalid(field)))
    }
}

fn invalid(field: &'static str) -> BatcherError {
    BatcherError::InvalidConfiguration {
        message: Cow::Borrowed("value must be greater than zero"),
        context: Some(Cow::Borrowed(field)),
    }
}

/// A group of events emitted together, in arrival order.
///
/// `sequence` counts flushes that produced a batch, so a gap means a batch
/// was dropped on a full output channel.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub sequence: u64,
    pub events: Vec<Arc<Event>>,
}

impl Deref for Batch {
    type Target = [Arc<Event>];

    fn deref(&self) -> &Self::Target {
        &self.events
    }
}

impl IntoIterator for Batch {
    type Item = Arc<Event>;
    type IntoIter = std::vec::IntoIter<Arc<Event>>;

    fn into_iter(self) -> Self::IntoIter {
        self.events.into_iter()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatcherStats {
    /// Events taken into the input queue.
    pub accepted: u64,
    /// Events refused because the input queue was full or closed.
    pub rejected: u64,
    pub batches_emitted: u64,
    /// Batches lost to a full output channel.
    pub batches_dropped: u64,
}

#[derive(Debug)]
struct Buffer {
    events: Vec<Arc<Event>>,
    batch_size: usize,
    timeout: Duration,
    last_flush: Instant,
    next_sequence: u64,
    output: Option<mpsc::Sender<Batch>>,
}

#[derive(Debug)]
struct Shared {
    buffer: Mutex<Buffer>,
    accepted: AtomicU64,
    rejected: AtomicU64,
    emitted: AtomicU64,
    dropped: AtomicU64,
}

impl Shared {
    /// Appends one event and flushes when the buffer is full.
    fn push(&self, event: Arc<Event>) {
        let mut buffer = self.buffer.lock();
        buffer.events.push(event);
        if buffer.events.len() >= buffer.batch_size {
            self.flush_locked(&mut buffer);
        }
    }

    fn deadline(&self) -> Instant {
        let buffer = self.buffer.lock();
        buffer.last_flush + buffer.timeout
    }

    /// Timer path. The deadline may have moved since the timer was armed.
    fn flush_if_due(&self) {
        let mut buffer = self.buffer.lock();
        if Instant::now() >= buffer.last_flush + buffer.timeout {
            self.flush_locked(&mut buffer);
        }
    }

    fn flush(&self) {
        self.flush_locked(&mut self.buffer.lock());
    }

    // Sending under the buffer lock keeps batches in flush order.
    fn flush_locked(&self, buffer: &mut Buffer) {
        buffer.last_flush = Instant::now();
        if buffer.events.is_empty() {
            return;
        }
        let events = std::mem::replace(&mut buffer.events, Vec::with_capacity(buffer.batch_size));
        let sequence = buffer.next_sequence;
        buffer.next_sequence += 1;
        let len = events.len();

        let Some(output) = buffer.output.as_ref() else {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            debug!(sequence, len, "Batcher output closed; batch dropped");
            return;
        };
        match output.try_send(Batch { sequence, events }) {
            Ok(()) => {
                self.emitted.fetch_add(1, Ordering::Relaxed);
                trace!(sequence, len, "Batch emitted");
            },
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(sequence, len, "Batch output full; batch dropped");
            },
            Err(TrySendError::Closed(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                debug!(sequence, len, "Batch receiver gone; batch dropped");
            },
        }
    }

    fn close_output(&self) {
        self.buffer.lock().output = None;
    }
}

#[derive(Debug)]
struct BatcherInner {
    input: mpsc::Sender<Arc<Event>>,
    shared: Arc<Shared>,
    output: Mutex<Option<mpsc::Receiver<Batch>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    cancel: CancellationToken,
}

/// Groups events into [`Batch`]es by size or time.
///
/// # Examples
/// ```rust
/// use pulse_events::{BatcherConfig, Event, EventBatcher, KeyInput};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), pulse_events::BatcherError> {
/// let batcher = EventBatcher::start(BatcherConfig { batch_size: 2, ..Default::default() })?;
/// let mut output = batcher.output()?;
///
/// batcher.add(Event::key_input(KeyInput::new("a")));
/// batcher.add(Event::key_input(KeyInput::new("b")));
///
/// let batch = output.recv().await.unwrap();
/// assert_eq!(batch.len(), 2);
/// batcher.stop().await;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct EventBatcher {
    inner: Arc<BatcherInner>,
}

impl EventBatcher {
    /// Validates `config` and spawns the batching worker on the current runtime.
    ///
    /// # Errors
    /// * [`BatcherError::InvalidConfiguration`] for zero sizes or timeout.
    /// * [`BatcherError::Runtime`] outside a Tokio runtime.
    pub fn start(config: BatcherConfig) -> Result<Self, BatcherError> {
        config.validate()?;
        let runtime = Handle::try_current().map_err(|err| BatcherError::Runtime {
            message: err.to_string().into(),
            context: Some(Cow::Borrowed("EventBatcher::start")),
        })?;

        let (input, receiver) = mpsc::channel(config.input_capacity);
        let (output_tx, output_rx) = mpsc::channel(config.output_capacity);
        let shared = Arc::new(Shared {
            buffer: Mutex::new(Buffer {
                events: Vec::with_capacity(config.batch_size),
                batch_size: config.batch_size,
                timeout: config.timeout,
                last_flush: Instant::now(),
                next_sequence: 0,
                output: Some(output_tx),
            }),
            accepted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            emitted: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        });
        let cancel = CancellationToken::new();
        let worker = runtime.spawn(run(receiver, Arc::clone(&shared), cancel.clone()));

        info!(
            batch_size = config.batch_size,
            timeout_ms = u64::try_from(config.timeout.as_millis()).unwrap_or(u64::MAX),
            "Event batcher started"
        );
        Ok(Self {
            inner: Arc::new(BatcherInner {
                input,
                shared,
                output: Mutex::new(Some(output_rx)),
                worker: Mutex::new(Some(worker)),
                cancel,
            }),
        })
    }

    /// Offers an event without waiting. Returns `false` if it was dropped
    /// because the input queue is full or the batcher has stopped.
    pub fn add(&self, event: impl Into<Arc<Event>>) -> bool {
        let shared = &self.inner.shared;
        match self.inner.input.try_send(event.into()) {
            Ok(()) => {
                shared.accepted.fetch_add(1, Ordering::Relaxed);
                true
            },
            Err(TrySendError::Full(event)) => {
                shared.rejected.fetch_add(1, Ordering::Relaxed);
                warn!(event_id = %event.id(), "Batcher input full; event dropped");
                false
            },
            Err(TrySendError::Closed(event)) => {
                shared.rejected.fetch_add(1, Ordering::Relaxed);
                debug!(event_id = %event.id(), "Batcher stopped; event dropped");
                false
            },
        }
    }

    /// Emits whatever is buffered now. An empty buffer emits nothing.
    pub fn flush(&self) {
        self.inner.shared.flush();
    }

    /// Hands out the batch stream. It ends after [`stop`](Self::stop).
    ///
    /// # Errors
    /// Returns [`BatcherError::OutputTaken`] on every call after the first.
    pub fn output(&self) -> Result<mpsc::Receiver<Batch>, BatcherError> {
        self.inner.output.lock().take().ok_or_else(|| BatcherError::OutputTaken {
            message: Cow::Borrowed("the batch receiver has a single owner"),
            context: None,
        })
    }

    /// Stops the worker, waits for it to exit, emits a final batch with any
    /// remaining events and closes the output stream. Idempotent.
    pub async fn stop(&self) {
        self.inner.cancel.cancel();
        let worker = self.inner.worker.lock().take();
        if let Some(worker) = worker {
            if let Err(err) = worker.await {
                warn!(error = %err, "Batcher worker ended abnormally");
            }
            info!("Event batcher stopped");
        }
        self.inner.shared.flush();
        self.inner.shared.close_output();
    }

    /// # Errors
    /// Returns [`BatcherError::InvalidConfiguration`] for zero.
    pub fn set_batch_size(&self, batch_size: usize) -> Result<(), BatcherError> {
        if batch_size == 0 {
            return Err(invalid("batch_size"));
        }
        let shared = &self.inner.shared;
        let mut buffer = shared.buffer.lock();
        buffer.batch_size = batch_size;
        if buffer.events.len() >= batch_size {
            shared.flush_locked(&mut buffer);
        }
        debug!(batch_size, "Batch size updated");
        Ok(())
    }

    /// Takes effect from the next timer check; the current deadline is
    /// recomputed from the last flush.
    ///
    /// # Errors
    /// Returns [`BatcherError::InvalidConfiguration`] for a zero duration.
    pub fn set_timeout(&self, timeout: Duration) -> Result<(), BatcherError> {
        if timeout.is_zero() {
            return Err(invalid("timeout"));
        }
        self.inner.shared.buffer.lock().timeout = timeout;
        debug!(?timeout, "Batch timeout updated");
        Ok(())
    }

    #[must_use]
    pub fn batch_size(&self) -> usize {
        self.inner.shared.buffer.lock().batch_size
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.inner.shared.buffer.lock().timeout
    }

    /// Events waiting in the buffer for the next flush.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.inner.shared.buffer.lock().events.len()
    }

    #[must_use]
    pub fn stats(&self) -> BatcherStats {
        let shared = &self.inner.shared;
        BatcherStats {
            accepted: shared.accepted.load(Ordering::Relaxed),
            rejected: shared.rejected.load(Ordering::Relaxed),
            batches_emitted: shared.emitted.load(Ordering::Relaxed),
            batches_dropped: shared.dropped.load(Ordering::Relaxed),
        }
    }

    /// A bus handler feeding this batcher. A rejected event is logged by the
    /// batcher and is not a handler failure.
    #[must_use]
    pub fn handler(&self) -> impl Handler {
        let batcher = self.clone();
        move |event: Arc<Event>| {
            batcher.add(event);
            std::future::ready(HandlerResult::Ok(()))
        }
    }
}

async fn run(
    mut input: mpsc::Receiver<Arc<Event>>,
    shared: Arc<Shared>,
    cancel: CancellationToken,
) {
    loop {
        let deadline = shared.deadline();
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            next = input.recv() => match next {
                Some(event) => shared.push(event),
                None => break,
            },
            () = tokio::time::sleep_until(deadline) => shared.flush_if_due(),
        }
    }

    // Whatever was accepted before shutdown still gets batched.
    input.close();
    while let Ok(event) = input.try_recv() {
        shared.push(event);
    }
    shared.flush();
    debug!("Batcher worker exited");
}
