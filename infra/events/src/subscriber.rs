//! Subscriber records and their delivery workers.
//!
//! ```text
//! publish ──► [bounded queue] ──► worker task ──► middleware ──► handler
//!             (drop on full)         └─ exits on unsubscribe, once-delivery or stop
//! ```

use crate::bus::BusInner;
use crate::event::{Event, Topic};
use crate::handler::{BoxHandler, BoxPredicate, Opaque};
use crate::id::SubscriberId;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Point-in-time delivery counters for one subscriber.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscriberStats {
    /// Events accepted into the queue.
    pub enqueued: u64,
    /// Events lost to a full queue or discarded when the worker exited.
    pub dropped: u64,
    /// Handler invocations that returned `Ok`.
    pub delivered: u64,
    /// Handler invocations that returned an error.
    pub failed: u64,
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    enqueued: AtomicU64,
    dropped: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
}

impl Counters {
    pub(crate) fn snapshot(&self) -> SubscriberStats {
        SubscriberStats {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Handler outcomes summed over every subscriber the bus ever had.
#[derive(Debug, Default)]
pub(crate) struct DeliveryTotals {
    pub(crate) delivered: AtomicU64,
    pub(crate) failed: AtomicU64,
}

/// Result of a non-blocking enqueue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Offer {
    Enqueued,
    Full,
    Closed,
}

/// A registered subscriber. Owned by the bus registry; its queue receiver is
/// owned by the worker.
pub(crate) struct Subscriber {
    pub(crate) id: SubscriberId,
    pub(crate) topic: Topic,
    pub(crate) once: bool,
    predicate: Option<BoxPredicate>,
    sender: mpsc::Sender<Arc<Event>>,
    cancel: CancellationToken,
    pub(crate) counters: Counters,
}

impl fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriber")
            .field("id", &self.id)
            .field("topic", &self.topic)
            .field("once", &self.once)
            .field("predicate", &self.predicate.as_ref().map(|_| Opaque("predicate")))
            .field("counters", &self.counters)
            .finish_non_exhaustive()
    }
}

impl Subscriber {
    pub(crate) fn new(
        topic: Topic,
        predicate: Option<BoxPredicate>,
        once: bool,
        capacity: usize,
        cancel: CancellationToken,
    ) -> (Self, mpsc::Receiver<Arc<Event>>) {
        let (sender, receiver) = mpsc::channel(capacity);
        let subscriber = Self {
            id: SubscriberId::generate(),
            topic,
            once,
            predicate,
            sender,
            cancel,
            counters: Counters::default(),
        };
        (subscriber, receiver)
    }

    /// Evaluates the publish-time predicate, if any.
    pub(crate) fn accepts(&self, event: &Event) -> bool {
        self.predicate.as_ref().is_none_or(|predicate| predicate.test(event))
    }

    /// Enqueues without waiting. A full queue drops the event for this
    /// subscriber only.
    pub(crate) fn offer(&self, event: Arc<Event>) -> Offer {
        match self.sender.try_send(event) {
            Ok(()) => {
                self.counters.enqueued.fetch_add(1, Ordering::Relaxed);
                Offer::Enqueued
            },
            Err(TrySendError::Full(event)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    subscriber = %self.id,
                    event_id = %event.id(),
                    event_type = %event.event_type(),
                    "Subscriber queue full; event dropped"
                );
                Offer::Full
            },
            Err(TrySendError::Closed(event)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                trace!(subscriber = %self.id, event_id = %event.id(), "Subscriber queue closed");
                Offer::Closed
            },
        }
    }

    /// Moves the subscriber to its terminal state.
    pub(crate) fn terminate(&self) {
        self.cancel.cancel();
    }
}

/// Drains one subscriber's queue on its own task.
pub(crate) struct Worker {
    pub(crate) subscriber: Arc<Subscriber>,
    pub(crate) handler: BoxHandler,
    pub(crate) receiver: mpsc::Receiver<Arc<Event>>,
    pub(crate) bus: Weak<BusInner>,
    pub(crate) totals: Arc<DeliveryTotals>,
}

impl Worker {
    pub(crate) async fn run(mut self) {
        let subscriber = Arc::clone(&self.subscriber);
        let mut composed: Option<(u64, BoxHandler)> = None;

        loop {
            // Cancellation wins over a ready queue: after stop or unsubscribe at
            // most the event already in hand is processed.
            let event = tokio::select! {
                biased;
                () = subscriber.cancel.cancelled() => break,
                next = self.receiver.recv() => match next {
                    Some(event) => event,
                    None => break,
                },
            };

            let Some(bus) = self.bus.upgrade() else {
                break;
            };
            let handler = bus.composed_handler(&self.handler, &mut composed);
            drop(bus);

            let event_id = event.id().clone();
            match handler.call(event).await {
                Ok(()) => {
                    subscriber.counters.delivered.fetch_add(1, Ordering::Relaxed);
                    self.totals.delivered.fetch_add(1, Ordering::Relaxed);
                    trace!(subscriber = %subscriber.id, event_id = %event_id, "Event delivered");
                    if subscriber.once {
                        if let Some(bus) = self.bus.upgrade() {
                            bus.unregister(&subscriber.id, "once delivery");
                        }
                        break;
                    }
                },
                Err(err) => {
                    subscriber.counters.failed.fetch_add(1, Ordering::Relaxed);
                    self.totals.failed.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        subscriber = %subscriber.id,
                        event_id = %event_id,
                        panicked = err.is_panic(),
                        error = %err,
                        "Subscriber handler failed"
                    );
                },
            }
        }

        self.receiver.close();
        let mut discarded = 0u64;
        while self.receiver.try_recv().is_ok() {
            discarded += 1;
        }
        if discarded > 0 {
            subscriber.counters.dropped.fetch_add(discarded, Ordering::Relaxed);
        }
        debug!(subscriber = %subscriber.id, discarded, "Subscriber worker exited");
    }
}
