use crate::error::EventBusError;
use crate::event::{Event, EventContext, EventType, Topic};
use crate::handler::{BoxHandler, BoxPredicate, Handler, Opaque, Predicate};
use crate::id::SubscriberId;
use crate::middleware::{Layers, Middleware, admit_all, compose};
use crate::subscriber::{DeliveryTotals, Offer, Subscriber, SubscriberStats, Worker};
use fxhash::FxHashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, trace, warn};

/// A safe default for subscriber queues.
/// 128 absorbs short bursts of input events without unbounded growth.
pub const DEFAULT_QUEUE_CAPACITY: usize = 128;
const MIN_CAPACITY: usize = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventBusConfig {
    /// Bound of every subscriber queue.
    pub queue_capacity: usize,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self { queue_capacity: DEFAULT_QUEUE_CAPACITY }
    }
}

/// Bus-wide counters. Per-subscriber numbers live in [`SubscriberStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BusStats {
    pub published: u64,
    /// Publishes rejected by middleware admission.
    pub filtered: u64,
    /// Successful enqueues, summed over subscribers.
    pub enqueued: u64,
    /// Enqueues lost to full or closed queues.
    pub dropped: u64,
    /// Handler invocations that returned `Ok`.
    pub delivered: u64,
    /// Handler invocations that returned an error or panicked under `Recovery`.
    pub failed: u64,
    pub active_subscribers: usize,
}

#[derive(Debug, Default)]
struct BusCounters {
    published: AtomicU64,
    filtered: AtomicU64,
    enqueued: AtomicU64,
    dropped: AtomicU64,
}

#[derive(Debug, Default)]
struct Registry {
    typed: FxHashMap<EventType, Vec<Arc<Subscriber>>>,
    wildcard: Vec<Arc<Subscriber>>,
    index: FxHashMap<SubscriberId, Arc<Subscriber>>,
}

impl Registry {
    fn insert(&mut self, subscriber: Arc<Subscriber>) {
        match &subscriber.topic {
            Topic::All => self.wildcard.push(Arc::clone(&subscriber)),
            Topic::Type(t) => {
                self.typed.entry(t.clone()).or_default().push(Arc::clone(&subscriber));
            },
        }
        self.index.insert(subscriber.id.clone(), subscriber);
    }

    fn remove(&mut self, id: &SubscriberId) -> Option<Arc<Subscriber>> {
        let subscriber = self.index.remove(id)?;
        match &subscriber.topic {
            Topic::All => self.wildcard.retain(|s| s.id != *id),
            Topic::Type(t) => {
                if let Some(list) = self.typed.get_mut(t) {
                    list.retain(|s| s.id != *id);
                    if list.is_empty() {
                        self.typed.remove(t);
                    }
                }
            },
        }
        Some(subscriber)
    }

    /// Type subscribers first, then wildcard subscribers, each in registration order.
    fn matching(&self, event_type: &EventType) -> Vec<Arc<Subscriber>> {
        let typed = self.typed.get(event_type).map_or(&[][..], Vec::as_slice);
        typed.iter().chain(&self.wildcard).cloned().collect()
    }

    fn drain(&mut self) -> Vec<Arc<Subscriber>> {
        self.typed.clear();
        self.wildcard.clear();
        self.index.drain().map(|(_, subscriber)| subscriber).collect()
    }
}

struct MiddlewareStack {
    layers: Layers,
    generation: u64,
}

type ContextProvider = Arc<dyn Fn() -> Option<EventContext> + Send + Sync>;

pub(crate) struct BusInner {
    registry: RwLock<Registry>,
    middleware: RwLock<MiddlewareStack>,
    context_provider: RwLock<Option<ContextProvider>>,
    queue_capacity: usize,
    runtime: Option<Handle>,
    stopped: AtomicBool,
    shutdown: CancellationToken,
    workers: TaskTracker,
    counters: BusCounters,
    totals: Arc<DeliveryTotals>,
}

impl fmt::Debug for BusInner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BusInner")
            .field("subscribers", &self.registry.read().index.len())
            .field("middleware", &self.middleware.read().layers.len())
            .field("context_provider", &self.context_provider.read().as_ref().map(|_| Opaque("fn")))
            .field("queue_capacity", &self.queue_capacity)
            .field("stopped", &self.stopped.load(Ordering::Relaxed))
            .field("workers", &self.workers.len())
            .finish_non_exhaustive()
    }
}

impl Drop for BusInner {
    // Workers only hold a weak reference to the bus.
    fn drop(&mut self) {
        if !self.shutdown.is_cancelled() {
            debug!("Event bus dropped without stop, cancelling workers");
            self.shutdown.cancel();
        }
    }
}

impl BusInner {
    /// Returns the handler wrapped in the current middleware stack, reusing
    /// `cache` until the stack changes.
    pub(crate) fn composed_handler(
        &self,
        handler: &BoxHandler,
        cache: &mut Option<(u64, BoxHandler)>,
    ) -> BoxHandler {
        let stack = self.middleware.read();
        if let Some((generation, composed)) = cache.as_ref()
            && *generation == stack.generation
        {
            return Arc::clone(composed);
        }
        let composed = compose(handler, &stack.layers);
        *cache = Some((stack.generation, Arc::clone(&composed)));
        composed
    }

    /// Removes a subscriber and signals its worker. Returns `false` when the
    /// id is unknown.
    pub(crate) fn unregister(&self, id: &SubscriberId, reason: &'static str) -> bool {
        let removed = self.registry.write().remove(id);
        match removed {
            Some(subscriber) => {
                subscriber.terminate();
                debug!(subscriber = %id, topic = %subscriber.topic, reason, "Subscriber removed");
                true
            },
            None => {
                debug!(subscriber = %id, reason, "Unsubscribe for unknown subscriber ignored");
                false
            },
        }
    }
}

/// In-process publish/subscribe bus keyed by [`EventType`].
///
/// Every subscriber owns a bounded queue drained by its own worker task, so a
/// slow handler only ever delays itself. `publish` never waits: when a queue is
/// full the event is dropped for that subscriber alone and a warning is logged.
///
/// The bus is a cheap handle; clones share the same registry. Dropping the
/// last handle cancels every worker, discarding queued events, without
/// waiting for them.
///
/// # Examples
/// ```rust
/// use pulse_events::{Event, EventBus, EventType, HandlerResult, KeyInput};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), pulse_events::EventBusError> {
/// let bus = EventBus::new();
/// let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
///
/// bus.subscribe(EventType::KeyInput, move |event: Arc<Event>| {
///     let tx = tx.clone();
///     async move {
///         let _ = tx.send(event.id().clone());
///         HandlerResult::Ok(())
///     }
/// })?;
///
/// let event = Event::key_input(KeyInput::new("K"));
/// let id = event.id().clone();
/// bus.publish(event)?;
///
/// assert_eq!(rx.recv().await, Some(id));
/// bus.stop(Duration::from_secs(1)).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::build(DEFAULT_QUEUE_CAPACITY)
    }
}

impl EventBus {
    /// Creates a bus with [`DEFAULT_QUEUE_CAPACITY`].
    ///
    /// When called inside a Tokio runtime, that runtime hosts the workers of
    /// every later subscription, including ones made from plain threads.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// # Errors
    /// Returns [`EventBusError::InvalidCapacity`] if `queue_capacity` is zero.
    pub fn with_capacity(queue_capacity: usize) -> Result<Self, EventBusError> {
        if queue_capacity < MIN_CAPACITY {
            return Err(EventBusError::InvalidCapacity {
                message: format!("queue capacity must be >= {MIN_CAPACITY}").into(),
                context: Some(Cow::Borrowed("EventBus::with_capacity")),
            });
        }
        Ok(Self::build(queue_capacity))
    }

    /// # Errors
    /// Returns [`EventBusError::InvalidCapacity`] if the configured capacity is zero.
    pub fn with_config(config: &EventBusConfig) -> Result<Self, EventBusError> {
        Self::with_capacity(config.queue_capacity)
    }

    fn build(queue_capacity: usize) -> Self {
        Self {
            inner: Arc::new(BusInner {
                registry: RwLock::new(Registry::default()),
                middleware: RwLock::new(MiddlewareStack {
                    layers: Vec::new().into(),
                    generation: 0,
                }),
                context_provider: RwLock::new(None),
                queue_capacity,
                runtime: Handle::try_current().ok(),
                stopped: AtomicBool::new(false),
                shutdown: CancellationToken::new(),
                workers: TaskTracker::new(),
                counters: BusCounters::default(),
                totals: Arc::new(DeliveryTotals::default()),
            }),
        }
    }

    /// Registers `handler` for every event matching `topic`.
    ///
    /// # Errors
    /// * [`EventBusError::Stopped`] after [`stop`](Self::stop).
    /// * [`EventBusError::InvalidTopic`] for an empty, reserved or
    ///   non-canonical custom type (see [`EventType::parse`]).
    /// * [`EventBusError::Runtime`] when no Tokio runtime can host the worker.
    pub fn subscribe(
        &self,
        topic: impl Into<Topic>,
        handler: impl Handler,
    ) -> Result<SubscriberId, EventBusError> {
        self.register(topic.into(), Arc::new(handler), None, false)
    }

    /// Like [`subscribe`](Self::subscribe), but only events for which
    /// `predicate` returns `true` are enqueued. The predicate runs on the
    /// publisher's task.
    ///
    /// # Errors
    /// Same as [`subscribe`](Self::subscribe).
    pub fn subscribe_with_filter(
        &self,
        topic: impl Into<Topic>,
        handler: impl Handler,
        predicate: impl Predicate,
    ) -> Result<SubscriberId, EventBusError> {
        self.register(topic.into(), Arc::new(handler), Some(Arc::new(predicate)), false)
    }

    /// Registers a handler that is removed after its first successful
    /// delivery. Failed deliveries keep the subscription alive.
    ///
    /// # Errors
    /// Same as [`subscribe`](Self::subscribe).
    pub fn subscribe_once(
        &self,
        topic: impl Into<Topic>,
        handler: impl Handler,
    ) -> Result<SubscriberId, EventBusError> {
        self.register(topic.into(), Arc::new(handler), None, true)
    }

    fn register(
        &self,
        topic: Topic,
        handler: BoxHandler,
        predicate: Option<BoxPredicate>,
        once: bool,
    ) -> Result<SubscriberId, EventBusError> {
        if let Topic::Type(t) = &topic {
            t.validate()?;
        }
        let runtime = self.runtime()?;
        let inner = &self.inner;

        let (subscriber, receiver) = Subscriber::new(
            topic,
            predicate,
            once,
            inner.queue_capacity,
            inner.shutdown.child_token(),
        );
        let subscriber = Arc::new(subscriber);

        {
            let mut registry = inner.registry.write();
            // Checked under the lock so a concurrent stop cannot miss this entry.
            if inner.stopped.load(Ordering::Acquire) {
                return Err(EventBusError::Stopped {
                    message: Cow::Borrowed("subscribe rejected"),
                    context: None,
                });
            }
            registry.insert(Arc::clone(&subscriber));
        }

        let id = subscriber.id.clone();
        info!(subscriber = %id, topic = %subscriber.topic, once, "Subscriber registered");

        let worker = Worker {
            subscriber,
            handler,
            receiver,
            bus: Arc::downgrade(&self.inner),
            totals: Arc::clone(&inner.totals),
        };
        inner.workers.spawn_on(worker.run(), &runtime);
        Ok(id)
    }

    /// Removes a subscriber. Events still queued for it are discarded; an
    /// event already being handled runs to completion.
    ///
    /// Unknown ids are ignored. Returns whether a subscriber was removed.
    pub fn unsubscribe(&self, id: &SubscriberId) -> bool {
        self.inner.unregister(id, "unsubscribe")
    }

    /// Fans `event` out to every matching subscriber without waiting.
    ///
    /// The middleware admission chain runs once first; a rejected event is
    /// not an error. Full subscriber queues drop the event for that
    /// subscriber only.
    ///
    /// # Errors
    /// Returns [`EventBusError::Stopped`] after [`stop`](Self::stop).
    pub fn publish(&self, mut event: Event) -> Result<(), EventBusError> {
        let inner = &self.inner;
        if inner.stopped.load(Ordering::Acquire) {
            return Err(EventBusError::stopped());
        }
        inner.counters.published.fetch_add(1, Ordering::Relaxed);

        if event.context().is_none() {
            let provider = inner.context_provider.read().clone();
            if let Some(provider) = provider {
                event.attach_context_if_missing(provider());
            }
        }
        let event = Arc::new(event);

        let layers = Arc::clone(&inner.middleware.read().layers);
        if !admit_all(&layers, &event) {
            inner.counters.filtered.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        }

        let targets = inner.registry.read().matching(event.event_type());
        let mut enqueued = 0u64;
        let mut dropped = 0u64;
        for subscriber in &targets {
            if !subscriber.accepts(&event) {
                continue;
            }
            match subscriber.offer(Arc::clone(&event)) {
                Offer::Enqueued => enqueued += 1,
                Offer::Full | Offer::Closed => dropped += 1,
            }
        }
        inner.counters.enqueued.fetch_add(enqueued, Ordering::Relaxed);
        inner.counters.dropped.fetch_add(dropped, Ordering::Relaxed);
        trace!(
            event_id = %event.id(),
            event_type = %event.event_type(),
            matched = targets.len(),
            enqueued,
            dropped,
            "Event published"
        );
        Ok(())
    }

    /// Publishes from a detached task and returns immediately.
    ///
    /// Ordering relative to other publishes is not guaranteed. Rejections
    /// (for example after `stop`) are logged, not returned.
    pub fn publish_async(&self, event: Event) {
        let Ok(runtime) = self.runtime() else {
            warn!(event_id = %event.id(), "No runtime for asynchronous publish; event dropped");
            return;
        };
        let bus = self.clone();
        runtime.spawn(async move {
            if let Err(err) = bus.publish(event) {
                debug!(error = %err, "Asynchronous publish rejected");
            }
        });
    }

    /// Appends a middleware. It applies to every subscriber, existing ones
    /// included, starting with the next event they process.
    pub fn use_middleware(&self, middleware: impl Middleware) {
        self.use_shared_middleware(Arc::new(middleware));
    }

    /// Appends a middleware that is also held elsewhere.
    pub fn use_shared_middleware(&self, middleware: Arc<dyn Middleware>) {
        let name = middleware.name();
        let mut stack = self.inner.middleware.write();
        let mut layers = stack.layers.to_vec();
        layers.push(middleware);
        stack.layers = layers.into();
        stack.generation += 1;
        debug!(middleware = name, depth = stack.layers.len(), "Middleware installed");
    }

    /// Installs a function that supplies [`EventContext`] for published events
    /// that do not carry one.
    pub fn set_context_provider<F>(&self, provider: F)
    where
        F: Fn() -> Option<EventContext> + Send + Sync + 'static,
    {
        *self.inner.context_provider.write() = Some(Arc::new(provider));
    }

    pub fn clear_context_provider(&self) {
        *self.inner.context_provider.write() = None;
    }

    /// Stops the bus and waits up to `timeout` for subscriber workers to exit.
    ///
    /// Publishing fails from the moment this is called. Queued but unprocessed
    /// events are discarded. Calling it again is harmless.
    ///
    /// # Errors
    /// Returns [`EventBusError::StopTimeout`] if workers are still running at
    /// the deadline. They keep winding down in the background.
    pub async fn stop(&self, timeout: Duration) -> Result<(), EventBusError> {
        let inner = &self.inner;
        let first = !inner.stopped.swap(true, Ordering::AcqRel);

        let removed = inner.registry.write().drain();
        inner.shutdown.cancel();
        inner.workers.close();
        if first {
            info!(subscribers = removed.len(), ?timeout, "Stopping event bus");
        }
        drop(removed);

        if tokio::time::timeout(timeout, inner.workers.wait()).await.is_err() {
            let pending = inner.workers.len();
            warn!(pending, ?timeout, "Event bus workers did not exit before the deadline");
            return Err(EventBusError::StopTimeout {
                message: format!("{pending} worker(s) still running after {timeout:?}").into(),
                context: None,
            });
        }
        if first {
            info!("Event bus stopped");
        }
        Ok(())
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn has_subscriber(&self, id: &SubscriberId) -> bool {
        self.inner.registry.read().index.contains_key(id)
    }

    /// Number of registered subscribers, or of those on `topic` when given.
    #[must_use]
    pub fn subscriber_count(&self, topic: Option<&Topic>) -> usize {
        let registry = self.inner.registry.read();
        match topic {
            None => registry.index.len(),
            Some(Topic::All) => registry.wildcard.len(),
            Some(Topic::Type(t)) => registry.typed.get(t).map_or(0, Vec::len),
        }
    }

    #[must_use]
    pub fn subscriber_stats(&self, id: &SubscriberId) -> Option<SubscriberStats> {
        self.inner.registry.read().index.get(id).map(|s| s.counters.snapshot())
    }

    #[must_use]
    pub fn stats(&self) -> BusStats {
        let counters = &self.inner.counters;
        BusStats {
            published: counters.published.load(Ordering::Relaxed),
            filtered: counters.filtered.load(Ordering::Relaxed),
            enqueued: counters.enqueued.load(Ordering::Relaxed),
            dropped: counters.dropped.load(Ordering::Relaxed),
            delivered: self.inner.totals.delivered.load(Ordering::Relaxed),
            failed: self.inner.totals.failed.load(Ordering::Relaxed),
            active_subscribers: self.inner.registry.read().index.len(),
        }
    }

    #[must_use]
    pub fn queue_capacity(&self) -> usize {
        self.inner.queue_capacity
    }

    fn runtime(&self) -> Result<Handle, EventBusError> {
        if let Some(handle) = &self.inner.runtime {
            return Ok(handle.clone());
        }
        Handle::try_current().map_err(|err| EventBusError::Runtime {
            message: err.to_string().into(),
            context: Some(Cow::Borrowed("subscriber workers need a Tokio runtime")),
        })
    }
}
