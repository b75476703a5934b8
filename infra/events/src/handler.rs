use crate::error::HandlerError;
use crate::event::Event;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

pub type HandlerResult = Result<(), HandlerError>;

/// Boxed future returned by [`Handler::call`].
pub type HandlerFuture = Pin<Box<dyn Future<Output = HandlerResult> + Send + 'static>>;

/// A subscriber callback.
///
/// Implemented for every `Fn(Arc<Event>) -> impl Future<Output = HandlerResult>`,
/// so plain async closures can be subscribed directly:
///
/// ```rust
/// use pulse_events::{Event, HandlerResult};
/// use std::sync::Arc;
///
/// let handler = |event: Arc<Event>| async move {
///     tracing::info!(event_id = %event.id(), "received");
///     HandlerResult::Ok(())
/// };
/// # let _ = handler;
/// ```
pub trait Handler: Send + Sync + 'static {
    fn call(&self, event: Arc<Event>) -> HandlerFuture;
}

impl<F, Fut> Handler for F
where
    F: Fn(Arc<Event>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn call(&self, event: Arc<Event>) -> HandlerFuture {
        Box::pin(self(event))
    }
}

/// Shared, type-erased handler. Middleware consumes and returns these.
pub type BoxHandler = Arc<dyn Handler>;

/// Publish-time delivery condition attached with `subscribe_with_filter`.
pub trait Predicate: Send + Sync + 'static {
    fn test(&self, event: &Event) -> bool;
}

impl<F> Predicate for F
where
    F: Fn(&Event) -> bool + Send + Sync + 'static,
{
    fn test(&self, event: &Event) -> bool {
        self(event)
    }
}

pub(crate) type BoxPredicate = Arc<dyn Predicate>;

/// Formatting stand-in for closures stored in registries.
pub(crate) struct Opaque(pub(crate) &'static str);

impl fmt::Debug for Opaque {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}>", self.0)
    }
}
