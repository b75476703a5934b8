//! Cross-cutting wrappers around event delivery.
//!
//! A middleware has two hooks:
//!
//! * [`Middleware::admit`] runs once per `publish`, on the publisher's task,
//!   before fan-out. Returning `false` drops the event for every subscriber.
//!   Rejection is an expected outcome, not an error.
//! * [`Middleware::wrap`] composes around each subscriber's handler. The first
//!   registered middleware ends up outermost.
//!
//! Plain closures `Fn(BoxHandler) -> BoxHandler` are middleware with only a
//! `wrap` hook.

use crate::error::HandlerError;
use crate::event::Event;
use crate::filter::EventFilterManager;
use crate::handler::BoxHandler;
use futures::FutureExt;
use std::any::Any;
use std::borrow::Cow;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, trace};

pub trait Middleware: Send + Sync + 'static {
    /// Short name used in logs.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Publish-time admission. Defaults to letting everything through.
    fn admit(&self, _event: &Event) -> bool {
        true
    }

    /// Wraps a subscriber's handler. Defaults to the identity.
    fn wrap(&self, next: BoxHandler) -> BoxHandler {
        next
    }
}

impl<F> Middleware for F
where
    F: Fn(BoxHandler) -> BoxHandler + Send + Sync + 'static,
{
    fn wrap(&self, next: BoxHandler) -> BoxHandler {
        self(next)
    }
}

/// Ordered middleware stack, shared by the bus and its workers.
pub(crate) type Layers = Arc<[Arc<dyn Middleware>]>;

/// Runs every `admit` hook, outermost first, stopping at the first rejection.
pub(crate) fn admit_all(layers: &[Arc<dyn Middleware>], event: &Event) -> bool {
    layers.iter().all(|layer| {
        let admitted = layer.admit(event);
        if !admitted {
            trace!(middleware = layer.name(), event_id = %event.id(), "Event not admitted");
        }
        admitted
    })
}

/// Builds the effective handler so that `layers[0]` is outermost.
pub(crate) fn compose(handler: &BoxHandler, layers: &[Arc<dyn Middleware>]) -> BoxHandler {
    layers.iter().rev().fold(Arc::clone(handler), |next, layer| layer.wrap(next))
}

/// Converts handler panics into [`HandlerError::Panicked`].
///
/// Without it a panicking handler takes its subscriber worker down with it.
#[derive(Debug, Default, Clone, Copy)]
pub struct Recovery;

impl Middleware for Recovery {
    fn name(&self) -> &'static str {
        "recovery"
    }

    fn wrap(&self, next: BoxHandler) -> BoxHandler {
        Arc::new(move |event: Arc<Event>| {
            let next = Arc::clone(&next);
            async move {
                // A handler may panic before it ever returns a future.
                let future = match panic::catch_unwind(AssertUnwindSafe(|| next.call(event))) {
                    Ok(future) => future,
                    Err(payload) => return Err(panicked(payload.as_ref())),
                };
                AssertUnwindSafe(future)
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|payload| Err(panicked(payload.as_ref())))
            }
        })
    }
}

fn panicked(payload: &(dyn Any + Send)) -> HandlerError {
    let message: Cow<'static, str> = payload
        .downcast_ref::<&'static str>()
        .map(|s| Cow::Borrowed(*s))
        .or_else(|| payload.downcast_ref::<String>().map(|s| Cow::Owned(s.clone())))
        .unwrap_or(Cow::Borrowed("non-string panic payload"));
    HandlerError::Panicked { message, context: None }
}

/// Audit trail: logs every publish and the duration and outcome of each delivery.
#[derive(Debug, Default, Clone, Copy)]
pub struct Tracing;

impl Middleware for Tracing {
    fn name(&self) -> &'static str {
        "tracing"
    }

    fn admit(&self, event: &Event) -> bool {
        trace!(event_id = %event.id(), event_type = %event.event_type(), "Event published");
        true
    }

    fn wrap(&self, next: BoxHandler) -> BoxHandler {
        Arc::new(move |event: Arc<Event>| {
            let next = Arc::clone(&next);
            async move {
                let started = Instant::now();
                let event_id = event.id().clone();
                let result = next.call(event).await;
                debug!(
                    event_id = %event_id,
                    elapsed_us = started.elapsed().as_micros(),
                    ok = result.is_ok(),
                    "Handler finished"
                );
                result
            }
        })
    }
}

/// Gates delivery through an [`EventFilterManager`].
///
/// The decision is taken once per publish, so every subscriber sees the same
/// admitted stream and one publish consumes one slot of the rate budget.
#[derive(Debug, Clone)]
pub struct RateLimit {
    filter: Arc<EventFilterManager>,
}

impl RateLimit {
    #[must_use]
    pub const fn new(filter: Arc<EventFilterManager>) -> Self {
        Self { filter }
    }

    #[must_use]
    pub const fn filter(&self) -> &Arc<EventFilterManager> {
        &self.filter
    }
}

impl Middleware for RateLimit {
    fn name(&self) -> &'static str {
        "rate_limit"
    }

    fn admit(&self, event: &Event) -> bool {
        let pass = self.filter.should_pass(event.event_type());
        if !pass {
            debug!(
                event_id = %event.id(),
                event_type = %event.event_type(),
                "Event filtered by rate limit"
            );
        }
        pass
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::HandlerResult;
    use crate::payload::Payload;
    use crate::EventType;
    use parking_lot::Mutex;

    fn event() -> Arc<Event> {
        Arc::new(Event::new(EventType::Custom("test".into()), Payload::empty()))
    }

    fn recording(log: &Arc<Mutex<Vec<&'static str>>>, tag: &'static str) -> impl Middleware {
        let log = Arc::clone(log);
        move |next: BoxHandler| -> BoxHandler {
            let log = Arc::clone(&log);
            Arc::new(move |event: Arc<Event>| {
                let next = Arc::clone(&next);
                let log = Arc::clone(&log);
                async move {
                    log.lock().push(tag);
                    next.call(event).await
                }
            })
        }
    }

    #[tokio::test]
    async fn first_registered_middleware_is_outermost() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let layers: Vec<Arc<dyn Middleware>> =
            vec![Arc::new(recording(&log, "first")), Arc::new(recording(&log, "second"))];

        let inner_log = Arc::clone(&log);
        let handler: BoxHandler = Arc::new(move |_event: Arc<Event>| {
            let log = Arc::clone(&inner_log);
            async move {
                log.lock().push("handler");
                HandlerResult::Ok(())
            }
        });

        compose(&handler, &layers).call(event()).await.unwrap();
        assert_eq!(*log.lock(), vec!["first", "second", "handler"]);
    }

    #[tokio::test]
    async fn recovery_turns_panics_into_errors() {
        let panicking: BoxHandler = Arc::new(|event: Arc<Event>| async move {
            if event.metadata().is_empty() {
                panic!("boom");
            }
            HandlerResult::Ok(())
        });
        let err = Recovery.wrap(panicking).call(event()).await.unwrap_err();
        assert!(err.is_panic());
        assert!(err.to_string().contains("boom"));
    }

    #[tokio::test]
    async fn recovery_catches_panics_before_the_future_exists() {
        fn eager(_event: Arc<Event>) -> std::future::Ready<HandlerResult> {
            panic!("eager {}", 7)
        }
        let err = Recovery.wrap(Arc::new(eager)).call(event()).await.unwrap_err();
        assert!(matches!(err, HandlerError::Panicked { ref message, .. } if message == "eager 7"));
    }

    #[test]
    fn admission_short_circuits() {
        struct Deny;
        impl Middleware for Deny {
            fn admit(&self, _event: &Event) -> bool {
                false
            }
        }
        let layers: Vec<Arc<dyn Middleware>> = vec![Arc::new(Tracing), Arc::new(Deny)];
        assert!(!admit_all(&layers, &event()));
        assert!(admit_all(&layers[..1], &event()));
    }
}
