//! # Pulse Events
//!
//! An in-process publish/subscribe engine for desktop activity events, with
//! per-type rate limiting and size-or-time batching.
//!
//! ## Overview
//!
//! * [`EventBus`] fans each published [`Event`] out to the subscribers of its
//!   [`EventType`] and to wildcard subscribers. Every subscriber has a bounded
//!   queue and a worker task of its own.
//! * [`EventFilterManager`] decides per type whether an event may pass, using a
//!   minimum interval and a cap per sliding window. Plug it into the bus with
//!   the [`RateLimit`] middleware.
//! * [`EventBatcher`] groups events into [`Batch`]es for bulk consumers.
//!
//! ## Features
//!
//! * **Producers never wait**: every queue is bounded and overflow drops the
//!   newest item with a log line.
//! * **Failure isolation**: handler errors stay inside their worker; with
//!   [`Recovery`] panics do too.
//! * **Middleware**: admission once per publish, wrapping per delivery.
//!
//! # Example
//!
//! ```rust
//! use pulse_events::{Event, EventBus, EventBusError, HandlerResult, Recovery, Topic};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), EventBusError> {
//!     let bus = EventBus::new();
//!     bus.use_middleware(Recovery);
//!
//!     let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
//!     bus.subscribe(Topic::All, move |event: Arc<Event>| {
//!         let tx = tx.clone();
//!         async move {
//!             let _ = tx.send(event.event_type().to_string());
//!             HandlerResult::Ok(())
//!         }
//!     })?;
//!
//!     bus.publish(Event::new("sensor_reading".parse()?, Default::default()))?;
//!     assert_eq!(rx.recv().await.as_deref(), Some("sensor_reading"));
//!
//!     bus.stop(Duration::from_secs(1)).await
//! }
//! ```

mod batcher;
mod bus;
mod error;
mod event;
mod filter;
mod handler;
mod id;
mod middleware;
mod payload;
mod subscriber;

pub use batcher::{
    Batch, BatcherConfig, BatcherStats, DEFAULT_BATCH_SIZE, DEFAULT_BATCH_TIMEOUT,
    DEFAULT_INPUT_CAPACITY, DEFAULT_OUTPUT_CAPACITY, EventBatcher,
};
pub use bus::{BusStats, DEFAULT_QUEUE_CAPACITY, EventBus, EventBusConfig};
pub use error::{BatcherError, EventBusError, EventTypeError, HandlerError};
pub use event::{Event, EventContext, EventType, Topic, WILDCARD};
pub use filter::{DEFAULT_WINDOW, EventFilterManager, FilterRule};
pub use handler::{BoxHandler, Handler, HandlerFuture, HandlerResult, Predicate};
pub use id::{EventId, SubscriberId};
pub use middleware::{Middleware, RateLimit, Recovery, Tracing};
pub use payload::{AppSwitch, Clipboard, KeyInput, Payload, Permission, Session, SystemStatus};
pub use subscriber::SubscriberStats;
