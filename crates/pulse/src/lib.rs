//! Facade over `pulse-events`.
//! Builds a configured bus, rate filter and batcher from one [`PulseConfig`].
//! Keep this crate thin: it composes the engine, it does not extend it.
//!
//! ## Usage
//! - Load a [`PulseConfig`] with [`load_config`] (or start from `Default`).
//! - Call [`logging::init`] once per process and keep the guard.
//! - [`Pulse::start`] inside a Tokio runtime; [`Pulse::shutdown`] before exit.
//!
//! ```rust
//! use pulse::{Pulse, PulseConfig, events::{Event, KeyInput}};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), pulse::PulseError> {
//! let mut config = PulseConfig::default();
//! config.batcher.enabled = true;
//!
//! let pulse = Pulse::start(&config)?;
//! pulse.publish(Event::key_input(KeyInput::new("K")))?;
//! pulse.shutdown().await
//! # }
//! ```

mod config;
mod error;
pub mod logging;

pub use crate::config::{
    BatcherSettings, BusSettings, FilterSettings, MiddlewareSettings, PulseConfig, RuleSettings,
    load_config,
};
pub use crate::error::{PulseError, PulseErrorExt};
pub use pulse_events as events;

use pulse_events::{
    Event, EventBatcher, EventBus, EventFilterManager, RateLimit, Recovery, Topic, Tracing,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// A running event engine assembled from configuration.
#[derive(Debug)]
pub struct Pulse {
    bus: EventBus,
    filter: Arc<EventFilterManager>,
    batcher: Option<EventBatcher>,
    stop_timeout: Duration,
}

impl Pulse {
    /// Validates `config` and wires the components together.
    ///
    /// Middleware order is recovery, tracing, then rate limiting; the rate
    /// limiter is only installed when rules exist. An enabled batcher is
    /// subscribed to every event type.
    ///
    /// # Errors
    /// Returns [`PulseError::InvalidConfiguration`] or the component error
    /// that prevented start-up. Must run inside a Tokio runtime.
    pub fn start(config: &PulseConfig) -> Result<Self, PulseError> {
        config.validate()?;

        let bus = EventBus::with_config(&config.bus.to_bus_config())?;
        if config.middleware.recovery {
            bus.use_middleware(Recovery);
        }
        if config.middleware.tracing {
            bus.use_middleware(Tracing);
        }

        let filter = Arc::new(config.filter.build()?);
        if filter.has_rules() {
            bus.use_middleware(RateLimit::new(Arc::clone(&filter)));
        }

        let batcher = if config.batcher.enabled {
            let batcher = EventBatcher::start(config.batcher.to_batcher_config())?;
            bus.subscribe(Topic::All, batcher.handler()).context("batcher subscription")?;
            Some(batcher)
        } else {
            None
        };

        info!(
            queue_capacity = config.bus.queue_capacity,
            filter_rules = config.filter.rules.len(),
            batcher = batcher.is_some(),
            "Pulse started"
        );
        Ok(Self { bus, filter, batcher, stop_timeout: config.bus.stop_timeout() })
    }

    #[must_use]
    pub const fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// The filter behind the rate limiter. Rules may be changed at runtime;
    /// a filter started without rules is not installed on the bus.
    #[must_use]
    pub const fn filter(&self) -> &Arc<EventFilterManager> {
        &self.filter
    }

    #[must_use]
    pub const fn batcher(&self) -> Option<&EventBatcher> {
        self.batcher.as_ref()
    }

    /// # Errors
    /// Returns [`PulseError::Bus`] once the engine is shut down.
    pub fn publish(&self, event: Event) -> Result<(), PulseError> {
        self.bus.publish(event).map_err(Into::into)
    }

    /// Stops the bus within the configured drain timeout, then the batcher,
    /// which emits its final batch. The batcher is stopped even when the bus
    /// timed out.
    ///
    /// # Errors
    /// Returns [`PulseError::Bus`] when subscriber workers outlive the timeout.
    pub async fn shutdown(&self) -> Result<(), PulseError> {
        let stopped = self.bus.stop(self.stop_timeout).await;
        if let Some(batcher) = &self.batcher {
            batcher.stop().await;
        }
        info!(clean = stopped.is_ok(), "Pulse shut down");
        stopped.context("shutdown")
    }
}
