use pulse_events::{BatcherError, EventBusError};
use std::borrow::Cow;

/// Errors raised while configuring, starting or stopping a [`Pulse`](crate::Pulse).
#[derive(Debug, thiserror::Error)]
pub enum PulseError {
    #[error("Config error{}: {source}", format_context(.context))]
    Config { source: config::ConfigError, context: Option<Cow<'static, str>> },

    #[error("Event bus error{}: {source}", format_context(.context))]
    Bus { source: EventBusError, context: Option<Cow<'static, str>> },

    #[error("Batcher error{}: {source}", format_context(.context))]
    Batcher { source: BatcherError, context: Option<Cow<'static, str>> },

    /// The tracing subscriber or the file appender could not be installed.
    #[error("Logging error{}: {message}", format_context(.context))]
    Logging { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    #[error("Invalid configuration{}: {message}", format_context(.context))]
    InvalidConfiguration { message: Cow<'static, str>, context: Option<Cow<'static, str>> },
}

/// Attaches context to fallible results, `anyhow`-style.
pub trait PulseErrorExt<T> {
    /// # Errors
    /// Propagates the original error with `context` attached.
    fn context(self, context: impl Into<Cow<'static, str>>) -> Result<T, PulseError>;
}

impl<T, E: Into<PulseError>> PulseErrorExt<T> for Result<T, E> {
    fn context(self, context: impl Into<Cow<'static, str>>) -> Result<T, PulseError> {
        self.map_err(|err| err.into().with_context(context))
    }
}

impl PulseError {
    #[must_use]
    pub fn with_context(mut self, context: impl Into<Cow<'static, str>>) -> Self {
        match &mut self {
            Self::Config { context: c, .. }
            | Self::Bus { context: c, .. }
            | Self::Batcher { context: c, .. }
            | Self::Logging { context: c, .. }
            | Self::InvalidConfiguration { context: c, .. } => *c = Some(context.into()),
        }
        self
    }
}

impl From<config::ConfigError> for PulseError {
    fn from(source: config::ConfigError) -> Self {
        Self::Config { source, context: None }
    }
}

impl From<EventBusError> for PulseError {
    fn from(source: EventBusError) -> Self {
        Self::Bus { source, context: None }
    }
}

impl From<BatcherError> for PulseError {
    fn from(source: BatcherError) -> Self {
        Self::Batcher { source, context: None }
    }
}

fn format_context(context: &Option<Cow<'static, str>>) -> Cow<'static, str> {
    context.as_ref().map_or(Cow::Borrowed(""), |c| Cow::Owned(format!(" ({c})")))
}
