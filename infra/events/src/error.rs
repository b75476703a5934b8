use std::borrow::Cow;

/// Errors surfaced to producers and operators of the [`EventBus`](crate::EventBus).
///
/// Only lifecycle conditions reach the caller. Handler failures are contained
/// inside the subscriber worker and never show up here.
#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    /// `publish` was called after `stop`.
    #[error("Event bus stopped{}: {message}", format_context(.context))]
    Stopped { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    /// Subscriber workers did not exit before the drain deadline.
    #[error("Event bus stop timed out{}: {message}", format_context(.context))]
    StopTimeout { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    /// The subscription topic is empty or otherwise unusable.
    #[error("Invalid topic{}: {message}", format_context(.context))]
    InvalidTopic { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    /// Queue capacity must be greater than zero.
    #[error("Invalid capacity{}: {message}", format_context(.context))]
    InvalidCapacity { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    /// No Tokio runtime is available to host a subscriber worker.
    #[error("Runtime unavailable{}: {message}", format_context(.context))]
    Runtime { message: Cow<'static, str>, context: Option<Cow<'static, str>> },
}

impl EventBusError {
    pub(crate) const fn stopped() -> Self {
        Self::Stopped { message: Cow::Borrowed("publish rejected"), context: None }
    }
}

/// The outcome of a failed handler invocation.
///
/// Returned by handlers and produced by the [`Recovery`](crate::Recovery)
/// middleware. The bus logs these and moves on.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// The handler reported a failure.
    #[error("Handler failed{}: {message}", format_context(.context))]
    Failed { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    /// The handler panicked and the panic was caught.
    #[error("Handler panicked{}: {message}", format_context(.context))]
    Panicked { message: Cow<'static, str>, context: Option<Cow<'static, str>> },
}

impl HandlerError {
    /// Builds a [`HandlerError::Failed`] from any message.
    pub fn failed(message: impl Into<Cow<'static, str>>) -> Self {
        Self::Failed { message: message.into(), context: None }
    }

    /// Attaches context to the error, replacing any previous context.
    #[must_use]
    pub fn with_context(mut self, context: impl Into<Cow<'static, str>>) -> Self {
        match &mut self {
            Self::Failed { context: c, .. } | Self::Panicked { context: c, .. } => {
                *c = Some(context.into());
            },
        }
        self
    }

    #[must_use]
    pub const fn is_panic(&self) -> bool {
        matches!(self, Self::Panicked { .. })
    }
}

impl From<&'static str> for HandlerError {
    fn from(message: &'static str) -> Self {
        Self::failed(message)
    }
}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        Self::failed(message)
    }
}

/// Errors raised while configuring or consuming an [`EventBatcher`](crate::EventBatcher).
#[derive(Debug, thiserror::Error)]
pub enum BatcherError {
    #[error("Invalid batcher configuration{}: {message}", format_context(.context))]
    InvalidConfiguration { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    /// The output receiver has a single owner and was already handed out.
    #[error("Batch output already taken{}: {message}", format_context(.context))]
    OutputTaken { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    #[error("Runtime unavailable{}: {message}", format_context(.context))]
    Runtime { message: Cow<'static, str>, context: Option<Cow<'static, str>> },
}

/// Errors raised when parsing event types and topics.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EventTypeError {
    #[error("Event type must not be empty")]
    Empty,

    /// `*` only exists as a subscription topic.
    #[error("'*' is reserved for wildcard subscriptions")]
    Reserved,

    /// A `Custom` name with padding or the name of a known type.
    #[error("Custom event type '{name}' is not canonical, build it with EventType::parse")]
    NotCanonical { name: String },
}

impl From<EventTypeError> for EventBusError {
    fn from(err: EventTypeError) -> Self {
        Self::InvalidTopic { message: err.to_string().into(), context: None }
    }
}

fn format_context(context: &Option<Cow<'static, str>>) -> Cow<'static, str> {
    context.as_ref().map_or(Cow::Borrowed(""), |c| Cow::Owned(format!(" ({c})")))
}
