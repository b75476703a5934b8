#![allow(dead_code, unreachable_pub)]

use pulse_events::{Event, EventContext, Handler, HandlerError, HandlerResult, KeyInput, Payload};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;

pub fn key(key: &str) -> Event {
    Event::key_input(KeyInput::new(key))
}

pub fn custom(name: &str) -> Event {
    Event::new(name.parse().unwrap(), Payload::empty())
}

pub fn from_app(event: Event, app: &str) -> Event {
    event.with_context(EventContext::app(app))
}

/// A handler that forwards every event it receives.
pub fn forwarding() -> (impl Handler, mpsc::UnboundedReceiver<Arc<Event>>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handler = move |event: Arc<Event>| {
        let tx = tx.clone();
        async move {
            let _ = tx.send(event);
            HandlerResult::Ok(())
        }
    };
    (handler, rx)
}

/// A handler that counts calls and always succeeds.
pub fn counting() -> (impl Handler, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let handler = move |_event: Arc<Event>| {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            HandlerResult::Ok(())
        }
    };
    (handler, calls)
}

pub fn failing() -> impl Handler {
    |_event: Arc<Event>| async { Err::<(), _>(HandlerError::failed("storage offline")) }
}

/// Receives the next event or gives up after `within`.
pub async fn next_event(
    rx: &mut mpsc::UnboundedReceiver<Arc<Event>>,
    within: Duration,
) -> Option<Arc<Event>> {
    tokio::time::timeout(within, rx.recv()).await.ok().flatten()
}

/// Polls `condition` until it holds or `within` elapses.
pub async fn eventually(within: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + within;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
