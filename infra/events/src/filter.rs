//! Per-type admission control for event storms.
//!
//! Each event type may carry a [`FilterRule`] combining a minimum interval
//! between accepted events and a cap on accepted events per sliding window.
//! Types without a rule always pass. Rejections are a normal outcome and are
//! never reported as errors.

use crate::event::EventType;
use fxhash::FxHashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Default sliding window for `max_per_second`.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(1);

/// Admission policy for a single event type.
///
/// Unset limits are not enforced. Zero values are treated as unset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FilterRule {
    pub min_interval: Option<Duration>,
    pub max_per_second: Option<u32>,
}

impl FilterRule {
    #[must_use]
    pub const fn min_interval(interval: Duration) -> Self {
        Self { min_interval: Some(interval), max_per_second: None }
    }

    #[must_use]
    pub const fn max_per_second(max: u32) -> Self {
        Self { min_interval: None, max_per_second: Some(max) }
    }

    #[must_use]
    pub const fn with_min_interval(mut self, interval: Duration) -> Self {
        self.min_interval = Some(interval);
        self
    }

    #[must_use]
    pub const fn with_max_per_second(mut self, max: u32) -> Self {
        self.max_per_second = Some(max);
        self
    }

    fn normalized(self) -> Self {
        Self {
            min_interval: self.min_interval.filter(|d| !d.is_zero()),
            max_per_second: self.max_per_second.filter(|&n| n > 0),
        }
    }
}

#[derive(Debug, Default)]
struct TypeState {
    last_accepted: Option<Instant>,
    /// Accepted timestamps, oldest first.
    accepted: VecDeque<Instant>,
}

impl TypeState {
    fn prune(&mut self, now: Instant, window: Duration) {
        while self.accepted.front().is_some_and(|&ts| now.duration_since(ts) >= window) {
            self.accepted.pop_front();
        }
    }

    fn accept(&mut self, now: Instant) {
        self.last_accepted = Some(now);
        self.accepted.push_back(now);
    }
}

#[derive(Debug)]
struct FilterState {
    rules: FxHashMap<EventType, FilterRule>,
    types: FxHashMap<EventType, TypeState>,
    window: Duration,
}

/// Thread-safe rate filter keyed by [`EventType`].
///
/// All bookkeeping sits behind one lock; decisions are short and never call
/// back into user code.
///
/// # Example
///
/// ```rust
/// use pulse_events::{EventFilterManager, EventType, FilterRule};
///
/// let filter = EventFilterManager::new();
/// filter.set_rule(EventType::KeyInput, Some(FilterRule::max_per_second(2)));
///
/// assert!(filter.should_pass(&EventType::KeyInput));
/// assert!(filter.should_pass(&EventType::KeyInput));
/// assert!(!filter.should_pass(&EventType::KeyInput));
/// assert!(filter.should_pass(&EventType::Clipboard));
/// ```
#[derive(Debug)]
pub struct EventFilterManager {
    state: Mutex<FilterState>,
}

impl Default for EventFilterManager {
    fn default() -> Self {
        Self::new()
    }
}

impl EventFilterManager {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FilterState {
                rules: FxHashMap::default(),
                types: FxHashMap::default(),
                window: DEFAULT_WINDOW,
            }),
        }
    }

    /// Creates a manager with an initial rule table.
    #[must_use]
    pub fn with_rules(rules: impl IntoIterator<Item = (EventType, FilterRule)>) -> Self {
        let manager = Self::new();
        manager.set_rules(rules.into_iter().map(|(t, rule)| (t, Some(rule))));
        manager
    }

    /// Installs `rule` for `event_type`, or removes the current rule on `None`.
    pub fn set_rule(&self, event_type: EventType, rule: Option<FilterRule>) {
        let mut state = self.state.lock();
        match rule {
            Some(rule) => {
                debug!(event_type = %event_type, ?rule, "Filter rule installed");
                state.rules.insert(event_type, rule.normalized());
            },
            None => {
                if state.rules.remove(&event_type).is_some() {
                    debug!(event_type = %event_type, "Filter rule removed");
                }
            },
        }
    }

    /// Applies several [`set_rule`](Self::set_rule) calls under a single lock.
    pub fn set_rules(&self, rules: impl IntoIterator<Item = (EventType, Option<FilterRule>)>) {
        let mut state = self.state.lock();
        for (event_type, rule) in rules {
            match rule {
                Some(rule) => {
                    state.rules.insert(event_type, rule.normalized());
                },
                None => {
                    state.rules.remove(&event_type);
                },
            }
        }
        debug!(rules = state.rules.len(), "Filter rules updated");
    }

    #[must_use]
    pub fn rule(&self, event_type: &EventType) -> Option<FilterRule> {
        self.state.lock().rules.get(event_type).copied()
    }

    #[must_use]
    pub fn has_rules(&self) -> bool {
        !self.state.lock().rules.is_empty()
    }

    /// Decides whether an event of `event_type` may proceed right now.
    ///
    /// The minimum interval is measured from the last *accepted* event, and
    /// the rate cap counts accepted events inside the sliding window. Both
    /// limits must hold for the event to be accepted.
    pub fn should_pass(&self, event_type: &EventType) -> bool {
        let now = Instant::now();
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let entry = state.types.entry(event_type.clone()).or_default();
        entry.prune(now, state.window);

        let Some(rule) = state.rules.get(event_type) else {
            entry.accept(now);
            return true;
        };

        if let Some(min_interval) = rule.min_interval
            && let Some(last) = entry.last_accepted
            && now.duration_since(last) < min_interval
        {
            return false;
        }

        if let Some(max) = rule.max_per_second
            && entry.accepted.len() >= usize::try_from(max).unwrap_or(usize::MAX)
        {
            return false;
        }

        entry.accept(now);
        true
    }

    /// Number of accepted events of `event_type` inside the current window.
    #[must_use]
    pub fn event_count(&self, event_type: &EventType) -> usize {
        let now = Instant::now();
        let state = self.state.lock();
        state.types.get(event_type).map_or(0, |entry| {
            let expired =
                entry.accepted.partition_point(|&ts| now.duration_since(ts) >= state.window);
            entry.accepted.len() - expired
        })
    }

    /// When the last event of `event_type` was accepted.
    #[must_use]
    pub fn last_event_time(&self, event_type: &EventType) -> Option<Instant> {
        self.state.lock().types.get(event_type).and_then(|entry| entry.last_accepted)
    }

    /// Forgets all per-type bookkeeping. Rules and window size are kept.
    pub fn reset(&self) {
        self.state.lock().types.clear();
        debug!("Filter bookkeeping reset");
    }

    /// Changes the sliding window used by `max_per_second`.
    ///
    /// A zero window would disable the cap entirely and is ignored.
    pub fn set_window_size(&self, window: Duration) {
        if window.is_zero() {
            warn!("Ignoring zero filter window size");
            return;
        }
        self.state.lock().window = window;
    }

    #[must_use]
    pub fn window_size(&self) -> Duration {
        self.state.lock().window
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::advance;

    const KEYS: EventType = EventType::KeyInput;

    #[tokio::test(start_paused = true)]
    async fn min_interval_measured_from_last_accept() {
        let filter = EventFilterManager::new();
        filter.set_rule(KEYS, Some(FilterRule::min_interval(Duration::from_millis(100))));

        assert!(filter.should_pass(&KEYS));
        assert!(!filter.should_pass(&KEYS));

        advance(Duration::from_millis(60)).await;
        assert!(!filter.should_pass(&KEYS));

        // Rejections do not push the deadline back.
        advance(Duration::from_millis(40)).await;
        assert!(filter.should_pass(&KEYS));
    }

    #[tokio::test(start_paused = true)]
    async fn max_per_second_uses_sliding_window() {
        let filter = EventFilterManager::new();
        filter.set_rule(KEYS, Some(FilterRule::max_per_second(5)));

        for _ in 0..5 {
            assert!(filter.should_pass(&KEYS));
        }
        assert!(!filter.should_pass(&KEYS));
        assert_eq!(filter.event_count(&KEYS), 5);

        advance(Duration::from_secs(1)).await;
        assert_eq!(filter.event_count(&KEYS), 0);
        assert!(filter.should_pass(&KEYS));
    }

    #[tokio::test(start_paused = true)]
    async fn both_limits_apply() {
        let filter = EventFilterManager::new();
        filter.set_rule(
            KEYS,
            Some(FilterRule::min_interval(Duration::from_millis(100)).with_max_per_second(3)),
        );

        let mut accepted = 0;
        for _ in 0..30 {
            if filter.should_pass(&KEYS) {
                accepted += 1;
            }
            advance(Duration::from_millis(50)).await;
        }
        // Accepted at 0, 100, 200ms, then capped until the window slides at 1000ms.
        assert_eq!(accepted, 3 + 3);
    }

    #[tokio::test(start_paused = true)]
    async fn custom_window_size() {
        let filter = EventFilterManager::new();
        filter.set_window_size(Duration::from_millis(200));
        filter.set_window_size(Duration::ZERO);
        assert_eq!(filter.window_size(), Duration::from_millis(200));

        filter.set_rule(KEYS, Some(FilterRule::max_per_second(1)));
        assert!(filter.should_pass(&KEYS));
        assert!(!filter.should_pass(&KEYS));
        advance(Duration::from_millis(200)).await;
        assert!(filter.should_pass(&KEYS));
    }

    #[test]
    fn no_rule_always_passes_and_records_time() {
        let filter = EventFilterManager::new();
        assert!(filter.last_event_time(&KEYS).is_none());
        for _ in 0..100 {
            assert!(filter.should_pass(&KEYS));
        }
        assert!(filter.last_event_time(&KEYS).is_some());
    }

    #[test]
    fn removing_a_rule_restores_pass_through() {
        let filter = EventFilterManager::with_rules([(KEYS, FilterRule::max_per_second(1))]);
        assert!(filter.has_rules());
        assert!(filter.should_pass(&KEYS));
        assert!(!filter.should_pass(&KEYS));

        filter.set_rule(KEYS, None);
        assert!(filter.rule(&KEYS).is_none());
        assert!(filter.should_pass(&KEYS));
    }

    #[test]
    fn zero_limits_are_unset() {
        let filter = EventFilterManager::new();
        let zeroed = FilterRule { min_interval: Some(Duration::ZERO), max_per_second: Some(0) };
        filter.set_rules([(KEYS, Some(zeroed))]);
        assert_eq!(filter.rule(&KEYS), Some(FilterRule::default()));
        assert!(filter.should_pass(&KEYS));
        assert!(filter.should_pass(&KEYS));
    }

    #[test]
    fn reset_clears_bookkeeping_but_keeps_rules() {
        let filter = EventFilterManager::new();
        filter.set_rule(KEYS, Some(FilterRule::max_per_second(1)));
        assert!(filter.should_pass(&KEYS));
        assert!(!filter.should_pass(&KEYS));

        filter.reset();
        assert_eq!(filter.event_count(&KEYS), 0);
        assert!(filter.last_event_time(&KEYS).is_none());
        assert!(filter.should_pass(&KEYS));
        assert!(!filter.should_pass(&KEYS));
    }
}
