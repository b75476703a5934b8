use proptest::prelude::*;
use pulse_events::{EventFilterManager, EventType, FilterRule};
use std::time::Duration;
use tokio::time::{Instant, advance};

fn paused_runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread().enable_time().start_paused(true).build().unwrap()
}

/// Feeds events at the given gaps and returns the offsets of accepted ones.
fn accepted_offsets(filter: &EventFilterManager, gaps_ms: &[u64]) -> Vec<Duration> {
    paused_runtime().block_on(async {
        let origin = Instant::now();
        let mut accepted = Vec::new();
        for &gap in gaps_ms {
            advance(Duration::from_millis(gap)).await;
            if filter.should_pass(&EventType::KeyInput) {
                accepted.push(origin.elapsed());
            }
        }
        accepted
    })
}

proptest! {
    #[test]
    fn sliding_window_never_exceeds_cap(
        max in 1u32..10,
        gaps in proptest::collection::vec(0u64..300, 1..200),
    ) {
        let filter = EventFilterManager::new();
        filter.set_rule(EventType::KeyInput, Some(FilterRule::max_per_second(max)));
        let accepted = accepted_offsets(&filter, &gaps);

        let cap = max as usize;
        for (i, start) in accepted.iter().enumerate() {
            let in_window = accepted[i..]
                .iter()
                .take_while(|&&t| t - *start < Duration::from_secs(1))
                .count();
            prop_assert!(in_window <= cap, "{in_window} accepted within 1s, cap {cap}");
        }
    }

    #[test]
    fn accepted_events_respect_min_interval(
        interval_ms in 1u64..200,
        gaps in proptest::collection::vec(0u64..100, 1..200),
    ) {
        let interval = Duration::from_millis(interval_ms);
        let filter = EventFilterManager::new();
        filter.set_rule(EventType::KeyInput, Some(FilterRule::min_interval(interval)));
        let accepted = accepted_offsets(&filter, &gaps);

        prop_assert!(!accepted.is_empty());
        for pair in accepted.windows(2) {
            prop_assert!(pair[1] - pair[0] >= interval);
        }
    }
}
