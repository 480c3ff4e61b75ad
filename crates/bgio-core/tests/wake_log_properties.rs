//! Property tests for the persisted wake log

use bgio_core::{SharedState, Timestamp, WakeLogEntry, WakeSource};
use core::time::Duration;
use proptest::prelude::*;

fn source(index: u8) -> WakeSource {
    match index % 5 {
        0 => WakeSource::RemotePush,
        1 => WakeSource::LocalFetch,
        2 => WakeSource::ReachabilityRestored,
        3 => WakeSource::ForegroundEnter,
        _ => WakeSource::BackgroundEnter,
    }
}

proptest! {
    #[test]
    fn prop_wake_log_respects_retention_and_capacity(
        gaps in proptest::collection::vec((0u64..10_000_000, any::<u8>(), any::<bool>()), 1..200),
        retention_secs in 1u64..100_000,
        capacity in 1usize..50,
    ) {
        let retention = Duration::from_secs(retention_secs);
        let mut state = SharedState::default();
        let mut now = 0u64;

        for (gap, kind, accepted) in gaps {
            now += gap;
            let at = Timestamp::new(now);
            state.push_wake(
                WakeLogEntry { timestamp: at, source: source(kind), accepted },
                at,
                retention,
                capacity,
            );

            prop_assert!(state.wake_log.len() <= capacity);
            prop_assert!(!state.wake_log.is_empty());
            prop_assert_eq!(state.wake_log.last().map(|e| e.timestamp), Some(at));
            for entry in &state.wake_log {
                prop_assert!(at.duration_since(entry.timestamp) <= retention);
            }
            prop_assert!(state
                .wake_log
                .windows(2)
                .all(|pair| pair[0].timestamp <= pair[1].timestamp));
        }
    }
}
