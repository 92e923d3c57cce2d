//! Property-based tests for bootstrap progress publication.
//!
//! These tests verify:
//! - P1: published values are strictly increasing
//! - P2: nothing is published after 100
//! - P3: every published value is within 0..=100
//! - P4: the status board agrees with the tracker

use proptest::prelude::*;
use wallet_tor::lifecycle::{ProgressTracker, StatusBoard};

/// Strategy mixing regular, duplicate, regressing and out-of-range reports.
fn reports_strategy() -> impl Strategy<Value = Vec<u32>> {
    prop::collection::vec(
        prop_oneof![
            8 => 0u32..=100,
            1 => 101u32..=1000,
            1 => Just(100u32),
        ],
        0..40,
    )
}

fn publish_all(reports: &[u32]) -> Vec<u8> {
    let mut tracker = ProgressTracker::new();
    reports.iter().filter_map(|&report| tracker.observe(report)).collect()
}

// ============================================================================
// P2: Nothing after 100
// ============================================================================

/// Once 100 is published, later reports of any value are dropped.
#[test]
fn p2_nothing_after_completion() {
    assert_eq!(publish_all(&[20, 100, 30, 100, 500]), vec![20, 100]);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Property: P1 - published values are strictly increasing
    #[test]
    fn p1_published_values_strictly_increase(reports in reports_strategy()) {
        let published = publish_all(&reports);
        for pair in published.windows(2) {
            prop_assert!(pair[0] < pair[1], "{:?} is not increasing", published);
        }
    }

    /// Property: P2 - 100, if published, is the last value
    #[test]
    fn p2_completion_is_final(reports in reports_strategy()) {
        let published = publish_all(&reports);
        if let Some(position) = published.iter().position(|&value| value == 100) {
            prop_assert_eq!(position, published.len() - 1);
        }
    }

    /// Property: P3 - published values stay in range and the maximum report
    /// is always reached (clamped)
    #[test]
    fn p3_values_are_clamped(reports in reports_strategy()) {
        let published = publish_all(&reports);
        prop_assert!(published.iter().all(|&value| (1..=100).contains(&value)));

        let expected_last = reports.iter().max().map(|&max| max.min(100)).filter(|&max| max > 0);
        prop_assert_eq!(published.last().map(|&value| u32::from(value)), expected_last);
    }

    /// Property: P4 - the board publishes exactly what the tracker accepts
    #[test]
    fn p4_board_matches_tracker(reports in reports_strategy()) {
        let board = StatusBoard::new();
        let mut receiver = board.subscribe_progress();

        for &report in &reports {
            board.advance_progress(u8::try_from(report.min(100)).unwrap());
        }

        let mut published = Vec::new();
        while let Ok(value) = receiver.try_recv() {
            published.push(value);
        }
        prop_assert_eq!(published, publish_all(&reports));
    }
}
