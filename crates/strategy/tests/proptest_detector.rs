use chrono::{Duration, NaiveDate};
use common::{Bar, Error};
use proptest::prelude::*;
use strategy::{default_patterns, CatalystDetector};

fn make_bars(closes: &[f64], volumes: &[f64]) -> Vec<Bar> {
    let start = NaiveDate::from_ymd_opt(2023, 1, 2).unwrap();
    closes
        .iter()
        .zip(volumes.iter().cycle())
        .enumerate()
        .map(|(i, (&close, &volume))| Bar {
            date: start + Duration::days(i as i64),
            open: close,
            high: close * 1.01,
            low: close * 0.99,
            close,
            volume,
        })
        .collect()
}

proptest! {
    /// Anything shorter than the longest pattern window is refused outright.
    #[test]
    fn short_sequences_never_produce_a_signal(
        closes in prop::collection::vec(1.0f64..1_000.0, 0..35),
        volumes in prop::collection::vec(1.0f64..1e7, 1..10),
    ) {
        let detector = CatalystDetector::from_config(&default_patterns()).unwrap();
        prop_assume!(closes.len() < detector.min_bars());
        let bars = make_bars(&closes, &volumes);
        let is_insufficient = matches!(
            detector.detect("TEST", &bars),
            Err(Error::InsufficientHistory { .. })
        );
        prop_assert!(is_insufficient);
    }

    /// On long enough random tapes detection never panics and ranks stay bounded.
    #[test]
    fn ranks_stay_in_unit_interval(
        closes in prop::collection::vec(1.0f64..1_000.0, 40..120),
        volumes in prop::collection::vec(1.0f64..1e7, 1..30),
    ) {
        let detector = CatalystDetector::from_config(&default_patterns()).unwrap();
        let bars = make_bars(&closes, &volumes);
        if let Some(signal) = detector.detect("TEST", &bars).unwrap() {
            prop_assert!((0.0..=1.0).contains(&signal.rank));
        }
    }
}
