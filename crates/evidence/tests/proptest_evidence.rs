use chrono::{Duration, NaiveDate};
use common::{Bar, Direction, EvidenceRecord};
use evidence::{assess, CostModel, EventStudy, EvidenceConfig};
use proptest::prelude::*;

fn bars_from_closes(closes: &[f64]) -> Vec<Bar> {
    let start = NaiveDate::from_ymd_opt(2023, 1, 2).unwrap();
    closes
        .iter()
        .enumerate()
        .map(|(i, &c)| Bar {
            date: start + Duration::days(i as i64),
            open: c,
            high: c,
            low: c,
            close: c,
            volume: 1_000.0,
        })
        .collect()
}

proptest! {
    /// Economics is blocked exactly when the net median return is absent or not positive.
    #[test]
    fn economics_blocks_iff_net_not_positive(
        median in proptest::option::of(-0.1f64..0.1f64),
        spread_bps in 0.0f64..50.0,
        slippage_bps in 0.0f64..20.0,
        fee_bps in 0.0f64..20.0,
    ) {
        let costs = CostModel { spread_bps, slippage_bps, fee_bps };
        let record = EvidenceRecord { car_median: median, ..EvidenceRecord::insufficient(5, 12) };
        let result = assess(&[record], 5, &costs, None);

        prop_assert!(result.cost_estimate >= 0.0);
        match result.net_median_return {
            Some(net) => prop_assert_eq!(result.blocked, net <= 0.0),
            None => prop_assert!(result.blocked),
        }
    }

    /// No events means every statistic is absent at every horizon, whatever the tape looks like.
    #[test]
    fn no_events_means_no_statistics(
        closes in proptest::collection::vec(1.0f64..500.0, 2..60),
        short in any::<bool>(),
    ) {
        let bars = bars_from_closes(&closes);
        let bench = bars_from_closes(&vec![100.0; closes.len()]);
        let direction = if short { Direction::Short } else { Direction::Long };
        let study = EventStudy::new(EvidenceConfig::default());

        for record in study.analyze(&bars, &bench, &[], direction) {
            prop_assert_eq!(record.n_events, 0);
            prop_assert!(record.car_mean.is_none());
            prop_assert!(record.car_median.is_none());
            prop_assert!(record.p_value.is_none());
            prop_assert!(!record.significant);
        }
    }

    /// Significance always comes with an interval that excludes zero.
    #[test]
    fn significant_records_have_interval_excluding_zero(
        closes in proptest::collection::vec(50.0f64..150.0, 40..120),
    ) {
        let bars = bars_from_closes(&closes);
        let bench = bars_from_closes(&vec![100.0; closes.len()]);
        let events: Vec<usize> = (0..closes.len()).step_by(3).collect();
        let study = EventStudy::new(EvidenceConfig {
            min_events: 5,
            bootstrap_resamples: 200,
            ..EvidenceConfig::default()
        });

        for record in study.analyze(&bars, &bench, &events, Direction::Long) {
            if record.significant {
                let (lo, hi) = (record.car_ci_low.unwrap(), record.car_ci_high.unwrap());
                prop_assert!(lo > 0.0 || hi < 0.0);
                prop_assert!(record.p_value.unwrap() < 0.05);
            }
        }
    }
}
