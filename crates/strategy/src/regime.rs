use common::{Bar, RegimeTrend};

use crate::indicators::sma;

/// Classify the broader trend from the last `window` closes.
///
/// Up when the last close sits above its SMA and the SMA is rising over the
/// last `window / 5` bars; Down for the mirror case; Flat otherwise or when
/// there is not enough history.
pub fn regime_trend(bars: &[Bar], window: usize) -> RegimeTrend {
    let slope_lag = (window / 5).max(1);
    if window == 0 || bars.len() < window + slope_lag {
        return RegimeTrend::Flat;
    }

    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let (Some(now), Some(before)) = (
        sma(&closes, window),
        sma(&closes[..closes.len() - slope_lag], window),
    ) else {
        return RegimeTrend::Flat;
    };
    let last = closes[closes.len() - 1];

    if last > now && now > before {
        RegimeTrend::Up
    } else if last < now && now < before {
        RegimeTrend::Down
    } else {
        RegimeTrend::Flat
    }
}
