use common::Bar;

/// Average True Range with Wilder smoothing, as of the last bar.
///
/// Returns `None` until `period + 1` bars are available (the first true
/// range needs a previous close).
pub fn atr(bars: &[Bar], period: usize) -> Option<f64> {
    if period == 0 || bars.len() < period + 1 {
        return None;
    }

    let true_ranges: Vec<f64> = bars
        .windows(2)
        .map(|w| {
            let prev_close = w[0].close;
            let bar = &w[1];
            (bar.high - bar.low)
                .max((bar.high - prev_close).abs())
                .max((bar.low - prev_close).abs())
        })
        .collect();

    // Seed with the simple mean of the first `period` ranges, then smooth.
    let mut value = true_ranges[..period].iter().sum::<f64>() / period as f64;
    for &tr in &true_ranges[period..] {
        value = (value * (period - 1) as f64 + tr) / period as f64;
    }
    Some(value)
}
