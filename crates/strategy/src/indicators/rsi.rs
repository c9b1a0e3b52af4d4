/// Relative strength index with Wilder smoothing.
///
/// The first average gain and loss are plain means over `period` changes;
/// every later change is folded in as `(avg * (period - 1) + x) / period`.
#[derive(Debug, Clone)]
pub struct RsiIndicator {
    pub period: usize,
    pub overbought: f64,
    pub oversold: f64,
}

/// RSI leaving an extreme band on the latest bar.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RsiCross {
    UpFromOversold { previous: f64, current: f64 },
    DownFromOverbought { previous: f64, current: f64 },
}

impl RsiIndicator {
    /// The registry guarantees `period >= 2` and `oversold < overbought`.
    pub fn new(period: usize, overbought: f64, oversold: f64) -> Self {
        Self {
            period,
            overbought,
            oversold,
        }
    }

    /// RSI at the last close. Needs `period + 1` closes.
    pub fn compute(&self, closes: &[f64]) -> Option<f64> {
        self.series(closes).last().copied()
    }

    /// Compare RSI on the last bar with RSI one bar earlier.
    pub fn crossing(&self, closes: &[f64]) -> Option<RsiCross> {
        let series = self.series(closes);
        let [.., previous, current] = series[..] else {
            return None;
        };

        if previous <= self.oversold && current > self.oversold {
            Some(RsiCross::UpFromOversold { previous, current })
        } else if previous >= self.overbought && current < self.overbought {
            Some(RsiCross::DownFromOverbought { previous, current })
        } else {
            None
        }
    }

    /// One RSI value per close from index `period` on.
    fn series(&self, closes: &[f64]) -> Vec<f64> {
        let p = self.period;
        if p == 0 || closes.len() <= p {
            return Vec::new();
        }
        let changes: Vec<f64> = closes.windows(2).map(|w| w[1] - w[0]).collect();
        let split = |c: f64| (c.max(0.0), (-c).max(0.0));

        let (mut gain, mut loss) = changes[..p]
            .iter()
            .map(|&c| split(c))
            .fold((0.0, 0.0), |(g, l), (cg, cl)| (g + cg, l + cl));
        gain /= p as f64;
        loss /= p as f64;

        let mut out = Vec::with_capacity(changes.len() - p + 1);
        out.push(rsi_from(gain, loss));
        for &c in &changes[p..] {
            let (cg, cl) = split(c);
            gain = (gain * (p - 1) as f64 + cg) / p as f64;
            loss = (loss * (p - 1) as f64 + cl) / p as f64;
            out.push(rsi_from(gain, loss));
        }
        out
    }
}

fn rsi_from(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        return 100.0;
    }
    100.0 - 100.0 / (1.0 + avg_gain / avg_loss)
}
