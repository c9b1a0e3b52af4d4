/// Moving-average convergence/divergence over closes.
///
/// `macd = EMA(fast) - EMA(slow)`, `signal_line = EMA(macd, signal)`. Every
/// EMA is seeded with the simple average of its first `period` inputs, so a
/// reading depends only on the closes handed in.
#[derive(Debug, Clone)]
pub struct MacdIndicator {
    pub fast: usize,
    pub slow: usize,
    pub signal: usize,
}

/// Whether the MACD line crossed its signal line on the latest bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MacdSignal {
    Bullish,
    Bearish,
    Neutral,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MacdReading {
    pub signal: MacdSignal,
    pub macd: f64,
    pub signal_line: f64,
}

impl MacdReading {
    pub fn gap(&self) -> f64 {
        (self.macd - self.signal_line).abs()
    }
}

impl MacdIndicator {
    /// Periods are checked by the pattern registry: `0 < fast < slow`, `signal >= 1`.
    pub fn new(fast: usize, slow: usize, signal: usize) -> Self {
        Self { fast, slow, signal }
    }

    /// Closes needed for two consecutive signal-line values.
    pub fn min_len(&self) -> usize {
        self.slow + self.signal
    }

    pub fn compute(&self, closes: &[f64]) -> Option<MacdReading> {
        if self.fast == 0 || self.fast >= self.slow || closes.len() < self.min_len() {
            return None;
        }
        let fast = ema_series(closes, self.fast);
        let slow = ema_series(closes, self.slow);
        // fast[i] belongs to close fast-1+i, slow[i] to close slow-1+i.
        let offset = self.slow - self.fast;
        let macd: Vec<f64> = slow
            .iter()
            .enumerate()
            .map(|(i, s)| fast[i + offset] - s)
            .collect();
        let signal = ema_series(&macd, self.signal);

        let [.., prev_macd, curr_macd] = macd[..] else {
            return None;
        };
        let [.., prev_sig, curr_sig] = signal[..] else {
            return None;
        };

        let crossing = if prev_macd <= prev_sig && curr_macd > curr_sig {
            MacdSignal::Bullish
        } else if prev_macd >= prev_sig && curr_macd < curr_sig {
            MacdSignal::Bearish
        } else {
            MacdSignal::Neutral
        };
        Some(MacdReading {
            signal: crossing,
            macd: curr_macd,
            signal_line: curr_sig,
        })
    }
}

/// EMA of `values`, one entry per input from index `period - 1` on.
fn ema_series(values: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || values.len() < period {
        return Vec::new();
    }
    let k = 2.0 / (period as f64 + 1.0);
    let seed = values[..period].iter().sum::<f64>() / period as f64;
    let mut out = Vec::with_capacity(values.len() - period + 1);
    out.push(seed);
    let mut prev = seed;
    for &v in &values[period..] {
        prev = v * k + prev * (1.0 - k);
        out.push(prev);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ema_is_seeded_with_the_simple_average() {
        let series = ema_series(&[1.0, 2.0, 3.0, 4.0], 3);
        assert_eq!(series.len(), 2);
        assert!((series[0] - 2.0).abs() < 1e-12);
        // k = 0.5
        assert!((series[1] - 3.0).abs() < 1e-12);
        assert!(ema_series(&[1.0], 3).is_empty());
    }

    #[test]
    fn too_few_closes_give_no_reading() {
        let macd = MacdIndicator::new(12, 26, 9);
        assert!(macd.compute(&[100.0; 34]).is_none());
        assert!(macd.compute(&[100.0; 35]).is_some());
    }

    #[test]
    fn recovery_after_a_decline_crosses_bullish() {
        let macd = MacdIndicator::new(3, 6, 3);
        let mut prices: Vec<f64> = (0..20).map(|i| 100.0 - i as f64 * 0.5).collect();
        prices.extend((0..20).map(|i| 90.0 + i as f64 * 2.0));
        let crossed = (macd.min_len()..=prices.len())
            .filter_map(|end| macd.compute(&prices[..end]))
            .any(|r| r.signal == MacdSignal::Bullish);
        assert!(crossed);
    }

    #[test]
    fn flat_tape_is_neutral_with_no_gap() {
        let macd = MacdIndicator::new(3, 6, 3);
        let reading = macd.compute(&[50.0; 40]).unwrap();
        assert_eq!(reading.signal, MacdSignal::Neutral);
        assert!(reading.gap() < 1e-12);
    }
}
