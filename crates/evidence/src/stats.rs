//! Small-sample statistics for the event study.
//!
//! - Student's t CDF through the regularized incomplete beta function
//!   (Lanczos ln-gamma, Lentz continued fraction)
//! - Two-sided one-sample t-test against a zero mean
//! - Percentile bootstrap confidence interval for the mean

use rand::rngs::StdRng;
use rand::Rng;

/// Lanczos approximation for ln(Gamma(x)), g=7, n=9.
fn ln_gamma(x: f64) -> f64 {
    #[allow(clippy::excessive_precision)]
    const COEFFICIENTS: [f64; 9] = [
        0.99999999999980993,
        676.5203681218851,
        -1259.1392167224028,
        771.32342877765313,
        -176.61502916214059,
        12.507343278686905,
        -0.13857109526572012,
        9.9843695780195716e-6,
        1.5056327351493116e-7,
    ];
    const G: f64 = 7.0;

    if x < 0.5 {
        // Reflection: Gamma(x) * Gamma(1-x) = pi / sin(pi*x)
        let sin_val = (std::f64::consts::PI * x).sin();
        if sin_val.abs() < 1e-300 {
            return f64::INFINITY;
        }
        return std::f64::consts::PI.ln() - sin_val.abs().ln() - ln_gamma(1.0 - x);
    }

    let x = x - 1.0;
    let sum = COEFFICIENTS
        .iter()
        .enumerate()
        .skip(1)
        .fold(COEFFICIENTS[0], |acc, (i, &c)| acc + c / (x + i as f64));
    let t = x + G + 0.5;
    0.5 * (2.0 * std::f64::consts::PI).ln() + (x + 0.5) * t.ln() - t + sum.ln()
}

/// Regularized incomplete beta I_x(a, b), modified Lentz continued fraction.
fn incomplete_beta(a: f64, b: f64, x: f64) -> f64 {
    if !(0.0..=1.0).contains(&x) {
        return f64::NAN;
    }
    if x == 0.0 || x == 1.0 {
        return x;
    }
    // Symmetry relation converges faster on this side.
    if x > (a + 1.0) / (a + b + 2.0) {
        return 1.0 - incomplete_beta(b, a, 1.0 - x);
    }

    let ln_prefix =
        a * x.ln() + b * (1.0 - x).ln() - ln_gamma(a) - ln_gamma(b) + ln_gamma(a + b) - a.ln();

    const MAX_ITER: usize = 200;
    const EPS: f64 = 1e-14;
    const TINY: f64 = 1e-30;
    let guard = |v: f64| if v.abs() < TINY { TINY } else { v };

    let mut c = 1.0_f64;
    let mut d = 1.0 / guard(1.0 - (a + b) * x / (a + 1.0));
    let mut f = d;

    for m in 1..=MAX_ITER {
        let m = m as f64;

        let even = m * (b - m) * x / ((a + 2.0 * m - 1.0) * (a + 2.0 * m));
        d = 1.0 / guard(1.0 + even * d);
        c = guard(1.0 + even / c);
        f *= c * d;

        let odd = -((a + m) * (a + b + m) * x) / ((a + 2.0 * m) * (a + 2.0 * m + 1.0));
        d = 1.0 / guard(1.0 + odd * d);
        c = guard(1.0 + odd / c);
        let delta = c * d;
        f *= delta;

        if (delta - 1.0).abs() < EPS {
            break;
        }
    }

    ln_prefix.exp() * f
}

/// Student's t CDF: P(T <= t) with `df` degrees of freedom.
pub fn t_cdf(t: f64, df: f64) -> f64 {
    if df <= 0.0 || t.is_nan() {
        return f64::NAN;
    }
    if t == 0.0 {
        return 0.5;
    }
    if t.is_infinite() {
        return if t > 0.0 { 1.0 } else { 0.0 };
    }
    let tail = 0.5 * incomplete_beta(df / 2.0, 0.5, df / (df + t * t));
    if t > 0.0 {
        1.0 - tail
    } else {
        tail
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TTest {
    pub t_statistic: f64,
    /// Two-sided p-value for H0: mean = 0.
    pub p_value: f64,
    pub df: f64,
}

/// Two-sided one-sample t-test against zero. `None` below two observations.
pub fn t_test(values: &[f64]) -> Option<TTest> {
    let n = values.len();
    if n < 2 {
        return None;
    }
    let n_f = n as f64;
    let m = mean(values)?;
    let variance = values.iter().map(|&x| (x - m).powi(2)).sum::<f64>() / (n_f - 1.0);
    let std_err = (variance / n_f).sqrt();
    let df = n_f - 1.0;

    if std_err < 1e-15 {
        // Identical observations: either a certain effect or none at all.
        return Some(if m.abs() > 1e-15 {
            TTest {
                t_statistic: m.signum() * f64::INFINITY,
                p_value: 0.0,
                df,
            }
        } else {
            TTest {
                t_statistic: 0.0,
                p_value: 1.0,
                df,
            }
        });
    }

    let t_statistic = m / std_err;
    let p_value = (2.0 * (1.0 - t_cdf(t_statistic.abs(), df))).clamp(0.0, 1.0);
    Some(TTest {
        t_statistic,
        p_value,
        df,
    })
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    Some(percentile_sorted(&sorted, 50.0))
}

/// Linear-interpolated percentile of an ascending slice. `pct` in [0, 100].
pub fn percentile_sorted(sorted: &[f64], pct: f64) -> f64 {
    match sorted.len() {
        0 => f64::NAN,
        1 => sorted[0],
        n => {
            let rank = (pct / 100.0).clamp(0.0, 1.0) * (n - 1) as f64;
            let lo = rank.floor() as usize;
            let hi = rank.ceil() as usize;
            let frac = rank - lo as f64;
            sorted[lo] + (sorted[hi] - sorted[lo]) * frac
        }
    }
}

/// Percentile bootstrap CI for the mean at `confidence` (e.g. 0.95).
pub fn bootstrap_mean_ci(
    values: &[f64],
    resamples: usize,
    confidence: f64,
    rng: &mut StdRng,
) -> Option<(f64, f64)> {
    let n = values.len();
    if n == 0 || resamples == 0 {
        return None;
    }

    let mut means: Vec<f64> = (0..resamples)
        .map(|_| (0..n).map(|_| values[rng.gen_range(0..n)]).sum::<f64>() / n as f64)
        .collect();
    means.sort_by(f64::total_cmp);

    let tail = (1.0 - confidence.clamp(0.0, 1.0)) / 2.0 * 100.0;
    Some((
        percentile_sorted(&means, tail),
        percentile_sorted(&means, 100.0 - tail),
    ))
}
