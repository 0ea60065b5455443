//! Trend statistics over per-interval series
//!
//! Every searchable tracker reduces its buckets to one `f64` per interval
//! (a rate, a mean duration or a mean value) and feeds that series through
//! the functions here. The x coordinate of interval `i` is `i * interval`
//! seconds.
//!
//! The horizontality t-score is an informal "is this trend flat" signal. It
//! splits the series in halves and compares their means; it is not a
//! rigorous significance test since adjacent intervals are not independent.

use statrs::distribution::{ContinuousCDF, StudentsT};

/// Standard deviation of `samples` about `center` with an `n - 1` denominator
///
/// `center` is the tracker-level average (for example total count over total
/// duration), which is not necessarily the plain mean of the samples.
pub fn sample_std_dev(samples: &[f64], center: f64) -> f64 {
    if samples.len() < 2 {
        return 0.0;
    }

    let sum_sq: f64 = samples
        .iter()
        .map(|&s| {
            let diff = s - center;
            diff * diff
        })
        .sum();

    (sum_sq / (samples.len() - 1) as f64).sqrt()
}

/// Pearson correlation between interval start time and interval value
///
/// `points` are `(interval_index, value)` pairs so that series which skip
/// empty intervals keep their true x positions. Returns 0 when the values or
/// positions do not vary, or when there are fewer than two points.
pub fn correlation_coefficient(points: &[(usize, f64)], interval_secs: f64) -> f64 {
    let n = points.len();
    if n < 2 {
        return 0.0;
    }

    let nf = n as f64;
    let mean_x = points.iter().map(|&(i, _)| i as f64 * interval_secs).sum::<f64>() / nf;
    let mean_y = points.iter().map(|&(_, v)| v).sum::<f64>() / nf;

    let mut sxx = 0.0;
    let mut syy = 0.0;
    let mut sxy = 0.0;
    for &(i, v) in points {
        let dx = i as f64 * interval_secs - mean_x;
        let dy = v - mean_y;
        sxx += dx * dx;
        syy += dy * dy;
        sxy += dx * dy;
    }

    if syy == 0.0 || sxx == 0.0 {
        return 0.0;
    }

    sxy / (sxx.sqrt() * syy.sqrt())
}

/// Least-squares line `y = a + b * x` through the points
///
/// Returns `(a, b)`. With no points the line is `(0, 0)`; when every point
/// shares one x position the line is horizontal through the mean.
pub fn regression_coefficients(points: &[(usize, f64)], interval_secs: f64) -> (f64, f64) {
    if points.is_empty() {
        return (0.0, 0.0);
    }

    let n = points.len() as f64;
    let mut sx = 0.0;
    let mut sy = 0.0;
    let mut sxx = 0.0;
    let mut sxy = 0.0;
    for &(i, y) in points {
        let x = i as f64 * interval_secs;
        sx += x;
        sy += y;
        sxx += x * x;
        sxy += x * y;
    }

    let denominator = sxx - (sx * sx) / n;
    if denominator == 0.0 {
        return (sy / n, 0.0);
    }

    let b = (sxy - (sx * sy) / n) / denominator;
    let a = (sy - b * sx) / n;
    (a, b)
}

/// Two-half comparison of a series, shared by the t-score and p-value
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HalfSplit {
    pub mean_first: f64,
    pub mean_second: f64,
    pub n_first: usize,
    pub n_second: usize,
    pub std_error: f64,
}

impl HalfSplit {
    /// Split `values` into a first half of `n / 2` points and the rest
    ///
    /// Returns `None` when either half has fewer than two points.
    pub fn of(values: &[f64]) -> Option<Self> {
        let n_first = values.len() / 2;
        let (first, second) = values.split_at(n_first);
        if first.len() < 2 || second.len() < 2 {
            return None;
        }

        let (mean_first, var_first) = mean_and_variance(first);
        let (mean_second, var_second) = mean_and_variance(second);
        let std_error =
            (var_first / first.len() as f64 + var_second / second.len() as f64).sqrt();

        Some(Self {
            mean_first,
            mean_second,
            n_first: first.len(),
            n_second: second.len(),
            std_error,
        })
    }

    pub fn t_score(&self) -> f64 {
        let diff = (self.mean_first - self.mean_second).abs();
        if diff == 0.0 {
            0.0
        } else if self.std_error == 0.0 {
            f64::INFINITY
        } else {
            diff / self.std_error
        }
    }

    pub fn degrees_of_freedom(&self) -> f64 {
        (self.n_first + self.n_second - 2) as f64
    }
}

/// Absolute t-score between the mean of the first and second halves
pub fn horizontality_t_score(values: &[f64]) -> f64 {
    HalfSplit::of(values).map(|split| split.t_score()).unwrap_or(0.0)
}

/// Two-sided p-value for [`horizontality_t_score`]
///
/// High values mean the halves are indistinguishable (a flat trend). Returns
/// 1.0 when the series is too short to split.
pub fn flatness_p_value(values: &[f64]) -> f64 {
    let Some(split) = HalfSplit::of(values) else {
        return 1.0;
    };

    let t = split.t_score();
    if t == 0.0 {
        return 1.0;
    }
    if t.is_infinite() {
        return 0.0;
    }

    match StudentsT::new(0.0, 1.0, split.degrees_of_freedom()) {
        Ok(dist) => (2.0 * (1.0 - dist.cdf(t))).clamp(0.0, 1.0),
        Err(_) => 1.0,
    }
}

fn mean_and_variance(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / (n - 1.0);
    (mean, variance)
}
