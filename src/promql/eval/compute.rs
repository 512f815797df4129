//! Range-window computations shared by the rate family, the `*_over_time`
//! functions, and the extrapolation functions (§4.C), operating directly on
//! millisecond-timestamped samples rather than the teacher's `(f64, f64)`
//! second-timestamped pairs.

use crate::model::Sample;

fn dt_seconds(a: i64, b: i64) -> f64 {
    (b - a) as f64 / 1000.0
}

/// Total increase over the window divided by the window duration, handling
/// counter resets by treating a decrease as a reset to zero.
pub fn compute_rate(samples: &[Sample]) -> Option<f64> {
    if samples.len() < 2 {
        return None;
    }
    let first = samples.first().unwrap();
    let last = samples.last().unwrap();
    let dt = dt_seconds(first.timestamp_ms, last.timestamp_ms);
    if dt <= 0.0 {
        return None;
    }
    let mut total = 0.0;
    for w in samples.windows(2) {
        let delta = w[1].value - w[0].value;
        total += if delta >= 0.0 { delta } else { w[1].value };
    }
    Some(total / dt)
}

/// Instantaneous rate: the rate between the last two samples in the window.
pub fn compute_irate(samples: &[Sample]) -> Option<f64> {
    if samples.len() < 2 {
        return None;
    }
    let prev = samples[samples.len() - 2];
    let last = samples[samples.len() - 1];
    let dt = dt_seconds(prev.timestamp_ms, last.timestamp_ms);
    if dt <= 0.0 {
        return None;
    }
    let delta = if last.value >= prev.value { last.value - prev.value } else { last.value };
    Some(delta / dt)
}

pub fn compute_increase(samples: &[Sample]) -> Option<f64> {
    let rate = compute_rate(samples)?;
    let first = samples.first().unwrap();
    let last = samples.last().unwrap();
    Some(rate * dt_seconds(first.timestamp_ms, last.timestamp_ms))
}

pub fn compute_sum_over_time(samples: &[Sample]) -> Option<f64> {
    if samples.is_empty() { return None; }
    Some(samples.iter().map(|s| s.value).sum())
}

pub fn compute_avg_over_time(samples: &[Sample]) -> Option<f64> {
    if samples.is_empty() { return None; }
    Some(samples.iter().map(|s| s.value).sum::<f64>() / samples.len() as f64)
}

pub fn compute_min_over_time(samples: &[Sample]) -> Option<f64> {
    samples.iter().map(|s| s.value).reduce(f64::min)
}

pub fn compute_max_over_time(samples: &[Sample]) -> Option<f64> {
    samples.iter().map(|s| s.value).reduce(f64::max)
}

pub fn compute_count_over_time(samples: &[Sample]) -> Option<f64> {
    if samples.is_empty() { return None; }
    Some(samples.len() as f64)
}

pub fn compute_stdvar_over_time(samples: &[Sample]) -> Option<f64> {
    if samples.is_empty() { return None; }
    let n = samples.len() as f64;
    let mean = samples.iter().map(|s| s.value).sum::<f64>() / n;
    Some(samples.iter().map(|s| (s.value - mean).powi(2)).sum::<f64>() / n)
}

pub fn compute_stddev_over_time(samples: &[Sample]) -> Option<f64> {
    compute_stdvar_over_time(samples).map(f64::sqrt)
}

pub fn quantile_sorted(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() { return f64::NAN; }
    if sorted.len() == 1 { return sorted[0]; }
    let q = q.clamp(0.0, 1.0);
    let rank = q * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    if lower == upper || lower + 1 >= sorted.len() {
        return sorted[lower.min(sorted.len() - 1)];
    }
    let fraction = rank - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * fraction
}

pub fn compute_quantile_over_time(q: f64, samples: &[Sample]) -> Option<f64> {
    if samples.is_empty() { return None; }
    let mut values: Vec<f64> = samples.iter().map(|s| s.value).collect();
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    Some(quantile_sorted(&values, q))
}

pub fn compute_last_over_time(samples: &[Sample]) -> Option<f64> {
    samples.last().map(|s| s.value)
}

pub fn compute_first_over_time(samples: &[Sample]) -> Option<f64> {
    samples.first().map(|s| s.value)
}

pub fn compute_delta(samples: &[Sample]) -> Option<f64> {
    if samples.len() < 2 { return None; }
    Some(samples.last().unwrap().value - samples.first().unwrap().value)
}

pub fn compute_idelta(samples: &[Sample]) -> Option<f64> {
    if samples.len() < 2 { return None; }
    Some(samples[samples.len() - 1].value - samples[samples.len() - 2].value)
}

/// Slope of the least-squares linear regression over `(timestamp_seconds, value)`.
pub fn linear_regression_slope(samples: &[Sample]) -> Option<f64> {
    if samples.len() < 2 { return None; }
    let n = samples.len() as f64;
    let t0 = samples[0].timestamp_ms;
    let xs: Vec<f64> = samples.iter().map(|s| dt_seconds(t0, s.timestamp_ms)).collect();
    let ys: Vec<f64> = samples.iter().map(|s| s.value).collect();
    let sum_x: f64 = xs.iter().sum();
    let sum_y: f64 = ys.iter().sum();
    let sum_xy: f64 = xs.iter().zip(&ys).map(|(x, y)| x * y).sum();
    let sum_x2: f64 = xs.iter().map(|x| x * x).sum();
    let denom = n * sum_x2 - sum_x * sum_x;
    if denom.abs() < f64::EPSILON { return None; }
    Some((n * sum_xy - sum_x * sum_y) / denom)
}

pub fn compute_deriv(samples: &[Sample]) -> Option<f64> {
    linear_regression_slope(samples)
}

/// Predicts the value `t_secs` seconds after the *last* sample in the window.
pub fn compute_predict_linear(samples: &[Sample], t_secs: f64) -> Option<f64> {
    if samples.len() < 2 { return None; }
    let slope = linear_regression_slope(samples)?;
    let n = samples.len() as f64;
    let t0 = samples[0].timestamp_ms;
    let xs: Vec<f64> = samples.iter().map(|s| dt_seconds(t0, s.timestamp_ms)).collect();
    let mean_x = xs.iter().sum::<f64>() / n;
    let mean_y = samples.iter().map(|s| s.value).sum::<f64>() / n;
    let intercept = mean_y - slope * mean_x;
    let last_x = *xs.last().unwrap();
    Some(slope * (last_x + t_secs) + intercept)
}

pub fn compute_changes(samples: &[Sample]) -> Option<f64> {
    if samples.is_empty() { return None; }
    Some(samples.windows(2).filter(|w| (w[1].value - w[0].value).abs() > f64::EPSILON).count() as f64)
}

pub fn compute_resets(samples: &[Sample]) -> Option<f64> {
    if samples.is_empty() { return None; }
    Some(samples.windows(2).filter(|w| w[1].value < w[0].value).count() as f64)
}

pub fn compute_absent_over_time(samples: &[Sample]) -> Option<f64> {
    if samples.is_empty() { Some(1.0) } else { None }
}

pub fn compute_present_over_time(samples: &[Sample]) -> Option<f64> {
    if samples.is_empty() { None } else { Some(1.0) }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Same fixture values as VictoriaMetrics' rollup_test.go, re-timestamped to ms.
    fn test_samples() -> Vec<Sample> {
        let timestamps = [5i64, 15, 24, 36, 49, 60, 78, 80, 97, 115, 120, 130];
        let values = [123.0, 34.0, 44.0, 21.0, 54.0, 34.0, 99.0, 12.0, 44.0, 32.0, 34.0, 34.0];
        timestamps.iter().zip(values.iter()).map(|(&t, &v)| Sample::new(t * 1000, v)).collect()
    }

    fn assert_approx(actual: f64, expected: f64, epsilon: f64) {
        assert!((actual - expected).abs() < epsilon, "expected {expected}, got {actual}");
    }

    #[test]
    fn rate_matches_reference_fixture() {
        assert_approx(compute_rate(&test_samples()).unwrap(), 2.2, 0.001);
    }

    #[test]
    fn increase_matches_reference_fixture() {
        assert_approx(compute_increase(&test_samples()).unwrap(), 275.0, 0.001);
    }

    #[test]
    fn quantile_over_time_matches_reference_fixture() {
        let samples = test_samples();
        assert_approx(compute_quantile_over_time(0.5, &samples).unwrap(), 34.0, 0.001);
        assert_approx(compute_quantile_over_time(0.0, &samples).unwrap(), 12.0, 0.001);
        assert_approx(compute_quantile_over_time(1.0, &samples).unwrap(), 123.0, 0.001);
    }

    #[test]
    fn counter_reset_handled_in_rate_and_counted_by_resets() {
        let samples: Vec<Sample> = [(0i64, 0.0), (10, 5.0), (20, 10.0), (30, 3.0), (40, 8.0)]
            .iter()
            .map(|&(t, v)| Sample::new(t * 1000, v))
            .collect();
        assert_approx(compute_rate(&samples).unwrap(), 18.0 / 40.0, 0.001);
        assert_approx(compute_resets(&samples).unwrap(), 1.0, 0.001);
    }

    #[test]
    fn empty_and_singleton_windows_yield_none_where_undefined() {
        assert_eq!(compute_rate(&[]), None);
        assert_eq!(compute_delta(&[Sample::new(0, 1.0)]), None);
        assert_eq!(compute_sum_over_time(&[Sample::new(0, 1.0)]), Some(1.0));
        assert_eq!(compute_absent_over_time(&[]), Some(1.0));
        assert_eq!(compute_present_over_time(&[]), None);
    }

    #[test]
    fn linear_regression_recovers_exact_slope() {
        let samples: Vec<Sample> = [(1i64, 3.0), (2, 5.0), (3, 7.0), (4, 9.0)]
            .iter()
            .map(|&(t, v)| Sample::new(t * 1000, v))
            .collect();
        assert_approx(linear_regression_slope(&samples).unwrap(), 2.0, 0.001);
        assert_approx(compute_predict_linear(&samples, 5.0).unwrap(), 19.0, 0.001);
    }
}
