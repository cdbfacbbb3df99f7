//! Descriptive statistics shared by the detectors.

/// Scale factor turning a median absolute deviation into a consistent
/// estimate of the standard deviation for normally distributed data.
pub const MAD_SCALE: f64 = 1.4826;

/// Scale factor turning a mean absolute deviation into a standard deviation
/// estimate (sqrt(pi / 2)).
pub const MEAN_AD_SCALE: f64 = 1.2533;

/// Relative lower bound applied to spreads so flat series still score.
const SPREAD_EPSILON: f64 = 1e-6;

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation.
pub fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let variance = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Median absolute deviation around `center`.
pub fn median_abs_deviation(values: &[f64], center: f64) -> f64 {
    let deviations: Vec<f64> = values.iter().map(|v| (v - center).abs()).collect();
    median(&deviations)
}

/// Mean absolute deviation around `center`.
pub fn mean_abs_deviation(values: &[f64], center: f64) -> f64 {
    let deviations: Vec<f64> = values.iter().map(|v| (v - center).abs()).collect();
    mean(&deviations)
}

/// Clamps a spread estimate away from zero, relative to the magnitude of the
/// baseline it describes.
pub fn floor_spread(spread: f64, center: f64) -> f64 {
    spread.max(SPREAD_EPSILON * center.abs().max(1.0))
}
