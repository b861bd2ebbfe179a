//! 1-D smoothing filters for spatial profiles.

use crate::stats::median;

/// Gaussian filter with "nearest" edge handling and a kernel truncated at 4σ.
///
/// A non-positive or non-finite `sigma` returns the input unchanged.
pub fn gaussian_filter1d(values: &[f64], sigma: f64) -> Vec<f64> {
    if values.is_empty() || !(sigma.is_finite() && sigma > 0.0) {
        return values.to_vec();
    }

    let radius = (4.0 * sigma + 0.5) as isize;
    let kernel: Vec<f64> = (-radius..=radius)
        .map(|k| (-0.5 * (k as f64 / sigma).powi(2)).exp())
        .collect();
    let norm: f64 = kernel.iter().sum();

    let last = values.len() as isize - 1;
    (0..values.len() as isize)
        .map(|i| {
            kernel
                .iter()
                .zip(-radius..=radius)
                .map(|(w, k)| w * values[(i + k).clamp(0, last) as usize])
                .sum::<f64>()
                / norm
        })
        .collect()
}

/// Running median over a centred window of `window` samples.
///
/// The window shrinks at the array ends. Windows of 0 or 1 return a copy.
pub fn running_median(values: &[f64], window: usize) -> Vec<f64> {
    if window <= 1 || values.is_empty() {
        return values.to_vec();
    }
    let half = window / 2;
    let n = values.len();
    (0..n)
        .map(|i| {
            let lo = i.saturating_sub(half);
            let hi = (i + half + 1).min(n);
            median(&values[lo..hi]).unwrap_or(values[i])
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_gaussian_filter_preserves_constant() {
        let out = gaussian_filter1d(&[2.5; 17], 1.7);
        for v in out {
            assert_relative_eq!(v, 2.5, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_gaussian_filter_preserves_flux_of_impulse() {
        let mut values = vec![0.0; 41];
        values[20] = 1.0;
        let out = gaussian_filter1d(&values, 2.0);
        assert_relative_eq!(out.iter().sum::<f64>(), 1.0, epsilon = 1e-12);
        let peak = out
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap();
        assert_eq!(peak, 20);
        assert_relative_eq!(out[18], out[22], epsilon = 1e-15);
    }

    #[test]
    fn test_gaussian_filter_zero_sigma_is_identity() {
        let values = vec![1.0, 5.0, 2.0];
        assert_eq!(gaussian_filter1d(&values, 0.0), values);
    }

    #[test]
    fn test_running_median_removes_spike() {
        let mut values = vec![1.0; 11];
        values[5] = 50.0;
        let out = running_median(&values, 5);
        assert_eq!(out[5], 1.0);
        assert_eq!(out.len(), 11);
    }
}
