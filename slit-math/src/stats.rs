//! Robust statistics: median, MAD scatter and iterative sigma clipping.
//!
//! The clipping routines always use the median as the centre and the
//! normal-consistent median absolute deviation as the scatter, which is what
//! the profile and continuum code need when a bright source occupies a few
//! samples of an otherwise empty slit.

use thiserror::Error;

/// Scale factor turning a median absolute deviation into a Gaussian sigma.
pub const MAD_TO_SIGMA: f64 = 1.4826;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StatsError {
    #[error("Insufficient data points to compute {statistic}: {total} total values, 0 valid")]
    NoValidData {
        /// Name of the statistic being computed
        statistic: &'static str,
        /// Number of values supplied, valid or not
        total: usize,
    },
    #[error("Mask length {mask} does not match data length {data}")]
    MaskLength { mask: usize, data: usize },
}

/// Calculate median of a slice of values, ignoring NaN
///
/// # Returns
///
/// * `Ok(median)` - The median value
/// * `Err(StatsError::NoValidData)` - If no valid values remain after filtering NaN
pub fn median(values: &[f64]) -> Result<f64, StatsError> {
    let mut valid_values: Vec<f64> = values.iter().filter(|v| !v.is_nan()).copied().collect();

    if valid_values.is_empty() {
        return Err(StatsError::NoValidData {
            statistic: "median",
            total: values.len(),
        });
    }

    valid_values.sort_by(|a, b| a.total_cmp(b));
    Ok(sorted_median(&valid_values))
}

fn sorted_median(sorted: &[f64]) -> f64 {
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Normal-consistent median absolute deviation about `center`.
pub fn mad_std(values: &[f64], center: f64) -> Result<f64, StatsError> {
    let deviations: Vec<f64> = values.iter().map(|v| (v - center).abs()).collect();
    median(&deviations)
        .map(|mad| mad * MAD_TO_SIGMA)
        .map_err(|_| StatsError::NoValidData {
            statistic: "mad_std",
            total: values.len(),
        })
}

/// Summary of a sigma-clipped sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClippedStats {
    pub mean: f64,
    pub median: f64,
    /// Population standard deviation of the surviving samples
    pub std: f64,
    /// Number of samples that survived clipping
    pub n_used: usize,
}

fn check_mask(values: &[f64], mask: Option<&[bool]>) -> Result<(), StatsError> {
    match mask {
        Some(m) if m.len() != values.len() => Err(StatsError::MaskLength {
            mask: m.len(),
            data: values.len(),
        }),
        _ => Ok(()),
    }
}

/// Iterative sigma clipping returning the surviving-sample mask.
///
/// `mask` marks the samples allowed to take part (`true` = usable); non-finite
/// samples are never usable. Clipping is cumulative: once rejected a sample
/// stays rejected. Iteration stops when nothing changes or after `maxiters`.
pub fn sigma_clip_mask(
    values: &[f64],
    mask: Option<&[bool]>,
    sigma_lower: f64,
    sigma_upper: f64,
    maxiters: usize,
) -> Result<Vec<bool>, StatsError> {
    check_mask(values, mask)?;
    let mut keep: Vec<bool> = values
        .iter()
        .enumerate()
        .map(|(i, v)| v.is_finite() && mask.map_or(true, |m| m[i]))
        .collect();

    for _ in 0..maxiters {
        let kept: Vec<f64> = values
            .iter()
            .zip(&keep)
            .filter(|(_, &k)| k)
            .map(|(v, _)| *v)
            .collect();
        if kept.is_empty() {
            break;
        }
        let center = median(&kept)?;
        let std = mad_std(&kept, center)?;
        let lo = center - sigma_lower * std;
        let hi = center + sigma_upper * std;

        let mut changed = false;
        for (k, v) in keep.iter_mut().zip(values) {
            if *k && (*v < lo || *v > hi) {
                *k = false;
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }

    Ok(keep)
}

/// Sigma-clipped mean, median and standard deviation of a sample.
pub fn sigma_clipped_stats(
    values: &[f64],
    mask: Option<&[bool]>,
    sigma_lower: f64,
    sigma_upper: f64,
    maxiters: usize,
) -> Result<ClippedStats, StatsError> {
    let keep = sigma_clip_mask(values, mask, sigma_lower, sigma_upper, maxiters)?;
    let kept: Vec<f64> = values
        .iter()
        .zip(&keep)
        .filter(|(_, &k)| k)
        .map(|(v, _)| *v)
        .collect();

    if kept.is_empty() {
        return Err(StatsError::NoValidData {
            statistic: "sigma_clipped_stats",
            total: values.len(),
        });
    }

    let n = kept.len() as f64;
    let mean = kept.iter().sum::<f64>() / n;
    let var = kept.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;

    Ok(ClippedStats {
        mean,
        median: median(&kept)?,
        std: var.sqrt(),
        n_used: kept.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rand_distr::{Distribution, Normal};

    #[test]
    fn test_median_odd_even_and_nan() {
        assert_eq!(median(&[3.0, 1.0, 2.0]).unwrap(), 2.0);
        assert_eq!(median(&[4.0, 1.0, 3.0, 2.0]).unwrap(), 2.5);
        assert_eq!(median(&[f64::NAN, 5.0, 1.0]).unwrap(), 3.0);
    }

    #[test]
    fn test_median_all_nan_is_error() {
        let err = median(&[f64::NAN, f64::NAN]).unwrap_err();
        assert_eq!(
            err,
            StatsError::NoValidData {
                statistic: "median",
                total: 2
            }
        );
    }

    #[test]
    fn test_mad_std_matches_gaussian_sigma() {
        let mut rng = StdRng::seed_from_u64(7);
        let normal = Normal::new(0.0, 2.0).unwrap();
        let samples: Vec<f64> = (0..20_000).map(|_| normal.sample(&mut rng)).collect();
        let std = mad_std(&samples, median(&samples).unwrap()).unwrap();
        assert_relative_eq!(std, 2.0, max_relative = 0.03);
    }

    #[test]
    fn test_sigma_clip_rejects_outlier() {
        let mut values: Vec<f64> = (0..50).map(|i| (i % 5) as f64 * 0.1).collect();
        values[10] = 100.0;
        let keep = sigma_clip_mask(&values, None, 3.0, 3.0, 5).unwrap();
        assert!(!keep[10]);
        assert_eq!(keep.iter().filter(|&&k| k).count(), 49);
    }

    #[test]
    fn test_sigma_clip_respects_input_mask() {
        let values = vec![1.0, 2.0, 3.0, 4.0];
        let mask = vec![true, false, true, true];
        let keep = sigma_clip_mask(&values, Some(&mask), 5.0, 5.0, 3).unwrap();
        assert_eq!(keep, vec![true, false, true, true]);
    }

    #[test]
    fn test_sigma_clip_mask_length_mismatch() {
        let err = sigma_clip_mask(&[1.0, 2.0], Some(&[true]), 3.0, 3.0, 1).unwrap_err();
        assert_eq!(err, StatsError::MaskLength { mask: 1, data: 2 });
    }

    #[test]
    fn test_sigma_clipped_stats_ignores_outliers() {
        let mut values = vec![10.0; 40];
        for (i, v) in values.iter_mut().enumerate() {
            *v += if i % 2 == 0 { 0.5 } else { -0.5 };
        }
        values.push(1.0e4);
        values.push(-1.0e4);
        let stats = sigma_clipped_stats(&values, None, 3.0, 3.0, 5).unwrap();
        assert_relative_eq!(stats.median, 10.0, epsilon = 1e-12);
        assert_relative_eq!(stats.mean, 10.0, epsilon = 1e-12);
        assert_eq!(stats.n_used, 40);
    }

    #[test]
    fn test_sigma_clipped_stats_empty_is_error() {
        let mask = vec![false; 3];
        assert!(sigma_clipped_stats(&[1.0, 2.0, 3.0], Some(&mask), 3.0, 3.0, 5).is_err());
    }
}
