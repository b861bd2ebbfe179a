//! Removal of the smooth illumination continuum from spatial profiles.
//!
//! Slit illumination residuals and imperfect sky subtraction leave a slowly
//! varying baseline under the object peaks. It is estimated from the profile
//! pixels away from significant peaks and subtracted before peak finding.

use slit_math::interp::interp_many;
use slit_math::polyfit::{robust_fit, RobustFitConfig};
use slit_math::smooth::{gaussian_filter1d, running_median};
use slit_math::stats::{median, sigma_clipped_stats};

use crate::config::FindObjConfig;
use crate::peaks::detect_peaks;
use crate::profile::FWHM_TO_SIGMA;

/// Largest fraction of the usable pixels that may be masked as peaks.
const MAX_MASK_FRAC: f64 = 0.7;

/// Parameters of [`iter_continuum`].
#[derive(Debug, Clone, PartialEq)]
pub struct ContinuumParams {
    pub fwhm: f64,
    /// Peaks above `median + sigthresh * std` of the residual are masked
    pub sigthresh: f64,
    /// Clipping used for the residual statistics
    pub sigrej: f64,
    pub niter: usize,
    /// Target number of running-median samples across the profile
    pub cont_samp: usize,
    /// Polynomial order of the continuum; `None` interpolates the running median
    pub npoly: Option<usize>,
    pub mask_negative: bool,
    /// Half-width of the masked region around each peak, in FWHM
    pub cont_frac_fwhm: f64,
}

/// Continuum estimate and the pixels it was computed from.
#[derive(Debug, Clone, PartialEq)]
pub struct ContinuumResult {
    pub continuum: Vec<f64>,
    pub cont_gpm: Vec<bool>,
}

fn mask_around_peaks(
    residual: &[f64],
    peaks: &[usize],
    halfwidth: f64,
    max_nmask: usize,
) -> Vec<bool> {
    let mut masked = vec![false; residual.len()];
    let mut ordered = peaks.to_vec();
    ordered.sort_by(|&a, &b| residual[b].abs().total_cmp(&residual[a].abs()));

    let mut nmask = 0;
    for p in ordered {
        for (i, m) in masked.iter_mut().enumerate() {
            if !*m && (i as f64 - p as f64).abs() < halfwidth {
                *m = true;
                nmask += 1;
            }
        }
        if nmask >= max_nmask {
            break;
        }
    }
    masked
}

/// Iteratively estimate the continuum of `spec`, masking significant peaks.
pub fn iter_continuum(spec: &[f64], inmask: &[bool], params: &ContinuumParams) -> ContinuumResult {
    let n = spec.len();
    let mut continuum = vec![0.0; n];
    let mut cont_gpm = inmask.to_vec();

    let navailable = inmask.iter().filter(|&&m| m).count();
    if navailable == 0 {
        log::debug!("Continuum: no usable pixels, returning zero continuum");
        return ContinuumResult {
            continuum,
            cont_gpm,
        };
    }
    let max_nmask = (MAX_MASK_FRAC * navailable as f64).ceil() as usize;
    let xvec: Vec<f64> = (0..n).map(|i| i as f64).collect();

    for iter in 0..params.niter {
        let residual: Vec<f64> = spec.iter().zip(&continuum).map(|(s, c)| s - c).collect();
        let stats = match sigma_clipped_stats(&residual, Some(&cont_gpm), params.sigrej, params.sigrej, 5)
        {
            Ok(stats) => stats,
            Err(e) => {
                log::debug!("Continuum iteration {}: {}", iter, e);
                break;
            }
        };

        let mpd = 0.75 * params.fwhm;
        let mut peaks = detect_peaks(&residual, stats.median + params.sigthresh * stats.std, mpd);
        if params.mask_negative {
            let flipped: Vec<f64> = residual.iter().map(|v| -v).collect();
            peaks.extend(detect_peaks(
                &flipped,
                -stats.median + params.sigthresh * stats.std,
                mpd,
            ));
        }

        let peak_mask = mask_around_peaks(
            &residual,
            &peaks,
            params.cont_frac_fwhm * params.fwhm,
            max_nmask,
        );
        cont_gpm = inmask
            .iter()
            .zip(&peak_mask)
            .map(|(&m, &p)| m && !p)
            .collect();

        let (good_x, good_y): (Vec<f64>, Vec<f64>) = (0..n)
            .filter(|&i| cont_gpm[i])
            .map(|i| (xvec[i], spec[i]))
            .unzip();
        if good_x.is_empty() {
            break;
        }

        let samp_width = (good_x.len() as f64 / params.cont_samp.max(1) as f64).ceil() as usize;
        let cont_med = running_median(&good_y, samp_width);

        let interpolated = || interp_many(&xvec, &good_x, &cont_med).unwrap_or_else(|_| vec![0.0; n]);
        continuum = match params.npoly {
            Some(degree) => {
                let config = RobustFitConfig {
                    degree,
                    lower: 3.0,
                    upper: 3.0,
                    maxiter: 25,
                    minx: Some(0.0),
                    maxx: Some(n.saturating_sub(1) as f64),
                    ..Default::default()
                };
                match robust_fit(&good_x, &cont_med, None, None, &config) {
                    Ok(fit) => fit.eval_many(&xvec),
                    Err(e) => {
                        log::debug!("Continuum polynomial fit failed ({}), interpolating", e);
                        interpolated()
                    }
                }
            }
            None => interpolated(),
        };
    }

    ContinuumResult {
        continuum,
        cont_gpm,
    }
}

/// Smooth a raw profile and, when enabled, subtract its continuum.
///
/// Masked bins are filled from a running median of the good ones before
/// smoothing. When `cont_fit` is off the plain smoothed profile is returned.
pub fn remove_continuum(profile: &[f64], gpm: &[bool], config: &FindObjConfig) -> Vec<f64> {
    let sigma = config.fwhm * FWHM_TO_SIGMA;
    if !config.cont_fit {
        return gaussian_filter1d(profile, sigma);
    }

    let nsamp = profile.len();
    let (good_x, good_y): (Vec<f64>, Vec<f64>) = (0..nsamp)
        .filter(|&i| gpm[i])
        .map(|i| (i as f64, profile[i]))
        .unzip();
    if good_x.is_empty() {
        return gaussian_filter1d(profile, sigma);
    }

    let window = (5.0 * config.fwhm).round() as usize;
    let fill = running_median(&good_y, window);
    let xvec: Vec<f64> = (0..nsamp).map(|i| i as f64).collect();
    let filled_values = interp_many(&xvec, &good_x, &fill).unwrap_or_else(|_| profile.to_vec());
    let level = median(&good_y).unwrap_or(0.0);
    let filled: Vec<f64> = (0..nsamp)
        .map(|i| if gpm[i] { profile[i] } else { filled_values[i] } - level)
        .collect();
    let smoothed = gaussian_filter1d(&filled, sigma);

    let params = ContinuumParams {
        fwhm: config.fwhm,
        sigthresh: config.cont_sig_thresh,
        sigrej: 2.0,
        niter: 3,
        cont_samp: ((nsamp as f64 / sigma).ceil() as usize).min(30),
        npoly: Some(if (nsamp as f64) / config.fwhm < 20.0 {
            0
        } else {
            config.npoly_cont
        }),
        mask_negative: config.has_negative,
        cont_frac_fwhm: 2.0,
    };
    let result = iter_continuum(&smoothed, gpm, &params);
    smoothed
        .iter()
        .zip(&result.continuum)
        .map(|(s, c)| s - c)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn gaussian_on_slope(n: usize, center: f64, amp: f64) -> Vec<f64> {
        (0..n)
            .map(|i| {
                let x = i as f64;
                5.0 + 0.05 * x + amp * (-0.5 * ((x - center) / 1.5).powi(2)).exp()
            })
            .collect()
    }

    #[test]
    fn test_linear_continuum_under_peak() {
        let spec = gaussian_on_slope(120, 60.0, 50.0);
        let params = ContinuumParams {
            fwhm: 3.5,
            sigthresh: 2.0,
            sigrej: 2.0,
            niter: 3,
            cont_samp: 30,
            npoly: Some(1),
            mask_negative: false,
            cont_frac_fwhm: 2.0,
        };
        let result = iter_continuum(&spec, &vec![true; 120], &params);
        assert!(!result.cont_gpm[60]);
        assert_relative_eq!(result.continuum[60], 5.0 + 3.0, epsilon = 0.05);
        assert_relative_eq!(result.continuum[10], 5.0 + 0.5, epsilon = 0.05);
    }

    #[test]
    fn test_fully_masked_input() {
        let params = ContinuumParams {
            fwhm: 3.0,
            sigthresh: 2.0,
            sigrej: 2.0,
            niter: 3,
            cont_samp: 10,
            npoly: None,
            mask_negative: true,
            cont_frac_fwhm: 2.0,
        };
        let result = iter_continuum(&[1.0, 2.0, 3.0], &[false; 3], &params);
        assert_eq!(result.continuum, vec![0.0; 3]);
    }

    #[test]
    fn test_remove_continuum_keeps_peak() {
        let profile = gaussian_on_slope(100, 50.0, 40.0);
        let config = FindObjConfig::default();
        let cleaned = remove_continuum(&profile, &vec![true; 100], &config);
        let peak = cleaned
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i);
        assert_eq!(peak, Some(50));
        assert!(cleaned[10].abs() < 0.5);
        assert!(cleaned[50] > 15.0);
    }

    #[test]
    fn test_disabled_continuum_only_smooths() {
        let profile = vec![2.0; 30];
        let config = FindObjConfig {
            cont_fit: false,
            ..Default::default()
        };
        let out = remove_continuum(&profile, &vec![true; 30], &config);
        assert_relative_eq!(out[15], 2.0, epsilon = 1e-12);
    }
}
