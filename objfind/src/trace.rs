//! Iterative, polynomial-constrained trace fitting.
//!
//! Each round centroids the object in every spectral row around the current
//! trace and fits a Legendre polynomial through the centroids, rejecting rows
//! that sit more than `maxdev` pixels off the fit.

use ndarray::{Array2, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};
use slit_math::polyfit::{robust_fit, Basis, RobustFitConfig};

use crate::profile::FWHM_TO_SIGMA;

/// Weighting of pixels when centroiding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Weighting {
    /// Boxcar of ±FWHM around the current position
    Flux,
    /// Gaussian of the nominal FWHM, truncated at 3σ
    Gaussian,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceFitParams {
    /// Legendre polynomial order
    pub degree: usize,
    pub weighting: Weighting,
    pub fwhm: f64,
    pub maxdev: f64,
    pub niter: usize,
}

/// Fitted traces with the measurements behind them, all (nspec, ntrace).
#[derive(Debug, Clone)]
pub struct TraceFit {
    pub fit: Array2<f64>,
    /// Last set of centroids, NaN where no centroid could be measured
    pub centroids: Array2<f64>,
    /// Rows used by the final polynomial fit
    pub gpm: Array2<bool>,
}

/// Weighted centroid of a row around `center`; `None` when unmeasurable.
fn centroid(
    row: ArrayView1<f64>,
    gpm: ArrayView1<bool>,
    center: f64,
    weighting: Weighting,
    fwhm: f64,
) -> Option<f64> {
    let nspat = row.len();
    if !center.is_finite() || nspat == 0 {
        return None;
    }
    let sigma = fwhm * FWHM_TO_SIGMA;
    let halfwidth = match weighting {
        Weighting::Flux => fwhm,
        Weighting::Gaussian => 3.0 * sigma,
    };
    let lo = center - halfwidth;
    let hi = center + halfwidth;
    if hi < -0.5 || lo > nspat as f64 - 0.5 {
        return None;
    }

    let first = (lo + 0.5).floor().max(0.0) as usize;
    let last = ((hi + 0.5).floor().max(0.0) as usize).min(nspat - 1);
    let mut sum_w = 0.0;
    let mut sum_wx = 0.0;
    for k in first..=last {
        if !gpm[k] || !row[k].is_finite() {
            continue;
        }
        let kf = k as f64;
        let weight = match weighting {
            Weighting::Flux => ((kf + 0.5).min(hi) - (kf - 0.5).max(lo)).max(0.0),
            Weighting::Gaussian => (-0.5 * ((kf - center) / sigma).powi(2)).exp(),
        };
        sum_w += weight * row[k];
        sum_wx += weight * row[k] * kf;
    }

    if sum_w <= 0.0 {
        return None;
    }
    let xc = sum_wx / sum_w;
    ((xc - center).abs() <= halfwidth).then_some(xc)
}

/// Refine every column of `xinit` (shape nspec × ntrace) against `image`.
///
/// `gpm` marks usable image pixels and `trace_gpm` (same shape as `xinit`)
/// the rows each trace may be measured on. A trace with too few measurable
/// rows keeps its current guess.
pub fn fit_trace(
    image: ArrayView2<f64>,
    gpm: ArrayView2<bool>,
    xinit: ArrayView2<f64>,
    trace_gpm: ArrayView2<bool>,
    params: &TraceFitParams,
) -> TraceFit {
    let (nspec, ntrace) = xinit.dim();
    let mut fit = xinit.to_owned();
    let mut centroids = Array2::from_elem((nspec, ntrace), f64::NAN);
    let mut fit_gpm = Array2::from_elem((nspec, ntrace), false);

    let rows: Vec<f64> = (0..nspec).map(|s| s as f64).collect();
    let config = RobustFitConfig {
        degree: params.degree,
        basis: Basis::Legendre,
        // only the absolute deviation limit rejects rows
        lower: f64::INFINITY,
        upper: f64::INFINITY,
        maxiter: 10,
        use_mad: false,
        maxdev: Some(params.maxdev),
        minx: Some(0.0),
        maxx: Some(nspec.saturating_sub(1) as f64),
    };

    for t in 0..ntrace {
        for iter in 0..params.niter {
            let mut xpos = vec![f64::NAN; nspec];
            for s in 0..nspec.min(image.nrows()) {
                if trace_gpm[[s, t]] {
                    if let Some(xc) =
                        centroid(image.row(s), gpm.row(s), fit[[s, t]], params.weighting, params.fwhm)
                    {
                        xpos[s] = xc;
                    }
                }
            }

            let result = match robust_fit(&rows, &xpos, None, None, &config) {
                Ok(result) => result,
                Err(e) => {
                    log::debug!("Trace {} iteration {}: keeping current trace ({})", t, iter, e);
                    break;
                }
            };

            let mut max_shift: f64 = 0.0;
            for s in 0..nspec {
                let new = result.eval(rows[s]);
                max_shift = max_shift.max((new - fit[[s, t]]).abs());
                fit[[s, t]] = new;
                centroids[[s, t]] = xpos[s];
                fit_gpm[[s, t]] = result.gpm[s];
            }
            if max_shift < 1e-3 {
                break;
            }
        }
    }

    TraceFit {
        fit,
        centroids,
        gpm: fit_gpm,
    }
}

/// Flux-weighted then Gaussian-weighted fit of every column of `xinit`.
///
/// The second round is seeded with the result of the first.
pub fn refine_traces(
    image: ArrayView2<f64>,
    gpm: ArrayView2<bool>,
    xinit: ArrayView2<f64>,
    trace_gpm: ArrayView2<bool>,
    params: &TraceFitParams,
) -> Array2<f64> {
    let flux = fit_trace(
        image,
        gpm,
        xinit,
        trace_gpm,
        &TraceFitParams {
            weighting: Weighting::Flux,
            ..params.clone()
        },
    );
    fit_trace(
        image,
        gpm,
        flux.fit.view(),
        trace_gpm,
        &TraceFitParams {
            weighting: Weighting::Gaussian,
            ..params.clone()
        },
    )
    .fit
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn tilted_source(nspec: usize, nspat: usize) -> (Array2<f64>, Vec<f64>) {
        let truth: Vec<f64> = (0..nspec).map(|s| 15.0 + 0.04 * s as f64).collect();
        let sigma = 3.0 / 2.3548;
        let image = Array2::from_shape_fn((nspec, nspat), |(s, x)| {
            100.0 * (-0.5 * ((x as f64 - truth[s]) / sigma).powi(2)).exp()
        });
        (image, truth)
    }

    #[test]
    fn test_centroid_symmetric_profile() {
        let row = ndarray::arr1(&[0.0, 1.0, 4.0, 1.0, 0.0]);
        let gpm = ndarray::arr1(&[true; 5]);
        let xc = centroid(row.view(), gpm.view(), 2.3, Weighting::Flux, 2.0).unwrap();
        assert_relative_eq!(xc, 2.0, epsilon = 0.05);
    }

    #[test]
    fn test_centroid_empty_window() {
        let row = ndarray::arr1(&[0.0; 5]);
        let gpm = ndarray::arr1(&[true; 5]);
        assert!(centroid(row.view(), gpm.view(), 2.0, Weighting::Gaussian, 2.0).is_none());
    }

    #[test]
    fn test_refine_tilted_trace() {
        let (image, truth) = tilted_source(80, 40);
        let gpm = Array2::from_elem(image.dim(), true);
        let guess = vec![16.0; 80];
        let params = TraceFitParams {
            degree: 5,
            weighting: Weighting::Flux,
            fwhm: 3.0,
            maxdev: 2.0,
            niter: 7,
        };
        let init = Array2::from_shape_fn((80, 1), |(s, _)| guess[s]);
        let trace_gpm = Array2::from_elem((80, 1), true);
        let fitted = refine_traces(image.view(), gpm.view(), init.view(), trace_gpm.view(), &params);
        for (f, t) in fitted.column(0).iter().zip(&truth) {
            assert_relative_eq!(*f, *t, epsilon = 0.1);
        }
    }

    #[test]
    fn test_unmeasurable_trace_keeps_guess() {
        let image = Array2::zeros((20, 10));
        let gpm = Array2::from_elem((20, 10), true);
        let init = Array2::from_elem((20, 1), 4.5);
        let trace_gpm = Array2::from_elem((20, 1), true);
        let params = TraceFitParams {
            degree: 3,
            weighting: Weighting::Gaussian,
            fwhm: 3.0,
            maxdev: 2.0,
            niter: 3,
        };
        let out = fit_trace(image.view(), gpm.view(), init.view(), trace_gpm.view(), &params);
        assert!(out.fit.iter().all(|&v| v == 4.5));
    }
}
