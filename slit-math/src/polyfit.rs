//! Weighted polynomial fitting with iterative outlier rejection.
//!
//! Abscissae are mapped onto [-1, 1] using `minx`/`maxx` before the basis is
//! evaluated, so high-order trace fits over thousands of spectral rows stay
//! well conditioned. Both a plain power basis and a Legendre basis are
//! available; the least-squares system is solved with an SVD.

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::stats::{median, MAD_TO_SIGMA};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FitError {
    #[error("Need at least {needed} good points for the fit, got {got}")]
    InsufficientData { needed: usize, got: usize },
    #[error("Input lengths differ: x={x}, y={y}")]
    MismatchedLengths { x: usize, y: usize },
    #[error("Least-squares solve failed: {0}")]
    Singular(String),
}

/// Functional form of the fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Basis {
    #[default]
    Polynomial,
    Legendre,
}

/// A fitted polynomial that can be evaluated anywhere.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolyFit {
    pub coeffs: Vec<f64>,
    pub basis: Basis,
    pub minx: f64,
    pub maxx: f64,
}

impl PolyFit {
    pub fn degree(&self) -> usize {
        self.coeffs.len().saturating_sub(1)
    }

    fn normalize(&self, x: f64) -> f64 {
        normalize(x, self.minx, self.maxx)
    }

    pub fn eval(&self, x: f64) -> f64 {
        basis_row(self.normalize(x), self.degree(), self.basis)
            .iter()
            .zip(&self.coeffs)
            .map(|(b, c)| b * c)
            .sum()
    }

    pub fn eval_many(&self, xs: &[f64]) -> Vec<f64> {
        xs.iter().map(|&x| self.eval(x)).collect()
    }
}

fn normalize(x: f64, minx: f64, maxx: f64) -> f64 {
    if maxx > minx {
        2.0 * (x - minx) / (maxx - minx) - 1.0
    } else {
        0.0
    }
}

fn basis_row(xn: f64, degree: usize, basis: Basis) -> Vec<f64> {
    let mut row = Vec::with_capacity(degree + 1);
    row.push(1.0);
    if degree == 0 {
        return row;
    }
    row.push(xn);
    for n in 1..degree {
        let next = match basis {
            Basis::Polynomial => row[n] * xn,
            Basis::Legendre => {
                let nf = n as f64;
                ((2.0 * nf + 1.0) * xn * row[n] - nf * row[n - 1]) / (nf + 1.0)
            }
        };
        row.push(next);
    }
    row
}

/// Weighted least-squares polynomial fit of `y(x)`.
///
/// Points with a non-positive weight, or a non-finite coordinate, are ignored.
pub fn fit_poly(
    x: &[f64],
    y: &[f64],
    weights: Option<&[f64]>,
    degree: usize,
    basis: Basis,
    minx: f64,
    maxx: f64,
) -> Result<PolyFit, FitError> {
    if x.len() != y.len() {
        return Err(FitError::MismatchedLengths {
            x: x.len(),
            y: y.len(),
        });
    }

    let rows: Vec<(f64, f64, f64)> = x
        .iter()
        .zip(y)
        .enumerate()
        .map(|(i, (&xi, &yi))| (xi, yi, weights.map_or(1.0, |w| w[i])))
        .filter(|(xi, yi, w)| xi.is_finite() && yi.is_finite() && *w > 0.0)
        .collect();

    let ncoeff = degree + 1;
    if rows.len() < ncoeff {
        return Err(FitError::InsufficientData {
            needed: ncoeff,
            got: rows.len(),
        });
    }

    let a = DMatrix::from_fn(rows.len(), ncoeff, |r, c| {
        let (xi, _, w) = rows[r];
        basis_row(normalize(xi, minx, maxx), degree, basis)[c] * w.sqrt()
    });
    let b = DVector::from_iterator(rows.len(), rows.iter().map(|(_, yi, w)| yi * w.sqrt()));

    let coeffs = a
        .svd(true, true)
        .solve(&b, 1e-12)
        .map_err(|e| FitError::Singular(e.to_string()))?;

    Ok(PolyFit {
        coeffs: coeffs.iter().copied().collect(),
        basis,
        minx,
        maxx,
    })
}

/// Parameters for [`robust_fit`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RobustFitConfig {
    pub degree: usize,
    pub basis: Basis,
    /// Lower rejection threshold in units of the residual scatter
    pub lower: f64,
    /// Upper rejection threshold in units of the residual scatter
    pub upper: f64,
    pub maxiter: usize,
    /// Use the MAD of the residuals as scatter instead of their RMS
    pub use_mad: bool,
    /// Absolute residual beyond which a point is always rejected
    pub maxdev: Option<f64>,
    /// Normalisation range; defaults to the range of the input abscissae
    pub minx: Option<f64>,
    pub maxx: Option<f64>,
}

impl Default for RobustFitConfig {
    fn default() -> Self {
        Self {
            degree: 1,
            basis: Basis::Polynomial,
            lower: 3.0,
            upper: 3.0,
            maxiter: 10,
            use_mad: false,
            maxdev: None,
            minx: None,
            maxx: None,
        }
    }
}

/// Result of an outlier-rejecting fit.
#[derive(Debug, Clone, PartialEq)]
pub struct RobustFit {
    pub fit: PolyFit,
    /// Points used in the final fit
    pub gpm: Vec<bool>,
    pub niter: usize,
}

impl RobustFit {
    pub fn eval(&self, x: f64) -> f64 {
        self.fit.eval(x)
    }

    pub fn eval_many(&self, xs: &[f64]) -> Vec<f64> {
        self.fit.eval_many(xs)
    }
}

/// Polynomial fit with iterative, non-sticky rejection of outliers.
///
/// Every iteration re-evaluates all input points against the current fit, so a
/// point rejected early may come back once the fit has moved. Iteration stops
/// when the good-point mask no longer changes, when rejecting would leave too
/// few points, or after `maxiter` refits.
pub fn robust_fit(
    x: &[f64],
    y: &[f64],
    weights: Option<&[f64]>,
    input_gpm: Option<&[bool]>,
    config: &RobustFitConfig,
) -> Result<RobustFit, FitError> {
    if x.len() != y.len() {
        return Err(FitError::MismatchedLengths {
            x: x.len(),
            y: y.len(),
        });
    }

    let usable: Vec<bool> = (0..x.len())
        .map(|i| {
            x[i].is_finite()
                && y[i].is_finite()
                && weights.map_or(true, |w| w[i] > 0.0)
                && input_gpm.map_or(true, |g| g[i])
        })
        .collect();

    let (lo, hi) = x
        .iter()
        .zip(&usable)
        .filter(|(_, &u)| u)
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), (&v, _)| {
            (lo.min(v), hi.max(v))
        });
    let minx = config.minx.unwrap_or(lo);
    let maxx = config.maxx.unwrap_or(hi);
    let needed = config.degree + 1;

    let fit_with = |gpm: &[bool]| -> Result<PolyFit, FitError> {
        let w: Vec<f64> = (0..x.len())
            .map(|i| {
                if gpm[i] {
                    weights.map_or(1.0, |w| w[i])
                } else {
                    0.0
                }
            })
            .collect();
        fit_poly(x, y, Some(&w), config.degree, config.basis, minx, maxx)
    };

    let mut gpm = usable.clone();
    let mut fit = fit_with(&gpm)?;
    let mut niter = 0;
    let yscale = y
        .iter()
        .zip(&usable)
        .filter(|(_, &u)| u)
        .fold(0.0_f64, |m, (v, _)| m.max(v.abs()));

    while niter < config.maxiter {
        niter += 1;
        let resid: Vec<f64> = x.iter().zip(y).map(|(&xi, &yi)| yi - fit.eval(xi)).collect();
        let good_resid: Vec<f64> = resid
            .iter()
            .zip(&gpm)
            .filter(|(_, &g)| g)
            .map(|(r, _)| *r)
            .collect();
        let scale = if config.use_mad {
            let abs: Vec<f64> = good_resid.iter().map(|r| r.abs()).collect();
            median(&abs).map(|m| m * MAD_TO_SIGMA).unwrap_or(0.0)
        } else {
            (good_resid.iter().map(|r| r * r).sum::<f64>() / good_resid.len().max(1) as f64).sqrt()
        };
        let sigma_clip = scale > 1e-10 * (1.0 + yscale);

        let new_gpm: Vec<bool> = (0..x.len())
            .map(|i| {
                usable[i]
                    && (!sigma_clip
                        || (resid[i] >= -config.lower * scale && resid[i] <= config.upper * scale))
                    && config.maxdev.map_or(true, |d| resid[i].abs() <= d)
            })
            .collect();

        if new_gpm == gpm {
            break;
        }
        let ngood = new_gpm.iter().filter(|&&g| g).count();
        if ngood < needed {
            log::debug!(
                "robust_fit: rejection would leave {} of {} needed points, keeping previous fit",
                ngood,
                needed
            );
            break;
        }
        gpm = new_gpm;
        fit = fit_with(&gpm)?;
    }

    Ok(RobustFit { fit, gpm, niter })
}
