//! Principal component prediction for families of traces.
//!
//! A set of traces sampled on the same spectral grid is decomposed after
//! removing each trace's value at a reference row. The PCA coefficients of
//! every trace are then modelled as smooth polynomials of the reference
//! position, so that traces which were poorly measured can be predicted from
//! their well-measured neighbours.

use nalgebra::{DMatrix, SymmetricEigen};
use ndarray::{Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::polyfit::{robust_fit, Basis, FitError, RobustFitConfig};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PcaError {
    #[error("PCA needs at least {needed} traces, got {got}")]
    TooFewTraces { needed: usize, got: usize },
    #[error("Expected {expected} weights, got {got}")]
    WeightLength { expected: usize, got: usize },
    #[error("Trace array contains non-finite values")]
    NonFinite,
    #[error("Coefficient fit failed: {0}")]
    Fit(#[from] FitError),
}

/// Controls the number of components and the coefficient models.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PcaConfig {
    /// Explicit number of components; overrides `explained_var`
    pub npca: Option<usize>,
    /// Percentage of variance the retained components must explain
    pub explained_var: f64,
    /// Polynomial order used for every coefficient model
    pub coeff_npoly: Option<usize>,
}

impl Default for PcaConfig {
    fn default() -> Self {
        Self {
            npca: None,
            explained_var: 99.0,
            coeff_npoly: None,
        }
    }
}

/// Eigen-decomposition of a trace family.
#[derive(Debug, Clone)]
pub struct PcaDecomposition {
    /// Mean curve over traces, length nspec
    pub mean: Vec<f64>,
    /// Unit-norm components, shape (npca, nspec)
    pub components: Array2<f64>,
    /// Projection of every trace on every component, shape (ntrace, npca)
    pub coeffs: Array2<f64>,
    /// Fraction of the total variance carried by each retained component
    pub explained_ratio: Vec<f64>,
}

impl PcaDecomposition {
    pub fn npca(&self) -> usize {
        self.components.nrows()
    }
}

/// Decompose columns of `data` (shape nspec × ntrace) into principal components.
pub fn pca_decomposition(
    data: ArrayView2<f64>,
    npca: Option<usize>,
    explained_var: f64,
) -> Result<PcaDecomposition, PcaError> {
    let (nspec, ntrace) = data.dim();
    if ntrace < 1 {
        return Err(PcaError::TooFewTraces { needed: 1, got: 0 });
    }
    if data.iter().any(|v| !v.is_finite()) {
        return Err(PcaError::NonFinite);
    }

    let mean: Vec<f64> = data
        .mean_axis(Axis(1))
        .map(|m| m.to_vec())
        .unwrap_or_else(|| vec![0.0; nspec]);

    let x = DMatrix::from_fn(ntrace, nspec, |t, s| data[[s, t]] - mean[s]);
    let gram = &x * x.transpose();
    let eigen = SymmetricEigen::new(gram);

    let mut order: Vec<usize> = (0..ntrace).collect();
    order.sort_by(|&a, &b| eigen.eigenvalues[b].total_cmp(&eigen.eigenvalues[a]));

    let total: f64 = eigen.eigenvalues.iter().filter(|&&l| l > 0.0).sum();
    let rank = if total > 0.0 {
        order
            .iter()
            .take_while(|&&k| eigen.eigenvalues[k] > 1e-12 * total)
            .count()
    } else {
        0
    };

    let keep = match npca {
        Some(n) => n.min(rank),
        None => {
            let mut cumulative = 0.0;
            let mut k = 0;
            while k < rank {
                cumulative += eigen.eigenvalues[order[k]] / total;
                k += 1;
                if cumulative * 100.0 >= explained_var {
                    break;
                }
            }
            k
        }
    };

    let mut components = Array2::zeros((keep, nspec));
    let mut coeffs = Array2::zeros((ntrace, keep));
    let mut explained_ratio = Vec::with_capacity(keep);
    for (c, &k) in order.iter().take(keep).enumerate() {
        let lambda = eigen.eigenvalues[k];
        let norm = lambda.sqrt();
        let v = eigen.eigenvectors.column(k);
        for s in 0..nspec {
            components[[c, s]] = (0..ntrace).map(|t| x[(t, s)] * v[t]).sum::<f64>() / norm;
        }
        for t in 0..ntrace {
            coeffs[[t, c]] = v[t] * norm;
        }
        explained_ratio.push(lambda / total);
    }

    Ok(PcaDecomposition {
        mean,
        components,
        coeffs,
        explained_ratio,
    })
}

fn default_coeff_order(component: usize) -> usize {
    3usize.saturating_sub(component).max(1)
}

/// Predict every trace of a family from a weighted PCA model.
///
/// `traces` has shape nspec × ntrace and `weights` one entry per trace. The
/// returned array has the same shape as `traces`.
pub fn pca_predict_traces(
    traces: ArrayView2<f64>,
    weights: &[f64],
    config: &PcaConfig,
) -> Result<Array2<f64>, PcaError> {
    let (nspec, ntrace) = traces.dim();
    if weights.len() != ntrace {
        return Err(PcaError::WeightLength {
            expected: ntrace,
            got: weights.len(),
        });
    }
    if ntrace < 2 {
        return Err(PcaError::TooFewTraces {
            needed: 2,
            got: ntrace,
        });
    }

    let ref_row = nspec / 2;
    let reference: Vec<f64> = traces.row(ref_row).to_vec();
    let offsets = Array2::from_shape_fn((nspec, ntrace), |(s, t)| traces[[s, t]] - reference[t]);
    let decomposition = pca_decomposition(offsets.view(), config.npca, config.explained_var)?;
    log::debug!(
        "PCA on {} traces kept {} components ({:?})",
        ntrace,
        decomposition.npca(),
        decomposition.explained_ratio
    );

    let mut fitted_coeffs = decomposition.coeffs.clone();
    for c in 0..decomposition.npca() {
        let order = config
            .coeff_npoly
            .unwrap_or_else(|| default_coeff_order(c))
            .min(ntrace - 1);
        let coeff: Vec<f64> = decomposition.coeffs.column(c).to_vec();
        let fit_config = RobustFitConfig {
            degree: order,
            basis: Basis::Polynomial,
            lower: 3.0,
            upper: 3.0,
            maxiter: 25,
            ..Default::default()
        };
        match robust_fit(&reference, &coeff, Some(weights), None, &fit_config) {
            Ok(fit) => {
                for (t, &r) in reference.iter().enumerate() {
                    fitted_coeffs[[t, c]] = fit.eval(r);
                }
            }
            Err(e) => {
                log::warn!("PCA coefficient {} fit failed ({}), using raw coefficients", c, e);
            }
        }
    }

    Ok(Array2::from_shape_fn((nspec, ntrace), |(s, t)| {
        reference[t]
            + decomposition.mean[s]
            + (0..decomposition.npca())
                .map(|c| fitted_coeffs[[t, c]] * decomposition.components[[c, s]])
                .sum::<f64>()
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn linear_family(positions: &[f64], nspec: usize) -> Array2<f64> {
        let mid = (nspec / 2) as f64;
        Array2::from_shape_fn((nspec, positions.len()), |(s, t)| {
            positions[t] + 0.01 * positions[t] * (s as f64 - mid)
        })
    }

    #[test]
    fn test_decomposition_rank_one_family() {
        let family = linear_family(&[10.0, 20.0, 30.0, 40.0], 50);
        let reference = family.row(25).to_owned();
        let offsets = &family - &reference;
        let pca = pca_decomposition(offsets.view(), None, 99.0).unwrap();
        assert_eq!(pca.npca(), 1);
        assert_relative_eq!(pca.explained_ratio[0], 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_predict_reproduces_smooth_family() {
        let family = linear_family(&[10.0, 22.0, 35.0, 47.0, 60.0], 80);
        let predicted = pca_predict_traces(family.view(), &[1.0; 5], &PcaConfig::default()).unwrap();
        for (a, b) in predicted.iter().zip(family.iter()) {
            assert_relative_eq!(*a, *b, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_low_weight_trace_is_pulled_to_family() {
        let positions = [10.0, 20.0, 30.0, 40.0, 50.0, 60.0];
        let mut family = linear_family(&positions, 60);
        let clean = family.column(2).to_owned();
        // constant trace: wrong slope for its position
        for s in 0..60 {
            family[[s, 2]] = 30.0;
        }
        let weights = [100.0, 100.0, 1e-6, 100.0, 100.0, 100.0];
        let config = PcaConfig {
            npca: Some(1),
            coeff_npoly: Some(1),
            ..Default::default()
        };
        let predicted = pca_predict_traces(family.view(), &weights, &config).unwrap();
        let err_end = (predicted[[0, 2]] - clean[0]).abs();
        assert!(err_end < 0.5, "prediction off by {}", err_end);
    }

    #[test]
    fn test_weight_length_error() {
        let family = linear_family(&[1.0, 2.0], 10);
        let err = pca_predict_traces(family.view(), &[1.0], &PcaConfig::default()).unwrap_err();
        assert_eq!(err, PcaError::WeightLength { expected: 2, got: 1 });
    }
}
