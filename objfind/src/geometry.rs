//! Slit boundaries and the pixel coordinates derived from them.
//!
//! Pixel `x` of a row is centred on coordinate `x` and spans `[x - 0.5, x + 0.5]`.
//! Slit boundaries are continuous spatial coordinates on that grid.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use slit_math::interp::interp_clamped;

use crate::error::ObjFindError;

/// Left and right boundaries of one slit or order, one value per spectral row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlitGeometry {
    pub left: Array1<f64>,
    pub right: Array1<f64>,
    /// Inclusive range of spectral rows where the slit is valid
    pub spec_min_max: Option<(usize, usize)>,
}

impl SlitGeometry {
    pub fn new(left: Array1<f64>, right: Array1<f64>) -> Result<Self, ObjFindError> {
        if left.len() != right.len() {
            return Err(ObjFindError::ShapeMismatch {
                what: "slit boundaries",
                expected: (left.len(), 1),
                got: (right.len(), 1),
            });
        }
        Ok(Self {
            left,
            right,
            spec_min_max: None,
        })
    }

    pub fn with_spec_min_max(mut self, spec_min_max: Option<(usize, usize)>) -> Self {
        self.spec_min_max = spec_min_max;
        self
    }

    /// Boundaries of order `iord` from (nspec, norders) edge arrays.
    pub fn from_order(left: ArrayView2<f64>, right: ArrayView2<f64>, iord: usize) -> Self {
        Self {
            left: left.column(iord).to_owned(),
            right: right.column(iord).to_owned(),
            spec_min_max: None,
        }
    }

    pub fn nspec(&self) -> usize {
        self.left.len()
    }

    pub fn width(&self) -> Array1<f64> {
        &self.right - &self.left
    }

    /// Number of spatial samples of the rectified slit.
    pub fn nsamp(&self) -> usize {
        let max_width = self.width().iter().fold(0.0_f64, |m, &w| m.max(w));
        (max_width.ceil() as usize).max(1)
    }

    /// Valid spectral range: the explicit one, else the rows with on-slit pixels.
    pub fn spec_range(&self, thismask: ArrayView2<bool>) -> (usize, usize) {
        self.spec_min_max
            .or_else(|| spec_min_max_from_mask(thismask))
            .unwrap_or((0, self.nspec().saturating_sub(1)))
    }

    /// Trace at a constant fractional position across the slit.
    pub fn position_at(&self, frac: f64) -> Vec<f64> {
        self.left
            .iter()
            .zip(self.right.iter())
            .map(|(l, r)| l + (r - l) * frac)
            .collect()
    }

    /// Boundaries at a fractional spectral coordinate.
    pub fn edges_at(&self, spec: f64) -> (f64, f64) {
        let rows: Vec<f64> = (0..self.nspec()).map(|s| s as f64).collect();
        let left = interp_clamped(spec, &rows, self.left.as_slice().unwrap_or(&[]))
            .unwrap_or(f64::NAN);
        let right = interp_clamped(spec, &rows, self.right.as_slice().unwrap_or(&[]))
            .unwrap_or(f64::NAN);
        (left, right)
    }

    /// Fractional slit position of a point, clamped to [0, 1].
    pub fn fractional_position(&self, spec: f64, spat: f64) -> f64 {
        let (left, right) = self.edges_at(spec);
        let width = right - left;
        if !(width.is_finite() && width > 0.0) {
            return 0.0;
        }
        ((spat - left) / width).clamp(0.0, 1.0)
    }
}

/// First and last spectral rows containing at least one `true` pixel.
pub fn spec_min_max_from_mask(mask: ArrayView2<bool>) -> Option<(usize, usize)> {
    let rows: Vec<usize> = mask
        .axis_iter(Axis(0))
        .enumerate()
        .filter(|(_, row)| row.iter().any(|&m| m))
        .map(|(s, _)| s)
        .collect();
    Some((*rows.first()?, *rows.last()?))
}

/// Fractional slit coordinate of every on-slit pixel and the edge-proximity mask.
///
/// `ximg` is `(x - left) / width` on-slit and 0 elsewhere. `edgmask` is true for
/// on-slit pixels closer than `trim_edg.0` pixels to the left boundary or
/// `trim_edg.1` pixels to the right boundary.
pub fn ximg_and_edgemask(
    geometry: &SlitGeometry,
    thismask: ArrayView2<bool>,
    trim_edg: (f64, f64),
) -> (Array2<f64>, Array2<bool>) {
    let (nspec, nspat) = thismask.dim();
    let mut ximg = Array2::zeros((nspec, nspat));
    let mut edgmask = Array2::from_elem((nspec, nspat), false);

    for s in 0..nspec.min(geometry.nspec()) {
        let left = geometry.left[s];
        let right = geometry.right[s];
        let width = right - left;
        if !(width > 0.0) {
            continue;
        }
        for x in 0..nspat {
            if !thismask[[s, x]] {
                continue;
            }
            let xf = x as f64;
            ximg[[s, x]] = (xf - left) / width;
            edgmask[[s, x]] = (xf - left) < trim_edg.0 || (right - xf) < trim_edg.1;
        }
    }

    (ximg, edgmask)
}

/// Mask of pixels between the boundaries of one slit.
pub fn slit_mask(left: ArrayView1<f64>, right: ArrayView1<f64>, nspat: usize) -> Array2<bool> {
    Array2::from_shape_fn((left.len(), nspat), |(s, x)| {
        let xf = x as f64;
        xf >= left[s] && xf <= right[s]
    })
}
