//! Boxcar sums with fractional pixel edges.
//!
//! Used to rectify a curved slit onto a regular spatial grid and to get a
//! quick-look S/N along a trace. These are not science extractions: there is
//! no profile weighting and no sky model.

use ndarray::{Array2, ArrayView1, ArrayView2};

/// Per-window sums of one boxcar.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
struct WindowSum {
    flux: f64,
    var: f64,
    good: f64,
    bad: f64,
}

fn window_sum(
    image: ArrayView1<f64>,
    ivar: ArrayView1<f64>,
    gpm: ArrayView1<bool>,
    lo: f64,
    hi: f64,
) -> WindowSum {
    let mut sum = WindowSum::default();
    let nspat = image.len();
    if !(lo.is_finite() && hi.is_finite()) || hi <= lo || nspat == 0 {
        return sum;
    }

    let first = (lo + 0.5).floor().max(0.0) as usize;
    let last = ((hi + 0.5).floor().max(0.0) as usize).min(nspat - 1);
    for k in first..=last {
        let kf = k as f64;
        let overlap = (kf + 0.5).min(hi) - (kf - 0.5).max(lo);
        if overlap <= 0.0 {
            continue;
        }
        if gpm[k] && ivar[k] > 0.0 {
            sum.flux += overlap * image[k];
            // noise of a partial pixel scales with the covered area
            sum.var += overlap / ivar[k];
            sum.good += overlap;
        } else {
            sum.bad += overlap;
        }
    }
    sum
}

/// Rectified boxcar sums.
///
/// All arrays have shape (nspec, ncol). `gpm` is true where the window
/// contains some good pixel coverage and no bad pixel.
#[derive(Debug, Clone)]
pub struct BoxcarResult {
    pub flux: Array2<f64>,
    pub var: Array2<f64>,
    /// Good pixel coverage of each window, in pixels
    pub npix: Array2<f64>,
    pub gpm: Array2<bool>,
}

/// Sum each row between per-column left and right boundaries.
pub fn extract_asym_boxcar(
    image: ArrayView2<f64>,
    ivar: ArrayView2<f64>,
    gpm: ArrayView2<bool>,
    left: ArrayView2<f64>,
    right: ArrayView2<f64>,
) -> BoxcarResult {
    let (nspec, ncol) = left.dim();
    let mut out = BoxcarResult {
        flux: Array2::zeros((nspec, ncol)),
        var: Array2::zeros((nspec, ncol)),
        npix: Array2::zeros((nspec, ncol)),
        gpm: Array2::from_elem((nspec, ncol), false),
    };

    for s in 0..nspec.min(image.nrows()) {
        let (img_row, ivar_row, gpm_row) = (image.row(s), ivar.row(s), gpm.row(s));
        for j in 0..ncol {
            let sum = window_sum(img_row, ivar_row, gpm_row, left[[s, j]], right[[s, j]]);
            out.flux[[s, j]] = sum.flux;
            out.var[[s, j]] = sum.var;
            out.npix[[s, j]] = sum.good;
            out.gpm[[s, j]] = sum.good > 0.0 && sum.bad == 0.0;
        }
    }
    out
}

/// Boxcar sum of `trace ± radius` for every spectral row.
///
/// Returns (flux, variance, usable) per row; a row is usable when any good
/// pixel falls inside the window.
pub fn boxcar_along_trace(
    image: ArrayView2<f64>,
    ivar: ArrayView2<f64>,
    gpm: ArrayView2<bool>,
    trace: &[f64],
    radius: f64,
) -> (Vec<f64>, Vec<f64>, Vec<bool>) {
    let nspec = trace.len().min(image.nrows());
    let mut flux = vec![0.0; nspec];
    let mut var = vec![0.0; nspec];
    let mut usable = vec![false; nspec];
    for s in 0..nspec {
        let sum = window_sum(
            image.row(s),
            ivar.row(s),
            gpm.row(s),
            trace[s] - radius,
            trace[s] + radius,
        );
        flux[s] = sum.flux;
        var[s] = sum.var;
        usable[s] = sum.good > 0.0;
    }
    (flux, var, usable)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::Array2;

    #[test]
    fn test_whole_pixels_match_image() {
        let image = Array2::from_shape_fn((2, 6), |(s, x)| (s * 10 + x) as f64);
        let ivar = Array2::from_elem((2, 6), 4.0);
        let gpm = Array2::from_elem((2, 6), true);
        let left = Array2::from_shape_fn((2, 6), |(_, j)| j as f64 - 0.5);
        let right = &left + 1.0;
        let out = extract_asym_boxcar(image.view(), ivar.view(), gpm.view(), left.view(), right.view());
        for ((s, j), v) in out.flux.indexed_iter() {
            assert_relative_eq!(*v, image[[s, j]], epsilon = 1e-12);
            assert_relative_eq!(out.var[[s, j]], 0.25, epsilon = 1e-12);
        }
        assert!(out.gpm.iter().all(|&g| g));
    }

    #[test]
    fn test_fractional_edges() {
        let image = Array2::from_elem((1, 5), 2.0);
        let ivar = Array2::from_elem((1, 5), 1.0);
        let gpm = Array2::from_elem((1, 5), true);
        let left = Array2::from_elem((1, 1), 0.25);
        let right = Array2::from_elem((1, 1), 2.0);
        let out = extract_asym_boxcar(image.view(), ivar.view(), gpm.view(), left.view(), right.view());
        assert_relative_eq!(out.flux[[0, 0]], 3.5, epsilon = 1e-12);
        assert_relative_eq!(out.var[[0, 0]], 1.75, epsilon = 1e-12);
        assert_relative_eq!(out.npix[[0, 0]], 1.75, epsilon = 1e-12);
    }

    #[test]
    fn test_bad_pixel_flags_window() {
        let image = Array2::from_elem((1, 4), 1.0);
        let ivar = Array2::from_elem((1, 4), 1.0);
        let mut gpm = Array2::from_elem((1, 4), true);
        gpm[[0, 2]] = false;
        let left = Array2::from_shape_fn((1, 2), |(_, j)| 2.0 * j as f64 - 0.5);
        let right = &left + 2.0;
        let out = extract_asym_boxcar(image.view(), ivar.view(), gpm.view(), left.view(), right.view());
        assert!(out.gpm[[0, 0]]);
        assert!(!out.gpm[[0, 1]]);
        assert_relative_eq!(out.flux[[0, 1]], 1.0);
    }

    #[test]
    fn test_boxcar_along_trace() {
        let image = Array2::from_elem((3, 10), 1.0);
        let ivar = Array2::from_elem((3, 10), 1.0);
        let gpm = Array2::from_elem((3, 10), true);
        let (flux, var, ok) =
            boxcar_along_trace(image.view(), ivar.view(), gpm.view(), &[5.0, 5.0, 5.0], 2.0);
        // half pixels at 3 and 7
        assert_relative_eq!(flux[1], 4.0, epsilon = 1e-12);
        assert_relative_eq!(var[1], 4.0, epsilon = 1e-12);
        assert!(ok.iter().all(|&g| g));

        let ivar = Array2::from_elem((3, 10), 0.25);
        let (_, var, _) = boxcar_along_trace(image.view(), ivar.view(), gpm.view(), &[5.0; 3], 2.0);
        assert_relative_eq!(var[0], 16.0, epsilon = 1e-12);
    }
}
