//! Linear interpolation on sorted 1-D grids.
//!
//! Unlike a strict interpolator, [`interp_clamped`] never fails for an
//! abscissa outside the grid: it returns the nearest end value, which is what
//! trace shifting and profile lookups want at slit edges.

use thiserror::Error;

/// Errors that can occur during interpolation operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InterpError {
    #[error("Input vectors must have at least 1 point")]
    InsufficientData,
    #[error("Input vectors must have the same length ({xs} vs {ys})")]
    MismatchedLengths { xs: usize, ys: usize },
    #[error("X values must be sorted in ascending order")]
    UnsortedData,
}

fn validate(xs: &[f64], ys: &[f64]) -> Result<(), InterpError> {
    if xs.len() != ys.len() {
        return Err(InterpError::MismatchedLengths {
            xs: xs.len(),
            ys: ys.len(),
        });
    }
    if xs.is_empty() {
        return Err(InterpError::InsufficientData);
    }
    if xs.windows(2).any(|w| w[1] < w[0]) {
        return Err(InterpError::UnsortedData);
    }
    Ok(())
}

fn interp_unchecked(x: f64, xs: &[f64], ys: &[f64]) -> f64 {
    let n = xs.len();
    if x <= xs[0] {
        return ys[0];
    }
    if x >= xs[n - 1] {
        return ys[n - 1];
    }

    // partition_point returns the index of the first element > x
    let idx = xs.partition_point(|&val| val <= x);
    let (x1, x2) = (xs[idx - 1], xs[idx]);
    let (y1, y2) = (ys[idx - 1], ys[idx]);
    if x2 == x1 {
        return y2;
    }
    let t = (x - x1) / (x2 - x1);
    y1 + t * (y2 - y1)
}

/// Linear interpolation of `(xs, ys)` at `x`, clamped to the end values.
///
/// # Examples
///
/// ```rust
/// use slit_math::interp::interp_clamped;
///
/// let xs = vec![0.0, 1.0, 2.0];
/// let ys = vec![0.0, 2.0, 4.0];
/// assert_eq!(interp_clamped(1.5, &xs, &ys).unwrap(), 3.0);
/// assert_eq!(interp_clamped(-1.0, &xs, &ys).unwrap(), 0.0);
/// assert_eq!(interp_clamped(9.0, &xs, &ys).unwrap(), 4.0);
/// ```
pub fn interp_clamped(x: f64, xs: &[f64], ys: &[f64]) -> Result<f64, InterpError> {
    validate(xs, ys)?;
    Ok(interp_unchecked(x, xs, ys))
}

/// Vectorised [`interp_clamped`], validating the grid once.
pub fn interp_many(x: &[f64], xs: &[f64], ys: &[f64]) -> Result<Vec<f64>, InterpError> {
    validate(xs, ys)?;
    Ok(x.iter().map(|&v| interp_unchecked(v, xs, ys)).collect())
}
