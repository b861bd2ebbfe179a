//! Synthetic frames with Gaussian point sources.
//!
//! Images are (nspec, nspat) with the spectral axis first. Noise is Gaussian
//! with a constant sigma and the inverse variance reflects it exactly.

use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

const FWHM_TO_SIGMA: f64 = 1.0 / 2.354_820_045;

/// Array of normally distributed values with a fixed seed.
pub fn simple_normal_array(size: (usize, usize), mean: f64, std_dev: f64, seed: u64) -> Array2<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    let normal_dist = Normal::new(mean, std_dev)
        .expect("Normal distribution parameters must be valid (std_dev > 0)");
    Array2::from_shape_fn(size, |_| normal_dist.sample(&mut rng))
}

/// A point source whose spatial profile is Gaussian in every spectral row.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GaussianSource {
    /// Spatial position at spectral row 0
    pub center: f64,
    /// Drift of the position per spectral row
    pub slope: f64,
    pub fwhm: f64,
    pub amplitude: f64,
}

impl GaussianSource {
    pub fn new(center: f64, fwhm: f64, amplitude: f64) -> Self {
        Self {
            center,
            slope: 0.0,
            fwhm,
            amplitude,
        }
    }

    pub fn position(&self, spec: usize) -> f64 {
        self.center + self.slope * spec as f64
    }

    fn value(&self, spec: usize, spat: usize) -> f64 {
        let sigma = self.fwhm * FWHM_TO_SIGMA;
        let d = spat as f64 - self.position(spec);
        self.amplitude * (-0.5 * (d / sigma).powi(2)).exp()
    }
}

fn add_noise(image: &mut Array2<f64>, noise: f64, seed: u64) -> Array2<f64> {
    if noise > 0.0 {
        *image += &simple_normal_array(image.dim(), 0.0, noise, seed);
        Array2::from_elem(image.dim(), 1.0 / (noise * noise))
    } else {
        Array2::from_elem(image.dim(), 1.0)
    }
}

/// One slit with straight edges.
#[derive(Debug, Clone)]
pub struct SyntheticSlit {
    pub image: Array2<f64>,
    pub ivar: Array2<f64>,
    pub left: Array1<f64>,
    pub right: Array1<f64>,
    pub thismask: Array2<bool>,
}

/// Slit spanning `[left, right]` on an `(nspec, nspat)` frame with `sources` on it.
pub fn gaussian_slit(
    size: (usize, usize),
    edges: (f64, f64),
    sources: &[GaussianSource],
    noise: f64,
    seed: u64,
) -> SyntheticSlit {
    let (left, right) = edges;
    let mut image = Array2::from_shape_fn(size, |(s, x)| {
        sources.iter().map(|src| src.value(s, x)).sum::<f64>()
    });
    let ivar = add_noise(&mut image, noise, seed);
    let thismask = Array2::from_shape_fn(size, |(_, x)| {
        let xf = x as f64;
        xf >= left && xf <= right
    });
    SyntheticSlit {
        image,
        ivar,
        left: Array1::from_elem(size.0, left),
        right: Array1::from_elem(size.0, right),
        thismask,
    }
}

/// An echelle frame of straight, equally wide orders.
#[derive(Debug, Clone)]
pub struct SyntheticEchelle {
    pub image: Array2<f64>,
    pub ivar: Array2<f64>,
    /// Order index of every pixel, -1 between orders
    pub slitmask: Array2<i32>,
    /// (nspec, norders)
    pub left: Array2<f64>,
    pub right: Array2<f64>,
    pub order_vec: Vec<i32>,
}

/// Orders of `order_width` pixels separated by `gap` pixels.
///
/// One source sits at fractional slit position `frac` on every order with
/// the per-order `amplitudes` (zero leaves it out of an order). Echelle order
/// numbers decrease from `first_order`.
#[allow(clippy::too_many_arguments)]
pub fn echelle_frame(
    nspec: usize,
    order_width: usize,
    gap: usize,
    first_order: i32,
    frac: f64,
    fwhm: f64,
    amplitudes: &[f64],
    noise: f64,
    seed: u64,
) -> SyntheticEchelle {
    let norders = amplitudes.len();
    let pitch = order_width + gap;
    let nspat = gap + norders * pitch;
    let start = |i: usize| gap + i * pitch;

    let left = Array2::from_shape_fn((nspec, norders), |(_, i)| start(i) as f64 - 0.5);
    let right = &left + order_width as f64;
    let slitmask = Array2::from_shape_fn((nspec, nspat), |(_, x)| {
        (0..norders)
            .find(|&i| x >= start(i) && x < start(i) + order_width)
            .map_or(-1, |i| i as i32)
    });

    let sources: Vec<GaussianSource> = amplitudes
        .iter()
        .enumerate()
        .filter(|(_, &a)| a > 0.0)
        .map(|(i, &a)| GaussianSource::new(left[[0, i]] + frac * order_width as f64, fwhm, a))
        .collect();
    let mut image = Array2::from_shape_fn((nspec, nspat), |(s, x)| {
        sources.iter().map(|src| src.value(s, x)).sum::<f64>()
    });
    let ivar = add_noise(&mut image, noise, seed);

    SyntheticEchelle {
        image,
        ivar,
        slitmask,
        left,
        right,
        order_vec: (0..norders as i32).map(|i| first_order - i).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normal_array_is_reproducible() {
        let a = simple_normal_array((8, 8), 0.0, 1.0, 7);
        let b = simple_normal_array((8, 8), 0.0, 1.0, 7);
        assert_eq!(a, b);
    }

    #[test]
    fn test_slit_source_peaks_at_center() {
        let slit = gaussian_slit((10, 30), (-0.5, 29.5), &[GaussianSource::new(12.0, 3.0, 50.0)], 0.0, 0);
        let row = slit.image.row(5);
        let peak = (0..30).max_by(|&a, &b| row[a].total_cmp(&row[b])).unwrap();
        assert_eq!(peak, 12);
        assert!(slit.thismask.iter().all(|&m| m));
    }

    #[test]
    fn test_echelle_layout() {
        let frame = echelle_frame(20, 30, 10, 50, 0.5, 3.0, &[10.0, 0.0, 10.0], 0.0, 0);
        assert_eq!(frame.image.dim(), (20, 130));
        assert_eq!(frame.slitmask[[0, 5]], -1);
        assert_eq!(frame.slitmask[[0, 10]], 0);
        assert_eq!(frame.slitmask[[0, 50]], 1);
        assert_eq!(frame.order_vec, vec![50, 49, 48]);
        // no source on the middle order
        assert!(frame.image.row(3).iter().skip(50).take(30).all(|&v| v.abs() < 1e-6));
    }
}
