//! Collapse a slit into 1-D spatial flux and S/N profiles.
//!
//! The slit is rectified onto `nsamp` spatial bins per spectral row, a
//! per-row sky level is removed, outlying values are clipped along the
//! spectral direction and the surviving values are summed over the rows of
//! the find range.

use ndarray::{Array2, ArrayView2, Axis};
use slit_math::smooth::gaussian_filter1d;
use slit_math::stats::{median, sigma_clip_mask, sigma_clipped_stats};

use crate::extract::extract_asym_boxcar;
use crate::geometry::SlitGeometry;

/// Conversion from Gaussian FWHM to sigma.
pub const FWHM_TO_SIGMA: f64 = 1.0 / 2.3548;

/// Minimum fraction of find-range rows a bin needs to survive clipping in.
const MIN_ROW_FRACTION: f64 = 0.3;

/// Spatial profiles of one slit on the rectified grid.
#[derive(Debug, Clone, PartialEq)]
pub struct SmashedProfile {
    pub nsamp: usize,
    pub flux: Vec<f64>,
    pub snr: Vec<f64>,
    pub flux_smth: Vec<f64>,
    pub snr_smth: Vec<f64>,
    /// Bins with enough surviving rows
    pub gpm: Vec<bool>,
}

impl SmashedProfile {
    /// Centre of rectified bin `j` as a fraction of the slit width.
    pub fn bin_fraction(&self, j: f64) -> f64 {
        j / self.nsamp as f64
    }
}

/// Per-row bin boundaries of the rectified slit.
pub fn rectified_bounds(geometry: &SlitGeometry, nsamp: usize) -> (Array2<f64>, Array2<f64>) {
    let nspec = geometry.nspec();
    let step = |s: usize| (geometry.right[s] - geometry.left[s]) / nsamp as f64;
    let left = Array2::from_shape_fn((nspec, nsamp), |(s, j)| geometry.left[s] + step(s) * j as f64);
    let right = Array2::from_shape_fn((nspec, nsamp), |(s, j)| {
        geometry.left[s] + step(s) * (j + 1) as f64
    });
    (left, right)
}

/// Build the smashed profiles; `None` when no spatial bin survives.
///
/// `gpm` should already combine the slit mask with any input bad-pixel mask.
/// `find_range` is the inclusive spectral row range summed over.
pub fn smash_profile(
    image: ArrayView2<f64>,
    ivar: ArrayView2<f64>,
    gpm: ArrayView2<bool>,
    geometry: &SlitGeometry,
    find_range: (usize, usize),
    fwhm: f64,
) -> Option<SmashedProfile> {
    let nsamp = geometry.nsamp();
    let (left, right) = rectified_bounds(geometry, nsamp);
    let rect = extract_asym_boxcar(image, ivar, gpm, left.view(), right.view());
    let nspec = rect.flux.nrows();

    // Sky level of each row
    let mut sky: Vec<Option<f64>> = rect
        .flux
        .axis_iter(Axis(0))
        .zip(rect.gpm.axis_iter(Axis(0)))
        .map(|(row, good)| {
            let values = row.to_vec();
            let mask = good.to_vec();
            sigma_clipped_stats(&values, Some(&mask), 3.0, 3.0, 5)
                .ok()
                .map(|s| s.median)
                .filter(|m| m.is_finite())
        })
        .collect();
    let known: Vec<f64> = sky.iter().flatten().copied().collect();
    let fill = median(&known).unwrap_or(0.0);
    let nfilled = sky.iter().filter(|s| s.is_none()).count();
    if nfilled > 0 {
        log::debug!("Filling sky level of {} rows with {:.3}", nfilled, fill);
    }
    let sky: Vec<f64> = sky.drain(..).map(|s| s.unwrap_or(fill)).collect();

    let sub = Array2::from_shape_fn((nspec, nsamp), |(s, j)| rect.flux[[s, j]] - sky[s]);

    // Clip each spatial bin along the spectral direction
    let mut keep = Array2::from_elem((nspec, nsamp), false);
    for j in 0..nsamp {
        let values = sub.column(j).to_vec();
        let mask = rect.gpm.column(j).to_vec();
        if let Ok(column_keep) = sigma_clip_mask(&values, Some(&mask), 5.0, 5.0, 25) {
            for (s, k) in column_keep.into_iter().enumerate() {
                keep[[s, j]] = k;
            }
        }
    }

    let (find_min, find_max) = (find_range.0, find_range.1.min(nspec.saturating_sub(1)));
    if find_min > find_max {
        return None;
    }
    let nsmash = (find_max - find_min + 1) as f64;

    let mut flux = vec![0.0; nsamp];
    let mut snr = vec![0.0; nsamp];
    let mut bin_gpm = vec![false; nsamp];
    for j in 0..nsamp {
        let mut npix = 0usize;
        let mut flux_sum = 0.0;
        let mut var_sum = 0.0;
        for s in find_min..=find_max {
            if keep[[s, j]] {
                npix += 1;
                flux_sum += sub[[s, j]];
                var_sum += rect.var[[s, j]];
            }
        }
        if npix as f64 >= MIN_ROW_FRACTION * nsmash {
            bin_gpm[j] = true;
            flux[j] = flux_sum;
            snr[j] = if var_sum > 0.0 { flux_sum / var_sum.sqrt() } else { 0.0 };
        }
    }

    if !bin_gpm.iter().any(|&g| g) {
        log::info!("No spatial bin of the slit has enough good rows to build a profile");
        return None;
    }

    let sigma = fwhm * FWHM_TO_SIGMA;
    Some(SmashedProfile {
        nsamp,
        flux_smth: gaussian_filter1d(&flux, sigma),
        snr_smth: gaussian_filter1d(&snr, sigma),
        flux,
        snr,
        gpm: bin_gpm,
    })
}
