//! Masks of the slit pixels that are safe to use for sky fitting.
//!
//! Two masks are built and combined. The flux mask drops pixels where a
//! Gaussian model of each object's spatial S/N profile is still significant;
//! the geometric mask drops a fixed band around each trace.

use ndarray::{Array2, ArrayView2, Zip};
use slit_math::interp::interp_many;

use crate::config::SkyMaskConfig;
use crate::geometry::{ximg_and_edgemask, SlitGeometry};
use crate::specobj::{SpecObj, SpecObjs};

/// Below this fraction of usable slit pixels the geometric mask is dropped.
const MIN_SKY_FRACTION: f64 = 0.10;

fn has_peakflux(obj: &SpecObj) -> bool {
    matches!(obj.smash_peakflux, Some(f) if f != 0.0)
}

/// Model S/N profile of `obj` on the rectified bin centres `xtmp`.
fn object_profile(obj: &SpecObj, xtmp: &[f64], nsamp: usize) -> Vec<f64> {
    let nsamp = nsamp as f64;
    let snr = obj.smash_snr.unwrap_or(0.0);
    let fwhm = obj.fwhm.unwrap_or(0.0);
    let halfwidth = obj.maskwidth.unwrap_or(0.0) / nsamp;
    xtmp.iter()
        .map(|&x| {
            let sep = (x - obj.spat_fracpos).abs();
            if sep > halfwidth || fwhm <= 0.0 {
                return 0.0;
            }
            snr * (-2.77 * (sep * nsamp).powi(2) / (fwhm * fwhm)).max(-9.0).exp()
        })
        .collect()
}

/// Build the sky mask of one slit: `true` marks sky pixels.
///
/// Off-slit pixels are always `false`. With no objects the slit mask itself is
/// returned.
pub fn create_skymask(
    sobjs: &SpecObjs,
    thismask: ArrayView2<bool>,
    geometry: &SlitGeometry,
    config: &SkyMaskConfig,
) -> Array2<bool> {
    if sobjs.is_empty() {
        log::info!("No objects on this slit, the whole slit is sky");
        return thismask.to_owned();
    }

    let (nspec, nspat) = thismask.dim();
    let (ximg, _edgmask) = ximg_and_edgemask(geometry, thismask, config.trim_edg);
    let nsamp = geometry.nsamp();
    let xtmp: Vec<f64> = (0..nsamp).map(|j| (j as f64 + 0.5) / nsamp as f64).collect();

    let mut skymask_objflux = thismask.to_owned();
    for obj in sobjs.iter().filter(|o| has_peakflux(o)) {
        let qobj = object_profile(obj, &xtmp, nsamp);
        for s in 0..nspec {
            let onslit: Vec<usize> = (0..nspat).filter(|&x| thismask[[s, x]]).collect();
            let xs: Vec<f64> = onslit.iter().map(|&x| ximg[[s, x]]).collect();
            let Ok(model) = interp_many(&xs, &xtmp, &qobj) else {
                continue;
            };
            for (&x, q) in onslit.iter().zip(model) {
                if q >= config.skymask_snr_thresh {
                    skymask_objflux[[s, x]] = false;
                }
            }
        }
    }

    let mut skymask_fwhm = thismask.to_owned();
    for obj in sobjs.iter() {
        let radius = config
            .box_rad_pix
            .unwrap_or_else(|| obj.fwhm.unwrap_or(0.0));
        for (s, &center) in obj.trace_spat.iter().enumerate().take(nspec) {
            for x in 0..nspat {
                let xf = x as f64;
                if xf > center - radius && xf < center + radius {
                    skymask_fwhm[[s, x]] = false;
                }
            }
        }
    }

    let nslit = thismask.iter().filter(|&&m| m).count();
    let nsky = Zip::from(&skymask_fwhm)
        .and(&thismask)
        .fold(0usize, |n, &sky, &on| n + usize::from(sky && on));
    if nslit > 0 && (nsky as f64) < MIN_SKY_FRACTION * nslit as f64 {
        log::warn!(
            "Masking within the object FWHM leaves only {:.1}% of the slit; ignoring that mask",
            100.0 * nsky as f64 / nslit as f64
        );
        skymask_fwhm = thismask.to_owned();
    }

    let use_or = config.box_rad_pix.is_none() && sobjs.iter().all(has_peakflux);
    let mut skymask = Array2::from_elem((nspec, nspat), false);
    Zip::from(&mut skymask)
        .and(&skymask_objflux)
        .and(&skymask_fwhm)
        .and(&thismask)
        .for_each(|out, &flux, &geom, &on| {
            let combined = if use_or { flux || geom } else { flux && geom };
            *out = combined && on;
        });
    skymask
}
