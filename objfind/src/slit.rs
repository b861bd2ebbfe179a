//! Object finding within a single slit or echelle order.

use ndarray::{Array2, ArrayView2, Zip};

use crate::config::FindObjConfig;
use crate::continuum::remove_continuum;
use crate::error::ObjFindError;
use crate::fwhm::measure_fwhm;
use crate::geometry::SlitGeometry;
use crate::hand::{add_hand_apertures, apertures_on_slit, HandAperture, HandContext};
use crate::peaks::{classify_peaks, detect_peaks, snr_threshold, PeakStatus};
use crate::profile::smash_profile;
use crate::qa::{PeakCandidate, PeakQa};
use crate::specobj::{SpecObj, SpecObjMeta, SpecObjs};
use crate::trace::{refine_traces, TraceFitParams, Weighting};

/// Everything known about the slit being searched.
///
/// The image should be sky subtracted, or at least have a smooth background,
/// for the traces to be unbiased.
pub struct SlitInput<'a> {
    pub image: ArrayView2<'a, f64>,
    pub ivar: ArrayView2<'a, f64>,
    /// Pixels belonging to this slit
    pub thismask: ArrayView2<'a, bool>,
    pub geometry: &'a SlitGeometry,
    /// Good pixels; defaults to `thismask`
    pub inmask: Option<ArrayView2<'a, bool>>,
    /// Trace of a bright standard used as the shape of the initial traces
    pub std_trace: Option<&'a [f64]>,
    pub hand_apertures: &'a [HandAperture],
    pub meta: SpecObjMeta,
}

impl SlitInput<'_> {
    fn check_shapes(&self) -> Result<(), ObjFindError> {
        let dim = self.image.dim();
        let check = |what: &'static str, got: (usize, usize)| {
            if got == dim {
                Ok(())
            } else {
                Err(ObjFindError::ShapeMismatch {
                    what,
                    expected: dim,
                    got,
                })
            }
        };
        check("ivar", self.ivar.dim())?;
        check("thismask", self.thismask.dim())?;
        if let Some(inmask) = &self.inmask {
            check("inmask", inmask.dim())?;
        }
        check("slit boundaries", (self.geometry.nspec(), dim.1))?;
        if let Some(std) = self.std_trace {
            check("std_trace", (std.len(), dim.1))?;
        }
        Ok(())
    }

    /// Good pixels of the slit: `thismask & inmask`.
    pub fn good_pixels(&self) -> Array2<bool> {
        match &self.inmask {
            Some(inmask) => Zip::from(&self.thismask)
                .and(inmask)
                .map_collect(|&t, &i| t && i),
            None => self.thismask.to_owned(),
        }
    }
}

/// Sky-mask half-width of an object, growing slowly with its significance.
pub fn mask_width(extract_maskwidth: f64, fwhm: f64, snr: Option<f64>) -> f64 {
    extract_maskwidth * fwhm * (1.0 + 0.5 * snr.unwrap_or(1.0).max(1.0).log10())
}

/// Find objects in one slit.
///
/// Returns an empty collection when nothing significant is found. Every
/// returned object has a fitted trace, a FWHM, an `objid` (1..N in order of
/// spatial position) and a box radius.
pub fn objs_in_slit(input: &SlitInput, config: &FindObjConfig) -> Result<SpecObjs, ObjFindError> {
    config.validate()?;
    input.check_shapes()?;

    let start = std::time::Instant::now();
    let (nspec, _nspat) = input.image.dim();
    let specmid = nspec / 2;
    let geometry = input.geometry;
    let gpm = input.good_pixels();

    let spec_range = geometry.spec_range(input.thismask);
    let find_range = config.find_min_max.unwrap_or(spec_range);

    let Some(profile) = smash_profile(
        input.image,
        input.ivar,
        gpm.view(),
        geometry,
        find_range,
        config.fwhm,
    ) else {
        log::info!("No objects found on slit {}", input.meta.slitid);
        return Ok(SpecObjs::new());
    };
    let nsamp = profile.nsamp;

    let snr_cont = remove_continuum(&profile.snr, &profile.gpm, config);
    let flux_cont = remove_continuum(&profile.flux, &profile.gpm, config);
    let threshold = snr_threshold(
        &snr_cont,
        config.snr_thresh,
        config.peak_thresh,
        config.abs_thresh,
    );

    let peaks = detect_peaks(&snr_cont, threshold, 0.75 * config.fwhm);
    let x_peaks: Vec<f64> = peaks.iter().map(|&x| x as f64).collect();
    let snr_peaks: Vec<f64> = peaks.iter().map(|&x| snr_cont[x]).collect();
    let flux_peaks: Vec<f64> = peaks.iter().map(|&x| flux_cont[x]).collect();
    let status = classify_peaks(&x_peaks, &snr_peaks, nsamp, config.trim_edg, config.nperslit);

    let xsize_mid = geometry.right[specmid] - geometry.left[specmid];
    let to_spat = |x: f64| geometry.left[specmid] + xsize_mid * x / nsamp as f64;

    let near_edge: Vec<f64> = x_peaks
        .iter()
        .zip(&status)
        .filter(|(_, &s)| s == PeakStatus::NearEdge)
        .map(|(&x, _)| to_spat(x))
        .collect();
    if !near_edge.is_empty() {
        log::warn!(
            "Discarding {} peak(s) at spatial pixels {:?} which land within trim_edg = {:?} pixels of the edge of this {} pixel wide slit",
            near_edge.len(),
            near_edge,
            config.trim_edg,
            nsamp
        );
        log::warn!("Decrease trim_edg to keep them; such edge objects are often spurious");
    }

    let qa = PeakQa {
        title: format!("Slit {}", input.meta.slitid),
        snr_thresh: threshold,
        spat_vector: (0..nsamp).map(|j| to_spat(j as f64)).collect(),
        snr_vector: snr_cont.clone(),
        peaks: x_peaks
            .iter()
            .zip(&snr_peaks)
            .zip(&status)
            .map(|((&x, &snr), &status)| PeakCandidate {
                spat: to_spat(x),
                snr,
                status,
            })
            .collect(),
    };
    qa.write_if_requested(config.qa_path.as_deref());

    let mut sobjs = SpecObjs::new();
    for (i, &x) in x_peaks.iter().enumerate() {
        if status[i] != PeakStatus::Good {
            continue;
        }
        let mut obj = SpecObj::new(&input.meta, nspec);
        obj.spat_fracpos = (x / nsamp as f64).clamp(0.0, 1.0);
        obj.smash_peakflux = Some(flux_peaks[i]);
        obj.smash_snr = Some(snr_peaks[i]);
        obj.threshold = Some(threshold);

        let on_slit = geometry.position_at(obj.spat_fracpos);
        obj.trace_spat = match input.std_trace {
            Some(std) => {
                let shift = on_slit[specmid] - std[specmid];
                std.iter().map(|v| v + shift).collect()
            }
            None => on_slit,
        };
        obj.spat_pixpos = obj.trace_at_specmid();

        obj.fwhm = Some(if config.use_user_fwhm {
            config.fwhm
        } else {
            measure_fwhm(&flux_cont, x, flux_peaks[i], config.fwhm)
        });
        sobjs.push(obj);
    }
    if input.std_trace.is_some() && !sobjs.is_empty() {
        log::info!("Using the standard star trace as crutch for object tracing");
    }

    if !sobjs.is_empty() {
        let xinit = Array2::from_shape_fn((nspec, sobjs.len()), |(s, t)| {
            sobjs.get(t).map_or(f64::NAN, |o| o.trace_spat[s])
        });
        let trace_gpm = Array2::from_shape_fn((nspec, sobjs.len()), |(s, _)| {
            s >= spec_range.0 && s <= spec_range.1
        });
        let params = TraceFitParams {
            degree: config.ncoeff,
            weighting: Weighting::Flux,
            fwhm: config.fwhm,
            maxdev: config.maxdev,
            niter: config.trace_niter,
        };
        let fitted = refine_traces(input.image, gpm.view(), xinit.view(), trace_gpm.view(), &params);
        for (t, obj) in sobjs.iter_mut().enumerate() {
            obj.trace_spat = fitted.column(t).to_vec();
            obj.spat_pixpos = obj.trace_at_specmid();
        }
    }

    let hands = apertures_on_slit(input.hand_apertures, input.thismask, input.meta.det);
    let ctx = HandContext {
        geometry,
        profile: &profile,
        std_trace: input.std_trace,
        meta: &input.meta,
        nominal_fwhm: config.fwhm,
        threshold,
    };
    add_hand_apertures(&mut sobjs, &hands, &ctx);

    if sobjs.is_empty() {
        log::info!("No objects found on slit {}", input.meta.slitid);
        return Ok(sobjs);
    }

    sobjs.sort_by_f64(|o| o.spat_pixpos);
    sobjs.set_objids_sequential();
    for obj in sobjs.iter_mut() {
        obj.box_radius = Some(config.boxcar_rad);
        let fwhm = obj.fwhm.unwrap_or(config.fwhm);
        obj.maskwidth = Some(mask_width(config.extract_maskwidth, fwhm, obj.smash_snr));
        obj.check_slit_ready().map_err(|source| ObjFindError::NotReady {
            name: obj.name(),
            source,
        })?;
    }

    log::info!(
        "Found {} object(s) on slit {} in {:?}",
        sobjs.len(),
        input.meta.slitid,
        start.elapsed()
    );
    Ok(sobjs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_mask_width_grows_with_snr() {
        assert_relative_eq!(mask_width(4.0, 3.0, None), 12.0);
        assert_relative_eq!(mask_width(4.0, 3.0, Some(0.2)), 12.0);
        assert_relative_eq!(mask_width(4.0, 3.0, Some(100.0)), 24.0);
    }
}
