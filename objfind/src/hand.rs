//! Apertures placed by hand at user-specified positions.
//!
//! A hand aperture does not need a significant peak: its trace is borrowed
//! from the best available model on the slit and shifted to pass through the
//! requested point. Automatic detections colliding with a hand aperture are
//! dropped in its favour.

use ndarray::ArrayView2;
use serde::{Deserialize, Serialize};
use slit_math::interp::interp_clamped;
use slit_math::stats::median;

use crate::geometry::SlitGeometry;
use crate::profile::SmashedProfile;
use crate::specobj::{SpecObj, SpecObjMeta, SpecObjs};

/// Collisions closer than this many hand FWHM remove the automatic detection.
const COLLISION_FWHM: f64 = 0.6;

/// A user-requested extraction position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandAperture {
    /// Spectral pixel
    pub spec: f64,
    /// Spatial pixel
    pub spat: f64,
    pub det: usize,
    /// FWHM override in pixels
    pub fwhm: Option<f64>,
}

impl HandAperture {
    /// Nearest pixel of the requested position, if inside an image of `dim`.
    pub fn pixel(&self, dim: (usize, usize)) -> Option<(usize, usize)> {
        let s = self.spec.round();
        let x = self.spat.round();
        if s < 0.0 || x < 0.0 || s >= dim.0 as f64 || x >= dim.1 as f64 {
            return None;
        }
        Some((s as usize, x as usize))
    }
}

/// Hand apertures of detector `det` whose pixel lies on `thismask`.
pub fn apertures_on_slit<'a>(
    hands: &'a [HandAperture],
    thismask: ArrayView2<bool>,
    det: usize,
) -> Vec<&'a HandAperture> {
    hands
        .iter()
        .filter(|h| h.det == det)
        .filter(|h| h.pixel(thismask.dim()).map_or(false, |p| thismask[p]))
        .collect()
}

fn shift_through(model: &[f64], spec: f64, spat: f64) -> Vec<f64> {
    let rows: Vec<f64> = (0..model.len()).map(|s| s as f64).collect();
    let at_spec = interp_clamped(spec, &rows, model).unwrap_or(spat);
    let shift = spat - at_spec;
    model.iter().map(|v| v + shift).collect()
}

/// What a hand aperture needs to know about the slit it is placed on.
pub struct HandContext<'a> {
    pub geometry: &'a SlitGeometry,
    pub profile: &'a SmashedProfile,
    pub std_trace: Option<&'a [f64]>,
    pub meta: &'a SpecObjMeta,
    pub nominal_fwhm: f64,
    pub threshold: f64,
}

/// Add hand apertures to `sobjs`, removing automatic detections they collide with.
pub fn add_hand_apertures(sobjs: &mut SpecObjs, hands: &[&HandAperture], ctx: &HandContext) {
    if hands.is_empty() {
        return;
    }
    let nspec = ctx.geometry.nspec();

    let brightest = sobjs
        .iter()
        .filter(|o| o.smash_peakflux.is_some())
        .max_by(|a, b| {
            a.smash_peakflux
                .unwrap_or(f64::NEG_INFINITY)
                .total_cmp(&b.smash_peakflux.unwrap_or(f64::NEG_INFINITY))
        });
    let model: Vec<f64> = match (brightest, ctx.std_trace) {
        (Some(obj), _) => obj.trace_spat.clone(),
        (None, Some(std)) => std.to_vec(),
        (None, None) => ctx.geometry.left.to_vec(),
    };

    let regular_fwhm: Vec<f64> = sobjs.iter().filter_map(|o| o.fwhm).collect();
    let default_fwhm = median(&regular_fwhm).unwrap_or(ctx.nominal_fwhm);

    let bins: Vec<f64> = (0..ctx.profile.nsamp).map(|j| j as f64).collect();
    let mut hand_objs = Vec::with_capacity(hands.len());
    for hand in hands {
        let mut obj = SpecObj::new(ctx.meta, nspec);
        obj.hand_extract_flag = true;
        obj.hand_extract_spec = Some(hand.spec);
        obj.hand_extract_spat = Some(hand.spat);
        obj.hand_extract_det = Some(hand.det);
        obj.hand_extract_fwhm = hand.fwhm;

        obj.spat_fracpos = ctx.geometry.fractional_position(hand.spec, hand.spat);
        let xbin = obj.spat_fracpos * ctx.profile.nsamp as f64;
        obj.smash_peakflux = interp_clamped(xbin, &bins, &ctx.profile.flux_smth).ok();
        obj.smash_snr = interp_clamped(xbin, &bins, &ctx.profile.snr_smth).ok();
        obj.threshold = Some(ctx.threshold);

        obj.trace_spat = shift_through(&model, hand.spec, hand.spat);
        obj.spat_pixpos = obj.trace_at_specmid();

        obj.fwhm = Some(match hand.fwhm {
            Some(f) if f < ctx.nominal_fwhm / 2.0 => {
                log::warn!(
                    "Hand aperture FWHM {:.2} raised to the floor of {:.2} pixels",
                    f,
                    ctx.nominal_fwhm / 2.0
                );
                ctx.nominal_fwhm / 2.0
            }
            Some(f) => f,
            None => default_fwhm,
        });
        hand_objs.push(obj);
    }

    for hand_obj in &hand_objs {
        let radius = COLLISION_FWHM * hand_obj.fwhm.unwrap_or(ctx.nominal_fwhm);
        let before = sobjs.len();
        sobjs.retain(|o| (o.spat_pixpos - hand_obj.spat_pixpos).abs() > radius);
        let removed = before - sobjs.len();
        if removed > 0 {
            log::warn!(
                "Deleted {} automatically identified object(s) within {:.2} pixels of the hand aperture at spat = {:.2}",
                removed,
                radius,
                hand_obj.spat_pixpos
            );
        }
    }

    for obj in hand_objs {
        sobjs.push(obj);
    }
}
