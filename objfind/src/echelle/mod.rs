//! Object finding across the orders of an echelle spectrograph.
//!
//! Objects are found on each order independently, then linked into
//! multi-order objects by their fractional position across the slit. A linked
//! object is completed on the orders where it was missed, its significance is
//! measured along every order, and insignificant objects are dropped. The
//! traces of completed orders are finally predicted from a PCA of the
//! object's traces on all orders and re-fitted to the data.

pub mod fill;
pub mod link;
pub mod prune;

use ndarray::{Array2, ArrayView2, Zip};
use slit_math::pca::pca_predict_traces;
use slit_math::stats::median;

use crate::config::{EchelleConfig, FindObjConfig};
use crate::error::ObjFindError;
use crate::geometry::{spec_min_max_from_mask, SlitGeometry};
use crate::hand::HandAperture;
use crate::qa::order_qa_path;
use crate::slit::{objs_in_slit, SlitInput};
use crate::specobj::{Pypeline, SpecObj, SpecObjMeta, SpecObjs};
use crate::trace::{refine_traces, TraceFitParams, Weighting};

use fill::{fill_missing_orders, OrderFrame};
use link::{consolidate, fof_link_length, link_fracpos, resolve_duplicates};
use prune::{quick_snr, select_groups, GroupSnr};

/// An echelle frame and the layout of its orders.
///
/// Order-indexed arrays have one column (or entry) per order, in the order
/// of the slit ids found in `slitmask`.
pub struct EchelleInput<'a> {
    pub image: ArrayView2<'a, f64>,
    pub ivar: ArrayView2<'a, f64>,
    /// Slit id of every pixel, negative off the orders
    pub slitmask: ArrayView2<'a, i32>,
    /// Left order boundaries, (nspec, norders)
    pub left: ArrayView2<'a, f64>,
    /// Right order boundaries, (nspec, norders)
    pub right: ArrayView2<'a, f64>,
    /// Echelle order number of every order
    pub order_vec: &'a [i32],
    /// Orders excluded from the search
    pub order_masked: &'a [bool],
    pub inmask: Option<ArrayView2<'a, bool>>,
    /// Standard star traces, (nspec, norders)
    pub std_trace: Option<ArrayView2<'a, f64>>,
    /// Valid spectral range of every order; derived from `slitmask` when unset
    pub spec_min_max: Option<&'a [(usize, usize)]>,
    pub hand_apertures: &'a [HandAperture],
    pub det: usize,
}

impl EchelleInput<'_> {
    fn norders(&self) -> usize {
        self.left.ncols()
    }

    fn check_shapes(&self) -> Result<(), ObjFindError> {
        let dim = self.image.dim();
        let norders = self.norders();
        let check = |what: &'static str, expected: (usize, usize), got: (usize, usize)| {
            if got == expected {
                Ok(())
            } else {
                Err(ObjFindError::ShapeMismatch { what, expected, got })
            }
        };
        check("ivar", dim, self.ivar.dim())?;
        check("slitmask", dim, self.slitmask.dim())?;
        if let Some(inmask) = &self.inmask {
            check("inmask", dim, inmask.dim())?;
        }
        check("left order boundaries", (dim.0, norders), self.left.dim())?;
        check("right order boundaries", (dim.0, norders), self.right.dim())?;
        if let Some(std) = &self.std_trace {
            check("std_trace", (dim.0, norders), std.dim())?;
        }
        check("order_vec", (norders, 1), (self.order_vec.len(), 1))?;
        check("order_masked", (norders, 1), (self.order_masked.len(), 1))?;
        if let Some(ranges) = self.spec_min_max {
            check("spec_min_max", (norders, 1), (ranges.len(), 1))?;
        }
        Ok(())
    }

    /// Sorted unique slit ids of the on-order pixels.
    fn slit_ids(&self) -> Vec<i32> {
        let mut ids: Vec<i32> = self.slitmask.iter().copied().filter(|&id| id >= 0).collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    fn good_pixels(&self) -> Array2<bool> {
        match &self.inmask {
            Some(inmask) => inmask.to_owned(),
            None => Array2::from_elem(self.image.dim(), true),
        }
    }
}

/// Project every hand aperture onto every order.
///
/// The fractional slit position of the aperture on the order containing it is
/// reused at the same spectral row on all orders.
fn project_hand_apertures(input: &EchelleInput, slit_ids: &[i32]) -> Vec<Vec<HandAperture>> {
    let (nspec, nspat) = input.image.dim();
    let mut per_order = vec![Vec::new(); input.norders()];
    for hand in input.hand_apertures.iter().filter(|h| h.det == input.det) {
        let ispec = (hand.spec.round().max(0.0) as usize).min(nspec.saturating_sub(1));
        let ispat = (hand.spat.round().max(0.0) as usize).min(nspat.saturating_sub(1));
        let slit = input.slitmask[[ispec, ispat]];
        let Some(home) = slit_ids.iter().position(|&id| id == slit) else {
            log::warn!(
                "Hand aperture at spec = {:.1}, spat = {:.1} does not land on an order; ignoring it",
                hand.spec,
                hand.spat
            );
            continue;
        };
        let width = input.right[[ispec, home]] - input.left[[ispec, home]];
        let frac = (hand.spat - input.left[[ispec, home]]) / width;
        for (iord, apertures) in per_order.iter_mut().enumerate() {
            let left = input.left[[ispec, iord]];
            let right = input.right[[ispec, iord]];
            apertures.push(HandAperture {
                spec: ispec as f64,
                spat: left + frac * (right - left),
                det: hand.det,
                fwhm: hand.fwhm,
            });
        }
    }
    per_order
}

/// Replace the predicted traces of one object by PCA-seeded fits.
///
/// `members` hold one object per good order, sorted by order index.
fn refine_with_pca(
    members: &mut [SpecObj],
    image: ArrayView2<f64>,
    gpm: ArrayView2<bool>,
    geometries: &[SlitGeometry],
    config: &EchelleConfig,
) {
    let Some(nspec) = members.first().map(SpecObj::nspec) else {
        return;
    };
    let ntrace = members.len();
    let traces = Array2::from_shape_fn((nspec, ntrace), |(s, t)| members[t].trace_spat[s]);
    let weights: Vec<f64> = members
        .iter()
        .map(|m| m.ech_snr.unwrap_or(0.0).max(1.0).powi(2))
        .collect();

    let predicted = match pca_predict_traces(traces.view(), &weights, &config.pca) {
        Ok(predicted) => predicted,
        Err(e) => {
            log::warn!("PCA of the object traces failed ({}); refining the current traces", e);
            traces
        }
    };

    let ranges: Vec<(usize, usize)> = members
        .iter()
        .map(|m| {
            m.ech_orderindx
                .and_then(|iord| geometries[iord].spec_min_max)
                .unwrap_or((0, nspec.saturating_sub(1)))
        })
        .collect();
    let trace_gpm = Array2::from_shape_fn((nspec, ntrace), |(s, t)| s >= ranges[t].0 && s <= ranges[t].1);
    let params = TraceFitParams {
        degree: config.find.ncoeff,
        weighting: Weighting::Flux,
        fwhm: config.find.fwhm,
        maxdev: config.find.maxdev,
        niter: config.find.trace_niter,
    };
    let fitted = refine_traces(image, gpm, predicted.view(), trace_gpm.view(), &params);

    for (t, member) in members.iter_mut().enumerate() {
        if member.ech_frac_was_fit && member.ech_snr.unwrap_or(0.0) > 1.0 {
            member.trace_spat = fitted.column(t).to_vec();
            member.spat_pixpos = member.trace_at_specmid();
        }
    }
}

/// Find objects on every order of an echelle frame and link them.
///
/// Each returned object has one member on every unmasked order, sharing its
/// `ech_objid`; members on orders where the object was not detected have
/// `ech_frac_was_fit` set. Returns an empty collection when nothing
/// significant is found.
pub fn ech_objfind(input: &EchelleInput, config: &EchelleConfig) -> Result<SpecObjs, ObjFindError> {
    config.find.validate()?;
    input.check_shapes()?;

    let start = std::time::Instant::now();
    let norders = input.norders();
    let slit_ids = input.slit_ids();
    if slit_ids.len() != norders {
        return Err(ObjFindError::OrderCountMismatch {
            found: slit_ids.len(),
            expected: norders,
        });
    }
    let plate_scale = config.plate_scale.per_order(norders)?;
    let good_orders: Vec<usize> = (0..norders).filter(|&i| !input.order_masked[i]).collect();

    let order_masks: Vec<Array2<bool>> = slit_ids
        .iter()
        .map(|&id| input.slitmask.mapv(|s| s == id))
        .collect();
    let geometries: Vec<SlitGeometry> = (0..norders)
        .map(|iord| {
            let range = input
                .spec_min_max
                .map(|r| r[iord])
                .or_else(|| spec_min_max_from_mask(order_masks[iord].view()));
            SlitGeometry::from_order(input.left, input.right, iord).with_spec_min_max(range)
        })
        .collect();
    let hands = project_hand_apertures(input, &slit_ids);

    let mut detections: Vec<SpecObj> = Vec::new();
    for &iord in &good_orders {
        let order = input.order_vec[iord];
        log::info!("Finding objects on order {}", order);
        let find = FindObjConfig {
            nperslit: Some(config.nperorder),
            boxcar_rad: config.box_radius / plate_scale[iord],
            qa_path: config.find.qa_path.as_deref().map(|p| order_qa_path(p, order)),
            ..config.find.clone()
        };
        let std = input.std_trace.map(|t| t.column(iord).to_vec());
        let slit = SlitInput {
            image: input.image.view(),
            ivar: input.ivar.view(),
            thismask: order_masks[iord].view(),
            geometry: &geometries[iord],
            inmask: input.inmask.as_ref().map(|m| m.view()),
            std_trace: std.as_deref(),
            hand_apertures: &hands[iord],
            meta: SpecObjMeta {
                pypeline: Pypeline::Echelle,
                det: input.det,
                slitid: slit_ids[iord],
                ech_orderindx: Some(iord),
                ech_order: Some(order),
            },
        };
        detections.extend(objs_in_slit(&slit, &find)?);
    }
    if detections.is_empty() {
        log::warn!("No objects found on any order");
        return Ok(SpecObjs::new());
    }

    // Link detections across orders
    let widths: Vec<f64> = geometries
        .iter()
        .map(|g| median(g.width().as_slice().unwrap_or(&[])).unwrap_or(0.0))
        .collect();
    let link = fof_link_length(config.fof_link, &widths, &plate_scale);
    let fracpos: Vec<f64> = detections.iter().map(|o| o.spat_fracpos).collect();
    let orders: Vec<usize> = detections
        .iter()
        .map(|o| o.ech_orderindx.unwrap_or(0))
        .collect();
    let mut ids = link_fracpos(&fracpos, link);
    resolve_duplicates(&mut ids, &orders, &fracpos);
    let linked = consolidate(&ids, &fracpos);
    log::info!("Friends-of-friends linking found {} unique objects", linked.len());

    let mut slots: Vec<Option<SpecObj>> = detections.into_iter().map(Some).collect();
    let mut objects: Vec<Vec<SpecObj>> = Vec::with_capacity(linked.len());
    for (rank, group) in linked.iter().enumerate() {
        let mut members: Vec<SpecObj> = group
            .members
            .iter()
            .filter_map(|&m| slots[m].take())
            .collect();
        for member in members.iter_mut() {
            member.ech_fracpos = Some(group.fracpos);
            member.ech_objid = Some(rank + 1);
            member.objid = Some(rank + 1);
            member.ech_frac_was_fit = false;
        }
        objects.push(members);
    }

    // Complete every object on the orders it was missed on
    let frame = OrderFrame {
        geometries: &geometries,
        order_vec: input.order_vec,
        slit_ids: &slit_ids,
        good_orders: &good_orders,
        std_trace: input.std_trace.as_ref().map(|t| t.view()),
        det: input.det,
    };
    for (rank, (members, group)) in objects.iter_mut().zip(&linked).enumerate() {
        fill_missing_orders(members, &frame, group.fracpos, rank + 1)?;
    }

    // Quick-look S/N of every member
    let inmask = input.good_pixels();
    for members in objects.iter_mut() {
        for member in members.iter_mut() {
            let Some(iord) = member.ech_orderindx else {
                continue;
            };
            let gpm = Zip::from(&order_masks[iord])
                .and(&inmask)
                .map_collect(|&on, &good| on && good);
            let radius = config.box_radius / plate_scale[iord];
            member.ech_snr = Some(quick_snr(
                input.image,
                input.ivar,
                gpm.view(),
                &member.trace_spat,
                radius,
            ));
        }
    }

    let snr: Vec<GroupSnr> = objects
        .iter()
        .map(|members| GroupSnr {
            snr: members.iter().map(|m| m.ech_snr.unwrap_or(0.0)).collect(),
            hand: members.iter().any(|m| m.hand_extract_flag),
        })
        .collect();
    let keep = select_groups(&snr, config);
    if keep.is_empty() {
        log::warn!("No objects survived the S/N cut");
        return Ok(SpecObjs::new());
    }

    let mut slots: Vec<Option<Vec<SpecObj>>> = objects.into_iter().map(Some).collect();
    let mut kept: Vec<Vec<SpecObj>> = keep.iter().filter_map(|&i| slots[i].take()).collect();

    // Re-trace the predicted members seeded by a PCA of the whole object
    let on_orders = input.slitmask.mapv(|id| id >= 0);
    let trace_gpm = Zip::from(&inmask)
        .and(&on_orders)
        .map_collect(|&good, &on| good && on);
    for (k, members) in kept.iter_mut().enumerate() {
        let id = k + 1;
        let snrs: Vec<f64> = members.iter().filter_map(|m| m.ech_snr).collect();
        log::info!(
            "Fitting the PCA of object {}/{} with median S/N = {:.3}",
            id,
            keep.len(),
            median(&snrs).unwrap_or(0.0)
        );
        for member in members.iter_mut() {
            member.ech_objid = Some(id);
            member.objid = Some(id);
        }
        members.sort_by_key(|m| m.ech_orderindx);
        refine_with_pca(members, input.image, trace_gpm.view(), &geometries, config);
    }

    let mut sobjs = SpecObjs::new();
    for mut member in kept.into_iter().flatten() {
        member.ech_order = member.ech_orderindx.map(|iord| input.order_vec[iord]);
        member.check_ready().map_err(|source| ObjFindError::NotReady {
            name: member.name(),
            source,
        })?;
        sobjs.push(member);
    }

    log::info!(
        "Found {} object(s) on {} order(s) in {:?}",
        keep.len(),
        good_orders.len(),
        start.elapsed()
    );
    Ok(sobjs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn frame(nspec: usize, norders: usize) -> (Array2<f64>, Array2<i32>, Array2<f64>, Array2<f64>) {
        let nspat = 40 * norders;
        let image = Array2::zeros((nspec, nspat));
        let slitmask = Array2::from_shape_fn((nspec, nspat), |(_, x)| (x / 40) as i32);
        let left = Array2::from_shape_fn((nspec, norders), |(_, i)| 40.0 * i as f64 - 0.5);
        let right = &left + 40.0;
        (image, slitmask, left, right)
    }

    #[test]
    fn test_order_count_mismatch() {
        let (image, mut slitmask, left, right) = frame(20, 3);
        slitmask.mapv_inplace(|id| if id == 2 { -1 } else { id });
        let ivar = Array2::from_elem(image.dim(), 1.0);
        let input = EchelleInput {
            image: image.view(),
            ivar: ivar.view(),
            slitmask: slitmask.view(),
            left: left.view(),
            right: right.view(),
            order_vec: &[30, 29, 28],
            order_masked: &[false, false, false],
            inmask: None,
            std_trace: None,
            spec_min_max: None,
            hand_apertures: &[],
            det: 1,
        };
        let err = ech_objfind(&input, &EchelleConfig::default()).unwrap_err();
        assert!(matches!(err, ObjFindError::OrderCountMismatch { found: 2, expected: 3 }));
    }

    #[test]
    fn test_plate_scale_length_checked() {
        let (image, slitmask, left, right) = frame(20, 2);
        let ivar = Array2::from_elem(image.dim(), 1.0);
        let input = EchelleInput {
            image: image.view(),
            ivar: ivar.view(),
            slitmask: slitmask.view(),
            left: left.view(),
            right: right.view(),
            order_vec: &[30, 29],
            order_masked: &[false, false],
            inmask: None,
            std_trace: None,
            spec_min_max: None,
            hand_apertures: &[],
            det: 1,
        };
        let config = EchelleConfig {
            plate_scale: crate::config::PlateScale::PerOrder(vec![0.2, 0.2, 0.2]),
            ..Default::default()
        };
        assert!(matches!(
            ech_objfind(&input, &config),
            Err(ObjFindError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_blank_frame_finds_nothing() {
        let (image, slitmask, left, right) = frame(30, 2);
        let ivar = Array2::from_elem(image.dim(), 1.0);
        let input = EchelleInput {
            image: image.view(),
            ivar: ivar.view(),
            slitmask: slitmask.view(),
            left: left.view(),
            right: right.view(),
            order_vec: &[30, 29],
            order_masked: &[false, false],
            inmask: None,
            std_trace: None,
            spec_min_max: None,
            hand_apertures: &[],
            det: 1,
        };
        let sobjs = ech_objfind(&input, &EchelleConfig::default()).unwrap();
        assert!(sobjs.is_empty());
    }

    #[test]
    fn test_hand_apertures_projected_onto_every_order() {
        let (image, slitmask, left, right) = frame(10, 3);
        let ivar = Array2::from_elem(image.dim(), 1.0);
        let hands = [HandAperture {
            spec: 4.2,
            spat: 49.5,
            det: 1,
            fwhm: None,
        }];
        let input = EchelleInput {
            image: image.view(),
            ivar: ivar.view(),
            slitmask: slitmask.view(),
            left: left.view(),
            right: right.view(),
            order_vec: &[30, 29, 28],
            order_masked: &[false, false, false],
            inmask: None,
            std_trace: None,
            spec_min_max: None,
            hand_apertures: &hands,
            det: 1,
        };
        let projected = project_hand_apertures(&input, &input.slit_ids());
        let spats: Vec<f64> = projected.iter().map(|h| h[0].spat).collect();
        assert_eq!(spats, vec![9.5, 49.5, 89.5]);
        assert!(projected.iter().all(|h| h[0].spec == 4.0));
    }
}
