//! Completion of linked objects on the orders where they were not detected.

use ndarray::ArrayView2;
use slit_math::polyfit::{robust_fit, Basis, RobustFitConfig};

use crate::error::ObjFindError;
use crate::geometry::SlitGeometry;
use crate::specobj::{Pypeline, SpecObj, SpecObjMeta};

/// The orders an object may be completed on.
pub struct OrderFrame<'a> {
    /// Boundaries of every order, indexed by order index
    pub geometries: &'a [SlitGeometry],
    pub order_vec: &'a [i32],
    pub slit_ids: &'a [i32],
    /// Order indices taking part in the search
    pub good_orders: &'a [usize],
    /// Standard star traces, (nspec, norders)
    pub std_trace: Option<ArrayView2<'a, f64>>,
    pub det: usize,
}

impl OrderFrame<'_> {
    fn meta(&self, iord: usize) -> SpecObjMeta {
        SpecObjMeta {
            pypeline: Pypeline::Echelle,
            det: self.det,
            slitid: self.slit_ids[iord],
            ech_orderindx: Some(iord),
            ech_order: Some(self.order_vec[iord]),
        }
    }
}

/// Fractional slit position of a trace, averaged along the order.
pub fn mean_fraction(trace: &[f64], geometry: &SlitGeometry) -> f64 {
    let (sum, n) = trace
        .iter()
        .zip(geometry.left.iter().zip(geometry.right.iter()))
        .filter(|(_, (l, r))| *r - *l > 0.0)
        .fold((0.0, 0usize), |(sum, n), (t, (l, r))| {
            (sum + (t - l) / (r - l), n + 1)
        });
    if n == 0 {
        f64::NAN
    } else {
        sum / n as f64
    }
}

/// Fractional position of an object on every order.
///
/// Observed orders keep their value. When the object is seen on more than
/// three orders, but not all, the missing ones come from a clipped linear fit
/// against order number; otherwise they get `fallback`.
pub fn predict_fractions(order_numbers: &[f64], observed: &[Option<f64>], fallback: f64) -> Vec<f64> {
    let nobs = observed.iter().filter(|o| o.is_some()).count();
    let uniform = || -> Vec<f64> { observed.iter().map(|o| o.unwrap_or(fallback)).collect() };
    if nobs <= 3 || nobs >= observed.len() {
        return uniform();
    }

    let (x, y): (Vec<f64>, Vec<f64>) = order_numbers
        .iter()
        .zip(observed)
        .filter_map(|(&n, o)| o.map(|f| (n, f)))
        .unzip();
    let config = RobustFitConfig {
        degree: 1,
        basis: Basis::Polynomial,
        lower: 2.0,
        upper: 2.0,
        maxiter: 20,
        use_mad: true,
        maxdev: None,
        minx: order_numbers.iter().copied().reduce(f64::min),
        maxx: order_numbers.iter().copied().reduce(f64::max),
    };
    match robust_fit(&x, &y, None, None, &config) {
        Ok(fit) => order_numbers
            .iter()
            .zip(observed)
            .map(|(&n, o)| o.unwrap_or_else(|| fit.eval(n)))
            .collect(),
        Err(e) => {
            log::warn!("Fractional position fit across orders failed ({}), using the median position", e);
            uniform()
        }
    }
}

/// New member of an object on an order where it was not detected.
///
/// The trace is the standard trace shifted through `frac` at the middle
/// spectral row, or the line at constant `frac` across the order. Widths and
/// fluxes come from `template`.
pub fn synthesize_member(
    template: &SpecObj,
    geometry: &SlitGeometry,
    std_trace: Option<&[f64]>,
    meta: &SpecObjMeta,
    frac: f64,
) -> SpecObj {
    let nspec = geometry.nspec();
    let specmid = nspec / 2;
    let mut obj = SpecObj::new(meta, nspec);

    let on_order = geometry.position_at(frac);
    obj.trace_spat = match std_trace {
        Some(std) if std.len() == nspec => {
            let shift = on_order[specmid] - std[specmid];
            std.iter().map(|v| v + shift).collect()
        }
        _ => on_order,
    };
    obj.spat_pixpos = obj.trace_at_specmid();
    obj.spat_fracpos = frac.clamp(0.0, 1.0);

    obj.fwhm = template.fwhm;
    obj.maskwidth = template.maskwidth;
    obj.smash_peakflux = template.smash_peakflux;
    obj.smash_snr = template.smash_snr;
    obj.threshold = template.threshold;
    obj.box_radius = template.box_radius;

    obj.ech_fracpos = template.ech_fracpos;
    obj.ech_objid = template.ech_objid;
    obj.objid = template.objid;
    obj.ech_frac_was_fit = true;
    obj
}

/// Give an object exactly one member on every good order.
///
/// `members` are the detections of one linked object; on return they are
/// sorted by order index.
pub fn fill_missing_orders(
    members: &mut Vec<SpecObj>,
    frame: &OrderFrame,
    group_frac: f64,
    objid: usize,
) -> Result<(), ObjFindError> {
    for &iord in frame.good_orders {
        let count = members
            .iter()
            .filter(|m| m.ech_orderindx == Some(iord))
            .count();
        if count > 1 {
            return Err(ObjFindError::DuplicateOrderMember {
                objid,
                order: iord,
                count,
            });
        }
    }

    let order_numbers: Vec<f64> = frame
        .good_orders
        .iter()
        .map(|&iord| frame.order_vec[iord] as f64)
        .collect();
    let observed: Vec<Option<f64>> = frame
        .good_orders
        .iter()
        .map(|&iord| {
            members
                .iter()
                .find(|m| m.ech_orderindx == Some(iord))
                .map(|m| mean_fraction(&m.trace_spat, &frame.geometries[iord]))
        })
        .collect();
    let fracs = predict_fractions(&order_numbers, &observed, group_frac);

    let mut synthetic = Vec::new();
    for (k, &iord) in frame.good_orders.iter().enumerate() {
        if observed[k].is_some() {
            continue;
        }
        let Some(template) = members
            .iter()
            .min_by_key(|m| m.ech_orderindx.map_or(usize::MAX, |o| o.abs_diff(iord)))
        else {
            continue;
        };
        let std = frame.std_trace.map(|t| t.column(iord).to_vec());
        synthetic.push(synthesize_member(
            template,
            &frame.geometries[iord],
            std.as_deref(),
            &frame.meta(iord),
            fracs[k],
        ));
    }
    if !synthetic.is_empty() {
        log::debug!(
            "Object {} predicted on {} order(s) where it was not detected",
            objid,
            synthetic.len()
        );
    }
    members.extend(synthetic);
    members.sort_by_key(|m| m.ech_orderindx);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::{Array1, Array2};

    fn orders(norders: usize, nspec: usize) -> Vec<SlitGeometry> {
        (0..norders)
            .map(|i| {
                let left = 60.0 * i as f64;
                SlitGeometry::new(
                    Array1::from_elem(nspec, left),
                    Array1::from_elem(nspec, left + 50.0),
                )
                .unwrap()
            })
            .collect()
    }

    fn detection(iord: usize, geometry: &SlitGeometry, frac: f64) -> SpecObj {
        let meta = SpecObjMeta {
            pypeline: Pypeline::Echelle,
            ech_orderindx: Some(iord),
            ech_order: Some(100 - iord as i32),
            ..Default::default()
        };
        let mut obj = SpecObj::new(&meta, geometry.nspec());
        obj.trace_spat = geometry.position_at(frac);
        obj.spat_fracpos = frac;
        obj.fwhm = Some(3.0 + iord as f64);
        obj.box_radius = Some(10.0);
        obj.ech_objid = Some(1);
        obj.objid = Some(1);
        obj.ech_fracpos = Some(frac);
        obj
    }

    #[test]
    fn test_mean_fraction() {
        let geometry = &orders(1, 10)[0];
        assert_relative_eq!(mean_fraction(&geometry.position_at(0.3), geometry), 0.3, epsilon = 1e-12);
    }

    #[test]
    fn test_predict_fractions_linear_trend() {
        let numbers = [10.0, 11.0, 12.0, 13.0, 14.0, 15.0];
        let observed = [Some(0.40), Some(0.42), None, Some(0.46), Some(0.48), Some(0.50)];
        let fracs = predict_fractions(&numbers, &observed, 0.45);
        assert_relative_eq!(fracs[2], 0.44, epsilon = 1e-9);
        assert_relative_eq!(fracs[0], 0.40);
    }

    #[test]
    fn test_predict_fractions_few_orders_use_fallback() {
        let numbers = [10.0, 11.0, 12.0, 13.0];
        let observed = [Some(0.40), None, Some(0.42), None];
        assert_eq!(predict_fractions(&numbers, &observed, 0.41), vec![0.40, 0.41, 0.42, 0.41]);
    }

    #[test]
    fn test_fill_copies_nearest_order() {
        let geometries = orders(4, 20);
        let order_vec = [100, 99, 98, 97];
        let slit_ids = [0, 1, 2, 3];
        let good = [0, 1, 2, 3];
        let frame = OrderFrame {
            geometries: &geometries,
            order_vec: &order_vec,
            slit_ids: &slit_ids,
            good_orders: &good,
            std_trace: None,
            det: 1,
        };
        let mut members = vec![detection(3, &geometries[3], 0.5), detection(0, &geometries[0], 0.5)];
        fill_missing_orders(&mut members, &frame, 0.5, 1).unwrap();

        assert_eq!(members.len(), 4);
        let indices: Vec<_> = members.iter().map(|m| m.ech_orderindx.unwrap()).collect();
        assert_eq!(indices, vec![0, 1, 2, 3]);
        assert!(members[1].ech_frac_was_fit && members[2].ech_frac_was_fit);
        assert!(!members[0].ech_frac_was_fit);
        // order 1 is nearest to order 0, order 2 to order 3
        assert_relative_eq!(members[1].fwhm.unwrap(), 3.0);
        assert_relative_eq!(members[2].fwhm.unwrap(), 6.0);
        assert_relative_eq!(members[2].spat_pixpos, 120.0 + 25.0);
        assert_eq!(members[2].ech_order, Some(98));
        assert_eq!(members[2].slitid, 2);
    }

    #[test]
    fn test_fill_uses_standard_trace_shape() {
        let geometries = orders(2, 20);
        let std = Array2::from_shape_fn((20, 2), |(s, i)| 60.0 * i as f64 + 10.0 + 0.5 * s as f64);
        let order_vec = [50, 49];
        let slit_ids = [0, 1];
        let good = [0, 1];
        let frame = OrderFrame {
            geometries: &geometries,
            order_vec: &order_vec,
            slit_ids: &slit_ids,
            good_orders: &good,
            std_trace: Some(std.view()),
            det: 1,
        };
        let mut members = vec![detection(0, &geometries[0], 0.2)];
        fill_missing_orders(&mut members, &frame, 0.2, 1).unwrap();
        let filled = &members[1];
        assert_relative_eq!(filled.trace_spat[10], 60.0 + 10.0, epsilon = 1e-12);
        assert_relative_eq!(filled.trace_spat[12] - filled.trace_spat[10], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_duplicate_member_is_an_error() {
        let geometries = orders(2, 10);
        let order_vec = [50, 49];
        let slit_ids = [0, 1];
        let good = [0, 1];
        let frame = OrderFrame {
            geometries: &geometries,
            order_vec: &order_vec,
            slit_ids: &slit_ids,
            good_orders: &good,
            std_trace: None,
            det: 1,
        };
        let mut members = vec![detection(0, &geometries[0], 0.2), detection(0, &geometries[0], 0.3)];
        let err = fill_missing_orders(&mut members, &frame, 0.25, 4).unwrap_err();
        assert!(matches!(err, ObjFindError::DuplicateOrderMember { objid: 4, order: 0, count: 2 }));
    }
}
