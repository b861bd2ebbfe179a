//! Association of per-order detections into multi-order objects.

use slit_math::fof::friends_of_friends;
use slit_math::stats::median;

/// Detections sharing one object id.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkedGroup {
    /// Indices into the detection list
    pub members: Vec<usize>,
    /// Median fractional slit position of the members
    pub fracpos: f64,
}

/// Friends-of-friends linking length in fractional slit units.
///
/// `fof_link` is in arcsec; `order_widths` are the typical widths of the
/// orders in pixels and `plate_scales` their arcsec per pixel.
pub fn fof_link_length(fof_link: f64, order_widths: &[f64], plate_scales: &[f64]) -> f64 {
    let widths_arcsec: Vec<f64> = order_widths
        .iter()
        .zip(plate_scales)
        .map(|(w, p)| w * p)
        .collect();
    match median(&widths_arcsec) {
        Ok(width) if width > 0.0 => fof_link / width,
        _ => 0.0,
    }
}

/// Group ids of detections by their fractional slit positions.
pub fn link_fracpos(fracpos: &[f64], link: f64) -> Vec<usize> {
    let points: Vec<(f64, f64)> = fracpos.iter().map(|&f| (f, 0.0)).collect();
    friends_of_friends(&points, link)
}

/// Split groups holding more than one detection on the same order.
///
/// The member closest to the mean position of the group on the other orders
/// keeps the id; the rest get fresh ids. Returns the number of ids spawned.
pub fn resolve_duplicates(groups: &mut [usize], orders: &[usize], fracpos: &[f64]) -> usize {
    let initial = groups.to_vec();
    let mut next_id = initial.iter().max().map_or(0, |m| m + 1);

    let mut unique_groups = initial.clone();
    unique_groups.sort_unstable();
    unique_groups.dedup();
    let mut unique_orders = orders.to_vec();
    unique_orders.sort_unstable();
    unique_orders.dedup();

    let mut spawned = 0;
    for &g in &unique_groups {
        for &o in &unique_orders {
            let members: Vec<usize> = (0..initial.len())
                .filter(|&i| initial[i] == g && orders[i] == o)
                .collect();
            if members.len() < 2 {
                continue;
            }
            log::warn!(
                "Found {} detections of one object on order index {}; spawning new objects to keep one per order",
                members.len(),
                o
            );

            let others: Vec<f64> = (0..initial.len())
                .filter(|&i| initial[i] == g && orders[i] != o)
                .map(|i| fracpos[i])
                .collect();
            let keep = if others.is_empty() {
                members[0]
            } else {
                let mean = others.iter().sum::<f64>() / others.len() as f64;
                members
                    .iter()
                    .copied()
                    .min_by(|&a, &b| (fracpos[a] - mean).abs().total_cmp(&(fracpos[b] - mean).abs()))
                    .unwrap_or(members[0])
            };

            for &m in members.iter().filter(|&&m| m != keep) {
                groups[m] = next_id;
                next_id += 1;
                spawned += 1;
            }
        }
    }
    spawned
}

/// Collect detections by group id, sorted by group position across the slit.
pub fn consolidate(groups: &[usize], fracpos: &[f64]) -> Vec<LinkedGroup> {
    let mut ids = groups.to_vec();
    ids.sort_unstable();
    ids.dedup();

    let mut linked: Vec<LinkedGroup> = ids
        .into_iter()
        .map(|id| {
            let members: Vec<usize> = (0..groups.len()).filter(|&i| groups[i] == id).collect();
            let fracs: Vec<f64> = members.iter().map(|&i| fracpos[i]).collect();
            let fracpos = median(&fracs).unwrap_or(fracs[0]);
            LinkedGroup { members, fracpos }
        })
        .collect();
    linked.sort_by(|a, b| a.fracpos.total_cmp(&b.fracpos));
    linked
}
