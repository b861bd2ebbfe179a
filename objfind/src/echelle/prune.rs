//! Quick-look significance of linked objects and the cut on it.

use ndarray::ArrayView2;
use slit_math::stats::{median, sigma_clipped_stats};

use crate::config::EchelleConfig;
use crate::extract::boxcar_along_trace;

/// Median boxcar S/N of a trace.
///
/// Rows with no good pixel inside `trace ± radius` are skipped; the S/N of
/// the remaining rows is 5σ clipped. Zero when no row is usable.
pub fn quick_snr(
    image: ArrayView2<f64>,
    ivar: ArrayView2<f64>,
    gpm: ArrayView2<bool>,
    trace: &[f64],
    radius: f64,
) -> f64 {
    let (flux, var, usable) = boxcar_along_trace(image, ivar, gpm, trace, radius);
    let snr: Vec<f64> = flux
        .iter()
        .zip(&var)
        .zip(&usable)
        .filter(|(_, &u)| u)
        .map(|((&f, &v), _)| if v > 0.0 { f / v.sqrt() } else { 0.0 })
        .collect();
    if snr.is_empty() {
        return 0.0;
    }
    sigma_clipped_stats(&snr, None, 5.0, 5.0, 5).map_or(0.0, |s| s.median)
}

/// Per-order S/N of one linked object.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupSnr {
    pub snr: Vec<f64>,
    /// Object holds a hand aperture and bypasses the cut
    pub hand: bool,
}

impl GroupSnr {
    fn is_significant(&self, config: &EchelleConfig) -> bool {
        let max = self.snr.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let nabove = self.snr.iter().filter(|&&s| s > config.min_snr).count();
        max > config.max_snr || nabove >= config.nabove_min_snr
    }
}

/// Indices of the objects to keep, most significant first.
///
/// Objects are ranked by their median S/N over orders. At most `nperorder`
/// automatic objects are kept; hand apertures are always kept and do not
/// count against that budget.
pub fn select_groups(groups: &[GroupSnr], config: &EchelleConfig) -> Vec<usize> {
    let medians: Vec<f64> = groups
        .iter()
        .map(|g| median(&g.snr).unwrap_or(0.0))
        .collect();
    let mut ranked: Vec<usize> = (0..groups.len()).collect();
    ranked.sort_by(|&a, &b| medians[b].total_cmp(&medians[a]));

    let mut kept = Vec::new();
    let mut nauto = 0;
    for i in ranked {
        let group = &groups[i];
        if group.hand {
            kept.push(i);
            continue;
        }
        let within_budget = nauto < config.nperorder;
        if within_budget && group.is_significant(config) {
            kept.push(i);
            nauto += 1;
        } else if !within_budget {
            log::info!(
                "Purging object #{} since {} objects were already identified and nperorder = {}",
                i,
                nauto,
                config.nperorder
            );
        } else {
            log::info!(
                "Purging object #{} which has neither S/N > {:.2} on any order nor S/N > {:.2} on at least {} orders",
                i,
                config.max_snr,
                config.min_snr,
                config.nabove_min_snr
            );
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::Array2;

    fn group(snr: &[f64], hand: bool) -> GroupSnr {
        GroupSnr {
            snr: snr.to_vec(),
            hand,
        }
    }

    #[test]
    fn test_bright_object_kept() {
        let config = EchelleConfig::default();
        let kept = select_groups(&[group(&[0.5, 3.0, 0.2], false)], &config);
        assert_eq!(kept, vec![0]);
    }

    #[test]
    fn test_faint_single_order_object_purged() {
        let config = EchelleConfig::default();
        let kept = select_groups(&[group(&[1.2, 0.8, 0.9], false)], &config);
        assert!(kept.is_empty());
        // twice above min_snr is enough
        let kept = select_groups(&[group(&[1.2, 1.1, 0.9], false)], &config);
        assert_eq!(kept, vec![0]);
    }

    #[test]
    fn test_budget_ranks_by_median_and_exempts_hand() {
        let config = EchelleConfig {
            nperorder: 1,
            ..Default::default()
        };
        let groups = [
            group(&[5.0, 5.0, 5.0], false),
            group(&[9.0, 9.0, 9.0], false),
            group(&[0.0, 0.0, 0.0], true),
        ];
        assert_eq!(select_groups(&groups, &config), vec![1, 2]);
    }

    #[test]
    fn test_quick_snr_constant_source() {
        let image = Array2::from_elem((50, 20), 4.0);
        let ivar = Array2::from_elem((50, 20), 1.0);
        let gpm = Array2::from_elem((50, 20), true);
        let trace = vec![10.5; 50];
        // 4 pixels of flux 4 and variance 1: S/N = 16 / 2
        let snr = quick_snr(image.view(), ivar.view(), gpm.view(), &trace, 2.0);
        assert_relative_eq!(snr, 8.0, epsilon = 1e-9);
    }

    #[test]
    fn test_quick_snr_without_good_pixels() {
        let image = Array2::from_elem((10, 20), 4.0);
        let ivar = Array2::from_elem((10, 20), 1.0);
        let gpm = Array2::from_elem((10, 20), false);
        let snr = quick_snr(image.view(), ivar.view(), gpm.view(), &[10.0; 10], 2.0);
        assert_eq!(snr, 0.0);
    }
}
