//! Peak detection in 1-D profiles and the policies applied to candidate peaks.

use serde::{Deserialize, Serialize};

/// Indices of local maxima of `x` with height ≥ `mph`, at least `mpd` apart.
///
/// A flat-topped maximum is reported at its rising edge. The first and last
/// samples are never peaks. When two peaks are closer than `mpd` the lower one
/// is dropped. Non-finite samples never form peaks. The result is sorted by
/// index.
pub fn detect_peaks(x: &[f64], mph: f64, mpd: f64) -> Vec<usize> {
    let n = x.len();
    if n < 3 {
        return Vec::new();
    }
    let val = |i: usize| if x[i].is_finite() { x[i] } else { f64::NEG_INFINITY };

    let mut ind: Vec<usize> = (1..n - 1)
        .filter(|&i| val(i) > val(i - 1) && val(i + 1) <= val(i))
        .filter(|&i| val(i) >= mph)
        .collect();

    if ind.len() > 1 && mpd > 0.0 {
        // Highest first; suppress lower neighbours of every surviving peak
        ind.sort_by(|&a, &b| val(b).total_cmp(&val(a)));
        let mut removed = vec![false; ind.len()];
        for i in 0..ind.len() {
            if removed[i] {
                continue;
            }
            let center = ind[i] as f64;
            for j in 0..ind.len() {
                if j != i && (ind[j] as f64 - center).abs() <= mpd {
                    removed[j] = true;
                }
            }
        }
        ind = ind
            .into_iter()
            .zip(removed)
            .filter(|(_, r)| !r)
            .map(|(i, _)| i)
            .collect();
        ind.sort_unstable();
    }

    ind
}

/// Effective S/N threshold for a smoothed S/N profile: the largest of the
/// plain S/N cut, the fraction of the brightest peak and the absolute cut.
pub fn snr_threshold(snr_smth: &[f64], snr_thresh: f64, peak_thresh: f64, abs_thresh: f64) -> f64 {
    let max = snr_smth
        .iter()
        .filter(|v| v.is_finite())
        .fold(f64::NEG_INFINITY, |m, &v| m.max(v));
    let floor = snr_thresh.max(abs_thresh);
    if max.is_finite() {
        floor.max(peak_thresh * max)
    } else {
        floor
    }
}

/// True when a rectified peak position lies inside the trimmed slit margins.
pub fn is_near_edge(x: f64, nsamp: usize, trim_edg: (f64, f64)) -> bool {
    x < trim_edg.0 || x > nsamp as f64 - trim_edg.1
}

/// Fate of a candidate peak
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeakStatus {
    Good,
    NearEdge,
    /// More significant peaks already fill the per-slit budget
    OverBudget,
}

/// Classify candidates at rectified positions `x` with S/N `snr`.
pub fn classify_peaks(
    x: &[f64],
    snr: &[f64],
    nsamp: usize,
    trim_edg: (f64, f64),
    nperslit: Option<usize>,
) -> Vec<PeakStatus> {
    let mut status: Vec<PeakStatus> = x
        .iter()
        .map(|&xi| {
            if is_near_edge(xi, nsamp, trim_edg) {
                PeakStatus::NearEdge
            } else {
                PeakStatus::Good
            }
        })
        .collect();

    if let Some(limit) = nperslit {
        let mut good: Vec<usize> = (0..x.len())
            .filter(|&i| status[i] == PeakStatus::Good)
            .collect();
        if good.len() > limit {
            good.sort_by(|&a, &b| snr[b].total_cmp(&snr[a]));
            for &i in &good[limit..] {
                status[i] = PeakStatus::OverBudget;
            }
        }
    }

    status
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_simple_peaks() {
        let x = [0.0, 1.0, 0.0, 0.0, 3.0, 1.0, 0.0, 2.0, 0.0];
        assert_eq!(detect_peaks(&x, 0.5, 0.0), vec![1, 4, 7]);
        assert_eq!(detect_peaks(&x, 1.5, 0.0), vec![4, 7]);
    }

    #[test]
    fn test_endpoints_are_not_peaks() {
        let x = [5.0, 1.0, 2.0, 1.0, 6.0];
        assert_eq!(detect_peaks(&x, 0.0, 0.0), vec![2]);
    }

    #[test]
    fn test_flat_top_reports_rising_edge() {
        let x = [0.0, 2.0, 2.0, 2.0, 0.0];
        assert_eq!(detect_peaks(&x, 0.0, 0.0), vec![1]);
    }

    #[test]
    fn test_min_distance_keeps_higher() {
        let x = [0.0, 3.0, 1.0, 5.0, 0.0, 0.0, 0.0, 4.0, 0.0];
        assert_eq!(detect_peaks(&x, 0.0, 2.25), vec![3, 7]);
    }

    #[test]
    fn test_threshold() {
        let snr = [1.0, 50.0, 3.0];
        assert_eq!(snr_threshold(&snr, 10.0, 0.0, 0.0), 10.0);
        assert_eq!(snr_threshold(&snr, 10.0, 0.5, 0.0), 25.0);
        assert_eq!(snr_threshold(&snr, 10.0, 0.5, 60.0), 60.0);
        assert_eq!(snr_threshold(&[f64::NAN], 10.0, 0.5, 12.0), 12.0);
    }

    #[test]
    fn test_edge_boundary() {
        // Exactly trim_edg from the left is kept, one pixel inside is not
        assert!(!is_near_edge(5.0, 50, (5.0, 5.0)));
        assert!(is_near_edge(4.0, 50, (5.0, 5.0)));
        assert!(!is_near_edge(45.0, 50, (5.0, 5.0)));
        assert!(is_near_edge(46.0, 50, (5.0, 5.0)));
    }

    #[test]
    fn test_classify_budget_keeps_brightest() {
        let x = [2.0, 10.0, 20.0, 30.0];
        let snr = [100.0, 12.0, 40.0, 15.0];
        let status = classify_peaks(&x, &snr, 50, (5.0, 5.0), Some(2));
        assert_eq!(
            status,
            vec![
                PeakStatus::NearEdge,
                PeakStatus::OverBudget,
                PeakStatus::Good,
                PeakStatus::Good
            ]
        );
    }
}
