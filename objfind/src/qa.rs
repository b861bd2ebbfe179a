//! Peak-finding QA records.
//!
//! The finder describes every candidate peak and what happened to it. The
//! record is written as JSON next to wherever the caller wants its QA; the
//! plotting itself happens elsewhere.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::peaks::PeakStatus;

/// Token in QA file names replaced by the echelle order number.
const ORDER_TOKEN: &str = "S0999";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeakCandidate {
    /// Approximate spatial pixel at the middle spectral row
    pub spat: f64,
    pub snr: f64,
    pub status: PeakStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeakQa {
    pub title: String,
    pub snr_thresh: f64,
    /// Spatial pixel of every rectified bin at the middle spectral row
    pub spat_vector: Vec<f64>,
    /// Smoothed S/N profile
    pub snr_vector: Vec<f64>,
    pub peaks: Vec<PeakCandidate>,
}

impl PeakQa {
    pub fn count(&self, status: PeakStatus) -> usize {
        self.peaks.iter().filter(|p| p.status == status).count()
    }

    pub fn save_to_file(&self, path: &Path) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
    }

    /// Write the record if a path is configured; failures are only logged.
    pub fn write_if_requested(&self, path: Option<&Path>) {
        if let Some(path) = path {
            if let Err(e) = self.save_to_file(path) {
                log::warn!("Could not write object finding QA to {}: {}", path.display(), e);
            }
        }
    }
}

/// QA path for one echelle order.
pub fn order_qa_path(path: &Path, order: i32) -> PathBuf {
    let name = path.to_string_lossy();
    if name.contains(ORDER_TOKEN) {
        PathBuf::from(name.replace(ORDER_TOKEN, &format!("S{:04}", order)))
    } else {
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let ext = path
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();
        path.with_file_name(format!("{}_S{:04}{}", stem, order, ext))
    }
}
