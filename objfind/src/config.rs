use serde::{Deserialize, Serialize};
use slit_math::PcaConfig;
use std::path::PathBuf;

use crate::error::ObjFindError;

/// Parameters for finding objects in a single slit or order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FindObjConfig {
    /// Nominal seeing FWHM in pixels, also the smoothing scale of the profile
    pub fwhm: f64,
    /// Skip the FWHM measurement and assign the nominal value to every object
    pub use_user_fwhm: bool,
    /// Boxcar extraction radius (pixels) stored on every object
    pub boxcar_rad: f64,
    /// Maximum deviation (pixels) of a centroid from the trace fit
    pub maxdev: f64,
    /// Also mask troughs when fitting the profile continuum
    pub has_negative: bool,
    /// Order of the Legendre polynomial fitted to traces
    pub ncoeff: usize,
    /// Keep at most this many of the highest S/N objects
    pub nperslit: Option<usize>,
    /// Minimum smoothed S/N of a peak
    pub snr_thresh: f64,
    /// Minimum peak height as a fraction of the brightest peak, in [0, 1]
    pub peak_thresh: f64,
    /// Absolute floor on the detection S/N threshold
    pub abs_thresh: f64,
    /// Peaks closer than (left, right) rectified pixels to the slit edge are ignored
    pub trim_edg: (f64, f64),
    /// Detection threshold used while masking peaks in the continuum fit
    pub cont_sig_thresh: f64,
    /// Sky mask half-width as a multiple of the FWHM
    pub extract_maskwidth: f64,
    /// Subtract a fitted continuum from the profiles before peak finding
    pub cont_fit: bool,
    /// Polynomial order of the continuum fit
    pub npoly_cont: usize,
    /// Spectral rows (min, max) used to build the profile; defaults to the slit range
    pub find_min_max: Option<(usize, usize)>,
    /// Centroid/fit iterations per trace fitting round
    pub trace_niter: usize,
    /// Where to write the peak QA record, if anywhere
    pub qa_path: Option<PathBuf>,
}

impl Default for FindObjConfig {
    fn default() -> Self {
        Self {
            fwhm: 3.0,
            use_user_fwhm: false,
            boxcar_rad: 7.0,
            maxdev: 2.0,
            has_negative: false,
            ncoeff: 5,
            nperslit: None,
            snr_thresh: 10.0,
            peak_thresh: 0.0,
            abs_thresh: 0.0,
            trim_edg: (5.0, 5.0),
            cont_sig_thresh: 2.0,
            extract_maskwidth: 4.0,
            cont_fit: true,
            npoly_cont: 1,
            find_min_max: None,
            trace_niter: 7,
            qa_path: None,
        }
    }
}

impl FindObjConfig {
    pub fn validate(&self) -> Result<(), ObjFindError> {
        if !(0.0..=1.0).contains(&self.peak_thresh) {
            return Err(ObjFindError::InvalidConfig(format!(
                "peak_thresh must be between 0 and 1, got {}",
                self.peak_thresh
            )));
        }
        if !(self.fwhm.is_finite() && self.fwhm > 0.0) {
            return Err(ObjFindError::InvalidConfig(format!(
                "fwhm must be positive, got {}",
                self.fwhm
            )));
        }
        if self.trim_edg.0 < 0.0 || self.trim_edg.1 < 0.0 {
            return Err(ObjFindError::InvalidConfig(format!(
                "trim_edg must be non-negative, got {:?}",
                self.trim_edg
            )));
        }
        if let Some((lo, hi)) = self.find_min_max {
            if lo > hi {
                return Err(ObjFindError::InvalidConfig(format!(
                    "find_min_max is inverted: ({}, {})",
                    lo, hi
                )));
            }
        }
        Ok(())
    }
}

/// Plate scale of an echelle detector, arcsec per pixel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PlateScale {
    Uniform(f64),
    PerOrder(Vec<f64>),
}

impl PlateScale {
    /// Expand to one value per order, rejecting a per-order list of the wrong length.
    pub fn per_order(&self, norders: usize) -> Result<Vec<f64>, ObjFindError> {
        let scales = match self {
            PlateScale::Uniform(v) => vec![*v; norders],
            PlateScale::PerOrder(v) if v.len() == norders => v.clone(),
            PlateScale::PerOrder(v) => {
                return Err(ObjFindError::InvalidConfig(format!(
                    "plate_scale has {} entries but there are {} orders",
                    v.len(),
                    norders
                )))
            }
        };
        if scales.iter().any(|s| !(s.is_finite() && *s > 0.0)) {
            return Err(ObjFindError::InvalidConfig(format!(
                "plate_scale must be positive, got {:?}",
                scales
            )));
        }
        Ok(scales)
    }
}

/// Parameters for echelle object finding and cross-order linking
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EchelleConfig {
    /// Per-order detection parameters; `nperslit` and `boxcar_rad` are overridden
    pub find: FindObjConfig,
    /// Friends-of-friends linking length in arcsec
    pub fof_link: f64,
    pub plate_scale: PlateScale,
    /// Keep an object whose S/N exceeds this on any order
    pub max_snr: f64,
    /// ...or which exceeds `min_snr` on at least `nabove_min_snr` orders
    pub min_snr: f64,
    pub nabove_min_snr: usize,
    /// PCA model of the per-order traces of one object
    pub pca: PcaConfig,
    /// Boxcar radius in arcsec
    pub box_radius: f64,
    /// Maximum number of (non-hand) objects kept per order
    pub nperorder: usize,
}

impl Default for EchelleConfig {
    fn default() -> Self {
        Self {
            find: FindObjConfig {
                extract_maskwidth: 3.0,
                ..FindObjConfig::default()
            },
            fof_link: 1.5,
            plate_scale: PlateScale::Uniform(0.2),
            max_snr: 2.0,
            min_snr: 1.0,
            nabove_min_snr: 2,
            pca: PcaConfig::default(),
            box_radius: 2.0,
            nperorder: 2,
        }
    }
}

/// Parameters for building a sky mask
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkyMaskConfig {
    /// Half-width (pixels) of the band masked around each trace; FWHM when unset
    pub box_rad_pix: Option<f64>,
    pub trim_edg: (f64, f64),
    /// Pixels where the model object S/N reaches this value are not sky
    pub skymask_snr_thresh: f64,
}

impl Default for SkyMaskConfig {
    fn default() -> Self {
        Self {
            box_rad_pix: None,
            trim_edg: (5.0, 5.0),
            skymask_snr_thresh: 1.0,
        }
    }
}
