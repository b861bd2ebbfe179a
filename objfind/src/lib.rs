//! Object finding for slit and echelle spectroscopy.
//!
//! The crate locates sources in rectified slit profiles, measures their
//! spatial width, fits traces along the spectral axis, builds sky masks around
//! them and, for echelle data, links per-order detections into multi-order
//! objects.
//!
//! # Main Entry Points
//!
//! - [`objs_in_slit`] - find objects in one slit or order
//! - [`create_skymask`] - mask object pixels for sky subtraction
//! - [`ech_objfind`] - find and reconcile objects across echelle orders
//!
//! All images are `(nspec, nspat)` arrays with the spectral axis first.

pub mod config;
pub mod continuum;
pub mod echelle;
pub mod error;
pub mod extract;
pub mod fwhm;
pub mod geometry;
pub mod hand;
pub mod peaks;
pub mod profile;
pub mod qa;
pub mod skymask;
pub mod slit;
pub mod specobj;
pub mod trace;

pub use config::{EchelleConfig, FindObjConfig, PlateScale, SkyMaskConfig};
pub use echelle::{ech_objfind, EchelleInput};
pub use error::ObjFindError;
pub use geometry::SlitGeometry;
pub use hand::HandAperture;
pub use skymask::create_skymask;
pub use slit::{objs_in_slit, SlitInput};
pub use specobj::{Pypeline, ReadinessError, SpecObj, SpecObjMeta, SpecObjs};
