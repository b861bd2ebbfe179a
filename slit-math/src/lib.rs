//! slit-math - Numeric primitives for spectroscopic object finding
//!
//! This crate provides the numerical building blocks used when locating
//! sources in spectrograph slits and echelle orders:
//!
//! - **Statistics** - Median, MAD-based scatter and sigma clipping
//! - **Interpolation** - Clamped linear interpolation on sorted grids
//! - **Smoothing** - Gaussian filtering and running medians
//! - **Polyfit** - Weighted and outlier-rejecting polynomial fits
//! - **PCA** - Principal component prediction of trace families
//! - **FOF** - Friends-of-friends grouping of point sets

pub mod fof;
pub mod interp;
pub mod pca;
pub mod polyfit;
pub mod smooth;
pub mod stats;

pub use fof::friends_of_friends;
pub use interp::{interp_clamped, interp_many, InterpError};
pub use pca::{pca_predict_traces, PcaConfig, PcaDecomposition, PcaError};
pub use polyfit::{robust_fit, Basis, FitError, PolyFit, RobustFit, RobustFitConfig};
pub use smooth::{gaussian_filter1d, running_median};
pub use stats::{mad_std, median, sigma_clip_mask, sigma_clipped_stats, ClippedStats, StatsError};
