//! Detected objects and the collection that holds them.
//!
//! A [`SpecObj`] describes one source on one slit or echelle order. Echelle
//! objects spanning several orders are represented by one `SpecObj` per order
//! sharing the same `ech_objid`. [`SpecObjs`] is an ordered arena of these
//! records with column projections for the vectorised bookkeeping done by the
//! finders.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Reduction pipeline an object was found by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Pypeline {
    #[default]
    MultiSlit,
    Echelle,
}

/// Identity of the slit an object is found on, copied onto every detection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SpecObjMeta {
    pub pypeline: Pypeline,
    pub det: usize,
    pub slitid: i32,
    pub ech_orderindx: Option<usize>,
    pub ech_order: Option<i32>,
}

/// Reasons an object cannot be handed to extraction
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ReadinessError {
    #[error("trace is empty")]
    MissingTrace,
    #[error("trace has {trace} samples but the spectral vector has {spec}")]
    TraceLengthMismatch { trace: usize, spec: usize },
    #[error("trace sample {0} is not finite")]
    NonFiniteTrace(usize),
    #[error("FWHM is not set")]
    MissingFwhm,
    #[error("FWHM must be positive, got {0}")]
    InvalidFwhm(f64),
    #[error("OBJID is not set")]
    MissingObjId,
    #[error("box radius is not set")]
    MissingBoxRadius,
    #[error("echelle field {0} is not set")]
    MissingEchelleField(&'static str),
}

/// One source on one slit or order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SpecObj {
    pub pypeline: Pypeline,
    pub det: usize,
    pub slitid: i32,

    /// Position across the slit as a fraction of its width, in [0, 1]
    pub spat_fracpos: f64,
    /// Spatial pixel of the trace at the middle spectral row
    pub spat_pixpos: f64,
    /// Peak of the smoothed spatial flux profile
    pub smash_peakflux: Option<f64>,
    /// Peak of the smoothed spatial S/N profile
    pub smash_snr: Option<f64>,
    /// S/N threshold the object was detected against
    pub threshold: Option<f64>,
    pub fwhm: Option<f64>,
    pub box_radius: Option<f64>,
    /// Half-width (pixels) of the region masked from sky fitting
    pub maskwidth: Option<f64>,

    /// Spatial position of the trace for every spectral row
    pub trace_spat: Vec<f64>,
    /// Spectral row coordinates matching `trace_spat`
    pub trace_spec: Vec<f64>,

    pub objid: Option<usize>,

    pub ech_orderindx: Option<usize>,
    pub ech_order: Option<i32>,
    pub ech_fracpos: Option<f64>,
    pub ech_objid: Option<usize>,
    /// Position on this order was predicted rather than detected
    pub ech_frac_was_fit: bool,
    pub ech_snr: Option<f64>,

    pub hand_extract_flag: bool,
    pub hand_extract_spec: Option<f64>,
    pub hand_extract_spat: Option<f64>,
    pub hand_extract_det: Option<usize>,
    pub hand_extract_fwhm: Option<f64>,
}

impl SpecObj {
    /// New empty object on the slit described by `meta`, with a trace of `nspec` rows.
    pub fn new(meta: &SpecObjMeta, nspec: usize) -> Self {
        Self {
            pypeline: meta.pypeline,
            det: meta.det,
            slitid: meta.slitid,
            ech_orderindx: meta.ech_orderindx,
            ech_order: meta.ech_order,
            trace_spec: (0..nspec).map(|s| s as f64).collect(),
            trace_spat: vec![0.0; nspec],
            ..Default::default()
        }
    }

    pub fn nspec(&self) -> usize {
        self.trace_spec.len()
    }

    /// Spatial pixel of the trace at the middle spectral row.
    pub fn trace_at_specmid(&self) -> f64 {
        self.trace_spat
            .get(self.trace_spat.len() / 2)
            .copied()
            .unwrap_or(f64::NAN)
    }

    /// Human-readable identifier used in logs and file names.
    pub fn name(&self) -> String {
        match self.pypeline {
            Pypeline::MultiSlit => format!(
                "SPAT{:04}-SLIT{:04}-DET{:02}",
                self.spat_pixpos.round().max(0.0) as i64,
                self.slitid,
                self.det
            ),
            Pypeline::Echelle => format!(
                "OBJ{:04}-DET{:02}-ORDER{:04}",
                (self.ech_fracpos.unwrap_or(self.spat_fracpos) * 1000.0).round() as i64,
                self.det,
                self.ech_order.unwrap_or(-1)
            ),
        }
    }

    /// Check that everything extraction needs has been filled in.
    ///
    /// Echelle objects also need their order and cross-order object id.
    pub fn check_ready(&self) -> Result<(), ReadinessError> {
        self.check_slit_ready()?;
        if self.pypeline == Pypeline::Echelle {
            if self.ech_orderindx.is_none() {
                return Err(ReadinessError::MissingEchelleField("ECH_ORDERINDX"));
            }
            if self.ech_order.is_none() {
                return Err(ReadinessError::MissingEchelleField("ECH_ORDER"));
            }
            if self.ech_objid.is_none() {
                return Err(ReadinessError::MissingEchelleField("ECH_OBJID"));
            }
        }
        Ok(())
    }

    /// The part of [`SpecObj::check_ready`] that a single slit search can
    /// satisfy; cross-order fields are left to the echelle linker.
    pub fn check_slit_ready(&self) -> Result<(), ReadinessError> {
        if self.trace_spat.is_empty() {
            return Err(ReadinessError::MissingTrace);
        }
        if self.trace_spat.len() != self.trace_spec.len() {
            return Err(ReadinessError::TraceLengthMismatch {
                trace: self.trace_spat.len(),
                spec: self.trace_spec.len(),
            });
        }
        if let Some(row) = self.trace_spat.iter().position(|v| !v.is_finite()) {
            return Err(ReadinessError::NonFiniteTrace(row));
        }
        match self.fwhm {
            None => return Err(ReadinessError::MissingFwhm),
            Some(f) if !(f.is_finite() && f > 0.0) => return Err(ReadinessError::InvalidFwhm(f)),
            _ => {}
        }
        if self.objid.is_none() {
            return Err(ReadinessError::MissingObjId);
        }
        if self.box_radius.is_none() {
            return Err(ReadinessError::MissingBoxRadius);
        }
        Ok(())
    }
}

/// Ordered collection of detected objects
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SpecObjs {
    objs: Vec<SpecObj>,
}

impl SpecObjs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.objs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objs.is_empty()
    }

    pub fn push(&mut self, obj: SpecObj) {
        self.objs.push(obj);
    }

    pub fn extend(&mut self, other: SpecObjs) {
        self.objs.extend(other.objs);
    }

    pub fn get(&self, index: usize) -> Option<&SpecObj> {
        self.objs.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut SpecObj> {
        self.objs.get_mut(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, SpecObj> {
        self.objs.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, SpecObj> {
        self.objs.iter_mut()
    }

    /// Keep only the objects for which `keep` is true.
    pub fn retain(&mut self, keep: impl FnMut(&SpecObj) -> bool) {
        self.objs.retain(keep);
    }

    /// Sub-collection of the objects whose mask entry is true.
    pub fn select_mask(&self, mask: &[bool]) -> SpecObjs {
        SpecObjs {
            objs: self
                .objs
                .iter()
                .zip(mask)
                .filter(|(_, &m)| m)
                .map(|(o, _)| o.clone())
                .collect(),
        }
    }

    /// Sub-collection in the order of `indices`; out-of-range indices are skipped.
    pub fn select_indices(&self, indices: &[usize]) -> SpecObjs {
        SpecObjs {
            objs: indices
                .iter()
                .filter_map(|&i| self.objs.get(i).cloned())
                .collect(),
        }
    }

    /// Stable sort on a floating point key.
    pub fn sort_by_f64(&mut self, key: impl Fn(&SpecObj) -> f64) {
        self.objs.sort_by(|a, b| key(a).total_cmp(&key(b)));
    }

    /// Number the objects 1..=N in their current order.
    pub fn set_objids_sequential(&mut self) {
        for (i, obj) in self.objs.iter_mut().enumerate() {
            obj.objid = Some(i + 1);
        }
    }

    pub fn spat_fracpos(&self) -> Vec<f64> {
        self.objs.iter().map(|o| o.spat_fracpos).collect()
    }

    pub fn spat_pixpos(&self) -> Vec<f64> {
        self.objs.iter().map(|o| o.spat_pixpos).collect()
    }

    pub fn fwhm(&self) -> Vec<Option<f64>> {
        self.objs.iter().map(|o| o.fwhm).collect()
    }

    pub fn smash_peakflux(&self) -> Vec<Option<f64>> {
        self.objs.iter().map(|o| o.smash_peakflux).collect()
    }

    pub fn ech_orderindx(&self) -> Vec<Option<usize>> {
        self.objs.iter().map(|o| o.ech_orderindx).collect()
    }

    pub fn ech_objid(&self) -> Vec<Option<usize>> {
        self.objs.iter().map(|o| o.ech_objid).collect()
    }

    pub fn ech_snr(&self) -> Vec<Option<f64>> {
        self.objs.iter().map(|o| o.ech_snr).collect()
    }

    pub fn hand_extract_flag(&self) -> Vec<bool> {
        self.objs.iter().map(|o| o.hand_extract_flag).collect()
    }

    /// Save the collection as pretty-printed JSON.
    pub fn save_to_file(&self, path: &std::path::Path) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
    }

    pub fn load_from_file(path: &std::path::Path) -> std::io::Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }
}

impl IntoIterator for SpecObjs {
    type Item = SpecObj;
    type IntoIter = std::vec::IntoIter<SpecObj>;

    fn into_iter(self) -> Self::IntoIter {
        self.objs.into_iter()
    }
}

impl<'a> IntoIterator for &'a SpecObjs {
    type Item = &'a SpecObj;
    type IntoIter = std::slice::Iter<'a, SpecObj>;

    fn into_iter(self) -> Self::IntoIter {
        self.objs.iter()
    }
}

impl FromIterator<SpecObj> for SpecObjs {
    fn from_iter<I: IntoIterator<Item = SpecObj>>(iter: I) -> Self {
        SpecObjs {
            objs: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ready_obj() -> SpecObj {
        let meta = SpecObjMeta {
            slitid: 12,
            det: 1,
            ..Default::default()
        };
        let mut obj = SpecObj::new(&meta, 4);
        obj.trace_spat = vec![10.0; 4];
        obj.spat_pixpos = 10.0;
        obj.fwhm = Some(3.0);
        obj.objid = Some(1);
        obj.box_radius = Some(7.0);
        obj
    }

    #[test]
    fn test_ready_object_passes() {
        ready_obj().check_ready().unwrap();
    }

    #[test]
    fn test_readiness_failures() {
        let mut obj = ready_obj();
        obj.fwhm = None;
        assert_eq!(obj.check_ready(), Err(ReadinessError::MissingFwhm));

        let mut obj = ready_obj();
        obj.trace_spat.pop();
        assert_eq!(
            obj.check_ready(),
            Err(ReadinessError::TraceLengthMismatch { trace: 3, spec: 4 })
        );

        let mut obj = ready_obj();
        obj.trace_spat[2] = f64::NAN;
        assert_eq!(obj.check_ready(), Err(ReadinessError::NonFiniteTrace(2)));

        let mut obj = ready_obj();
        obj.pypeline = Pypeline::Echelle;
        assert_eq!(
            obj.check_ready(),
            Err(ReadinessError::MissingEchelleField("ECH_ORDERINDX"))
        );
    }

    #[test]
    fn test_order_object_ready_before_linking() {
        let mut obj = ready_obj();
        obj.pypeline = Pypeline::Echelle;
        obj.ech_orderindx = Some(0);
        obj.ech_order = Some(40);
        obj.check_slit_ready().unwrap();
        assert_eq!(
            obj.check_ready(),
            Err(ReadinessError::MissingEchelleField("ECH_OBJID"))
        );
        obj.ech_objid = Some(1);
        obj.check_ready().unwrap();
    }

    #[test]
    fn test_names() {
        let obj = ready_obj();
        assert_eq!(obj.name(), "SPAT0010-SLIT0012-DET01");

        let mut ech = ready_obj();
        ech.pypeline = Pypeline::Echelle;
        ech.ech_fracpos = Some(0.4567);
        ech.ech_order = Some(45);
        assert_eq!(ech.name(), "OBJ0457-DET01-ORDER0045");
    }

    #[test]
    fn test_collection_selection_and_sorting() {
        let mut objs = SpecObjs::new();
        for (i, pos) in [30.0, 10.0, 20.0].iter().enumerate() {
            let mut obj = ready_obj();
            obj.spat_pixpos = *pos;
            obj.objid = Some(i);
            objs.push(obj);
        }
        objs.sort_by_f64(|o| o.spat_pixpos);
        objs.set_objids_sequential();
        assert_eq!(objs.spat_pixpos(), vec![10.0, 20.0, 30.0]);
        assert_eq!(
            objs.iter().map(|o| o.objid).collect::<Vec<_>>(),
            vec![Some(1), Some(2), Some(3)]
        );

        let sub = objs.select_mask(&[true, false, true]);
        assert_eq!(sub.spat_pixpos(), vec![10.0, 30.0]);
        let sub = objs.select_indices(&[2, 0, 9]);
        assert_eq!(sub.spat_pixpos(), vec![30.0, 10.0]);
    }

    #[test]
    fn test_json_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("objs.json");
        let objs: SpecObjs = vec![ready_obj()].into_iter().collect();
        objs.save_to_file(&path).unwrap();
        assert_eq!(SpecObjs::load_from_file(&path).unwrap(), objs);
    }

    #[test]
    fn test_json_file_keeps_every_bit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fitted.json");
        let mut obj = ready_obj();
        obj.trace_spat = (0..4).map(|s| 25.0 + 13.7 * (0.37 * s as f64).sin() / 3.0).collect();
        obj.trace_spat[0] = 24.975767951342142;
        obj.spat_fracpos = 0.1 + 0.2;
        obj.fwhm = Some(2.0f64.sqrt() * 2.354_820_045);
        let objs: SpecObjs = vec![obj].into_iter().collect();
        objs.save_to_file(&path).unwrap();

        let loaded = SpecObjs::load_from_file(&path).unwrap();
        let before = objs.get(0).unwrap();
        let after = loaded.get(0).unwrap();
        for (a, b) in after.trace_spat.iter().zip(&before.trace_spat) {
            assert_eq!(a.to_bits(), b.to_bits());
        }
        assert_eq!(after.spat_fracpos.to_bits(), before.spat_fracpos.to_bits());
        assert_eq!(loaded, objs);
    }
}
