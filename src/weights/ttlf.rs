//! tt+LF background calibration.
//!
//! The calibration corrects tt+LF to data minus the other backgrounds in bins
//! of jet multiplicity and jet H_T, with one table per year. Two flavours:
//!
//! - [`SfTtlfCalib`]: nominal factor only. It carries no variations and is
//!   evaluated the same way in every shape pass.
//! - [`SfTtlfCalibWithTtccVariations`]: nominal plus a year-scoped list of
//!   decorrelated variations. Only the nominal shape pass is supported; any
//!   other pass is rejected with [`WeightError::NotImplemented`].

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::corrections::CorrectionTable;
use crate::domain::{EventBatch, Metadata, ShapeVariation, VariationPair, WeightValue};
use crate::error::WeightError;
use crate::weights::{WeightComputation, WeightContext};

pub const SF_TTLF_CALIB: &str = "sf_ttlf_calib";
pub const SF_TTLF_CALIB_WITH_TTCC_VARIATIONS: &str = "sf_ttlf_calib_with_ttcc_variations";

/// `(njets, H_T)` features of the jet collection, computed once per batch.
fn jet_features(events: &EventBatch, jet_coll: &str, name: &str) -> Result<(Vec<f64>, Vec<f64>), WeightError> {
    let missing = || WeightError::FeatureMismatch {
        name: name.to_string(),
        detail: format!("batch has no jet collection '{jet_coll}'"),
    };
    let njets = events.multiplicity(jet_coll).ok_or_else(missing)?;
    let jets_ht = events.sum_pt(jet_coll).ok_or_else(missing)?;
    Ok((njets, jets_ht))
}

fn resolve_table(ctx: &WeightContext<'_>) -> Result<Arc<dyn CorrectionTable>, WeightError> {
    let year = &ctx.metadata.year;
    let table_name = ctx
        .params
        .ttlf_calibration
        .get(year)
        .ok_or_else(|| WeightError::MissingCalibration {
            year: year.clone(),
            name: "ttlf_calibration".to_string(),
        })?;
    ctx.store.get(year, table_name)
}

#[derive(Debug)]
pub struct SfTtlfCalib {
    jet_coll: String,
    table: Arc<dyn CorrectionTable>,
    samples: Vec<String>,
}

impl WeightComputation for SfTtlfCalib {
    fn name(&self) -> &str {
        SF_TTLF_CALIB
    }

    fn compute(
        &self,
        events: &EventBatch,
        metadata: &Metadata,
        _shape_variation: &ShapeVariation,
    ) -> Result<WeightValue, WeightError> {
        if !self.samples.contains(&metadata.sample) {
            return Ok(WeightValue::identity(SF_TTLF_CALIB, events.len(), &[]));
        }
        let (njets, jets_ht) = jet_features(events, &self.jet_coll, SF_TTLF_CALIB)?;
        let nominal = self.table.evaluate("nominal", &[njets.as_slice(), jets_ht.as_slice()])?;
        WeightValue::nominal_only(SF_TTLF_CALIB, nominal)
    }
}

pub fn build_ttlf_calib(ctx: &WeightContext<'_>) -> Result<Arc<dyn WeightComputation>, WeightError> {
    Ok(Arc::new(SfTtlfCalib {
        jet_coll: ctx.params.jet_collection.clone(),
        table: resolve_table(ctx)?,
        samples: ctx.params.ttlf_samples.clone(),
    }))
}

#[derive(Debug)]
pub struct SfTtlfCalibWithTtccVariations {
    jet_coll: String,
    table: Arc<dyn CorrectionTable>,
    samples: Vec<String>,
    /// Variation names valid for the year this instance was built for.
    variations: Vec<String>,
}

impl WeightComputation for SfTtlfCalibWithTtccVariations {
    fn name(&self) -> &str {
        SF_TTLF_CALIB_WITH_TTCC_VARIATIONS
    }

    fn variations(&self) -> Vec<String> {
        self.variations.clone()
    }

    fn compute(
        &self,
        events: &EventBatch,
        metadata: &Metadata,
        shape_variation: &ShapeVariation,
    ) -> Result<WeightValue, WeightError> {
        if !shape_variation.is_nominal() {
            return Err(WeightError::NotImplemented(format!(
                "{SF_TTLF_CALIB_WITH_TTCC_VARIATIONS} only supports the nominal shape pass, got '{shape_variation}'"
            )));
        }
        if !self.samples.contains(&metadata.sample) {
            return Ok(WeightValue::identity(
                SF_TTLF_CALIB_WITH_TTCC_VARIATIONS,
                events.len(),
                &self.variations,
            ));
        }

        let (njets, jets_ht) = jet_features(events, &self.jet_coll, SF_TTLF_CALIB_WITH_TTCC_VARIATIONS)?;
        let features = [njets.as_slice(), jets_ht.as_slice()];

        // One nominal evaluation shared by every variation.
        let nominal = self.table.evaluate("nominal", &features)?;
        let mut variations = BTreeMap::new();
        for var in &self.variations {
            let up = self.table.evaluate(&format!("{var}Up"), &features)?;
            let down = self.table.evaluate(&format!("{var}Down"), &features)?;
            variations.insert(var.clone(), VariationPair { up, down });
        }
        WeightValue::new(SF_TTLF_CALIB_WITH_TTCC_VARIATIONS, nominal, variations)
    }
}

pub fn build_ttlf_calib_with_ttcc_variations(
    ctx: &WeightContext<'_>,
) -> Result<Arc<dyn WeightComputation>, WeightError> {
    let year = &ctx.metadata.year;
    let variations = ctx
        .params
        .ttlf_variations
        .get(year)
        .cloned()
        .ok_or_else(|| WeightError::MissingCalibration {
            year: year.clone(),
            name: "ttlf_calibration variations".to_string(),
        })?;
    Ok(Arc::new(SfTtlfCalibWithTtccVariations {
        jet_coll: ctx.params.jet_collection.clone(),
        table: resolve_table(ctx)?,
        samples: ctx.params.ttlf_samples.clone(),
        variations,
    }))
}
