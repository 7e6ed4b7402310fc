//! Generator, normalization and pileup weights shared by every MC sample.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::corrections::CorrectionTable;
use crate::domain::{EventBatch, Metadata, ShapeVariation, VariationPair, WeightValue};
use crate::error::WeightError;
use crate::weights::{WeightComputation, WeightContext, WeightLambda};

pub const GEN_WEIGHT: &str = "genWeight";
pub const LUMI_XS: &str = "lumi_xs";
pub const PILEUP: &str = "pileup";

/// Generator weight read from the `genWeight` column.
pub fn gen_weight() -> WeightLambda {
    WeightLambda::wrap_func(GEN_WEIGHT, |events: &EventBatch, metadata: &Metadata, _: &ShapeVariation| {
        events
            .column(GEN_WEIGHT)
            .map(<[f64]>::to_vec)
            .ok_or_else(|| WeightError::InvalidOutput {
                name: GEN_WEIGHT.to_string(),
                detail: format!("sample '{}' has no '{GEN_WEIGHT}' column", metadata.sample),
            })
    })
}

/// Luminosity times cross section over the dataset sum of generator weights.
pub fn lumi_xs() -> WeightLambda {
    WeightLambda::wrap_func(LUMI_XS, |events: &EventBatch, metadata: &Metadata, _: &ShapeVariation| {
        let missing = |field: &str| WeightError::InvalidOutput {
            name: LUMI_XS.to_string(),
            detail: format!("sample '{}' has no '{field}' in metadata", metadata.sample),
        };
        let lumi = metadata.lumi.ok_or_else(|| missing("lumi"))?;
        let xsec = metadata.xsec.ok_or_else(|| missing("xsec"))?;
        let sum_w = metadata.sum_genweights.ok_or_else(|| missing("sum_genweights"))?;
        if sum_w == 0.0 {
            return Err(missing("non-zero sum_genweights"));
        }
        Ok(vec![lumi * xsec / sum_w; events.len()])
    })
}

/// Scale factor read from a correction table whose inputs are batch columns.
///
/// The single variation is named after the weight and evaluated with the
/// `<name>Up` / `<name>Down` tags.
#[derive(Debug)]
pub struct TableWeight {
    name: String,
    table: Arc<dyn CorrectionTable>,
    with_variation: bool,
}

impl TableWeight {
    pub fn new(name: impl Into<String>, table: Arc<dyn CorrectionTable>) -> Self {
        let name = name.into();
        let tags = table.tags();
        let with_variation = tags.contains(&format!("{name}Up").as_str())
            && tags.contains(&format!("{name}Down").as_str());
        Self {
            name,
            table,
            with_variation,
        }
    }
}

impl WeightComputation for TableWeight {
    fn name(&self) -> &str {
        &self.name
    }

    fn variations(&self) -> Vec<String> {
        if self.with_variation {
            vec![self.name.clone()]
        } else {
            Vec::new()
        }
    }

    fn compute(
        &self,
        events: &EventBatch,
        metadata: &Metadata,
        _shape_variation: &ShapeVariation,
    ) -> Result<WeightValue, WeightError> {
        let columns = self
            .table
            .inputs()
            .iter()
            .map(|input| {
                events.column(input).ok_or_else(|| WeightError::FeatureMismatch {
                    name: self.table.name().to_string(),
                    detail: format!("sample '{}' has no column '{input}'", metadata.sample),
                })
            })
            .collect::<Result<Vec<&[f64]>, _>>()?;

        let nominal = self.table.evaluate("nominal", &columns)?;
        let mut variations = BTreeMap::new();
        if self.with_variation {
            let up = self.table.evaluate(&format!("{}Up", self.name), &columns)?;
            let down = self.table.evaluate(&format!("{}Down", self.name), &columns)?;
            variations.insert(self.name.clone(), VariationPair { up, down });
        }
        WeightValue::new(self.name.clone(), nominal, variations)
    }
}

/// Scale factor computed upstream and stored in the batch as `<name>`, with
/// optional `<name>Up` / `<name>Down` columns.
#[derive(Debug, Clone)]
pub struct ColumnWeight {
    name: String,
}

impl ColumnWeight {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl WeightComputation for ColumnWeight {
    fn name(&self) -> &str {
        &self.name
    }

    fn variations(&self) -> Vec<String> {
        vec![self.name.clone()]
    }

    fn compute(
        &self,
        events: &EventBatch,
        metadata: &Metadata,
        _shape_variation: &ShapeVariation,
    ) -> Result<WeightValue, WeightError> {
        let column = |suffix: &str| {
            let key = format!("{}{suffix}", self.name);
            events.column(&key).map(<[f64]>::to_vec).ok_or_else(|| WeightError::InvalidOutput {
                name: self.name.clone(),
                detail: format!("sample '{}' has no column '{key}'", metadata.sample),
            })
        };
        let nominal = column("")?;
        let mut variations = BTreeMap::new();
        variations.insert(
            self.name.clone(),
            VariationPair {
                up: column("Up")?,
                down: column("Down")?,
            },
        );
        WeightValue::new(self.name.clone(), nominal, variations)
    }
}

pub fn build_pileup(ctx: &WeightContext<'_>) -> Result<Arc<dyn WeightComputation>, WeightError> {
    let year = &ctx.metadata.year;
    let table_name = ctx
        .params
        .pileup
        .get(year)
        .ok_or_else(|| WeightError::MissingCalibration {
            year: year.clone(),
            name: PILEUP.to_string(),
        })?;
    let table = ctx.store.get(year, table_name)?;
    Ok(Arc::new(TableWeight::new(PILEUP, table)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corrections::{BinnedCorrection, CorrectionStore};
    use crate::weights::WeightParameters;

    fn pileup_store() -> CorrectionStore {
        let mut content = BTreeMap::new();
        content.insert("nominal".to_string(), vec![0.8, 1.2]);
        content.insert("pileupUp".to_string(), vec![0.9, 1.3]);
        content.insert("pileupDown".to_string(), vec![0.7, 1.1]);
        let table = BinnedCorrection {
            name: "pu_2018".to_string(),
            inputs: vec!["Pileup_nTrueInt".to_string()],
            edges: vec![vec![0.0, 30.0, 100.0]],
            content,
        };
        CorrectionStore::in_memory(vec![("2018".to_string(), table)]).unwrap()
    }

    #[test]
    fn pileup_reads_column_and_variation() {
        let store = pileup_store();
        let mut params = WeightParameters::default();
        params.pileup.insert("2018".to_string(), "pu_2018".to_string());
        let meta = Metadata::new("TTV", "2018", 2);
        let ctx = WeightContext {
            params: &params,
            metadata: &meta,
            store: &store,
        };
        let weight = build_pileup(&ctx).unwrap();
        assert_eq!(weight.variations(), vec!["pileup".to_string()]);

        let mut events = EventBatch::new(2);
        events.columns.insert("Pileup_nTrueInt".to_string(), vec![10.0, 45.0]);
        let out = weight.compute(&events, &meta, &ShapeVariation::Nominal).unwrap();
        assert_eq!(out.nominal(), &[0.8, 1.2]);
        assert_eq!(out.variations()["pileup"].up, vec![0.9, 1.3]);
        assert_eq!(out.variations()["pileup"].down, vec![0.7, 1.1]);
    }

    #[test]
    fn pileup_without_year_entry_is_a_configuration_error() {
        let store = pileup_store();
        let params = WeightParameters::default();
        let meta = Metadata::new("TTV", "2017", 2);
        let ctx = WeightContext {
            params: &params,
            metadata: &meta,
            store: &store,
        };
        assert!(matches!(
            build_pileup(&ctx).err(),
            Some(WeightError::MissingCalibration { .. })
        ));
    }

    #[test]
    fn negative_pileup_table_is_rejected_on_load() {
        let mut content = BTreeMap::new();
        content.insert("nominal".to_string(), vec![-0.5, 1.2]);
        let table = BinnedCorrection {
            name: "pu_2018".to_string(),
            inputs: vec!["Pileup_nTrueInt".to_string()],
            edges: vec![vec![0.0, 30.0, 100.0]],
            content,
        };
        assert!(matches!(
            CorrectionStore::in_memory(vec![("2018".to_string(), table)]).err(),
            Some(WeightError::FeatureMismatch { .. })
        ));
    }

    #[test]
    fn lumi_xs_is_constant_per_batch() {
        let mut meta = Metadata::new("TTV", "2018", 3);
        meta.lumi = Some(59_740.0);
        meta.xsec = Some(0.5);
        meta.sum_genweights = Some(1_000.0);
        let out = lumi_xs()
            .compute(&EventBatch::new(3), &meta, &ShapeVariation::Nominal)
            .unwrap();
        assert_eq!(out.nominal(), &[29.87; 3]);
    }

    #[test]
    fn column_weight_reads_nominal_and_shifts() {
        let mut events = EventBatch::new(2);
        events.columns.insert("sf_mu_id".to_string(), vec![0.98, 1.01]);
        events.columns.insert("sf_mu_idUp".to_string(), vec![1.0, 1.03]);
        events.columns.insert("sf_mu_idDown".to_string(), vec![0.96, 0.99]);
        let meta = Metadata::new("TTV", "2018", 2);
        let out = ColumnWeight::new("sf_mu_id")
            .compute(&events, &meta, &ShapeVariation::Nominal)
            .unwrap();
        assert_eq!(out.nominal(), &[0.98, 1.01]);
        assert_eq!(out.variations()["sf_mu_id"].down, vec![0.96, 0.99]);

        events.columns.remove("sf_mu_idDown");
        assert!(ColumnWeight::new("sf_mu_id")
            .compute(&events, &meta, &ShapeVariation::Nominal)
            .is_err());
    }

    #[test]
    fn gen_weight_requires_column() {
        let meta = Metadata::new("TTV", "2018", 2);
        assert!(gen_weight()
            .compute(&EventBatch::new(2), &meta, &ShapeVariation::Nominal)
            .is_err());
    }
}
