//! Combination of the configured weight sources into total event weights.
//!
//! For a `(sample, year)` the manager instantiates the common weights plus the
//! sample-specific ones. In the nominal pass the total weight is the product of
//! all nominals, and each requested variation replaces exactly one source's
//! nominal by its up/down array. In a shifted shape pass only the nominal
//! total is produced, but every source is still asked to compute under that
//! pass so unsupported passes surface as errors.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::corrections::CorrectionStore;
use crate::domain::{EventBatch, Metadata, ShapeVariation, VariationPair, WeightValue};
use crate::error::WeightError;
use crate::weights::{WeightComputation, WeightContext, WeightParameters, WeightRegistry};

/// Which weights apply to which samples, and which propagate variations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WeightsConfig {
    #[serde(default)]
    pub common: Vec<String>,
    #[serde(default)]
    pub by_sample: BTreeMap<String, Vec<String>>,
    /// Weights whose variations are filled for every sample.
    #[serde(default)]
    pub variations: Vec<String>,
    #[serde(default)]
    pub variations_by_sample: BTreeMap<String, Vec<String>>,
    /// Weights precomputed upstream and read from batch columns.
    #[serde(default)]
    pub columns: Vec<String>,
}

impl WeightsConfig {
    fn weights_for(&self, sample: &str) -> Vec<&str> {
        let mut names: Vec<&str> = self.common.iter().map(String::as_str).collect();
        if let Some(extra) = self.by_sample.get(sample) {
            for name in extra {
                if !names.contains(&name.as_str()) {
                    names.push(name);
                }
            }
        }
        names
    }

    fn variations_for(&self, sample: &str) -> BTreeSet<&str> {
        let mut names: BTreeSet<&str> = self.variations.iter().map(String::as_str).collect();
        if let Some(extra) = self.variations_by_sample.get(sample) {
            names.extend(extra.iter().map(String::as_str));
        }
        names
    }
}

/// Total per-event weights of one batch.
#[derive(Debug, Clone, PartialEq)]
pub struct EventWeights {
    pub nominal: Vec<f64>,
    /// Variation label -> total up/down weights.
    pub variations: BTreeMap<String, VariationPair>,
}

/// Weight sources instantiated for one `(sample, year)`.
pub struct WeightsManager {
    weights: Vec<Arc<dyn WeightComputation>>,
    with_variations: BTreeSet<String>,
    is_mc: bool,
}

impl WeightsManager {
    pub fn new(
        config: &WeightsConfig,
        registry: &WeightRegistry,
        params: &WeightParameters,
        metadata: &Metadata,
        store: &CorrectionStore,
    ) -> Result<Self, WeightError> {
        if !metadata.is_mc {
            return Ok(Self {
                weights: Vec::new(),
                with_variations: BTreeSet::new(),
                is_mc: false,
            });
        }

        let ctx = WeightContext {
            params,
            metadata,
            store,
        };
        let weights = config
            .weights_for(&metadata.sample)
            .into_iter()
            .map(|name| registry.get(name)?.instantiate(&ctx))
            .collect::<Result<Vec<_>, _>>()?;

        let requested = config.variations_for(&metadata.sample);
        for name in &requested {
            if !weights.iter().any(|w| w.name() == *name) {
                return Err(WeightError::UnknownWeight(format!(
                    "{name} (variation requested for '{}' but the weight is not applied)",
                    metadata.sample
                )));
            }
        }

        let manager = Self {
            weights,
            with_variations: requested.into_iter().map(str::to_string).collect(),
            is_mc: true,
        };
        debug!(
            sample = %metadata.sample,
            year = %metadata.year,
            weights = ?manager.weight_names(),
            "weights instantiated"
        );
        Ok(manager)
    }

    /// Names of the applied weights, in configuration order.
    pub fn weight_names(&self) -> Vec<&str> {
        self.weights.iter().map(|w| w.name()).collect()
    }

    /// Labels of the variations produced in the nominal pass.
    pub fn variation_labels(&self) -> Vec<String> {
        self.weights
            .iter()
            .filter(|w| self.with_variations.contains(w.name()))
            .flat_map(|w| w.variations().into_iter().map(|var| variation_label(w.name(), &var)))
            .collect()
    }

    pub fn compute(
        &self,
        events: &EventBatch,
        metadata: &Metadata,
        shape_variation: &ShapeVariation,
    ) -> Result<EventWeights, WeightError> {
        let n = events.len();
        if !self.is_mc {
            return Ok(EventWeights {
                nominal: vec![1.0; n],
                variations: BTreeMap::new(),
            });
        }

        let values = self
            .weights
            .iter()
            .map(|w| w.compute(events, metadata, shape_variation))
            .collect::<Result<Vec<WeightValue>, _>>()?;

        let nominal = product_excluding(&values, None, n);
        let mut variations = BTreeMap::new();
        if shape_variation.is_nominal() {
            for (idx, value) in values.iter().enumerate() {
                if !self.with_variations.contains(value.name()) {
                    continue;
                }
                let others = product_excluding(&values, Some(idx), n);
                for (var, pair) in value.variations() {
                    variations.insert(
                        variation_label(value.name(), var),
                        VariationPair {
                            up: others.iter().zip(&pair.up).map(|(o, u)| o * u).collect(),
                            down: others.iter().zip(&pair.down).map(|(o, d)| o * d).collect(),
                        },
                    );
                }
            }
        }

        Ok(EventWeights { nominal, variations })
    }
}

/// Histogram label of a weight variation: the weight name for single-variation
/// sources, `<weight>_<variation>` otherwise.
pub fn variation_label(weight: &str, variation: &str) -> String {
    if weight == variation {
        weight.to_string()
    } else {
        format!("{weight}_{variation}")
    }
}

fn product_excluding(values: &[WeightValue], skip: Option<usize>, n: usize) -> Vec<f64> {
    let mut out = vec![1.0; n];
    for (idx, value) in values.iter().enumerate() {
        if Some(idx) == skip {
            continue;
        }
        for (o, w) in out.iter_mut().zip(value.nominal()) {
            *o *= w;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corrections::BinnedCorrection;
    use approx::assert_relative_eq;

    fn store() -> CorrectionStore {
        let mut content = BTreeMap::new();
        content.insert("nominal".to_string(), vec![0.5, 2.0]);
        content.insert("pileupUp".to_string(), vec![0.6, 2.2]);
        content.insert("pileupDown".to_string(), vec![0.4, 1.8]);
        let pu = BinnedCorrection {
            name: "pu".to_string(),
            inputs: vec!["Pileup_nTrueInt".to_string()],
            edges: vec![vec![0.0, 30.0, 100.0]],
            content,
        };
        CorrectionStore::in_memory(vec![("2018".to_string(), pu)]).unwrap()
    }

    fn config() -> WeightsConfig {
        WeightsConfig {
            common: vec!["genWeight".to_string(), "pileup".to_string(), "sf_top_pt".to_string()],
            variations: vec!["pileup".to_string()],
            ..WeightsConfig::default()
        }
    }

    fn params() -> WeightParameters {
        let mut params = WeightParameters::default();
        params.pileup.insert("2018".to_string(), "pu".to_string());
        params
    }

    fn batch() -> EventBatch {
        let mut events = EventBatch::new(2);
        events.columns.insert("genWeight".to_string(), vec![3.0, -1.0]);
        events.columns.insert("Pileup_nTrueInt".to_string(), vec![10.0, 50.0]);
        events
    }

    #[test]
    fn totals_multiply_and_shift_one_source() {
        let store = store();
        let meta = Metadata::new("TTV", "2018", 2);
        let manager =
            WeightsManager::new(&config(), &WeightRegistry::standard(), &params(), &meta, &store).unwrap();
        assert_eq!(manager.variation_labels(), vec!["pileup".to_string()]);
        assert_eq!(manager.weight_names(), vec!["genWeight", "pileup", "sf_top_pt"]);

        let out = manager.compute(&batch(), &meta, &ShapeVariation::Nominal).unwrap();
        assert_relative_eq!(out.nominal[0], 1.5);
        assert_relative_eq!(out.nominal[1], -2.0);
        let pu = &out.variations["pileup"];
        assert_relative_eq!(pu.up[0], 3.0 * 0.6, epsilon = 1e-12);
        assert_relative_eq!(pu.down[1], -1.8, epsilon = 1e-12);
    }

    #[test]
    fn shifted_pass_has_no_weight_variations() {
        let store = store();
        let meta = Metadata::new("TTV", "2018", 2);
        let manager =
            WeightsManager::new(&config(), &WeightRegistry::standard(), &params(), &meta, &store).unwrap();
        let out = manager
            .compute(&batch(), &meta, &ShapeVariation::from("JES_Total_AK4PFchsDown"))
            .unwrap();
        assert!(out.variations.is_empty());
        assert_eq!(out.nominal.len(), 2);
    }

    #[test]
    fn data_gets_unit_weights() {
        let store = store();
        let mut meta = Metadata::new("DATA_SingleMuon", "2018", 2);
        meta.is_mc = false;
        let manager =
            WeightsManager::new(&config(), &WeightRegistry::standard(), &params(), &meta, &store).unwrap();
        let out = manager.compute(&EventBatch::new(2), &meta, &ShapeVariation::Nominal).unwrap();
        assert_eq!(out.nominal, vec![1.0, 1.0]);
        assert!(manager.weight_names().is_empty());
    }

    #[test]
    fn variation_for_unapplied_weight_is_rejected() {
        let store = store();
        let meta = Metadata::new("TTV", "2018", 2);
        let mut cfg = config();
        cfg.variations.push("sf_ttlf_calib".to_string());
        assert!(WeightsManager::new(&cfg, &WeightRegistry::standard(), &params(), &meta, &store).is_err());
    }

    #[test]
    fn labels_prefix_multi_variation_sources() {
        assert_eq!(variation_label("pileup", "pileup"), "pileup");
        assert_eq!(
            variation_label("sf_ttlf_calib_with_ttcc_variations", "ttcc_norm"),
            "sf_ttlf_calib_with_ttcc_variations_ttcc_norm"
        );
    }
}
