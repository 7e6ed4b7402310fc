//! Shared domain types.
//!
//! These types are kept small and serializable so they can be:
//!
//! - passed between the weight engine, histogram filling and datacard assembly
//! - read from / written to the JSON inputs and outputs of the CLI

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::WeightError;

/// Which upstream pass produced an event batch.
///
/// `Nominal` is the central pass; `Shifted` names an alternate-shape pass such
/// as `JES_Total_AK4PFchsUp`, where object collections were recalibrated
/// before the weights are evaluated.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ShapeVariation {
    #[default]
    Nominal,
    Shifted(String),
}

impl ShapeVariation {
    pub fn is_nominal(&self) -> bool {
        matches!(self, ShapeVariation::Nominal)
    }

    pub fn as_str(&self) -> &str {
        match self {
            ShapeVariation::Nominal => "nominal",
            ShapeVariation::Shifted(name) => name,
        }
    }
}

impl From<String> for ShapeVariation {
    fn from(value: String) -> Self {
        if value == "nominal" {
            ShapeVariation::Nominal
        } else {
            ShapeVariation::Shifted(value)
        }
    }
}

impl From<&str> for ShapeVariation {
    fn from(value: &str) -> Self {
        ShapeVariation::from(value.to_string())
    }
}

impl From<ShapeVariation> for String {
    fn from(value: ShapeVariation) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for ShapeVariation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read-only context passed to every weight computation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    /// Dataset-level sample name (e.g. `TTToSemiLeptonic`).
    pub sample: String,
    /// Optional gen-level decomposition (e.g. `TTToSemiLeptonic_tt+LF`).
    #[serde(default)]
    pub subsample: Option<String>,
    pub year: String,
    /// Number of events in the batch.
    #[serde(default)]
    pub size: usize,
    #[serde(default = "default_true")]
    pub is_mc: bool,
    /// Cross section in pb.
    #[serde(default)]
    pub xsec: Option<f64>,
    /// Sum of generator weights of the full dataset.
    #[serde(default)]
    pub sum_genweights: Option<f64>,
    /// Integrated luminosity in pb^-1.
    #[serde(default)]
    pub lumi: Option<f64>,
}

fn default_true() -> bool {
    true
}

impl Metadata {
    pub fn new(sample: impl Into<String>, year: impl Into<String>, size: usize) -> Self {
        Self {
            sample: sample.into(),
            subsample: None,
            year: year.into(),
            size,
            is_mc: true,
            xsec: None,
            sum_genweights: None,
            lumi: None,
        }
    }

    /// Identifier used to key templates: `sample__subsample` or just `sample`.
    pub fn dataset_key(&self) -> String {
        match &self.subsample {
            Some(sub) => format!("{}__{}", self.sample, sub),
            None => self.sample.clone(),
        }
    }
}

/// Up/down arrays of one variation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariationPair {
    pub up: Vec<f64>,
    pub down: Vec<f64>,
}

/// Per-event output of one weight source.
///
/// Fields are private: a value is validated once in [`WeightValue::new`] and is
/// immutable afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct WeightValue {
    name: String,
    nominal: Vec<f64>,
    variations: BTreeMap<String, VariationPair>,
}

impl WeightValue {
    /// Build a weight value, checking that every array is finite and has the
    /// length of `nominal`.
    pub fn new(
        name: impl Into<String>,
        nominal: Vec<f64>,
        variations: BTreeMap<String, VariationPair>,
    ) -> Result<Self, WeightError> {
        let name = name.into();
        let n = nominal.len();
        check_finite(&name, "nominal", &nominal)?;
        for (var, pair) in &variations {
            if pair.up.len() != n || pair.down.len() != n {
                return Err(WeightError::InvalidOutput {
                    name,
                    detail: format!(
                        "variation '{var}' has lengths up={} down={}, nominal={n}",
                        pair.up.len(),
                        pair.down.len()
                    ),
                });
            }
            check_finite(&name, var, &pair.up)?;
            check_finite(&name, var, &pair.down)?;
        }
        Ok(Self {
            name,
            nominal,
            variations,
        })
    }

    pub fn nominal_only(name: impl Into<String>, nominal: Vec<f64>) -> Result<Self, WeightError> {
        Self::new(name, nominal, BTreeMap::new())
    }

    /// Neutral weight: `1.0` everywhere, with every listed variation also at `1.0`.
    pub fn identity(name: impl Into<String>, size: usize, variations: &[String]) -> Self {
        let ones = vec![1.0; size];
        let variations = variations
            .iter()
            .map(|v| {
                (
                    v.clone(),
                    VariationPair {
                        up: ones.clone(),
                        down: ones.clone(),
                    },
                )
            })
            .collect();
        Self {
            name: name.into(),
            nominal: ones,
            variations,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn nominal(&self) -> &[f64] {
        &self.nominal
    }

    pub fn variations(&self) -> &BTreeMap<String, VariationPair> {
        &self.variations
    }

    pub fn len(&self) -> usize {
        self.nominal.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nominal.is_empty()
    }
}

fn check_finite(name: &str, what: &str, values: &[f64]) -> Result<(), WeightError> {
    if let Some(idx) = values.iter().position(|v| !v.is_finite()) {
        return Err(WeightError::InvalidOutput {
            name: name.to_string(),
            detail: format!("non-finite '{what}' value at event {idx}"),
        });
    }
    Ok(())
}

/// A generator-level particle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenParticle {
    pub pdg_id: i32,
    pub pt: f64,
    #[serde(default = "default_true")]
    pub is_last_copy: bool,
    #[serde(default = "default_true")]
    pub has_parent: bool,
}

/// A columnar batch of events.
///
/// Object collections are stored as per-event lists (jagged arrays); flat
/// per-event quantities live in `columns`. Category membership is decided
/// upstream and arrives as boolean masks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventBatch {
    pub n_events: usize,
    /// Collection name -> per-event jet pt values.
    #[serde(default)]
    pub jets: BTreeMap<String, Vec<Vec<f64>>>,
    /// Per-event generator particles (empty when not stored).
    #[serde(default)]
    pub gen_particles: Vec<Vec<GenParticle>>,
    #[serde(default)]
    pub columns: BTreeMap<String, Vec<f64>>,
    #[serde(default)]
    pub categories: BTreeMap<String, Vec<bool>>,
}

impl EventBatch {
    pub fn new(n_events: usize) -> Self {
        Self {
            n_events,
            ..Self::default()
        }
    }

    pub fn len(&self) -> usize {
        self.n_events
    }

    pub fn is_empty(&self) -> bool {
        self.n_events == 0
    }

    /// Check that every per-event array has `n_events` entries.
    pub fn validate(&self) -> Result<(), String> {
        let n = self.n_events;
        for (name, coll) in &self.jets {
            if coll.len() != n {
                return Err(format!("jet collection '{name}' has {} events, expected {n}", coll.len()));
            }
        }
        if !self.gen_particles.is_empty() && self.gen_particles.len() != n {
            return Err(format!(
                "gen particles have {} events, expected {n}",
                self.gen_particles.len()
            ));
        }
        for (name, col) in &self.columns {
            if col.len() != n {
                return Err(format!("column '{name}' has {} events, expected {n}", col.len()));
            }
        }
        for (name, mask) in &self.categories {
            if mask.len() != n {
                return Err(format!("category mask '{name}' has {} events, expected {n}", mask.len()));
            }
        }
        Ok(())
    }

    pub fn column(&self, name: &str) -> Option<&[f64]> {
        self.columns.get(name).map(Vec::as_slice)
    }

    pub fn collection(&self, name: &str) -> Option<&[Vec<f64>]> {
        self.jets.get(name).map(Vec::as_slice)
    }

    /// Object multiplicity of a collection, as floats for table lookups.
    pub fn multiplicity(&self, name: &str) -> Option<Vec<f64>> {
        self.collection(name)
            .map(|coll| coll.iter().map(|jets| jets.len() as f64).collect())
    }

    /// Scalar sum of pt of a collection (H_T).
    pub fn sum_pt(&self, name: &str) -> Option<Vec<f64>> {
        self.collection(name)
            .map(|coll| coll.iter().map(|jets| jets.iter().sum()).collect())
    }
}

/// One batch of events together with its provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventChunk {
    pub metadata: Metadata,
    #[serde(default)]
    pub shape_variation: ShapeVariation,
    pub events: EventBatch,
}

/// A physics process entering the statistical model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Process {
    pub name: String,
    /// Dataset keys (`sample` or `sample__subsample`) aggregated into this process.
    pub samples: Vec<String>,
    /// Years this process is defined for; empty means every analysis year.
    #[serde(default)]
    pub years: Vec<String>,
    #[serde(default)]
    pub is_signal: bool,
    #[serde(default)]
    pub is_data: bool,
    /// Whether the normalization floats freely in the fit.
    #[serde(default = "default_true")]
    pub has_rate_param: bool,
}

impl Process {
    pub fn signal(name: &str, samples: &[&str], years: &[&str]) -> Self {
        Self::build(name, samples, years, true, false, true)
    }

    pub fn background(name: &str, samples: &[&str], years: &[&str], has_rate_param: bool) -> Self {
        Self::build(name, samples, years, false, false, has_rate_param)
    }

    pub fn data(name: &str, samples: &[&str]) -> Self {
        Self::build(name, samples, &[], false, true, false)
    }

    fn build(
        name: &str,
        samples: &[&str],
        years: &[&str],
        is_signal: bool,
        is_data: bool,
        has_rate_param: bool,
    ) -> Self {
        Self {
            name: name.to_string(),
            samples: samples.iter().map(|s| s.to_string()).collect(),
            years: years.iter().map(|y| y.to_string()).collect(),
            is_signal,
            is_data,
            has_rate_param,
        }
    }

    /// Years this process contributes to, given the analysis years.
    pub fn years_in<'a>(&'a self, analysis_years: &'a [String]) -> impl Iterator<Item = &'a String> + 'a {
        analysis_years
            .iter()
            .filter(move |y| self.years.is_empty() || self.years.contains(y))
    }
}

/// How a nuisance parameter enters the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SystematicKind {
    /// Single multiplicative normalization uncertainty.
    #[serde(rename = "lnN")]
    LogNormal,
    /// Template-shape uncertainty from up/down histograms.
    #[serde(rename = "shape")]
    Shape,
}

impl SystematicKind {
    pub fn label(self) -> &'static str {
        match self {
            SystematicKind::LogNormal => "lnN",
            SystematicKind::Shape => "shape",
        }
    }
}

/// One fully scoped nuisance parameter entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystematicUncertainty {
    /// Physical source; also the prefix of the `Up`/`Down` template names.
    pub name: String,
    /// Name written to the datacard; suffixed when decorrelated.
    pub datacard_name: String,
    pub kind: SystematicKind,
    pub processes: BTreeSet<String>,
    pub years: BTreeSet<String>,
    /// Log-normal value (e.g. `1.025`); `1.0` for shapes.
    pub value: f64,
}

impl SystematicUncertainty {
    pub fn applies_to(&self, process: &str) -> bool {
        self.processes.contains(process)
    }

    /// Every `(process, year)` pair covered by this entry.
    pub fn scope(&self) -> BTreeSet<(String, String)> {
        self.processes
            .iter()
            .flat_map(|p| self.years.iter().map(move |y| (p.clone(), y.clone())))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shape_variation_round_trips_through_strings() {
        assert_eq!(ShapeVariation::from("nominal"), ShapeVariation::Nominal);
        let shifted = ShapeVariation::from("JES_Total_AK4PFchsUp");
        assert!(!shifted.is_nominal());
        assert_eq!(String::from(shifted), "JES_Total_AK4PFchsUp");
    }

    #[test]
    fn weight_value_rejects_length_mismatch() {
        let mut vars = BTreeMap::new();
        vars.insert(
            "ttcc".to_string(),
            VariationPair {
                up: vec![1.0, 1.1],
                down: vec![0.9],
            },
        );
        let err = WeightValue::new("w", vec![1.0, 1.0], vars).unwrap_err();
        assert!(matches!(err, WeightError::InvalidOutput { .. }));
    }

    #[test]
    fn weight_value_rejects_non_finite() {
        assert!(WeightValue::nominal_only("w", vec![1.0, f64::NAN]).is_err());
    }

    #[test]
    fn dataset_key_joins_subsample() {
        let mut meta = Metadata::new("TTToSemiLeptonic", "2018", 10);
        assert_eq!(meta.dataset_key(), "TTToSemiLeptonic");
        meta.subsample = Some("TTToSemiLeptonic_tt+LF".to_string());
        assert_eq!(meta.dataset_key(), "TTToSemiLeptonic__TTToSemiLeptonic_tt+LF");
    }

    #[test]
    fn batch_helpers_compute_features() {
        let mut batch = EventBatch::new(2);
        batch
            .jets
            .insert("JetGood".to_string(), vec![vec![50.0, 40.0, 30.0], vec![100.0]]);
        assert_eq!(batch.multiplicity("JetGood").unwrap(), vec![3.0, 1.0]);
        assert_eq!(batch.sum_pt("JetGood").unwrap(), vec![120.0, 100.0]);
        assert!(batch.validate().is_ok());

        batch.columns.insert("genWeight".to_string(), vec![1.0]);
        assert!(batch.validate().is_err());
    }

    #[test]
    fn systematic_kind_serializes_with_datacard_labels() {
        let json = serde_json::to_string(&SystematicKind::LogNormal).unwrap();
        assert_eq!(json, "\"lnN\"");
        assert_eq!(SystematicKind::Shape.label(), "shape");
    }
}
