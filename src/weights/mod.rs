//! Per-event weight computation.
//!
//! Every weight source implements [`WeightComputation`]. The shapes are:
//!
//! - [`WeightLambda`]: a pure function of the batch and metadata, identical for
//!   every sample/year
//! - contextual sources: structs built once per `(sample, year)` from a
//!   [`WeightContext`], holding the resolved correction tables and the
//!   year-scoped variation list
//! - column sources: scale factors computed upstream and stored in the batch
//!
//! The [`WeightRegistry`] maps configuration names to sources, and the
//! [`WeightsManager`] combines the configured sources into total event weights.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::corrections::CorrectionStore;
use crate::domain::{EventBatch, Metadata, ShapeVariation, WeightValue};
use crate::error::WeightError;

pub mod common;
pub mod manager;
pub mod top_pt;
pub mod ttlf;

pub use manager::*;

/// Shared calling contract of all weight sources.
pub trait WeightComputation: Send + Sync {
    fn name(&self) -> &str;

    /// Variation names this source provides in the nominal pass.
    fn variations(&self) -> Vec<String> {
        Vec::new()
    }

    fn compute(
        &self,
        events: &EventBatch,
        metadata: &Metadata,
        shape_variation: &ShapeVariation,
    ) -> Result<WeightValue, WeightError>;
}

type WeightFn =
    dyn Fn(&EventBatch, &Metadata, &ShapeVariation) -> Result<Vec<f64>, WeightError> + Send + Sync;

/// A weight source defined by a closure, with no state of its own.
#[derive(Clone)]
pub struct WeightLambda {
    name: String,
    func: Arc<WeightFn>,
}

impl WeightLambda {
    pub fn wrap_func<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&EventBatch, &Metadata, &ShapeVariation) -> Result<Vec<f64>, WeightError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            name: name.into(),
            func: Arc::new(func),
        }
    }
}

impl fmt::Debug for WeightLambda {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeightLambda").field("name", &self.name).finish()
    }
}

impl WeightComputation for WeightLambda {
    fn name(&self) -> &str {
        &self.name
    }

    fn compute(
        &self,
        events: &EventBatch,
        metadata: &Metadata,
        shape_variation: &ShapeVariation,
    ) -> Result<WeightValue, WeightError> {
        let nominal = (self.func)(events, metadata, shape_variation)?;
        if nominal.len() != events.len() {
            return Err(WeightError::InvalidOutput {
                name: self.name.clone(),
                detail: format!("{} values for {} events", nominal.len(), events.len()),
            });
        }
        WeightValue::nominal_only(self.name.clone(), nominal)
    }
}

/// Static parameters consulted when contextual sources are built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightParameters {
    /// Jet collection feeding multiplicity and H_T features.
    #[serde(default = "default_jet_collection")]
    pub jet_collection: String,
    /// Year -> correction name of the tt+LF calibration.
    #[serde(default)]
    pub ttlf_calibration: BTreeMap<String, String>,
    /// Year -> decorrelated variation names of the tt+LF calibration.
    #[serde(default)]
    pub ttlf_variations: BTreeMap<String, Vec<String>>,
    /// Samples the tt+LF calibration applies to.
    #[serde(default = "default_ttlf_samples")]
    pub ttlf_samples: Vec<String>,
    /// Year -> correction name of the pileup reweighting.
    #[serde(default)]
    pub pileup: BTreeMap<String, String>,
}

fn default_jet_collection() -> String {
    "JetGood".to_string()
}

fn default_ttlf_samples() -> Vec<String> {
    vec!["TTToSemiLeptonic".to_string()]
}

impl Default for WeightParameters {
    fn default() -> Self {
        Self {
            jet_collection: default_jet_collection(),
            ttlf_calibration: BTreeMap::new(),
            ttlf_variations: BTreeMap::new(),
            ttlf_samples: default_ttlf_samples(),
            pileup: BTreeMap::new(),
        }
    }
}

/// Everything a contextual source may read at construction time.
#[derive(Clone, Copy)]
pub struct WeightContext<'a> {
    pub params: &'a WeightParameters,
    pub metadata: &'a Metadata,
    pub store: &'a CorrectionStore,
}

pub type ContextualBuilder = fn(&WeightContext<'_>) -> Result<Arc<dyn WeightComputation>, WeightError>;

/// A named entry of the registry.
#[derive(Clone)]
pub enum WeightDefinition {
    Function(WeightLambda),
    /// Precomputed scale factor read from batch columns.
    Column(String),
    Contextual {
        name: &'static str,
        build: ContextualBuilder,
    },
}

impl WeightDefinition {
    pub fn name(&self) -> &str {
        match self {
            WeightDefinition::Function(lambda) => lambda.name(),
            WeightDefinition::Column(name) => name.as_str(),
            WeightDefinition::Contextual { name, .. } => *name,
        }
    }

    pub fn instantiate(&self, ctx: &WeightContext<'_>) -> Result<Arc<dyn WeightComputation>, WeightError> {
        match self {
            WeightDefinition::Function(lambda) => Ok(Arc::new(lambda.clone())),
            WeightDefinition::Column(name) => Ok(Arc::new(common::ColumnWeight::new(name.clone()))),
            WeightDefinition::Contextual { build, .. } => build(ctx),
        }
    }
}

/// Name -> weight definition.
#[derive(Clone, Default)]
pub struct WeightRegistry {
    definitions: BTreeMap<String, WeightDefinition>,
}

impl WeightRegistry {
    /// Registry with every built-in source.
    pub fn standard() -> Self {
        let mut registry = Self::default();
        registry.register(WeightDefinition::Function(common::gen_weight()));
        registry.register(WeightDefinition::Function(common::lumi_xs()));
        registry.register(WeightDefinition::Function(top_pt::sf_top_pt()));
        registry.register(WeightDefinition::Contextual {
            name: common::PILEUP,
            build: common::build_pileup,
        });
        registry.register(WeightDefinition::Contextual {
            name: ttlf::SF_TTLF_CALIB,
            build: ttlf::build_ttlf_calib,
        });
        registry.register(WeightDefinition::Contextual {
            name: ttlf::SF_TTLF_CALIB_WITH_TTCC_VARIATIONS,
            build: ttlf::build_ttlf_calib_with_ttcc_variations,
        });
        registry
    }

    /// Add column-backed weights; built-in names are not shadowed.
    pub fn with_columns(mut self, names: &[String]) -> Self {
        for name in names {
            if !self.definitions.contains_key(name) {
                self.register(WeightDefinition::Column(name.clone()));
            }
        }
        self
    }

    pub fn register(&mut self, definition: WeightDefinition) {
        self.definitions.insert(definition.name().to_string(), definition);
    }

    pub fn get(&self, name: &str) -> Result<&WeightDefinition, WeightError> {
        self.definitions
            .get(name)
            .ok_or_else(|| WeightError::UnknownWeight(name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.definitions.keys().map(String::as_str)
    }
}
