//! Systematic uncertainty declarations and their expansion.
//!
//! A short, hand-written [`SystematicsDeclaration`] names sources by physical
//! category. [`expand`] turns it into the fully scoped list of
//! [`SystematicUncertainty`](crate::domain::SystematicUncertainty) entries the
//! datacards consume, and rejects structurally ambiguous results.

use serde::{Deserialize, Serialize};

use crate::domain::SystematicKind;

pub mod expand;
pub mod validate;

pub use expand::*;
pub use validate::*;

/// A source correlated across its whole scope (e.g. luminosity).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelatedSource {
    pub name: String,
    pub kind: SystematicKind,
    #[serde(default = "unit_value")]
    pub value: f64,
    /// Empty means every process.
    #[serde(default)]
    pub processes: Vec<String>,
    /// Empty means every year.
    #[serde(default)]
    pub years: Vec<String>,
}

/// Shape sources decorrelated per process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecorrelatedSources {
    pub names: Vec<String>,
    /// Processes that do not receive this source at all.
    #[serde(default)]
    pub exclude: Vec<String>,
    /// Also decorrelate across years.
    #[serde(default)]
    pub per_year: bool,
}

/// Processes sharing one nuisance for every decorrelated source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PooledGroup {
    pub name: String,
    pub members: Vec<String>,
}

/// An extra log-normal entry declared by hand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManualOverride {
    pub name: String,
    pub processes: Vec<String>,
    #[serde(default)]
    pub years: Vec<String>,
    pub value: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystematicsDeclaration {
    #[serde(default)]
    pub correlated: Vec<CorrelatedSource>,
    /// Shape sources decorrelated across years only: `<source>_<year>`.
    #[serde(default)]
    pub per_year_shapes: Vec<String>,
    #[serde(default)]
    pub decorrelated: Vec<DecorrelatedSources>,
    #[serde(default)]
    pub pooled_group: Option<PooledGroup>,
    #[serde(default)]
    pub overrides: Vec<ManualOverride>,
}

fn unit_value() -> f64 {
    1.0
}
