//! Binned correction tables.
//!
//! A table maps a feature vector (one value per declared input) to a scalar
//! scale factor. Content is stored per variation tag (`nominal`,
//! `<source>Up`, `<source>Down`), each as a row-major array over the bins.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::WeightError;

/// Read-only keyed interpolant evaluated by weight sources.
pub trait CorrectionTable: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &str;

    /// Names of the inputs, in evaluation order.
    fn inputs(&self) -> &[String];

    /// Variation tags with stored content.
    fn tags(&self) -> Vec<&str>;

    /// Evaluate the table for every event.
    ///
    /// `features[i]` holds input `i` for all events; all feature arrays must
    /// have the same length.
    fn evaluate(&self, tag: &str, features: &[&[f64]]) -> Result<Vec<f64>, WeightError>;
}

/// N-dimensional binned lookup. Values outside the edges are clamped to the
/// first/last bin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinnedCorrection {
    pub name: String,
    pub inputs: Vec<String>,
    /// Bin edges per input (strictly increasing, at least two per input).
    pub edges: Vec<Vec<f64>>,
    /// Variation tag -> row-major content over the bins.
    pub content: BTreeMap<String, Vec<f64>>,
}

/// A file holding several corrections (one file per year).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrectionSet {
    pub corrections: Vec<BinnedCorrection>,
}

impl BinnedCorrection {
    /// Check the table is internally consistent.
    pub fn validate(&self) -> Result<(), WeightError> {
        let mismatch = |detail: String| WeightError::FeatureMismatch {
            name: self.name.clone(),
            detail,
        };

        if self.inputs.len() != self.edges.len() {
            return Err(mismatch(format!(
                "{} inputs but {} edge arrays",
                self.inputs.len(),
                self.edges.len()
            )));
        }
        for (input, edges) in self.inputs.iter().zip(&self.edges) {
            if edges.len() < 2 {
                return Err(mismatch(format!("input '{input}' needs at least two edges")));
            }
            if edges.windows(2).any(|w| !(w[0] < w[1])) {
                return Err(mismatch(format!("edges of '{input}' are not strictly increasing")));
            }
        }
        if !self.content.contains_key("nominal") {
            return Err(mismatch("no 'nominal' content".to_string()));
        }
        let n_bins = self.n_bins();
        for (tag, values) in &self.content {
            if values.len() != n_bins {
                return Err(mismatch(format!(
                    "content '{tag}' has {} values, expected {n_bins}",
                    values.len()
                )));
            }
            if values.iter().any(|v| !v.is_finite()) {
                return Err(mismatch(format!("content '{tag}' has non-finite values")));
            }
            if values.iter().any(|v| *v < 0.0) {
                return Err(mismatch(format!("content '{tag}' has negative values")));
            }
        }
        Ok(())
    }

    fn n_bins(&self) -> usize {
        self.edges.iter().map(|e| e.len() - 1).product()
    }

    fn flat_index(&self, event: usize, features: &[&[f64]]) -> Result<usize, WeightError> {
        let mut index = 0usize;
        for (dim, edges) in self.edges.iter().enumerate() {
            let x = features[dim][event];
            if x.is_nan() {
                return Err(WeightError::FeatureMismatch {
                    name: self.name.clone(),
                    detail: format!("NaN input '{}' at event {event}", self.inputs[dim]),
                });
            }
            index = index * (edges.len() - 1) + find_bin(edges, x);
        }
        Ok(index)
    }
}

/// Bin index for `x`, clamping under/overflow into the edge bins.
fn find_bin(edges: &[f64], x: f64) -> usize {
    let n_bins = edges.len() - 1;
    if x < edges[0] {
        return 0;
    }
    let upper = edges.partition_point(|e| *e <= x);
    upper.saturating_sub(1).min(n_bins - 1)
}

impl CorrectionTable for BinnedCorrection {
    fn name(&self) -> &str {
        &self.name
    }

    fn inputs(&self) -> &[String] {
        &self.inputs
    }

    fn tags(&self) -> Vec<&str> {
        self.content.keys().map(String::as_str).collect()
    }

    fn evaluate(&self, tag: &str, features: &[&[f64]]) -> Result<Vec<f64>, WeightError> {
        let values = self.content.get(tag).ok_or_else(|| WeightError::UnknownVariation {
            name: self.name.clone(),
            tag: tag.to_string(),
        })?;
        if features.len() != self.inputs.len() {
            return Err(WeightError::FeatureMismatch {
                name: self.name.clone(),
                detail: format!("expected {} inputs, got {}", self.inputs.len(), features.len()),
            });
        }
        let n = features.first().map_or(0, |f| f.len());
        if features.iter().any(|f| f.len() != n) {
            return Err(WeightError::FeatureMismatch {
                name: self.name.clone(),
                detail: "feature arrays have different lengths".to_string(),
            });
        }

        (0..n)
            .map(|event| self.flat_index(event, features).map(|idx| values[idx]))
            .collect()
    }
}
