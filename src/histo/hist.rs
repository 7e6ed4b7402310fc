use serde::{Deserialize, Serialize};

use crate::error::BinningError;

/// One-dimensional weighted histogram with explicit edges.
///
/// Under- and overflow are folded into the first and last bins so templates
/// keep every selected event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Histogram {
    pub edges: Vec<f64>,
    pub sumw: Vec<f64>,
    pub sumw2: Vec<f64>,
}

impl Histogram {
    pub fn new(edges: Vec<f64>) -> Result<Self, BinningError> {
        if edges.len() < 2 {
            return Err(BinningError(format!("need at least two edges, got {}", edges.len())));
        }
        if edges.windows(2).any(|w| !(w[0] < w[1])) {
            return Err(BinningError("edges must be strictly increasing".to_string()));
        }
        let n_bins = edges.len() - 1;
        Ok(Self {
            edges,
            sumw: vec![0.0; n_bins],
            sumw2: vec![0.0; n_bins],
        })
    }

    pub fn n_bins(&self) -> usize {
        self.sumw.len()
    }

    fn bin_index(&self, x: f64) -> usize {
        let upper = self.edges.partition_point(|e| *e <= x);
        upper.saturating_sub(1).min(self.n_bins() - 1)
    }

    /// Fill `values` with `weights`, keeping only events where `mask` is set.
    /// NaN values are skipped.
    pub fn fill(&mut self, values: &[f64], weights: &[f64], mask: Option<&[bool]>) {
        for (idx, (x, w)) in values.iter().zip(weights).enumerate() {
            if x.is_nan() || mask.is_some_and(|m| !m[idx]) {
                continue;
            }
            let bin = self.bin_index(*x);
            self.sumw[bin] += w;
            self.sumw2[bin] += w * w;
        }
    }

    pub fn add(&mut self, other: &Histogram) -> Result<(), BinningError> {
        if self.edges != other.edges {
            return Err(BinningError(format!(
                "{} bins [{:?}..] vs {} bins [{:?}..]",
                self.n_bins(),
                self.edges.first(),
                other.n_bins(),
                other.edges.first()
            )));
        }
        for (a, b) in self.sumw.iter_mut().zip(&other.sumw) {
            *a += b;
        }
        for (a, b) in self.sumw2.iter_mut().zip(&other.sumw2) {
            *a += b;
        }
        Ok(())
    }

    pub fn integral(&self) -> f64 {
        self.sumw.iter().sum()
    }
}
