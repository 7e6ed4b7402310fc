//! Synthetic event generation.
//!
//! Produces event batches shaped like the upstream ntuples (a jet collection,
//! generator tops, weight columns, analysis variables and category masks) so
//! the weight engine and the full fill -> datacards chain can run without real
//! inputs. Every batch is a pure function of its seed; shifted shape passes
//! reuse the nominal events and rescale them.

use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

use rand::prelude::*;
use rand::rngs::StdRng;
use rand_distr::Normal;
use tracing::debug;

use crate::corrections::{BinnedCorrection, CorrectionStore};
use crate::domain::{AnalysisConfig, EventBatch, EventChunk, GenParticle, Metadata, ShapeVariation};
use crate::error::{AppError, WeightError};
use crate::weights::top_pt::TOP_SAMPLES;
use crate::weights::WeightParameters;

/// Relative jet energy shift applied in `Up`/`Down` shape passes.
const SHAPE_PASS_SHIFT: f64 = 0.03;

/// Cross sections (pb) of the known samples; anything else gets 1 pb.
const XSECTIONS: [(&str, f64); 10] = [
    ("ttHTobb", 0.2953),
    ("TTToSemiLeptonic", 365.46),
    ("TTbbSemiLeptonic", 4.28),
    ("TTTo2L2Nu", 88.29),
    ("SingleTop", 136.02),
    ("WJetsToLNu_HT", 1345.0),
    ("DYJetsToLL", 169.9),
    ("TTV", 0.8),
    ("VV", 118.7),
    ("ttHTobb_ttToSemiLep", 0.1262),
];

/// What a synthetic batch contains beyond the fixed jet/gen content.
#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticLayout {
    pub jet_collection: String,
    /// Mutually exclusive category masks.
    pub categories: Vec<String>,
    /// Variable -> sampling range `[lo, hi)`.
    pub variables: BTreeMap<String, (f64, f64)>,
    /// Weights stored as `<name>`, `<name>Up`, `<name>Down` columns.
    pub column_weights: Vec<String>,
}

impl Default for SyntheticLayout {
    fn default() -> Self {
        Self {
            jet_collection: "JetGood".to_string(),
            categories: Vec::new(),
            variables: BTreeMap::new(),
            column_weights: Vec::new(),
        }
    }
}

impl SyntheticLayout {
    pub fn from_config(config: &AnalysisConfig) -> Self {
        let variables = config
            .variables
            .iter()
            .filter_map(|(name, edges)| match (edges.first(), edges.last()) {
                (Some(lo), Some(hi)) if lo < hi => Some((name.clone(), (*lo, *hi))),
                _ => None,
            })
            .collect();
        Self {
            jet_collection: config.weight_parameters.jet_collection.clone(),
            categories: config.categories.keys().cloned().collect(),
            variables,
            column_weights: config.weights.columns.clone(),
        }
    }
}

/// Nominal batch with the default layout.
pub fn generate_batch(seed: u64, metadata: &Metadata) -> Result<EventBatch, AppError> {
    generate_with_layout(seed, metadata, &ShapeVariation::Nominal, &SyntheticLayout::default())
}

pub fn generate_with_layout(
    seed: u64,
    metadata: &Metadata,
    shape_variation: &ShapeVariation,
    layout: &SyntheticLayout,
) -> Result<EventBatch, AppError> {
    let mut rng = StdRng::seed_from_u64(seed);
    let top_pt = Normal::new(120.0, 60.0)
        .map_err(|e| AppError::new(4, format!("Top pt distribution error: {e}")))?;
    let sf_noise = Normal::new(1.0, 0.02)
        .map_err(|e| AppError::new(4, format!("Scale factor distribution error: {e}")))?;

    let n = metadata.size;
    let mut events = EventBatch::new(n);

    let jets: Vec<Vec<f64>> = (0..n)
        .map(|_| {
            let n_jets = rng.gen_range(4..=8);
            let mut pts: Vec<f64> = (0..n_jets).map(|_| rng.gen_range(30.0..250.0)).collect();
            pts.sort_by(|a, b| b.total_cmp(a));
            pts
        })
        .collect();
    events.jets.insert(layout.jet_collection.clone(), jets);

    if metadata.is_mc {
        if TOP_SAMPLES.contains(&metadata.sample.as_str()) {
            events.gen_particles = (0..n)
                .map(|_| {
                    let pt_t = f64::abs(top_pt.sample(&mut rng));
                    let pt_tbar = f64::abs(top_pt.sample(&mut rng));
                    vec![
                        GenParticle { pdg_id: 6, pt: pt_t * 1.1, is_last_copy: false, has_parent: true },
                        GenParticle { pdg_id: 6, pt: pt_t, is_last_copy: true, has_parent: true },
                        GenParticle { pdg_id: -6, pt: pt_tbar, is_last_copy: true, has_parent: true },
                        GenParticle { pdg_id: 5, pt: pt_t * 0.6, is_last_copy: true, has_parent: true },
                    ]
                })
                .collect();
        }

        let gen_weight = (0..n).map(|_| rng.gen_range(0.8..1.2)).collect();
        events.columns.insert("genWeight".to_string(), gen_weight);
        let n_true_int = (0..n).map(|_| rng.gen_range(5.0..70.0)).collect();
        events.columns.insert("Pileup_nTrueInt".to_string(), n_true_int);

        for name in &layout.column_weights {
            let mut nominal = Vec::with_capacity(n);
            let mut up = Vec::with_capacity(n);
            let mut down = Vec::with_capacity(n);
            for _ in 0..n {
                let nom = f64::max(sf_noise.sample(&mut rng), 0.0);
                let delta = rng.gen_range(0.01..0.08);
                nominal.push(nom);
                up.push(nom * (1.0 + delta));
                down.push(nom * (1.0 - delta));
            }
            events.columns.insert(name.clone(), nominal);
            events.columns.insert(format!("{name}Up"), up);
            events.columns.insert(format!("{name}Down"), down);
        }
    }

    for (name, (lo, hi)) in &layout.variables {
        let values = (0..n).map(|_| rng.gen_range(*lo..*hi)).collect();
        events.columns.insert(name.clone(), values);
    }

    if !layout.categories.is_empty() {
        let assigned: Vec<usize> = (0..n).map(|_| rng.gen_range(0..layout.categories.len())).collect();
        for (idx, name) in layout.categories.iter().enumerate() {
            events
                .categories
                .insert(name.clone(), assigned.iter().map(|a| *a == idx).collect());
        }
    }

    apply_shape_pass(&mut events, shape_variation, layout);
    Ok(events)
}

/// Rescale jets and variables for an `...Up` / `...Down` pass.
fn apply_shape_pass(events: &mut EventBatch, shape_variation: &ShapeVariation, layout: &SyntheticLayout) {
    let name = shape_variation.as_str();
    let scale = if shape_variation.is_nominal() {
        return;
    } else if name.ends_with("Up") {
        1.0 + SHAPE_PASS_SHIFT
    } else if name.ends_with("Down") {
        1.0 - SHAPE_PASS_SHIFT
    } else {
        return;
    };

    for coll in events.jets.values_mut() {
        for pt in coll.iter_mut().flatten() {
            *pt *= scale;
        }
    }
    for (var, (lo, hi)) in &layout.variables {
        if let Some(values) = events.columns.get_mut(var) {
            for v in values.iter_mut() {
                // Stay inside the axis so the pass only moves events between bins.
                *v = (lo + (*v - lo) * scale).clamp(*lo, hi - 1e-9);
            }
        }
    }
}

/// Every `(sample, year, pass)` chunk the analysis needs, `n_events` each.
pub fn generate_dataset(config: &AnalysisConfig, n_events: usize, seed: u64) -> Result<Vec<EventChunk>, AppError> {
    if n_events == 0 {
        return Err(AppError::new(2, "Synthetic event count must be > 0."));
    }
    let layout = SyntheticLayout::from_config(config);

    let mut passes = vec![ShapeVariation::Nominal];
    for pass in &config.shape_passes {
        passes.push(ShapeVariation::from(format!("{pass}Up")));
        passes.push(ShapeVariation::from(format!("{pass}Down")));
    }

    let mut chunks = Vec::new();
    for process in config.processes.iter().filter(|p| !p.is_data) {
        for year in process.years_in(&config.years) {
            for key in &process.samples {
                let mut metadata = metadata_for_key(key, year, n_events, config);
                let chunk_seed = chunk_seed(seed, key, year);
                for pass in &passes {
                    let events = generate_with_layout(chunk_seed, &metadata, pass, &layout)?;
                    if pass.is_nominal() {
                        metadata.sum_genweights = events.column("genWeight").map(|w| w.iter().sum());
                    }
                    chunks.push(EventChunk {
                        metadata: metadata.clone(),
                        shape_variation: pass.clone(),
                        events,
                    });
                }
            }
        }
    }

    for year in &config.years {
        for sample in &config.data_samples {
            let mut metadata = Metadata::new(sample.clone(), year.clone(), n_events);
            metadata.is_mc = false;
            let events = generate_with_layout(chunk_seed(seed, sample, year), &metadata, &ShapeVariation::Nominal, &layout)?;
            chunks.push(EventChunk {
                metadata,
                shape_variation: ShapeVariation::Nominal,
                events,
            });
        }
    }

    debug!(chunks = chunks.len(), n_events, seed, "synthetic dataset generated");
    Ok(chunks)
}

fn metadata_for_key(key: &str, year: &str, n_events: usize, config: &AnalysisConfig) -> Metadata {
    let (sample, subsample) = match key.split_once("__") {
        Some((sample, sub)) => (sample, Some(sub.to_string())),
        None => (key, None),
    };
    let mut metadata = Metadata::new(sample, year, n_events);
    metadata.subsample = subsample;
    metadata.xsec = Some(
        XSECTIONS
            .iter()
            .find(|(name, _)| *name == sample)
            .map_or(1.0, |(_, xs)| *xs),
    );
    metadata.lumi = config.luminosity.get(year).copied();
    metadata
}

fn chunk_seed(seed: u64, key: &str, year: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    seed.hash(&mut hasher);
    key.hash(&mut hasher);
    year.hash(&mut hasher);
    hasher.finish()
}

/// In-memory pileup and tt+LF calibration tables for every configured year.
pub fn correction_store(params: &WeightParameters, years: &[String]) -> Result<CorrectionStore, WeightError> {
    let mut tables = Vec::new();
    for year in years {
        if let Some(name) = params.pileup.get(year) {
            let edges: Vec<f64> = (0..=8_i32).map(|i| f64::from(i) * 10.0).collect();
            let nominal: Vec<f64> = (0..8_i32).map(|i| 1.15 - 0.04 * f64::from(i)).collect();
            let mut content = BTreeMap::new();
            content.insert("pileupUp".to_string(), nominal.iter().map(|v| v * 1.02).collect());
            content.insert("pileupDown".to_string(), nominal.iter().map(|v| v * 0.98).collect());
            content.insert("nominal".to_string(), nominal);
            tables.push((
                year.clone(),
                BinnedCorrection {
                    name: name.clone(),
                    inputs: vec!["Pileup_nTrueInt".to_string()],
                    edges: vec![edges],
                    content,
                },
            ));
        }

        if let Some(name) = params.ttlf_calibration.get(year) {
            let njets = vec![4.0, 5.0, 6.0, 7.0, 20.0];
            let jets_ht = vec![0.0, 300.0, 500.0, 800.0, 5000.0];
            let nominal: Vec<f64> = (0..16_i32).map(|i| 0.92 + 0.01 * f64::from(i)).collect();
            let mut content = BTreeMap::new();
            for var in params.ttlf_variations.get(year).into_iter().flatten() {
                content.insert(format!("{var}Up"), nominal.iter().map(|v| v * 1.04).collect());
                content.insert(format!("{var}Down"), nominal.iter().map(|v| v * 0.96).collect());
            }
            content.insert("nominal".to_string(), nominal);
            tables.push((
                year.clone(),
                BinnedCorrection {
                    name: name.clone(),
                    inputs: vec!["njets".to_string(), "jetsHt".to_string()],
                    edges: vec![njets, jets_ht],
                    content,
                },
            ));
        }
    }
    CorrectionStore::in_memory(tables)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batches_are_deterministic_and_consistent() {
        let meta = Metadata::new("TTToSemiLeptonic", "2018", 50);
        let a = generate_batch(42, &meta).unwrap();
        let b = generate_batch(42, &meta).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 50);
        assert!(a.validate().is_ok());
        assert_eq!(a.gen_particles.len(), 50);
        assert!(a.multiplicity("JetGood").unwrap().iter().all(|n| *n >= 4.0));
    }

    #[test]
    fn non_top_samples_have_no_gen_tops() {
        let meta = Metadata::new("TTV", "2018", 10);
        let batch = generate_batch(1, &meta).unwrap();
        assert!(batch.gen_particles.is_empty());
    }

    #[test]
    fn shape_pass_scales_jets_of_the_same_events() {
        let meta = Metadata::new("TTV", "2018", 10);
        let layout = SyntheticLayout::default();
        let nominal = generate_with_layout(3, &meta, &ShapeVariation::Nominal, &layout).unwrap();
        let up = generate_with_layout(3, &meta, &ShapeVariation::from("JES_Total_AK4PFchsUp"), &layout).unwrap();
        let ht_nom = nominal.sum_pt("JetGood").unwrap();
        let ht_up = up.sum_pt("JetGood").unwrap();
        for (n, u) in ht_nom.iter().zip(&ht_up) {
            assert!((u / n - 1.03).abs() < 1e-9);
        }
        assert_eq!(nominal.column("genWeight"), up.column("genWeight"));
    }

    #[test]
    fn categories_are_exclusive() {
        let meta = Metadata::new("TTV", "2018", 40);
        let layout = SyntheticLayout {
            categories: vec!["CR".to_string(), "SR".to_string()],
            ..SyntheticLayout::default()
        };
        let batch = generate_with_layout(9, &meta, &ShapeVariation::Nominal, &layout).unwrap();
        let cr = &batch.categories["CR"];
        let sr = &batch.categories["SR"];
        assert!(cr.iter().zip(sr).all(|(a, b)| a ^ b));
    }

    #[test]
    fn dataset_covers_every_sample_and_pass() {
        let config = AnalysisConfig::tthbb_dctr_2018();
        let chunks = generate_dataset(&config, 5, 1).unwrap();
        let mc_samples: usize = config.processes.iter().filter(|p| !p.is_data).map(|p| p.samples.len()).sum();
        let passes = 1 + 2 * config.shape_passes.len();
        assert_eq!(chunks.len(), mc_samples * passes + config.data_samples.len());
        assert!(chunks.iter().all(|c| c.events.validate().is_ok()));
    }

    #[test]
    fn synthetic_tables_cover_configured_years() {
        let config = AnalysisConfig::tthbb_dctr_2018();
        let store = correction_store(&config.weight_parameters, &config.years).unwrap();
        assert_eq!(store.cached_len(), 2);
    }
}
