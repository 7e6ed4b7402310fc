//! Parallel filling of templates from event chunks.
//!
//! Chunks are independent: each one is weighted and histogrammed on its own
//! worker into a partial [`TemplateSet`], and the partials are merged with an
//! associative reduction. The only shared state is the read-only correction
//! store and configuration.

use rayon::prelude::*;
use tracing::{debug, info};

use crate::corrections::CorrectionStore;
use crate::domain::{AnalysisConfig, EventChunk};
use crate::error::FillError;
use crate::histo::{Histogram, NOMINAL, TemplateKey, TemplateSet};
use crate::weights::{WeightRegistry, WeightsManager};

/// Read-only inputs shared by every worker.
#[derive(Clone, Copy)]
pub struct FillContext<'a> {
    pub config: &'a AnalysisConfig,
    pub registry: &'a WeightRegistry,
    pub store: &'a CorrectionStore,
}

/// Fill every chunk in parallel and merge the partial template sets.
pub fn fill_all(chunks: &[EventChunk], ctx: &FillContext<'_>) -> Result<TemplateSet, FillError> {
    let templates = chunks
        .par_iter()
        .map(|chunk| fill_chunk(chunk, ctx))
        .try_reduce(TemplateSet::default, |mut acc, part| {
            acc.merge(part)?;
            Ok(acc)
        })?;
    info!(chunks = chunks.len(), templates = templates.len(), "templates filled");
    Ok(templates)
}

/// Weight one chunk and fill its templates for every category.
///
/// In the nominal pass this fills `nominal` plus `<label>Up`/`<label>Down` for
/// every weight variation; a shifted pass fills only its nominal weights under
/// the pass name.
pub fn fill_chunk(chunk: &EventChunk, ctx: &FillContext<'_>) -> Result<TemplateSet, FillError> {
    let EventChunk {
        metadata,
        shape_variation,
        events,
    } = chunk;
    let sample = metadata.dataset_key();
    events.validate().map_err(|detail| FillError::InvalidBatch {
        sample: sample.clone(),
        detail,
    })?;
    if events.len() != metadata.size {
        return Err(FillError::InvalidBatch {
            sample,
            detail: format!("metadata size {} but {} events", metadata.size, events.len()),
        });
    }

    let manager = WeightsManager::new(
        &ctx.config.weights,
        ctx.registry,
        &ctx.config.weight_parameters,
        metadata,
        ctx.store,
    )?;
    let weights = manager.compute(events, metadata, shape_variation)?;

    let mut fills: Vec<(String, &[f64])> = Vec::new();
    if shape_variation.is_nominal() {
        fills.push((NOMINAL.to_string(), weights.nominal.as_slice()));
        for (label, pair) in &weights.variations {
            fills.push((format!("{label}Up"), pair.up.as_slice()));
            fills.push((format!("{label}Down"), pair.down.as_slice()));
        }
    } else {
        fills.push((shape_variation.to_string(), weights.nominal.as_slice()));
    }

    let mut out = TemplateSet::default();
    for (category, variable) in &ctx.config.categories {
        let mask = events
            .categories
            .get(category)
            .ok_or_else(|| FillError::MissingCategory {
                sample: sample.clone(),
                name: category.clone(),
            })?;
        let values = events.column(variable).ok_or_else(|| FillError::MissingColumn {
            sample: sample.clone(),
            name: variable.clone(),
        })?;
        let edges = ctx
            .config
            .variables
            .get(variable)
            .ok_or_else(|| FillError::UnknownVariable(variable.clone()))?;

        for (variation, w) in &fills {
            let mut hist = Histogram::new(edges.clone())?;
            hist.fill(values, w, Some(mask.as_slice()));
            out.accumulate(TemplateKey::new(&sample, &metadata.year, category, variation), hist)?;
        }
    }

    debug!(
        sample = %sample,
        year = %metadata.year,
        pass = %shape_variation,
        templates = out.len(),
        "chunk filled"
    );
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use crate::domain::{EventBatch, Metadata, Process, ShapeVariation};
    use crate::systematics::SystematicsDeclaration;
    use crate::weights::WeightsConfig;
    use approx::assert_relative_eq;

    fn config() -> AnalysisConfig {
        let mut categories = BTreeMap::new();
        categories.insert("SR".to_string(), "score".to_string());
        let mut variables = BTreeMap::new();
        variables.insert("score".to_string(), vec![0.0, 0.5, 1.0]);
        AnalysisConfig {
            label: "test".to_string(),
            years: vec!["2018".to_string()],
            luminosity: BTreeMap::new(),
            processes: vec![Process::background("ttv", &["TTV"], &[], false)],
            data_prefix: "DATA".to_string(),
            data_samples: Vec::new(),
            systematics: SystematicsDeclaration::default(),
            categories,
            masked_categories: Vec::new(),
            variables,
            shape_passes: Vec::new(),
            weights: WeightsConfig {
                common: vec!["genWeight".to_string(), "sf_mu_id".to_string()],
                variations: vec!["sf_mu_id".to_string()],
                columns: vec!["sf_mu_id".to_string()],
                ..WeightsConfig::default()
            },
            weight_parameters: Default::default(),
        }
    }

    fn chunk(pass: &str) -> EventChunk {
        let mut events = EventBatch::new(3);
        events.columns.insert("genWeight".to_string(), vec![1.0, 2.0, 1.0]);
        events.columns.insert("sf_mu_id".to_string(), vec![1.0, 1.0, 1.0]);
        events.columns.insert("sf_mu_idUp".to_string(), vec![1.1, 1.1, 1.1]);
        events.columns.insert("sf_mu_idDown".to_string(), vec![0.9, 0.9, 0.9]);
        events.columns.insert("score".to_string(), vec![0.1, 0.7, 0.9]);
        events.categories.insert("SR".to_string(), vec![true, true, false]);
        EventChunk {
            metadata: Metadata::new("TTV", "2018", 3),
            shape_variation: ShapeVariation::from(pass),
            events,
        }
    }

    #[test]
    fn nominal_pass_fills_weight_variations() {
        let config = config();
        let registry = WeightRegistry::standard().with_columns(&config.weights.columns);
        let store = CorrectionStore::default();
        let ctx = FillContext {
            config: &config,
            registry: &registry,
            store: &store,
        };
        let out = fill_chunk(&chunk("nominal"), &ctx).unwrap();
        assert_eq!(out.len(), 3);
        assert_eq!(out.get("TTV", "2018", "SR", NOMINAL).unwrap().sumw, vec![1.0, 2.0]);
        let up = out.get("TTV", "2018", "SR", "sf_mu_idUp").unwrap();
        assert_relative_eq!(up.sumw[1], 2.2, epsilon = 1e-12);
    }

    #[test]
    fn shifted_pass_fills_under_pass_name() {
        let config = config();
        let registry = WeightRegistry::standard().with_columns(&config.weights.columns);
        let store = CorrectionStore::default();
        let ctx = FillContext {
            config: &config,
            registry: &registry,
            store: &store,
        };
        let out = fill_chunk(&chunk("JES_Total_AK4PFchsUp"), &ctx).unwrap();
        assert_eq!(out.len(), 1);
        assert!(out.get("TTV", "2018", "SR", "JES_Total_AK4PFchsUp").is_some());
    }

    #[test]
    fn parallel_fill_matches_sequential_sum() {
        let config = config();
        let registry = WeightRegistry::standard().with_columns(&config.weights.columns);
        let store = CorrectionStore::default();
        let ctx = FillContext {
            config: &config,
            registry: &registry,
            store: &store,
        };
        let chunks: Vec<EventChunk> = (0..8).map(|_| chunk("nominal")).collect();
        let out = fill_all(&chunks, &ctx).unwrap();
        let nominal = out.get("TTV", "2018", "SR", NOMINAL).unwrap();
        assert_relative_eq!(nominal.integral(), 24.0);
    }

    #[test]
    fn missing_category_mask_is_an_input_error() {
        let config = config();
        let registry = WeightRegistry::standard().with_columns(&config.weights.columns);
        let store = CorrectionStore::default();
        let ctx = FillContext {
            config: &config,
            registry: &registry,
            store: &store,
        };
        let mut c = chunk("nominal");
        c.events.categories.clear();
        assert!(matches!(
            fill_chunk(&c, &ctx).unwrap_err(),
            FillError::MissingCategory { .. }
        ));
    }
}
