//! Shared pipeline logic used by the CLI handlers and integration tests.
//!
//! Keeping this in one place avoids duplicating the core workflow:
//! events -> weights -> templates, and templates -> systematics -> datacards.

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::corrections::CorrectionStore;
use crate::data::synthetic;
use crate::datacard::{Datacard, build_datacards, combine_datacards, create_scripts};
use crate::domain::{AnalysisConfig, EventChunk, SystematicUncertainty};
use crate::error::AppError;
use crate::histo::{FillContext, TemplateSet, fill_all};
use crate::io::{TemplateFile, load_events};
use crate::systematics::expand;
use crate::weights::WeightRegistry;

/// Environment variable naming the default correction catalog directory.
pub const CORRECTIONS_ENV: &str = "HEPCARD_CORRECTIONS";

/// Where `fill` gets its events from.
#[derive(Debug, Clone)]
pub enum EventSource {
    File(PathBuf),
    Synthetic { events_per_chunk: usize, seed: u64 },
}

/// All computed outputs of a single fill run.
#[derive(Debug, Clone)]
pub struct FillOutput {
    pub chunks: usize,
    pub events: usize,
    pub templates: TemplateSet,
}

/// Resolve the correction store: explicit directory, then `HEPCARD_CORRECTIONS`,
/// then the synthetic tables when events are synthetic.
fn correction_store(
    config: &AnalysisConfig,
    source: &EventSource,
    corrections: Option<&Path>,
) -> Result<CorrectionStore, AppError> {
    let dir = corrections
        .map(Path::to_path_buf)
        .or_else(|| std::env::var_os(CORRECTIONS_ENV).map(PathBuf::from));
    match (dir, source) {
        (Some(dir), _) => Ok(CorrectionStore::from_dir(&dir)
            .map_err(|e| AppError::new(2, format!("Failed to read corrections '{}': {e}", dir.display())))?),
        (None, EventSource::Synthetic { .. }) => {
            Ok(synthetic::correction_store(&config.weight_parameters, &config.years)?)
        }
        (None, EventSource::File(_)) => {
            warn!("no correction catalog configured; table-backed weights will fail");
            Ok(CorrectionStore::default())
        }
    }
}

/// Compute weights and fill templates for every chunk of `source`.
pub fn run_fill(
    config: &AnalysisConfig,
    source: &EventSource,
    corrections: Option<&Path>,
) -> Result<FillOutput, AppError> {
    let chunks: Vec<EventChunk> = match source {
        EventSource::File(path) => load_events(path)?,
        EventSource::Synthetic { events_per_chunk, seed } => {
            synthetic::generate_dataset(config, *events_per_chunk, *seed)?
        }
    };
    let store = correction_store(config, source, corrections)?;
    let registry = WeightRegistry::standard().with_columns(&config.weights.columns);

    let ctx = FillContext {
        config,
        registry: &registry,
        store: &store,
    };
    let templates = fill_all(&chunks, &ctx)?;

    Ok(FillOutput {
        chunks: chunks.len(),
        events: chunks.iter().map(|c| c.events.len()).sum(),
        templates,
    })
}

/// File names of one combination.
#[derive(Debug, Clone, PartialEq)]
pub struct CombinationNames {
    pub script: String,
    pub card: String,
    pub workspace: String,
}

impl CombinationNames {
    pub fn new(label: &str, masked: bool) -> Self {
        let suffix = if masked { "_mask" } else { "" };
        Self {
            script: format!("combine_datacards_{label}{suffix}.sh"),
            card: format!("datacard_combined_{label}{suffix}.txt"),
            workspace: format!("workspace_{label}{suffix}.root"),
        }
    }
}

/// All outputs of a datacards run.
#[derive(Debug, Clone)]
pub struct DatacardOutput {
    pub systematics: Vec<SystematicUncertainty>,
    pub cards: Vec<Datacard>,
    pub written: Vec<PathBuf>,
}

/// Expand systematics, build one card per category and write the combination.
pub fn run_datacards(
    config: &AnalysisConfig,
    templates: &TemplateFile,
    output: &Path,
    channel_masks: bool,
) -> Result<DatacardOutput, AppError> {
    if templates.label != config.label {
        warn!(
            templates = %templates.label,
            config = %config.label,
            "template label differs from analysis label"
        );
    }

    let systematics = expand(&config.systematics, &config.processes, &config.years)?;
    info!(entries = systematics.len(), "systematics expanded");

    let cards = build_datacards(&templates.templates, config, &systematics)?;
    let mut written = Vec::new();
    for card in &cards {
        written.push(card.dump(output)?);
    }

    let names = CombinationNames::new(&config.label, false);
    written.push(combine_datacards(
        &cards,
        output,
        &names.script,
        &names.card,
        &names.workspace,
        false,
    )?);
    written.extend(create_scripts(&cards, output, &names.workspace, "", &[])?);

    if channel_masks {
        let masked = CombinationNames::new(&config.label, true);
        written.push(combine_datacards(
            &cards,
            output,
            &masked.script,
            &masked.card,
            &masked.workspace,
            true,
        )?);
        written.extend(create_scripts(
            &cards,
            output,
            &masked.workspace,
            "_mask",
            &config.masked_categories,
        )?);
    }

    info!(output = %output.display(), files = written.len(), "datacards written");
    Ok(DatacardOutput {
        systematics,
        cards,
        written,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combination_names() {
        let plain = CombinationNames::new("2018", false);
        assert_eq!(plain.card, "datacard_combined_2018.txt");
        assert_eq!(plain.script, "combine_datacards_2018.sh");
        let masked = CombinationNames::new("2018", true);
        assert_eq!(masked.workspace, "workspace_2018_mask.root");
    }

    #[test]
    fn explicit_catalog_dir_is_used_and_missing_dir_is_an_error() {
        let config = AnalysisConfig::tthbb_dctr_2018();
        let source = EventSource::File(PathBuf::from("events.json"));
        let dir = tempfile::tempdir().unwrap();
        let store = correction_store(&config, &source, Some(dir.path())).unwrap();
        assert_eq!(store.cached_len(), 0);
        let err = correction_store(&config, &source, Some(&dir.path().join("missing"))).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn file_source_without_catalog_uses_empty_store() {
        // The catalog variable takes precedence when the environment sets it.
        if std::env::var_os(CORRECTIONS_ENV).is_some() {
            return;
        }
        let config = AnalysisConfig::tthbb_dctr_2018();
        let source = EventSource::File(PathBuf::from("events.json"));
        let store = correction_store(&config, &source, None).unwrap();
        assert_eq!(store.cached_len(), 0);
    }

    #[test]
    fn synthetic_source_without_catalog_uses_generated_tables() {
        if std::env::var_os(CORRECTIONS_ENV).is_some() {
            return;
        }
        let config = AnalysisConfig::tthbb_dctr_2018();
        let source = EventSource::Synthetic {
            events_per_chunk: 10,
            seed: 1,
        };
        let store = correction_store(&config, &source, None).unwrap();
        assert!(store.cached_len() > 0);
    }
}
