//! Export summaries to CSV/JSON.
//!
//! The exports are meant to be easy to consume in spreadsheets or downstream scripts.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::datacard::{DATA_OBS, Datacard};
use crate::domain::SystematicUncertainty;
use crate::error::AppError;

/// Write per-category, per-process nominal yields to a CSV file.
///
/// One row per process and one `data_obs` row per category.
pub fn write_yields_csv(path: &Path, cards: &[Datacard]) -> Result<(), AppError> {
    let mut writer = csv::Writer::from_path(path)
        .map_err(|e| AppError::new(2, format!("Failed to create yields CSV '{}': {e}", path.display())))?;
    let write_err = |e: csv::Error| AppError::new(2, format!("Failed to write yields CSV: {e}"));

    writer
        .write_record(["category", "bin", "process", "kind", "yield"])
        .map_err(write_err)?;
    for card in cards {
        for p in &card.processes {
            let kind = if p.is_signal() { "signal" } else { "background" };
            let rate = format!("{:.6}", p.rate);
            writer
                .write_record([
                    card.category.as_str(),
                    card.bin.as_str(),
                    p.name.as_str(),
                    kind,
                    rate.as_str(),
                ])
                .map_err(write_err)?;
        }
        let observed = format!("{:.6}", card.observation);
        writer
            .write_record([
                card.category.as_str(),
                card.bin.as_str(),
                DATA_OBS,
                "data",
                observed.as_str(),
            ])
            .map_err(write_err)?;
    }
    writer
        .flush()
        .map_err(|e| AppError::new(2, format!("Failed to flush yields CSV: {e}")))?;
    Ok(())
}

/// Write the expanded systematics list as JSON.
pub fn write_systematics_json(path: &Path, systematics: &[SystematicUncertainty]) -> Result<(), AppError> {
    let file = File::create(path)
        .map_err(|e| AppError::new(2, format!("Failed to create systematics JSON '{}': {e}", path.display())))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, systematics)
        .map_err(|e| AppError::new(2, format!("Failed to write systematics JSON: {e}")))?;
    writer
        .flush()
        .map_err(|e| AppError::new(2, format!("Failed to flush systematics JSON: {e}")))?;
    Ok(())
}
