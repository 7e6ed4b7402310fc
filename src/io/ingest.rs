//! Event-chunk ingest.
//!
//! Event files are JSON, either a bare array of chunks or an object with a
//! `chunks` array. Each chunk carries its dataset metadata, the upstream
//! shape pass it was produced in and the per-event arrays. Structural
//! validation of the arrays happens when a chunk is filled, so a bad chunk
//! is reported with its dataset key.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::Deserialize;
use tracing::info;

use crate::domain::EventChunk;
use crate::error::AppError;

#[derive(Deserialize)]
#[serde(untagged)]
enum EventFile {
    Bare(Vec<EventChunk>),
    Wrapped { chunks: Vec<EventChunk> },
}

/// Load every chunk from an events JSON file.
pub fn load_events(path: &Path) -> Result<Vec<EventChunk>, AppError> {
    let file = File::open(path)
        .map_err(|e| AppError::new(2, format!("Failed to open events JSON '{}': {e}", path.display())))?;
    let parsed: EventFile = serde_json::from_reader(BufReader::new(file))
        .map_err(|e| AppError::new(2, format!("Invalid events JSON '{}': {e}", path.display())))?;

    let chunks = match parsed {
        EventFile::Bare(chunks) | EventFile::Wrapped { chunks } => chunks,
    };
    if chunks.is_empty() {
        return Err(AppError::new(2, format!("Events JSON '{}' contains no chunks.", path.display())));
    }

    let events: usize = chunks.iter().map(|c| c.events.len()).sum();
    info!(path = %path.display(), chunks = chunks.len(), events, "events loaded");
    Ok(chunks)
}
