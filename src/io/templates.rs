//! Read/write template JSON files.
//!
//! A template file is the hand-off between `hepcard fill` and
//! `hepcard datacards`:
//! - producer tag and creation time
//! - analysis label and years the templates were filled for
//! - the flat list of `(sample, year, category, variation)` histograms

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::AppError;
use crate::histo::TemplateSet;

pub const TOOL: &str = "hepcard";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateFile {
    pub tool: String,
    pub created: DateTime<Utc>,
    pub label: String,
    pub years: Vec<String>,
    pub templates: TemplateSet,
}

impl TemplateFile {
    pub fn new(label: &str, years: &[String], templates: TemplateSet) -> Self {
        Self {
            tool: TOOL.to_string(),
            created: Utc::now(),
            label: label.to_string(),
            years: years.to_vec(),
            templates,
        }
    }
}

/// Write a template JSON file.
pub fn write_templates_json(path: &Path, file: &TemplateFile) -> Result<(), AppError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .map_err(|e| AppError::new(2, format!("Failed to create '{}': {e}", parent.display())))?;
    }
    let out = File::create(path)
        .map_err(|e| AppError::new(2, format!("Failed to create templates JSON '{}': {e}", path.display())))?;
    let mut writer = BufWriter::new(out);
    serde_json::to_writer_pretty(&mut writer, file)
        .map_err(|e| AppError::new(2, format!("Failed to write templates JSON: {e}")))?;
    writer
        .flush()
        .map_err(|e| AppError::new(2, format!("Failed to flush templates JSON: {e}")))?;
    info!(path = %path.display(), templates = file.templates.len(), "templates written");
    Ok(())
}

/// Read a template JSON file.
pub fn read_templates_json(path: &Path) -> Result<TemplateFile, AppError> {
    let file = File::open(path)
        .map_err(|e| AppError::new(2, format!("Failed to open templates JSON '{}': {e}", path.display())))?;
    let parsed: TemplateFile = serde_json::from_reader(BufReader::new(file))
        .map_err(|e| AppError::new(2, format!("Invalid templates JSON '{}': {e}", path.display())))?;
    if parsed.templates.is_empty() {
        return Err(AppError::new(2, format!("Templates JSON '{}' is empty.", path.display())));
    }
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::histo::{Histogram, NOMINAL, TemplateKey};

    #[test]
    fn write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("templates.json");

        let mut set = TemplateSet::default();
        let mut h = Histogram::new(vec![0.0, 1.0, 2.0]).unwrap();
        h.fill(&[0.5, 1.5, 1.7], &[1.0, 2.0, 0.5], None);
        set.accumulate(TemplateKey::new("TTV", "2018", "SR", NOMINAL), h).unwrap();

        let file = TemplateFile::new("2018", &["2018".to_string()], set);
        write_templates_json(&path, &file).unwrap();
        let back = read_templates_json(&path).unwrap();
        assert_eq!(back.tool, TOOL);
        assert_eq!(back.templates, file.templates);
        let hist = back.templates.get("TTV", "2018", "SR", NOMINAL).unwrap();
        assert_eq!(hist.sumw, vec![1.0, 2.5]);
    }

    #[test]
    fn empty_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("templates.json");
        write_templates_json(&path, &TemplateFile::new("2018", &[], TemplateSet::default())).unwrap();
        assert_eq!(read_templates_json(&path).unwrap_err().exit_code(), 2);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn full_disk_is_reported() {
        let file = TemplateFile::new("2018", &["2018".to_string()], TemplateSet::default());
        let err = write_templates_json(Path::new("/dev/full"), &file).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }
}
