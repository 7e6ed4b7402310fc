//! Cached access to correction tables keyed by `(year, name)`.
//!
//! Building a table from its backing file is the dominant cost, so each key is
//! loaded at most once per store. Tables are handed out as `Arc`s and shared
//! read-only across worker threads.

use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use tracing::{debug, info};

use crate::corrections::table::{BinnedCorrection, CorrectionSet, CorrectionTable};
use crate::error::WeightError;

type TableKey = (String, String);

#[derive(Debug, Default)]
pub struct CorrectionStore {
    /// Year -> correction-set file.
    catalog: BTreeMap<String, PathBuf>,
    cache: RwLock<HashMap<TableKey, Arc<dyn CorrectionTable>>>,
}

impl CorrectionStore {
    pub fn new(catalog: BTreeMap<String, PathBuf>) -> Self {
        Self {
            catalog,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Register every `<year>.json` file found in `dir`.
    pub fn from_dir(dir: &Path) -> Result<Self, WeightError> {
        let mut catalog = BTreeMap::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                if let Some(year) = path.file_stem().and_then(|s| s.to_str()) {
                    catalog.insert(year.to_string(), path.clone());
                }
            }
        }
        info!(dir = %dir.display(), years = catalog.len(), "correction catalog loaded");
        Ok(Self::new(catalog))
    }

    /// A store populated directly from tables, with no backing files.
    pub fn in_memory(tables: Vec<(String, BinnedCorrection)>) -> Result<Self, WeightError> {
        let mut cache: HashMap<TableKey, Arc<dyn CorrectionTable>> = HashMap::new();
        for (year, table) in tables {
            table.validate()?;
            cache.insert((year, table.name.clone()), Arc::new(table));
        }
        Ok(Self {
            catalog: BTreeMap::new(),
            cache: RwLock::new(cache),
        })
    }

    /// Fetch a table, loading it on first use.
    pub fn get(&self, year: &str, name: &str) -> Result<Arc<dyn CorrectionTable>, WeightError> {
        let key = (year.to_string(), name.to_string());
        {
            let cache = self.cache.read().unwrap_or_else(|e| e.into_inner());
            if let Some(table) = cache.get(&key) {
                return Ok(Arc::clone(table));
            }
        }

        let table = self.load(year, name)?;
        let mut cache = self.cache.write().unwrap_or_else(|e| e.into_inner());
        // Another worker may have loaded the same key meanwhile; keep the first.
        let entry = cache.entry(key).or_insert(table);
        Ok(Arc::clone(entry))
    }

    /// Number of tables built so far.
    pub fn cached_len(&self) -> usize {
        self.cache.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn load(&self, year: &str, name: &str) -> Result<Arc<dyn CorrectionTable>, WeightError> {
        let missing = || WeightError::MissingCalibration {
            year: year.to_string(),
            name: name.to_string(),
        };
        let path = self.catalog.get(year).ok_or_else(missing)?;

        debug!(year, name, path = %path.display(), "building correction table");
        let set: CorrectionSet = {
            let file = File::open(path)?;
            serde_json::from_reader(BufReader::new(file))?
        };
        let table = set
            .corrections
            .into_iter()
            .find(|c| c.name == name)
            .ok_or_else(missing)?;
        table.validate()?;
        Ok(Arc::new(table))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn flat_table(name: &str, value: f64) -> BinnedCorrection {
        let mut content = BTreeMap::new();
        content.insert("nominal".to_string(), vec![value]);
        BinnedCorrection {
            name: name.to_string(),
            inputs: vec!["x".to_string()],
            edges: vec![vec![0.0, 1.0]],
            content,
        }
    }

    #[test]
    fn unknown_year_or_name_fails_loudly() {
        let store = CorrectionStore::in_memory(vec![("2018".to_string(), flat_table("a", 1.0))]).unwrap();
        assert!(store.get("2018", "a").is_ok());
        assert!(matches!(
            store.get("2017", "a").unwrap_err(),
            WeightError::MissingCalibration { .. }
        ));
        assert!(matches!(
            store.get("2018", "b").unwrap_err(),
            WeightError::MissingCalibration { .. }
        ));
    }

    #[test]
    fn tables_are_loaded_once_and_shared() {
        let dir = tempfile::tempdir().unwrap();
        let set = CorrectionSet {
            corrections: vec![flat_table("ttlf", 0.9), flat_table("pu", 1.1)],
        };
        let mut file = File::create(dir.path().join("2018.json")).unwrap();
        file.write_all(serde_json::to_string(&set).unwrap().as_bytes()).unwrap();

        let store = CorrectionStore::from_dir(dir.path()).unwrap();
        assert_eq!(store.cached_len(), 0);
        let first = store.get("2018", "ttlf").unwrap();
        let second = store.get("2018", "ttlf").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(store.cached_len(), 1);
        assert_eq!(first.evaluate("nominal", &[&[0.5][..]]).unwrap(), vec![0.9]);
    }
}
