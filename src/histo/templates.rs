//! Keyed collections of histogram templates.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::BinningError;
use crate::histo::Histogram;

/// Name of the central template.
pub const NOMINAL: &str = "nominal";

/// Identity of one template: dataset key, year, category and variation name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TemplateKey {
    pub sample: String,
    pub year: String,
    pub category: String,
    pub variation: String,
}

impl TemplateKey {
    pub fn new(sample: &str, year: &str, category: &str, variation: &str) -> Self {
        Self {
            sample: sample.to_string(),
            year: year.to_string(),
            category: category.to_string(),
            variation: variation.to_string(),
        }
    }
}

/// Serialized form of one template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Template {
    #[serde(flatten)]
    key: TemplateKey,
    histogram: Histogram,
}

/// All templates produced by a fill, merged by key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<Template>", into = "Vec<Template>")]
pub struct TemplateSet {
    templates: BTreeMap<TemplateKey, Histogram>,
}

impl From<Vec<Template>> for TemplateSet {
    fn from(list: Vec<Template>) -> Self {
        let mut set = TemplateSet::default();
        for t in list {
            // A file with duplicate keys keeps the last entry.
            set.templates.insert(t.key, t.histogram);
        }
        set
    }
}

impl From<TemplateSet> for Vec<Template> {
    fn from(set: TemplateSet) -> Self {
        set.templates
            .into_iter()
            .map(|(key, histogram)| Template { key, histogram })
            .collect()
    }
}

impl TemplateSet {
    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Add `histogram` to the template at `key`, creating it if absent.
    pub fn accumulate(&mut self, key: TemplateKey, histogram: Histogram) -> Result<(), BinningError> {
        match self.templates.get_mut(&key) {
            Some(existing) => existing.add(&histogram),
            None => {
                self.templates.insert(key, histogram);
                Ok(())
            }
        }
    }

    /// Associative merge used by the parallel reduction.
    pub fn merge(&mut self, other: TemplateSet) -> Result<(), BinningError> {
        for (key, histogram) in other.templates {
            self.accumulate(key, histogram)?;
        }
        Ok(())
    }

    pub fn get(&self, sample: &str, year: &str, category: &str, variation: &str) -> Option<&Histogram> {
        self.templates.get(&TemplateKey::new(sample, year, category, variation))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&TemplateKey, &Histogram)> {
        self.templates.iter()
    }

    /// Dataset keys with at least one template in `year`.
    pub fn samples(&self, year: &str) -> BTreeSet<&str> {
        self.templates
            .keys()
            .filter(|k| k.year == year)
            .map(|k| k.sample.as_str())
            .collect()
    }

    pub fn categories(&self) -> BTreeSet<&str> {
        self.templates.keys().map(|k| k.category.as_str()).collect()
    }
}
