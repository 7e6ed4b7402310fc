//! Reporting utilities: systematics and yield summaries.

pub mod format;

pub use format::*;

use std::collections::BTreeMap;

use crate::datacard::Datacard;
use crate::domain::{SystematicKind, SystematicUncertainty};

/// Distinct nuisance names of the expanded list, split by kind.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SystematicsSummary {
    pub entries: usize,
    pub log_normal: Vec<String>,
    pub shape: Vec<String>,
}

/// Group the expanded list by kind, keeping first-appearance order.
pub fn summarize_systematics(entries: &[SystematicUncertainty]) -> SystematicsSummary {
    let mut summary = SystematicsSummary {
        entries: entries.len(),
        ..Default::default()
    };
    for e in entries {
        let bucket = match e.kind {
            SystematicKind::LogNormal => &mut summary.log_normal,
            SystematicKind::Shape => &mut summary.shape,
        };
        if !bucket.contains(&e.datacard_name) {
            bucket.push(e.datacard_name.clone());
        }
    }
    summary
}

/// Nominal yields as `process -> category -> rate`, plus observed data per category.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct YieldTable {
    pub categories: Vec<String>,
    pub processes: Vec<String>,
    pub rates: BTreeMap<String, BTreeMap<String, f64>>,
    pub observed: BTreeMap<String, f64>,
}

pub fn yield_table(cards: &[Datacard]) -> YieldTable {
    let mut table = YieldTable::default();
    for card in cards {
        table.categories.push(card.category.clone());
        table.observed.insert(card.category.clone(), card.observation);
        for p in &card.processes {
            if !table.processes.contains(&p.name) {
                table.processes.push(p.name.clone());
            }
            table
                .rates
                .entry(p.name.clone())
                .or_default()
                .insert(card.category.clone(), p.rate);
        }
    }
    table
}
