//! Formatted terminal output.
//!
//! We keep formatting code in one place so the assembly code stays clean and
//! output changes are localized.

use crate::datacard::DATA_OBS;
use crate::report::{SystematicsSummary, YieldTable};

const NAME_WIDTH: usize = 24;
const CELL_WIDTH: usize = 14;

/// Format the expanded-systematics summary.
pub fn format_systematics_summary(summary: &SystematicsSummary) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "Expanded systematics: {} entries, {} nuisances ({} lnN, {} shape)\n",
        summary.entries,
        summary.log_normal.len() + summary.shape.len(),
        summary.log_normal.len(),
        summary.shape.len()
    ));
    out.push_str("\nlnN:\n");
    for name in &summary.log_normal {
        out.push_str(&format!("  {name}\n"));
    }
    out.push_str("\nshape:\n");
    for name in &summary.shape {
        out.push_str(&format!("  {name}\n"));
    }
    out
}

/// Format nominal yields with processes as rows and categories as columns.
pub fn format_yields(table: &YieldTable) -> String {
    let mut out = String::new();

    let mut header = format!("{:<NAME_WIDTH$}", "process");
    let mut rule = format!("{:-<NAME_WIDTH$}", "");
    for category in &table.categories {
        header.push_str(&format!(" {:>CELL_WIDTH$}", truncate(category, CELL_WIDTH)));
        rule.push_str(&format!(" {:-<CELL_WIDTH$}", ""));
    }
    out.push_str(header.trim_end());
    out.push('\n');
    out.push_str(&rule);
    out.push('\n');

    for process in &table.processes {
        let mut line = format!("{:<NAME_WIDTH$}", truncate(process, NAME_WIDTH));
        for category in &table.categories {
            let cell = table
                .rates
                .get(process)
                .and_then(|by_cat| by_cat.get(category))
                .map(|v| format!("{v:.3}"))
                .unwrap_or_else(|| "-".to_string());
            line.push_str(&format!(" {cell:>CELL_WIDTH$}"));
        }
        out.push_str(line.trim_end());
        out.push('\n');
    }

    out.push_str(&rule);
    out.push('\n');
    let mut line = format!("{DATA_OBS:<NAME_WIDTH$}");
    for category in &table.categories {
        let v = table.observed.get(category).copied().unwrap_or(0.0);
        line.push_str(&format!(" {:>CELL_WIDTH$}", format!("{v:.1}")));
    }
    out.push_str(line.trim_end());
    out.push('\n');
    out
}

/// One-line summary of a fill run.
pub fn format_fill_summary(label: &str, chunks: usize, events: usize, templates: usize) -> String {
    format!("Filled {templates} templates for '{label}' from {chunks} chunks ({events} events)")
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out = String::new();
    for (i, ch) in s.chars().enumerate() {
        if i + 1 >= max {
            break;
        }
        out.push(ch);
    }
    out.push('.');
    out
}
