use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, warn};

use crate::domain::{SystematicKind, SystematicUncertainty};
use crate::error::SystematicsError;

/// Entries sharing a `datacard_name` must agree on kind and have identical or
/// disjoint `(process, year)` scopes.
pub fn validate_scopes(entries: &[SystematicUncertainty]) -> Result<(), SystematicsError> {
    let mut by_name: BTreeMap<&str, Vec<(&SystematicUncertainty, BTreeSet<(String, String)>)>> = BTreeMap::new();
    for e in entries {
        by_name
            .entry(e.datacard_name.as_str())
            .or_default()
            .push((e, e.scope()));
    }

    for (name, group) in by_name {
        for (i, (a, scope_a)) in group.iter().enumerate() {
            for (b, scope_b) in &group[i + 1..] {
                if a.kind != b.kind {
                    return Err(SystematicsError::KindConflict {
                        datacard_name: name.to_string(),
                    });
                }
                if scope_a != scope_b && !scope_a.is_disjoint(scope_b) {
                    return Err(SystematicsError::ScopeOverlap {
                        datacard_name: name.to_string(),
                    });
                }
            }
        }
    }
    Ok(())
}

/// Restrict the expanded list to one category.
///
/// Processes absent from the category are removed from every entry. Shape
/// entries also lose the processes whose nominal yield over the entry's years
/// is not positive.
///
/// Dropping is per process: a shape entry stays in the category for the
/// processes that still have a yield, and the entry itself is dropped (with a
/// warning) only once no process is left.
pub fn restrict_to_category<F>(
    entries: &[SystematicUncertainty],
    category: &str,
    present: &BTreeSet<String>,
    nominal_yield: F,
) -> Vec<SystematicUncertainty>
where
    F: Fn(&str, &BTreeSet<String>) -> f64,
{
    let mut out = Vec::with_capacity(entries.len());
    for e in entries {
        let mut processes: BTreeSet<String> = e.processes.intersection(present).cloned().collect();
        if processes.is_empty() {
            debug!(category, systematic = %e.datacard_name, "no process of this entry in category");
            continue;
        }

        if e.kind == SystematicKind::Shape {
            let empty: Vec<String> = processes
                .iter()
                .filter(|p| nominal_yield(p.as_str(), &e.years) <= 0.0)
                .cloned()
                .collect();
            for p in &empty {
                warn!(
                    category,
                    systematic = %e.datacard_name,
                    process = %p,
                    "nominal yield is zero, shape uncertainty not applied"
                );
                processes.remove(p);
            }
            if processes.is_empty() {
                warn!(category, systematic = %e.datacard_name, "shape uncertainty dropped");
                continue;
            }
        }

        out.push(SystematicUncertainty {
            processes,
            ..e.clone()
        });
    }
    out
}
