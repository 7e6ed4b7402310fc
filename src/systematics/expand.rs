//! Expansion of systematic declarations into scoped entries.
//!
//! Expansion is a pure function of the declaration, the process list and the
//! analysis years. Rules, in emission order:
//!
//! - correlated sources: one entry per process, all sharing the source name
//! - per-year shapes: one entry per year over every process, `<source>_<year>`
//! - decorrelated sources: one entry per process outside the exclusion list and
//!   the pooled group, `<source>_<process>`
//! - pooled group: one entry per decorrelated source over the whole group,
//!   `<source>_<group>`
//! - manual overrides: one log-normal entry each, named as declared

use std::collections::BTreeSet;

use tracing::debug;

use crate::domain::{Process, SystematicKind, SystematicUncertainty};
use crate::error::SystematicsError;
use crate::systematics::{SystematicsDeclaration, validate_scopes};

pub fn expand(
    decl: &SystematicsDeclaration,
    processes: &[Process],
    years: &[String],
) -> Result<Vec<SystematicUncertainty>, SystematicsError> {
    let mc: Vec<&Process> = processes.iter().filter(|p| !p.is_data).collect();
    let lookup = |source: &str, name: &str| find_process(&mc, source, name);

    let mut out = Vec::new();

    for src in &decl.correlated {
        if src.kind == SystematicKind::LogNormal {
            check_value(&src.name, src.value)?;
        }
        let targets = if src.processes.is_empty() {
            mc.clone()
        } else {
            src.processes
                .iter()
                .map(|name| lookup(&src.name, name))
                .collect::<Result<Vec<_>, _>>()?
        };
        for p in targets {
            let scope_years: BTreeSet<String> = years_of(p, years)
                .into_iter()
                .filter(|y| src.years.is_empty() || src.years.contains(y))
                .collect();
            if scope_years.is_empty() {
                continue;
            }
            out.push(entry(&src.name, &src.name, src.kind, [p.name.clone()].into(), scope_years, src.value));
        }
    }

    for src in &decl.per_year_shapes {
        for year in years {
            let scope: BTreeSet<String> = mc
                .iter()
                .filter(|p| years_of(p, years).contains(year))
                .map(|p| p.name.clone())
                .collect();
            if scope.is_empty() {
                continue;
            }
            out.push(entry(
                src,
                &format!("{src}_{year}"),
                SystematicKind::Shape,
                scope,
                [year.clone()].into(),
                1.0,
            ));
        }
    }

    let group_members: BTreeSet<&str> = match &decl.pooled_group {
        Some(group) => group
            .members
            .iter()
            .map(|m| lookup(&group.name, m).map(|p| p.name.as_str()))
            .collect::<Result<_, _>>()?,
        None => BTreeSet::new(),
    };

    for sources in &decl.decorrelated {
        for name in &sources.exclude {
            lookup(&sources.names.join(","), name)?;
        }
        for src in &sources.names {
            for p in &mc {
                if sources.exclude.contains(&p.name) || group_members.contains(p.name.as_str()) {
                    continue;
                }
                let p_years = years_of(p, years);
                if sources.per_year {
                    for year in p_years {
                        out.push(entry(
                            src,
                            &format!("{src}_{}_{year}", p.name),
                            SystematicKind::Shape,
                            [p.name.clone()].into(),
                            [year].into(),
                            1.0,
                        ));
                    }
                } else if !p_years.is_empty() {
                    out.push(entry(
                        src,
                        &format!("{src}_{}", p.name),
                        SystematicKind::Shape,
                        [p.name.clone()].into(),
                        p_years,
                        1.0,
                    ));
                }
            }
        }
    }

    if let Some(group) = decl.pooled_group.as_ref().filter(|g| !g.members.is_empty()) {
        let members: BTreeSet<String> = group_members.iter().map(|m| m.to_string()).collect();
        let group_years: BTreeSet<String> = mc
            .iter()
            .filter(|p| members.contains(&p.name))
            .flat_map(|p| years_of(p, years))
            .collect();
        for sources in &decl.decorrelated {
            for src in &sources.names {
                if sources.per_year {
                    for year in &group_years {
                        out.push(entry(
                            src,
                            &format!("{src}_{}_{year}", group.name),
                            SystematicKind::Shape,
                            members.clone(),
                            [year.clone()].into(),
                            1.0,
                        ));
                    }
                } else {
                    out.push(entry(
                        src,
                        &format!("{src}_{}", group.name),
                        SystematicKind::Shape,
                        members.clone(),
                        group_years.clone(),
                        1.0,
                    ));
                }
            }
        }
    }

    for o in &decl.overrides {
        check_value(&o.name, o.value)?;
        let scope = o
            .processes
            .iter()
            .map(|name| lookup(&o.name, name).map(|p| p.name.clone()))
            .collect::<Result<BTreeSet<_>, _>>()?;
        let scope_years: BTreeSet<String> = years
            .iter()
            .filter(|y| o.years.is_empty() || o.years.contains(y))
            .cloned()
            .collect();
        out.push(entry(&o.name, &o.name, SystematicKind::LogNormal, scope, scope_years, o.value));
    }

    validate_scopes(&out)?;
    debug!(entries = out.len(), "systematics expanded");
    Ok(out)
}

fn find_process<'a>(mc: &[&'a Process], source: &str, name: &str) -> Result<&'a Process, SystematicsError> {
    mc.iter()
        .copied()
        .find(|p| p.name == name)
        .ok_or_else(|| SystematicsError::UnknownProcess {
            source_name: source.to_string(),
            process: name.to_string(),
        })
}

fn years_of(process: &Process, years: &[String]) -> BTreeSet<String> {
    process.years_in(years).cloned().collect()
}

fn check_value(source: &str, value: f64) -> Result<(), SystematicsError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(SystematicsError::InvalidValue {
            source_name: source.to_string(),
            value,
        })
    }
}

fn entry(
    name: &str,
    datacard_name: &str,
    kind: SystematicKind,
    processes: BTreeSet<String>,
    years: BTreeSet<String>,
    value: f64,
) -> SystematicUncertainty {
    SystematicUncertainty {
        name: name.to_string(),
        datacard_name: datacard_name.to_string(),
        kind,
        processes,
        years,
        value,
    }
}
