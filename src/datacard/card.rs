//! Per-category datacard assembly and rendering.
//!
//! A `Datacard` is built from already-reduced templates. Samples are summed
//! into processes over every year the process is defined for, the expanded
//! systematics are restricted to the category, and shape variations are
//! resolved to `<process>_<datacard_name>Up/Down` histograms. Years outside a
//! shape entry's scope contribute their nominal template to the shifted sum.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::domain::{AnalysisConfig, SystematicKind, SystematicUncertainty};
use crate::error::DatacardError;
use crate::histo::{Histogram, NOMINAL, TemplateSet};
use crate::systematics::restrict_to_category;

/// Process name of the observed data in every card.
pub const DATA_OBS: &str = "data_obs";

const RULE_WIDTH: usize = 80;

/// One column of the process block.
#[derive(Debug, Clone, PartialEq)]
pub struct DatacardProcess {
    pub name: String,
    /// Combine convention: signals `<= 0`, backgrounds `> 0`.
    pub index: i32,
    pub rate: f64,
    pub has_rate_param: bool,
}

impl DatacardProcess {
    pub fn is_signal(&self) -> bool {
        self.index <= 0
    }
}

/// One nuisance line: a datacard name and its value per affected process.
#[derive(Debug, Clone, PartialEq)]
pub struct Nuisance {
    pub name: String,
    pub kind: SystematicKind,
    pub values: BTreeMap<String, f64>,
}

impl Nuisance {
    pub(crate) fn cell(&self, process: &str) -> String {
        match (self.kind, self.values.get(process)) {
            (_, None) => "-".to_string(),
            (SystematicKind::Shape, Some(_)) => "1".to_string(),
            (SystematicKind::LogNormal, Some(v)) => format!("{v}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Datacard {
    pub category: String,
    /// Channel name: `<category>_<label>`.
    pub bin: String,
    pub variable: String,
    pub observation: f64,
    pub processes: Vec<DatacardProcess>,
    pub nuisances: Vec<Nuisance>,
    /// `data_obs`, `<process>` and `<process>_<nuisance>Up/Down`.
    pub shapes: BTreeMap<String, Histogram>,
}

/// Sum the `variation` templates of `samples` in one year and category.
fn sum_samples(
    templates: &TemplateSet,
    samples: &[String],
    year: &str,
    category: &str,
    variation: &str,
) -> Result<Option<Histogram>, DatacardError> {
    let mut total: Option<Histogram> = None;
    for sample in samples {
        let hist = templates
            .get(sample, year, category, variation)
            .ok_or_else(|| DatacardError::MissingHistogram {
                sample: sample.clone(),
                year: year.to_string(),
                category: category.to_string(),
                variation: variation.to_string(),
            })?;
        match total.as_mut() {
            Some(t) => t.add(hist)?,
            None => total = Some(hist.clone()),
        }
    }
    Ok(total)
}

fn add_into(total: &mut Option<Histogram>, hist: &Histogram) -> Result<(), DatacardError> {
    match total.as_mut() {
        Some(t) => t.add(hist)?,
        None => *total = Some(hist.clone()),
    }
    Ok(())
}

impl Datacard {
    pub fn build(
        category: &str,
        templates: &TemplateSet,
        config: &AnalysisConfig,
        systematics: &[SystematicUncertainty],
    ) -> Result<Self, DatacardError> {
        let variable = config
            .categories
            .get(category)
            .cloned()
            .unwrap_or_default();

        // process -> year -> nominal histogram
        let mut nominal: BTreeMap<String, BTreeMap<String, Histogram>> = BTreeMap::new();
        let mut samples_of: BTreeMap<String, &[String]> = BTreeMap::new();
        for process in config.processes.iter().filter(|p| !p.is_data) {
            let mut per_year = BTreeMap::new();
            for year in process.years_in(&config.years) {
                if let Some(h) = sum_samples(templates, &process.samples, year, category, NOMINAL)? {
                    per_year.insert(year.clone(), h);
                }
            }
            if per_year.is_empty() {
                debug!(category, process = %process.name, "process not defined for analysis years");
                continue;
            }
            samples_of.insert(process.name.clone(), process.samples.as_slice());
            nominal.insert(process.name.clone(), per_year);
        }

        let mut shapes: BTreeMap<String, Histogram> = BTreeMap::new();

        let mut observed: Option<Histogram> = None;
        for year in &config.years {
            let data: Vec<String> = templates
                .samples(year)
                .into_iter()
                .filter(|s| s.starts_with(config.data_prefix.as_str()))
                .map(str::to_string)
                .collect();
            if let Some(h) = sum_samples(templates, &data, year, category, NOMINAL)? {
                add_into(&mut observed, &h)?;
            }
        }
        let observed = observed.ok_or_else(|| DatacardError::MissingProcess {
            process: DATA_OBS.to_string(),
            category: category.to_string(),
        })?;
        let observation = observed.integral();
        shapes.insert(DATA_OBS.to_string(), observed);

        let mut signals = Vec::new();
        let mut backgrounds = Vec::new();
        for process in config.processes.iter().filter(|p| !p.is_data) {
            let Some(per_year) = nominal.get(&process.name) else {
                continue;
            };
            let mut total = None;
            for h in per_year.values() {
                add_into(&mut total, h)?;
            }
            let Some(total) = total else { continue };
            let entry = DatacardProcess {
                name: process.name.clone(),
                index: 0,
                rate: total.integral(),
                has_rate_param: process.has_rate_param && !process.is_signal,
            };
            shapes.insert(process.name.clone(), total);
            if process.is_signal {
                signals.push(entry);
            } else {
                backgrounds.push(entry);
            }
        }
        if signals.is_empty() && backgrounds.is_empty() {
            return Err(DatacardError::MissingProcess {
                process: "*".to_string(),
                category: category.to_string(),
            });
        }
        for (i, p) in signals.iter_mut().enumerate() {
            p.index = -(i as i32);
        }
        for (i, p) in backgrounds.iter_mut().enumerate() {
            p.index = i as i32 + 1;
        }
        let mut processes = signals;
        processes.extend(backgrounds);

        let present: BTreeSet<String> = nominal.keys().cloned().collect();
        let restricted = restrict_to_category(systematics, category, &present, |process, years| {
            nominal
                .get(process)
                .map(|per_year| {
                    per_year
                        .iter()
                        .filter(|(y, _)| years.contains(*y))
                        .map(|(_, h)| h.integral())
                        .sum::<f64>()
                })
                .unwrap_or(0.0)
        });

        let mut nuisances: Vec<Nuisance> = Vec::new();
        // (process, datacard_name) -> year -> source template prefix
        let mut shifted: BTreeMap<(String, String), BTreeMap<String, String>> = BTreeMap::new();
        for e in &restricted {
            let idx = match nuisances.iter().position(|n| n.name == e.datacard_name) {
                Some(idx) => idx,
                None => {
                    nuisances.push(Nuisance {
                        name: e.datacard_name.clone(),
                        kind: e.kind,
                        values: BTreeMap::new(),
                    });
                    nuisances.len() - 1
                }
            };
            for p in &e.processes {
                nuisances[idx].values.entry(p.clone()).or_insert(e.value);
                if e.kind == SystematicKind::Shape {
                    let years = shifted.entry((p.clone(), e.datacard_name.clone())).or_default();
                    for y in &e.years {
                        years.entry(y.clone()).or_insert_with(|| e.name.clone());
                    }
                }
            }
        }

        for ((process, datacard_name), years) in &shifted {
            let (Some(per_year), Some(samples)) = (nominal.get(process), samples_of.get(process)) else {
                continue;
            };
            for direction in ["Up", "Down"] {
                let mut total = None;
                for (year, nominal_hist) in per_year {
                    match years.get(year) {
                        Some(source) => {
                            let variation = format!("{source}{direction}");
                            if let Some(h) = sum_samples(templates, samples, year, category, &variation)? {
                                add_into(&mut total, &h)?;
                            }
                        }
                        None => add_into(&mut total, nominal_hist)?,
                    }
                }
                if let Some(total) = total {
                    shapes.insert(format!("{process}_{datacard_name}{direction}"), total);
                }
            }
        }

        let bin = format!("{category}_{}", config.label);
        info!(
            bin = %bin,
            processes = processes.len(),
            nuisances = nuisances.len(),
            "datacard assembled"
        );
        Ok(Self {
            category: category.to_string(),
            bin,
            variable,
            observation,
            processes,
            nuisances,
            shapes,
        })
    }

    pub fn card_file_name(&self) -> String {
        format!("datacard_{}.txt", self.bin)
    }

    pub fn shapes_file_name(&self) -> String {
        format!("shapes_{}.json", self.bin)
    }

    pub fn rate_params(&self) -> impl Iterator<Item = &DatacardProcess> {
        self.processes.iter().filter(|p| p.has_rate_param)
    }

    /// Render the card text, pointing its `shapes` line at `shapes_file`.
    pub fn render(&self, shapes_file: &str) -> String {
        let rule = "-".repeat(RULE_WIDTH);
        let mut out = String::new();

        out.push_str(&format!("# category {} (variable {})\n", self.category, self.variable));
        out.push_str("imax 1 number of channels\n");
        out.push_str(&format!(
            "jmax {} number of processes minus one\n",
            self.processes.len().saturating_sub(1)
        ));
        out.push_str(&format!("kmax {} number of nuisance parameters\n", self.nuisances.len()));
        out.push_str(&format!("{rule}\n"));
        out.push_str(&format!(
            "shapes * {} {shapes_file} $PROCESS $PROCESS_$SYSTEMATIC\n",
            self.bin
        ));
        out.push_str(&format!("{rule}\n"));
        out.push_str(&format!("bin          {}\n", self.bin));
        out.push_str(&format!("observation  {}\n", format_rate(self.observation)));
        out.push_str(&format!("{rule}\n"));

        let columns: Vec<&DatacardProcess> = self.processes.iter().collect();
        out.push_str(&process_block(&[(self.bin.as_str(), columns.as_slice())]));
        out.push_str(&format!("{rule}\n"));

        let pairs: Vec<(&str, &DatacardProcess)> =
            self.processes.iter().map(|p| (self.bin.as_str(), p)).collect();
        out.push_str(&nuisance_block(&self.nuisances.iter().collect::<Vec<_>>(), &pairs, |_, n, p| {
            n.cell(&p.name)
        }));
        out.push_str(&format!("{rule}\n"));

        for p in self.rate_params() {
            out.push_str(&format!("SF_{} rateParam {} {} 1.0\n", p.name, self.bin, p.name));
        }
        out.push_str(&format!("{} autoMCStats 10 0 1\n", self.bin));
        out
    }

    /// Write the shapes JSON and the card into `directory`.
    pub fn dump(&self, directory: &Path) -> Result<PathBuf, DatacardError> {
        fs::create_dir_all(directory)?;
        let shapes_file = self.shapes_file_name();
        fs::write(directory.join(&shapes_file), serde_json::to_string_pretty(&self.shapes)?)?;
        let card_path = directory.join(self.card_file_name());
        fs::write(&card_path, self.render(&shapes_file))?;
        debug!(path = %card_path.display(), "datacard written");
        Ok(card_path)
    }
}

pub(crate) fn format_rate(value: f64) -> String {
    format!("{value:.4}")
}

pub(crate) fn row(label: &str, cells: &[String]) -> String {
    let mut line = format!("{label:<40}");
    for c in cells {
        line.push_str(&format!(" {c:<16}"));
    }
    format!("{}\n", line.trim_end())
}

/// `bin`/`process`/`process`/`rate` rows over the given channels.
pub(crate) fn process_block(channels: &[(&str, &[&DatacardProcess])]) -> String {
    let mut bins = Vec::new();
    let mut names = Vec::new();
    let mut indices = Vec::new();
    let mut rates = Vec::new();
    for (bin, processes) in channels {
        for p in *processes {
            bins.push(bin.to_string());
            names.push(p.name.clone());
            indices.push(p.index.to_string());
            rates.push(format_rate(p.rate));
        }
    }
    let mut out = String::new();
    out.push_str(&row("bin", &bins));
    out.push_str(&row("process", &names));
    out.push_str(&row("process", &indices));
    out.push_str(&row("rate", &rates));
    out
}

/// One row per nuisance over the `(bin, process)` columns.
pub(crate) fn nuisance_block<F>(nuisances: &[&Nuisance], columns: &[(&str, &DatacardProcess)], cell: F) -> String
where
    F: Fn(&str, &Nuisance, &DatacardProcess) -> String,
{
    let mut out = String::new();
    for n in nuisances {
        let cells: Vec<String> = columns.iter().map(|(bin, p)| cell(bin, n, p)).collect();
        out.push_str(&row(&format!("{} {}", n.name, n.kind.label()), &cells));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Process;
    use crate::histo::TemplateKey;
    use crate::systematics::{CorrelatedSource, SystematicsDeclaration, expand};
    use approx::assert_relative_eq;

    fn hist(counts: &[f64]) -> Histogram {
        let mut h = Histogram::new(vec![0.0, 1.0, 2.0]).unwrap();
        h.fill(&[0.5, 1.5], counts, None);
        h
    }

    fn config() -> AnalysisConfig {
        let mut config = AnalysisConfig::tthbb_dctr_2018();
        config.processes = vec![
            Process::signal("tthbb", &["ttHTobb"], &["2018"]),
            Process::background("ttlf", &["TTToSemiLeptonic"], &["2018"], true),
            Process::background("ttv", &["TTV"], &["2018"], false),
        ];
        config.systematics = SystematicsDeclaration {
            correlated: vec![CorrelatedSource {
                name: "lumi_2018".to_string(),
                kind: SystematicKind::LogNormal,
                value: 1.025,
                processes: Vec::new(),
                years: Vec::new(),
            }],
            per_year_shapes: vec!["pileup".to_string()],
            ..Default::default()
        };
        config
    }

    fn templates() -> TemplateSet {
        let mut set = TemplateSet::default();
        let mut put = |sample: &str, variation: &str, counts: &[f64]| {
            set.accumulate(TemplateKey::new(sample, "2018", "SR", variation), hist(counts))
                .unwrap();
        };
        put("ttHTobb", NOMINAL, &[1.0, 2.0]);
        put("ttHTobb", "pileupUp", &[1.1, 2.2]);
        put("ttHTobb", "pileupDown", &[0.9, 1.8]);
        put("TTToSemiLeptonic", NOMINAL, &[10.0, 5.0]);
        put("TTToSemiLeptonic", "pileupUp", &[11.0, 5.0]);
        put("TTToSemiLeptonic", "pileupDown", &[9.0, 5.0]);
        put("TTV", NOMINAL, &[0.0, 0.0]);
        put("DATA_SingleMuon", NOMINAL, &[12.0, 7.0]);
        put("DATA_EGamma", NOMINAL, &[1.0, 0.0]);
        set
    }

    fn build() -> Datacard {
        let config = config();
        let systematics = expand(&config.systematics, &config.processes, &config.years).unwrap();
        Datacard::build("SR", &templates(), &config, &systematics).unwrap()
    }

    #[test]
    fn processes_and_rates() {
        let card = build();
        let names: Vec<&str> = card.processes.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["tthbb", "ttlf", "ttv"]);
        assert_eq!(card.processes[0].index, 0);
        assert_eq!(card.processes[1].index, 1);
        assert_relative_eq!(card.processes[1].rate, 15.0);
        assert_relative_eq!(card.observation, 20.0);
        assert_eq!(card.bin, "SR_2018");
    }

    #[test]
    fn empty_process_loses_its_shape_scope_but_keeps_lnn() {
        let card = build();
        let lumi = card.nuisances.iter().find(|n| n.name == "lumi_2018").unwrap();
        assert_eq!(lumi.values.len(), 3);
        let pileup = card.nuisances.iter().find(|n| n.name == "pileup_2018").unwrap();
        assert!(!pileup.values.contains_key("ttv"));
        assert!(card.shapes.contains_key("ttlf_pileup_2018Up"));
        assert!(!card.shapes.contains_key("ttv_pileup_2018Up"));
        assert_relative_eq!(card.shapes["ttlf_pileup_2018Down"].integral(), 14.0);
    }

    #[test]
    fn render_lists_every_block() {
        let text = build().render("shapes_SR_2018.json");
        assert!(text.contains("imax 1"));
        assert!(text.contains("jmax 2"));
        assert!(text.contains("kmax 2"));
        assert!(text.contains("shapes * SR_2018 shapes_SR_2018.json $PROCESS $PROCESS_$SYSTEMATIC"));
        assert!(text.contains("SF_ttlf rateParam SR_2018 ttlf 1.0"));
        assert!(!text.contains("SF_tthbb"));
        assert!(text.contains("SR_2018 autoMCStats 10 0 1"));
        let lumi_line = text.lines().find(|l| l.starts_with("lumi_2018 lnN")).unwrap();
        assert_eq!(lumi_line.matches("1.025").count(), 3);
        let pileup_line = text.lines().find(|l| l.starts_with("pileup_2018 shape")).unwrap();
        assert!(pileup_line.ends_with('-'));
    }

    #[test]
    fn missing_variation_template_is_an_error() {
        let config = config();
        let systematics = expand(&config.systematics, &config.processes, &config.years).unwrap();
        let mut set = TemplateSet::default();
        for (key, h) in templates().iter() {
            if !(key.sample == "ttHTobb" && key.variation == "pileupDown") {
                set.accumulate(key.clone(), h.clone()).unwrap();
            }
        }
        let err = Datacard::build("SR", &set, &config, &systematics).unwrap_err();
        assert!(matches!(err, DatacardError::MissingHistogram { ref variation, .. } if variation == "pileupDown"));
    }

    #[test]
    fn missing_data_is_reported() {
        let config = config();
        let mut set = TemplateSet::default();
        for (key, h) in templates().iter() {
            if !key.sample.starts_with("DATA") {
                set.accumulate(key.clone(), h.clone()).unwrap();
            }
        }
        let err = Datacard::build("SR", &set, &config, &[]).unwrap_err();
        assert!(matches!(err, DatacardError::MissingProcess { ref process, .. } if process == DATA_OBS));
    }

    #[test]
    fn dump_writes_card_and_shapes() {
        let dir = tempfile::tempdir().unwrap();
        let card = build();
        let path = card.dump(dir.path()).unwrap();
        assert!(path.ends_with("datacard_SR_2018.txt"));
        let shapes: BTreeMap<String, Histogram> =
            serde_json::from_str(&fs::read_to_string(dir.path().join("shapes_SR_2018.json")).unwrap()).unwrap();
        assert!(shapes.contains_key(DATA_OBS));
        assert!(shapes.contains_key("tthbb_pileup_2018Up"));
    }
}
