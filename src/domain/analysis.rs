//! Analysis configuration.
//!
//! One [`AnalysisConfig`] drives every stage: which weights are applied while
//! filling, how categories are histogrammed, which processes and systematics
//! enter the datacards, and which categories are masked in the combined fit.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::domain::{Process, SystematicKind};
use crate::error::AppError;
use crate::systematics::{
    CorrelatedSource, DecorrelatedSources, ManualOverride, PooledGroup, SystematicsDeclaration,
};
use crate::weights::{WeightParameters, WeightsConfig};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Suffix of bin names and output files (e.g. `2018`).
    pub label: String,
    pub years: Vec<String>,
    /// Year -> integrated luminosity in pb^-1.
    #[serde(default)]
    pub luminosity: BTreeMap<String, f64>,
    pub processes: Vec<Process>,
    /// Templates whose sample key starts with this prefix are observed data.
    #[serde(default = "default_data_prefix")]
    pub data_prefix: String,
    /// Data samples produced by the synthetic generator.
    #[serde(default)]
    pub data_samples: Vec<String>,
    #[serde(default)]
    pub systematics: SystematicsDeclaration,
    /// Category -> histogrammed variable.
    pub categories: BTreeMap<String, String>,
    /// Categories whose observation is masked in the blinded combination.
    #[serde(default)]
    pub masked_categories: Vec<String>,
    /// Variable -> bin edges.
    pub variables: BTreeMap<String, Vec<f64>>,
    /// Upstream shape passes; each provides `<pass>Up` and `<pass>Down`.
    #[serde(default)]
    pub shape_passes: Vec<String>,
    #[serde(default)]
    pub weights: WeightsConfig,
    #[serde(default)]
    pub weight_parameters: WeightParameters,
}

fn default_data_prefix() -> String {
    "DATA".to_string()
}

const COMMON_SHAPES: [&str; 19] = [
    "pileup",
    "sf_ele_reco",
    "sf_ele_id",
    "sf_ele_trigger_era",
    "sf_ele_trigger_ht",
    "sf_ele_trigger_pileup",
    "sf_ele_trigger_stat",
    "sf_mu_id",
    "sf_mu_iso",
    "sf_mu_trigger",
    "sf_btag_withcalib_complete_ttsplit_cferr1",
    "sf_btag_withcalib_complete_ttsplit_cferr2",
    "sf_btag_withcalib_complete_ttsplit_hf",
    "sf_btag_withcalib_complete_ttsplit_hfstats1",
    "sf_btag_withcalib_complete_ttsplit_hfstats2",
    "sf_btag_withcalib_complete_ttsplit_lf",
    "sf_btag_withcalib_complete_ttsplit_lfstats1",
    "sf_btag_withcalib_complete_ttsplit_lfstats2",
    "sf_jet_puId",
];

const SHAPE_PASSES: [&str; 2] = ["JES_Total_AK4PFchs", "JER_AK4PFchs"];

const QCD_SCALES: [&str; 2] = ["sf_qcd_renorm_scale", "sf_qcd_factor_scale"];
const PDF: [&str; 1] = ["sf_lhe_pdf_weight"];
const PARTON_SHOWER: [&str; 2] = ["sf_partonshower_isr", "sf_partonshower_fsr"];

const TTBB_SAMPLES: [&str; 12] = [
    "TTbbSemiLeptonic__TTbbSemiLeptonic_tt+B_4j_DCTR_L",
    "TTbbSemiLeptonic__TTbbSemiLeptonic_tt+B_4j_DCTR_M",
    "TTbbSemiLeptonic__TTbbSemiLeptonic_tt+B_4j_DCTR_H",
    "TTbbSemiLeptonic__TTbbSemiLeptonic_tt+B_5j_DCTR_L",
    "TTbbSemiLeptonic__TTbbSemiLeptonic_tt+B_5j_DCTR_M",
    "TTbbSemiLeptonic__TTbbSemiLeptonic_tt+B_5j_DCTR_H",
    "TTbbSemiLeptonic__TTbbSemiLeptonic_tt+B_6j_DCTR_L",
    "TTbbSemiLeptonic__TTbbSemiLeptonic_tt+B_6j_DCTR_M",
    "TTbbSemiLeptonic__TTbbSemiLeptonic_tt+B_6j_DCTR_H",
    "TTbbSemiLeptonic__TTbbSemiLeptonic_tt+B_>=7j_DCTR_L",
    "TTbbSemiLeptonic__TTbbSemiLeptonic_tt+B_>=7j_DCTR_M",
    "TTbbSemiLeptonic__TTbbSemiLeptonic_tt+B_>=7j_DCTR_H",
];

/// Process name of a ttbb sub-sample: `tt+B_>=7j_DCTR_H` -> `ttbb_ge7j_H`.
pub fn ttbb_process_name(sample: &str) -> Option<String> {
    let (_, suffix) = sample.split_once("tt+B")?;
    Some(format!("ttbb{}", suffix.replace("_DCTR", "").replace(">=", "ge")))
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl AnalysisConfig {
    pub fn from_json_file(path: &Path) -> Result<Self, AppError> {
        let file = File::open(path)
            .map_err(|e| AppError::new(2, format!("Failed to open config {}: {e}", path.display())))?;
        serde_json::from_reader(BufReader::new(file))
            .map_err(|e| AppError::new(2, format!("Invalid config {}: {e}", path.display())))
    }

    /// Load `path` if given, otherwise the built-in 2018 ttH(bb) preset.
    pub fn load(path: Option<&Path>) -> Result<Self, AppError> {
        match path {
            Some(p) => Self::from_json_file(p),
            None => Ok(Self::tthbb_dctr_2018()),
        }
    }

    /// Semileptonic ttH(bb) 2018 analysis with DCTR-reweighted ttbb.
    pub fn tthbb_dctr_2018() -> Self {
        let year = "2018";
        let years = vec![year.to_string()];

        let mut processes = vec![
            Process::signal("tthbb", &["ttHTobb"], &[year]),
            Process::background("ttlf", &["TTToSemiLeptonic__TTToSemiLeptonic_tt+LF"], &[year], true),
            Process::background("ttcc", &["TTToSemiLeptonic__TTToSemiLeptonic_tt+C"], &[year], true),
            Process::background("tt_dilepton", &["TTTo2L2Nu"], &[year], false),
            Process::background("singletop", &["SingleTop"], &[year], false),
            Process::background("vjets", &["WJetsToLNu_HT", "DYJetsToLL"], &[year], false),
            Process::background("ttv", &["TTV"], &[year], false),
            Process::background("diboson", &["VV"], &[year], false),
        ];
        for sample in TTBB_SAMPLES {
            if let Some(name) = ttbb_process_name(sample) {
                processes.push(Process::background(&name, &[sample], &[year], true));
            }
        }
        let ttbb: Vec<String> = processes
            .iter()
            .filter(|p| p.name.starts_with("ttbb"))
            .map(|p| p.name.clone())
            .collect();

        let mut per_year_shapes = strings(&COMMON_SHAPES);
        per_year_shapes.extend(strings(&SHAPE_PASSES));

        let systematics = SystematicsDeclaration {
            correlated: vec![CorrelatedSource {
                name: format!("lumi_{year}"),
                kind: SystematicKind::LogNormal,
                value: 1.025,
                processes: Vec::new(),
                years: years.clone(),
            }],
            per_year_shapes,
            decorrelated: vec![
                DecorrelatedSources {
                    names: strings(&QCD_SCALES),
                    exclude: strings(&["diboson"]),
                    per_year: false,
                },
                DecorrelatedSources {
                    names: strings(&PDF),
                    exclude: strings(&["diboson", "singletop"]),
                    per_year: false,
                },
                DecorrelatedSources {
                    names: strings(&PARTON_SHOWER),
                    exclude: Vec::new(),
                    per_year: false,
                },
            ],
            pooled_group: Some(PooledGroup {
                name: "ttbb".to_string(),
                members: ttbb,
            }),
            overrides: vec![ManualOverride {
                name: "sf_lhe_pdf_weight_singletop".to_string(),
                processes: strings(&["singletop"]),
                years: Vec::new(),
                value: 1.05,
            }],
        };

        let mut categories = BTreeMap::new();
        categories.insert("CR".to_string(), "dctr_index".to_string());
        categories.insert("CR_ttlf_0p60".to_string(), "nLeptons".to_string());
        categories.insert("CR_ttcc".to_string(), "nLeptons".to_string());
        categories.insert("SR".to_string(), "spanet_tthbb_transformed_binning0p0125".to_string());

        let mut variables = BTreeMap::new();
        variables.insert("dctr_index".to_string(), (0..=12_i32).map(f64::from).collect());
        variables.insert("nLeptons".to_string(), vec![0.5, 1.5]);
        variables.insert(
            "spanet_tthbb_transformed_binning0p0125".to_string(),
            (0..=80_i32).map(|i| f64::from(i) * 0.0125).collect(),
        );

        // Everything but pileup is computed upstream and read from columns.
        let column_weights: Vec<String> = COMMON_SHAPES[1..]
            .iter()
            .chain(QCD_SCALES.iter())
            .chain(PDF.iter())
            .chain(PARTON_SHOWER.iter())
            .map(|s| s.to_string())
            .collect();
        let mut common = strings(&["genWeight", "lumi_xs", "pileup", "sf_top_pt"]);
        common.extend(column_weights.iter().cloned());
        let mut variations = vec!["pileup".to_string()];
        variations.extend(column_weights.iter().cloned());
        let mut by_sample = BTreeMap::new();
        by_sample.insert("TTToSemiLeptonic".to_string(), strings(&["sf_ttlf_calib"]));

        let weights = WeightsConfig {
            common,
            by_sample,
            variations,
            variations_by_sample: BTreeMap::new(),
            columns: column_weights,
        };

        let mut weight_parameters = WeightParameters::default();
        weight_parameters
            .pileup
            .insert(year.to_string(), format!("puWeight_{year}"));
        weight_parameters
            .ttlf_calibration
            .insert(year.to_string(), format!("ttlf_calibration_{year}"));
        weight_parameters
            .ttlf_variations
            .insert(year.to_string(), strings(&["ttcc_njets", "ttcc_ht"]));

        let mut luminosity = BTreeMap::new();
        luminosity.insert(year.to_string(), 59_830.0);

        Self {
            label: year.to_string(),
            years,
            luminosity,
            processes,
            data_prefix: default_data_prefix(),
            data_samples: strings(&["DATA_SingleMuon", "DATA_EGamma"]),
            systematics,
            categories,
            masked_categories: strings(&["SR"]),
            variables,
            shape_passes: strings(&SHAPE_PASSES),
            weights,
            weight_parameters,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ttbb_names_follow_the_sample_suffix() {
        assert_eq!(
            ttbb_process_name("TTbbSemiLeptonic__TTbbSemiLeptonic_tt+B_>=7j_DCTR_H").as_deref(),
            Some("ttbb_ge7j_H")
        );
        assert_eq!(
            ttbb_process_name("TTbbSemiLeptonic__TTbbSemiLeptonic_tt+B_4j_DCTR_L").as_deref(),
            Some("ttbb_4j_L")
        );
        assert_eq!(ttbb_process_name("TTV"), None);
    }

    #[test]
    fn preset_shape() {
        let config = AnalysisConfig::tthbb_dctr_2018();
        assert_eq!(config.processes.len(), 20);
        assert_eq!(config.processes.iter().filter(|p| p.is_signal).count(), 1);
        assert_eq!(config.categories.len(), 4);
        assert_eq!(config.variables["spanet_tthbb_transformed_binning0p0125"].len(), 81);
        assert_eq!(config.systematics.per_year_shapes.len(), 21);
        for variable in config.categories.values() {
            assert!(config.variables.contains_key(variable));
        }
    }

    #[test]
    fn config_round_trips_through_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("analysis.json");
        let config = AnalysisConfig::tthbb_dctr_2018();
        std::fs::write(&path, serde_json::to_string_pretty(&config).unwrap()).unwrap();
        assert_eq!(AnalysisConfig::load(Some(&path)).unwrap(), config);
        assert!(AnalysisConfig::load(Some(&dir.path().join("missing.json"))).is_err());
    }
}
