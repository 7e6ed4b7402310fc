//! Multi-category combination and fit helper scripts.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::datacard::card::{Datacard, DatacardProcess, Nuisance, format_rate, nuisance_block, process_block, row};
use crate::error::DatacardError;

const RULE_WIDTH: usize = 80;

/// Render one card spanning every channel in `cards`.
///
/// Nuisances are matched across channels by datacard name; rate parameters
/// with the same name correlate between channels.
pub fn render_combined(cards: &[Datacard]) -> String {
    let rule = "-".repeat(RULE_WIDTH);
    let mut out = String::new();

    let jmax = cards
        .iter()
        .map(|c| c.processes.len().saturating_sub(1))
        .max()
        .unwrap_or(0);
    let mut nuisances: Vec<&Nuisance> = Vec::new();
    for card in cards {
        for n in &card.nuisances {
            if !nuisances.iter().any(|m| m.name == n.name) {
                nuisances.push(n);
            }
        }
    }

    out.push_str(&format!("# combined card over {} channels\n", cards.len()));
    out.push_str(&format!("imax {} number of channels\n", cards.len()));
    out.push_str(&format!("jmax {jmax} number of processes minus one\n"));
    out.push_str(&format!("kmax {} number of nuisance parameters\n", nuisances.len()));
    out.push_str(&format!("{rule}\n"));
    for card in cards {
        out.push_str(&format!(
            "shapes * {} {} $PROCESS $PROCESS_$SYSTEMATIC\n",
            card.bin,
            card.shapes_file_name()
        ));
    }
    out.push_str(&format!("{rule}\n"));
    let bins: Vec<String> = cards.iter().map(|c| c.bin.clone()).collect();
    let observations: Vec<String> = cards.iter().map(|c| format_rate(c.observation)).collect();
    out.push_str(&row("bin", &bins));
    out.push_str(&row("observation", &observations));
    out.push_str(&format!("{rule}\n"));

    let per_channel: Vec<(&str, Vec<&DatacardProcess>)> = cards
        .iter()
        .map(|c| (c.bin.as_str(), c.processes.iter().collect()))
        .collect();
    let channels: Vec<(&str, &[&DatacardProcess])> =
        per_channel.iter().map(|(bin, ps)| (*bin, ps.as_slice())).collect();
    out.push_str(&process_block(&channels));
    out.push_str(&format!("{rule}\n"));

    let columns: Vec<(&str, &DatacardProcess)> = cards
        .iter()
        .flat_map(|c| c.processes.iter().map(move |p| (c.bin.as_str(), p)))
        .collect();
    out.push_str(&nuisance_block(&nuisances, &columns, |bin, n, p| {
        cards
            .iter()
            .find(|c| c.bin == bin)
            .and_then(|c| c.nuisances.iter().find(|m| m.name == n.name))
            .map(|m| m.cell(&p.name))
            .unwrap_or_else(|| "-".to_string())
    }));
    out.push_str(&format!("{rule}\n"));

    for card in cards {
        for p in card.rate_params() {
            out.push_str(&format!("SF_{} rateParam {} {} 1.0\n", p.name, card.bin, p.name));
        }
    }
    for card in cards {
        out.push_str(&format!("{} autoMCStats 10 0 1\n", card.bin));
    }
    out
}

fn write_script(path: &Path, lines: &[String]) -> Result<(), DatacardError> {
    let mut body = String::from("#!/usr/bin/env bash\nset -e\ncd \"$(dirname \"$0\")\"\n\n");
    for l in lines {
        body.push_str(l);
        body.push('\n');
    }
    fs::write(path, body)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o755))?;
    }
    Ok(())
}

/// Write the combined card and the script that rebuilds it and its workspace.
///
/// With `channel_masks` the workspace is built with per-channel mask
/// parameters so any channel can be blinded at fit time.
pub fn combine_datacards(
    cards: &[Datacard],
    directory: &Path,
    script_name: &str,
    card_name: &str,
    workspace_name: &str,
    channel_masks: bool,
) -> Result<PathBuf, DatacardError> {
    fs::create_dir_all(directory)?;
    fs::write(directory.join(card_name), render_combined(cards))?;

    let inputs: Vec<String> = cards
        .iter()
        .map(|c| format!("{}={}", c.bin, c.card_file_name()))
        .collect();
    let mut text2workspace = format!("text2workspace.py {card_name} -o {workspace_name}");
    if channel_masks {
        text2workspace.push_str(" --channel-masks");
    }
    let script = directory.join(script_name);
    write_script(
        &script,
        &[format!("combineCards.py {} > {card_name}", inputs.join(" ")), text2workspace],
    )?;
    info!(card = card_name, workspace = workspace_name, channel_masks, "combined datacard written");
    Ok(script)
}

/// `--setParameters mask_<bin>=1,...` for the masked categories, if any.
fn mask_parameters(cards: &[Datacard], masked: &[String]) -> String {
    let params: Vec<String> = cards
        .iter()
        .filter(|c| masked.contains(&c.category))
        .map(|c| format!("mask_{}=1", c.bin))
        .collect();
    if params.is_empty() {
        String::new()
    } else {
        format!(" --setParameters {}", params.join(","))
    }
}

/// Write MultiDimFit, FitDiagnostics and impacts scripts for `workspace_name`.
///
/// `suffix` is appended to every script name; `masked` lists the categories
/// whose channels are blinded in the fits.
pub fn create_scripts(
    cards: &[Datacard],
    directory: &Path,
    workspace_name: &str,
    suffix: &str,
    masked: &[String],
) -> Result<Vec<PathBuf>, DatacardError> {
    fs::create_dir_all(directory)?;
    let stem = workspace_name.strip_suffix(".root").unwrap_or(workspace_name);
    let masks = mask_parameters(cards, masked);

    let scripts = [
        (
            format!("run_MultiDimFit{suffix}.sh"),
            vec![format!(
                "combine -M MultiDimFit -d {workspace_name} -n _{stem} --saveWorkspace --saveFitResult --robustFit 1{masks}"
            )],
        ),
        (
            format!("run_FitDiagnostics{suffix}.sh"),
            vec![format!(
                "combine -M FitDiagnostics -d {workspace_name} -n _{stem} --saveShapes --saveWithUncertainties --robustFit 1{masks}"
            )],
        ),
        (
            format!("run_impacts{suffix}.sh"),
            vec![
                format!("combineTool.py -M Impacts -d {workspace_name} -m 125 --doInitialFit --robustFit 1{masks}"),
                format!("combineTool.py -M Impacts -d {workspace_name} -m 125 --doFits --robustFit 1{masks}"),
                format!("combineTool.py -M Impacts -d {workspace_name} -m 125 -o impacts_{stem}.json"),
                format!("plotImpacts.py -i impacts_{stem}.json -o impacts_{stem}"),
            ],
        ),
    ];

    let mut written = Vec::with_capacity(scripts.len());
    for (name, lines) in &scripts {
        let path = directory.join(name);
        write_script(&path, lines)?;
        written.push(path);
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::SystematicKind;
    use std::collections::BTreeMap;

    fn card(category: &str, lumi: bool) -> Datacard {
        let processes = vec![
            DatacardProcess {
                name: "tthbb".to_string(),
                index: 0,
                rate: 1.5,
                has_rate_param: false,
            },
            DatacardProcess {
                name: "ttlf".to_string(),
                index: 1,
                rate: 20.0,
                has_rate_param: true,
            },
        ];
        let mut nuisances = vec![Nuisance {
            name: "pileup_2018".to_string(),
            kind: SystematicKind::Shape,
            values: [("ttlf".to_string(), 1.0)].into(),
        }];
        if lumi {
            nuisances.push(Nuisance {
                name: "lumi_2018".to_string(),
                kind: SystematicKind::LogNormal,
                values: [("tthbb".to_string(), 1.025), ("ttlf".to_string(), 1.025)].into(),
            });
        }
        Datacard {
            category: category.to_string(),
            bin: format!("{category}_2018"),
            variable: "x".to_string(),
            observation: 21.0,
            processes,
            nuisances,
            shapes: BTreeMap::new(),
        }
    }

    #[test]
    fn combined_card_spans_channels() {
        let text = render_combined(&[card("CR", true), card("SR", false)]);
        assert!(text.contains("imax 2"));
        assert!(text.contains("kmax 2"));
        assert!(text.contains("shapes * SR_2018 shapes_SR_2018.json"));
        let lumi = text.lines().find(|l| l.starts_with("lumi_2018 lnN")).unwrap();
        let cells: Vec<&str> = lumi.split_whitespace().skip(2).collect();
        assert_eq!(cells, vec!["1.025", "1.025", "-", "-"]);
        let pileup = text.lines().find(|l| l.starts_with("pileup_2018 shape")).unwrap();
        let cells: Vec<&str> = pileup.split_whitespace().skip(2).collect();
        assert_eq!(cells, vec!["-", "1", "-", "1"]);
        assert!(text.contains("SF_ttlf rateParam CR_2018 ttlf 1.0"));
        assert!(text.contains("SF_ttlf rateParam SR_2018 ttlf 1.0"));
    }

    #[test]
    fn masked_combination_script_uses_channel_masks() {
        let dir = tempfile::tempdir().unwrap();
        let cards = [card("CR", true), card("SR", false)];
        let script = combine_datacards(
            &cards,
            dir.path(),
            "combine_datacards_2018_mask.sh",
            "datacard_combined_2018_mask.txt",
            "workspace_2018_mask.root",
            true,
        )
        .unwrap();
        let body = fs::read_to_string(script).unwrap();
        assert!(body.contains("combineCards.py CR_2018=datacard_CR_2018.txt SR_2018=datacard_SR_2018.txt"));
        assert!(body.contains("-o workspace_2018_mask.root --channel-masks"));
        assert!(dir.path().join("datacard_combined_2018_mask.txt").exists());
    }

    #[test]
    fn fit_scripts_mask_requested_channels() {
        let dir = tempfile::tempdir().unwrap();
        let cards = [card("CR", true), card("SR", false)];
        let paths = create_scripts(&cards, dir.path(), "workspace_2018.root", "_mask", &["SR".to_string()]).unwrap();
        assert_eq!(paths.len(), 3);
        let fit = fs::read_to_string(dir.path().join("run_MultiDimFit_mask.sh")).unwrap();
        assert!(fit.contains("--setParameters mask_SR_2018=1"));
        assert!(!fit.contains("mask_CR_2018"));

        let unmasked = create_scripts(&cards, dir.path(), "workspace_2018.root", "", &[]).unwrap();
        let impacts = fs::read_to_string(&unmasked[2]).unwrap();
        assert!(impacts.contains("impacts_workspace_2018.json"));
        assert!(!impacts.contains("setParameters"));
    }
}
