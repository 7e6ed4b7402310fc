//! Top-level application orchestration.
//!
//! `src/main.rs` is intentionally tiny; this module is the "real main" that:
//! - loads `.env` and parses CLI arguments
//! - initializes logging
//! - runs the fill / datacards / systematics workflows
//! - prints reports and writes optional exports

use clap::Parser;
use tracing::Level;

use crate::cli::{Command, DatacardArgs, FillArgs, SystematicsArgs};
use crate::domain::AnalysisConfig;
use crate::error::AppError;

pub mod pipeline;

const SUBCOMMANDS: [&str; 3] = ["datacards", "fill", "systematics"];

/// Entry point for the `hepcard` binary.
pub fn run() -> Result<(), AppError> {
    let _ = dotenvy::dotenv();

    // `hepcard --input templates.json ...` behaves like `hepcard datacards ...`.
    let argv = rewrite_args(std::env::args().collect());
    let cli = crate::cli::Cli::parse_from(argv);
    init_logging(cli.log_level);

    match cli.command {
        Command::Datacards(args) => handle_datacards(args),
        Command::Fill(args) => handle_fill(args),
        Command::Systematics(args) => handle_systematics(args),
    }
}

fn init_logging(level: Level) {
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn handle_datacards(args: DatacardArgs) -> Result<(), AppError> {
    let config = AnalysisConfig::load(args.config.as_deref())?;
    let templates = crate::io::read_templates_json(&args.input)?;
    let run = pipeline::run_datacards(&config, &templates, &args.output, args.channel_masks)?;

    println!(
        "{}",
        crate::report::format_yields(&crate::report::yield_table(&run.cards))
    );
    for path in &run.written {
        println!("wrote {}", path.display());
    }

    if let Some(path) = &args.yields {
        crate::io::write_yields_csv(path, &run.cards)?;
    }
    Ok(())
}

fn handle_fill(args: FillArgs) -> Result<(), AppError> {
    let config = AnalysisConfig::load(args.config.as_deref())?;
    let source = match (args.synthetic, args.events) {
        (Some(events_per_chunk), _) => pipeline::EventSource::Synthetic {
            events_per_chunk,
            seed: args.seed,
        },
        (None, Some(path)) => pipeline::EventSource::File(path),
        (None, None) => return Err(AppError::new(2, "Either --events or --synthetic is required.")),
    };

    let run = pipeline::run_fill(&config, &source, args.corrections.as_deref())?;
    let events = run.events;
    let chunks = run.chunks;
    let file = crate::io::TemplateFile::new(&config.label, &config.years, run.templates);
    crate::io::write_templates_json(&args.output, &file)?;

    println!(
        "{}",
        crate::report::format_fill_summary(&config.label, chunks, events, file.templates.len())
    );
    Ok(())
}

fn handle_systematics(args: SystematicsArgs) -> Result<(), AppError> {
    let config = AnalysisConfig::load(args.config.as_deref())?;
    let entries = crate::systematics::expand(&config.systematics, &config.processes, &config.years)?;

    println!(
        "{}",
        crate::report::format_systematics_summary(&crate::report::summarize_systematics(&entries))
    );
    if let Some(path) = &args.export {
        crate::io::write_systematics_json(path, &entries)?;
    }
    Ok(())
}

/// Rewrite argv so a bare flag list defaults to `hepcard datacards`.
///
/// Rules:
/// - `hepcard --input T ...`              -> `hepcard datacards --input T ...`
/// - `hepcard --log-level debug --input T` -> `hepcard --log-level debug datacards --input T`
/// - `hepcard --help/--version/-h`         -> unchanged (show top-level help/version)
/// - `hepcard <subcommand> ...`            -> unchanged
fn rewrite_args(mut argv: Vec<String>) -> Vec<String> {
    let mut idx = 1;
    while let Some(arg) = argv.get(idx) {
        if arg == "--log-level" {
            idx += 2;
        } else if arg.starts_with("--log-level=") {
            idx += 1;
        } else {
            break;
        }
    }

    let Some(arg) = argv.get(idx) else {
        return argv;
    };

    let is_top_level_help_or_version = matches!(
        arg.as_str(),
        "-h" | "--help" | "-V" | "--version" | "help"
    );
    if is_top_level_help_or_version || SUBCOMMANDS.contains(&arg.as_str()) {
        return argv;
    }

    // If the first token is a flag, treat it as "datacards flags".
    if arg.starts_with('-') {
        argv.insert(idx, "datacards".to_string());
    }
    argv
}
