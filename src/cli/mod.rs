//! Command-line parsing for the datacard builder.
//!
//! The goal of this module is to keep **argument parsing** and **command dispatch**
//! separate from the weight, histogram and datacard code.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(name = "hepcard", version, about = "Event weights, systematics expansion and datacards")]
pub struct Cli {
    /// Log level (error, warn, info, debug, trace).
    #[arg(long, global = true, default_value_t = tracing::Level::WARN)]
    pub log_level: tracing::Level,

    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Build per-category datacards, the combined card and fit scripts.
    Datacards(DatacardArgs),
    /// Compute event weights and fill histogram templates.
    Fill(FillArgs),
    /// Print the expanded systematic uncertainties.
    Systematics(SystematicsArgs),
}

#[derive(Debug, Parser, Clone)]
pub struct DatacardArgs {
    /// Templates JSON produced by `hepcard fill`.
    #[arg(short = 'i', long, value_name = "JSON")]
    pub input: PathBuf,

    /// Output directory for cards, shapes and scripts.
    #[arg(short = 'o', long, default_value = "datacards")]
    pub output: PathBuf,

    /// Analysis configuration JSON (defaults to the built-in 2018 preset).
    #[arg(long, value_name = "JSON")]
    pub config: Option<PathBuf>,

    /// Also build the combination with channel masks.
    #[arg(long = "channel_masks")]
    pub channel_masks: bool,

    /// Export per-category yields to CSV.
    #[arg(long, value_name = "CSV")]
    pub yields: Option<PathBuf>,
}

#[derive(Debug, Parser, Clone)]
pub struct FillArgs {
    /// Events JSON (array of chunks or `{ "chunks": [...] }`).
    #[arg(long, value_name = "JSON", required_unless_present = "synthetic")]
    pub events: Option<PathBuf>,

    /// Output templates JSON.
    #[arg(short = 'o', long, default_value = "templates.json")]
    pub output: PathBuf,

    /// Analysis configuration JSON (defaults to the built-in 2018 preset).
    #[arg(long, value_name = "JSON")]
    pub config: Option<PathBuf>,

    /// Correction catalog directory (falls back to `HEPCARD_CORRECTIONS`).
    #[arg(long, value_name = "DIR")]
    pub corrections: Option<PathBuf>,

    /// Generate this many synthetic events per chunk instead of reading `--events`.
    #[arg(long, value_name = "N", conflicts_with = "events")]
    pub synthetic: Option<usize>,

    /// Random seed for synthetic generation.
    #[arg(long, default_value_t = 42)]
    pub seed: u64,
}

#[derive(Debug, Parser, Clone)]
pub struct SystematicsArgs {
    /// Analysis configuration JSON (defaults to the built-in 2018 preset).
    #[arg(long, value_name = "JSON")]
    pub config: Option<PathBuf>,

    /// Export the expanded list to JSON.
    #[arg(long, value_name = "JSON")]
    pub export: Option<PathBuf>,
}
