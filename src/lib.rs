//! `hepcard` library crate.
//!
//! The binary (`hepcard`) is a thin wrapper around this library so that:
//!
//! - the weight, template and datacard logic is testable without spawning processes
//! - modules are reusable from other drivers (batch systems, notebooks, etc.)
//! - code stays easy to navigate as the analysis grows

pub mod app;
pub mod cli;
pub mod corrections;
pub mod data;
pub mod datacard;
pub mod domain;
pub mod error;
pub mod histo;
pub mod io;
pub mod report;
pub mod systematics;
pub mod weights;
