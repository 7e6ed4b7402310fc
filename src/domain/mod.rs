//! Domain types used throughout the pipeline.
//!
//! This module defines:
//!
//! - event batches, their metadata and per-source weight values (`types`)
//! - processes and scoped systematic uncertainties (`types`)
//! - the analysis configuration and its built-in preset (`analysis`)

pub mod analysis;
pub mod types;

pub use analysis::*;
pub use types::*;
