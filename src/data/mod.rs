//! Input data sources.
//!
//! - deterministic synthetic event batches and correction tables (`synthetic`)

pub mod synthetic;
