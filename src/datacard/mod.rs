//! Datacard assembly.
//!
//! - per-category cards, shapes and text rendering (`card`)
//! - multi-category combination and fit scripts (`combine`)

pub mod card;
pub mod combine;

pub use card::*;
pub use combine::*;

use crate::domain::{AnalysisConfig, SystematicUncertainty};
use crate::error::DatacardError;
use crate::histo::TemplateSet;

/// Build one card per configured category, in category order.
pub fn build_datacards(
    templates: &TemplateSet,
    config: &AnalysisConfig,
    systematics: &[SystematicUncertainty],
) -> Result<Vec<Datacard>, DatacardError> {
    config
        .categories
        .keys()
        .map(|category| Datacard::build(category, templates, config, systematics))
        .collect()
}
