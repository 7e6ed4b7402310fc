//! Histogram templates.
//!
//! - binned weighted histograms (`hist`)
//! - keyed template collections and their merge (`templates`)
//! - parallel filling from weighted event chunks (`fill`)

pub mod fill;
pub mod hist;
pub mod templates;

pub use fill::*;
pub use hist::*;
pub use templates::*;
