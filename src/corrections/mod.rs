//! Correction-table lookup service.
//!
//! - binned tables and the evaluation trait (`table`)
//! - the `(year, name)` keyed cache (`store`)

pub mod store;
pub mod table;

pub use store::*;
pub use table::*;
