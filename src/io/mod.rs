//! Input/output helpers.
//!
//! - event-chunk JSON ingest (`ingest`)
//! - template JSON read/write (`templates`)
//! - yields CSV and systematics JSON exports (`export`)

pub mod export;
pub mod ingest;
pub mod templates;

pub use export::*;
pub use ingest::*;
pub use templates::*;
