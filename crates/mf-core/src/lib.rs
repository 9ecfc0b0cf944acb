//! mf-core: shared types, IDs, errors, and configuration.
//!
//! This crate is the foundational dependency for all other mf-* crates,
//! providing the typed job identifier, the unified error taxonomy, the
//! rendition data model, and application configuration.

pub mod config;
pub mod error;
pub mod ids;
pub mod media;

// Re-export the most commonly used items at the crate root.
pub use error::{Error, Result};
pub use ids::*;
pub use media::*;
