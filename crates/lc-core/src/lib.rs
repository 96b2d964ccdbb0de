//! lc-core: shared types, IDs, errors, configuration, and the log event bus.
//!
//! This crate is the foundational dependency for the other lc-* crates,
//! providing type-safe run identifiers, a unified error type, application
//! configuration, and the bounded log ring that feeds SSE subscribers.

pub mod config;
pub mod error;
pub mod events;
pub mod ids;

// Re-export the most commonly used items at the crate root.
pub use error::{Error, Result};
pub use ids::*;
