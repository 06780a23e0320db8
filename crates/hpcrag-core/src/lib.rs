//! # hpcrag-core
//!
//! Core types, traits, and abstractions for hpcrag.
//!
//! This crate provides the job record model, the error taxonomy, shared
//! defaults, filename metadata extraction, and the collaborator traits
//! (remote transport, vector store, graph store) the other crates build on.

pub mod defaults;
pub mod error;
pub mod metadata;
pub mod models;
pub mod traits;

// Re-export commonly used types at crate root
pub use error::{Error, Result, SubmissionError};
pub use metadata::extract_from_filename;
pub use models::*;
pub use traits::*;
