//! Core Pipeline Modules
//!
//! Everything the binary wires together: source discovery, conversion,
//! AI indexing, the vector store, the run orchestrator and the search
//! service.

pub mod ai;
pub mod catalog;
pub mod config;
pub mod convert;
pub mod error;
pub mod indexing;
pub mod pipeline;
pub mod search;
pub mod store;

pub use self::error::{PipelineError, PipelineResult};
