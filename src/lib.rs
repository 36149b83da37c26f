//! reelindex
//!
//! Batch pipeline that turns directories of raw video into a searchable
//! semantic index: discover files, convert them to a standard format
//! with ffmpeg, summarize and embed each one through an AI provider,
//! and persist the vectors in a SQLite store with an IVF list index
//! for approximate nearest-neighbor search.

pub mod core;

pub use crate::core::ai::{AiProvider, MockAiProvider, OpenAiProvider, RetryPolicy};
pub use crate::core::catalog::SourceCatalog;
pub use crate::core::config::RunConfig;
pub use crate::core::convert::{ConversionStage, FfmpegTranscoder, MockTranscoder, Transcoder};
pub use crate::core::pipeline::{CancelToken, Orchestrator, RunSummary};
pub use crate::core::search::SearchService;
pub use crate::core::store::VectorStore;
pub use crate::core::{PipelineError, PipelineResult};
