//! AI Integration
//!
//! Provider abstraction for summarizing transcripts and embedding text,
//! an OpenAI implementation, and the retry policy that wraps provider
//! calls.

pub mod openai;
pub mod provider;
pub mod retry;

pub use self::openai::OpenAiProvider;
pub use self::provider::{AiProvider, MockAiProvider};
pub use self::retry::RetryPolicy;
