//! AI Provider Trait
//!
//! Narrow interface over the external model service: one call to
//! summarize transcript text, one call to embed a batch of texts.
//! Implementations classify their failures as transient (retryable)
//! or permanent via the error taxonomy.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::core::{PipelineError, PipelineResult};

// =============================================================================
// Provider Trait
// =============================================================================

/// Model service behind summarize/embed calls.
#[async_trait]
pub trait AiProvider: Send + Sync {
    /// Provider name for logging
    fn name(&self) -> &str;

    /// Produces a short semantic summary of the given transcript text.
    async fn summarize(&self, transcript: &str) -> PipelineResult<String>;

    /// Embeds each text into a fixed-dimension vector, preserving order.
    async fn embed(&self, texts: &[String]) -> PipelineResult<Vec<Vec<f32>>>;
}

// =============================================================================
// Mock Provider (for testing)
// =============================================================================

/// Mock provider with scripted failures and deterministic embeddings.
///
/// Failure scripts are keyed by input substring and consumed in order,
/// so a test can express "fail transiently twice, then succeed" for a
/// single item while the rest of the batch proceeds normally.
pub struct MockAiProvider {
    dimension: usize,
    summarize_calls: AtomicUsize,
    embed_calls: AtomicUsize,
    summarize_failures: Mutex<HashMap<String, VecDeque<PipelineError>>>,
    embed_failures: Mutex<HashMap<String, VecDeque<PipelineError>>>,
}

impl MockAiProvider {
    pub fn new() -> Self {
        Self::with_dimension(384)
    }

    pub fn with_dimension(dimension: usize) -> Self {
        Self {
            dimension,
            summarize_calls: AtomicUsize::new(0),
            embed_calls: AtomicUsize::new(0),
            summarize_failures: Mutex::new(HashMap::new()),
            embed_failures: Mutex::new(HashMap::new()),
        }
    }

    /// Queues errors for summarize calls whose input contains `fragment`.
    pub fn script_summarize_failures(&self, fragment: &str, errors: Vec<PipelineError>) {
        self.summarize_failures
            .lock()
            .unwrap()
            .entry(fragment.to_string())
            .or_default()
            .extend(errors);
    }

    /// Queues errors for embed calls whose input contains `fragment`.
    pub fn script_embed_failures(&self, fragment: &str, errors: Vec<PipelineError>) {
        self.embed_failures
            .lock()
            .unwrap()
            .entry(fragment.to_string())
            .or_default()
            .extend(errors);
    }

    pub fn summarize_calls(&self) -> usize {
        self.summarize_calls.load(Ordering::SeqCst)
    }

    pub fn embed_calls(&self) -> usize {
        self.embed_calls.load(Ordering::SeqCst)
    }

    fn pop_scripted(
        failures: &Mutex<HashMap<String, VecDeque<PipelineError>>>,
        input: &str,
    ) -> Option<PipelineError> {
        let mut map = failures.lock().unwrap();
        for (fragment, queue) in map.iter_mut() {
            if input.contains(fragment.as_str()) {
                if let Some(err) = queue.pop_front() {
                    return Some(err);
                }
            }
        }
        None
    }

    /// Deterministic unit-norm-ish vector derived from the text bytes.
    /// Distinct texts map to distinct vectors, equal texts collide, which
    /// is exactly what ranking tests need.
    pub fn embedding_for(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        for (i, byte) in text.bytes().enumerate() {
            vector[i % self.dimension] += byte as f32 / 255.0;
        }
        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in vector.iter_mut() {
                *v /= norm;
            }
        }
        vector
    }
}

impl Default for MockAiProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AiProvider for MockAiProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn summarize(&self, transcript: &str) -> PipelineResult<String> {
        self.summarize_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = Self::pop_scripted(&self.summarize_failures, transcript) {
            return Err(err);
        }
        Ok(format!("summary of: {}", transcript))
    }

    async fn embed(&self, texts: &[String]) -> PipelineResult<Vec<Vec<f32>>> {
        self.embed_calls.fetch_add(1, Ordering::SeqCst);
        for text in texts {
            if let Some(err) = Self::pop_scripted(&self.embed_failures, text) {
                return Err(err);
            }
        }
        Ok(texts.iter().map(|t| self.embedding_for(t)).collect())
    }
}

// =============================================================================
// Tests
// =============================================================================
