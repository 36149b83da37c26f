//! Semantic Search
//!
//! Query-side entry point: embeds the query text with the same provider
//! the pipeline indexes with and asks the store for the nearest rows.

use std::sync::Arc;

use tracing::debug;

use crate::core::ai::{AiProvider, RetryPolicy};
use crate::core::config::IndexParameters;
use crate::core::store::VectorStore;
use crate::core::{PipelineError, PipelineResult};

// =============================================================================
// Search Result
// =============================================================================

/// One ranked match.
#[derive(Debug, Clone)]
pub struct SearchResult {
    /// Summary stored for the video
    pub summary: String,
    /// Converted file path
    pub path: String,
    /// Distance to the query, lower is closer
    pub distance: f32,
}

// =============================================================================
// Search Service
// =============================================================================

pub struct SearchService {
    provider: Arc<dyn AiProvider>,
    store: Arc<VectorStore>,
    policy: RetryPolicy,
    params: IndexParameters,
}

impl SearchService {
    pub fn new(
        provider: Arc<dyn AiProvider>,
        store: Arc<VectorStore>,
        policy: RetryPolicy,
        params: IndexParameters,
    ) -> Self {
        Self {
            provider,
            store,
            policy,
            params,
        }
    }

    /// Embeds `text` and returns the `k` nearest videos.
    pub async fn query(&self, text: &str, k: i64) -> PipelineResult<Vec<SearchResult>> {
        if text.trim().is_empty() {
            return Err(PipelineError::InvalidQuery(
                "query text cannot be empty".to_string(),
            ));
        }
        if k <= 0 {
            return Err(PipelineError::InvalidQuery(format!(
                "k must be positive, got {}",
                k
            )));
        }

        let provider = self.provider.clone();
        let inputs = vec![text.to_string()];
        let mut vectors = self
            .policy
            .run("query embed", || {
                let provider = provider.clone();
                let inputs = inputs.clone();
                async move { provider.embed(&inputs).await }
            })
            .await?;

        let query = vectors.pop().ok_or_else(|| {
            PipelineError::IndexingPermanent("provider returned no embedding".to_string())
        })?;

        debug!(k, "Running vector search");
        let hits = self.store.search(&query, k as usize, &self.params)?;
        Ok(hits
            .into_iter()
            .map(|hit| SearchResult {
                summary: hit.record.summary,
                path: hit.record.path,
                distance: hit.distance,
            })
            .collect())
    }
}

// =============================================================================
// Tests
// =============================================================================
