//! Indexing Stage
//!
//! Turns a converted video into a summary and an embedding vector.
//! Provider calls go through the retry policy; a summary that comes
//! back empty is treated as a permanent failure so the item is not
//! retried pointlessly, and every embedding is checked against the
//! configured dimension before it can reach the store.

pub mod srt;
pub mod transcribe;

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::core::ai::{AiProvider, RetryPolicy};
use crate::core::{PipelineError, PipelineResult};

pub use self::transcribe::{MockTranscriber, Transcriber, WhisperTranscriber};

// =============================================================================
// Indexed Content
// =============================================================================

/// Output of the indexing stage for one item.
#[derive(Debug, Clone)]
pub struct IndexedContent {
    /// Semantic summary of the video
    pub summary: String,
    /// Embedding of the summary
    pub embedding: Vec<f32>,
}

// =============================================================================
// Indexing Stage
// =============================================================================

/// Summarize-then-embed stage.
pub struct IndexingStage {
    provider: Arc<dyn AiProvider>,
    policy: RetryPolicy,
    dimension: usize,
    transcriber: Option<Arc<dyn Transcriber>>,
}

impl IndexingStage {
    pub fn new(
        provider: Arc<dyn AiProvider>,
        policy: RetryPolicy,
        dimension: usize,
        transcriber: Option<Arc<dyn Transcriber>>,
    ) -> Self {
        Self {
            provider,
            policy,
            dimension,
            transcriber,
        }
    }

    /// Text fed to the summarizer: the transcript sidecar when present,
    /// transcribed on demand when a transcriber is configured, otherwise
    /// the filename stem as a last-resort description.
    pub async fn content_text(&self, video: &Path) -> String {
        if let Some(text) = srt::load_sidecar_text(video) {
            return text;
        }
        if let Some(transcriber) = &self.transcriber {
            let sidecar = video.with_extension("srt");
            match transcriber.transcribe(video, &sidecar).await {
                Ok(()) => {
                    if let Some(text) = srt::load_sidecar_text(video) {
                        return text;
                    }
                }
                Err(e) => {
                    warn!(video = %video.display(), "Transcription failed, falling back to filename: {}", e);
                }
            }
        }
        video
            .file_stem()
            .map(|s| s.to_string_lossy().replace(['_', '-'], " "))
            .unwrap_or_default()
    }

    /// Produces summary and embedding for one converted video.
    pub async fn index(&self, video: &Path) -> PipelineResult<IndexedContent> {
        let text = self.content_text(video).await;
        debug!(video = %video.display(), provider = self.provider.name(), "Indexing content");

        let provider = self.provider.clone();
        let summary = self
            .policy
            .run("summarize", || {
                let provider = provider.clone();
                let text = text.clone();
                async move { provider.summarize(&text).await }
            })
            .await?;

        if summary.trim().is_empty() {
            return Err(PipelineError::IndexingPermanent(
                "provider returned an empty summary".to_string(),
            ));
        }

        let provider = self.provider.clone();
        let inputs = vec![summary.clone()];
        let mut vectors = self
            .policy
            .run("embed", || {
                let provider = provider.clone();
                let inputs = inputs.clone();
                async move { provider.embed(&inputs).await }
            })
            .await?;

        let embedding = vectors.pop().ok_or_else(|| {
            PipelineError::IndexingPermanent("provider returned no embedding".to_string())
        })?;

        if embedding.len() != self.dimension {
            return Err(PipelineError::DimensionMismatch {
                expected: self.dimension,
                actual: embedding.len(),
            });
        }

        Ok(IndexedContent { summary, embedding })
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ai::MockAiProvider;
    use std::time::Duration;
    use tempfile::TempDir;

    fn stage(provider: Arc<MockAiProvider>) -> IndexingStage {
        IndexingStage::new(
            provider,
            RetryPolicy::new(3, Duration::from_millis(1)),
            384,
            None,
        )
    }

    #[tokio::test]
    async fn test_index_uses_sidecar_transcript() {
        let dir = TempDir::new().unwrap();
        let video = dir.path().join("derby_converted.mp4");
        std::fs::write(&video, b"x").unwrap();
        std::fs::write(
            dir.path().join("derby_converted.srt"),
            "1\n00:00:00,000 --> 00:00:02,000\nA stunning free kick\n",
        )
        .unwrap();

        let provider = Arc::new(MockAiProvider::new());
        let content = stage(provider).index(&video).await.unwrap();
        assert!(content.summary.contains("A stunning free kick"));
        assert_eq!(content.embedding.len(), 384);
    }

    #[tokio::test]
    async fn test_index_falls_back_to_filename() {
        let dir = TempDir::new().unwrap();
        let video = dir.path().join("cup_final_converted.mp4");
        std::fs::write(&video, b"x").unwrap();

        let provider = Arc::new(MockAiProvider::new());
        let content = stage(provider).index(&video).await.unwrap();
        assert!(content.summary.contains("cup final converted"));
    }

    #[tokio::test]
    async fn test_transcribes_once_then_reuses_sidecar() {
        let dir = TempDir::new().unwrap();
        let video = dir.path().join("semifinal_converted.mp4");
        std::fs::write(&video, b"x").unwrap();

        let transcriber = Arc::new(MockTranscriber::new("a late winner from the bench"));
        let provider = Arc::new(MockAiProvider::new());
        let stage = IndexingStage::new(
            provider,
            RetryPolicy::new(3, Duration::from_millis(1)),
            384,
            Some(transcriber.clone()),
        );

        let content = stage.index(&video).await.unwrap();
        assert!(content.summary.contains("a late winner from the bench"));

        // The sidecar written by the first run is reused.
        stage.index(&video).await.unwrap();
        assert_eq!(transcriber.calls(), 1);
    }

    #[tokio::test]
    async fn test_transcription_failure_falls_back_to_filename() {
        let dir = TempDir::new().unwrap();
        let video = dir.path().join("quarter_final_converted.mp4");
        std::fs::write(&video, b"x").unwrap();

        let transcriber = Arc::new(MockTranscriber::failing());
        let provider = Arc::new(MockAiProvider::new());
        let stage = IndexingStage::new(
            provider,
            RetryPolicy::new(3, Duration::from_millis(1)),
            384,
            Some(transcriber.clone()),
        );

        let content = stage.index(&video).await.unwrap();
        assert!(content.summary.contains("quarter final converted"));
        assert_eq!(transcriber.calls(), 1);
    }

    #[tokio::test]
    async fn test_transient_summarize_failure_is_retried() {
        let dir = TempDir::new().unwrap();
        let video = dir.path().join("flaky_converted.mp4");
        std::fs::write(&video, b"x").unwrap();

        let provider = Arc::new(MockAiProvider::new());
        provider.script_summarize_failures(
            "flaky",
            vec![
                PipelineError::IndexingTransient("503".to_string()),
                PipelineError::IndexingTransient("timeout".to_string()),
            ],
        );

        let content = stage(provider.clone()).index(&video).await.unwrap();
        assert!(!content.summary.is_empty());
        assert_eq!(provider.summarize_calls(), 3);
        assert_eq!(provider.embed_calls(), 1);
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let dir = TempDir::new().unwrap();
        let video = dir.path().join("rejected_converted.mp4");
        std::fs::write(&video, b"x").unwrap();

        let provider = Arc::new(MockAiProvider::new());
        provider.script_summarize_failures(
            "rejected",
            vec![PipelineError::IndexingPermanent("filtered".to_string())],
        );

        let result = stage(provider.clone()).index(&video).await;
        assert!(matches!(result, Err(PipelineError::IndexingPermanent(_))));
        assert_eq!(provider.summarize_calls(), 1);
        assert_eq!(provider.embed_calls(), 0);
    }

    #[tokio::test]
    async fn test_wrong_dimension_is_rejected() {
        let dir = TempDir::new().unwrap();
        let video = dir.path().join("clip_converted.mp4");
        std::fs::write(&video, b"x").unwrap();

        let provider = Arc::new(MockAiProvider::with_dimension(16));
        let stage = IndexingStage::new(
            provider,
            RetryPolicy::new(1, Duration::from_millis(1)),
            384,
            None,
        );

        let result = stage.index(&video).await;
        assert!(matches!(
            result,
            Err(PipelineError::DimensionMismatch {
                expected: 384,
                actual: 16
            })
        ));
    }
}
