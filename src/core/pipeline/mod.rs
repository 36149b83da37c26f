//! Pipeline Orchestrator
//!
//! Drives discovery, conversion, indexing and persistence over a
//! bounded worker pool. Failures are isolated per item: one bad video
//! never stops the run, it is reported in the summary and retried on
//! the next invocation because its row never reached the store.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::core::ai::{AiProvider, RetryPolicy};
use crate::core::catalog::{SourceCatalog, SourceItem};
use crate::core::config::RunConfig;
use crate::core::convert::{ConversionStage, Transcoder};
use crate::core::indexing::{IndexingStage, Transcriber, WhisperTranscriber};
use crate::core::store::{IndexDecision, VectorStore, VideoRecord};
use crate::core::PipelineResult;

// =============================================================================
// Stages and Outcomes
// =============================================================================

/// Pipeline stage, used to attribute per-item failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Discovery,
    Conversion,
    Indexing,
    Persistence,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Discovery => write!(f, "discovery"),
            Stage::Conversion => write!(f, "conversion"),
            Stage::Indexing => write!(f, "indexing"),
            Stage::Persistence => write!(f, "persistence"),
        }
    }
}

/// One item's failure, attributed to the stage that produced it.
#[derive(Debug, Clone)]
pub struct ItemFailure {
    pub source: PathBuf,
    pub stage: Stage,
    pub reason: String,
}

#[derive(Debug)]
enum ItemOutcome {
    /// Both conversion and indexing were already satisfied
    Skipped,
    /// Item reached the store this run
    Completed { converted: bool },
    /// Admission was refused because the run was cancelled
    Cancelled,
    Failed(ItemFailure),
}

// =============================================================================
// Run Summary
// =============================================================================

/// Aggregated result of one pipeline run.
#[derive(Debug, Default)]
pub struct RunSummary {
    /// Items found by discovery
    pub discovered: usize,
    /// Items where both stages were already satisfied
    pub skipped: usize,
    /// Items that went through the transcoder this run
    pub converted: usize,
    /// Items whose row reached the store this run
    pub persisted: usize,
    /// Items refused admission after cancellation
    pub cancelled: usize,
    /// Per-item failures, attributed to a stage
    pub failures: Vec<ItemFailure>,
    /// Non-fatal discovery problems (unreachable sources)
    pub discovery_errors: Vec<String>,
    /// What happened to the search index at the end of the run
    pub index_decision: Option<IndexDecision>,
}

impl RunSummary {
    pub fn failed_at(&self, stage: Stage) -> usize {
        self.failures.iter().filter(|f| f.stage == stage).count()
    }

    /// Items that produced summary and embedding this run. A row that
    /// failed only at persistence still counts as indexed.
    pub fn indexed(&self) -> usize {
        self.persisted + self.failed_at(Stage::Persistence)
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && self.discovery_errors.is_empty()
    }
}

// =============================================================================
// Cancellation
// =============================================================================

/// Cooperative cancellation flag shared between the run loop and a
/// signal handler. Cancellation stops admitting new items; items
/// already in flight run to completion so the store never sees a
/// half-written item.
#[derive(Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

// =============================================================================
// Orchestrator
// =============================================================================

/// Owns the stages and fans items out over a bounded worker pool.
pub struct Orchestrator {
    config: RunConfig,
    conversion: Arc<ConversionStage>,
    indexing: Arc<IndexingStage>,
    store: Arc<VectorStore>,
}

impl Orchestrator {
    pub fn new(
        config: RunConfig,
        transcoder: Arc<dyn Transcoder>,
        provider: Arc<dyn AiProvider>,
        store: Arc<VectorStore>,
    ) -> Self {
        let mut accepted_extensions: Vec<String> = config
            .sources
            .iter()
            .flat_map(|s| s.extensions.iter().cloned())
            .collect();
        accepted_extensions.sort();
        accepted_extensions.dedup();

        let conversion = Arc::new(ConversionStage::new(
            transcoder,
            config.conversion.clone(),
            accepted_extensions,
        ));
        let transcriber: Option<Arc<dyn Transcriber>> = if config.transcription.enabled {
            Some(Arc::new(WhisperTranscriber::new(&config.transcription)))
        } else {
            None
        };
        let indexing = Arc::new(IndexingStage::new(
            provider,
            RetryPolicy::from(&config.ai.retry),
            config.index.dimension,
            transcriber,
        ));
        Self {
            config,
            conversion,
            indexing,
            store,
        }
    }

    /// Runs the full pipeline once.
    pub async fn run(&self, cancel: CancelToken) -> PipelineResult<RunSummary> {
        let report = SourceCatalog::discover(&self.config.sources);
        let mut summary = RunSummary {
            discovered: report.items.len(),
            discovery_errors: report.errors.iter().map(|e| e.to_string()).collect(),
            ..Default::default()
        };

        info!(
            items = report.items.len(),
            errors = report.errors.len(),
            "Discovery complete"
        );

        let (items, collisions) = self.split_output_collisions(report.items);
        summary.failures.extend(collisions);

        let semaphore = Arc::new(Semaphore::new(self.config.parallel_workers));
        let mut handles = Vec::with_capacity(items.len());

        for item in items {
            let permit = semaphore.clone().acquire_owned().await.map_err(|e| {
                crate::core::PipelineError::Store(format!("worker pool closed: {}", e))
            })?;

            if cancel.is_cancelled() {
                drop(permit);
                summary.cancelled += 1;
                continue;
            }

            let conversion = self.conversion.clone();
            let indexing = self.indexing.clone();
            let store = self.store.clone();

            handles.push(tokio::spawn(async move {
                let outcome = process_item(&conversion, &indexing, &store, &item).await;
                drop(permit);
                outcome
            }));
        }

        for handle in handles {
            match handle.await {
                Ok(ItemOutcome::Skipped) => summary.skipped += 1,
                Ok(ItemOutcome::Completed { converted }) => {
                    if converted {
                        summary.converted += 1;
                    }
                    summary.persisted += 1;
                }
                Ok(ItemOutcome::Cancelled) => summary.cancelled += 1,
                Ok(ItemOutcome::Failed(failure)) => {
                    warn!(
                        source = %failure.source.display(),
                        stage = %failure.stage,
                        "Item failed: {}", failure.reason
                    );
                    summary.failures.push(failure);
                }
                Err(e) => {
                    summary.failures.push(ItemFailure {
                        source: PathBuf::new(),
                        stage: Stage::Indexing,
                        reason: format!("worker panicked: {}", e),
                    });
                }
            }
        }

        if !cancel.is_cancelled() {
            summary.index_decision = Some(self.store.ensure_index(&self.config.index)?);
        }

        info!(
            discovered = summary.discovered,
            skipped = summary.skipped,
            converted = summary.converted,
            persisted = summary.persisted,
            failed = summary.failures.len(),
            cancelled = summary.cancelled,
            "Run complete"
        );

        Ok(summary)
    }

    /// Derived output paths are the row keys, so two sources that derive
    /// the same output would silently overwrite each other. Fail every
    /// item in a colliding group instead of picking a winner.
    fn split_output_collisions(
        &self,
        items: Vec<SourceItem>,
    ) -> (Vec<SourceItem>, Vec<ItemFailure>) {
        let mut by_output: HashMap<PathBuf, usize> = HashMap::new();
        for item in &items {
            *by_output.entry(self.conversion.output_path(item)).or_insert(0) += 1;
        }

        let mut kept = Vec::with_capacity(items.len());
        let mut failures = Vec::new();
        for item in items {
            let output = self.conversion.output_path(&item);
            if by_output[&output] > 1 {
                failures.push(ItemFailure {
                    source: item.path,
                    stage: Stage::Discovery,
                    reason: format!(
                        "derived output path {} collides with another source",
                        output.display()
                    ),
                });
            } else {
                kept.push(item);
            }
        }
        (kept, failures)
    }
}

async fn process_item(
    conversion: &ConversionStage,
    indexing: &IndexingStage,
    store: &VectorStore,
    item: &SourceItem,
) -> ItemOutcome {
    let result = conversion.convert(item).await;
    if let Some(error) = result.error {
        return ItemOutcome::Failed(ItemFailure {
            source: item.path.clone(),
            stage: Stage::Conversion,
            reason: error.to_string(),
        });
    }

    let output_key = result.output.to_string_lossy().to_string();
    match store.contains(&output_key) {
        Ok(true) => {
            // Already in the store; with the conversion also skipped the
            // item cost nothing this run.
            return if result.skipped {
                ItemOutcome::Skipped
            } else {
                ItemOutcome::Completed { converted: true }
            };
        }
        Ok(false) => {}
        Err(e) => {
            return ItemOutcome::Failed(ItemFailure {
                source: item.path.clone(),
                stage: Stage::Persistence,
                reason: e.to_string(),
            })
        }
    }

    let content = match indexing.index(&result.output).await {
        Ok(content) => content,
        Err(e) => {
            return ItemOutcome::Failed(ItemFailure {
                source: item.path.clone(),
                stage: Stage::Indexing,
                reason: e.to_string(),
            })
        }
    };

    let record = VideoRecord {
        path: output_key,
        summary: content.summary,
        embedding: content.embedding,
    };
    if let Err(e) = store.put(&record) {
        return ItemOutcome::Failed(ItemFailure {
            source: item.path.clone(),
            stage: Stage::Persistence,
            reason: e.to_string(),
        });
    }

    ItemOutcome::Completed {
        converted: !result.skipped,
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_token_is_shared() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn test_run_summary_failure_attribution() {
        let mut summary = RunSummary::default();
        summary.failures.push(ItemFailure {
            source: PathBuf::from("/v/a.avi"),
            stage: Stage::Indexing,
            reason: "boom".to_string(),
        });
        summary.failures.push(ItemFailure {
            source: PathBuf::from("/v/b.avi"),
            stage: Stage::Conversion,
            reason: "boom".to_string(),
        });

        assert_eq!(summary.failed_at(Stage::Indexing), 1);
        assert_eq!(summary.failed_at(Stage::Conversion), 1);
        assert_eq!(summary.failed_at(Stage::Persistence), 0);
        assert!(!summary.is_clean());
    }
}
