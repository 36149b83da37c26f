//! End-to-end pipeline tests over mock transcoder and provider.

use std::path::Path;
use std::sync::Arc;

use tempfile::TempDir;

use reelindex::core::ai::MockAiProvider;
use reelindex::core::config::{RunConfig, SourceSpec};
use reelindex::core::convert::MockTranscoder;
use reelindex::core::pipeline::{CancelToken, Orchestrator, Stage};
use reelindex::core::store::VectorStore;
use reelindex::core::PipelineError;

fn write_video(dir: &Path, name: &str) {
    std::fs::write(dir.join(name), b"raw video bytes").unwrap();
}

fn config_for(root: &Path, db: &Path, workers: usize) -> RunConfig {
    let mut config = RunConfig {
        sources: vec![SourceSpec::local(root)],
        parallel_workers: workers,
        db_path: db.to_path_buf(),
        ..Default::default()
    };
    config.ai.retry.base_delay_ms = 1;
    config.ai.retry.jitter = false;
    config.index.lists = 4;
    config
}

fn orchestrator(
    config: &RunConfig,
    transcoder: Arc<MockTranscoder>,
    provider: Arc<MockAiProvider>,
    store: Arc<VectorStore>,
) -> Orchestrator {
    Orchestrator::new(config.clone(), transcoder, provider, store)
}

#[tokio::test]
async fn full_run_processes_every_item() {
    let videos = TempDir::new().unwrap();
    let db = TempDir::new().unwrap();
    write_video(videos.path(), "alpha.avi");
    write_video(videos.path(), "bravo.mpg");
    write_video(videos.path(), "charlie.mov");

    let config = config_for(videos.path(), &db.path().join("test.db"), 2);
    let transcoder = Arc::new(MockTranscoder::new());
    let provider = Arc::new(MockAiProvider::new());
    let store = Arc::new(VectorStore::open(&config.db_path, config.index.dimension).unwrap());

    let summary = orchestrator(&config, transcoder.clone(), provider.clone(), store.clone())
        .run(CancelToken::new())
        .await
        .unwrap();

    assert_eq!(summary.discovered, 3);
    assert_eq!(summary.converted, 3);
    assert_eq!(summary.persisted, 3);
    assert!(summary.is_clean());
    assert!(summary.index_decision.is_some());

    assert_eq!(transcoder.calls(), 3);
    assert_eq!(store.row_count().unwrap(), 3);
    assert!(videos.path().join("alpha_converted.mp4").exists());
    assert!(store
        .contains(
            &videos
                .path()
                .join("alpha_converted.mp4")
                .to_string_lossy()
                .to_string()
        )
        .unwrap());
}

#[tokio::test]
async fn second_run_is_a_no_op() {
    let videos = TempDir::new().unwrap();
    let db = TempDir::new().unwrap();
    write_video(videos.path(), "alpha.avi");
    write_video(videos.path(), "bravo.avi");

    let config = config_for(videos.path(), &db.path().join("test.db"), 2);
    let transcoder = Arc::new(MockTranscoder::new());
    let provider = Arc::new(MockAiProvider::new());
    let store = Arc::new(VectorStore::open(&config.db_path, config.index.dimension).unwrap());

    orchestrator(&config, transcoder.clone(), provider.clone(), store.clone())
        .run(CancelToken::new())
        .await
        .unwrap();
    assert_eq!(transcoder.calls(), 2);
    assert_eq!(provider.summarize_calls(), 2);

    // Everything is already converted and stored; the second run must
    // touch neither the transcoder nor the provider.
    let summary = orchestrator(&config, transcoder.clone(), provider.clone(), store.clone())
        .run(CancelToken::new())
        .await
        .unwrap();

    assert_eq!(summary.skipped, 2);
    assert_eq!(summary.converted, 0);
    assert_eq!(summary.persisted, 0);
    assert_eq!(transcoder.calls(), 2);
    assert_eq!(provider.summarize_calls(), 2);
    assert_eq!(provider.embed_calls(), 2);
}

#[tokio::test]
async fn one_bad_item_does_not_stop_the_run() {
    let videos = TempDir::new().unwrap();
    let db = TempDir::new().unwrap();
    write_video(videos.path(), "good_one.avi");
    write_video(videos.path(), "doomed.avi");
    write_video(videos.path(), "good_two.avi");

    let config = config_for(videos.path(), &db.path().join("test.db"), 2);
    let transcoder = Arc::new(MockTranscoder::new());
    let provider = Arc::new(MockAiProvider::new());
    // The transient failure is retried within the item; the permanent
    // one on the second attempt fails the item for this run.
    provider.script_summarize_failures(
        "doomed",
        vec![
            PipelineError::IndexingTransient("503".to_string()),
            PipelineError::IndexingPermanent("content rejected".to_string()),
        ],
    );
    let store = Arc::new(VectorStore::open(&config.db_path, config.index.dimension).unwrap());

    let summary = orchestrator(&config, transcoder.clone(), provider.clone(), store.clone())
        .run(CancelToken::new())
        .await
        .unwrap();

    assert_eq!(summary.persisted, 2);
    assert_eq!(summary.indexed(), 2);
    assert_eq!(summary.failures.len(), 1);
    assert_eq!(summary.failed_at(Stage::Indexing), 1);
    assert_eq!(store.row_count().unwrap(), 2);

    // The failed item's conversion output survived, so the next run
    // only redoes its indexing.
    let summary = orchestrator(&config, transcoder.clone(), provider.clone(), store.clone())
        .run(CancelToken::new())
        .await
        .unwrap();

    assert_eq!(summary.skipped, 2);
    assert_eq!(summary.persisted, 1);
    assert!(summary.is_clean());
    assert_eq!(transcoder.calls(), 3);
    assert_eq!(store.row_count().unwrap(), 3);
}

#[tokio::test]
async fn transient_failures_are_absorbed_by_retries() {
    let videos = TempDir::new().unwrap();
    let db = TempDir::new().unwrap();
    write_video(videos.path(), "flaky.avi");

    let config = config_for(videos.path(), &db.path().join("test.db"), 1);
    let transcoder = Arc::new(MockTranscoder::new());
    let provider = Arc::new(MockAiProvider::new());
    provider.script_summarize_failures(
        "flaky",
        vec![
            PipelineError::IndexingTransient("timeout".to_string()),
            PipelineError::IndexingTransient("502".to_string()),
        ],
    );
    let store = Arc::new(VectorStore::open(&config.db_path, config.index.dimension).unwrap());

    let summary = orchestrator(&config, transcoder, provider.clone(), store)
        .run(CancelToken::new())
        .await
        .unwrap();

    assert_eq!(summary.persisted, 1);
    assert!(summary.is_clean());
    assert_eq!(provider.summarize_calls(), 3);
}

#[tokio::test]
async fn worker_count_does_not_change_the_result() {
    let videos = TempDir::new().unwrap();
    let names: Vec<String> = (0..10).map(|i| format!("clip{:02}", i)).collect();
    for name in &names {
        write_video(videos.path(), &format!("{}.avi", name));
    }

    let mut stores = Vec::new();
    for workers in [1usize, 4] {
        let db = TempDir::new().unwrap();
        // Remove converted outputs left by the previous iteration so both
        // runs do the full pipeline.
        for entry in std::fs::read_dir(videos.path()).unwrap() {
            let path = entry.unwrap().path();
            if path.to_string_lossy().contains("_converted") {
                std::fs::remove_file(path).unwrap();
            }
        }

        let config = config_for(videos.path(), &db.path().join("test.db"), workers);
        let store = Arc::new(VectorStore::open(&config.db_path, config.index.dimension).unwrap());
        let summary = orchestrator(
            &config,
            Arc::new(MockTranscoder::new()),
            Arc::new(MockAiProvider::new()),
            store.clone(),
        )
        .run(CancelToken::new())
        .await
        .unwrap();

        assert_eq!(summary.persisted, 10);
        stores.push((store, db));
    }

    let (single, _d1) = &stores[0];
    let (parallel, _d2) = &stores[1];
    assert_eq!(single.row_count().unwrap(), parallel.row_count().unwrap());
    for name in &names {
        let key = videos
            .path()
            .join(format!("{}_converted.mp4", name))
            .to_string_lossy()
            .to_string();
        let a = single.get(&key).unwrap().unwrap();
        let b = parallel.get(&key).unwrap().unwrap();
        assert_eq!(a, b);
    }
}

#[tokio::test]
async fn cancellation_stops_admission() {
    let videos = TempDir::new().unwrap();
    let db = TempDir::new().unwrap();
    write_video(videos.path(), "one.avi");
    write_video(videos.path(), "two.avi");

    let config = config_for(videos.path(), &db.path().join("test.db"), 1);
    let transcoder = Arc::new(MockTranscoder::new());
    let store = Arc::new(VectorStore::open(&config.db_path, config.index.dimension).unwrap());

    let cancel = CancelToken::new();
    cancel.cancel();

    let summary = orchestrator(
        &config,
        transcoder.clone(),
        Arc::new(MockAiProvider::new()),
        store.clone(),
    )
    .run(cancel)
    .await
    .unwrap();

    assert_eq!(summary.cancelled, 2);
    assert_eq!(summary.persisted, 0);
    assert_eq!(transcoder.calls(), 0);
    assert_eq!(store.row_count().unwrap(), 0);
}

#[tokio::test]
async fn colliding_output_paths_fail_both_items() {
    let videos = TempDir::new().unwrap();
    let db = TempDir::new().unwrap();
    // Same stem, different container: both would derive clip_converted.mp4.
    write_video(videos.path(), "clip.avi");
    write_video(videos.path(), "clip.mov");
    write_video(videos.path(), "fine.avi");

    let config = config_for(videos.path(), &db.path().join("test.db"), 2);
    let store = Arc::new(VectorStore::open(&config.db_path, config.index.dimension).unwrap());

    let summary = orchestrator(
        &config,
        Arc::new(MockTranscoder::new()),
        Arc::new(MockAiProvider::new()),
        store.clone(),
    )
    .run(CancelToken::new())
    .await
    .unwrap();

    assert_eq!(summary.failed_at(Stage::Discovery), 2);
    assert_eq!(summary.persisted, 1);
    assert_eq!(store.row_count().unwrap(), 1);
}
