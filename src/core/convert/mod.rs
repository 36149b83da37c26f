//! Conversion Stage
//!
//! Drives the external transcoder to produce a standardized output file
//! per source item. The output path is a pure function of the source
//! path and the configured container extension, so re-runs can detect a
//! satisfied item by file existence alone and skip the external call.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tracing::{debug, warn};

use crate::core::catalog::{validate_video_file, SourceItem, CONVERTED_SUFFIX};
use crate::core::config::ConversionParams;
use crate::core::{PipelineError, PipelineResult};

// =============================================================================
// Transcoder Trait
// =============================================================================

/// External transcoder process behind a narrow interface.
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Converts `input` into `output` using the given parameters.
    ///
    /// Must honor `params.timeout_secs`; a timeout surfaces as
    /// `ConversionTimeout`, any other failure as `Conversion` with the
    /// tool's diagnostic output.
    async fn transcode(
        &self,
        input: &Path,
        output: &Path,
        params: &ConversionParams,
    ) -> PipelineResult<()>;
}

// =============================================================================
// FFmpeg Transcoder
// =============================================================================

/// FFmpeg-backed transcoder.
pub struct FfmpegTranscoder {
    ffmpeg_path: PathBuf,
}

impl FfmpegTranscoder {
    /// Uses `ffmpeg` from PATH.
    pub fn new() -> Self {
        Self {
            ffmpeg_path: PathBuf::from("ffmpeg"),
        }
    }

    /// Uses an explicit ffmpeg binary.
    pub fn with_path(ffmpeg_path: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
        }
    }

    fn build_args(input: &Path, output: &Path, params: &ConversionParams) -> Vec<String> {
        let mut args = vec![
            "-y".to_string(),
            "-i".to_string(),
            input.to_string_lossy().to_string(),
            "-c:v".to_string(),
            params.video_codec.clone(),
            "-crf".to_string(),
            params.crf.to_string(),
            "-preset".to_string(),
            params.preset.clone(),
            "-c:a".to_string(),
            params.audio_codec.clone(),
            "-b:a".to_string(),
            params.audio_bitrate.clone(),
        ];
        if params.faststart {
            args.push("-movflags".to_string());
            args.push("+faststart".to_string());
        }
        args.push(output.to_string_lossy().to_string());
        args
    }
}

impl Default for FfmpegTranscoder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn transcode(
        &self,
        input: &Path,
        output: &Path,
        params: &ConversionParams,
    ) -> PipelineResult<()> {
        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let args = Self::build_args(input, output, params);
        debug!(input = %input.display(), "Running ffmpeg {}", args.join(" "));

        let mut child = tokio::process::Command::new(&self.ffmpeg_path)
            .args(&args)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| PipelineError::Conversion {
                path: input.to_path_buf(),
                reason: format!("failed to spawn transcoder: {}", e),
            })?;

        // Drain stderr concurrently so a chatty encoder cannot stall on a
        // full pipe.
        let mut stderr_pipe = child.stderr.take();
        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            if let Some(pipe) = stderr_pipe.as_mut() {
                let _ = pipe.read_to_string(&mut buf).await;
            }
            buf
        });

        let timeout = Duration::from_secs(params.timeout_secs);
        let status = match tokio::time::timeout(timeout, child.wait()).await {
            Ok(result) => result.map_err(|e| PipelineError::Conversion {
                path: input.to_path_buf(),
                reason: format!("failed to wait for transcoder: {}", e),
            })?,
            Err(_) => {
                let _ = child.start_kill();
                let _ = child.wait().await;
                return Err(PipelineError::ConversionTimeout {
                    path: input.to_path_buf(),
                    seconds: params.timeout_secs,
                });
            }
        };

        let stderr = stderr_task.await.unwrap_or_default();

        if !status.success() {
            // ffmpeg puts the actionable diagnostic at the tail of stderr.
            let detail: String = {
                let trimmed = stderr.trim();
                let tail_start = trimmed.char_indices().rev().nth(499).map(|(i, _)| i);
                match tail_start {
                    Some(i) => trimmed[i..].to_string(),
                    None => trimmed.to_string(),
                }
            };
            return Err(PipelineError::Conversion {
                path: input.to_path_buf(),
                reason: format!("transcoder exited with {}: {}", status, detail),
            });
        }

        Ok(())
    }
}

// =============================================================================
// Conversion Result
// =============================================================================

/// Per-item outcome of the conversion stage.
#[derive(Debug)]
pub struct ConversionResult {
    /// Source video
    pub source: PathBuf,
    /// Derived output path (present even on failure)
    pub output: PathBuf,
    /// True when the output already existed and no transcode ran
    pub skipped: bool,
    /// Failure detail, if the transcoder failed or timed out
    pub error: Option<PipelineError>,
}

impl ConversionResult {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

// =============================================================================
// Conversion Stage
// =============================================================================

/// Drives the transcoder per source item.
///
/// Holds no shared mutable state; derived output paths are unique per
/// source item, so concurrent invocations for distinct items need no
/// locking.
pub struct ConversionStage {
    transcoder: Arc<dyn Transcoder>,
    params: ConversionParams,
    accepted_extensions: Vec<String>,
}

impl ConversionStage {
    pub fn new(
        transcoder: Arc<dyn Transcoder>,
        params: ConversionParams,
        accepted_extensions: Vec<String>,
    ) -> Self {
        Self {
            transcoder,
            params,
            accepted_extensions,
        }
    }

    /// Derived output path: `{stem}_converted.{ext}` next to the source.
    ///
    /// Pure function of source path and output extension. The orchestrator
    /// verifies at discovery time that no two items derive the same path.
    pub fn derived_output_path(source: &Path, output_extension: &str) -> PathBuf {
        let stem = source
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "output".to_string());
        source.with_file_name(format!("{}{}.{}", stem, CONVERTED_SUFFIX, output_extension))
    }

    /// Output path this stage would produce for `item`.
    pub fn output_path(&self, item: &SourceItem) -> PathBuf {
        Self::derived_output_path(&item.path, &self.params.output_extension)
    }

    /// Skip-on-exists predicate: true when the derived output is present.
    pub fn already_satisfied(&self, item: &SourceItem) -> bool {
        self.output_path(item).exists()
    }

    /// Converts one item, skipping the external call when the output
    /// already exists. Failures are per-item, never fatal to the run.
    pub async fn convert(&self, item: &SourceItem) -> ConversionResult {
        let output = self.output_path(item);

        if output.exists() {
            debug!(output = %output.display(), "Conversion already satisfied, skipping");
            return ConversionResult {
                source: item.path.clone(),
                output,
                skipped: true,
                error: None,
            };
        }

        // Discovery ran earlier; the source may have vanished or been
        // replaced since. Re-validate before invoking the transcoder.
        if !validate_video_file(&item.path, &self.accepted_extensions) {
            let e = PipelineError::Conversion {
                path: item.path.clone(),
                reason: "source is missing or not a supported video file".to_string(),
            };
            warn!(source = %item.path.display(), error = %e, "Conversion failed");
            return ConversionResult {
                source: item.path.clone(),
                output,
                skipped: false,
                error: Some(e),
            };
        }

        match self
            .transcoder
            .transcode(&item.path, &output, &self.params)
            .await
        {
            Ok(()) => ConversionResult {
                source: item.path.clone(),
                output,
                skipped: false,
                error: None,
            },
            Err(e) => {
                warn!(source = %item.path.display(), error = %e, "Conversion failed");
                ConversionResult {
                    source: item.path.clone(),
                    output,
                    skipped: false,
                    error: Some(e),
                }
            }
        }
    }
}

// =============================================================================
// Mock Transcoder (for testing)
// =============================================================================

/// Mock transcoder that writes a placeholder output file and counts calls.
pub struct MockTranscoder {
    calls: AtomicUsize,
    fail_matching: std::sync::Mutex<Vec<String>>,
}

impl MockTranscoder {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail_matching: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Fails any input whose path contains `fragment`.
    pub fn fail_for(self, fragment: &str) -> Self {
        self.fail_matching
            .lock()
            .unwrap()
            .push(fragment.to_string());
        self
    }

    /// Number of transcode invocations so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for MockTranscoder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transcoder for MockTranscoder {
    async fn transcode(
        &self,
        input: &Path,
        output: &Path,
        _params: &ConversionParams,
    ) -> PipelineResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let input_str = input.to_string_lossy().to_string();
        let should_fail = self
            .fail_matching
            .lock()
            .unwrap()
            .iter()
            .any(|f| input_str.contains(f));
        if should_fail {
            return Err(PipelineError::Conversion {
                path: input.to_path_buf(),
                reason: "mock transcoder failure".to_string(),
            });
        }

        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(output, b"converted").await?;
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
