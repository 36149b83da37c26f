//! Transcription
//!
//! Produces an `.srt` transcript sidecar for a video via an external
//! speech-to-text tool: extract mono 16 kHz audio with ffmpeg, then
//! drive the transcriber subprocess over the wav. The sidecar lands
//! next to the video, so each file is transcribed at most once across
//! runs.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tracing::debug;

use crate::core::config::TranscriptionConfig;
use crate::core::{PipelineError, PipelineResult};

// =============================================================================
// Transcriber Trait
// =============================================================================

/// Speech-to-text tool behind a narrow interface.
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Writes an SRT transcript for `video` at `output`.
    async fn transcribe(&self, video: &Path, output: &Path) -> PipelineResult<()>;
}

// =============================================================================
// Whisper Transcriber
// =============================================================================

/// Whisper-CLI-backed transcriber.
pub struct WhisperTranscriber {
    ffmpeg_path: PathBuf,
    whisper_path: PathBuf,
    model: String,
    timeout_secs: u64,
}

impl WhisperTranscriber {
    /// Uses `ffmpeg` and the configured whisper executable from PATH.
    pub fn new(config: &TranscriptionConfig) -> Self {
        Self {
            ffmpeg_path: PathBuf::from("ffmpeg"),
            whisper_path: PathBuf::from(&config.whisper_path),
            model: config.model.clone(),
            timeout_secs: config.timeout_secs,
        }
    }

    fn extract_audio_args(video: &Path, wav: &Path) -> Vec<String> {
        vec![
            "-y".to_string(),
            "-i".to_string(),
            video.to_string_lossy().to_string(),
            "-vn".to_string(),
            "-acodec".to_string(),
            "pcm_s16le".to_string(),
            "-ar".to_string(),
            "16000".to_string(),
            "-ac".to_string(),
            "1".to_string(),
            wav.to_string_lossy().to_string(),
        ]
    }

    fn whisper_args(&self, wav: &Path, out_dir: &Path) -> Vec<String> {
        vec![
            wav.to_string_lossy().to_string(),
            "--model".to_string(),
            self.model.clone(),
            "--output_format".to_string(),
            "srt".to_string(),
            "--output_dir".to_string(),
            out_dir.to_string_lossy().to_string(),
        ]
    }

    async fn run_tool(&self, program: &Path, args: &[String], video: &Path) -> PipelineResult<()> {
        let name = program.to_string_lossy().to_string();
        debug!(video = %video.display(), "Running {} {}", name, args.join(" "));

        let mut child = tokio::process::Command::new(program)
            .args(args)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| PipelineError::Transcription {
                path: video.to_path_buf(),
                reason: format!("failed to spawn {}: {}", name, e),
            })?;

        let mut stderr_pipe = child.stderr.take();
        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            if let Some(pipe) = stderr_pipe.as_mut() {
                let _ = pipe.read_to_string(&mut buf).await;
            }
            buf
        });

        let timeout = Duration::from_secs(self.timeout_secs);
        let status = match tokio::time::timeout(timeout, child.wait()).await {
            Ok(result) => result.map_err(|e| PipelineError::Transcription {
                path: video.to_path_buf(),
                reason: format!("failed to wait for {}: {}", name, e),
            })?,
            Err(_) => {
                let _ = child.start_kill();
                let _ = child.wait().await;
                return Err(PipelineError::Transcription {
                    path: video.to_path_buf(),
                    reason: format!("{} timed out after {}s", name, self.timeout_secs),
                });
            }
        };

        let stderr = stderr_task.await.unwrap_or_default();
        if !status.success() {
            return Err(PipelineError::Transcription {
                path: video.to_path_buf(),
                reason: format!("{} exited with {}: {}", name, status, stderr.trim()),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Transcriber for WhisperTranscriber {
    async fn transcribe(&self, video: &Path, output: &Path) -> PipelineResult<()> {
        let wav = video.with_extension("wav");
        let args = Self::extract_audio_args(video, &wav);
        self.run_tool(&self.ffmpeg_path, &args, video).await?;

        // whisper names its output after the wav stem, which matches the
        // requested sidecar path because both derive from the video stem.
        let out_dir = output.parent().unwrap_or_else(|| Path::new("."));
        let args = self.whisper_args(&wav, out_dir);
        let result = self.run_tool(&self.whisper_path, &args, video).await;
        let _ = tokio::fs::remove_file(&wav).await;
        result?;

        if !output.is_file() {
            return Err(PipelineError::Transcription {
                path: video.to_path_buf(),
                reason: "transcriber produced no transcript file".to_string(),
            });
        }
        Ok(())
    }
}

// =============================================================================
// Mock Transcriber (for testing)
// =============================================================================

/// Mock transcriber that writes a one-cue SRT file and counts calls.
pub struct MockTranscriber {
    line: String,
    fail: bool,
    calls: AtomicUsize,
}

impl MockTranscriber {
    pub fn new(line: &str) -> Self {
        Self {
            line: line.to_string(),
            fail: false,
            calls: AtomicUsize::new(0),
        }
    }

    /// Fails every transcription attempt.
    pub fn failing() -> Self {
        Self {
            line: String::new(),
            fail: true,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transcriber for MockTranscriber {
    async fn transcribe(&self, video: &Path, output: &Path) -> PipelineResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(PipelineError::Transcription {
                path: video.to_path_buf(),
                reason: "mock transcriber failure".to_string(),
            });
        }
        let content = format!("1\n00:00:00,000 --> 00:00:05,000\n{}\n", self.line);
        tokio::fs::write(output, content).await?;
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
