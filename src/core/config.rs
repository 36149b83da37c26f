//! Run Configuration
//!
//! Immutable configuration for one pipeline run, loaded from a JSON file.
//! Every field has a serde default so a partial config file is valid.
//! The configuration is passed explicitly through every stage; there is
//! no ambient/global config lookup.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::{PipelineError, PipelineResult};

// =============================================================================
// Source Specification
// =============================================================================

/// Kind of location a video source enumerates.
///
/// Closed set on purpose: each tag has exactly one discovery handler.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    /// A directory tree on the local filesystem
    LocalFilesystem,
    /// A remote share mounted into the local filesystem
    MountedRemote,
}

impl std::fmt::Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceType::LocalFilesystem => write!(f, "local_filesystem"),
            SourceType::MountedRemote => write!(f, "mounted_remote"),
        }
    }
}

/// One configured video source: a root to walk plus extension filters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceSpec {
    /// Root directory to enumerate
    pub root: PathBuf,
    /// Source kind tag
    #[serde(default = "default_source_type")]
    pub source_type: SourceType,
    /// Accepted file extensions, matched case-insensitively (no leading dot)
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    /// Paths under the root to skip entirely
    #[serde(default)]
    pub exclude: Vec<PathBuf>,
}

fn default_source_type() -> SourceType {
    SourceType::LocalFilesystem
}

fn default_extensions() -> Vec<String> {
    crate::core::catalog::SUPPORTED_EXTENSIONS
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl SourceSpec {
    /// Creates a local-filesystem source with the default extension set.
    pub fn local(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            source_type: SourceType::LocalFilesystem,
            extensions: default_extensions(),
            exclude: Vec::new(),
        }
    }
}

// =============================================================================
// Conversion Parameters
// =============================================================================

/// Encoder settings for the external transcoder.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionParams {
    /// Video codec (e.g. "libx264", "libx265")
    #[serde(default = "default_video_codec")]
    pub video_codec: String,
    /// CRF value for quality-based encoding (0-51, lower is better)
    #[serde(default = "default_crf")]
    pub crf: u8,
    /// Encoder preset (ultrafast..slow)
    #[serde(default = "default_preset")]
    pub preset: String,
    /// Audio codec (e.g. "aac")
    #[serde(default = "default_audio_codec")]
    pub audio_codec: String,
    /// Audio bitrate (e.g. "128k")
    #[serde(default = "default_audio_bitrate")]
    pub audio_bitrate: String,
    /// Move the moov atom to the front of the container for streaming
    #[serde(default = "default_true")]
    pub faststart: bool,
    /// Container extension for derived outputs (no leading dot)
    #[serde(default = "default_output_extension")]
    pub output_extension: String,
    /// Per-file transcode timeout in seconds
    #[serde(default = "default_conversion_timeout")]
    pub timeout_secs: u64,
}

fn default_video_codec() -> String {
    "libx264".to_string()
}
fn default_crf() -> u8 {
    23
}
fn default_preset() -> String {
    "fast".to_string()
}
fn default_audio_codec() -> String {
    "aac".to_string()
}
fn default_audio_bitrate() -> String {
    "128k".to_string()
}
fn default_output_extension() -> String {
    "mp4".to_string()
}
fn default_conversion_timeout() -> u64 {
    600
}
fn default_true() -> bool {
    true
}

impl Default for ConversionParams {
    fn default() -> Self {
        Self {
            video_codec: default_video_codec(),
            crf: default_crf(),
            preset: default_preset(),
            audio_codec: default_audio_codec(),
            audio_bitrate: default_audio_bitrate(),
            faststart: true,
            output_extension: default_output_extension(),
            timeout_secs: default_conversion_timeout(),
        }
    }
}

// =============================================================================
// Retry Policy Configuration
// =============================================================================

/// Settings for the indexing-stage retry policy.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryConfig {
    /// Maximum attempts per provider call (first call included)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Base delay for exponential backoff, in milliseconds
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Add random jitter to each delay
    #[serde(default = "default_true")]
    pub jitter: bool,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    1000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            jitter: true,
        }
    }
}

// =============================================================================
// AI Provider Configuration
// =============================================================================

/// Settings for the external summarization/embedding provider.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiProviderConfig {
    /// API key; falls back to the OPENAI_API_KEY environment variable
    #[serde(default)]
    pub api_key: Option<String>,
    /// Base URL for custom/compatible endpoints
    #[serde(default)]
    pub base_url: Option<String>,
    /// Chat model used for summaries
    #[serde(default = "default_model")]
    pub model: String,
    /// Embedding model
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    /// System prompt for summarization
    #[serde(default = "default_system_prompt")]
    pub system: String,
    /// Instructions prepended to each transcript
    #[serde(default = "default_instructions")]
    pub instructions: String,
    /// Request timeout in seconds
    #[serde(default = "default_ai_timeout")]
    pub timeout_secs: u64,
    /// Maximum texts submitted per embedding request
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Retry policy for transient provider failures
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}
fn default_system_prompt() -> String {
    "You are an assistant that writes concise, searchable summaries of video transcripts."
        .to_string()
}
fn default_instructions() -> String {
    "Summarize the following video transcript in a few sentences, \
     focusing on the topics, people and events it covers."
        .to_string()
}
fn default_ai_timeout() -> u64 {
    60
}
fn default_batch_size() -> usize {
    10
}

impl Default for AiProviderConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: None,
            model: default_model(),
            embedding_model: default_embedding_model(),
            system: default_system_prompt(),
            instructions: default_instructions(),
            timeout_secs: default_ai_timeout(),
            batch_size: default_batch_size(),
            retry: RetryConfig::default(),
        }
    }
}

// =============================================================================
// Transcription Parameters
// =============================================================================

/// Settings for the speech-to-text sidecar generator.
///
/// When enabled, videos without an `.srt` sidecar get one produced by
/// an external transcriber before summarization; when disabled, the
/// indexing stage falls back to filename-derived text.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptionConfig {
    /// Generate transcripts for videos without a sidecar
    #[serde(default)]
    pub enabled: bool,
    /// Speech-to-text executable
    #[serde(default = "default_whisper_path")]
    pub whisper_path: String,
    /// Model name passed to the transcriber
    #[serde(default = "default_whisper_model")]
    pub model: String,
    /// Per-file transcription timeout in seconds
    #[serde(default = "default_transcription_timeout")]
    pub timeout_secs: u64,
}

fn default_whisper_path() -> String {
    "whisper".to_string()
}
fn default_whisper_model() -> String {
    "base".to_string()
}
fn default_transcription_timeout() -> u64 {
    600
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            whisper_path: default_whisper_path(),
            model: default_whisper_model(),
            timeout_secs: default_transcription_timeout(),
        }
    }
}

// =============================================================================
// Index Parameters
// =============================================================================

/// Distance metric used to rank embeddings.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    /// 1 - cosine similarity
    Cosine,
    /// L2 distance
    Euclidean,
    /// Negative inner product (larger dot product ranks first)
    InnerProduct,
}

impl std::fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DistanceMetric::Cosine => write!(f, "cosine"),
            DistanceMetric::Euclidean => write!(f, "euclidean"),
            DistanceMetric::InnerProduct => write!(f, "inner_product"),
        }
    }
}

impl std::str::FromStr for DistanceMetric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "cosine" => Ok(DistanceMetric::Cosine),
            "euclidean" | "l2" => Ok(DistanceMetric::Euclidean),
            "inner_product" | "ip" => Ok(DistanceMetric::InnerProduct),
            _ => Err(format!("Unknown distance metric: {}", s)),
        }
    }
}

/// Configuration of the approximate-nearest-neighbor index.
///
/// The index present in storage must match `metric`, `lists` and
/// `dimension`, or every ensure/search call fails with `IndexStale`
/// until `rebuild` is set. Rebuilds are explicit and operator-triggered,
/// never automatic.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexParameters {
    /// Distance metric
    #[serde(default = "default_metric")]
    pub metric: DistanceMetric,
    /// ANN partition ("list") count
    #[serde(default = "default_lists")]
    pub lists: u32,
    /// Embedding dimension; every stored row must have exactly this length
    #[serde(default = "default_dimension")]
    pub dimension: usize,
    /// Rebuild the index even when parameters drifted (operator flag)
    #[serde(default)]
    pub rebuild: bool,
    /// Build without holding the store lock for the whole build
    #[serde(default)]
    pub concurrent_build: bool,
}

fn default_metric() -> DistanceMetric {
    DistanceMetric::Cosine
}
fn default_lists() -> u32 {
    100
}
fn default_dimension() -> usize {
    384
}

impl Default for IndexParameters {
    fn default() -> Self {
        Self {
            metric: default_metric(),
            lists: default_lists(),
            dimension: default_dimension(),
            rebuild: false,
            concurrent_build: false,
        }
    }
}

impl IndexParameters {
    /// Compact "metric/lists/dimension" description for logs and errors.
    pub fn describe(&self) -> String {
        format!("{}/{}/{}", self.metric, self.lists, self.dimension)
    }
}

// =============================================================================
// Run Configuration
// =============================================================================

/// Complete configuration for one pipeline run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunConfig {
    /// Video sources to enumerate
    #[serde(default)]
    pub sources: Vec<SourceSpec>,
    /// Transcoder settings
    #[serde(default)]
    pub conversion: ConversionParams,
    /// AI provider settings
    #[serde(default)]
    pub ai: AiProviderConfig,
    /// Transcript sidecar generation
    #[serde(default)]
    pub transcription: TranscriptionConfig,
    /// Vector index settings
    #[serde(default)]
    pub index: IndexParameters,
    /// Worker pool size for per-item processing
    #[serde(default = "default_parallel_workers")]
    pub parallel_workers: usize,
    /// Path of the durable store
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
}

fn default_parallel_workers() -> usize {
    num_cpus::get().max(1)
}

fn default_db_path() -> PathBuf {
    PathBuf::from("reelindex.db")
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            sources: Vec::new(),
            conversion: ConversionParams::default(),
            ai: AiProviderConfig::default(),
            transcription: TranscriptionConfig::default(),
            index: IndexParameters::default(),
            parallel_workers: default_parallel_workers(),
            db_path: default_db_path(),
        }
    }
}

impl RunConfig {
    /// Loads a configuration from a JSON file.
    pub fn load(path: &Path) -> PipelineResult<Self> {
        let text = fs::read_to_string(path).map_err(|e| {
            PipelineError::Config(format!("Cannot read config {}: {}", path.display(), e))
        })?;
        let config: RunConfig = serde_json::from_str(&text).map_err(|e| {
            PipelineError::Config(format!("Invalid config {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Checks settings that would otherwise fail deep inside a run.
    pub fn validate(&self) -> PipelineResult<()> {
        if self.parallel_workers == 0 {
            return Err(PipelineError::Config(
                "parallelWorkers must be at least 1".to_string(),
            ));
        }
        if self.index.lists == 0 {
            return Err(PipelineError::Config(
                "index.lists must be at least 1".to_string(),
            ));
        }
        if self.index.dimension == 0 {
            return Err(PipelineError::Config(
                "index.dimension must be at least 1".to_string(),
            ));
        }
        for spec in &self.sources {
            if spec.extensions.is_empty() {
                return Err(PipelineError::Config(format!(
                    "Source {} has an empty extension list",
                    spec.root.display()
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RunConfig::default();
        assert_eq!(config.conversion.video_codec, "libx264");
        assert_eq!(config.conversion.crf, 23);
        assert_eq!(config.index.metric, DistanceMetric::Cosine);
        assert_eq!(config.index.dimension, 384);
        assert!(!config.index.rebuild);
        assert!(config.parallel_workers >= 1);
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let json = r#"{
            "sources": [{"root": "/videos"}],
            "parallelWorkers": 2
        }"#;
        let config: RunConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.parallel_workers, 2);
        assert_eq!(config.sources.len(), 1);
        assert_eq!(config.sources[0].source_type, SourceType::LocalFilesystem);
        assert!(!config.sources[0].extensions.is_empty());
        assert_eq!(config.ai.model, "gpt-4o-mini");
    }

    #[test]
    fn test_validate_rejects_zero_workers() {
        let config = RunConfig {
            parallel_workers: 0,
            ..RunConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_metric_parsing() {
        assert_eq!(
            "cosine".parse::<DistanceMetric>().unwrap(),
            DistanceMetric::Cosine
        );
        assert_eq!(
            "l2".parse::<DistanceMetric>().unwrap(),
            DistanceMetric::Euclidean
        );
        assert_eq!(
            "inner_product".parse::<DistanceMetric>().unwrap(),
            DistanceMetric::InnerProduct
        );
        assert!("manhattan".parse::<DistanceMetric>().is_err());
    }

    #[test]
    fn test_index_parameters_describe() {
        let params = IndexParameters::default();
        assert_eq!(params.describe(), "cosine/100/384");
    }

    #[test]
    fn test_load_missing_file_is_config_error() {
        let err = RunConfig::load(Path::new("/nonexistent/reelindex.json")).unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }
}
