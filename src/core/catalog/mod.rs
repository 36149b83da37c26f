//! Source Catalog
//!
//! Enumerates candidate video files across configured sources. Discovery
//! is deterministic: items are ordered by source-type tag, then by
//! lexicographic path, so repeated runs process files in the same order.
//! An unreachable source yields a per-source error and never aborts
//! enumeration of the remaining sources.

use std::path::Path;

use chrono::{DateTime, Utc};
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::core::config::{SourceSpec, SourceType};
use crate::core::{PipelineError, PipelineResult};

/// Default extension set for video files.
pub const SUPPORTED_EXTENSIONS: &[&str] = &["mpg", "mp4", "avi", "mov", "mkv"];

/// Stem suffix marking files produced by the conversion stage. Outputs
/// land next to their sources, so discovery must recognize and skip
/// them or a second run would re-ingest the pipeline's own output.
pub const CONVERTED_SUFFIX: &str = "_converted";

/// True for files the conversion stage produced.
pub fn is_derived_output(path: &Path) -> bool {
    path.file_stem()
        .and_then(|s| s.to_str())
        .is_some_and(|s| s.ends_with(CONVERTED_SUFFIX))
}

// =============================================================================
// Source Item
// =============================================================================

/// One discoverable unit of work. Recreated every run; never persisted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceItem {
    /// Absolute (or root-relative) path of the source video
    pub path: std::path::PathBuf,
    /// Which source kind produced this item
    pub source_type: SourceType,
    /// When discovery saw the file
    pub discovered_at: DateTime<Utc>,
}

/// Result of enumerating all configured sources.
///
/// `errors` holds one `Discovery` error per unreachable source; items
/// from the remaining sources are still present.
#[derive(Debug, Default)]
pub struct DiscoveryReport {
    pub items: Vec<SourceItem>,
    pub errors: Vec<PipelineError>,
}

// =============================================================================
// Source Catalog
// =============================================================================

/// Stateless enumerator over configured sources.
pub struct SourceCatalog;

impl SourceCatalog {
    /// Enumerates every configured source.
    ///
    /// Items are sorted by (source type, path) for a stable, restartable
    /// sequence. Excluded paths and non-matching extensions are skipped.
    pub fn discover(sources: &[SourceSpec]) -> DiscoveryReport {
        let mut report = DiscoveryReport::default();

        for spec in sources {
            match Self::discover_source(spec) {
                Ok(mut items) => {
                    debug!(
                        root = %spec.root.display(),
                        count = items.len(),
                        "Scanned source"
                    );
                    report.items.append(&mut items);
                }
                Err(e) => {
                    warn!(root = %spec.root.display(), error = %e, "Source unreachable");
                    report.errors.push(e);
                }
            }
        }

        report
            .items
            .sort_by(|a, b| (a.source_type, &a.path).cmp(&(b.source_type, &b.path)));
        report
    }

    fn discover_source(spec: &SourceSpec) -> PipelineResult<Vec<SourceItem>> {
        if !spec.root.is_dir() {
            return Err(PipelineError::Discovery {
                root: spec.root.clone(),
                reason: "not a directory or not reachable".to_string(),
            });
        }

        let matcher = extension_matcher(&spec.extensions)?;
        let discovered_at = Utc::now();
        let mut items = Vec::new();

        for entry in WalkDir::new(&spec.root).follow_links(false) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    // Unreadable subtree: skip it, the rest of the source
                    // still enumerates.
                    warn!(root = %spec.root.display(), error = %e, "Skipping unreadable entry");
                    continue;
                }
            };

            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            if spec.exclude.iter().any(|ex| path.starts_with(ex)) {
                continue;
            }
            if is_derived_output(path) {
                continue;
            }
            let Some(name) = path.file_name() else {
                continue;
            };
            if matcher.is_match(Path::new(name)) {
                items.push(SourceItem {
                    path: path.to_path_buf(),
                    source_type: spec.source_type,
                    discovered_at,
                });
            }
        }

        Ok(items)
    }
}

/// Returns true when the file exists and carries a supported extension.
pub fn validate_video_file(path: &Path, extensions: &[String]) -> bool {
    if !path.is_file() {
        return false;
    }
    let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
        return false;
    };
    extensions.iter().any(|e| e.eq_ignore_ascii_case(ext))
}

fn extension_matcher(extensions: &[String]) -> PipelineResult<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for ext in extensions {
        let glob = GlobBuilder::new(&format!("*.{}", ext))
            .case_insensitive(true)
            .build()
            .map_err(|e| PipelineError::Config(format!("Bad extension pattern {}: {}", ext, e)))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| PipelineError::Config(format!("Cannot build extension matcher: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::SourceSpec;
    use tempfile::TempDir;

    fn touch(dir: &Path, name: &str) -> std::path::PathBuf {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&path, b"x").unwrap();
        path
    }

    #[test]
    fn test_discover_filters_by_extension_case_insensitive() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "a.mp4");
        touch(dir.path(), "b.MOV");
        touch(dir.path(), "notes.txt");

        let report = SourceCatalog::discover(&[SourceSpec::local(dir.path())]);
        assert!(report.errors.is_empty());
        let names: Vec<_> = report
            .items
            .iter()
            .map(|i| i.path.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.mp4", "b.MOV"]);
    }

    #[test]
    fn test_discover_recursive_and_ordered() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "z/late.mp4");
        touch(dir.path(), "a/early.mp4");

        let report = SourceCatalog::discover(&[SourceSpec::local(dir.path())]);
        let paths: Vec<_> = report.items.iter().map(|i| i.path.clone()).collect();
        let mut sorted = paths.clone();
        sorted.sort();
        assert_eq!(paths, sorted);
        assert_eq!(paths.len(), 2);
    }

    #[test]
    fn test_discover_skips_derived_outputs() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "match.avi");
        touch(dir.path(), "match_converted.mp4");

        let report = SourceCatalog::discover(&[SourceSpec::local(dir.path())]);
        assert_eq!(report.items.len(), 1);
        assert!(report.items[0].path.ends_with("match.avi"));
    }

    #[test]
    fn test_discover_skips_excluded_paths() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "keep.mp4");
        touch(dir.path(), "skip/drop.mp4");

        let mut spec = SourceSpec::local(dir.path());
        spec.exclude = vec![dir.path().join("skip")];

        let report = SourceCatalog::discover(&[spec]);
        assert_eq!(report.items.len(), 1);
        assert!(report.items[0].path.ends_with("keep.mp4"));
    }

    #[test]
    fn test_unreachable_source_is_nonfatal() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "ok.mp4");

        let specs = vec![
            SourceSpec::local("/definitely/not/a/real/root"),
            SourceSpec::local(dir.path()),
        ];
        let report = SourceCatalog::discover(&specs);
        assert_eq!(report.errors.len(), 1);
        assert!(matches!(report.errors[0], PipelineError::Discovery { .. }));
        assert_eq!(report.items.len(), 1);
    }

    #[test]
    fn test_source_type_orders_before_path() {
        let dir_a = TempDir::new().unwrap();
        let dir_b = TempDir::new().unwrap();
        touch(dir_a.path(), "zzz.mp4");
        touch(dir_b.path(), "aaa.mp4");

        let mut remote = SourceSpec::local(dir_b.path());
        remote.source_type = SourceType::MountedRemote;
        let specs = vec![remote, SourceSpec::local(dir_a.path())];

        let report = SourceCatalog::discover(&specs);
        assert_eq!(report.items[0].source_type, SourceType::LocalFilesystem);
        assert_eq!(report.items[1].source_type, SourceType::MountedRemote);
    }

    #[test]
    fn test_validate_video_file() {
        let dir = TempDir::new().unwrap();
        let good = touch(dir.path(), "clip.mkv");
        let bad = touch(dir.path(), "clip.txt");
        let exts: Vec<String> = SUPPORTED_EXTENSIONS.iter().map(|s| s.to_string()).collect();

        assert!(validate_video_file(&good, &exts));
        assert!(!validate_video_file(&bad, &exts));
        assert!(!validate_video_file(Path::new("/missing/clip.mp4"), &exts));
    }
}
