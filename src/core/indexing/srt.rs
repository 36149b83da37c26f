//! SRT Transcript Parsing
//!
//! Minimal SubRip reader: strips sequence numbers and timestamp lines,
//! keeping only the spoken text.

use std::path::Path;

/// Extracts the spoken text from SRT content.
pub fn parse_srt(content: &str) -> String {
    let mut lines = Vec::new();
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        // Cue index lines are bare integers; timing lines carry the arrow.
        if trimmed.parse::<u64>().is_ok() || trimmed.contains("-->") {
            continue;
        }
        lines.push(trimmed);
    }
    lines.join(" ")
}

/// Loads the transcript sidecar for a video, if one exists.
///
/// Looks for `{stem}.srt` next to the video file.
pub fn load_sidecar_text(video: &Path) -> Option<String> {
    let sidecar = video.with_extension("srt");
    let content = std::fs::read_to_string(&sidecar).ok()?;
    let text = parse_srt(&content);
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
1
00:00:01,000 --> 00:00:04,000
Welcome back to the channel.

2
00:00:04,500 --> 00:00:08,000
Today we look at the highlights
from the second half.
";

    #[test]
    fn test_parse_strips_indices_and_timings() {
        let text = parse_srt(SAMPLE);
        assert_eq!(
            text,
            "Welcome back to the channel. Today we look at the highlights from the second half."
        );
    }

    #[test]
    fn test_parse_empty_content() {
        assert_eq!(parse_srt(""), "");
        assert_eq!(parse_srt("1\n00:00:01,000 --> 00:00:02,000\n"), "");
    }

    #[test]
    fn test_load_sidecar_text() {
        let dir = tempfile::TempDir::new().unwrap();
        let video = dir.path().join("match.mp4");
        std::fs::write(dir.path().join("match.srt"), SAMPLE).unwrap();

        let text = load_sidecar_text(&video).unwrap();
        assert!(text.starts_with("Welcome back"));

        let missing = dir.path().join("other.mp4");
        assert!(load_sidecar_text(&missing).is_none());
    }
}
