//! Video processing capability
//!
//! Container probing is not compiled in; results carry file facts and a
//! placeholder metadata block.

use crate::traits::{file_info, Processor};
use filepipe_foundation::{Result, TaskKind};
use serde_json::json;
use std::path::Path;
use tracing::debug;

const SUPPORTED_FORMATS: &[&str] = &[".mp4", ".avi", ".mov", ".mkv", ".webm"];

/// Default size cap: 500 MB
const MAX_FILE_SIZE: u64 = 1024 * 1024 * 500;

pub struct VideoProcessor {
    max_file_size: u64,
}

impl VideoProcessor {
    pub fn new() -> Self {
        Self {
            max_file_size: MAX_FILE_SIZE,
        }
    }
}

impl Default for VideoProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl Processor for VideoProcessor {
    fn kind(&self) -> TaskKind {
        TaskKind::Video
    }

    fn supported_extensions(&self) -> &'static [&'static str] {
        SUPPORTED_FORMATS
    }

    fn max_file_size(&self) -> u64 {
        self.max_file_size
    }

    fn process(&self, path: &Path, _options: &serde_json::Value) -> Result<serde_json::Value> {
        debug!("Processing video: {}", path.display());

        Ok(json!({
            "success": true,
            "file_info": file_info(path)?,
            "metadata": {
                "duration": "00:00:00",
                "bitrate": "Unknown",
                "resolution": "Unknown",
                "codec": "Unknown",
                "fps": "Unknown",
            },
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process_video_stub_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.mp4");
        std::fs::write(&path, b"0000ftypisom").unwrap();

        let processor = VideoProcessor::new();
        assert!(processor.validate(&path));

        let result = processor.process(&path, &json!({})).unwrap();
        assert_eq!(result["success"], true);
        assert_eq!(result["metadata"]["duration"], "00:00:00");
        assert_eq!(result["file_info"]["extension"], ".mp4");
    }

    #[test]
    fn test_unsupported_extension_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.wmv");
        std::fs::write(&path, b"x").unwrap();
        assert!(!VideoProcessor::new().validate(&path));
    }
}
