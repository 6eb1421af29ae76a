//! Image processing capability
//!
//! Extracts dimensions and format without a full decode. Only PNG and
//! JPEG decoders are compiled in; other accepted formats fall back to
//! file-level metadata.

use crate::traits::{file_info, Processor};
use filepipe_foundation::{Result, TaskKind};
use serde_json::json;
use std::path::Path;
use tracing::debug;

const SUPPORTED_FORMATS: &[&str] = &[".jpg", ".jpeg", ".png", ".gif", ".webp", ".bmp"];

/// Default size cap: 50 MB
const MAX_FILE_SIZE: u64 = 1024 * 1024 * 50;

pub struct ImageProcessor {
    max_file_size: u64,
}

impl ImageProcessor {
    pub fn new() -> Self {
        Self {
            max_file_size: MAX_FILE_SIZE,
        }
    }

    pub fn with_max_file_size(max_file_size: u64) -> Self {
        Self { max_file_size }
    }
}

impl Default for ImageProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl Processor for ImageProcessor {
    fn kind(&self) -> TaskKind {
        TaskKind::Image
    }

    fn supported_extensions(&self) -> &'static [&'static str] {
        SUPPORTED_FORMATS
    }

    fn max_file_size(&self) -> u64 {
        self.max_file_size
    }

    fn process(&self, path: &Path, options: &serde_json::Value) -> Result<serde_json::Value> {
        debug!("Processing image: {}", path.display());

        let mut result = json!({
            "success": true,
            "file_info": file_info(path)?,
        });

        match image::image_dimensions(path) {
            Ok((width, height)) => {
                result["width"] = json!(width);
                result["height"] = json!(height);
            }
            Err(e) => {
                // Format not covered by the compiled decoders, or a
                // malformed header; metadata-only result
                debug!("No dimensions for {}: {}", path.display(), e);
            }
        }

        if let Ok(format) = image::ImageFormat::from_path(path) {
            result["format"] = json!(format.extensions_str().first().copied().unwrap_or("unknown"));
        }

        if let Some(resize) = options.get("resize") {
            result["resize"] = json!({ "requested": resize });
        }

        if let Some(quality) = options.get("compress") {
            result["compression"] = json!({ "quality": quality });
        }

        Ok(result)
    }
}
