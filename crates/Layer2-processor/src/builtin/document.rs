//! Document processing capability

use crate::traits::{extension_of, file_info, Processor};
use filepipe_foundation::{Error, ErrorCode, Result, TaskKind};
use serde_json::json;
use std::path::Path;
use tracing::debug;

const SUPPORTED_FORMATS: &[&str] = &[".txt", ".json", ".csv", ".pdf"];

/// Default size cap: 100 MB
const MAX_FILE_SIZE: u64 = 1024 * 1024 * 100;

/// Preview length for plain text files
const PREVIEW_CHARS: usize = 500;

pub struct DocumentProcessor {
    max_file_size: u64,
}

impl DocumentProcessor {
    pub fn new() -> Self {
        Self {
            max_file_size: MAX_FILE_SIZE,
        }
    }

    fn process_json(&self, path: &Path) -> Result<serde_json::Value> {
        let raw = std::fs::read_to_string(path)?;
        serde_json::from_str(&raw).map_err(|e| {
            Error::processing(ErrorCode::InvalidFormat, format!("Invalid JSON: {e}"))
        })
    }

    fn process_csv(&self, path: &Path) -> Result<serde_json::Value> {
        let raw = std::fs::read_to_string(path)?;
        let mut lines = raw.lines();

        let header: Vec<&str> = lines
            .next()
            .map(|h| h.split(',').map(str::trim).collect())
            .unwrap_or_default();
        let records = lines.filter(|l| !l.trim().is_empty()).count();

        Ok(json!({
            "columns": header,
            "record_count": records,
        }))
    }

    fn process_text(&self, path: &Path) -> Result<serde_json::Value> {
        let content = std::fs::read_to_string(path)?;
        let preview: String = content.chars().take(PREVIEW_CHARS).collect();

        Ok(json!({
            "preview": preview,
            "full_length": content.len(),
            "line_count": content.lines().count(),
        }))
    }
}

impl Default for DocumentProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl Processor for DocumentProcessor {
    fn kind(&self) -> TaskKind {
        TaskKind::Document
    }

    fn supported_extensions(&self) -> &'static [&'static str] {
        SUPPORTED_FORMATS
    }

    fn max_file_size(&self) -> u64 {
        self.max_file_size
    }

    fn process(&self, path: &Path, _options: &serde_json::Value) -> Result<serde_json::Value> {
        debug!("Processing document: {}", path.display());

        let content = match extension_of(path).as_deref() {
            Some(".json") => self.process_json(path)?,
            Some(".csv") => self.process_csv(path)?,
            Some(".txt") => self.process_text(path)?,
            // Accepted for tracking, content extraction not supported
            _ => json!({ "error": "Content extraction not supported" }),
        };

        Ok(json!({
            "success": true,
            "file_info": file_info(path)?,
            "content": content,
        }))
    }
}
