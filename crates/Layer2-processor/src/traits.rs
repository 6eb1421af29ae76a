//! Processor trait - the pluggable capability contract
//!
//! One implementation per task kind. A processor must not partially
//! mutate shared state when `process` fails; the runner treats any `Err`
//! as a clean, retryable attempt failure.

use filepipe_foundation::{Result, TaskKind};
use serde_json::json;
use std::path::Path;
use tracing::warn;

/// A processing capability for one task kind
pub trait Processor: Send + Sync {
    /// The task kind this capability serves
    fn kind(&self) -> TaskKind;

    /// File extensions (lowercase, with leading dot) this capability accepts
    fn supported_extensions(&self) -> &'static [&'static str];

    /// Upper size bound for accepted files, in bytes
    fn max_file_size(&self) -> u64;

    /// Validate a source file before processing.
    ///
    /// The default checks existence, regular-file-ness, extension and
    /// size. Rejections are logged, never raised.
    fn validate(&self, path: &Path) -> bool {
        let Ok(meta) = std::fs::metadata(path) else {
            warn!("File not found: {}", path.display());
            return false;
        };

        if !meta.is_file() {
            warn!("Not a file: {}", path.display());
            return false;
        }

        if !self.supports_extension(path) {
            warn!("Unsupported format: {}", path.display());
            return false;
        }

        if meta.len() > self.max_file_size() {
            warn!("File too large: {}", path.display());
            return false;
        }

        true
    }

    /// Process a source file. `options` is an opaque parameter object
    /// forwarded from the job payload.
    fn process(&self, path: &Path, options: &serde_json::Value) -> Result<serde_json::Value>;

    /// Whether the path's extension is in the supported set (case-insensitive)
    fn supports_extension(&self, path: &Path) -> bool {
        match extension_of(path) {
            Some(ext) => self.supported_extensions().contains(&ext.as_str()),
            None => false,
        }
    }
}

/// Lowercased extension with leading dot, e.g. ".png"
pub fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .map(|e| format!(".{}", e.to_string_lossy().to_ascii_lowercase()))
}

/// Basic file facts included in every processing result
pub fn file_info(path: &Path) -> Result<serde_json::Value> {
    let meta = std::fs::metadata(path)?;
    Ok(json!({
        "name": path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default(),
        "size": meta.len(),
        "extension": extension_of(path),
        "path": path.to_string_lossy(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use filepipe_foundation::Error;
    use std::io::Write;

    struct TextOnly;

    impl Processor for TextOnly {
        fn kind(&self) -> TaskKind {
            TaskKind::Document
        }

        fn supported_extensions(&self) -> &'static [&'static str] {
            &[".txt"]
        }

        fn max_file_size(&self) -> u64 {
            16
        }

        fn process(&self, path: &Path, _options: &serde_json::Value) -> Result<serde_json::Value> {
            if !path.exists() {
                return Err(Error::NotFound(path.display().to_string()));
            }
            file_info(path)
        }
    }

    #[test]
    fn test_extension_of() {
        assert_eq!(extension_of(Path::new("a/photo.PNG")).as_deref(), Some(".png"));
        assert_eq!(extension_of(Path::new("noext")), None);
    }

    #[test]
    fn test_default_validate() {
        let dir = tempfile::tempdir().unwrap();

        let good = dir.path().join("note.txt");
        std::fs::write(&good, b"hello").unwrap();
        assert!(TextOnly.validate(&good));

        // Missing file
        assert!(!TextOnly.validate(&dir.path().join("absent.txt")));

        // Wrong extension
        let wrong = dir.path().join("photo.png");
        std::fs::write(&wrong, b"x").unwrap();
        assert!(!TextOnly.validate(&wrong));

        // Directory, not a file
        assert!(!TextOnly.validate(dir.path()));

        // Too large
        let big = dir.path().join("big.txt");
        let mut f = std::fs::File::create(&big).unwrap();
        f.write_all(&[0u8; 32]).unwrap();
        assert!(!TextOnly.validate(&big));
    }

    #[test]
    fn test_file_info() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("note.txt");
        std::fs::write(&path, b"hello").unwrap();

        let info = file_info(&path).unwrap();
        assert_eq!(info["name"], "note.txt");
        assert_eq!(info["size"], 5);
        assert_eq!(info["extension"], ".txt");
    }
}
