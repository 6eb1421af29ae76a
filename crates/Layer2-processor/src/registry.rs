//! Processor Registry - task-kind to capability lookup
//!
//! One registry instance is built at startup and handed by reference to
//! whatever needs dispatch (runner, CLI). There is no process-global
//! registry; registration is a startup-time table build.

use crate::builtin;
use crate::traits::{extension_of, Processor};
use filepipe_foundation::{Error, Result, TaskKind};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Scan order for extension lookup, so "first match" is deterministic
const KIND_ORDER: [TaskKind; 4] = [
    TaskKind::Image,
    TaskKind::Video,
    TaskKind::Document,
    TaskKind::Archive,
];

/// Processor registry
///
/// ## Usage
/// ```ignore
/// let registry = ProcessorRegistry::with_builtins();
/// let processor = registry.get(TaskKind::Image)?;
/// if processor.validate(&path) {
///     let result = processor.process(&path, &options)?;
/// }
/// ```
pub struct ProcessorRegistry {
    processors: HashMap<TaskKind, Arc<dyn Processor>>,
    initialized: bool,
}

impl ProcessorRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            processors: HashMap::new(),
            initialized: false,
        }
    }

    /// Create a registry with the built-in set registered
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.initialize();
        registry
    }

    /// Register the built-in processors exactly once; re-invocation is a
    /// no-op
    pub fn initialize(&mut self) {
        if self.initialized {
            return;
        }

        for processor in builtin::all() {
            self.register(processor);
        }

        self.initialized = true;
        info!("Processor registry initialized ({} kinds)", self.processors.len());
    }

    /// Register (or replace) the capability for a task kind
    pub fn register(&mut self, processor: Arc<dyn Processor>) {
        let kind = processor.kind();
        self.processors.insert(kind, processor);
        info!("Processor registered: {}", kind);
    }

    /// Look up the capability for a task kind
    pub fn get(&self, kind: TaskKind) -> Result<Arc<dyn Processor>> {
        self.processors
            .get(&kind)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("No processor registered for kind: {kind}")))
    }

    /// Find the first registered capability supporting the path's
    /// extension (case-insensitive). Linear scan; the registry holds a
    /// handful of entries.
    pub fn get_by_extension(&self, path: &Path) -> Result<Arc<dyn Processor>> {
        for kind in KIND_ORDER {
            if let Some(processor) = self.processors.get(&kind) {
                if processor.supports_extension(path) {
                    return Ok(Arc::clone(processor));
                }
            }
        }

        let ext = extension_of(path).unwrap_or_else(|| "<none>".to_string());
        Err(Error::NotFound(format!(
            "No processor found for extension: {ext}"
        )))
    }

    /// Whether any registered capability accepts this path
    pub fn is_supported(&self, path: &Path) -> bool {
        self.get_by_extension(path).is_ok()
    }

    /// Registered task kinds
    pub fn kinds(&self) -> Vec<TaskKind> {
        KIND_ORDER
            .into_iter()
            .filter(|k| self.processors.contains_key(k))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.processors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }
}

impl Default for ProcessorRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}
