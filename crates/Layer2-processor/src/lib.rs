//! # filepipe-processor
//!
//! Processing capabilities for FilePipe. One `Processor` per task kind,
//! resolved through an explicitly-passed `ProcessorRegistry` — no
//! process-global registration.

pub mod builtin;
pub mod registry;
pub mod traits;

pub use builtin::{DocumentProcessor, ImageProcessor, VideoProcessor};
pub use registry::ProcessorRegistry;
pub use traits::{extension_of, file_info, Processor};
