//! Built-in processors

mod document;
mod image;
mod video;

pub use document::DocumentProcessor;
pub use image::ImageProcessor;
pub use video::VideoProcessor;

use crate::traits::Processor;
use std::sync::Arc;

/// The built-in capability set registered by `ProcessorRegistry::initialize`
pub fn all() -> Vec<Arc<dyn Processor>> {
    vec![
        Arc::new(ImageProcessor::new()),
        Arc::new(DocumentProcessor::new()),
        Arc::new(VideoProcessor::new()),
    ]
}
