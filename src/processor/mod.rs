//! Processors: configured steps consuming and producing chunks
//!
//! Three roles exist. A selector narrows the running chunk list, a transform
//! wraps each matching chunk into a new one, and a sink observes everything
//! accumulated so far without contributing to the chain.

pub mod image_ops;
pub mod inference;
pub mod input;
pub mod persist;

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::debug;

use crate::chunk::{codes, ChunkRef, DataChunk, DataItem, ImageError, Raster, StatusKind};
use crate::config::{ProcessorConfig, ProcessorKind};
use crate::runtime::Drivers;

pub use image_ops::ImageTransformProcessor;
pub use inference::{InferenceError, InferenceModel, InferenceProcessor, InferenceRuntime};
pub use input::InputProcessor;
pub use persist::{ChunkWriter, PersistError, SaveOnDiskProcessor};

/// Chunk types carrying an image that transforms act on
pub const IMAGE_CHUNK_TYPES: &[&str] = &[
    "local_camera_cv2",
    "baumer_camera_neoapi",
    "image_resize",
    "image_crop",
];

/// Chunk types whose image items are written as PNG files when persisted
pub const PERSISTED_IMAGE_TYPES: &[&str] = &[
    "local_camera_cv2",
    "baumer_camera_neoapi",
    "image_resize",
    "image_crop",
    "color_conversion",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorRole {
    /// Replaces the running result with a subset of it
    Selector,
    /// Produces new chunks from the running result
    Transform,
    /// Consumes the accumulated chunks, output is ignored
    Sink,
}

#[async_trait]
pub trait Processor: Send + Sync {
    fn name(&self) -> &str;

    fn processor_type(&self) -> &'static str;

    fn role(&self) -> ProcessorRole {
        ProcessorRole::Transform
    }

    async fn apply_configuration(&mut self) {}

    /// An empty result, or a result holding a chunk without data, stops the chain
    async fn apply_processor(&self, chunks: &[ChunkRef]) -> Vec<ChunkRef>;

    async fn shutdown(&self) {}
}

/// Run one processor with timing logs
pub async fn execute_processor(processor: &dyn Processor, chunks: &[ChunkRef]) -> Vec<ChunkRef> {
    debug!("Processor {}: begin on {} chunk(s)", processor.name(), chunks.len());
    let started = Instant::now();
    let result = processor.apply_processor(chunks).await;
    debug!(
        "Processor {}: {} chunk(s) produced in {:?}",
        processor.name(),
        result.len(),
        started.elapsed()
    );
    result
}

/// Construct the processor for a configuration node
pub fn build_processor(config: &ProcessorConfig, drivers: &Drivers) -> Box<dyn Processor> {
    let config = config.clone();
    match config.kind {
        ProcessorKind::Input => Box::new(InputProcessor::new(config)),
        ProcessorKind::ImageResize | ProcessorKind::ImageCrop | ProcessorKind::ColorConversion => {
            Box::new(ImageTransformProcessor::new(config))
        }
        ProcessorKind::Inference => {
            Box::new(InferenceProcessor::new(config, drivers.inference.clone()))
        }
        ProcessorKind::SaveOnDisk => Box::new(SaveOnDiskProcessor::new(config)),
    }
}

/// Fresh output chunk carrying the processor's identity
pub(crate) fn processor_chunk(name: impl Into<String>, config: &ProcessorConfig) -> DataChunk {
    DataChunk::new(name, config.type_name())
        .with_parameters(config.parameters.clone())
        .with_hidden(config.hidden)
}

/// Apply `operation` to the image of every image-bearing chunk.
///
/// Other chunks are passed through as the same allocation. Each image chunk
/// yields `<chunk>_<processor>` holding a `frame` item on success, or only a
/// status item when the configuration is invalid or the operation fails.
pub(crate) fn transform_images<F>(
    config: &ProcessorConfig,
    chunks: &[ChunkRef],
    operation: Option<F>,
) -> Vec<ChunkRef>
where
    F: Fn(&Raster) -> Result<Raster, ImageError>,
{
    chunks
        .iter()
        .map(|chunk| {
            if !IMAGE_CHUNK_TYPES.contains(&chunk.chunk_type()) {
                return Arc::clone(chunk);
            }

            let mut output = processor_chunk(format!("{}_{}", chunk.name(), config.name), config);
            let Some(operation) = &operation else {
                output.add_status(StatusKind::Processor, codes::INVALID_CONFIGURATION);
                return Arc::new(output);
            };

            match chunk.first_raster().map(operation) {
                Some(Ok(raster)) => {
                    output.add_data(DataItem::image("frame", raster));
                    output.add_status(StatusKind::Processor, codes::SUCCESS);
                }
                Some(Err(e)) => {
                    debug!("Processor {}: {} on chunk {}", config.name, e, chunk.name());
                    output.add_status(StatusKind::Processor, codes::UNKNOWN_ERROR);
                }
                None => {
                    debug!("Processor {}: chunk {} carries no image", config.name, chunk.name());
                    output.add_status(StatusKind::Processor, codes::UNKNOWN_ERROR);
                }
            }
            Arc::new(output)
        })
        .collect()
}
