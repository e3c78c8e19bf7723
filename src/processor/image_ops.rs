use async_trait::async_trait;
use tracing::warn;

use super::{transform_images, Processor};
use crate::chunk::{ChunkRef, Conversion, ImageError, Interpolation, Raster};
use crate::config::{ProcessorConfig, ProcessorKind};

/// Parameters of one image transform, parsed once from the configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageOperation {
    Resize {
        width: u32,
        height: u32,
        interpolation: Interpolation,
    },
    Crop {
        x_init: u32,
        x_diff: u32,
        y_init: u32,
        y_diff: u32,
    },
    Convert(Conversion),
}

impl ImageOperation {
    /// `None` when the node is invalid or a parameter does not parse
    pub fn from_config(config: &ProcessorConfig) -> Option<Self> {
        if !config.is_valid() {
            return None;
        }
        let dimension = |key: &str| config.param_u64(key).and_then(|v| u32::try_from(v).ok());

        match config.kind {
            ProcessorKind::ImageResize => {
                let interpolation = match Interpolation::parse(
                    config.param_str("interpolation").unwrap_or("INTER_NEAREST"),
                ) {
                    Ok(interpolation) => interpolation,
                    Err(e) => {
                        warn!("Processor {}: {}", config.name, e);
                        return None;
                    }
                };
                Some(ImageOperation::Resize {
                    width: dimension("width")?,
                    height: dimension("height")?,
                    interpolation,
                })
            }
            ProcessorKind::ImageCrop => Some(ImageOperation::Crop {
                x_init: dimension("x_init")?,
                x_diff: dimension("x_diff")?,
                y_init: dimension("y_init")?,
                y_diff: dimension("y_diff")?,
            }),
            ProcessorKind::ColorConversion => {
                match Conversion::parse(config.param_str("conversion")?) {
                    Ok(conversion) => Some(ImageOperation::Convert(conversion)),
                    Err(e) => {
                        warn!("Processor {}: {}", config.name, e);
                        None
                    }
                }
            }
            _ => None,
        }
    }

    pub fn apply(&self, raster: &Raster) -> Result<Raster, ImageError> {
        match *self {
            ImageOperation::Resize {
                width,
                height,
                interpolation,
            } => raster.resize(width, height, interpolation),
            ImageOperation::Crop {
                x_init,
                x_diff,
                y_init,
                y_diff,
            } => raster.crop(x_init, x_diff, y_init, y_diff),
            ImageOperation::Convert(conversion) => raster.convert(conversion),
        }
    }
}

/// Resize, crop and colour conversion processors
pub struct ImageTransformProcessor {
    config: ProcessorConfig,
    operation: Option<ImageOperation>,
}

impl ImageTransformProcessor {
    pub fn new(config: ProcessorConfig) -> Self {
        let operation = ImageOperation::from_config(&config);
        if operation.is_none() {
            warn!("Processor {}: invalid configuration", config.name);
        }
        Self { config, operation }
    }
}

#[async_trait]
impl Processor for ImageTransformProcessor {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn processor_type(&self) -> &'static str {
        self.config.type_name()
    }

    async fn apply_processor(&self, chunks: &[ChunkRef]) -> Vec<ChunkRef> {
        let operation = self.operation.map(|op| move |raster: &Raster| op.apply(raster));
        transform_images(&self.config, chunks, operation)
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{camera_chunk, processor_config, value_chunk};
    use super::*;
    use crate::chunk::{codes, ColourSpace};
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_crop_scenario() {
        let processor = ImageTransformProcessor::new(processor_config(
            "crop",
            json!({
                "type": "image_crop",
                "parameters": { "x_init": 0, "x_diff": 50, "y_init": 0, "y_diff": 50 }
            }),
        ));
        let result = processor.apply_processor(&[camera_chunk("cam", 100, 100)]).await;

        assert_eq!(result.len(), 1);
        assert_eq!(result[0].name(), "cam_crop");
        assert_eq!(result[0].status()[0].code, codes::SUCCESS);
        assert_eq!(result[0].first_raster().unwrap().shape(), [50, 50, 3]);
    }

    #[tokio::test]
    async fn test_resize_passes_non_image_chunk() {
        let processor = ImageTransformProcessor::new(processor_config(
            "resize",
            json!({
                "type": "image_resize",
                "parameters": { "width": 10, "height": 10, "interpolation": "INTER_NEAREST" }
            }),
        ));
        let value = value_chunk("threshold", json!(4));
        let result = processor.apply_processor(&[Arc::clone(&value)]).await;

        assert_eq!(result.len(), 1);
        assert!(Arc::ptr_eq(&result[0], &value));
    }

    #[tokio::test]
    async fn test_resize_image() {
        let processor = ImageTransformProcessor::new(processor_config(
            "small",
            json!({ "type": "image_resize", "parameters": { "width": 10, "height": 8 } }),
        ));
        let result = processor.apply_processor(&[camera_chunk("cam", 40, 30)]).await;

        let raster = result[0].first_raster().unwrap();
        assert_eq!((raster.width(), raster.height()), (10, 8));
        assert_eq!(result[0].chunk_type(), "image_resize");
    }

    #[tokio::test]
    async fn test_colour_conversion_to_gray() {
        let processor = ImageTransformProcessor::new(processor_config(
            "gray",
            json!({ "type": "color_conversion", "parameters": { "conversion": "COLOR_BGR2GRAY" } }),
        ));
        let result = processor.apply_processor(&[camera_chunk("cam", 4, 4)]).await;

        let raster = result[0].first_raster().unwrap();
        assert_eq!(raster.colour_space(), ColourSpace::Gray);
        assert_eq!(raster.pixels(), &[90u8; 16][..]);
    }

    #[tokio::test]
    async fn test_unknown_interpolation_is_invalid() {
        let processor = ImageTransformProcessor::new(processor_config(
            "r",
            json!({
                "type": "image_resize",
                "parameters": { "width": 10, "height": 10, "interpolation": "INTER_MAGIC" }
            }),
        ));
        let result = processor.apply_processor(&[camera_chunk("cam", 4, 4)]).await;

        assert!(result[0].is_empty());
        assert_eq!(result[0].status()[0].code, codes::INVALID_CONFIGURATION);
    }

    #[tokio::test]
    async fn test_missing_parameters_abort() {
        let processor =
            ImageTransformProcessor::new(processor_config("c", json!({ "type": "image_crop" })));
        let result = processor.apply_processor(&[camera_chunk("cam", 4, 4)]).await;

        assert!(result[0].is_empty());
        assert_eq!(result[0].status()[0].code, codes::INVALID_CONFIGURATION);
    }

    #[tokio::test]
    async fn test_empty_crop_region_is_error() {
        let processor = ImageTransformProcessor::new(processor_config(
            "c",
            json!({
                "type": "image_crop",
                "parameters": { "x_init": 200, "x_diff": 10, "y_init": 0, "y_diff": 10 }
            }),
        ));
        let result = processor.apply_processor(&[camera_chunk("cam", 4, 4)]).await;

        assert!(result[0].is_empty());
        assert_eq!(result[0].status()[0].code, codes::UNKNOWN_ERROR);
    }
}
