//! Model inference processor
//!
//! The model is loaded once during `apply_configuration()` from
//! `path_to_models/model_name/model_version`. Each invocation takes the first
//! image of the first input chunk, batches it as a `[1, H, W, C]` tensor and
//! stores the flattened prediction as `inference_result`.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use ndarray::{ArrayD, IxDyn};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::{processor_chunk, Processor};
use crate::chunk::{codes, ChunkRef, DataItem, Raster, StatusKind};
use crate::config::ProcessorConfig;

#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("No inference runtime available")]
    Unavailable,

    #[error("Failed to load model from {path}: {reason}")]
    Load { path: PathBuf, reason: String },

    #[error("Invalid tensor shape: {0}")]
    Shape(String),

    #[error("Prediction failed: {0}")]
    Predict(String),
}

// ============================================================================
// SBIO: Trait for abstraction (allows mocking in tests)
// ============================================================================

pub trait InferenceModel: Send + Sync {
    fn predict(&self, input: ArrayD<f32>) -> Result<ArrayD<f32>, InferenceError>;
}

pub trait InferenceRuntime: Send + Sync {
    fn load(&self, path: &std::path::Path) -> Result<Arc<dyn InferenceModel>, InferenceError>;
}

/// Batch one raster as a `[1, H, W, C]` tensor
pub fn raster_to_tensor(raster: &Raster) -> Result<ArrayD<f32>, InferenceError> {
    let [height, width, channels] = raster.shape();
    let values: Vec<f32> = raster.pixels().iter().map(|&p| f32::from(p)).collect();
    ArrayD::from_shape_vec(IxDyn(&[1, height, width, channels]), values)
        .map_err(|e| InferenceError::Shape(e.to_string()))
}

/// Flatten a prediction into a JSON array of numbers
pub fn prediction_to_value(prediction: &ArrayD<f32>) -> Value {
    Value::Array(prediction.iter().map(|&v| Value::from(f64::from(v))).collect())
}

pub struct InferenceProcessor {
    config: ProcessorConfig,
    runtime: Option<Arc<dyn InferenceRuntime>>,
    model: Option<Arc<dyn InferenceModel>>,
}

impl InferenceProcessor {
    pub fn new(config: ProcessorConfig, runtime: Option<Arc<dyn InferenceRuntime>>) -> Self {
        Self {
            config,
            runtime,
            model: None,
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.model.is_some()
    }

    fn model_path(&self) -> Option<PathBuf> {
        let version = match self.config.param("model_version")? {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        Some(
            PathBuf::from(self.config.param_path("path_to_models")?)
                .join(self.config.param_str("model_name")?)
                .join(version),
        )
    }

    async fn load_model(&self) -> Result<Arc<dyn InferenceModel>, InferenceError> {
        let runtime = self.runtime.clone().ok_or(InferenceError::Unavailable)?;
        let path = self.model_path().ok_or_else(|| InferenceError::Load {
            path: PathBuf::new(),
            reason: "model location is incomplete".to_string(),
        })?;
        info!("Processor {}: loading model from {}", self.config.name, path.display());
        tokio::task::spawn_blocking(move || runtime.load(&path))
            .await
            .map_err(|e| InferenceError::Predict(e.to_string()))?
    }
}

#[async_trait]
impl Processor for InferenceProcessor {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn processor_type(&self) -> &'static str {
        self.config.type_name()
    }

    async fn apply_configuration(&mut self) {
        if self.model.is_some() || !self.config.is_valid() {
            return;
        }
        match self.load_model().await {
            Ok(model) => self.model = Some(model),
            Err(e) => error!("Processor {}: {}", self.config.name, e),
        }
    }

    async fn apply_processor(&self, chunks: &[ChunkRef]) -> Vec<ChunkRef> {
        let mut output = processor_chunk(&self.config.name, &self.config);

        let Some(model) = self.model.clone() else {
            warn!("Processor {}: no execution due to invalid configuration", self.config.name);
            output.add_status(StatusKind::Processor, codes::INVALID_CONFIGURATION);
            return vec![Arc::new(output)];
        };

        let Some(raster) = chunks.first().and_then(|c| c.first_raster()) else {
            warn!("Processor {}: input carries no image", self.config.name);
            output.add_status(StatusKind::Processor, codes::UNKNOWN_ERROR);
            return vec![Arc::new(output)];
        };

        let prediction = match raster_to_tensor(raster) {
            Ok(tensor) => tokio::task::spawn_blocking(move || model.predict(tensor))
                .await
                .map_err(|e| InferenceError::Predict(e.to_string()))
                .and_then(|r| r),
            Err(e) => Err(e),
        };

        match prediction {
            Ok(prediction) => {
                debug!("Processor {}: prediction shape {:?}", self.config.name, prediction.shape());
                output.add_data(DataItem::value("inference_result", prediction_to_value(&prediction)));
                output.add_status(StatusKind::Processor, codes::SUCCESS);
            }
            Err(e) => {
                warn!("Processor {}: {}", self.config.name, e);
                output.add_status(StatusKind::Processor, codes::UNKNOWN_ERROR);
            }
        }
        vec![Arc::new(output)]
    }
}

// ============================================================================
// TorchScript runtime
// ============================================================================

#[cfg(feature = "torch")]
pub mod torch {
    use std::path::Path;
    use std::sync::{Arc, Mutex};

    use ndarray::{ArrayD, IxDyn};
    use tch::{CModule, Device, Tensor};

    use super::{InferenceError, InferenceModel, InferenceRuntime};

    /// File looked up when the model location is a directory
    const MODULE_FILE: &str = "model.pt";

    pub struct TorchRuntime {
        device: Device,
    }

    impl TorchRuntime {
        pub fn new() -> Self {
            Self {
                device: Device::cuda_if_available(),
            }
        }
    }

    impl Default for TorchRuntime {
        fn default() -> Self {
            Self::new()
        }
    }

    impl InferenceRuntime for TorchRuntime {
        fn load(&self, path: &Path) -> Result<Arc<dyn InferenceModel>, InferenceError> {
            let file = if path.is_dir() {
                path.join(MODULE_FILE)
            } else {
                path.to_path_buf()
            };
            let module = CModule::load_on_device(&file, self.device).map_err(|e| InferenceError::Load {
                path: file.clone(),
                reason: e.to_string(),
            })?;
            Ok(Arc::new(TorchModel {
                module: Mutex::new(module),
                device: self.device,
            }))
        }
    }

    struct TorchModel {
        module: Mutex<CModule>,
        device: Device,
    }

    impl InferenceModel for TorchModel {
        fn predict(&self, input: ArrayD<f32>) -> Result<ArrayD<f32>, InferenceError> {
            let shape: Vec<i64> = input.shape().iter().map(|&d| d as i64).collect();
            let values: Vec<f32> = input.iter().copied().collect();
            let tensor = Tensor::from_slice(&values).view(shape.as_slice()).to_device(self.device);

            let output = {
                let module = self
                    .module
                    .lock()
                    .map_err(|_| InferenceError::Predict("model lock poisoned".to_string()))?;
                module
                    .forward_ts(&[tensor])
                    .map_err(|e| InferenceError::Predict(e.to_string()))?
            };

            let dims: Vec<usize> = output.size().iter().map(|&d| d as usize).collect();
            let flat = output.to_device(Device::Cpu).flatten(0, -1);
            let values = Vec::<f32>::try_from(&flat).map_err(|e| InferenceError::Predict(e.to_string()))?;
            ArrayD::from_shape_vec(IxDyn(&dims), values).map_err(|e| InferenceError::Shape(e.to_string()))
        }
    }
}

// ============================================================================
// SBIO: Mock implementation for testing (no I/O)
// ============================================================================

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Predicts the per-channel mean of the batch
    pub struct MeanModel;

    impl InferenceModel for MeanModel {
        fn predict(&self, input: ArrayD<f32>) -> Result<ArrayD<f32>, InferenceError> {
            let channels = *input.shape().last().ok_or_else(|| InferenceError::Shape("scalar".into()))?;
            let count = (input.len() / channels) as f32;
            let mut sums = vec![0f32; channels];
            for (i, v) in input.iter().enumerate() {
                sums[i % channels] += v;
            }
            let means = sums.into_iter().map(|s| s / count).collect();
            ArrayD::from_shape_vec(IxDyn(&[1, channels]), means)
                .map_err(|e| InferenceError::Shape(e.to_string()))
        }
    }

    #[derive(Default)]
    pub struct MockRuntime {
        pub loads: AtomicUsize,
        pub fail: bool,
        pub last_path: std::sync::Mutex<Option<PathBuf>>,
    }

    impl InferenceRuntime for MockRuntime {
        fn load(&self, path: &std::path::Path) -> Result<Arc<dyn InferenceModel>, InferenceError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            *self.last_path.lock().unwrap() = Some(path.to_path_buf());
            if self.fail {
                return Err(InferenceError::Load {
                    path: path.to_path_buf(),
                    reason: "corrupt".to_string(),
                });
            }
            Ok(Arc::new(MeanModel))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{camera_chunk, processor_config, value_chunk};
    use super::mock::MockRuntime;
    use super::*;
    use serde_json::json;
    use std::sync::atomic::Ordering;

    fn inference_config() -> ProcessorConfig {
        processor_config(
            "classifier",
            json!({
                "type": "tf_inference",
                "parameters": { "path_to_models": "/models", "model_name": "parts", "model_version": 3 }
            }),
        )
    }

    #[test]
    fn test_raster_to_tensor_shape() {
        let raster = Raster::filled(4, 2, crate::chunk::ColourSpace::Rgb, 7);
        let tensor = raster_to_tensor(&raster).unwrap();
        assert_eq!(tensor.shape(), &[1, 2, 4, 3]);
        assert!(tensor.iter().all(|&v| v == 7.0));
    }

    #[tokio::test]
    async fn test_predict_on_first_image() {
        let runtime = Arc::new(MockRuntime::default());
        let mut processor = InferenceProcessor::new(
            inference_config(),
            Some(runtime.clone() as Arc<dyn InferenceRuntime>),
        );
        processor.apply_configuration().await;
        processor.apply_configuration().await;

        assert!(processor.is_loaded());
        assert_eq!(runtime.loads.load(Ordering::SeqCst), 1);
        assert_eq!(
            runtime.last_path.lock().unwrap().as_deref(),
            Some(std::path::Path::new("/models/parts/3"))
        );

        let result = processor.apply_processor(&[camera_chunk("cam", 2, 2)]).await;
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].name(), "classifier");
        assert_eq!(result[0].status()[0].code, codes::SUCCESS);
        assert_eq!(
            result[0].data()[0],
            DataItem::value("inference_result", json!([90.0, 90.0, 90.0]))
        );
    }

    #[tokio::test]
    async fn test_load_failure_reports_invalid() {
        let runtime = Arc::new(MockRuntime {
            fail: true,
            ..Default::default()
        });
        let mut processor =
            InferenceProcessor::new(inference_config(), Some(runtime as Arc<dyn InferenceRuntime>));
        processor.apply_configuration().await;

        let result = processor.apply_processor(&[camera_chunk("cam", 2, 2)]).await;
        assert!(result[0].is_empty());
        assert_eq!(result[0].status()[0].code, codes::INVALID_CONFIGURATION);
    }

    #[tokio::test]
    async fn test_non_image_input_is_error() {
        let runtime: Arc<dyn InferenceRuntime> = Arc::new(MockRuntime::default());
        let mut processor = InferenceProcessor::new(inference_config(), Some(runtime));
        processor.apply_configuration().await;

        let result = processor.apply_processor(&[value_chunk("v", json!(1))]).await;
        assert!(result[0].is_empty());
        assert_eq!(result[0].status()[0].code, codes::UNKNOWN_ERROR);

        let result = processor.apply_processor(&[]).await;
        assert_eq!(result[0].status()[0].code, codes::UNKNOWN_ERROR);
    }
}
