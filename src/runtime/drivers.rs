//! External collaborators available to inlets and processors

use std::sync::Arc;

use crate::inlet::camera::DeviceRegistry;
use crate::inlet::protocol::ProtocolConnector;
use crate::processor::InferenceRuntime;

/// Device drivers, protocol clients and inference runtimes used when
/// components are built. Missing entries make the affected components report
/// a failure status instead of data.
#[derive(Clone, Default)]
pub struct Drivers {
    pub cameras: DeviceRegistry,
    pub protocol: Option<Arc<dyn ProtocolConnector>>,
    pub inference: Option<Arc<dyn InferenceRuntime>>,
}

impl Drivers {
    /// Everything compiled into this build
    pub fn with_defaults() -> Self {
        #[allow(unused_mut)]
        let mut drivers = Self::default();

        #[cfg(feature = "opencv")]
        drivers.cameras.register(
            crate::config::InletKind::LocalCamera.type_name(),
            Arc::new(crate::inlet::opencv_camera::OpenCvDriver),
        );

        #[cfg(feature = "torch")]
        {
            drivers.inference = Some(Arc::new(crate::processor::inference::torch::TorchRuntime::new()));
        }

        drivers
    }

    pub fn with_protocol(mut self, connector: Arc<dyn ProtocolConnector>) -> Self {
        self.protocol = Some(connector);
        self
    }

    pub fn with_inference(mut self, runtime: Arc<dyn InferenceRuntime>) -> Self {
        self.inference = Some(runtime);
        self
    }

    /// Human-readable summary for startup logs
    pub fn describe(&self) -> String {
        let cameras = self.cameras.registered_types();
        format!(
            "cameras: [{}], protocol client: {}, inference runtime: {}",
            cameras.join(", "),
            if self.protocol.is_some() { "yes" } else { "no" },
            if self.inference.is_some() { "yes" } else { "no" },
        )
    }
}
