//! Camera inlets
//!
//! Both camera inlet types drive a [`CameraDevice`] obtained from the
//! [`CameraDriver`] registered for their type. Device calls are blocking and
//! run on the blocking pool; a grab is bounded by a fixed timeout.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::{timestamp_millis, Inlet};
use crate::chunk::{codes, DataChunk, DataItem, Raster, StatusKind};
use crate::config::InletConfig;

/// Timeout applied to a single frame grab
pub const GRAB_TIMEOUT: Duration = Duration::from_millis(1000);

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("Device {0} could not be opened: {1}")]
    Open(String, String),

    #[error("Feature '{0}' is not supported by the device")]
    UnsupportedFeature(String),

    #[error("Feature '{feature}' could not be set to {requested}, device reports {actual}")]
    FeatureRejected {
        feature: String,
        requested: Value,
        actual: Value,
    },

    #[error("Frame grab timed out after {0:?}")]
    Timeout(Duration),

    #[error("Frame grab failed: {0}")]
    Grab(String),
}

// ============================================================================
// SBIO: Trait for abstraction (allows mocking in tests)
// ============================================================================

/// An opened capturing device. Calls may block.
pub trait CameraDevice: Send {
    fn is_connected(&self) -> bool;

    fn has_feature(&self, name: &str) -> bool;

    fn get_feature(&self, name: &str) -> Option<Value>;

    fn set_feature(&mut self, name: &str, value: &Value) -> Result<(), DeviceError>;

    fn grab_frame(&mut self, timeout: Duration) -> Result<Raster, DeviceError>;

    fn release(&mut self);
}

/// Opens devices for one camera inlet type
pub trait CameraDriver: Send + Sync {
    fn open(&self, device_id: &Value) -> Result<Box<dyn CameraDevice>, DeviceError>;
}

/// Camera drivers keyed by inlet type name
#[derive(Clone, Default)]
pub struct DeviceRegistry {
    drivers: HashMap<String, Arc<dyn CameraDriver>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, inlet_type: impl Into<String>, driver: Arc<dyn CameraDriver>) {
        self.drivers.insert(inlet_type.into(), driver);
    }

    pub fn get(&self, inlet_type: &str) -> Option<Arc<dyn CameraDriver>> {
        self.drivers.get(inlet_type).cloned()
    }

    pub fn registered_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.drivers.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }
}

// ============================================================================
// Camera status
// ============================================================================

/// Connection and capture state owned by one camera inlet
#[derive(Debug, Default)]
pub struct CameraStatus {
    initialised: AtomicBool,
    configured: AtomicBool,
    fully_configured: AtomicBool,
    connected: AtomicBool,
    capturing: AtomicBool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CameraStatusSnapshot {
    pub initialised: bool,
    pub configured: bool,
    pub fully_configured: bool,
    pub connected: bool,
    pub capturing: bool,
}

impl CameraStatus {
    pub fn snapshot(&self) -> CameraStatusSnapshot {
        CameraStatusSnapshot {
            initialised: self.initialised.load(Ordering::SeqCst),
            configured: self.configured.load(Ordering::SeqCst),
            fully_configured: self.fully_configured.load(Ordering::SeqCst),
            connected: self.connected.load(Ordering::SeqCst),
            capturing: self.capturing.load(Ordering::SeqCst),
        }
    }

    fn set_initialised(&self, value: bool) {
        self.initialised.store(value, Ordering::SeqCst);
        self.connected.store(value, Ordering::SeqCst);
    }
}

/// Holds the `capturing` flag for as long as it lives
struct CaptureGuard(Arc<CameraStatus>);

impl CaptureGuard {
    fn acquire(status: &Arc<CameraStatus>) -> Option<Self> {
        status
            .capturing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| CaptureGuard(Arc::clone(status)))
    }
}

impl Drop for CaptureGuard {
    fn drop(&mut self) {
        self.0.capturing.store(false, Ordering::SeqCst);
    }
}

type DeviceSlot = Arc<Mutex<Option<Box<dyn CameraDevice>>>>;

fn lock_slot(slot: &DeviceSlot) -> MutexGuard<'_, Option<Box<dyn CameraDevice>>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// Inlet
// ============================================================================

pub struct CameraInlet {
    config: InletConfig,
    driver: Option<Arc<dyn CameraDriver>>,
    device: DeviceSlot,
    status: Arc<CameraStatus>,
    grab_timeout: Duration,
}

impl CameraInlet {
    pub fn new(config: InletConfig, driver: Option<Arc<dyn CameraDriver>>) -> Self {
        Self {
            config,
            driver,
            device: Arc::new(Mutex::new(None)),
            status: Arc::new(CameraStatus::default()),
            grab_timeout: GRAB_TIMEOUT,
        }
    }

    pub fn with_grab_timeout(mut self, grab_timeout: Duration) -> Self {
        self.grab_timeout = grab_timeout;
        self
    }

    pub fn status(&self) -> CameraStatusSnapshot {
        self.status.snapshot()
    }

    /// Open the device once. Retrying is left to the next cycle.
    async fn connect(&self) -> bool {
        let Some(driver) = self.driver.clone() else {
            warn!(
                "No camera driver registered for type {}, inlet {} cannot connect",
                self.config.type_name(),
                self.config.name
            );
            return false;
        };

        let device_id = self
            .config
            .param("device_id")
            .cloned()
            .unwrap_or_else(|| Value::from(0));
        let opened = tokio::task::spawn_blocking(move || driver.open(&device_id)).await;

        match opened {
            Ok(Ok(device)) => {
                *lock_slot(&self.device) = Some(device);
                self.status.set_initialised(true);
                info!("Capturing device of inlet {} initialised", self.config.name);
                true
            }
            Ok(Err(e)) => {
                warn!("Capturing device of inlet {} not connected: {}", self.config.name, e);
                false
            }
            Err(e) => {
                warn!("Connecting inlet {} panicked: {}", self.config.name, e);
                false
            }
        }
    }

    /// Write every configured parameter except `device_id` as a device feature
    fn apply_features(&self) -> bool {
        let mut slot = lock_slot(&self.device);
        let Some(device) = slot.as_mut() else {
            return false;
        };

        let mut all_set = true;
        for (feature, value) in &self.config.parameters {
            if feature == "device_id" {
                continue;
            }
            if !device.has_feature(feature) {
                warn!("Parameter ({}) is not supported by the device", feature);
                all_set = false;
                continue;
            }
            match device.set_feature(feature, value) {
                Ok(()) => {
                    let readback = device.get_feature(feature).unwrap_or_default();
                    debug!("Parameter ({}) set to {}", feature, readback);
                }
                Err(e) => {
                    warn!("Setting parameter ({}) unsuccessful: {}", feature, e);
                    all_set = false;
                }
            }
        }
        all_set
    }

    fn new_chunk(&self) -> DataChunk {
        DataChunk::new(&self.config.name, self.config.type_name())
            .with_parameters(self.config.parameters.clone())
            .with_hidden(self.config.hidden)
    }
}

#[async_trait]
impl Inlet for CameraInlet {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn inlet_type(&self) -> &'static str {
        self.config.type_name()
    }

    async fn apply_configuration(&mut self) {
        if !self.config.is_valid() {
            warn!("Inlet {}: invalid configuration, not configured", self.config.name);
            return;
        }
        if !self.status.initialised.load(Ordering::SeqCst) {
            self.connect().await;
        }
        let fully_configured = self.apply_features();
        self.status
            .fully_configured
            .store(fully_configured, Ordering::SeqCst);
        self.status.configured.store(true, Ordering::SeqCst);
    }

    async fn retrieve_data(&self) -> Vec<DataChunk> {
        let mut chunk = self.new_chunk();

        if !self.config.is_valid() {
            chunk.add_status(StatusKind::Capturing, codes::INVALID_CONFIGURATION);
            warn!("Inlet {}: no execution due to invalid configuration", self.config.name);
            return vec![chunk];
        }

        chunk.add_metadata("timestamp", Value::from(timestamp_millis()));

        let Some(guard) = CaptureGuard::acquire(&self.status) else {
            chunk.add_status(StatusKind::Capturing, codes::BUSY);
            warn!("Inlet {}: capturing device is busy", self.config.name);
            return vec![chunk];
        };

        if !self.status.initialised.load(Ordering::SeqCst) && !self.connect().await {
            chunk.add_status(StatusKind::Capturing, codes::NOT_INITIALISED);
            warn!("Inlet {}: capturing device is not initialised", self.config.name);
            return vec![chunk];
        }

        let slot = Arc::clone(&self.device);
        let grab_timeout = self.grab_timeout;
        let grab = tokio::task::spawn_blocking(move || {
            // The flag stays raised until the device returns, even past the timeout
            let _guard = guard;
            match lock_slot(&slot).as_mut() {
                Some(device) if device.is_connected() => device.grab_frame(grab_timeout),
                Some(_) => Err(DeviceError::Grab("device disconnected".to_string())),
                None => Err(DeviceError::Grab("device released".to_string())),
            }
        });

        let outcome = match timeout(grab_timeout, grab).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(DeviceError::Grab(e.to_string())),
            Err(_) => Err(DeviceError::Timeout(grab_timeout)),
        };

        match outcome {
            Ok(frame) => {
                let shape = frame.shape();
                let colormap = frame.colour_space().as_str();
                chunk.add_data(DataItem::image("frame", frame));
                chunk.add_status(StatusKind::Capturing, codes::SUCCESS);
                chunk.add_metadata("colormap", Value::from(colormap));
                chunk.add_metadata("shape", Value::from(shape.to_vec()));
                for (name, value) in self.config.metadata_items() {
                    chunk.add_metadata(name.clone(), value.clone());
                }
                debug!("Inlet {}: frame captured {:?}", self.config.name, shape);
            }
            Err(e) => {
                chunk.add_status(StatusKind::Capturing, codes::UNKNOWN_ERROR);
                warn!("Inlet {}: frame not captured: {}", self.config.name, e);
                self.status.set_initialised(false);
            }
        }

        vec![chunk]
    }

    async fn shutdown(&self) {
        let slot = Arc::clone(&self.device);
        let status = Arc::clone(&self.status);
        let name = self.config.name.clone();
        let released = tokio::task::spawn_blocking(move || {
            if let Some(mut device) = lock_slot(&slot).take() {
                device.release();
                info!("Capturing device of inlet {} released", name);
            }
            status.set_initialised(false);
        })
        .await;
        if let Err(e) = released {
            warn!("Releasing inlet {} failed: {}", self.config.name, e);
        }
    }
}

impl Drop for CameraInlet {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.device.try_lock() {
            if let Some(mut device) = slot.take() {
                device.release();
            }
        }
    }
}

// ============================================================================
// SBIO: Mock implementation for testing (no I/O)
// ============================================================================


#[cfg(test)]
mod tests {
    use super::mock::{MockCameraDriver, MockCounters};
    use super::*;
    use crate::chunk::DataItem;
    use serde_json::json;
    use std::sync::atomic::Ordering;

    fn camera_config(parameters: Value) -> InletConfig {
        InletConfig::read(
            "camera",
            &json!({
                "type": "local_camera_cv2",
                "parameters": parameters,
                "metadata": { "site": "greenhouse" }
            }),
        )
        .unwrap()
    }

    fn inlet_with(driver: MockCameraDriver, parameters: Value) -> (CameraInlet, Arc<MockCounters>) {
        let counters = Arc::clone(&driver.counters);
        let inlet = CameraInlet::new(camera_config(parameters), Some(Arc::new(driver)));
        (inlet, counters)
    }

    #[tokio::test]
    async fn test_capture_success() {
        let (mut inlet, _) = inlet_with(MockCameraDriver::default(), json!({}));
        inlet.apply_configuration().await;

        let chunks = inlet.retrieve_data().await;
        assert_eq!(chunks.len(), 1);
        let chunk = &chunks[0];
        assert_eq!(chunk.name(), "camera");
        assert_eq!(chunk.chunk_type(), "local_camera_cv2");
        assert_eq!(chunk.status()[0].code, codes::SUCCESS);
        assert_eq!(chunk.first_raster().map(|r| r.shape()), Some([100, 100, 3]));
        assert!(matches!(&chunk.data()[0], DataItem::Image { name, .. } if name == "frame"));

        let names: Vec<&str> = chunk.metadata().iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["timestamp", "colormap", "shape", "site"]);
        assert_eq!(chunk.metadata()[1].value, json!("BGR"));
        assert_eq!(chunk.metadata()[2].value, json!([100, 100, 3]));
    }

    #[tokio::test]
    async fn test_busy_while_capturing() {
        let driver = MockCameraDriver {
            grab_delay: Duration::from_millis(300),
            ..Default::default()
        };
        let (mut inlet, _) = inlet_with(driver, json!({}));
        inlet.apply_configuration().await;
        let inlet = Arc::new(inlet);

        let first = {
            let inlet = Arc::clone(&inlet);
            tokio::spawn(async move { inlet.retrieve_data().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        let second = inlet.retrieve_data().await;

        assert_eq!(second.len(), 1);
        assert_eq!(second[0].status()[0].code, codes::BUSY);
        assert!(second[0].data().is_empty());

        let first = first.await.unwrap();
        assert_eq!(first[0].status()[0].code, codes::SUCCESS);
        assert!(!inlet.status().capturing);
    }

    #[tokio::test]
    async fn test_invalid_configuration() {
        // Camera nodes have no required parameters of their own
        let mut config = camera_config(json!({}));
        config.missing.push("device_id");
        let inlet = CameraInlet::new(config, Some(Arc::new(MockCameraDriver::default())));

        let chunks = inlet.retrieve_data().await;
        assert_eq!(chunks[0].status()[0].code, codes::INVALID_CONFIGURATION);
        assert_eq!(chunks[0].status()[0].message, "Invalid configuration");
    }

    #[tokio::test]
    async fn test_not_initialised_tries_one_reconnect() {
        let driver = MockCameraDriver {
            fail_open: true,
            ..Default::default()
        };
        let (mut inlet, counters) = inlet_with(driver, json!({}));
        inlet.apply_configuration().await;
        assert_eq!(counters.opens.load(Ordering::SeqCst), 1);

        let chunks = inlet.retrieve_data().await;
        assert_eq!(chunks[0].status()[0].code, codes::NOT_INITIALISED);
        assert_eq!(counters.opens.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_missing_driver_reports_not_initialised() {
        let inlet = CameraInlet::new(camera_config(json!({})), None);
        let chunks = inlet.retrieve_data().await;
        assert_eq!(chunks[0].status()[0].code, codes::NOT_INITIALISED);
    }

    #[tokio::test]
    async fn test_failed_grab_marks_uninitialised() {
        let driver = MockCameraDriver {
            fail_grab: true,
            ..Default::default()
        };
        let (mut inlet, counters) = inlet_with(driver, json!({}));
        inlet.apply_configuration().await;

        let chunks = inlet.retrieve_data().await;
        assert_eq!(chunks[0].status()[0].code, codes::UNKNOWN_ERROR);
        assert!(!inlet.status().initialised);

        // Next cycle reconnects
        inlet.retrieve_data().await;
        assert_eq!(counters.opens.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_grab_timeout() {
        let driver = MockCameraDriver {
            grab_delay: Duration::from_millis(300),
            ..Default::default()
        };
        let mut inlet = CameraInlet::new(camera_config(json!({})), Some(Arc::new(driver)))
            .with_grab_timeout(Duration::from_millis(50));
        inlet.apply_configuration().await;

        let chunks = inlet.retrieve_data().await;
        assert_eq!(chunks[0].status()[0].code, codes::UNKNOWN_ERROR);
        // Still capturing until the device returns
        assert!(inlet.status().capturing);
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(!inlet.status().capturing);
    }

    #[tokio::test]
    async fn test_apply_configuration_is_idempotent() {
        let (mut inlet, counters) = inlet_with(MockCameraDriver::default(), json!({ "exposure": 20 }));

        inlet.apply_configuration().await;
        let first = inlet.status();
        inlet.apply_configuration().await;
        let second = inlet.status();

        assert_eq!(first, second);
        assert!(second.configured);
        assert!(second.fully_configured);
        assert_eq!(counters.opens.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_features_written_and_read_back() {
        let driver = MockCameraDriver {
            features: vec!["exposure", "gain"],
            ..MockCameraDriver::default()
        };
        let (mut inlet, counters) =
            inlet_with(driver, json!({ "device_id": 1, "exposure": 20, "gain": 1.5 }));
        inlet.apply_configuration().await;

        assert!(inlet.status().fully_configured);
        assert_eq!(counters.feature_writes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unsupported_feature_not_fully_configured() {
        let (mut inlet, _) = inlet_with(MockCameraDriver::default(), json!({ "gain": 3 }));
        inlet.apply_configuration().await;

        let status = inlet.status();
        assert!(status.configured);
        assert!(!status.fully_configured);
    }

    #[tokio::test]
    async fn test_shutdown_releases_device() {
        let (mut inlet, counters) = inlet_with(MockCameraDriver::default(), json!({}));
        inlet.apply_configuration().await;
        inlet.shutdown().await;

        assert_eq!(counters.releases.load(Ordering::SeqCst), 1);
        assert!(!inlet.status().initialised);
        drop(inlet);
        assert_eq!(counters.releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_registry_lookup() {
        let mut registry = DeviceRegistry::new();
        registry.register("local_camera_cv2", Arc::new(MockCameraDriver::default()));

        assert!(registry.get("local_camera_cv2").is_some());
        assert!(registry.get("baumer_camera_neoapi").is_none());
        assert_eq!(registry.registered_types(), vec!["local_camera_cv2"]);
    }
}
