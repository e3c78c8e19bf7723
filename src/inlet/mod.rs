//! Inlets: configured data sources producing chunks on demand

pub mod camera;
#[cfg(feature = "opencv")]
pub mod opencv_camera;
pub mod protocol;
pub mod remote;
pub mod static_value;

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::debug;

use crate::chunk::{ChunkRef, DataChunk};
use crate::config::{InletConfig, InletKind};
use crate::runtime::Drivers;

pub use camera::{CameraInlet, CameraStatusSnapshot, DeviceRegistry};
pub use protocol::{ConnectionState, ProtocolInlet};
pub use remote::RemoteInlet;
pub use static_value::StaticValueInlet;

#[async_trait]
pub trait Inlet: Send + Sync {
    fn name(&self) -> &str;

    fn inlet_type(&self) -> &'static str;

    /// Bind parameters to device or connection state. Safe to call again.
    async fn apply_configuration(&mut self);

    /// One acquisition. Always yields at least one chunk; failures are
    /// reported through the chunk's status items.
    async fn retrieve_data(&self) -> Vec<DataChunk>;

    /// Release devices and stop background tasks
    async fn shutdown(&self) {}
}

/// Milliseconds since the Unix epoch
pub(crate) fn timestamp_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Run one inlet and wrap its chunks for sharing
pub async fn execute_inlet(inlet: &dyn Inlet) -> Vec<ChunkRef> {
    debug!("Inlet {}: begin retrieving data", inlet.name());
    let started = Instant::now();
    let chunks: Vec<ChunkRef> = inlet.retrieve_data().await.into_iter().map(Arc::new).collect();
    debug!(
        "Inlet {}: {} chunk(s) retrieved in {:?}",
        inlet.name(),
        chunks.len(),
        started.elapsed()
    );
    chunks
}

/// Construct the inlet for a configuration node
pub fn build_inlet(config: &InletConfig, drivers: &Drivers) -> Box<dyn Inlet> {
    let config = config.clone();
    match config.kind {
        InletKind::LocalCamera | InletKind::VendorCamera => {
            let driver = drivers.cameras.get(config.type_name());
            Box::new(CameraInlet::new(config, driver))
        }
        InletKind::StaticValue => Box::new(StaticValueInlet::new(config)),
        InletKind::ProcessVariable => {
            Box::new(ProtocolInlet::new(config, drivers.protocol.clone()))
        }
        InletKind::Remote => Box::new(RemoteInlet::new(config)),
    }
}
