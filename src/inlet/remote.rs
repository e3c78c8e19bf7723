//! Remote-pipeline inlet: reads the wire output of another instance

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use super::Inlet;
use crate::chunk::{chunks_from_wire, codes, DataChunk, StatusKind, WireError};
use crate::config::InletConfig;

const DEFAULT_TIMEOUT_MS: u64 = 5000;

#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("Request failed: {0}")]
    Request(String),

    #[error("Endpoint answered with HTTP {0}")]
    Status(u16),

    #[error("Response is not valid JSON: {0}")]
    Parse(String),

    #[error("Response is not a chunk map: {0}")]
    Wire(#[from] WireError),
}

impl RemoteError {
    /// Status code reported in the `restapi_read` status item
    pub fn status_code(&self) -> i64 {
        match self {
            RemoteError::Status(_) => codes::REMOTE_INTERNAL_ERROR,
            _ => codes::UNKNOWN_ERROR,
        }
    }
}

pub struct RemoteInlet {
    config: InletConfig,
    client: reqwest::Client,
}

impl RemoteInlet {
    pub fn new(config: InletConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn timeout(&self) -> Duration {
        Duration::from_millis(self.config.param_u64("timeout_ms").unwrap_or(DEFAULT_TIMEOUT_MS))
    }

    async fn fetch(&self, endpoint: &str) -> Result<Vec<DataChunk>, RemoteError> {
        let response = self
            .client
            .get(endpoint)
            .timeout(self.timeout())
            .send()
            .await
            .map_err(|e| RemoteError::Request(e.to_string()))?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(RemoteError::Status(status.as_u16()));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| RemoteError::Parse(e.to_string()))?;
        if body.is_null() {
            // Remote pipeline is reconfiguring
            return Ok(Vec::new());
        }
        Ok(chunks_from_wire(&body, self.config.hidden)?)
    }

    fn own_chunk(&self, code: i64) -> DataChunk {
        let mut chunk = DataChunk::new(&self.config.name, self.config.type_name())
            .with_parameters(self.config.parameters.clone())
            .with_hidden(self.config.hidden);
        chunk.add_status(StatusKind::RemoteRead, code);
        for (name, value) in self.config.metadata_items() {
            chunk.add_metadata(name.clone(), value.clone());
        }
        chunk
    }
}

#[async_trait]
impl Inlet for RemoteInlet {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn inlet_type(&self) -> &'static str {
        self.config.type_name()
    }

    async fn apply_configuration(&mut self) {}

    async fn retrieve_data(&self) -> Vec<DataChunk> {
        let Some(endpoint) = self.config.param_str("endpoint").filter(|e| !e.is_empty()) else {
            warn!("Inlet {}: no execution due to invalid configuration", self.config.name);
            return vec![self.own_chunk(codes::INVALID_CONFIGURATION)];
        };

        match self.fetch(endpoint).await {
            Ok(chunks) if chunks.is_empty() => {
                debug!("Inlet {}: remote pipeline returned no chunks", self.config.name);
                vec![self.own_chunk(codes::REMOTE_READ_OK)]
            }
            Ok(mut chunks) => {
                debug!(
                    "Inlet {}: {} chunk(s) read from {}",
                    self.config.name,
                    chunks.len(),
                    endpoint
                );
                for chunk in &mut chunks {
                    chunk.add_status(StatusKind::RemoteRead, codes::REMOTE_READ_OK);
                }
                chunks
            }
            Err(e) => {
                warn!("Inlet {}: reading {} failed: {}", self.config.name, endpoint, e);
                vec![self.own_chunk(e.status_code())]
            }
        }
    }
}
