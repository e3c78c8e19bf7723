//! Industrial-protocol (OPC UA) process-value inlet
//!
//! The inlet owns a [`ConnectionSupervisor`]: a background task that checks
//! liveness on a fixed interval by reading the server-status node and
//! reconnects when the check fails. Reads performed by the inlet never wait
//! for a connection; when the supervisor reports the link down the read is
//! reported as failed for that cycle.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::Inlet;
use crate::chunk::{codes, DataChunk, DataItem, StatusKind};
use crate::config::InletConfig;

/// Interval of the connectivity loop
pub const RECONNECT_INTERVAL: Duration = Duration::from_millis(1000);

/// Namespace and id of the server-status node used as liveness probe
pub const LIVENESS_NAMESPACE: u16 = 0;
pub const LIVENESS_NODE_ID: u32 = 2259;

const READ_TIMEOUT: Duration = Duration::from_millis(1000);

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Connection to {0} failed: {1}")]
    Connect(String, String),

    #[error("Not connected to {0}")]
    NotConnected(String),

    #[error("Reading node failed: {0}")]
    Read(String),

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NodeIdentifier {
    Numeric(u32),
    String(String),
}

impl NodeIdentifier {
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n
                .as_u64()
                .and_then(|n| u32::try_from(n).ok())
                .map(NodeIdentifier::Numeric),
            Value::String(s) => Some(
                s.parse::<u32>()
                    .map(NodeIdentifier::Numeric)
                    .unwrap_or_else(|_| NodeIdentifier::String(s.clone())),
            ),
            _ => None,
        }
    }
}

impl std::fmt::Display for NodeIdentifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeIdentifier::Numeric(id) => write!(f, "i={}", id),
            NodeIdentifier::String(id) => write!(f, "s={}", id),
        }
    }
}

/// Where and how to connect
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolEndpoint {
    pub server: String,
    pub username: String,
    pub password: String,
}

// ============================================================================
// SBIO: Trait for abstraction (allows mocking in tests)
// ============================================================================

#[async_trait]
pub trait ProtocolClient: Send + Sync {
    async fn connect(&self) -> Result<(), ProtocolError>;

    async fn disconnect(&self) -> Result<(), ProtocolError>;

    async fn read_node(&self, namespace: u16, id: &NodeIdentifier) -> Result<Value, ProtocolError>;
}

/// Creates protocol clients for endpoints
pub trait ProtocolConnector: Send + Sync {
    fn client(&self, endpoint: &ProtocolEndpoint) -> Arc<dyn ProtocolClient>;
}

// ============================================================================
// Connectivity supervision
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Keeps one protocol client connected from a background task
pub struct ConnectionSupervisor {
    client: Arc<dyn ProtocolClient>,
    server: String,
    state: watch::Receiver<ConnectionState>,
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionSupervisor {
    pub fn spawn(client: Arc<dyn ProtocolClient>, server: impl Into<String>, interval: Duration) -> Self {
        let server = server.into();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(connectivity_loop(
            Arc::clone(&client),
            server.clone(),
            interval,
            state_tx,
            shutdown_rx,
        ));

        Self {
            client,
            server,
            state: state_rx,
            shutdown: shutdown_tx,
            task: Mutex::new(Some(task)),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn client(&self) -> &Arc<dyn ProtocolClient> {
        &self.client
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    /// Wait until the first connection attempt has settled, at most `limit`
    pub async fn wait_first_check(&self, limit: Duration) {
        let mut state = self.state.clone();
        let _ = timeout(limit, state.wait_for(|s| *s != ConnectionState::Connecting)).await;
    }

    /// Stop the loop, wait until it has exited, then close the client
    pub async fn disconnect(&self) {
        info!("Disconnecting from protocol server {} ...", self.server);
        let _ = self.shutdown.send(true);
        if let Some(task) = self.task.lock().await.take() {
            if let Err(e) = task.await {
                warn!("Connectivity loop for {} ended abnormally: {}", self.server, e);
            }
        }
        if let Err(e) = self.client.disconnect().await {
            debug!("Closing client for {}: {}", self.server, e);
        }
        info!("Disconnected from protocol server {}", self.server);
    }

    pub async fn is_stopped(&self) -> bool {
        self.task
            .lock()
            .await
            .as_ref()
            .map_or(true, |task| task.is_finished())
    }
}

impl Drop for ConnectionSupervisor {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

async fn check_liveness(client: &dyn ProtocolClient, interval: Duration) -> bool {
    let probe = client.read_node(LIVENESS_NAMESPACE, &NodeIdentifier::Numeric(LIVENESS_NODE_ID));
    matches!(timeout(interval, probe).await, Ok(Ok(_)))
}

async fn connectivity_loop(
    client: Arc<dyn ProtocolClient>,
    server: String,
    interval: Duration,
    state: watch::Sender<ConnectionState>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            break;
        }

        debug!("Checking connection to protocol server {} ...", server);
        if check_liveness(client.as_ref(), interval).await {
            state.send_replace(ConnectionState::Connected);
        } else {
            if *state.borrow() == ConnectionState::Connected {
                warn!("Connection to protocol server {} does not persist", server);
            }
            state.send_replace(ConnectionState::Connecting);
            info!("Connecting to protocol server {} ...", server);
            match timeout(interval, client.connect()).await {
                Ok(Ok(())) => {
                    info!("Connection to protocol server {} established", server);
                    state.send_replace(ConnectionState::Connected);
                }
                Ok(Err(e)) => {
                    warn!("{}", e);
                    state.send_replace(ConnectionState::Disconnected);
                }
                Err(_) => {
                    warn!("Connecting to protocol server {} timed out", server);
                    state.send_replace(ConnectionState::Disconnected);
                }
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    state.send_replace(ConnectionState::Disconnected);
    debug!("Connectivity loop for {} stopped", server);
}

// ============================================================================
// Inlet
// ============================================================================

pub struct ProtocolInlet {
    config: InletConfig,
    connector: Option<Arc<dyn ProtocolConnector>>,
    supervisor: Option<ConnectionSupervisor>,
    interval: Duration,
}

impl ProtocolInlet {
    pub fn new(config: InletConfig, connector: Option<Arc<dyn ProtocolConnector>>) -> Self {
        Self {
            config,
            connector,
            supervisor: None,
            interval: RECONNECT_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.supervisor
            .as_ref()
            .map_or(ConnectionState::Disconnected, ConnectionSupervisor::state)
    }

    fn endpoint(&self) -> ProtocolEndpoint {
        ProtocolEndpoint {
            server: self.config.param_str("server").unwrap_or("0.0.0.0").to_string(),
            username: self.config.param_str("username").unwrap_or_default().to_string(),
            password: self.config.param_str("password").unwrap_or_default().to_string(),
        }
    }

    /// Single best-effort read; `None` when disconnected or failed
    async fn poll_node(&self) -> Option<Value> {
        let supervisor = self.supervisor.as_ref()?;
        if !supervisor.is_connected() {
            warn!(
                "Cannot poll {} from protocol server {} (no connection)",
                self.config.name,
                supervisor.server()
            );
            return None;
        }

        let namespace = self
            .config
            .param_u64("node_ns")
            .and_then(|ns| u16::try_from(ns).ok())?;
        let node = self.config.param("node_id").and_then(NodeIdentifier::from_value)?;

        match timeout(READ_TIMEOUT, supervisor.client().read_node(namespace, &node)).await {
            Ok(Ok(value)) => {
                debug!(
                    "Server {}, node ns={};{}: value polled ({})",
                    supervisor.server(),
                    namespace,
                    node,
                    value
                );
                Some(value)
            }
            Ok(Err(e)) => {
                warn!("Server {}, node {}: value polling failed: {}", supervisor.server(), node, e);
                None
            }
            Err(_) => {
                warn!(
                    "Server {}, node {}: {}",
                    supervisor.server(),
                    node,
                    ProtocolError::Timeout(READ_TIMEOUT)
                );
                None
            }
        }
    }
}

#[async_trait]
impl Inlet for ProtocolInlet {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn inlet_type(&self) -> &'static str {
        self.config.type_name()
    }

    async fn apply_configuration(&mut self) {
        if self.supervisor.is_some() {
            return;
        }
        if !self.config.is_valid() {
            warn!("Inlet {}: invalid configuration, not connecting", self.config.name);
            return;
        }
        let Some(connector) = &self.connector else {
            warn!("Inlet {}: no protocol client available", self.config.name);
            return;
        };

        let endpoint = self.endpoint();
        let client = connector.client(&endpoint);
        let supervisor = ConnectionSupervisor::spawn(client, endpoint.server, self.interval);
        supervisor.wait_first_check(self.interval).await;
        self.supervisor = Some(supervisor);
    }

    async fn retrieve_data(&self) -> Vec<DataChunk> {
        let mut chunk = DataChunk::new(&self.config.name, self.config.type_name())
            .with_parameters(self.config.parameters.clone())
            .with_hidden(self.config.hidden);

        if !self.config.is_valid() {
            chunk.add_status(StatusKind::ProtocolRead, codes::INVALID_CONFIGURATION);
            warn!("Inlet {}: no execution due to invalid configuration", self.config.name);
        } else if self.supervisor.is_none() {
            chunk.add_status(StatusKind::ProtocolRead, codes::NOT_INITIALISED);
            warn!("Inlet {}: no protocol client initialised", self.config.name);
        } else {
            match self.poll_node().await {
                Some(value) => {
                    chunk.add_status(StatusKind::ProtocolRead, codes::SUCCESS);
                    chunk.add_data(DataItem::value("opcua_value", value));
                }
                None => chunk.add_status(StatusKind::ProtocolRead, codes::UNKNOWN_ERROR),
            }
        }

        for (name, value) in self.config.metadata_items() {
            chunk.add_metadata(name.clone(), value.clone());
        }
        vec![chunk]
    }

    async fn shutdown(&self) {
        if let Some(supervisor) = &self.supervisor {
            supervisor.disconnect().await;
        }
    }
}

// ============================================================================
// SBIO: Mock implementation for testing (no I/O)
// ============================================================================
