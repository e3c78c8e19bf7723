use std::net::SocketAddr;
use std::sync::Weak;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::{CallbackSlot, PipelineHandle, Shell, ShellError};
use crate::config::ShellConfig;
use crate::server::{create_router, validate_endpoint, ShellState};

/// Serves one pipeline cycle per request
pub struct HttpShell {
    config: ShellConfig,
    callback: CallbackSlot,
    local_addr: Option<SocketAddr>,
    shutdown: Option<watch::Sender<bool>>,
    task: Option<JoinHandle<()>>,
}

impl HttpShell {
    pub fn new(config: ShellConfig) -> Self {
        Self {
            config,
            callback: CallbackSlot::default(),
            local_addr: None,
            shutdown: None,
            task: None,
        }
    }

    fn bind_addr(&self) -> Result<String, ShellError> {
        let host = self.config.param_str("host").unwrap_or("0.0.0.0");
        let port = self
            .config
            .param_u64("port")
            .and_then(|p| u16::try_from(p).ok())
            .ok_or_else(|| ShellError::InvalidParameter("port must be between 0 and 65535".to_string()))?;
        Ok(format!("{}:{}", host, port))
    }

    fn endpoint(&self) -> Result<String, ShellError> {
        let endpoint = self.config.param_str("endpoint").unwrap_or("/get_frame");
        validate_endpoint(endpoint).map_err(ShellError::InvalidParameter)?;
        Ok(endpoint.to_string())
    }
}

#[async_trait]
impl Shell for HttpShell {
    fn shell_type(&self) -> &'static str {
        self.config.type_name()
    }

    fn attach_callback(&mut self, callback: Weak<dyn PipelineHandle>) -> Result<(), ShellError> {
        self.callback.attach(callback)
    }

    async fn apply_configuration(&mut self) -> Result<(), ShellError> {
        if self.task.is_some() {
            return Ok(());
        }
        let pipeline = self.callback.get()?;
        let endpoint = self.endpoint()?;
        let addr = self.bind_addr()?;

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|source| ShellError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local_addr = listener.local_addr().map_err(|source| ShellError::Bind {
            addr: addr.clone(),
            source,
        })?;

        info!("HTTP shell listening on {}", local_addr);
        info!("Endpoints:");
        info!("  GET  {:<16} - Pipeline result", endpoint);
        info!("  GET  /get_config       - Live configuration");
        info!("  POST /upload_config    - Replace inlets and processors");
        info!("  GET  /health           - Health check");

        let app = create_router(ShellState::new(pipeline, endpoint));
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        self.task = Some(tokio::spawn(async move {
            let stopped = async move {
                while !*shutdown_rx.borrow() {
                    if shutdown_rx.changed().await.is_err() {
                        break;
                    }
                }
            };
            if let Err(e) = axum::serve(listener, app).with_graceful_shutdown(stopped).await {
                error!("Server error: {}", e);
            }
        }));
        self.shutdown = Some(shutdown_tx);
        self.local_addr = Some(local_addr);
        Ok(())
    }

    /// Address actually bound, once serving
    fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    async fn shutdown(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(true);
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("Server task ended abnormally: {}", e);
            }
        }
        self.local_addr = None;
        info!("HTTP shell stopped");
    }
}
