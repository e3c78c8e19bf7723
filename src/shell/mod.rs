//! Shells: how a pipeline is triggered and where its results go
//!
//! A shell holds a weak handle to the pipeline it drives. The periodic shell
//! runs cycles on a fixed schedule; the HTTP shell runs one cycle per request
//! and exposes the configuration for inspection and live replacement.

pub mod http;
pub mod periodic;

use std::net::SocketAddr;
use std::sync::Weak;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::chunk::ChunkRef;
use crate::config::{ShellConfig, ShellKind};

pub use http::HttpShell;
pub use periodic::{PeriodicShell, SchedulerStats, TimeScheduler};

#[derive(Error, Debug)]
pub enum ShellError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("A callback is already attached to this shell")]
    CallbackAlreadyAttached,

    #[error("No callback attached to this shell")]
    MissingCallback,

    #[error("Invalid shell parameter: {0}")]
    InvalidParameter(String),
}

/// Result of one pipeline cycle
#[derive(Debug, Clone)]
pub enum ExecutionOutput {
    /// The pipeline is not configured or is being reconfigured
    Skipped,
    /// Wire-format rendering for request/response shells
    Json(String),
    /// The raw chunk list for local shells
    Chunks(Vec<ChunkRef>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PipelineStatus {
    pub configured: bool,
    pub reconfiguring: bool,
    pub inlets: usize,
    pub processors: usize,
}

// ============================================================================
// SBIO: Trait for abstraction (allows mocking in tests)
// ============================================================================

/// What a shell can ask of the pipeline it drives
#[async_trait]
pub trait PipelineHandle: Send + Sync {
    async fn single_execution(&self) -> ExecutionOutput;

    /// Merge a configuration subtree and rebuild inlets and processors
    async fn update_configuration(&self, tree: Value);

    /// The live configuration tree
    async fn configuration_tree(&self) -> Value;

    fn status(&self) -> PipelineStatus;
}

#[async_trait]
pub trait Shell: Send + Sync {
    fn shell_type(&self) -> &'static str;

    /// Exactly one callback may be attached
    fn attach_callback(&mut self, callback: Weak<dyn PipelineHandle>) -> Result<(), ShellError>;

    /// Start serving. Calling it again on a running shell is a no-op.
    async fn apply_configuration(&mut self) -> Result<(), ShellError>;

    /// Network address served, for shells that listen
    fn local_addr(&self) -> Option<SocketAddr> {
        None
    }

    async fn shutdown(&mut self);
}

/// Stores the single callback of a shell
#[derive(Default)]
pub(crate) struct CallbackSlot(Option<Weak<dyn PipelineHandle>>);

impl CallbackSlot {
    pub fn attach(&mut self, callback: Weak<dyn PipelineHandle>) -> Result<(), ShellError> {
        if self.0.is_some() {
            return Err(ShellError::CallbackAlreadyAttached);
        }
        self.0 = Some(callback);
        Ok(())
    }

    pub fn get(&self) -> Result<Weak<dyn PipelineHandle>, ShellError> {
        self.0.clone().ok_or(ShellError::MissingCallback)
    }
}

pub fn build_shell(config: &ShellConfig) -> Box<dyn Shell> {
    match config.kind {
        ShellKind::PeriodicalLocal => Box::new(PeriodicShell::new(config.clone())),
        ShellKind::RestApi => Box::new(HttpShell::new(config.clone())),
    }
}

// ============================================================================
// SBIO: Mock implementation for testing (no I/O)
// ============================================================================
