use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::drivers::Drivers;
use crate::chunk::{chunks_to_wire, dedup_chunks, ChunkRef};
use crate::config::{Configuration, InletConfig, ProcessorConfig, ShellKind};
use crate::inlet::{build_inlet, execute_inlet, Inlet};
use crate::processor::{build_processor, execute_processor, Processor, ProcessorRole};
use crate::shell::{
    build_shell, ExecutionOutput, PipelineHandle, PipelineStatus, Shell, ShellError,
};

#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("Configuration is invalid:\n{0}")]
    InvalidConfiguration(String),

    #[error("Configuration has no shell")]
    MissingShell,

    #[error(transparent)]
    Shell(#[from] ShellError),
}

/// Inlets and processors of one configuration generation
#[derive(Default)]
pub struct ComponentSet {
    inlets: Vec<Box<dyn Inlet>>,
    processors: Vec<Box<dyn Processor>>,
}

impl ComponentSet {
    pub fn new(inlets: Vec<Box<dyn Inlet>>, processors: Vec<Box<dyn Processor>>) -> Self {
        Self { inlets, processors }
    }

    /// Construct and configure every component, in declaration order
    pub async fn build(
        inlets: &[InletConfig],
        processors: &[ProcessorConfig],
        drivers: &Drivers,
    ) -> Self {
        let mut set = Self::default();
        for config in inlets {
            let mut inlet = build_inlet(config, drivers);
            inlet.apply_configuration().await;
            info!("Inlet {} ({}) added", inlet.name(), inlet.inlet_type());
            set.inlets.push(inlet);
        }
        for config in processors {
            let mut processor = build_processor(config, drivers);
            processor.apply_configuration().await;
            info!(
                "Processor {} ({}) added",
                processor.name(),
                processor.processor_type()
            );
            set.processors.push(processor);
        }
        set
    }

    pub fn inlet_count(&self) -> usize {
        self.inlets.len()
    }

    pub fn processor_count(&self) -> usize {
        self.processors.len()
    }

    /// Run every inlet, then the processor chain.
    ///
    /// Selectors narrow the running input without contributing chunks. Sinks
    /// see everything gathered so far. Transforms feed the next processor and
    /// add their output to the result. The chain stops at the first selector
    /// returning nothing or transform returning a chunk without data.
    pub async fn execute(&self) -> Vec<ChunkRef> {
        let mut collected = Vec::new();
        for inlet in &self.inlets {
            collected.extend(execute_inlet(inlet.as_ref()).await);
        }

        let mut current = collected.clone();
        let mut produced: Vec<ChunkRef> = Vec::new();

        for processor in &self.processors {
            match processor.role() {
                ProcessorRole::Selector => {
                    current = execute_processor(processor.as_ref(), &current).await;
                    if current.is_empty() {
                        error!(
                            "Processor {} selected no chunks, processing chain stopped",
                            processor.name()
                        );
                        break;
                    }
                }
                ProcessorRole::Sink => {
                    let everything = dedup_chunks(collected.iter().chain(&produced));
                    execute_processor(processor.as_ref(), &everything).await;
                }
                ProcessorRole::Transform => {
                    current = execute_processor(processor.as_ref(), &current).await;
                    if current.iter().any(|chunk| chunk.is_empty()) {
                        error!(
                            "Processor {} returned a chunk without data, processing chain stopped",
                            processor.name()
                        );
                        break;
                    }
                    produced.extend(current.iter().cloned());
                }
            }
        }

        collected.extend(produced);
        dedup_chunks(&collected)
    }

    pub async fn shutdown(&self) {
        futures::future::join_all(self.inlets.iter().map(|inlet| inlet.shutdown())).await;
        futures::future::join_all(self.processors.iter().map(|p| p.shutdown())).await;
    }
}

/// Owns the configuration, the shell and the live component set
pub struct PipelineExecutor {
    configuration: RwLock<Configuration>,
    drivers: Drivers,
    components: RwLock<Arc<ComponentSet>>,
    shell: Mutex<Option<Box<dyn Shell>>>,
    update_lock: Mutex<()>,
    encode_wire: AtomicBool,
    reconfiguring: AtomicBool,
    configured: AtomicBool,
}

impl PipelineExecutor {
    pub fn new(configuration: Configuration, drivers: Drivers) -> Arc<Self> {
        Arc::new(Self {
            configuration: RwLock::new(configuration),
            drivers,
            components: RwLock::new(Arc::new(ComponentSet::default())),
            shell: Mutex::new(None),
            update_lock: Mutex::new(()),
            encode_wire: AtomicBool::new(false),
            reconfiguring: AtomicBool::new(false),
            configured: AtomicBool::new(false),
        })
    }

    /// Start the shell, then build inlets and processors
    pub async fn apply_configuration(self: &Arc<Self>) -> Result<(), ExecutorError> {
        let (shell_config, inlets, processors) = {
            let configuration = self.configuration();
            if !configuration.is_valid() {
                let report = configuration.validation_report().to_string();
                error!("Configuration is invalid, pipeline not configured:\n{}", report);
                return Err(ExecutorError::InvalidConfiguration(report));
            }
            let shell = configuration.shell().cloned().ok_or(ExecutorError::MissingShell)?;
            (
                shell,
                configuration.inlets().to_vec(),
                configuration.processors().to_vec(),
            )
        };

        {
            let mut slot = self.shell.lock().await;
            if slot.is_none() {
                let mut shell = build_shell(&shell_config);
                let handle: Arc<dyn PipelineHandle> = self.clone();
                shell.attach_callback(Arc::downgrade(&handle))?;
                self.encode_wire
                    .store(shell_config.kind == ShellKind::RestApi, Ordering::SeqCst);
                shell.apply_configuration().await?;
                info!("Shell {} configured", shell.shell_type());
                *slot = Some(shell);
            }
        }

        let _update = self.update_lock.lock().await;
        self.reconfiguring.store(true, Ordering::SeqCst);
        self.replace_components(&inlets, &processors).await;
        self.configured.store(true, Ordering::SeqCst);
        self.reconfiguring.store(false, Ordering::SeqCst);
        info!("Pipeline configured");
        Ok(())
    }

    /// Address of the HTTP shell, once serving
    pub async fn shell_addr(&self) -> Option<SocketAddr> {
        self.shell.lock().await.as_ref().and_then(|shell| shell.local_addr())
    }

    /// Stop the shell first so no new cycle starts, then release components
    pub async fn shutdown(&self) {
        if let Some(mut shell) = self.shell.lock().await.take() {
            shell.shutdown().await;
        }
        self.configured.store(false, Ordering::SeqCst);
        let components = self.swap_components(ComponentSet::default());
        components.shutdown().await;
        info!("Pipeline stopped");
    }

    fn configuration(&self) -> std::sync::RwLockReadGuard<'_, Configuration> {
        self.configuration.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn current_components(&self) -> Arc<ComponentSet> {
        Arc::clone(&self.components.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn swap_components(&self, set: ComponentSet) -> Arc<ComponentSet> {
        let mut slot = self.components.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *slot, Arc::new(set))
    }

    /// Release the live components before building their successors.
    ///
    /// Devices such as cameras can be held by one owner only, so the old
    /// generation is shut down first. Cycles still holding the old set keep
    /// running on it but find their devices closed.
    async fn replace_components(&self, inlets: &[InletConfig], processors: &[ProcessorConfig]) {
        let previous = self.swap_components(ComponentSet::default());
        previous.shutdown().await;
        let set = ComponentSet::build(inlets, processors, &self.drivers).await;
        self.swap_components(set);
    }

    fn render_wire(chunks: Vec<ChunkRef>) -> ExecutionOutput {
        let mut encoded = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            let mut chunk = Arc::unwrap_or_clone(chunk);
            if let Err(e) = chunk.encode_images_base64() {
                warn!("Chunk {}: image not encoded: {}", chunk.name(), e);
            }
            encoded.push(chunk);
        }
        match serde_json::to_string(&chunks_to_wire(&encoded)) {
            Ok(text) => ExecutionOutput::Json(text),
            Err(e) => {
                error!("Cycle result cannot be serialized: {}", e);
                ExecutionOutput::Skipped
            }
        }
    }
}

#[async_trait]
impl PipelineHandle for PipelineExecutor {
    async fn single_execution(&self) -> ExecutionOutput {
        if self.reconfiguring.load(Ordering::SeqCst) {
            debug!("Reconfiguration in progress, execution skipped");
            return ExecutionOutput::Skipped;
        }
        if !self.configured.load(Ordering::SeqCst) {
            debug!("Pipeline not configured yet, execution skipped");
            return ExecutionOutput::Skipped;
        }

        let started = Instant::now();
        let components = self.current_components();
        let chunks = components.execute().await;
        info!(
            "Pipeline execution produced {} chunk(s) in {:?}",
            chunks.len(),
            started.elapsed()
        );

        if self.encode_wire.load(Ordering::SeqCst) {
            Self::render_wire(chunks)
        } else {
            ExecutionOutput::Chunks(chunks)
        }
    }

    async fn update_configuration(&self, tree: Value) {
        let _update = self.update_lock.lock().await;
        self.reconfiguring.store(true, Ordering::SeqCst);
        info!("Reconfiguring inlets and processors");

        let (inlets, processors) = {
            let mut configuration =
                self.configuration.write().unwrap_or_else(PoisonError::into_inner);
            configuration.update(&tree);
            if !configuration.is_valid() {
                warn!(
                    "Updated configuration is invalid, applying anyway:\n{}",
                    configuration.validation_report()
                );
            }
            (configuration.inlets().to_vec(), configuration.processors().to_vec())
        };

        self.replace_components(&inlets, &processors).await;
        self.reconfiguring.store(false, Ordering::SeqCst);
        info!("Reconfiguration finished");
    }

    async fn configuration_tree(&self) -> Value {
        self.configuration().raw().clone()
    }

    fn status(&self) -> PipelineStatus {
        let components = self.current_components();
        PipelineStatus {
            configured: self.configured.load(Ordering::SeqCst),
            reconfiguring: self.reconfiguring.load(Ordering::SeqCst),
            inlets: components.inlet_count(),
            processors: components.processor_count(),
        }
    }
}
