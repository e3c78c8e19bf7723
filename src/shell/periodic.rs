use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::{CallbackSlot, ExecutionOutput, PipelineHandle, Shell, ShellError};
use crate::config::ShellConfig;
use crate::processor::ChunkWriter;

const DEFAULT_INTERVAL_MS: u64 = 1000;

/// Counters kept by a running scheduler
#[derive(Debug, Default)]
pub struct SchedulerStats {
    cycles: AtomicU64,
    skipped: AtomicU64,
    overruns: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SchedulerSnapshot {
    pub cycles: u64,
    pub skipped: u64,
    pub overruns: u64,
}

impl SchedulerStats {
    pub fn snapshot(&self) -> SchedulerSnapshot {
        SchedulerSnapshot {
            cycles: self.cycles.load(Ordering::SeqCst),
            skipped: self.skipped.load(Ordering::SeqCst),
            overruns: self.overruns.load(Ordering::SeqCst),
        }
    }
}

/// Fixed-rate cycle driver.
///
/// Deadlines advance by exactly one interval per cycle so that late cycles do
/// not shift the schedule. A cycle that would start after its deadline is
/// skipped; a cycle that overruns its deadline is followed immediately by the
/// next one.
#[derive(Debug, Clone, Copy)]
pub struct TimeScheduler {
    interval: Duration,
}

impl TimeScheduler {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub async fn run<F, Fut>(
        &self,
        stats: &SchedulerStats,
        mut shutdown: watch::Receiver<bool>,
        mut cycle: F,
    ) where
        F: FnMut() -> Fut,
        Fut: Future<Output = bool>,
    {
        let mut expected_end = Instant::now();

        loop {
            if *shutdown.borrow() {
                break;
            }

            let step_begin = Instant::now();
            expected_end += self.interval;
            if step_begin > expected_end {
                stats.skipped.fetch_add(1, Ordering::SeqCst);
                error!("Shell execution step skipped (consider increasing interval)");
                continue;
            }

            debug!("Shell execution step began");
            if !cycle().await {
                break;
            }
            stats.cycles.fetch_add(1, Ordering::SeqCst);

            if Instant::now() > expected_end {
                stats.overruns.fetch_add(1, Ordering::SeqCst);
                warn!(
                    "Shell execution step took longer than given time interval ({:?})",
                    self.interval
                );
                continue;
            }

            tokio::select! {
                _ = tokio::time::sleep_until(expected_end) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        debug!("Scheduler stopped");
    }
}

/// Runs the pipeline on a fixed interval, optionally persisting each cycle
pub struct PeriodicShell {
    config: ShellConfig,
    callback: CallbackSlot,
    stats: Arc<SchedulerStats>,
    shutdown: Option<watch::Sender<bool>>,
    task: Option<JoinHandle<()>>,
}

impl PeriodicShell {
    pub fn new(config: ShellConfig) -> Self {
        Self {
            config,
            callback: CallbackSlot::default(),
            stats: Arc::new(SchedulerStats::default()),
            shutdown: None,
            task: None,
        }
    }

    pub fn stats(&self) -> SchedulerSnapshot {
        self.stats.snapshot()
    }

    fn interval(&self) -> Result<Duration, ShellError> {
        match self.config.param_u64("time_interval") {
            Some(0) => Err(ShellError::InvalidParameter(
                "time_interval must be positive".to_string(),
            )),
            Some(ms) => Ok(Duration::from_millis(ms)),
            None if self.config.param("time_interval").is_some() => {
                Err(ShellError::InvalidParameter(
                    "time_interval must be a number of milliseconds".to_string(),
                ))
            }
            None => Ok(Duration::from_millis(DEFAULT_INTERVAL_MS)),
        }
    }

    fn writer(&self) -> Option<ChunkWriter> {
        self.config.param_path("save_path").map(ChunkWriter::new)
    }
}

async fn run_cycle(pipeline: &Weak<dyn PipelineHandle>, writer: Option<&ChunkWriter>) -> bool {
    let Some(pipeline) = pipeline.upgrade() else {
        info!("Pipeline dropped, stopping scheduler");
        return false;
    };
    match pipeline.single_execution().await {
        ExecutionOutput::Chunks(chunks) => {
            if let Some(writer) = writer {
                if let Err(e) = writer.write(&chunks).await {
                    error!("Cycle result not persisted: {}", e);
                }
            }
        }
        ExecutionOutput::Skipped => debug!("Cycle skipped by pipeline"),
        ExecutionOutput::Json(_) => {}
    }
    true
}

#[async_trait]
impl Shell for PeriodicShell {
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
        let scheduler = TimeScheduler::new(self.interval()?);

        let writer = self.writer();
        if let Some(writer) = &writer {
            if let Err(e) = writer.prepare() {
                error!("Cannot create {}: {}", writer.save_path().display(), e);
            }
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let stats = Arc::clone(&self.stats);
        info!("Periodic shell started, interval {:?}", scheduler.interval());

        self.task = Some(tokio::spawn(async move {
            scheduler
                .run(&stats, shutdown_rx, || run_cycle(&pipeline, writer.as_ref()))
                .await;
        }));
        self.shutdown = Some(shutdown_tx);
        Ok(())
    }

    async fn shutdown(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(true);
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("Scheduler task ended abnormally: {}", e);
            }
        }
        info!("Periodic shell stopped");
    }
}
