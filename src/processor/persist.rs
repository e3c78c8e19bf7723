//! Persisting chunk snapshots to disk
//!
//! A snapshot is keyed by one capture timestamp (milliseconds since the Unix
//! epoch): every image item of an image-bearing chunk becomes
//! `<ts>_<chunk>_<item>.png`, and the whole non-hidden chunk set is written as
//! `<ts>.json` in wire layout with those images replaced by their file names.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Map, Value};
use thiserror::Error;
use tracing::{debug, error, warn};

use super::{Processor, ProcessorRole, PERSISTED_IMAGE_TYPES};
use crate::chunk::{chunk_to_wire, ChunkRef, DataItem};
use crate::config::ProcessorConfig;
use crate::inlet::timestamp_millis;

#[derive(Error, Debug)]
pub enum PersistError {
    #[error("Failed to write snapshot: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize snapshot: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Snapshot task failed: {0}")]
    Task(String),
}

// ============================================================================
// SBIO: Pure parsing functions (no I/O)
// ============================================================================

/// Everything one snapshot writes
#[derive(Debug, Default)]
pub struct Snapshot {
    pub timestamp: i64,
    pub record: Map<String, Value>,
    /// (file name, PNG bytes)
    pub images: Vec<(String, Vec<u8>)>,
}

pub fn image_file_name(timestamp: i64, chunk: &str, item: &str) -> String {
    format!("{}_{}_{}.png", timestamp, chunk, item)
}

pub fn build_snapshot(chunks: &[ChunkRef], timestamp: i64) -> Snapshot {
    let mut snapshot = Snapshot {
        timestamp,
        ..Default::default()
    };

    for chunk in chunks.iter().filter(|c| !c.hidden) {
        let mut wire = chunk_to_wire(chunk);

        if PERSISTED_IMAGE_TYPES.contains(&chunk.chunk_type()) {
            let mut files = Map::new();
            for item in chunk.data() {
                let DataItem::Image { name, payload } = item else {
                    continue;
                };
                match payload.png_bytes() {
                    Ok(bytes) => {
                        let file_name = image_file_name(timestamp, chunk.name(), name);
                        files.insert(name.clone(), json!(file_name));
                        snapshot.images.push((file_name, bytes));
                    }
                    Err(e) => warn!("Chunk {}: image {} not persisted: {}", chunk.name(), name, e),
                }
            }
            wire["data"] = Value::Object(files);
        }

        snapshot.record.insert(chunk.name().to_string(), wire);
    }
    snapshot
}

pub fn render_record(record: &Map<String, Value>) -> Result<Vec<u8>, serde_json::Error> {
    let mut out = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
    record.serialize(&mut serializer)?;
    Ok(out)
}

// ============================================================================
// SBIO: I/O wrapper - thin layer over pure functions
// ============================================================================

/// Write a snapshot; returns the record path when one was written
pub fn write_snapshot(dir: &Path, snapshot: &Snapshot) -> Result<Option<PathBuf>, PersistError> {
    for (file_name, bytes) in &snapshot.images {
        std::fs::write(dir.join(file_name), bytes)?;
    }
    if snapshot.record.is_empty() {
        return Ok(None);
    }
    let path = dir.join(format!("{}.json", snapshot.timestamp));
    std::fs::write(&path, render_record(&snapshot.record)?)?;
    Ok(Some(path))
}

/// Writes chunk snapshots below one directory
#[derive(Debug, Clone)]
pub struct ChunkWriter {
    save_path: PathBuf,
}

impl ChunkWriter {
    pub fn new(save_path: impl Into<PathBuf>) -> Self {
        Self {
            save_path: save_path.into(),
        }
    }

    pub fn save_path(&self) -> &Path {
        &self.save_path
    }

    pub fn prepare(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.save_path)
    }

    pub async fn write(&self, chunks: &[ChunkRef]) -> Result<Option<PathBuf>, PersistError> {
        let chunks = chunks.to_vec();
        let dir = self.save_path.clone();
        tokio::task::spawn_blocking(move || {
            let snapshot = build_snapshot(&chunks, timestamp_millis());
            write_snapshot(&dir, &snapshot)
        })
        .await
        .map_err(|e| PersistError::Task(e.to_string()))?
    }
}

// ============================================================================
// Processor
// ============================================================================

pub struct SaveOnDiskProcessor {
    config: ProcessorConfig,
    writer: ChunkWriter,
}

impl SaveOnDiskProcessor {
    pub fn new(config: ProcessorConfig) -> Self {
        let save_path = config.param_path("save_path").unwrap_or_else(|| "../data/".to_string());
        Self {
            writer: ChunkWriter::new(save_path),
            config,
        }
    }

    pub fn writer(&self) -> &ChunkWriter {
        &self.writer
    }
}

#[async_trait]
impl Processor for SaveOnDiskProcessor {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn processor_type(&self) -> &'static str {
        self.config.type_name()
    }

    fn role(&self) -> ProcessorRole {
        ProcessorRole::Sink
    }

    async fn apply_configuration(&mut self) {
        if let Err(e) = self.writer.prepare() {
            error!(
                "Processor {}: cannot create {}: {}",
                self.config.name,
                self.writer.save_path().display(),
                e
            );
        }
    }

    async fn apply_processor(&self, chunks: &[ChunkRef]) -> Vec<ChunkRef> {
        match self.writer.write(chunks).await {
            Ok(Some(path)) => debug!("Processor {}: snapshot written to {}", self.config.name, path.display()),
            Ok(None) => debug!("Processor {}: nothing to persist", self.config.name),
            Err(e) => error!("Processor {}: {}", self.config.name, e),
        }
        chunks.to_vec()
    }
}
