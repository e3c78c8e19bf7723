//! Data chunks: the unit of data flowing through a pipeline cycle
//!
//! A chunk is created by one inlet or processor invocation. Its name and
//! type are fixed at creation; data, metadata and status items are only ever
//! appended. Chunks are shared between processors as [`ChunkRef`] so that
//! deduplication can work on identity rather than on content.

pub mod image;
pub mod status;
pub mod wire;

use std::sync::Arc;

use serde_json::{Map, Value};

pub use image::{ColourSpace, Conversion, ImageError, ImagePayload, Interpolation, Raster};
pub use status::{codes, StatusItem, StatusKind};
pub use wire::{chunk_from_wire, chunk_to_wire, chunks_from_wire, chunks_to_wire, WireError};

/// Data-type tag for scalar and structured values
pub const DATA_TYPE_DIVERSE: &str = "diverse";

/// Data-type tag for images transported as base64 PNG
pub const DATA_TYPE_BASE64_PNG: &str = "base64_png";

/// Shared handle to a chunk; identity is the allocation
pub type ChunkRef = Arc<DataChunk>;

#[derive(Debug, Clone, PartialEq)]
pub enum DataItem {
    Value {
        name: String,
        value: Value,
        data_type: String,
    },
    Image {
        name: String,
        payload: ImagePayload,
    },
}

impl DataItem {
    pub fn value(name: impl Into<String>, value: Value) -> Self {
        DataItem::Value {
            name: name.into(),
            value,
            data_type: DATA_TYPE_DIVERSE.to_string(),
        }
    }

    pub fn image(name: impl Into<String>, raster: Raster) -> Self {
        DataItem::Image {
            name: name.into(),
            payload: ImagePayload::Raster(raster),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            DataItem::Value { name, .. } | DataItem::Image { name, .. } => name,
        }
    }

    pub fn data_type(&self) -> &str {
        match self {
            DataItem::Value { data_type, .. } => data_type,
            DataItem::Image { .. } => DATA_TYPE_BASE64_PNG,
        }
    }

    pub fn raster(&self) -> Option<&Raster> {
        match self {
            DataItem::Image { payload, .. } => payload.raster(),
            DataItem::Value { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetadataItem {
    pub name: String,
    pub value: Value,
}

impl MetadataItem {
    pub fn new(name: impl Into<String>, value: Value) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DataChunk {
    name: String,
    chunk_type: String,
    pub hidden: bool,
    /// Configuration parameters of the producing component
    pub parameters: Map<String, Value>,
    data: Vec<DataItem>,
    metadata: Vec<MetadataItem>,
    status: Vec<StatusItem>,
}

impl DataChunk {
    pub fn new(name: impl Into<String>, chunk_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            chunk_type: chunk_type.into(),
            hidden: false,
            parameters: Map::new(),
            data: Vec::new(),
            metadata: Vec::new(),
            status: Vec::new(),
        }
    }

    pub fn with_parameters(mut self, parameters: Map<String, Value>) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_hidden(mut self, hidden: bool) -> Self {
        self.hidden = hidden;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn chunk_type(&self) -> &str {
        &self.chunk_type
    }

    pub fn data(&self) -> &[DataItem] {
        &self.data
    }

    pub fn metadata(&self) -> &[MetadataItem] {
        &self.metadata
    }

    pub fn status(&self) -> &[StatusItem] {
        &self.status
    }

    pub fn add_data(&mut self, item: DataItem) {
        self.data.push(item);
    }

    pub fn add_metadata(&mut self, name: impl Into<String>, value: Value) {
        self.metadata.push(MetadataItem::new(name, value));
    }

    pub fn add_status(&mut self, kind: StatusKind, code: i64) {
        self.status.push(StatusItem::new(kind, code));
    }

    pub(crate) fn push_status_item(&mut self, item: StatusItem) {
        self.status.push(item);
    }

    /// True when the chunk carries no data items, the processor abort signal
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// First raster carried by this chunk
    pub fn first_raster(&self) -> Option<&Raster> {
        self.data.iter().find_map(DataItem::raster)
    }

    /// Replace every raster item by its base64 PNG encoding.
    ///
    /// Items that fail to encode are left as rasters; the wire encoder
    /// renders them as `null`.
    pub fn encode_images_base64(&mut self) -> Result<(), ImageError> {
        let mut first_error = None;
        for item in &mut self.data {
            if let DataItem::Image { payload, .. } = item {
                if let Err(e) = payload.encode_base64() {
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Collapse chunks that share an allocation, keeping first occurrences
pub fn dedup_chunks<'a, I>(chunks: I) -> Vec<ChunkRef>
where
    I: IntoIterator<Item = &'a ChunkRef>,
{
    let mut unique: Vec<ChunkRef> = Vec::new();
    for chunk in chunks {
        if !unique.iter().any(|seen| Arc::ptr_eq(seen, chunk)) {
            unique.push(Arc::clone(chunk));
        }
    }
    unique
}
