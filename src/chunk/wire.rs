//! JSON wire format shared by the HTTP shell, the remote inlet and the
//! persisted records.
//!
//! ```text
//! { "<chunk>": { "type", "name", "parameters",
//!                "data":     { "<item>": {"name", "value", "type"} },
//!                "metadata": { "<item>": {"parameter", "value"} },
//!                "status":   { "<operation>": {"type", "code", "message"} } } }
//! ```

use serde_json::{json, Map, Value};
use thiserror::Error;
use tracing::warn;

use super::image::{ImagePayload, Raster};
use super::status::StatusItem;
use super::{DataChunk, DataItem, DATA_TYPE_BASE64_PNG, DATA_TYPE_DIVERSE};

#[derive(Error, Debug)]
pub enum WireError {
    #[error("Expected a JSON object for {0}")]
    NotAnObject(String),

    #[error("Chunk '{chunk}' is missing field '{field}'")]
    MissingField { chunk: String, field: String },

    #[error("Invalid status item '{operation}' in chunk '{chunk}': {source}")]
    Status {
        chunk: String,
        operation: String,
        #[source]
        source: serde_json::Error,
    },
}

// ============================================================================
// Encoding
// ============================================================================

fn item_to_wire(item: &DataItem) -> Value {
    let value = match item {
        DataItem::Value { value, .. } => value.clone(),
        DataItem::Image { payload, .. } => match payload {
            ImagePayload::Base64Png(encoded) => Value::String(encoded.clone()),
            ImagePayload::Raster(raster) => match raster.to_base64_png() {
                Ok(encoded) => Value::String(encoded),
                Err(e) => {
                    warn!("Image item '{}' could not be encoded: {}", item.name(), e);
                    Value::Null
                }
            },
        },
    };
    json!({
        "name": item.name(),
        "value": value,
        "type": item.data_type(),
    })
}

/// Render one chunk as its wire object
pub fn chunk_to_wire(chunk: &DataChunk) -> Value {
    let mut data = Map::new();
    for item in chunk.data() {
        data.insert(item.name().to_string(), item_to_wire(item));
    }

    let mut metadata = Map::new();
    for item in chunk.metadata() {
        metadata.insert(
            item.name.clone(),
            json!({ "parameter": item.name, "value": item.value }),
        );
    }

    let mut status = Map::new();
    for item in chunk.status() {
        status.insert(
            item.operation.clone(),
            json!({ "type": item.kind, "code": item.code, "message": item.message }),
        );
    }

    json!({
        "type": chunk.chunk_type(),
        "name": chunk.name(),
        "parameters": chunk.parameters,
        "data": data,
        "metadata": metadata,
        "status": status,
    })
}

/// Render a chunk list keyed by chunk name, leaving out hidden chunks
pub fn chunks_to_wire<'a, I>(chunks: I) -> Value
where
    I: IntoIterator<Item = &'a DataChunk>,
{
    let mut out = Map::new();
    for chunk in chunks {
        if chunk.hidden {
            continue;
        }
        out.insert(chunk.name().to_string(), chunk_to_wire(chunk));
    }
    Value::Object(out)
}

// ============================================================================
// Decoding
// ============================================================================

fn field_str<'a>(obj: &'a Map<String, Value>, chunk: &str, field: &str) -> Result<&'a str, WireError> {
    obj.get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| WireError::MissingField {
            chunk: chunk.to_string(),
            field: field.to_string(),
        })
}

fn object_field<'a>(obj: &'a Map<String, Value>, field: &str) -> Option<&'a Map<String, Value>> {
    obj.get(field).and_then(Value::as_object)
}

fn item_from_wire(key: &str, value: &Value) -> DataItem {
    let name = value
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or(key)
        .to_string();
    let data_type = value
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or(DATA_TYPE_DIVERSE)
        .to_string();
    let raw = value.get("value").cloned().unwrap_or(Value::Null);

    if data_type == DATA_TYPE_BASE64_PNG {
        if let Some(encoded) = raw.as_str() {
            return match Raster::from_base64_png(encoded) {
                Ok(raster) => DataItem::Image {
                    name,
                    payload: ImagePayload::Raster(raster),
                },
                Err(e) => {
                    warn!("Image item '{}' could not be decoded: {}", name, e);
                    DataItem::Image {
                        name,
                        payload: ImagePayload::Base64Png(encoded.to_string()),
                    }
                }
            };
        }
    }

    DataItem::Value {
        name,
        value: raw,
        data_type,
    }
}

/// Rebuild one chunk from its wire object
pub fn chunk_from_wire(value: &Value, hidden: bool) -> Result<DataChunk, WireError> {
    let obj = value
        .as_object()
        .ok_or_else(|| WireError::NotAnObject("chunk".to_string()))?;
    let name = field_str(obj, "<unnamed>", "name")?;
    let chunk_type = field_str(obj, name, "type")?;

    let parameters = object_field(obj, "parameters").cloned().unwrap_or_default();
    let mut chunk = DataChunk::new(name, chunk_type)
        .with_parameters(parameters)
        .with_hidden(hidden);

    if let Some(data) = object_field(obj, "data") {
        for (key, item) in data {
            chunk.add_data(item_from_wire(key, item));
        }
    }

    if let Some(metadata) = object_field(obj, "metadata") {
        for (key, item) in metadata {
            let name = item
                .get("parameter")
                .and_then(Value::as_str)
                .unwrap_or(key)
                .to_string();
            let value = item.get("value").cloned().unwrap_or(Value::Null);
            chunk.add_metadata(name, value);
        }
    }

    if let Some(status) = object_field(obj, "status") {
        for (operation, item) in status {
            let mut fields = item.clone();
            if let Some(fields) = fields.as_object_mut() {
                fields
                    .entry("operation")
                    .or_insert_with(|| Value::String(operation.clone()));
            }
            let status_item: StatusItem =
                serde_json::from_value(fields).map_err(|source| WireError::Status {
                    chunk: name.to_string(),
                    operation: operation.clone(),
                    source,
                })?;
            chunk.push_status_item(status_item);
        }
    }

    Ok(chunk)
}

/// Rebuild every chunk of a wire document
pub fn chunks_from_wire(value: &Value, hidden: bool) -> Result<Vec<DataChunk>, WireError> {
    let obj = value
        .as_object()
        .ok_or_else(|| WireError::NotAnObject("chunk list".to_string()))?;
    obj.values()
        .map(|chunk| chunk_from_wire(chunk, hidden))
        .collect()
}
