use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;

use super::{Processor, ProcessorRole};
use crate::chunk::ChunkRef;
use crate::config::ProcessorConfig;

/// Selects the chunks of the listed inlets, in the listed order
pub struct InputProcessor {
    config: ProcessorConfig,
    /// `None` selects everything
    selection: Option<Vec<String>>,
}

fn parse_selection(value: &Value) -> Option<Option<Vec<String>>> {
    let names: Vec<String> = match value {
        Value::Array(items) => items
            .iter()
            .map(|item| item.as_str().map(str::to_string))
            .collect::<Option<_>>()?,
        Value::String(name) => vec![name.clone()],
        _ => return None,
    };
    if names.len() == 1 && names[0] == "all" {
        Some(None)
    } else {
        Some(Some(names))
    }
}

impl InputProcessor {
    pub fn new(mut config: ProcessorConfig) -> Self {
        let selection = config.param("input_inlets").and_then(parse_selection);
        if selection.is_none() && config.is_valid() {
            warn!("Processor {}: input_inlets must be a list of inlet names", config.name);
            config.missing.push("input_inlets");
        }
        Self {
            config,
            selection: selection.flatten(),
        }
    }
}

#[async_trait]
impl Processor for InputProcessor {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn processor_type(&self) -> &'static str {
        self.config.type_name()
    }

    fn role(&self) -> ProcessorRole {
        ProcessorRole::Selector
    }

    async fn apply_processor(&self, chunks: &[ChunkRef]) -> Vec<ChunkRef> {
        if !self.config.is_valid() {
            warn!("Processor {}: no execution due to invalid configuration", self.config.name);
            return Vec::new();
        }
        match &self.selection {
            None => chunks.to_vec(),
            Some(names) => names
                .iter()
                .flat_map(|name| chunks.iter().filter(move |chunk| chunk.name() == name))
                .map(Arc::clone)
                .collect(),
        }
    }
}
