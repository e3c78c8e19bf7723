use async_trait::async_trait;
use tracing::warn;

use super::Inlet;
use crate::chunk::{codes, DataChunk, DataItem, StatusKind};
use crate::config::InletConfig;

/// Provides the configured `value` on every cycle
pub struct StaticValueInlet {
    config: InletConfig,
}

impl StaticValueInlet {
    pub fn new(config: InletConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Inlet for StaticValueInlet {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn inlet_type(&self) -> &'static str {
        self.config.type_name()
    }

    async fn apply_configuration(&mut self) {}

    async fn retrieve_data(&self) -> Vec<DataChunk> {
        let mut chunk = DataChunk::new(&self.config.name, self.config.type_name())
            .with_parameters(self.config.parameters.clone())
            .with_hidden(self.config.hidden);

        match self.config.param("value") {
            Some(value) => {
                chunk.add_data(DataItem::value("static_value", value.clone()));
                chunk.add_status(StatusKind::StaticValue, codes::SUCCESS);
            }
            None => {
                warn!("Inlet {}: no execution due to invalid configuration", self.config.name);
                chunk.add_status(StatusKind::StaticValue, codes::INVALID_CONFIGURATION);
            }
        }

        for (name, value) in self.config.metadata_items() {
            chunk.add_metadata(name.clone(), value.clone());
        }
        vec![chunk]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_static_value() {
        let config = InletConfig::read(
            "threshold",
            &json!({
                "type": "static_variable",
                "parameters": { "value": { "min": 1, "max": 5 } },
                "metadata": { "unit": "mm" }
            }),
        )
        .unwrap();
        let inlet = StaticValueInlet::new(config);

        let chunks = inlet.retrieve_data().await;
        assert_eq!(chunks.len(), 1);
        let chunk = &chunks[0];
        assert_eq!(chunk.name(), "threshold");
        assert_eq!(chunk.data()[0].name(), "static_value");
        assert_eq!(chunk.data()[0].data_type(), "diverse");
        assert_eq!(chunk.metadata()[0].name, "unit");
        assert_eq!(chunk.status()[0].message, "Static value provided");
        assert_eq!(
            chunk.data()[0],
            DataItem::value("static_value", json!({ "min": 1, "max": 5 }))
        );
    }

    #[tokio::test]
    async fn test_missing_value_reports_invalid() {
        let config = InletConfig::read("c", &json!({ "type": "static_variable" })).unwrap();
        let chunks = StaticValueInlet::new(config).retrieve_data().await;

        assert!(chunks[0].data().is_empty());
        assert_eq!(chunks[0].status()[0].code, codes::INVALID_CONFIGURATION);
    }
}
