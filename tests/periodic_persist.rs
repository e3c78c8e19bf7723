//! Periodic shell persisting cycles to disk

use std::path::Path;
use std::time::Duration;

use serde_json::{json, Value};

use fieldscope::config::Configuration;
use fieldscope::runtime::{Drivers, PipelineExecutor};
use fieldscope::shell::{ExecutionOutput, PipelineHandle};

fn json_records(dir: &Path) -> Vec<Value> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    entries
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
        .filter_map(|p| std::fs::read_to_string(p).ok())
        .filter_map(|text| serde_json::from_str(&text).ok())
        .collect()
}

async fn wait_for_records(dir: &Path) -> Vec<Value> {
    for _ in 0..100 {
        let records = json_records(dir);
        if !records.is_empty() {
            return records;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("no record written to {}", dir.display());
}

#[tokio::test]
async fn test_shell_save_path_persists_cycles() {
    let dir = tempfile::tempdir().unwrap();
    let save_path = dir.path().join("cycles");

    let executor = PipelineExecutor::new(
        Configuration::from_value(json!({
            "shell": {
                "type": "periodical_local",
                "parameters": { "time_interval": 50, "save_path": save_path.to_str().unwrap() }
            },
            "inlets": {
                "temperature": { "type": "static_variable", "parameters": { "value": 21.5 } },
                "operator": { "type": "static_variable", "hidden": true, "parameters": { "value": "x" } }
            }
        })),
        Drivers::default(),
    );
    executor.apply_configuration().await.unwrap();

    let records = wait_for_records(&save_path).await;
    executor.shutdown().await;

    let record = &records[0];
    assert_eq!(record["temperature"]["data"]["static_value"]["value"], 21.5);
    assert!(record.get("operator").is_none());
}

#[tokio::test]
async fn test_save_on_disk_processor_in_chain() {
    let dir = tempfile::tempdir().unwrap();

    let executor = PipelineExecutor::new(
        Configuration::from_value(json!({
            "shell": { "type": "periodical_local", "parameters": { "time_interval": 3_600_000 } },
            "inlets": {
                "count": { "type": "static_variable", "parameters": { "value": 5 } }
            },
            "processors": {
                "store": {
                    "type": "save_on_disk",
                    "parameters": { "save_path": dir.path().to_str().unwrap() }
                }
            }
        })),
        Drivers::default(),
    );
    executor.apply_configuration().await.unwrap();

    let output = executor.single_execution().await;
    assert!(matches!(output, ExecutionOutput::Chunks(ref chunks) if chunks.len() == 1));

    let records = json_records(dir.path());
    executor.shutdown().await;

    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["count"]["data"]["static_value"]["value"], 5);
}
