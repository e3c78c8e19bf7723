//! Remote-pipeline inlet against real HTTP servers

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{routing::get, Json, Router};
use serde_json::{json, Value};

use fieldscope::chunk::{chunks_to_wire, codes, ColourSpace, DataChunk, DataItem, Raster, StatusKind};
use fieldscope::config::Configuration;
use fieldscope::runtime::{Drivers, PipelineExecutor};
use fieldscope::shell::{ExecutionOutput, PipelineHandle};

async fn serve(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn upstream_camera_wire() -> Value {
    let mut chunk = DataChunk::new("cam", "local_camera_cv2");
    chunk.add_data(DataItem::image("frame", Raster::filled(40, 30, ColourSpace::Bgr, 200)));
    chunk.add_status(StatusKind::Capturing, codes::SUCCESS);
    chunk.encode_images_base64().unwrap();
    chunks_to_wire([&chunk])
}

fn downstream(endpoint: String, processors: Value) -> Value {
    json!({
        "shell": { "type": "periodical_local", "parameters": { "time_interval": 3_600_000 } },
        "inlets": {
            "upstream": { "type": "restapi", "parameters": { "endpoint": endpoint } },
            "local": { "type": "static_variable", "parameters": { "value": "here" } }
        },
        "processors": processors
    })
}

fn chunks(output: ExecutionOutput) -> Vec<Arc<DataChunk>> {
    match output {
        ExecutionOutput::Chunks(chunks) => chunks,
        other => panic!("expected chunks, got {:?}", other),
    }
}

#[tokio::test]
async fn test_remote_image_is_processed_locally() {
    let wire = upstream_camera_wire();
    let addr = serve(Router::new().route("/get_frame", get(move || async move { Json(wire) }))).await;

    let executor = PipelineExecutor::new(
        Configuration::from_value(downstream(
            format!("http://{}/get_frame", addr),
            json!({
                "crop": {
                    "type": "image_crop",
                    "parameters": { "x_init": 0, "x_diff": 10, "y_init": 0, "y_diff": 20 }
                }
            }),
        )),
        Drivers::default(),
    );
    executor.apply_configuration().await.unwrap();

    let chunks = chunks(executor.single_execution().await);
    let names: Vec<&str> = chunks.iter().map(|c| c.name()).collect();
    assert_eq!(names, vec!["cam", "local", "cam_crop"]);

    let remote = &chunks[0];
    assert_eq!(remote.status().last().unwrap().code, codes::REMOTE_READ_OK);
    assert_eq!(remote.first_raster().unwrap().shape(), [30, 40, 3]);

    let cropped = chunks[2].first_raster().unwrap();
    assert_eq!(cropped.shape(), [10, 20, 3]);
    assert!(cropped.pixels().iter().all(|p| *p == 200));

    executor.shutdown().await;
}

#[tokio::test]
async fn test_two_instances_chained() {
    let upstream = PipelineExecutor::new(
        Configuration::from_value(json!({
            "shell": {
                "type": "rest_api",
                "parameters": { "host": "127.0.0.1", "port": 0, "endpoint": "/measurements" }
            },
            "inlets": {
                "temperature": { "type": "static_variable", "parameters": { "value": 21.5 } },
                "secret": { "type": "static_variable", "hidden": true, "parameters": { "value": 1 } }
            }
        })),
        Drivers::default(),
    );
    upstream.apply_configuration().await.unwrap();
    let addr = upstream.shell_addr().await.unwrap();

    let executor = PipelineExecutor::new(
        Configuration::from_value(downstream(format!("http://{}/measurements", addr), json!({}))),
        Drivers::default(),
    );
    executor.apply_configuration().await.unwrap();

    let chunks = chunks(executor.single_execution().await);
    let names: Vec<&str> = chunks.iter().map(|c| c.name()).collect();
    assert_eq!(names, vec!["temperature", "local"]);

    let temperature = &chunks[0];
    assert_eq!(temperature.data()[0].name(), "static_value");
    let codes_seen: Vec<i64> = temperature.status().iter().map(|s| s.code).collect();
    assert_eq!(codes_seen, vec![codes::SUCCESS, codes::REMOTE_READ_OK]);

    executor.shutdown().await;
    upstream.shutdown().await;
}

#[tokio::test]
async fn test_upstream_error_becomes_status() {
    let addr = serve(Router::new().route(
        "/get_frame",
        get(|| async { (axum::http::StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
    ))
    .await;

    let executor = PipelineExecutor::new(
        Configuration::from_value(downstream(format!("http://{}/get_frame", addr), json!({}))),
        Drivers::default(),
    );
    executor.apply_configuration().await.unwrap();

    let chunks = chunks(executor.single_execution().await);
    assert_eq!(chunks[0].name(), "upstream");
    assert!(chunks[0].data().is_empty());
    assert_eq!(chunks[0].status()[0].code, codes::REMOTE_INTERNAL_ERROR);
    assert_eq!(chunks[1].name(), "local");

    executor.shutdown().await;
}
