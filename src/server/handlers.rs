use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::chunk::chunks_to_wire;
use crate::server::state::ShellState;
use crate::shell::ExecutionOutput;

/// Routes owned by the shell itself
pub const RESERVED_ROUTES: &[&str] = &["/", "/health", "/get_config", "/upload_config"];

pub const UNSUPPORTED_CONTENT_TYPE: &str =
    "Content-Type not supported! Only json application/json is supported!";

// ============================================================================
// SBIO: Pure parsing functions (no I/O)
// ============================================================================

/// Check that `endpoint` can be mounted next to the shell's own routes
pub fn validate_endpoint(endpoint: &str) -> Result<(), String> {
    if !endpoint.starts_with('/') {
        return Err(format!("endpoint '{}' must start with '/'", endpoint));
    }
    if RESERVED_ROUTES.contains(&endpoint) {
        return Err(format!("endpoint '{}' is reserved", endpoint));
    }
    if endpoint.contains(['{', '}', '*', ':']) {
        return Err(format!("endpoint '{}' must be a literal path", endpoint));
    }
    Ok(())
}

fn is_json_content(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .is_some_and(|v| v.trim().eq_ignore_ascii_case("application/json"))
}

fn json_text(body: String) -> Response {
    ([(header::CONTENT_TYPE, "application/json")], body).into_response()
}

fn pipeline_gone() -> Response {
    (StatusCode::SERVICE_UNAVAILABLE, "Pipeline is not running").into_response()
}

// ============================================================================
// Handlers
// ============================================================================

/// Liveness probe with the pipeline status as body
pub async fn health(State(state): State<ShellState>) -> Response {
    match state.pipeline() {
        Some(pipeline) => Json(pipeline.status()).into_response(),
        None => pipeline_gone(),
    }
}

/// Run one cycle and return its wire rendering
pub async fn execute(State(state): State<ShellState>) -> Response {
    let Some(pipeline) = state.pipeline() else {
        return pipeline_gone();
    };
    match pipeline.single_execution().await {
        ExecutionOutput::Json(body) => json_text(body),
        ExecutionOutput::Skipped => json_text("null".to_string()),
        ExecutionOutput::Chunks(chunks) => {
            Json(chunks_to_wire(chunks.iter().map(|c| c.as_ref()))).into_response()
        }
    }
}

pub async fn upload_config(
    State(state): State<ShellState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if !is_json_content(&headers) {
        return (StatusCode::UNSUPPORTED_MEDIA_TYPE, UNSUPPORTED_CONTENT_TYPE).into_response();
    }
    let tree: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(tree) => tree,
        Err(e) => {
            warn!("Rejected configuration upload: {}", e);
            return (StatusCode::BAD_REQUEST, format!("Invalid JSON body: {}", e)).into_response();
        }
    };
    let Some(pipeline) = state.pipeline() else {
        return pipeline_gone();
    };

    info!("Configuration uploaded, applying");
    pipeline.update_configuration(tree).await;
    "Configuration applied".into_response()
}

pub async fn get_config(State(state): State<ShellState>) -> Response {
    match state.pipeline() {
        Some(pipeline) => Json(pipeline.configuration_tree().await).into_response(),
        None => pipeline_gone(),
    }
}

pub async fn welcome(State(state): State<ShellState>) -> String {
    format!("Welcome to fieldscope API. Available endpoint is {}", state.endpoint)
}

/// Create the Axum router. `state.endpoint` must pass [`validate_endpoint`].
pub fn create_router(state: ShellState) -> Router {
    Router::new()
        .route(&state.endpoint, get(execute))
        .route("/upload_config", post(upload_config))
        .route("/get_config", get(get_config))
        .route("/health", get(health))
        .route("/", get(welcome))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shell::mock::MockPipeline;
    use axum::{body::Body, http::Request};
    use serde_json::json;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn create_test_app(pipeline: &Arc<MockPipeline>) -> Router {
        create_router(ShellState::new(pipeline.weak(), "/get_frame"))
    }

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn test_validate_endpoint() {
        assert!(validate_endpoint("/get_frame").is_ok());
        assert!(validate_endpoint("/api/v1/frame").is_ok());
        assert!(validate_endpoint("get_frame").is_err());
        assert!(validate_endpoint("/health").is_err());
        assert!(validate_endpoint("/frames/{id}").is_err());
    }

    #[tokio::test]
    async fn test_endpoint_returns_pipeline_json() {
        let pipeline = MockPipeline::new(ExecutionOutput::Json(r#"{"cam":{}}"#.to_string()));
        let response = create_test_app(&pipeline)
            .oneshot(Request::builder().uri("/get_frame").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "application/json"
        );
        assert_eq!(body_text(response).await, r#"{"cam":{}}"#);
        assert_eq!(pipeline.executions(), 1);
    }

    #[tokio::test]
    async fn test_endpoint_answers_null_while_skipped() {
        let pipeline = MockPipeline::new(ExecutionOutput::Skipped);
        let response = create_test_app(&pipeline)
            .oneshot(Request::builder().uri("/get_frame").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "null");
    }

    #[tokio::test]
    async fn test_upload_config() {
        let pipeline = MockPipeline::new(ExecutionOutput::Skipped);
        let response = create_test_app(&pipeline)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/upload_config")
                    .header("Content-Type", "application/json")
                    .body(Body::from(r#"{"inlets": {}}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "Configuration applied");
        assert_eq!(*pipeline.updates.lock().unwrap(), vec![json!({ "inlets": {} })]);
    }

    #[tokio::test]
    async fn test_upload_config_wrong_content_type() {
        let pipeline = MockPipeline::new(ExecutionOutput::Skipped);
        let response = create_test_app(&pipeline)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/upload_config")
                    .header("Content-Type", "text/plain")
                    .body(Body::from("inlets: {}"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
        assert_eq!(body_text(response).await, UNSUPPORTED_CONTENT_TYPE);
        assert!(pipeline.updates.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_upload_config_malformed_body() {
        let pipeline = MockPipeline::new(ExecutionOutput::Skipped);
        let response = create_test_app(&pipeline)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/upload_config")
                    .header("Content-Type", "application/json; charset=utf-8")
                    .body(Body::from("{ not json"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_get_config_and_welcome() {
        let pipeline = MockPipeline::new(ExecutionOutput::Skipped);
        let app = create_test_app(&pipeline);

        let response = app
            .clone()
            .oneshot(Request::builder().uri("/get_config").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let tree: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(tree, json!({ "shell": { "type": "rest_api" } }));

        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(
            body_text(response).await,
            "Welcome to fieldscope API. Available endpoint is /get_frame"
        );
    }

    #[tokio::test]
    async fn test_health_reports_status() {
        let pipeline = MockPipeline::new(ExecutionOutput::Skipped);
        let response = create_test_app(&pipeline)
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let status: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(status["inlets"], 1);
        assert_eq!(status["reconfiguring"], false);
    }

    #[tokio::test]
    async fn test_dropped_pipeline_is_unavailable() {
        let pipeline = MockPipeline::new(ExecutionOutput::Skipped);
        let app = create_test_app(&pipeline);
        drop(pipeline);

        let response = app
            .oneshot(Request::builder().uri("/get_frame").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
