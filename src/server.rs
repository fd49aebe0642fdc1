//! HTTP front door for the data-analyst service.
//!
//! Two routes: `GET /health` for liveness and `POST /api` for analysis
//! requests. The analysis route takes a multipart form containing a
//! `questions.txt` part plus any number of data attachments, runs the
//! pipeline under the configured deadline, and always answers `200` with a
//! JSON body — fallbacks and error objects included. Only a request with
//! no questions at all is rejected with `400`.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::logging::RequestLog;
use crate::pipeline::Pipeline;

/// Maximum accepted request body size (questions plus attachments).
const MAX_BODY_BYTES: usize = 50 * 1024 * 1024;

/// Shared state handed to every request handler.
#[derive(Clone)]
pub struct AppState {
    /// The pipeline shared by all requests.
    pub pipeline: Arc<Pipeline>,
    /// Total time budget for one inbound request.
    pub deadline: Duration,
    /// Directory for per-request log files.
    pub log_dir: PathBuf,
}

/// Builds the service router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api", post(analyze))
        .route("/api/", post(analyze))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

/// One multipart form, decoded.
struct AnalysisRequest {
    questions_txt: String,
    attachments: BTreeMap<String, Vec<u8>>,
}

async fn analyze(State(state): State<AppState>, multipart: Multipart) -> Response {
    let started = Instant::now();

    let request = match read_multipart(multipart).await {
        Ok(request) => request,
        Err(message) => {
            warn!("Rejecting request: {message}");
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": message })),
            )
                .into_response();
        }
    };

    let log = RequestLog::create(&state.log_dir, "request");
    info!(
        "Inbound analysis request: {} attachments, log {:?}",
        request.attachments.len(),
        log.path()
    );

    let answer = state
        .pipeline
        .run(
            &request.questions_txt,
            &request.attachments,
            state.deadline,
            &log,
        )
        .await;

    let elapsed = started.elapsed();
    log.log(&format!("Request finished in {elapsed:?}"));

    let mut response = Json(answer).into_response();
    if let Ok(value) = format!("{:.3}", elapsed.as_secs_f64()).parse() {
        response.headers_mut().insert("x-elapsed-seconds", value);
    }
    response
}

/// Decodes the multipart form.
///
/// The questions part is recognized by field name or by uploaded filename
/// (`questions.txt` either way); every other part with content becomes an
/// attachment keyed by its filename, falling back to the field name.
async fn read_multipart(mut multipart: Multipart) -> Result<AnalysisRequest, String> {
    let mut questions_txt: Option<String> = None;
    let mut attachments = BTreeMap::new();

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => return Err(format!("Malformed multipart body: {e}")),
        };

        let name = field.name().unwrap_or_default().to_string();
        let file_name = field.file_name().unwrap_or_default().to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| format!("Failed to read part '{name}': {e}"))?;

        if name.eq_ignore_ascii_case("questions.txt")
            || file_name.eq_ignore_ascii_case("questions.txt")
        {
            questions_txt = Some(String::from_utf8_lossy(&bytes).into_owned());
        } else if !bytes.is_empty() {
            let key = if file_name.is_empty() { name } else { file_name };
            attachments.insert(key, bytes.to_vec());
        }
    }

    match questions_txt {
        Some(questions_txt) if !questions_txt.trim().is_empty() => Ok(AnalysisRequest {
            questions_txt,
            attachments,
        }),
        _ => Err("Missing required part: questions.txt".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LlmError;
    use crate::llm::{GenerationRequest, GenerationResponse, Generator, LlmProvider};
    use crate::pipeline::PipelineConfig;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt as _;
    use tower::ServiceExt as _;

    struct DownProvider;

    #[async_trait]
    impl LlmProvider for DownProvider {
        async fn generate(
            &self,
            _request: GenerationRequest,
        ) -> Result<GenerationResponse, LlmError> {
            Err(LlmError::RequestFailed("connection refused".to_string()))
        }
    }

    fn test_router() -> Router {
        let generator = Generator::new(Arc::new(DownProvider), "flash", "pro");
        let pipeline = Arc::new(Pipeline::new(PipelineConfig::default(), generator));
        router(AppState {
            pipeline,
            deadline: Duration::from_secs(60),
            log_dir: std::env::temp_dir().join("analyst-agent-test-logs"),
        })
    }

    fn multipart_body(parts: &[(&str, Option<&str>, &[u8])]) -> (String, Vec<u8>) {
        let boundary = "test-boundary-7d81a8";
        let mut body = Vec::new();
        for (name, file_name, content) in parts {
            body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
            match file_name {
                Some(file_name) => body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{name}\"; filename=\"{file_name}\"\r\n\r\n"
                    )
                    .as_bytes(),
                ),
                None => body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
                ),
            }
            body.extend_from_slice(content);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());
        (format!("multipart/form-data; boundary={boundary}"), body)
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let response = test_router()
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value, json!({ "status": "ok" }));
    }

    #[tokio::test]
    async fn test_missing_questions_is_rejected() {
        let (content_type, body) =
            multipart_body(&[("data.csv", Some("data.csv"), b"a,b\n1,2\n")]);

        let response = test_router()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api")
                    .header("content-type", content_type)
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert!(value["error"]
            .as_str()
            .unwrap()
            .contains("questions.txt"));
    }

    #[tokio::test]
    async fn test_analysis_always_answers_ok_with_json() {
        // The generator is down, so the pipeline resolves to its structured
        // error object; the HTTP layer still answers 200.
        let (content_type, body) = multipart_body(&[(
            "questions.txt",
            Some("questions.txt"),
            b"Output [1,2,3] as JSON",
        )]);

        let response = test_router()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api")
                    .header("content-type", content_type)
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-elapsed-seconds"));
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert!(value.get("error").is_some());
    }

    #[tokio::test]
    async fn test_questions_recognized_by_field_name_alone() {
        let (content_type, body) =
            multipart_body(&[("questions.txt", None, b"Just answer 42 as JSON")]);

        let response = test_router()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api")
                    .header("content-type", content_type)
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }
}
