pub mod health;
pub mod templates;

use std::time::Instant;

use axum::{
    body::Body,
    extract::{DefaultBodyLimit, Request},
    http::{header, HeaderName, HeaderValue},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use serde_json::json;

use crate::ai_client::handlers::handle_ai_relay;
use crate::errors::ErrorEnvelope;
use crate::generation::handlers::handle_generate;
use crate::state::AppState;

pub const PROCESSING_TIME_HEADER: HeaderName = HeaderName::from_static("x-processing-time-ms");

pub fn build_router(state: AppState) -> Router {
    let body_limit = state.config.max_request_bytes;
    Router::new()
        .route("/health", get(health::health_handler))
        .route("/templates", get(templates::handle_list_templates))
        .route("/generate", post(handle_generate))
        .route("/ai/:service", post(handle_ai_relay))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(middleware::from_fn(stamp_processing_time))
        .with_state(state)
}

/// Adds `X-Processing-Time-Ms` to every response and `processingTimeMs` to
/// every JSON error body.
async fn stamp_processing_time(request: Request, next: Next) -> Response {
    let started = Instant::now();
    let mut response = next.run(request).await;
    let elapsed_ms = started.elapsed().as_millis() as u64;

    if let Some(ErrorEnvelope(mut body)) = response.extensions_mut().remove::<ErrorEnvelope>() {
        body["processingTimeMs"] = json!(elapsed_ms);
        let (mut parts, _) = response.into_parts();
        parts.headers.remove(header::CONTENT_LENGTH);
        response = Response::from_parts(parts, Body::from(body.to_string()));
    }
    response
        .headers_mut()
        .insert(PROCESSING_TIME_HEADER, HeaderValue::from(elapsed_ms));
    response
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use axum::http::{Request, StatusCode};
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
    use serde_json::Value;
    use tower::ServiceExt;

    use super::*;
    use crate::config::Config;
    use crate::document::converter::FormatConverter;
    use crate::generation::orchestrator::tests::{orchestrator_with, record, template_dir, Stalled};
    use crate::generation::rate_limit::RateLimiter;
    use crate::registry::{TemplateCatalog, TemplateRegistry};

    struct Harness {
        _dir: tempfile::TempDir,
        router: Router,
    }

    fn harness(converter: FormatConverter, max_requests: u32, max_request_bytes: usize) -> Harness {
        let dir = template_dir();
        let limiter = Arc::new(RateLimiter::new(Duration::from_secs(60), max_requests));
        let orchestrator = orchestrator_with(dir.path(), converter, limiter.clone());
        let catalog: Arc<dyn TemplateCatalog> = Arc::new(
            TemplateRegistry::from_json(crate::generation::orchestrator::tests::MANIFEST).unwrap(),
        );
        let config = Config {
            templates_dir: dir.path().to_path_buf(),
            max_request_bytes,
            ..Config::default()
        };
        let state = AppState {
            config,
            catalog,
            rate_limiter: limiter,
            orchestrator: Arc::new(orchestrator),
            ai: None,
        };
        Harness {
            _dir: dir,
            router: build_router(state),
        }
    }

    fn default_harness() -> Harness {
        harness(FormatConverter::with_office_engine(None), 10, 1024 * 1024)
    }

    fn generate_request(template: &str, format: &str) -> Request<Body> {
        let body = json!({
            "cvData": record(),
            "options": { "templateId": template, "format": format, "fileName": "Sam Rivera CV" }
        });
        Request::builder()
            .method("POST")
            .uri("/generate")
            .header("content-type", "application/json")
            .header("x-forwarded-for", "198.51.100.4")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_bytes(response: Response) -> Vec<u8> {
        axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
            .to_vec()
    }

    async fn body_json(response: Response) -> Value {
        serde_json::from_slice(&body_bytes(response).await).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let h = default_harness();
        let response = h
            .router
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key(PROCESSING_TIME_HEADER));
        let body = body_json(response).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["templates"], 3);
        assert_eq!(body["trackedClients"], 0);
        assert_eq!(body["aiRelay"], false);
    }

    #[tokio::test]
    async fn test_list_templates_hides_file_paths() {
        let h = default_harness();
        let response = h
            .router
            .oneshot(Request::get("/templates").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = body_json(response).await;
        let templates = body["templates"].as_array().unwrap();
        assert_eq!(templates.len(), 3);
        assert_eq!(templates[0]["id"], "classic");
        assert!(templates[0].get("file").is_none());
    }

    #[tokio::test]
    async fn test_generate_primary_download() {
        let h = default_harness();
        let response = h.router.oneshot(generate_request("classic", "docx")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers().clone();
        assert_eq!(
            headers[header::CONTENT_TYPE],
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
        );
        assert_eq!(
            headers[header::CONTENT_DISPOSITION],
            "attachment; filename=\"Sam_Rivera_CV.docx\""
        );
        assert_eq!(headers["x-template-id"], "classic");
        assert!(headers.contains_key(PROCESSING_TIME_HEADER));
        assert!(body_bytes(response).await.starts_with(b"PK"));
    }

    #[tokio::test]
    async fn test_generate_secondary_download() {
        let h = default_harness();
        let response = h.router.oneshot(generate_request("classic", "pdf")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/pdf");
        assert_eq!(response.headers()["x-conversion-method"], "text-render");
        assert!(body_bytes(response).await.starts_with(b"%PDF-"));
    }

    #[tokio::test]
    async fn test_generate_both_envelope() {
        let h = default_harness();
        let response = h.router.oneshot(generate_request("classic", "both")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["success"], true);
        let primary = BASE64
            .decode(body["data"]["primary"]["content"].as_str().unwrap())
            .unwrap();
        assert!(primary.starts_with(b"PK"));
        assert_eq!(body["data"]["primary"]["size"], primary.len());
        assert_eq!(body["data"]["secondary"]["filename"], "Sam_Rivera_CV.pdf");
        assert_eq!(body["metadata"]["conversionMethod"], "text-render");
        assert!(body["processingTimeMs"].is_u64());
    }

    #[tokio::test]
    async fn test_generate_both_with_conversion_timeout_still_succeeds() {
        let h = harness(FormatConverter::new(vec![Arc::new(Stalled)]), 10, 1024 * 1024);
        let response = h.router.oneshot(generate_request("classic", "both")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert!(body["data"].get("secondary").is_none());
        let warnings = body["metadata"]["warnings"].as_array().unwrap();
        assert!(warnings
            .iter()
            .any(|w| w.as_str().unwrap().contains("timeout")));
    }

    #[tokio::test]
    async fn test_unknown_template_is_404_with_timing() {
        let h = default_harness();
        let response = h.router.oneshot(generate_request("missing", "primary")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(response.headers().contains_key(PROCESSING_TIME_HEADER));
        let body = body_json(response).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["error"]["code"], "NOT_FOUND");
        assert!(body["processingTimeMs"].is_u64());
    }

    #[tokio::test]
    async fn test_fill_failure_is_generic_500() {
        let h = default_harness();
        let response = h.router.oneshot(generate_request("broken", "primary")).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], "GENERATION_FAILED");
        assert!(body["processingTimeMs"].is_u64());
    }

    #[tokio::test]
    async fn test_rate_limit_short_circuits() {
        let h = harness(FormatConverter::with_office_engine(None), 2, 1024 * 1024);
        for _ in 0..2 {
            let response = h.router.clone().oneshot(generate_request("classic", "primary")).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
        // Garbage body: the limiter must answer before parsing.
        let request = Request::post("/generate")
            .header("x-forwarded-for", "198.51.100.4")
            .body(Body::from("not json"))
            .unwrap();
        let response = h.router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(response.headers().contains_key(header::RETRY_AFTER));
        let body = body_json(response).await;
        assert!(body["error"]["retryAfter"].as_u64().unwrap() >= 59);
    }

    #[tokio::test]
    async fn test_invalid_body_is_400() {
        let h = default_harness();
        let request = Request::post("/generate").body(Body::from("{oops")).unwrap();
        let response = h.router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert!(body["error"]["details"].is_string());
    }

    fn post_generate(body: impl Into<Body>) -> Request<Body> {
        Request::post("/generate")
            .header("content-type", "application/json")
            .body(body.into())
            .unwrap()
    }

    #[tokio::test]
    async fn test_every_bad_request_carries_details() {
        let cv = serde_json::to_value(record()).unwrap();
        let cases = [
            ("empty body", String::new()),
            ("missing template id", json!({ "cvData": cv, "options": {} }).to_string()),
            (
                "unknown format",
                json!({ "cvData": cv, "options": { "templateId": "classic", "format": "html" } }).to_string(),
            ),
            (
                "unknown language code",
                json!({ "cvData": cv, "options": { "templateId": "classic", "language": "fr" } }).to_string(),
            ),
            (
                "language the template lacks",
                json!({ "cvData": cv, "options": { "templateId": "broken", "language": "ar" } }).to_string(),
            ),
            (
                "invalid record",
                json!({ "cvData": { "personalInfo": {} }, "options": { "templateId": "classic" } }).to_string(),
            ),
        ];
        let h = harness(FormatConverter::with_office_engine(None), 100, 1024 * 1024);
        for (case, body) in cases {
            let response = h.router.clone().oneshot(post_generate(body)).await.unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{case}");
            let body = body_json(response).await;
            let details = body["error"]["details"].as_str().unwrap_or_default();
            assert!(!details.is_empty(), "{case}: no details in {body}");
        }
    }

    #[tokio::test]
    async fn test_aborted_body_is_400_not_413() {
        let chunks: Vec<Result<&'static [u8], std::io::Error>> = vec![
            Ok(&b"{\"cvData\": {"[..]),
            Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "client went away")),
        ];
        let h = default_harness();
        let response = h
            .router
            .oneshot(post_generate(Body::from_stream(futures::stream::iter(chunks))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["error"]["message"], "Request body could not be read");
    }

    #[tokio::test]
    async fn test_oversized_body_is_413() {
        let h = harness(FormatConverter::with_office_engine(None), 10, 64);
        let response = h.router.oneshot(generate_request("classic", "primary")).await.unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn test_ai_relay_without_upstream() {
        let h = default_harness();
        let request = Request::post("/ai/score").body(Body::from("{}")).unwrap();
        let response = h.router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let request = Request::post("/ai/shell").body(Body::from("{}")).unwrap();
        let response = h.router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
