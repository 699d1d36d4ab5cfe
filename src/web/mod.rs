//! HTTP surface: upload, image serving, download and health.

use std::sync::Arc;

use axum::extract::multipart::MultipartRejection;
use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::Response;
use axum::{Json, Router};
use serde_json::{Value, json};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::{error, info, warn};

use crate::config::ServerConfig;
use crate::constants::{MULTIPART_OVERHEAD_BYTES, UPLOAD_FIELD_NAME};
use crate::error::SkygramError;
use crate::pipeline::{Pipeline, ProcessingResult, Upload, spawn_sweeper};

mod images;

use images::ServeImage;

#[derive(Clone, Debug)]
pub(crate) struct AppState {
    pipeline: Arc<Pipeline>,
}

impl AppState {
    fn new(pipeline: Arc<Pipeline>) -> Self {
        Self { pipeline }
    }
}

async fn root_handler() -> Json<Value> {
    Json(json!({ "message": "SkyGram AI Backend is running!" }))
}

async fn health_handler(State(state): State<AppState>) -> Json<Value> {
    let report = state.pipeline.health().await;
    Json(json!({
        "status": "healthy",
        "services": {
            "gemini": report.gemini,
            "huggingface": report.huggingface,
        },
        "directories": {
            "uploads": report.uploads,
            "generated": report.generated,
        },
        "sessions": report.sessions,
    }))
}

/// Pulls the `file` field out of the multipart body, enforcing the size
/// limit while streaming.
async fn read_upload(multipart: &mut Multipart, limit: usize) -> Result<Upload, SkygramError> {
    let map_err = |err: axum::extract::multipart::MultipartError| {
        if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
            SkygramError::PayloadTooLarge(limit)
        } else {
            SkygramError::InvalidInput(err.body_text())
        }
    };

    while let Some(mut field) = multipart.next_field().await.map_err(map_err)? {
        if field.name() != Some(UPLOAD_FIELD_NAME) {
            continue;
        }
        let content_type = field.content_type().map(str::to_owned);
        let mut bytes = Vec::new();
        while let Some(chunk) = field.chunk().await.map_err(map_err)? {
            if bytes.len() + chunk.len() > limit {
                return Err(SkygramError::PayloadTooLarge(limit));
            }
            bytes.extend_from_slice(&chunk);
        }
        return Ok(Upload {
            content_type,
            bytes,
        });
    }

    Err(SkygramError::InvalidInput(format!(
        "Missing '{UPLOAD_FIELD_NAME}' upload field"
    )))
}

async fn process_cloud_handler(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<ProcessingResult>, SkygramError> {
    let mut multipart = multipart.map_err(|rejection| {
        SkygramError::InvalidInput(format!("Expected a multipart upload: {rejection}"))
    })?;
    let upload = read_upload(&mut multipart, state.pipeline.max_upload_bytes()).await?;
    let result = state.pipeline.process(upload).await?;
    Ok(Json(result))
}

async fn original_image_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
) -> Result<Response, SkygramError> {
    let (path, content_type) = state.pipeline.original(&session_id).await?;
    ServeImage {
        path: &path,
        content_type,
        download_as: None,
    }
    .respond(&headers)
    .await
}

async fn generated_image_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(filename): Path<String>,
) -> Result<Response, SkygramError> {
    let path = state.pipeline.generated(&filename).await?;
    ServeImage {
        path: &path,
        content_type: "image/png",
        download_as: None,
    }
    .respond(&headers)
    .await
}

async fn download_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(filename): Path<String>,
) -> Result<Response, SkygramError> {
    let path = state.pipeline.generated(&filename).await?;
    ServeImage {
        path: &path,
        content_type: "image/png",
        download_as: Some(&filename),
    }
    .respond(&headers)
    .await
}

fn create_router(max_upload_bytes: usize) -> Router<AppState> {
    Router::new()
        .route("/", axum::routing::get(root_handler))
        .route("/health", axum::routing::get(health_handler))
        .route(
            "/process-cloud",
            axum::routing::post(process_cloud_handler)
                .layer(DefaultBodyLimit::max(
                    max_upload_bytes.saturating_add(MULTIPART_OVERHEAD_BYTES),
                )),
        )
        .route(
            "/images/original/{session_id}",
            axum::routing::get(original_image_handler),
        )
        .route(
            "/images/generated/{filename}",
            axum::routing::get(generated_image_handler),
        )
        .route("/download/{filename}", axum::routing::get(download_handler))
}

fn cors_layer(allowed_origins: Vec<HeaderValue>) -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed_origins))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any)
}

/// Builds the full application for a pipeline.
pub fn build_app(pipeline: Arc<Pipeline>, allowed_origins: Vec<HeaderValue>) -> Router {
    let max_upload_bytes = pipeline.max_upload_bytes();
    create_router(max_upload_bytes)
        .layer(cors_layer(allowed_origins))
        .with_state(AppState::new(pipeline))
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", err);
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}

/// Prepares storage, starts the session sweeper and serves until ctrl-c.
pub async fn setup_server(
    config: ServerConfig,
    pipeline: Arc<Pipeline>,
) -> Result<(), anyhow::Error> {
    pipeline.images().ensure_dirs().await?;
    let sweeper = spawn_sweeper(pipeline.clone(), config.sweep_interval);

    let app = build_app(pipeline, config.allowed_origins);

    let addr = format!("{}:{}", config.listen_address, config.port);
    info!("Starting server on http://{}", addr);
    match &config.public_base_url {
        Some(base) => info!("Advertising result URLs under {}", base),
        None => warn!("No public base URL set, result URLs will be relative"),
    }
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;
    sweeper.abort();
    if let Err(err) = served {
        error!("Server error: {}", err);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use axum::body::Body;
    use axum::http::Request;
    use axum::http::header::{CONTENT_DISPOSITION, CONTENT_TYPE, ETAG, IF_NONE_MATCH, ORIGIN};
    use http_body_util::BodyExt;
    use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;
    use tower::ServiceExt;

    use crate::storage::{ImageStore, placeholder_png};
    use crate::upstream::{MockGenerator, MockRecognizer};

    const BOUNDARY: &str = "skygram-test-boundary";

    fn cloud_png() -> Vec<u8> {
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(8, 8, Rgb([220, 230, 255])));
        let mut output = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut output), ImageFormat::Png)
            .expect("encode png");
        output
    }

    fn multipart_body(field: &str, content_type: &str, bytes: &[u8]) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"cloud1.jpg\"\r\nContent-Type: {content_type}\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(bytes);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
        body
    }

    fn upload_request(field: &str, content_type: &str, bytes: &[u8]) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/process-cloud")
            .header(
                CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(multipart_body(field, content_type, bytes)))
            .expect("request")
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder()
            .method("GET")
            .uri(uri)
            .body(Body::empty())
            .expect("request")
    }

    async fn read_bytes(response: Response) -> Vec<u8> {
        response
            .into_body()
            .collect()
            .await
            .expect("collect body")
            .to_bytes()
            .to_vec()
    }

    async fn read_json(response: Response) -> Value {
        serde_json::from_slice(&read_bytes(response).await).expect("json body")
    }

    struct TestApp {
        _dir: tempfile::TempDir,
        pipeline: Arc<Pipeline>,
        app: Router,
    }

    async fn setup_app(recognizer: MockRecognizer, generator: MockGenerator) -> TestApp {
        let dir = tempfile::tempdir().expect("tempdir");
        let images = ImageStore::new(dir.path().join("uploads"), dir.path().join("generated"));
        images.ensure_dirs().await.expect("dirs");
        let pipeline = Arc::new(
            Pipeline::new(Arc::new(recognizer), Arc::new(generator), images)
                .with_max_upload_bytes(64 * 1024),
        );
        let app = build_app(
            pipeline.clone(),
            vec![HeaderValue::from_static("http://localhost:5173")],
        );
        TestApp {
            _dir: dir,
            pipeline,
            app,
        }
    }

    #[tokio::test]
    async fn root_and_health_respond() {
        let test = setup_app(MockRecognizer::cycling(), MockGenerator::placeholder()).await;

        let response = test.app.clone().oneshot(get("/")).await.expect("root");
        assert_eq!(response.status(), StatusCode::OK);
        let body = read_json(response).await;
        assert_eq!(body["message"], "SkyGram AI Backend is running!");

        let response = test.app.oneshot(get("/health")).await.expect("health");
        assert_eq!(response.status(), StatusCode::OK);
        let body = read_json(response).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["services"]["gemini"], "mock");
        assert_eq!(body["sessions"], 0);
    }

    #[tokio::test]
    async fn upload_round_trip_and_download_matches() {
        let art = placeholder_png().expect("art");
        let test = setup_app(
            MockRecognizer::fixed("dragon"),
            MockGenerator::returning(art.clone()),
        )
        .await;

        let response = test
            .app
            .clone()
            .oneshot(upload_request("file", "image/png", &cloud_png()))
            .await
            .expect("upload");
        assert_eq!(response.status(), StatusCode::OK);
        let body = read_json(response).await;
        let session_id = body["session_id"].as_str().expect("session id").to_string();
        assert!(!session_id.is_empty());
        assert_eq!(body["detected_object"], "dragon");
        assert_eq!(body["status"], "complete");
        assert_eq!(body["fallbacks"], json!([]));
        assert_eq!(
            body["generated_image_url"],
            format!("/images/generated/{session_id}_dragon.png")
        );

        let original_url = body["original_image_url"].as_str().expect("url");
        let response = test.app.clone().oneshot(get(original_url)).await.expect("original");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get(CONTENT_TYPE).expect("ct"), "image/png");
        assert_eq!(read_bytes(response).await, cloud_png());

        let generated_url = body["generated_image_url"].as_str().expect("url");
        let response = test.app.clone().oneshot(get(generated_url)).await.expect("generated");
        assert_eq!(response.status(), StatusCode::OK);
        let generated = read_bytes(response).await;
        assert_eq!(generated, art);

        let download_url = body["download_url"].as_str().expect("url");
        let response = test.app.clone().oneshot(get(download_url)).await.expect("download");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(CONTENT_DISPOSITION).expect("disposition"),
            format!("attachment; filename=\"cloud-art-{session_id}_dragon.png\"").as_str()
        );
        assert_eq!(read_bytes(response).await, generated);
    }

    #[tokio::test]
    async fn failing_upstreams_still_return_complete_looking_result() {
        let test = setup_app(MockRecognizer::failing(), MockGenerator::failing()).await;

        let response = test
            .app
            .clone()
            .oneshot(upload_request("file", "image/png", &cloud_png()))
            .await
            .expect("upload");
        assert_eq!(response.status(), StatusCode::OK);
        let body = read_json(response).await;
        assert_eq!(body["detected_object"], "fluffy cloud");
        assert_eq!(body["status"], "degraded");
        assert_eq!(body["fallbacks"], json!(["recognition", "generation"]));

        let generated_url = body["generated_image_url"].as_str().expect("url");
        let response = test.app.oneshot(get(generated_url)).await.expect("generated");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(read_bytes(response).await, placeholder_png().expect("png"));
    }

    #[tokio::test]
    async fn non_image_upload_is_a_client_error() {
        let test = setup_app(MockRecognizer::cycling(), MockGenerator::placeholder()).await;

        let response = test
            .app
            .clone()
            .oneshot(upload_request("file", "text/plain", b"hello clouds"))
            .await
            .expect("upload");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = read_json(response).await;
        assert_eq!(body["detail"], "File must be an image");

        let response = test
            .app
            .clone()
            .oneshot(upload_request("photo", "image/png", &cloud_png()))
            .await
            .expect("upload");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = test
            .app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/process-cloud")
                    .header(CONTENT_TYPE, "application/json")
                    .body(Body::from("{}"))
                    .expect("request"),
            )
            .await
            .expect("upload");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        assert!(test.pipeline.sessions().is_empty().await);
    }

    #[tokio::test]
    async fn oversized_upload_is_413() {
        let test = setup_app(MockRecognizer::cycling(), MockGenerator::placeholder()).await;
        let mut big = cloud_png();
        big.resize(80 * 1024, 0);

        let response = test
            .app
            .oneshot(upload_request("file", "image/png", &big))
            .await
            .expect("upload");
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        let body = read_json(response).await;
        assert_eq!(body["detail"], "File too large (max 65536 bytes)");
        assert!(test.pipeline.sessions().is_empty().await);
    }

    #[tokio::test]
    async fn huge_upload_limit_does_not_overflow_body_limit() {
        let dir = tempfile::tempdir().expect("tempdir");
        let images = ImageStore::new(dir.path().join("uploads"), dir.path().join("generated"));
        images.ensure_dirs().await.expect("dirs");
        let pipeline = Arc::new(
            Pipeline::new(
                Arc::new(MockRecognizer::fixed("dog")),
                Arc::new(MockGenerator::placeholder()),
                images,
            )
            .with_max_upload_bytes(usize::MAX),
        );
        let app = build_app(pipeline, Vec::new());

        let response = app
            .oneshot(upload_request("file", "image/png", &cloud_png()))
            .await
            .expect("upload");
        assert_eq!(response.status(), StatusCode::OK);
        let body = read_json(response).await;
        assert_eq!(body["detected_object"], "dog");
    }

    #[tokio::test]
    async fn unknown_images_are_404() {
        let test = setup_app(MockRecognizer::cycling(), MockGenerator::placeholder()).await;
        for uri in [
            "/images/original/not-a-session".to_string(),
            format!("/images/original/{}", crate::session::SessionId::new()),
            "/images/generated/nothing.png".to_string(),
            "/download/..%2F..%2Fetc%2Fpasswd".to_string(),
        ] {
            let response = test.app.clone().oneshot(get(&uri)).await.expect("get");
            assert_eq!(response.status(), StatusCode::NOT_FOUND, "{uri}");
        }
    }

    #[tokio::test]
    async fn etag_gives_not_modified() {
        let test = setup_app(MockRecognizer::fixed("ship"), MockGenerator::placeholder()).await;
        let response = test
            .app
            .clone()
            .oneshot(upload_request("file", "image/png", &cloud_png()))
            .await
            .expect("upload");
        let body = read_json(response).await;
        let generated_url = body["generated_image_url"].as_str().expect("url").to_string();

        let response = test
            .app
            .clone()
            .oneshot(get(&generated_url))
            .await
            .expect("generated");
        let etag = response.headers().get(ETAG).expect("etag").clone();

        let request = Request::builder()
            .method("GET")
            .uri(&generated_url)
            .header(IF_NONE_MATCH, etag)
            .body(Body::empty())
            .expect("request");
        let response = test.app.oneshot(request).await.expect("conditional");
        assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
        assert!(read_bytes(response).await.is_empty());
    }

    #[tokio::test]
    async fn cors_allows_configured_origin() {
        let test = setup_app(MockRecognizer::cycling(), MockGenerator::placeholder()).await;
        let request = Request::builder()
            .method("GET")
            .uri("/health")
            .header(ORIGIN, "http://localhost:5173")
            .body(Body::empty())
            .expect("request");
        let response = test.app.clone().oneshot(request).await.expect("health");
        assert_eq!(
            response
                .headers()
                .get("access-control-allow-origin")
                .expect("allow origin"),
            "http://localhost:5173"
        );

        let request = Request::builder()
            .method("GET")
            .uri("/health")
            .header(ORIGIN, "http://evil.example")
            .body(Body::empty())
            .expect("request");
        let response = test.app.oneshot(request).await.expect("health");
        assert!(response.headers().get("access-control-allow-origin").is_none());
    }
}
