use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
    response::Response,
};
use serde_json::{Value, json};
use tower::ServiceExt;

use pdf_render_service::{
    AppState, app,
    cnfg::AppConfig,
    engine::{PdfOptions, RenderEngine, RenderError, RenderSession},
};

const KEY: &str = "test-key";

#[derive(Default)]
struct Recorder {
    opened: AtomicUsize,
    closed: AtomicUsize,
}

struct FakeEngine {
    recorder: Arc<Recorder>,
    fail: bool,
}

struct FakeSession {
    recorder: Arc<Recorder>,
    fail: bool,
}

#[async_trait]
impl RenderEngine for FakeEngine {
    async fn open_session(&self) -> Result<Box<dyn RenderSession>, RenderError> {
        self.recorder.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeSession {
            recorder: self.recorder.clone(),
            fail: self.fail,
        }))
    }
}

#[async_trait]
impl RenderSession for FakeSession {
    fn id(&self) -> &str {
        "fake"
    }

    async fn render_pdf(&mut self, html: &str, _options: &PdfOptions) -> Result<Vec<u8>, RenderError> {
        tokio::time::sleep(Duration::from_millis(10)).await;
        if self.fail {
            return Err(RenderError::Load("net::ERR_ABORTED".into()));
        }
        Ok(format!("%PDF-1.7\n{}\n%%EOF", html).into_bytes())
    }

    async fn close(&mut self) -> Result<(), RenderError> {
        self.recorder.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct TestApp {
    router: Router,
    state: AppState,
    recorder: Arc<Recorder>,
}

fn test_app(api_key: Option<&str>, fail: bool) -> TestApp {
    let config = AppConfig {
        api_key: api_key.map(str::to_string),
        max_concurrent_renders: 2,
        ..AppConfig::default()
    };
    let recorder = Arc::new(Recorder::default());
    let engine = Arc::new(FakeEngine {
        recorder: recorder.clone(),
        fail,
    });
    let state = AppState::new(&config, engine);
    let router = app(state.clone(), config.body_limit);

    TestApp {
        router,
        state,
        recorder,
    }
}

fn generate(key: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/generate-pdf")
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(key) = key {
        builder = builder.header("x-api-key", key);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

async fn json_body(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_missing_key_is_forbidden() {
    let t = test_app(Some(KEY), false);

    let response = t
        .router
        .oneshot(generate(None, json!({ "html": "<p>hi</p>" })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(json_body(response).await, json!({ "error": "Unauthorized" }));
    assert_eq!(t.recorder.opened.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_wrong_key_is_forbidden() {
    for wrong in ["TEST-KEY", "test-key ", "test", "test-key-2"] {
        let t = test_app(Some(KEY), false);

        let response = t
            .router
            .oneshot(generate(Some(wrong), json!({ "html": "<p>hi</p>" })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::FORBIDDEN, "key {:?}", wrong);
        assert_eq!(t.state.browser_pool.stats().created, 0);
    }
}

#[tokio::test]
async fn test_unset_secret_fails_closed() {
    for key in [None, Some(KEY), Some("")] {
        let t = test_app(None, false);

        let response = t
            .router
            .oneshot(generate(key, json!({ "html": "<p>hi</p>" })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            json_body(response).await,
            json!({ "error": "Server misconfigured: missing API_KEY" })
        );
        assert_eq!(t.recorder.opened.load(Ordering::SeqCst), 0);
    }
}

#[tokio::test]
async fn test_missing_or_empty_html_is_bad_request() {
    for body in [json!({}), json!({ "html": "" }), json!({ "filename": "a.pdf" })] {
        let t = test_app(Some(KEY), false);

        let response = t.router.oneshot(generate(Some(KEY), body)).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await, json!({ "error": "Missing HTML content" }));
        assert_eq!(t.recorder.opened.load(Ordering::SeqCst), 0);
    }
}

#[tokio::test]
async fn test_empty_body_is_missing_html() {
    let t = test_app(Some(KEY), false);
    let request = Request::builder()
        .method("POST")
        .uri("/generate-pdf")
        .header("x-api-key", KEY)
        .body(Body::empty())
        .unwrap();

    let response = t.router.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"], "Missing HTML content");
}

#[tokio::test]
async fn test_malformed_json_is_bad_request() {
    let t = test_app(Some(KEY), false);
    let request = Request::builder()
        .method("POST")
        .uri("/generate-pdf")
        .header("x-api-key", KEY)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{\"html\": "))
        .unwrap();

    let response = t.router.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["error"], "Invalid JSON body");
    assert!(body["details"].is_string());
    assert_eq!(t.recorder.opened.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_render_returns_pdf_with_default_filename() {
    let t = test_app(Some(KEY), false);

    let response = t
        .router
        .oneshot(generate(
            Some(KEY),
            json!({ "html": "<html><body>Hello</body></html>" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "application/pdf");
    assert_eq!(
        response.headers()[header::CONTENT_DISPOSITION],
        "attachment; filename=\"resume.pdf\""
    );

    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert!(bytes.starts_with(b"%PDF-"));
    assert_eq!(t.state.browser_pool.stats().created, 1);
    assert_eq!(t.state.browser_pool.stats().open, 0);
    assert_eq!(t.recorder.closed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_render_uses_requested_filename() {
    let t = test_app(Some(KEY), false);

    let response = t
        .router
        .oneshot(generate(
            Some(KEY),
            json!({ "html": "<p>cv</p>", "filename": "jane-doe.pdf" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_DISPOSITION],
        "attachment; filename=\"jane-doe.pdf\""
    );
}

#[tokio::test]
async fn test_filename_cannot_inject_headers() {
    let t = test_app(Some(KEY), false);

    let response = t
        .router
        .oneshot(generate(
            Some(KEY),
            json!({ "html": "<p>cv</p>", "filename": "x.pdf\r\nX-Injected: 1" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().get("x-injected").is_none());
}

#[tokio::test]
async fn test_render_failure_is_reported_and_session_released() {
    let t = test_app(Some(KEY), true);

    let response = t
        .router
        .oneshot(generate(Some(KEY), json!({ "html": "<p>hi</p>" })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = json_body(response).await;
    assert_eq!(body["error"], "PDF generation failed");
    assert!(body["details"].as_str().unwrap().contains("net::ERR_ABORTED"));

    assert_eq!(t.recorder.opened.load(Ordering::SeqCst), 1);
    assert_eq!(t.recorder.closed.load(Ordering::SeqCst), 1);
    assert_eq!(t.state.browser_pool.stats().open, 0);
}

#[tokio::test]
async fn test_concurrent_requests_are_isolated() {
    let t = test_app(Some(KEY), false);

    let requests = (0..6).map(|i| {
        let router = t.router.clone();
        async move {
            let html = format!("<p>document {}</p>", i);
            let response = router
                .oneshot(generate(Some(KEY), json!({ "html": html })))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
            (html, String::from_utf8(bytes.to_vec()).unwrap())
        }
    });

    for (html, pdf) in futures::future::join_all(requests).await {
        assert!(pdf.contains(&html));
        assert_eq!(pdf.matches("<p>document").count(), 1);
    }

    assert_eq!(t.state.browser_pool.stats().created, 6);
    assert_eq!(t.state.browser_pool.stats().open, 0);
    assert_eq!(t.recorder.closed.load(Ordering::SeqCst), 6);
}

#[tokio::test]
async fn test_unknown_path_requires_key() {
    let t = test_app(Some(KEY), false);
    let request = Request::builder()
        .uri("/admin")
        .body(Body::empty())
        .unwrap();

    let response = t.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let request = Request::builder()
        .uri("/admin")
        .header("x-api-key", KEY)
        .body(Body::empty())
        .unwrap();

    let response = t.router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_oversized_body_is_rejected_before_render() {
    let config = AppConfig {
        api_key: Some(KEY.to_string()),
        ..AppConfig::default()
    };
    let recorder = Arc::new(Recorder::default());
    let engine = Arc::new(FakeEngine {
        recorder: recorder.clone(),
        fail: false,
    });
    let router = app(AppState::new(&config, engine), 1024);

    let html = "x".repeat(4096);
    let response = router
        .oneshot(generate(Some(KEY), json!({ "html": html })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(recorder.opened.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_cors_preflight_skips_key() {
    let t = test_app(Some(KEY), false);
    let request = Request::builder()
        .method("OPTIONS")
        .uri("/generate-pdf")
        .header(header::ORIGIN, "https://app.example.com")
        .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
        .body(Body::empty())
        .unwrap();

    let response = t.router.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
        "*"
    );
}
