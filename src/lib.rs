//! PDF render service
//!
//! Accepts an HTML document over HTTP, renders it with headless Chromium
//! and returns the PDF. Requests are authenticated with a shared secret
//! and rendering sessions are bounded by an admission pool.

pub mod auth;
pub mod browser_pool;
pub mod chromium;
pub mod cnfg;
pub mod engine;
pub mod error;
pub mod html2pdf;
pub mod idle;

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::DefaultBodyLimit,
    http::{Method, StatusCode},
    middleware,
    routing::post,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use auth::ApiKeyGate;
use browser_pool::{BrowserPool, PoolSettings};
use cnfg::AppConfig;
use engine::{PdfOptions, RenderEngine};

#[derive(Clone)]
pub struct AppState {
    pub gate: Arc<ApiKeyGate>,
    pub browser_pool: Arc<BrowserPool>,
}

impl AppState {
    pub fn new(config: &AppConfig, engine: Arc<dyn RenderEngine>) -> Self {
        let settings = PoolSettings {
            max_sessions: config.max_concurrent_renders,
            render_timeout: config.render_timeout,
            pdf: PdfOptions::default(),
            ..PoolSettings::default()
        };

        Self {
            gate: Arc::new(ApiKeyGate::new(config.api_key.as_deref())),
            browser_pool: Arc::new(BrowserPool::new(engine, settings)),
        }
    }
}

/// Build the router. Every route, including unknown paths, sits behind the
/// API key check; CORS preflights are answered before it.
pub fn app(app_state: AppState, body_limit: usize) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
        .allow_credentials(false);

    Router::new()
        .route("/generate-pdf", post(html2pdf::generate_pdf))
        .fallback(not_found)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(middleware::from_fn_with_state(
            app_state.clone(),
            auth::auth_middleware,
        ))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}

async fn not_found() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({ "error": "Not found" })),
    )
}
