//! Rendering engine seam
//!
//! The HTTP layer and the admission pool only see these traits. The
//! Chromium implementation lives in [`crate::chromium`]; tests plug in
//! fakes that count sessions.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("Failed to launch browser: {0}")]
    Launch(String),

    #[error("Failed to load HTML content: {0}")]
    Load(String),

    #[error("Failed to export PDF: {0}")]
    Export(String),

    #[error("Failed to close browser session: {0}")]
    Close(String),

    #[error("Rendering timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("Renderer is shutting down")]
    PoolClosed,
}

pub type Result<T> = std::result::Result<T, RenderError>;

/// Print settings handed to the engine for every export.
///
/// Paper size is in inches, as the DevTools protocol expects.
#[derive(Debug, Clone, PartialEq)]
pub struct PdfOptions {
    pub paper_width: f64,
    pub paper_height: f64,
    pub print_background: bool,
    /// Let CSS `@page { size: ... }` override the paper size.
    pub prefer_css_page_size: bool,
    pub margin_top: f64,
    pub margin_right: f64,
    pub margin_bottom: f64,
    pub margin_left: f64,
}

impl PdfOptions {
    pub const A4_WIDTH_IN: f64 = 8.27;
    pub const A4_HEIGHT_IN: f64 = 11.7;
}

impl Default for PdfOptions {
    fn default() -> Self {
        Self {
            paper_width: Self::A4_WIDTH_IN,
            paper_height: Self::A4_HEIGHT_IN,
            print_background: true,
            prefer_css_page_size: true,
            margin_top: 0.0,
            margin_right: 0.0,
            margin_bottom: 0.0,
            margin_left: 0.0,
        }
    }
}

/// Produces isolated, single-use rendering sessions.
#[async_trait]
pub trait RenderEngine: Send + Sync {
    async fn open_session(&self) -> Result<Box<dyn RenderSession>>;
}

/// One browser instance owned by exactly one render.
#[async_trait]
pub trait RenderSession: Send {
    /// Identifier used in logs.
    fn id(&self) -> &str;

    /// Load `html` into a fresh page, wait for it to settle and print it.
    async fn render_pdf(&mut self, html: &str, options: &PdfOptions) -> Result<Vec<u8>>;

    /// Tear the session down. Called exactly once per opened session.
    async fn close(&mut self) -> Result<()>;
}
