use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chromiumoxide::{
    Page,
    browser::{Browser, BrowserConfig},
    cdp::browser_protocol::{
        network::{EnableParams, EventLoadingFailed, EventLoadingFinished, EventRequestWillBeSent},
        page::PrintToPdfParams,
    },
};
use futures::{StreamExt, stream};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::cnfg::AppConfig;
use crate::engine::{PdfOptions, RenderEngine, RenderError, RenderSession, Result};
use crate::idle::{IdleOutcome, IdlePolicy, NetworkEvent, wait_for_network_idle};

// Flags the service has always been deployed with.
const CHROME_ARGS: &[&str] = &[
    "--disable-gpu",
    "--disable-dev-shm-usage",
    "--disable-accelerated-2d-canvas",
    "--disable-web-security",
    "--disable-features=IsolateOrigins",
    "--disable-site-isolation-trials",
];

/// Launches one headless Chromium process per session.
#[derive(Debug, Clone)]
pub struct ChromiumEngine {
    executable: Option<PathBuf>,
    no_sandbox: bool,
    idle: IdlePolicy,
}

impl ChromiumEngine {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            executable: config.chrome_executable.clone(),
            no_sandbox: config.chrome_no_sandbox,
            idle: config.network_idle,
        }
    }

    fn browser_config(&self, profile_dir: &Path) -> Result<BrowserConfig> {
        let mut builder = BrowserConfig::builder()
            .viewport(None)
            .user_data_dir(profile_dir)
            .args(CHROME_ARGS.iter().copied());

        if self.no_sandbox {
            builder = builder.no_sandbox();
        }
        if let Some(executable) = &self.executable {
            builder = builder.chrome_executable(executable);
        }

        builder
            .build()
            .map_err(|e| RenderError::Launch(format!("invalid browser config: {}", e)))
    }
}

#[async_trait]
impl RenderEngine for ChromiumEngine {
    async fn open_session(&self) -> Result<Box<dyn RenderSession>> {
        let id = Uuid::new_v4().to_string();
        // Removed on drop, so a launch that errors or is cancelled leaves nothing behind.
        let profile_dir = ProfileDir::new(&id);
        let config = self.browser_config(profile_dir.path())?;

        tracing::debug!(session = %id, "launching chromium");
        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| RenderError::Launch(e.to_string()))?;

        // The handler must be polled for the browser connection to make progress.
        // Individual message errors are expected and must not stop the loop.
        let handler_task = tokio::task::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    tracing::trace!("chromium handler: {}", e);
                }
            }
        });

        Ok(Box::new(ChromiumSession {
            id,
            browser,
            handler_task,
            profile_dir,
            idle: self.idle,
        }))
    }
}

pub struct ChromiumSession {
    id: String,
    browser: Browser,
    handler_task: JoinHandle<()>,
    profile_dir: ProfileDir,
    idle: IdlePolicy,
}

/// Temporary Chromium profile owned by one session.
struct ProfileDir {
    path: PathBuf,
    removed: bool,
}

impl ProfileDir {
    fn new(session_id: &str) -> Self {
        Self::at(std::env::temp_dir().join(format!("pdf-render-{}", session_id)))
    }

    fn at(path: PathBuf) -> Self {
        Self {
            path,
            removed: false,
        }
    }

    fn path(&self) -> &Path {
        &self.path
    }

    async fn remove(&mut self) -> std::io::Result<()> {
        self.removed = true;
        match tokio::fs::remove_dir_all(&self.path).await {
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            result => result,
        }
    }
}

impl Drop for ProfileDir {
    fn drop(&mut self) {
        if !self.removed {
            let _ = std::fs::remove_dir_all(&self.path);
        }
    }
}

impl ChromiumSession {
    async fn load_and_settle(&self, page: &Page, html: &str) -> Result<()> {
        page.execute(EnableParams::default())
            .await
            .map_err(|e| RenderError::Load(e.to_string()))?;

        // Subscribe before the document is written so no request is missed.
        let started = page
            .event_listener::<EventRequestWillBeSent>()
            .await
            .map_err(|e| RenderError::Load(e.to_string()))?
            .map(|ev| NetworkEvent::Started(ev.request_id.inner().clone()));
        let finished = page
            .event_listener::<EventLoadingFinished>()
            .await
            .map_err(|e| RenderError::Load(e.to_string()))?
            .map(|ev| NetworkEvent::Finished(ev.request_id.inner().clone()));
        let failed = page
            .event_listener::<EventLoadingFailed>()
            .await
            .map_err(|e| RenderError::Load(e.to_string()))?
            .map(|ev| NetworkEvent::Finished(ev.request_id.inner().clone()));

        let events = stream::select_all(vec![started.boxed(), finished.boxed(), failed.boxed()]);

        page.set_content(html)
            .await
            .map_err(|e| RenderError::Load(e.to_string()))?;

        match wait_for_network_idle(events, &self.idle).await {
            IdleOutcome::Idle | IdleOutcome::StreamEnded => {
                tracing::debug!(session = %self.id, "network idle");
            }
            IdleOutcome::TimedOut { in_flight } => {
                tracing::warn!(
                    session = %self.id,
                    in_flight,
                    "network did not settle within {:?}, exporting page as rendered",
                    self.idle.timeout
                );
            }
        }

        Ok(())
    }
}

#[async_trait]
impl RenderSession for ChromiumSession {
    fn id(&self) -> &str {
        &self.id
    }

    async fn render_pdf(&mut self, html: &str, options: &PdfOptions) -> Result<Vec<u8>> {
        let page = self
            .browser
            .new_page("about:blank")
            .await
            .map_err(|e| RenderError::Load(e.to_string()))?;

        self.load_and_settle(&page, html).await?;

        let pdf = page
            .pdf(print_params(options))
            .await
            .map_err(|e| RenderError::Export(e.to_string()))?;

        tracing::debug!(session = %self.id, bytes = pdf.len(), "pdf exported");
        Ok(pdf)
    }

    async fn close(&mut self) -> Result<()> {
        let closed = self
            .browser
            .close()
            .await
            .map_err(|e| RenderError::Close(e.to_string()));

        // A browser that did not take the close command may never exit on its own.
        if let Err(e) = &closed {
            tracing::warn!(session = %self.id, "graceful close failed, killing chromium: {}", e);
            if let Some(Err(e)) = self.browser.kill().await {
                tracing::warn!(session = %self.id, "failed to kill chromium: {}", e);
            }
        }

        let waited = self
            .browser
            .wait()
            .await
            .map_err(|e| RenderError::Close(e.to_string()));

        self.handler_task.abort();

        if let Err(e) = self.profile_dir.remove().await {
            tracing::debug!(session = %self.id, "profile dir not removed: {}", e);
        }

        closed?;
        waited?;
        Ok(())
    }
}

impl Drop for ChromiumSession {
    fn drop(&mut self) {
        self.handler_task.abort();
    }
}

fn print_params(options: &PdfOptions) -> PrintToPdfParams {
    PrintToPdfParams::builder()
        .paper_width(options.paper_width)
        .paper_height(options.paper_height)
        .print_background(options.print_background)
        .prefer_css_page_size(options.prefer_css_page_size)
        .margin_top(options.margin_top)
        .margin_right(options.margin_right)
        .margin_bottom(options.margin_bottom)
        .margin_left(options.margin_left)
        .build()
}
