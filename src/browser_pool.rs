//! Admission control for rendering sessions
//!
//! Browsers are expensive, so at most `max_sessions` may exist at once.
//! Every opened session is closed exactly once, whether the render
//! succeeded, failed, timed out, or the caller went away mid-render.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::engine::{PdfOptions, RenderEngine, RenderError, RenderSession, Result};

#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub max_sessions: usize,
    /// Covers waiting for a permit through PDF export.
    pub render_timeout: Duration,
    /// How long a session close may take before its permit is reclaimed anyway.
    pub close_timeout: Duration,
    pub pdf: PdfOptions,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_sessions: 4,
            render_timeout: Duration::from_secs(60),
            close_timeout: Duration::from_secs(10),
            pdf: PdfOptions::default(),
        }
    }
}

/// Snapshot of session counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionStats {
    pub created: usize,
    pub open: usize,
}

#[derive(Debug, Default)]
struct Counters {
    created: AtomicUsize,
    open: AtomicUsize,
}

impl Counters {
    fn opened(&self) {
        self.created.fetch_add(1, Ordering::SeqCst);
        self.open.fetch_add(1, Ordering::SeqCst);
    }

    fn closed(&self) {
        self.open.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct BrowserPool {
    engine: Arc<dyn RenderEngine>,
    permits: Arc<Semaphore>,
    counters: Arc<Counters>,
    settings: PoolSettings,
}

impl BrowserPool {
    pub fn new(engine: Arc<dyn RenderEngine>, settings: PoolSettings) -> Self {
        Self {
            engine,
            permits: Arc::new(Semaphore::new(settings.max_sessions)),
            counters: Arc::new(Counters::default()),
            settings,
        }
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            created: self.counters.created.load(Ordering::SeqCst),
            open: self.counters.open.load(Ordering::SeqCst),
        }
    }

    pub fn settings(&self) -> &PoolSettings {
        &self.settings
    }

    /// Render `html` in a fresh session and return the PDF bytes.
    pub async fn print_to_pdf(&self, html: &str) -> Result<Vec<u8>> {
        let timeout = self.settings.render_timeout;
        match tokio::time::timeout(timeout, self.render_in_session(html)).await {
            Ok(result) => result,
            Err(_) => Err(RenderError::Timeout(timeout)),
        }
    }

    async fn render_in_session(&self, html: &str) -> Result<Vec<u8>> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| RenderError::PoolClosed)?;

        let session = self.engine.open_session().await?;
        self.counters.opened();
        tracing::info!(session = %session.id(), "render session opened");

        let mut guard = SessionGuard {
            inner: Some((session, permit)),
            counters: self.counters.clone(),
            close_timeout: self.settings.close_timeout,
        };

        let result = match guard.session_mut() {
            Some(session) => session.render_pdf(html, &self.settings.pdf).await,
            None => Err(RenderError::PoolClosed),
        };

        guard.release().await;
        result
    }

    /// Stop admitting new renders. Waiters fail with [`RenderError::PoolClosed`].
    pub fn close(&self) {
        self.permits.close();
    }
}

/// Owns a live session and its permit until the session is closed.
///
/// Dropping the guard without calling `release` (timeout or cancelled
/// request) hands the close off to the runtime.
struct SessionGuard {
    inner: Option<(Box<dyn RenderSession>, OwnedSemaphorePermit)>,
    counters: Arc<Counters>,
    close_timeout: Duration,
}

impl SessionGuard {
    fn session_mut(&mut self) -> Option<&mut Box<dyn RenderSession>> {
        self.inner.as_mut().map(|(session, _)| session)
    }

    async fn release(mut self) {
        if let Some((session, permit)) = self.inner.take() {
            close_session(session, permit, self.counters.clone(), self.close_timeout).await;
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        let Some((session, permit)) = self.inner.take() else {
            return;
        };
        tracing::warn!(session = %session.id(), "render abandoned, closing session in background");

        let counters = self.counters.clone();
        match Handle::try_current() {
            Ok(handle) => {
                handle.spawn(close_session(session, permit, counters, self.close_timeout));
            }
            Err(_) => {
                // No runtime left to drive an async close; dropping the
                // session still tears the browser down.
                drop(session);
                counters.closed();
                drop(permit);
            }
        }
    }
}

async fn close_session(
    mut session: Box<dyn RenderSession>,
    permit: OwnedSemaphorePermit,
    counters: Arc<Counters>,
    close_timeout: Duration,
) {
    let closed = tokio::time::timeout(close_timeout, session.close()).await;
    match closed {
        Ok(Ok(())) => tracing::info!(session = %session.id(), "render session closed"),
        Ok(Err(e)) => {
            tracing::warn!(session = %session.id(), "failed to close render session: {}", e)
        }
        Err(_) => tracing::warn!(
            session = %session.id(),
            "render session did not close within {:?}, dropping it",
            close_timeout
        ),
    }
    drop(session);
    counters.closed();
    drop(permit);
}
