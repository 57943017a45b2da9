use std::time::Duration;

use async_trait::async_trait;
use prerender_bundle::App;
use prerender_session::{
    render, Request, RenderResult, Session, SessionError, SessionOptions, SessionState,
};
use tracing::info;

/// Something that can turn a route into a rendered document.
#[async_trait]
pub trait Renderer: Send + Sync {
    async fn render(
        &self,
        url: &str,
        request: &Request,
        limit: Duration,
    ) -> Result<RenderResult, SessionError>;

    /// Whether the renderer can currently accept work.
    fn is_ready(&self) -> bool;

    async fn close(&self);
}

/// One long-lived session shared by every request.
pub struct SharedRenderer {
    session: Session,
}

impl SharedRenderer {
    pub async fn boot(app: &App, options: SessionOptions) -> Result<Self, SessionError> {
        let session = Session::boot(app, options).await?;
        Ok(Self { session })
    }

    pub fn from_session(session: Session) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }
}

#[async_trait]
impl Renderer for SharedRenderer {
    async fn render(
        &self,
        url: &str,
        request: &Request,
        limit: Duration,
    ) -> Result<RenderResult, SessionError> {
        self.session.visit(url, request, limit).await
    }

    fn is_ready(&self) -> bool {
        matches!(
            self.session.state(),
            SessionState::Ready | SessionState::Rendering | SessionState::Rebooting
        )
    }

    async fn close(&self) {
        self.session.close().await;
    }
}

/// A fresh browser and boot per request; slow, but nothing is shared.
pub struct IsolatedRenderer {
    app: App,
    options: SessionOptions,
}

impl IsolatedRenderer {
    pub fn new(app: App, options: SessionOptions) -> Self {
        Self { app, options }
    }
}

#[async_trait]
impl Renderer for IsolatedRenderer {
    async fn render(
        &self,
        url: &str,
        request: &Request,
        limit: Duration,
    ) -> Result<RenderResult, SessionError> {
        render(&self.app, url, request, limit, self.options.clone()).await
    }

    fn is_ready(&self) -> bool {
        true
    }

    async fn close(&self) {
        info!(target: "prerender-server", "isolated renderer has nothing to release");
    }
}
