use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use prerender_bundle::App;
use prerender_session::{RenderResult, Request, SessionError};
use tracing::warn;

use super::cache::RenderCache;
use super::renderer::Renderer;

/// Callbacks around each render, mirroring the request/result/error
/// lifecycle of the handler. All methods default to no-ops except
/// `on_error`, which logs.
pub trait RenderHooks: Send + Sync {
    fn on_request(&self, _request: &mut Request) {}

    fn on_result(&self, _result: &mut RenderResult) {}

    fn on_error(&self, error: &SessionError) {
        warn!(target: "prerender-server", %error, "render failed; serving the plain document");
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LogHooks;

impl RenderHooks for LogHooks {}

pub struct ServeOptions {
    pub app: App,
    /// `None` serves the bundle statically without rendering.
    pub renderer: Option<Arc<dyn Renderer>>,
    pub origin: String,
    pub cache_ttl: Duration,
    pub visit_timeout: Duration,
    pub hooks: Arc<dyn RenderHooks>,
}

impl ServeOptions {
    pub fn new(app: App, origin: impl Into<String>) -> Self {
        Self {
            app,
            renderer: None,
            origin: origin.into(),
            cache_ttl: Duration::ZERO,
            visit_timeout: Duration::from_secs(10),
            hooks: Arc::new(LogHooks),
        }
    }

    pub fn with_renderer(mut self, renderer: Arc<dyn Renderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn with_visit_timeout(mut self, limit: Duration) -> Self {
        self.visit_timeout = limit;
        self
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn RenderHooks>) -> Self {
        self.hooks = hooks;
        self
    }
}

#[derive(Clone)]
pub struct ServeState {
    pub(crate) app: Arc<App>,
    pub(crate) renderer: Option<Arc<dyn Renderer>>,
    pub(crate) cache: Option<Arc<RenderCache>>,
    pub(crate) hooks: Arc<dyn RenderHooks>,
    pub(crate) protocol: String,
    pub(crate) visit_timeout: Duration,
    pub(crate) health: Arc<ServeHealth>,
}

impl ServeState {
    pub fn new(options: ServeOptions) -> Self {
        let protocol = url::Url::parse(&options.origin)
            .map(|origin| format!("{}:", origin.scheme()))
            .unwrap_or_else(|_| "http:".to_string());
        Self {
            app: Arc::new(options.app),
            renderer: options.renderer,
            cache: RenderCache::new(options.cache_ttl).map(Arc::new),
            hooks: options.hooks,
            protocol,
            visit_timeout: options.visit_timeout,
            health: Arc::new(ServeHealth::new()),
        }
    }

    pub fn app(&self) -> &App {
        &self.app
    }

    pub fn cache(&self) -> Option<&RenderCache> {
        self.cache.as_deref()
    }

    pub fn is_rendering(&self) -> bool {
        self.renderer.is_some()
    }

    pub fn health(&self) -> &ServeHealth {
        &self.health
    }

    /// Release the renderer, if any. Called once on shutdown.
    pub async fn close(&self) {
        self.health.mark_unready("shutting down");
        if let Some(renderer) = &self.renderer {
            renderer.close().await;
        }
    }
}

#[derive(Default)]
pub struct ServeHealth {
    live: AtomicBool,
    ready: AtomicBool,
    last_ready_check: AtomicU64,
    last_error: Mutex<Option<String>>,
}

impl ServeHealth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_live(&self) {
        self.live.store(true, Ordering::SeqCst);
    }

    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
        self.update_last_check();
        *self.last_error.lock() = None;
    }

    pub fn mark_unready(&self, error: impl Into<String>) {
        self.ready.store(false, Ordering::SeqCst);
        self.update_last_check();
        *self.last_error.lock() = Some(error.into());
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        HealthSnapshot {
            live: self.live.load(Ordering::SeqCst),
            ready: self.ready.load(Ordering::SeqCst),
            last_ready_check: match self.last_ready_check.load(Ordering::SeqCst) {
                0 => None,
                value => Some(value),
            },
            last_error: self.last_error.lock().clone(),
        }
    }

    fn update_last_check(&self) {
        if let Ok(duration) = SystemTime::now().duration_since(UNIX_EPOCH) {
            self.last_ready_check
                .store(duration.as_secs(), Ordering::SeqCst);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthSnapshot {
    pub live: bool,
    pub ready: bool,
    pub last_ready_check: Option<u64>,
    pub last_error: Option<String>,
}
