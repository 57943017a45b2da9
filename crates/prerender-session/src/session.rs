use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use cdp_adapter::{AdapterErrorKind, CdpConfig, CdpTransport, ChromiumTransport};
use parking_lot::Mutex as StateCell;
use prerender_bundle::App;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::bootstrap::{self, BootPlan};
use crate::collector::ErrorCollector;
use crate::error::{BootError, SessionError};
use crate::exec::ExecutionSession;
use crate::metrics;
use crate::request::Request;
use crate::result::RenderResult;
use crate::visit;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionOptions {
    /// URL the application believes it was loaded from.
    pub origin: String,
    pub headed: bool,
    pub boot_timeout_ms: u64,
    pub cdp: CdpConfig,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            origin: "http://localhost".to_string(),
            headed: false,
            boot_timeout_ms: 30_000,
            cdp: CdpConfig::default(),
        }
    }
}

impl SessionOptions {
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = origin.into();
        self
    }

    pub fn boot_timeout(&self) -> Duration {
        Duration::from_millis(self.boot_timeout_ms)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Booting,
    Ready,
    Rendering,
    Rebooting,
    Failed,
    Closed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Booting => "booting",
            SessionState::Ready => "ready",
            SessionState::Rendering => "rendering",
            SessionState::Rebooting => "rebooting",
            SessionState::Failed => "failed",
            SessionState::Closed => "closed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

struct SessionCore {
    exec: Option<ExecutionSession>,
    plan: BootPlan,
    collector: ErrorCollector,
    boot_timeout: Duration,
    failure: Option<String>,
}

/// A booted application in one browser page.
///
/// Visits and [`Session::close`] are serialized through a single gate; the
/// page document is shared state and only one render may touch it at a time.
pub struct Session {
    origin: String,
    gate: Mutex<SessionCore>,
    state: StateCell<SessionState>,
    closed: AtomicBool,
}

impl Session {
    /// Launch a browser and boot `app` in it.
    pub async fn boot(app: &App, options: SessionOptions) -> Result<Self, SessionError> {
        let plan = BootPlan::prepare(app)?;
        let cdp = options.cdp.clone().headed(options.headed);
        let transport: Arc<dyn CdpTransport> = Arc::new(ChromiumTransport::new(cdp));
        Self::start(plan, options, transport).await
    }

    /// Boot `app` over an existing transport. The session takes ownership of
    /// the browser behind it and shuts it down on close.
    pub async fn boot_with_transport(
        app: &App,
        options: SessionOptions,
        transport: Arc<dyn CdpTransport>,
    ) -> Result<Self, SessionError> {
        let plan = BootPlan::prepare(app)?;
        Self::start(plan, options, transport).await
    }

    async fn start(
        plan: BootPlan,
        options: SessionOptions,
        transport: Arc<dyn CdpTransport>,
    ) -> Result<Self, SessionError> {
        let started = Instant::now();
        let collector = ErrorCollector::new();

        let exec = match ExecutionSession::open(transport.clone(), &options.origin, collector.clone())
            .await
        {
            Ok(exec) => exec,
            Err(err) => {
                transport.shutdown().await;
                metrics::record_boot(false);
                error!(target: "prerender-session", ?err, "failed to open page session");
                return Err(if err.is_closed() {
                    SessionError::Closed
                } else {
                    BootError::Browser(err).into()
                });
            }
        };

        let session = Self {
            origin: options.origin.clone(),
            gate: Mutex::new(SessionCore {
                exec: None,
                plan,
                collector,
                boot_timeout: options.boot_timeout(),
                failure: None,
            }),
            state: StateCell::new(SessionState::Booting),
            closed: AtomicBool::new(false),
        };

        {
            let mut core = session.gate.lock().await;
            let outcome = timeout(
                core.boot_timeout,
                bootstrap::run(&exec, &core.collector, &core.plan, &session.origin),
            )
            .await;
            let outcome = match outcome {
                Ok(result) => result,
                Err(_) => Err(BootError::Timeout(core.boot_timeout).into()),
            };
            if let Err(err) = outcome {
                core.collector.reset();
                exec.close().await;
                metrics::record_boot(false);
                error!(target: "prerender-session", origin = %session.origin, %err, "boot failed");
                return Err(err);
            }
            core.exec = Some(exec);
        }

        session.set_state(SessionState::Ready);
        metrics::record_boot(true);
        info!(
            target: "prerender-session",
            origin = %session.origin,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "session booted"
        );
        Ok(session)
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Render `url` with `request` as the incoming request.
    ///
    /// A visit exceeding `limit`, or one whose remote call outlives the
    /// transport's command deadline, returns [`SessionError::Timeout`]; before
    /// the gate is released the page is rebooted so the next visit starts clean.
    /// If that reboot fails every later visit fails fast with
    /// [`SessionError::Failed`].
    pub async fn visit(
        &self,
        url: &str,
        request: &Request,
        limit: Duration,
    ) -> Result<RenderResult, SessionError> {
        if self.is_closed() {
            return Err(SessionError::Closed);
        }
        let mut core = self.gate.lock().await;
        if self.is_closed() {
            return Err(SessionError::Closed);
        }
        if let Some(reason) = &core.failure {
            return Err(SessionError::Failed(reason.clone()));
        }
        let Some(exec) = core.exec.as_ref() else {
            return Err(SessionError::Closed);
        };

        self.set_state(SessionState::Rendering);
        let started = Instant::now();
        // a command deadline inside the visit is the same hang as `limit`
        let outcome = match timeout(limit, visit::run(exec, &core.collector, url, request)).await {
            Ok(Err(SessionError::Protocol(err))) if err.kind == AdapterErrorKind::Timeout => {
                debug!(target: "prerender-session", url, ?err, "command deadline expired during visit");
                None
            }
            Ok(result) => Some(result),
            Err(_) => None,
        };

        match outcome {
            Some(Ok(result)) => {
                self.set_state(SessionState::Ready);
                metrics::record_visit("ok", started.elapsed());
                debug!(
                    target: "prerender-session",
                    url,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "visit rendered"
                );
                Ok(result)
            }
            Some(Err(err)) => {
                if err.is_recoverable() {
                    self.set_state(SessionState::Ready);
                    metrics::record_visit("render_error", started.elapsed());
                    warn!(target: "prerender-session", url, %err, "visit failed");
                } else {
                    core.failure = Some(err.to_string());
                    self.set_state(SessionState::Failed);
                    metrics::record_visit("fatal", started.elapsed());
                    error!(target: "prerender-session", url, %err, "session failed during visit");
                }
                Err(err)
            }
            None => {
                metrics::record_visit("timeout", started.elapsed());
                warn!(
                    target: "prerender-session",
                    url,
                    limit_ms = limit.as_millis() as u64,
                    "visit timed out; rebooting"
                );
                self.recover(&mut core).await;
                Err(SessionError::Timeout(limit))
            }
        }
    }

    async fn recover(&self, core: &mut SessionCore) {
        self.set_state(SessionState::Rebooting);
        core.collector.reset();

        let Some(exec) = core.exec.as_ref() else {
            return;
        };
        let started = Instant::now();
        let reboot = async {
            exec.terminate_execution().await;
            bootstrap::run(exec, &core.collector, &core.plan, &self.origin).await
        };
        let failure = match timeout(core.boot_timeout, reboot).await {
            Ok(Ok(())) => None,
            Ok(Err(err)) => Some(format!("reboot failed: {err}")),
            Err(_) => Some(format!("reboot timed out after {:?}", core.boot_timeout)),
        };
        core.collector.reset();

        match failure {
            None => {
                self.set_state(SessionState::Ready);
                metrics::record_reboot(true);
                info!(
                    target: "prerender-session",
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "session rebooted"
                );
            }
            Some(reason) => {
                error!(target: "prerender-session", %reason, "session unusable");
                core.failure = Some(reason);
                self.set_state(SessionState::Failed);
                metrics::record_reboot(false);
            }
        }
    }

    /// Wait for any running visit, then release the page and the browser.
    /// Calling it again is a no-op.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let mut core = self.gate.lock().await;
        if let Some(exec) = core.exec.take() {
            exec.close().await;
            info!(target: "prerender-session", origin = %self.origin, "session closed");
        }
        core.collector.reset();
        self.set_state(SessionState::Closed);
    }

    fn set_state(&self, next: SessionState) {
        let mut state = self.state.lock();
        if *state != next {
            debug!(target: "prerender-session", from = %*state, to = %next, "state change");
            *state = next;
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("origin", &self.origin)
            .field("state", &self.state())
            .finish()
    }
}

/// Boot, render a single URL and close.
pub async fn render(
    app: &App,
    url: &str,
    request: &Request,
    limit: Duration,
    options: SessionOptions,
) -> Result<RenderResult, SessionError> {
    let session = Session::boot(app, options).await?;
    let result = session.visit(url, request, limit).await;
    session.close().await;
    result
}
