use std::collections::HashMap;
use std::convert::TryInto;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chromiumoxide::async_process::Child;
use chromiumoxide::browser::BrowserConfig;
use chromiumoxide::cdp::browser_protocol::target::SessionId as CdpSessionId;
use chromiumoxide::cdp::events::CdpEventMessage;
use chromiumoxide::conn::Connection;
use chromiumoxide::error::CdpError;
use chromiumoxide_types::{CallId, CdpJsonEventMessage, Message, MethodId, Response};
use futures::{future::BoxFuture, StreamExt};
use serde_json::Value;
use tempfile::TempDir;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::CdpConfig;
use crate::error::{AdapterError, AdapterErrorKind};
use crate::metrics;
use crate::util::extract_ws_url;

/// A protocol event as delivered by the browser.
#[derive(Clone, Debug)]
pub struct TransportEvent {
    pub method: String,
    pub params: Value,
    pub session_id: Option<String>,
    /// Position of this event in the connection's event stream, starting at 1.
    pub seq: u64,
}

#[derive(Clone, Debug)]
pub enum CommandTarget {
    Browser,
    Session(String),
}

/// Request/response channel to one browser process.
///
/// Events and command responses share one ordered connection. Every event that
/// precedes a response on the wire is counted in [`CdpTransport::events_received`]
/// before that response is handed back to the caller, which lets consumers
/// wait until they have processed everything a command may have triggered.
#[async_trait]
pub trait CdpTransport: Send + Sync {
    async fn start(&self) -> Result<(), AdapterError>;
    async fn next_event(&self) -> Option<TransportEvent>;
    async fn send_command(
        &self,
        target: CommandTarget,
        method: &str,
        params: Value,
    ) -> Result<Value, AdapterError>;
    fn events_received(&self) -> u64;
    fn is_alive(&self) -> bool;
    async fn shutdown(&self);
}

#[derive(Clone, Default)]
pub struct RuntimeSignals {
    alive: Arc<AtomicBool>,
    events_seen: Arc<AtomicU64>,
}

type RuntimeFactory = Arc<
    dyn Fn(CdpConfig, RuntimeSignals) -> BoxFuture<'static, Result<Arc<RuntimeState>, AdapterError>>
        + Send
        + Sync,
>;

/// Transport that launches Chromium (or attaches to `websocket_url`) on first use.
///
/// Unlike a pooled connection, a lost browser is never silently replaced: the
/// page state living in it is gone, so callers see a `CdpIo` error and decide
/// themselves whether to build a new session.
#[derive(Clone)]
pub struct ChromiumTransport {
    cfg: CdpConfig,
    state: Arc<Mutex<Option<Arc<RuntimeState>>>>,
    signals: RuntimeSignals,
    closed: Arc<AtomicBool>,
    factory: RuntimeFactory,
}

impl ChromiumTransport {
    pub fn new(cfg: CdpConfig) -> Self {
        let factory: RuntimeFactory = Arc::new(|cfg: CdpConfig, signals: RuntimeSignals| {
            Box::pin(async move {
                let state = RuntimeState::start(cfg, signals).await?;
                Ok(Arc::new(state))
            })
        });

        Self::with_factory(cfg, factory)
    }

    fn with_factory(cfg: CdpConfig, factory: RuntimeFactory) -> Self {
        Self {
            cfg,
            state: Arc::new(Mutex::new(None)),
            signals: RuntimeSignals::default(),
            closed: Arc::new(AtomicBool::new(false)),
            factory,
        }
    }

    async fn runtime(&self) -> Result<Arc<RuntimeState>, AdapterError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(AdapterError::closed());
        }

        let mut guard = self.state.lock().await;
        if let Some(rt) = guard.as_ref() {
            if rt.is_alive() {
                return Ok(rt.clone());
            }
            return Err(AdapterError::new(AdapterErrorKind::CdpIo)
                .with_hint("browser connection lost"));
        }

        let runtime = (self.factory)(self.cfg.clone(), self.signals.clone()).await?;
        *guard = Some(runtime.clone());
        Ok(runtime)
    }
}

#[async_trait]
impl CdpTransport for ChromiumTransport {
    async fn start(&self) -> Result<(), AdapterError> {
        self.runtime().await.map(|_| ())
    }

    async fn next_event(&self) -> Option<TransportEvent> {
        let runtime = {
            let guard = self.state.lock().await;
            guard.as_ref().cloned()
        };
        match runtime {
            Some(runtime) => runtime.next_event().await,
            None => {
                debug!(target: "cdp-transport", "event stream requested before start");
                None
            }
        }
    }

    async fn send_command(
        &self,
        target: CommandTarget,
        method: &str,
        params: Value,
    ) -> Result<Value, AdapterError> {
        let runtime = self.runtime().await?;
        let start = Instant::now();
        metrics::record_command(method);
        match runtime
            .send_internal(
                target,
                method,
                params,
                Duration::from_millis(self.cfg.default_deadline_ms),
            )
            .await
        {
            Ok(value) => {
                metrics::record_command_success(method, start.elapsed());
                Ok(value)
            }
            Err(err) => {
                metrics::record_command_failure(method);
                Err(err)
            }
        }
    }

    fn events_received(&self) -> u64 {
        self.signals.events_seen.load(Ordering::SeqCst)
    }

    fn is_alive(&self) -> bool {
        !self.closed.load(Ordering::SeqCst) && self.signals.alive.load(Ordering::SeqCst)
    }

    async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let runtime = self.state.lock().await.take();
        if let Some(runtime) = runtime {
            runtime.stop().await;
        }
        info!(target: "cdp-transport", "transport shut down");
    }
}

struct ControlMessage {
    target: CommandTarget,
    method: String,
    params: Value,
    responder: oneshot::Sender<Result<Value, AdapterError>>,
}

type Inflight = HashMap<CallId, oneshot::Sender<Result<Value, AdapterError>>>;

pub struct RuntimeState {
    command_tx: mpsc::Sender<ControlMessage>,
    events_rx: Mutex<mpsc::Receiver<TransportEvent>>,
    loop_task: JoinHandle<()>,
    heartbeat_task: Option<JoinHandle<()>>,
    child: Mutex<Option<Child>>,
    profile: Option<TempDir>,
    cancel: CancellationToken,
    signals: RuntimeSignals,
}

impl RuntimeState {
    async fn start(cfg: CdpConfig, signals: RuntimeSignals) -> Result<Self, AdapterError> {
        let (child, ws_url, profile) = if let Some(url) = cfg.websocket_url.clone() {
            (None, url, None)
        } else {
            let (browser_cfg, profile) = Self::browser_config(&cfg)?;
            let (child, url) =
                Self::launch_browser(browser_cfg, Duration::from_millis(cfg.launch_timeout_ms))
                    .await?;
            (Some(child), url, profile)
        };

        let conn = Connection::<CdpEventMessage>::connect(&ws_url)
            .await
            .map_err(|err| AdapterError::new(AdapterErrorKind::CdpIo).with_hint(err.to_string()))?;

        let (command_tx, command_rx) = mpsc::channel(128);
        let (events_tx, events_rx) = mpsc::channel(1024);
        let cancel = CancellationToken::new();

        signals.alive.store(true, Ordering::SeqCst);
        let loop_signals = signals.clone();
        let loop_cancel = cancel.clone();

        let loop_task = tokio::spawn(async move {
            let result = tokio::select! {
                _ = loop_cancel.cancelled() => Ok(()),
                result = Self::run_loop(conn, command_rx, events_tx, loop_signals.clone()) => result,
            };
            loop_signals.alive.store(false, Ordering::SeqCst);
            if let Err(err) = result {
                error!(target: "cdp-transport", ?err, "transport loop terminated with error");
            }
        });

        let heartbeat_task = Self::spawn_heartbeat(
            command_tx.clone(),
            signals.clone(),
            cancel.clone(),
            Duration::from_millis(cfg.heartbeat_interval_ms),
            Duration::from_millis(cfg.default_deadline_ms),
        );

        info!(target: "cdp-transport", url = %ws_url, "chromium connection established");

        Ok(Self {
            command_tx,
            events_rx: Mutex::new(events_rx),
            loop_task,
            heartbeat_task,
            child: Mutex::new(child),
            profile,
            cancel,
            signals,
        })
    }

    #[cfg(test)]
    fn test_stub(signals: RuntimeSignals) -> Arc<Self> {
        let (command_tx, _command_rx) = mpsc::channel(8);
        let (_events_tx, events_rx) = mpsc::channel(8);
        signals.alive.store(true, Ordering::SeqCst);
        let loop_task = tokio::spawn(futures::future::pending::<()>());

        Arc::new(Self {
            command_tx,
            events_rx: Mutex::new(events_rx),
            loop_task,
            heartbeat_task: None,
            child: Mutex::new(None),
            profile: None,
            cancel: CancellationToken::new(),
            signals,
        })
    }

    fn is_alive(&self) -> bool {
        self.signals.alive.load(Ordering::SeqCst)
    }

    async fn send_internal(
        &self,
        target: CommandTarget,
        method: &str,
        params: Value,
        deadline: Duration,
    ) -> Result<Value, AdapterError> {
        let (resp_tx, resp_rx) = oneshot::channel();
        let message = ControlMessage {
            target,
            method: method.to_string(),
            params,
            responder: resp_tx,
        };

        self.command_tx
            .send(message)
            .await
            .map_err(|err| AdapterError::new(AdapterErrorKind::CdpIo).with_hint(err.to_string()))?;

        match tokio::time::timeout(deadline, resp_rx).await {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(err))) => Err(err),
            Ok(Err(_)) => Err(AdapterError::new(AdapterErrorKind::CdpIo)
                .with_hint("command response channel closed")),
            Err(_) => Err(AdapterError::new(AdapterErrorKind::Timeout)
                .with_hint(format!("{method} timed out"))),
        }
    }

    async fn next_event(&self) -> Option<TransportEvent> {
        let mut guard = self.events_rx.lock().await;
        guard.recv().await
    }

    async fn stop(&self) {
        self.cancel.cancel();
        self.signals.alive.store(false, Ordering::SeqCst);
        self.loop_task.abort();
        if let Some(handle) = &self.heartbeat_task {
            handle.abort();
        }
        if let Some(mut child) = self.child.lock().await.take() {
            if let Err(err) = child.kill().await {
                warn!(target: "cdp-transport", ?err, "failed to kill chromium child");
            }
        }
        if let Some(profile) = &self.profile {
            debug!(target: "cdp-transport", path = %profile.path().display(), "releasing profile dir");
        }
    }

    fn spawn_heartbeat(
        sender: mpsc::Sender<ControlMessage>,
        signals: RuntimeSignals,
        cancel: CancellationToken,
        interval_duration: Duration,
        deadline: Duration,
    ) -> Option<JoinHandle<()>> {
        if interval_duration.is_zero() {
            return None;
        }

        let response_deadline = deadline.min(Duration::from_secs(5));

        Some(tokio::spawn(async move {
            let mut ticker = interval(interval_duration);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // the first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let (resp_tx, resp_rx) = oneshot::channel();
                let message = ControlMessage {
                    target: CommandTarget::Browser,
                    method: "Browser.getVersion".to_string(),
                    params: Value::Object(Default::default()),
                    responder: resp_tx,
                };

                if sender.send(message).await.is_err() {
                    debug!(target: "cdp-transport", "heartbeat send failed (channel closed)");
                    break;
                }

                match tokio::time::timeout(response_deadline, resp_rx).await {
                    Ok(Ok(Ok(_))) => {}
                    Ok(Ok(Err(err))) => {
                        warn!(target: "cdp-transport", ?err, "heartbeat command error");
                        signals.alive.store(false, Ordering::SeqCst);
                        break;
                    }
                    Ok(Err(_)) => {
                        debug!(target: "cdp-transport", "heartbeat response channel closed");
                        break;
                    }
                    Err(_) => {
                        warn!(target: "cdp-transport", "heartbeat timed out; marking browser dead");
                        signals.alive.store(false, Ordering::SeqCst);
                        break;
                    }
                }
            }
        }))
    }

    fn browser_config(cfg: &CdpConfig) -> Result<(BrowserConfig, Option<TempDir>), AdapterError> {
        if !cfg.executable.as_os_str().is_empty() && !cfg.executable.exists() {
            return Err(AdapterError::new(AdapterErrorKind::Launch)
                .with_hint(format!(
                    "chrome executable not found at {}",
                    cfg.executable.display()
                ))
                .with_data(serde_json::json!({
                    "expected": cfg.executable,
                    "hint": "Set PRERENDER_CHROME to the full path of chrome/chromium."
                })));
        }

        let (profile_dir, profile) = match &cfg.user_data_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir).map_err(|err| {
                    AdapterError::new(AdapterErrorKind::Launch)
                        .with_hint(format!("failed to ensure user-data-dir: {err}"))
                })?;
                (dir.clone(), None)
            }
            None => {
                let temp = tempfile::Builder::new()
                    .prefix("prerender-profile-")
                    .tempdir()
                    .map_err(|err| {
                        AdapterError::new(AdapterErrorKind::Launch)
                            .with_hint(format!("failed to create profile dir: {err}"))
                    })?;
                (temp.path().to_path_buf(), Some(temp))
            }
        };

        let mut builder = BrowserConfig::builder()
            .request_timeout(Duration::from_millis(cfg.default_deadline_ms))
            .launch_timeout(Duration::from_millis(cfg.launch_timeout_ms));

        if !cfg.headless {
            builder = builder.with_head();
        }
        if cfg.no_sandbox {
            builder = builder.no_sandbox();
        }

        let mut args: Vec<String> = [
            "--disable-background-networking",
            "--disable-background-timer-throttling",
            "--disable-breakpad",
            "--disable-client-side-phishing-detection",
            "--disable-component-update",
            "--disable-default-apps",
            "--disable-dev-shm-usage",
            "--disable-extensions",
            "--disable-hang-monitor",
            "--disable-popup-blocking",
            "--disable-sync",
            "--metrics-recording-only",
            "--no-first-run",
            "--no-default-browser-check",
            "--password-store=basic",
            "--use-mock-keychain",
        ]
        .iter()
        .map(|arg| arg.to_string())
        .collect();
        if cfg.headless {
            args.push("--headless=new".into());
            args.push("--hide-scrollbars".into());
            args.push("--mute-audio".into());
        }
        if cfg.disable_images {
            args.push("--blink-settings=imagesEnabled=false".into());
        }
        args.extend(cfg.extra_args.iter().cloned());
        builder = builder.args(args);

        if !cfg.executable.as_os_str().is_empty() {
            builder = builder.chrome_executable(cfg.executable.clone());
        }
        builder = builder.user_data_dir(profile_dir);

        let config = builder.build().map_err(|err| {
            AdapterError::new(AdapterErrorKind::Internal)
                .with_hint(format!("browser config error: {err}"))
        })?;
        Ok((config, profile))
    }

    async fn launch_browser(
        config: BrowserConfig,
        limit: Duration,
    ) -> Result<(Child, String), AdapterError> {
        let mut child = config.launch().map_err(|err| {
            AdapterError::new(AdapterErrorKind::Launch)
                .with_hint(format!("failed to launch chromium: {err}"))
        })?;

        let ws_url = extract_ws_url(&mut child, limit)
            .await
            .map_err(|err| AdapterError::new(AdapterErrorKind::Launch).with_hint(err.to_string()))?;

        Ok((child, ws_url))
    }

    async fn run_loop(
        mut conn: Connection<CdpEventMessage>,
        mut command_rx: mpsc::Receiver<ControlMessage>,
        event_tx: mpsc::Sender<TransportEvent>,
        signals: RuntimeSignals,
    ) -> Result<(), AdapterError> {
        let mut inflight: Inflight = HashMap::new();

        loop {
            tokio::select! {
                Some(cmd) = command_rx.recv() => {
                    Self::handle_command(&mut conn, cmd, &mut inflight)?;
                }
                message = conn.next() => {
                    match message {
                        Some(Ok(Message::Response(resp))) => {
                            Self::handle_response(resp, &mut inflight);
                        }
                        Some(Ok(Message::Event(event))) => {
                            if let Err(err) = Self::handle_event(event, &event_tx, &signals).await {
                                warn!(target: "cdp-transport", ?err, "failed to forward event");
                            }
                        }
                        Some(Err(err)) => {
                            let adapter_err = Self::map_cdp_error(err);
                            for (_, sender) in inflight.drain() {
                                let _ = sender.send(Err(adapter_err.clone()));
                            }
                            return Err(adapter_err);
                        }
                        None => {
                            let err = AdapterError::new(AdapterErrorKind::CdpIo)
                                .with_hint("cdp connection closed");
                            for (_, sender) in inflight.drain() {
                                let _ = sender.send(Err(err.clone()));
                            }
                            return Ok(());
                        }
                    }
                }
            }
        }
    }

    fn handle_command(
        conn: &mut Connection<CdpEventMessage>,
        cmd: ControlMessage,
        inflight: &mut Inflight,
    ) -> Result<(), AdapterError> {
        let session = match cmd.target {
            CommandTarget::Browser => None,
            CommandTarget::Session(session_id) => Some(CdpSessionId::from(session_id)),
        };

        let method_id: MethodId = cmd.method.clone().into();
        match conn.submit_command(method_id, session, cmd.params) {
            Ok(call_id) => {
                inflight.insert(call_id, cmd.responder);
                Ok(())
            }
            Err(err) => {
                let adapter_err =
                    AdapterError::new(AdapterErrorKind::CdpIo).with_hint(err.to_string());
                let _ = cmd.responder.send(Err(adapter_err.clone()));
                Err(adapter_err)
            }
        }
    }

    fn handle_response(resp: Response, inflight: &mut Inflight) {
        let entry = inflight.remove(&resp.id);
        let result = Self::extract_payload(resp);

        if let Some(sender) = entry {
            let _ = sender.send(result);
        }
    }

    async fn handle_event(
        event: CdpEventMessage,
        event_tx: &mpsc::Sender<TransportEvent>,
        signals: &RuntimeSignals,
    ) -> Result<(), AdapterError> {
        let raw: CdpJsonEventMessage = event.try_into().map_err(|err| {
            AdapterError::new(AdapterErrorKind::Internal)
                .with_hint(format!("failed to decode cdp event: {err}"))
        })?;

        metrics::record_event();
        let seq = signals.events_seen.fetch_add(1, Ordering::SeqCst) + 1;
        let payload = TransportEvent {
            method: raw.method.into_owned(),
            params: raw.params,
            session_id: raw.session_id,
            seq,
        };

        event_tx
            .send(payload)
            .await
            .map_err(|err| AdapterError::new(AdapterErrorKind::Internal).with_hint(err.to_string()))
    }

    fn extract_payload(resp: Response) -> Result<Value, AdapterError> {
        if let Some(result) = resp.result {
            Ok(result)
        } else if let Some(error) = resp.error {
            let retriable = error.code >= 500;
            Err(AdapterError::new(AdapterErrorKind::CdpIo)
                .with_hint(format!("cdp error {}: {}", error.code, error.message))
                .retriable(retriable))
        } else {
            Err(AdapterError::new(AdapterErrorKind::Internal).with_hint("empty cdp response"))
        }
    }

    fn map_cdp_error(err: CdpError) -> AdapterError {
        let hint = err.to_string();
        match err {
            CdpError::Timeout => AdapterError::new(AdapterErrorKind::Timeout)
                .with_hint(hint)
                .retriable(true),
            CdpError::JavascriptException(_) | CdpError::Serde(_) => {
                AdapterError::new(AdapterErrorKind::Internal).with_hint(hint)
            }
            _ => AdapterError::new(AdapterErrorKind::CdpIo)
                .with_hint(hint)
                .retriable(true),
        }
    }
}

impl Drop for RuntimeState {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.signals.alive.store(false, Ordering::SeqCst);
        self.loop_task.abort();
        if let Some(handle) = &self.heartbeat_task {
            handle.abort();
        }

        if let Ok(mut guard) = self.child.try_lock() {
            if let Some(mut child) = guard.take() {
                if let Ok(handle) = tokio::runtime::Handle::try_current() {
                    handle.spawn(async move {
                        if let Err(err) = child.kill().await {
                            warn!(target: "cdp-transport", ?err, "failed to kill chromium child");
                        }
                    });
                } else {
                    debug!(target: "cdp-transport", "no tokio runtime available to kill chromium child");
                }
            }
        }
    }
}
