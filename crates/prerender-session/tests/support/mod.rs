//! Scripted stand-in for Chromium that speaks just enough CDP for the
//! session: one page target, fetch interception of navigations, and a tiny
//! "application" whose routes are keyed by visit URL.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cdp_adapter::{AdapterError, AdapterErrorKind, CdpTransport, CommandTarget, TransportEvent};
use parking_lot::Mutex;
use prerender_bundle::App;
use serde_json::{json, Value};
use tokio::sync::{mpsc, Mutex as AsyncMutex, Notify};

pub const ORIGIN: &str = "http://example.org";
pub const SESSION_ID: &str = "S1";
pub const TARGET_ID: &str = "T1";
pub const SIDE_REQUEST: &str = "https://cdn.example.org/fonts/inter.woff2";

const INDEX: &str = concat!(
    "<!DOCTYPE html>\n<html>\n<head>\n",
    "<meta name=\"example/config/environment\" content=\"%7B%22modulePrefix%22%3A%22example%22%2C%22APP%22%3A%7B%22name%22%3A%22example%22%7D%7D\" />\n",
    "<!-- EMBER_CLI_FASTBOOT_TITLE --><title>Example</title>\n",
    "<!-- EMBER_CLI_FASTBOOT_HEAD -->\n</head>\n<body>\n",
    "<!-- EMBER_CLI_FASTBOOT_BODY -->\n",
    "<script src=\"/assets/vendor.js\"></script>\n",
    "<script src=\"/assets/example.js\"></script>\n</body>\n</html>\n"
);

const PACKAGE_JSON: &str = r#"{
  "name": "example",
  "fastboot": {
    "appName": "example",
    "config": {},
    "manifest": {
      "appFiles": ["assets/example.js"],
      "htmlFile": "index.html",
      "vendorFiles": ["assets/vendor.js"]
    }
  }
}"#;

/// The example bundle; `app_source` becomes `assets/example.js`.
pub fn example_app_with(app_source: &str) -> App {
    App::create(
        "example",
        [
            ("index.html", INDEX.to_string()),
            ("package.json", PACKAGE_JSON.to_string()),
            ("assets/vendor.js", "define('vendor', [], function () {});".to_string()),
            ("assets/example.js", app_source.to_string()),
            ("robots.txt", "User-agent: *\nDisallow:\n".to_string()),
        ],
    )
    .expect("example app")
}

pub fn example_app() -> App {
    example_app_with("define('example/app', [], function () {});")
}

#[derive(Clone, Debug, Default)]
pub struct FakeOptions {
    /// Navigations beyond this count fail with a network error.
    pub max_navigations: Option<usize>,
    /// Delay added to `$boot()`.
    pub boot_delay: Option<Duration>,
    /// The first N `$render` calls fail with a command deadline error.
    pub expired_renders: usize,
    /// `Fetch.continueRequest` fails for requests the app makes while rendering.
    pub fail_render_requests: bool,
}

#[derive(Default)]
struct Page {
    generation: u64,
    navigations: usize,
    loaded: bool,
    href: String,
    runtime: bool,
    setup: Option<String>,
    scripts: Vec<String>,
    booted: bool,
    running: bool,
    head: String,
    body: String,
    html_attrs: BTreeMap<String, String>,
    head_attrs: BTreeMap<String, String>,
    body_attrs: BTreeMap<String, String>,
    pending_navigation: Option<String>,
}

pub struct FakeBrowser {
    options: FakeOptions,
    events_tx: Mutex<Option<mpsc::UnboundedSender<TransportEvent>>>,
    events_rx: AsyncMutex<mpsc::UnboundedReceiver<TransportEvent>>,
    seq: Arc<AtomicU64>,
    closed: AtomicBool,
    page: Mutex<Page>,
    loaded: Notify,
    commands: Mutex<Vec<(String, Value)>>,
    request_ids: AtomicU64,
    terminations: AtomicU64,
    renders: AtomicUsize,
    failing_requests: Mutex<HashSet<String>>,
}

impl FakeBrowser {
    pub fn new() -> Arc<Self> {
        Self::with_options(FakeOptions::default())
    }

    pub fn with_options(options: FakeOptions) -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            options,
            events_tx: Mutex::new(Some(tx)),
            events_rx: AsyncMutex::new(rx),
            seq: Arc::new(AtomicU64::new(0)),
            closed: AtomicBool::new(false),
            page: Mutex::new(Page::default()),
            loaded: Notify::new(),
            commands: Mutex::new(Vec::new()),
            request_ids: AtomicU64::new(0),
            terminations: AtomicU64::new(0),
            renders: AtomicUsize::new(0),
            failing_requests: Mutex::new(HashSet::new()),
        })
    }

    pub fn transport(self: &Arc<Self>) -> Arc<dyn CdpTransport> {
        self.clone()
    }

    pub fn commands(&self) -> Vec<(String, Value)> {
        self.commands.lock().clone()
    }

    pub fn methods(&self) -> Vec<String> {
        self.commands.lock().iter().map(|(method, _)| method.clone()).collect()
    }

    pub fn evaluated_scripts(&self) -> Vec<String> {
        self.page.lock().scripts.clone()
    }

    pub fn setup_expression(&self) -> Option<String> {
        self.page.lock().setup.clone()
    }

    pub fn navigations(&self) -> usize {
        self.page.lock().navigations
    }

    pub fn terminations(&self) -> u64 {
        self.terminations.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Emit an event on the page session, as Chromium would.
    pub fn emit(&self, method: &str, params: Value) {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(tx) = self.events_tx.lock().as_ref() {
            let _ = tx.send(TransportEvent {
                method: method.to_string(),
                params,
                session_id: Some(SESSION_ID.to_string()),
                seq,
            });
        }
    }

    pub fn emit_console_error(&self, text: &str) {
        self.emit(
            "Runtime.consoleAPICalled",
            json!({ "type": "error", "args": [{ "type": "string", "value": text }] }),
        );
    }

    fn next_request_id(&self) -> String {
        format!("R{}", self.request_ids.fetch_add(1, Ordering::SeqCst) + 1)
    }

    async fn navigate(&self, url: &str) -> Result<Value, AdapterError> {
        let navigation_id = self.next_request_id();
        {
            let mut page = self.page.lock();
            page.navigations += 1;
            if let Some(max) = self.options.max_navigations {
                if page.navigations > max {
                    return Ok(json!({ "frameId": "F1", "errorText": "net::ERR_CONNECTION_REFUSED" }));
                }
            }
            page.generation += 1;
            page.loaded = false;
            page.href = "about:blank".to_string();
            page.pending_navigation = Some(navigation_id.clone());
        }

        self.emit(
            "Fetch.requestPaused",
            json!({
                "requestId": navigation_id,
                "request": { "url": url, "method": "GET" },
                "resourceType": "Document"
            }),
        );
        let side_id = self.next_request_id();
        self.emit(
            "Fetch.requestPaused",
            json!({
                "requestId": side_id,
                "request": { "url": SIDE_REQUEST, "method": "GET" },
                "resourceType": "Font"
            }),
        );

        let wait = async {
            loop {
                let notified = self.loaded.notified();
                if self.page.lock().loaded {
                    return;
                }
                notified.await;
            }
        };
        if tokio::time::timeout(Duration::from_secs(2), wait).await.is_err() {
            return Ok(json!({ "frameId": "F1", "errorText": "net::ERR_TIMED_OUT" }));
        }
        Ok(json!({ "frameId": "F1", "loaderId": "L1" }))
    }

    fn fulfill(&self, params: &Value) {
        let request_id = params["requestId"].as_str().unwrap_or_default();
        let mut page = self.page.lock();
        if page.pending_navigation.as_deref() == Some(request_id) {
            page.pending_navigation = None;
            // a fresh document: nothing from the previous boot survives
            let generation = page.generation;
            let navigations = page.navigations;
            let scripts = std::mem::take(&mut page.scripts);
            *page = Page {
                generation,
                navigations,
                loaded: true,
                href: ORIGIN.to_string(),
                scripts,
                ..Page::default()
            };
            drop(page);
            self.loaded.notify_waiters();
        }
    }

    async fn evaluate(&self, params: &Value) -> Result<Value, AdapterError> {
        let expression = params["expression"].as_str().unwrap_or_default();

        if expression.contains("document.readyState") {
            let page = self.page.lock();
            let state = if page.loaded { "complete" } else { "loading" };
            return Ok(value(json!({ "state": state, "href": page.href })));
        }

        if let Some((source, url)) = expression.rsplit_once("\n//# sourceURL=") {
            return Ok(self.run_script(source, url));
        }

        if expression.starts_with("window.$setup(") {
            let mut page = self.page.lock();
            if !page.runtime {
                return Ok(exception("ReferenceError: $setup is not defined"));
            }
            page.setup = Some(expression.to_string());
            return Ok(value(Value::Null));
        }

        if expression == "window.$boot()" {
            if let Some(delay) = self.options.boot_delay {
                tokio::time::sleep(delay).await;
            }
            let mut page = self.page.lock();
            if page.setup.is_none() {
                return Ok(exception("TypeError: Cannot read properties of undefined (reading 'default')"));
            }
            page.booted = true;
            return Ok(value(Value::Null));
        }

        if let Some(args) = expression
            .strip_prefix("window.$render(")
            .and_then(|rest| rest.strip_suffix(')'))
        {
            let (url, request): (String, Value) =
                serde_json::from_str(&format!("[{args}]")).expect("render arguments");
            return self.render(&url, request).await;
        }

        if expression == "window.$capture()" {
            let page = self.page.lock();
            return Ok(value(json!({
                "headContent": page.head,
                "bodyContent": page.body,
                "htmlAttributes": page.html_attrs,
                "headAttributes": page.head_attrs,
                "bodyAttributes": page.body_attrs,
            })));
        }

        Ok(exception(&format!("SyntaxError: unexpected expression {expression}")))
    }

    fn run_script(&self, source: &str, url: &str) -> Value {
        let mut page = self.page.lock();
        page.scripts.push(url.to_string());
        if source.contains("window.$setup =") {
            page.runtime = true;
        }
        drop(page);

        if let Some(message) = marker(source, "FAKE_CONSOLE_ERROR:") {
            self.emit_console_error(&message);
        }
        if let Some(message) = marker(source, "FAKE_THROW:") {
            return exception(&message);
        }
        json!({ "result": { "type": "undefined" } })
    }

    async fn render(&self, url: &str, request: Value) -> Result<Value, AdapterError> {
        if self.renders.fetch_add(1, Ordering::SeqCst) < self.options.expired_renders {
            return Err(AdapterError::new(AdapterErrorKind::Timeout)
                .with_hint("Runtime.evaluate timed out"));
        }
        let generation = {
            let mut page = self.page.lock();
            if !page.booted {
                return Ok(exception("TypeError: $app is undefined"));
            }
            if page.running {
                return Ok(exception("Error: instance running"));
            }
            page.running = true;
            page.head.clear();
            page.body.clear();
            page.html_attrs.clear();
            page.head_attrs.clear();
            page.body_attrs.clear();
            page.head = "<title>Example</title>".to_string();
            page.generation
        };

        let outcome = self.route(url, request, generation).await;
        self.page.lock().running = false;
        outcome
    }

    async fn route(&self, url: &str, request: Value, generation: u64) -> Result<Value, AdapterError> {
        const HOME: &str = "\n\n<h1>Example</h1>\n\n<p>Is FastBoot: true</p>";
        let (path, query) = url.split_once('?').unwrap_or((url, ""));

        match path {
            "/" => {
                let mut page = self.page.lock();
                page.body = HOME.to_string();
                if query == "attributes=1" {
                    page.html_attrs.insert("foo".into(), "html".into());
                    page.head_attrs.insert("foo".into(), "head".into());
                    page.body_attrs.insert("foo".into(), "body".into());
                }
            }
            "/delay" => {
                let millis = query
                    .strip_prefix("timeout=")
                    .and_then(|value| value.parse::<u64>().ok())
                    .unwrap_or(0);
                tokio::time::sleep(Duration::from_millis(millis)).await;
                let mut page = self.page.lock();
                if page.generation != generation {
                    return Err(AdapterError::new(AdapterErrorKind::CdpIo)
                        .with_hint("Execution context was destroyed."));
                }
                page.body = "\n\n<h1>Example</h1>\n\n<p>Message: Hello world!</p>".to_string();
            }
            "/debug" => {
                let mut request = request;
                let headers: BTreeMap<String, Value> = request["headers"]
                    .as_object()
                    .map(|map| {
                        map.iter()
                            .map(|(name, values)| (name.to_lowercase(), values.clone()))
                            .collect()
                    })
                    .unwrap_or_default();
                let host = headers
                    .get("host")
                    .and_then(|values| values.get(0))
                    .cloned()
                    .unwrap_or(Value::Null);
                request["headers"] = json!({ "headers": headers });
                let info = json!({
                    "isFastBoot": true,
                    "request": request,
                    "requestHost": host,
                    "response": { "statusCode": 200, "headers": { "headers": {} } },
                    "metadata": {},
                });
                self.page.lock().body = format!("<h1>Example</h1>{info}");
            }
            "/error" => {
                self.emit_console_error("Error: render failed loudly");
                self.page.lock().body = HOME.to_string();
            }
            "/log-error" => {
                self.emit(
                    "Log.entryAdded",
                    json!({ "entry": {
                        "level": "error",
                        "text": "Failed to load resource",
                        "url": "https://api.example.org/items"
                    }}),
                );
                self.page.lock().body = HOME.to_string();
            }
            "/late-error" => {
                self.page.lock().body = HOME.to_string();
                let tx = self.events_tx.lock().clone();
                let counter = self.seq.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    if let Some(tx) = tx {
                        let seq = counter.fetch_add(1, Ordering::SeqCst) + 1;
                        let _ = tx.send(TransportEvent {
                            method: "Runtime.consoleAPICalled".into(),
                            params: json!({ "type": "error", "args": [{ "type": "string", "value": "late" }] }),
                            session_id: Some(SESSION_ID.into()),
                            seq,
                        });
                    }
                });
            }
            "/side-request" => {
                let request_id = self.next_request_id();
                if self.options.fail_render_requests {
                    self.failing_requests.lock().insert(request_id.clone());
                }
                self.emit(
                    "Fetch.requestPaused",
                    json!({
                        "requestId": request_id,
                        "request": { "url": SIDE_REQUEST, "method": "GET" },
                        "resourceType": "Fetch"
                    }),
                );
                // the app awaits its fetch before the route settles
                tokio::time::sleep(Duration::from_millis(20)).await;
                self.page.lock().body = HOME.to_string();
            }
            "/throw" => {
                return Ok(exception("Error: route exploded\n    at Router.visit"));
            }
            _ if path.starts_with("/marker/") => {
                let name = &path["/marker/".len()..];
                self.page.lock().body = format!("<p>{name}-start</p>");
                tokio::time::sleep(Duration::from_millis(20)).await;
                self.page.lock().body.push_str(&format!("<p>{name}-end</p>"));
            }
            _ => {
                self.page.lock().body = "<h1>Not Found</h1>".to_string();
            }
        }

        Ok(value(json!(200)))
    }
}

#[async_trait]
impl CdpTransport for FakeBrowser {
    async fn start(&self) -> Result<(), AdapterError> {
        if self.is_closed() {
            return Err(AdapterError::closed());
        }
        Ok(())
    }

    async fn next_event(&self) -> Option<TransportEvent> {
        self.events_rx.lock().await.recv().await
    }

    async fn send_command(
        &self,
        target: CommandTarget,
        method: &str,
        params: Value,
    ) -> Result<Value, AdapterError> {
        if self.is_closed() {
            return Err(AdapterError::closed());
        }
        self.commands.lock().push((method.to_string(), params.clone()));

        if let CommandTarget::Session(session) = &target {
            assert_eq!(session, SESSION_ID, "command for unknown session");
        }

        match method {
            "Target.createTarget" => Ok(json!({ "targetId": TARGET_ID })),
            "Target.attachToTarget" => Ok(json!({ "sessionId": SESSION_ID })),
            "Target.closeTarget" => Ok(json!({ "success": true })),
            "Runtime.enable" | "Log.enable" | "Page.enable" | "Fetch.enable" => Ok(json!({})),
            "Page.navigate" => {
                let url = params["url"].as_str().unwrap_or_default().to_string();
                self.navigate(&url).await
            }
            "Fetch.fulfillRequest" => {
                self.fulfill(&params);
                Ok(json!({}))
            }
            "Fetch.continueRequest" => {
                let request_id = params["requestId"].as_str().unwrap_or_default();
                if self.failing_requests.lock().contains(request_id) {
                    return Err(AdapterError::new(AdapterErrorKind::CdpIo)
                        .with_hint("Invalid InterceptionId."));
                }
                Ok(json!({}))
            }
            "Runtime.evaluate" => self.evaluate(&params).await,
            "Runtime.terminateExecution" => {
                self.terminations.fetch_add(1, Ordering::SeqCst);
                Ok(json!({}))
            }
            other => Err(AdapterError::new(AdapterErrorKind::CdpIo)
                .with_hint(format!("'{other}' wasn't found"))),
        }
    }

    fn events_received(&self) -> u64 {
        self.seq.load(Ordering::SeqCst)
    }

    fn is_alive(&self) -> bool {
        !self.is_closed()
    }

    async fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.events_tx.lock().take();
    }
}

fn value(value: Value) -> Value {
    json!({ "result": { "type": "object", "value": value } })
}

fn exception(description: &str) -> Value {
    json!({
        "result": { "type": "object", "subtype": "error" },
        "exceptionDetails": {
            "exceptionId": 1,
            "text": "Uncaught",
            "exception": { "type": "object", "description": description }
        }
    })
}

fn marker(source: &str, prefix: &str) -> Option<String> {
    let start = source.find(prefix)? + prefix.len();
    let rest = &source[start..];
    let end = rest.find('\n').unwrap_or(rest.len());
    Some(rest[..end].trim().to_string())
}
