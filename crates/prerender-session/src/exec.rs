use std::sync::Arc;
use std::time::Duration;

use cdp_adapter::{AdapterError, AdapterErrorKind, CdpTransport, CommandTarget};
use serde_json::{json, Value};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::collector::{self, ErrorCollector};
use crate::error::{RenderError, SessionError};
use crate::interceptor::RequestInterceptor;
use crate::script;

const SETTLE_LIMIT: Duration = Duration::from_millis(250);
const READY_POLL: Duration = Duration::from_millis(20);

/// One attached page target plus the task that pumps its events.
pub(crate) struct ExecutionSession {
    transport: Arc<dyn CdpTransport>,
    target_id: String,
    session_id: String,
    processed: watch::Receiver<u64>,
    cancel: CancellationToken,
    pump: JoinHandle<()>,
}

impl ExecutionSession {
    /// Open a blank page and install the interceptor and error listeners
    /// before anything navigates.
    pub async fn open(
        transport: Arc<dyn CdpTransport>,
        origin: &str,
        collector: ErrorCollector,
    ) -> Result<Self, AdapterError> {
        transport.start().await?;

        let created = transport
            .send_command(
                CommandTarget::Browser,
                "Target.createTarget",
                json!({ "url": "about:blank" }),
            )
            .await?;
        let target_id = string_field(&created, "targetId")?;

        let attached = transport
            .send_command(
                CommandTarget::Browser,
                "Target.attachToTarget",
                json!({ "targetId": target_id, "flatten": true }),
            )
            .await?;
        let session_id = string_field(&attached, "sessionId")?;

        let (processed_tx, processed) = watch::channel(0u64);
        let cancel = CancellationToken::new();
        let interceptor = Arc::new(RequestInterceptor::new(
            origin,
            transport.clone(),
            session_id.clone(),
            collector.clone(),
        ));
        let pump = tokio::spawn(pump_events(
            transport.clone(),
            session_id.clone(),
            interceptor,
            collector,
            processed_tx,
            cancel.clone(),
        ));

        let session = Self {
            transport,
            target_id,
            session_id,
            processed,
            cancel,
            pump,
        };

        session.command("Runtime.enable", json!({})).await?;
        session.command("Log.enable", json!({})).await?;
        session.command("Page.enable", json!({})).await?;
        session
            .command(
                "Fetch.enable",
                json!({ "patterns": [{ "urlPattern": "*", "requestStage": "Request" }] }),
            )
            .await?;

        debug!(
            target: "prerender-session",
            target_id = %session.target_id,
            session_id = %session.session_id,
            "page session attached"
        );
        Ok(session)
    }

    pub async fn command(&self, method: &str, params: Value) -> Result<Value, AdapterError> {
        self.transport
            .send_command(CommandTarget::Session(self.session_id.clone()), method, params)
            .await
    }

    /// Navigate and wait until the new document has left the loading state.
    pub async fn navigate(&self, url: &str) -> Result<(), SessionError> {
        let response = self.command("Page.navigate", json!({ "url": url })).await?;
        if let Some(error) = response
            .get("errorText")
            .and_then(Value::as_str)
            .filter(|text| !text.is_empty())
        {
            return Err(RenderError::message(format!("navigation to {url} failed: {error}")).into());
        }
        self.wait_ready().await
    }

    async fn wait_ready(&self) -> Result<(), SessionError> {
        loop {
            match self.evaluate(script::READY_STATE_EXPRESSION, false).await {
                Ok(value) => {
                    let state = value.get("state").and_then(Value::as_str).unwrap_or_default();
                    let href = value.get("href").and_then(Value::as_str).unwrap_or_default();
                    if href != "about:blank" && matches!(state, "interactive" | "complete") {
                        return Ok(());
                    }
                }
                // the old context may vanish while the new document commits
                Err(SessionError::Protocol(err)) if self.transport.is_alive() => {
                    trace!(target: "prerender-session", ?err, "ready poll failed; retrying");
                }
                Err(err) => return Err(err),
            }
            tokio::time::sleep(READY_POLL).await;
        }
    }

    /// Evaluate an expression and return its value by JSON.
    pub async fn evaluate(&self, expression: &str, await_promise: bool) -> Result<Value, SessionError> {
        let response = self
            .command(
                "Runtime.evaluate",
                json!({
                    "expression": expression,
                    "awaitPromise": await_promise,
                    "returnByValue": true,
                }),
            )
            .await?;
        check_exception(&response)?;
        Ok(response
            .pointer("/result/value")
            .cloned()
            .unwrap_or(Value::Null))
    }

    /// Evaluate a script for its side effects; its completion value is ignored.
    pub async fn run_script(&self, source: &str, source_url: &str) -> Result<(), SessionError> {
        let expression = format!("{source}\n//# sourceURL={source_url}");
        let response = self
            .command(
                "Runtime.evaluate",
                json!({ "expression": expression, "returnByValue": false }),
            )
            .await?;
        check_exception(&response)
    }

    /// Wait until the pump has handled every event the transport had
    /// received when this was called.
    pub async fn settle(&self) {
        let watermark = self.transport.events_received();
        let mut processed = self.processed.clone();
        let caught_up = async move {
            loop {
                if *processed.borrow_and_update() >= watermark {
                    return;
                }
                if processed.changed().await.is_err() {
                    return;
                }
            }
        };
        if tokio::time::timeout(SETTLE_LIMIT, caught_up).await.is_err() {
            warn!(target: "prerender-session", watermark, "event pump lagging; continuing");
        }
    }

    /// Best effort: stop whatever script is still running in the page.
    pub async fn terminate_execution(&self) {
        if let Err(err) = self.command("Runtime.terminateExecution", json!({})).await {
            debug!(target: "prerender-session", ?err, "terminateExecution failed");
        }
    }

    pub async fn close(self) {
        self.cancel.cancel();
        if let Err(err) = self
            .transport
            .send_command(
                CommandTarget::Browser,
                "Target.closeTarget",
                json!({ "targetId": self.target_id }),
            )
            .await
        {
            debug!(target: "prerender-session", ?err, "closeTarget failed");
        }
        self.transport.shutdown().await;
    }
}

impl Drop for ExecutionSession {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.pump.abort();
    }
}

async fn pump_events(
    transport: Arc<dyn CdpTransport>,
    session_id: String,
    interceptor: Arc<RequestInterceptor>,
    collector: ErrorCollector,
    processed: watch::Sender<u64>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = transport.next_event() => event,
        };
        let Some(event) = event else {
            break;
        };

        let seq = event.seq;
        if event.session_id.as_deref() == Some(session_id.as_str()) {
            match event.method.as_str() {
                "Fetch.requestPaused" => {
                    let interceptor = interceptor.clone();
                    let params = event.params;
                    tokio::spawn(async move { interceptor.handle(params).await });
                }
                method => {
                    if let Some(message) = collector::error_message(method, &event.params) {
                        collector.record(message);
                    }
                }
            }
        }
        processed.send_replace(seq);
    }

    processed.send_replace(u64::MAX);
    debug!(target: "prerender-session", "event pump stopped");
}

fn string_field(value: &Value, field: &str) -> Result<String, AdapterError> {
    value
        .get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| {
            AdapterError::new(AdapterErrorKind::Internal)
                .with_hint(format!("response missing {field}"))
        })
}

/// Map `exceptionDetails` in an evaluate response to a render error.
fn check_exception(response: &Value) -> Result<(), SessionError> {
    let Some(details) = response.get("exceptionDetails") else {
        return Ok(());
    };
    let message = details
        .pointer("/exception/description")
        .and_then(Value::as_str)
        .or_else(|| details.get("text").and_then(Value::as_str))
        .unwrap_or("script threw")
        .to_string();
    Err(RenderError::message(message).into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exception_prefers_description() {
        let response = json!({
            "result": { "type": "object" },
            "exceptionDetails": {
                "text": "Uncaught",
                "exception": { "description": "Error: route exploded\n    at render" }
            }
        });
        match check_exception(&response) {
            Err(SessionError::Render(err)) => {
                assert!(err.messages()[0].starts_with("Error: route exploded"))
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(check_exception(&json!({ "result": { "value": 1 } })).is_ok());
    }

    #[test]
    fn missing_fields_are_internal_errors() {
        let err = string_field(&json!({}), "sessionId").unwrap_err();
        assert_eq!(err.kind, AdapterErrorKind::Internal);
    }
}
