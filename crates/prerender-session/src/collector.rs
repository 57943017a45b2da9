//! Attribution of out-of-band console errors to the operation that caused them.
//!
//! Errors reach the session as protocol events, decoupled from the command
//! that triggered them. Each boot or visit arms the collector with a fresh
//! [`OperationId`]; messages arriving while an operation is armed belong to
//! it, messages arriving while nothing is armed are logged and dropped. The
//! event pump plus the transport watermark (see `ExecutionSession::settle`)
//! guarantee that everything emitted before a command's response has been
//! recorded before the operation checks in.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::RenderError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OperationId {
    id: u64,
    label: &'static str,
}

impl OperationId {
    pub fn label(&self) -> &'static str {
        self.label
    }
}

#[derive(Default)]
struct CollectorState {
    next_id: u64,
    current: Option<OperationId>,
    messages: Vec<String>,
    discarded: u64,
}

#[derive(Clone, Default)]
pub struct ErrorCollector {
    state: Arc<Mutex<CollectorState>>,
}

impl ErrorCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm the collector for a new operation, dropping anything left over.
    pub fn begin(&self, label: &'static str) -> OperationId {
        let mut state = self.state.lock();
        state.next_id += 1;
        let op = OperationId {
            id: state.next_id,
            label,
        };
        if !state.messages.is_empty() {
            debug!(
                target: "prerender-session",
                dropped = state.messages.len(),
                "dropping errors left from previous operation"
            );
            state.messages.clear();
        }
        state.current = Some(op);
        op
    }

    pub fn record(&self, message: String) {
        let mut state = self.state.lock();
        match state.current {
            Some(op) => {
                debug!(target: "prerender-session", op = op.label, %message, "collected page error");
                state.messages.push(message);
            }
            None => {
                state.discarded += 1;
                warn!(target: "prerender-session", %message, "page error outside any operation");
            }
        }
    }

    /// Drain what `op` collected so far; `op` stays armed.
    pub fn check(&self, op: OperationId) -> Result<(), RenderError> {
        let mut state = self.state.lock();
        if state.current != Some(op) {
            return Ok(());
        }
        RenderError::new(std::mem::take(&mut state.messages)).into_result()
    }

    /// Disarm `op`. Anything it did not check is dropped.
    pub fn end(&self, op: OperationId) {
        let mut state = self.state.lock();
        if state.current == Some(op) {
            state.current = None;
            state.messages.clear();
        }
    }

    /// Disarm whatever is running and forget its messages.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.current = None;
        state.messages.clear();
    }

    pub fn discarded(&self) -> u64 {
        self.state.lock().discarded
    }
}

/// Turn a log or console event into an error message, if it reports one.
pub(crate) fn error_message(method: &str, params: &Value) -> Option<String> {
    match method {
        "Log.entryAdded" => {
            let entry = params.get("entry")?;
            if entry.get("level").and_then(Value::as_str) != Some("error") {
                return None;
            }
            let text = entry.get("text").and_then(Value::as_str).unwrap_or_default();
            match entry.get("url").and_then(Value::as_str) {
                Some(url) if !url.is_empty() => Some(format!("{text} ({url})")),
                _ => Some(text.to_string()),
            }
        }
        "Runtime.consoleAPICalled" => {
            if params.get("type").and_then(Value::as_str) != Some("error") {
                return None;
            }
            let args = params.get("args").and_then(Value::as_array)?;
            let parts: Vec<String> = args
                .iter()
                .map(|arg| match arg.get("value") {
                    Some(Value::String(text)) => text.clone(),
                    Some(other) => other.to_string(),
                    None => arg
                        .get("description")
                        .and_then(Value::as_str)
                        .unwrap_or("undefined")
                        .to_string(),
                })
                .collect();
            Some(parts.join(" "))
        }
        _ => None,
    }
}
