use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use cdp_adapter::{CdpTransport, CommandTarget};
use serde_json::{json, Value};
use tracing::{debug, warn};
use url::Url;

use crate::collector::ErrorCollector;
use crate::metrics;

/// Document served in place of the origin so the page has a real host.
pub const BLANK_DOCUMENT: &str = "<html><head></head><body></body></html>";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Interception {
    Fulfill,
    Continue,
}

/// Answers `Fetch.requestPaused` events for one page session: the synthetic
/// origin gets [`BLANK_DOCUMENT`], everything else goes to the network.
pub struct RequestInterceptor {
    origin: String,
    transport: Arc<dyn CdpTransport>,
    session_id: String,
    collector: ErrorCollector,
}

impl RequestInterceptor {
    pub fn new(
        origin: &str,
        transport: Arc<dyn CdpTransport>,
        session_id: String,
        collector: ErrorCollector,
    ) -> Self {
        Self {
            origin: normalize(origin),
            transport,
            session_id,
            collector,
        }
    }

    pub fn decide(&self, url: &str) -> Interception {
        if normalize(url) == self.origin {
            Interception::Fulfill
        } else {
            Interception::Continue
        }
    }

    /// Resolve one paused request. Failures are recorded, never raised.
    pub async fn handle(&self, params: Value) {
        let Some(request_id) = params.get("requestId").and_then(Value::as_str) else {
            warn!(target: "prerender-session", "requestPaused without requestId");
            return;
        };
        let url = params
            .pointer("/request/url")
            .and_then(Value::as_str)
            .unwrap_or_default();

        let action = self.decide(url);
        let (method, payload, label) = match action {
            Interception::Fulfill => (
                "Fetch.fulfillRequest",
                json!({
                    "requestId": request_id,
                    "responseCode": 200,
                    "responseHeaders": [
                        { "name": "Content-Type", "value": "text/html; charset=utf-8" }
                    ],
                    "body": BASE64.encode(BLANK_DOCUMENT),
                }),
                "fulfill",
            ),
            Interception::Continue => (
                "Fetch.continueRequest",
                json!({ "requestId": request_id }),
                "continue",
            ),
        };

        metrics::record_interception(label);
        debug!(target: "prerender-session", url, action = label, "intercepted request");

        if let Err(err) = self
            .transport
            .send_command(CommandTarget::Session(self.session_id.clone()), method, payload)
            .await
        {
            warn!(target: "prerender-session", url, ?err, "failed to {label} paused request");
            self.collector
                .record(format!("failed to {label} request {url}: {err}"));
        }
    }
}

/// Compare URLs in parsed form, ignoring trailing slashes.
pub(crate) fn normalize(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(url) => url.as_str().trim_end_matches('/').to_string(),
        Err(_) => raw.trim_end_matches('/').to_string(),
    }
}
