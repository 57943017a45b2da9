use tracing::debug;

use crate::bootstrap::checkpoint;
use crate::collector::ErrorCollector;
use crate::error::{RenderError, SessionError};
use crate::exec::ExecutionSession;
use crate::request::Request;
use crate::result::RenderResult;
use crate::script;

/// Render `url` in the booted page and capture the document.
///
/// Must run under the session gate: the page holds a single document and a
/// single application instance.
pub(crate) async fn run(
    exec: &ExecutionSession,
    collector: &ErrorCollector,
    url: &str,
    request: &Request,
) -> Result<RenderResult, SessionError> {
    let op = collector.begin("visit");

    let outcome: Result<RenderResult, SessionError> = async {
        let expression = script::render_expression(url, request)
            .map_err(|err| RenderError::message(format!("failed to encode request: {err}")))?;
        let status = exec.evaluate(&expression, true).await?;
        checkpoint(exec, collector, op).await?;

        let captured = exec.evaluate(script::CAPTURE_EXPRESSION, false).await?;
        checkpoint(exec, collector, op).await?;

        let result: RenderResult = serde_json::from_value(captured)
            .map_err(|err| RenderError::message(format!("malformed capture: {err}")))?;
        debug!(
            target: "prerender-session",
            url,
            %status,
            body_len = result.body_content.len(),
            "visit captured"
        );
        Ok(result)
    }
    .await;

    collector.end(op);
    outcome
}
