use prerender_bundle::{App, Manifest};
use serde_json::{Map, Value};
use tracing::{debug, trace};

use crate::collector::{ErrorCollector, OperationId};
use crate::error::{BootError, RenderError, SessionError};
use crate::exec::ExecutionSession;
use crate::script;

/// Everything a (re)boot needs, prepared once per session.
pub(crate) struct BootPlan {
    app: App,
    manifest: Manifest,
}

impl BootPlan {
    /// Parse the manifest and take a private copy of the app with
    /// `APP.autoboot` switched off; the caller's app is left untouched.
    pub fn prepare(app: &App) -> Result<Self, BootError> {
        let manifest = Manifest::from_app(app)?;
        manifest.validate(app)?;

        let mut app = app.clone();
        let mut app_config = match app.get("APP") {
            Some(Value::Object(map)) => map.clone(),
            _ => Map::new(),
        };
        app_config.insert("autoboot".to_string(), Value::Bool(false));
        app.set("APP", Value::Object(app_config))?;

        Ok(Self { app, manifest })
    }

    pub fn app(&self) -> &App {
        &self.app
    }
}

/// Navigate to the origin, install the runtime, evaluate vendor then app
/// scripts and boot the application.
pub(crate) async fn run(
    exec: &ExecutionSession,
    collector: &ErrorCollector,
    plan: &BootPlan,
    origin: &str,
) -> Result<(), SessionError> {
    let op = collector.begin("boot");
    let outcome = run_steps(exec, collector, op, plan, origin).await;
    collector.end(op);
    outcome.map_err(|err| match err {
        SessionError::Render(err) => BootError::Script(err).into(),
        SessionError::Protocol(err) => BootError::Browser(err).into(),
        other => other,
    })
}

async fn run_steps(
    exec: &ExecutionSession,
    collector: &ErrorCollector,
    op: OperationId,
    plan: &BootPlan,
    origin: &str,
) -> Result<(), SessionError> {
    exec.navigate(origin).await?;
    checkpoint(exec, collector, op).await?;

    exec.run_script(script::RUNTIME, script::RUNTIME_URL).await?;
    let config = Value::Object(plan.app.config().clone());
    let setup = script::setup_expression(plan.app.name(), &config)
        .map_err(|err| RenderError::message(format!("failed to encode config: {err}")))?;
    exec.evaluate(&setup, false).await?;
    checkpoint(exec, collector, op).await?;

    for path in plan.manifest.scripts() {
        let source = plan
            .app
            .file(path)
            .ok_or_else(|| RenderError::message(format!("bundle is missing {path}")))?;
        exec.run_script(&String::from_utf8_lossy(source), &script::source_url(origin, path))
            .await?;
        checkpoint(exec, collector, op).await?;
        trace!(target: "prerender-session", path, "evaluated bundle script");
    }

    exec.evaluate(script::BOOT_EXPRESSION, true).await?;
    checkpoint(exec, collector, op).await?;

    debug!(
        target: "prerender-session",
        app = plan.app.name(),
        scripts = plan.manifest.scripts().count(),
        "application booted"
    );
    Ok(())
}

/// Let in-flight events land, then fail if the operation collected errors.
pub(crate) async fn checkpoint(
    exec: &ExecutionSession,
    collector: &ErrorCollector,
    op: OperationId,
) -> Result<(), SessionError> {
    exec.settle().await;
    collector.check(op).map_err(SessionError::from)
}
