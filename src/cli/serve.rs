use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use prerender_bundle::App;
use tokio::net::TcpListener;
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::server::{
    build_router, IsolatedRenderer, RenderCache, Renderer, ServeOptions, ServeState,
    SharedRenderer,
};

#[derive(Args, Clone, Debug, Default)]
pub struct ServeArgs {
    /// Directory holding the built application
    pub dist: Option<PathBuf>,

    /// Application name used in the config meta tag
    #[arg(long)]
    pub name: Option<String>,

    /// Listen address
    #[arg(long)]
    pub addr: Option<String>,

    /// Origin the application believes it is served from
    #[arg(long)]
    pub origin: Option<String>,

    /// Prerender pages in headless Chromium
    #[arg(long)]
    pub fastboot: bool,

    /// Boot a fresh browser for every rendered request
    #[arg(long)]
    pub isolated: bool,

    /// Show the browser window
    #[arg(long)]
    pub headed: bool,

    /// Keep rendered pages for this long (e.g. "30s", "5m")
    #[arg(long, value_parser = humantime::parse_duration)]
    pub cache_ttl: Option<Duration>,

    /// Abort a render after this long
    #[arg(long, value_parser = humantime::parse_duration)]
    pub visit_timeout: Option<Duration>,

    /// Chrome/Chromium executable
    #[arg(long, value_name = "PATH")]
    pub chrome: Option<PathBuf>,

    /// Attach to an existing DevTools websocket instead of launching
    #[arg(long)]
    pub ws_url: Option<String>,
}

impl ServeArgs {
    /// Layer the flags over file configuration.
    pub fn apply(&self, config: &mut Config) {
        if let Some(dist) = &self.dist {
            config.app.dist_dir = Some(dist.clone());
        }
        if let Some(name) = &self.name {
            config.app.name = name.clone();
        }
        if let Some(addr) = &self.addr {
            config.server.addr = addr.clone();
        }
        if let Some(origin) = &self.origin {
            config.app.origin = origin.clone();
        }
        config.app.fastboot |= self.fastboot;
        config.app.isolated |= self.isolated;
        config.browser.headed |= self.headed;
        if let Some(ttl) = self.cache_ttl {
            config.server.cache_ttl_secs = ttl.as_secs();
        }
        if let Some(limit) = self.visit_timeout {
            config.server.visit_timeout_ms = limit.as_millis() as u64;
        }
        if let Some(chrome) = &self.chrome {
            config.browser.chrome = Some(chrome.clone());
        }
        if let Some(ws_url) = &self.ws_url {
            config.browser.websocket_url = Some(ws_url.clone());
        }
    }
}

pub async fn cmd_serve(args: ServeArgs, mut config: Config) -> Result<()> {
    args.apply(&mut config);
    let dist = config
        .app
        .dist_dir
        .clone()
        .context("no application directory given (argument or app.dist_dir)")?;
    let app = App::from_dir(&config.app.name, &dist)
        .with_context(|| format!("failed to load application from {}", dist.display()))?;
    info!(
        app = %config.app.name,
        dist = %dist.display(),
        files = app.paths().count(),
        "application loaded"
    );

    let renderer = build_renderer(&app, &config).await?;
    let options = ServeOptions::new(app, config.app.origin.clone())
        .with_cache_ttl(config.cache_ttl())
        .with_visit_timeout(config.visit_timeout());
    let options = match renderer {
        Some(renderer) => options.with_renderer(renderer),
        None => options,
    };

    let state = ServeState::new(options);
    state.health().mark_live();
    state.health().mark_ready();
    if let Some(cache) = state.cache.clone() {
        spawn_cache_cleanup(cache);
    }

    let listener = TcpListener::bind(&config.server.addr)
        .await
        .with_context(|| format!("failed to bind {}", config.server.addr))?;
    info!(
        addr = %config.server.addr,
        fastboot = config.app.fastboot,
        isolated = config.app.isolated,
        "server listening"
    );

    let served = axum::serve(listener, build_router(state.clone()))
        .with_graceful_shutdown(shutdown_signal())
        .await;
    state.close().await;
    served.context("server exited unexpectedly")?;
    Ok(())
}

async fn build_renderer(app: &App, config: &Config) -> Result<Option<Arc<dyn Renderer>>> {
    if !config.app.fastboot {
        return Ok(None);
    }
    let options = config.session_options();
    if config.app.isolated {
        info!("isolated rendering: one browser per request");
        return Ok(Some(Arc::new(IsolatedRenderer::new(app.clone(), options))));
    }
    let renderer = SharedRenderer::boot(app, options)
        .await
        .context("failed to boot application in the browser")?;
    Ok(Some(Arc::new(renderer)))
}

fn spawn_cache_cleanup(cache: Arc<RenderCache>) {
    let every = cache.ttl().max(Duration::from_secs(1));
    tokio::spawn(async move {
        let mut ticker = interval(every);
        loop {
            ticker.tick().await;
            let removed = cache.prune_expired();
            if removed > 0 {
                debug!(removed, "pruned expired renders");
            }
        }
    });
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(?err, "failed to listen for ctrl-c; shutting down");
        return;
    }
    info!("shutdown requested");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_file_settings() {
        let mut config = Config::default();
        config.server.cache_ttl_secs = 60;
        config.app.name = "from-file".into();

        let args = ServeArgs {
            dist: Some(PathBuf::from("dist")),
            name: Some("shop".into()),
            fastboot: true,
            cache_ttl: Some(Duration::from_secs(5)),
            visit_timeout: Some(Duration::from_millis(1500)),
            ..ServeArgs::default()
        };
        args.apply(&mut config);

        assert_eq!(config.app.dist_dir, Some(PathBuf::from("dist")));
        assert_eq!(config.app.name, "shop");
        assert!(config.app.fastboot);
        assert!(!config.app.isolated);
        assert_eq!(config.server.cache_ttl_secs, 5);
        assert_eq!(config.server.visit_timeout_ms, 1500);
    }

    #[tokio::test]
    async fn static_mode_needs_no_renderer() {
        let config = Config::default();
        let app = App::create(
            "example",
            [(
                "index.html",
                r#"<meta name="example/config/environment" content="%7B%7D" />"#,
            )],
        )
        .unwrap();
        assert!(build_renderer(&app, &config).await.unwrap().is_none());
    }
}
