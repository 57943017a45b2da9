use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use prerender_bundle::App;
use prerender_session::{render, Request};

use crate::config::Config;
use crate::server::splice;

#[derive(Args, Clone, Debug)]
pub struct RenderArgs {
    /// Directory holding the built application
    pub dist: PathBuf,

    /// Route to render, with an optional query string
    #[arg(default_value = "/")]
    pub path: String,

    /// Application name used in the config meta tag
    #[arg(long)]
    pub name: Option<String>,

    /// Origin the application believes it is served from
    #[arg(long)]
    pub origin: Option<String>,

    /// Cookie sent with the render (repeatable)
    #[arg(long = "cookie", value_name = "NAME=VALUE", value_parser = parse_cookie)]
    pub cookies: Vec<(String, String)>,

    /// Header sent with the render (repeatable)
    #[arg(long = "header", value_name = "NAME:VALUE", value_parser = parse_header)]
    pub headers: Vec<(String, String)>,

    /// Abort the render after this long
    #[arg(long, value_parser = humantime::parse_duration)]
    pub timeout: Option<Duration>,

    /// Print the captured parts as JSON instead of the spliced document
    #[arg(long)]
    pub json: bool,

    /// Show the browser window
    #[arg(long)]
    pub headed: bool,

    /// Chrome/Chromium executable
    #[arg(long, value_name = "PATH")]
    pub chrome: Option<PathBuf>,
}

impl RenderArgs {
    pub fn apply(&self, config: &mut Config) {
        config.app.dist_dir = Some(self.dist.clone());
        if let Some(name) = &self.name {
            config.app.name = name.clone();
        }
        if let Some(origin) = &self.origin {
            config.app.origin = origin.clone();
        }
        if let Some(limit) = self.timeout {
            config.server.visit_timeout_ms = limit.as_millis() as u64;
        }
        config.browser.headed |= self.headed;
        if let Some(chrome) = &self.chrome {
            config.browser.chrome = Some(chrome.clone());
        }
    }

    /// The request the application sees for this render.
    pub fn request(&self, origin: &str) -> Request {
        let (path, query) = match self.path.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (self.path.as_str(), None),
        };
        let mut request = Request::get(path);
        if let Ok(origin) = url::Url::parse(origin) {
            request.protocol = format!("{}:", origin.scheme());
            if let Some(host) = origin.host_str() {
                let host = match origin.port() {
                    Some(port) => format!("{host}:{port}"),
                    None => host.to_string(),
                };
                request.headers.set("host", host);
            }
        }
        for (name, value) in &self.headers {
            request.headers.append(name, value.clone());
        }
        for (name, value) in &self.cookies {
            request.cookies.insert(name.clone(), value.clone());
        }
        if let Some(query) = query {
            request.query_params = url::form_urlencoded::parse(query.as_bytes())
                .into_owned()
                .collect();
        }
        request
    }
}

pub async fn cmd_render(args: RenderArgs, mut config: Config) -> Result<()> {
    args.apply(&mut config);
    let app = App::from_dir(&config.app.name, &args.dist)
        .with_context(|| format!("failed to load application from {}", args.dist.display()))?;
    let request = args.request(&config.app.origin);

    let result = render(
        &app,
        &args.path,
        &request,
        config.visit_timeout(),
        config.session_options(),
    )
    .await
    .with_context(|| format!("failed to render {}", args.path))?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        let page = splice(app.index(), &result);
        println!("{}", String::from_utf8_lossy(&page));
    }
    Ok(())
}

fn parse_cookie(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(name, value)| (name.trim().to_string(), value.to_string()))
        .filter(|(name, _)| !name.is_empty())
        .ok_or_else(|| format!("expected NAME=VALUE, got '{raw}'"))
}

fn parse_header(raw: &str) -> Result<(String, String), String> {
    raw.split_once(':')
        .map(|(name, value)| (name.trim().to_string(), value.trim().to_string()))
        .filter(|(name, _)| !name.is_empty())
        .ok_or_else(|| format!("expected NAME:VALUE, got '{raw}'"))
}
