//! File-backed settings for the `prerender` binary.
//!
//! Every field has a default, so an empty or partial YAML document is valid.
//! Command line flags are applied on top by the individual commands.

use std::path::PathBuf;
use std::time::Duration;

use cdp_adapter::CdpConfig;
use prerender_session::SessionOptions;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub app: AppConfig,
    pub browser: BrowserConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub addr: String,
    /// Seconds a rendered page stays cached; 0 disables the cache.
    pub cache_ttl_secs: u64,
    pub visit_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:8000".to_string(),
            cache_ttl_secs: 0,
            visit_timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    /// Module prefix used in the config meta tag of `index.html`.
    pub name: String,
    pub dist_dir: Option<PathBuf>,
    pub origin: String,
    pub fastboot: bool,
    pub isolated: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: "example".to_string(),
            dist_dir: None,
            origin: "http://localhost:8000".to_string(),
            fastboot: false,
            isolated: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BrowserConfig {
    pub headed: bool,
    pub chrome: Option<PathBuf>,
    pub websocket_url: Option<String>,
    pub no_sandbox: bool,
    pub boot_timeout_ms: u64,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headed: false,
            chrome: None,
            websocket_url: None,
            no_sandbox: false,
            boot_timeout_ms: 30_000,
        }
    }
}

impl Config {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.server.cache_ttl_secs)
    }

    pub fn visit_timeout(&self) -> Duration {
        Duration::from_millis(self.server.visit_timeout_ms)
    }

    /// Session options for booting the configured app.
    pub fn session_options(&self) -> SessionOptions {
        let mut cdp = CdpConfig::default();
        if let Some(chrome) = &self.browser.chrome {
            cdp.executable = chrome.clone();
        }
        if self.browser.websocket_url.is_some() {
            cdp.websocket_url = self.browser.websocket_url.clone();
        }
        cdp.no_sandbox |= self.browser.no_sandbox;

        SessionOptions {
            origin: self.app.origin.clone(),
            headed: self.browser.headed,
            boot_timeout_ms: self.browser.boot_timeout_ms,
            cdp,
        }
    }
}
