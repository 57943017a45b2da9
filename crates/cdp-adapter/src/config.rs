use crate::detect_chrome_executable;
use serde::{Deserialize, Serialize};
use std::{env, path::PathBuf};

/// Configuration for launching (or attaching to) the browser behind a transport.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CdpConfig {
    pub executable: PathBuf,
    /// Profile directory; a throwaway directory is created per launch when unset.
    pub user_data_dir: Option<PathBuf>,
    pub headless: bool,
    pub disable_images: bool,
    pub no_sandbox: bool,
    pub default_deadline_ms: u64,
    pub launch_timeout_ms: u64,
    pub websocket_url: Option<String>,
    pub heartbeat_interval_ms: u64,
    pub extra_args: Vec<String>,
}

impl Default for CdpConfig {
    fn default() -> Self {
        Self {
            executable: default_chrome_path(),
            user_data_dir: None,
            headless: resolve_headless_default(),
            disable_images: true,
            no_sandbox: resolve_no_sandbox_default(),
            default_deadline_ms: 30_000,
            launch_timeout_ms: 20_000,
            websocket_url: None,
            heartbeat_interval_ms: 15_000,
            extra_args: Vec::new(),
        }
    }
}

impl CdpConfig {
    pub fn headed(mut self, headed: bool) -> Self {
        self.headless = !headed;
        self
    }
}

fn resolve_headless_default() -> bool {
    // "0", "false", "no", "off" mean headful
    match env::var("PRERENDER_HEADLESS") {
        Ok(value) => {
            let lower = value.to_ascii_lowercase();
            !matches!(lower.as_str(), "0" | "false" | "no" | "off")
        }
        Err(_) => true,
    }
}

fn resolve_no_sandbox_default() -> bool {
    env::var("PRERENDER_DISABLE_SANDBOX")
        .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false)
}

fn default_chrome_path() -> PathBuf {
    detect_chrome_executable().unwrap_or_default()
}
