//! Chromium DevTools Protocol plumbing for the prerender session.
//!
//! The crate exposes a raw-JSON [`CdpTransport`] so higher layers can speak
//! any protocol domain without typed wrappers, plus browser discovery helpers.

pub mod config;
pub mod error;
pub mod metrics;
pub mod transport;
pub mod util;

pub use config::CdpConfig;
pub use error::{AdapterError, AdapterErrorKind};
pub use metrics::{register_metrics, TransportMetricsSnapshot};
pub use transport::{ChromiumTransport, CdpTransport, CommandTarget, TransportEvent};

use std::{env, path::PathBuf};
use which::which;

fn detect_chrome_executable() -> Option<PathBuf> {
    if let Ok(raw) = env::var("PRERENDER_CHROME") {
        let trimmed = raw.trim();
        if !trimmed.is_empty() {
            let candidate = PathBuf::from(trimmed);
            if candidate.exists() {
                return Some(candidate);
            }
        }
    }

    for name in chrome_executable_names() {
        if let Ok(path) = which(name) {
            return Some(path);
        }
    }

    let skip_defaults = env::var("PRERENDER_SKIP_OS_PATHS")
        .map(|value| !value.trim().is_empty())
        .unwrap_or(false);

    if !skip_defaults {
        for candidate in os_specific_chrome_paths() {
            if candidate.exists() {
                return Some(candidate);
            }
        }
    }

    None
}

fn chrome_executable_names() -> &'static [&'static str] {
    #[cfg(target_os = "windows")]
    {
        &["chrome.exe", "chromium.exe", "msedge.exe"]
    }

    #[cfg(any(target_os = "macos", target_os = "linux", target_os = "freebsd"))]
    {
        &[
            "google-chrome-stable",
            "google-chrome",
            "chromium",
            "chromium-browser",
        ]
    }

    #[cfg(not(any(
        target_os = "windows",
        target_os = "macos",
        target_os = "linux",
        target_os = "freebsd"
    )))]
    {
        &["chrome"]
    }
}

fn os_specific_chrome_paths() -> Vec<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        let mut paths = Vec::new();
        for key in ["PROGRAMFILES", "PROGRAMFILES(X86)", "LOCALAPPDATA"] {
            if let Ok(value) = env::var(key) {
                let root = PathBuf::from(value.trim());
                paths.push(root.join("Google/Chrome/Application/chrome.exe"));
                paths.push(root.join("Chromium/Application/chrome.exe"));
            }
        }
        paths
    }

    #[cfg(target_os = "macos")]
    {
        vec![
            PathBuf::from("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome"),
            PathBuf::from("/Applications/Chromium.app/Contents/MacOS/Chromium"),
        ]
    }

    #[cfg(any(target_os = "linux", target_os = "freebsd"))]
    {
        vec![
            PathBuf::from("/usr/bin/google-chrome-stable"),
            PathBuf::from("/usr/bin/google-chrome"),
            PathBuf::from("/usr/bin/chromium-browser"),
            PathBuf::from("/usr/bin/chromium"),
        ]
    }

    #[cfg(not(any(
        target_os = "windows",
        target_os = "macos",
        target_os = "linux",
        target_os = "freebsd"
    )))]
    {
        Vec::new()
    }
}

/// Resolve the executable a config will launch, falling back to discovery.
pub fn resolve_chrome_path(cfg: &CdpConfig) -> Option<PathBuf> {
    if !cfg.executable.as_os_str().is_empty() && cfg.executable.exists() {
        return Some(cfg.executable.clone());
    }
    detect_chrome_executable()
}

/// True when `PRERENDER_USE_REAL_CHROME` asks tests to drive an actual browser.
pub fn real_chrome_requested() -> bool {
    matches!(
        env::var("PRERENDER_USE_REAL_CHROME")
            .unwrap_or_default()
            .to_ascii_lowercase()
            .as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::{chrome_executable_names, detect_chrome_executable, resolve_chrome_path};
    use crate::CdpConfig;
    use serial_test::serial;
    use std::{env, fs};
    use tempfile::tempdir;

    #[test]
    #[serial]
    fn detects_from_env_var() {
        let dir = tempdir().unwrap();
        let exe_path = dir.path().join("my-chrome");
        fs::write(&exe_path, b"").unwrap();
        let original = env::var("PRERENDER_CHROME").ok();
        env::set_var("PRERENDER_CHROME", exe_path.to_string_lossy().to_string());
        let detected = detect_chrome_executable();
        if let Some(value) = original {
            env::set_var("PRERENDER_CHROME", value);
        } else {
            env::remove_var("PRERENDER_CHROME");
        }
        assert_eq!(detected, Some(exe_path));
    }

    #[test]
    #[serial]
    fn detects_from_path_entries() {
        let dir = tempdir().unwrap();
        let name = chrome_executable_names()
            .first()
            .expect("chrome executable names must not be empty");
        let exe_path = dir.path().join(name);
        fs::write(&exe_path, b"").unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = fs::Permissions::from_mode(0o755);
            fs::set_permissions(&exe_path, perms).unwrap();
        }
        let original_path = env::var("PATH").ok();
        let original_env = env::var("PRERENDER_CHROME").ok();
        let skip_flag = env::var("PRERENDER_SKIP_OS_PATHS").ok();
        env::set_var("PRERENDER_CHROME", "");
        env::set_var("PRERENDER_SKIP_OS_PATHS", "1");
        env::set_var("PATH", dir.path());
        let detected = detect_chrome_executable();
        if let Some(value) = original_path {
            env::set_var("PATH", value);
        }
        if let Some(value) = original_env {
            env::set_var("PRERENDER_CHROME", value);
        } else {
            env::remove_var("PRERENDER_CHROME");
        }
        if let Some(value) = skip_flag {
            env::set_var("PRERENDER_SKIP_OS_PATHS", value);
        } else {
            env::remove_var("PRERENDER_SKIP_OS_PATHS");
        }
        assert_eq!(detected, Some(exe_path));
    }

    #[test]
    #[serial]
    fn explicit_executable_wins_when_present() {
        let dir = tempdir().unwrap();
        let exe_path = dir.path().join("pinned-chrome");
        fs::write(&exe_path, b"").unwrap();
        let cfg = CdpConfig {
            executable: exe_path.clone(),
            ..CdpConfig::default()
        };
        assert_eq!(resolve_chrome_path(&cfg), Some(exe_path));
    }
}
