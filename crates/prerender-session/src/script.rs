//! Expressions evaluated inside the page.

use serde_json::Value;

use crate::request::Request;

/// Installs `FastBootHeaders`, `$setup`, `$boot`, `$render` and `$capture`.
pub(crate) const RUNTIME: &str = include_str!("js/runtime.js");
pub(crate) const RUNTIME_URL: &str = "prerender://runtime.js";

pub(crate) const BOOT_EXPRESSION: &str = "window.$boot()";
pub(crate) const CAPTURE_EXPRESSION: &str = "window.$capture()";
pub(crate) const READY_STATE_EXPRESSION: &str =
    "({ state: document.readyState, href: location.href })";

/// Host implementations handed to the application's `FastBoot.require`,
/// keyed by module name. Each value is a page-side expression evaluated once
/// during setup; unknown modules fall through to the app's own loader.
pub const CAPABILITIES: &[(&str, &str)] = &[
    ("crypto", "window.crypto"),
    (
        "node-fetch",
        r#"{
            'default': window.fetch,
            FormData: window.FormData,
            Headers: window.Headers,
            Request: window.Request,
            Response: window.Response,
            FetchError: window.FetchError,
            AbortError: window.AbortError,
            isRedirect: window.isRedirect,
            Blob: window.Blob,
            File: window.File,
            fileFromSync: window.fileFromSync,
            fileFrom: window.fileFrom,
            blobFromSync: window.blobFromSync,
            blobFrom: window.blobFrom,
        }"#,
    ),
    (
        "abortcontroller-polyfill/dist/cjs-ponyfill",
        r#"{
            AbortController: window.AbortController,
            AbortSignal: window.AbortSignal,
            fetch: window.fetch,
        }"#,
    ),
];

pub(crate) fn setup_expression(name: &str, config: &Value) -> Result<String, serde_json::Error> {
    let mut capabilities = Vec::with_capacity(CAPABILITIES.len());
    for (module, expression) in CAPABILITIES {
        capabilities.push(format!("{}: {}", serde_json::to_string(module)?, expression));
    }
    Ok(format!(
        "window.$setup({}, {}, {{\n{}\n}})",
        serde_json::to_string(name)?,
        serde_json::to_string(config)?,
        capabilities.join(",\n")
    ))
}

pub(crate) fn render_expression(url: &str, request: &Request) -> Result<String, serde_json::Error> {
    Ok(format!(
        "window.$render({}, {})",
        serde_json::to_string(url)?,
        serde_json::to_string(request)?
    ))
}

/// Source URL attached to an evaluated bundle file so stack traces name it.
pub(crate) fn source_url(origin: &str, path: &str) -> String {
    format!(
        "{}/{}",
        origin.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}
