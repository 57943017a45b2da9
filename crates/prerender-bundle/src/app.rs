use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use percent_encoding::percent_decode_str;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::debug;
use url::form_urlencoded;

use crate::errors::BundleError;
use crate::files::files_from_dir;

pub const INDEX_FILE: &str = "index.html";

type FileMap = HashMap<String, Arc<[u8]>>;

/// A built single-page application held in memory.
///
/// Cloning is O(1): the loaded files, the overlay holding the re-embedded
/// index and the parsed config are shared and copied on first write, so a
/// per-request clone that sets one key never duplicates the asset set.
#[derive(Clone)]
pub struct App {
    name: Arc<str>,
    base: Arc<FileMap>,
    overlay: Arc<FileMap>,
    before: Arc<str>,
    after: Arc<str>,
    config: Arc<Map<String, Value>>,
}

impl App {
    /// Build an app from a path to contents map.
    ///
    /// `index.html` must be present and carry the
    /// `<meta name="{name}/config/environment" content="...">` tag whose
    /// form-encoded JSON object becomes [`App::config`].
    pub fn create<I, K, V>(name: &str, files: I) -> Result<Self, BundleError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Vec<u8>>,
    {
        let base: FileMap = files
            .into_iter()
            .map(|(path, content)| {
                let bytes: Vec<u8> = content.into();
                (path.into(), Arc::<[u8]>::from(bytes))
            })
            .collect();

        let index = base.get(INDEX_FILE).ok_or(BundleError::MissingIndex)?;
        let index = std::str::from_utf8(index).map_err(|_| BundleError::IndexEncoding)?;

        let tag_start = format!(r#"<meta name="{name}/config/environment" content=""#);
        let start = index.find(&tag_start).ok_or(BundleError::ConfigTagStart)?;
        let content_start = start + tag_start.len();
        let content_len = index[content_start..]
            .find('"')
            .ok_or(BundleError::ConfigTagEnd)?;
        let content_end = content_start + content_len;

        let config = decode_config(&index[content_start..content_end])?;
        let before: Arc<str> = Arc::from(&index[..content_start]);
        let after: Arc<str> = Arc::from(&index[content_end..]);

        debug!(
            target: "prerender-bundle",
            app = name,
            files = base.len(),
            "bundle created"
        );

        Ok(Self {
            name: Arc::from(name),
            base: Arc::new(base),
            overlay: Arc::new(HashMap::new()),
            before,
            after,
            config: Arc::new(config),
        })
    }

    /// Load every file below `dir` and build the app from them.
    pub fn from_dir(name: &str, dir: impl AsRef<Path>) -> Result<Self, BundleError> {
        Self::create(name, files_from_dir(dir)?)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Exact lookup of a stored file.
    pub fn file(&self, path: &str) -> Option<&[u8]> {
        self.overlay
            .get(path)
            .or_else(|| self.base.get(path))
            .map(|content| content.as_ref())
    }

    pub fn index(&self) -> &[u8] {
        self.file(INDEX_FILE).unwrap_or_default()
    }

    /// Stored file paths, in no particular order.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.overlay.keys().map(String::as_str).chain(
            self.base
                .keys()
                .filter(|path| !self.overlay.contains_key(*path))
                .map(String::as_str),
        )
    }

    /// Static lookup: the exact file for `path` (leading slash ignored) or
    /// the index document.
    pub fn resolve<'a>(&'a self, path: &'a str) -> (&'a str, &'a [u8]) {
        let trimmed = path.trim_start_matches('/');
        match self.file(trimmed) {
            Some(content) => (trimmed, content),
            None => (INDEX_FILE, self.index()),
        }
    }

    pub fn config(&self) -> &Map<String, Value> {
        &self.config
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.config.get(key)
    }

    /// Set a top level config key and re-embed the config into `index.html`.
    pub fn set(&mut self, key: &str, value: impl Serialize) -> Result<(), BundleError> {
        let value = serde_json::to_value(value)?;
        Arc::make_mut(&mut self.config).insert(key.to_string(), value);
        self.render_index()
    }

    fn render_index(&mut self) -> Result<(), BundleError> {
        let encoded = encode_config(&self.config)?;
        let mut index =
            String::with_capacity(self.before.len() + encoded.len() + self.after.len());
        index.push_str(&self.before);
        index.push_str(&encoded);
        index.push_str(&self.after);
        Arc::make_mut(&mut self.overlay)
            .insert(INDEX_FILE.to_string(), Arc::from(index.into_bytes()));
        Ok(())
    }
}

impl fmt::Debug for App {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("App")
            .field("name", &self.name)
            .field("files", &self.paths().count())
            .field("config_keys", &self.config.len())
            .finish()
    }
}

fn decode_config(content: &str) -> Result<Map<String, Value>, BundleError> {
    let spaced = content.replace('+', " ");
    let json = percent_decode_str(&spaced)
        .decode_utf8()
        .map_err(|_| BundleError::ConfigEscape)?;
    match serde_json::from_str::<Value>(&json)? {
        Value::Object(map) => Ok(map),
        _ => Err(BundleError::ConfigNotObject),
    }
}

fn encode_config(config: &Map<String, Value>) -> Result<String, BundleError> {
    let json = serde_json::to_string(&sorted(&Value::Object(config.clone())))?;
    Ok(form_urlencoded::byte_serialize(json.as_bytes()).collect())
}

// Keys are emitted in sorted order whatever map ordering serde_json was built with.
fn sorted(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            Value::Object(
                keys.into_iter()
                    .map(|key| (key.clone(), sorted(&map[key])))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(sorted).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    pub const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8"/>
<title>App</title>
<meta name="app/config/environment" content="%7B%22modulePrefix%22%3A%22app%22%2C%22environment%22%3A%22production%22%2C%22rootURL%22%3A%22%2F%22%2C%22APP%22%3A%7B%22name%22%3A%22app%22%2C%22version%22%3A%220.0.0%2Ba7250a80%22%7D%7D"/>
<link integrity="" rel="stylesheet" href="/assets/app.css"/>
</head>
<body>
<script src="/assets/vendor.js"></script>
<script src="/assets/app.js"></script>
</body>
</html>"#;
}

#[cfg(test)]
mod tests {
    use super::fixtures::INDEX_HTML;
    use super::*;
    use serde_json::json;

    fn app() -> App {
        App::create(
            "app",
            [("index.html", INDEX_HTML), ("script.js", r#"alert("Hello World!");"#)],
        )
        .expect("create app")
    }

    fn index_str(app: &App) -> String {
        String::from_utf8(app.index().to_vec()).unwrap()
    }

    #[test]
    fn parses_embedded_config() {
        let app = app();
        assert_eq!(app.name(), "app");
        assert_eq!(app.get("modulePrefix"), Some(&json!("app")));
        assert_eq!(app.get("APP"), Some(&json!({"name": "app", "version": "0.0.0+a7250a80"})));
        assert_eq!(app.get("foo"), None);
    }

    #[test]
    fn set_reembeds_sorted_config() {
        let mut app = app();
        app.set("apiBaseURI", "http://api.example.com").unwrap();

        let index = index_str(&app);
        assert!(index.contains(
            "content=\"%7B%22APP%22%3A%7B%22name%22%3A%22app%22%2C%22version%22%3A%220.0.0%2Ba7250a80%22%7D%2C%22apiBaseURI%22%3A%22http%3A%2F%2Fapi.example.com%22%2C"
        ));
        assert!(index.starts_with("<!DOCTYPE html>"));
        assert!(index.ends_with("</html>"));

        let reparsed = App::create("app", [("index.html", index)]).unwrap();
        assert_eq!(reparsed.config(), app.config());
    }

    #[test]
    fn set_twice_is_deterministic() {
        let mut first = app();
        let mut second = app();
        first.set("foo", json!({"bar": 2.5, "baz": "quz qux"})).unwrap();
        second.set("foo", json!({"baz": "quz qux", "bar": 2.5})).unwrap();
        assert_eq!(first.index(), second.index());
        assert!(index_str(&first).contains("%22baz%22%3A%22quz+qux%22"));
    }

    #[test]
    fn clone_shares_files_until_written() {
        let original = app();
        let mut cloned = original.clone();
        assert!(Arc::ptr_eq(&original.base, &cloned.base));

        cloned.set("path", "/hello").unwrap();

        assert!(Arc::ptr_eq(&original.base, &cloned.base));
        assert_eq!(original.get("path"), None);
        assert_eq!(original.index(), INDEX_HTML.as_bytes());
        assert_eq!(cloned.get("path"), Some(&json!("/hello")));
        assert!(index_str(&cloned).contains("%22path%22%3A%22%2Fhello%22"));
    }

    #[test]
    fn resolve_falls_back_to_index() {
        let app = app();
        assert_eq!(app.resolve("/script.js").0, "script.js");
        let (path, content) = app.resolve("/some/route");
        assert_eq!(path, INDEX_FILE);
        assert_eq!(content, INDEX_HTML.as_bytes());
    }

    #[test]
    fn rejects_broken_bundles() {
        let missing = App::create("app", [("app.js", "")]);
        assert!(matches!(missing, Err(BundleError::MissingIndex)));

        let wrong_name = App::create("other", [("index.html", INDEX_HTML)]);
        assert!(matches!(wrong_name, Err(BundleError::ConfigTagStart)));

        let unterminated = App::create(
            "app",
            [("index.html", r#"<meta name="app/config/environment" content="%7B"#)],
        );
        assert!(matches!(unterminated, Err(BundleError::ConfigTagEnd)));

        let bad_json = App::create(
            "app",
            [("index.html", r#"<meta name="app/config/environment" content="%7Bnope"/>"#)],
        );
        assert!(matches!(bad_json, Err(BundleError::ConfigJson(_))));

        let not_object = App::create(
            "app",
            [("index.html", r#"<meta name="app/config/environment" content="%5B%5D"/>"#)],
        );
        assert!(matches!(not_object, Err(BundleError::ConfigNotObject)));
    }
}
