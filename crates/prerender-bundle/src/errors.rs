use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BundleError {
    #[error("missing index.html")]
    MissingIndex,
    #[error("index.html is not valid utf-8")]
    IndexEncoding,
    #[error("config meta tag start not found")]
    ConfigTagStart,
    #[error("config meta tag end not found")]
    ConfigTagEnd,
    #[error("config meta tag content is not valid utf-8 once unescaped")]
    ConfigEscape,
    #[error("config is not a json object")]
    ConfigNotObject,
    #[error("config json error: {0}")]
    ConfigJson(#[from] serde_json::Error),
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to walk bundle directory: {0}")]
    Walk(#[from] walkdir::Error),
}

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("manifest file {0} not found in bundle")]
    Missing(&'static str),
    #[error("manifest is not valid json: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("manifest lists {0} which is not in the bundle")]
    UnknownFile(String),
}
