use std::collections::HashMap;
use std::path::Path;

use tracing::debug;
use walkdir::WalkDir;

use crate::errors::BundleError;

/// Read every regular file below `dir` into a map keyed by its `/`-separated
/// path relative to `dir`.
pub fn files_from_dir(dir: impl AsRef<Path>) -> Result<HashMap<String, Vec<u8>>, BundleError> {
    let root = dir.as_ref();
    let mut files = HashMap::new();

    for entry in WalkDir::new(root).follow_links(true) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
        let key = relative
            .components()
            .map(|part| part.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        let content = std::fs::read(entry.path()).map_err(|source| BundleError::Io {
            path: entry.path().to_path_buf(),
            source,
        })?;
        files.insert(key, content);
    }

    debug!(
        target: "prerender-bundle",
        dir = %root.display(),
        count = files.len(),
        "loaded bundle directory"
    );
    Ok(files)
}
