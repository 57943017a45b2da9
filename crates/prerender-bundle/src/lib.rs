//! Content provider for prerendering: a built single-page application held in
//! memory, its embedded runtime configuration, and the build manifest that
//! lists which scripts boot it.

pub mod app;
pub mod errors;
pub mod files;
pub mod manifest;

pub use app::{App, INDEX_FILE};
pub use errors::{BundleError, ManifestError};
pub use files::files_from_dir;
pub use manifest::{Manifest, MANIFEST_FILE};
