use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::app::App;
use crate::errors::ManifestError;

pub const MANIFEST_FILE: &str = "package.json";

/// Build metadata describing how the application boots outside a browser
/// tab of its own: which scripts to evaluate, in which order.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub app_name: String,
    pub config: Value,
    pub vendor_files: Vec<String>,
    pub app_files: Vec<String>,
    pub html_file: Option<String>,
}

#[derive(Deserialize)]
struct PackageJson {
    fastboot: FastbootSection,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FastbootSection {
    #[serde(default)]
    app_name: String,
    #[serde(default)]
    config: Value,
    #[serde(default)]
    manifest: FileLists,
}

#[derive(Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileLists {
    #[serde(default)]
    app_files: Vec<String>,
    #[serde(default)]
    vendor_files: Vec<String>,
    #[serde(default)]
    html_file: Option<String>,
}

impl Manifest {
    pub fn parse(raw: &[u8]) -> Result<Self, ManifestError> {
        let package: PackageJson = serde_json::from_slice(raw)?;
        let section = package.fastboot;
        Ok(Self {
            app_name: section.app_name,
            config: section.config,
            vendor_files: section.manifest.vendor_files,
            app_files: section.manifest.app_files,
            html_file: section.manifest.html_file,
        })
    }

    /// Read and parse `package.json` from the bundle.
    pub fn from_app(app: &App) -> Result<Self, ManifestError> {
        let raw = app
            .file(MANIFEST_FILE)
            .ok_or(ManifestError::Missing(MANIFEST_FILE))?;
        Self::parse(raw)
    }

    /// Vendor files first, then application files, each in listed order.
    pub fn scripts(&self) -> impl Iterator<Item = &str> {
        self.vendor_files
            .iter()
            .chain(self.app_files.iter())
            .map(String::as_str)
    }

    /// Fail on the first listed script the bundle does not contain.
    pub fn validate(&self, app: &App) -> Result<(), ManifestError> {
        match self.scripts().find(|path| app.file(path).is_none()) {
            Some(missing) => Err(ManifestError::UnknownFile(missing.to_string())),
            None => Ok(()),
        }
    }
}
