use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Snapshot of the document after one visit.
///
/// The attribute maps are always present and empty when the element carries
/// no attributes.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RenderResult {
    pub head_content: String,
    pub body_content: String,
    pub html_attributes: BTreeMap<String, String>,
    pub head_attributes: BTreeMap<String, String>,
    pub body_attributes: BTreeMap<String, String>,
}

impl RenderResult {
    pub fn html_attributes_string(&self) -> String {
        attributes_string(&self.html_attributes)
    }

    pub fn head_attributes_string(&self) -> String {
        attributes_string(&self.head_attributes)
    }

    pub fn body_attributes_string(&self) -> String {
        attributes_string(&self.body_attributes)
    }

    /// A standalone document built from the captured parts.
    pub fn html(&self) -> String {
        format!(
            "<!DOCTYPE html>\n<html{}>\n<head{}>\n{}\n</head>\n<body{}>\n{}\n</body>\n</html>\n",
            self.html_attributes_string(),
            self.head_attributes_string(),
            self.head_content,
            self.body_attributes_string(),
            self.body_content,
        )
    }
}

/// ` name="value"` pairs in name order, with `&` and `"` escaped.
fn attributes_string(attrs: &BTreeMap<String, String>) -> String {
    attrs
        .iter()
        .map(|(name, value)| {
            let value = value.replace('&', "&amp;").replace('"', "&quot;");
            format!(r#" {name}="{value}""#)
        })
        .collect()
}
