//! Extension manifest parsing.
//!
//! An extension script describes itself in comment lines of the form
//! `@key value` at the top of the file:
//!
//! ```text
//! // @name        Example
//! // @version     v0.0.1
//! // @package     com.example.site
//! // @webSite     https://site.example
//! // @type        bangumi
//! // @api         2
//! // @tags        anime,sub
//! ```
//!
//! The script must be saved as `<package>.js`.

use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::catalog::WatchType;
use super::document::ProtocolGeneration;
use super::error::{ExtensionError, ExtensionResult};

static METADATA_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(?://+|/?\*+)\s*@(\w+)\s+(.*)$").expect("metadata pattern is valid")
});

/// Extension metadata parsed from a script header.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionManifest {
    /// Human-readable display name.
    pub name: String,

    #[serde(default)]
    pub version: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,

    /// Content language, e.g. `zh` or `en`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lang: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,

    /// Unique identifier; also the script's file stem.
    pub package: String,

    /// Base URL host-relative requests are resolved against.
    #[serde(rename = "webSite")]
    pub website: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default)]
    pub tags: Vec<String>,

    /// Bridge protocol version; `1` selects the remote generation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api: Option<String>,

    /// Raw `@type` value, see [`ExtensionManifest::watch_type`].
    #[serde(rename = "type", default)]
    pub watch_type: String,
}

impl ExtensionManifest {
    /// Read the `@key value` lines of `source`. Unknown keys are ignored and
    /// later lines win.
    pub fn parse(source: &str) -> Self {
        let mut manifest = Self::default();

        for line in source.lines() {
            let Some(captures) = METADATA_LINE.captures(line) else {
                continue;
            };
            let value = captures[2].trim().to_string();
            match &captures[1] {
                "name" => manifest.name = value,
                "version" => manifest.version = value,
                "author" => manifest.author = Some(value),
                "license" => manifest.license = Some(value),
                "lang" => manifest.lang = Some(value),
                "icon" => manifest.icon = Some(value),
                "package" => manifest.package = value,
                "webSite" => manifest.website = value,
                "description" => manifest.description = Some(value),
                "api" => manifest.api = Some(value),
                "type" => manifest.watch_type = value,
                "tags" => {
                    manifest.tags = value
                        .split(',')
                        .map(str::trim)
                        .filter(|t| !t.is_empty())
                        .map(str::to_string)
                        .collect();
                }
                _ => {}
            }
        }

        manifest
    }

    /// Load and validate the manifest of the script at `path`.
    pub fn load(path: &Path) -> ExtensionResult<Self> {
        let source = std::fs::read_to_string(path)?;
        let manifest = Self::parse(&source);

        let invalid = |message: String| ExtensionError::ManifestInvalid {
            path: path.to_path_buf(),
            message,
        };

        manifest.validate().map_err(|e| invalid(e.to_string()))?;

        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default();
        let expected = format!("{}.js", manifest.package);
        if file_name != expected {
            return Err(invalid(format!(
                "package name does not match the file name: expected '{expected}', found '{file_name}'"
            )));
        }

        Ok(manifest)
    }

    /// Validate the manifest for required fields and constraints.
    pub fn validate(&self) -> ExtensionResult<()> {
        let missing = |field: &str| ExtensionError::ManifestInvalid {
            path: format!("{}.js", self.package).into(),
            message: format!("@{field} is required"),
        };

        if self.package.is_empty() {
            return Err(missing("package"));
        }
        if self.name.is_empty() {
            return Err(missing("name"));
        }
        if self.website.is_empty() {
            return Err(missing("webSite"));
        }

        self.watch_type()?;
        Ok(())
    }

    /// Which document generation this extension was written against.
    pub fn generation(&self) -> ProtocolGeneration {
        match self.api.as_deref().map(str::trim) {
            Some("1") => ProtocolGeneration::Remote,
            _ => ProtocolGeneration::Local,
        }
    }

    pub fn watch_type(&self) -> ExtensionResult<WatchType> {
        self.watch_type.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SCRIPT: &str = r#"// @name        Example Site
// @version     v0.0.2
// @author      someone
// @lang        en
// @license     MIT
// @package     com.example.site
// @type        manga
// @webSite     https://site.example
// @tags        manga, english ,
// @description Reads things
// @api         2

export default class extends Extension {
  async latest(page) {
    const mail = "contact@example.com is not metadata";
    return [];
  }
}
"#;

    #[test]
    fn test_parse_header() {
        let manifest = ExtensionManifest::parse(SCRIPT);
        assert_eq!(manifest.name, "Example Site");
        assert_eq!(manifest.version, "v0.0.2");
        assert_eq!(manifest.package, "com.example.site");
        assert_eq!(manifest.website, "https://site.example");
        assert_eq!(manifest.tags, vec!["manga", "english"]);
        assert_eq!(manifest.lang.as_deref(), Some("en"));
        assert_eq!(manifest.watch_type().unwrap(), WatchType::Manga);
        assert_eq!(manifest.generation(), ProtocolGeneration::Local);
        assert!(manifest.validate().is_ok());
    }

    #[test]
    fn test_generation_from_api() {
        let mut manifest = ExtensionManifest::parse(SCRIPT);
        manifest.api = Some("1".to_string());
        assert_eq!(manifest.generation(), ProtocolGeneration::Remote);
        manifest.api = None;
        assert_eq!(manifest.generation(), ProtocolGeneration::Local);
    }

    #[test]
    fn test_validate_manifest() {
        let mut manifest = ExtensionManifest::parse(SCRIPT);

        manifest.website.clear();
        assert!(manifest.validate().is_err());
        manifest.website = "https://site.example".to_string();

        manifest.watch_type = "video".to_string();
        assert!(matches!(
            manifest.validate(),
            Err(ExtensionError::InvalidWatchType(_))
        ));
    }

    #[test]
    fn test_load_checks_file_name() {
        let temp_dir = TempDir::new().unwrap();

        let good = temp_dir.path().join("com.example.site.js");
        std::fs::write(&good, SCRIPT).unwrap();
        assert_eq!(
            ExtensionManifest::load(&good).unwrap().package,
            "com.example.site"
        );

        let bad = temp_dir.path().join("renamed.js");
        std::fs::write(&bad, SCRIPT).unwrap();
        assert!(matches!(
            ExtensionManifest::load(&bad),
            Err(ExtensionError::ManifestInvalid { .. })
        ));
    }

    #[test]
    fn test_manifest_json_names() {
        let manifest = ExtensionManifest::parse(SCRIPT);
        let value = serde_json::to_value(&manifest).unwrap();
        assert_eq!(value["webSite"], "https://site.example");
        assert_eq!(value["type"], "manga");
        assert_eq!(value["api"], "2");
    }
}
