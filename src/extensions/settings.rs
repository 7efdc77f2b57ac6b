//! Extension settings.
//!
//! Extensions declare their settings with a [`SettingDescriptor`] during
//! `load()`, then read and write the current values by key. The host keeps
//! the values in a [`SettingsStore`]; the default store writes one JSON file
//! per extension package.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::error::{ExtensionError, ExtensionResult};

/// How a setting is presented to the user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettingType {
    #[default]
    Input,
    Radio,
    Toggle,
}

/// A setting as registered by an extension.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingDescriptor {
    pub key: String,

    pub title: String,

    #[serde(rename = "type", default)]
    pub setting_type: SettingType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Choices for radio settings (JSON or comma separated).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<String>,
}

impl SettingDescriptor {
    pub fn new(key: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn setting_type(mut self, setting_type: SettingType) -> Self {
        self.setting_type = setting_type;
        self
    }

    pub fn default_value(mut self, value: impl Into<String>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn options(mut self, options: impl Into<String>) -> Self {
        self.options = Some(options.into());
        self
    }

    /// Check the fields a store needs.
    pub fn validate(&self) -> ExtensionResult<()> {
        if self.key.trim().is_empty() {
            return Err(ExtensionError::InvalidSetting(
                "setting key cannot be empty".to_string(),
            ));
        }
        if self.title.trim().is_empty() {
            return Err(ExtensionError::InvalidSetting(format!(
                "setting '{}' requires a title",
                self.key
            )));
        }
        Ok(())
    }
}

/// A registered setting together with its current value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredSetting {
    #[serde(flatten)]
    pub descriptor: SettingDescriptor,
}

impl StoredSetting {
    fn from_descriptor(mut descriptor: SettingDescriptor) -> Self {
        if descriptor.value.is_none() {
            descriptor.value = descriptor.default_value.clone();
        }
        Self { descriptor }
    }

    pub fn value(&self) -> Option<&str> {
        self.descriptor.value.as_deref()
    }
}

/// Host-side key-value store for extension settings.
pub trait SettingsStore: Send + Sync {
    /// Current value of a setting, `None` when unregistered or unset.
    fn get(&self, extension: &str, key: &str) -> ExtensionResult<Option<String>>;

    /// Register a setting. Registering an existing key leaves it untouched.
    fn register(&self, extension: &str, descriptor: SettingDescriptor) -> ExtensionResult<()>;

    /// Update the value of a registered setting.
    fn set(&self, extension: &str, key: &str, value: &str) -> ExtensionResult<()>;

    /// All settings registered by an extension.
    fn list(&self, extension: &str) -> ExtensionResult<Vec<StoredSetting>>;
}

/// Settings store backed by one JSON file per extension.
pub struct FileSettingsStore {
    /// Directory holding `<package>.json` files.
    settings_dir: PathBuf,
    /// Loaded settings by package.
    cache: Mutex<HashMap<String, BTreeMap<String, StoredSetting>>>,
}

impl FileSettingsStore {
    pub fn new(settings_dir: PathBuf) -> Self {
        Self {
            settings_dir,
            cache: Mutex::new(HashMap::new()),
        }
    }

    fn path_for(&self, extension: &str) -> PathBuf {
        self.settings_dir.join(format!("{extension}.json"))
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, BTreeMap<String, StoredSetting>>> {
        self.cache.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Run `f` against the settings of `extension`, loading them on first use.
    fn with_settings<T>(
        &self,
        extension: &str,
        f: impl FnOnce(&mut BTreeMap<String, StoredSetting>) -> ExtensionResult<T>,
    ) -> ExtensionResult<T> {
        let mut cache = self.lock();
        if !cache.contains_key(extension) {
            let loaded = self.read_file(extension)?;
            cache.insert(extension.to_string(), loaded);
        }
        let settings = cache.entry(extension.to_string()).or_default();
        f(settings)
    }

    fn read_file(&self, extension: &str) -> ExtensionResult<BTreeMap<String, StoredSetting>> {
        let path = self.path_for(extension);
        if !path.exists() {
            return Ok(BTreeMap::new());
        }
        let contents = fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    fn write_file(
        &self,
        extension: &str,
        settings: &BTreeMap<String, StoredSetting>,
    ) -> ExtensionResult<()> {
        fs::create_dir_all(&self.settings_dir).map_err(|e| ExtensionError::Storage {
            extension: extension.to_string(),
            message: format!("failed to create settings directory: {e}"),
        })?;

        let contents = serde_json::to_string_pretty(settings)?;
        fs::write(self.path_for(extension), contents).map_err(|e| ExtensionError::Storage {
            extension: extension.to_string(),
            message: format!("failed to write settings: {e}"),
        })
    }
}

impl SettingsStore for FileSettingsStore {
    fn get(&self, extension: &str, key: &str) -> ExtensionResult<Option<String>> {
        self.with_settings(extension, |settings| {
            Ok(settings.get(key).and_then(|s| s.descriptor.value.clone()))
        })
    }

    fn register(&self, extension: &str, descriptor: SettingDescriptor) -> ExtensionResult<()> {
        descriptor.validate()?;
        self.with_settings(extension, |settings| {
            if settings.contains_key(&descriptor.key) {
                return Ok(());
            }
            debug!(extension, key = %descriptor.key, "registering setting");
            settings.insert(
                descriptor.key.clone(),
                StoredSetting::from_descriptor(descriptor),
            );
            self.write_file(extension, settings)
        })
    }

    fn set(&self, extension: &str, key: &str, value: &str) -> ExtensionResult<()> {
        self.with_settings(extension, |settings| {
            let stored = settings
                .get_mut(key)
                .ok_or_else(|| ExtensionError::SettingNotFound {
                    extension: extension.to_string(),
                    key: key.to_string(),
                })?;
            stored.descriptor.value = Some(value.to_string());
            self.write_file(extension, settings)
        })
    }

    fn list(&self, extension: &str) -> ExtensionResult<Vec<StoredSetting>> {
        self.with_settings(extension, |settings| Ok(settings.values().cloned().collect()))
    }
}
