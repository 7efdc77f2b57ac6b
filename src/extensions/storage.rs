//! Extension data storage.
//!
//! Backs `saveData` / `getData`: each extension gets its own key-value
//! namespace persisted as a JSON file in its data directory.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use serde_json::Value;
use tracing::warn;

use super::error::{ExtensionError, ExtensionResult};

/// Extension-specific key-value storage.
///
/// Values are cached in memory and written through to disk on every change.
pub struct ExtensionStorage {
    /// Extension identifier (for error messages).
    extension_id: String,
    /// Path to the storage file.
    storage_path: PathBuf,
    /// In-memory copy of stored values.
    cache: BTreeMap<String, Value>,
    /// Whether the cache has unwritten changes.
    dirty: bool,
}

impl ExtensionStorage {
    /// Open the storage of an extension, loading `data.json` if present.
    pub fn new(extension_id: &str, storage_dir: PathBuf) -> Self {
        let storage_path = storage_dir.join("data.json");

        let cache = if storage_path.exists() {
            match fs::read_to_string(&storage_path)
                .map_err(ExtensionError::from)
                .and_then(|contents| {
                    Ok(serde_json::from_str::<BTreeMap<String, Value>>(&contents)?)
                })
            {
                Ok(cache) => cache,
                Err(e) => {
                    warn!(
                        extension = extension_id,
                        path = %storage_path.display(),
                        "ignoring unreadable storage file: {e}"
                    );
                    BTreeMap::new()
                }
            }
        } else {
            BTreeMap::new()
        };

        Self {
            extension_id: extension_id.to_string(),
            storage_path,
            cache,
            dirty: false,
        }
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.cache.get(key).cloned()
    }

    /// Store a value and write it to disk.
    pub fn set(&mut self, key: &str, value: Value) -> ExtensionResult<()> {
        self.cache.insert(key.to_string(), value);
        self.dirty = true;
        self.flush()
    }

    /// Write pending changes to disk.
    pub fn flush(&mut self) -> ExtensionResult<()> {
        if !self.dirty {
            return Ok(());
        }

        if let Some(parent) = self.storage_path.parent() {
            fs::create_dir_all(parent).map_err(|e| ExtensionError::Storage {
                extension: self.extension_id.clone(),
                message: format!("failed to create storage directory: {e}"),
            })?;
        }

        let contents = serde_json::to_string_pretty(&self.cache)?;
        fs::write(&self.storage_path, contents).map_err(|e| ExtensionError::Storage {
            extension: self.extension_id.clone(),
            message: format!("failed to write storage: {e}"),
        })?;

        self.dirty = false;
        Ok(())
    }
}

impl Drop for ExtensionStorage {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            warn!(extension = %self.extension_id, "storage flush on drop failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_storage_basic_operations() {
        let temp_dir = TempDir::new().unwrap();
        let mut storage = ExtensionStorage::new("test-ext", temp_dir.path().to_path_buf());

        storage.set("history", json!({"last": [1, 2, 3]})).unwrap();
        assert_eq!(storage.get("history"), Some(json!({"last": [1, 2, 3]})));
        assert_eq!(storage.get("nonexistent"), None);

        storage.set("history", json!(null)).unwrap();
        assert_eq!(storage.get("history"), Some(json!(null)));
    }

    #[test]
    fn test_storage_persistence() {
        let temp_dir = TempDir::new().unwrap();
        let storage_dir = temp_dir.path().join("pkg");

        {
            let mut storage = ExtensionStorage::new("test-ext", storage_dir.clone());
            storage.set("b", json!(2)).unwrap();
            storage.set("a", json!(1)).unwrap();
        }

        let storage = ExtensionStorage::new("test-ext", storage_dir);
        assert_eq!(storage.get("a"), Some(json!(1)));
        assert_eq!(storage.get("b"), Some(json!(2)));
    }

    #[test]
    fn test_corrupt_file_starts_empty() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("data.json"), "{not json").unwrap();

        let mut storage = ExtensionStorage::new("test-ext", temp_dir.path().to_path_buf());
        assert_eq!(storage.get("anything"), None);

        storage.set("anything", json!(1)).unwrap();
        let reloaded = ExtensionStorage::new("test-ext", temp_dir.path().to_path_buf());
        assert_eq!(reloaded.get("anything"), Some(json!(1)));
    }
}
