//! Error types for the extension runtime.

use std::path::PathBuf;
use thiserror::Error;

use super::catalog::CatalogOperation;
use super::ipc::BridgeError;

/// Errors that can occur in the extension runtime.
#[derive(Debug, Error)]
pub enum ExtensionError {
    #[error("Invalid manifest in {path}: {message}")]
    ManifestInvalid { path: PathBuf, message: String },

    #[error("Extension '{0}' not found")]
    ExtensionNotFound(String),

    #[error("Extension '{0}' is already loaded")]
    AlreadyLoaded(String),

    #[error("Failed to load extension '{extension}': {message}")]
    LoadFailed { extension: String, message: String },

    /// A catalog operation the extension does not provide.
    #[error("not implement {0}")]
    NotImplemented(CatalogOperation),

    #[error("Invalid watch type '{0}'")]
    InvalidWatchType(String),

    #[error("Bridge error: {0}")]
    Bridge(#[from] BridgeError),

    #[error("HTTP request failed: {0}")]
    Transport(String),

    #[error("Invalid setting: {0}")]
    InvalidSetting(String),

    #[error("Setting '{key}' is not registered for extension '{extension}'")]
    SettingNotFound { extension: String, key: String },

    #[error("Invalid cookie: {0}")]
    InvalidCookie(String),

    #[error("Invalid URL '{url}': {message}")]
    InvalidUrl { url: String, message: String },

    #[error("Storage error for extension '{extension}': {message}")]
    Storage { extension: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Result type for extension operations.
pub type ExtensionResult<T> = Result<T, ExtensionError>;
