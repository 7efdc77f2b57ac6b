//! Host-side context of one loaded extension.
//!
//! `MiruContext` holds the host services a bridge endpoint answers calls
//! with. Services are trait objects so embedders can substitute their own
//! network stack, persistence or UI.

use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;
use tracing::info;

use crate::extensions::cookies::CookieStore;
use crate::extensions::http::Transport;
use crate::extensions::settings::SettingsStore;
use crate::extensions::storage::ExtensionStorage;

/// User-facing output of the host.
pub trait HostUi: Send + Sync {
    /// Show a transient message on behalf of an extension.
    fn snackbar(&self, extension: &str, message: &str);

    /// Record a log line written by an extension.
    fn log(&self, extension: &str, message: &str);
}

/// [`HostUi`] that only emits tracing events.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingUi;

impl HostUi for TracingUi {
    fn snackbar(&self, extension: &str, message: &str) {
        info!(extension, "snackbar: {message}");
    }

    fn log(&self, extension: &str, message: &str) {
        info!(extension, "{message}");
    }
}

/// Data format conversion offered to extensions.
pub trait Converter: Send + Sync {
    fn convert(&self, data: Value, from: &str, to: &str) -> Result<Value, String>;
}

/// [`Converter`] that only accepts conversions to the same format.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityConverter;

impl Converter for IdentityConverter {
    fn convert(&self, data: Value, from: &str, to: &str) -> Result<Value, String> {
        if from.eq_ignore_ascii_case(to) {
            Ok(data)
        } else {
            Err(format!("no converter from '{from}' to '{to}'"))
        }
    }
}

/// Context provided to the host endpoint of one extension.
pub struct MiruContext {
    /// Extension identifier (its package).
    pub extension_id: String,

    /// Network primitive behind `request` and `rawRequest`.
    pub transport: Arc<dyn Transport>,

    /// Settings shared by every extension, keyed by package.
    pub settings: Arc<dyn SettingsStore>,

    /// Cookie jar shared with the transport.
    pub cookies: Arc<dyn CookieStore>,

    /// Extension-specific storage behind `saveData` / `getData`.
    storage: Mutex<ExtensionStorage>,

    pub ui: Arc<dyn HostUi>,

    pub converter: Arc<dyn Converter>,
}

impl MiruContext {
    /// Create a context with tracing output and identity conversion.
    pub fn new(
        extension_id: impl Into<String>,
        transport: Arc<dyn Transport>,
        settings: Arc<dyn SettingsStore>,
        cookies: Arc<dyn CookieStore>,
        storage: ExtensionStorage,
    ) -> Self {
        Self {
            extension_id: extension_id.into(),
            transport,
            settings,
            cookies,
            storage: Mutex::new(storage),
            ui: Arc::new(TracingUi),
            converter: Arc::new(IdentityConverter),
        }
    }

    pub fn with_ui(mut self, ui: Arc<dyn HostUi>) -> Self {
        self.ui = ui;
        self
    }

    pub fn with_converter(mut self, converter: Arc<dyn Converter>) -> Self {
        self.converter = converter;
        self
    }

    /// Lock the extension's storage.
    pub fn storage(&self) -> MutexGuard<'_, ExtensionStorage> {
        self.storage.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl std::fmt::Debug for MiruContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MiruContext")
            .field("extension_id", &self.extension_id)
            .finish_non_exhaustive()
    }
}
