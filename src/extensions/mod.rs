//! Extension runtime for Miru.
//!
//! This module provides everything an extension script talks to: the
//! channel-RPC bridge to the host, the HTTP facade, document queries for both
//! protocol generations and the host-backed settings, cookies and data.
//!
//! # Architecture
//!
//! ```text
//! ExtensionHost
//! ├── manifests: HashMap<ExtensionId, ExtensionManifest>
//! └── extensions: HashMap<ExtensionId, LoadedExtension>
//!     ├── Box<dyn Extension> ── Miru ── Bridge ──┐
//!     │                                          │ BridgeMessage / HostReply
//!     └── HostEndpoint ── MiruContext ◄──────────┘
//!         ├── Transport (reqwest)
//!         ├── SettingsStore / CookieStore
//!         └── ExtensionStorage, HostUi, Converter
//! ```
//!
//! Each extension gets its own bridge, keyed by its package, and its own
//! endpoint task answering calls in order. Remote-generation document queries
//! are answered by [`document::evaluate`] on the host side; local-generation
//! queries never leave the extension.

pub mod catalog;
pub mod cookies;
pub mod document;
mod error;
mod host;
pub mod http;
pub mod ipc;
mod manifest;
mod miru;
pub mod settings;
pub mod storage;

pub use catalog::{Capabilities, CatalogOperation, Extension, Watch, WatchType};
pub use document::{DocumentQuery, ProtocolGeneration, QueryNode, XPathNode};
pub use error::{ExtensionError, ExtensionResult};
pub use host::{ExtensionHost, ExtensionHostConfig};
pub use http::{ResponseBody, Transport, DEFAULT_USER_AGENT, OVERRIDE_HOST_HEADER};
pub use ipc::{Bridge, BridgeError, MiruContext, RequestOptions};
pub use manifest::ExtensionManifest;
pub use miru::Miru;
pub use settings::{SettingDescriptor, SettingType};
pub use storage::ExtensionStorage;

/// Unique identifier for an extension (its package).
pub type ExtensionId = String;
