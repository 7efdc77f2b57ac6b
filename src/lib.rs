//! Miru runtime - the host bridge behind Miru extension scripts.
//!
//! Extensions fetch pages, query the returned markup and keep settings and
//! data through a small facade ([`Miru`]). Every host capability is reached
//! over a channel-RPC bridge keyed by operation and extension, so several
//! extensions can share one host without their calls colliding.
//!
//! # Architecture
//!
//! - [`config`] - Runtime configuration loading and management
//! - [`extensions`] - Bridge, HTTP facade, document queries and the host
//!
//! # Example
//!
//! ```ignore
//! use miru_runtime::{ExtensionHost, ExtensionHostConfig, RuntimeConfig};
//!
//! let config = RuntimeConfig::load();
//! let mut host = ExtensionHost::new(ExtensionHostConfig::from_runtime(&config))?;
//! host.load("com.example.site", |miru| MySite { miru }).await?;
//! let items = host.latest("com.example.site", 1).await?;
//! ```

pub mod config;
pub mod extensions;

// Re-export commonly used types for convenience
pub use config::RuntimeConfig;
pub use extensions::{
    Extension, ExtensionError, ExtensionHost, ExtensionHostConfig, ExtensionResult, Miru,
};
