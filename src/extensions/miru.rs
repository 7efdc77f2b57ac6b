//! The script-facing facade of one loaded extension.

use std::sync::{Mutex, MutexGuard};

use serde_json::{json, Value};
use tracing::debug;

use super::document::{DocumentQuery, ProtocolGeneration, QueryNode, XPathNode};
use super::error::ExtensionResult;
use super::http::{HttpFacade, ResponseBody};
use super::ipc::{Bridge, Operation, RequestOptions};
use super::settings::SettingDescriptor;

fn optional_string(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}

/// Everything an extension can ask of its host.
///
/// One `Miru` exists per loaded extension. It knows the extension's package,
/// name and website, routes every host call over the extension's own
/// [`Bridge`] and builds document nodes for the extension's protocol
/// generation.
#[derive(Debug)]
pub struct Miru {
    pkg: String,
    name: String,
    generation: ProtocolGeneration,
    bridge: Bridge,
    http: HttpFacade,
    /// Keys registered through [`Miru::register_setting`], in first-seen order.
    setting_keys: Mutex<Vec<String>>,
}

impl Miru {
    pub fn new(
        pkg: impl Into<String>,
        name: impl Into<String>,
        website: impl Into<String>,
        generation: ProtocolGeneration,
        bridge: Bridge,
    ) -> Self {
        Self {
            pkg: pkg.into(),
            name: name.into(),
            generation,
            http: HttpFacade::new(website, bridge.clone()),
            bridge,
            setting_keys: Mutex::new(Vec::new()),
        }
    }

    pub fn pkg(&self) -> &str {
        &self.pkg
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn website(&self) -> &str {
        self.http.website()
    }

    pub fn generation(&self) -> ProtocolGeneration {
        self.generation
    }

    pub fn bridge(&self) -> &Bridge {
        &self.bridge
    }

    fn keys(&self) -> MutexGuard<'_, Vec<String>> {
        self.setting_keys.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ─────────────────────────────────────────────────────────────────────
    // HTTP
    // ─────────────────────────────────────────────────────────────────────

    /// Request a path on the website, or on the host named by `Miru-Url`.
    pub async fn request(
        &self,
        path: &str,
        options: Option<RequestOptions>,
    ) -> ExtensionResult<ResponseBody> {
        self.http.request(path, options).await
    }

    /// Request a full URL.
    pub async fn raw_request(
        &self,
        url: &str,
        options: Option<RequestOptions>,
    ) -> ExtensionResult<ResponseBody> {
        self.http.raw_request(url, options).await
    }

    // ─────────────────────────────────────────────────────────────────────
    // Documents
    // ─────────────────────────────────────────────────────────────────────

    /// First match of `selector` in `content`.
    pub fn query_selector(&self, content: &str, selector: &str) -> QueryNode {
        QueryNode::new(self.generation, &self.bridge, content, Some(selector))
    }

    /// Every match of `selector` in `content`.
    pub async fn query_selector_all(
        &self,
        content: &str,
        selector: &str,
    ) -> ExtensionResult<Vec<QueryNode>> {
        QueryNode::new(self.generation, &self.bridge, content, None)
            .query_selector_all(selector)
            .await
    }

    pub fn query_xpath(&self, content: &str, expression: &str) -> XPathNode {
        XPathNode::new(self.generation, &self.bridge, content, expression)
    }

    /// Attribute of the first match of `selector`, `None` when either is missing.
    pub async fn get_attribute_text(
        &self,
        content: &str,
        selector: &str,
        attribute: &str,
    ) -> ExtensionResult<Option<String>> {
        self.query_selector(content, selector).attr(attribute).await
    }

    // ─────────────────────────────────────────────────────────────────────
    // Settings
    // ─────────────────────────────────────────────────────────────────────

    pub async fn get_setting(&self, key: &str) -> ExtensionResult<Option<String>> {
        let value = self
            .bridge
            .invoke(Operation::GetSetting, vec![json!(key)])
            .await?;
        Ok(optional_string(value))
    }

    /// Register a setting with the host.
    ///
    /// The key is remembered locally before the host is asked; registering
    /// the same key again still reaches the host but is listed once.
    pub async fn register_setting(&self, descriptor: SettingDescriptor) -> ExtensionResult<()> {
        {
            let mut keys = self.keys();
            if !keys.contains(&descriptor.key) {
                keys.push(descriptor.key.clone());
            }
        }
        debug!(extension = %self.pkg, key = %descriptor.key, "register setting");
        self.bridge
            .invoke(Operation::RegisterSetting, vec![serde_json::to_value(&descriptor)?])
            .await?;
        Ok(())
    }

    pub async fn set_setting(&self, key: &str, value: &str) -> ExtensionResult<()> {
        self.bridge
            .invoke(Operation::SetSetting, vec![json!(key), json!(value)])
            .await?;
        Ok(())
    }

    /// Every key this extension has registered.
    pub fn registered_setting_keys(&self) -> Vec<String> {
        self.keys().clone()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Cookies
    // ─────────────────────────────────────────────────────────────────────

    /// Cookies the host would send to `url`, as `name=value` strings.
    pub async fn list_cookies(&self, url: &str) -> ExtensionResult<Vec<String>> {
        let value = self
            .bridge
            .invoke(Operation::ListCookies, vec![json!(url)])
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    pub async fn set_cookies(&self, url: &str, cookies: &[String]) -> ExtensionResult<()> {
        self.bridge
            .invoke(Operation::SetCookies, vec![json!(url), json!(cookies)])
            .await?;
        Ok(())
    }

    /// Store a single `name=value` cookie.
    pub async fn set_cookie(&self, url: &str, cookie: &str) -> ExtensionResult<()> {
        self.set_cookies(url, &[cookie.to_string()]).await
    }

    // ─────────────────────────────────────────────────────────────────────
    // Data, UI and conversion
    // ─────────────────────────────────────────────────────────────────────

    /// Persist `data` under `key`. Returns whether the host stored it.
    pub async fn save_data(&self, key: &str, data: Value) -> bool {
        match self
            .bridge
            .invoke(Operation::SaveData, vec![json!(key), data])
            .await
        {
            Ok(_) => true,
            Err(e) => {
                debug!(extension = %self.pkg, key, "saveData failed: {e}");
                false
            }
        }
    }

    pub async fn get_data(&self, key: &str) -> ExtensionResult<Option<Value>> {
        let value = self
            .bridge
            .invoke(Operation::GetData, vec![json!(key)])
            .await?;
        Ok((!value.is_null()).then_some(value))
    }

    pub async fn snackbar(&self, message: &str) -> ExtensionResult<()> {
        self.bridge
            .invoke(Operation::Snackbar, vec![json!(message)])
            .await?;
        Ok(())
    }

    /// Convert `data` between formats known to the host.
    pub async fn convert(&self, data: Value, from: &str, to: &str) -> ExtensionResult<Value> {
        Ok(self
            .bridge
            .invoke(Operation::Convert, vec![data, json!(from), json!(to)])
            .await?)
    }

    /// Write a line to the host log.
    pub async fn log(&self, message: &str) -> ExtensionResult<()> {
        self.bridge
            .invoke(Operation::Log, vec![json!(message)])
            .await?;
        Ok(())
    }
}
