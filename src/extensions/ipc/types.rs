//! Wire types exchanged between script-side callers and the host.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Every operation a script context can forward to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Operation {
    Request,
    RawRequest,
    QuerySelector,
    QuerySelectorAll,
    RemoveSelector,
    GetAttributeText,
    #[serde(rename = "queryXPath")]
    QueryXPath,
    GetSetting,
    RegisterSetting,
    SetSetting,
    ListCookies,
    SetCookies,
    SaveData,
    GetData,
    Snackbar,
    Convert,
    Log,
}

impl Operation {
    /// Wire name of the operation, the prefix of every channel key.
    pub fn name(self) -> &'static str {
        match self {
            Operation::Request => "request",
            Operation::RawRequest => "rawRequest",
            Operation::QuerySelector => "querySelector",
            Operation::QuerySelectorAll => "querySelectorAll",
            Operation::RemoveSelector => "removeSelector",
            Operation::GetAttributeText => "getAttributeText",
            Operation::QueryXPath => "queryXPath",
            Operation::GetSetting => "getSetting",
            Operation::RegisterSetting => "registerSetting",
            Operation::SetSetting => "setSetting",
            Operation::ListCookies => "listCookies",
            Operation::SetCookies => "setCookies",
            Operation::SaveData => "saveData",
            Operation::GetData => "getData",
            Operation::Snackbar => "snackbar",
            Operation::Convert => "convert",
            Operation::Log => "log",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Routing key of a bridge channel.
///
/// Derived only from the operation and the extension context, so two
/// extensions calling the same operation never share a channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelKey(String);

impl ChannelKey {
    pub fn new(operation: Operation, context: &str) -> Self {
        Self(format!("{}{}", operation.name(), context))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A single call travelling from the script context to the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeMessage {
    pub channel: ChannelKey,
    pub operation: Operation,
    /// Ordered argument tuple.
    pub payload: Vec<Value>,
}

impl BridgeMessage {
    pub fn new(operation: Operation, context: &str, payload: Vec<Value>) -> Self {
        Self {
            channel: ChannelKey::new(operation, context),
            operation,
            payload,
        }
    }

    /// Encode the argument tuple as a JSON array.
    pub fn encode(&self) -> String {
        Value::Array(self.payload.clone()).to_string()
    }

    /// Positional argument, `Null` when missing.
    pub fn arg(&self, index: usize) -> &Value {
        self.payload.get(index).unwrap_or(&Value::Null)
    }
}

/// Error half of a host reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostError {
    pub operation: Operation,
    pub message: String,
}

impl HostError {
    pub fn new(operation: Operation, message: impl Into<String>) -> Self {
        Self {
            operation,
            message: message.into(),
        }
    }
}

impl fmt::Display for HostError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed: {}", self.operation, self.message)
    }
}

impl std::error::Error for HostError {}

/// Reply sent back on a channel.
pub type HostReply = Result<Value, HostError>;

/// Accessor evaluated against a CSS-selected node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueryOp {
    #[serde(rename = "text")]
    Text,
    #[serde(rename = "outerHTML")]
    OuterHtml,
    #[serde(rename = "innerHTML")]
    InnerHtml,
}

/// Accessor evaluated against an XPath expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum XPathOp {
    #[serde(rename = "attr")]
    Attr,
    #[serde(rename = "attrs")]
    Attrs,
    #[serde(rename = "text")]
    Text,
    #[serde(rename = "allHTML")]
    AllHtml,
    #[serde(rename = "outerHTML")]
    OuterHtml,
}

/// What the markup of a document query stands for.
///
/// `Element` markup is the serialized node itself: accessors read its top
/// element and selectors only match below it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeScope {
    #[default]
    Document,
    Element,
}

/// Options accepted by `request` and `rawRequest`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,

    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,

    /// Per-call timeout in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }
}
