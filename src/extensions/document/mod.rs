//! Document queries for extension scripts.
//!
//! Scripts see one shape for querying markup: CSS selectors narrowing to a
//! node, text / markup / attribute accessors, subtree removal and XPath.
//! How the shape is served depends on the extension's protocol generation:
//!
//! - [`ProtocolGeneration::Remote`]: nodes are [`RemoteNode`]s and every
//!   accessor is a bridge round trip answered by [`evaluate`] on the host.
//! - [`ProtocolGeneration::Local`]: nodes are [`LocalNode`]s owning a parsed
//!   document.
//!
//! The generation is chosen once per extension; [`QueryNode`] and
//! [`XPathNode`] hide the difference from callers. A selector that matches
//! nothing produces a node whose accessors return `None`, never an error.

mod local;
mod remote;
mod xpath;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::ExtensionResult;
use super::ipc::{Bridge, HostError, NodeScope, Operation, QueryOp, XPathOp};

pub use local::LocalNode;
pub use remote::RemoteNode;
pub use xpath::{XPath, XPathError, XPathItem, XPathMatch};

use remote::{optional_string, string_list};

/// Which side of the bridge parses documents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolGeneration {
    /// Every query is a host round trip.
    Remote,
    /// Documents are parsed in-process.
    #[default]
    Local,
}

/// Query operations shared by both generations.
#[async_trait(?Send)]
pub trait DocumentQuery: Sized {
    /// Current markup, `None` for a node that matched nothing.
    fn content(&self) -> Option<&str>;

    fn selector(&self) -> Option<&str>;

    async fn text(&self) -> ExtensionResult<Option<String>>;

    async fn outer_html(&self) -> ExtensionResult<Option<String>>;

    async fn inner_html(&self) -> ExtensionResult<Option<String>>;

    async fn attr(&self, name: &str) -> ExtensionResult<Option<String>>;

    /// Narrow to the first match of `selector`.
    async fn query_selector(self, selector: &str) -> ExtensionResult<Self>;

    /// Independent nodes for every match of `selector`.
    async fn query_selector_all(&self, selector: &str) -> ExtensionResult<Vec<Self>>;

    /// Remove the first match of `selector`; no-op when nothing matches.
    async fn remove_selector(&mut self, selector: &str) -> ExtensionResult<()>;
}

#[async_trait(?Send)]
impl DocumentQuery for LocalNode {
    fn content(&self) -> Option<&str> {
        self.is_match().then(|| LocalNode::content(self))
    }

    fn selector(&self) -> Option<&str> {
        LocalNode::selector(self)
    }

    async fn text(&self) -> ExtensionResult<Option<String>> {
        Ok(LocalNode::text(self))
    }

    async fn outer_html(&self) -> ExtensionResult<Option<String>> {
        Ok(LocalNode::outer_html(self))
    }

    async fn inner_html(&self) -> ExtensionResult<Option<String>> {
        Ok(LocalNode::inner_html(self))
    }

    async fn attr(&self, name: &str) -> ExtensionResult<Option<String>> {
        Ok(LocalNode::attr(self, name))
    }

    async fn query_selector(self, selector: &str) -> ExtensionResult<Self> {
        Ok(LocalNode::query_selector(self, selector))
    }

    async fn query_selector_all(&self, selector: &str) -> ExtensionResult<Vec<Self>> {
        Ok(LocalNode::query_selector_all(self, selector))
    }

    async fn remove_selector(&mut self, selector: &str) -> ExtensionResult<()> {
        LocalNode::remove_selector(self, selector);
        Ok(())
    }
}

#[async_trait(?Send)]
impl DocumentQuery for RemoteNode {
    fn content(&self) -> Option<&str> {
        RemoteNode::content(self)
    }

    fn selector(&self) -> Option<&str> {
        RemoteNode::selector(self)
    }

    async fn text(&self) -> ExtensionResult<Option<String>> {
        RemoteNode::text(self).await
    }

    async fn outer_html(&self) -> ExtensionResult<Option<String>> {
        RemoteNode::outer_html(self).await
    }

    async fn inner_html(&self) -> ExtensionResult<Option<String>> {
        RemoteNode::inner_html(self).await
    }

    async fn attr(&self, name: &str) -> ExtensionResult<Option<String>> {
        RemoteNode::attr(self, name).await
    }

    async fn query_selector(self, selector: &str) -> ExtensionResult<Self> {
        RemoteNode::query_selector(self, selector).await
    }

    async fn query_selector_all(&self, selector: &str) -> ExtensionResult<Vec<Self>> {
        RemoteNode::query_selector_all(self, selector).await
    }

    async fn remove_selector(&mut self, selector: &str) -> ExtensionResult<()> {
        RemoteNode::remove_selector(self, selector).await
    }
}

/// A node of either generation.
#[derive(Debug, Clone)]
pub enum QueryNode {
    Remote(RemoteNode),
    Local(LocalNode),
}

impl QueryNode {
    /// Build a node over `content` for the given generation.
    pub fn new(
        generation: ProtocolGeneration,
        bridge: &Bridge,
        content: impl Into<String>,
        selector: Option<&str>,
    ) -> Self {
        match generation {
            ProtocolGeneration::Remote => {
                QueryNode::Remote(RemoteNode::new(bridge.clone(), content, selector))
            }
            ProtocolGeneration::Local => QueryNode::Local(LocalNode::new(content, selector)),
        }
    }

    pub fn generation(&self) -> ProtocolGeneration {
        match self {
            QueryNode::Remote(_) => ProtocolGeneration::Remote,
            QueryNode::Local(_) => ProtocolGeneration::Local,
        }
    }
}

#[async_trait(?Send)]
impl DocumentQuery for QueryNode {
    fn content(&self) -> Option<&str> {
        match self {
            QueryNode::Remote(node) => DocumentQuery::content(node),
            QueryNode::Local(node) => DocumentQuery::content(node),
        }
    }

    fn selector(&self) -> Option<&str> {
        match self {
            QueryNode::Remote(node) => node.selector(),
            QueryNode::Local(node) => node.selector(),
        }
    }

    async fn text(&self) -> ExtensionResult<Option<String>> {
        match self {
            QueryNode::Remote(node) => node.text().await,
            QueryNode::Local(node) => Ok(node.text()),
        }
    }

    async fn outer_html(&self) -> ExtensionResult<Option<String>> {
        match self {
            QueryNode::Remote(node) => node.outer_html().await,
            QueryNode::Local(node) => Ok(node.outer_html()),
        }
    }

    async fn inner_html(&self) -> ExtensionResult<Option<String>> {
        match self {
            QueryNode::Remote(node) => node.inner_html().await,
            QueryNode::Local(node) => Ok(node.inner_html()),
        }
    }

    async fn attr(&self, name: &str) -> ExtensionResult<Option<String>> {
        match self {
            QueryNode::Remote(node) => node.attr(name).await,
            QueryNode::Local(node) => Ok(node.attr(name)),
        }
    }

    async fn query_selector(self, selector: &str) -> ExtensionResult<Self> {
        match self {
            QueryNode::Remote(node) => Ok(QueryNode::Remote(node.query_selector(selector).await?)),
            QueryNode::Local(node) => Ok(QueryNode::Local(node.query_selector(selector))),
        }
    }

    async fn query_selector_all(&self, selector: &str) -> ExtensionResult<Vec<Self>> {
        match self {
            QueryNode::Remote(node) => Ok(node
                .query_selector_all(selector)
                .await?
                .into_iter()
                .map(QueryNode::Remote)
                .collect()),
            QueryNode::Local(node) => Ok(node
                .query_selector_all(selector)
                .into_iter()
                .map(QueryNode::Local)
                .collect()),
        }
    }

    async fn remove_selector(&mut self, selector: &str) -> ExtensionResult<()> {
        match self {
            QueryNode::Remote(node) => node.remove_selector(selector).await,
            QueryNode::Local(node) => {
                node.remove_selector(selector);
                Ok(())
            }
        }
    }
}

/// Result of an XPath query, evaluated lazily per accessor in the remote
/// generation and eagerly in the local one.
#[derive(Debug, Clone)]
pub enum XPathNode {
    Remote {
        bridge: Bridge,
        content: String,
        expression: String,
    },
    Local(XPathMatch),
}

impl XPathNode {
    pub fn new(
        generation: ProtocolGeneration,
        bridge: &Bridge,
        content: impl Into<String>,
        expression: impl Into<String>,
    ) -> Self {
        let content = content.into();
        let expression = expression.into();
        match generation {
            ProtocolGeneration::Remote => XPathNode::Remote {
                bridge: bridge.clone(),
                content,
                expression,
            },
            ProtocolGeneration::Local => {
                XPathNode::Local(XPathMatch::evaluate(&content, &expression))
            }
        }
    }

    async fn fetch(&self, op: XPathOp) -> ExtensionResult<Value> {
        match self {
            XPathNode::Remote {
                bridge,
                content,
                expression,
            } => RemoteNode::xpath(bridge, content, expression, op).await,
            XPathNode::Local(found) => Ok(evaluate_xpath(found, op)),
        }
    }

    /// First selected attribute value.
    pub async fn attr(&self) -> ExtensionResult<Option<String>> {
        Ok(optional_string(self.fetch(XPathOp::Attr).await?))
    }

    /// All selected attribute values.
    pub async fn attrs(&self) -> ExtensionResult<Vec<String>> {
        Ok(string_list(self.fetch(XPathOp::Attrs).await?))
    }

    pub async fn text(&self) -> ExtensionResult<Option<String>> {
        Ok(optional_string(self.fetch(XPathOp::Text).await?))
    }

    pub async fn all_html(&self) -> ExtensionResult<Vec<String>> {
        Ok(string_list(self.fetch(XPathOp::AllHtml).await?))
    }

    pub async fn outer_html(&self) -> ExtensionResult<Option<String>> {
        Ok(optional_string(self.fetch(XPathOp::OuterHtml).await?))
    }
}

/// A document query sent by a remote-generation script, decoded from its
/// bridge payload.
///
/// `scope` is the optional last payload argument and defaults to
/// [`NodeScope::Document`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostQuery {
    Select {
        content: String,
        selector: Option<String>,
        op: QueryOp,
        scope: NodeScope,
    },
    SelectAll {
        content: String,
        selector: String,
        scope: NodeScope,
    },
    RemoveSelector {
        content: String,
        selector: String,
        scope: NodeScope,
    },
    AttributeText {
        content: String,
        selector: Option<String>,
        attribute: String,
        scope: NodeScope,
    },
    XPath {
        content: String,
        expression: String,
        op: XPathOp,
    },
}

fn string_arg(operation: Operation, payload: &[Value], index: usize) -> Result<String, HostError> {
    match payload.get(index) {
        Some(Value::String(s)) => Ok(s.clone()),
        _ => Err(HostError::new(
            operation,
            format!("argument {index} must be a string"),
        )),
    }
}

fn optional_arg(
    operation: Operation,
    payload: &[Value],
    index: usize,
) -> Result<Option<String>, HostError> {
    match payload.get(index) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        _ => Err(HostError::new(
            operation,
            format!("argument {index} must be a string or null"),
        )),
    }
}

fn tag_arg<T: serde::de::DeserializeOwned>(
    operation: Operation,
    payload: &[Value],
    index: usize,
) -> Result<T, HostError> {
    let value = payload.get(index).cloned().unwrap_or(Value::Null);
    serde_json::from_value(value.clone())
        .map_err(|_| HostError::new(operation, format!("unknown query operation {value}")))
}

fn scope_arg(
    operation: Operation,
    payload: &[Value],
    index: usize,
) -> Result<NodeScope, HostError> {
    match payload.get(index) {
        None | Some(Value::Null) => Ok(NodeScope::Document),
        Some(value) => serde_json::from_value(value.clone())
            .map_err(|_| HostError::new(operation, format!("unknown node scope {value}"))),
    }
}

impl HostQuery {
    /// Decode the payload of a document operation.
    pub fn decode(operation: Operation, payload: &[Value]) -> Result<Self, HostError> {
        let content = string_arg(operation, payload, 0)?;
        match operation {
            Operation::QuerySelector => Ok(HostQuery::Select {
                content,
                selector: optional_arg(operation, payload, 1)?,
                op: tag_arg(operation, payload, 2)?,
                scope: scope_arg(operation, payload, 3)?,
            }),
            Operation::QuerySelectorAll => Ok(HostQuery::SelectAll {
                content,
                selector: string_arg(operation, payload, 1)?,
                scope: scope_arg(operation, payload, 2)?,
            }),
            Operation::RemoveSelector => Ok(HostQuery::RemoveSelector {
                content,
                selector: string_arg(operation, payload, 1)?,
                scope: scope_arg(operation, payload, 2)?,
            }),
            Operation::GetAttributeText => Ok(HostQuery::AttributeText {
                content,
                selector: optional_arg(operation, payload, 1)?,
                attribute: string_arg(operation, payload, 2)?,
                scope: scope_arg(operation, payload, 3)?,
            }),
            Operation::QueryXPath => Ok(HostQuery::XPath {
                content,
                expression: string_arg(operation, payload, 1)?,
                op: tag_arg(operation, payload, 2)?,
            }),
            other => Err(HostError::new(other, "not a document operation")),
        }
    }
}

fn optional_value(value: Option<String>) -> Value {
    value.map_or(Value::Null, Value::String)
}

fn evaluate_xpath(found: &XPathMatch, op: XPathOp) -> Value {
    match op {
        XPathOp::Attr => optional_value(found.attr()),
        XPathOp::Attrs => Value::from(found.attrs()),
        XPathOp::Text => optional_value(found.text()),
        XPathOp::AllHtml => Value::from(found.all_html()),
        XPathOp::OuterHtml => optional_value(found.outer_html()),
    }
}

/// Answer a remote-generation query in-process.
///
/// Uses the same node semantics as the local generation, so both
/// generations agree on every result.
pub fn evaluate(query: HostQuery) -> Value {
    match query {
        HostQuery::Select {
            content,
            selector,
            op,
            scope,
        } => {
            let node = LocalNode::scoped(content, scope, selector.as_deref());
            optional_value(match op {
                QueryOp::Text => node.text(),
                QueryOp::OuterHtml => node.outer_html(),
                QueryOp::InnerHtml => node.inner_html(),
            })
        }
        HostQuery::SelectAll {
            content,
            selector,
            scope,
        } => Value::from(
            LocalNode::scoped(content, scope, None)
                .query_selector_all(&selector)
                .iter()
                .filter_map(LocalNode::outer_html)
                .collect::<Vec<_>>(),
        ),
        HostQuery::RemoveSelector {
            content,
            selector,
            scope,
        } => {
            let mut node = LocalNode::scoped(content, scope, None);
            node.remove_selector(&selector);
            Value::String(node.content().to_string())
        }
        HostQuery::AttributeText {
            content,
            selector,
            attribute,
            scope,
        } => optional_value(
            LocalNode::scoped(content, scope, selector.as_deref()).attr(&attribute),
        ),
        HostQuery::XPath {
            content,
            expression,
            op,
        } => evaluate_xpath(&XPathMatch::evaluate(&content, &expression), op),
    }
}
