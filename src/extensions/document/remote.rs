//! Bridge-backed document nodes.
//!
//! A remote node never parses anything itself. It keeps the markup and the
//! selector it was created with and asks the host for every derived value,
//! re-sending both each time.

use serde_json::{json, Value};

use crate::extensions::error::ExtensionResult;
use crate::extensions::ipc::{Bridge, NodeScope, Operation, QueryOp, XPathOp};

/// Script-side view of markup queried through the host.
#[derive(Debug, Clone)]
pub struct RemoteNode {
    /// `None` once a narrowing step matched nothing.
    content: Option<String>,
    selector: Option<String>,
    /// Whether `content` is a whole document or this node's own markup.
    scope: NodeScope,
    bridge: Bridge,
}

/// A string reply, `None` for null.
pub(crate) fn optional_string(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}

/// An array-of-strings reply; anything else is empty.
pub(crate) fn string_list(value: Value) -> Vec<String> {
    match value {
        Value::Array(items) => items.into_iter().filter_map(optional_string).collect(),
        _ => Vec::new(),
    }
}

impl RemoteNode {
    pub fn new(bridge: Bridge, content: impl Into<String>, selector: Option<&str>) -> Self {
        Self {
            content: Some(content.into()),
            selector: selector.map(str::to_string),
            scope: NodeScope::Document,
            bridge,
        }
    }

    /// A node standing for the single element serialized in `markup`.
    fn element(bridge: Bridge, markup: String, selector: Option<&str>) -> Self {
        Self {
            content: Some(markup),
            selector: selector.map(str::to_string),
            scope: NodeScope::Element,
            bridge,
        }
    }

    fn missing(bridge: Bridge, selector: &str) -> Self {
        Self {
            content: None,
            selector: Some(selector.to_string()),
            scope: NodeScope::Document,
            bridge,
        }
    }

    pub fn content(&self) -> Option<&str> {
        self.content.as_deref()
    }

    pub fn selector(&self) -> Option<&str> {
        self.selector.as_deref()
    }

    pub fn scope(&self) -> NodeScope {
        self.scope
    }

    async fn select(&self, op: QueryOp) -> ExtensionResult<Option<String>> {
        let Some(content) = &self.content else {
            return Ok(None);
        };
        let reply = self
            .bridge
            .invoke(
                Operation::QuerySelector,
                vec![json!(content), json!(self.selector), json!(op), json!(self.scope)],
            )
            .await?;
        Ok(optional_string(reply))
    }

    pub async fn text(&self) -> ExtensionResult<Option<String>> {
        self.select(QueryOp::Text).await
    }

    pub async fn outer_html(&self) -> ExtensionResult<Option<String>> {
        self.select(QueryOp::OuterHtml).await
    }

    pub async fn inner_html(&self) -> ExtensionResult<Option<String>> {
        self.select(QueryOp::InnerHtml).await
    }

    pub async fn attr(&self, name: &str) -> ExtensionResult<Option<String>> {
        let Some(content) = &self.content else {
            return Ok(None);
        };
        let reply = self
            .bridge
            .invoke(
                Operation::GetAttributeText,
                vec![json!(content), json!(self.selector), json!(name), json!(self.scope)],
            )
            .await?;
        Ok(optional_string(reply))
    }

    /// Markup and scope later queries on this node run against.
    ///
    /// A narrowed node fetches its own markup so queries stay below it.
    async fn own_markup(&self) -> ExtensionResult<Option<(String, NodeScope)>> {
        match (&self.content, &self.selector) {
            (None, _) => Ok(None),
            (Some(content), None) => Ok(Some((content.clone(), self.scope))),
            (Some(_), Some(_)) => Ok(self
                .outer_html()
                .await?
                .map(|markup| (markup, NodeScope::Element))),
        }
    }

    /// Narrow to `selector` below the current match.
    ///
    /// An unnarrowed node just takes the selector; a narrowed one first
    /// fetches its own markup.
    pub async fn query_selector(self, selector: &str) -> ExtensionResult<Self> {
        if self.content.is_some() && self.selector.is_none() {
            return Ok(Self {
                selector: Some(selector.to_string()),
                ..self
            });
        }
        match self.own_markup().await? {
            Some((markup, _)) => Ok(Self::element(self.bridge, markup, Some(selector))),
            None => Ok(Self::missing(self.bridge, selector)),
        }
    }

    pub async fn query_selector_all(&self, selector: &str) -> ExtensionResult<Vec<Self>> {
        let Some((markup, scope)) = self.own_markup().await? else {
            return Ok(Vec::new());
        };

        let reply = self
            .bridge
            .invoke(
                Operation::QuerySelectorAll,
                vec![json!(markup), json!(selector), json!(scope)],
            )
            .await?;
        Ok(string_list(reply)
            .into_iter()
            .map(|markup| Self::element(self.bridge.clone(), markup, None))
            .collect())
    }

    /// Ask the host to strip the first match of `selector` below this node
    /// and keep the markup it returns.
    ///
    /// A narrowed node becomes its own element afterwards.
    pub async fn remove_selector(&mut self, selector: &str) -> ExtensionResult<()> {
        let Some((markup, scope)) = self.own_markup().await? else {
            return Ok(());
        };
        let reply = self
            .bridge
            .invoke(
                Operation::RemoveSelector,
                vec![json!(markup), json!(selector), json!(scope)],
            )
            .await?;
        if let Some(updated) = optional_string(reply) {
            self.content = Some(updated);
            self.selector = None;
            self.scope = scope;
        }
        Ok(())
    }

    /// Evaluate an XPath accessor on the host.
    pub(crate) async fn xpath(
        bridge: &Bridge,
        content: &str,
        expression: &str,
        op: XPathOp,
    ) -> ExtensionResult<Value> {
        Ok(bridge
            .invoke(
                Operation::QueryXPath,
                vec![json!(content), json!(expression), json!(op)],
            )
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extensions::document::{evaluate, HostQuery};
    use crate::extensions::ipc::BridgeReceiver;

    /// Answer every message with the in-process evaluator.
    fn serve(mut receiver: BridgeReceiver) -> tokio::task::JoinHandle<Vec<Operation>> {
        tokio::spawn(async move {
            let mut seen = Vec::new();
            while let Some(message) = receiver.recv().await {
                seen.push(message.operation);
                let query = HostQuery::decode(message.operation, &message.payload)
                    .expect("document operation");
                receiver.respond(&message.channel, Ok(evaluate(query)));
            }
            seen
        })
    }

    const SAMPLE: &str = r#"<div><span class="x">hi</span></div>"#;

    #[tokio::test]
    async fn test_round_trips_per_accessor() {
        let (bridge, receiver) = Bridge::channel("pkg");
        let server = serve(receiver);

        let node = RemoteNode::new(bridge.clone(), SAMPLE, Some(".x"));
        assert_eq!(node.text().await.unwrap().as_deref(), Some("hi"));
        assert_eq!(
            node.outer_html().await.unwrap().as_deref(),
            Some(r#"<span class="x">hi</span>"#)
        );
        assert_eq!(node.attr("class").await.unwrap().as_deref(), Some("x"));

        drop(node);
        drop(bridge);
        let seen = server.await.unwrap();
        assert_eq!(
            seen,
            vec![
                Operation::QuerySelector,
                Operation::QuerySelector,
                Operation::GetAttributeText
            ]
        );
    }

    #[tokio::test]
    async fn test_no_match_is_none() {
        let (bridge, receiver) = Bridge::channel("pkg");
        let _server = serve(receiver);

        let node = RemoteNode::new(bridge, SAMPLE, Some(".nothing"));
        assert_eq!(node.text().await.unwrap(), None);
        assert_eq!(node.attr("href").await.unwrap(), None);

        let deeper = node.query_selector("span").await.unwrap();
        assert_eq!(deeper.content(), None);
        assert_eq!(deeper.text().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_remove_selector_replaces_content() {
        let (bridge, receiver) = Bridge::channel("pkg");
        let _server = serve(receiver);

        let mut root = RemoteNode::new(bridge, SAMPLE, None);
        root.remove_selector(".x").await.unwrap();
        assert_eq!(root.content(), Some("<div></div>"));
        assert_eq!(root.outer_html().await.unwrap().as_deref(), Some("<div></div>"));

        root.remove_selector(".x").await.unwrap();
        assert_eq!(root.content(), Some("<div></div>"));
    }

    #[tokio::test]
    async fn test_query_selector_all_and_narrowing() {
        let (bridge, receiver) = Bridge::channel("pkg");
        let _server = serve(receiver);

        let html = r#"<ul><li><a href="/1">a</a></li><li><a href="/2">b</a></li></ul><a href="/3">c</a>"#;
        let list = RemoteNode::new(bridge, html, None)
            .query_selector("ul")
            .await
            .unwrap();

        let items = list.query_selector_all("li").await.unwrap();
        assert_eq!(items.len(), 2);

        let link = items[1].clone().query_selector("a").await.unwrap();
        assert_eq!(link.attr("href").await.unwrap().as_deref(), Some("/2"));

        let links = list.query_selector_all("a").await.unwrap();
        assert_eq!(links.len(), 2);
        assert_eq!(links[0].scope(), NodeScope::Element);
        assert_eq!(links[0].attr("href").await.unwrap().as_deref(), Some("/1"));
        assert_eq!(links[1].text().await.unwrap().as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn test_renarrowing_stays_below_the_node() {
        let (bridge, receiver) = Bridge::channel("pkg");
        let _server = serve(receiver);

        let html = "<div id=\"x\"><div id=\"y\">in</div></div>";
        let outer = RemoteNode::new(bridge, html, Some("#x"));
        let inner = outer.clone().query_selector("div").await.unwrap();
        assert_eq!(inner.attr("id").await.unwrap().as_deref(), Some("y"));

        let same = outer.clone().query_selector("#x").await.unwrap();
        assert_eq!(same.text().await.unwrap(), None);
        assert_eq!(outer.query_selector_all("div").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_remove_selector_inside_narrowed_node() {
        let (bridge, receiver) = Bridge::channel("pkg");
        let _server = serve(receiver);

        let html = r#"<p><b>1</b></p><div id="a"><b>2</b><i>3</i></div>"#;
        let mut node = RemoteNode::new(bridge, html, Some("#a"));
        node.remove_selector("b").await.unwrap();

        assert_eq!(node.selector(), None);
        assert_eq!(node.scope(), NodeScope::Element);
        assert_eq!(node.content(), Some(r#"<div id="a"><i>3</i></div>"#));
        assert_eq!(
            node.outer_html().await.unwrap().as_deref(),
            Some(r#"<div id="a"><i>3</i></div>"#)
        );
        assert_eq!(node.attr("id").await.unwrap().as_deref(), Some("a"));
    }
}
