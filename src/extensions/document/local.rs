//! In-process document nodes backed by `scraper`.

use ego_tree::{NodeId, NodeMut, NodeRef};
use scraper::{ElementRef, Html, Node, Selector};
use tracing::debug;

use crate::extensions::ipc::NodeScope;

/// What a node currently points at inside its document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    Root,
    Element(NodeId),
    Missing,
}

/// A parsed document narrowed to one element, the root, or nothing.
#[derive(Debug, Clone)]
pub struct LocalNode {
    content: String,
    selector: Option<String>,
    document: Html,
    full_document: bool,
    target: Target,
}

/// Whether markup is a complete document rather than a fragment.
pub(crate) fn is_full_document(markup: &str) -> bool {
    let head: String = markup
        .trim_start()
        .chars()
        .take(512)
        .collect::<String>()
        .to_ascii_lowercase();
    head.starts_with("<!doctype") || head.contains("<html")
}

/// Parse markup the way every node in this module does.
pub(crate) fn parse_markup(markup: &str) -> (Html, bool) {
    let full = is_full_document(markup);
    let document = if full {
        Html::parse_document(markup)
    } else {
        Html::parse_fragment(markup)
    };
    (document, full)
}

fn parse_selector(selector: &str) -> Option<Selector> {
    match Selector::parse(selector) {
        Ok(parsed) => Some(parsed),
        Err(e) => {
            debug!(selector, "invalid selector treated as no match: {e}");
            None
        }
    }
}

/// Copy the children of `source` under `dest`.
fn copy_children(source: NodeRef<'_, Node>, mut dest: NodeMut<'_, Node>) {
    for child in source.children() {
        let copied = dest.append(child.value().clone());
        copy_children(child, copied);
    }
}

impl LocalNode {
    /// Parse `content` and narrow it to the first match of `selector`.
    pub fn new(content: impl Into<String>, selector: Option<&str>) -> Self {
        let root = Self::root(content);
        match selector {
            Some(selector) => root.query_selector(selector),
            None => root,
        }
    }

    /// Parse `content` without narrowing.
    pub fn root(content: impl Into<String>) -> Self {
        let content = content.into();
        let (document, full_document) = parse_markup(&content);
        Self {
            content,
            selector: None,
            document,
            full_document,
            target: Target::Root,
        }
    }

    /// A standalone node holding a copy of `element` and its subtree.
    fn snapshot(element: ElementRef<'_>) -> Self {
        let mut document = Html::parse_fragment("");
        let wrapper = document.root_element().id();
        let mut target = Target::Missing;
        if let Some(mut wrapper) = document.tree.get_mut(wrapper) {
            let top = wrapper.append(Node::Element(element.value().clone()));
            target = Target::Element(top.id());
            copy_children(*element, top);
        }

        Self {
            content: element.html(),
            selector: None,
            document,
            full_document: false,
            target,
        }
    }

    /// Parse `content` as the markup of a single element and point at it.
    ///
    /// For a fragment that is its first top-level element, for a full
    /// document the `<html>` element.
    pub fn single_element(content: impl Into<String>) -> Self {
        let mut node = Self::root(content);
        let root = node.document.root_element();
        let top = if node.full_document {
            Some(root.id())
        } else {
            root.children().find_map(ElementRef::wrap).map(|e| e.id())
        };
        node.target = top.map_or(Target::Missing, Target::Element);
        node
    }

    /// Parse `content` for `scope`, then narrow to `selector`.
    pub(crate) fn scoped(content: String, scope: NodeScope, selector: Option<&str>) -> Self {
        let node = match scope {
            NodeScope::Document => Self::root(content),
            NodeScope::Element => Self::single_element(content),
        };
        match selector {
            Some(selector) => node.query_selector(selector),
            None => node,
        }
    }

    /// The markup this node was built from, refreshed after removals.
    pub fn content(&self) -> &str {
        &self.content
    }

    /// The selector this node was narrowed with, if any.
    pub fn selector(&self) -> Option<&str> {
        self.selector.as_deref()
    }

    pub fn is_match(&self) -> bool {
        self.target != Target::Missing
    }

    fn element(&self, id: NodeId) -> Option<ElementRef<'_>> {
        self.document.tree.get(id).and_then(ElementRef::wrap)
    }

    /// Markup of the whole document as it currently stands.
    fn document_markup(&self) -> String {
        let root = self.document.root_element();
        if self.full_document {
            root.html()
        } else {
            root.inner_html()
        }
    }

    /// Matches of `selector` below the current target, in document order.
    ///
    /// Fragments are searched below their wrapper element so the wrapper
    /// itself never matches.
    fn matches(&self, selector: &Selector) -> Vec<ElementRef<'_>> {
        match self.target {
            Target::Root if self.full_document => self.document.select(selector).collect(),
            Target::Root => self.document.root_element().select(selector).collect(),
            Target::Element(id) => self
                .element(id)
                .map(|e| e.select(selector).collect())
                .unwrap_or_default(),
            Target::Missing => Vec::new(),
        }
    }

    /// First match of `selector` below the current target.
    fn find(&self, selector: &str) -> Option<NodeId> {
        let selector = parse_selector(selector)?;
        self.matches(&selector).first().map(|e| e.id())
    }

    pub fn text(&self) -> Option<String> {
        match self.target {
            Target::Root => Some(self.document.root_element().text().collect()),
            Target::Element(id) => self.element(id).map(|e| e.text().collect()),
            Target::Missing => None,
        }
    }

    pub fn outer_html(&self) -> Option<String> {
        match self.target {
            Target::Root => Some(self.document_markup()),
            Target::Element(id) => self.element(id).map(|e| e.html()),
            Target::Missing => None,
        }
    }

    pub fn inner_html(&self) -> Option<String> {
        match self.target {
            Target::Root => Some(self.document.root_element().inner_html()),
            Target::Element(id) => self.element(id).map(|e| e.inner_html()),
            Target::Missing => None,
        }
    }

    /// Attribute of the matched element; the unnarrowed root has none.
    pub fn attr(&self, name: &str) -> Option<String> {
        match self.target {
            Target::Element(id) => self
                .element(id)
                .and_then(|e| e.value().attr(name))
                .map(str::to_string),
            Target::Root | Target::Missing => None,
        }
    }

    /// Narrow to the first match of `selector`, keeping the same document.
    pub fn query_selector(mut self, selector: &str) -> Self {
        self.target = match self.find(selector) {
            Some(id) => Target::Element(id),
            None => Target::Missing,
        };
        self.selector = Some(selector.to_string());
        self
    }

    /// Every match of `selector` as an independent node.
    pub fn query_selector_all(&self, selector: &str) -> Vec<Self> {
        match parse_selector(selector) {
            Some(parsed) => self.matches(&parsed).into_iter().map(Self::snapshot).collect(),
            None => Vec::new(),
        }
    }

    /// Detach the first match of `selector`. Returns whether anything was removed.
    pub fn remove_selector(&mut self, selector: &str) -> bool {
        let Some(id) = self.find(selector) else {
            return false;
        };
        if let Some(mut node) = self.document.tree.get_mut(id) {
            node.detach();
        }
        self.content = self.document_markup();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<div><span class="x">hi</span></div>"#;

    #[test]
    fn test_select_scenario() {
        let node = LocalNode::new(SAMPLE, Some(".x"));
        assert_eq!(node.text().as_deref(), Some("hi"));
        assert_eq!(node.outer_html().as_deref(), Some(r#"<span class="x">hi</span>"#));
        assert_eq!(node.inner_html().as_deref(), Some("hi"));
        assert_eq!(node.attr("class").as_deref(), Some("x"));
        assert_eq!(node.selector(), Some(".x"));
    }

    #[test]
    fn test_remove_selector_on_root() {
        let mut root = LocalNode::root(SAMPLE);
        assert!(root.remove_selector(".x"));
        assert_eq!(root.outer_html().as_deref(), Some("<div></div>"));
        assert_eq!(root.content(), "<div></div>");
    }

    #[test]
    fn test_remove_selector_without_match_is_noop() {
        let mut root = LocalNode::root(SAMPLE);
        assert!(!root.remove_selector(".missing"));
        assert_eq!(root.outer_html().as_deref(), Some(SAMPLE));
        assert_eq!(root.content(), SAMPLE);
    }

    #[test]
    fn test_no_match_yields_none() {
        let node = LocalNode::new(SAMPLE, Some(".nothing"));
        assert!(!node.is_match());
        assert_eq!(node.text(), None);
        assert_eq!(node.attr("class"), None);
        assert_eq!(node.outer_html(), None);

        let deeper = node.query_selector("span");
        assert!(!deeper.is_match());
        assert!(deeper.query_selector_all("span").is_empty());
    }

    #[test]
    fn test_invalid_selector_is_no_match() {
        let node = LocalNode::new(SAMPLE, Some("[[["));
        assert_eq!(node.text(), None);
        assert!(LocalNode::root(SAMPLE).query_selector_all(":::").is_empty());
    }

    #[test]
    fn test_narrowing_is_never_widened() {
        let html = r#"<ul><li><a href="/1">a</a></li></ul><p><a href="/2">b</a></p>"#;
        let list = LocalNode::new(html, Some("ul"));
        let link = list.query_selector("a");
        assert_eq!(link.attr("href").as_deref(), Some("/1"));

        let outside = LocalNode::new(html, Some("ul")).query_selector("p");
        assert!(!outside.is_match());
    }

    #[test]
    fn test_query_selector_all_snapshots() {
        let html = r#"<table><tr><td class="c">1</td><td class="c">2</td></tr></table>"#;
        let mut root = LocalNode::root(html);
        let cells = root.query_selector_all("td.c");

        assert_eq!(cells.len(), 2);
        assert_eq!(cells[0].outer_html().as_deref(), Some(r#"<td class="c">1</td>"#));

        root.remove_selector("tr");
        assert_eq!(cells[1].text().as_deref(), Some("2"));
        assert_eq!(cells[1].attr("class").as_deref(), Some("c"));
        assert_eq!(cells[1].inner_html().as_deref(), Some("2"));
    }

    #[test]
    fn test_snapshot_reads_its_element() {
        let html = r#"<ul><li id="a"><a href="/t/1">First</a></li><li id="b"><a href="/t/2">Second</a></li></ul>"#;
        let items = LocalNode::root(html).query_selector_all("li");

        assert_eq!(items[1].attr("id").as_deref(), Some("b"));
        let link = items[1].clone().query_selector("a");
        assert_eq!(link.attr("href").as_deref(), Some("/t/2"));

        // Selectors only look below the node itself.
        assert!(!items[0].clone().query_selector("li").is_match());
        assert!(items[0].query_selector_all("li").is_empty());

        let mut first = items[0].clone();
        assert!(first.remove_selector("a"));
        assert_eq!(first.outer_html().as_deref(), Some(r#"<li id="a"></li>"#));
        assert_eq!(first.content(), r#"<li id="a"></li>"#);
    }

    #[test]
    fn test_element_scope() {
        let node = LocalNode::single_element(r#"<div id="x"><div id="y">in</div></div>"#);
        assert_eq!(node.attr("id").as_deref(), Some("x"));
        assert_eq!(node.clone().query_selector("div").attr("id").as_deref(), Some("y"));
        assert_eq!(node.query_selector_all("div").len(), 1);

        assert!(!LocalNode::single_element("just text").is_match());
    }

    #[test]
    fn test_renarrowing_matches_descendants_only() {
        let list = LocalNode::new("<ul><li>1</li></ul>", Some("ul"));
        assert!(list.query_selector_all("ul").is_empty());
        assert!(!list.query_selector("ul").is_match());
    }

    #[test]
    fn test_remove_inside_narrowed_node() {
        let html = r#"<div id="a"><b>x</b><i>y</i></div>"#;
        let mut node = LocalNode::new(html, Some("#a"));
        assert!(node.remove_selector("b"));
        assert_eq!(node.outer_html().as_deref(), Some(r#"<div id="a"><i>y</i></div>"#));
        assert_eq!(node.content(), r#"<div id="a"><i>y</i></div>"#);
    }

    #[test]
    fn test_full_document() {
        let html = "<!DOCTYPE html><html><head><title>T</title></head><body><p>x</p></body></html>";
        let node = LocalNode::new(html, Some("title"));
        assert_eq!(node.text().as_deref(), Some("T"));

        let root = LocalNode::root(html);
        assert!(root.outer_html().unwrap().starts_with("<html>"));
        assert!(is_full_document(html));
        assert!(!is_full_document("<div>x</div>"));
    }
}
