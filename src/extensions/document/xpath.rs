//! XPath evaluation over parsed HTML.
//!
//! Supports the subset extension scripts use for scraping:
//!
//! - absolute and relative location paths with `/` and `//`
//! - name tests (case-insensitive), `*`, `.`, `..`, `node()`
//! - a final `@name`, `@*` or `text()` step
//! - predicates: `[n]`, `[last()]`, `[@a]`, `[@a='v']`, `[text()='v']`,
//!   `[contains(@a,'v')]`, `[starts-with(@a,'v')]`, `[not(...)]` and
//!   conditions joined with `and`; on `text()` and `@` steps `.` is the
//!   selected string
//!
//! Anything else is rejected with an [`XPathError`].

use std::collections::HashSet;
use std::fmt;

use ego_tree::{NodeId, NodeRef};
use scraper::{ElementRef, Html, Node};
use tracing::debug;

use super::local::parse_markup;

/// Malformed or unsupported expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XPathError {
    pub expression: String,
    pub message: String,
}

impl fmt::Display for XPathError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid xpath '{}': {}", self.expression, self.message)
    }
}

impl std::error::Error for XPathError {}

/// One item selected by an expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XPathItem {
    Node(NodeId),
    Attribute(String),
    Text(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Axis {
    Child,
    Descendant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum NodeTest {
    Name(String),
    AnyElement,
    AnyNode,
    SelfNode,
    Parent,
    Attribute(Option<String>),
    Text,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Operand {
    Attribute(String),
    Text,
    Context,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Condition {
    Exists(Operand),
    Equals(Operand, String),
    Contains(Operand, String),
    StartsWith(Operand, String),
    Not(Box<Condition>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Predicate {
    Position(usize),
    Last,
    All(Vec<Condition>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Step {
    axis: Axis,
    test: NodeTest,
    predicates: Vec<Predicate>,
}

/// A parsed location path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XPath {
    absolute: bool,
    steps: Vec<Step>,
}

struct Parser<'a> {
    source: &'a str,
    chars: Vec<char>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            source,
            chars: source.chars().collect(),
            pos: 0,
        }
    }

    fn error(&self, message: impl Into<String>) -> XPathError {
        XPathError {
            expression: self.source.to_string(),
            message: message.into(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn eat(&mut self, expected: &str) -> bool {
        self.skip_ws();
        let end = self.pos + expected.chars().count();
        if end <= self.chars.len() && self.chars[self.pos..end].iter().copied().eq(expected.chars())
        {
            self.pos = end;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: &str) -> Result<(), XPathError> {
        if self.eat(expected) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{expected}' at {}", self.pos)))
        }
    }

    fn name(&mut self) -> Result<String, XPathError> {
        self.skip_ws();
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | ':' | '.'))
        {
            self.pos += 1;
        }
        if start == self.pos {
            return Err(self.error(format!("expected a name at {start}")));
        }
        Ok(self.chars[start..self.pos].iter().collect())
    }

    fn literal(&mut self) -> Result<String, XPathError> {
        self.skip_ws();
        let quote = match self.peek() {
            Some(q @ ('\'' | '"')) => q,
            _ => return Err(self.error(format!("expected a string literal at {}", self.pos))),
        };
        self.pos += 1;
        let start = self.pos;
        while self.peek().is_some_and(|c| c != quote) {
            self.pos += 1;
        }
        if self.peek().is_none() {
            return Err(self.error("unterminated string literal"));
        }
        let value = self.chars[start..self.pos].iter().collect();
        self.pos += 1;
        Ok(value)
    }

    fn number(&mut self) -> Option<usize> {
        self.skip_ws();
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.pos += 1;
        }
        if start == self.pos {
            return None;
        }
        self.chars[start..self.pos]
            .iter()
            .collect::<String>()
            .parse()
            .ok()
    }

    fn path(mut self) -> Result<XPath, XPathError> {
        self.skip_ws();
        let mut steps = Vec::new();
        let mut absolute = false;

        let mut axis = if self.eat("//") {
            absolute = true;
            Axis::Descendant
        } else if self.eat("/") {
            absolute = true;
            Axis::Child
        } else {
            Axis::Child
        };

        loop {
            self.skip_ws();
            if self.peek().is_none() {
                if steps.is_empty() && absolute && axis == Axis::Child {
                    // "/" alone selects the root.
                    steps.push(Step {
                        axis: Axis::Child,
                        test: NodeTest::SelfNode,
                        predicates: Vec::new(),
                    });
                    break;
                }
                return Err(self.error("expression ends with a separator"));
            }

            let step = self.step(axis)?;
            let terminal = matches!(step.test, NodeTest::Attribute(_) | NodeTest::Text);
            steps.push(step);

            self.skip_ws();
            if self.peek().is_none() {
                break;
            }
            if terminal {
                return Err(self.error("attribute and text() steps must come last"));
            }
            axis = if self.eat("//") {
                Axis::Descendant
            } else if self.eat("/") {
                Axis::Child
            } else {
                return Err(self.error(format!("unexpected input at {}", self.pos)));
            };
        }

        Ok(XPath { absolute, steps })
    }

    fn step(&mut self, axis: Axis) -> Result<Step, XPathError> {
        let test = if self.eat("..") {
            NodeTest::Parent
        } else if self.eat(".") {
            NodeTest::SelfNode
        } else if self.eat("@") {
            if self.eat("*") {
                NodeTest::Attribute(None)
            } else {
                NodeTest::Attribute(Some(self.name()?.to_ascii_lowercase()))
            }
        } else if self.eat("*") {
            NodeTest::AnyElement
        } else if self.eat("text()") {
            NodeTest::Text
        } else if self.eat("node()") {
            NodeTest::AnyNode
        } else {
            NodeTest::Name(self.name()?.to_ascii_lowercase())
        };

        let mut predicates = Vec::new();
        while self.eat("[") {
            predicates.push(self.predicate()?);
            self.expect("]")?;
        }

        Ok(Step {
            axis,
            test,
            predicates,
        })
    }

    fn predicate(&mut self) -> Result<Predicate, XPathError> {
        if let Some(n) = self.number() {
            if n == 0 {
                return Err(self.error("positions start at 1"));
            }
            return Ok(Predicate::Position(n));
        }
        if self.eat("last()") {
            return Ok(Predicate::Last);
        }

        let mut conditions = vec![self.condition()?];
        while self.eat("and") {
            conditions.push(self.condition()?);
        }
        Ok(Predicate::All(conditions))
    }

    fn condition(&mut self) -> Result<Condition, XPathError> {
        if self.eat("not(") {
            let inner = self.condition()?;
            self.expect(")")?;
            return Ok(Condition::Not(Box::new(inner)));
        }
        if self.eat("contains(") {
            let (operand, value) = self.call_args()?;
            return Ok(Condition::Contains(operand, value));
        }
        if self.eat("starts-with(") {
            let (operand, value) = self.call_args()?;
            return Ok(Condition::StartsWith(operand, value));
        }

        let operand = self.operand()?;
        if self.eat("=") {
            let value = self.literal()?;
            Ok(Condition::Equals(operand, value))
        } else {
            Ok(Condition::Exists(operand))
        }
    }

    fn call_args(&mut self) -> Result<(Operand, String), XPathError> {
        let operand = self.operand()?;
        self.expect(",")?;
        let value = self.literal()?;
        self.expect(")")?;
        Ok((operand, value))
    }

    fn operand(&mut self) -> Result<Operand, XPathError> {
        if self.eat("@") {
            Ok(Operand::Attribute(self.name()?.to_ascii_lowercase()))
        } else if self.eat("text()") {
            Ok(Operand::Text)
        } else if self.eat(".") {
            Ok(Operand::Context)
        } else {
            Err(self.error(format!("unsupported predicate at {}", self.pos)))
        }
    }
}

impl XPath {
    pub fn parse(expression: &str) -> Result<Self, XPathError> {
        Parser::new(expression).path()
    }

    /// Evaluate against `document`.
    ///
    /// Fragments are evaluated from their wrapper element so that `/div`
    /// addresses a top-level `div`; full documents start at the document node.
    pub fn evaluate(&self, document: &Html, fragment: bool) -> Vec<XPathItem> {
        let start = if fragment {
            document.root_element().id()
        } else {
            document.tree.root().id()
        };

        let mut context = vec![start];
        let mut items = Vec::new();

        for (index, step) in self.steps.iter().enumerate() {
            let last = index + 1 == self.steps.len();
            match &step.test {
                NodeTest::Attribute(name) => {
                    items = attribute_items(
                        document,
                        &context,
                        step.axis,
                        name.as_deref(),
                        &step.predicates,
                    );
                }
                NodeTest::Text => {
                    items = text_items(document, &context, step);
                }
                _ => {
                    context = apply_step(document, &context, step);
                    if last {
                        items = context.iter().copied().map(XPathItem::Node).collect();
                    }
                }
            }
        }
        items
    }
}

fn node(document: &Html, id: NodeId) -> Option<NodeRef<'_, Node>> {
    document.tree.get(id)
}

fn is_element(node: &NodeRef<'_, Node>) -> bool {
    node.value().is_element()
}

fn matches_test(node: &NodeRef<'_, Node>, test: &NodeTest) -> bool {
    match test {
        NodeTest::Name(name) => node
            .value()
            .as_element()
            .is_some_and(|e| e.name().eq_ignore_ascii_case(name)),
        NodeTest::AnyElement => is_element(node),
        NodeTest::AnyNode => true,
        _ => false,
    }
}

/// Self plus all descendants, in document order.
fn self_and_descendants<'a>(start: NodeRef<'a, Node>) -> impl Iterator<Item = NodeRef<'a, Node>> {
    start.descendants()
}

fn apply_step(document: &Html, context: &[NodeId], step: &Step) -> Vec<NodeId> {
    let mut seen = HashSet::new();
    let mut result = Vec::new();

    for &id in context {
        let Some(current) = node(document, id) else {
            continue;
        };

        // Candidate groups; positional predicates apply within each group.
        let groups: Vec<Vec<NodeRef<'_, Node>>> = match (&step.test, step.axis) {
            (NodeTest::SelfNode, Axis::Child) => vec![vec![current]],
            (NodeTest::SelfNode, Axis::Descendant) => {
                vec![self_and_descendants(current).filter(is_element).collect()]
            }
            (NodeTest::Parent, _) => vec![current.parent().into_iter().collect()],
            (test, Axis::Child) => vec![current.children().filter(|n| matches_test(n, test)).collect()],
            (test, Axis::Descendant) => self_and_descendants(current)
                .map(|d| d.children().filter(|n| matches_test(n, test)).collect())
                .collect(),
        };

        for group in groups {
            for candidate in filter_predicates(group, &step.predicates) {
                if seen.insert(candidate.id()) {
                    result.push(candidate.id());
                }
            }
        }
    }
    result
}

fn filter_predicates<'a>(
    mut nodes: Vec<NodeRef<'a, Node>>,
    predicates: &[Predicate],
) -> Vec<NodeRef<'a, Node>> {
    for predicate in predicates {
        nodes = match predicate {
            Predicate::Position(n) => nodes.get(n - 1).copied().into_iter().collect(),
            Predicate::Last => nodes.last().copied().into_iter().collect(),
            Predicate::All(conditions) => nodes
                .into_iter()
                .filter(|n| conditions.iter().all(|c| check(n, c)))
                .collect(),
        };
    }
    nodes
}

fn operand_value(node: &NodeRef<'_, Node>, operand: &Operand) -> Option<String> {
    match operand {
        Operand::Attribute(name) => node
            .value()
            .as_element()
            .and_then(|e| e.attr(name))
            .map(str::to_string),
        Operand::Text => {
            let text: String = node
                .children()
                .filter_map(|c| c.value().as_text().map(|t| t.to_string()))
                .collect();
            Some(text)
        }
        Operand::Context => Some(string_value(node)),
    }
}

fn check(node: &NodeRef<'_, Node>, condition: &Condition) -> bool {
    check_with(condition, &|operand| operand_value(node, operand))
}

/// Evaluate `condition` with `lookup` resolving its operands.
fn check_with(condition: &Condition, lookup: &dyn Fn(&Operand) -> Option<String>) -> bool {
    match condition {
        Condition::Exists(Operand::Text) => lookup(&Operand::Text).is_some_and(|t| !t.is_empty()),
        Condition::Exists(operand) => lookup(operand).is_some(),
        Condition::Equals(operand, value) => {
            lookup(operand).is_some_and(|v| v.trim() == value.as_str())
        }
        Condition::Contains(operand, value) => {
            lookup(operand).is_some_and(|v| v.contains(value.as_str()))
        }
        Condition::StartsWith(operand, value) => {
            lookup(operand).is_some_and(|v| v.starts_with(value.as_str()))
        }
        Condition::Not(inner) => !check_with(inner, lookup),
    }
}

/// Apply predicates to the attribute values of one owner element.
///
/// `.` is the value itself; an attribute has no attributes or text children.
fn filter_values(mut values: Vec<String>, predicates: &[Predicate]) -> Vec<String> {
    for predicate in predicates {
        values = match predicate {
            Predicate::Position(n) => values.into_iter().nth(n - 1).into_iter().collect(),
            Predicate::Last => values.pop().into_iter().collect(),
            Predicate::All(conditions) => values
                .into_iter()
                .filter(|value| {
                    conditions.iter().all(|c| {
                        check_with(c, &|operand| match operand {
                            Operand::Context => Some(value.clone()),
                            Operand::Text => Some(String::new()),
                            Operand::Attribute(_) => None,
                        })
                    })
                })
                .collect(),
        };
    }
    values
}

/// Concatenated descendant text.
pub(crate) fn string_value(node: &NodeRef<'_, Node>) -> String {
    node.descendants()
        .filter_map(|d| d.value().as_text().map(|t| t.to_string()))
        .collect()
}

fn attribute_items(
    document: &Html,
    context: &[NodeId],
    axis: Axis,
    name: Option<&str>,
    predicates: &[Predicate],
) -> Vec<XPathItem> {
    let mut items = Vec::new();
    for &id in context {
        let Some(current) = node(document, id) else {
            continue;
        };
        let owners: Vec<NodeRef<'_, Node>> = match axis {
            Axis::Child => vec![current],
            Axis::Descendant => self_and_descendants(current).collect(),
        };
        for owner in owners {
            let Some(element) = owner.value().as_element() else {
                continue;
            };
            let values: Vec<String> = match name {
                Some(name) => element.attr(name).map(str::to_string).into_iter().collect(),
                None => element.attrs().map(|(_, value)| value.to_string()).collect(),
            };
            items.extend(
                filter_values(values, predicates)
                    .into_iter()
                    .map(XPathItem::Attribute),
            );
        }
    }
    items
}

fn text_items(document: &Html, context: &[NodeId], step: &Step) -> Vec<XPathItem> {
    let mut items = Vec::new();
    for &id in context {
        let Some(current) = node(document, id) else {
            continue;
        };
        let groups: Vec<Vec<NodeRef<'_, Node>>> = match step.axis {
            Axis::Child => vec![current.children().filter(|n| n.value().is_text()).collect()],
            Axis::Descendant => self_and_descendants(current)
                .map(|d| d.children().filter(|n| n.value().is_text()).collect())
                .collect(),
        };
        for group in groups {
            items.extend(
                filter_predicates(group, &step.predicates)
                    .into_iter()
                    .filter_map(|n| n.value().as_text().map(|t| XPathItem::Text(t.to_string()))),
            );
        }
    }
    items
}

/// Outer markup of a selected element node.
pub(crate) fn outer_html(document: &Html, id: NodeId) -> Option<String> {
    node(document, id)
        .and_then(ElementRef::wrap)
        .map(|element| element.html())
}

/// Text content of a selected node.
pub(crate) fn node_text(document: &Html, id: NodeId) -> Option<String> {
    node(document, id).map(|n| match n.value().as_text() {
        Some(text) => text.to_string(),
        None => string_value(&n),
    })
}

/// An expression evaluated against its own copy of the markup.
#[derive(Debug, Clone)]
pub struct XPathMatch {
    document: Html,
    items: Vec<XPathItem>,
}

impl XPathMatch {
    /// Parse `content` and evaluate `expression`; invalid expressions match nothing.
    pub fn evaluate(content: &str, expression: &str) -> Self {
        let (document, full_document) = parse_markup(content);
        let items = match XPath::parse(expression) {
            Ok(path) => path.evaluate(&document, !full_document),
            Err(e) => {
                debug!("{e}");
                Vec::new()
            }
        };
        Self { document, items }
    }

    pub fn items(&self) -> &[XPathItem] {
        &self.items
    }

    fn item_text(&self, item: &XPathItem) -> Option<String> {
        match item {
            XPathItem::Node(id) => node_text(&self.document, *id),
            XPathItem::Attribute(value) | XPathItem::Text(value) => Some(value.clone()),
        }
    }

    fn item_html(&self, item: &XPathItem) -> Option<String> {
        match item {
            XPathItem::Node(id) => outer_html(&self.document, *id),
            XPathItem::Attribute(value) | XPathItem::Text(value) => Some(value.clone()),
        }
    }

    /// First selected attribute value.
    pub fn attr(&self) -> Option<String> {
        self.items.iter().find_map(|item| match item {
            XPathItem::Attribute(value) => Some(value.clone()),
            _ => None,
        })
    }

    /// Every selected attribute value, in document order.
    pub fn attrs(&self) -> Vec<String> {
        self.items
            .iter()
            .filter_map(|item| match item {
                XPathItem::Attribute(value) => Some(value.clone()),
                _ => None,
            })
            .collect()
    }

    /// Text of the first selected item.
    pub fn text(&self) -> Option<String> {
        self.items.first().and_then(|item| self.item_text(item))
    }

    pub fn outer_html(&self) -> Option<String> {
        self.items.first().and_then(|item| self.item_html(item))
    }

    /// Markup of every selected item.
    pub fn all_html(&self) -> Vec<String> {
        self.items
            .iter()
            .filter_map(|item| self.item_html(item))
            .collect()
    }
}
