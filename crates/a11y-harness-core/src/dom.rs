//! Path-addressable HTML tree.
//!
//! [`Document`] is an arena of nodes addressed by [`NodeId`] handles. Handles
//! stay valid across every structural edit (a detached node keeps its slot),
//! so the remediation engine can hold references to several nodes while it
//! rewrites the tree around them.
//!
//! Parsing goes through the [`HtmlParser`] trait. The default
//! [`Html5everParser`] delegates to `scraper`, which applies the HTML5
//! error-recovery rules: any input, however malformed, yields a tree with
//! `html`, `head` and `body` elements. Audit and fix code only ever sees the
//! [`Document`] API.
//!
//! # Example
//!
//! ```rust
//! use a11y_harness_core::dom::Document;
//!
//! let mut doc = Document::parse("<p>Hello <b>world</b>");
//! let body = doc.body().unwrap();
//! let main = doc.create_element("main", &[]);
//! let p = doc.find_first(body, "p").unwrap();
//! doc.wrap(p, main);
//! assert_eq!(doc.text_content(main), "Hello world");
//! assert!(doc.to_html().contains("<main><p>Hello <b>world</b></p></main>"));
//! ```

use ego_tree::NodeRef;
use scraper::{Html, Node as ParsedNode};

/// Stable handle to a node inside a [`Document`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

/// An element's tag name and attributes, in source order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub name: String,
    pub attrs: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeData {
    Document,
    Doctype {
        name: String,
        public_id: String,
        system_id: String,
    },
    Element(Element),
    Text(String),
    Comment(String),
}

#[derive(Debug, Clone)]
struct Node {
    data: NodeData,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

/// Elements whose subtree never contributes visible text.
const INVISIBLE: &[&str] = &["script", "style", "noscript", "template"];

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param",
    "source", "track", "wbr",
];

/// Elements whose text children are serialized without escaping.
const RAW_TEXT: &[&str] = &[
    "script",
    "style",
    "xmp",
    "iframe",
    "noembed",
    "noframes",
    "plaintext",
    "noscript",
];

/// Turns markup into a [`Document`]. Implementations must never fail.
pub trait HtmlParser {
    fn parse(&self, html: &str) -> Document;
}

/// Parser backed by html5ever (via `scraper`).
#[derive(Debug, Clone, Copy, Default)]
pub struct Html5everParser;

impl HtmlParser for Html5everParser {
    fn parse(&self, html: &str) -> Document {
        let parsed = Html::parse_document(html);
        let mut doc = Document::empty();
        let root = doc.root();

        let mut stack: Vec<(NodeId, NodeRef<'_, ParsedNode>)> = parsed
            .tree
            .root()
            .children()
            .rev()
            .map(|child| (root, child))
            .collect();

        while let Some((parent, node)) = stack.pop() {
            let data = match node.value() {
                ParsedNode::Doctype(d) => NodeData::Doctype {
                    name: d.name().to_string(),
                    public_id: d.public_id().to_string(),
                    system_id: d.system_id().to_string(),
                },
                ParsedNode::Element(el) => NodeData::Element(Element {
                    name: el.name().to_string(),
                    attrs: el
                        .attrs
                        .iter()
                        .map(|(name, value)| {
                            // Keep prefixes such as `xlink:href` and `xml:lang`.
                            let local: &str = &name.local;
                            let qualified = match &name.prefix {
                                Some(prefix) => format!("{}:{}", prefix, local),
                                None => local.to_string(),
                            };
                            (qualified, String::from(&**value))
                        })
                        .collect(),
                }),
                ParsedNode::Text(t) => NodeData::Text(t.to_string()),
                ParsedNode::Comment(c) => NodeData::Comment(c.to_string()),
                _ => continue,
            };
            let id = doc.push(data);
            doc.append_child(parent, id);
            for child in node.children().rev() {
                stack.push((id, child));
            }
        }

        doc
    }
}

/// Arena-backed mutable HTML document.
#[derive(Debug, Clone)]
pub struct Document {
    nodes: Vec<Node>,
}

impl Document {
    /// A document containing only the root node.
    pub fn empty() -> Self {
        Self {
            nodes: vec![Node {
                data: NodeData::Document,
                parent: None,
                children: Vec::new(),
            }],
        }
    }

    /// Parse with the default [`Html5everParser`].
    pub fn parse(html: &str) -> Self {
        Html5everParser.parse(html)
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    fn push(&mut self, data: NodeData) -> NodeId {
        self.nodes.push(Node {
            data,
            parent: None,
            children: Vec::new(),
        });
        NodeId(self.nodes.len() - 1)
    }

    // ---------- navigation ----------

    pub fn data(&self, id: NodeId) -> &NodeData {
        &self.nodes[id.0].data
    }

    pub fn element(&self, id: NodeId) -> Option<&Element> {
        match &self.nodes[id.0].data {
            NodeData::Element(el) => Some(el),
            _ => None,
        }
    }

    fn element_mut(&mut self, id: NodeId) -> Option<&mut Element> {
        match &mut self.nodes[id.0].data {
            NodeData::Element(el) => Some(el),
            _ => None,
        }
    }

    pub fn tag_name(&self, id: NodeId) -> Option<&str> {
        self.element(id).map(|el| el.name.as_str())
    }

    pub fn is_element(&self, id: NodeId, name: &str) -> bool {
        self.tag_name(id) == Some(name)
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.0].parent
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id.0].children
    }

    pub fn element_children(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes[id.0]
            .children
            .iter()
            .copied()
            .filter(move |c| self.element(*c).is_some())
    }

    /// Pre-order traversal of every node below `id` (excluding `id`).
    pub fn descendants(&self, id: NodeId) -> Descendants<'_> {
        Descendants {
            doc: self,
            stack: self.nodes[id.0].children.iter().rev().copied().collect(),
        }
    }

    /// First descendant element of `from` with the given tag name.
    pub fn find_first(&self, from: NodeId, tag: &str) -> Option<NodeId> {
        self.descendants(from).find(|id| self.is_element(*id, tag))
    }

    /// The `<html>` element.
    pub fn document_element(&self) -> Option<NodeId> {
        self.element_children(self.root()).next()
    }

    pub fn head(&self) -> Option<NodeId> {
        let html = self.document_element()?;
        self.element_children(html)
            .find(|c| self.is_element(*c, "head"))
    }

    pub fn body(&self) -> Option<NodeId> {
        let html = self.document_element()?;
        self.element_children(html)
            .find(|c| self.is_element(*c, "body"))
    }

    /// True when `node` is `ancestor` or lies below it.
    pub fn contains(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut cur = Some(node);
        while let Some(id) = cur {
            if id == ancestor {
                return true;
            }
            cur = self.parent(id);
        }
        false
    }

    /// Whether the node is still reachable from the root.
    pub fn is_attached(&self, id: NodeId) -> bool {
        self.contains(self.root(), id)
    }

    // ---------- attributes ----------

    pub fn attr(&self, id: NodeId, name: &str) -> Option<&str> {
        self.element(id)?
            .attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Attribute value trimmed, with `""` standing in for a missing attribute.
    pub fn attr_trimmed(&self, id: NodeId, name: &str) -> &str {
        self.attr(id, name).map(str::trim).unwrap_or("")
    }

    pub fn set_attr(&mut self, id: NodeId, name: &str, value: &str) {
        if let Some(el) = self.element_mut(id) {
            match el.attrs.iter_mut().find(|(k, _)| k == name) {
                Some((_, v)) => *v = value.to_string(),
                None => el.attrs.push((name.to_string(), value.to_string())),
            }
        }
    }

    pub fn remove_attr(&mut self, id: NodeId, name: &str) {
        if let Some(el) = self.element_mut(id) {
            el.attrs.retain(|(k, _)| k != name);
        }
    }

    /// Change an element's tag name, keeping attributes and children.
    pub fn rename(&mut self, id: NodeId, name: &str) {
        if let Some(el) = self.element_mut(id) {
            el.name = name.to_ascii_lowercase();
        }
    }

    // ---------- structural edits ----------

    /// Create a detached element.
    pub fn create_element(&mut self, name: &str, attrs: &[(&str, &str)]) -> NodeId {
        self.push(NodeData::Element(Element {
            name: name.to_ascii_lowercase(),
            attrs: attrs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }))
    }

    /// Create a detached text node.
    pub fn create_text(&mut self, text: &str) -> NodeId {
        self.push(NodeData::Text(text.to_string()))
    }

    /// Remove a node (and its subtree) from its parent. The handle stays valid.
    pub fn detach(&mut self, id: NodeId) {
        if let Some(parent) = self.nodes[id.0].parent.take() {
            self.nodes[parent.0].children.retain(|c| *c != id);
        }
    }

    pub fn append_child(&mut self, parent: NodeId, child: NodeId) {
        self.detach(child);
        self.nodes[child.0].parent = Some(parent);
        self.nodes[parent.0].children.push(child);
    }

    /// Insert `child` at `index` among `parent`'s children (clamped).
    pub fn insert_child(&mut self, parent: NodeId, index: usize, child: NodeId) {
        self.detach(child);
        let children = &mut self.nodes[parent.0].children;
        let index = index.min(children.len());
        children.insert(index, child);
        self.nodes[child.0].parent = Some(parent);
    }

    /// Insert `node` immediately before `reference`. Returns false when
    /// `reference` has no parent.
    pub fn insert_before(&mut self, reference: NodeId, node: NodeId) -> bool {
        if reference == node {
            return false;
        }
        self.detach(node);
        let Some(parent) = self.parent(reference) else {
            return false;
        };
        let index = self.position(parent, reference);
        self.insert_child(parent, index, node);
        true
    }

    /// Put `wrapper` where `target` is and move `target` inside it.
    pub fn wrap(&mut self, target: NodeId, wrapper: NodeId) -> bool {
        if !self.insert_before(target, wrapper) {
            return false;
        }
        self.append_child(wrapper, target);
        true
    }

    /// Replace all children of `id` with a single text node.
    pub fn set_text(&mut self, id: NodeId, text: &str) {
        let children = std::mem::take(&mut self.nodes[id.0].children);
        for child in children {
            self.nodes[child.0].parent = None;
        }
        let text_node = self.create_text(text);
        self.append_child(id, text_node);
    }

    fn position(&self, parent: NodeId, child: NodeId) -> usize {
        self.nodes[parent.0]
            .children
            .iter()
            .position(|c| *c == child)
            .unwrap_or(self.nodes[parent.0].children.len())
    }

    // ---------- text ----------

    /// Visible text below `id`: script/style/noscript/template content and
    /// comments are skipped, text nodes are joined with a space, and
    /// whitespace runs collapse to one space.
    pub fn text_content(&self, id: NodeId) -> String {
        let mut pieces: Vec<&str> = Vec::new();
        let mut stack = vec![id];
        while let Some(cur) = stack.pop() {
            match &self.nodes[cur.0].data {
                NodeData::Text(t) => pieces.push(t),
                NodeData::Element(el) if INVISIBLE.contains(&el.name.as_str()) => {}
                NodeData::Element(_) | NodeData::Document => {
                    stack.extend(self.nodes[cur.0].children.iter().rev().copied());
                }
                _ => {}
            }
        }
        collapse_whitespace(&pieces.join(" "))
    }

    // ---------- serialization ----------

    /// Serialize the whole document.
    pub fn to_html(&self) -> String {
        let mut out = String::new();
        for child in self.children(self.root()) {
            self.serialize_into(*child, &mut out);
        }
        out
    }

    /// Serialize one node including its own tags.
    pub fn outer_html(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.serialize_into(id, &mut out);
        out
    }

    fn serialize_into(&self, id: NodeId, out: &mut String) {
        enum Step {
            Open(NodeId),
            Close(NodeId),
        }

        let mut stack = vec![Step::Open(id)];
        while let Some(step) = stack.pop() {
            match step {
                Step::Close(node) => {
                    if let Some(el) = self.element(node) {
                        out.push_str("</");
                        out.push_str(&el.name);
                        out.push('>');
                    }
                }
                Step::Open(node) => match &self.nodes[node.0].data {
                    NodeData::Document => {
                        for child in self.children(node).iter().rev() {
                            stack.push(Step::Open(*child));
                        }
                    }
                    NodeData::Doctype {
                        name,
                        public_id,
                        system_id,
                    } => {
                        out.push_str("<!DOCTYPE ");
                        out.push_str(name);
                        if !public_id.is_empty() {
                            out.push_str(" PUBLIC \"");
                            out.push_str(public_id);
                            out.push('"');
                            if !system_id.is_empty() {
                                out.push_str(" \"");
                                out.push_str(system_id);
                                out.push('"');
                            }
                        } else if !system_id.is_empty() {
                            out.push_str(" SYSTEM \"");
                            out.push_str(system_id);
                            out.push('"');
                        }
                        out.push('>');
                    }
                    NodeData::Comment(c) => {
                        out.push_str("<!--");
                        out.push_str(c);
                        out.push_str("-->");
                    }
                    NodeData::Text(t) => {
                        let raw = self
                            .parent(node)
                            .and_then(|p| self.tag_name(p))
                            .is_some_and(|name| RAW_TEXT.contains(&name));
                        if raw {
                            out.push_str(t);
                        } else {
                            escape_text(t, out);
                        }
                    }
                    NodeData::Element(el) => {
                        out.push('<');
                        out.push_str(&el.name);
                        for (k, v) in &el.attrs {
                            out.push(' ');
                            out.push_str(k);
                            out.push_str("=\"");
                            escape_attr(v, out);
                            out.push('"');
                        }
                        out.push('>');
                        if VOID_ELEMENTS.contains(&el.name.as_str()) {
                            continue;
                        }
                        stack.push(Step::Close(node));
                        for child in self.children(node).iter().rev() {
                            stack.push(Step::Open(*child));
                        }
                    }
                },
            }
        }
    }
}

/// Pre-order iterator returned by [`Document::descendants`].
pub struct Descendants<'a> {
    doc: &'a Document,
    stack: Vec<NodeId>,
}

impl Iterator for Descendants<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let id = self.stack.pop()?;
        self.stack
            .extend(self.doc.nodes[id.0].children.iter().rev().copied());
        Some(id)
    }
}

/// Collapse whitespace runs to single spaces and trim.
pub fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn escape_text(s: &str, out: &mut String) {
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\u{a0}' => out.push_str("&nbsp;"),
            _ => out.push(c),
        }
    }
}

fn escape_attr(s: &str, out: &mut String) {
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '\u{a0}' => out.push_str("&nbsp;"),
            _ => out.push(c),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_always_has_skeleton() {
        for input in ["", "plain text", "<div><p>unclosed", "</b></i>>>"] {
            let doc = Document::parse(input);
            assert!(doc.document_element().is_some(), "no html for {:?}", input);
            assert!(doc.head().is_some(), "no head for {:?}", input);
            assert!(doc.body().is_some(), "no body for {:?}", input);
        }
    }

    #[test]
    fn test_malformed_nesting_recovers() {
        let doc = Document::parse("<p>one<p>two<div>three</span>");
        let body = doc.body().unwrap();
        let paragraphs: Vec<_> = doc
            .descendants(body)
            .filter(|id| doc.is_element(*id, "p"))
            .collect();
        assert_eq!(paragraphs.len(), 2);
        assert_eq!(doc.text_content(body), "one two three");
    }

    #[test]
    fn test_text_content_skips_invisible() {
        let doc = Document::parse(
            "<body><p>Visible<script>var x = 1;</script><style>p{}</style> text<!-- hidden --></p></body>",
        );
        let p = doc.find_first(doc.root(), "p").unwrap();
        assert_eq!(doc.text_content(p), "Visible text");
    }

    #[test]
    fn test_attributes() {
        let mut doc = Document::parse(r#"<a href=" /x " title="T">go</a>"#);
        let a = doc.find_first(doc.root(), "a").unwrap();
        assert_eq!(doc.attr(a, "href"), Some(" /x "));
        assert_eq!(doc.attr_trimmed(a, "href"), "/x");
        assert_eq!(doc.attr_trimmed(a, "aria-label"), "");

        doc.set_attr(a, "title", "New");
        doc.set_attr(a, "aria-label", "Label");
        assert_eq!(doc.attr(a, "title"), Some("New"));
        assert_eq!(doc.attr(a, "aria-label"), Some("Label"));

        doc.remove_attr(a, "title");
        assert_eq!(doc.attr(a, "title"), None);
    }

    #[test]
    fn test_wrap_keeps_position_and_handles() {
        let mut doc = Document::parse("<body><p>a</p><div id=t>b</div><p>c</p></body>");
        let body = doc.body().unwrap();
        let target = doc.find_first(body, "div").unwrap();
        let main = doc.create_element("main", &[]);
        assert!(doc.wrap(target, main));

        assert_eq!(doc.parent(target), Some(main));
        assert_eq!(doc.parent(main), Some(body));
        assert_eq!(
            doc.outer_html(body),
            r#"<body><p>a</p><main><div id="t">b</div></main><p>c</p></body>"#
        );
    }

    #[test]
    fn test_wrap_detached_target_fails() {
        let mut doc = Document::parse("<p>a</p>");
        let orphan = doc.create_element("div", &[]);
        let main = doc.create_element("main", &[]);
        assert!(!doc.wrap(orphan, main));
    }

    #[test]
    fn test_rename_and_set_text() {
        let mut doc = Document::parse("<h3 class=x>Old <em>title</em></h3>");
        let h = doc.find_first(doc.root(), "h3").unwrap();
        doc.rename(h, "H2");
        doc.set_text(h, "New & improved");
        assert_eq!(doc.outer_html(h), r#"<h2 class="x">New &amp; improved</h2>"#);
    }

    #[test]
    fn test_insert_child_and_detach() {
        let mut doc = Document::parse("<head><title>t</title></head>");
        let head = doc.head().unwrap();
        let base = doc.create_element("base", &[("href", "https://e.org/")]);
        doc.insert_child(head, 0, base);
        assert_eq!(doc.children(head)[0], base);
        assert!(doc.is_attached(base));

        doc.detach(base);
        assert!(!doc.is_attached(base));
        assert_eq!(doc.attr(base, "href"), Some("https://e.org/"));
    }

    #[test]
    fn test_serialization_rules() {
        let doc = Document::parse(
            r#"<!DOCTYPE html><html><head><script>if (a < b) {}</script></head><body><img src="a.png" alt='say "hi"'><br><p>1 &lt; 2</p></body></html>"#,
        );
        let html = doc.to_html();
        assert!(html.starts_with("<!DOCTYPE html><html>"));
        assert!(html.contains("<script>if (a < b) {}</script>"));
        assert!(html.contains(r#"<img src="a.png" alt="say &quot;hi&quot;">"#));
        assert!(!html.contains("</img>"));
        assert!(!html.contains("</br>"));
        assert!(html.contains("<p>1 &lt; 2</p>"));
    }

    #[test]
    fn test_prefixed_attributes_and_doctype_ids_kept() {
        let input = r##"<!DOCTYPE html PUBLIC "-//W3C//DTD XHTML 1.0 Strict//EN" "http://www.w3.org/TR/xhtml1/DTD/xhtml1-strict.dtd"><html><body><svg><use xlink:href="#icon"></use></svg></body></html>"##;
        let doc = Document::parse(input);
        let used = doc.find_first(doc.root(), "use").unwrap();
        assert_eq!(doc.attr(used, "xlink:href"), Some("#icon"));
        assert_eq!(doc.attr(used, "href"), None);

        let html = doc.to_html();
        assert!(html.starts_with(
            r#"<!DOCTYPE html PUBLIC "-//W3C//DTD XHTML 1.0 Strict//EN" "http://www.w3.org/TR/xhtml1/DTD/xhtml1-strict.dtd">"#
        ));
        assert!(html.contains(r##"<use xlink:href="#icon">"##));
    }

    #[test]
    fn test_reparse_roundtrip_stable() {
        let input = r#"<html lang="en"><head><title>T</title></head><body><main><h1>A</h1><p>b <a href="/c">c</a></p></main></body></html>"#;
        let once = Document::parse(input).to_html();
        let twice = Document::parse(&once).to_html();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_deep_nesting_does_not_overflow() {
        let depth = 5000;
        let html = format!("{}x{}", "<div>".repeat(depth), "</div>".repeat(depth));
        let doc = Document::parse(&html);
        let body = doc.body().unwrap();
        assert_eq!(doc.text_content(body), "x");
        assert!(doc.to_html().contains('x'));
    }
}
