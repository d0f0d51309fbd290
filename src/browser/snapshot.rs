//! Page snapshots
//!
//! A [`PageSnapshot`] is a pruned, viewport-scoped view of the DOM. Every
//! retained element gets a small integer handle that is only meaningful
//! together with the snapshot's [`HandleTable`]; nothing is written into
//! the page to make elements addressable.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Tags an agent can interact with
const INTERACTIVE_TAGS: &[&str] = &[
    "a", "button", "input", "select", "textarea", "option", "label", "summary", "details",
];

/// Tags that carry page structure or meaning
const SEMANTIC_TAGS: &[&str] = &[
    "h1", "h2", "h3", "h4", "h5", "h6", "nav", "main", "header", "footer", "article", "section",
    "aside", "form", "table", "thead", "tbody", "tr", "th", "td", "ul", "ol", "li", "img", "p",
    "dialog", "figure", "figcaption", "iframe",
];

/// Subtrees never descended into
const SKIPPED_TAGS: &[&str] = &[
    "script", "style", "noscript", "template", "head", "meta", "link", "title", "base", "svg",
];

/// Attributes that survive into the snapshot
const ALLOWED_ATTRIBUTES: &[&str] = &[
    "id", "name", "type", "value", "placeholder", "aria-label", "aria-expanded", "aria-checked",
    "role", "title", "alt", "href", "for", "checked", "disabled", "selected", "readonly",
    "required", "contenteditable", "label", "action", "method",
];

/// Attributes that make an element worth keeping on their own
const INFORMATIVE_ATTRIBUTES: &[&str] = &[
    "aria-label", "placeholder", "title", "alt", "role", "name", "href", "value",
];

/// Roles that make a generic element interactive
const INTERACTIVE_ROLES: &[&str] = &[
    "button", "link", "textbox", "searchbox", "checkbox", "radio", "combobox", "menuitem", "tab",
    "switch", "option",
];

/// Tags whose current value is read by `extract`
pub const FORM_CONTROL_TAGS: &[&str] = &["input", "textarea", "select"];

/// Axis-aligned rectangle in CSS pixels, viewport-relative
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self { x, y, width, height }
    }

    /// Bounding rectangle of a CDP quad `[x1,y1,...,x4,y4]`
    pub fn from_quad(quad: &[f64]) -> Option<Self> {
        if quad.len() < 8 {
            return None;
        }
        let xs = quad.iter().step_by(2);
        let ys = quad.iter().skip(1).step_by(2);
        let (min_x, max_x) = xs.fold((f64::MAX, f64::MIN), |(lo, hi), &v| (lo.min(v), hi.max(v)));
        let (min_y, max_y) = ys.fold((f64::MAX, f64::MIN), |(lo, hi), &v| (lo.min(v), hi.max(v)));
        Some(Self::new(min_x, min_y, max_x - min_x, max_y - min_y))
    }

    /// Strict overlap with positive area
    pub fn intersects(&self, other: &Rect) -> bool {
        self.width > 0.0
            && self.height > 0.0
            && other.width > 0.0
            && other.height > 0.0
            && self.x < other.x + other.width
            && self.x + self.width > other.x
            && self.y < other.y + other.height
            && self.y + self.height > other.y
    }

    /// Centre point
    pub fn center(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }
}

/// Layout viewport at capture time
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Viewport {
    pub width: f64,
    pub height: f64,
    pub scroll_x: f64,
    pub scroll_y: f64,
    pub scroll_max_x: f64,
    pub scroll_max_y: f64,
}

impl Viewport {
    /// The visible rectangle in viewport coordinates
    pub fn rect(&self) -> Rect {
        Rect::new(0.0, 0.0, self.width, self.height)
    }
}

/// One retained element
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementDescriptor {
    pub handle: u32,
    pub tag_name: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ElementDescriptor>,
}

impl ElementDescriptor {
    /// Attribute lookup
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    /// Depth-first search by handle
    pub fn find(&self, handle: u32) -> Option<&ElementDescriptor> {
        if self.handle == handle {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(handle))
    }

    /// Number of elements in this subtree
    pub fn count(&self) -> usize {
        1 + self.children.iter().map(ElementDescriptor::count).sum::<usize>()
    }

    /// Structural equality ignoring handle numbering
    pub fn same_structure(&self, other: &ElementDescriptor) -> bool {
        self.tag_name == other.tag_name
            && self.attributes == other.attributes
            && self.text == other.text
            && self.children.len() == other.children.len()
            && self
                .children
                .iter()
                .zip(&other.children)
                .all(|(a, b)| a.same_structure(b))
    }
}

/// Where a handle points in the live page
#[derive(Debug, Clone, PartialEq)]
pub struct HandleEntry {
    pub backend_node_id: i64,
    pub tag_name: String,
    pub bounds: Rect,
}

impl HandleEntry {
    pub fn is_form_control(&self) -> bool {
        FORM_CONTROL_TAGS.contains(&self.tag_name.as_str())
    }
}

/// Handle to live element mapping owned by one snapshot
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HandleTable {
    entries: HashMap<u32, HandleEntry>,
}

impl HandleTable {
    pub fn insert(&mut self, handle: u32, entry: HandleEntry) {
        self.entries.insert(handle, entry);
    }

    pub fn get(&self, handle: u32) -> Option<&HandleEntry> {
        self.entries.get(&handle)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A captured page state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageSnapshot {
    /// Capture sequence number; handles are valid only for the latest one
    pub generation: u64,
    pub url: String,
    pub title: String,
    pub timestamp: DateTime<Utc>,
    pub viewport: Viewport,
    pub dom_tree: ElementDescriptor,
    #[serde(skip)]
    pub handles: HandleTable,
}

impl PageSnapshot {
    /// Look up a retained element
    pub fn element(&self, handle: u32) -> Option<&ElementDescriptor> {
        self.dom_tree.find(handle)
    }

    /// Compact JSON of the tree for oracle requests
    pub fn to_prompt_json(&self) -> String {
        serde_json::json!({
            "url": self.url,
            "title": self.title,
            "viewport": self.viewport,
            "domTree": self.dom_tree,
        })
        .to_string()
    }
}

/// Monotonic snapshot counter shared by the sensor and the executor
#[derive(Debug, Clone, Default)]
pub struct Generations(Arc<AtomicU64>);

impl Generations {
    /// Allocate the next generation
    pub fn advance(&self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Latest allocated generation
    pub fn current(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

/// One node of `DOM.getFlattenedDocument`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawNode {
    pub node_id: i64,
    #[serde(default)]
    pub parent_id: Option<i64>,
    #[serde(default)]
    pub backend_node_id: i64,
    pub node_type: u32,
    #[serde(default)]
    pub node_name: String,
    #[serde(default)]
    pub local_name: String,
    #[serde(default)]
    pub node_value: String,
    #[serde(default)]
    pub attributes: Vec<String>,
}

const ELEMENT_NODE: u32 = 1;
const TEXT_NODE: u32 = 3;

impl RawNode {
    pub fn is_element(&self) -> bool {
        self.node_type == ELEMENT_NODE
    }

    /// Lower-case tag name
    pub fn tag(&self) -> String {
        if self.local_name.is_empty() {
            self.node_name.to_ascii_lowercase()
        } else {
            self.local_name.to_ascii_lowercase()
        }
    }

    fn attribute_pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attributes
            .chunks_exact(2)
            .map(|pair| (pair[0].as_str(), pair[1].as_str()))
    }
}

/// Parent to children index over a flattened document
#[derive(Debug, Default)]
pub struct DomIndex {
    nodes: Vec<RawNode>,
    by_id: HashMap<i64, usize>,
    children: HashMap<i64, Vec<usize>>,
}

impl DomIndex {
    /// Index nodes, keeping document order for children
    pub fn new(nodes: Vec<RawNode>) -> Self {
        let mut by_id = HashMap::with_capacity(nodes.len());
        let mut children: HashMap<i64, Vec<usize>> = HashMap::new();
        for (i, node) in nodes.iter().enumerate() {
            by_id.insert(node.node_id, i);
            if let Some(parent) = node.parent_id {
                children.entry(parent).or_default().push(i);
            }
        }
        Self {
            nodes,
            by_id,
            children,
        }
    }

    pub fn node(&self, node_id: i64) -> Option<&RawNode> {
        self.by_id.get(&node_id).map(|&i| &self.nodes[i])
    }

    /// Children in document order
    pub fn children(&self, node_id: i64) -> impl Iterator<Item = &RawNode> {
        self.children
            .get(&node_id)
            .into_iter()
            .flatten()
            .map(move |&i| &self.nodes[i])
    }

    /// Element children that are not in a skipped subtree
    pub fn element_children(&self, node_id: i64) -> impl Iterator<Item = &RawNode> {
        self.children(node_id)
            .filter(|n| n.is_element() && !SKIPPED_TAGS.contains(&n.tag().as_str()))
    }

    /// The `<html>` element, or the first element if there is none
    pub fn root_element(&self) -> Option<&RawNode> {
        self.nodes
            .iter()
            .find(|n| n.is_element() && n.tag() == "html")
            .or_else(|| self.nodes.iter().find(|n| n.is_element()))
    }

    /// Whitespace-collapsed text of direct text children
    fn own_text(&self, node_id: i64) -> String {
        let mut text = String::new();
        for child in self.children(node_id).filter(|n| n.node_type == TEXT_NODE) {
            for word in child.node_value.split_whitespace() {
                if !text.is_empty() {
                    text.push(' ');
                }
                text.push_str(word);
            }
        }
        text
    }
}

/// Bounds applied while building
#[derive(Debug, Clone, Copy)]
pub struct SnapshotLimits {
    pub text_limit: usize,
    pub attribute_limit: usize,
    pub max_depth: usize,
}

/// Truncate to `limit` characters
pub fn truncate_chars(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

struct Kept {
    node_id: i64,
    children: Vec<Kept>,
}

/// Builds the pruned tree and its handle table from probed geometry
pub struct SnapshotBuilder<'a> {
    index: &'a DomIndex,
    bounds: &'a HashMap<i64, Rect>,
    viewport: Rect,
    limits: SnapshotLimits,
}

impl<'a> SnapshotBuilder<'a> {
    /// `bounds` maps node id to viewport-relative border box
    pub fn new(
        index: &'a DomIndex,
        bounds: &'a HashMap<i64, Rect>,
        viewport: Rect,
        limits: SnapshotLimits,
    ) -> Self {
        Self {
            index,
            bounds,
            viewport,
            limits,
        }
    }

    /// Build from the root element, which is retained unconditionally
    pub fn build(&self) -> Option<(ElementDescriptor, HandleTable)> {
        let root = self.index.root_element()?;
        let children = self.keep_children(root.node_id, 1);
        let kept = Kept {
            node_id: root.node_id,
            children,
        };

        let mut table = HandleTable::default();
        let mut next = 1u32;
        let tree = self.emit(&kept, &mut next, &mut table);
        Some((tree, table))
    }

    fn is_visible(&self, node_id: i64) -> bool {
        self.bounds
            .get(&node_id)
            .is_some_and(|r| r.intersects(&self.viewport))
    }

    fn keep_children(&self, node_id: i64, depth: usize) -> Vec<Kept> {
        if depth > self.limits.max_depth {
            return Vec::new();
        }
        self.index
            .element_children(node_id)
            .filter(|n| self.is_visible(n.node_id))
            .filter_map(|n| self.keep(n, depth))
            .collect()
    }

    fn keep(&self, node: &RawNode, depth: usize) -> Option<Kept> {
        let children = self.keep_children(node.node_id, depth + 1);
        let tag = node.tag();
        let significant = is_interactive(&tag, node)
            || SEMANTIC_TAGS.contains(&tag.as_str())
            || node
                .attribute_pairs()
                .any(|(k, v)| INFORMATIVE_ATTRIBUTES.contains(&k) && !v.trim().is_empty());

        if !significant && children.is_empty() && self.index.own_text(node.node_id).is_empty() {
            return None;
        }
        Some(Kept {
            node_id: node.node_id,
            children,
        })
    }

    fn emit(&self, kept: &Kept, next: &mut u32, table: &mut HandleTable) -> ElementDescriptor {
        let handle = *next;
        *next += 1;

        // Indexed ids always resolve; the fallback only keeps this total
        let node = self.index.node(kept.node_id).cloned().unwrap_or_default();
        let tag_name = node.tag();

        table.insert(
            handle,
            HandleEntry {
                backend_node_id: node.backend_node_id,
                tag_name: tag_name.clone(),
                bounds: self.bounds.get(&kept.node_id).copied().unwrap_or_default(),
            },
        );

        let attributes = node
            .attribute_pairs()
            .filter(|(k, _)| ALLOWED_ATTRIBUTES.contains(k))
            .map(|(k, v)| (k.to_string(), truncate_chars(v, self.limits.attribute_limit)))
            .collect();

        let own = self.index.own_text(kept.node_id);
        let text = (!own.is_empty()).then(|| truncate_chars(&own, self.limits.text_limit));

        let children = kept
            .children
            .iter()
            .map(|c| self.emit(c, next, table))
            .collect();

        ElementDescriptor {
            handle,
            tag_name,
            attributes,
            text,
            children,
        }
    }
}

fn is_interactive(tag: &str, node: &RawNode) -> bool {
    if INTERACTIVE_TAGS.contains(&tag) {
        return true;
    }
    node.attribute_pairs().any(|(k, v)| match k {
        "role" => INTERACTIVE_ROLES.contains(&v),
        "contenteditable" => v.is_empty() || v == "true",
        "tabindex" => v.trim() != "-1",
        "onclick" => true,
        _ => false,
    })
}
