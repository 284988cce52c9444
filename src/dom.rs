use std::cell::RefCell;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ScanError;

pub type NodeId = usize;

/// Height assigned to a virtual row when a fixture omits scroll metrics.
const VIRTUAL_ROW_HEIGHT: f64 = 30.0;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    #[must_use]
    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    #[must_use]
    pub fn has_area(&self) -> bool {
        self.width > 0.0 && self.height > 0.0
    }
}

/// Capability object standing between the pipeline and a live document.
///
/// Reads are infallible; operations that poke the document (scrolling,
/// zooming, waiting for a re-render) can fail and must be treated as
/// strategy-local failures by callers.
pub trait DocumentAccessor {
    fn document_url(&self) -> String;
    fn root(&self) -> NodeId;
    /// Lowercase tag name.
    fn tag(&self, node: NodeId) -> String;
    fn attr(&self, node: NodeId, name: &str) -> Option<String>;
    /// Element children currently materialized, in document order.
    fn children(&self, node: NodeId) -> Vec<NodeId>;
    fn parent(&self, node: NodeId) -> Option<NodeId>;
    /// Direct text chunks of the node, element children excluded.
    fn text_chunks(&self, node: NodeId) -> Vec<String>;
    fn bounding_rect(&self, node: NodeId) -> Rect;
    fn style(&self, node: NodeId, property: &str) -> Option<String>;
    fn set_transient_style(&self, node: NodeId, property: &str, value: &str);
    fn clear_transient_style(&self, node: NodeId, property: &str);
    fn scroll_offset(&self, node: NodeId) -> f64;
    fn set_scroll_offset(&self, node: NodeId, offset: f64) -> Result<(), ScanError>;
    fn max_scroll(&self, node: NodeId) -> f64;
    fn zoom(&self) -> f64;
    fn set_zoom(&self, scale: f64) -> Result<(), ScanError>;
    /// Give the document time to re-render after a scroll or zoom change.
    fn settle(&self, wait: Duration) -> Result<(), ScanError>;
}

/// Pre-order descendants of `node`, excluding `node` itself. Only nodes
/// currently materialized are visited.
pub fn descendants(doc: &(impl DocumentAccessor + ?Sized), node: NodeId) -> Vec<NodeId> {
    let mut out = Vec::new();
    let mut stack = doc.children(node);
    stack.reverse();
    while let Some(current) = stack.pop() {
        out.push(current);
        let mut children = doc.children(current);
        children.reverse();
        stack.extend(children);
    }
    out
}

/// Concatenated text of a subtree, script and style subtrees excluded.
pub fn text_content(doc: &(impl DocumentAccessor + ?Sized), node: NodeId) -> String {
    fn walk(doc: &(impl DocumentAccessor + ?Sized), node: NodeId, out: &mut Vec<String>) {
        if matches!(doc.tag(node).as_str(), "script" | "style" | "noscript") {
            return;
        }
        for chunk in doc.text_chunks(node) {
            if !chunk.trim().is_empty() {
                out.push(chunk.trim().to_string());
            }
        }
        for child in doc.children(node) {
            walk(doc, child, out);
        }
    }

    let mut parts = Vec::new();
    walk(doc, node, &mut parts);
    parts.join(" ")
}

pub fn class_attr(doc: &(impl DocumentAccessor + ?Sized), node: NodeId) -> String {
    doc.attr(node, "class").unwrap_or_default()
}

pub fn class_list(doc: &(impl DocumentAccessor + ?Sized), node: NodeId) -> Vec<String> {
    class_attr(doc, node)
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

pub fn is_visible(doc: &(impl DocumentAccessor + ?Sized), node: NodeId) -> bool {
    if doc.style(node, "display").is_some_and(|value| value == "none") {
        return false;
    }
    !doc
        .style(node, "visibility")
        .is_some_and(|value| value == "hidden")
}

pub fn is_ancestor(
    doc: &(impl DocumentAccessor + ?Sized),
    ancestor: NodeId,
    node: NodeId,
) -> bool {
    let mut current = doc.parent(node);
    while let Some(parent) = current {
        if parent == ancestor {
            return true;
        }
        current = doc.parent(parent);
    }
    false
}

pub fn index_in_parent(doc: &(impl DocumentAccessor + ?Sized), node: NodeId) -> Option<usize> {
    let parent = doc.parent(node)?;
    doc.children(parent).iter().position(|&child| child == node)
}

pub fn is_scrollable(doc: &(impl DocumentAccessor + ?Sized), node: NodeId) -> bool {
    if doc.max_scroll(node) > 0.0 {
        return true;
    }
    ["overflow", "overflow-y"].iter().any(|property| {
        doc.style(node, property)
            .is_some_and(|value| value == "auto" || value == "scroll")
    })
}

/// Scrollable nodes on the path from `node` (inclusive) up to the root.
pub fn scrollable_ancestors(
    doc: &(impl DocumentAccessor + ?Sized),
    node: NodeId,
) -> Vec<NodeId> {
    let mut out = Vec::new();
    let mut current = Some(node);
    while let Some(candidate) = current {
        if is_scrollable(doc, candidate) {
            out.push(candidate);
        }
        current = doc.parent(candidate);
    }
    out
}

pub fn find_by_id(doc: &(impl DocumentAccessor + ?Sized), id: &str) -> Option<NodeId> {
    let root = doc.root();
    if doc.attr(root, "id").as_deref() == Some(id) {
        return Some(root);
    }
    descendants(doc, root)
        .into_iter()
        .find(|&node| doc.attr(node, "id").as_deref() == Some(id))
}

/// One node of a JSON document fixture.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixtureNode {
    pub tag: String,
    #[serde(default)]
    pub attrs: BTreeMap<String, String>,
    #[serde(default)]
    pub styles: BTreeMap<String, String>,
    /// Convenience single text chunk.
    #[serde(default)]
    pub text: Option<String>,
    /// Multiple direct text chunks, used when text nodes interleave.
    #[serde(default)]
    pub texts: Vec<String>,
    #[serde(default)]
    pub rect: Option<Rect>,
    #[serde(default)]
    pub scroll_max: Option<f64>,
    /// Marks the node as virtualized: only `window` of its children are
    /// materialized at a time, selected by the settled scroll offset.
    #[serde(default)]
    pub window: Option<usize>,
    #[serde(default)]
    pub children: Vec<FixtureNode>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fixture {
    #[serde(default = "default_fixture_url")]
    pub url: String,
    pub body: FixtureNode,
}

fn default_fixture_url() -> String {
    "https://example.test/".to_string()
}

#[derive(Debug, Clone)]
struct ScrollState {
    offset: f64,
    rendered_offset: f64,
    max: f64,
}

#[derive(Debug, Clone)]
struct SyntheticNode {
    tag: String,
    attrs: BTreeMap<String, String>,
    styles: BTreeMap<String, String>,
    transient_styles: BTreeMap<String, String>,
    texts: Vec<String>,
    rect: Rect,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    scroll: Option<ScrollState>,
    window: Option<usize>,
}

#[derive(Debug)]
struct DocState {
    url: String,
    nodes: Vec<SyntheticNode>,
    zoom: f64,
    rendered_zoom: f64,
    scroll_fail_above: Option<f64>,
}

/// In-memory document used by tests and the CLI. Scroll and zoom changes
/// only take effect on the materialized tree after `settle`, mirroring how
/// a real page re-renders asynchronously.
#[derive(Debug)]
pub struct SyntheticDocument {
    state: RefCell<DocState>,
}

impl SyntheticDocument {
    #[must_use]
    pub fn from_fixture(fixture: &Fixture) -> Self {
        let mut nodes = Vec::new();
        build_node(&fixture.body, None, &mut nodes);
        Self {
            state: RefCell::new(DocState {
                url: fixture.url.clone(),
                nodes,
                zoom: 1.0,
                rendered_zoom: 1.0,
                scroll_fail_above: None,
            }),
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self, ScanError> {
        let fixture: Fixture = serde_json::from_str(json)?;
        Ok(Self::from_fixture(&fixture))
    }

    pub fn from_json_file(path: &Path) -> Result<Self, ScanError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Test knob: any scroll past `threshold` fails, simulating a document
    /// that tears down its scroller mid-recovery.
    pub fn fail_scrolls_above(&self, threshold: f64) {
        self.state.borrow_mut().scroll_fail_above = Some(threshold);
    }

    /// Detaches a node from its parent, simulating a DOM mutation.
    pub fn remove_node(&self, node: NodeId) {
        let mut state = self.state.borrow_mut();
        if let Some(parent) = state.nodes[node].parent {
            state.nodes[parent].children.retain(|&child| child != node);
        }
        state.nodes[node].parent = None;
    }
}

fn build_node(
    fixture: &FixtureNode,
    parent: Option<NodeId>,
    nodes: &mut Vec<SyntheticNode>,
) -> NodeId {
    let id = nodes.len();
    let mut texts = Vec::new();
    if let Some(text) = &fixture.text {
        texts.push(text.clone());
    }
    texts.extend(fixture.texts.iter().cloned());

    nodes.push(SyntheticNode {
        tag: fixture.tag.to_ascii_lowercase(),
        attrs: fixture.attrs.clone(),
        styles: fixture.styles.clone(),
        transient_styles: BTreeMap::new(),
        texts,
        rect: fixture.rect.unwrap_or_default(),
        parent,
        children: Vec::new(),
        scroll: None,
        window: fixture.window,
    });

    for child in &fixture.children {
        let child_id = build_node(child, Some(id), nodes);
        nodes[id].children.push(child_id);
    }

    let child_count = nodes[id].children.len();
    let default_max = fixture.window.map(|window| {
        child_count.saturating_sub(window) as f64 * VIRTUAL_ROW_HEIGHT
    });
    if let Some(max) = fixture.scroll_max.or(default_max) {
        nodes[id].scroll = Some(ScrollState {
            offset: 0.0,
            rendered_offset: 0.0,
            max,
        });
    }

    id
}

impl DocumentAccessor for SyntheticDocument {
    fn document_url(&self) -> String {
        self.state.borrow().url.clone()
    }

    fn root(&self) -> NodeId {
        0
    }

    fn tag(&self, node: NodeId) -> String {
        self.state.borrow().nodes[node].tag.clone()
    }

    fn attr(&self, node: NodeId, name: &str) -> Option<String> {
        self.state.borrow().nodes[node].attrs.get(name).cloned()
    }

    fn children(&self, node: NodeId) -> Vec<NodeId> {
        let state = self.state.borrow();
        let entry = &state.nodes[node];
        let Some(window) = entry.window else {
            return entry.children.clone();
        };

        // Materialize the slice of children covered by the rendered
        // scroll offset; neighboring offsets overlap like a real
        // virtualized list re-rendering mid-scroll.
        let len = entry.children.len();
        let effective = if state.rendered_zoom < 1.0 {
            (window as f64 / state.rendered_zoom).ceil() as usize
        } else {
            window
        };
        if effective >= len {
            return entry.children.clone();
        }
        let start = match &entry.scroll {
            Some(scroll) if scroll.max > 0.0 => {
                let fraction = (scroll.rendered_offset / scroll.max).clamp(0.0, 1.0);
                (fraction * (len - effective) as f64).round() as usize
            }
            _ => 0,
        };
        entry.children[start..start + effective].to_vec()
    }

    fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.state.borrow().nodes[node].parent
    }

    fn text_chunks(&self, node: NodeId) -> Vec<String> {
        self.state.borrow().nodes[node].texts.clone()
    }

    fn bounding_rect(&self, node: NodeId) -> Rect {
        self.state.borrow().nodes[node].rect
    }

    fn style(&self, node: NodeId, property: &str) -> Option<String> {
        let state = self.state.borrow();
        let entry = &state.nodes[node];
        entry
            .transient_styles
            .get(property)
            .or_else(|| entry.styles.get(property))
            .cloned()
    }

    fn set_transient_style(&self, node: NodeId, property: &str, value: &str) {
        self.state.borrow_mut().nodes[node]
            .transient_styles
            .insert(property.to_string(), value.to_string());
    }

    fn clear_transient_style(&self, node: NodeId, property: &str) {
        self.state.borrow_mut().nodes[node]
            .transient_styles
            .remove(property);
    }

    fn scroll_offset(&self, node: NodeId) -> f64 {
        self.state.borrow().nodes[node]
            .scroll
            .as_ref()
            .map_or(0.0, |scroll| scroll.offset)
    }

    fn set_scroll_offset(&self, node: NodeId, offset: f64) -> Result<(), ScanError> {
        let mut state = self.state.borrow_mut();
        if state.scroll_fail_above.is_some_and(|limit| offset > limit) {
            return Err(ScanError::DocumentInteraction(format!(
                "scroll to {offset} rejected"
            )));
        }
        if let Some(scroll) = state.nodes[node].scroll.as_mut() {
            scroll.offset = offset.clamp(0.0, scroll.max);
        }
        Ok(())
    }

    fn max_scroll(&self, node: NodeId) -> f64 {
        self.state.borrow().nodes[node]
            .scroll
            .as_ref()
            .map_or(0.0, |scroll| scroll.max)
    }

    fn zoom(&self) -> f64 {
        self.state.borrow().zoom
    }

    fn set_zoom(&self, scale: f64) -> Result<(), ScanError> {
        if scale <= 0.0 {
            return Err(ScanError::DocumentInteraction(format!(
                "zoom scale {scale} rejected"
            )));
        }
        self.state.borrow_mut().zoom = scale;
        Ok(())
    }

    fn settle(&self, _wait: Duration) -> Result<(), ScanError> {
        let mut state = self.state.borrow_mut();
        state.rendered_zoom = state.zoom;
        for node in &mut state.nodes {
            if let Some(scroll) = node.scroll.as_mut() {
                scroll.rendered_offset = scroll.offset;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{DocumentAccessor, SyntheticDocument, descendants, is_ancestor, text_content};

    fn list_fixture(rows: usize, window: usize) -> SyntheticDocument {
        let children = (0..rows)
            .map(|index| format!(r#"{{"tag": "div", "text": "row {index}"}}"#))
            .collect::<Vec<_>>()
            .join(",");
        let json = format!(
            r#"{{"body": {{"tag": "body", "children": [
                {{"tag": "div", "window": {window}, "children": [{children}]}}
            ]}}}}"#
        );
        SyntheticDocument::from_json_str(&json).expect("fixture should parse")
    }

    #[test]
    fn windowed_children_shift_after_settle() {
        let doc = list_fixture(20, 5);
        let container = doc.children(doc.root())[0];
        assert_eq!(doc.children(container).len(), 5);
        let first_before = doc.children(container)[0];

        let max = doc.max_scroll(container);
        doc.set_scroll_offset(container, max).expect("scroll");
        // Not settled yet: the materialized window is unchanged.
        assert_eq!(doc.children(container)[0], first_before);

        doc.settle(Duration::ZERO).expect("settle");
        assert_ne!(doc.children(container)[0], first_before);
        assert_eq!(doc.children(container).len(), 5);
    }

    #[test]
    fn zoom_widens_the_materialized_window() {
        let doc = list_fixture(20, 5);
        let container = doc.children(doc.root())[0];
        doc.set_zoom(0.5).expect("zoom");
        doc.settle(Duration::ZERO).expect("settle");
        assert_eq!(doc.children(container).len(), 10);
    }

    #[test]
    fn text_content_skips_script_subtrees() {
        let doc = SyntheticDocument::from_json_str(
            r#"{"body": {"tag": "div", "text": "keep", "children": [
                {"tag": "script", "text": "drop()"}
            ]}}"#,
        )
        .expect("fixture should parse");
        assert_eq!(text_content(&doc, doc.root()), "keep");
    }

    #[test]
    fn ancestry_and_traversal() {
        let doc = list_fixture(3, 3);
        let container = doc.children(doc.root())[0];
        let row = doc.children(container)[0];
        assert!(is_ancestor(&doc, doc.root(), row));
        assert!(!is_ancestor(&doc, row, container));
        assert_eq!(descendants(&doc, doc.root()).len(), 4);
    }

    #[test]
    fn scroll_failure_knob_rejects_past_threshold() {
        let doc = list_fixture(20, 5);
        let container = doc.children(doc.root())[0];
        doc.fail_scrolls_above(100.0);
        assert!(doc.set_scroll_offset(container, 50.0).is_ok());
        assert!(doc.set_scroll_offset(container, 200.0).is_err());
    }
}
