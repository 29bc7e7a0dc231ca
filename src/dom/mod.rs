//! In-process page model.
//!
//! This module is the **host page** every other part of the crate talks to:
//! * An append-only node arena spanning the top document, iframe documents and
//!   shadow roots (node ids are never reused, so identity sets stay sound).
//! * Per-element attributes, inline style, a layout rectangle and disclosure state.
//! * The window viewport (size + vertical scroll offset) and visibility state.
//! * Event listeners with bubbling dispatch and browser default actions.
//! * Mutation observers with per-observer record queues and `Notify` wake-ups.
//! * A page-event stream (scroll, visibility, history, shadow attachment, …).
//!
//! Shared ownership is `Rc<RefCell<Dom>>` ([`SharedDom`]): the whole engine is
//! single-threaded and cooperative, so callers never hold a borrow across an
//! `.await`.

pub mod events;
pub mod html;
pub mod layout;
pub mod selector;

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

use tokio::sync::{mpsc, Notify};
use url::Url;

use crate::core::error::DomError;
pub use events::{listener, DomEvent, EventKind, Listener, MutationRecord, PageEvent, Visibility};
pub use selector::SelectorList;

pub type SharedDom = Rc<RefCell<Dom>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Layout box in document coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }

    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    pub fn contains_point(&self, x: f64, y: f64) -> bool {
        !self.is_empty() && x >= self.x && x < self.right() && y >= self.y && y < self.bottom()
    }

    pub fn intersects(&self, other: &Rect) -> bool {
        self.x < other.right()
            && other.x < self.right()
            && self.y < other.bottom()
            && other.y < self.bottom()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShadowMode {
    Open,
    Closed,
}

#[derive(Debug, Clone)]
pub struct DocumentData {
    pub url: Url,
    /// The `<iframe>` element hosting this document, `None` for the top document.
    pub frame_element: Option<NodeId>,
}

#[derive(Debug, Clone)]
pub struct ElementData {
    pub tag: String,
    pub attrs: BTreeMap<String, String>,
    pub rect: Rect,
    pub shadow_root: Option<NodeId>,
    pub content_document: Option<NodeId>,
    pub checked: bool,
    pub playing: bool,
}

#[derive(Debug, Clone)]
pub enum NodeKind {
    Document(DocumentData),
    Element(ElementData),
    Text(String),
    ShadowRoot { host: NodeId, mode: ShadowMode },
}

#[derive(Debug, Clone)]
struct Node {
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    owner: Option<NodeId>,
    kind: NodeKind,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub width: f64,
    pub height: f64,
    pub scroll_y: f64,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1280.0,
            height: 800.0,
            scroll_y: 0.0,
        }
    }
}

struct ObserverSlot {
    scope: NodeId,
    records: Vec<MutationRecord>,
    notify: Rc<Notify>,
    connected: bool,
}

/// Handle returned by [`Dom::observe`]. Dropping it does **not** disconnect;
/// call [`Dom::disconnect`] explicitly (mirrors `MutationObserver.disconnect()`).
#[derive(Clone)]
pub struct MutationObserverHandle {
    pub id: usize,
    pub notify: Rc<Notify>,
}

pub struct Dom {
    nodes: Vec<Node>,
    top: NodeId,
    viewport: Viewport,
    visibility: Visibility,
    listeners: HashMap<(NodeId, EventKind), Vec<Listener>>,
    observers: Vec<ObserverSlot>,
    page_subscribers: Vec<mpsc::UnboundedSender<PageEvent>>,
    event_log: Vec<(NodeId, EventKind)>,
    navigations: Vec<String>,
    auto_layout: bool,
    layout_dirty: bool,
}

impl Dom {
    /// Create a page whose top document lives at `url`.
    pub fn new(url: Url) -> Self {
        let mut dom = Self {
            nodes: Vec::new(),
            top: NodeId(0),
            viewport: Viewport::default(),
            visibility: Visibility::Visible,
            listeners: HashMap::new(),
            observers: Vec::new(),
            page_subscribers: Vec::new(),
            event_log: Vec::new(),
            navigations: Vec::new(),
            auto_layout: false,
            layout_dirty: false,
        };
        dom.top = dom.push_node(
            None,
            NodeKind::Document(DocumentData {
                url,
                frame_element: None,
            }),
        );
        dom
    }

    pub fn shared(self) -> SharedDom {
        Rc::new(RefCell::new(self))
    }

    fn push_node(&mut self, owner: Option<NodeId>, kind: NodeKind) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            parent: None,
            children: Vec::new(),
            owner,
            kind,
        });
        id
    }

    // ── Identity & kind ──────────────────────────────────────────────────────

    pub fn top_document(&self) -> NodeId {
        self.top
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn kind(&self, node: NodeId) -> &NodeKind {
        &self.nodes[node.0].kind
    }

    pub fn is_element(&self, node: NodeId) -> bool {
        matches!(self.kind(node), NodeKind::Element(_))
    }

    pub fn is_document(&self, node: NodeId) -> bool {
        matches!(self.kind(node), NodeKind::Document(_))
    }

    pub fn is_shadow_root(&self, node: NodeId) -> bool {
        matches!(self.kind(node), NodeKind::ShadowRoot { .. })
    }

    /// Documents and shadow roots: the trees a plain selector query is scoped to.
    pub fn is_scope_root(&self, node: NodeId) -> bool {
        self.is_document(node) || self.is_shadow_root(node)
    }

    pub fn element(&self, node: NodeId) -> Option<&ElementData> {
        match &self.nodes[node.0].kind {
            NodeKind::Element(el) => Some(el),
            _ => None,
        }
    }

    fn element_mut(&mut self, node: NodeId) -> Result<&mut ElementData, DomError> {
        match &mut self.nodes[node.0].kind {
            NodeKind::Element(el) => Ok(el),
            _ => Err(DomError::NotAnElement(node.0)),
        }
    }

    pub fn tag(&self, node: NodeId) -> Option<&str> {
        self.element(node).map(|el| el.tag.as_str())
    }

    pub fn has_tag(&self, node: NodeId, tag: &str) -> bool {
        self.tag(node) == Some(tag)
    }

    /// The document this node belongs to (itself for a document).
    pub fn owner_document(&self, node: NodeId) -> NodeId {
        self.nodes[node.0].owner.unwrap_or(node)
    }

    pub fn document_url(&self, doc: NodeId) -> Option<&Url> {
        match self.kind(self.owner_document(doc)) {
            NodeKind::Document(data) => Some(&data.url),
            _ => None,
        }
    }

    /// `<html>`-equivalent: first element child of a document.
    pub fn document_element(&self, doc: NodeId) -> Option<NodeId> {
        self.nodes[doc.0]
            .children
            .iter()
            .copied()
            .find(|c| self.is_element(*c))
    }

    pub fn body(&self, doc: NodeId) -> Option<NodeId> {
        let html = self.document_element(doc)?;
        self.children(html)
            .iter()
            .copied()
            .find(|c| self.has_tag(*c, "body"))
            .or(Some(html))
    }

    // ── Tree structure ───────────────────────────────────────────────────────

    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.nodes[node.0].parent
    }

    /// Parent only when it is an element (stops at documents and shadow roots).
    pub fn parent_element(&self, node: NodeId) -> Option<NodeId> {
        self.parent(node).filter(|p| self.is_element(*p))
    }

    /// Parent in the composed tree: a shadow root's parent is its host.
    pub fn composed_parent(&self, node: NodeId) -> Option<NodeId> {
        match self.kind(node) {
            NodeKind::ShadowRoot { host, .. } => Some(*host),
            _ => self.parent(node),
        }
    }

    pub fn children(&self, node: NodeId) -> &[NodeId] {
        &self.nodes[node.0].children
    }

    pub fn element_children(&self, node: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.children(node)
            .iter()
            .copied()
            .filter(|c| self.is_element(*c))
    }

    /// Light-tree descendants of `node` in pre-order (excluding `node`).
    /// Does not enter shadow roots or frame documents.
    pub fn descendants(&self, node: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.children(node).iter().rev().copied().collect();
        while let Some(next) = stack.pop() {
            out.push(next);
            stack.extend(self.children(next).iter().rev().copied());
        }
        out
    }

    /// 1-based position among element siblings.
    pub fn element_index(&self, node: NodeId) -> usize {
        let Some(parent) = self.parent(node) else {
            return 1;
        };
        self.element_children(parent)
            .position(|c| c == node)
            .map(|i| i + 1)
            .unwrap_or(1)
    }

    pub fn is_connected(&self, node: NodeId) -> bool {
        let mut cursor = node;
        loop {
            if self.is_document(cursor) {
                return true;
            }
            match self.composed_parent(cursor) {
                Some(next) => cursor = next,
                None => return false,
            }
        }
    }

    /// `node` is `ancestor` or sits below it, crossing shadow boundaries but not frames.
    pub fn is_composed_descendant(&self, node: NodeId, ancestor: NodeId) -> bool {
        let mut cursor = Some(node);
        while let Some(current) = cursor {
            if current == ancestor {
                return true;
            }
            cursor = self.composed_parent(current);
        }
        false
    }

    // ── Construction ─────────────────────────────────────────────────────────

    pub fn create_element(&mut self, doc: NodeId, tag: &str) -> NodeId {
        let owner = self.owner_document(doc);
        self.push_node(
            Some(owner),
            NodeKind::Element(ElementData {
                tag: tag.to_ascii_lowercase(),
                attrs: BTreeMap::new(),
                rect: Rect::default(),
                shadow_root: None,
                content_document: None,
                checked: false,
                playing: false,
            }),
        )
    }

    pub fn create_text(&mut self, doc: NodeId, text: &str) -> NodeId {
        let owner = self.owner_document(doc);
        self.push_node(Some(owner), NodeKind::Text(text.to_string()))
    }

    /// Create the document shown by an `<iframe>` element.
    pub fn create_frame_document(
        &mut self,
        frame: NodeId,
        url: Url,
    ) -> Result<NodeId, DomError> {
        let doc = self.push_node(
            None,
            NodeKind::Document(DocumentData {
                url,
                frame_element: Some(frame),
            }),
        );
        self.element_mut(frame)?.content_document = Some(doc);
        Ok(doc)
    }

    /// Attach a shadow root to `host` and announce it on the page-event stream.
    pub fn attach_shadow(&mut self, host: NodeId, mode: ShadowMode) -> Result<NodeId, DomError> {
        let owner = self.owner_document(host);
        self.element_mut(host)?;
        let root = self.push_node(Some(owner), NodeKind::ShadowRoot { host, mode });
        self.element_mut(host)?.shadow_root = Some(root);
        self.emit(PageEvent::ShadowRootAttached(root));
        Ok(root)
    }

    /// `element.shadowRoot`: closed roots are not reachable from their host.
    pub fn shadow_root(&self, host: NodeId) -> Option<NodeId> {
        let root = self.element(host)?.shadow_root?;
        match self.kind(root) {
            NodeKind::ShadowRoot {
                mode: ShadowMode::Open,
                ..
            } => Some(root),
            _ => None,
        }
    }

    /// Every shadow root attached so far, open or closed, in attachment order.
    /// This is the view of a binding that hooks root attachment from page start.
    pub fn attached_shadow_roots(&self) -> Vec<NodeId> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, node)| matches!(node.kind, NodeKind::ShadowRoot { .. }))
            .map(|(i, _)| NodeId(i))
            .collect()
    }

    /// `iframe.contentDocument`, failing for cross-origin frames.
    pub fn content_document(&self, frame: NodeId) -> Result<Option<NodeId>, DomError> {
        let Some(child) = self.element(frame).and_then(|el| el.content_document) else {
            return Ok(None);
        };
        let (Some(parent_url), Some(child_url)) =
            (self.document_url(frame), self.document_url(child))
        else {
            return Ok(None);
        };
        if parent_url.origin() != child_url.origin() {
            return Err(DomError::CrossOrigin {
                frame: parent_url.origin().ascii_serialization(),
            });
        }
        Ok(Some(child))
    }

    // ── Mutation ─────────────────────────────────────────────────────────────

    fn detach(&mut self, child: NodeId) -> Option<NodeId> {
        let parent = self.nodes[child.0].parent.take()?;
        self.nodes[parent.0].children.retain(|c| *c != child);
        Some(parent)
    }

    pub fn append_child(&mut self, parent: NodeId, child: NodeId) {
        if let Some(old) = self.detach(child) {
            self.record_mutation(old, Vec::new(), vec![child]);
        }
        self.nodes[child.0].parent = Some(parent);
        self.nodes[parent.0].children.push(child);
        self.record_mutation(parent, vec![child], Vec::new());
    }

    pub fn insert_before(&mut self, parent: NodeId, child: NodeId, reference: NodeId) {
        if let Some(old) = self.detach(child) {
            self.record_mutation(old, Vec::new(), vec![child]);
        }
        let pos = self.nodes[parent.0]
            .children
            .iter()
            .position(|c| *c == reference)
            .unwrap_or(self.nodes[parent.0].children.len());
        self.nodes[child.0].parent = Some(parent);
        self.nodes[parent.0].children.insert(pos, child);
        self.record_mutation(parent, vec![child], Vec::new());
    }

    pub fn remove(&mut self, node: NodeId) {
        if let Some(parent) = self.detach(node) {
            self.record_mutation(parent, Vec::new(), vec![node]);
        }
    }

    pub fn replace_with(&mut self, old: NodeId, replacement: NodeId) {
        let Some(parent) = self.parent(old) else {
            return;
        };
        self.detach(replacement);
        let pos = self.nodes[parent.0]
            .children
            .iter()
            .position(|c| *c == old)
            .unwrap_or(0);
        self.nodes[old.0].parent = None;
        self.nodes[parent.0].children[pos] = replacement;
        self.nodes[replacement.0].parent = Some(parent);
        self.record_mutation(parent, vec![replacement], vec![old]);
    }

    /// `element.textContent = text`.
    pub fn set_text(&mut self, node: NodeId, text: &str) {
        let removed: Vec<NodeId> = self.nodes[node.0].children.drain(..).collect();
        for child in &removed {
            self.nodes[child.0].parent = None;
        }
        let text_node = self.create_text(node, text);
        self.nodes[text_node.0].parent = Some(node);
        self.nodes[node.0].children.push(text_node);
        self.record_mutation(node, vec![text_node], removed);
    }

    // ── Attributes, classes, inline style ───────────────────────────────────

    pub fn attr(&self, node: NodeId, name: &str) -> Option<&str> {
        self.element(node)?.attrs.get(name).map(String::as_str)
    }

    pub fn has_attr(&self, node: NodeId, name: &str) -> bool {
        self.attr(node, name).is_some()
    }

    pub fn set_attr(&mut self, node: NodeId, name: &str, value: &str) -> Result<(), DomError> {
        self.element_mut(node)?
            .attrs
            .insert(name.to_ascii_lowercase(), value.to_string());
        self.layout_dirty = true;
        Ok(())
    }

    pub fn remove_attr(&mut self, node: NodeId, name: &str) -> Result<(), DomError> {
        self.element_mut(node)?.attrs.remove(name);
        self.layout_dirty = true;
        Ok(())
    }

    pub fn classes(&self, node: NodeId) -> impl Iterator<Item = &str> + '_ {
        self.attr(node, "class")
            .unwrap_or_default()
            .split_ascii_whitespace()
    }

    pub fn has_class(&self, node: NodeId, class: &str) -> bool {
        self.classes(node).any(|c| c == class)
    }

    pub fn remove_class(&mut self, node: NodeId, class: &str) -> Result<(), DomError> {
        let kept: Vec<String> = self
            .classes(node)
            .filter(|c| *c != class)
            .map(str::to_string)
            .collect();
        self.set_attr(node, "class", &kept.join(" "))
    }

    /// Inline `style` declarations as ordered `(property, value)` pairs.
    pub fn inline_style(&self, node: NodeId) -> Vec<(String, String)> {
        self.attr(node, "style")
            .unwrap_or_default()
            .split(';')
            .filter_map(|decl| {
                let (prop, value) = decl.split_once(':')?;
                let prop = prop.trim().to_ascii_lowercase();
                if prop.is_empty() {
                    return None;
                }
                Some((prop, value.trim().to_string()))
            })
            .collect()
    }

    pub fn style_property(&self, node: NodeId, property: &str) -> Option<String> {
        self.inline_style(node)
            .into_iter()
            .rev()
            .find(|(p, _)| p == property)
            .map(|(_, v)| v)
    }

    pub fn set_style_property(
        &mut self,
        node: NodeId,
        property: &str,
        value: &str,
    ) -> Result<(), DomError> {
        let mut decls = self.inline_style(node);
        decls.retain(|(p, _)| p != property);
        decls.push((property.to_string(), value.to_string()));
        let css = decls
            .iter()
            .map(|(p, v)| format!("{p}: {v}"))
            .collect::<Vec<_>>()
            .join("; ");
        self.set_attr(node, "style", &css)
    }

    /// Hidden by markup: `hidden` attribute or inline `display: none`.
    pub fn is_hidden_by_markup(&self, node: NodeId) -> bool {
        self.has_attr(node, "hidden")
            || self
                .style_property(node, "display")
                .is_some_and(|d| d.eq_ignore_ascii_case("none"))
    }

    // ── Disclosure & media state ────────────────────────────────────────────

    pub fn is_checked(&self, node: NodeId) -> bool {
        self.element(node).is_some_and(|el| el.checked)
    }

    pub fn set_checked(&mut self, node: NodeId, checked: bool) -> Result<(), DomError> {
        self.element_mut(node)?.checked = checked;
        Ok(())
    }

    pub fn is_playing(&self, node: NodeId) -> bool {
        self.element(node).is_some_and(|el| el.playing)
    }

    pub fn set_playing(&mut self, node: NodeId, playing: bool) -> Result<(), DomError> {
        self.element_mut(node)?.playing = playing;
        Ok(())
    }

    // ── Text ─────────────────────────────────────────────────────────────────

    /// Concatenated light-tree text, skipping `<script>`/`<style>` bodies.
    pub fn text_content(&self, node: NodeId) -> String {
        let mut out = String::new();
        self.collect_text(node, &mut out);
        out
    }

    fn collect_text(&self, node: NodeId, out: &mut String) {
        match self.kind(node) {
            NodeKind::Text(text) => out.push_str(text),
            NodeKind::Element(el) if matches!(el.tag.as_str(), "script" | "style") => {}
            _ => {
                for child in self.children(node) {
                    self.collect_text(*child, out);
                }
            }
        }
    }

    /// Text content with whitespace runs collapsed and trimmed.
    pub fn normalized_text(&self, node: NodeId) -> String {
        normalize_text(&self.text_content(node))
    }

    // ── Geometry & viewport ─────────────────────────────────────────────────

    pub fn rect(&self, node: NodeId) -> Rect {
        self.element(node).map(|el| el.rect).unwrap_or_default()
    }

    pub fn set_rect(&mut self, node: NodeId, rect: Rect) -> Result<(), DomError> {
        self.element_mut(node)?.rect = rect;
        Ok(())
    }

    /// `getBoundingClientRect()`: top-document boxes are shifted by the scroll offset.
    pub fn bounding_client_rect(&self, node: NodeId) -> Rect {
        let mut rect = self.rect(node);
        if self.owner_document(node) == self.top {
            rect.y -= self.viewport.scroll_y;
        }
        rect
    }

    /// Let [`layout::refresh`] recompute boxes after mutations. Pages built
    /// from markup turn this on; hand-built pages keep the rects they were given.
    pub fn set_auto_layout(&mut self, on: bool) {
        self.auto_layout = on;
    }

    /// Boxes are stale: auto layout is on and the tree or an attribute changed.
    pub fn needs_layout(&self) -> bool {
        self.auto_layout && self.layout_dirty
    }

    pub(crate) fn mark_laid_out(&mut self) {
        self.layout_dirty = false;
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    pub fn set_viewport_size(&mut self, width: f64, height: f64) {
        self.viewport.width = width;
        self.viewport.height = height;
    }

    pub fn scroll_y(&self) -> f64 {
        self.viewport.scroll_y
    }

    /// Tallest box bottom in the top document.
    pub fn scroll_height(&self) -> f64 {
        self.descendants(self.top)
            .into_iter()
            .map(|n| self.rect(n).bottom())
            .fold(self.viewport.height, f64::max)
    }

    pub fn max_scroll_y(&self) -> f64 {
        (self.scroll_height() - self.viewport.height).max(0.0)
    }

    /// `window.scrollTo(0, y)`; clamps and emits a scroll event when the offset changes.
    pub fn scroll_to(&mut self, y: f64) {
        let clamped = y.clamp(0.0, self.max_scroll_y());
        if (clamped - self.viewport.scroll_y).abs() < f64::EPSILON {
            return;
        }
        self.viewport.scroll_y = clamped;
        self.emit(PageEvent::Scroll { y: clamped });
    }

    pub fn scroll_by(&mut self, dy: f64) {
        self.scroll_to(self.viewport.scroll_y + dy);
    }

    /// Deepest rendered element of the top document under a viewport point.
    pub fn element_from_point(&self, x: f64, y: f64) -> Option<NodeId> {
        let doc_y = y + self.viewport.scroll_y;
        let mut hit = None;
        let mut stack = vec![self.top];
        while let Some(node) = stack.pop() {
            if self.is_element(node) && self.rect(node).contains_point(x, doc_y) {
                hit = Some(node);
            }
            let mut next: Vec<NodeId> = self.children(node).to_vec();
            if let Some(root) = self.element(node).and_then(|el| el.shadow_root) {
                next.insert(0, root);
            }
            stack.extend(next.into_iter().rev());
        }
        hit
    }

    // ── Page lifecycle (emits page events) ──────────────────────────────────

    pub fn visibility(&self) -> Visibility {
        self.visibility
    }

    pub fn set_visibility(&mut self, visibility: Visibility) {
        if self.visibility != visibility {
            self.visibility = visibility;
            self.emit(PageEvent::VisibilityChange(visibility));
        }
    }

    pub fn focus_window(&mut self) {
        self.emit(PageEvent::Focus);
    }

    pub fn page_show(&mut self, persisted: bool) {
        self.emit(PageEvent::PageShow { persisted });
    }

    pub fn before_unload(&mut self) {
        self.emit(PageEvent::BeforeUnload);
    }

    pub fn location(&self) -> &Url {
        match &self.nodes[self.top.0].kind {
            NodeKind::Document(data) => &data.url,
            _ => unreachable!("top node is always a document"),
        }
    }

    fn set_location(&mut self, url: Url) {
        if let NodeKind::Document(data) = &mut self.nodes[self.top.0].kind {
            data.url = url;
        }
    }

    /// `history.pushState(…, url)` as a soft navigation.
    pub fn push_state(&mut self, url: Url) {
        self.set_location(url.clone());
        self.emit(PageEvent::HistoryPush(url));
    }

    pub fn replace_state(&mut self, url: Url) {
        self.set_location(url.clone());
        self.emit(PageEvent::HistoryReplace(url));
    }

    pub fn pop_state(&mut self, url: Url) {
        self.set_location(url.clone());
        self.emit(PageEvent::PopState(url));
    }

    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<PageEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.page_subscribers.push(tx);
        rx
    }

    fn emit(&mut self, event: PageEvent) {
        self.page_subscribers
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    // ── Mutation observers ───────────────────────────────────────────────────

    /// Observe child-list mutations anywhere below `scope` (shadow trees included).
    pub fn observe(&mut self, scope: NodeId) -> MutationObserverHandle {
        let notify = Rc::new(Notify::new());
        self.observers.push(ObserverSlot {
            scope,
            records: Vec::new(),
            notify: Rc::clone(&notify),
            connected: true,
        });
        MutationObserverHandle {
            id: self.observers.len() - 1,
            notify,
        }
    }

    pub fn take_records(&mut self, observer: &MutationObserverHandle) -> Vec<MutationRecord> {
        self.observers
            .get_mut(observer.id)
            .map(|slot| std::mem::take(&mut slot.records))
            .unwrap_or_default()
    }

    pub fn disconnect(&mut self, observer: &MutationObserverHandle) {
        if let Some(slot) = self.observers.get_mut(observer.id) {
            slot.connected = false;
            slot.records.clear();
        }
    }

    pub fn is_observing(&self, observer: &MutationObserverHandle) -> bool {
        self.observers
            .get(observer.id)
            .is_some_and(|slot| slot.connected)
    }

    fn record_mutation(&mut self, target: NodeId, added: Vec<NodeId>, removed: Vec<NodeId>) {
        self.layout_dirty = true;
        let interested: Vec<usize> = self
            .observers
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.connected)
            .filter(|(_, slot)| self.is_composed_descendant(target, slot.scope))
            .map(|(i, _)| i)
            .collect();
        for i in interested {
            let slot = &mut self.observers[i];
            slot.records.push(MutationRecord {
                target,
                added: added.clone(),
                removed: removed.clone(),
            });
            slot.notify.notify_one();
        }
    }

    // ── Events ───────────────────────────────────────────────────────────────

    pub fn add_listener(&mut self, node: NodeId, kind: EventKind, listener: Listener) {
        self.listeners.entry((node, kind)).or_default().push(listener);
    }

    /// Dispatch a bubbling event at `target` through the composed tree, then run
    /// the browser default action.
    ///
    /// Every listener runs even if an earlier one fails; the first failure is
    /// reported after the default action has run.
    pub fn dispatch(&mut self, target: NodeId, kind: EventKind) -> Result<(), DomError> {
        let event = DomEvent {
            kind: kind.clone(),
            target,
        };
        self.event_log.push((target, kind.clone()));

        let mut path = vec![target];
        let mut cursor = self.composed_parent(target);
        while let Some(node) = cursor {
            path.push(node);
            cursor = self.composed_parent(node);
        }

        let mut first_error = None;
        for node in path {
            let listeners = self
                .listeners
                .get(&(node, kind.clone()))
                .cloned()
                .unwrap_or_default();
            for listener in listeners {
                if let Err(e) = listener(self, &event) {
                    first_error.get_or_insert(e);
                }
            }
        }

        if kind == EventKind::Click {
            self.run_click_default(target);
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn run_click_default(&mut self, target: NodeId) {
        if self.has_tag(target, "summary") {
            if let Some(details) = self.parent(target).filter(|p| self.has_tag(*p, "details")) {
                if self.has_attr(details, "open") {
                    let _ = self.remove_attr(details, "open");
                } else {
                    let _ = self.set_attr(details, "open", "");
                }
            }
            return;
        }
        if self.has_tag(target, "a") {
            if let Some(href) = self.attr(target, "href").map(str::to_string) {
                if is_navigable_href(&href) {
                    self.navigations.push(href);
                }
            }
        }
    }

    pub fn event_log(&self) -> &[(NodeId, EventKind)] {
        &self.event_log
    }

    pub fn events_for(&self, node: NodeId) -> Vec<EventKind> {
        self.event_log
            .iter()
            .filter(|(n, _)| *n == node)
            .map(|(_, k)| k.clone())
            .collect()
    }

    /// Navigations triggered by clicks on real links.
    pub fn navigations(&self) -> &[String] {
        &self.navigations
    }

    // ── Selectors ────────────────────────────────────────────────────────────

    pub fn query_selector_all(&self, scope: NodeId, selector: &str) -> Result<Vec<NodeId>, DomError> {
        let list = SelectorList::parse(selector)?;
        Ok(self.select(scope, &list))
    }

    pub fn query_selector(&self, scope: NodeId, selector: &str) -> Result<Option<NodeId>, DomError> {
        Ok(self.query_selector_all(scope, selector)?.into_iter().next())
    }

    /// Elements of `scope`'s light tree matching a pre-parsed selector list.
    pub fn select(&self, scope: NodeId, list: &SelectorList) -> Vec<NodeId> {
        self.descendants(scope)
            .into_iter()
            .filter(|n| self.is_element(*n) && list.matches(self, *n))
            .collect()
    }

    pub fn matches(&self, node: NodeId, selector: &str) -> Result<bool, DomError> {
        let list = SelectorList::parse(selector)?;
        Ok(self.is_element(node) && list.matches(self, node))
    }
}

/// Anything other than empty, in-page (`#…`) or `javascript:` hrefs navigates.
pub fn is_navigable_href(href: &str) -> bool {
    let href = href.trim();
    !(href.is_empty()
        || href.starts_with('#')
        || href
            .get(..11)
            .is_some_and(|p| p.eq_ignore_ascii_case("javascript:")))
}

/// Collapse whitespace runs to single spaces and trim.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
