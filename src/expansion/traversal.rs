//! Deep traversal across shadow roots and same-origin iframes.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::core::error::DomError;
use crate::core::session::ShadowRootRegistry;
use crate::dom::{Dom, NodeId, SelectorList};

/// Lazy, finite, single-use walk over every node reachable from a root.
///
/// Reaches: light-tree children, open shadow roots through their host, closed
/// (or otherwise undiscoverable) shadow roots through the registry, and the
/// documents of same-origin iframes. Cross-origin frames are opaque leaves.
/// Each node is yielded exactly once; order is depth-first pre-order.
pub struct DeepWalk<'a> {
    dom: &'a Dom,
    stack: Vec<NodeId>,
    seen: HashSet<NodeId>,
    registered: HashMap<NodeId, Vec<NodeId>>,
}

impl<'a> DeepWalk<'a> {
    pub fn new(dom: &'a Dom, root: NodeId, registry: Option<&ShadowRootRegistry>) -> Self {
        let mut registered: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
        for shadow in registry.map(|r| r.roots()).unwrap_or_default() {
            if let Some(host) = dom.composed_parent(*shadow) {
                registered.entry(host).or_default().push(*shadow);
            }
        }
        Self {
            dom,
            stack: vec![root],
            seen: HashSet::new(),
            registered,
        }
    }
}

impl Iterator for DeepWalk<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        while let Some(node) = self.stack.pop() {
            if !self.seen.insert(node) {
                continue;
            }
            let dom = self.dom;
            let mut next: Vec<NodeId> = Vec::new();

            if dom.is_element(node) {
                if let Some(root) = dom.shadow_root(node) {
                    next.push(root);
                }
                if let Some(roots) = self.registered.get(&node) {
                    next.extend(roots.iter().copied());
                }
                if dom.has_tag(node, "iframe") {
                    match dom.content_document(node) {
                        Ok(Some(doc)) => next.push(doc),
                        Ok(None) => {}
                        Err(DomError::CrossOrigin { .. }) => {}
                        Err(e) => debug!("frame {} skipped: {}", node, e),
                    }
                }
            }
            next.extend(dom.children(node).iter().copied());

            self.stack.extend(next.into_iter().rev());
            return Some(node);
        }
        None
    }
}

/// Every tree root reachable from `document`: the document itself, same-origin
/// iframe documents and shadow roots (open or registered), in traversal order.
pub fn all_roots(dom: &Dom, document: NodeId, registry: &ShadowRootRegistry) -> Vec<NodeId> {
    let mut roots: Vec<NodeId> = DeepWalk::new(dom, document, Some(registry))
        .filter(|n| dom.is_scope_root(*n))
        .collect();
    // Registered roots whose host is not under this document (e.g. in a detached
    // widget that is re-attached later) are still worth a look while connected.
    for root in registry.roots() {
        if !roots.contains(root) && dom.is_connected(*root) {
            roots.push(*root);
        }
    }
    roots
}

/// Apply a selector to every tree visited from `root` and union the results.
///
/// Stops once `limit` matches are collected.
pub fn deep_select(
    dom: &Dom,
    root: NodeId,
    selector: &SelectorList,
    registry: Option<&ShadowRootRegistry>,
    limit: Option<usize>,
) -> Vec<NodeId> {
    let limit = limit.unwrap_or(usize::MAX);
    let mut out = Vec::new();
    let mut seen = HashSet::new();

    if dom.is_element(root) && selector.matches(dom, root) {
        seen.insert(root);
        out.push(root);
    }

    for node in DeepWalk::new(dom, root, registry) {
        if out.len() >= limit {
            break;
        }
        if node != root && !dom.is_scope_root(node) {
            continue;
        }
        for hit in dom.select(node, selector) {
            if seen.insert(hit) {
                out.push(hit);
                if out.len() >= limit {
                    break;
                }
            }
        }
    }
    out
}

/// [`deep_select`] with a selector string.
pub fn deep_query(
    dom: &Dom,
    root: NodeId,
    selector: &str,
    registry: Option<&ShadowRootRegistry>,
    limit: Option<usize>,
) -> Result<Vec<NodeId>, DomError> {
    let list = SelectorList::parse(selector)?;
    Ok(deep_select(dom, root, &list, registry, limit))
}
