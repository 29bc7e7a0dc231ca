//! Reading-anchor restore: selector, then snippet, then raw offset.

use tracing::debug;

use super::AnchorRecord;
use crate::core::config::AnchorConfig;
use crate::core::session::ShadowRootRegistry;
use crate::dom::{layout, Dom, NodeId, SelectorList};
use crate::expansion::traversal::{deep_query, deep_select};

/// Elements scanned when relocating an anchor by its text.
const TEXT_BEARING: &str = "p, div, span, li, article, section, blockquote, \
h1, h2, h3, h4, h5, h6, td, a";

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RestoreOutcome {
    NoRecord,
    /// The stored selector still resolved to a connected element.
    Selector { node: NodeId, scroll_y: f64 },
    /// The element was found again by its text.
    Snippet { node: NodeId, scroll_y: f64 },
    /// Nothing matched; the raw offset was reapplied.
    Offset { scroll_y: f64 },
}

impl RestoreOutcome {
    /// An element (not just an offset) was found.
    pub fn located(&self) -> bool {
        matches!(self, RestoreOutcome::Selector { .. } | RestoreOutcome::Snippet { .. })
    }

    pub fn scroll_y(&self) -> Option<f64> {
        match self {
            RestoreOutcome::NoRecord => None,
            RestoreOutcome::Selector { scroll_y, .. }
            | RestoreOutcome::Snippet { scroll_y, .. }
            | RestoreOutcome::Offset { scroll_y } => Some(*scroll_y),
        }
    }
}

/// Ranking policy for snippet relocation. Lower scores win; `None` rejects.
pub trait SnippetRanker {
    fn score(&self, text: &str, snippet: &str) -> Option<f64>;
}

/// Default policy: where the snippet starts inside the element's text plus a
/// weighted length difference, so the tightest element holding it wins over
/// the containers around it.
#[derive(Debug, Clone, Copy)]
pub struct PositionLengthRanker {
    pub length_weight: f64,
}

impl Default for PositionLengthRanker {
    fn default() -> Self {
        Self { length_weight: 0.25 }
    }
}

impl SnippetRanker for PositionLengthRanker {
    fn score(&self, text: &str, snippet: &str) -> Option<f64> {
        let byte_index = text.find(snippet)?;
        let index = text[..byte_index].chars().count() as f64;
        let diff = text.chars().count().abs_diff(snippet.chars().count()) as f64;
        Some(index + self.length_weight * diff)
    }
}

/// Relocate `record` in the page and scroll to it.
///
/// A selector hit that still holds the snippet wins. Otherwise the snippet
/// search runs, since positional selectors drift when siblings are injected.
/// A selector hit whose text changed (a live counter, an edit marker) is
/// still better than the raw offset, which is the last resort.
pub fn restore(
    dom: &mut Dom,
    record: &AnchorRecord,
    config: &AnchorConfig,
    registry: Option<&ShadowRootRegistry>,
    ranker: &dyn SnippetRanker,
) -> RestoreOutcome {
    layout::refresh(dom);
    let hits = selector_hits(dom, record, registry);
    if let Some(node) = hits
        .iter()
        .copied()
        .find(|node| dom.normalized_text(*node).contains(&record.snippet))
    {
        let scroll_y = scroll_to_anchor(dom, node, record, config);
        debug!("anchor restored by selector at {}", scroll_y);
        return RestoreOutcome::Selector { node, scroll_y };
    }
    if let Some(node) = by_snippet(dom, record, registry, ranker) {
        let scroll_y = scroll_to_anchor(dom, node, record, config);
        debug!("anchor restored by snippet at {}", scroll_y);
        return RestoreOutcome::Snippet { node, scroll_y };
    }
    if let Some(&node) = hits.first() {
        let scroll_y = scroll_to_anchor(dom, node, record, config);
        debug!("anchor restored by selector (text changed) at {}", scroll_y);
        return RestoreOutcome::Selector { node, scroll_y };
    }
    dom.scroll_to(record.scroll_y);
    debug!("anchor restored by raw offset at {}", dom.scroll_y());
    RestoreOutcome::Offset {
        scroll_y: dom.scroll_y(),
    }
}

/// Connected, rendered matches of the stored selector, in document order.
fn selector_hits(dom: &Dom, record: &AnchorRecord, registry: Option<&ShadowRootRegistry>) -> Vec<NodeId> {
    let Some(selector) = record.selector.as_deref() else {
        return Vec::new();
    };
    let top = dom.top_document();
    deep_query(dom, top, selector, registry, None)
        .unwrap_or_default()
        .into_iter()
        .filter(|node| in_top_layout(dom, *node) && dom.is_connected(*node))
        .collect()
}

fn by_snippet(
    dom: &Dom,
    record: &AnchorRecord,
    registry: Option<&ShadowRootRegistry>,
    ranker: &dyn SnippetRanker,
) -> Option<NodeId> {
    if record.snippet.is_empty() {
        return None;
    }
    let list = SelectorList::parse(TEXT_BEARING).ok()?;
    let top = dom.top_document();
    deep_select(dom, top, &list, registry, None)
        .into_iter()
        .filter(|node| in_top_layout(dom, *node))
        .filter_map(|node| {
            let score = ranker.score(&dom.normalized_text(node), &record.snippet)?;
            Some((node, score))
        })
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(node, _)| node)
}

/// Rendered and laid out in top-document coordinates (not inside an iframe).
fn in_top_layout(dom: &Dom, node: NodeId) -> bool {
    dom.owner_document(node) == dom.top_document() && !dom.rect(node).is_empty()
}

/// Scroll so `node`'s top sits where it sat at capture time.
fn scroll_to_anchor(dom: &mut Dom, node: NodeId, record: &AnchorRecord, config: &AnchorConfig) -> f64 {
    let offset = record
        .anchor_offset
        .unwrap_or(dom.viewport().height * config.offset_ratio);
    dom.scroll_to(dom.rect(node).y - offset);
    dom.scroll_y()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ranker_prefers_tight_early_match() {
        let ranker = PositionLengthRanker::default();
        let snippet = "El alcalde respondió";
        let tight = ranker.score("El alcalde respondió ayer", snippet).unwrap();
        let container = ranker
            .score("Comentarios (12) El alcalde respondió ayer. Otro comentario más largo", snippet)
            .unwrap();
        assert!(tight < container);
        assert!(ranker.score("nada que ver", snippet).is_none());
    }

    #[test]
    fn test_ranker_counts_chars_not_bytes() {
        let ranker = PositionLengthRanker { length_weight: 0.0 };
        assert_eq!(ranker.score("ñandú corre", "corre"), Some(6.0));
    }
}
