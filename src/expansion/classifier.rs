//! Expand-control detection.
//!
//! A node is a candidate when it is rendered (and, in viewport-only mode, near
//! the viewport) and either its label matches a locale pattern or it carries a
//! structural disclosure signal. Safety is judged separately so unsafe matches
//! can be counted without ever being activated.

use std::collections::HashSet;
use std::sync::OnceLock;

use aho_corasick::AhoCorasick;
use tracing::warn;

use super::patterns::PatternTable;
use super::traversal::deep_select;
use crate::core::config::ExpansionConfig;
use crate::core::session::ShadowRootRegistry;
use crate::core::types::MatchKind;
use crate::dom::{is_navigable_href, Dom, NodeId, NodeKind, Rect, SelectorList};

/// Elements worth classifying. Vendor selectors are appended at build time.
const CANDIDATE_SELECTOR: &str = concat!(
    "button, a, summary, [role=\"button\"], [tabindex], [aria-expanded=\"false\"], ",
    "input[type=\"checkbox\"], input[type=\"radio\"], div, span"
);

/// Containers whose content is clipped by a class or line clamp.
const TRUNCATION_SELECTOR: &str = concat!(
    "[class*=\"truncate\" i], [class*=\"collapsed\" i], [class*=\"clamp\" i], ",
    "[style*=\"line-clamp\" i], [style*=\"max-height\" i]"
);

/// Whole id/class tokens that mark an ad slot.
const AD_TOKENS: &[&str] = &[
    "ad",
    "ads",
    "advert",
    "adverts",
    "advertisement",
    "advertising",
    "sponsor",
    "sponsored",
    "promoted",
];

/// Substrings of id/class values used by common ad networks.
const AD_SIGNATURES: &[&str] = &[
    "adsbygoogle",
    "google_ads",
    "googleads",
    "doubleclick",
    "taboola",
    "outbrain",
    "adslot",
    "adunit",
    "adsense",
    "criteo",
    "teads",
    "mgid",
];

static AD_REGION_MATCHER: OnceLock<AhoCorasick> = OnceLock::new();

fn ad_region_matcher() -> &'static AhoCorasick {
    AD_REGION_MATCHER.get_or_init(|| {
        AhoCorasick::builder()
            .ascii_case_insensitive(true)
            .build(AD_SIGNATURES)
            .expect("valid ad-region signatures")
    })
}

/// Tags that are natively activatable.
const CLICKABLE_TAGS: &[&str] = &["button", "a", "summary", "input", "select"];

/// Generic containers: a text match on one of these is only trusted when it does
/// not wrap a real control (otherwise the control itself is the candidate).
const CONTAINER_TAGS: &[&str] = &["div", "span", "li", "p", "section", "article"];

/// Ancestor levels searched when resolving a match to its activatable element.
const RESOLVE_DEPTH: usize = 4;

#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    /// Node whose label or structure matched.
    pub node: NodeId,
    /// Node that actually receives the activation sequence.
    pub target: NodeId,
    pub matched: MatchKind,
    pub label: String,
    pub is_safe: bool,
}

impl Candidate {
    pub fn is_disclosure_input(&self) -> bool {
        self.matched == MatchKind::DisclosureInput
    }
}

pub struct Classifier {
    labels: PatternTable,
    replies: PatternTable,
    vendor: Vec<SelectorList>,
    reply_vendor: Vec<SelectorList>,
    candidates: SelectorList,
    truncation: SelectorList,
    expand_replies: bool,
    max_label_chars: usize,
    viewport_only: bool,
    viewport_margin: f64,
    query_limit: usize,
}

impl Classifier {
    pub fn new(config: &ExpansionConfig) -> Self {
        let vendor = parse_all(&config.vendor_selectors);
        let reply_vendor = parse_all(&config.reply_vendor_selectors);

        let mut candidate_source = CANDIDATE_SELECTOR.to_string();
        for list in vendor.iter().chain(reply_vendor.iter()) {
            candidate_source.push_str(", ");
            candidate_source.push_str(list.source());
        }
        let candidates = SelectorList::parse(&candidate_source)
            .or_else(|_| SelectorList::parse(CANDIDATE_SELECTOR))
            .unwrap_or_default();
        let truncation = SelectorList::parse(TRUNCATION_SELECTOR).unwrap_or_default();

        Self {
            labels: PatternTable::compile(&config.patterns),
            replies: PatternTable::compile_list("reply", &config.reply_patterns),
            vendor,
            reply_vendor,
            candidates,
            truncation,
            expand_replies: config.expand_replies,
            max_label_chars: config.max_label_chars,
            viewport_only: config.viewport_only,
            viewport_margin: config.viewport_margin_px,
            query_limit: config.query_limit,
        }
    }

    /// Visible label: normalized text, `aria-label` and `title`.
    pub fn label(&self, dom: &Dom, node: NodeId) -> String {
        let mut parts = vec![dom.normalized_text(node)];
        for attr in ["aria-label", "title"] {
            if let Some(value) = dom.attr(node, attr) {
                parts.push(crate::dom::normalize_text(value));
            }
        }
        parts.retain(|p| !p.is_empty());
        parts.join(" ")
    }

    /// Why `node` looks like an expand control, ignoring visibility and safety.
    pub fn match_kind(&self, dom: &Dom, node: NodeId) -> Option<MatchKind> {
        let tag = dom.tag(node)?;

        if tag == "summary"
            && dom
                .parent(node)
                .is_some_and(|p| dom.has_tag(p, "details") && !dom.has_attr(p, "open"))
        {
            return Some(MatchKind::ClosedDetails);
        }
        if tag == "input" {
            return self.is_disclosure_input(dom, node).then_some(MatchKind::DisclosureInput);
        }
        if dom.attr(node, "aria-expanded") == Some("false") {
            return Some(MatchKind::AriaCollapsed);
        }

        for list in &self.reply_vendor {
            if list.matches(dom, node) {
                return self.expand_replies.then(|| MatchKind::ReplyVendor {
                    selector: list.source().to_string(),
                });
            }
        }
        for list in &self.vendor {
            if list.matches(dom, node) {
                return Some(MatchKind::Vendor {
                    selector: list.source().to_string(),
                });
            }
        }

        let label = self.label(dom, node);
        if label.is_empty() || label.chars().count() > self.max_label_chars {
            return None;
        }
        if self.replies.is_match(&label) {
            // A reply toggle that also reads like "ver más" stays a reply toggle.
            return self.expand_replies.then_some(MatchKind::ReplyLabel);
        }
        let locale = self.labels.find(&label)?;
        if CONTAINER_TAGS.contains(&tag) && self.wraps_control(dom, node) {
            return None;
        }
        Some(MatchKind::Label {
            locale: locale.to_string(),
        })
    }

    /// Unchecked checkbox/radio outside a form: the CSS-only disclosure idiom.
    fn is_disclosure_input(&self, dom: &Dom, node: NodeId) -> bool {
        let is_toggle = dom
            .attr(node, "type")
            .is_some_and(|t| t.eq_ignore_ascii_case("checkbox") || t.eq_ignore_ascii_case("radio"));
        if !is_toggle || dom.is_checked(node) || dom.has_attr(node, "disabled") {
            return false;
        }
        let mut cursor = dom.parent_element(node);
        while let Some(ancestor) = cursor {
            if dom.has_tag(ancestor, "form") {
                return false;
            }
            cursor = dom.parent_element(ancestor);
        }
        true
    }

    fn wraps_control(&self, dom: &Dom, node: NodeId) -> bool {
        dom.descendants(node).into_iter().any(|d| is_clickable(dom, d))
    }

    /// Rendered with a non-empty box and not hidden by markup on the way up.
    /// In viewport-only mode the box must also intersect the margin-expanded
    /// viewport (frame documents have no shared coordinates and always pass).
    pub fn is_visible(&self, dom: &Dom, node: NodeId) -> bool {
        if dom.rect(node).is_empty() {
            return false;
        }
        let mut cursor = Some(node);
        while let Some(current) = cursor {
            if dom.is_element(current) && dom.is_hidden_by_markup(current) {
                return false;
            }
            cursor = dom.composed_parent(current);
        }
        if !self.viewport_only || dom.owner_document(node) != dom.top_document() {
            return true;
        }
        let viewport = dom.viewport();
        let area = Rect::new(
            -self.viewport_margin,
            -self.viewport_margin,
            viewport.width + 2.0 * self.viewport_margin,
            viewport.height + 2.0 * self.viewport_margin,
        );
        dom.bounding_client_rect(node).intersects(&area)
    }

    /// Classify one node. `None` when it is not a visible expand control.
    pub fn classify(&self, dom: &Dom, node: NodeId) -> Option<Candidate> {
        let matched = self.match_kind(dom, node)?;
        if !self.is_visible(dom, node) {
            return None;
        }
        let target = resolve_target(dom, node);
        let is_safe = is_safe(dom, node) && (target == node || is_safe(dom, target));
        Some(Candidate {
            node,
            target,
            label: self.label(dom, node),
            matched,
            is_safe,
        })
    }

    /// Candidates in every scope root, deduplicated by activation target.
    pub fn collect(&self, dom: &Dom, roots: &[NodeId]) -> Vec<Candidate> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        'roots: for root in roots {
            for node in dom.select(*root, &self.candidates) {
                if out.len() >= self.query_limit {
                    break 'roots;
                }
                if let Some(candidate) = self.classify(dom, node) {
                    if seen.insert(candidate.target) {
                        out.push(candidate);
                    }
                }
            }
        }
        drop_enclosing(dom, out)
    }

    /// Candidates inside a freshly added subtree (deep, registry-aware).
    pub fn collect_under(
        &self,
        dom: &Dom,
        subtree: NodeId,
        registry: &ShadowRootRegistry,
    ) -> Vec<Candidate> {
        let mut seen = HashSet::new();
        let found = deep_select(dom, subtree, &self.candidates, Some(registry), Some(self.query_limit))
            .into_iter()
            .filter_map(|node| self.classify(dom, node))
            .filter(|c| seen.insert(c.target))
            .collect();
        drop_enclosing(dom, found)
    }

    /// Elements whose content is clipped by truncation styling.
    pub fn truncated(&self, dom: &Dom, roots: &[NodeId]) -> Vec<NodeId> {
        roots
            .iter()
            .flat_map(|root| dom.select(*root, &self.truncation))
            .collect()
    }
}

/// Drop candidates whose target encloses the target of a safe candidate. The
/// inner activation bubbles through the outer element, so activating both in
/// one pass would run a delegated toggle twice.
fn drop_enclosing(dom: &Dom, candidates: Vec<Candidate>) -> Vec<Candidate> {
    let mut enclosing = HashSet::new();
    for candidate in candidates.iter().filter(|c| c.is_safe) {
        let mut cursor = dom.composed_parent(candidate.target);
        while let Some(ancestor) = cursor {
            if !enclosing.insert(ancestor) {
                break;
            }
            cursor = dom.composed_parent(ancestor);
        }
    }
    candidates
        .into_iter()
        .filter(|c| !enclosing.contains(&c.target))
        .collect()
}

fn parse_all(sources: &[String]) -> Vec<SelectorList> {
    sources
        .iter()
        .filter_map(|s| match SelectorList::parse(s) {
            Ok(list) => Some(list),
            Err(e) => {
                warn!("vendor selector '{}' ignored: {}", s, e);
                None
            }
        })
        .collect()
}

pub fn is_clickable(dom: &Dom, node: NodeId) -> bool {
    let Some(tag) = dom.tag(node) else {
        return false;
    };
    CLICKABLE_TAGS.contains(&tag)
        || dom.attr(node, "role") == Some("button")
        || dom.has_attr(node, "tabindex")
        || dom.has_attr(node, "onclick")
}

fn has_pointer_cursor(dom: &Dom, node: NodeId) -> bool {
    dom.style_property(node, "cursor")
        .is_some_and(|c| c.eq_ignore_ascii_case("pointer"))
}

/// The element that should receive the activation for a match on `node`:
/// itself when clickable or styled `cursor: pointer`, else the nearest
/// clickable ancestor, else a parent styled `cursor: pointer`, else `node`.
pub fn resolve_target(dom: &Dom, node: NodeId) -> NodeId {
    if is_clickable(dom, node) || has_pointer_cursor(dom, node) {
        return node;
    }
    let mut cursor = dom.parent_element(node);
    for _ in 0..RESOLVE_DEPTH {
        let Some(ancestor) = cursor else {
            break;
        };
        if is_clickable(dom, ancestor) {
            return ancestor;
        }
        cursor = dom.parent_element(ancestor);
    }
    match dom.parent_element(node) {
        Some(parent) if has_pointer_cursor(dom, parent) => parent,
        _ => node,
    }
}

/// Not a real link and not inside an ad region.
pub fn is_safe(dom: &Dom, node: NodeId) -> bool {
    !is_real_link(dom, node) && !in_ad_region(dom, node)
}

fn is_real_link(dom: &Dom, node: NodeId) -> bool {
    dom.has_tag(node, "a") && dom.attr(node, "href").is_some_and(is_navigable_href)
}

/// `node` or any composed ancestor (across shadow hosts and up through the
/// hosting iframe) carries an ad signature in its id or class.
pub fn in_ad_region(dom: &Dom, node: NodeId) -> bool {
    let mut cursor = Some(node);
    while let Some(current) = cursor {
        if dom.is_element(current) && has_ad_signature(dom, current) {
            return true;
        }
        cursor = match dom.kind(current) {
            NodeKind::Document(data) => data.frame_element,
            _ => dom.composed_parent(current),
        };
    }
    false
}

fn has_ad_signature(dom: &Dom, node: NodeId) -> bool {
    ["id", "class"].into_iter().any(|attr| {
        dom.attr(node, attr).is_some_and(|value| {
            ad_region_matcher().is_match(value)
                || value
                    .split(|c: char| !c.is_ascii_alphanumeric())
                    .any(|token| AD_TOKENS.iter().any(|t| t.eq_ignore_ascii_case(token)))
        })
    })
}
