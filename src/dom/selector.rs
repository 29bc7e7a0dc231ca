//! CSS selectors over the page model.
//!
//! Parsing reuses `scraper`'s selector grammar (`scraper::selector::Parser`
//! and its `Simple` impl) through the `selectors` crate; matching runs against
//! the arena through [`PageElement`]. `parent_element` stops at documents and
//! shadow roots, so combinators never leak across a shadow or frame boundary.

use std::fmt;

use scraper::selector::{CssLocalName, CssString, NonTSPseudoClass, Parser, PseudoElement, Simple};
use selectors::attr::{AttrSelectorOperation, CaseSensitivity, NamespaceConstraint};
use selectors::bloom::BloomFilter;
use selectors::matching::{
    self, MatchingContext, MatchingForInvalidation, MatchingMode, NeedsSelectorFlags, QuirksMode,
    SelectorCaches,
};
use selectors::parser::{ParseRelative, Selector};
use selectors::{Element, OpaqueElement, SelectorImpl};

use super::{Dom, NodeId, NodeKind};
use crate::core::error::DomError;

const XHTML_NS: &str = "http://www.w3.org/1999/xhtml";

/// A parsed, comma-separated selector group.
#[derive(Debug, Clone, Default)]
pub struct SelectorList {
    source: String,
    selectors: Vec<Selector<Simple>>,
}

impl SelectorList {
    pub fn parse(source: &str) -> Result<Self, DomError> {
        let mut input = cssparser::ParserInput::new(source);
        let mut parser = cssparser::Parser::new(&mut input);
        let list = selectors::SelectorList::parse(&Parser, &mut parser, ParseRelative::No)
            .map_err(|_| DomError::InvalidSelector(source.to_string()))?;
        Ok(Self {
            source: source.to_string(),
            selectors: list.slice().to_vec(),
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn matches(&self, dom: &Dom, node: NodeId) -> bool {
        if !dom.is_element(node) {
            return false;
        }
        let element = PageElement { dom, node };
        let mut caches = SelectorCaches::default();
        let mut context = MatchingContext::new(
            MatchingMode::Normal,
            None,
            &mut caches,
            QuirksMode::NoQuirks,
            NeedsSelectorFlags::No,
            MatchingForInvalidation::No,
        );
        self.selectors
            .iter()
            .any(|s| matching::matches_selector(s, 0, None, &element, &mut context))
    }
}

/// Borrowed view of one arena element, as the `selectors` matcher sees it.
#[derive(Clone, Copy)]
pub struct PageElement<'a> {
    dom: &'a Dom,
    node: NodeId,
}

impl fmt::Debug for PageElement<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}>{}", self.dom.tag(self.node).unwrap_or("?"), self.node)
    }
}

impl<'a> PageElement<'a> {
    fn wrap(dom: &'a Dom, node: NodeId) -> Self {
        Self { dom, node }
    }

    fn sibling(&self, step: isize) -> Option<Self> {
        let parent = self.dom.parent(self.node)?;
        let siblings = self.dom.children(parent);
        let mut idx = siblings.iter().position(|c| *c == self.node)? as isize;
        loop {
            idx += step;
            let candidate = *siblings.get(usize::try_from(idx).ok()?)?;
            if self.dom.is_element(candidate) {
                return Some(Self::wrap(self.dom, candidate));
            }
        }
    }
}

type Ns = <Simple as SelectorImpl>::NamespaceUrl;

impl Element for PageElement<'_> {
    type Impl = Simple;

    fn opaque(&self) -> OpaqueElement {
        OpaqueElement::new(&self.dom.nodes[self.node.0])
    }

    fn parent_element(&self) -> Option<Self> {
        self.dom
            .parent_element(self.node)
            .map(|p| Self::wrap(self.dom, p))
    }

    fn parent_node_is_shadow_root(&self) -> bool {
        self.dom
            .parent(self.node)
            .is_some_and(|p| self.dom.is_shadow_root(p))
    }

    fn containing_shadow_host(&self) -> Option<Self> {
        None
    }

    fn is_pseudo_element(&self) -> bool {
        false
    }

    fn prev_sibling_element(&self) -> Option<Self> {
        self.sibling(-1)
    }

    fn next_sibling_element(&self) -> Option<Self> {
        self.sibling(1)
    }

    fn first_element_child(&self) -> Option<Self> {
        self.dom
            .element_children(self.node)
            .next()
            .map(|c| Self::wrap(self.dom, c))
    }

    fn is_html_element_in_html_document(&self) -> bool {
        true
    }

    fn has_local_name(&self, name: &CssLocalName) -> bool {
        self.dom.tag(self.node) == Some(&*name.0)
    }

    fn has_namespace(&self, ns: &<Simple as SelectorImpl>::BorrowedNamespaceUrl) -> bool {
        &**ns == XHTML_NS
    }

    fn is_same_type(&self, other: &Self) -> bool {
        self.dom.tag(self.node) == other.dom.tag(other.node)
    }

    fn attr_matches(
        &self,
        ns: &NamespaceConstraint<&Ns>,
        local_name: &CssLocalName,
        operation: &AttrSelectorOperation<&CssString>,
    ) -> bool {
        // Attributes in the arena carry no namespace.
        let unqualified = match ns {
            NamespaceConstraint::Any => true,
            NamespaceConstraint::Specific(url) => url.is_empty(),
        };
        unqualified
            && self
                .dom
                .attr(self.node, &local_name.0)
                .is_some_and(|value| operation.eval_str(value))
    }

    fn match_non_ts_pseudo_class(
        &self,
        pc: &NonTSPseudoClass,
        _context: &mut MatchingContext<'_, Simple>,
    ) -> bool {
        match *pc {}
    }

    fn match_pseudo_element(
        &self,
        pe: &PseudoElement,
        _context: &mut MatchingContext<'_, Simple>,
    ) -> bool {
        match *pe {}
    }

    fn apply_selector_flags(&self, _flags: matching::ElementSelectorFlags) {}

    fn is_link(&self) -> bool {
        matches!(self.dom.tag(self.node), Some("a" | "area")) && self.dom.has_attr(self.node, "href")
    }

    fn is_html_slot_element(&self) -> bool {
        self.dom.has_tag(self.node, "slot")
    }

    fn has_id(&self, id: &CssLocalName, case_sensitivity: CaseSensitivity) -> bool {
        self.dom
            .attr(self.node, "id")
            .is_some_and(|v| case_sensitivity.eq(id.0.as_bytes(), v.as_bytes()))
    }

    fn has_class(&self, name: &CssLocalName, case_sensitivity: CaseSensitivity) -> bool {
        self.dom
            .classes(self.node)
            .any(|c| case_sensitivity.eq(name.0.as_bytes(), c.as_bytes()))
    }

    fn has_custom_state(&self, _name: &CssLocalName) -> bool {
        false
    }

    fn imported_part(&self, _name: &CssLocalName) -> Option<CssLocalName> {
        None
    }

    fn is_part(&self, _name: &CssLocalName) -> bool {
        false
    }

    fn is_empty(&self) -> bool {
        !self.dom.children(self.node).iter().any(|c| match self.dom.kind(*c) {
            NodeKind::Element(_) => true,
            NodeKind::Text(text) => !text.is_empty(),
            _ => false,
        })
    }

    fn is_root(&self) -> bool {
        self.dom
            .parent(self.node)
            .is_some_and(|p| self.dom.is_document(p))
    }

    fn add_element_unique_hashes(&self, _filter: &mut BloomFilter) -> bool {
        false
    }
}

/// Escape an identifier for use after `#` or `.`.
pub fn escape_ident(ident: &str) -> String {
    let mut out = String::with_capacity(ident.len() + 4);
    // Writing into a String cannot fail.
    let _ = cssparser::serialize_identifier(ident, &mut out);
    out
}
