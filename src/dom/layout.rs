//! Synthetic block-flow layout for loaded markup.
//!
//! Every rendered element is a full-width block; text wraps at a fixed number
//! of characters per line. Hidden subtrees (`hidden`, `display: none`, closed
//! `<details>` bodies, non-rendered tags) get empty boxes, which is all the
//! visibility predicate and the anchor engine need from geometry.

use super::{Dom, NodeId, NodeKind, Rect};

pub const LINE_HEIGHT: f64 = 20.0;
pub const CHARS_PER_LINE: usize = 90;
const CONTROL_HEIGHT: f64 = 28.0;
const OPAQUE_FRAME_HEIGHT: f64 = 150.0;

const NON_RENDERED: &[&str] = &[
    "head", "script", "style", "template", "meta", "link", "title", "noscript",
];

/// Lay out `doc` (and any same-origin frame documents inside it) from y = 0.
pub fn flow(dom: &mut Dom, doc: NodeId) -> f64 {
    let width = dom.viewport().width;
    let children = dom.children(doc).to_vec();
    let mut y = 0.0;
    for child in children {
        y += layout_node(dom, child, y, width);
    }
    y
}

/// Recompute boxes when the page changed since the last layout. Only pages
/// with auto layout enabled are touched. Returns whether a layout ran.
pub fn refresh(dom: &mut Dom) -> bool {
    if !dom.needs_layout() {
        return false;
    }
    let top = dom.top_document();
    flow(dom, top);
    dom.mark_laid_out();
    true
}

fn layout_node(dom: &mut Dom, node: NodeId, y: f64, width: f64) -> f64 {
    let tag = match dom.kind(node) {
        NodeKind::Text(text) => {
            let chars = text.trim().chars().count();
            if chars == 0 {
                return 0.0;
            }
            return chars.div_ceil(CHARS_PER_LINE) as f64 * LINE_HEIGHT;
        }
        NodeKind::Element(el) => el.tag.clone(),
        _ => {
            let children = dom.children(node).to_vec();
            return children
                .into_iter()
                .fold(0.0, |h, c| h + layout_node(dom, c, y + h, width));
        }
    };

    if NON_RENDERED.contains(&tag.as_str()) || dom.is_hidden_by_markup(node) {
        collapse(dom, node, y);
        return 0.0;
    }

    let mut height = 0.0;
    if let Some(root) = dom.element(node).and_then(|el| el.shadow_root) {
        height += layout_node(dom, root, y, width);
    }

    let closed_details = tag == "details" && !dom.has_attr(node, "open");
    for child in dom.children(node).to_vec() {
        if closed_details && !dom.has_tag(child, "summary") {
            collapse(dom, child, y + height);
            continue;
        }
        height += layout_node(dom, child, y + height, width);
    }

    if tag == "iframe" {
        height = match dom.content_document(node) {
            Ok(Some(inner)) => flow(dom, inner),
            _ => OPAQUE_FRAME_HEIGHT,
        };
    }
    if height == 0.0 && matches!(tag.as_str(), "button" | "input" | "select" | "img" | "video") {
        height = CONTROL_HEIGHT;
    }

    let _ = dom.set_rect(node, Rect::new(0.0, y, width, height));
    height
}

fn collapse(dom: &mut Dom, node: NodeId, y: f64) {
    if dom.is_element(node) {
        let _ = dom.set_rect(node, Rect::new(0.0, y, 0.0, 0.0));
    }
    for child in dom.descendants(node) {
        if dom.is_element(child) {
            let _ = dom.set_rect(child, Rect::new(0.0, y, 0.0, 0.0));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::html::parse_page;
    use url::Url;

    #[test]
    fn test_hidden_and_closed_details_collapse() {
        let markup = r#"<body>
            <p id="a">first</p>
            <div hidden><p id="b">secret</p></div>
            <details><summary id="s">Ver respuestas</summary><p id="c">reply</p></details>
            <p id="d">last</p>
        </body>"#;
        let mut dom = parse_page(Url::parse("https://news.example/").unwrap(), markup);
        let doc = dom.top_document();
        flow(&mut dom, doc);

        let q = |dom: &Dom, sel: &str| dom.query_selector(doc, sel).unwrap().unwrap();
        assert!(!dom.rect(q(&dom, "#a")).is_empty());
        assert!(dom.rect(q(&dom, "#b")).is_empty());
        assert!(!dom.rect(q(&dom, "#s")).is_empty());
        assert!(dom.rect(q(&dom, "#c")).is_empty());
        assert_eq!(dom.rect(q(&dom, "#d")).y, 2.0 * LINE_HEIGHT);
    }

    #[test]
    fn test_refresh_lays_out_inserted_nodes() {
        let mut dom = parse_page(
            Url::parse("https://news.example/").unwrap(),
            "<body><div id=list></div></body>",
        );
        let doc = dom.top_document();
        assert!(!refresh(&mut dom), "fresh page is already laid out");

        let list = dom.query_selector(doc, "#list").unwrap().unwrap();
        let reply = dom.create_element(doc, "p");
        dom.set_text(reply, "respuesta");
        dom.append_child(list, reply);
        assert!(dom.rect(reply).is_empty());

        assert!(refresh(&mut dom));
        assert!(!dom.rect(reply).is_empty());
    }
}
