//! Reading-anchor capture.

use chrono::Utc;

use super::AnchorRecord;
use crate::core::config::AnchorConfig;
use crate::dom::selector::escape_ident;
use crate::dom::{Dom, NodeId};

/// Classes kept per selector step; long class lists are usually generated.
const MAX_CLASSES_PER_STEP: usize = 2;

/// Element under the reading line, lifted to the nearest ancestor with text.
pub fn anchor_element(dom: &Dom, config: &AnchorConfig) -> Option<NodeId> {
    let viewport = dom.viewport();
    let hit = dom.element_from_point(viewport.width / 2.0, viewport.height * config.offset_ratio)?;
    let mut cursor = Some(hit);
    while let Some(node) = cursor {
        if !dom.normalized_text(node).is_empty() {
            return Some(node);
        }
        cursor = dom.parent_element(node);
    }
    None
}

/// Snapshot the current reading position. `None` when nothing with text sits
/// under the reading line (blank page, hero image, …).
pub fn capture(dom: &Dom, config: &AnchorConfig) -> Option<AnchorRecord> {
    let node = anchor_element(dom, config)?;
    let viewport = dom.viewport();
    Some(AnchorRecord {
        href: dom.location().to_string(),
        scroll_y: viewport.scroll_y,
        viewport_height: viewport.height,
        selector: build_selector(dom, node, config.selector_depth),
        snippet: snippet(dom, node, config.snippet_chars),
        timestamp: Utc::now(),
        anchor_offset: Some(dom.bounding_client_rect(node).y),
    })
}

pub fn snippet(dom: &Dom, node: NodeId, max_chars: usize) -> String {
    dom.normalized_text(node).chars().take(max_chars).collect()
}

/// Short structural selector for `node`.
///
/// `#id` when the node has one; otherwise a child-combinator chain of
/// `tag.class:nth-child(n)` steps, at most `depth` long, that stops early at
/// the first ancestor with an id (which anchors it) or at `<body>`.
pub fn build_selector(dom: &Dom, node: NodeId, depth: usize) -> Option<String> {
    if !dom.is_element(node) {
        return None;
    }
    let mut steps: Vec<String> = Vec::new();
    let mut cursor = Some(node);
    while let Some(current) = cursor {
        if let Some(id) = dom.attr(current, "id").filter(|id| !id.trim().is_empty()) {
            steps.push(format!("#{}", escape_ident(id)));
            break;
        }
        let tag = dom.tag(current)?;
        if tag == "body" || tag == "html" {
            steps.push(tag.to_string());
            break;
        }
        if steps.len() >= depth {
            break;
        }
        steps.push(step(dom, current, tag));
        cursor = dom.parent_element(current);
    }
    steps.reverse();
    Some(steps.join(" > "))
}

fn step(dom: &Dom, node: NodeId, tag: &str) -> String {
    let mut out = tag.to_string();
    for class in dom
        .classes(node)
        .filter(|c| !c.starts_with("lt-"))
        .take(MAX_CLASSES_PER_STEP)
    {
        out.push('.');
        out.push_str(&escape_ident(class));
    }
    out.push_str(&format!(":nth-child({})", dom.element_index(node)));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::html::parse_page;
    use crate::dom::layout::flow;
    use url::Url;

    fn page(markup: &str) -> Dom {
        let mut dom = parse_page(Url::parse("https://news.example/story").unwrap(), markup);
        let top = dom.top_document();
        flow(&mut dom, top);
        dom
    }

    fn node(dom: &Dom, selector: &str) -> NodeId {
        dom.query_selector(dom.top_document(), selector)
            .unwrap()
            .unwrap()
    }

    #[test]
    fn test_selector_is_id_anchored() {
        let dom = page(r#"<body><section id="comments"><div class="c"><p>hola</p></div></section></body>"#);
        let p = node(&dom, "p");
        assert_eq!(
            build_selector(&dom, p, 4).unwrap(),
            "#comments > div.c:nth-child(1) > p:nth-child(1)"
        );
    }

    #[test]
    fn test_selector_depth_is_bounded() {
        let dom = page("<body><div><div><div><div><div><p>deep</p></div></div></div></div></div></body>");
        let p = node(&dom, "p");
        let selector = build_selector(&dom, p, 3).unwrap();
        assert_eq!(selector.matches(" > ").count(), 2);
        assert_eq!(dom.query_selector(dom.top_document(), &selector).unwrap(), Some(p));
    }

    #[test]
    fn test_capture_walks_up_to_text() {
        let mut markup = String::from("<body>");
        for i in 0..60 {
            markup.push_str(&format!("<p>Párrafo número {i}</p>"));
        }
        markup.push_str("</body>");
        let mut dom = page(&markup);
        dom.scroll_to(400.0);
        let record = capture(&dom, &AnchorConfig::default()).unwrap();
        // Reading line: 400 + 800 * 0.3 = 640 → 33rd paragraph (20px lines).
        assert_eq!(record.snippet, "Párrafo número 32");
        assert_eq!(record.scroll_y, 400.0);
        assert_eq!(record.anchor_offset, Some(240.0));
    }

    #[test]
    fn test_capture_on_blank_page() {
        let dom = page("<body></body>");
        assert!(capture(&dom, &AnchorConfig::default()).is_none());
    }
}
