//! Build a page model from markup with `scraper`.
//!
//! * `<template shadowrootmode="open|closed">` becomes a shadow root on its parent.
//! * `<iframe srcdoc>` becomes a same-origin child document.
//! * `<iframe src>` becomes a child document at the resolved URL; when that URL
//!   is on another origin the frame is opaque to the engine.
//!
//! [`serialize`] writes a subtree back out, shadow roots included as
//! declarative templates, so an expanded page can be saved and reloaded.

use std::collections::HashMap;

use scraper::{Html, Node as HtmlNode};
use tracing::debug;
use url::Url;

use super::{layout, Dom, NodeId, NodeKind, ShadowMode};

/// Parse `markup` as the top document of a fresh page at `url`, laid out and
/// with auto layout on.
pub fn parse_page(url: Url, markup: &str) -> Dom {
    let mut dom = Dom::new(url);
    let doc = dom.top_document();
    load_into(&mut dom, doc, markup);
    dom.set_auto_layout(true);
    layout::flow(&mut dom, doc);
    dom.mark_laid_out();
    dom
}

/// Parse `markup` and append its tree to the (empty) document `doc`.
pub fn load_into(dom: &mut Dom, doc: NodeId, markup: &str) {
    let parsed = Html::parse_document(markup);
    let base = dom.document_url(doc).cloned();

    let mut mapped = HashMap::new();
    mapped.insert(parsed.tree.root().id(), doc);

    for node in parsed.tree.root().descendants().skip(1) {
        let Some(parent) = node
            .parent()
            .and_then(|p| mapped.get(&p.id()).copied())
        else {
            continue;
        };
        match node.value() {
            HtmlNode::Element(el) => {
                if el.name() == "template" {
                    if let Some(mode) = el.attr("shadowrootmode") {
                        let mode = if mode.eq_ignore_ascii_case("closed") {
                            ShadowMode::Closed
                        } else {
                            ShadowMode::Open
                        };
                        match dom.attach_shadow(parent, mode) {
                            Ok(root) => {
                                mapped.insert(node.id(), root);
                            }
                            Err(e) => debug!("declarative shadow root skipped: {}", e),
                        }
                        continue;
                    }
                }

                let created = dom.create_element(doc, el.name());
                for (name, value) in el.attrs() {
                    let _ = dom.set_attr(created, name, value);
                }
                if el.attr("checked").is_some() {
                    let _ = dom.set_checked(created, true);
                }
                if el.attr("autoplay").is_some() {
                    let _ = dom.set_playing(created, true);
                }
                dom.append_child(parent, created);
                mapped.insert(node.id(), created);

                if el.name() == "iframe" {
                    load_frame(dom, created, base.as_ref(), el.attr("srcdoc"), el.attr("src"));
                }
            }
            HtmlNode::Text(text) => {
                let text: &str = &text.text;
                if !text.trim().is_empty() {
                    let created = dom.create_text(doc, text);
                    dom.append_child(parent, created);
                }
            }
            _ => {}
        }
    }
}

fn load_frame(
    dom: &mut Dom,
    frame: NodeId,
    base: Option<&Url>,
    srcdoc: Option<&str>,
    src: Option<&str>,
) {
    let Some(base) = base else {
        return;
    };
    if let Some(srcdoc) = srcdoc {
        if let Ok(child) = dom.create_frame_document(frame, base.clone()) {
            load_into(dom, child, srcdoc);
        }
        return;
    }
    let Some(src) = src else {
        return;
    };
    match base.join(src) {
        Ok(url) => {
            if let Err(e) = dom.create_frame_document(frame, url) {
                debug!("iframe document skipped: {}", e);
            }
        }
        Err(e) => debug!("iframe src '{}' unresolvable: {}", src, e),
    }
}

const VOID_ELEMENTS: [&str; 14] = [
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param",
    "source", "track", "wbr",
];

/// Serialize `node` and its composed subtree (shadow roots as
/// `<template shadowrootmode>`). Frame documents are not inlined.
pub fn serialize(dom: &Dom, node: NodeId) -> String {
    let mut out = String::new();
    write_node(dom, node, &mut out);
    out
}

fn write_node(dom: &Dom, node: NodeId, out: &mut String) {
    match dom.kind(node) {
        NodeKind::Text(text) => {
            let raw = dom
                .parent(node)
                .and_then(|p| dom.tag(p))
                .is_some_and(|tag| matches!(tag, "script" | "style"));
            if raw {
                out.push_str(text);
            } else {
                out.push_str(&escape(text, false));
            }
        }
        NodeKind::Document(_) => {
            out.push_str("<!DOCTYPE html>");
            write_children(dom, node, out);
        }
        NodeKind::ShadowRoot { mode, .. } => {
            let mode = match mode {
                ShadowMode::Open => "open",
                ShadowMode::Closed => "closed",
            };
            out.push_str(&format!("<template shadowrootmode=\"{mode}\">"));
            write_children(dom, node, out);
            out.push_str("</template>");
        }
        NodeKind::Element(el) => {
            out.push('<');
            out.push_str(&el.tag);
            for (name, value) in &el.attrs {
                out.push(' ');
                out.push_str(name);
                out.push_str("=\"");
                out.push_str(&escape(value, true));
                out.push('"');
            }
            out.push('>');
            if VOID_ELEMENTS.contains(&el.tag.as_str()) {
                return;
            }
            if let Some(root) = el.shadow_root {
                write_node(dom, root, out);
            }
            write_children(dom, node, out);
            out.push_str("</");
            out.push_str(&el.tag);
            out.push('>');
        }
    }
}

fn write_children(dom: &Dom, node: NodeId, out: &mut String) {
    for child in dom.children(node) {
        write_node(dom, *child, out);
    }
}

fn escape(text: &str, attribute: bool) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' if !attribute => out.push_str("&lt;"),
            '>' if !attribute => out.push_str("&gt;"),
            '"' if attribute => out.push_str("&quot;"),
            '\u{a0}' => out.push_str("&nbsp;"),
            c => out.push(c),
        }
    }
    out
}
