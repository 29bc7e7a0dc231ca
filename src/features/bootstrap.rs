//! Per-frame wiring.
//!
//! `boot_frame` is what runs once for every document the engine is attached
//! to (the top page and each same-origin iframe that hosts its own copy):
//! version stamp, anti-truncation stylesheet, shadow-root registration, the
//! anchor keeper (top document only) and the optional auto-start run.
//!
//! Must be called from inside a `tokio::task::LocalSet`.

use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::session_store::SharedStore;
use crate::anchor::AnchorKeeper;
use crate::core::config::EngineConfig;
use crate::core::kill_switch::KillSwitch;
use crate::core::session::Mode;
use crate::core::types::SessionReport;
use crate::dom::{Dom, NodeId, PageEvent, SharedDom};
use crate::expansion::{DeepWalk, ExpansionSession};

pub const VERSION_ATTR: &str = "data-lt-version";
pub const STYLE_ID: &str = "lt-style";

const ANTI_TRUNCATION_CSS: &str = "[class*=\"collapsed\"], [class*=\"truncate\"], \
[class*=\"clamp\"] { max-height: none !important; -webkit-line-clamp: unset !important; \
line-clamp: unset !important; overflow: visible !important; }";

/// Controls exposed to the floating button / hotkeys of one frame.
pub struct FrameHandle {
    session: Rc<ExpansionSession>,
    keeper: Option<Rc<AnchorKeeper>>,
    tasks: RefCell<Vec<JoinHandle<()>>>,
    run: RefCell<Option<JoinHandle<SessionReport>>>,
}

impl std::fmt::Debug for FrameHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameHandle")
            .field("mode", &self.session.mode())
            .field("anchor_keeper", &self.keeper.is_some())
            .finish()
    }
}

impl FrameHandle {
    /// Start a session loop. `false` when already running, finished or killed.
    pub fn start(&self, mode: Mode) -> bool {
        match self.session.start(mode) {
            Some(handle) => {
                *self.run.borrow_mut() = Some(handle);
                true
            }
            None => false,
        }
    }

    /// Panic-stop for every frame sharing this kill switch.
    pub fn stop(&self) {
        self.session.stop();
    }

    pub fn freeze(&self) -> bool {
        self.session.freeze()
    }

    pub fn status_label(&self) -> &'static str {
        self.session.status_label()
    }

    pub fn session(&self) -> &Rc<ExpansionSession> {
        &self.session
    }

    pub fn keeper(&self) -> Option<&Rc<AnchorKeeper>> {
        self.keeper.as_ref()
    }

    /// Wait for the running session (if any) to end and return its report.
    pub async fn finished(&self) -> SessionReport {
        let handle = self.run.borrow_mut().take();
        if let Some(handle) = handle {
            if let Ok(report) = handle.await {
                return report;
            }
        }
        self.session.report()
    }

    /// Abort background tasks (registration forwarding, anchor keeper).
    pub fn shutdown(&self) {
        for task in self.tasks.borrow_mut().drain(..) {
            task.abort();
        }
    }
}

/// Boot the engine for `document` inside `dom`.
pub fn boot_frame(
    dom: SharedDom,
    document: NodeId,
    config: &EngineConfig,
    kill: KillSwitch,
    store: SharedStore,
) -> FrameHandle {
    let session = ExpansionSession::new(dom.clone(), document, config, kill.clone());
    let mut tasks = Vec::new();

    if !kill.is_tripped() {
        let mut page = dom.borrow_mut();
        stamp_version(&mut page, document);
        inject_style(&mut page, document);

        let state = session.state();
        let mut state = state.borrow_mut();
        let mut swept = 0;
        for root in reachable_shadow_roots(&page, document) {
            swept += usize::from(state.register_root(root));
        }
        debug!("shadow sweep registered {} roots", swept);
    }

    tasks.push(forward_shadow_roots(&dom, document, &session, kill.clone()));

    let is_top = dom.borrow().top_document() == document;
    let keeper = is_top.then(|| {
        let keeper = AnchorKeeper::new(dom.clone(), store, config.anchor.clone(), kill.clone());
        tasks.push(keeper.spawn());
        keeper
    });

    let handle = FrameHandle {
        session,
        keeper,
        tasks: RefCell::new(tasks),
        run: RefCell::new(None),
    };
    if config.scheduler.auto_start && handle.start(Mode::OneShot) {
        info!("auto-start: one-shot expansion running");
    }
    handle
}

/// Mark the document element with the crate version (debug marker only).
pub fn stamp_version(dom: &mut Dom, document: NodeId) {
    if let Some(root) = dom.document_element(document) {
        let _ = dom.set_attr(root, VERSION_ATTR, env!("CARGO_PKG_VERSION"));
    }
}

/// Inject the anti-truncation stylesheet once per document.
pub fn inject_style(dom: &mut Dom, document: NodeId) -> bool {
    let present = dom
        .query_selector(document, &format!("#{STYLE_ID}"))
        .ok()
        .flatten()
        .is_some();
    if present {
        return false;
    }
    let parent = dom
        .query_selector(document, "head")
        .ok()
        .flatten()
        .or_else(|| dom.document_element(document))
        .unwrap_or(document);
    let style = dom.create_element(document, "style");
    let _ = dom.set_attr(style, "id", STYLE_ID);
    dom.set_text(style, ANTI_TRUNCATION_CSS);
    dom.append_child(parent, style);
    true
}

/// Documents this frame's engine may enter: itself and same-origin iframes below.
fn frame_documents(dom: &Dom, document: NodeId) -> HashSet<NodeId> {
    DeepWalk::new(dom, document, None)
        .filter(|n| dom.is_document(*n))
        .collect()
}

/// Attached shadow roots (open or closed) whose host lives in a document this
/// frame may enter. Roots inside cross-origin frames stay out of the registry.
pub fn reachable_shadow_roots(dom: &Dom, document: NodeId) -> Vec<NodeId> {
    let documents = frame_documents(dom, document);
    dom.attached_shadow_roots()
        .into_iter()
        .filter(|root| is_reachable_root(dom, &documents, *root))
        .collect()
}

fn is_reachable_root(dom: &Dom, documents: &HashSet<NodeId>, root: NodeId) -> bool {
    dom.composed_parent(root)
        .is_some_and(|host| documents.contains(&dom.owner_document(host)))
}

/// Register shadow roots attached after boot.
fn forward_shadow_roots(
    dom: &SharedDom,
    document: NodeId,
    session: &Rc<ExpansionSession>,
    kill: KillSwitch,
) -> JoinHandle<()> {
    let mut events = dom.borrow_mut().subscribe();
    let dom = dom.clone();
    let state = session.state();
    tokio::task::spawn_local(async move {
        loop {
            tokio::select! {
                _ = kill.tripped() => break,
                event = events.recv() => match event {
                    Some(PageEvent::ShadowRootAttached(root)) => {
                        let page = dom.borrow();
                        let documents = frame_documents(&page, document);
                        if is_reachable_root(&page, &documents, root)
                            && state.borrow_mut().register_root(root)
                        {
                            debug!("registered shadow root {}", root);
                        }
                    }
                    Some(_) => {}
                    None => break,
                },
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::html::parse_page;
    use crate::dom::ShadowMode;
    use crate::features::session_store::MemorySessionStore;
    use url::Url;

    #[test]
    fn test_style_injected_once() {
        let mut dom = parse_page(
            Url::parse("https://news.example/").unwrap(),
            "<html><head></head><body></body></html>",
        );
        let doc = dom.top_document();
        assert!(inject_style(&mut dom, doc));
        assert!(!inject_style(&mut dom, doc));
        stamp_version(&mut dom, doc);
        let root = dom.document_element(doc).unwrap();
        assert_eq!(dom.attr(root, VERSION_ATTR), Some(env!("CARGO_PKG_VERSION")));
    }

    #[test]
    fn test_cross_origin_roots_not_reachable() {
        let dom = parse_page(
            Url::parse("https://news.example/").unwrap(),
            r#"<body>
                <div><template shadowrootmode="closed"><p>mine</p></template></div>
                <iframe src="https://comments.vendor.example/embed"></iframe>
            </body>"#,
        );
        let doc = dom.top_document();
        assert_eq!(reachable_shadow_roots(&dom, doc).len(), 1);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_late_shadow_roots_are_registered() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let dom = parse_page(Url::parse("https://news.example/").unwrap(), "<body><div id=h></div></body>")
                    .shared();
                let doc = dom.borrow().top_document();
                let kill = KillSwitch::new();
                let handle = boot_frame(
                    dom.clone(),
                    doc,
                    &EngineConfig::default(),
                    kill.clone(),
                    MemorySessionStore::shared(),
                );
                assert_eq!(handle.status_label(), "Expand & Freeze");

                let host = dom.borrow().query_selector(doc, "#h").unwrap().unwrap();
                dom.borrow_mut().attach_shadow(host, ShadowMode::Closed).unwrap();
                tokio::task::yield_now().await;
                tokio::task::yield_now().await;
                assert_eq!(handle.session().state().borrow().roots.len(), 1);

                kill.trip();
                handle.shutdown();
            })
            .await;
    }
}
