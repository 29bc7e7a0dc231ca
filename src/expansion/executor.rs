//! Budgeted activation of classified candidates.

use tokio::time::Instant;
use tracing::{debug, info};

use super::classifier::{Candidate, Classifier};
use super::traversal::all_roots;
use crate::core::kill_switch::KillSwitch;
use crate::core::session::SessionState;
use crate::core::types::PassReport;
use crate::dom::{layout, Dom, EventKind, NodeId};

/// Pointer/mouse sequence dispatched for every click activation. Many widgets
/// only listen on the early pointer events, so a bare `click` is not enough.
pub const ACTIVATION_SEQUENCE: [EventKind; 5] = [
    EventKind::PointerDown,
    EventKind::MouseDown,
    EventKind::Click,
    EventKind::MouseUp,
    EventKind::PointerUp,
];

/// Inline style applied to truncated containers.
const UNCLAMP: [(&str, &str); 4] = [
    ("max-height", "none"),
    ("-webkit-line-clamp", "unset"),
    ("line-clamp", "unset"),
    ("overflow", "visible"),
];

/// Activate `candidates` in order while budget remains.
///
/// Unsafe candidates are counted and never touched; nodes already in the
/// session's activated set are skipped. Listener failures are swallowed and
/// counted. The kill switch is consulted before every mutating step.
pub fn execute(dom: &mut Dom, state: &mut SessionState, candidates: &[Candidate]) -> PassReport {
    let mut report = PassReport {
        candidates: candidates.len() as u32,
        ..PassReport::default()
    };

    for candidate in candidates {
        if state.killed() {
            report.killed = true;
            break;
        }
        if !candidate.is_safe {
            report.skipped_unsafe += 1;
            debug!("skip unsafe {} '{}'", candidate.target, candidate.label);
            continue;
        }
        if state.activated.contains(&candidate.target) || state.activated.contains(&candidate.node) {
            report.skipped_seen += 1;
            continue;
        }
        if state.click_budget == 0 {
            report.budget_exhausted = true;
            break;
        }
        // Marked before dispatch: a handler that fails is not retried either.
        state.activated.insert(candidate.target);
        state.activated.insert(candidate.node);

        let outcome = if candidate.is_disclosure_input() {
            check_input(dom, candidate.target)
        } else {
            activate(dom, candidate.target, &state.kill)
        };

        match outcome {
            Activation::Done => {
                state.spend(Instant::now());
                report.actions += 1;
                if candidate.is_disclosure_input() {
                    report.inputs_checked += 1;
                }
                debug!(
                    "activated {} ({:?}) '{}'",
                    candidate.target, candidate.matched, candidate.label
                );
            }
            Activation::Failed(e) => {
                report.failed += 1;
                debug!("activation of {} failed: {}", candidate.target, e);
            }
            Activation::Killed => {
                report.killed = true;
                break;
            }
        }
    }
    report
}

enum Activation {
    Done,
    Failed(crate::core::error::DomError),
    Killed,
}

fn activate(dom: &mut Dom, target: NodeId, kill: &KillSwitch) -> Activation {
    let mut first_error = None;
    for kind in ACTIVATION_SEQUENCE {
        if kill.is_tripped() {
            return Activation::Killed;
        }
        if let Err(e) = dom.dispatch(target, kind) {
            first_error.get_or_insert(e);
        }
    }
    match first_error {
        Some(e) => Activation::Failed(e),
        None => Activation::Done,
    }
}

fn check_input(dom: &mut Dom, input: NodeId) -> Activation {
    if let Err(e) = dom.set_checked(input, true) {
        return Activation::Failed(e);
    }
    match dom.dispatch(input, EventKind::Change) {
        Ok(()) => Activation::Done,
        Err(e) => Activation::Failed(e),
    }
}

/// Remove collapse classes and clamp styles. Returns how many nodes changed.
pub fn strip_truncation(dom: &mut Dom, nodes: &[NodeId], kill: &KillSwitch) -> u32 {
    let mut changed = 0;
    for &node in nodes {
        if kill.is_tripped() {
            break;
        }
        let mut touched = false;

        let collapse_classes: Vec<String> = dom
            .classes(node)
            .filter(|c| c.to_ascii_lowercase().contains("collapsed"))
            .map(str::to_string)
            .collect();
        for class in collapse_classes {
            touched |= dom.remove_class(node, &class).is_ok();
        }

        for (property, value) in UNCLAMP {
            if dom.style_property(node, property).as_deref() != Some(value) {
                touched |= dom.set_style_property(node, property, value).is_ok();
            }
        }
        if touched {
            changed += 1;
        }
    }
    changed
}

/// Scroll by one pixel and back to wake scroll-driven lazy loaders.
pub fn jiggle(dom: &mut Dom, kill: &KillSwitch) {
    if kill.is_tripped() {
        return;
    }
    let y = dom.scroll_y();
    dom.scroll_to(y + 1.0);
    dom.scroll_to(y);
}

/// One full pass over every root reachable from `document`.
pub fn full_pass(
    dom: &mut Dom,
    document: NodeId,
    state: &mut SessionState,
    classifier: &Classifier,
) -> PassReport {
    if !state.may_act() {
        return PassReport {
            killed: state.killed(),
            ..PassReport::default()
        };
    }
    layout::refresh(dom);
    let roots = all_roots(dom, document, &state.roots);
    let truncated = classifier.truncated(dom, &roots);
    let styles_stripped = strip_truncation(dom, &truncated, &state.kill);

    let candidates = classifier.collect(dom, &roots);
    let mut report = execute(dom, state, &candidates);
    report.styles_stripped = styles_stripped;

    if report.actions > 0 {
        jiggle(dom, &state.kill);
    }
    report.killed |= state.killed();
    info!(
        "pass: {} candidates, {} actions, {} unsafe skipped, {} styles stripped, budget {}",
        report.candidates, report.actions, report.skipped_unsafe, report.styles_stripped, state.click_budget
    );
    report
}

/// Classify and execute inside freshly added subtrees only.
pub fn incremental_pass(
    dom: &mut Dom,
    added: &[NodeId],
    state: &mut SessionState,
    classifier: &Classifier,
) -> PassReport {
    let mut report = PassReport::default();
    if state.may_act() {
        layout::refresh(dom);
    }
    for &subtree in added {
        if !state.may_act() {
            report.killed = state.killed();
            break;
        }
        if !dom.is_element(subtree) || !dom.is_connected(subtree) {
            continue;
        }
        let candidates = classifier.collect_under(dom, subtree, &state.roots);
        if candidates.is_empty() {
            continue;
        }
        report.merge(execute(dom, state, &candidates));
    }
    if report.actions > 0 {
        debug!("mutation fast path: {} actions", report.actions);
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::ExpansionConfig;
    use crate::core::session::Mode;
    use crate::dom::html::parse_page;
    use crate::dom::layout::flow;
    use crate::dom::listener;
    use std::cell::Cell;
    use std::rc::Rc;
    use url::Url;

    fn page(markup: &str) -> Dom {
        let mut dom = parse_page(Url::parse("https://news.example/story").unwrap(), markup);
        let top = dom.top_document();
        flow(&mut dom, top);
        dom
    }

    fn running(budget: u32) -> SessionState {
        let mut state = SessionState::new(budget, KillSwitch::new());
        state.set_mode(Mode::OneShot);
        state
    }

    fn node(dom: &Dom, selector: &str) -> NodeId {
        dom.query_selector(dom.top_document(), selector)
            .unwrap()
            .unwrap()
    }

    #[test]
    fn test_sequence_order_and_single_activation() {
        let mut dom = page(r#"<body><button id="b">Show more</button></body>"#);
        let b = node(&dom, "#b");
        let cls = Classifier::new(&ExpansionConfig::default());
        let mut state = running(10);
        let doc = dom.top_document();

        let first = full_pass(&mut dom, doc, &mut state, &cls);
        assert_eq!(first.actions, 1);
        assert_eq!(dom.events_for(b), ACTIVATION_SEQUENCE.to_vec());

        let second = full_pass(&mut dom, doc, &mut state, &cls);
        assert_eq!(second.actions, 0);
        assert_eq!(second.skipped_seen, 1);
    }

    #[test]
    fn test_budget_caps_actions() {
        let mut dom = page(
            r#"<body><button>Show more</button><button>Ver más</button>
               <button>Load more</button></body>"#,
        );
        let cls = Classifier::new(&ExpansionConfig::default());
        let mut state = running(2);
        let doc = dom.top_document();
        let report = full_pass(&mut dom, doc, &mut state, &cls);
        assert_eq!(report.actions, 2);
        assert!(report.budget_exhausted);
        assert_eq!(state.click_budget, 0);
    }

    #[test]
    fn test_failing_listener_does_not_abort_pass() {
        let mut dom = page(r#"<body><button id="a">Show more</button><button id="b">Load more</button></body>"#);
        let a = node(&dom, "#a");
        dom.add_listener(
            a,
            EventKind::Click,
            listener(|_, _| {
                Err(crate::core::error::DomError::ListenerFailed(
                    "widget threw".into(),
                ))
            }),
        );
        let cls = Classifier::new(&ExpansionConfig::default());
        let mut state = running(10);
        let doc = dom.top_document();
        let report = full_pass(&mut dom, doc, &mut state, &cls);
        assert_eq!(report.failed, 1);
        assert_eq!(report.actions, 1);
        assert!(state.activated.contains(&a));
    }

    #[test]
    fn test_delegated_toggle_runs_once_per_pass() {
        let mut dom = page(r#"<body><div id="t" class="toggle"><span>Show more</span></div></body>"#);
        let toggle = node(&dom, "#t");
        let clicks = Rc::new(Cell::new(0));
        let counter = Rc::clone(&clicks);
        dom.add_listener(
            toggle,
            EventKind::Click,
            listener(move |_, _| {
                counter.set(counter.get() + 1);
                Ok(())
            }),
        );
        let cls = Classifier::new(&ExpansionConfig::default());
        let mut state = running(10);
        let doc = dom.top_document();
        let report = full_pass(&mut dom, doc, &mut state, &cls);
        assert_eq!(report.actions, 1);
        assert_eq!(clicks.get(), 1);

        full_pass(&mut dom, doc, &mut state, &cls);
        assert_eq!(clicks.get(), 1);
    }

    #[test]
    fn test_disclosure_input_checked_with_change() {
        let mut dom = page(r#"<body><input id="t" type="checkbox"><label for="t">x</label></body>"#);
        let input = node(&dom, "#t");
        let fired = Rc::new(Cell::new(false));
        let seen = Rc::clone(&fired);
        dom.add_listener(
            input,
            EventKind::Change,
            listener(move |_, _| {
                seen.set(true);
                Ok(())
            }),
        );
        let cls = Classifier::new(&ExpansionConfig::default());
        let mut state = running(10);
        let doc = dom.top_document();
        let report = full_pass(&mut dom, doc, &mut state, &cls);
        assert_eq!(report.inputs_checked, 1);
        assert!(dom.is_checked(input));
        assert!(fired.get());
    }

    #[test]
    fn test_truncation_stripped_once() {
        let mut dom = page(
            r#"<body><div id="c" class="comment collapsed" style="max-height: 60px; overflow: hidden">long</div></body>"#,
        );
        let c = node(&dom, "#c");
        let cls = Classifier::new(&ExpansionConfig::default());
        let mut state = running(10);
        let doc = dom.top_document();
        assert_eq!(full_pass(&mut dom, doc, &mut state, &cls).styles_stripped, 1);
        assert!(!dom.has_class(c, "collapsed"));
        assert_eq!(dom.style_property(c, "max-height").as_deref(), Some("none"));
        assert_eq!(dom.style_property(c, "overflow").as_deref(), Some("visible"));
        assert_eq!(full_pass(&mut dom, doc, &mut state, &cls).styles_stripped, 0);
    }

    #[test]
    fn test_jiggle_restores_offset() {
        let mut dom = page(&format!("<body>{}</body>", "<p>line</p>".repeat(100)));
        dom.scroll_to(300.0);
        let kill = KillSwitch::new();
        jiggle(&mut dom, &kill);
        assert_eq!(dom.scroll_y(), 300.0);
    }

    #[test]
    fn test_killed_state_does_nothing() {
        let mut dom = page(r#"<body><button id="b">Show more</button></body>"#);
        let cls = Classifier::new(&ExpansionConfig::default());
        let mut state = running(10);
        state.kill.trip();
        let doc = dom.top_document();
        let report = full_pass(&mut dom, doc, &mut state, &cls);
        assert!(report.killed);
        assert_eq!(report.actions, 0);
        assert!(dom.event_log().is_empty());
    }
}
