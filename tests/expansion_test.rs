use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use leer_tranquilo::core::config::EngineConfig;
use leer_tranquilo::dom::{listener, EventKind, ShadowMode};
use leer_tranquilo::dom::html::load_into;
use leer_tranquilo::expansion::scheduler::{FREEZE_STYLE_ID, FROZEN_ATTR};
use leer_tranquilo::{
    boot_frame, parse_page, ExpansionSession, FreezeReason, KillSwitch, MemorySessionStore, Mode,
    NodeId, SessionReport, SharedDom,
};
use tokio::time::Instant;
use url::Url;

fn page(markup: &str) -> SharedDom {
    parse_page(Url::parse("https://diario.example/nota/123").unwrap(), markup).shared()
}

fn node(dom: &SharedDom, selector: &str) -> NodeId {
    let dom = dom.borrow();
    dom.query_selector(dom.top_document(), selector)
        .unwrap()
        .unwrap_or_else(|| panic!("no match for {selector}"))
}

fn clicks(dom: &SharedDom, node: NodeId) -> usize {
    dom.borrow()
        .events_for(node)
        .into_iter()
        .filter(|k| *k == EventKind::Click)
        .count()
}

async fn one_shot(dom: &SharedDom, config: &EngineConfig, kill: KillSwitch) -> (SessionReport, Rc<ExpansionSession>) {
    let document = dom.borrow().top_document();
    let session = ExpansionSession::new(dom.clone(), document, config, kill);
    let report = session.run(Mode::OneShot).await.expect("session starts");
    (report, session)
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn test_each_control_activated_once_per_session() {
    let dom = page(
        r#"<body>
            <button id="a">Ver más</button>
            <button id="b">Show more</button>
            <span id="c" role="button">Mostrar más comentarios</span>
            <details id="d"><summary id="s">Comentarios</summary><p>Hola</p></details>
        </body>"#,
    );
    let (report, _) = one_shot(&dom, &EngineConfig::default(), KillSwitch::new()).await;

    assert!(report.passes >= 4, "several passes ran: {report:?}");
    assert_eq!(report.total_actions, 4);
    for id in ["#a", "#b", "#c", "#s"] {
        assert_eq!(clicks(&dom, node(&dom, id)), 1, "{id} clicked exactly once");
    }
    // A second click on the summary would have closed it again.
    assert!(dom.borrow().has_attr(node(&dom, "#d"), "open"));
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn test_quiet_page_freezes_on_quiescence() {
    let dom = page("<body><p>Sin comentarios todavía.</p></body>");
    let (report, session) = one_shot(&dom, &EngineConfig::default(), KillSwitch::new()).await;

    assert_eq!(report.freeze_reason, Some(FreezeReason::Quiescent));
    assert_eq!(report.passes, 4);
    assert!(report.elapsed_ms >= 4_000);
    assert_eq!(session.mode(), Mode::Frozen);

    let dom = dom.borrow();
    let doc = dom.top_document();
    assert!(dom.query_selector(doc, &format!("#{FREEZE_STYLE_ID}")).unwrap().is_some());
    let root = dom.document_element(doc).unwrap();
    assert_eq!(dom.attr(root, FROZEN_ATTR), Some("true"));
}

/// A feed that appends another "load more" control for every click it gets.
fn endless_feed() -> (SharedDom, Rc<Cell<u64>>) {
    let dom = page(r#"<body><div id="feed"><button>Load more</button></div></body>"#);
    let feed = node(&dom, "#feed");
    let served = Rc::new(Cell::new(0u64));
    let counter = Rc::clone(&served);
    dom.borrow_mut().add_listener(
        feed,
        EventKind::Click,
        listener(move |dom, _| {
            counter.set(counter.get() + 1);
            let doc = dom.top_document();
            let button = dom.create_element(doc, "button");
            let label = dom.create_text(doc, "Load more");
            dom.append_child(button, label);
            dom.append_child(feed, button);
            Ok(())
        }),
    );
    (dom, served)
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn test_endless_feed_stops_at_max_duration() {
    let (dom, served) = endless_feed();
    let mut config = EngineConfig::default();
    config.scheduler.max_duration_ms = 5_000;

    let (report, _) = one_shot(&dom, &config, KillSwitch::new()).await;

    assert_eq!(report.freeze_reason, Some(FreezeReason::MaxDuration));
    assert!(report.elapsed_ms >= 5_000 && report.elapsed_ms < 5_100, "{report:?}");
    assert_eq!(served.get(), report.total_actions);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn test_budget_bounds_total_activations() {
    let (dom, _) = endless_feed();
    let mut config = EngineConfig::default();
    config.scheduler.max_duration_ms = 3_000;
    let max_budget = u64::from(config.scheduler.max_budget);
    let refill = u64::from(config.scheduler.budget_refill);

    let (report, session) = one_shot(&dom, &config, KillSwitch::new()).await;

    assert!(report.total_actions > max_budget, "budget was refilled between ticks");
    assert!(report.total_actions <= max_budget + refill * u64::from(report.passes));
    assert!(session.state().borrow().click_budget <= config.scheduler.max_budget);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn test_links_and_ad_slots_never_activated() {
    let dom = page(
        r##"<body>
            <a id="real" href="/nota/123/comentarios?pagina=2">Ver más</a>
            <a id="hash" href="#comentarios">Ver más comentarios</a>
            <div class="ad-slot"><button id="ad">Show more</button></div>
            <div id="taboola-below-article"><button id="promo">Load more</button></div>
            <button id="ok">Cargar más</button>
        </body>"##,
    );
    let (report, _) = one_shot(&dom, &EngineConfig::default(), KillSwitch::new()).await;

    assert!(dom.borrow().navigations().is_empty());
    for id in ["#real", "#ad", "#promo"] {
        assert!(dom.borrow().events_for(node(&dom, id)).is_empty(), "{id} untouched");
    }
    assert_eq!(clicks(&dom, node(&dom, "#hash")), 1);
    assert_eq!(clicks(&dom, node(&dom, "#ok")), 1);
    assert_eq!(report.total_actions, 2);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn test_kill_inside_listener_stops_the_pass() {
    let dom = page(r#"<body><button id="a">Ver más</button><button id="b">Ver más</button></body>"#);
    let kill = KillSwitch::new();
    let a = node(&dom, "#a");
    let b = node(&dom, "#b");
    let switch = kill.clone();
    dom.borrow_mut().add_listener(
        a,
        EventKind::Click,
        listener(move |_, _| {
            switch.trip();
            Ok(())
        }),
    );

    let (report, session) = one_shot(&dom, &EngineConfig::default(), kill).await;

    assert_eq!(session.mode(), Mode::Stopped);
    assert_eq!(report.freeze_reason, None);
    assert_eq!(
        dom.borrow().events_for(a),
        vec![EventKind::PointerDown, EventKind::MouseDown, EventKind::Click]
    );
    assert!(dom.borrow().events_for(b).is_empty());
    let dom = dom.borrow();
    let doc = dom.top_document();
    assert!(dom.query_selector(doc, &format!("#{FREEZE_STYLE_ID}")).unwrap().is_none());
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn test_reply_toggles_follow_config() {
    let markup = r#"<body><button id="r">Ver 3 respuestas</button><button id="m">Ver más</button></body>"#;

    let dom = page(markup);
    let mut config = EngineConfig::default();
    config.expansion.expand_replies = false;
    one_shot(&dom, &config, KillSwitch::new()).await;
    assert_eq!(clicks(&dom, node(&dom, "#r")), 0);
    assert_eq!(clicks(&dom, node(&dom, "#m")), 1);

    let dom = page(markup);
    one_shot(&dom, &EngineConfig::default(), KillSwitch::new()).await;
    assert_eq!(clicks(&dom, node(&dom, "#r")), 1);
    assert_eq!(clicks(&dom, node(&dom, "#m")), 1);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn test_inserted_replies_expanded_without_waiting_for_tick() {
    let dom = page(r#"<body><div id="thread"><button id="open">Ver respuestas</button></div></body>"#);
    let thread = node(&dom, "#thread");
    let opener = node(&dom, "#open");
    let nested_clicked_at: Rc<RefCell<Option<Instant>>> = Rc::new(RefCell::new(None));

    let stamp = Rc::clone(&nested_clicked_at);
    dom.borrow_mut().add_listener(
        opener,
        EventKind::Click,
        listener(move |dom, _| {
            let doc = dom.top_document();
            let replies = dom.create_element(doc, "div");
            let more = dom.create_element(doc, "button");
            let label = dom.create_text(doc, "Ver más");
            dom.append_child(more, label);
            dom.append_child(replies, more);
            let stamp = Rc::clone(&stamp);
            dom.add_listener(
                more,
                EventKind::Click,
                listener(move |_, _| {
                    stamp.borrow_mut().get_or_insert(Instant::now());
                    Ok(())
                }),
            );
            dom.append_child(thread, replies);
            Ok(())
        }),
    );

    let start = Instant::now();
    one_shot(&dom, &EngineConfig::default(), KillSwitch::new()).await;

    let clicked_at = nested_clicked_at.borrow().expect("nested control expanded");
    // The next full pass would only run after the active delay.
    assert!(clicked_at.duration_since(start) < Duration::from_millis(400));
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn test_deep_control_reached_once_and_cross_origin_ignored() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let dom = page(
                r#"<body>
                    <iframe id="same" srcdoc="<div id='host'></div>"></iframe>
                    <iframe id="other" src="https://comments.vendor.example/embed"></iframe>
                </body>"#,
            );
            let same = node(&dom, "#same");
            let other = node(&dom, "#other");

            let (deep, remote) = {
                let mut page = dom.borrow_mut();
                let inner = page.content_document(same).unwrap().unwrap();
                let host = page.query_selector(inner, "#host").unwrap().unwrap();

                // closed → open → closed
                let r1 = page.attach_shadow(host, ShadowMode::Closed).unwrap();
                let d1 = page.create_element(inner, "div");
                page.append_child(r1, d1);
                let r2 = page.attach_shadow(d1, ShadowMode::Open).unwrap();
                let d2 = page.create_element(inner, "div");
                page.append_child(r2, d2);
                let r3 = page.attach_shadow(d2, ShadowMode::Closed).unwrap();
                let deep = page.create_element(inner, "button");
                let label = page.create_text(inner, "Ver más");
                page.append_child(deep, label);
                page.append_child(r3, deep);

                let foreign = page.element(other).and_then(|el| el.content_document).unwrap();
                load_into(&mut page, foreign, "<body><button id='remote'>Ver más</button></body>");
                let remote = page.query_selector(foreign, "#remote").unwrap().unwrap();
                (deep, remote)
            };

            let kill = KillSwitch::new();
            let document = dom.borrow().top_document();
            let handle = boot_frame(
                dom.clone(),
                document,
                &EngineConfig::default(),
                kill.clone(),
                MemorySessionStore::shared(),
            );
            assert_eq!(handle.session().state().borrow().roots.len(), 3);
            assert!(handle.start(Mode::OneShot));
            let report = handle.finished().await;

            assert_eq!(report.freeze_reason, Some(FreezeReason::Quiescent));
            assert_eq!(clicks(&dom, deep), 1);
            assert!(dom.borrow().events_for(remote).is_empty());

            kill.trip();
            handle.shutdown();
        })
        .await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn test_persistent_session_freezes_on_request() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let dom = page(r#"<body><video id="v"></video><button>Ver más</button></body>"#);
            let video = node(&dom, "#v");
            dom.borrow_mut().set_playing(video, true).unwrap();

            let kill = KillSwitch::new();
            let document = dom.borrow().top_document();
            let handle = boot_frame(
                dom.clone(),
                document,
                &EngineConfig::default(),
                kill.clone(),
                MemorySessionStore::shared(),
            );
            assert!(handle.start(Mode::Persistent));
            assert!(!handle.start(Mode::OneShot), "already running");

            // Far beyond any one-shot ceiling.
            tokio::time::sleep(Duration::from_secs(120)).await;
            assert_eq!(handle.session().mode(), Mode::Persistent);

            assert!(handle.freeze());
            let report = handle.finished().await;
            assert_eq!(report.freeze_reason, Some(FreezeReason::Requested));
            assert_eq!(report.mode, "Frozen");
            assert_eq!(handle.status_label(), "Frozen");
            assert!(!dom.borrow().is_playing(video));
            assert!(!handle.freeze(), "already frozen");

            kill.trip();
            handle.shutdown();
        })
        .await;
}
