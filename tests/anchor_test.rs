use std::time::Duration;

use leer_tranquilo::anchor::{capture, restore, AnchorKeeper, PositionLengthRanker, RestoreOutcome};
use leer_tranquilo::core::config::AnchorConfig;
use leer_tranquilo::features::session_store::{anchor_key, SessionStore};
use leer_tranquilo::{parse_page, Dom, KillSwitch, MemorySessionStore, NodeId, SharedDom};
use url::Url;

fn story_url() -> Url {
    Url::parse("https://diario.example/nota/123").unwrap()
}

fn comments(n: usize) -> String {
    (0..n)
        .map(|i| format!("<p>Comentario {i}: opinión sobre el pleno municipal.</p>"))
        .collect()
}

fn located(outcome: RestoreOutcome) -> NodeId {
    match outcome {
        RestoreOutcome::Selector { node, .. } | RestoreOutcome::Snippet { node, .. } => node,
        other => panic!("anchor not located: {other:?}"),
    }
}

fn drift(dom: &Dom, node: NodeId, offset: f64) -> f64 {
    (dom.bounding_client_rect(node).y - offset).abs()
}

#[test]
fn test_injected_siblings_do_not_move_the_reader() {
    let config = AnchorConfig::default();
    let mut before = parse_page(story_url(), &format!("<body>{}</body>", comments(200)));
    before.scroll_to(1500.0);
    let record = capture(&before, &config).expect("text under the reading line");
    let offset = record.anchor_offset.unwrap();

    // Same article on reload, with five ad slots injected above the comments.
    let ads = r#"<div class="ad">Publicidad</div>"#.repeat(5);
    let mut after = parse_page(story_url(), &format!("<body>{ads}{}</body>", comments(200)));
    let outcome = restore(&mut after, &record, &config, None, &PositionLengthRanker::default());

    let node = located(outcome);
    assert!(after.normalized_text(node).contains(&record.snippet));
    assert!(drift(&after, node, offset) <= 0.05 * after.viewport().height);
    assert_eq!(after.scroll_y(), record.scroll_y + 100.0);
}

#[test]
fn test_rerendered_widget_found_by_snippet() {
    let config = AnchorConfig::default();
    let mut before = parse_page(
        story_url(),
        &format!(r#"<body><div id="comments">{}</div></body>"#, comments(200)),
    );
    before.scroll_to(1500.0);
    let record = capture(&before, &config).unwrap();
    assert!(record.selector.as_deref().is_some_and(|s| s.starts_with("#comments")));

    let rerendered: String = (0..200)
        .map(|i| format!("<article><p>Comentario {i}: opinión sobre el pleno municipal.</p></article>"))
        .collect();
    let mut after = parse_page(
        story_url(),
        &format!(r#"<body><section class="thread">{rerendered}</section></body>"#),
    );
    let outcome = restore(&mut after, &record, &config, None, &PositionLengthRanker::default());

    assert!(matches!(outcome, RestoreOutcome::Snippet { .. }), "{outcome:?}");
    let node = located(outcome);
    assert!(drift(&after, node, record.anchor_offset.unwrap()) <= 0.05 * after.viewport().height);
}

#[test]
fn test_unknown_text_falls_back_to_offset() {
    let config = AnchorConfig::default();
    let mut before = parse_page(story_url(), &format!("<body>{}</body>", comments(200)));
    before.scroll_to(1500.0);
    let record = capture(&before, &config).unwrap();

    let other: String = (0..200).map(|i| format!("<li>Otra nota, párrafo {i}.</li>")).collect();
    let mut after = parse_page(story_url(), &format!("<body><ul>{other}</ul></body>"));
    let outcome = restore(&mut after, &record, &config, None, &PositionLengthRanker::default());
    assert_eq!(outcome, RestoreOutcome::Offset { scroll_y: 1500.0 });
}

fn liked_comments(n: usize, likes: usize) -> String {
    (0..n)
        .map(|i| format!(r#"<div id="c{i}"><p>Comentario {i}: opinión sobre el pleno. {likes} me gusta</p></div>"#))
        .collect()
}

#[test]
fn test_selector_hit_survives_text_change() {
    let config = AnchorConfig::default();
    let mut before = parse_page(story_url(), &format!("<body>{}</body>", liked_comments(200, 12)));
    before.scroll_to(1500.0);
    let record = capture(&before, &config).unwrap();
    assert!(record.snippet.contains("12 me gusta"));
    let offset = record.anchor_offset.unwrap();

    // The like counter ticked and ten ad rows landed above the thread.
    let ads = r#"<div class="ad">Publicidad</div>"#.repeat(10);
    let mut after = parse_page(
        story_url(),
        &format!("<body>{ads}{}</body>", liked_comments(200, 13)),
    );
    let outcome = restore(&mut after, &record, &config, None, &PositionLengthRanker::default());

    assert!(matches!(outcome, RestoreOutcome::Selector { .. }), "{outcome:?}");
    let node = located(outcome);
    assert!(drift(&after, node, offset) <= 0.05 * after.viewport().height);
    assert_eq!(after.scroll_y(), record.scroll_y + 200.0);
}

fn live_page() -> SharedDom {
    parse_page(story_url(), &format!("<body>{}</body>", comments(200))).shared()
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn test_mutation_burst_triggers_restore() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let dom = live_page();
            let kill = KillSwitch::new();
            let keeper = AnchorKeeper::new(
                dom.clone(),
                MemorySessionStore::shared(),
                AnchorConfig::default(),
                kill.clone(),
            );
            let task = keeper.spawn();

            tokio::time::sleep(Duration::from_millis(3_000)).await;
            dom.borrow_mut().scroll_to(1500.0);
            tokio::time::sleep(Duration::from_millis(50)).await;
            assert!(keeper.stored().is_some());

            // A comment widget re-render pushes 50 rows in above the reader.
            {
                let mut page = dom.borrow_mut();
                let doc = page.top_document();
                let body = page.body(doc).unwrap();
                for i in 0..50 {
                    let first = page.children(body)[0];
                    let row = page.create_element(doc, "div");
                    let text = page.create_text(doc, &format!("Nuevo comentario {i}"));
                    page.append_child(row, text);
                    page.insert_before(body, row, first);
                }
            }
            assert_eq!(dom.borrow().scroll_y(), 1500.0);

            tokio::time::sleep(Duration::from_millis(400)).await;
            assert_eq!(dom.borrow().scroll_y(), 2500.0);

            kill.trip();
            task.await.unwrap();
        })
        .await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn test_soft_navigation_keys_records_by_path() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let dom = live_page();
            let store = MemorySessionStore::shared();
            let kill = KillSwitch::new();
            let keeper = AnchorKeeper::new(dom.clone(), store.clone(), AnchorConfig::default(), kill.clone());
            let task = keeper.spawn();
            let pause = || tokio::time::sleep(Duration::from_millis(300));

            tokio::time::sleep(Duration::from_millis(3_000)).await;
            dom.borrow_mut().scroll_to(1500.0);
            pause().await;

            let next = Url::parse("https://diario.example/nota/456").unwrap();
            dom.borrow_mut().push_state(next.clone());
            pause().await;
            assert_eq!(dom.borrow().scroll_y(), 1500.0, "nothing stored for the new path yet");

            dom.borrow_mut().scroll_to(300.0);
            pause().await;
            assert_eq!(store.len(), 2);
            assert!(store.get(&anchor_key(&next)).is_some());

            dom.borrow_mut().pop_state(story_url());
            tokio::time::sleep(Duration::from_millis(50)).await;
            assert_eq!(dom.borrow().scroll_y(), 1500.0);

            kill.trip();
            task.await.unwrap();
        })
        .await;
}
