//! Long-running anchor keeper: captures on scroll/hide/unload, restores on
//! boot, page-show, focus, soft navigation and mutation bursts.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info};

use super::capture::capture;
use super::restore::{restore, PositionLengthRanker, RestoreOutcome, SnippetRanker};
use super::AnchorRecord;
use crate::core::config::AnchorConfig;
use crate::core::kill_switch::KillSwitch;
use crate::dom::{layout, PageEvent, SharedDom, Visibility};
use crate::features::session_store::{anchor_key, load_json, save_json, SharedStore};

pub struct AnchorKeeper {
    dom: SharedDom,
    store: SharedStore,
    config: AnchorConfig,
    kill: KillSwitch,
    ranker: RefCell<Rc<dyn SnippetRanker>>,
    last_record: RefCell<Option<AnchorRecord>>,
    last_write: Cell<Option<Instant>>,
    /// Scroll events before this instant were caused by our own restore.
    suppress_until: Cell<Option<Instant>>,
}

/// Timers owned by the event loop.
#[derive(Default)]
struct Timers {
    boot: VecDeque<Instant>,
    trailing_capture: Option<Instant>,
    burst_restore: Option<Instant>,
    burst_window: VecDeque<(Instant, usize)>,
}

impl Timers {
    fn next_deadline(&self) -> Option<Instant> {
        [
            self.boot.front().copied(),
            self.trailing_capture,
            self.burst_restore,
        ]
        .into_iter()
        .flatten()
        .min()
    }
}

impl AnchorKeeper {
    pub fn new(dom: SharedDom, store: SharedStore, config: AnchorConfig, kill: KillSwitch) -> Rc<Self> {
        Rc::new(Self {
            dom,
            store,
            config,
            kill,
            ranker: RefCell::new(Rc::new(PositionLengthRanker::default())),
            last_record: RefCell::new(None),
            last_write: Cell::new(None),
            suppress_until: Cell::new(None),
        })
    }

    /// Swap the snippet ranking policy.
    pub fn set_ranker(&self, ranker: Rc<dyn SnippetRanker>) {
        *self.ranker.borrow_mut() = ranker;
    }

    fn key(&self) -> String {
        anchor_key(self.dom.borrow().location())
    }

    pub fn stored(&self) -> Option<AnchorRecord> {
        load_json(self.store.as_ref(), &self.key())
    }

    /// Capture and persist now, bypassing the throttle. Equivalent records
    /// (same anchor, sub-threshold scroll delta) are not rewritten.
    pub fn capture_now(&self) -> Option<AnchorRecord> {
        if self.kill.is_tripped() {
            return None;
        }
        let record = {
            let mut dom = self.dom.borrow_mut();
            layout::refresh(&mut dom);
            capture(&dom, &self.config)?
        };
        let equivalent = self
            .last_record
            .borrow()
            .as_ref()
            .is_some_and(|prev| prev.is_equivalent(&record, self.config.min_scroll_delta_px));
        if equivalent {
            return None;
        }
        if save_json(self.store.as_ref(), &self.key(), &record) {
            self.last_write.set(Some(Instant::now()));
            *self.last_record.borrow_mut() = Some(record.clone());
        }
        Some(record)
    }

    /// Restore the stored anchor for the current location.
    pub fn restore_now(&self) -> RestoreOutcome {
        if self.kill.is_tripped() {
            return RestoreOutcome::NoRecord;
        }
        let Some(record) = self.stored() else {
            return RestoreOutcome::NoRecord;
        };
        let ranker = self.ranker.borrow().clone();
        let outcome = {
            let mut dom = self.dom.borrow_mut();
            restore(&mut dom, &record, &self.config, None, ranker.as_ref())
        };
        self.suppress_until.set(Some(
            Instant::now() + Duration::from_millis(self.config.capture_throttle_ms),
        ));
        *self.last_record.borrow_mut() = Some(record);
        debug!("anchor restore: {:?}", outcome);
        outcome
    }

    /// Leading-edge capture, or arm a trailing one inside the throttle window.
    fn on_scroll(&self, timers: &mut Timers, now: Instant) {
        if self.suppress_until.get().is_some_and(|t| now < t) || timers.burst_restore.is_some() {
            return;
        }
        // The reader took over; stop re-applying the boot position.
        timers.boot.clear();
        let throttle = Duration::from_millis(self.config.capture_throttle_ms);
        match self.last_write.get() {
            Some(last) if now.saturating_duration_since(last) < throttle => {
                timers.trailing_capture.get_or_insert(last + throttle);
            }
            _ => {
                self.capture_now();
            }
        }
    }

    fn on_mutations(&self, timers: &mut Timers, changed: usize, now: Instant) {
        let window = Duration::from_millis(self.config.burst_window_ms);
        timers.burst_window.push_back((now, changed));
        while timers
            .burst_window
            .front()
            .is_some_and(|(t, _)| now.saturating_duration_since(*t) > window)
        {
            timers.burst_window.pop_front();
        }
        let total: usize = timers.burst_window.iter().map(|(_, n)| n).sum();
        if total >= self.config.burst_threshold {
            debug!("mutation burst: {} nodes within {:?}", total, window);
            timers.burst_window.clear();
            timers.burst_restore =
                Some(now + Duration::from_millis(self.config.burst_debounce_ms));
        }
    }

    fn on_deadline(&self, timers: &mut Timers, now: Instant) {
        if timers.trailing_capture.is_some_and(|t| t <= now) {
            timers.trailing_capture = None;
            self.capture_now();
        }
        if timers.burst_restore.is_some_and(|t| t <= now) {
            timers.burst_restore = None;
            self.restore_now();
        }
        if timers.boot.front().is_some_and(|t| *t <= now) {
            timers.boot.pop_front();
            if self.restore_now().located() {
                timers.boot.clear();
            }
        }
    }

    fn on_page_event(&self, timers: &mut Timers, event: PageEvent, now: Instant) {
        match event {
            PageEvent::Scroll { .. } => self.on_scroll(timers, now),
            PageEvent::VisibilityChange(Visibility::Hidden) | PageEvent::BeforeUnload => {
                timers.trailing_capture = None;
                self.capture_now();
            }
            PageEvent::VisibilityChange(Visibility::Visible)
            | PageEvent::Focus
            | PageEvent::PageShow { .. } => {
                self.restore_now();
            }
            event if event.is_soft_navigation() => {
                // New (origin, path): nothing recorded there yet is the common case.
                *self.last_record.borrow_mut() = None;
                timers.trailing_capture = None;
                self.restore_now();
            }
            _ => {}
        }
    }

    /// Spawn [`AnchorKeeper::run`] on the current `LocalSet`.
    pub fn spawn(self: &Rc<Self>) -> JoinHandle<()> {
        let this = Rc::clone(self);
        tokio::task::spawn_local(async move { this.run().await })
    }

    /// Event loop; returns when the kill switch trips or the page goes away.
    pub async fn run(&self) {
        let (mut events, observer) = {
            let mut dom = self.dom.borrow_mut();
            let top = dom.top_document();
            (dom.subscribe(), dom.observe(top))
        };
        *self.last_record.borrow_mut() = self.stored();

        let start = Instant::now();
        let mut timers = Timers {
            boot: self
                .config
                .boot_retry_ms
                .iter()
                .map(|ms| start + Duration::from_millis(*ms))
                .collect(),
            ..Timers::default()
        };
        info!("⚓ anchor keeper armed for {}", self.key());

        loop {
            let deadline = timers.next_deadline();
            let far = Instant::now() + Duration::from_secs(24 * 3600);
            tokio::select! {
                _ = self.kill.tripped() => break,
                event = events.recv() => match event {
                    Some(event) => self.on_page_event(&mut timers, event, Instant::now()),
                    None => break,
                },
                _ = observer.notify.notified() => {
                    let changed: usize = self
                        .dom
                        .borrow_mut()
                        .take_records(&observer)
                        .iter()
                        .map(|r| r.added.len() + r.removed.len())
                        .sum();
                    if changed > 0 {
                        self.on_mutations(&mut timers, changed, Instant::now());
                    }
                }
                _ = sleep_until(deadline.unwrap_or(far)), if deadline.is_some() => {
                    self.on_deadline(&mut timers, Instant::now());
                }
            }
        }

        self.dom.borrow_mut().disconnect(&observer);
        debug!("anchor keeper stopped");
    }
}
