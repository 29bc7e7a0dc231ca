//! Adaptive tick scheduler and session state machine.
//!
//! `SchedulerCore` holds the pure decisions (delay, freeze); `ExpansionSession`
//! drives them on the current `LocalSet`, racing each inter-tick sleep against
//! the kill switch, the mutation observer and explicit freeze/stop requests.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::classifier::Classifier;
use super::executor::{full_pass, incremental_pass};
use super::traversal::{all_roots, deep_select};
use crate::core::config::{EngineConfig, SchedulerConfig};
use crate::core::kill_switch::KillSwitch;
use crate::core::session::{Mode, SessionState};
use crate::core::types::{FreezeReason, PassReport, SessionReport};
use crate::dom::{Dom, MutationObserverHandle, NodeId, SelectorList, SharedDom};

pub const FREEZE_STYLE_ID: &str = "lt-freeze";
pub const FROZEN_ATTR: &str = "data-lt-frozen";

const FREEZE_CSS: &str = "*, *::before, *::after { animation: none !important; \
transition: none !important; scroll-behavior: auto !important; } \
[style*=\"sticky\"], .sticky, .is-sticky { position: static !important; }";

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Decision {
    /// Sleep this long, then tick again.
    Continue(Duration),
    Freeze(FreezeReason),
}

/// Pure scheduling policy.
#[derive(Debug, Clone)]
pub struct SchedulerCore {
    config: SchedulerConfig,
}

impl SchedulerCore {
    pub fn new(config: SchedulerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Delay before the next tick: short after a productive pass, growing
    /// linearly with consecutive idle ticks up to `max_delay_ms`.
    pub fn next_delay(&self, productive: bool, idle_ticks: u32) -> Duration {
        let ms = if productive {
            self.config.active_delay_ms
        } else {
            self.config
                .idle_delay_ms
                .saturating_mul(u64::from(idle_ticks.max(1)))
                .min(self.config.max_delay_ms)
        };
        Duration::from_millis(ms)
    }

    /// Book-keep a finished tick and decide what happens next.
    pub fn after_tick(&self, state: &mut SessionState, report: &PassReport, now: Instant) -> Decision {
        state.passes += 1;
        if report.actions > 0 {
            state.idle_ticks = 0;
        } else {
            state.idle_ticks += 1;
        }

        let delay = self.next_delay(report.actions > 0, state.idle_ticks);
        if state.mode == Mode::Persistent {
            return Decision::Continue(delay);
        }

        let started = state.started_at.unwrap_or(now);
        let elapsed = now.saturating_duration_since(started);
        let max_duration = Duration::from_millis(self.config.max_duration_ms);
        if elapsed >= max_duration {
            return Decision::Freeze(FreezeReason::MaxDuration);
        }
        if self.config.max_passes.is_some_and(|max| state.passes >= max) {
            return Decision::Freeze(FreezeReason::MaxPasses);
        }

        let quiet = now.saturating_duration_since(state.last_action_at.unwrap_or(started));
        if state.idle_ticks >= self.config.freeze_idle_ticks
            && quiet >= Duration::from_millis(self.config.freeze_quiet_ms)
        {
            return Decision::Freeze(FreezeReason::Quiescent);
        }

        // Never sleep past the duration ceiling.
        Decision::Continue(delay.min(max_duration - elapsed))
    }
}

/// One expansion session for one frame document.
pub struct ExpansionSession {
    dom: SharedDom,
    document: NodeId,
    state: Rc<RefCell<SessionState>>,
    classifier: Rc<Classifier>,
    core: SchedulerCore,
    observer: RefCell<Option<MutationObserverHandle>>,
    freeze_reason: RefCell<Option<FreezeReason>>,
    wake: Notify,
}

impl ExpansionSession {
    pub fn new(dom: SharedDom, document: NodeId, config: &EngineConfig, kill: KillSwitch) -> Rc<Self> {
        let state = SessionState::new(config.scheduler.max_budget, kill);
        Rc::new(Self {
            dom,
            document,
            state: Rc::new(RefCell::new(state)),
            classifier: Rc::new(Classifier::new(&config.expansion)),
            core: SchedulerCore::new(config.scheduler.clone()),
            observer: RefCell::new(None),
            freeze_reason: RefCell::new(None),
            wake: Notify::new(),
        })
    }

    /// Shared state handle (registry forwarding, status queries).
    pub fn state(&self) -> Rc<RefCell<SessionState>> {
        Rc::clone(&self.state)
    }

    pub fn classifier(&self) -> Rc<Classifier> {
        Rc::clone(&self.classifier)
    }

    pub fn mode(&self) -> Mode {
        self.state.borrow().mode
    }

    pub fn status_label(&self) -> &'static str {
        self.mode().label()
    }

    pub fn freeze_reason(&self) -> Option<FreezeReason> {
        *self.freeze_reason.borrow()
    }

    /// Spawn the session loop on the current `LocalSet`.
    ///
    /// Returns `None` (and does nothing) unless the session is idle and the
    /// kill switch is untouched.
    pub fn start(self: &Rc<Self>, mode: Mode) -> Option<JoinHandle<SessionReport>> {
        if !self.begin(mode) {
            return None;
        }
        let this = Rc::clone(self);
        Some(tokio::task::spawn_local(async move { this.drive().await }))
    }

    /// Run the session to completion in place. `None` when the start was rejected.
    pub async fn run(&self, mode: Mode) -> Option<SessionReport> {
        if !self.begin(mode) {
            return None;
        }
        Some(self.drive().await)
    }

    fn begin(&self, mode: Mode) -> bool {
        if !mode.is_running() {
            warn!("start({:?}) ignored: not a running mode", mode);
            return false;
        }
        let mut state = self.state.borrow_mut();
        if state.mode != Mode::Idle || state.killed() {
            debug!("start({:?}) ignored in {:?}", mode, state.mode);
            return false;
        }
        state.started_at = Some(Instant::now());
        state.set_mode(mode);
        let handle = self.dom.borrow_mut().observe(self.document);
        *self.observer.borrow_mut() = Some(handle);
        true
    }

    async fn drive(&self) -> SessionReport {
        let kill = self.state.borrow().kill.clone();
        let notify = match self.observer.borrow().as_ref() {
            Some(handle) => Rc::clone(&handle.notify),
            None => Rc::new(Notify::new()),
        };

        loop {
            if kill.is_tripped() {
                self.teardown(Mode::Stopped);
                break;
            }
            if !self.mode().is_running() {
                break;
            }

            let decision = {
                let mut dom = self.dom.borrow_mut();
                let mut state = self.state.borrow_mut();
                let refill = self.core.config().budget_refill;
                state.refill_budget(refill);
                let report = full_pass(&mut dom, self.document, &mut state, &self.classifier);
                self.core.after_tick(&mut state, &report, Instant::now())
            };

            let delay = match decision {
                Decision::Freeze(reason) => {
                    self.freeze_with(reason);
                    break;
                }
                Decision::Continue(delay) => delay,
            };

            let sleep = tokio::time::sleep(delay);
            tokio::pin!(sleep);
            loop {
                tokio::select! {
                    _ = &mut sleep => break,
                    _ = kill.tripped() => break,
                    _ = self.wake.notified() => break,
                    _ = notify.notified() => {
                        self.on_mutations();
                    }
                }
                if !self.state.borrow().may_act() {
                    break;
                }
            }
        }
        self.report()
    }

    /// Mutation fast path: classify and execute inside inserted subtrees.
    fn on_mutations(&self) -> PassReport {
        let Some(handle) = self.observer.borrow().clone() else {
            return PassReport::default();
        };
        let mut dom = self.dom.borrow_mut();
        let records = dom.take_records(&handle);
        let mut state = self.state.borrow_mut();
        if !state.may_act() {
            return PassReport::default();
        }
        let added: Vec<NodeId> = records
            .into_iter()
            .flat_map(|record| record.added)
            .collect();
        incremental_pass(&mut dom, &added, &mut state, &self.classifier)
    }

    /// Explicit freeze request. Returns `false` when already terminal or killed.
    pub fn freeze(&self) -> bool {
        {
            let state = self.state.borrow();
            if state.mode.is_terminal() || state.killed() {
                return false;
            }
        }
        self.freeze_with(FreezeReason::Requested);
        self.wake.notify_one();
        true
    }

    /// Panic-stop: trip the shared switch and tear this session down. Irreversible.
    pub fn stop(&self) {
        let kill = self.state.borrow().kill.clone();
        kill.trip();
        self.teardown(Mode::Stopped);
        self.wake.notify_one();
    }

    fn teardown(&self, mode: Mode) {
        if let Some(handle) = self.observer.borrow_mut().take() {
            self.dom.borrow_mut().disconnect(&handle);
        }
        self.state.borrow_mut().set_mode(mode);
    }

    fn freeze_with(&self, reason: FreezeReason) {
        if self.state.borrow().killed() {
            self.teardown(Mode::Stopped);
            return;
        }
        self.teardown(Mode::Frozen);
        *self.freeze_reason.borrow_mut() = Some(reason);

        let mut dom = self.dom.borrow_mut();
        let state = self.state.borrow();
        apply_freeze_style(&mut dom, self.document);
        let roots = all_roots(&dom, self.document, &state.roots);
        let paused = pause_media(&mut dom, &roots);
        info!("🧊 frozen ({:?}), {} media paused", reason, paused);
    }

    pub fn report(&self) -> SessionReport {
        let state = self.state.borrow();
        let elapsed_ms = state
            .started_at
            .map(|t| t.elapsed().as_millis() as u64)
            .unwrap_or(0);
        SessionReport {
            mode: format!("{:?}", state.mode),
            passes: state.passes,
            total_actions: state.total_actions,
            elapsed_ms,
            freeze_reason: self.freeze_reason(),
            activated_nodes: state.activated.len(),
            shadow_roots: state.roots.len(),
        }
    }
}

/// Inject the freeze stylesheet (once) and mark the document element.
pub fn apply_freeze_style(dom: &mut Dom, document: NodeId) {
    let already = dom
        .query_selector(document, &format!("#{FREEZE_STYLE_ID}"))
        .ok()
        .flatten()
        .is_some();
    if !already {
        let parent = dom
            .query_selector(document, "head")
            .ok()
            .flatten()
            .or_else(|| dom.document_element(document))
            .unwrap_or(document);
        let style = dom.create_element(document, "style");
        let _ = dom.set_attr(style, "id", FREEZE_STYLE_ID);
        dom.set_text(style, FREEZE_CSS);
        dom.append_child(parent, style);
    }
    if let Some(root) = dom.document_element(document) {
        let _ = dom.set_attr(root, FROZEN_ATTR, "true");
    }
}

/// Pause every playing `<video>`/`<audio>` in `roots`. Returns how many.
pub fn pause_media(dom: &mut Dom, roots: &[NodeId]) -> usize {
    let Ok(media) = SelectorList::parse("video, audio") else {
        return 0;
    };
    let playing: Vec<NodeId> = roots
        .iter()
        .flat_map(|root| deep_select(dom, *root, &media, None, None))
        .filter(|node| dom.is_playing(*node))
        .collect();
    for node in &playing {
        let _ = dom.set_playing(*node, false);
    }
    playing.len()
}
