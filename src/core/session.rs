//! Per-frame expansion session state.
//!
//! One `SessionState` is created per page/frame load and passed by reference to
//! every subsystem. Only the kill switch is shared across frames.

use std::collections::HashSet;

use tokio::time::Instant;
use tracing::info;

use super::kill_switch::KillSwitch;
use crate::dom::{Dom, NodeId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Idle,
    OneShot,
    Persistent,
    Frozen,
    Stopped,
}

impl Mode {
    pub fn is_running(self) -> bool {
        matches!(self, Mode::OneShot | Mode::Persistent)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Mode::Frozen | Mode::Stopped)
    }

    /// Short label for the control button.
    pub fn label(self) -> &'static str {
        match self {
            Mode::Idle => "Expand & Freeze",
            Mode::OneShot => "Expanding…",
            Mode::Persistent => "Expanding (persistent)",
            Mode::Frozen => "Frozen",
            Mode::Stopped => "Stopped",
        }
    }
}

pub(crate) fn log_state(mode: Mode) {
    info!("session_state={:?}", mode);
}

/// Set of shadow roots registered for this page. Append-only.
#[derive(Debug, Default, Clone)]
pub struct ShadowRootRegistry {
    roots: Vec<NodeId>,
    seen: HashSet<NodeId>,
}

impl ShadowRootRegistry {
    /// Register a shadow boundary. Returns `false` when it was already known.
    pub fn register_root(&mut self, root: NodeId) -> bool {
        if self.seen.insert(root) {
            self.roots.push(root);
            true
        } else {
            false
        }
    }

    pub fn contains(&self, root: NodeId) -> bool {
        self.seen.contains(&root)
    }

    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    pub fn len(&self) -> usize {
        self.roots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// Registered roots whose host sits inside `node`'s composed subtree.
    pub fn hosted_under<'a>(
        &'a self,
        dom: &'a Dom,
        node: NodeId,
    ) -> impl Iterator<Item = NodeId> + 'a {
        self.roots
            .iter()
            .copied()
            .filter(move |root| match dom.composed_parent(*root) {
                Some(host) => dom.is_composed_descendant(host, node),
                None => false,
            })
    }
}

pub struct SessionState {
    pub mode: Mode,
    pub click_budget: u32,
    pub max_budget: u32,
    pub idle_ticks: u32,
    pub passes: u32,
    pub started_at: Option<Instant>,
    pub last_action_at: Option<Instant>,
    pub total_actions: u64,
    pub kill: KillSwitch,
    pub activated: HashSet<NodeId>,
    pub roots: ShadowRootRegistry,
}

impl SessionState {
    pub fn new(max_budget: u32, kill: KillSwitch) -> Self {
        Self {
            mode: Mode::Idle,
            click_budget: max_budget,
            max_budget,
            idle_ticks: 0,
            passes: 0,
            started_at: None,
            last_action_at: None,
            total_actions: 0,
            kill,
            activated: HashSet::new(),
            roots: ShadowRootRegistry::default(),
        }
    }

    pub fn killed(&self) -> bool {
        self.kill.is_tripped()
    }

    /// Mutating work is allowed: a running mode and no panic-stop.
    pub fn may_act(&self) -> bool {
        self.mode.is_running() && !self.killed()
    }

    pub fn set_mode(&mut self, mode: Mode) {
        if self.mode != mode {
            self.mode = mode;
            log_state(mode);
        }
    }

    pub fn refill_budget(&mut self, amount: u32) {
        self.click_budget = self.click_budget.saturating_add(amount).min(self.max_budget);
    }

    /// Spend one activation. Returns `false` (and spends nothing) when exhausted.
    pub fn spend(&mut self, now: Instant) -> bool {
        if self.click_budget == 0 {
            return false;
        }
        self.click_budget -= 1;
        self.total_actions += 1;
        self.last_action_at = Some(now);
        true
    }

    pub fn register_root(&mut self, root: NodeId) -> bool {
        self.roots.register_root(root)
    }
}
