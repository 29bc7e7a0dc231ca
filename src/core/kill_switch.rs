//! Process-wide panic-stop.
//!
//! Every frame's session holds a clone of the same switch. Tripping it from any
//! frame is visible to all of them: the atomic flag is the cheap check made
//! before every mutating step, the `watch` channel wakes sessions that are
//! parked between ticks so they tear down immediately instead of at their next
//! timer. Once tripped it never resets.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::watch;
use tracing::warn;

#[derive(Clone)]
pub struct KillSwitch {
    flag: Arc<AtomicBool>,
    tx: Arc<watch::Sender<bool>>,
}

impl Default for KillSwitch {
    fn default() -> Self {
        Self::new()
    }
}

impl KillSwitch {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            tx: Arc::new(tx),
        }
    }

    pub fn is_tripped(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Trip the switch. Idempotent; returns `true` only for the first call.
    pub fn trip(&self) -> bool {
        let first = !self.flag.swap(true, Ordering::SeqCst);
        if first {
            warn!("🛑 panic-stop: kill switch tripped");
            self.tx.send_replace(true);
        }
        first
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    /// Resolve once the switch is tripped (immediately if it already is).
    pub async fn tripped(&self) {
        let mut rx = self.subscribe();
        // The sender lives as long as `self`, so `wait_for` only errors if it was dropped.
        let _ = rx.wait_for(|tripped| *tripped).await;
    }
}
