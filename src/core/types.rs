use serde::{Deserialize, Serialize};

/// Why a node was classified as an expand control.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    /// Label matched a locale pattern (`locale` names the table entry).
    Label { locale: String },
    /// Label matched a reply-thread pattern.
    ReplyLabel,
    /// Vendor attribute/class signature.
    Vendor { selector: String },
    /// Vendor signature of a reply-thread toggle.
    ReplyVendor { selector: String },
    /// `<summary>` of a closed `<details>`.
    ClosedDetails,
    /// `aria-expanded="false"`.
    AriaCollapsed,
    /// Unchecked checkbox/radio used as a disclosure toggle.
    DisclosureInput,
}

impl MatchKind {
    pub fn is_reply(&self) -> bool {
        matches!(self, MatchKind::ReplyLabel | MatchKind::ReplyVendor { .. })
    }
}

/// Outcome of one expansion pass (full tick or mutation fast path).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassReport {
    /// Successful activations (clicks + disclosure inputs), each paid from the budget.
    pub actions: u32,
    pub inputs_checked: u32,
    pub styles_stripped: u32,
    pub candidates: u32,
    pub skipped_unsafe: u32,
    pub skipped_seen: u32,
    pub failed: u32,
    pub budget_exhausted: bool,
    pub killed: bool,
}

impl PassReport {
    pub fn merge(&mut self, other: PassReport) {
        self.actions += other.actions;
        self.inputs_checked += other.inputs_checked;
        self.styles_stripped += other.styles_stripped;
        self.candidates += other.candidates;
        self.skipped_unsafe += other.skipped_unsafe;
        self.skipped_seen += other.skipped_seen;
        self.failed += other.failed;
        self.budget_exhausted |= other.budget_exhausted;
        self.killed |= other.killed;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FreezeReason {
    /// Enough idle ticks and enough quiet time.
    Quiescent,
    /// Maximum session duration reached.
    MaxDuration,
    /// Maximum pass count reached.
    MaxPasses,
    /// Explicit freeze request (hotkey).
    Requested,
}

/// Summary of a finished session, as printed by the CLI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionReport {
    pub mode: String,
    pub passes: u32,
    pub total_actions: u64,
    pub elapsed_ms: u64,
    pub freeze_reason: Option<FreezeReason>,
    pub activated_nodes: usize,
    pub shadow_roots: usize,
}
