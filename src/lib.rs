pub mod anchor;
pub mod core;
pub mod dom;
pub mod expansion;
pub mod features;
pub mod scraping;

// --- Primary exports ---
pub use core::types;
pub use core::types::*;
pub use core::{EngineConfig, KillSwitch, Mode, SessionState};

pub use anchor::{AnchorKeeper, AnchorRecord, RestoreOutcome};
pub use dom::{html::parse_page, Dom, NodeId, SharedDom};
pub use expansion::{Classifier, ExpansionSession};
pub use features::{boot_frame, FrameHandle, MemorySessionStore};
