pub mod bootstrap;
pub mod session_store;

pub use bootstrap::{boot_frame, FrameHandle};
pub use session_store::{MemorySessionStore, SessionStore, SharedStore};
