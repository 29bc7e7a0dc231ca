pub mod browser_manager;
pub mod snapshot;

pub use snapshot::{render, SnapshotOptions};
