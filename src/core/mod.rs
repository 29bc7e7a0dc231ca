pub mod config;
pub mod error;
pub mod kill_switch;
pub mod session;
pub mod types;

pub use config::EngineConfig;
pub use error::DomError;
pub use kill_switch::KillSwitch;
pub use session::{Mode, SessionState, ShadowRootRegistry};
