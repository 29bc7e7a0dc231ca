//! Deep-DOM heuristic expansion engine.
//!
//! Leaf-first: [`traversal`] walks every reachable tree, [`classifier`] decides
//! what is an expand control, [`executor`] activates candidates under a click
//! budget, and [`scheduler`] drives passes until the page goes quiet.

pub mod classifier;
pub mod executor;
pub mod patterns;
pub mod scheduler;
pub mod traversal;

pub use classifier::{Candidate, Classifier};
pub use executor::{full_pass, incremental_pass};
pub use patterns::PatternTable;
pub use scheduler::{Decision, ExpansionSession, SchedulerCore};
pub use traversal::{all_roots, deep_query, deep_select, DeepWalk};
