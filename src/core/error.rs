use thiserror::Error;

/// Transient failures raised by the page model.
///
/// None of these are fatal: the expansion and anchor engines catch them at the
/// point of use and treat the offending node, frame or selector as contributing
/// nothing to the current pass.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomError {
    #[error("blocked a frame with origin \"{frame}\" from accessing a cross-origin frame")]
    CrossOrigin { frame: String },

    #[error("'{0}' is not a valid selector")]
    InvalidSelector(String),

    #[error("node {0} is not an element")]
    NotAnElement(usize),

    #[error("node {0} is not connected to a document")]
    Detached(usize),

    #[error("event listener failed: {0}")]
    ListenerFailed(String),
}
