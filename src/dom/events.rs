use std::rc::Rc;

use url::Url;

use super::{Dom, NodeId};
use crate::core::error::DomError;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventKind {
    PointerDown,
    MouseDown,
    Click,
    MouseUp,
    PointerUp,
    Change,
}

#[derive(Debug, Clone)]
pub struct DomEvent {
    pub kind: EventKind,
    pub target: NodeId,
}

/// Event listener. Listeners receive the page mutably so widget behaviour
/// (insert replies, swap a truncated body for the full one, …) can be modelled.
pub type Listener = Rc<dyn Fn(&mut Dom, &DomEvent) -> Result<(), DomError>>;

/// Box a closure as a [`Listener`].
pub fn listener<F>(f: F) -> Listener
where
    F: Fn(&mut Dom, &DomEvent) -> Result<(), DomError> + 'static,
{
    Rc::new(f)
}

/// One child-list change, as delivered to a mutation observer.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationRecord {
    pub target: NodeId,
    pub added: Vec<NodeId>,
    pub removed: Vec<NodeId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Visible,
    Hidden,
}

/// Window-level lifecycle and navigation events.
#[derive(Debug, Clone, PartialEq)]
pub enum PageEvent {
    Scroll { y: f64 },
    VisibilityChange(Visibility),
    Focus,
    PageShow { persisted: bool },
    BeforeUnload,
    HistoryPush(Url),
    HistoryReplace(Url),
    PopState(Url),
    ShadowRootAttached(NodeId),
}

impl PageEvent {
    /// Soft navigations: the reading context may have changed under us.
    pub fn is_soft_navigation(&self) -> bool {
        matches!(
            self,
            PageEvent::HistoryPush(_) | PageEvent::HistoryReplace(_) | PageEvent::PopState(_)
        )
    }
}
