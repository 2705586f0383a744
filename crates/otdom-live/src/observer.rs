//! Change observation: records, queues, and the active flag.

use std::cell::RefCell;
use std::rc::Rc;

use crate::node::LiveNode;

/// A raw change record, delivered after the edit has settled.
///
/// `ChildrenChanged` targets the parent; `AttributeChanged` and `TextChanged`
/// target the node itself and carry the pre-edit value (the new value is read
/// from the live node, which has already been mutated by delivery time).
#[derive(Debug, Clone)]
pub enum MutationRecord {
    ChildrenChanged {
        target: LiveNode,
        added: Vec<LiveNode>,
        removed: Vec<LiveNode>,
    },
    AttributeChanged {
        target: LiveNode,
        name: String,
        old_value: Option<String>,
    },
    TextChanged {
        target: LiveNode,
        old_value: String,
    },
}

impl MutationRecord {
    pub fn target(&self) -> &LiveNode {
        match self {
            MutationRecord::ChildrenChanged { target, .. }
            | MutationRecord::AttributeChanged { target, .. }
            | MutationRecord::TextChanged { target, .. } => target,
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct ObserverState {
    pub(crate) active: bool,
    pub(crate) queue: Vec<MutationRecord>,
}

/// A subscription to change records on one subtree.
///
/// Returned by [`LiveNode::observe`](crate::LiveNode::observe). Records are
/// queued while the observer is active and drained with [`take_records`].
/// Deactivating is how the applier avoids seeing its own writes; records that
/// would have been delivered while inactive are never queued.
///
/// [`take_records`]: Observer::take_records
#[derive(Debug, Clone)]
pub struct Observer {
    pub(crate) state: Rc<RefCell<ObserverState>>,
}

impl Observer {
    pub(crate) fn new() -> Self {
        Self {
            state: Rc::new(RefCell::new(ObserverState {
                active: true,
                queue: Vec::new(),
            })),
        }
    }

    /// Whether records are currently being queued.
    pub fn is_active(&self) -> bool {
        self.state.borrow().active
    }

    /// Enable or disable queueing. Idempotent.
    pub fn set_active(&self, active: bool) {
        self.state.borrow_mut().active = active;
    }

    /// Drain all queued records, oldest first.
    pub fn take_records(&self) -> Vec<MutationRecord> {
        std::mem::take(&mut self.state.borrow_mut().queue)
    }

    pub(crate) fn push(&self, record: MutationRecord) {
        let mut state = self.state.borrow_mut();
        if state.active {
            state.queue.push(record);
        }
    }
}
