//! Mutation observation with pause/resume and opaque-container sub-roots.
//!
//! One watcher per synchronized root. Besides the root observer it keeps a
//! sub-observer on the content fragment of every opaque container in the
//! subtree, keyed by a stable id generated on the fragment itself (container
//! identity is not stable enough across rebuilds). Sub-observers are
//! re-synced on every [`collect`](MutationWatcher::collect) and on
//! [`refresh_sub_observers`](MutationWatcher::refresh_sub_observers), which
//! remote application invokes after a batch that may have inserted or
//! removed containers.

use std::cell::RefCell;
use std::rc::Rc;

use indexmap::IndexMap;
use otdom_live::{LiveNode, MutationRecord, Observer};

use crate::policy::IdAllocator;

/// Ordered raw change records drained in one tick.
pub type MutationBatch = Vec<MutationRecord>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherState {
    Stopped,
    Watching,
    Paused,
}

pub struct MutationWatcher {
    state: WatcherState,
    root: Option<(LiveNode, Observer)>,
    /// Content-fragment sub-observers, keyed by the fragment's stable id.
    subs: IndexMap<String, (LiveNode, Observer)>,
    ids: Rc<RefCell<dyn IdAllocator>>,
}

impl MutationWatcher {
    pub fn new(ids: Rc<RefCell<dyn IdAllocator>>) -> Self {
        Self {
            state: WatcherState::Stopped,
            root: None,
            subs: IndexMap::new(),
            ids,
        }
    }

    pub fn state(&self) -> WatcherState {
        self.state
    }

    /// Stopped → Watching. A second `start` is a no-op.
    pub fn start(&mut self, root: &LiveNode) {
        if self.state != WatcherState::Stopped {
            return;
        }
        let observer = root.observe();
        self.root = Some((root.clone(), observer));
        self.state = WatcherState::Watching;
        self.sync_sub_observers();
    }

    pub fn stop(&mut self) {
        if let Some((root, observer)) = self.root.take() {
            root.unobserve(&observer);
        }
        for (_, (fragment, observer)) in self.subs.drain(..) {
            fragment.unobserve(&observer);
        }
        self.state = WatcherState::Stopped;
    }

    /// Watching → Paused, covering every active sub-observer. Idempotent;
    /// there is no Stopped → Paused transition.
    pub fn pause(&mut self) {
        if self.state != WatcherState::Watching {
            return;
        }
        self.for_each_observer(|o| o.set_active(false));
        self.state = WatcherState::Paused;
    }

    /// Paused → Watching. Idempotent.
    pub fn resume(&mut self) {
        if self.state != WatcherState::Paused {
            return;
        }
        self.for_each_observer(|o| o.set_active(true));
        self.state = WatcherState::Watching;
    }

    /// Drains all queued records into one batch and re-syncs the
    /// sub-observer set against the current subtree.
    pub fn collect(&mut self) -> MutationBatch {
        if self.state == WatcherState::Stopped {
            return Vec::new();
        }
        let mut batch = Vec::new();
        if let Some((_, observer)) = &self.root {
            batch.extend(observer.take_records());
        }
        for (_, (_, observer)) in &self.subs {
            batch.extend(observer.take_records());
        }
        self.sync_sub_observers();
        batch
    }

    /// Re-syncs the sub-observer set without draining records. New
    /// sub-observers inherit the current activity state, so a refresh while
    /// paused takes effect on resume.
    pub fn refresh_sub_observers(&mut self) {
        if self.state == WatcherState::Stopped {
            return;
        }
        self.sync_sub_observers();
    }

    fn for_each_observer(&self, f: impl Fn(&Observer)) {
        if let Some((_, observer)) = &self.root {
            f(observer);
        }
        for (_, (_, observer)) in &self.subs {
            f(observer);
        }
    }

    /// Attach a sub-observer for every opaque-container content fragment
    /// currently in the subtree; drop the ones whose fragment is gone.
    fn sync_sub_observers(&mut self) {
        let Some((root, _)) = &self.root else { return };
        let mut present: IndexMap<String, LiveNode> = IndexMap::new();
        collect_content_fragments(root, &self.ids, &mut present);

        let stale: Vec<String> = self
            .subs
            .keys()
            .filter(|id| !present.contains_key(*id))
            .cloned()
            .collect();
        for id in stale {
            if let Some((fragment, observer)) = self.subs.shift_remove(&id) {
                fragment.unobserve(&observer);
            }
        }

        let active = self.state == WatcherState::Watching;
        for (id, fragment) in present {
            if self.subs.contains_key(&id) {
                continue;
            }
            let observer = fragment.observe();
            observer.set_active(active);
            self.subs.insert(id, (fragment, observer));
        }
    }
}

fn collect_content_fragments(
    node: &LiveNode,
    ids: &Rc<RefCell<dyn IdAllocator>>,
    out: &mut IndexMap<String, LiveNode>,
) {
    if let Some(content) = node.content() {
        let id = match content.stable_id() {
            Some(id) => id,
            None => {
                let id = ids.borrow_mut().next_id();
                content.set_stable_id(&id);
                id
            }
        };
        out.insert(id, content.clone());
        for child in content.children() {
            collect_content_fragments(&child, ids, out);
        }
        return;
    }
    for child in node.children() {
        collect_content_fragments(&child, ids, out);
    }
}
