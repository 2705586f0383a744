#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;

use otdom_core::policy::SequentialIdAllocator;
use otdom_core::{PrefixTransience, SyncConfig, SyncSession};
use otdom_live::LiveTree;
use serde_json::Value;

/// Session over a fresh `html` tree with deterministic ids and the default
/// `transient-` filter.
pub fn new_session(doc: &Value) -> SyncSession {
    new_session_with_config(doc, SyncConfig::default())
}

pub fn new_session_with_config(doc: &Value, config: SyncConfig) -> SyncSession {
    SyncSession::populate(
        Rc::new(LiveTree::new("html")),
        doc,
        config,
        Rc::new(PrefixTransience::default()),
        Rc::new(RefCell::new(SequentialIdAllocator::default())),
        None,
    )
    .expect("populate must succeed")
}
