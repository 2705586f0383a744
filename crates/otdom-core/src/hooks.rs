//! Structural event hooks for presentation-layer consumers.
//!
//! Each hook receives `(node, related, is_local)`: the affected live node,
//! a related node when one applies (the parent for insert/delete), and
//! whether the change originated locally or from a remote operation.

use std::cell::RefCell;

use otdom_live::LiveNode;

pub type HookFn = Box<dyn Fn(&LiveNode, Option<&LiveNode>, bool)>;

#[derive(Default)]
pub struct Hooks {
    node_inserted: RefCell<Vec<HookFn>>,
    node_deleted: RefCell<Vec<HookFn>>,
    attribute_set: RefCell<Vec<HookFn>>,
    attribute_removed: RefCell<Vec<HookFn>>,
    text_inserted: RefCell<Vec<HookFn>>,
    text_deleted: RefCell<Vec<HookFn>>,
}

macro_rules! hook_pair {
    ($register:ident, $emit:ident, $field:ident) => {
        pub fn $register(&self, f: impl Fn(&LiveNode, Option<&LiveNode>, bool) + 'static) {
            self.$field.borrow_mut().push(Box::new(f));
        }

        pub(crate) fn $emit(&self, node: &LiveNode, related: Option<&LiveNode>, is_local: bool) {
            for f in self.$field.borrow().iter() {
                f(node, related, is_local);
            }
        }
    };
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    hook_pair!(on_node_inserted, emit_node_inserted, node_inserted);
    hook_pair!(on_node_deleted, emit_node_deleted, node_deleted);
    hook_pair!(on_attribute_set, emit_attribute_set, attribute_set);
    hook_pair!(on_attribute_removed, emit_attribute_removed, attribute_removed);
    hook_pair!(on_text_inserted, emit_text_inserted, text_inserted);
    hook_pair!(on_text_deleted, emit_text_deleted, text_deleted);
}
