//! Operation → mutation application.
//!
//! Resolves each remote operation against the shadow tree and replays it
//! onto the live tree, keeping the shadow tree updated in lock step. The
//! whole batch runs with the watcher paused, so none of these writes are
//! ever translated back into operations.

use std::rc::Rc;

use otdom_live::{Caret, LiveNode, LiveTree};
use serde_json::Value;
use tracing::{debug, error};

use crate::element_list::{sanitize_name, to_live_subtree};
use crate::error::SyncError;
use crate::hooks::Hooks;
use crate::op::Operation;
use crate::policy::TransiencePolicy;
use crate::shadow::{in_opaque_content, Resolved, ResolveError, ShadowNode, ShadowTree};
use crate::watcher::MutationWatcher;

pub struct Applier {
    policy: Rc<dyn TransiencePolicy>,
    hooks: Rc<Hooks>,
    dropped: u64,
    pending_scripts: Vec<LiveNode>,
}

impl Applier {
    pub fn new(policy: Rc<dyn TransiencePolicy>, hooks: Rc<Hooks>) -> Self {
        Self {
            policy,
            hooks,
            dropped: 0,
            pending_scripts: Vec::new(),
        }
    }

    /// Count of operations dropped because their path no longer resolved.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Script elements created by remote insertions, in document order, for
    /// the host's execution step.
    pub fn take_scripts(&mut self) -> Vec<LiveNode> {
        std::mem::take(&mut self.pending_scripts)
    }

    /// Applies a remote batch in commit order, watcher paused throughout.
    /// Failures are contained per operation; only an integrity failure
    /// aborts the batch.
    pub fn apply_batch(
        &mut self,
        ops: &[Operation],
        shadow: &mut ShadowTree,
        watcher: &mut MutationWatcher,
        tree: &LiveTree,
    ) -> Result<(), SyncError> {
        watcher.pause();
        let mut result = Ok(());
        for op in ops {
            match self.apply(op, shadow, tree) {
                Ok(()) => {}
                Err(err @ SyncError::StructuralIntegrity(_)) => {
                    result = Err(err);
                    break;
                }
                Err(err) => error!("failed to apply operation: {}", err),
            }
        }
        // The batch may have inserted or removed opaque containers; their
        // content must be observed before local edits can reach it.
        watcher.refresh_sub_observers();
        watcher.resume();
        result
    }

    /// Applies one operation. An unresolvable path is dropped silently
    /// (expected under local/remote races), counted in [`dropped`].
    ///
    /// [`dropped`]: Applier::dropped
    pub fn apply(
        &mut self,
        op: &Operation,
        shadow: &mut ShadowTree,
        tree: &LiveTree,
    ) -> Result<(), SyncError> {
        let resolved = match shadow.resolve(op.path()) {
            Ok(resolved) => resolved,
            Err(ResolveError::Unresolved) => {
                debug!("dropping operation with unresolvable path");
                self.dropped += 1;
                return Ok(());
            }
            Err(ResolveError::UnsupportedShape) => {
                return Err(SyncError::UnsupportedShape(format!("{:?}", op)))
            }
        };

        match (op, resolved) {
            (
                Operation::ListInsert { value, .. },
                Resolved::Child {
                    parent,
                    index,
                    target,
                    offset: None,
                },
            ) => self.insert_subtree(value, &parent, index, target.as_ref(), shadow, tree),
            (
                Operation::ListDelete { value, .. },
                Resolved::Child {
                    target: Some(target),
                    ..
                },
            ) => self.delete_subtree(value, &target, shadow, tree),
            (Operation::ListDelete { .. }, Resolved::Child { target: None, .. }) => {
                debug!("dropping delete of an already-vacant slot");
                self.dropped += 1;
                Ok(())
            }
            (Operation::ListReplace { new, .. }, Resolved::Tag { element }) => {
                self.rename_element(new, &element, shadow, tree)
            }
            (
                Operation::ListReplace { old, new, .. },
                Resolved::Child {
                    parent,
                    index,
                    target: Some(target),
                    offset: None,
                },
            ) => {
                // Positional replace is delete-then-insert.
                self.delete_subtree(old, &target, shadow, tree)?;
                let next = parent.child(index);
                self.insert_subtree(new, &parent, index, next.as_ref(), shadow, tree)
            }
            (
                Operation::AttributeInsert { value, .. },
                Resolved::Attribute {
                    element,
                    name,
                    offset: None,
                },
            ) => {
                let live = element.live();
                let name = sanitize_name(&name);
                live.set_attribute(&name, value)?;
                element.set_cached_attr(&name, value);
                self.hooks.emit_attribute_set(&live, None, false);
                Ok(())
            }
            (
                Operation::AttributeDelete { .. },
                Resolved::Attribute {
                    element,
                    name,
                    offset: None,
                },
            ) => {
                let live = element.live();
                live.remove_attribute(&name)?;
                element.remove_cached_attr(&name);
                self.hooks.emit_attribute_removed(&live, None, false);
                Ok(())
            }
            (
                Operation::TextInsert { text, .. },
                Resolved::Attribute {
                    element,
                    name,
                    offset: Some(offset),
                },
            ) => self.splice_attribute(&element, &name, offset, None, text),
            (
                Operation::TextDelete { text, .. },
                Resolved::Attribute {
                    element,
                    name,
                    offset: Some(offset),
                },
            ) => self.splice_attribute(&element, &name, offset, Some(text.as_str()), ""),
            (
                Operation::TextInsert { text, .. },
                Resolved::Child {
                    target: Some(target),
                    offset: Some(offset),
                    ..
                },
            ) => self.splice_text(&target, offset, None, text, tree),
            (
                Operation::TextDelete { text, .. },
                Resolved::Child {
                    target: Some(target),
                    offset: Some(offset),
                    ..
                },
            ) => self.splice_text(&target, offset, Some(text.as_str()), "", tree),
            (op, resolved) => Err(SyncError::UnsupportedShape(format!(
                "{:?} at {:?}",
                op, resolved
            ))),
        }
    }

    fn insert_subtree(
        &mut self,
        value: &Value,
        parent: &ShadowNode,
        index: usize,
        reference: Option<&ShadowNode>,
        shadow: &mut ShadowTree,
        tree: &LiveTree,
    ) -> Result<(), SyncError> {
        let parent_live = parent.live();
        let namespace = parent_live.namespace();
        let live =
            to_live_subtree(value, tree, namespace.as_deref(), &mut self.pending_scripts)?;
        let reference_live = reference.map(|r| r.live());
        parent_live.insert_before(&live, reference_live.as_ref())?;
        let verbatim = parent_live.is_opaque_container() || in_opaque_content(&parent_live);
        if let Some(node) = shadow.attach(&live, self.policy.as_ref(), verbatim) {
            shadow.splice(parent, index, &node);
        }
        self.hooks.emit_node_inserted(&live, Some(&parent_live), false);
        Ok(())
    }

    fn delete_subtree(
        &mut self,
        payload: &Value,
        target: &ShadowNode,
        shadow: &mut ShadowTree,
        tree: &LiveTree,
    ) -> Result<(), SyncError> {
        let live = target.live();
        let parent_live = live.parent();
        self.relocate_caret_for_removal(&live, payload, tree);
        live.detach()?;
        shadow.detach(target);
        self.hooks
            .emit_node_deleted(&live, parent_live.as_ref(), false);
        Ok(())
    }

    /// Tag rename: rebuild the element under the new tag, move attributes
    /// and children over, and give it a fresh shadow node.
    fn rename_element(
        &mut self,
        new_tag: &Value,
        element: &ShadowNode,
        shadow: &mut ShadowTree,
        tree: &LiveTree,
    ) -> Result<(), SyncError> {
        let Some(tag) = new_tag.as_str() else {
            return Err(SyncError::UnsupportedShape(
                "tag replace payload is not a string".to_owned(),
            ));
        };
        let old_live = element.live();
        let Some(parent_shadow) = element.parent() else {
            debug!("dropping tag rename of the root element");
            self.dropped += 1;
            return Ok(());
        };
        let Some(index) = parent_shadow.index_of(element) else {
            self.dropped += 1;
            return Ok(());
        };
        let Some(parent_live) = old_live.parent() else {
            self.dropped += 1;
            return Ok(());
        };

        let new_live =
            tree.create_element_ns(&sanitize_name(tag), old_live.namespace().as_deref(), true);
        if let Some(id) = old_live.stable_id() {
            new_live.set_stable_id(&id);
        }
        for (name, value) in old_live.attrs() {
            new_live.set_attribute(&name, &value)?;
        }
        if let Some(style) = old_live.style_text() {
            new_live.set_style_text(Some(style))?;
        }
        parent_live.insert_before(&new_live, Some(&old_live))?;
        for child in old_live.logical_children() {
            new_live.append_child(&child)?;
        }
        old_live.detach()?;

        shadow.detach(element);
        let verbatim = in_opaque_content(&new_live);
        if let Some(node) = shadow.attach(&new_live, self.policy.as_ref(), verbatim) {
            // The op synchronized only the tag; attributes and text keep
            // their previous synchronized values, so pending local edits
            // still translate afterwards.
            node.copy_caches_from(element);
            shadow.splice(&parent_shadow, index, &node);
        }
        self.hooks.emit_node_deleted(&old_live, Some(&parent_live), false);
        self.hooks.emit_node_inserted(&new_live, Some(&parent_live), false);
        Ok(())
    }

    fn splice_attribute(
        &mut self,
        element: &ShadowNode,
        name: &str,
        offset: usize,
        remove: Option<&str>,
        insert: &str,
    ) -> Result<(), SyncError> {
        let live = element.live();
        let Some(current) = live.attr(name) else {
            debug!("dropping text op on a missing attribute");
            self.dropped += 1;
            return Ok(());
        };
        let Some(updated) = splice_chars(&current, offset, remove, insert) else {
            debug!("dropping text op that does not fit the attribute value");
            self.dropped += 1;
            return Ok(());
        };
        live.set_attribute(name, &updated)?;
        element.set_cached_attr(name, &updated);
        self.hooks.emit_attribute_set(&live, None, false);
        Ok(())
    }

    fn splice_text(
        &mut self,
        target: &ShadowNode,
        offset: usize,
        remove: Option<&str>,
        insert: &str,
        tree: &LiveTree,
    ) -> Result<(), SyncError> {
        let live = target.live();
        let Some(current) = live.text() else {
            self.dropped += 1;
            return Ok(());
        };
        let Some(updated) = splice_chars(&current, offset, remove, insert) else {
            debug!("dropping text op that does not fit the node text");
            self.dropped += 1;
            return Ok(());
        };
        live.set_text(&updated)?;
        target.set_cached_text(&updated);
        let removed = remove.map_or(0, |r| r.chars().count());
        self.shift_caret(&live, offset, removed, insert.chars().count(), tree);
        if removed > 0 {
            self.hooks.emit_text_deleted(&live, None, false);
        }
        if !insert.is_empty() {
            self.hooks.emit_text_inserted(&live, None, false);
        }
        Ok(())
    }

    /// Shifts caret offsets sitting at or after the edit point.
    fn shift_caret(
        &self,
        edited: &LiveNode,
        offset: usize,
        removed: usize,
        inserted: usize,
        tree: &LiveTree,
    ) {
        let Some(mut caret) = tree.caret() else { return };
        if &caret.node != edited {
            return;
        }
        let shift = |pos: usize| -> usize {
            if pos < offset {
                pos
            } else if pos < offset + removed {
                offset
            } else {
                pos - removed + inserted
            }
        };
        caret.start = shift(caret.start);
        caret.end = shift(caret.end);
        tree.set_caret(Some(caret));
    }

    /// When the caret's text node is deleted, relocate it to an adjacent
    /// text node only if that node's content matches the removed text.
    /// Heuristic, not guaranteed.
    fn relocate_caret_for_removal(&self, removed: &LiveNode, payload: &Value, tree: &LiveTree) {
        let Some(caret) = tree.caret() else { return };
        if !removed.contains(&caret.node) {
            return;
        }
        let removed_text = payload
            .as_str()
            .map(str::to_owned)
            .or_else(|| removed.text());
        let neighbor = removed
            .index_in_parent()
            .zip(removed.parent())
            .and_then(|(index, parent)| {
                let siblings = parent.children();
                let prev = index.checked_sub(1).and_then(|i| siblings.get(i).cloned());
                let next = siblings.get(index + 1).cloned();
                [prev, next]
                    .into_iter()
                    .flatten()
                    .find(|n| n.is_text() && n.text() == removed_text)
            });
        match neighbor {
            Some(node) => tree.set_caret(Some(Caret {
                node,
                start: caret.start,
                end: caret.end,
            })),
            None => tree.set_caret(None),
        }
    }
}

/// Char splice with a content guard: a removal must match what is actually
/// there, or the edit is refused.
fn splice_chars(s: &str, offset: usize, remove: Option<&str>, insert: &str) -> Option<String> {
    let chars: Vec<char> = s.chars().collect();
    let removed = remove.map_or(0, |r| r.chars().count());
    let end = offset.checked_add(removed)?;
    if end > chars.len() {
        return None;
    }
    if let Some(expected) = remove {
        if !chars[offset..end].iter().copied().eq(expected.chars()) {
            return None;
        }
    }
    let mut out: String = chars[..offset].iter().collect();
    out.push_str(insert);
    out.extend(&chars[end..]);
    Some(out)
}
