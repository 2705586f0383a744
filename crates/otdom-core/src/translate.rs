//! Mutation → operation translation.
//!
//! Consumes one drained [`MutationBatch`] against the shadow tree and emits
//! position-addressed operations. Errors translating one record are
//! contained to that record; the rest of the batch still translates.
//!
//! [`MutationBatch`]: crate::watcher::MutationBatch

use std::cell::RefCell;
use std::rc::Rc;

use otdom_live::{LiveNode, MutationRecord};
use serde_json::Value;
use tracing::{debug, warn};

use crate::diff::{diff, PatchOpType};
use crate::element_list::{sanitize_name, to_list, to_list_verbatim, RESERVED_ID_ATTRIBUTE};
use crate::error::SyncError;
use crate::hooks::Hooks;
use crate::op::Operation;
use crate::path::{with_offset, Path};
use crate::policy::{IdAllocator, TransiencePolicy};
use crate::session::SyncConfig;
use crate::shadow::{in_opaque_content, ShadowNode, ShadowTree};

pub struct Translator {
    config: SyncConfig,
    policy: Rc<dyn TransiencePolicy>,
    ids: Rc<RefCell<dyn IdAllocator>>,
    hooks: Rc<Hooks>,
}

impl Translator {
    pub fn new(
        config: SyncConfig,
        policy: Rc<dyn TransiencePolicy>,
        ids: Rc<RefCell<dyn IdAllocator>>,
        hooks: Rc<Hooks>,
    ) -> Self {
        Self {
            config,
            policy,
            ids,
            hooks,
        }
    }

    /// Translates a batch of raw records into operations. May be empty.
    pub fn translate(
        &mut self,
        batch: &[MutationRecord],
        shadow: &mut ShadowTree,
    ) -> Result<Vec<Operation>, SyncError> {
        let mut ops = Vec::new();
        for record in batch {
            let result = match record {
                MutationRecord::ChildrenChanged {
                    target,
                    added,
                    removed,
                } => self.children_changed(target, added, removed, shadow, &mut ops),
                MutationRecord::AttributeChanged { target, name, .. } => {
                    self.attribute_changed(target, name, shadow, &mut ops)
                }
                MutationRecord::TextChanged { target, old_value } => {
                    self.text_changed(target, old_value, shadow, &mut ops)
                }
            };
            if let Err(err) = result {
                warn!("skipping untranslatable mutation: {}", err);
            }
        }
        Ok(ops)
    }

    fn children_changed(
        &mut self,
        target: &LiveNode,
        added: &[LiveNode],
        removed: &[LiveNode],
        shadow: &mut ShadowTree,
        ops: &mut Vec<Operation>,
    ) -> Result<(), SyncError> {
        let Some(parent_shadow) = shadow.lookup_structural(target) else {
            // Outside the persistable domain (e.g. under a transient node).
            return Ok(());
        };
        let verbatim = target.is_fragment() || in_opaque_content(target);

        for live in removed {
            let Some(node) = shadow.lookup(live, Some(&parent_shadow.live())) else {
                continue;
            };
            if node.parent() != Some(parent_shadow.clone()) {
                continue;
            }
            let Some(path) = shadow.path_of(&node) else {
                continue;
            };
            // The payload is the last synchronized form. The live node may
            // already have drifted since it was detached.
            let value = node.serialized();
            ops.push(Operation::ListDelete { path, value });
            shadow.detach(&node);
            self.hooks.emit_node_deleted(live, Some(target), true);
        }

        for live in added {
            // Skip nodes that moved again before this batch was drained.
            if live.parent().as_ref() != Some(target) {
                continue;
            }
            // Already placed: pure same-parent reordering is not re-emitted.
            if let Some(existing) = shadow.lookup(live, Some(&parent_shadow.live())) {
                if existing.parent() == Some(parent_shadow.clone()) {
                    continue;
                }
            }
            self.prepare_subtree(live, verbatim)?;
            let Some(node) = shadow.attach(live, self.policy.as_ref(), verbatim) else {
                continue;
            };
            let index = self.splice_index(live, &parent_shadow, shadow);
            shadow.splice(&parent_shadow, index, &node);
            let Some(path) = shadow.path_of(&node) else {
                shadow.detach(&node);
                continue;
            };
            let Some(value) = self.serialize(live, verbatim) else {
                shadow.detach(&node);
                continue;
            };
            ops.push(Operation::ListInsert { path, value });
            self.hooks.emit_node_inserted(live, Some(target), true);
        }
        Ok(())
    }

    /// Position implied by the nearest preceding live sibling that already
    /// has a shadow node under this parent.
    fn splice_index(
        &self,
        live: &LiveNode,
        parent_shadow: &ShadowNode,
        shadow: &ShadowTree,
    ) -> usize {
        let siblings = match live.parent() {
            Some(parent) => parent.children(),
            None => return 0,
        };
        let Some(position) = siblings.iter().position(|s| s == live) else {
            return 0;
        };
        for sibling in siblings[..position].iter().rev() {
            if let Some(node) = shadow.lookup(sibling, Some(&parent_shadow.live())) {
                if let Some(index) = parent_shadow.index_of(&node) {
                    return index + 1;
                }
            }
        }
        0
    }

    /// Sanitizes attribute names and assigns missing stable ids throughout
    /// a freshly added subtree, before it is serialized.
    fn prepare_subtree(&mut self, live: &LiveNode, verbatim: bool) -> Result<(), SyncError> {
        if live.is_element() {
            if !verbatim && self.policy.element_is_transient(live) {
                return Ok(());
            }
            for (name, value) in live.attrs() {
                let sanitized = sanitize_name(&name);
                if sanitized != name {
                    live.remove_attribute(&name)?;
                    live.set_attribute(&sanitized, &value)?;
                }
            }
            if live.stable_id().is_none() {
                let id = self.ids.borrow_mut().next_id();
                live.set_stable_id(&id);
            }
            let child_verbatim = verbatim || live.is_opaque_container();
            for child in live.logical_children() {
                self.prepare_subtree(&child, child_verbatim)?;
            }
        }
        Ok(())
    }

    fn serialize(&self, live: &LiveNode, verbatim: bool) -> Option<Value> {
        if verbatim {
            to_list_verbatim(live, self.policy.as_ref())
        } else {
            to_list(live, self.policy.as_ref())
        }
    }

    fn attribute_changed(
        &mut self,
        target: &LiveNode,
        name: &str,
        shadow: &mut ShadowTree,
        ops: &mut Vec<Operation>,
    ) -> Result<(), SyncError> {
        let Some(node) = shadow.lookup(target, target.parent().as_ref()) else {
            return Ok(());
        };
        let Some(tag) = target.tag() else {
            return Ok(());
        };
        if name == RESERVED_ID_ATTRIBUTE {
            // Reserved for stable ids; never synchronized as a plain attribute.
            return Ok(());
        }
        let verbatim = in_opaque_content(target);
        if !verbatim
            && self
                .policy
                .attribute_is_transient(&sanitize_name(&tag), name)
        {
            return Ok(());
        }

        let sanitized = sanitize_name(name);
        if sanitized != name {
            // Correct the live attribute; the follow-up records drive the
            // operation on the next tick under the corrected name.
            let value = target.attr(name);
            target.remove_attribute(name)?;
            if let Some(value) = value {
                target.set_attribute(&sanitized, &value)?;
            }
            return Ok(());
        }

        let new_value = if name == "style" {
            target.style_text().or_else(|| target.attr(name))
        } else {
            target.attr(name)
        };
        let cached = node.cached_attr(name);
        if new_value == cached {
            return Ok(());
        }

        match new_value {
            None => {
                if let Some(old) = cached {
                    if let Some(path) = shadow.attribute_path_of(&node, name) {
                        ops.push(Operation::AttributeDelete { path, value: old });
                        node.remove_cached_attr(name);
                        self.hooks.emit_attribute_removed(target, None, true);
                    }
                }
            }
            Some(value) => {
                let Some(path) = shadow.attribute_path_of(&node, name) else {
                    return Ok(());
                };
                let replace = cached.is_none()
                    || !self.config.diff_enabled
                    || value.chars().count() < self.config.attr_diff_min_len;
                if replace {
                    ops.push(Operation::AttributeInsert {
                        path,
                        value: value.clone(),
                        old: cached,
                    });
                } else {
                    let patch = diff(&cached.unwrap_or_default(), &value);
                    emit_text_ops(ops, &path, &patch);
                }
                node.set_cached_attr(name, &value);
                self.hooks.emit_attribute_set(target, None, true);
            }
        }
        Ok(())
    }

    fn text_changed(
        &mut self,
        target: &LiveNode,
        old_value: &str,
        shadow: &mut ShadowTree,
        ops: &mut Vec<Operation>,
    ) -> Result<(), SyncError> {
        let Some(node) = shadow.lookup(target, target.parent().as_ref()) else {
            return Ok(());
        };
        let Some(new_value) = target.text() else {
            return Ok(());
        };
        // The diff base is the last synchronized text, not the record's
        // snapshot, so several records for one node in a batch fold into a
        // single diff against the final value.
        let old = node.cached_text().unwrap_or_else(|| old_value.to_owned());
        if new_value == old {
            return Ok(());
        }
        let Some(path) = shadow.path_of(&node) else {
            return Ok(());
        };
        if self.config.diff_enabled {
            let patch = diff(&old, &new_value);
            let before = ops.len();
            emit_text_ops(ops, &path, &patch);
            for op in &ops[before..] {
                match op {
                    Operation::TextInsert { .. } => {
                        self.hooks.emit_text_inserted(target, None, true)
                    }
                    Operation::TextDelete { .. } => {
                        self.hooks.emit_text_deleted(target, None, true)
                    }
                    _ => {}
                }
            }
        } else {
            ops.push(Operation::ListReplace {
                path,
                old: Value::from(old),
                new: Value::from(new_value.as_str()),
            });
        }
        node.set_cached_text(&new_value);
        Ok(())
    }
}

/// Converts diff hunks to text ops. Offsets accumulate left to right:
/// equal and inserted runs advance the running offset, deletions do not.
fn emit_text_ops(ops: &mut Vec<Operation>, base: &Path, patch: &[(PatchOpType, String)]) {
    let mut offset = 0usize;
    for (kind, run) in patch {
        match kind {
            PatchOpType::Eql => offset += run.chars().count(),
            PatchOpType::Ins => {
                ops.push(Operation::TextInsert {
                    path: with_offset(base.clone(), offset),
                    text: run.clone(),
                });
                offset += run.chars().count();
            }
            PatchOpType::Del => {
                debug!("text deletion of {} chars at offset {}", run.chars().count(), offset);
                ops.push(Operation::TextDelete {
                    path: with_offset(base.clone(), offset),
                    text: run.clone(),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::PathToken;

    #[test]
    fn diff_hunk_offsets_accumulate() {
        let base = vec![PathToken::Index(2)];
        let patch = vec![
            (PatchOpType::Eql, "aaaa".to_owned()),
            (PatchOpType::Del, "bb".to_owned()),
            (PatchOpType::Ins, "cccc".to_owned()),
            (PatchOpType::Eql, "d".to_owned()),
            (PatchOpType::Ins, "e".to_owned()),
        ];
        let mut ops = Vec::new();
        emit_text_ops(&mut ops, &base, &patch);
        assert_eq!(
            ops,
            vec![
                Operation::TextDelete {
                    path: vec![PathToken::Index(2), PathToken::Index(4)],
                    text: "bb".to_owned(),
                },
                Operation::TextInsert {
                    path: vec![PathToken::Index(2), PathToken::Index(4)],
                    text: "cccc".to_owned(),
                },
                Operation::TextInsert {
                    path: vec![PathToken::Index(2), PathToken::Index(9)],
                    text: "e".to_owned(),
                },
            ]
        );
    }
}
