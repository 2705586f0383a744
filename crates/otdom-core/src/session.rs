//! Session orchestration.
//!
//! A [`SyncSession`] owns the shadow tree, the watcher, the translator and
//! the applier for one replica and sequences them: local mutations drain
//! through [`flush`], remote batches land through [`receive`]. The two never
//! run interleaved, so echo suppression reduces to pausing the watcher for
//! the duration of a remote batch.
//!
//! [`flush`]: SyncSession::flush
//! [`receive`]: SyncSession::receive

use std::cell::RefCell;
use std::rc::Rc;

use otdom_live::{LiveNode, LiveTree};
use serde_json::Value;
use tracing::{error, info};

use crate::apply::Applier;
use crate::element_list::{
    sanitize_name, to_list, to_live_subtree, SerializeError, RESERVED_ID_ATTRIBUTE,
};
use crate::error::SyncError;
use crate::hooks::Hooks;
use crate::op::Operation;
use crate::policy::{IdAllocator, TransiencePolicy};
use crate::shadow::ShadowTree;
use crate::translate::Translator;
use crate::watcher::MutationWatcher;

/// Tunables shared by the translator and the applier.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Emit character-level text operations instead of whole-value replaces.
    pub diff_enabled: bool,
    /// Attribute values shorter than this are replaced wholesale even when
    /// diffing is on.
    pub attr_diff_min_len: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            diff_enabled: true,
            attr_diff_min_len: 16,
        }
    }
}

/// Invoked once per script element arriving from a remote batch or the
/// initial document, in document order.
pub type ScriptHandler = Box<dyn Fn(&LiveNode)>;

pub struct SyncSession {
    tree: Rc<LiveTree>,
    shadow: ShadowTree,
    watcher: MutationWatcher,
    translator: Translator,
    applier: Applier,
    hooks: Rc<Hooks>,
    policy: Rc<dyn TransiencePolicy>,
    on_script: Option<ScriptHandler>,
    halted: bool,
}

impl SyncSession {
    /// Builds the live document from `initial_doc`, then brings up the
    /// shadow tree and starts watching.
    ///
    /// `initial_doc` is an element list whose root entry describes the
    /// tree's existing root element: its attributes (including the reserved
    /// id) are applied to the root, its children become the root's children.
    pub fn populate(
        tree: Rc<LiveTree>,
        initial_doc: &Value,
        config: SyncConfig,
        policy: Rc<dyn TransiencePolicy>,
        ids: Rc<RefCell<dyn IdAllocator>>,
        on_script: Option<ScriptHandler>,
    ) -> Result<Self, SyncError> {
        let hooks = Rc::new(Hooks::new());
        let root = tree.root();
        let mut scripts = Vec::new();

        let items = initial_doc.as_array().ok_or_else(|| {
            SerializeError::MalformedList("document root is not an array".to_owned())
        })?;
        let mut rest = &items[..];
        if let Some(Value::String(_)) = rest.first() {
            rest = &rest[1..];
        }
        if let Some(Value::Object(attrs)) = rest.first() {
            for (name, value) in attrs {
                let Some(value) = value.as_str() else {
                    return Err(SerializeError::UnsupportedValue(value.to_string()).into());
                };
                if name == RESERVED_ID_ATTRIBUTE {
                    root.set_stable_id(value);
                } else {
                    root.set_attribute(&sanitize_name(name), value)?;
                }
            }
            rest = &rest[1..];
        }
        for child in rest {
            let node = to_live_subtree(child, &tree, root.namespace().as_deref(), &mut scripts)?;
            root.append_child(&node)?;
        }

        let shadow = ShadowTree::build(&root, policy.as_ref());
        let mut watcher = MutationWatcher::new(ids.clone());
        watcher.start(&root);

        let translator = Translator::new(config, policy.clone(), ids, hooks.clone());
        let applier = Applier::new(policy.clone(), hooks.clone());
        let mut session = Self {
            tree,
            shadow,
            watcher,
            translator,
            applier,
            hooks,
            policy,
            on_script,
            halted: false,
        };
        session.run_scripts(scripts);
        Ok(session)
    }

    pub fn tree(&self) -> &Rc<LiveTree> {
        &self.tree
    }

    pub fn hooks(&self) -> &Rc<Hooks> {
        &self.hooks
    }

    /// Operations dropped to date because their paths no longer resolved.
    pub fn dropped_ops(&self) -> u64 {
        self.applier.dropped()
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// Serializes the current document as an element list.
    pub fn serialize(&self) -> Option<Value> {
        to_list(&self.tree.root(), self.policy.as_ref())
    }

    /// Drains pending local mutations and translates them into the batch of
    /// operations to commit. An empty batch is a normal outcome.
    ///
    /// After translating, the shadow tree is checked against the live tree;
    /// a divergence halts the session until [`resync`].
    ///
    /// [`resync`]: SyncSession::resync
    pub fn flush(&mut self) -> Result<Vec<Operation>, SyncError> {
        if self.halted {
            return Err(SyncError::Halted);
        }
        let batch = self.watcher.collect();
        let ops = self.translator.translate(&batch, &mut self.shadow)?;
        if let Err(err) = self.shadow.verify(self.policy.as_ref()) {
            self.halted = true;
            return Err(err);
        }
        Ok(ops)
    }

    /// Applies a committed remote batch. The watcher is paused for the
    /// duration, so none of the resulting mutations are re-emitted.
    pub fn receive(&mut self, ops: &[Operation]) -> Result<(), SyncError> {
        if self.halted {
            return Err(SyncError::Halted);
        }
        let result = self
            .applier
            .apply_batch(ops, &mut self.shadow, &mut self.watcher, &self.tree);
        if let Err(err) = result {
            error!("remote batch aborted, halting: {}", err);
            self.halted = true;
            return Err(err);
        }
        let scripts = self.applier.take_scripts();
        self.run_scripts(scripts);
        Ok(())
    }

    /// Rebuilds the shadow tree from the live tree and clears the halted
    /// flag. Pending local mutations are discarded; the rebuilt shadow
    /// already reflects them.
    pub fn resync(&mut self) {
        let _ = self.watcher.collect();
        self.shadow = ShadowTree::build(&self.tree.root(), self.policy.as_ref());
        if self.halted {
            info!("session resynchronized after halt");
            self.halted = false;
        }
    }

    fn run_scripts(&self, scripts: Vec<LiveNode>) {
        if let Some(handler) = &self.on_script {
            for script in scripts {
                handler(&script);
            }
        }
    }
}
