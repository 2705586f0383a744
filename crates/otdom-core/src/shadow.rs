//! The shadow tree: structural index over the persistable subset of the
//! live tree, authoritative for position computation.
//!
//! One [`ShadowTree`] per synchronized root owns every live→shadow lookup
//! map, so independent roots never share state. A shadow node's children
//! match, index for index, the persistable children of its live node, with
//! transient nodes filtered out and opaque-container content fragments
//! collapsed (the container's shadow children are the fragment's children).

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

use indexmap::IndexMap;
use otdom_live::LiveNode;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::error;

use crate::element_list::{
    sanitize_name, COMMENT_MARKER, DOCTYPE_MARKER, RESERVED_ID_ATTRIBUTE,
};
use crate::error::SyncError;
use crate::path::{attribute_sub_path, Path, PathToken, ATTRIBUTE_SLOT, ELEMENT_LIST_OFFSET, TAG_SLOT};
use crate::policy::TransiencePolicy;

struct ShadowInner {
    parent: Weak<RefCell<ShadowInner>>,
    children: Vec<ShadowNode>,
    live: LiveNode,
    /// Last serialized attribute values, used for echo suppression and as
    /// the applier's value mirror.
    attr_cache: IndexMap<String, String>,
    /// Last synchronized character data, for nodes that carry any.
    text_cache: Option<String>,
}

/// A node of the shadow tree. Cloning clones the handle.
#[derive(Clone)]
pub struct ShadowNode(Rc<RefCell<ShadowInner>>);

impl PartialEq for ShadowNode {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for ShadowNode {}

impl fmt::Debug for ShadowNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ShadowNode<{:?}>", self.0.borrow().live)
    }
}

impl ShadowNode {
    fn new(live: LiveNode, attr_cache: IndexMap<String, String>) -> Self {
        let text_cache = live.text();
        Self(Rc::new(RefCell::new(ShadowInner {
            parent: Weak::new(),
            children: Vec::new(),
            live,
            attr_cache,
            text_cache,
        })))
    }

    pub fn live(&self) -> LiveNode {
        self.0.borrow().live.clone()
    }

    pub fn parent(&self) -> Option<ShadowNode> {
        self.0.borrow().parent.upgrade().map(ShadowNode)
    }

    pub fn children(&self) -> Vec<ShadowNode> {
        self.0.borrow().children.clone()
    }

    pub fn children_len(&self) -> usize {
        self.0.borrow().children.len()
    }

    pub fn child(&self, index: usize) -> Option<ShadowNode> {
        self.0.borrow().children.get(index).cloned()
    }

    pub fn index_of(&self, child: &ShadowNode) -> Option<usize> {
        self.0.borrow().children.iter().position(|c| c == child)
    }

    pub fn index_in_parent(&self) -> Option<usize> {
        self.parent().and_then(|p| p.index_of(self))
    }

    pub fn cached_attr(&self, name: &str) -> Option<String> {
        self.0.borrow().attr_cache.get(name).cloned()
    }

    pub fn set_cached_attr(&self, name: &str, value: &str) {
        self.0
            .borrow_mut()
            .attr_cache
            .insert(name.to_owned(), value.to_owned());
    }

    pub fn remove_cached_attr(&self, name: &str) -> Option<String> {
        self.0.borrow_mut().attr_cache.shift_remove(name)
    }

    pub fn cached_text(&self) -> Option<String> {
        self.0.borrow().text_cache.clone()
    }

    pub fn set_cached_text(&self, text: &str) {
        self.0.borrow_mut().text_cache = Some(text.to_owned());
    }

    /// Copies the synchronized-value caches from another shadow subtree,
    /// pairing children that share a live node. Used when an element is
    /// rebuilt in place and its children keep their synchronized state.
    pub fn copy_caches_from(&self, other: &ShadowNode) {
        {
            let mut inner = self.0.borrow_mut();
            let src = other.0.borrow();
            inner.attr_cache = src.attr_cache.clone();
            inner.text_cache = src.text_cache.clone();
        }
        for (child, other_child) in self.children().into_iter().zip(other.children()) {
            if child.live() == other_child.live() {
                child.copy_caches_from(&other_child);
            }
        }
    }

    /// Re-serializes the last synchronized form of this subtree from shadow
    /// state. Delete payloads use this rather than the live node, which may
    /// have been mutated again after detachment.
    pub fn serialized(&self) -> Value {
        let live = self.live();
        if live.is_comment() {
            return Value::Array(vec![
                Value::from(COMMENT_MARKER),
                Value::from(self.cached_text().unwrap_or_default()),
            ]);
        }
        if live.is_text() {
            return Value::from(self.cached_text().unwrap_or_default());
        }
        if let Some(name) = live.doctype_name() {
            return Value::Array(vec![Value::from(DOCTYPE_MARKER), Value::from(name)]);
        }
        let tag = sanitize_name(&live.tag().unwrap_or_default());
        let mut attrs = Map::new();
        {
            let inner = self.0.borrow();
            for (name, value) in &inner.attr_cache {
                attrs.insert(name.clone(), Value::from(value.as_str()));
            }
        }
        if let Some(id) = live.stable_id() {
            attrs.insert(RESERVED_ID_ATTRIBUTE.to_owned(), Value::from(id));
        }
        let mut list = vec![Value::from(tag), Value::Object(attrs)];
        for child in self.children() {
            list.push(child.serialized());
        }
        Value::Array(list)
    }
}

/// Where a path landed, for the applier to match on.
#[derive(Debug, Clone)]
pub enum Resolved {
    /// The tag-name slot of an element.
    Tag { element: ShadowNode },
    /// An attribute slot, with a trailing character offset when the path
    /// addresses a position inside the attribute value.
    Attribute {
        element: ShadowNode,
        name: String,
        offset: Option<usize>,
    },
    /// A child slot. `target` is the occupant (`None` when the index is the
    /// end-of-list insertion point); `offset` is present when the path
    /// addresses a character position inside a text child.
    Child {
        parent: ShadowNode,
        index: usize,
        target: Option<ShadowNode>,
        offset: Option<usize>,
    },
}

#[derive(Debug, Error)]
pub enum ResolveError {
    /// Benign: the position no longer exists. Expected under races.
    #[error("path does not resolve against the shadow tree")]
    Unresolved,
    /// The path shape is one the format disallows. Programming/data error.
    #[error("unsupported operation shape in path")]
    UnsupportedShape,
}

/// The structural index for one synchronized root.
pub struct ShadowTree {
    root: ShadowNode,
    by_live: HashMap<usize, Vec<ShadowNode>>,
}

impl ShadowTree {
    /// Builds the full index by a filtered walk from the live root. Done
    /// once per root at population time; afterwards the tree is maintained
    /// incrementally.
    pub fn build(live_root: &LiveNode, policy: &dyn TransiencePolicy) -> Self {
        let root = ShadowNode::new(
            live_root.clone(),
            initial_attr_cache(live_root, policy, false),
        );
        let mut tree = Self {
            root: root.clone(),
            by_live: HashMap::new(),
        };
        tree.register(&root);
        let verbatim = live_root.is_opaque_container();
        for child in live_root.logical_children() {
            if let Some(shadow) = tree.attach(&child, policy, verbatim) {
                let index = root.children_len();
                tree.splice(&root, index, &shadow);
            }
        }
        tree
    }

    pub fn root(&self) -> ShadowNode {
        self.root.clone()
    }

    fn register(&mut self, node: &ShadowNode) {
        self.by_live
            .entry(node.live().ptr_id())
            .or_default()
            .push(node.clone());
    }

    fn unregister(&mut self, node: &ShadowNode) {
        let key = node.live().ptr_id();
        if let Some(entries) = self.by_live.get_mut(&key) {
            entries.retain(|e| e != node);
            if entries.is_empty() {
                self.by_live.remove(&key);
            }
        }
    }

    /// Creates a shadow subtree for `live`, registering every node. The
    /// returned node is unparented; the caller splices it into place.
    /// Returns `None` when the filter rejects the node (`verbatim` bypasses
    /// the filter, as inside opaque-container content).
    pub fn attach(
        &mut self,
        live: &LiveNode,
        policy: &dyn TransiencePolicy,
        verbatim: bool,
    ) -> Option<ShadowNode> {
        if live.is_fragment() {
            return None;
        }
        if live.is_element() && !verbatim && policy.element_is_transient(live) {
            return None;
        }
        let node = ShadowNode::new(live.clone(), initial_attr_cache(live, policy, verbatim));
        self.register(&node);
        let child_verbatim = verbatim || live.is_opaque_container();
        for child in live.logical_children() {
            if let Some(shadow) = self.attach(&child, policy, child_verbatim) {
                shadow.0.borrow_mut().parent = Rc::downgrade(&node.0);
                node.0.borrow_mut().children.push(shadow);
            }
        }
        Some(node)
    }

    /// Links `node` as a child of `parent` at `index` (clamped to the end).
    pub fn splice(&mut self, parent: &ShadowNode, index: usize, node: &ShadowNode) {
        let index = index.min(parent.children_len());
        node.0.borrow_mut().parent = Rc::downgrade(&parent.0);
        parent.0.borrow_mut().children.insert(index, node.clone());
    }

    /// Unlinks `node` from its parent and tears down the subtree's lookup
    /// entries. Idempotent.
    pub fn detach(&mut self, node: &ShadowNode) {
        if let Some(parent) = node.parent() {
            if let Some(index) = parent.index_of(node) {
                parent.0.borrow_mut().children.remove(index);
            }
        }
        node.0.borrow_mut().parent = Weak::new();
        self.unregister_subtree(node);
    }

    fn unregister_subtree(&mut self, node: &ShadowNode) {
        self.unregister(node);
        for child in node.children() {
            self.unregister_subtree(&child);
        }
    }

    /// Live→shadow lookup. With more than one entry (which only happens
    /// mid-move), `parent_hint` picks the entry under that live parent.
    pub fn lookup(&self, live: &LiveNode, parent_hint: Option<&LiveNode>) -> Option<ShadowNode> {
        let entries = self.by_live.get(&live.ptr_id())?;
        match entries.len() {
            0 => None,
            1 => Some(entries[0].clone()),
            _ => {
                if let Some(hint) = parent_hint {
                    entries
                        .iter()
                        .find(|e| {
                            e.parent()
                                .map(|p| &p.live() == hint)
                                .unwrap_or(false)
                        })
                        .or_else(|| entries.first())
                        .cloned()
                } else {
                    entries.first().cloned()
                }
            }
        }
    }

    /// Like [`lookup`](Self::lookup), but a content fragment maps to its
    /// container element's shadow node.
    pub fn lookup_structural(&self, live: &LiveNode) -> Option<ShadowNode> {
        if live.is_fragment() {
            let container = live.parent()?;
            return self.lookup(&container, None);
        }
        self.lookup(live, None)
    }

    /// Position of a shadow node, computed from ancestry. `None` when the
    /// node is no longer linked under the root.
    pub fn path_of(&self, node: &ShadowNode) -> Option<Path> {
        let mut tokens: Vec<PathToken> = Vec::new();
        let mut cur = node.clone();
        while cur != self.root {
            let parent = cur.parent()?;
            let index = parent.index_of(&cur)?;
            tokens.push(PathToken::Index(ELEMENT_LIST_OFFSET + index));
            cur = parent;
        }
        tokens.reverse();
        Some(tokens)
    }

    /// Position of an attribute of `node`.
    pub fn attribute_path_of(&self, node: &ShadowNode, name: &str) -> Option<Path> {
        Some(attribute_sub_path(self.path_of(node)?, name))
    }

    /// Walks a path down from the root, returning enough context for the
    /// applier to decide how to interpret the final token.
    pub fn resolve(&self, path: &[PathToken]) -> Result<Resolved, ResolveError> {
        if path.is_empty() {
            return Err(ResolveError::UnsupportedShape);
        }
        let mut cur = self.root.clone();
        let mut i = 0;
        while i < path.len() {
            let n = match &path[i] {
                PathToken::Index(n) => *n,
                PathToken::Key(_) => return Err(ResolveError::UnsupportedShape),
            };
            if n == TAG_SLOT {
                if i + 1 != path.len() {
                    return Err(ResolveError::UnsupportedShape);
                }
                return Ok(Resolved::Tag { element: cur });
            }
            if n == ATTRIBUTE_SLOT {
                let name = match path.get(i + 1) {
                    Some(PathToken::Key(name)) => name.clone(),
                    _ => return Err(ResolveError::UnsupportedShape),
                };
                let offset = match path.get(i + 2) {
                    None => None,
                    Some(PathToken::Index(o)) if i + 3 == path.len() => Some(*o),
                    Some(_) => return Err(ResolveError::UnsupportedShape),
                };
                return Ok(Resolved::Attribute {
                    element: cur,
                    name,
                    offset,
                });
            }

            let index = n - ELEMENT_LIST_OFFSET;
            if i + 1 == path.len() {
                if index > cur.children_len() {
                    return Err(ResolveError::Unresolved);
                }
                let target = cur.child(index);
                return Ok(Resolved::Child {
                    parent: cur,
                    index,
                    target,
                    offset: None,
                });
            }

            let child = cur.child(index).ok_or(ResolveError::Unresolved)?;
            if child.live().is_character_data() {
                // The only thing addressable inside character data is an
                // offset, and it must end the path.
                return match &path[i + 1] {
                    PathToken::Index(offset) if i + 2 == path.len() => Ok(Resolved::Child {
                        parent: cur,
                        index,
                        target: Some(child),
                        offset: Some(*offset),
                    }),
                    _ => Err(ResolveError::UnsupportedShape),
                };
            }
            cur = child;
            i += 1;
        }
        Err(ResolveError::Unresolved)
    }

    /// Diagnostic invariant: filtered live children must match shadow
    /// children in count and identity, recursively. A mismatch means the
    /// replica's state is corrupt and must not keep producing operations.
    pub fn verify(&self, policy: &dyn TransiencePolicy) -> Result<(), SyncError> {
        verify_node(&self.root, policy, self.root.live().is_opaque_container())
    }
}

fn verify_node(
    node: &ShadowNode,
    policy: &dyn TransiencePolicy,
    verbatim: bool,
) -> Result<(), SyncError> {
    let live = node.live();
    let persistable: Vec<LiveNode> = live
        .logical_children()
        .into_iter()
        .filter(|c| !c.is_fragment())
        .filter(|c| verbatim || !c.is_element() || !policy.element_is_transient(c))
        .collect();
    let shadow_children = node.children();
    if persistable.len() != shadow_children.len() {
        let msg = format!(
            "child count diverged under {:?}: live {} vs shadow {}",
            live,
            persistable.len(),
            shadow_children.len()
        );
        error!("{}", msg);
        return Err(SyncError::StructuralIntegrity(msg));
    }
    for (live_child, shadow_child) in persistable.iter().zip(shadow_children.iter()) {
        if live_child != &shadow_child.live() {
            let msg = format!("child identity diverged under {:?}", live);
            error!("{}", msg);
            return Err(SyncError::StructuralIntegrity(msg));
        }
        let child_verbatim = verbatim || live_child.is_opaque_container();
        verify_node(shadow_child, policy, child_verbatim)?;
    }
    Ok(())
}

/// True when the node lives inside an opaque container's content, where the
/// transience filter does not apply.
pub fn in_opaque_content(node: &LiveNode) -> bool {
    let mut cur = node.parent();
    while let Some(n) = cur {
        if n.is_fragment() {
            return true;
        }
        cur = n.parent();
    }
    false
}

fn initial_attr_cache(
    live: &LiveNode,
    policy: &dyn TransiencePolicy,
    verbatim: bool,
) -> IndexMap<String, String> {
    let mut cache = IndexMap::new();
    if !live.is_element() {
        return cache;
    }
    let tag = sanitize_name(&live.tag().expect("element has a tag"));
    for (name, value) in live.attrs() {
        if !verbatim && policy.attribute_is_transient(&tag, &name) {
            continue;
        }
        let name = sanitize_name(&name);
        let value = if name == "style" {
            live.style_text().unwrap_or(value)
        } else {
            value
        };
        cache.insert(name, value);
    }
    cache
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{NoTransience, PrefixTransience};
    use otdom_live::LiveTree;

    fn build_simple() -> (LiveTree, ShadowTree) {
        let t = LiveTree::new("body");
        let root = t.root();
        let div = t.create_element("div", true);
        div.append_child(&t.create_text("hello")).unwrap();
        root.append_child(&div).unwrap();
        root.append_child(&t.create_text("tail")).unwrap();
        let shadow = ShadowTree::build(&root, &NoTransience);
        (t, shadow)
    }

    #[test]
    fn build_mirrors_structure() {
        let (_t, shadow) = build_simple();
        let root = shadow.root();
        assert_eq!(root.children_len(), 2);
        assert_eq!(root.child(0).unwrap().children_len(), 1);
        shadow.verify(&NoTransience).unwrap();
    }

    #[test]
    fn build_filters_transient_elements() {
        let t = LiveTree::new("body");
        let root = t.root();
        root.append_child(&t.create_element("transient-x", true))
            .unwrap();
        root.append_child(&t.create_element("div", true)).unwrap();
        let policy = PrefixTransience::default();
        let shadow = ShadowTree::build(&root, &policy);
        assert_eq!(shadow.root().children_len(), 1);
        assert_eq!(
            shadow.root().child(0).unwrap().live().tag(),
            Some("div".to_owned())
        );
        shadow.verify(&policy).unwrap();
    }

    #[test]
    fn path_offset_law() {
        let (_t, shadow) = build_simple();
        let div = shadow.root().child(0).unwrap();
        let text = div.child(0).unwrap();
        let parent_path = shadow.path_of(&div).unwrap();
        let child_path = shadow.path_of(&text).unwrap();
        let mut expected = parent_path.clone();
        expected.push(PathToken::Index(ELEMENT_LIST_OFFSET));
        assert_eq!(child_path, expected);
        assert_eq!(parent_path, vec![PathToken::Index(2)]);
    }

    #[test]
    fn resolve_child_attribute_and_tag() {
        let (_t, shadow) = build_simple();
        let div = shadow.root().child(0).unwrap();

        match shadow.resolve(&[PathToken::Index(2)]).unwrap() {
            Resolved::Child { parent, index, target, offset } => {
                assert_eq!(parent, shadow.root());
                assert_eq!(index, 0);
                assert_eq!(target, Some(div.clone()));
                assert_eq!(offset, None);
            }
            other => panic!("unexpected resolution: {:?}", other),
        }

        match shadow
            .resolve(&[
                PathToken::Index(2),
                PathToken::Index(1),
                PathToken::Key("class".to_owned()),
            ])
            .unwrap()
        {
            Resolved::Attribute { element, name, offset } => {
                assert_eq!(element, div);
                assert_eq!(name, "class");
                assert_eq!(offset, None);
            }
            other => panic!("unexpected resolution: {:?}", other),
        }

        match shadow
            .resolve(&[PathToken::Index(2), PathToken::Index(0)])
            .unwrap()
        {
            Resolved::Tag { element } => assert_eq!(element, div),
            other => panic!("unexpected resolution: {:?}", other),
        }

        // Character offset inside the text child of div.
        match shadow
            .resolve(&[PathToken::Index(2), PathToken::Index(2), PathToken::Index(3)])
            .unwrap()
        {
            Resolved::Child { offset, target, .. } => {
                assert_eq!(offset, Some(3));
                assert!(target.unwrap().live().is_text());
            }
            other => panic!("unexpected resolution: {:?}", other),
        }
    }

    #[test]
    fn resolve_failures() {
        let (_t, shadow) = build_simple();
        assert!(matches!(
            shadow.resolve(&[PathToken::Index(9)]),
            Err(ResolveError::Unresolved)
        ));
        // Diff-style op anchored at the tag slot is a format violation.
        assert!(matches!(
            shadow.resolve(&[PathToken::Index(2), PathToken::Index(0), PathToken::Index(1)]),
            Err(ResolveError::UnsupportedShape)
        ));
        assert!(matches!(
            shadow.resolve(&[]),
            Err(ResolveError::UnsupportedShape)
        ));
    }

    #[test]
    fn serialized_reflects_synchronized_state_not_live_drift() {
        let (_t, shadow) = build_simple();
        let div = shadow.root().child(0).unwrap();
        // Unacknowledged live mutations stay off the payload.
        div.live().set_attribute("class", "late").unwrap();
        div.child(0).unwrap().live().set_text("changed").unwrap();
        assert_eq!(div.serialized(), serde_json::json!(["div", {}, "hello"]));
    }

    #[test]
    fn detach_is_idempotent_and_unregisters() {
        let (_t, mut shadow) = build_simple();
        let div = shadow.root().child(0).unwrap();
        let live = div.live();
        shadow.detach(&div);
        assert_eq!(shadow.root().children_len(), 1);
        assert!(shadow.lookup(&live, None).is_none());
        shadow.detach(&div);
        assert_eq!(shadow.root().children_len(), 1);
    }

    #[test]
    fn verify_detects_divergence() {
        let (t, shadow) = build_simple();
        // Mutate the live tree behind the shadow tree's back.
        shadow
            .root()
            .live()
            .append_child(&t.create_element("div", true))
            .unwrap();
        assert!(matches!(
            shadow.verify(&NoTransience),
            Err(SyncError::StructuralIntegrity(_))
        ));
    }

    #[test]
    fn opaque_content_is_collapsed() {
        let t = LiveTree::new("body");
        let root = t.root();
        let template = t.create_element("template", true);
        template
            .append_child(&t.create_element("transient-x", true))
            .unwrap();
        root.append_child(&template).unwrap();
        let policy = PrefixTransience::default();
        let shadow = ShadowTree::build(&root, &policy);
        let template_shadow = shadow.root().child(0).unwrap();
        // Transient content is kept verbatim and sits directly under the
        // container's shadow node.
        assert_eq!(template_shadow.children_len(), 1);
        let fragment = template.content().unwrap();
        assert_eq!(
            shadow.lookup_structural(&fragment),
            Some(template_shadow.clone())
        );
        shadow.verify(&policy).unwrap();
    }
}
