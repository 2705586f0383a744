//! Nodes, the tree factory, and mutation delivery.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use indexmap::IndexMap;

use crate::caret::Caret;
use crate::observer::{MutationRecord, Observer};
use crate::LiveError;

/// What a node is. Structure (parent/children) lives outside the kind so the
/// tree shape is uniform across kinds.
#[derive(Debug, Clone)]
pub enum NodeKind {
    Element {
        tag: String,
        namespace: Option<String>,
        attrs: IndexMap<String, String>,
        /// Computed-style text, preferred over the `style` attribute when
        /// serializing. Set by the host, never by the core.
        style_text: Option<String>,
    },
    Text(String),
    Comment(String),
    Doctype(String),
    /// Content fragment of an opaque container. Never created directly;
    /// the factory attaches one to every opaque-container element.
    Fragment,
}

struct NodeInner {
    kind: NodeKind,
    parent: Weak<RefCell<NodeInner>>,
    children: Vec<LiveNode>,
    /// Content fragment, present only on opaque-container elements.
    content: Option<LiveNode>,
    stable_id: Option<String>,
    approved: bool,
    observers: Vec<Observer>,
}

/// A handle to one live node. Cloning is cheap and clones refer to the same
/// node; equality is handle identity.
#[derive(Clone)]
pub struct LiveNode(Rc<RefCell<NodeInner>>);

impl PartialEq for LiveNode {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for LiveNode {}

impl fmt::Debug for LiveNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.try_borrow() {
            Ok(inner) => match &inner.kind {
                NodeKind::Element { tag, .. } => write!(f, "LiveNode<{}@{:p}>", tag, self.0),
                NodeKind::Text(t) => write!(f, "LiveNode<#text {:?}>", t),
                NodeKind::Comment(_) => write!(f, "LiveNode<#comment>"),
                NodeKind::Doctype(name) => write!(f, "LiveNode<!doctype {}>", name),
                NodeKind::Fragment => write!(f, "LiveNode<#fragment@{:p}>", self.0),
            },
            Err(_) => write!(f, "LiveNode<borrowed@{:p}>", self.0),
        }
    }
}

impl LiveNode {
    fn from_kind(kind: NodeKind, approved: bool) -> Self {
        Self(Rc::new(RefCell::new(NodeInner {
            kind,
            parent: Weak::new(),
            children: Vec::new(),
            content: None,
            stable_id: None,
            approved,
            observers: Vec::new(),
        })))
    }

    /// Stable identity key for maps. Valid for the life of the handle.
    pub fn ptr_id(&self) -> usize {
        Rc::as_ptr(&self.0) as usize
    }

    // ── kind queries ──────────────────────────────────────────────────────

    pub fn is_element(&self) -> bool {
        matches!(self.0.borrow().kind, NodeKind::Element { .. })
    }

    pub fn is_text(&self) -> bool {
        matches!(self.0.borrow().kind, NodeKind::Text(_))
    }

    pub fn is_comment(&self) -> bool {
        matches!(self.0.borrow().kind, NodeKind::Comment(_))
    }

    pub fn is_doctype(&self) -> bool {
        matches!(self.0.borrow().kind, NodeKind::Doctype(_))
    }

    pub fn is_fragment(&self) -> bool {
        matches!(self.0.borrow().kind, NodeKind::Fragment)
    }

    pub fn is_character_data(&self) -> bool {
        matches!(self.0.borrow().kind, NodeKind::Text(_) | NodeKind::Comment(_))
    }

    // ── element accessors ────────────────────────────────────────────────

    pub fn tag(&self) -> Option<String> {
        match &self.0.borrow().kind {
            NodeKind::Element { tag, .. } => Some(tag.clone()),
            _ => None,
        }
    }

    pub fn namespace(&self) -> Option<String> {
        match &self.0.borrow().kind {
            NodeKind::Element { namespace, .. } => namespace.clone(),
            _ => None,
        }
    }

    pub fn attr(&self, name: &str) -> Option<String> {
        match &self.0.borrow().kind {
            NodeKind::Element { attrs, .. } => attrs.get(name).cloned(),
            _ => None,
        }
    }

    /// Attributes in insertion order.
    pub fn attrs(&self) -> Vec<(String, String)> {
        match &self.0.borrow().kind {
            NodeKind::Element { attrs, .. } => {
                attrs.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
            }
            _ => Vec::new(),
        }
    }

    pub fn style_text(&self) -> Option<String> {
        match &self.0.borrow().kind {
            NodeKind::Element { style_text, .. } => style_text.clone(),
            _ => None,
        }
    }

    /// Sets the computed-style text. Serializer hint only; emits no record.
    pub fn set_style_text(&self, style: Option<String>) -> Result<(), LiveError> {
        match &mut self.0.borrow_mut().kind {
            NodeKind::Element { style_text, .. } => {
                *style_text = style;
                Ok(())
            }
            _ => Err(LiveError::NotAnElement),
        }
    }

    // ── character data / doctype ─────────────────────────────────────────

    pub fn text(&self) -> Option<String> {
        match &self.0.borrow().kind {
            NodeKind::Text(t) | NodeKind::Comment(t) => Some(t.clone()),
            _ => None,
        }
    }

    pub fn doctype_name(&self) -> Option<String> {
        match &self.0.borrow().kind {
            NodeKind::Doctype(name) => Some(name.clone()),
            _ => None,
        }
    }

    // ── stable id / approval / content ───────────────────────────────────

    pub fn stable_id(&self) -> Option<String> {
        self.0.borrow().stable_id.clone()
    }

    /// Assigns the stable id. Kept off the attribute set, so no record.
    pub fn set_stable_id(&self, id: &str) {
        self.0.borrow_mut().stable_id = Some(id.to_owned());
    }

    pub fn approved(&self) -> bool {
        self.0.borrow().approved
    }

    /// The content fragment, for opaque-container elements.
    pub fn content(&self) -> Option<LiveNode> {
        self.0.borrow().content.clone()
    }

    pub fn is_opaque_container(&self) -> bool {
        self.0.borrow().content.is_some()
    }

    // ── structure ────────────────────────────────────────────────────────

    pub fn parent(&self) -> Option<LiveNode> {
        self.0.borrow().parent.upgrade().map(LiveNode)
    }

    pub fn children(&self) -> Vec<LiveNode> {
        self.0.borrow().children.clone()
    }

    pub fn child_count(&self) -> usize {
        self.0.borrow().children.len()
    }

    pub fn child(&self, index: usize) -> Option<LiveNode> {
        self.0.borrow().children.get(index).cloned()
    }

    /// Children as the document sees them: for an opaque container, the
    /// content fragment's children; otherwise the node's own.
    pub fn logical_children(&self) -> Vec<LiveNode> {
        match self.content() {
            Some(content) => content.children(),
            None => self.children(),
        }
    }

    pub fn index_in_parent(&self) -> Option<usize> {
        let parent = self.parent()?;
        parent.children().iter().position(|c| c == self)
    }

    /// True if `other` is `self` or a descendant of `self` (content
    /// fragments included, since their parent link points at the container).
    pub fn contains(&self, other: &LiveNode) -> bool {
        let mut cur = Some(other.clone());
        while let Some(node) = cur {
            if &node == self {
                return true;
            }
            cur = node.parent();
        }
        false
    }

    // ── observation ──────────────────────────────────────────────────────

    /// Subscribes an observer to this node's subtree.
    pub fn observe(&self) -> Observer {
        let obs = Observer::new();
        self.0.borrow_mut().observers.push(obs.clone());
        obs
    }

    pub fn unobserve(&self, observer: &Observer) {
        self.0
            .borrow_mut()
            .observers
            .retain(|o| !Rc::ptr_eq(&o.state, &observer.state));
    }

    /// Delivers a record to every active observer on the ancestor chain,
    /// stopping at a content fragment so container content stays isolated.
    fn notify(origin: &LiveNode, record: MutationRecord) {
        let mut sinks: Vec<Observer> = Vec::new();
        let mut cur = Some(origin.clone());
        while let Some(node) = cur {
            sinks.extend(node.0.borrow().observers.iter().cloned());
            if node.is_fragment() {
                break;
            }
            cur = node.parent();
        }
        for obs in sinks {
            obs.push(record.clone());
        }
    }

    // ── mutation ─────────────────────────────────────────────────────────

    /// Appends `child` as the last child. On an opaque container this lands
    /// in the content fragment.
    pub fn append_child(&self, child: &LiveNode) -> Result<(), LiveError> {
        self.insert_before(child, None)
    }

    /// Inserts `child` before `reference` (or at the end). A child already
    /// attached elsewhere is detached first, which emits its own record at
    /// the old parent.
    pub fn insert_before(
        &self,
        child: &LiveNode,
        reference: Option<&LiveNode>,
    ) -> Result<(), LiveError> {
        if let Some(content) = self.content() {
            return content.insert_before(child, reference);
        }
        if child.contains(self) {
            return Err(LiveError::HierarchyViolation);
        }
        if let Some(old_parent) = child.parent() {
            old_parent.remove_child(child)?;
        }
        let index = match reference {
            Some(r) => self
                .0
                .borrow()
                .children
                .iter()
                .position(|c| c == r)
                .ok_or(LiveError::ReferenceNotAChild)?,
            None => self.0.borrow().children.len(),
        };
        {
            let mut inner = self.0.borrow_mut();
            inner.children.insert(index, child.clone());
        }
        child.0.borrow_mut().parent = Rc::downgrade(&self.0);
        Self::notify(
            self,
            MutationRecord::ChildrenChanged {
                target: self.clone(),
                added: vec![child.clone()],
                removed: vec![],
            },
        );
        Ok(())
    }

    pub fn remove_child(&self, child: &LiveNode) -> Result<(), LiveError> {
        if let Some(content) = self.content() {
            if content.children().iter().any(|c| c == child) {
                return content.remove_child(child);
            }
        }
        let index = self
            .0
            .borrow()
            .children
            .iter()
            .position(|c| c == child)
            .ok_or(LiveError::NotAChild)?;
        {
            let mut inner = self.0.borrow_mut();
            inner.children.remove(index);
        }
        child.0.borrow_mut().parent = Weak::new();
        Self::notify(
            self,
            MutationRecord::ChildrenChanged {
                target: self.clone(),
                added: vec![],
                removed: vec![child.clone()],
            },
        );
        Ok(())
    }

    /// Detaches this node from its parent, if any.
    pub fn detach(&self) -> Result<(), LiveError> {
        match self.parent() {
            Some(parent) => parent.remove_child(self),
            None => Ok(()),
        }
    }

    pub fn set_attribute(&self, name: &str, value: &str) -> Result<(), LiveError> {
        let old = match &mut self.0.borrow_mut().kind {
            NodeKind::Element { attrs, .. } => attrs.insert(name.to_owned(), value.to_owned()),
            _ => return Err(LiveError::NotAnElement),
        };
        Self::notify(
            self,
            MutationRecord::AttributeChanged {
                target: self.clone(),
                name: name.to_owned(),
                old_value: old,
            },
        );
        Ok(())
    }

    pub fn remove_attribute(&self, name: &str) -> Result<(), LiveError> {
        let old = match &mut self.0.borrow_mut().kind {
            NodeKind::Element { attrs, .. } => attrs.shift_remove(name),
            _ => return Err(LiveError::NotAnElement),
        };
        // Removing an absent attribute changes nothing and emits nothing.
        if let Some(old) = old {
            Self::notify(
                self,
                MutationRecord::AttributeChanged {
                    target: self.clone(),
                    name: name.to_owned(),
                    old_value: Some(old),
                },
            );
        }
        Ok(())
    }

    pub fn set_text(&self, new_text: &str) -> Result<(), LiveError> {
        let old = match &mut self.0.borrow_mut().kind {
            NodeKind::Text(t) | NodeKind::Comment(t) => {
                std::mem::replace(t, new_text.to_owned())
            }
            _ => return Err(LiveError::NotCharacterData),
        };
        Self::notify(
            self,
            MutationRecord::TextChanged {
                target: self.clone(),
                old_value: old,
            },
        );
        Ok(())
    }
}

/// The document: node factory, root, caret, and the opaque-container tag
/// list. One `LiveTree` per synchronized root.
pub struct LiveTree {
    root: LiveNode,
    caret: RefCell<Option<Caret>>,
    opaque_tags: Vec<String>,
}

impl LiveTree {
    /// Creates a tree whose root is an element with the given tag. Opaque
    /// containers default to `template`.
    pub fn new(root_tag: &str) -> Self {
        Self::with_opaque_tags(root_tag, vec!["template".to_owned()])
    }

    pub fn with_opaque_tags(root_tag: &str, opaque_tags: Vec<String>) -> Self {
        let tree = Self {
            root: LiveNode::from_kind(
                NodeKind::Element {
                    tag: root_tag.to_owned(),
                    namespace: None,
                    attrs: IndexMap::new(),
                    style_text: None,
                },
                true,
            ),
            caret: RefCell::new(None),
            opaque_tags,
        };
        if tree.is_opaque_tag(root_tag) {
            tree.attach_content(&tree.root);
        }
        tree
    }

    pub fn root(&self) -> LiveNode {
        self.root.clone()
    }

    pub fn is_opaque_tag(&self, tag: &str) -> bool {
        self.opaque_tags.iter().any(|t| t == tag)
    }

    pub fn opaque_tags(&self) -> &[String] {
        &self.opaque_tags
    }

    fn attach_content(&self, element: &LiveNode) {
        let content = LiveNode::from_kind(NodeKind::Fragment, true);
        content.0.borrow_mut().parent = Rc::downgrade(&element.0);
        element.0.borrow_mut().content = Some(content);
    }

    /// Creates an element. `approved` marks nodes the application created
    /// through sanctioned paths; transience policies may reject the rest.
    pub fn create_element(&self, tag: &str, approved: bool) -> LiveNode {
        self.create_element_ns(tag, None, approved)
    }

    pub fn create_element_ns(
        &self,
        tag: &str,
        namespace: Option<&str>,
        approved: bool,
    ) -> LiveNode {
        let node = LiveNode::from_kind(
            NodeKind::Element {
                tag: tag.to_owned(),
                namespace: namespace.map(str::to_owned),
                attrs: IndexMap::new(),
                style_text: None,
            },
            approved,
        );
        if self.is_opaque_tag(tag) {
            self.attach_content(&node);
        }
        node
    }

    pub fn create_text(&self, text: &str) -> LiveNode {
        LiveNode::from_kind(NodeKind::Text(text.to_owned()), true)
    }

    pub fn create_comment(&self, text: &str) -> LiveNode {
        LiveNode::from_kind(NodeKind::Comment(text.to_owned()), true)
    }

    pub fn create_doctype(&self, name: &str) -> LiveNode {
        LiveNode::from_kind(NodeKind::Doctype(name.to_owned()), true)
    }

    // ── caret ────────────────────────────────────────────────────────────

    pub fn caret(&self) -> Option<Caret> {
        self.caret.borrow().clone()
    }

    pub fn set_caret(&self, caret: Option<Caret>) {
        *self.caret.borrow_mut() = caret;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree() -> LiveTree {
        LiveTree::new("body")
    }

    #[test]
    fn factory_nodes_are_approved() {
        let t = tree();
        assert!(t.create_element("div", true).approved());
        assert!(!t.create_element("div", false).approved());
        assert!(t.create_text("x").approved());
    }

    #[test]
    fn insert_and_structure() {
        let t = tree();
        let root = t.root();
        let a = t.create_element("div", true);
        let b = t.create_text("hi");
        root.append_child(&a).unwrap();
        root.insert_before(&b, Some(&a)).unwrap();
        assert_eq!(root.children(), vec![b.clone(), a.clone()]);
        assert_eq!(a.index_in_parent(), Some(1));
        assert_eq!(b.parent(), Some(root));
    }

    #[test]
    fn observer_sees_post_edit_records() {
        let t = tree();
        let root = t.root();
        let obs = root.observe();
        let div = t.create_element("div", true);
        root.append_child(&div).unwrap();
        div.set_attribute("class", "x").unwrap();
        let records = obs.take_records();
        assert_eq!(records.len(), 2);
        assert!(matches!(&records[0], MutationRecord::ChildrenChanged { added, .. } if added.len() == 1));
        assert!(matches!(
            &records[1],
            MutationRecord::AttributeChanged { name, old_value: None, .. } if name == "class"
        ));
    }

    #[test]
    fn inactive_observer_queues_nothing() {
        let t = tree();
        let root = t.root();
        let obs = root.observe();
        obs.set_active(false);
        root.append_child(&t.create_element("div", true)).unwrap();
        assert!(obs.take_records().is_empty());
        obs.set_active(true);
        root.append_child(&t.create_element("span", true)).unwrap();
        assert_eq!(obs.take_records().len(), 1);
    }

    #[test]
    fn move_emits_remove_then_insert() {
        let t = tree();
        let root = t.root();
        let a = t.create_element("div", true);
        let b = t.create_element("section", true);
        let child = t.create_text("x");
        root.append_child(&a).unwrap();
        root.append_child(&b).unwrap();
        a.append_child(&child).unwrap();
        let obs = root.observe();
        b.append_child(&child).unwrap();
        let records = obs.take_records();
        assert_eq!(records.len(), 2);
        assert!(matches!(&records[0], MutationRecord::ChildrenChanged { removed, .. } if removed.len() == 1));
        assert!(matches!(&records[1], MutationRecord::ChildrenChanged { added, .. } if added.len() == 1));
        assert_eq!(child.parent(), Some(b));
    }

    #[test]
    fn hierarchy_violation_is_rejected() {
        let t = tree();
        let root = t.root();
        let a = t.create_element("div", true);
        root.append_child(&a).unwrap();
        assert!(matches!(
            a.insert_before(&root, None),
            Err(LiveError::HierarchyViolation)
        ));
    }

    #[test]
    fn opaque_container_children_go_to_content() {
        let t = tree();
        let template = t.create_element("template", true);
        let inner = t.create_element("div", true);
        template.append_child(&inner).unwrap();
        assert!(template.children().is_empty());
        let content = template.content().unwrap();
        assert_eq!(content.children(), vec![inner.clone()]);
        assert_eq!(template.logical_children(), vec![inner]);
    }

    #[test]
    fn fragment_boundary_stops_record_routing() {
        let t = tree();
        let root = t.root();
        let template = t.create_element("template", true);
        root.append_child(&template).unwrap();
        let outer = root.observe();
        let inner = template.content().unwrap().observe();
        template.append_child(&t.create_text("hidden")).unwrap();
        assert!(outer.take_records().is_empty());
        assert_eq!(inner.take_records().len(), 1);
    }

    #[test]
    fn text_record_carries_old_value() {
        let t = tree();
        let root = t.root();
        let text = t.create_text("before");
        root.append_child(&text).unwrap();
        let obs = root.observe();
        text.set_text("after").unwrap();
        let records = obs.take_records();
        assert!(matches!(
            &records[0],
            MutationRecord::TextChanged { old_value, .. } if old_value == "before"
        ));
        assert_eq!(text.text().unwrap(), "after");
    }

    #[test]
    fn remove_absent_attribute_is_silent() {
        let t = tree();
        let div = t.create_element("div", true);
        let obs = div.observe();
        div.remove_attribute("missing").unwrap();
        assert!(obs.take_records().is_empty());
    }
}
