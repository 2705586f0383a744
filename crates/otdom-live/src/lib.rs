//! The live mutable tree for otdom.
//!
//! This crate plays the role of the "externally owned" document tree that the
//! synchronization core observes and mutates. It provides:
//!
//! - [`LiveNode`]: a cheap, cloneable handle to a mutable tree node
//!   (element, text, comment, doctype, or content fragment),
//! - [`LiveTree`]: the node factory and document-level state (root, caret,
//!   opaque-container tag list),
//! - [`Observer`]: synchronous post-edit change notification with
//!   per-observer record queues and an active flag,
//! - [`Caret`]: a single optional cursor whose offsets remote edits shift.
//!
//! Nodes are created through the [`LiveTree`] factory and are tracked from
//! birth; there is no post-hoc registration step. Mutating methods deliver a
//! [`MutationRecord`] to every active observer on the ancestor chain, stopping
//! at content-fragment boundaries so opaque-container content is only visible
//! to observers attached on the fragment itself.

mod caret;
mod node;
mod observer;

pub use caret::Caret;
pub use node::{LiveNode, LiveTree, NodeKind};
pub use observer::{MutationRecord, Observer};

use thiserror::Error;

/// Errors raised by live-tree mutations.
#[derive(Debug, Error)]
pub enum LiveError {
    /// Inserting a node under one of its own descendants (or under itself).
    #[error("hierarchy violation: node would become its own ancestor")]
    HierarchyViolation,
    /// The given child is not a child of this node.
    #[error("node is not a child of the given parent")]
    NotAChild,
    /// The reference sibling passed to an insertion is not a child.
    #[error("reference node is not a child of the given parent")]
    ReferenceNotAChild,
    /// A text mutation was attempted on a node without character data.
    #[error("node does not carry character data")]
    NotCharacterData,
    /// An element-only operation was attempted on a non-element node.
    #[error("node is not an element")]
    NotAnElement,
}
