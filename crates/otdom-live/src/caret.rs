//! The live cursor.

use crate::node::LiveNode;

/// A selection anchored in one character-data node.
///
/// Offsets count `char`s. `start <= end`; a collapsed caret has
/// `start == end`.
#[derive(Debug, Clone)]
pub struct Caret {
    pub node: LiveNode,
    pub start: usize,
    pub end: usize,
}

impl Caret {
    pub fn collapsed(node: LiveNode, offset: usize) -> Self {
        Self {
            node,
            start: offset,
            end: offset,
        }
    }
}
