//! Host-supplied policies: transience predicates and stable-id allocation.

use otdom_live::LiveNode;
use rand::distributions::Alphanumeric;
use rand::Rng;

/// Decides which live content is excluded from synchronization.
///
/// Both predicates must be pure; they are consulted on every structural and
/// attribute mutation. Content inside an opaque container bypasses them.
pub trait TransiencePolicy {
    /// True to exclude the element (and its whole subtree).
    fn element_is_transient(&self, node: &LiveNode) -> bool;

    /// True to exclude one attribute of an element with the given tag.
    fn attribute_is_transient(&self, tag: &str, attribute: &str) -> bool;
}

/// Synchronizes everything.
#[derive(Debug, Default)]
pub struct NoTransience;

impl TransiencePolicy for NoTransience {
    fn element_is_transient(&self, _node: &LiveNode) -> bool {
        false
    }

    fn attribute_is_transient(&self, _tag: &str, _attribute: &str) -> bool {
        false
    }
}

/// Excludes elements whose tag carries a marker prefix, and unapproved
/// elements created outside the factory's sanctioned path.
#[derive(Debug)]
pub struct PrefixTransience {
    pub tag_prefix: String,
    pub attribute_prefix: String,
}

impl Default for PrefixTransience {
    fn default() -> Self {
        Self {
            tag_prefix: "transient-".to_owned(),
            attribute_prefix: "transient-".to_owned(),
        }
    }
}

impl TransiencePolicy for PrefixTransience {
    fn element_is_transient(&self, node: &LiveNode) -> bool {
        if !node.approved() {
            return true;
        }
        match node.tag() {
            Some(tag) => tag.starts_with(&self.tag_prefix),
            None => false,
        }
    }

    fn attribute_is_transient(&self, _tag: &str, attribute: &str) -> bool {
        attribute.starts_with(&self.attribute_prefix)
    }
}

/// Produces globally unique stable ids.
pub trait IdAllocator {
    fn next_id(&mut self) -> String;
}

/// Default allocator: 16 random alphanumeric characters.
pub struct RandomIdAllocator;

impl IdAllocator for RandomIdAllocator {
    fn next_id(&mut self) -> String {
        let mut rng = rand::thread_rng();
        (0..16).map(|_| rng.sample(Alphanumeric) as char).collect()
    }
}

/// Deterministic allocator for tests and replay tooling.
#[derive(Debug, Default)]
pub struct SequentialIdAllocator {
    next: u64,
}

impl IdAllocator for SequentialIdAllocator {
    fn next_id(&mut self) -> String {
        let id = self.next;
        self.next += 1;
        format!("id{:08}", id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_ids_are_unique_and_sized() {
        let mut alloc = RandomIdAllocator;
        let a = alloc.next_id();
        let b = alloc.next_id();
        assert_eq!(a.len(), 16);
        assert_ne!(a, b);
    }

    #[test]
    fn sequential_ids_are_stable() {
        let mut alloc = SequentialIdAllocator::default();
        assert_eq!(alloc.next_id(), "id00000000");
        assert_eq!(alloc.next_id(), "id00000001");
    }
}
