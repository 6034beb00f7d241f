use std::cmp::Ordering;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use super::node::MemoryNode;

static NEXT_COMPARATOR_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SortKey {
    Label,
    ElementSize,
    ShallowSize,
    RetainedSize,
}

/// Orders sibling nodes. Every comparator gets a fresh id; nodes remember the
/// id they were last sorted with to detect stale order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeComparator {
    id: u64,
    key: SortKey,
    descending: bool,
}

impl NodeComparator {
    pub fn new(key: SortKey, descending: bool) -> Self {
        Self {
            id: NEXT_COMPARATOR_ID.fetch_add(1, AtomicOrdering::Relaxed),
            key,
            descending,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn key(&self) -> SortKey {
        self.key
    }

    pub fn is_descending(&self) -> bool {
        self.descending
    }

    /// Nodes without the sort attribute go last in either direction; ties are
    /// broken by label.
    pub fn compare(&self, a: &MemoryNode, b: &MemoryNode) -> Ordering {
        let ordering = match self.key {
            SortKey::Label => a.label().cmp(&b.label()),
            _ => match (self.value(a), self.value(b)) {
                (Some(x), Some(y)) => x.cmp(&y),
                (Some(_), None) => return Ordering::Less,
                (None, Some(_)) => return Ordering::Greater,
                (None, None) => Ordering::Equal,
            },
        };
        let ordering = if self.descending {
            ordering.reverse()
        } else {
            ordering
        };
        ordering.then_with(|| a.label().cmp(&b.label()))
    }

    fn value(&self, node: &MemoryNode) -> Option<i64> {
        match self.key {
            SortKey::Label => None,
            SortKey::ElementSize => node.element_size(),
            SortKey::ShallowSize => node.shallow_size(),
            SortKey::RetainedSize => node.retained_size(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::InstanceObject;
    use std::sync::Arc;

    fn instance(id: u64, shallow: i64) -> MemoryNode {
        MemoryNode::Instance(Arc::new(InstanceObject::new(id, "a.Foo", shallow)))
    }

    #[test]
    fn test_ids_are_unique() {
        let a = NodeComparator::new(SortKey::Label, false);
        let b = NodeComparator::new(SortKey::Label, false);
        assert_ne!(a.id(), b.id());
        assert_ne!(a, b);
    }

    #[test]
    fn test_size_order_with_missing_values_last() {
        let cmp = NodeComparator::new(SortKey::ShallowSize, true);
        let root = MemoryNode::Root {
            name: "r".to_string(),
        };
        let mut nodes = vec![instance(1, 8), root.clone(), instance(2, 32)];
        nodes.sort_by(|a, b| cmp.compare(a, b));
        assert_eq!(nodes[0].shallow_size(), Some(32));
        assert_eq!(nodes[1].shallow_size(), Some(8));
        assert_eq!(nodes[2], root);
    }
}
