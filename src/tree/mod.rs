//! Lazily expanded, sortable tree over a loaded capture.
//!
//! Nodes live in an arena and refer to each other by [`NodeId`]. Children are
//! built by a [`NodeSource`] the first time a node is expanded, and a node's
//! child count is memoized until its children change. Sorting is driven from
//! the root: [`MemoryTree::sort`] reorders the root's children immediately and
//! every other node catches up the next time its children are read.

pub mod comparator;
pub mod node;
pub mod source;

use std::fmt;
use std::sync::Arc;

pub use comparator::{NodeComparator, SortKey};
pub use node::{Capability, CapabilitySet, MemoryNode};
pub use source::{CaptureNodeSource, NodeSource};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(&self) -> usize {
        self.0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ChildCount {
    Invalid,
    Known(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeError {
    /// The node's parent chain loops back on itself.
    Cycle { node: NodeId },
    UnknownNode { node: NodeId },
}

impl fmt::Display for TreeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TreeError::Cycle { node } => {
                write!(f, "parent chain of node {} contains a cycle", node.0)
            }
            TreeError::UnknownNode { node } => write!(f, "node {} is not in this tree", node.0),
        }
    }
}

impl std::error::Error for TreeError {}

struct TreeNode {
    node: MemoryNode,
    parent: Option<NodeId>,
    /// `None` until expanded.
    children: Option<Vec<NodeId>>,
    count: ChildCount,
    /// Id of the comparator the children were last ordered with.
    sorted_with: Option<u64>,
    comparator: Option<Arc<NodeComparator>>,
}

impl TreeNode {
    fn new(node: MemoryNode, parent: Option<NodeId>) -> Self {
        Self {
            node,
            parent,
            children: None,
            count: ChildCount::Invalid,
            sorted_with: None,
            comparator: None,
        }
    }
}

pub struct MemoryTree {
    nodes: Vec<TreeNode>,
    source: Box<dyn NodeSource>,
}

impl MemoryTree {
    pub fn new(root: MemoryNode, source: impl NodeSource + 'static) -> Self {
        Self {
            nodes: vec![TreeNode::new(root, None)],
            source: Box::new(source),
        }
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub fn node(&self, id: NodeId) -> &MemoryNode {
        &self.nodes[id.0].node
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.0].parent
    }

    pub fn is_expanded(&self, id: NodeId) -> bool {
        self.nodes[id.0].children.is_some()
    }

    /// Number of children, computed at most once per structural change.
    pub fn child_count(&mut self, id: NodeId) -> usize {
        if let ChildCount::Known(count) = self.nodes[id.0].count {
            return count;
        }
        let count = match &self.nodes[id.0].children {
            Some(children) => children.len(),
            None => self.source.child_count(&self.nodes[id.0].node),
        };
        self.nodes[id.0].count = ChildCount::Known(count);
        count
    }

    /// Children in the effective comparator's order.
    pub fn children(&mut self, id: NodeId) -> Vec<NodeId> {
        self.expand(id);
        self.ensure_order(id);
        self.nodes[id.0].children.clone().unwrap_or_default()
    }

    pub fn child_at(&mut self, id: NodeId, index: usize) -> Option<NodeId> {
        self.expand(id);
        self.ensure_order(id);
        self.nodes[id.0]
            .children
            .as_ref()
            .and_then(|c| c.get(index).copied())
    }

    fn expand(&mut self, id: NodeId) {
        if self.nodes[id.0].children.is_some() {
            return;
        }
        let built = self.source.children(&self.nodes[id.0].node);
        let mut ids = Vec::with_capacity(built.len());
        for node in built {
            ids.push(self.push(node, Some(id)));
        }
        let entry = &mut self.nodes[id.0];
        entry.count = ChildCount::Known(ids.len());
        entry.children = Some(ids);
        entry.sorted_with = None;
    }

    fn push(&mut self, node: MemoryNode, parent: Option<NodeId>) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(TreeNode::new(node, parent));
        id
    }

    /// Sets the comparator for the whole tree. The root reorders now; other
    /// expanded nodes reorder when next read.
    pub fn sort(&mut self, comparator: NodeComparator) {
        let root = self.root();
        self.nodes[root.0].comparator = Some(Arc::new(comparator));
        if self.is_expanded(root) {
            self.ensure_order(root);
        }
    }

    /// Overrides the comparator for `id` and its descendants. `None` returns
    /// the subtree to the inherited comparator.
    pub fn set_local_comparator(&mut self, id: NodeId, comparator: Option<NodeComparator>) {
        if id == self.root() {
            if let Some(comparator) = comparator {
                self.sort(comparator);
            }
            return;
        }
        self.nodes[id.0].comparator = comparator.map(Arc::new);
    }

    /// The nearest comparator on the way from `id` to the root.
    pub fn effective_comparator(&self, id: NodeId) -> Option<Arc<NodeComparator>> {
        let mut current = Some(id);
        let mut steps = 0;
        while let Some(node) = current {
            if let Some(comparator) = &self.nodes[node.0].comparator {
                return Some(comparator.clone());
            }
            steps += 1;
            if steps > self.nodes.len() {
                return None;
            }
            current = self.nodes[node.0].parent;
        }
        None
    }

    fn ensure_order(&mut self, id: NodeId) {
        let Some(comparator) = self.effective_comparator(id) else {
            return;
        };
        if self.nodes[id.0].sorted_with == Some(comparator.id()) {
            return;
        }
        let Some(mut children) = self.nodes[id.0].children.take() else {
            return;
        };
        children.sort_by(|a, b| comparator.compare(&self.nodes[a.0].node, &self.nodes[b.0].node));
        let entry = &mut self.nodes[id.0];
        entry.children = Some(children);
        entry.sorted_with = Some(comparator.id());
    }

    /// Appends `node` under `parent`, expanding `parent` first.
    pub fn add_child(&mut self, parent: NodeId, node: MemoryNode) -> NodeId {
        self.expand(parent);
        let id = self.push(node, Some(parent));
        let entry = &mut self.nodes[parent.0];
        if let Some(children) = entry.children.as_mut() {
            children.push(id);
        }
        entry.count = ChildCount::Invalid;
        entry.sorted_with = None;
        id
    }

    /// Detaches `child` from `parent`. Returns whether it was a child.
    pub fn remove_child(&mut self, parent: NodeId, child: NodeId) -> bool {
        let entry = &mut self.nodes[parent.0];
        let Some(children) = entry.children.as_mut() else {
            return false;
        };
        let before = children.len();
        children.retain(|c| *c != child);
        if children.len() == before {
            return false;
        }
        entry.count = ChildCount::Invalid;
        self.nodes[child.0].parent = None;
        true
    }

    /// Drops the children of `id`; the next read rebuilds them from the source.
    pub fn reset_children(&mut self, id: NodeId) {
        if let Some(children) = self.nodes[id.0].children.take() {
            for child in children {
                self.nodes[child.0].parent = None;
            }
        }
        self.nodes[id.0].count = ChildCount::Invalid;
        self.nodes[id.0].sorted_with = None;
    }

    /// The path from the root down to `id`, inclusive.
    pub fn path_to_root(&self, id: NodeId) -> Result<Vec<NodeId>, TreeError> {
        if id.0 >= self.nodes.len() {
            return Err(TreeError::UnknownNode { node: id });
        }
        let mut path = vec![id];
        let mut current = id;
        while let Some(parent) = self.nodes[current.0].parent {
            let grandparent = self.nodes[parent.0].parent;
            if parent == current || grandparent == Some(current) || path.len() > self.nodes.len() {
                return Err(TreeError::Cycle { node: id });
            }
            path.push(parent);
            current = parent;
        }
        path.reverse();
        Ok(path)
    }

    /// Finds the first node under `from`, in display order, that satisfies
    /// `pred`. Heaps and classes are expanded along the way; instances and
    /// fields are not, since references can loop.
    pub fn find(&mut self, from: NodeId, pred: impl Fn(&MemoryNode) -> bool) -> Option<NodeId> {
        let mut stack = vec![from];
        while let Some(id) = stack.pop() {
            if pred(self.node(id)) {
                return Some(id);
            }
            if matches!(
                self.node(id),
                MemoryNode::Instance(_) | MemoryNode::Field { .. }
            ) {
                continue;
            }
            let mut children = self.children(id);
            children.reverse();
            stack.extend(children);
        }
        None
    }
}
