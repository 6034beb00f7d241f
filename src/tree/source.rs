//! Where a node's children come from.

use std::sync::Arc;

use regex::Regex;

use super::node::MemoryNode;
use crate::capture::{CaptureData, InstanceObject};

/// Computes the children of a node on demand.
pub trait NodeSource: Send {
    fn children(&self, node: &MemoryNode) -> Vec<MemoryNode>;

    /// Number of children without building them. Defaults to building them.
    fn child_count(&self, node: &MemoryNode) -> usize {
        self.children(node).len()
    }
}

/// Children drawn from a loaded capture: heaps hold classes, classes hold
/// instances, instances hold fields, and reference fields hold the referenced
/// instance's fields.
pub struct CaptureNodeSource {
    data: Arc<CaptureData>,
    class_filter: Option<Regex>,
}

impl CaptureNodeSource {
    pub fn new(data: Arc<CaptureData>) -> Self {
        Self {
            data,
            class_filter: None,
        }
    }

    /// Only classes whose fully qualified name matches `filter` appear under a
    /// heap.
    pub fn with_class_filter(mut self, filter: Option<Regex>) -> Self {
        self.class_filter = filter;
        self
    }

    fn class_matches(&self, name: &str) -> bool {
        self.class_filter.as_ref().map_or(true, |re| re.is_match(name))
    }

    fn fields_of(&self, instance: &InstanceObject) -> Vec<MemoryNode> {
        instance
            .fields
            .iter()
            .map(|field| MemoryNode::Field {
                name: field.name.clone(),
                value: field.value.clone(),
                target: field
                    .value
                    .referenced_instance()
                    .and_then(|id| self.data.instance(id)),
            })
            .collect()
    }
}

impl NodeSource for CaptureNodeSource {
    fn children(&self, node: &MemoryNode) -> Vec<MemoryNode> {
        match node {
            MemoryNode::Root { .. } => self
                .data
                .heaps
                .iter()
                .cloned()
                .map(MemoryNode::Heap)
                .collect(),
            MemoryNode::Heap(heap) => heap
                .classes
                .iter()
                .filter(|c| self.class_matches(&c.class_name))
                .cloned()
                .map(MemoryNode::Class)
                .collect(),
            MemoryNode::Class(class) => class
                .instances
                .iter()
                .cloned()
                .map(MemoryNode::Instance)
                .collect(),
            MemoryNode::Instance(instance) => self.fields_of(instance),
            MemoryNode::Field {
                target: Some(instance),
                ..
            } => self.fields_of(instance),
            MemoryNode::Field { target: None, .. } => Vec::new(),
        }
    }

    fn child_count(&self, node: &MemoryNode) -> usize {
        match node {
            MemoryNode::Root { .. } => self.data.heaps.len(),
            MemoryNode::Heap(heap) => heap
                .classes
                .iter()
                .filter(|c| self.class_matches(&c.class_name))
                .count(),
            MemoryNode::Class(class) => class.instances.len(),
            MemoryNode::Instance(instance) => instance.fields.len(),
            MemoryNode::Field {
                target: Some(instance),
                ..
            } => instance.fields.len(),
            MemoryNode::Field { target: None, .. } => 0,
        }
    }
}
