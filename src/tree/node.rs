//! Tree node kinds and the attributes each one can report.

use std::fmt;
use std::sync::Arc;

use crate::capture::model::simple_class_name;
use crate::capture::{ClassSet, FieldValue, HeapSet, InstanceObject};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Capability {
    Label,
    ChildrenCount,
    ElementSize,
    ShallowSize,
    RetainedSize,
}

impl Capability {
    fn bit(self) -> u8 {
        match self {
            Capability::Label => 1 << 0,
            Capability::ChildrenCount => 1 << 1,
            Capability::ElementSize => 1 << 2,
            Capability::ShallowSize => 1 << 3,
            Capability::RetainedSize => 1 << 4,
        }
    }
}

/// Which attributes a node supports.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct CapabilitySet(u8);

impl CapabilitySet {
    pub const EMPTY: CapabilitySet = CapabilitySet(0);

    pub fn of(capabilities: &[Capability]) -> Self {
        capabilities
            .iter()
            .fold(Self::EMPTY, |set, c| set.with(*c))
    }

    pub fn with(self, capability: Capability) -> Self {
        CapabilitySet(self.0 | capability.bit())
    }

    pub fn contains(&self, capability: Capability) -> bool {
        self.0 & capability.bit() != 0
    }
}

impl fmt::Debug for CapabilitySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let all = [
            Capability::Label,
            Capability::ChildrenCount,
            Capability::ElementSize,
            Capability::ShallowSize,
            Capability::RetainedSize,
        ];
        f.debug_set()
            .entries(all.iter().filter(|c| self.contains(**c)))
            .finish()
    }
}

/// One node of the object graph: root, heap, class, instance or field.
#[derive(Clone, Debug, PartialEq)]
pub enum MemoryNode {
    Root {
        name: String,
    },
    Heap(Arc<HeapSet>),
    Class(Arc<ClassSet>),
    Instance(Arc<InstanceObject>),
    Field {
        name: String,
        value: FieldValue,
        /// The instance the field points to, if it is a resolvable reference.
        target: Option<Arc<InstanceObject>>,
    },
}

impl MemoryNode {
    pub fn capabilities(&self) -> CapabilitySet {
        use Capability::*;
        match self {
            MemoryNode::Root { .. } => CapabilitySet::of(&[Label, ChildrenCount]),
            MemoryNode::Heap(_) => {
                CapabilitySet::of(&[Label, ChildrenCount, ShallowSize, RetainedSize])
            }
            MemoryNode::Class(_) => CapabilitySet::of(&[
                Label,
                ChildrenCount,
                ElementSize,
                ShallowSize,
                RetainedSize,
            ]),
            MemoryNode::Instance(instance) => {
                let set = CapabilitySet::of(&[Label, ChildrenCount, ShallowSize, RetainedSize]);
                if instance.array_length.is_some() {
                    set.with(ElementSize)
                } else {
                    set
                }
            }
            MemoryNode::Field { target: Some(_), .. } => {
                CapabilitySet::of(&[Label, ChildrenCount, ShallowSize, RetainedSize])
            }
            MemoryNode::Field { target: None, .. } => CapabilitySet::of(&[Label]),
        }
    }

    pub fn supports(&self, capability: Capability) -> bool {
        self.capabilities().contains(capability)
    }

    pub fn label(&self) -> String {
        match self {
            MemoryNode::Root { name } => name.clone(),
            MemoryNode::Heap(heap) => heap.name.clone(),
            MemoryNode::Class(class) => simple_class_name(&class.class_name).to_string(),
            MemoryNode::Instance(instance) => instance.label(),
            MemoryNode::Field {
                name,
                value,
                target,
            } => match target {
                Some(instance) => format!("{name} = {}", instance.label()),
                None => format!("{name} = {}", value.display()),
            },
        }
    }

    /// Instance count for classes, array length for array instances.
    pub fn element_size(&self) -> Option<i64> {
        match self {
            MemoryNode::Class(class) => Some(class.instance_count() as i64),
            MemoryNode::Instance(instance) => instance.array_length.map(i64::from),
            _ => None,
        }
    }

    pub fn shallow_size(&self) -> Option<i64> {
        match self {
            MemoryNode::Heap(heap) => Some(heap.total_shallow_size()),
            MemoryNode::Class(class) => Some(class.total_shallow_size()),
            MemoryNode::Instance(instance) => Some(instance.shallow_size),
            MemoryNode::Field {
                target: Some(instance),
                ..
            } => Some(instance.shallow_size),
            _ => None,
        }
    }

    pub fn retained_size(&self) -> Option<i64> {
        match self {
            MemoryNode::Heap(heap) => Some(heap.total_retained_size()),
            MemoryNode::Class(class) => Some(class.total_retained_size()),
            MemoryNode::Instance(instance) => Some(instance.retained_size),
            MemoryNode::Field {
                target: Some(instance),
                ..
            } => Some(instance.retained_size),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capabilities_by_kind() {
        let root = MemoryNode::Root {
            name: "root".to_string(),
        };
        assert!(root.supports(Capability::ChildrenCount));
        assert!(!root.supports(Capability::ShallowSize));
        assert_eq!(root.shallow_size(), None);

        let mut array = InstanceObject::new(1, "int[]", 40);
        array.array_length = Some(8);
        let node = MemoryNode::Instance(Arc::new(array));
        assert!(node.supports(Capability::ElementSize));
        assert_eq!(node.element_size(), Some(8));

        let plain = MemoryNode::Instance(Arc::new(InstanceObject::new(2, "a.Foo", 16)));
        assert!(!plain.supports(Capability::ElementSize));
        assert_eq!(plain.label(), "Foo@0x2");

        let field = MemoryNode::Field {
            name: "count".to_string(),
            value: FieldValue::Int(3),
            target: None,
        };
        assert_eq!(field.label(), "count = 3");
        assert!(!field.supports(Capability::ChildrenCount));
    }
}
