//! Loaded object graph of a capture: heaps → classes → instances → fields.
//!
//! Payloads arrive as pre-parsed summary records ([`HeapSnapshot`] and the
//! per-kind record lists); [`CaptureDataBuilder`] groups them into the
//! heap/class hierarchy the tree walks.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

/// Heap that holds the app's own objects. Selected by default when present.
pub const APP_HEAP_NAME: &str = "app";
pub const DEFAULT_HEAP_NAME: &str = "default";
pub const NATIVE_HEAP_NAME: &str = "native";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    /// Reference to another instance by id.
    Object(u64),
}

impl FieldValue {
    pub fn referenced_instance(&self) -> Option<u64> {
        match self {
            FieldValue::Object(id) => Some(*id),
            _ => None,
        }
    }

    pub fn display(&self) -> String {
        match self {
            FieldValue::Null => "null".to_string(),
            FieldValue::Bool(b) => b.to_string(),
            FieldValue::Int(i) => i.to_string(),
            FieldValue::Float(f) => f.to_string(),
            FieldValue::Str(s) => format!("\"{s}\""),
            FieldValue::Object(id) => format!("@{id:#x}"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FieldRecord {
    pub name: String,
    pub value: FieldValue,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeapRecord {
    pub id: i32,
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassRecord {
    pub id: u64,
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InstanceRecord {
    pub id: u64,
    pub class_id: u64,
    pub heap_id: i32,
    #[serde(default)]
    pub shallow_size: i64,
    #[serde(default)]
    pub retained_size: i64,
    #[serde(default)]
    pub native_size: i64,
    #[serde(default)]
    pub array_length: Option<u32>,
    #[serde(default)]
    pub depth: Option<u32>,
    #[serde(default)]
    pub fields: Vec<FieldRecord>,
}

/// Summary of a heap dump as produced by the snapshot parser.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeapSnapshot {
    pub heaps: Vec<HeapRecord>,
    pub classes: Vec<ClassRecord>,
    pub instances: Vec<InstanceRecord>,
}

impl HeapSnapshot {
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct FieldObject {
    pub name: String,
    pub value: FieldValue,
}

#[derive(Clone, Debug, PartialEq)]
pub struct InstanceObject {
    pub id: u64,
    pub class_name: String,
    pub heap_name: String,
    pub shallow_size: i64,
    pub retained_size: i64,
    pub native_size: i64,
    pub array_length: Option<u32>,
    pub depth: Option<u32>,
    pub alloc_time_ns: Option<i64>,
    pub dealloc_time_ns: Option<i64>,
    pub fields: Vec<FieldObject>,
}

impl InstanceObject {
    pub fn new(id: u64, class_name: impl Into<String>, shallow_size: i64) -> Self {
        Self {
            id,
            class_name: class_name.into(),
            heap_name: DEFAULT_HEAP_NAME.to_string(),
            shallow_size,
            retained_size: shallow_size,
            native_size: 0,
            array_length: None,
            depth: None,
            alloc_time_ns: None,
            dealloc_time_ns: None,
            fields: Vec::new(),
        }
    }

    pub fn label(&self) -> String {
        format!("{}@{:#x}", simple_class_name(&self.class_name), self.id)
    }
}

/// `java.util.HashMap$Node` → `HashMap$Node`.
pub fn simple_class_name(name: &str) -> &str {
    name.rsplit('.').next().unwrap_or(name)
}

#[derive(Clone, Debug, PartialEq)]
pub struct ClassSet {
    pub class_name: String,
    pub instances: Vec<Arc<InstanceObject>>,
}

impl ClassSet {
    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    pub fn total_shallow_size(&self) -> i64 {
        self.instances.iter().map(|i| i.shallow_size).sum()
    }

    pub fn total_retained_size(&self) -> i64 {
        self.instances.iter().map(|i| i.retained_size).sum()
    }

    pub fn total_native_size(&self) -> i64 {
        self.instances.iter().map(|i| i.native_size).sum()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct HeapSet {
    pub id: i32,
    pub name: String,
    pub classes: Vec<Arc<ClassSet>>,
}

impl HeapSet {
    pub fn instance_count(&self) -> usize {
        self.classes.iter().map(|c| c.instance_count()).sum()
    }

    pub fn total_shallow_size(&self) -> i64 {
        self.classes.iter().map(|c| c.total_shallow_size()).sum()
    }

    pub fn total_retained_size(&self) -> i64 {
        self.classes.iter().map(|c| c.total_retained_size()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

/// Fully loaded contents of a capture.
#[derive(Debug, Default)]
pub struct CaptureData {
    pub heaps: Vec<Arc<HeapSet>>,
    instances: HashMap<u64, Arc<InstanceObject>>,
}

impl CaptureData {
    pub fn instance(&self, id: u64) -> Option<Arc<InstanceObject>> {
        self.instances.get(&id).cloned()
    }

    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    pub fn heap(&self, name: &str) -> Option<Arc<HeapSet>> {
        self.heaps.iter().find(|h| h.name == name).cloned()
    }

    /// Groups the records of a heap snapshot. Instances that name an unknown
    /// class or heap make the snapshot invalid.
    pub fn from_snapshot(snapshot: HeapSnapshot) -> Result<Self> {
        let classes: HashMap<u64, &str> = snapshot
            .classes
            .iter()
            .map(|c| (c.id, c.name.as_str()))
            .collect();
        let heaps: HashMap<i32, &str> = snapshot
            .heaps
            .iter()
            .map(|h| (h.id, h.name.as_str()))
            .collect();

        let mut builder = CaptureDataBuilder::new();
        for heap in &snapshot.heaps {
            builder.declare_heap(heap.id, &heap.name);
        }
        for record in &snapshot.instances {
            let Some(class_name) = classes.get(&record.class_id) else {
                bail!(
                    "instance {:#x} references unknown class {}",
                    record.id,
                    record.class_id
                );
            };
            let Some(heap_name) = heaps.get(&record.heap_id) else {
                bail!(
                    "instance {:#x} references unknown heap {}",
                    record.id,
                    record.heap_id
                );
            };
            builder.add_instance(
                record.heap_id,
                InstanceObject {
                    id: record.id,
                    class_name: class_name.to_string(),
                    heap_name: heap_name.to_string(),
                    shallow_size: record.shallow_size,
                    retained_size: record.retained_size,
                    native_size: record.native_size,
                    array_length: record.array_length,
                    depth: record.depth,
                    alloc_time_ns: None,
                    dealloc_time_ns: None,
                    fields: record
                        .fields
                        .iter()
                        .map(|f| FieldObject {
                            name: f.name.clone(),
                            value: f.value.clone(),
                        })
                        .collect(),
                },
            );
        }
        Ok(builder.build())
    }
}

#[derive(Default)]
pub struct CaptureDataBuilder {
    heaps: BTreeMap<i32, (String, BTreeMap<String, Vec<InstanceObject>>)>,
}

impl CaptureDataBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes an empty heap show up even if no instance lands in it.
    pub fn declare_heap(&mut self, heap_id: i32, name: &str) {
        self.heaps
            .entry(heap_id)
            .or_insert_with(|| (name.to_string(), BTreeMap::new()));
    }

    pub fn add_instance(&mut self, heap_id: i32, instance: InstanceObject) {
        let heap_name = instance.heap_name.clone();
        self.heaps
            .entry(heap_id)
            .or_insert_with(|| (heap_name, BTreeMap::new()))
            .1
            .entry(instance.class_name.clone())
            .or_default()
            .push(instance);
    }

    pub fn build(self) -> CaptureData {
        let mut instances = HashMap::new();
        let heaps = self
            .heaps
            .into_iter()
            .map(|(id, (name, classes))| {
                let classes = classes
                    .into_iter()
                    .map(|(class_name, objects)| {
                        let objects: Vec<Arc<InstanceObject>> =
                            objects.into_iter().map(Arc::new).collect();
                        for object in &objects {
                            instances.insert(object.id, object.clone());
                        }
                        Arc::new(ClassSet {
                            class_name,
                            instances: objects,
                        })
                    })
                    .collect();
                Arc::new(HeapSet { id, name, classes })
            })
            .collect();
        CaptureData { heaps, instances }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> HeapSnapshot {
        HeapSnapshot {
            heaps: vec![
                HeapRecord {
                    id: 0,
                    name: "zygote".to_string(),
                },
                HeapRecord {
                    id: 1,
                    name: APP_HEAP_NAME.to_string(),
                },
            ],
            classes: vec![
                ClassRecord {
                    id: 100,
                    name: "com.example.Foo".to_string(),
                },
                ClassRecord {
                    id: 101,
                    name: "java.lang.String".to_string(),
                },
            ],
            instances: vec![
                InstanceRecord {
                    id: 1,
                    class_id: 100,
                    heap_id: 1,
                    shallow_size: 16,
                    retained_size: 48,
                    native_size: 0,
                    array_length: None,
                    depth: Some(1),
                    fields: vec![FieldRecord {
                        name: "name".to_string(),
                        value: FieldValue::Object(2),
                    }],
                },
                InstanceRecord {
                    id: 2,
                    class_id: 101,
                    heap_id: 1,
                    shallow_size: 32,
                    retained_size: 32,
                    native_size: 0,
                    array_length: None,
                    depth: Some(2),
                    fields: Vec::new(),
                },
            ],
        }
    }

    #[test]
    fn test_from_snapshot_groups_by_heap_and_class() {
        let data = CaptureData::from_snapshot(snapshot()).unwrap();
        assert_eq!(data.heaps.len(), 2);
        assert!(data.heap("zygote").unwrap().is_empty());
        let app = data.heap(APP_HEAP_NAME).unwrap();
        assert_eq!(app.classes.len(), 2);
        assert_eq!(app.instance_count(), 2);
        assert_eq!(app.total_shallow_size(), 48);
        assert_eq!(data.instance(2).unwrap().class_name, "java.lang.String");
    }

    #[test]
    fn test_unknown_class_is_rejected() {
        let mut snapshot = snapshot();
        snapshot.instances[0].class_id = 999;
        assert!(CaptureData::from_snapshot(snapshot).is_err());
    }

    #[test]
    fn test_snapshot_json() {
        let json = r#"{"heaps":[{"id":1,"name":"app"}],
                       "classes":[{"id":7,"name":"a.B"}],
                       "instances":[{"id":3,"class_id":7,"heap_id":1,"shallow_size":8,
                                     "fields":[{"name":"next","value":{"object":4}}]}]}"#;
        let snapshot = HeapSnapshot::parse(json.as_bytes()).unwrap();
        assert_eq!(snapshot.instances[0].fields[0].value, FieldValue::Object(4));
        assert_eq!(simple_class_name("a.B"), "B");
    }
}
