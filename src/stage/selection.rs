//! The capture a stage currently shows, and what is selected inside it.
//!
//! Loads run on the selection's own [`CaptureObjectLoader`]. Outcomes come back
//! through the owning thread's joiner into an inbox that [`CaptureSelection::poll`]
//! drains; outcomes of superseded selections are dropped by generation.

use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;

use anyhow::{Context, Result};
use regex::Regex;
use tracing::{debug, info, warn};

use super::aspect::{AspectModel, MemoryProfilerAspect};
use crate::capture::model::APP_HEAP_NAME;
use crate::capture::{CaptureData, ClassSet, HeapSet, InstanceObject, SharedCapture};
use crate::executor::Joiner;
use crate::loader::{CaptureObjectLoader, LoadFuture};
use crate::series::CaptureDurationData;
use crate::tree::{CaptureNodeSource, MemoryNode, MemoryTree, NodeComparator, SortKey};
use crate::units::Range;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadEvent {
    Loaded,
    Failed,
}

struct LoadOutcome {
    generation: u64,
    result: Option<SharedCapture>,
}

pub struct CaptureSelection {
    loader: CaptureObjectLoader,
    generation: u64,
    duration: Option<CaptureDurationData>,
    capture: Option<SharedCapture>,
    future: Option<LoadFuture>,
    loaded: bool,
    tx: Sender<LoadOutcome>,
    rx: Receiver<LoadOutcome>,
    tree: Option<MemoryTree>,
    heap: Option<Arc<HeapSet>>,
    class: Option<Arc<ClassSet>>,
    instance: Option<Arc<InstanceObject>>,
    class_filter: Option<Regex>,
}

impl CaptureSelection {
    pub fn new() -> Self {
        let (tx, rx) = channel();
        Self {
            loader: CaptureObjectLoader::new(),
            generation: 0,
            duration: None,
            capture: None,
            future: None,
            loaded: false,
            tx,
            rx,
            tree: None,
            heap: None,
            class: None,
            instance: None,
            class_filter: None,
        }
    }

    pub fn start(&mut self) {
        self.loader.start();
    }

    /// Releases the current capture and stops the loader.
    pub fn stop(&mut self, aspects: &mut AspectModel) {
        self.clear(aspects);
        self.loader.stop();
    }

    pub fn duration(&self) -> Option<&CaptureDurationData> {
        self.duration.as_ref()
    }

    pub fn capture(&self) -> Option<&SharedCapture> {
        self.capture.as_ref()
    }

    /// Whether the selected capture finished loading successfully.
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn is_loading(&self) -> bool {
        self.capture.is_some() && !self.loaded
    }

    pub fn data(&self) -> Option<Arc<CaptureData>> {
        if self.loaded {
            self.capture.as_ref().and_then(|c| c.data())
        } else {
            None
        }
    }

    pub fn tree(&self) -> Option<&MemoryTree> {
        self.tree.as_ref()
    }

    pub fn tree_mut(&mut self) -> Option<&mut MemoryTree> {
        self.tree.as_mut()
    }

    pub fn heap(&self) -> Option<&Arc<HeapSet>> {
        self.heap.as_ref()
    }

    pub fn class(&self) -> Option<&Arc<ClassSet>> {
        self.class.as_ref()
    }

    pub fn instance(&self) -> Option<&Arc<InstanceObject>> {
        self.instance.as_ref()
    }

    /// Selects `duration` and starts loading its capture over `range`.
    /// Returns `false` if it is already the selection.
    pub fn select_capture(
        &mut self,
        duration: Option<CaptureDurationData>,
        range: Range,
        joiner: Arc<dyn Joiner>,
        aspects: &mut AspectModel,
    ) -> bool {
        if self.duration == duration {
            return false;
        }
        self.release();
        self.generation += 1;

        if let Some(selected) = &duration {
            let capture = selected.entry.capture_object();
            info!("Selecting capture {}", capture.name());
            let future = self
                .loader
                .load_capture(capture.clone(), range, joiner.clone());
            let tx = self.tx.clone();
            let generation = self.generation;
            future.then_on(joiner, move |result| {
                // The selection may be gone by the time the load finishes.
                let _ = tx.send(LoadOutcome { generation, result });
            });
            self.capture = Some(capture);
            self.future = Some(future);
        }
        self.duration = duration;
        aspects.changed(MemoryProfilerAspect::CurrentLoadingCapture);
        true
    }

    /// Drops the selection. Returns `false` if nothing was selected.
    pub fn clear(&mut self, aspects: &mut AspectModel) -> bool {
        if self.duration.is_none() && self.capture.is_none() {
            return false;
        }
        self.release();
        self.generation += 1;
        self.duration = None;
        aspects.changed(MemoryProfilerAspect::CurrentLoadingCapture);
        aspects.changed(MemoryProfilerAspect::CurrentLoadedCapture);
        true
    }

    /// Tree first, then the capture it was built from.
    fn release(&mut self) {
        self.tree = None;
        self.heap = None;
        self.class = None;
        self.instance = None;
        self.loaded = false;
        self.future = None;
        if let Some(capture) = self.capture.take() {
            capture.dispose();
        }
    }

    /// Blocks until the current load settles. Its outcome is queued on the
    /// joiner passed to [`CaptureSelection::select_capture`].
    pub fn wait_for_load(&self) {
        if let Some(future) = &self.future {
            future.wait();
        }
    }

    /// Applies load outcomes that arrived since the last call.
    pub fn poll(&mut self, aspects: &mut AspectModel) -> Option<LoadEvent> {
        let mut event = None;
        while let Ok(outcome) = self.rx.try_recv() {
            if outcome.generation != self.generation {
                debug!("Dropping stale load outcome {}", outcome.generation);
                continue;
            }
            self.future = None;
            match outcome.result {
                Some(capture) => {
                    self.loaded = true;
                    self.capture = Some(capture);
                    aspects.changed(MemoryProfilerAspect::CurrentLoadedCapture);
                    let heap = self.default_heap();
                    self.set_heap(heap, aspects);
                    event = Some(LoadEvent::Loaded);
                }
                None => {
                    warn!("Selected capture failed to load");
                    self.clear(aspects);
                    event = Some(LoadEvent::Failed);
                }
            }
        }
        event
    }

    /// The `app` heap if present, otherwise the first heap with classes.
    fn default_heap(&self) -> Option<Arc<HeapSet>> {
        let data = self.data()?;
        data.heap(APP_HEAP_NAME)
            .or_else(|| data.heaps.iter().find(|h| !h.is_empty()).cloned())
    }

    /// Selects the heap named `name` in the loaded capture.
    pub fn select_heap(&mut self, name: &str, aspects: &mut AspectModel) -> bool {
        let Some(heap) = self.data().and_then(|d| d.heap(name)) else {
            warn!("No heap named {} in the selected capture", name);
            return false;
        };
        if self.heap.as_ref().is_some_and(|h| Arc::ptr_eq(h, &heap)) {
            return false;
        }
        self.set_heap(Some(heap), aspects);
        true
    }

    fn set_heap(&mut self, heap: Option<Arc<HeapSet>>, aspects: &mut AspectModel) {
        self.heap = heap;
        self.class = None;
        self.instance = None;
        self.rebuild_tree();
        aspects.changed(MemoryProfilerAspect::CurrentHeap);
    }

    fn rebuild_tree(&mut self) {
        self.tree = match (self.data(), &self.heap) {
            (Some(data), Some(heap)) => {
                let source = CaptureNodeSource::new(data).with_class_filter(self.class_filter.clone());
                let mut tree = MemoryTree::new(MemoryNode::Heap(heap.clone()), source);
                tree.sort(NodeComparator::new(SortKey::RetainedSize, true));
                Some(tree)
            }
            _ => None,
        };
    }

    pub fn select_class(&mut self, class: Option<Arc<ClassSet>>, aspects: &mut AspectModel) -> bool {
        if self.class == class {
            return false;
        }
        self.class = class;
        self.instance = None;
        aspects.changed(MemoryProfilerAspect::CurrentClass);
        true
    }

    pub fn select_instance(
        &mut self,
        instance: Option<Arc<InstanceObject>>,
        aspects: &mut AspectModel,
    ) -> bool {
        if self.instance == instance {
            return false;
        }
        self.instance = instance;
        aspects.changed(MemoryProfilerAspect::CurrentInstance);
        true
    }

    /// Restricts the tree to classes whose name matches `pattern`; `None`
    /// removes the filter. A selected class that no longer matches is
    /// deselected.
    pub fn set_class_filter(&mut self, pattern: Option<&str>, aspects: &mut AspectModel) -> Result<()> {
        let filter = pattern
            .map(|p| Regex::new(p).with_context(|| format!("invalid class filter '{p}'")))
            .transpose()?;
        self.class_filter = filter;
        let hidden = match (&self.class_filter, &self.class) {
            (Some(re), Some(class)) => !re.is_match(&class.class_name),
            _ => false,
        };
        if hidden {
            self.select_class(None, aspects);
        }
        self.rebuild_tree();
        aspects.changed(MemoryProfilerAspect::ClassFilter);
        Ok(())
    }
}

impl Default for CaptureSelection {
    fn default() -> Self {
        Self::new()
    }
}
