use std::collections::HashMap;

/// Parts of the memory profiler state that observers can watch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MemoryProfilerAspect {
    TrackingEnabled,
    HeapDumpStarted,
    HeapDumpFinished,
    CurrentLoadingCapture,
    CurrentLoadedCapture,
    CurrentHeap,
    CurrentClass,
    CurrentInstance,
    ClassFilter,
    LiveAllocationSamplingMode,
}

type Observer = Box<dyn FnMut(MemoryProfilerAspect) + Send>;

/// Change notifications, with a per-aspect count of how often each fired.
#[derive(Default)]
pub struct AspectModel {
    counts: HashMap<MemoryProfilerAspect, usize>,
    observers: Vec<Observer>,
}

impl AspectModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_observer(&mut self, observer: impl FnMut(MemoryProfilerAspect) + Send + 'static) {
        self.observers.push(Box::new(observer));
    }

    pub fn changed(&mut self, aspect: MemoryProfilerAspect) {
        *self.counts.entry(aspect).or_default() += 1;
        for observer in self.observers.iter_mut() {
            observer(aspect);
        }
    }

    pub fn count(&self, aspect: MemoryProfilerAspect) -> usize {
        self.counts.get(&aspect).copied().unwrap_or(0)
    }
}
