//! Single-slot asynchronous capture loading.
//!
//! [`CaptureObjectLoader`] owns one worker thread. Each call to
//! [`CaptureObjectLoader::load_capture`] cancels whatever load is still
//! outstanding, so at most one capture is ever being materialized per loader.
//! Results come back as a [`LoadFuture`]; continuations attached with
//! [`LoadFuture::then_on`] run on the caller's joiner, never on the worker.

use std::sync::{Arc, Condvar, Mutex};

use tracing::debug;

use crate::capture::SharedCapture;
use crate::executor::{CancelToken, DispatchPool, Joiner};
use crate::units::Range;

type Continuation = Box<dyn FnOnce(Option<SharedCapture>) + Send + 'static>;

enum FutureStatus {
    Pending(Vec<(Arc<dyn Joiner>, Continuation)>),
    Done(Option<SharedCapture>),
    Cancelled,
}

struct FutureState {
    status: Mutex<FutureStatus>,
    done: Condvar,
}

/// Outcome of one `load_capture` call.
///
/// Resolves to `Some(capture)` when the capture loaded, `None` when loading
/// failed. A cancelled future also reads as `None` from [`LoadFuture::wait`],
/// but never runs its continuations.
#[derive(Clone)]
pub struct LoadFuture {
    state: Arc<FutureState>,
}

impl LoadFuture {
    fn new() -> Self {
        Self {
            state: Arc::new(FutureState {
                status: Mutex::new(FutureStatus::Pending(Vec::new())),
                done: Condvar::new(),
            }),
        }
    }

    /// Hands every continuation to its joiner before waiters wake, so a
    /// returned [`LoadFuture::wait`] implies the continuations are queued.
    fn complete(&self, result: Option<SharedCapture>) {
        loop {
            let batch = {
                let mut status = self.state.status.lock().unwrap();
                match &mut *status {
                    FutureStatus::Pending(continuations) if !continuations.is_empty() => {
                        std::mem::take(continuations)
                    }
                    FutureStatus::Pending(_) => {
                        *status = FutureStatus::Done(result.clone());
                        break;
                    }
                    _ => return,
                }
            };
            for (joiner, f) in batch {
                let result = result.clone();
                joiner.execute(Box::new(move || f(result)));
            }
        }
        self.state.done.notify_all();
    }

    /// Marks the future cancelled and drops its continuations. No-op once
    /// the future has completed.
    fn cancel(&self) {
        let mut status = self.state.status.lock().unwrap();
        if matches!(*status, FutureStatus::Pending(_)) {
            *status = FutureStatus::Cancelled;
            drop(status);
            self.state.done.notify_all();
        }
    }

    /// Runs `f` with the result on `joiner` once the load completes.
    pub fn then_on(
        &self,
        joiner: Arc<dyn Joiner>,
        f: impl FnOnce(Option<SharedCapture>) + Send + 'static,
    ) {
        let mut status = self.state.status.lock().unwrap();
        match &mut *status {
            FutureStatus::Pending(continuations) => continuations.push((joiner, Box::new(f))),
            FutureStatus::Done(result) => {
                let result = result.clone();
                drop(status);
                joiner.execute(Box::new(move || f(result)));
            }
            FutureStatus::Cancelled => {}
        }
    }

    /// Blocks until the future completes or is cancelled.
    pub fn wait(&self) -> Option<SharedCapture> {
        let mut status = self.state.status.lock().unwrap();
        loop {
            match &*status {
                FutureStatus::Pending(_) => {
                    status = self.state.done.wait(status).unwrap();
                }
                FutureStatus::Done(result) => return result.clone(),
                FutureStatus::Cancelled => return None,
            }
        }
    }

    /// `None` while pending, otherwise the result.
    pub fn try_result(&self) -> Option<Option<SharedCapture>> {
        match &*self.state.status.lock().unwrap() {
            FutureStatus::Pending(_) => None,
            FutureStatus::Done(result) => Some(result.clone()),
            FutureStatus::Cancelled => Some(None),
        }
    }

    pub fn is_done(&self) -> bool {
        !matches!(
            *self.state.status.lock().unwrap(),
            FutureStatus::Pending(_)
        )
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(*self.state.status.lock().unwrap(), FutureStatus::Cancelled)
    }
}

struct Outstanding {
    id: u64,
    cancel: CancelToken,
    future: LoadFuture,
}

impl Outstanding {
    fn abort(self) {
        debug!("Cancelling capture load {}", self.id);
        self.cancel.cancel();
        self.future.cancel();
    }
}

pub struct CaptureObjectLoader {
    pool: Option<DispatchPool>,
    outstanding: Arc<Mutex<Option<Outstanding>>>,
    next_id: u64,
}

impl CaptureObjectLoader {
    pub fn new() -> Self {
        Self {
            pool: None,
            outstanding: Arc::new(Mutex::new(None)),
            next_id: 0,
        }
    }

    pub fn start(&mut self) {
        if self.pool.is_none() {
            self.pool = Some(DispatchPool::new(1));
        }
    }

    /// Cancels outstanding work and tears the worker down. Loads are invalid
    /// until the next [`CaptureObjectLoader::start`].
    pub fn stop(&mut self) {
        if let Some(outstanding) = self.outstanding.lock().unwrap().take() {
            outstanding.abort();
        }
        if let Some(pool) = self.pool.take() {
            pool.join();
        }
    }

    pub fn is_started(&self) -> bool {
        self.pool.is_some()
    }

    /// Whether a load is still running.
    pub fn has_outstanding(&self) -> bool {
        self.outstanding.lock().unwrap().is_some()
    }

    /// Loads `capture` over `range` on the worker, cancelling the previous load.
    ///
    /// # Panics
    ///
    /// Panics if the loader has not been started.
    pub fn load_capture(
        &mut self,
        capture: SharedCapture,
        range: Range,
        joiner: Arc<dyn Joiner>,
    ) -> LoadFuture {
        assert!(
            self.pool.is_some(),
            "CaptureObjectLoader::load_capture called before start()"
        );

        self.next_id += 1;
        let id = self.next_id;
        let cancel = CancelToken::new();
        let future = LoadFuture::new();

        {
            let mut slot = self.outstanding.lock().unwrap();
            if let Some(previous) = slot.take() {
                previous.abort();
            }
            *slot = Some(Outstanding {
                id,
                cancel: cancel.clone(),
                future: future.clone(),
            });
        }

        debug!("Queueing load {} of capture {}", id, capture.name());
        let outstanding = self.outstanding.clone();
        let task_future = future.clone();
        if let Some(pool) = &self.pool {
            pool.submit(move || {
                let result = if cancel.is_cancelled() {
                    None
                } else if capture.load(range, &joiner, &cancel) {
                    Some(capture)
                } else {
                    None
                };
                {
                    let mut slot = outstanding.lock().unwrap();
                    if slot.as_ref().is_some_and(|o| o.id == id) {
                        *slot = None;
                    }
                }
                if !cancel.is_cancelled() {
                    task_future.complete(result);
                }
            });
        }
        future
    }
}

impl Default for CaptureObjectLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for CaptureObjectLoader {
    fn drop(&mut self) {
        self.stop();
    }
}
