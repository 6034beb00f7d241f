//! Execution contexts: the owning-thread queue, worker dispatch, cancellation.

use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use workerpool::thunk::{Thunk, ThunkWorker};
use workerpool::Pool;

pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Marshals callbacks onto a single owning thread for later execution.
///
/// Implementations decide when the task runs; callers only rely on tasks from
/// one joiner never running concurrently with each other.
pub trait Joiner: Send + Sync {
    fn execute(&self, task: Task);
}

/// Runs tasks immediately on the calling thread.
#[derive(Clone, Copy, Debug, Default)]
pub struct DirectJoiner;

impl Joiner for DirectJoiner {
    fn execute(&self, task: Task) {
        task();
    }
}

/// FIFO of tasks drained by the owning thread.
pub struct MainThreadQueue {
    tx: Sender<Task>,
    rx: Receiver<Task>,
}

/// Submission side of a [`MainThreadQueue`].
#[derive(Clone)]
pub struct MainThreadJoiner {
    tx: Sender<Task>,
}

impl Joiner for MainThreadJoiner {
    fn execute(&self, task: Task) {
        // The queue only disappears with its owner; late tasks are dropped.
        let _ = self.tx.send(task);
    }
}

impl MainThreadQueue {
    pub fn new() -> Self {
        let (tx, rx) = channel();
        Self { tx, rx }
    }

    pub fn joiner(&self) -> MainThreadJoiner {
        MainThreadJoiner {
            tx: self.tx.clone(),
        }
    }

    /// Runs everything queued so far, including tasks queued by the tasks
    /// themselves. Returns the number of tasks run.
    pub fn drain(&self) -> usize {
        let mut ran = 0;
        while let Ok(task) = self.rx.try_recv() {
            task();
            ran += 1;
        }
        ran
    }
}

impl Default for MainThreadQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Background threads for blocking agent calls.
pub struct DispatchPool {
    pool: Pool<ThunkWorker<()>>,
}

impl DispatchPool {
    pub fn new(threads: usize) -> Self {
        Self {
            pool: Pool::<ThunkWorker<()>>::new(threads.max(1)),
        }
    }

    pub fn submit(&self, f: impl FnOnce() + Send + 'static) {
        self.pool.execute(Thunk::of(f));
    }

    /// Blocks until every submitted task has finished.
    pub fn join(&self) {
        self.pool.join();
    }
}

struct CancelState {
    cancelled: Mutex<bool>,
    wake: Condvar,
}

/// Cooperative cancellation flag shared between a task and its owner.
///
/// Sleeping through [`CancelToken::sleep`] wakes up as soon as the token is
/// cancelled, which is how long polls stay interruptible.
#[derive(Clone)]
pub struct CancelToken {
    state: Arc<CancelState>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self {
            state: Arc::new(CancelState {
                cancelled: Mutex::new(false),
                wake: Condvar::new(),
            }),
        }
    }

    pub fn cancel(&self) {
        *self.state.cancelled.lock().unwrap() = true;
        self.state.wake.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        *self.state.cancelled.lock().unwrap()
    }

    /// Sleeps for `duration` unless cancelled first. Returns `false` if the
    /// token was (or became) cancelled.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        let mut cancelled = self.state.cancelled.lock().unwrap();
        while !*cancelled {
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            let (guard, _) = self
                .state
                .wake
                .wait_timeout(cancelled, deadline - now)
                .unwrap();
            cancelled = guard;
        }
        false
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn test_main_thread_queue_runs_in_order() {
        let queue = MainThreadQueue::new();
        let joiner = queue.joiner();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let seen = seen.clone();
            joiner.execute(Box::new(move || seen.lock().unwrap().push(i)));
        }
        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(queue.drain(), 3);
        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_cancel_interrupts_sleep() {
        let token = CancelToken::new();
        let sleeper = token.clone();
        let handle = thread::spawn(move || sleeper.sleep(Duration::from_secs(30)));
        thread::sleep(Duration::from_millis(20));
        token.cancel();
        assert!(!handle.join().unwrap());
        assert!(!token.sleep(Duration::from_millis(1)));
    }

    #[test]
    fn test_sleep_completes() {
        let token = CancelToken::new();
        assert!(token.sleep(Duration::from_millis(1)));
    }

    #[test]
    fn test_dispatch_pool_join() {
        let pool = DispatchPool::new(2);
        let count = Arc::new(AtomicUsize::new(0));
        for _ in 0..8 {
            let count = count.clone();
            pool.submit(move || {
                count.fetch_add(1, Ordering::SeqCst);
            });
        }
        pool.join();
        assert_eq!(count.load(Ordering::SeqCst), 8);
    }
}
