//! Task Pool
//!
//! Worker-thread pool backing all asynchronous engine work: culling,
//! animation blending, async resource loads, command generation. Two
//! priority classes exist, each with its own queue and worker set, so
//! latency-sensitive per-frame work never queues behind bulk loads.
//!
//! # Task model
//!
//! A [`Task`] is a closure plus completion bookkeeping. Tasks may declare a
//! parent at creation time; a parent counts as finished only once its own
//! work *and* every child have finished. Cancellation is cooperative: the
//! flag is set by the owner and observed by the closure at its own
//! suspension points.
//!
//! # Waiting
//!
//! [`TaskPool::wait`] never parks the calling thread outright: while the
//! awaited task is unfinished the caller pops and runs queued jobs itself.
//! This makes nested waits from worker threads deadlock-free and lets the
//! resource cache busy-wait productively.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use log::warn;
use parking_lot::{Condvar, Mutex};

use crate::core::guid::Guid;

/// Scheduling class for a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskPriority {
    /// Per-frame work: culling, animation, command generation.
    High,
    /// Bulk work: resource loads, cache writes.
    Low,
}

/// Boxed task body, as stored on the queues.
pub type Job = Box<dyn FnOnce(&Task) + Send + 'static>;

/// Shared completion state for one task.
struct TaskState {
    guid: Guid,
    /// Own work (1) plus one per outstanding child.
    unfinished: AtomicU32,
    parent: Option<Arc<TaskState>>,
    cancelled: AtomicBool,
    done_lock: Mutex<bool>,
    done_cv: Condvar,
}

impl TaskState {
    fn new(parent: Option<Arc<TaskState>>) -> Arc<Self> {
        if let Some(p) = &parent {
            p.unfinished.fetch_add(1, Ordering::AcqRel);
        }
        Arc::new(Self {
            guid: Guid::next(),
            unfinished: AtomicU32::new(1),
            parent,
            cancelled: AtomicBool::new(false),
            done_lock: Mutex::new(false),
            done_cv: Condvar::new(),
        })
    }

    /// Drops one unit of unfinished work; propagates to the parent when the
    /// count reaches zero.
    fn complete_one(&self) {
        if self.unfinished.fetch_sub(1, Ordering::AcqRel) == 1 {
            {
                let mut done = self.done_lock.lock();
                *done = true;
            }
            self.done_cv.notify_all();
            if let Some(parent) = &self.parent {
                parent.complete_one();
            }
        }
    }

    fn is_finished(&self) -> bool {
        self.unfinished.load(Ordering::Acquire) == 0
    }

    /// A task counts as cancelled when it or any ancestor was cancelled.
    fn is_cancelled(&self) -> bool {
        if self.cancelled.load(Ordering::Acquire) {
            return true;
        }
        self.parent.as_ref().is_some_and(|p| p.is_cancelled())
    }
}

/// View of a running task handed to its closure.
pub struct Task {
    state: Arc<TaskState>,
}

impl Task {
    /// Process-wide identifier of this task.
    #[must_use]
    pub fn guid(&self) -> Guid {
        self.state.guid
    }

    /// Cooperative cancellation flag (own or any ancestor's). Closures
    /// should check this at their own suspension points and bail early.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.state.is_cancelled()
    }
}

/// Owner-side handle for a created task.
#[derive(Clone)]
pub struct TaskHandle {
    state: Arc<TaskState>,
}

impl TaskHandle {
    #[must_use]
    pub fn guid(&self) -> Guid {
        self.state.guid
    }

    /// True once the task and all of its children have finished.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.state.is_finished()
    }

    /// Requests cooperative cancellation of the task and all children.
    pub fn cancel(&self) {
        self.state.cancelled.store(true, Ordering::Release);
    }
}

struct PriorityQueue {
    tx: flume::Sender<(Arc<TaskState>, Job)>,
    rx: flume::Receiver<(Arc<TaskState>, Job)>,
}

/// Work-distributing thread pool with two priority classes.
pub struct TaskPool {
    high: PriorityQueue,
    low: PriorityQueue,
    workers: Vec<JoinHandle<()>>,
    shutting_down: Arc<AtomicBool>,
}

impl TaskPool {
    /// Spawns `high_workers + low_workers` threads. A count of zero for
    /// either class falls back to one worker so that class still drains.
    #[must_use]
    pub fn new(high_workers: usize, low_workers: usize) -> Self {
        let high = Self::make_queue();
        let low = Self::make_queue();
        let shutting_down = Arc::new(AtomicBool::new(false));

        let mut workers = Vec::new();
        for (count, queue, name) in [
            (high_workers.max(1), &high, "divide-worker-hi"),
            (low_workers.max(1), &low, "divide-worker-lo"),
        ] {
            for idx in 0..count {
                let rx = queue.rx.clone();
                let stop = Arc::clone(&shutting_down);
                let handle = std::thread::Builder::new()
                    .name(format!("{name}-{idx}"))
                    .spawn(move || {
                        while let Ok((state, job)) = rx.recv() {
                            if stop.load(Ordering::Acquire) {
                                state.complete_one();
                                continue;
                            }
                            Self::run_job(&state, job);
                        }
                    })
                    .expect("worker thread spawn");
                workers.push(handle);
            }
        }

        Self {
            high,
            low,
            workers,
            shutting_down,
        }
    }

    /// Pool sized from the configured worker budget: one quarter of the
    /// threads (at least one) service the low-priority queue.
    #[must_use]
    pub fn with_thread_budget(max_worker_threads: u32) -> Self {
        let total = if max_worker_threads == 0 {
            std::thread::available_parallelism()
                .map_or(4, std::num::NonZero::get)
                .saturating_sub(1)
                .max(2)
        } else {
            max_worker_threads as usize
        };
        let low = (total / 4).max(1);
        Self::new(total - low.min(total - 1), low)
    }

    fn make_queue() -> PriorityQueue {
        let (tx, rx) = flume::unbounded();
        PriorityQueue { tx, rx }
    }

    fn run_job(state: &Arc<TaskState>, job: Job) {
        let task = Task {
            state: Arc::clone(state),
        };
        job(&task);
        state.complete_one();
    }

    /// Creates a task without starting it.
    pub fn create_task<F>(&self, parent: Option<&TaskHandle>, work: F) -> (TaskHandle, Job)
    where
        F: FnOnce(&Task) + Send + 'static,
    {
        let state = TaskState::new(parent.map(|p| Arc::clone(&p.state)));
        (TaskHandle { state }, Box::new(work))
    }

    /// Creates and dispatches a task in one step.
    pub fn start<F>(&self, parent: Option<&TaskHandle>, priority: TaskPriority, work: F) -> TaskHandle
    where
        F: FnOnce(&Task) + Send + 'static,
    {
        let (handle, job) = self.create_task(parent, work);
        self.dispatch(&handle, priority, job);
        handle
    }

    /// Dispatches a previously created task.
    pub fn dispatch(&self, handle: &TaskHandle, priority: TaskPriority, job: Job) {
        let queue = match priority {
            TaskPriority::High => &self.high,
            TaskPriority::Low => &self.low,
        };
        // Send only fails once the pool has shut down; run inline then so
        // waiters still unblock.
        if let Err(flume::SendError((state, job))) =
            queue.tx.send((Arc::clone(&handle.state), job))
        {
            Self::run_job(&state, job);
        }
    }

    /// Runs one queued job on the calling thread, high priority first.
    /// Returns false when both queues were empty.
    pub fn yield_once(&self) -> bool {
        for queue in [&self.high, &self.low] {
            if let Ok((state, job)) = queue.rx.try_recv() {
                Self::run_job(&state, job);
                return true;
            }
        }
        false
    }

    /// Blocks until `handle` finishes, helping drain the queues meanwhile.
    pub fn wait(&self, handle: &TaskHandle) {
        while !handle.is_finished() {
            if !self.yield_once() {
                // Nothing to steal; park briefly on the task's condvar.
                let mut done = handle.state.done_lock.lock();
                if !*done {
                    let _ = handle
                        .state
                        .done_cv
                        .wait_for(&mut done, Duration::from_millis(1));
                }
            }
        }
    }

    /// Waits for `handle` with a timeout, still helping with queued work.
    /// Returns false on timeout.
    pub fn wait_timeout(&self, handle: &TaskHandle, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while !handle.is_finished() {
            if Instant::now() >= deadline {
                return false;
            }
            if !self.yield_once() {
                std::thread::yield_now();
            }
        }
        true
    }

    /// Cancels every handle, then joins them with a timeout. Used on scene
    /// unload; on timeout the engine logs and continues with best-effort
    /// teardown.
    pub fn cancel_and_join(&self, handles: &[TaskHandle], timeout: Duration) {
        for handle in handles {
            handle.cancel();
        }
        let deadline = Instant::now() + timeout;
        for handle in handles {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if !self.wait_timeout(handle, remaining) {
                warn!(
                    "task {} did not finish within {:?}; continuing teardown",
                    handle.guid(),
                    timeout
                );
                return;
            }
        }
    }

    /// Worker thread count across both classes.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }
}

impl Drop for TaskPool {
    fn drop(&mut self) {
        self.shutting_down.store(true, Ordering::Release);
        // Disconnect both queues so workers fall out of recv() once drained.
        let (dead_tx, _) = flume::unbounded();
        self.high.tx = dead_tx.clone();
        self.low.tx = dead_tx;
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn tasks_run_and_finish() {
        let pool = TaskPool::new(2, 1);
        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);
        let handle = pool.start(None, TaskPriority::High, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        pool.wait(&handle);
        assert!(handle.is_finished());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn parent_outlives_children() {
        let pool = TaskPool::new(2, 1);
        let order = Arc::new(Mutex::new(Vec::new()));

        let o = Arc::clone(&order);
        let parent = pool.start(None, TaskPriority::High, move |_| {
            o.lock().push("parent-work");
        });
        for i in 0..4 {
            let o = Arc::clone(&order);
            pool.start(Some(&parent), TaskPriority::High, move |_| {
                std::thread::sleep(Duration::from_millis(2));
                o.lock().push(if i % 2 == 0 { "child-even" } else { "child-odd" });
            });
        }
        pool.wait(&parent);
        assert!(parent.is_finished());
        assert_eq!(order.lock().len(), 5);
    }

    #[test]
    fn cancellation_is_observable() {
        let pool = TaskPool::new(1, 1);
        let ran_to_end = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran_to_end);
        let handle = pool.start(None, TaskPriority::Low, move |task| {
            for _ in 0..100 {
                if task.is_cancelled() {
                    return;
                }
                std::thread::sleep(Duration::from_millis(1));
            }
            flag.store(true, Ordering::SeqCst);
        });
        handle.cancel();
        pool.wait(&handle);
        assert!(!ran_to_end.load(Ordering::SeqCst));
    }

    #[test]
    fn wait_timeout_reports_slow_tasks() {
        let pool = TaskPool::new(1, 1);
        let handle = pool.start(None, TaskPriority::Low, |_| {
            std::thread::sleep(Duration::from_millis(50));
        });
        assert!(!pool.wait_timeout(&handle, Duration::from_millis(1)));
        pool.wait(&handle);
    }
}
