//! Worker threads that execute the tasks of [`TaskQueue`](super::TaskQueue)s.
//!
// # Implementation notes
// All scheduling state (the registered queues and their pending tasks) lives behind one
// mutex. Workers scan the queues round-robin starting after the queue they served last,
// so a busy queue can't starve the others, and sleep on `state_changed` when nothing is
// runnable. Resizing the pool waits until the started (or stopped) workers have checked in
// on `threads_changed`, which keeps concurrent resizes from stepping on each other.

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, instrument, trace, Level};

use crate::error::TaskError;

/// Maximum number of worker threads in a pool.
pub const MAX_THREADS: usize = 128;

/// A unit of work run by a thread pool.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Returns a sensible worker count for this machine: one less than the number of logical
/// cores, leaving a core for the thread that feeds the pool.
pub fn default_thread_count() -> usize {
    let cores = thread::available_parallelism()
        .map(|cores| cores.get())
        .unwrap_or(1);
    if cores <= 1 {
        1
    } else if cores > MAX_THREADS {
        MAX_THREADS
    } else {
        cores - 1
    }
}

/// The parts of a task queue that are read without the pool lock.
pub(crate) struct QueueShared {
    pub(crate) max_tasks: usize,
    pub(crate) max_concurrency: AtomicU32,
    pub(crate) executing: AtomicU32,
    /// Task slots not taken by queued or about-to-be-queued tasks.
    pub(crate) free_slots: AtomicUsize,
    /// Keeps the tasks of one `add_tasks` call together.
    pub(crate) add_lock: Mutex<()>,
}

impl QueueShared {
    pub(crate) fn new(max_tasks: usize, max_concurrency: u32) -> Self {
        QueueShared {
            max_tasks,
            max_concurrency: AtomicU32::new(max_concurrency),
            executing: AtomicU32::new(0),
            free_slots: AtomicUsize::new(max_tasks),
            add_lock: Mutex::new(()),
        }
    }

    /// Takes a task slot if one is free.
    pub(crate) fn reserve_slot(&self) -> bool {
        self.free_slots
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |free| free.checked_sub(1))
            .is_ok()
    }
}

/// Runs a task popped from `queue`, which counted it as executing. The count drops again
/// even if the task panics.
pub(crate) fn run_task(queue: &QueueShared, task: Task) {
    struct Finished<'q>(&'q QueueShared);

    impl Drop for Finished<'_> {
        fn drop(&mut self) {
            self.0.executing.fetch_sub(1, Ordering::AcqRel);
        }
    }

    let _finished = Finished(queue);
    task();
}

pub(crate) struct QueueSlot {
    pub(crate) shared: Arc<QueueShared>,
    pub(crate) tasks: VecDeque<Task>,
}

impl QueueSlot {
    pub(crate) fn pop_task(&mut self) -> Option<Task> {
        let task = self.tasks.pop_front()?;
        self.shared.free_slots.fetch_add(1, Ordering::AcqRel);
        Some(task)
    }
}

pub(crate) struct PoolState {
    stop: bool,
    thread_count: usize,
    wait_thread_count: usize,
    queues: Vec<QueueSlot>,
    cur_queue: usize,
}

impl PoolState {
    pub(crate) fn queue_mut(&mut self, queue: &Arc<QueueShared>) -> Option<&mut QueueSlot> {
        self.queues
            .iter_mut()
            .find(|slot| Arc::ptr_eq(&slot.shared, queue))
    }

    /// Pops the next runnable task, counting it as executing on its queue.
    fn next_task(&mut self) -> Option<(Arc<QueueShared>, Task)> {
        let count = self.queues.len();
        for i in 0..count {
            let index = (self.cur_queue + i) % count;
            let slot = &mut self.queues[index];

            let max_concurrency = slot.shared.max_concurrency.load(Ordering::Acquire);
            let executing = slot.shared.executing.fetch_add(1, Ordering::AcqRel);
            if max_concurrency == 0 || executing < max_concurrency {
                if let Some(task) = slot.pop_task() {
                    let shared = Arc::clone(&slot.shared);
                    self.cur_queue = (index + 1) % count;
                    return Some((shared, task));
                }
            }
            slot.shared.executing.fetch_sub(1, Ordering::AcqRel);
        }
        None
    }
}

pub(crate) struct PoolShared {
    pub(crate) state: Mutex<PoolState>,
    /// Signalled when tasks were added or workers should re-check whether to exit.
    pub(crate) state_changed: Condvar,
    /// Signalled once all workers being started or stopped have checked in.
    threads_changed: Condvar,
}

/// A pool of worker threads that run the tasks of the [`TaskQueue`](super::TaskQueue)s
/// created on it.
///
/// A pool may have no workers at all, tasks then only run when a thread adds to a full
/// queue or waits for a queue.
pub struct ThreadPool {
    shared: Arc<PoolShared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl core::fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("ThreadPool")
            .field("thread_count", &state.thread_count)
            .field("task_queues", &state.queues.len())
            .finish_non_exhaustive()
    }
}

impl ThreadPool {
    /// Creates a pool with `thread_count` workers, at most [`MAX_THREADS`].
    pub fn new(thread_count: usize) -> Result<Self, TaskError> {
        if thread_count > MAX_THREADS {
            return Err(TaskError::InvalidArgument("thread count exceeds MAX_THREADS"));
        }
        let pool = ThreadPool {
            shared: Arc::new(PoolShared {
                state: Mutex::new(PoolState {
                    stop: false,
                    thread_count: 0,
                    wait_thread_count: 0,
                    queues: Vec::new(),
                    cur_queue: 0,
                }),
                state_changed: Condvar::new(),
                threads_changed: Condvar::new(),
            }),
            workers: Mutex::new(Vec::new()),
        };
        pool.set_thread_count(thread_count)?;
        Ok(pool)
    }

    pub(crate) fn shared(&self) -> &PoolShared {
        &self.shared
    }

    pub fn thread_count(&self) -> usize {
        self.shared.state.lock().thread_count
    }

    /// Starts or stops workers until `thread_count` are running.
    ///
    /// Returns once the new workers have started, or the removed ones have exited.
    #[instrument(level = "debug", skip(self), err(Debug, level = Level::DEBUG))]
    pub fn set_thread_count(&self, thread_count: usize) -> Result<(), TaskError> {
        if thread_count > MAX_THREADS {
            return Err(TaskError::InvalidArgument("thread count exceeds MAX_THREADS"));
        }

        let mut workers = self.workers.lock();
        let mut state = self.shared.state.lock();
        debug_assert_eq!(workers.len(), state.thread_count);

        let mut result = Ok(());
        let mut stopped = Vec::new();
        if thread_count < state.thread_count {
            state.wait_thread_count = state.thread_count - thread_count;
            state.thread_count = thread_count;
            stopped = workers.split_off(thread_count);
            // Also gets tasks of concurrency-limited queues onto the remaining workers.
            self.shared.state_changed.notify_all();
        } else if thread_count > state.thread_count {
            let first = state.thread_count;
            state.wait_thread_count = thread_count - first;
            state.thread_count = thread_count;
            for index in first..thread_count {
                let shared = Arc::clone(&self.shared);
                let spawned = thread::Builder::new()
                    .name(format!("seabed-worker-{index}"))
                    .spawn(move || worker(shared, index));
                match spawned {
                    Ok(handle) => workers.push(handle),
                    Err(e) => {
                        state.wait_thread_count -= thread_count - index;
                        state.thread_count = index;
                        result = Err(TaskError::Spawn(e));
                        break;
                    }
                }
            }
        }

        while state.wait_thread_count > 0 {
            self.shared.threads_changed.wait(&mut state);
        }
        drop(state);

        for handle in stopped {
            join_worker(handle);
        }
        debug!(thread_count = workers.len(), "Thread count changed.");
        result
    }

    /// Stops and joins every worker.
    ///
    /// Fails with [`TaskError::PermissionDenied`] while task queues are still attached.
    /// Workers can be started again afterwards with
    /// [`set_thread_count`](ThreadPool::set_thread_count).
    #[instrument(level = "debug", skip(self), err(Debug, level = Level::DEBUG))]
    pub fn shutdown(&self) -> Result<(), TaskError> {
        let mut workers = self.workers.lock();
        {
            let mut state = self.shared.state.lock();
            if !state.queues.is_empty() {
                return Err(TaskError::PermissionDenied);
            }
            state.stop = true;
            self.shared.state_changed.notify_all();
        }

        for handle in workers.drain(..) {
            join_worker(handle);
        }

        let mut state = self.shared.state.lock();
        state.stop = false;
        state.thread_count = 0;
        Ok(())
    }

    pub(crate) fn add_queue(&self, queue: Arc<QueueShared>) {
        let mut state = self.shared.state.lock();
        let tasks = VecDeque::with_capacity(queue.max_tasks);
        state.queues.push(QueueSlot { shared: queue, tasks });
    }

    pub(crate) fn remove_queue(&self, queue: &Arc<QueueShared>) {
        let mut state = self.shared.state.lock();
        if let Some(index) = state
            .queues
            .iter()
            .position(|slot| Arc::ptr_eq(&slot.shared, queue))
        {
            let slot = state.queues.swap_remove(index);
            debug_assert!(slot.tasks.is_empty(), "Removed a task queue with pending tasks.");
        }
        if state.cur_queue >= state.queues.len() {
            state.cur_queue = 0;
        }
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        {
            let mut state = self.shared.state.lock();
            debug_assert!(state.queues.is_empty());
            state.stop = true;
            self.shared.state_changed.notify_all();
        }
        for handle in self.workers.get_mut().drain(..) {
            join_worker(handle);
        }
    }
}

fn join_worker(handle: JoinHandle<()>) {
    if handle.join().is_err() {
        debug!("Worker thread panicked.");
    }
}

fn check_in(shared: &PoolShared, state: &mut MutexGuard<'_, PoolState>) {
    debug_assert!(state.wait_thread_count > 0);
    state.wait_thread_count -= 1;
    if state.wait_thread_count == 0 {
        shared.threads_changed.notify_all();
    }
}

fn worker(shared: Arc<PoolShared>, index: usize) {
    let mut state = shared.state.lock();
    check_in(&shared, &mut state);
    trace!(index, "Worker started.");

    loop {
        if state.stop {
            break;
        }
        if index >= state.thread_count {
            check_in(&shared, &mut state);
            break;
        }

        match state.next_task() {
            Some((queue, task)) => MutexGuard::unlocked(&mut state, || {
                // A panicking task must not take the worker down with it.
                if panic::catch_unwind(AssertUnwindSafe(|| run_task(&queue, task))).is_err() {
                    debug!(index, "Task panicked.");
                }
            }),
            None => shared.state_changed.wait(&mut state),
        }
    }
    trace!(index, "Worker stopped.");
}
