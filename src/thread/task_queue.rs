//! A bounded queue of tasks executed by a [`ThreadPool`].

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;

use tracing::trace;

use super::thread_pool::{run_task, QueueShared, Task, ThreadPool};
use crate::error::TaskError;

/// A queue of tasks run by the workers of a [`ThreadPool`].
///
/// The queue holds at most `max_tasks` pending tasks; the storage for them is reserved up
/// front. Adding to a full queue doesn't fail or block on the workers: the adding thread
/// runs the oldest pending task itself to make room.
///
/// `max_concurrency` limits how many workers run tasks from this queue at the same time,
/// 0 means no limit. Threads that run tasks through [`add_tasks`](TaskQueue::add_tasks) or
/// [`wait_for_tasks`](TaskQueue::wait_for_tasks) ignore the limit.
///
/// Dropping the queue waits for all of its tasks.
pub struct TaskQueue<'p> {
    pool: &'p ThreadPool,
    shared: Arc<QueueShared>,
}

impl core::fmt::Debug for TaskQueue<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TaskQueue")
            .field("max_tasks", &self.shared.max_tasks)
            .field("max_concurrency", &self.max_concurrency())
            .field("executing", &self.executing_tasks())
            .finish_non_exhaustive()
    }
}

impl<'p> TaskQueue<'p> {
    /// Creates a queue holding up to `max_tasks` pending tasks and attaches it to `pool`.
    pub fn new(pool: &'p ThreadPool, max_tasks: usize, max_concurrency: u32) -> Result<Self, TaskError> {
        if max_tasks == 0 {
            return Err(TaskError::InvalidArgument("max tasks must be non-zero"));
        }
        let shared = Arc::new(QueueShared::new(max_tasks, max_concurrency));
        pool.add_queue(Arc::clone(&shared));
        Ok(TaskQueue { pool, shared })
    }

    #[inline]
    pub fn max_tasks(&self) -> usize {
        self.shared.max_tasks
    }

    pub fn max_concurrency(&self) -> u32 {
        self.shared.max_concurrency.load(Ordering::Acquire)
    }

    /// Changes the concurrency limit, waking idle workers if it was raised.
    pub fn set_max_concurrency(&self, max_concurrency: u32) {
        let pool = self.pool.shared();
        let _state = pool.state.lock();
        let previous = self
            .shared
            .max_concurrency
            .swap(max_concurrency, Ordering::AcqRel);
        let raised = max_concurrency == 0 || (previous != 0 && previous < max_concurrency);
        if raised {
            pool.state_changed.notify_all();
        }
    }

    /// Returns how many tasks of this queue are running right now.
    pub fn executing_tasks(&self) -> u32 {
        self.shared.executing.load(Ordering::Acquire)
    }

    /// Returns how many tasks are waiting to run.
    pub fn pending_tasks(&self) -> usize {
        let mut state = self.pool.shared().state.lock();
        state
            .queue_mut(&self.shared)
            .map_or(0, |slot| slot.tasks.len())
    }

    /// Adds a single task.
    pub fn add_task<F: FnOnce() + Send + 'static>(&self, task: F) {
        self.add_tasks([Box::new(task) as Task]);
    }

    /// Adds tasks to the end of the queue.
    ///
    /// Tasks added by one call stay in order and aren't interleaved with tasks added by
    /// other threads, unless the queue fills up part way: then the tasks added so far are
    /// committed and the calling thread runs the oldest pending task before continuing.
    pub fn add_tasks<I: IntoIterator<Item = Task>>(&self, tasks: I) {
        let tasks = tasks.into_iter();
        let mut pending: Vec<Task> = Vec::with_capacity(tasks.size_hint().0.min(self.shared.max_tasks));

        let mut adding = self.shared.add_lock.lock();
        for task in tasks {
            loop {
                if self.shared.reserve_slot() {
                    pending.push(task);
                    break;
                }

                // Full: flush what we have so far and make room by running the oldest task.
                drop(adding);
                if let Some(oldest) = self.commit_and_pop(&mut pending) {
                    trace!("Task queue full, running the oldest task on the adding thread.");
                    run_task(&self.shared, oldest);
                }
                adding = self.shared.add_lock.lock();
            }
        }
        drop(adding);

        if !pending.is_empty() {
            let pool = self.pool.shared();
            let mut state = pool.state.lock();
            if let Some(slot) = state.queue_mut(&self.shared) {
                slot.tasks.extend(pending);
            }
            pool.state_changed.notify_all();
        }
    }

    /// Appends `pending` to the queue, then pops the oldest task and counts it as executing.
    fn commit_and_pop(&self, pending: &mut Vec<Task>) -> Option<Task> {
        let pool = self.pool.shared();
        let mut state = pool.state.lock();
        let slot = state.queue_mut(&self.shared)?;
        slot.tasks.extend(pending.drain(..));

        let task = slot.pop_task()?;
        self.shared.executing.fetch_add(1, Ordering::AcqRel);
        if !slot.tasks.is_empty() {
            pool.state_changed.notify_all();
        }
        Some(task)
    }

    /// Blocks until every task added so far has finished, running pending tasks on the
    /// calling thread in the meantime.
    ///
    /// A task that panics on the calling thread unwinds out of this call. The remaining
    /// tasks stay queued and the next call picks them up.
    pub fn wait_for_tasks(&self) {
        let mut pending = Vec::new();
        loop {
            match self.commit_and_pop(&mut pending) {
                Some(task) => run_task(&self.shared, task),
                None if self.shared.executing.load(Ordering::Acquire) == 0 => break,
                // Other threads are still running tasks from this queue.
                None => thread::yield_now(),
            }
        }
    }
}

impl Drop for TaskQueue<'_> {
    fn drop(&mut self) {
        self.wait_for_tasks();
        self.pool.remove_queue(&self.shared);
    }
}
