//! Thread primitives: lifetime tracking for objects shared between threads, a read/write
//! lock and task queues executed by a thread pool.

pub mod lifetime;
pub mod read_write_lock;
pub mod task_queue;
pub mod thread_pool;

pub use lifetime::{Lifetime, LifetimeGuard, Stage};
pub use read_write_lock::{ReadGuard, ReadWriteLock, WriteGuard};
pub use task_queue::TaskQueue;
pub use thread_pool::{default_thread_count, Task, ThreadPool, MAX_THREADS};
