//! Allocators, intrusive containers and thread primitives for the core of a real-time engine.
//!
//! Everything else in an engine built on this crate allocates through the [`Allocator`]
//! trait, links objects through the intrusive [`List`] and [`HashTable`], and coordinates
//! threads with the primitives in [`thread`].
//!
//! # Usage
//! ```
//! use seabed::allocators::{Allocator, PoolAllocator, SystemAllocator, NO_LIMIT};
//!
//! let system = SystemAllocator::new(NO_LIMIT).unwrap();
//! let ptr = system.alloc(100).unwrap();
//! assert_eq!(system.size(), 112);
//! unsafe { system.free(ptr).unwrap() };
//!
//! #[repr(C, align(16))]
//! struct Storage([u8; 64]);
//! let mut storage = Storage([0; 64]);
//! let pool = PoolAllocator::new(16, 4, &mut storage.0).unwrap();
//! let chunk = pool.alloc(16).unwrap();
//! assert_eq!(chunk, pool.buffer());
//! ```
//!
//! # Allocators
//! Three allocators implement the [`Allocator`] contract:
//! - [`SystemAllocator`] forwards to the platform heap, with an optional byte limit.
//! - [`BufferAllocator`] bumps through a fixed buffer and never frees.
//! - [`PoolAllocator`] hands out fixed-size chunks from a fixed buffer.
//!
//! Every pointer they return is aligned to [`ALLOC_ALIGNMENT`]. Sizes are accounted rounded
//! up to that alignment, so an allocator's [`size`](Allocator::size) is exactly the number
//! of bytes the next allocation would be offset by in a bump allocator.
//!
//! # Containers
//! The containers never allocate. Elements embed their links ([`ListNode`], [`HashTableNode`])
//! and the hash table's buckets are supplied by the caller, usually allocated once through
//! one of the allocators above and sized with [`table_size`](containers::hash_table::table_size).
//!
//! # Threads
//! - [`Lifetime`](thread::Lifetime) lets threads use an object that its owner may destroy at
//!   any time, without the object's memory going away under them.
//! - [`ReadWriteLock`](thread::ReadWriteLock) is a writer-preferring lock.
//! - [`TaskQueue`](thread::TaskQueue) feeds bounded batches of tasks to a
//!   [`ThreadPool`](thread::ThreadPool).
//!
//! # Logging
//! The crate reports through [`tracing`]. Nothing is printed unless the application installs
//! a subscriber.
//!
//! [`Allocator`]: allocators::Allocator
//! [`SystemAllocator`]: allocators::SystemAllocator
//! [`BufferAllocator`]: allocators::BufferAllocator
//! [`PoolAllocator`]: allocators::PoolAllocator
//! [`List`]: containers::List
//! [`ListNode`]: containers::ListNode
//! [`HashTable`]: containers::HashTable
//! [`HashTableNode`]: containers::HashTableNode

pub use crate::allocators::{Allocator, GeneralAllocator};
pub use crate::util::ALLOC_ALIGNMENT;

pub mod allocators;
pub mod containers;
pub mod error;
pub mod hash;
mod header;
pub mod thread;
mod util;
