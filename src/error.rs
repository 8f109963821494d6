//! Error types returned by the allocators, containers and thread primitives.
//!
//! Each component reports failures through its own enum so callers can match on the
//! exact condition. Programmer errors (freeing a chunk the pool never handed out,
//! linking a node twice, ...) are not represented here, they are debug assertions.

use core::fmt;
use core::ptr::NonNull;

use thiserror::Error;

/// Failure of an allocation or free request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AllocError {
    /// A required parameter was zero, misaligned or otherwise unusable.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    /// The allocator ran out of space or hit its configured limit.
    #[error("out of memory")]
    OutOfMemory,
    /// The allocator doesn't support the requested operation (e.g. freeing from an arena).
    #[error("operation not permitted by this allocator")]
    PermissionDenied,
}

/// Failure of a hash table operation.
///
/// `T` is the node type stored in the table. On a duplicate key the node already in the
/// table is handed back so the caller can decide whether to replace it.
#[derive(Error)]
pub enum HashTableError<T> {
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    #[error("key is already present in the hash table")]
    DuplicateKey(NonNull<T>),
}

impl<T> fmt::Debug for HashTableError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HashTableError::InvalidArgument(what) => {
                f.debug_tuple("InvalidArgument").field(what).finish()
            }
            HashTableError::DuplicateKey(node) => {
                f.debug_tuple("DuplicateKey").field(node).finish()
            }
        }
    }
}

impl<T> PartialEq for HashTableError<T> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (HashTableError::InvalidArgument(a), HashTableError::InvalidArgument(b)) => a == b,
            (HashTableError::DuplicateKey(a), HashTableError::DuplicateKey(b)) => a == b,
            _ => false,
        }
    }
}

/// Failure of a lifetime tracker operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LifetimeError {
    /// `destroy` was called on a tracker that was already destroyed.
    #[error("lifetime was already destroyed")]
    AlreadyDestroyed,
    /// The control block couldn't be allocated.
    #[error("couldn't allocate lifetime control block")]
    Alloc(#[from] AllocError),
}

/// Failure of a thread pool or task queue operation.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    /// The thread pool still has task queues attached.
    #[error("operation not permitted while task queues are attached")]
    PermissionDenied,
    /// The OS refused to start a worker thread.
    #[error("couldn't spawn worker thread")]
    Spawn(#[source] std::io::Error),
}
