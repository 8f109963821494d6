//! A reference-counted lifetime tracker, for objects that may be destroyed while other
//! threads still hold on to them.
//!
// # Implementation notes
// Two counts live in the control block:
// - `ref_count` keeps the block's memory alive. Every `Lifetime` handle is one reference,
//   the last one to go frees the block through the allocator it came from.
// - `acquire_count` tracks threads currently using the object. `destroy` waits for it to
//   drain before reporting the object as gone.
//
// The stage and `acquire_count` share one mutex, so an `acquire` racing with `destroy` is
// either rejected or counted before `destroy` starts waiting, never missed.

use core::fmt::Debug;
use core::ops::Deref;
use core::ptr::NonNull;
use core::sync::atomic::{fence, AtomicUsize, Ordering};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, instrument, trace, Level};

use crate::allocators::{alloc_object, Allocator};
use crate::error::LifetimeError;

/// Stages a tracked object goes through.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Stage {
    /// The object can be acquired.
    Alive,
    /// `destroy` was called and is waiting for outstanding acquires to be released.
    Destroying,
    /// The object is gone, acquiring always fails.
    Destroyed,
}

struct LifetimeState<T> {
    stage: Stage,
    object: Option<NonNull<T>>,
    acquire_count: usize,
}

struct LifetimeBlock<'a, T> {
    allocator: Option<&'a (dyn Allocator + Sync)>,
    ref_count: AtomicUsize,
    state: Mutex<LifetimeState<T>>,
    drained: Condvar,
}

/// A handle to the control block that tracks whether an object is still alive.
///
/// Cloning a handle adds a reference to the control block and dropping it removes one.
/// References only keep the control block around, the object itself is owned by whoever
/// created the tracker and is only usable through [`acquire`](Lifetime::acquire).
pub struct Lifetime<'a, T> {
    block: NonNull<LifetimeBlock<'a, T>>,
}

// Other threads only ever get shared access to the object.
unsafe impl<T: Sync> Send for Lifetime<'_, T> {}
unsafe impl<T: Sync> Sync for Lifetime<'_, T> {}

impl<T> Debug for Lifetime<'_, T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Lifetime")
            .field("block", &self.block)
            .field("ref_count", &self.ref_count())
            .field("stage", &self.stage())
            .finish()
    }
}

impl<'a, T> Lifetime<'a, T> {
    /// Starts tracking `object` with a single reference.
    ///
    /// The control block is allocated from `allocator`, or from the global heap if `None`.
    ///
    /// # Safety
    /// `object` must stay valid for shared access until [`destroy`](Lifetime::destroy) returns.
    pub unsafe fn new(
        allocator: Option<&'a (dyn Allocator + Sync)>,
        object: NonNull<T>,
    ) -> Result<Self, LifetimeError> {
        let block = LifetimeBlock {
            allocator,
            ref_count: AtomicUsize::new(1),
            state: Mutex::new(LifetimeState {
                stage: Stage::Alive,
                object: Some(object),
                acquire_count: 0,
            }),
            drained: Condvar::new(),
        };

        let block = match allocator {
            Some(allocator) => {
                let ptr = alloc_object::<LifetimeBlock<'a, T>, _>(allocator)?;
                ptr.as_ptr().write(block);
                ptr
            }
            None => NonNull::from(Box::leak(Box::new(block))),
        };
        trace!(?block, ?object, "Created lifetime.");
        Ok(Lifetime { block })
    }

    #[inline]
    fn block(&self) -> &LifetimeBlock<'a, T> {
        // SAFETY: the block is alive for as long as any handle is.
        unsafe { self.block.as_ref() }
    }

    /// Returns the number of handles sharing the control block.
    pub fn ref_count(&self) -> usize {
        self.block().ref_count.load(Ordering::Acquire)
    }

    pub fn stage(&self) -> Stage {
        self.block().state.lock().stage
    }

    /// Returns whether [`destroy`](Lifetime::destroy) has started.
    pub fn is_destroyed(&self) -> bool {
        self.stage() != Stage::Alive
    }

    /// Returns the number of guards currently alive.
    pub fn acquire_count(&self) -> usize {
        self.block().state.lock().acquire_count
    }

    /// Gets access to the object if it hasn't been destroyed.
    ///
    /// Never blocks on [`destroy`](Lifetime::destroy): once it has been called this returns
    /// `None`. [`destroy`](Lifetime::destroy) waits until the returned guard is released.
    pub fn acquire(&self) -> Option<LifetimeGuard<'_, 'a, T>> {
        let mut state = self.block().state.lock();
        if state.stage != Stage::Alive {
            return None;
        }
        let object = state.object?;
        state.acquire_count += 1;
        Some(LifetimeGuard {
            lifetime: self,
            object,
        })
    }

    fn release(&self) {
        let block = self.block();
        let mut state = block.state.lock();
        debug_assert!(state.acquire_count > 0, "Released more often than acquired.");
        state.acquire_count -= 1;
        if state.acquire_count == 0 && state.stage == Stage::Destroying {
            block.drained.notify_all();
        }
    }

    /// Marks the object as destroyed, blocking until every outstanding acquire is released.
    ///
    /// Calling it while the current thread holds a guard from the same tracker deadlocks.
    /// Only the first call succeeds, later ones return [`LifetimeError::AlreadyDestroyed`].
    #[instrument(level = "debug", skip(self), fields(block = ?self.block), err(Debug, level = Level::DEBUG))]
    pub fn destroy(&self) -> Result<(), LifetimeError> {
        let block = self.block();
        let mut state = block.state.lock();
        if state.stage != Stage::Alive {
            return Err(LifetimeError::AlreadyDestroyed);
        }

        state.stage = Stage::Destroying;
        if state.acquire_count > 0 {
            debug!(acquire_count = state.acquire_count, "Waiting for outstanding acquires.");
        }
        while state.acquire_count > 0 {
            block.drained.wait(&mut state);
        }

        state.stage = Stage::Destroyed;
        state.object = None;
        Ok(())
    }
}

impl<T> Clone for Lifetime<'_, T> {
    fn clone(&self) -> Self {
        let old = self.block().ref_count.fetch_add(1, Ordering::Relaxed);
        debug_assert!(old > 0 && old < usize::MAX, "Lifetime reference count out of range.");
        Lifetime { block: self.block }
    }
}

impl<T> Drop for Lifetime<'_, T> {
    fn drop(&mut self) {
        if self.block().ref_count.fetch_sub(1, Ordering::Release) != 1 {
            return;
        }
        // Synchronizes with the decrements of the other handles.
        fence(Ordering::Acquire);

        let ptr = self.block;
        let allocator = self.block().allocator;
        trace!(block = ?ptr, "Freeing lifetime.");
        unsafe {
            match allocator {
                Some(allocator) => {
                    ptr.as_ptr().drop_in_place();
                    if allocator.can_free() {
                        let result = allocator.free(ptr.cast());
                        debug_assert!(result.is_ok(), "Couldn't free lifetime block: {result:?}");
                    }
                }
                None => drop(Box::from_raw(ptr.as_ptr())),
            }
        }
    }
}

/// Shared access to a tracked object, see [`Lifetime::acquire`].
///
/// Dropping the guard releases the object.
pub struct LifetimeGuard<'l, 'a, T> {
    lifetime: &'l Lifetime<'a, T>,
    object: NonNull<T>,
}

impl<T> LifetimeGuard<'_, '_, T> {
    /// Returns a pointer to the object.
    #[inline]
    pub fn as_ptr(&self) -> NonNull<T> {
        self.object
    }

    /// Releases the object, same as dropping the guard.
    #[inline]
    pub fn release(self) {}
}

impl<T> Deref for LifetimeGuard<'_, '_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: `destroy` can't return while the guard is alive.
        unsafe { self.object.as_ref() }
    }
}

impl<T: Debug> Debug for LifetimeGuard<'_, '_, T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_tuple("LifetimeGuard").field(&**self).finish()
    }
}

impl<T> Drop for LifetimeGuard<'_, '_, T> {
    fn drop(&mut self) {
        self.lifetime.release();
    }
}
