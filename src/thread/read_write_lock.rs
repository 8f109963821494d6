//! A writer-preferring read/write lock.

use core::fmt::Debug;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Shared access to the value of a [`ReadWriteLock`].
pub type ReadGuard<'a, T> = RwLockReadGuard<'a, T>;

/// Exclusive access to the value of a [`ReadWriteLock`].
pub type WriteGuard<'a, T> = RwLockWriteGuard<'a, T>;

/// A lock that allows either many readers or a single writer.
///
/// As soon as a writer is waiting new readers block, so a steady stream of readers can't
/// starve writers. A thread that already holds a read guard must not take another one
/// while a writer may be waiting, it would deadlock.
#[derive(Default)]
pub struct ReadWriteLock<T: ?Sized> {
    inner: RwLock<T>,
}

impl<T: ?Sized + Debug> Debug for ReadWriteLock<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_tuple("ReadWriteLock").field(&&self.inner).finish()
    }
}

impl<T> ReadWriteLock<T> {
    pub fn new(value: T) -> Self {
        ReadWriteLock {
            inner: RwLock::new(value),
        }
    }

    pub fn into_inner(self) -> T {
        self.inner.into_inner()
    }
}

impl<T: ?Sized> ReadWriteLock<T> {
    /// Blocks until shared access is available.
    #[inline]
    pub fn read(&self) -> ReadGuard<'_, T> {
        self.inner.read()
    }

    /// Takes shared access if it is available right away.
    #[inline]
    pub fn try_read(&self) -> Option<ReadGuard<'_, T>> {
        self.inner.try_read()
    }

    /// Blocks until exclusive access is available.
    #[inline]
    pub fn write(&self) -> WriteGuard<'_, T> {
        self.inner.write()
    }

    /// Takes exclusive access if it is available right away.
    #[inline]
    pub fn try_write(&self) -> Option<WriteGuard<'_, T>> {
        self.inner.try_write()
    }

    /// Exclusive access without locking, the borrow checker guarantees there are no guards.
    pub fn get_mut(&mut self) -> &mut T {
        self.inner.get_mut()
    }
}
