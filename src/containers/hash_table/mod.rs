//! An intrusive hash table with separate chaining.
//!
// # Implementation notes
// Every node is linked twice: into the chain of its bucket (singly linked, newest first)
// and into a `List` that keeps insertion order for iteration. The table never resizes;
// `table_size` gives a bucket count for a 0.75 load factor and longer chains are the only
// consequence of exceeding it.
//
// Keys aren't copied. A node stores a pointer to its key, which lives in caller-owned
// memory (usually inside the node itself) and must stay valid while the node is linked.

use core::cell::Cell;
use core::fmt::Debug;
use core::mem::size_of;
use core::ptr::NonNull;

use tracing::trace;

use super::list::{Iter, Linked, List, ListNode};
use crate::allocators::{alloc_array, Allocator};
use crate::error::{AllocError, HashTableError};
use crate::util::aligned_size;

/// Head of a bucket chain.
pub type Bucket<T> = Option<NonNull<T>>;

/// Returns the bucket count for a table holding up to `max_elements` elements at a 0.75
/// load factor, or `None` if it doesn't fit in a `usize`.
pub const fn table_size(max_elements: usize) -> Option<usize> {
    match max_elements.checked_mul(4) {
        Some(0) => Some(1),
        Some(size) => Some(size.div_ceil(3)),
        None => None,
    }
}

/// Returns the bytes needed to allocate `table_size` buckets from an [`Allocator`].
pub const fn full_alloc_size(table_size: usize) -> Option<usize> {
    match table_size.checked_mul(size_of::<Bucket<()>>()) {
        Some(size) => aligned_size(size),
        None => None,
    }
}

/// Allocates and clears bucket storage for `table_size` buckets.
///
/// Nothing is freed when the slice goes away: allocate from an arena, or free the memory
/// through the allocator once the table is gone.
pub fn alloc_buckets<T, A: Allocator + ?Sized>(
    allocator: &A,
    table_size: usize,
) -> Result<&mut [Bucket<T>], AllocError> {
    if table_size == 0 {
        return Err(AllocError::InvalidArgument("table size must be non-zero"));
    }
    let buckets = alloc_array::<Bucket<T>, A>(allocator, table_size)?;
    unsafe {
        for i in 0..table_size {
            buckets.as_ptr().add(i).write(None);
        }
        Ok(core::slice::from_raw_parts_mut(buckets.as_ptr(), table_size))
    }
}

/// The links embedded in an element of a [`HashTable`].
pub struct HashTableNode<K: ?Sized, T> {
    list_node: ListNode<T>,
    chain_next: Cell<Option<NonNull<T>>>,
    hash: Cell<u32>,
    key: Cell<Option<NonNull<K>>>,
}

impl<K: ?Sized, T> HashTableNode<K, T> {
    pub const fn new() -> Self {
        HashTableNode {
            list_node: ListNode::new(),
            chain_next: Cell::new(None),
            hash: Cell::new(0),
            key: Cell::new(None),
        }
    }

    /// The iteration-order links, to be returned from [`Linked::list_node`].
    #[inline]
    pub fn list_node(&self) -> &ListNode<T> {
        &self.list_node
    }

    /// The hash of the key the node was inserted with.
    #[inline]
    pub fn hash(&self) -> u32 {
        self.hash.get()
    }

    /// The key the node was inserted with, or `None` while the node isn't in a table.
    #[inline]
    pub fn key(&self) -> Option<NonNull<K>> {
        self.key.get()
    }

    fn unlink(&self) {
        self.chain_next.set(None);
        self.key.set(None);
    }
}

impl<K: ?Sized, T> Default for HashTableNode<K, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: ?Sized, T> Debug for HashTableNode<K, T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("HashTableNode")
            .field("list_node", &self.list_node)
            .field("chain_next", &self.chain_next.get())
            .field("hash", &self.hash.get())
            .finish_non_exhaustive()
    }
}

/// Types that can be inserted into a [`HashTable`] keyed by `K`.
///
/// # Safety
/// `hash_node` must always return the same [`HashTableNode`], one stored inside `self`, and
/// [`Linked::list_node`] must return that node's [`list_node`](HashTableNode::list_node).
pub unsafe trait HashLinked<K: ?Sized>: Linked {
    fn hash_node(&self) -> &HashTableNode<K, Self>;
}

#[inline(always)]
unsafe fn hash_links<'a, K: ?Sized, T: HashLinked<K>>(node: NonNull<T>) -> &'a HashTableNode<K, T> {
    (*node.as_ptr()).hash_node()
}

/// An intrusive hash table over caller-supplied bucket storage.
///
/// The table neither allocates nor owns its nodes; removing a node hands it back to the
/// caller. It isn't internally synchronized, wrap it in a
/// [`ReadWriteLock`](crate::thread::ReadWriteLock) to share it.
pub struct HashTable<'b, K: ?Sized, T: HashLinked<K>> {
    list: List<T>,
    table: &'b mut [Bucket<T>],
    hash_func: fn(&K) -> u32,
    keys_equal_func: fn(&K, &K) -> bool,
}

impl<K: ?Sized, T: HashLinked<K>> Debug for HashTable<'_, K, T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("HashTable")
            .field("length", &self.list.len())
            .field("table_size", &self.table.len())
            .finish_non_exhaustive()
    }
}

impl<'b, K: ?Sized, T: HashLinked<K>> HashTable<'b, K, T> {
    /// Creates an empty table over `buckets`. Any previous contents of `buckets` are cleared.
    pub fn new(
        buckets: &'b mut [Bucket<T>],
        hash_func: fn(&K) -> u32,
        keys_equal_func: fn(&K, &K) -> bool,
    ) -> Result<Self, HashTableError<T>> {
        if buckets.is_empty() {
            return Err(HashTableError::InvalidArgument("table size must be non-zero"));
        }
        buckets.fill(None);
        Ok(HashTable {
            list: List::new(),
            table: buckets,
            hash_func,
            keys_equal_func,
        })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.list.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    #[inline]
    pub fn table_size(&self) -> usize {
        self.table.len()
    }

    /// The nodes in insertion order.
    #[inline]
    pub fn list(&self) -> &List<T> {
        &self.list
    }

    /// Iterates over the nodes in insertion order.
    #[inline]
    pub fn iter(&self) -> Iter<'_, T> {
        self.list.iter()
    }

    #[inline(always)]
    fn bucket_index(&self, hash: u32) -> usize {
        hash as usize % self.table.len()
    }

    fn find_hashed(&self, key: &K, hash: u32) -> Option<NonNull<T>> {
        let mut current = self.table[self.bucket_index(hash)];
        while let Some(node) = current {
            // SAFETY: linked nodes and their keys stay valid until removed or cleared.
            let links = unsafe { hash_links::<K, T>(node) };
            if links.hash.get() == hash {
                let existing = links.key.get().map(|stored| unsafe { &*stored.as_ptr() });
                if existing.is_some_and(|existing| (self.keys_equal_func)(existing, key)) {
                    return Some(node);
                }
            }
            current = links.chain_next.get();
        }
        None
    }

    /// Inserts `node` under `key`.
    ///
    /// If a node with an equal key is already present nothing changes and that node is
    /// returned in [`HashTableError::DuplicateKey`].
    ///
    /// # Safety
    /// `node` must be valid, not in any table or list, and stay valid and in place until it
    /// is removed or the table is cleared. The same holds for the memory behind `key`.
    pub unsafe fn insert(&mut self, key: &K, node: NonNull<T>) -> Result<(), HashTableError<T>> {
        let hash = (self.hash_func)(key);
        if let Some(existing) = self.find_hashed(key, hash) {
            trace!(hash, "Rejected duplicate key.");
            return Err(HashTableError::DuplicateKey(existing));
        }

        let index = self.bucket_index(hash);
        let links = hash_links::<K, T>(node);
        links.hash.set(hash);
        links.key.set(Some(NonNull::from(key)));
        links.chain_next.set(self.table[index]);
        self.table[index] = Some(node);
        self.list.append(node);
        Ok(())
    }

    /// Returns the node stored under `key`.
    pub fn find(&self, key: &K) -> Option<&T> {
        let hash = (self.hash_func)(key);
        self.find_hashed(key, hash)
            .map(|node| unsafe { &*node.as_ptr() })
    }

    /// Returns whether a node is stored under `key`.
    pub fn contains(&self, key: &K) -> bool {
        self.find(key).is_some()
    }

    /// Removes the node stored under `key` and hands it back to the caller.
    pub fn remove(&mut self, key: &K) -> Option<NonNull<T>> {
        let hash = (self.hash_func)(key);
        let index = self.bucket_index(hash);

        let mut previous: Option<NonNull<T>> = None;
        let mut current = self.table[index];
        while let Some(node) = current {
            // SAFETY: linked nodes and their keys stay valid until removed or cleared.
            let links = unsafe { hash_links::<K, T>(node) };
            let next = links.chain_next.get();
            let matches = links.hash.get() == hash
                && links
                    .key
                    .get()
                    .is_some_and(|existing| (self.keys_equal_func)(unsafe { &*existing.as_ptr() }, key));

            if matches {
                match previous {
                    Some(previous) => unsafe { hash_links::<K, T>(previous) }.chain_next.set(next),
                    None => self.table[index] = next,
                }
                unsafe { self.list.remove(node) };
                links.unlink();
                return Some(node);
            }

            previous = Some(node);
            current = next;
        }
        None
    }

    /// Removes every node.
    pub fn clear(&mut self) {
        for node in self.list.iter() {
            node.hash_node().unlink();
        }
        self.list.clear();
        self.table.fill(None);
    }
}
