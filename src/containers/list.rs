//! Defines the intrusive [`List`] and its [`ListNode`] links.
//!
//! The links live inside the elements themselves: an element type embeds a [`ListNode`]
//! and implements [`Linked`] to tell the list where it is. Linking and unlinking never
//! allocate, which makes the list usable from inside allocators and for objects carved
//! out of arena or pool memory.

use core::cell::Cell;
use core::fmt::Debug;
use core::marker::PhantomData;
use core::ptr::NonNull;

/// The links embedded in an element of a [`List`].
pub struct ListNode<T> {
    prev: Cell<Option<NonNull<T>>>,
    next: Cell<Option<NonNull<T>>>,
}

impl<T> ListNode<T> {
    /// Creates unlinked links.
    #[inline]
    pub const fn new() -> Self {
        ListNode {
            prev: Cell::new(None),
            next: Cell::new(None),
        }
    }

    #[inline]
    pub fn prev(&self) -> Option<NonNull<T>> {
        self.prev.get()
    }

    #[inline]
    pub fn next(&self) -> Option<NonNull<T>> {
        self.next.get()
    }

    #[inline]
    fn unlink(&self) {
        self.prev.set(None);
        self.next.set(None);
    }
}

impl<T> Default for ListNode<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Debug for ListNode<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ListNode")
            .field("prev", &self.prev.get())
            .field("next", &self.next.get())
            .finish()
    }
}

/// Types that can be linked into a [`List`].
///
/// # Safety
/// `list_node` must always return the same [`ListNode`], one that is stored inside `self`
/// and not used by any other list.
pub unsafe trait Linked: Sized {
    fn list_node(&self) -> &ListNode<Self>;
}

#[inline(always)]
unsafe fn links<'a, T: Linked>(node: NonNull<T>) -> &'a ListNode<T> {
    (*node.as_ptr()).list_node()
}

/// An intrusive doubly-linked list.
///
/// The list doesn't own its elements, it only borrows their links. The caller keeps every
/// element alive and in place for as long as it is linked.
pub struct List<T: Linked> {
    length: usize,
    head: Option<NonNull<T>>,
    tail: Option<NonNull<T>>,
    _marker: PhantomData<*const T>,
}

impl<T: Linked> Debug for List<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("List")
            .field("length", &self.length)
            .field("head", &self.head)
            .field("tail", &self.tail)
            .finish()
    }
}

impl<T: Linked> Default for List<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Linked> List<T> {
    /// Creates an empty list.
    #[inline]
    pub const fn new() -> Self {
        List {
            length: 0,
            head: None,
            tail: None,
            _marker: PhantomData,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.length
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    #[inline]
    pub fn head(&self) -> Option<NonNull<T>> {
        self.head
    }

    #[inline]
    pub fn tail(&self) -> Option<NonNull<T>> {
        self.tail
    }

    /// Links `node` right after `previous`, or at the front of the list if `previous` is `None`.
    /// This operation has a time complexity of *O*(1).
    ///
    /// # Safety
    /// `node` must be valid, not linked into any list, and stay valid and in place until it
    /// is removed or the list is cleared. `previous`, if present, must be linked into `self`.
    pub unsafe fn insert(&mut self, previous: Option<NonNull<T>>, node: NonNull<T>) {
        let node_links = links(node);
        debug_assert!(
            node_links.prev().is_none() && node_links.next().is_none() && self.head != Some(node),
            "Node is already linked."
        );

        let next = match previous {
            Some(previous) => {
                let previous_links = links(previous);
                let next = previous_links.next();
                previous_links.next.set(Some(node));
                next
            }
            None => {
                let next = self.head;
                self.head = Some(node);
                next
            }
        };

        node_links.prev.set(previous);
        node_links.next.set(next);
        match next {
            Some(next) => links(next).prev.set(Some(node)),
            None => self.tail = Some(node),
        }
        self.length += 1;
    }

    /// Links `node` at the front of the list.
    ///
    /// # Safety
    /// Same requirements as [`insert`](List::insert).
    #[inline]
    pub unsafe fn prepend(&mut self, node: NonNull<T>) {
        self.insert(None, node)
    }

    /// Links `node` at the back of the list.
    ///
    /// # Safety
    /// Same requirements as [`insert`](List::insert).
    #[inline]
    pub unsafe fn append(&mut self, node: NonNull<T>) {
        self.insert(self.tail, node)
    }

    /// Unlinks `node` from the list.
    /// This operation has a time complexity of *O*(1).
    ///
    /// # Safety
    /// `node` must be linked into `self`.
    pub unsafe fn remove(&mut self, node: NonNull<T>) {
        debug_assert!(self.length > 0, "Removing from an empty list.");
        let node_links = links(node);
        let prev = node_links.prev();
        let next = node_links.next();

        match prev {
            Some(prev) => links(prev).next.set(next),
            None => {
                debug_assert_eq!(self.head, Some(node), "Node isn't linked into this list.");
                self.head = next;
            }
        }
        match next {
            Some(next) => links(next).prev.set(prev),
            None => self.tail = prev,
        }

        node_links.unlink();
        self.length -= 1;
    }

    /// Unlinks every node, leaving each one ready to be linked again.
    pub fn clear(&mut self) {
        let mut current = self.head;
        while let Some(node) = current {
            // SAFETY: linked nodes stay valid until removed or cleared.
            let node_links = unsafe { links(node) };
            current = node_links.next();
            node_links.unlink();
        }
        self.head = None;
        self.tail = None;
        self.length = 0;
    }

    /// Returns an iterator over the nodes from head to tail.
    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            current: self.head,
            remaining: self.length,
            _list: PhantomData,
        }
    }
}

impl<'a, T: Linked> IntoIterator for &'a List<T> {
    type Item = &'a T;
    type IntoIter = Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator over the nodes of a [`List`], see [`List::iter`].
pub struct Iter<'a, T: Linked> {
    current: Option<NonNull<T>>,
    remaining: usize,
    _list: PhantomData<&'a List<T>>,
}

impl<'a, T: Linked> Iterator for Iter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<&'a T> {
        let node = self.current?;
        // SAFETY: the list is borrowed, so the node can't be unlinked while the reference lives.
        let node = unsafe { &*node.as_ptr() };
        self.current = node.list_node().next();
        self.remaining -= 1;
        Some(node)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<T: Linked> ExactSizeIterator for Iter<'_, T> {}
