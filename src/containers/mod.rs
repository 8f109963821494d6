//! Intrusive containers.
//!
//! Neither container allocates: the links live inside the elements and, for the hash table,
//! the bucket array is supplied by the caller. Neither is internally synchronized.

pub mod hash_table;
pub mod list;

pub use hash_table::{Bucket, HashLinked, HashTable, HashTableNode};
pub use list::{Linked, List, ListNode};
