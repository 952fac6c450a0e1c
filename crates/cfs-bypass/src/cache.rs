//! Bounded page caches for remote file data.
//!
//! Two pools, one for small (block-sized) pages and one for big (readahead-
//! sized) pages, each an LRU keyed by `(inode, page index)`. The cache is a
//! collaborator of the read path: a miss simply falls through to the read
//! engine, and writes invalidate any overlapping pages.

use std::collections::HashMap;
use std::hash::Hash;

use cfs_types::InodeId;
use parking_lot::Mutex;

/// Size of a small cache page.
pub const SMALL_PAGE_SIZE: usize = 4096;

/// Size of a big cache page.
pub const BIG_PAGE_SIZE: usize = 128 * 1024;

/// Identity of one cached page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageKey {
    pub ino: InodeId,
    pub index: u64,
}

// ---------------------------------------------------------------------------
// LRU
// ---------------------------------------------------------------------------

struct Entry<K, V> {
    key: K,
    value: V,
    prev: usize,
    next: usize,
}

const NIL: usize = usize::MAX;

/// O(1) LRU over a slab of doubly-linked entries. Freed slots go on a free
/// list and are reused, so removal does not leak slab capacity.
struct Lru<K, V> {
    capacity: usize,
    map: HashMap<K, usize>,
    slots: Vec<Option<Entry<K, V>>>,
    free: Vec<usize>,
    head: usize,
    tail: usize,
}

impl<K: Hash + Eq + Clone, V> Lru<K, V> {
    fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "Lru capacity must be > 0");
        Self {
            capacity,
            map: HashMap::with_capacity(capacity),
            slots: Vec::with_capacity(capacity),
            free: Vec::new(),
            head: NIL,
            tail: NIL,
        }
    }

    fn len(&self) -> usize {
        self.map.len()
    }

    fn get(&mut self, key: &K) -> Option<&V> {
        let idx = *self.map.get(key)?;
        self.move_to_front(idx);
        self.slots[idx].as_ref().map(|e| &e.value)
    }

    fn put(&mut self, key: K, value: V) {
        if let Some(&idx) = self.map.get(&key) {
            if let Some(entry) = self.slots[idx].as_mut() {
                entry.value = value;
            }
            self.move_to_front(idx);
            return;
        }

        if self.map.len() >= self.capacity {
            self.evict_tail();
        }

        let idx = match self.free.pop() {
            Some(idx) => idx,
            None => {
                self.slots.push(None);
                self.slots.len() - 1
            }
        };
        self.slots[idx] = Some(Entry {
            key: key.clone(),
            value,
            prev: NIL,
            next: self.head,
        });
        if self.head != NIL {
            if let Some(e) = self.slots[self.head].as_mut() {
                e.prev = idx;
            }
        }
        self.head = idx;
        if self.tail == NIL {
            self.tail = idx;
        }
        self.map.insert(key, idx);
    }

    fn remove(&mut self, key: &K) -> Option<V> {
        let idx = self.map.remove(key)?;
        self.detach(idx);
        self.free.push(idx);
        self.slots[idx].take().map(|e| e.value)
    }

    fn move_to_front(&mut self, idx: usize) {
        if self.head == idx {
            return;
        }
        self.detach(idx);
        if let Some(e) = self.slots[idx].as_mut() {
            e.prev = NIL;
            e.next = self.head;
        }
        if self.head != NIL {
            if let Some(e) = self.slots[self.head].as_mut() {
                e.prev = idx;
            }
        }
        self.head = idx;
        if self.tail == NIL {
            self.tail = idx;
        }
    }

    fn detach(&mut self, idx: usize) {
        let (prev, next) = match self.slots[idx].as_ref() {
            Some(e) => (e.prev, e.next),
            None => return,
        };
        if prev != NIL {
            if let Some(e) = self.slots[prev].as_mut() {
                e.next = next;
            }
        } else {
            self.head = next;
        }
        if next != NIL {
            if let Some(e) = self.slots[next].as_mut() {
                e.prev = prev;
            }
        } else {
            self.tail = prev;
        }
    }

    fn evict_tail(&mut self) {
        if self.tail == NIL {
            return;
        }
        let idx = self.tail;
        self.detach(idx);
        if let Some(entry) = self.slots[idx].take() {
            self.map.remove(&entry.key);
        }
        self.free.push(idx);
    }
}

// ---------------------------------------------------------------------------
// Page cache
// ---------------------------------------------------------------------------

/// A thread-safe, bounded cache of fixed-size pages.
pub struct PageCache {
    inner: Mutex<Lru<PageKey, Vec<u8>>>,
    page_size: usize,
}

impl PageCache {
    /// Small-page pool with the given capacity in pages.
    pub fn small(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Lru::new(capacity)),
            page_size: SMALL_PAGE_SIZE,
        }
    }

    /// Big-page pool with the given capacity in pages.
    pub fn big(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Lru::new(capacity)),
            page_size: BIG_PAGE_SIZE,
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Copy a cached page into `dest`. `dest` must be exactly one page.
    pub fn lookup(&self, key: PageKey, dest: &mut [u8]) -> bool {
        debug_assert_eq!(dest.len(), self.page_size);
        let mut lru = self.inner.lock();
        match lru.get(&key) {
            Some(page) => {
                dest.copy_from_slice(page);
                true
            }
            None => false,
        }
    }

    /// Insert one page. `data` must be exactly one page.
    pub fn insert(&self, key: PageKey, data: &[u8]) {
        debug_assert_eq!(data.len(), self.page_size);
        self.inner.lock().put(key, data.to_vec());
    }

    /// Drop every page of `ino` overlapping the byte range
    /// `[offset, offset + len)`.
    pub fn invalidate(&self, ino: InodeId, offset: u64, len: usize) {
        if len == 0 {
            return;
        }
        let first = offset / self.page_size as u64;
        let last = (offset + len as u64 - 1) / self.page_size as u64;
        let mut lru = self.inner.lock();
        for index in first..=last {
            lru.remove(&PageKey { ino, index });
        }
    }

    /// Drop every page of `ino`. Used when the inode's last handle closes.
    pub fn evict_inode(&self, ino: InodeId) {
        let mut lru = self.inner.lock();
        let keys: Vec<PageKey> = lru.map.keys().filter(|k| k.ino == ino).copied().collect();
        for key in keys {
            lru.remove(&key);
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
