//! Bounded LRU store.
//!
//! Arena of slots addressed by stable `usize` indices, with two permanent
//! sentinel slots (`HEAD`, `TAIL`) bounding a doubly linked list so that
//! insertion/removal never special-cases emptiness. The index
//! (`HashMap<Arc<[u8]>, usize>`) maps a key to its slot; the key bytes it
//! holds are the same allocation stored in the slot (refcounted, not
//! duplicated). `Arc` rather than `Rc` because the multi-threaded front end
//! shares one store behind a single mutex across worker threads — the
//! store's contents must be `Send`.
//!
//! A pointer-and-map design — a map keyed by a reference into a node whose
//! lifetime the map itself owns — is rejected outright by Rust's borrow
//! checker. Stable indices sidestep it.

use std::collections::HashMap;
use std::sync::Arc;

const HEAD: usize = 0;
const TAIL: usize = 1;
const NIL: usize = usize::MAX;

struct Slot {
    // Shared with the index entry for the same key — one allocation, not two.
    key: Arc<[u8]>,
    value: Box<[u8]>,
    prev: usize,
    next: usize,
}

impl Slot {
    fn sentinel() -> Self {
        Slot { key: Arc::from(Vec::new()), value: Box::new([]), prev: NIL, next: NIL }
    }
}

/// A bounded, LRU-evicting key/value store.
///
/// Single-threaded API: every method takes `&mut self`. Thread safety, when
/// needed, is layered externally by serializing access through one mutex —
/// the store never takes a lock of its own.
pub struct LruStore {
    slots: Vec<Slot>,
    free: Vec<usize>,
    index: HashMap<Arc<[u8]>, usize>,
    current_bytes: usize,
    max_bytes: usize,
}

impl LruStore {
    /// Create an empty store with a byte budget of `max_bytes` across all
    /// stored keys and values combined.
    pub fn new(max_bytes: usize) -> Self {
        let mut slots = Vec::with_capacity(2);
        slots.push(Slot::sentinel());
        slots.push(Slot::sentinel());
        slots[HEAD].next = TAIL;
        slots[TAIL].prev = HEAD;

        LruStore {
            slots,
            free: Vec::new(),
            index: HashMap::new(),
            current_bytes: 0,
            max_bytes,
        }
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Sum of `key.len() + value.len()` across all live entries.
    pub fn current_bytes(&self) -> usize {
        self.current_bytes
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    /// Drop every entry. Walks the same removal path eviction uses, so it
    /// cannot desynchronize the index/list/byte-count invariants.
    pub fn clear(&mut self) {
        while let Some(&idx) = self.index.values().next() {
            self.remove_slot(idx);
        }
    }

    /// Insert or replace `key` with `value`. Returns `false` (store
    /// unchanged) if `key.len() + value.len()` alone exceeds the byte
    /// budget — rejection is checked before any eviction happens, so a
    /// refused oversized `Put` never evicts anything. On a hit, replaces
    /// the value and touches the entry; on a miss, inserts and evicts from
    /// the LRU end until the new entry fits.
    pub fn put(&mut self, key: &[u8], value: &[u8]) -> bool {
        let footprint = key.len() + value.len();
        if footprint > self.max_bytes {
            return false;
        }

        if let Some(&idx) = self.index.get(key) {
            self.replace_value(idx, value);
        } else {
            self.evict_until_fits(footprint);
            self.insert_new(key, value);
        }
        true
    }

    /// Insert `key` only if absent. A no-op on hit: neither the value nor
    /// the entry's recency changes.
    pub fn put_if_absent(&mut self, key: &[u8], value: &[u8]) -> bool {
        if self.index.contains_key(key) {
            return false;
        }
        let footprint = key.len() + value.len();
        if footprint > self.max_bytes {
            return false;
        }
        self.evict_until_fits(footprint);
        self.insert_new(key, value);
        true
    }

    /// Replace the value of an existing key, touching it to MRU. A no-op
    /// returning `false` if the key is absent.
    ///
    /// The source's `Set` neither checks the byte budget nor updates the
    /// byte count on growth, which would desynchronize `current_bytes` from
    /// the universal accounting invariant the moment a value grows. Unlike
    /// that, a growth that alone would exceed the byte budget is refused
    /// (the old value is kept), mirroring the same existing-key footprint
    /// check `put()` makes on a hit.
    pub fn set(&mut self, key: &[u8], value: &[u8]) -> bool {
        let Some(&idx) = self.index.get(key) else {
            return false;
        };
        if key.len() + value.len() > self.max_bytes {
            return false;
        }
        self.replace_value(idx, value);
        true
    }

    /// Remove `key`. A no-op returning `false` if absent.
    pub fn delete(&mut self, key: &[u8]) -> bool {
        match self.index.get(key).copied() {
            Some(idx) => {
                self.remove_slot(idx);
                true
            }
            None => false,
        }
    }

    /// Look up `key`, touching it to MRU on a hit.
    pub fn get(&mut self, key: &[u8]) -> Option<Vec<u8>> {
        let idx = *self.index.get(key)?;
        self.touch(idx);
        Some(self.slots[idx].value.to_vec())
    }

    // ---- internals ----

    fn unlink(&mut self, idx: usize) {
        let (prev, next) = (self.slots[idx].prev, self.slots[idx].next);
        self.slots[prev].next = next;
        self.slots[next].prev = prev;
    }

    fn link_before_tail(&mut self, idx: usize) {
        let last = self.slots[TAIL].prev;
        self.slots[idx].prev = last;
        self.slots[idx].next = TAIL;
        self.slots[last].next = idx;
        self.slots[TAIL].prev = idx;
    }

    /// Move `idx` to the MRU (tail) position. A no-op if it's already there.
    fn touch(&mut self, idx: usize) {
        if self.slots[TAIL].prev == idx {
            return;
        }
        self.unlink(idx);
        self.link_before_tail(idx);
    }

    fn footprint_of(&self, idx: usize) -> usize {
        self.slots[idx].key.len() + self.slots[idx].value.len()
    }

    /// Unlink, drop from the index, account for freed bytes, and recycle
    /// the slot.
    fn remove_slot(&mut self, idx: usize) {
        self.unlink(idx);
        self.current_bytes -= self.footprint_of(idx);
        self.index.remove(&self.slots[idx].key);
        self.slots[idx].value = Box::new([]);
        self.slots[idx].key = Arc::from(Vec::new());
        self.free.push(idx);
    }

    /// Evict LRU entries until `current_bytes + incoming <= max_bytes`, or
    /// the list runs out of entries.
    fn evict_until_fits(&mut self, incoming: usize) {
        while self.current_bytes + incoming > self.max_bytes {
            let victim = self.slots[HEAD].next;
            if victim == TAIL {
                break;
            }
            self.remove_slot(victim);
        }
    }

    /// Evict LRU entries to make room for `idx` growing to `incoming`
    /// bytes, sparing `idx` itself if it becomes the eviction candidate
    /// (replacement is not self-eviction).
    fn evict_until_fits_sparing(&mut self, idx: usize, incoming: usize) {
        while self.current_bytes + incoming > self.max_bytes {
            let victim = self.slots[HEAD].next;
            if victim == TAIL || victim == idx {
                break;
            }
            self.remove_slot(victim);
        }
    }

    fn replace_value(&mut self, idx: usize, value: &[u8]) {
        let key_len = self.slots[idx].key.len();
        let old_footprint = self.footprint_of(idx);
        self.current_bytes -= old_footprint;
        self.evict_until_fits_sparing(idx, key_len + value.len());
        self.slots[idx].value = value.to_vec().into_boxed_slice();
        self.current_bytes += key_len + value.len();
        self.touch(idx);
    }

    fn insert_new(&mut self, key: &[u8], value: &[u8]) {
        let key: Arc<[u8]> = Arc::from(key);
        let value: Box<[u8]> = value.to_vec().into_boxed_slice();
        let footprint = key.len() + value.len();

        let idx = match self.free.pop() {
            Some(idx) => {
                self.slots[idx].key = Arc::clone(&key);
                self.slots[idx].value = value;
                idx
            }
            None => {
                self.slots.push(Slot { key: Arc::clone(&key), value, prev: NIL, next: NIL });
                self.slots.len() - 1
            }
        };

        self.link_before_tail(idx);
        self.index.insert(key, idx);
        self.current_bytes += footprint;
    }
}
