//! Component C: the open-addressed hash-map half of the collection
//! primitives, with chained tombstones (§4.C).
//!
//! Keys are interned-string `GcRef`s, but this module never resolves them
//! itself — every lookup takes the key's hash and byte content as
//! parameters, already resolved by the caller (`Heap`, which owns both the
//! map arena slot and the key's string arena slot and can borrow both at
//! once without map.rs needing to know `Heap` exists).

use crate::value::{GcRef, Value};

const INITIAL_CAPACITY: usize = 8;

#[derive(Debug, Clone, Copy)]
struct MapEntry {
    key: GcRef,
    value: Value,
    fhash: u32,
    next: Option<u32>,
    used: bool,
    deleted: bool,
}

impl MapEntry {
    fn empty() -> Self {
        Self {
            key: GcRef::from_index(0),
            value: Value::NULL,
            fhash: 0,
            next: None,
            used: false,
            deleted: false,
        }
    }

    fn is_free(&self) -> bool {
        !self.used && !self.deleted
    }
}

/// Open-addressed hash table keyed by interned string `GcRef`s.
///
/// Invariant: `cap` is always a power of two; `scnt` (used-or-tombstone
/// count) never exceeds `cap`; probing a key that was ever inserted visits
/// either its live slot or a chain of used-or-deleted slots ending at an
/// unused slot (§3.3).
#[derive(Debug, Clone)]
pub struct ObjMap {
    entries: Vec<MapEntry>,
    cap: usize,
    size: usize,
    scnt: usize,
    pub metaops: Option<crate::metaops::MetaOps>,
}

impl ObjMap {
    pub fn new() -> Self {
        Self { entries: Vec::new(), cap: 0, size: 0, scnt: 0, metaops: None }
    }

    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn capacity(&self) -> usize {
        self.cap
    }

    fn ensure_allocated(&mut self) {
        if self.cap == 0 {
            self.cap = INITIAL_CAPACITY;
            self.entries = vec![MapEntry::empty(); self.cap];
        }
    }

    fn main_slot(&self, hash: u32) -> usize {
        (hash as usize) & (self.cap - 1)
    }

    /// Walks the chain rooted at `main`, returning the slot index holding
    /// the key if live, and — regardless of whether it was found — the
    /// first tombstone slot seen in the chain plus the chain's tail index
    /// (needed by `insert` to decide between tombstone reuse and
    /// linear-probe extension).
    fn probe_chain<'h>(
        &self,
        main: usize,
        hash: u32,
        key_bytes: &[u8],
        resolve: impl Fn(GcRef) -> &'h [u8],
    ) -> (Option<usize>, Option<usize>, usize) {
        let mut found = None;
        let mut first_tombstone = None;
        let mut cur = main;
        loop {
            let e = &self.entries[cur];
            if e.used && e.fhash == hash && resolve(e.key) == key_bytes {
                found = Some(cur);
                break;
            }
            if e.deleted && first_tombstone.is_none() {
                first_tombstone = Some(cur);
            }
            match e.next {
                Some(next) => cur = next as usize,
                None => break,
            }
        }
        (found, first_tombstone, cur)
    }

    fn find_free_slot_from(&self, start: usize) -> usize {
        let mut i = (start + 1) % self.cap;
        loop {
            if self.entries[i].is_free() {
                return i;
            }
            i = (i + 1) % self.cap;
        }
    }

    /// Inserts or updates `key -> value`, given the key's hash and byte
    /// content and a way to resolve *other* keys' bytes for comparison.
    /// Returns the previous value, if any.
    pub fn insert<'h>(
        &mut self,
        key: GcRef,
        key_hash: u32,
        key_bytes: &[u8],
        value: Value,
        resolve: impl Fn(GcRef) -> &'h [u8] + Copy,
    ) -> Option<Value> {
        self.ensure_allocated();
        if self.scnt >= self.cap {
            self.rehash(resolve);
        }
        let main = self.main_slot(key_hash);

        if self.entries[main].is_free() {
            self.entries[main] =
                MapEntry { key, value, fhash: key_hash, next: None, used: true, deleted: false };
            self.scnt += 1;
            self.size += 1;
            return None;
        }

        let (found, tombstone, tail) = self.probe_chain(main, key_hash, key_bytes, resolve);
        if let Some(slot) = found {
            let old = self.entries[slot].value;
            self.entries[slot].value = value;
            return Some(old);
        }
        if let Some(slot) = tombstone {
            let next = self.entries[slot].next;
            self.entries[slot] = MapEntry { key, value, fhash: key_hash, next, used: true, deleted: false };
            self.size += 1;
            return None;
        }
        let free = self.find_free_slot_from(tail.max(main));
        self.entries[free] = MapEntry { key, value, fhash: key_hash, next: None, used: true, deleted: false };
        self.entries[tail].next = Some(free as u32);
        self.scnt += 1;
        self.size += 1;
        None
    }

    pub fn get<'h>(&self, key_hash: u32, key_bytes: &[u8], resolve: impl Fn(GcRef) -> &'h [u8]) -> Option<Value> {
        if self.cap == 0 {
            return None;
        }
        let main = self.main_slot(key_hash);
        if !self.entries[main].used && !self.entries[main].deleted {
            return None;
        }
        let (found, _, _) = self.probe_chain(main, key_hash, key_bytes, resolve);
        found.map(|slot| self.entries[slot].value)
    }

    pub fn contains<'h>(&self, key_hash: u32, key_bytes: &[u8], resolve: impl Fn(GcRef) -> &'h [u8]) -> bool {
        self.get(key_hash, key_bytes, resolve).is_some()
    }

    /// Removes the key matching `key_hash`/`key_bytes`. Returns the removed
    /// value, if any. The slot is marked a tombstone (its `next` link is
    /// preserved so later lookups still traverse past it to whatever was
    /// chained after).
    pub fn remove<'h>(&mut self, key_hash: u32, key_bytes: &[u8], resolve: impl Fn(GcRef) -> &'h [u8]) -> Option<Value> {
        if self.cap == 0 {
            return None;
        }
        let main = self.main_slot(key_hash);
        let (found, _, _) = self.probe_chain(main, key_hash, key_bytes, resolve);
        let slot = found?;
        let old = self.entries[slot].value;
        self.entries[slot].used = false;
        self.entries[slot].deleted = true;
        self.entries[slot].value = Value::NULL;
        self.size -= 1;
        Some(old)
    }

    /// Doubles capacity, drops tombstones, and reconstructs every chain in
    /// one pass (§4.C).
    fn rehash<'h>(&mut self, resolve: impl Fn(GcRef) -> &'h [u8] + Copy) {
        let new_cap = if self.cap == 0 { INITIAL_CAPACITY } else { self.cap * 2 };
        let old_entries = std::mem::replace(&mut self.entries, vec![MapEntry::empty(); new_cap]);
        self.cap = new_cap;
        self.scnt = 0;
        self.size = 0;
        for e in old_entries.into_iter().filter(|e| e.used) {
            let bytes = resolve(e.key).to_vec();
            self.insert(e.key, e.fhash, &bytes, e.value, resolve);
        }
    }

    /// Iterates live `(key, value)` pairs in arbitrary slot order — used by
    /// the GC to mark reachable entries and by `FORPREP` to build a Map
    /// iterator.
    pub fn iter(&self) -> impl Iterator<Item = (GcRef, Value)> + '_ {
        self.entries.iter().filter(|e| e.used).map(|e| (e.key, e.value))
    }

    pub fn slot_count(&self) -> usize {
        self.cap
    }

    pub fn entry_at_slot(&self, slot: usize) -> Option<(GcRef, Value)> {
        let e = self.entries.get(slot)?;
        e.used.then_some((e.key, e.value))
    }
}

impl Default for ObjMap {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gc::GcConfig;
    use crate::heap::Heap;

    fn fresh_heap() -> Heap {
        Heap::new(GcConfig::default())
    }

    #[test]
    fn insert_then_get_returns_inserted_value() {
        let mut heap = fresh_heap();
        let k = heap.intern_string(b"hello");
        let map_ref = heap.alloc_map(ObjMap::new());
        assert!(heap.map_insert(map_ref, k, Value::number(1.0)).unwrap().is_none());
        assert_eq!(heap.map_get(map_ref, k).unwrap().unwrap().as_number(), Some(1.0));
        assert_eq!(heap.as_map(map_ref).unwrap().len(), 1);
    }

    #[test]
    fn insert_then_delete_then_lookup_not_found() {
        let mut heap = fresh_heap();
        let k = heap.intern_string(b"hello");
        let map_ref = heap.alloc_map(ObjMap::new());
        heap.map_insert(map_ref, k, Value::number(1.0)).unwrap();
        assert!(heap.map_remove(map_ref, k).unwrap().is_some());
        assert!(heap.map_get(map_ref, k).unwrap().is_none());
        assert_eq!(heap.as_map(map_ref).unwrap().len(), 0);
    }

    #[test]
    fn size_tracks_live_keys_through_churn() {
        let mut heap = fresh_heap();
        let map_ref = heap.alloc_map(ObjMap::new());
        let keys: Vec<_> = (0..50).map(|i| heap.intern_string(format!("k{i}").as_bytes())).collect();
        for (i, k) in keys.iter().enumerate() {
            heap.map_insert(map_ref, *k, Value::number(i as f64)).unwrap();
        }
        assert_eq!(heap.as_map(map_ref).unwrap().len(), 50);
        for k in keys.iter().step_by(2) {
            heap.map_remove(map_ref, *k).unwrap();
        }
        assert_eq!(heap.as_map(map_ref).unwrap().len(), 25);
        for (i, k) in keys.iter().enumerate() {
            let present = heap.map_get(map_ref, *k).unwrap().is_some();
            assert_eq!(present, i % 2 == 1, "key index {i}");
        }
    }

    #[test]
    fn grows_past_initial_capacity() {
        let mut heap = fresh_heap();
        let map_ref = heap.alloc_map(ObjMap::new());
        for i in 0..200 {
            let k = heap.intern_string(format!("key-{i}").as_bytes());
            heap.map_insert(map_ref, k, Value::number(i as f64)).unwrap();
        }
        assert_eq!(heap.as_map(map_ref).unwrap().len(), 200);
        assert!(heap.as_map(map_ref).unwrap().capacity() >= 200);
        for i in 0..200 {
            let k = heap.intern_string(format!("key-{i}").as_bytes());
            assert_eq!(heap.map_get(map_ref, k).unwrap().unwrap().as_number(), Some(i as f64));
        }
    }

    #[test]
    fn update_existing_key_returns_old_value() {
        let mut heap = fresh_heap();
        let k = heap.intern_string(b"x");
        let map_ref = heap.alloc_map(ObjMap::new());
        heap.map_insert(map_ref, k, Value::number(1.0)).unwrap();
        let old = heap.map_insert(map_ref, k, Value::number(2.0)).unwrap();
        assert_eq!(old.unwrap().as_number(), Some(1.0));
        assert_eq!(heap.as_map(map_ref).unwrap().len(), 1);
    }
}
