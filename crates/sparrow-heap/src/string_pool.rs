//! Component B: the open-addressed string-interning pool (§4.B).
//!
//! Strings up to [`crate::heap::LARGE_STRING_SIZE`] bytes are interned: the
//! pool guarantees at most one live `ObjString` per distinct byte sequence,
//! so equality between two interned strings is a `GcRef` comparison. Strings
//! past the cutoff bypass the pool entirely (allocated directly, never
//! deduplicated) since hashing and comparing a long byte sequence on every
//! intern attempt isn't worth it for strings unlikely to repeat.

use crate::value::GcRef;

fn fnv1a(bytes: &[u8]) -> u32 {
    let mut hash: u32 = 0x811c_9dc5;
    for &b in bytes {
        hash ^= b as u32;
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}

struct PoolEntry {
    gc_ref: GcRef,
    hash: u32,
    /// Chain to the next entry that hashed into the same bucket (the
    /// "pool-chain" / `more` link of the original).
    next: Option<u32>,
}

/// The pool's own bookkeeping. The actual `ObjString` bytes live in the
/// shared heap arena; the pool stores only `GcRef`s plus the chain
/// structure, and callers resolve bytes via the `resolve` callback so this
/// module never needs to borrow the arena directly.
pub struct StringPool {
    buckets: Vec<Option<u32>>,
    entries: Vec<PoolEntry>,
    cap: usize,
}

impl StringPool {
    pub fn new() -> Self {
        let cap = 64;
        Self { buckets: vec![None; cap], entries: Vec::new(), cap }
    }

    pub fn hash_bytes(bytes: &[u8]) -> u32 {
        fnv1a(bytes)
    }

    fn bucket_of(&self, hash: u32) -> usize {
        (hash as usize) & (self.cap - 1)
    }

    /// Looks up `bytes` in the pool. `resolve` maps a candidate `GcRef` to
    /// its backing bytes (resolved against the arena, kept as a separate
    /// borrow from `self` by the caller) so the chain walk can compare
    /// actual content, not just hashes.
    pub fn find<'h>(&self, hash: u32, bytes: &[u8], resolve: impl Fn(GcRef) -> &'h [u8]) -> Option<GcRef> {
        let mut cur = self.buckets[self.bucket_of(hash)];
        while let Some(idx) = cur {
            let entry = &self.entries[idx as usize];
            if entry.hash == hash && resolve(entry.gc_ref) == bytes {
                return Some(entry.gc_ref);
            }
            cur = entry.next;
        }
        None
    }

    /// Registers a freshly allocated interned string. Caller guarantees
    /// `find` was already attempted and returned `None`.
    pub fn register(&mut self, hash: u32, gc_ref: GcRef) {
        if self.entries.len() >= self.cap {
            self.rehash();
        }
        let bucket = self.bucket_of(hash);
        let next = self.buckets[bucket];
        self.entries.push(PoolEntry { gc_ref, hash, next });
        self.buckets[bucket] = Some((self.entries.len() - 1) as u32);
    }

    fn rehash(&mut self) {
        self.cap *= 2;
        self.buckets = vec![None; self.cap];
        for (idx, entry) in self.entries.iter_mut().enumerate() {
            let bucket = (entry.hash as usize) & (self.cap - 1);
            entry.next = self.buckets[bucket];
            self.buckets[bucket] = Some(idx as u32);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for StringPool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_bytes_hash_identically() {
        assert_eq!(fnv1a(b"hello"), fnv1a(b"hello"));
        assert_ne!(fnv1a(b"hello"), fnv1a(b"world"));
    }

    #[test]
    fn grows_past_initial_capacity() {
        let mut pool = StringPool::new();
        for i in 0..300 {
            pool.register(fnv1a(format!("k{i}").as_bytes()), GcRef::from_index(i));
        }
        assert_eq!(pool.len(), 300);
    }
}
