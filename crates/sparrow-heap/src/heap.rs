//! The arena every heap object lives in, plus the mark-and-sweep collector
//! that walks it (§3.2, §4.D). `GcRef` is an index into this arena rather
//! than a pointer, so cyclic object graphs need no `unsafe`.

use tracing::{debug, trace};

use crate::error::{HeapError, HeapResult};
use crate::gc::{GcConfig, GcTrigger};
use crate::list::ObjList;
use crate::map::ObjMap;
use crate::object::{
    HeapObject, ObjClosure, ObjComponent, ObjIterator, ObjLoop, ObjLoopIterator, ObjMethod, ObjModule, ObjProto,
    ObjString, ObjUdata, UpvalueCell,
};
use crate::string_pool::StringPool;
use crate::value::{GcRef, Value, ValueKind};

/// Strings this long or longer bypass the intern pool entirely (§3.5).
pub const LARGE_STRING_SIZE: usize = 512;

struct Slot {
    marked: bool,
    obj: HeapObject,
}

/// Owns every heap-allocated object in a `Sparrow` instance: the arena, the
/// string pool, and the collector's adaptive trigger.
pub struct Heap {
    slots: Vec<Option<Slot>>,
    free_list: Vec<u32>,
    string_pool: StringPool,
    trigger: GcTrigger,
    live_count: usize,
    total_collections: u64,
}

impl Heap {
    pub fn new(config: GcConfig) -> Self {
        Self {
            slots: Vec::new(),
            free_list: Vec::new(),
            string_pool: StringPool::new(),
            trigger: GcTrigger::new(config),
            live_count: 0,
            total_collections: 0,
        }
    }

    fn alloc_slot(&mut self, obj: HeapObject) -> GcRef {
        self.live_count += 1;
        if let Some(index) = self.free_list.pop() {
            self.slots[index as usize] = Some(Slot { marked: false, obj });
            GcRef::from_index(index)
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Some(Slot { marked: false, obj }));
            GcRef::from_index(index)
        }
    }

    fn slot(&self, r: GcRef) -> &HeapObject {
        &self.slots[r.index()].as_ref().expect("dangling GcRef").obj
    }

    fn slot_mut(&mut self, r: GcRef) -> &mut HeapObject {
        &mut self.slots[r.index()].as_mut().expect("dangling GcRef").obj
    }

    // ---- allocation -----------------------------------------------------

    /// Interns `bytes` if short enough, otherwise allocates a unique,
    /// non-pooled string (§4.B).
    pub fn intern_string(&mut self, bytes: &[u8]) -> GcRef {
        if bytes.len() >= LARGE_STRING_SIZE {
            return self.alloc_slot(HeapObject::String(ObjString {
                bytes: bytes.to_vec().into_boxed_slice(),
                hash: StringPool::hash_bytes(bytes),
                interned: false,
            }));
        }
        let hash = StringPool::hash_bytes(bytes);
        let pool = &self.string_pool;
        let slots = &self.slots;
        if let Some(existing) = pool.find(hash, bytes, |r| {
            slots[r.index()].as_ref().expect("dangling GcRef").obj.as_string_bytes()
        }) {
            return existing;
        }
        let gc_ref = self.alloc_slot(HeapObject::String(ObjString {
            bytes: bytes.to_vec().into_boxed_slice(),
            hash,
            interned: true,
        }));
        self.string_pool.register(hash, gc_ref);
        trace!(len = bytes.len(), "interned new string");
        gc_ref
    }

    pub fn alloc_list(&mut self, list: ObjList) -> GcRef {
        self.alloc_slot(HeapObject::List(list))
    }

    pub fn alloc_map(&mut self, map: ObjMap) -> GcRef {
        self.alloc_slot(HeapObject::Map(map))
    }

    pub fn alloc_proto(&mut self, proto: ObjProto) -> GcRef {
        self.alloc_slot(HeapObject::Proto(proto))
    }

    pub fn alloc_closure(&mut self, closure: ObjClosure) -> GcRef {
        self.alloc_slot(HeapObject::Closure(closure))
    }

    pub fn alloc_method(&mut self, method: ObjMethod) -> GcRef {
        self.alloc_slot(HeapObject::Method(method))
    }

    pub fn alloc_udata(&mut self, udata: ObjUdata) -> GcRef {
        self.alloc_slot(HeapObject::Udata(udata))
    }

    pub fn alloc_iterator(&mut self, iter: ObjIterator) -> GcRef {
        self.alloc_slot(HeapObject::Iterator(iter))
    }

    pub fn alloc_module(&mut self, module: ObjModule) -> GcRef {
        self.alloc_slot(HeapObject::Module(module))
    }

    pub fn alloc_component(&mut self, component: ObjComponent) -> GcRef {
        self.alloc_slot(HeapObject::Component(component))
    }

    pub fn alloc_loop(&mut self, value: ObjLoop) -> GcRef {
        self.alloc_slot(HeapObject::Loop(value))
    }

    pub fn alloc_loop_iterator(&mut self, value: ObjLoopIterator) -> GcRef {
        self.alloc_slot(HeapObject::LoopIterator(value))
    }

    // ---- accessors --------------------------------------------------------

    pub fn get(&self, r: GcRef) -> &HeapObject {
        self.slot(r)
    }

    pub fn get_mut(&mut self, r: GcRef) -> &mut HeapObject {
        self.slot_mut(r)
    }

    pub fn type_name_of(&self, r: GcRef) -> &'static str {
        self.slot(r).type_name()
    }

    pub fn string_bytes(&self, r: GcRef) -> &[u8] {
        self.slot(r).as_string_bytes()
    }

    pub fn string_hash(&self, r: GcRef) -> u32 {
        match self.slot(r) {
            HeapObject::String(s) => s.hash(),
            other => panic!("string_hash called on a {} GcRef", other.type_name()),
        }
    }

    pub fn as_string(&self, r: GcRef) -> HeapResult<&ObjString> {
        match self.slot(r) {
            HeapObject::String(s) => Ok(s),
            other => Err(type_mismatch("string", other)),
        }
    }

    pub fn as_list(&self, r: GcRef) -> HeapResult<&ObjList> {
        match self.slot(r) {
            HeapObject::List(l) => Ok(l),
            other => Err(type_mismatch("list", other)),
        }
    }

    pub fn as_list_mut(&mut self, r: GcRef) -> HeapResult<&mut ObjList> {
        match self.slot_mut(r) {
            HeapObject::List(l) => Ok(l),
            other => Err(type_mismatch("list", other)),
        }
    }

    pub fn as_map(&self, r: GcRef) -> HeapResult<&ObjMap> {
        match self.slot(r) {
            HeapObject::Map(m) => Ok(m),
            other => Err(type_mismatch("map", other)),
        }
    }

    pub fn as_map_mut(&mut self, r: GcRef) -> HeapResult<&mut ObjMap> {
        match self.slot_mut(r) {
            HeapObject::Map(m) => Ok(m),
            other => Err(type_mismatch("map", other)),
        }
    }

    /// Looks up `key` in the Map at `map_ref`. Resolves the key's hash and
    /// bytes and the comparison closure all against `self`, which is safe
    /// here since every borrow involved is immutable.
    pub fn map_get(&self, map_ref: GcRef, key: GcRef) -> HeapResult<Option<Value>> {
        let hash = self.string_hash(key);
        let bytes = self.string_bytes(key);
        let map = self.as_map(map_ref)?;
        Ok(map.get(hash, bytes, |r| self.string_bytes(r)))
    }

    pub fn map_contains(&self, map_ref: GcRef, key: GcRef) -> HeapResult<bool> {
        Ok(self.map_get(map_ref, key)?.is_some())
    }

    /// Inserts into the Map at `map_ref`. The map is briefly swapped out
    /// for an empty placeholder so the key-resolution closure can borrow
    /// `self` immutably without aliasing the `&mut ObjMap` the insert
    /// itself needs — the arena-index equivalent of `RefCell`'s runtime
    /// borrow split, done at compile time via ownership instead.
    pub fn map_insert(&mut self, map_ref: GcRef, key: GcRef, value: Value) -> HeapResult<Option<Value>> {
        let mut map = self.take_map(map_ref)?;
        let hash = self.string_hash(key);
        let bytes = self.string_bytes(key).to_vec();
        let result = map.insert(key, hash, &bytes, value, |r| self.string_bytes(r));
        self.put_map(map_ref, map);
        Ok(result)
    }

    pub fn map_remove(&mut self, map_ref: GcRef, key: GcRef) -> HeapResult<Option<Value>> {
        let mut map = self.take_map(map_ref)?;
        let hash = self.string_hash(key);
        let bytes = self.string_bytes(key).to_vec();
        let result = map.remove(hash, &bytes, |r| self.string_bytes(r));
        self.put_map(map_ref, map);
        Ok(result)
    }

    fn take_map(&mut self, r: GcRef) -> HeapResult<ObjMap> {
        match self.slot_mut(r) {
            HeapObject::Map(m) => Ok(std::mem::take(m)),
            other => Err(type_mismatch("map", other)),
        }
    }

    fn put_map(&mut self, r: GcRef, map: ObjMap) {
        if let HeapObject::Map(slot) = self.slot_mut(r) {
            *slot = map;
        }
    }

    pub fn as_proto(&self, r: GcRef) -> HeapResult<&ObjProto> {
        match self.slot(r) {
            HeapObject::Proto(p) => Ok(p),
            other => Err(type_mismatch("proto", other)),
        }
    }

    pub fn as_closure(&self, r: GcRef) -> HeapResult<&ObjClosure> {
        match self.slot(r) {
            HeapObject::Closure(c) => Ok(c),
            other => Err(type_mismatch("closure", other)),
        }
    }

    pub fn as_closure_mut(&mut self, r: GcRef) -> HeapResult<&mut ObjClosure> {
        match self.slot_mut(r) {
            HeapObject::Closure(c) => Ok(c),
            other => Err(type_mismatch("closure", other)),
        }
    }

    pub fn as_udata(&self, r: GcRef) -> HeapResult<&ObjUdata> {
        match self.slot(r) {
            HeapObject::Udata(u) => Ok(u),
            other => Err(type_mismatch("udata", other)),
        }
    }

    pub fn as_udata_mut(&mut self, r: GcRef) -> HeapResult<&mut ObjUdata> {
        match self.slot_mut(r) {
            HeapObject::Udata(u) => Ok(u),
            other => Err(type_mismatch("udata", other)),
        }
    }

    pub fn as_method(&self, r: GcRef) -> HeapResult<&ObjMethod> {
        match self.slot(r) {
            HeapObject::Method(m) => Ok(m),
            other => Err(type_mismatch("method", other)),
        }
    }

    pub fn as_iterator(&self, r: GcRef) -> HeapResult<&ObjIterator> {
        match self.slot(r) {
            HeapObject::Iterator(it) => Ok(it),
            other => Err(type_mismatch("iterator", other)),
        }
    }

    pub fn as_iterator_mut(&mut self, r: GcRef) -> HeapResult<&mut ObjIterator> {
        match self.slot_mut(r) {
            HeapObject::Iterator(it) => Ok(it),
            other => Err(type_mismatch("iterator", other)),
        }
    }

    pub fn as_module(&self, r: GcRef) -> HeapResult<&ObjModule> {
        match self.slot(r) {
            HeapObject::Module(m) => Ok(m),
            other => Err(type_mismatch("module", other)),
        }
    }

    pub fn as_component(&self, r: GcRef) -> HeapResult<&ObjComponent> {
        match self.slot(r) {
            HeapObject::Component(c) => Ok(c),
            other => Err(type_mismatch("component", other)),
        }
    }

    pub fn as_loop(&self, r: GcRef) -> HeapResult<ObjLoop> {
        match self.slot(r) {
            HeapObject::Loop(l) => Ok(*l),
            other => Err(type_mismatch("loop", other)),
        }
    }

    pub fn live_count(&self) -> usize {
        self.live_count
    }

    pub fn total_collections(&self) -> u64 {
        self.total_collections
    }

    pub fn next_gc_threshold(&self) -> usize {
        self.trigger.next_threshold()
    }

    /// Cheap pre-check so callers can skip assembling a root set on the
    /// common path where the adaptive trigger wouldn't fire anyway.
    pub fn gc_pending(&self) -> bool {
        self.trigger.should_collect(self.live_count)
    }

    // ---- collection -------------------------------------------------------

    /// Collects if the adaptive trigger says to (§4.D). `roots` are the
    /// values the embedder currently considers reachable (VM stack slots,
    /// open upvalues, the global environment, any host-pinned udata) —
    /// `sparrow-vm` is responsible for assembling this set every time it
    /// calls in.
    pub fn maybe_collect(&mut self, roots: &[Value]) {
        if self.trigger.should_collect(self.live_count) {
            self.collect(roots);
        }
    }

    /// Forces an immediate mark-and-sweep pass regardless of the trigger.
    pub fn collect(&mut self, roots: &[Value]) {
        let before = self.live_count;
        self.mark(roots);
        self.sweep();
        self.total_collections += 1;
        self.trigger.record_collection(before, self.live_count);
        debug!(before, after = self.live_count, next_threshold = self.trigger.next_threshold(), "gc cycle complete");
    }

    fn mark(&mut self, roots: &[Value]) {
        let mut stack: Vec<GcRef> = roots.iter().filter_map(|v| v.as_heap()).collect();
        while let Some(r) = stack.pop() {
            let already = match &self.slots[r.index()] {
                Some(slot) => slot.marked,
                None => continue,
            };
            if already {
                continue;
            }
            self.slots[r.index()].as_mut().unwrap().marked = true;
            self.push_children(r, &mut stack);
        }
    }

    fn push_children(&self, r: GcRef, stack: &mut Vec<GcRef>) {
        let mut push_value = |v: Value, stack: &mut Vec<GcRef>| {
            if let ValueKind::Heap(child) = v.kind() {
                stack.push(child);
            }
        };
        match self.slot(r) {
            HeapObject::String(_) | HeapObject::Loop(_) => {}
            HeapObject::List(list) => {
                for v in list.iter() {
                    push_value(*v, stack);
                }
            }
            HeapObject::Map(map) => {
                for (key, value) in map.iter() {
                    stack.push(key);
                    push_value(value, stack);
                }
                if let Some(metaops) = &map.metaops {
                    for v in metaops.script_hooks() {
                        push_value(v, stack);
                    }
                }
            }
            HeapObject::Proto(proto) => {
                for s in &proto.strings {
                    stack.push(*s);
                }
                stack.push(proto.module);
            }
            HeapObject::Closure(closure) => {
                stack.push(closure.proto);
                for up in &closure.upvalues {
                    match up {
                        UpvalueCell::Owned(v) => push_value(*v, stack),
                        UpvalueCell::Aliased { owner, .. } => stack.push(*owner),
                    }
                }
            }
            HeapObject::Method(method) => push_value(method.receiver, stack),
            HeapObject::Udata(udata) => {
                for v in udata.mark_roots() {
                    push_value(*v, stack);
                }
                if let Some(metaops) = &udata.metaops {
                    for v in metaops.script_hooks() {
                        push_value(v, stack);
                    }
                }
            }
            HeapObject::Iterator(it) => match it {
                ObjIterator::List { target, .. }
                | ObjIterator::String { target, .. }
                | ObjIterator::Map { target, .. }
                | ObjIterator::Loop { target, .. } => stack.push(*target),
                ObjIterator::Udata { target, state } => {
                    stack.push(*target);
                    push_value(*state, stack);
                }
            },
            HeapObject::Module(module) => {
                for p in &module.protos {
                    stack.push(*p);
                }
            }
            HeapObject::Component(component) => {
                stack.push(component.module);
                stack.push(component.env);
            }
            HeapObject::LoopIterator(it) => stack.push(it.loop_ref),
        }
    }

    fn sweep(&mut self) {
        let mut freed = 0usize;
        for (index, entry) in self.slots.iter_mut().enumerate() {
            match entry {
                Some(slot) if slot.marked => slot.marked = false,
                Some(_) => {
                    *entry = None;
                    self.free_list.push(index as u32);
                    freed += 1;
                }
                None => {}
            }
        }
        self.live_count -= freed;
    }
}

impl HeapObject {
    fn as_string_bytes(&self) -> &[u8] {
        match self {
            HeapObject::String(s) => s.as_bytes(),
            other => panic!("expected string, found {}", other.type_name()),
        }
    }
}

fn type_mismatch(expected: &'static str, found: &HeapObject) -> HeapError {
    HeapError::TypeMismatch { expected, found: found.type_name() }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh() -> Heap {
        Heap::new(GcConfig::default())
    }

    #[test]
    fn interning_the_same_bytes_twice_returns_the_same_ref() {
        let mut heap = fresh();
        let a = heap.intern_string(b"hello");
        let b = heap.intern_string(b"hello");
        assert_eq!(a, b);
    }

    #[test]
    fn different_bytes_intern_to_different_refs() {
        let mut heap = fresh();
        let a = heap.intern_string(b"hello");
        let b = heap.intern_string(b"world");
        assert_ne!(a, b);
    }

    #[test]
    fn large_strings_bypass_the_pool_and_never_dedup() {
        let mut heap = fresh();
        let big = vec![b'x'; LARGE_STRING_SIZE];
        let a = heap.intern_string(&big);
        let b = heap.intern_string(&big);
        assert_ne!(a, b);
    }

    #[test]
    fn unreachable_objects_are_swept() {
        let mut heap = fresh();
        let kept = heap.intern_string(b"kept");
        let _discarded = heap.alloc_list(ObjList::new());
        assert_eq!(heap.live_count(), 2);
        heap.collect(&[Value::heap(kept)]);
        assert_eq!(heap.live_count(), 1);
        assert!(heap.as_string(kept).is_ok());
    }

    #[test]
    fn reachable_list_survives_collection() {
        let mut heap = fresh();
        let list_ref = heap.alloc_list(ObjList::new());
        let roots = vec![Value::heap(list_ref)];
        heap.collect(&roots);
        assert!(heap.as_list(list_ref).is_ok());
    }

    #[test]
    fn list_element_keeps_its_target_alive_transitively() {
        let mut heap = fresh();
        let inner = heap.alloc_list(ObjList::new());
        let mut outer_list = ObjList::new();
        outer_list.push(Value::heap(inner));
        let outer = heap.alloc_list(outer_list);
        heap.collect(&[Value::heap(outer)]);
        assert!(heap.as_list(outer).is_ok());
        assert!(heap.as_list(inner).is_ok());
    }
}
