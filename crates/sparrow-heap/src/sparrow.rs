//! [`Sparrow`]: the top-level instance tying together the heap, the global
//! environment, the module ring, and the pre-interned intrinsic name table
//! (§3.2, §3.5). `sparrow-vm` builds one `Sparrow` per independently
//! executing script and drives it through `CallThread`/`Runtime`.

use crate::gc::GcConfig;
use crate::heap::Heap;
use crate::map::ObjMap;
use crate::object::ObjModule;
use crate::value::{GcRef, Value};

/// The full intrinsic-function catalog (§3.5), in the fixed order the
/// pre-interned name table is built in.
pub const INTRINSIC_FUNCTIONS: &[&str] = &[
    "typeof",
    "is_boolean",
    "is_string",
    "is_number",
    "is_null",
    "is_list",
    "is_map",
    "is_closure",
    "to_string",
    "to_number",
    "to_boolean",
    "print",
    "error",
    "assert",
    "import",
    "size",
    "range",
    "loop",
    "run_string",
    "min",
    "max",
    "sort",
    "set",
    "get",
    "exist",
    "msec",
];

/// The intrinsic-attribute catalog (§3.5) — methods callable on List/Map
/// values via `.name(...)` syntax, distinct from the free-function
/// intrinsics above.
pub const INTRINSIC_ATTRIBUTES: &[&str] =
    &["extend", "push", "pop", "size", "resize", "empty", "clear", "slice", "exist"];

/// Owns a heap, its global environment, the ring of loaded modules, and the
/// pre-interned names every intrinsic lookup resolves against without
/// re-hashing a string literal on every call.
pub struct Sparrow {
    heap: Heap,
    global_env: GcRef,
    module_head: Option<GcRef>,
    intrinsic_names: Vec<GcRef>,
    intrinsic_attr_names: Vec<GcRef>,
}

impl Sparrow {
    pub fn new(gc_config: GcConfig) -> Self {
        let mut heap = Heap::new(gc_config);
        let global_env = heap.alloc_map(ObjMap::new());
        let intrinsic_names = INTRINSIC_FUNCTIONS.iter().map(|name| heap.intern_string(name.as_bytes())).collect();
        let intrinsic_attr_names =
            INTRINSIC_ATTRIBUTES.iter().map(|name| heap.intern_string(name.as_bytes())).collect();
        Self { heap, global_env, module_head: None, intrinsic_names, intrinsic_attr_names }
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn heap_mut(&mut self) -> &mut Heap {
        &mut self.heap
    }

    pub fn global_env(&self) -> GcRef {
        self.global_env
    }

    /// Looks up a global by interned name, following the `MetaOps`-free
    /// path (globals are a plain `Map`, not a user-overridable object).
    pub fn get_global(&self, name: GcRef) -> Option<Value> {
        self.heap.map_get(self.global_env, name).ok().flatten()
    }

    pub fn set_global(&mut self, name: GcRef, value: Value) {
        self.heap
            .map_insert(self.global_env, name, value)
            .expect("global environment is always a live Map");
    }

    pub fn module_head(&self) -> Option<GcRef> {
        self.module_head
    }

    /// Pushes `module` onto the front of the module ring (§3.2).
    pub fn register_module(&mut self, mut module: ObjModule) -> GcRef {
        module.next = self.module_head;
        module.prev = None;
        let gc_ref = self.heap.alloc_module(module);
        self.module_head = Some(gc_ref);
        gc_ref
    }

    pub fn intrinsic_name(&self, index: usize) -> GcRef {
        self.intrinsic_names[index]
    }

    pub fn intrinsic_attr_name(&self, index: usize) -> GcRef {
        self.intrinsic_attr_names[index]
    }

    /// Roots the embedder must always include when calling
    /// [`Heap::collect`] / [`Heap::maybe_collect`]: the global environment
    /// and every loaded module, plus the pre-interned intrinsic names
    /// (interned strings participate in GC like any other heap object, so
    /// they must stay reachable for the program's whole lifetime).
    pub fn permanent_roots(&self) -> Vec<Value> {
        let mut roots = vec![Value::heap(self.global_env)];
        roots.extend(self.intrinsic_names.iter().map(|r| Value::heap(*r)));
        roots.extend(self.intrinsic_attr_names.iter().map(|r| Value::heap(*r)));
        let mut cur = self.module_head;
        while let Some(m) = cur {
            roots.push(Value::heap(m));
            cur = self.heap.as_module(m).ok().and_then(|module| module.next);
        }
        roots
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intrinsic_names_are_preinterned_in_catalog_order() {
        let sparrow = Sparrow::new(GcConfig::default());
        let first = sparrow.intrinsic_name(0);
        assert_eq!(sparrow.heap().string_bytes(first), b"typeof");
        let last = sparrow.intrinsic_name(INTRINSIC_FUNCTIONS.len() - 1);
        assert_eq!(sparrow.heap().string_bytes(last), b"msec");
    }

    #[test]
    fn globals_round_trip_through_the_global_map() {
        let mut sparrow = Sparrow::new(GcConfig::default());
        let key = sparrow.heap_mut().intern_string(b"answer");
        assert!(sparrow.get_global(key).is_none());
        sparrow.set_global(key, Value::number(42.0));
        assert_eq!(sparrow.get_global(key).unwrap().as_number(), Some(42.0));
    }

    #[test]
    fn registered_modules_form_a_ring_with_the_newest_at_the_head() {
        let mut sparrow = Sparrow::new(GcConfig::default());
        let first = sparrow.register_module(ObjModule { protos: vec![], source_path: "a.sp".into(), prev: None, next: None });
        let second = sparrow.register_module(ObjModule { protos: vec![], source_path: "b.sp".into(), prev: None, next: None });
        assert_eq!(sparrow.module_head(), Some(second));
        assert_eq!(sparrow.heap().as_module(second).unwrap().next, Some(first));
    }
}
