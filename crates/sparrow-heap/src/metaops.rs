//! The per-object capability vector (§3.2, §4.F.5) that lets a `Map` or
//! `Udata` customize interpreter semantics: attribute get/set, hashing,
//! iteration, printing, and the three `to_*` coercions.
//!
//! A hook is either a script-level callable (`Value`, expected to be a
//! `Closure` or `Method` — invoked by `sparrow-vm`, which has the calling
//! convention) or a host-provided native closure operating directly on the
//! heap. Unlike the original C implementation, which can register both a
//! script hook and a native fallback for the same slot (preferring the
//! script one), this is modeled as one `Hook` per slot: a host registers
//! either a script-level callable or a native closure for a given
//! operation, not both. Real registrations never need both at once.

use crate::error::HeapResult;
use crate::heap::Heap;
use crate::value::Value;

pub type NativeHook = Box<dyn FnMut(&mut Heap, Value, &[Value]) -> HeapResult<Value>>;

pub enum Hook {
    Script(Value),
    Native(NativeHook),
}

#[derive(Default)]
pub struct MetaOps {
    pub get: Option<Hook>,
    pub set: Option<Hook>,
    pub geti: Option<Hook>,
    pub seti: Option<Hook>,
    pub hash: Option<Hook>,
    pub key: Option<Hook>,
    pub exist: Option<Hook>,
    pub size: Option<Hook>,
    pub iter: Option<Hook>,
    pub print: Option<Hook>,
    pub to_str: Option<Hook>,
    pub to_boolean: Option<Hook>,
    pub to_number: Option<Hook>,
}

impl MetaOps {
    pub fn new() -> Self {
        Self::default()
    }

    /// The script-level callables registered across every slot — these are
    /// `Value`s the GC must keep reachable; `Hook::Native` closures carry no
    /// `Value` and contribute nothing here.
    pub fn script_hooks(&self) -> impl Iterator<Item = Value> + '_ {
        [
            &self.get, &self.set, &self.geti, &self.seti, &self.hash, &self.key, &self.exist, &self.size,
            &self.iter, &self.print, &self.to_str, &self.to_boolean, &self.to_number,
        ]
        .into_iter()
        .filter_map(|slot| match slot {
            Some(Hook::Script(v)) => Some(*v),
            _ => None,
        })
    }
}

impl std::fmt::Debug for MetaOps {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetaOps")
            .field("get", &self.get.is_some())
            .field("set", &self.set.is_some())
            .field("geti", &self.geti.is_some())
            .field("seti", &self.seti.is_some())
            .field("hash", &self.hash.is_some())
            .field("key", &self.key.is_some())
            .field("exist", &self.exist.is_some())
            .field("size", &self.size.is_some())
            .field("iter", &self.iter.is_some())
            .field("print", &self.print.is_some())
            .field("to_str", &self.to_str.is_some())
            .field("to_boolean", &self.to_boolean.is_some())
            .field("to_number", &self.to_number.is_some())
            .finish()
    }
}
