//! Component I: the intrinsic function and attribute catalog (§4.I, §3.5).
//! Lives beside the interpreter rather than in its own crate because several
//! intrinsics (`sort` with a comparator, `run_string`, `import`) need to
//! call back into the interpreter — exactly the coupling the original's
//! `builtin.c` has to `vm.c`.

use std::time::{SystemTime, UNIX_EPOCH};

use sparrow_heap::{Heap, ObjList, Sparrow, Value, ValueKind};

use crate::error::{SparrowError, SparrowResult};

/// Anything that can re-enter script execution on behalf of an intrinsic —
/// implemented by the interpreter itself (§4.F.6, §4.F.9).
pub trait ScriptCaller {
    fn call_value(&mut self, sparrow: &mut Sparrow, callee: Value, args: &[Value]) -> SparrowResult<Value>;

    /// Compiles and runs `source` as a fresh module, returning its result
    /// value. Backed by whatever front end the host registers; this crate
    /// has no lexer/parser of its own.
    fn run_source(&mut self, sparrow: &mut Sparrow, source: &str) -> SparrowResult<Value>;

    /// Resolves and runs `path` as an imported module (§4.F.9).
    fn import_module(&mut self, sparrow: &mut Sparrow, path: &str) -> SparrowResult<Value>;
}

fn type_name_of(heap: &Heap, v: Value) -> &'static str {
    match v.kind() {
        ValueKind::Heap(r) => heap.type_name_of(r),
        _ => v.type_name(),
    }
}

/// The same rendering `print`/`to_string` use inside a running script,
/// exposed for hosts (the CLI's `run` command) that need to show a
/// top-level result the same way the script itself would have.
pub fn display_value(heap: &Heap, v: Value) -> String {
    to_display_string(heap, v)
}

fn to_display_string(heap: &Heap, v: Value) -> String {
    match v.kind() {
        ValueKind::Number(n) => format!("{n}"),
        ValueKind::Bool(b) => b.to_string(),
        ValueKind::Null => "null".to_string(),
        ValueKind::Heap(r) => match heap.get(r) {
            sparrow_heap::HeapObject::String(s) => s.as_str().to_string(),
            sparrow_heap::HeapObject::List(list) => {
                let parts: Vec<String> = list.iter().map(|v| to_display_string(heap, *v)).collect();
                format!("[{}]", parts.join(", "))
            }
            other => format!("<{}>", other.type_name()),
        },
    }
}

fn as_number(heap: &Heap, v: Value) -> SparrowResult<f64> {
    match v.kind() {
        ValueKind::Number(n) => Ok(n),
        ValueKind::Bool(b) => Ok(if b { 1.0 } else { 0.0 }),
        ValueKind::Heap(r) => {
            if let sparrow_heap::HeapObject::String(s) = heap.get(r) {
                s.as_str().trim().parse::<f64>().map_err(|_| {
                    SparrowError::ScriptRaised(format!("cannot convert string \"{}\" to number", s.as_str()))
                })
            } else {
                Err(SparrowError::NotCallable(heap.type_name_of(r)))
            }
        }
        ValueKind::Null => Err(SparrowError::ScriptRaised("cannot convert null to number".to_string())),
    }
}

fn size_of(heap: &Heap, v: Value) -> SparrowResult<usize> {
    match v.kind() {
        ValueKind::Heap(r) => match heap.get(r) {
            sparrow_heap::HeapObject::String(s) => Ok(s.len()),
            sparrow_heap::HeapObject::List(l) => Ok(l.len()),
            sparrow_heap::HeapObject::Map(m) => Ok(m.len()),
            other => Err(SparrowError::NotCallable(other.type_name())),
        },
        _ => Err(SparrowError::ScriptRaised(format!("{} has no size", v.type_name()))),
    }
}

/// Dispatches one of the 26 free-function intrinsics by its catalog index
/// (§3.5's `INTRINSIC_FUNCTIONS` order).
pub fn call_intrinsic(
    index: usize,
    sparrow: &mut Sparrow,
    caller: &mut dyn ScriptCaller,
    args: &[Value],
) -> SparrowResult<Value> {
    let arg = |i: usize| args.get(i).copied().unwrap_or(Value::NULL);
    match index {
        0 => Ok(intern_str(sparrow, type_name_of(sparrow.heap(), arg(0)))),
        1 => Ok(Value::bool(matches!(arg(0).kind(), ValueKind::Bool(_)))),
        2 => Ok(Value::bool(matches!(arg(0).kind(), ValueKind::Heap(r) if matches!(sparrow.heap().get(r), sparrow_heap::HeapObject::String(_))))),
        3 => Ok(Value::bool(matches!(arg(0).kind(), ValueKind::Number(_)))),
        4 => Ok(Value::bool(arg(0).is_null())),
        5 => Ok(Value::bool(matches!(arg(0).kind(), ValueKind::Heap(r) if matches!(sparrow.heap().get(r), sparrow_heap::HeapObject::List(_))))),
        6 => Ok(Value::bool(matches!(arg(0).kind(), ValueKind::Heap(r) if matches!(sparrow.heap().get(r), sparrow_heap::HeapObject::Map(_))))),
        7 => Ok(Value::bool(matches!(arg(0).kind(), ValueKind::Heap(r) if matches!(sparrow.heap().get(r), sparrow_heap::HeapObject::Closure(_))))),
        8 => Ok(intern_str(sparrow, &to_display_string(sparrow.heap(), arg(0)))),
        9 => Ok(Value::number(as_number(sparrow.heap(), arg(0))?)),
        10 => Ok(Value::bool(arg(0).truthy())),
        11 => {
            let rendered: Vec<String> = args.iter().map(|v| to_display_string(sparrow.heap(), *v)).collect();
            println!("{}", rendered.join(" "));
            Ok(Value::NULL)
        }
        12 => Err(SparrowError::ScriptRaised(to_display_string(sparrow.heap(), arg(0)))),
        13 => {
            if arg(0).truthy() {
                Ok(Value::NULL)
            } else {
                let message = args.get(1).map(|v| to_display_string(sparrow.heap(), *v));
                Err(SparrowError::AssertionFailed(message))
            }
        }
        14 => {
            let path_ref = arg(0).as_heap().ok_or(SparrowError::NotCallable("non-string"))?;
            let path = sparrow.heap().as_string(path_ref)?.as_str().to_string();
            caller.import_module(sparrow, &path)
        }
        15 => Ok(Value::number(size_of(sparrow.heap(), arg(0))? as f64)),
        16 => build_loop(sparrow, args),
        17 => build_loop(sparrow, args),
        18 => {
            let src_ref = arg(0).as_heap().ok_or(SparrowError::NotCallable("non-string"))?;
            let source = sparrow.heap().as_string(src_ref)?.as_str().to_string();
            caller.run_source(sparrow, &source)
        }
        19 => reduce_numbers(sparrow.heap(), args, f64::min),
        20 => reduce_numbers(sparrow.heap(), args, f64::max),
        21 => sort_list(sparrow, caller, args),
        22 => map_set(sparrow, args),
        23 => map_get(sparrow, args),
        24 => map_exist(sparrow, args),
        25 => Ok(Value::number(current_millis())),
        _ => unreachable!("intrinsic index out of the fixed catalog range"),
    }
}

fn intern_str(sparrow: &mut Sparrow, s: &str) -> Value {
    Value::heap(sparrow.heap_mut().intern_string(s.as_bytes()))
}

fn build_loop(sparrow: &mut Sparrow, args: &[Value]) -> SparrowResult<Value> {
    let heap = sparrow.heap();
    let nums: Vec<f64> = args.iter().map(|v| as_number(heap, *v)).collect::<SparrowResult<_>>()?;
    let (start, end, step) = match nums.as_slice() {
        [end] => (0i64, *end as i64, 1i64),
        [start, end] => (*start as i64, *end as i64, 1i64),
        [start, end, step] => (*start as i64, *end as i64, *step as i64),
        _ => return Err(SparrowError::ArityMismatch { expected: 1, got: args.len() as u32 }),
    };
    let loop_ref = sparrow.heap_mut().alloc_loop(sparrow_heap::ObjLoop { start, end, step });
    Ok(Value::heap(loop_ref))
}

fn reduce_numbers(heap: &Heap, args: &[Value], f: impl Fn(f64, f64) -> f64) -> SparrowResult<Value> {
    if args.is_empty() {
        return Err(SparrowError::ArityMismatch { expected: 1, got: 0 });
    }
    let mut acc = as_number(heap, args[0])?;
    for v in &args[1..] {
        acc = f(acc, as_number(heap, *v)?);
    }
    Ok(Value::number(acc))
}

fn sort_list(sparrow: &mut Sparrow, caller: &mut dyn ScriptCaller, args: &[Value]) -> SparrowResult<Value> {
    let list_ref = args.first().and_then(|v| v.as_heap()).ok_or(SparrowError::NotCallable("non-list"))?;
    let comparator = args.get(1).copied();
    let mut values = sparrow.heap().as_list(list_ref)?.as_slice().to_vec();
    match comparator {
        Some(cmp) => {
            // Insertion sort: the comparator is an arbitrary script
            // callable, so each comparison may itself allocate/collect;
            // a library sort requiring a `Fn` closure can't call back into
            // the interpreter this way.
            for i in 1..values.len() {
                let mut j = i;
                while j > 0 {
                    let ordering = caller.call_value(sparrow, cmp, &[values[j - 1], values[j]])?;
                    if as_number(sparrow.heap(), ordering)? <= 0.0 {
                        break;
                    }
                    values.swap(j - 1, j);
                    j -= 1;
                }
            }
        }
        None => {
            let heap = sparrow.heap();
            values.sort_by(|a, b| {
                let an = as_number(heap, *a).unwrap_or(f64::NAN);
                let bn = as_number(heap, *b).unwrap_or(f64::NAN);
                an.partial_cmp(&bn).unwrap_or(std::cmp::Ordering::Equal)
            });
        }
    }
    *sparrow.heap_mut().as_list_mut(list_ref)? = ObjList::from_values(values);
    Ok(Value::heap(list_ref))
}

fn map_set(sparrow: &mut Sparrow, args: &[Value]) -> SparrowResult<Value> {
    let map_ref = args.first().and_then(|v| v.as_heap()).ok_or(SparrowError::NotCallable("non-map"))?;
    let key_ref = args.get(1).and_then(|v| v.as_heap()).ok_or(SparrowError::NotCallable("non-string key"))?;
    let value = args.get(2).copied().unwrap_or(Value::NULL);
    sparrow.heap_mut().map_insert(map_ref, key_ref, value)?;
    Ok(value)
}

fn map_get(sparrow: &mut Sparrow, args: &[Value]) -> SparrowResult<Value> {
    let map_ref = args.first().and_then(|v| v.as_heap()).ok_or(SparrowError::NotCallable("non-map"))?;
    let key_ref = args.get(1).and_then(|v| v.as_heap()).ok_or(SparrowError::NotCallable("non-string key"))?;
    Ok(sparrow.heap().map_get(map_ref, key_ref)?.unwrap_or(Value::NULL))
}

fn map_exist(sparrow: &mut Sparrow, args: &[Value]) -> SparrowResult<Value> {
    let map_ref = args.first().and_then(|v| v.as_heap()).ok_or(SparrowError::NotCallable("non-map"))?;
    let key_ref = args.get(1).and_then(|v| v.as_heap()).ok_or(SparrowError::NotCallable("non-string key"))?;
    Ok(Value::bool(sparrow.heap().map_contains(map_ref, key_ref)?))
}

fn current_millis() -> f64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as f64).unwrap_or(0.0)
}

/// The 9 intrinsic attributes (`.push(...)`, `.size()`, ...), callable on
/// List and Map receivers via `AGETI`/method-call syntax.
pub fn call_intrinsic_attribute(
    index: usize,
    heap: &mut Heap,
    receiver: Value,
    args: &[Value],
) -> SparrowResult<Value> {
    let receiver_ref = receiver.as_heap().ok_or(SparrowError::NotCallable(receiver.type_name()))?;
    match index {
        0 => {
            let other_ref = args.first().and_then(|v| v.as_heap()).ok_or(SparrowError::NotCallable("non-list"))?;
            let other = heap.as_list(other_ref)?.clone();
            heap.as_list_mut(receiver_ref)?.extend(&other);
            Ok(receiver)
        }
        1 => {
            heap.as_list_mut(receiver_ref)?.push(args.first().copied().unwrap_or(Value::NULL));
            Ok(receiver)
        }
        2 => Ok(heap.as_list_mut(receiver_ref)?.pop().unwrap_or(Value::NULL)),
        3 => Ok(Value::number(heap.as_list(receiver_ref)?.len() as f64)),
        4 => {
            let new_len = args.first().and_then(|v| v.as_number()).unwrap_or(0.0) as usize;
            heap.as_list_mut(receiver_ref)?.resize(new_len);
            Ok(receiver)
        }
        5 => Ok(Value::bool(heap.as_list(receiver_ref)?.is_empty())),
        6 => {
            heap.as_list_mut(receiver_ref)?.clear();
            Ok(receiver)
        }
        7 => {
            let start = args.first().and_then(|v| v.as_number()).unwrap_or(0.0) as i64;
            let end = args.get(1).and_then(|v| v.as_number()).unwrap_or(heap.as_list(receiver_ref)?.len() as f64) as i64;
            let sliced = heap.as_list(receiver_ref)?.slice(start, end)?;
            Ok(Value::heap(heap.alloc_list(sliced)))
        }
        8 => {
            let key_ref = args.first().and_then(|v| v.as_heap()).ok_or(SparrowError::NotCallable("non-string key"))?;
            Ok(Value::bool(heap.map_contains(receiver_ref, key_ref)?))
        }
        _ => unreachable!("intrinsic attribute index out of the fixed catalog range"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sparrow_heap::GcConfig;

    struct NoCallback;
    impl ScriptCaller for NoCallback {
        fn call_value(&mut self, _sparrow: &mut Sparrow, _callee: Value, _args: &[Value]) -> SparrowResult<Value> {
            Err(SparrowError::NotCallable("no caller registered"))
        }
        fn run_source(&mut self, _sparrow: &mut Sparrow, _source: &str) -> SparrowResult<Value> {
            Err(SparrowError::NotCallable("no caller registered"))
        }
        fn import_module(&mut self, _sparrow: &mut Sparrow, _path: &str) -> SparrowResult<Value> {
            Err(SparrowError::NotCallable("no caller registered"))
        }
    }

    fn fresh() -> Sparrow {
        Sparrow::new(GcConfig::default())
    }

    #[test]
    fn typeof_reports_number() {
        let mut sparrow = fresh();
        let mut caller = NoCallback;
        let result = call_intrinsic(0, &mut sparrow, &mut caller, &[Value::number(1.0)]).unwrap();
        let name_ref = result.as_heap().unwrap();
        assert_eq!(sparrow.heap().string_bytes(name_ref), b"number");
    }

    #[test]
    fn is_list_distinguishes_lists_from_maps() {
        let mut sparrow = fresh();
        let mut caller = NoCallback;
        let list_ref = sparrow.heap_mut().alloc_list(ObjList::new());
        let map_ref = sparrow.heap_mut().alloc_map(sparrow_heap::ObjMap::new());
        assert!(call_intrinsic(5, &mut sparrow, &mut caller, &[Value::heap(list_ref)]).unwrap().truthy());
        assert!(!call_intrinsic(5, &mut sparrow, &mut caller, &[Value::heap(map_ref)]).unwrap().truthy());
    }

    #[test]
    fn assert_raises_with_message_on_falsy_condition() {
        let mut sparrow = fresh();
        let mut caller = NoCallback;
        let msg = Value::heap(sparrow.heap_mut().intern_string(b"bad state"));
        let err = call_intrinsic(13, &mut sparrow, &mut caller, &[Value::FALSE, msg]).unwrap_err();
        assert!(matches!(err, SparrowError::AssertionFailed(Some(_))));
    }

    #[test]
    fn min_and_max_reduce_across_all_arguments() {
        let mut sparrow = fresh();
        let mut caller = NoCallback;
        let args = [Value::number(3.0), Value::number(1.0), Value::number(2.0)];
        assert_eq!(call_intrinsic(19, &mut sparrow, &mut caller, &args).unwrap().as_number(), Some(1.0));
        assert_eq!(call_intrinsic(20, &mut sparrow, &mut caller, &args).unwrap().as_number(), Some(3.0));
    }

    #[test]
    fn sort_without_comparator_orders_numbers_ascending() {
        let mut sparrow = fresh();
        let mut caller = NoCallback;
        let list_ref = sparrow.heap_mut().alloc_list(ObjList::from_values(vec![
            Value::number(3.0),
            Value::number(1.0),
            Value::number(2.0),
        ]));
        call_intrinsic(21, &mut sparrow, &mut caller, &[Value::heap(list_ref)]).unwrap();
        let sorted = sparrow.heap().as_list(list_ref).unwrap();
        assert_eq!(sorted.get(0).unwrap().as_number(), Some(1.0));
        assert_eq!(sorted.get(2).unwrap().as_number(), Some(3.0));
    }

    #[test]
    fn list_push_and_pop_attributes_round_trip() {
        let mut sparrow = fresh();
        let list_ref = sparrow.heap_mut().alloc_list(ObjList::new());
        call_intrinsic_attribute(1, sparrow.heap_mut(), Value::heap(list_ref), &[Value::number(9.0)]).unwrap();
        assert_eq!(sparrow.heap().as_list(list_ref).unwrap().len(), 1);
        let popped = call_intrinsic_attribute(2, sparrow.heap_mut(), Value::heap(list_ref), &[]).unwrap();
        assert_eq!(popped.as_number(), Some(9.0));
    }
}
