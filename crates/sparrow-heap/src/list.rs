//! Component C: the ordered-sequence half of the collection primitives.

use crate::error::{HeapError, HeapResult};
use crate::value::Value;

const INITIAL_CAPACITY: usize = 2;

/// A growable ordered sequence of [`Value`]s. Growth doubles capacity
/// starting from 2, matching the original's amplified-doubling scheme.
#[derive(Debug, Clone, Default)]
pub struct ObjList {
    arr: Vec<Value>,
}

impl ObjList {
    pub fn new() -> Self {
        Self { arr: Vec::new() }
    }

    pub fn with_capacity(cap: usize) -> Self {
        Self { arr: Vec::with_capacity(cap) }
    }

    pub fn from_values(values: Vec<Value>) -> Self {
        Self { arr: values }
    }

    pub fn len(&self) -> usize {
        self.arr.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arr.is_empty()
    }

    pub fn as_slice(&self) -> &[Value] {
        &self.arr
    }

    fn grown_capacity(&self) -> usize {
        if self.arr.capacity() == 0 {
            INITIAL_CAPACITY
        } else {
            self.arr.capacity() * 2
        }
    }

    pub fn push(&mut self, value: Value) {
        if self.arr.len() == self.arr.capacity() {
            self.arr.reserve(self.grown_capacity() - self.arr.len());
        }
        self.arr.push(value);
    }

    pub fn pop(&mut self) -> Option<Value> {
        self.arr.pop()
    }

    pub fn get(&self, index: i64) -> HeapResult<Value> {
        if index < 0 || index as usize >= self.arr.len() {
            return Err(HeapError::IndexOutOfRange { index, size: self.arr.len() });
        }
        Ok(self.arr[index as usize])
    }

    /// Assigns `value` at `index`, auto-extending with `Null` if `index` is
    /// past the current length (§4.C).
    pub fn set(&mut self, index: i64, value: Value) -> HeapResult<()> {
        if index < 0 {
            return Err(HeapError::IndexOutOfRange { index, size: self.arr.len() });
        }
        let index = index as usize;
        if index >= self.arr.len() {
            self.arr.resize(index + 1, Value::NULL);
        }
        self.arr[index] = value;
        Ok(())
    }

    /// Appends every element of `other` — O(n+m).
    pub fn extend(&mut self, other: &ObjList) {
        self.arr.extend_from_slice(&other.arr);
    }

    /// Truncates or Null-fills to exactly `new_len` elements.
    pub fn resize(&mut self, new_len: usize) {
        self.arr.resize(new_len, Value::NULL);
    }

    pub fn clear(&mut self) {
        self.arr.clear();
    }

    /// Produces a fresh `ObjList` containing a copy of `self[start..end]`
    /// (Values are `Copy`, so this is a shallow slice, matching "shared
    /// Value copies").
    pub fn slice(&self, start: i64, end: i64) -> HeapResult<ObjList> {
        if start < 0 || end < start || end as usize > self.arr.len() {
            return Err(HeapError::IndexOutOfRange { index: end, size: self.arr.len() });
        }
        Ok(ObjList { arr: self.arr[start as usize..end as usize].to_vec() })
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Value> {
        self.arr.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_then_get() {
        let mut l = ObjList::new();
        l.push(Value::number(1.0));
        l.push(Value::number(2.0));
        assert_eq!(l.get(0).unwrap().as_number(), Some(1.0));
        assert_eq!(l.get(1).unwrap().as_number(), Some(2.0));
        assert_eq!(l.len(), 2);
    }

    #[test]
    fn out_of_bounds_get_errors() {
        let l = ObjList::new();
        assert!(l.get(0).is_err());
    }

    #[test]
    fn set_past_end_fills_with_null() {
        let mut l = ObjList::new();
        l.set(2, Value::number(5.0)).unwrap();
        assert_eq!(l.len(), 3);
        assert!(l.get(0).unwrap().is_null());
        assert!(l.get(1).unwrap().is_null());
        assert_eq!(l.get(2).unwrap().as_number(), Some(5.0));
    }

    #[test]
    fn extend_appends_all_elements() {
        let mut a = ObjList::from_values(vec![Value::number(1.0)]);
        let b = ObjList::from_values(vec![Value::number(2.0), Value::number(3.0)]);
        a.extend(&b);
        assert_eq!(a.len(), 3);
    }

    #[test]
    fn resize_truncates_and_fills() {
        let mut l = ObjList::from_values(vec![Value::number(1.0), Value::number(2.0)]);
        l.resize(1);
        assert_eq!(l.len(), 1);
        l.resize(3);
        assert_eq!(l.len(), 3);
        assert!(l.get(2).unwrap().is_null());
    }

    #[test]
    fn slice_produces_fresh_list() {
        let l = ObjList::from_values(vec![Value::number(1.0), Value::number(2.0), Value::number(3.0)]);
        let s = l.slice(1, 3).unwrap();
        assert_eq!(s.len(), 2);
        assert_eq!(s.get(0).unwrap().as_number(), Some(2.0));
    }
}
