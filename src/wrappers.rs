//! String-keyed dictionaries for the common "name -> thing" case.
//!
//! Both copy the name into the dictionary on insert and look names up by
//! `&str` without allocating. `insert` overwrites an existing name.

use crate::dict::Dict;
use crate::dict_type::StrType;
use crate::hash::gen_hash;

#[inline]
fn name_hash(name: &str) -> u64 {
    u64::from(gen_hash(name.as_bytes()))
}

/// Names map to borrowed values the dictionary does not own.
pub struct RefDictionary<'v, V> {
    dict: Dict<Box<str>, &'v V, StrType>,
}

impl<'v, V> RefDictionary<'v, V> {
    pub fn new() -> Self {
        Self {
            dict: Dict::with_type(StrType),
        }
    }

    pub fn len(&self) -> usize {
        self.dict.len()
    }
    pub fn is_empty(&self) -> bool {
        self.dict.is_empty()
    }

    /// Returns `true` if `name` was not present before.
    pub fn insert(&mut self, name: &str, value: &'v V) -> bool {
        self.dict.upsert(Box::from(name), value)
    }

    pub fn find(&mut self, name: &str) -> Option<&'v V> {
        let h = self.dict.find_hashed(name_hash(name), |k| &**k == name)?;
        h.value(&self.dict).copied()
    }

    /// Returns `true` if `name` was present.
    pub fn erase(&mut self, name: &str) -> bool {
        self.dict
            .remove_hashed(name_hash(name), |k| &**k == name)
            .is_ok()
    }
}

impl<'v, V> Default for RefDictionary<'v, V> {
    fn default() -> Self {
        Self::new()
    }
}

/// Names map to values cloned into the dictionary.
pub struct CopyDictionary<V> {
    dict: Dict<Box<str>, V, StrType>,
}

impl<V: Clone> CopyDictionary<V> {
    pub fn new() -> Self {
        Self {
            dict: Dict::with_type(StrType),
        }
    }

    pub fn len(&self) -> usize {
        self.dict.len()
    }
    pub fn is_empty(&self) -> bool {
        self.dict.is_empty()
    }

    /// Returns `true` if `name` was not present before.
    pub fn insert(&mut self, name: &str, value: &V) -> bool {
        self.dict.upsert(Box::from(name), value.clone())
    }

    pub fn find(&mut self, name: &str) -> Option<&V> {
        let h = self.dict.find_hashed(name_hash(name), |k| &**k == name)?;
        h.value(&self.dict)
    }

    pub fn find_mut(&mut self, name: &str) -> Option<&mut V> {
        let h = self.dict.find_hashed(name_hash(name), |k| &**k == name)?;
        h.value_mut(&mut self.dict)
    }

    /// Returns `true` if `name` was present.
    pub fn erase(&mut self, name: &str) -> bool {
        self.dict
            .remove_hashed(name_hash(name), |k| &**k == name)
            .is_ok()
    }
}

impl<V: Clone> Default for CopyDictionary<V> {
    fn default() -> Self {
        Self::new()
    }
}
