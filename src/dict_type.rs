//! Type descriptors: the owner-supplied operations a `Dict` runs on its keys
//! and values.
//!
//! A descriptor always provides `hash` and `compare`. The four lifecycle
//! hooks are optional capabilities with pass-through defaults:
//! - `dup_key` / `dup_value` run on every key/value before it is stored.
//!   Without them the dictionary stores exactly what it was given.
//! - `destroy_key` / `destroy_value` run when an entry is removed, when a
//!   value is overwritten, and on teardown. Without them the payload is
//!   simply dropped.
//!
//! Contract: `dup_key(k)` must compare equal to `k` and hash identically,
//! and `hash` must agree with `compare` (equal keys, equal hashes).

use crate::hash::{gen_case_hash, gen_hash, identity_hash, int_hash};
use core::hash::{BuildHasher, Hash};
use std::collections::hash_map::RandomState;

pub trait DictType<K, V> {
    fn hash(&self, key: &K) -> u64;

    fn compare(&self, a: &K, b: &K) -> bool;

    #[inline]
    fn dup_key(&self, key: K) -> K {
        key
    }

    #[inline]
    fn dup_value(&self, value: V) -> V {
        value
    }

    #[inline]
    fn destroy_key(&self, key: K) {
        drop(key);
    }

    #[inline]
    fn destroy_value(&self, value: V) {
        drop(value);
    }
}

/// Descriptor for any `K: Hash + Eq`, hashing through a `BuildHasher`.
#[derive(Clone, Debug, Default)]
pub struct DefaultType<S = RandomState> {
    hasher: S,
}

impl<S> DefaultType<S> {
    pub fn with_hasher(hasher: S) -> Self {
        Self { hasher }
    }
}

impl<K, V, S> DictType<K, V> for DefaultType<S>
where
    K: Hash + Eq,
    S: BuildHasher,
{
    #[inline]
    fn hash(&self, key: &K) -> u64 {
        self.hasher.hash_one(key)
    }

    #[inline]
    fn compare(&self, a: &K, b: &K) -> bool {
        a == b
    }
}

/// String keys hashed with the djb function and compared byte-wise.
#[derive(Clone, Copy, Debug, Default)]
pub struct StrType;

impl<K, V> DictType<K, V> for StrType
where
    K: AsRef<str>,
{
    #[inline]
    fn hash(&self, key: &K) -> u64 {
        u64::from(gen_hash(key.as_ref().as_bytes()))
    }

    #[inline]
    fn compare(&self, a: &K, b: &K) -> bool {
        a.as_ref() == b.as_ref()
    }
}

/// String keys that match regardless of ASCII case.
#[derive(Clone, Copy, Debug, Default)]
pub struct CaseFoldStrType;

impl<K, V> DictType<K, V> for CaseFoldStrType
where
    K: AsRef<str>,
{
    #[inline]
    fn hash(&self, key: &K) -> u64 {
        u64::from(gen_case_hash(key.as_ref().as_bytes()))
    }

    #[inline]
    fn compare(&self, a: &K, b: &K) -> bool {
        a.as_ref().eq_ignore_ascii_case(b.as_ref())
    }
}

/// `u32` keys mixed with Wang's integer hash.
#[derive(Clone, Copy, Debug, Default)]
pub struct IntType;

impl<V> DictType<u32, V> for IntType {
    #[inline]
    fn hash(&self, key: &u32) -> u64 {
        u64::from(int_hash(*key))
    }

    #[inline]
    fn compare(&self, a: &u32, b: &u32) -> bool {
        a == b
    }
}

/// `u32` keys used directly as their hash. Bucket placement is predictable,
/// which makes this handy for tests and dense integer ids.
#[derive(Clone, Copy, Debug, Default)]
pub struct IdentityType;

impl<V> DictType<u32, V> for IdentityType {
    #[inline]
    fn hash(&self, key: &u32) -> u64 {
        u64::from(identity_hash(*key))
    }

    #[inline]
    fn compare(&self, a: &u32, b: &u32) -> bool {
        a == b
    }
}
