//! Hash functions used by the built-in dictionary types.
//!
//! All functions are pure and produce 32-bit values; descriptors widen them
//! to `u64` when handing them to the dictionary.

use core::hash::{BuildHasher, Hasher};

const DJB_SEED: u32 = 5381;

/// Thomas Wang's 32 bit mix function.
#[inline]
pub fn int_hash(key: u32) -> u32 {
    let mut key = key;
    key = key.wrapping_add(!(key << 15));
    key ^= key >> 10;
    key = key.wrapping_add(key << 3);
    key ^= key >> 6;
    key = key.wrapping_add(!(key << 11));
    key ^= key >> 16;
    key
}

/// Identity hash for integer keys.
#[inline]
pub fn identity_hash(key: u32) -> u32 {
    key
}

/// Bernstein's djb hash (`hash * 33 + byte`).
#[inline]
pub fn gen_hash(buf: &[u8]) -> u32 {
    buf.iter().fold(DJB_SEED, |hash, &b| djb_step(hash, b))
}

/// Case-insensitive djb hash; ASCII letters are folded to lower case.
#[inline]
pub fn gen_case_hash(buf: &[u8]) -> u32 {
    buf.iter()
        .fold(DJB_SEED, |hash, &b| djb_step(hash, b.to_ascii_lowercase()))
}

#[inline]
fn djb_step(hash: u32, b: u8) -> u32 {
    (hash << 5).wrapping_add(hash).wrapping_add(u32::from(b))
}

/// `Hasher` adapter over the djb function, so `Hash` types can be routed
/// through it (e.g. as the `S` of `DefaultType<S>`).
///
/// Integer writes use the default `Hasher` encoding (native-endian bytes).
#[derive(Clone, Copy, Debug)]
pub struct DjbHasher {
    state: u32,
}

impl Default for DjbHasher {
    fn default() -> Self {
        Self { state: DJB_SEED }
    }
}

impl Hasher for DjbHasher {
    #[inline]
    fn write(&mut self, bytes: &[u8]) {
        self.state = bytes.iter().fold(self.state, |hash, &b| djb_step(hash, b));
    }

    #[inline]
    fn finish(&self) -> u64 {
        u64::from(self.state)
    }
}

/// Deterministic `BuildHasher` producing [`DjbHasher`]s.
#[derive(Clone, Copy, Debug, Default)]
pub struct DjbBuildHasher;

impl BuildHasher for DjbBuildHasher {
    type Hasher = DjbHasher;

    fn build_hasher(&self) -> Self::Hasher {
        DjbHasher::default()
    }
}
