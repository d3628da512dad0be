//! Bucket tables: power-of-two arrays of chain heads.
//!
//! Entries live in the dictionary's arena; a table only stores the arena key
//! of each chain head. The dictionary owns all relinking.

use crate::config::INITIAL_SIZE;
use slotmap::DefaultKey;

/// Largest bucket count a table may request.
pub const MAX_TABLE_SIZE: usize = 1 << (usize::BITS - 1);

/// Smallest power of two `>= size`, never below `INITIAL_SIZE`, saturating at
/// `MAX_TABLE_SIZE`.
pub fn next_power(size: usize) -> usize {
    if size >= MAX_TABLE_SIZE {
        return MAX_TABLE_SIZE;
    }
    size.max(INITIAL_SIZE).next_power_of_two()
}

#[derive(Debug, Default)]
pub(crate) struct BucketTable {
    heads: Vec<Option<DefaultKey>>,
    sizemask: usize,
    pub(crate) used: usize,
}

impl BucketTable {
    /// A table with no storage; it accepts no entries.
    pub(crate) const fn unallocated() -> Self {
        Self {
            heads: Vec::new(),
            sizemask: 0,
            used: 0,
        }
    }

    /// Allocate `next_power(capacity)` empty buckets.
    ///
    /// A table without storage cannot make progress, so allocation failure
    /// aborts the process instead of returning a partial table.
    pub(crate) fn allocate(capacity: usize) -> Self {
        let size = next_power(capacity);
        let mut heads = Vec::new();
        if let Err(err) = heads.try_reserve_exact(size) {
            tracing::error!(size, %err, "out of memory allocating bucket table");
            std::process::abort();
        }
        heads.resize(size, None);
        Self {
            heads,
            sizemask: size - 1,
            used: 0,
        }
    }

    #[inline]
    pub(crate) fn size(&self) -> usize {
        self.heads.len()
    }

    #[inline]
    pub(crate) fn is_allocated(&self) -> bool {
        !self.heads.is_empty()
    }

    #[inline]
    pub(crate) fn bucket_index(&self, hash: u64) -> usize {
        (hash as usize) & self.sizemask
    }

    #[inline]
    pub(crate) fn head(&self, index: usize) -> Option<DefaultKey> {
        self.heads.get(index).copied().flatten()
    }

    #[inline]
    pub(crate) fn set_head(&mut self, index: usize, head: Option<DefaultKey>) {
        self.heads[index] = head;
    }

    #[inline]
    pub(crate) fn take_head(&mut self, index: usize) -> Option<DefaultKey> {
        self.heads[index].take()
    }

    /// Logical size of the bucket array, as reported to allocation hooks.
    pub(crate) fn bytes(&self) -> usize {
        self.size() * core::mem::size_of::<Option<DefaultKey>>()
    }
}

/// The dictionary's table state. Rehashing is representable only when both
/// tables exist.
#[derive(Debug)]
pub(crate) enum Tables {
    Single(BucketTable),
    Rehashing {
        old: BucketTable,
        new: BucketTable,
        /// Next bucket of `old` to migrate.
        cursor: usize,
    },
}

impl Default for Tables {
    fn default() -> Self {
        Tables::Single(BucketTable::unallocated())
    }
}

impl Tables {
    #[inline]
    pub(crate) fn is_rehashing(&self) -> bool {
        matches!(self, Tables::Rehashing { .. })
    }

    /// Table 0: the only table, or the one being drained.
    #[inline]
    pub(crate) fn primary(&self) -> &BucketTable {
        match self {
            Tables::Single(t) => t,
            Tables::Rehashing { old, .. } => old,
        }
    }

    /// Number of live tables (1 or 2).
    #[inline]
    pub(crate) fn count(&self) -> usize {
        if self.is_rehashing() {
            2
        } else {
            1
        }
    }

    #[inline]
    pub(crate) fn get(&self, table: usize) -> Option<&BucketTable> {
        match (self, table) {
            (Tables::Single(t), 0) => Some(t),
            (Tables::Rehashing { old, .. }, 0) => Some(old),
            (Tables::Rehashing { new, .. }, 1) => Some(new),
            _ => None,
        }
    }

    #[inline]
    pub(crate) fn get_mut(&mut self, table: usize) -> Option<&mut BucketTable> {
        match (self, table) {
            (Tables::Single(t), 0) => Some(t),
            (Tables::Rehashing { old, .. }, 0) => Some(old),
            (Tables::Rehashing { new, .. }, 1) => Some(new),
            _ => None,
        }
    }

    /// Table that receives new entries: table 1 while rehashing.
    #[inline]
    pub(crate) fn write_table_mut(&mut self) -> &mut BucketTable {
        match self {
            Tables::Single(t) => t,
            Tables::Rehashing { new, .. } => new,
        }
    }

    pub(crate) fn rehash_index(&self) -> Option<usize> {
        match self {
            Tables::Single(_) => None,
            Tables::Rehashing { cursor, .. } => Some(*cursor),
        }
    }

    pub(crate) fn used(&self) -> usize {
        match self {
            Tables::Single(t) => t.used,
            Tables::Rehashing { old, new, .. } => old.used + new.used,
        }
    }

    pub(crate) fn into_tables(self) -> impl Iterator<Item = BucketTable> {
        let (first, second) = match self {
            Tables::Single(t) => (t, None),
            Tables::Rehashing { old, new, .. } => (old, Some(new)),
        };
        core::iter::once(first).chain(second)
    }
}
