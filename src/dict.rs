//! Dict: chained hash dictionary with incremental rehashing.
//!
//! Entries live in a generational arena; bucket chains link entries by arena
//! key, so rehashing relinks entries without moving them and `Handle`s stay
//! valid until their entry is removed.

use crate::config::{DictConfig, ResizePolicy, INITIAL_SIZE, REHASH_BATCH};
use crate::dict_type::{DefaultType, DictType};
use crate::error::{DictError, ResizeRejection};
use crate::hash::DjbHasher;
use crate::iter::{DictIterator, Iter};
use crate::stats::{DictStats, TableStats};
use crate::table::{BucketTable, Tables};
use core::hash::{Hash, Hasher};
use core::mem;
use rand::Rng;
use slotmap::{DefaultKey, SlotMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

static NEXT_DICT_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct Handle(DefaultKey);

impl Handle {
    pub(crate) fn new(k: DefaultKey) -> Self {
        Handle(k)
    }
    pub(crate) fn raw_handle(&self) -> DefaultKey {
        self.0
    }

    pub fn key<'a, K, V, T>(&self, dict: &'a Dict<K, V, T>) -> Option<&'a K>
    where
        T: DictType<K, V>,
    {
        dict.handle_key(*self)
    }

    pub fn value<'a, K, V, T>(&self, dict: &'a Dict<K, V, T>) -> Option<&'a V>
    where
        T: DictType<K, V>,
    {
        dict.handle_value(*self)
    }

    pub fn value_mut<'a, K, V, T>(&self, dict: &'a mut Dict<K, V, T>) -> Option<&'a mut V>
    where
        T: DictType<K, V>,
    {
        dict.handle_value_mut(*self)
    }
}

#[derive(Debug)]
pub(crate) struct Entry<K, V> {
    pub(crate) key: K,
    pub(crate) value: V,
    pub(crate) next: Option<DefaultKey>,
}

/// Outcome of the shared insert path.
enum Added<V> {
    Inserted(DefaultKey),
    Exists(DefaultKey, V),
}

pub struct Dict<K, V, T = DefaultType>
where
    T: DictType<K, V>,
{
    dict_type: T,
    pub(crate) slots: SlotMap<DefaultKey, Entry<K, V>>, // entry arena
    pub(crate) tables: Tables,
    pub(crate) safe_iterators: usize,
    // Bumped whenever table 0 is replaced; safe cursors rescan on change.
    pub(crate) layout_epoch: u64,
    id: u64,
    config: DictConfig,
}

impl<K, V> Dict<K, V>
where
    K: Eq + Hash,
{
    pub fn new() -> Self {
        Self::with_type(DefaultType::default())
    }

    pub fn with_config(config: DictConfig) -> Self {
        Self::with_type_and_config(DefaultType::default(), config)
    }
}

impl<K, V> Default for Dict<K, V>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, T> Dict<K, V, T>
where
    T: DictType<K, V>,
{
    pub fn with_type(dict_type: T) -> Self {
        Self::with_type_and_config(dict_type, DictConfig::default())
    }

    pub fn with_type_and_config(dict_type: T, config: DictConfig) -> Self {
        Self {
            dict_type,
            slots: SlotMap::with_key(),
            tables: Tables::default(),
            safe_iterators: 0,
            layout_epoch: 0,
            id: NEXT_DICT_ID.fetch_add(1, Ordering::Relaxed),
            config,
        }
    }

    pub fn len(&self) -> usize {
        self.tables.used()
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_rehashing(&self) -> bool {
        self.tables.is_rehashing()
    }

    /// Next bucket of table 0 to migrate, or `None` when not rehashing.
    pub fn rehash_index(&self) -> Option<usize> {
        self.tables.rehash_index()
    }

    /// Bucket count of table 0 or 1; zero for a table that does not exist.
    pub fn table_size(&self, table: usize) -> usize {
        self.tables.get(table).map_or(0, BucketTable::size)
    }

    /// Live entries in table 0 or 1.
    pub fn table_used(&self, table: usize) -> usize {
        self.tables.get(table).map_or(0, |t| t.used)
    }

    pub fn dict_type(&self) -> &T {
        &self.dict_type
    }

    pub fn policy(&self) -> &ResizePolicy {
        &self.config.policy
    }

    /// Safe iterators that have advanced and not yet been released.
    pub fn safe_iterators(&self) -> usize {
        self.safe_iterators
    }

    /// Grow (or first-initialize) to `next_power(target)` buckets.
    ///
    /// With an allocated table 0 this starts an incremental rehash into the
    /// new table; entries then migrate a bucket at a time.
    pub fn expand(&mut self, target: usize) -> Result<(), DictError> {
        if self.is_rehashing() {
            return Err(ResizeRejection::Rehashing.into());
        }
        let len = self.len();
        if len > target {
            return Err(ResizeRejection::BelowPopulation { target, len }.into());
        }

        let table = self.allocate_table(target);
        self.tables = match mem::take(&mut self.tables) {
            Tables::Single(old) if old.is_allocated() => {
                tracing::debug!(
                    from = old.size(),
                    to = table.size(),
                    used = old.used,
                    "starting incremental rehash"
                );
                Tables::Rehashing {
                    old,
                    new: table,
                    cursor: 0,
                }
            }
            Tables::Single(_) => {
                tracing::debug!(size = table.size(), "initialized primary table");
                self.layout_epoch += 1;
                Tables::Single(table)
            }
            Tables::Rehashing { .. } => unreachable!("expand while rehashing is rejected above"),
        };
        Ok(())
    }

    /// Shrink or grow to the smallest table holding every entry with a load
    /// factor of at most 1.
    pub fn resize_to_fit(&mut self) -> Result<(), DictError> {
        if !self.config.policy.is_enabled() {
            return Err(ResizeRejection::Disabled.into());
        }
        if self.is_rehashing() {
            return Err(ResizeRejection::Rehashing.into());
        }
        self.expand(self.len().max(INITIAL_SIZE))
    }

    /// Migrate up to `steps` buckets. Returns whether a rehash is still in
    /// progress afterwards.
    ///
    /// Runs regardless of registered safe iterators; they adjust on their
    /// next advance.
    pub fn rehash(&mut self, steps: usize) -> bool {
        self.migrate(steps);
        self.is_rehashing()
    }

    /// Rehash in batches of `REHASH_BATCH` buckets until done or until
    /// `budget` has elapsed. Returns the number of buckets migrated.
    pub fn rehash_for_duration(&mut self, budget: Duration) -> usize {
        let start = Instant::now();
        let mut rehashes = 0;
        while self.is_rehashing() {
            rehashes += self.migrate(REHASH_BATCH);
            tracing::trace!(rehashes, "rehash batch");
            if start.elapsed() > budget {
                break;
            }
        }
        rehashes
    }

    pub fn rehash_milliseconds(&mut self, ms: u64) -> usize {
        self.rehash_for_duration(Duration::from_millis(ms))
    }

    /// Insert a new entry. Fails with `KeyExists` (dropping `key` and
    /// `value`) when the key is already present.
    pub fn insert(&mut self, key: K, value: V) -> Result<Handle, DictError> {
        match self.add_or_find(key, value) {
            Added::Inserted(k) => Ok(Handle::new(k)),
            Added::Exists(..) => Err(DictError::KeyExists),
        }
    }

    /// Insert or overwrite. Returns `true` for a fresh insert.
    ///
    /// On overwrite the new value is stored before the old one is handed to
    /// `destroy_value`; the passed key is dropped.
    pub fn upsert(&mut self, key: K, value: V) -> bool {
        match self.add_or_find(key, value) {
            Added::Inserted(_) => true,
            Added::Exists(k, value) => {
                let value = self.dict_type.dup_value(value);
                let old = mem::replace(&mut self.slots[k].value, value);
                self.dict_type.destroy_value(old);
                false
            }
        }
    }

    pub fn find(&mut self, key: &K) -> Option<Handle> {
        if !self.tables.primary().is_allocated() {
            return None;
        }
        self.rehash_step();
        let hash = self.dict_type.hash(key);
        self.lookup(hash, |t, k| t.compare(key, k)).map(Handle::new)
    }

    /// Lookup by a precomputed hash and a caller-supplied matcher, e.g. to
    /// query `Box<str>` keys with a `&str`. `hash` must equal what the
    /// descriptor returns for the matching key.
    pub fn find_hashed<F>(&mut self, hash: u64, mut eq: F) -> Option<Handle>
    where
        F: FnMut(&K) -> bool,
    {
        if !self.tables.primary().is_allocated() {
            return None;
        }
        self.rehash_step();
        self.lookup(hash, |_, k| eq(k)).map(Handle::new)
    }

    pub fn contains_key(&mut self, key: &K) -> bool {
        self.find(key).is_some()
    }

    pub fn fetch(&mut self, key: &K) -> Option<&V> {
        let h = self.find(key)?;
        self.handle_value(h)
    }

    pub fn fetch_mut(&mut self, key: &K) -> Option<&mut V> {
        let h = self.find(key)?;
        self.handle_value_mut(h)
    }

    /// Remove an entry, passing its key and value to the descriptor's
    /// destructors.
    pub fn remove(&mut self, key: &K) -> Result<(), DictError> {
        let (k, v) = self.remove_no_free(key)?;
        self.dict_type.destroy_key(k);
        self.dict_type.destroy_value(v);
        Ok(())
    }

    /// Remove an entry and hand its key and value back to the caller without
    /// running destructors.
    pub fn remove_no_free(&mut self, key: &K) -> Result<(K, V), DictError> {
        if !self.tables.primary().is_allocated() {
            return Err(DictError::KeyNotFound);
        }
        self.rehash_step();
        let hash = self.dict_type.hash(key);
        self.unlink(hash, |t, k| t.compare(key, k))
            .ok_or(DictError::KeyNotFound)
    }

    /// `remove_no_free` counterpart of `find_hashed`.
    pub fn remove_hashed<F>(&mut self, hash: u64, mut eq: F) -> Result<(K, V), DictError>
    where
        F: FnMut(&K) -> bool,
    {
        if !self.tables.primary().is_allocated() {
            return Err(DictError::KeyNotFound);
        }
        self.rehash_step();
        self.unlink(hash, |_, k| eq(k)).ok_or(DictError::KeyNotFound)
    }

    /// Destroy every entry and free both tables. Registered safe iterators
    /// stay registered; they end on their next advance.
    pub fn clear(&mut self) {
        self.layout_epoch += 1;
        for table in mem::take(&mut self.tables).into_tables() {
            if table.used > 0 {
                for index in 0..table.size() {
                    let mut link = table.head(index);
                    while let Some(k) = link {
                        let Some(entry) = self.slots.remove(k) else {
                            break;
                        };
                        link = entry.next;
                        self.note_free(mem::size_of::<Entry<K, V>>());
                        self.dict_type.destroy_key(entry.key);
                        self.dict_type.destroy_value(entry.value);
                    }
                }
            }
            self.release_table(&table);
        }
        debug_assert!(self.slots.is_empty(), "entry not reachable from any chain");
    }

    /// A uniformly chosen entry, using the thread-local RNG.
    pub fn random_entry(&mut self) -> Option<Handle> {
        let mut rng = rand::rng();
        self.random_entry_with(&mut rng)
    }

    /// A uniformly chosen entry. While rehashing, slots of both tables form
    /// one index space of `size0 + size1` buckets.
    pub fn random_entry_with<R: Rng>(&mut self, rng: &mut R) -> Option<Handle> {
        if self.is_empty() {
            return None;
        }
        self.rehash_step();

        let head = match &self.tables {
            Tables::Single(t) => loop {
                if let Some(k) = t.head(rng.random_range(0..t.size())) {
                    break k;
                }
            },
            Tables::Rehashing { old, new, .. } => loop {
                let slot = rng.random_range(0..old.size() + new.size());
                let head = if slot >= old.size() {
                    new.head(slot - old.size())
                } else {
                    old.head(slot)
                };
                if let Some(k) = head {
                    break k;
                }
            },
        };

        // Count the chain, then walk to a random position in it.
        let chain_len = self.chain(Some(head)).count();
        let pick = rng.random_range(0..chain_len);
        self.chain(Some(head)).nth(pick).map(Handle::new)
    }

    /// An unsafe cursor: the dictionary must not change until it is released.
    pub fn iterator(&self) -> DictIterator {
        DictIterator::new(false)
    }

    /// A safe cursor: once advanced it suspends the lazy migration step until
    /// `DictIterator::release` is called. Entries may be inserted, the entry
    /// just returned may be removed, and `rehash` may run while it is live;
    /// entries present for the whole scan are yielded exactly once.
    pub fn safe_iterator(&self) -> DictIterator {
        DictIterator::new(true)
    }

    /// Borrowing iterator over every entry of both tables.
    pub fn iter(&self) -> Iter<'_, K, V, T> {
        Iter::new(self)
    }

    /// Visit every entry with a safe iterator, allowing `f` to mutate the
    /// dictionary (including removing the visited entry).
    pub fn for_each_safe<F>(&mut self, mut f: F)
    where
        F: FnMut(&mut Self, Handle),
    {
        let mut it = self.safe_iterator();
        while let Some(h) = it.next(self) {
            f(self, h);
        }
        it.release(self);
    }

    pub fn stats(&self) -> DictStats {
        let table_stats = |t: &BucketTable| {
            TableStats::from_chain_lengths(
                t.size(),
                t.used,
                (0..t.size()).map(|i| self.chain(t.head(i)).count()),
            )
        };
        DictStats {
            main: table_stats(self.tables.primary()),
            rehash_target: self.tables.get(1).map(table_stats),
        }
    }

    pub fn print_stats(&self) {
        print!("{}", self.stats());
    }

    /// Walk every chain and assert the structural invariants: each key in
    /// exactly one table and bucket, `used` equal to the chain lengths, table
    /// sizes powers of two, drained buckets empty. Panics on violation.
    pub fn debug_check_invariants(&self) {
        let mut seen = 0;
        for t in 0..self.tables.count() {
            let Some(table) = self.tables.get(t) else {
                continue;
            };
            if table.is_allocated() {
                assert!(table.size().is_power_of_two(), "table {t} size not a power of two");
                assert!(table.size() >= INITIAL_SIZE, "table {t} below the initial size");
            }
            let mut chained = 0;
            for index in 0..table.size() {
                for k in self.chain(table.head(index)) {
                    let entry = &self.slots[k];
                    let hash = self.dict_type.hash(&entry.key);
                    assert_eq!(table.bucket_index(hash), index, "entry in the wrong bucket");
                    let first = self.lookup(hash, |ty, other| ty.compare(&entry.key, other));
                    assert_eq!(first, Some(k), "key present more than once");
                    chained += 1;
                }
            }
            assert_eq!(chained, table.used, "table {t} used count disagrees with chains");
            seen += chained;
        }
        if let Tables::Rehashing { old, cursor, .. } = &self.tables {
            assert!((0..*cursor).all(|i| old.head(i).is_none()), "migrated bucket not empty");
        }
        assert_eq!(seen, self.slots.len(), "entry not reachable from any chain");
    }

    /// Summary of the table layout; any structural change alters it.
    pub(crate) fn fingerprint(&self) -> u64 {
        let mut h = DjbHasher::default();
        for t in 0..2 {
            h.write_usize(self.table_size(t));
            h.write_usize(self.table_used(t));
        }
        h.write_usize(self.rehash_index().unwrap_or(usize::MAX));
        h.write_usize(self.slots.len());
        h.finish()
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn chain(&self, head: Option<DefaultKey>) -> impl Iterator<Item = DefaultKey> + '_ {
        core::iter::successors(head, move |&k| self.slots.get(k).and_then(|e| e.next))
    }

    pub(crate) fn handle_key(&self, h: Handle) -> Option<&K> {
        self.slots.get(h.raw_handle()).map(|e| &e.key)
    }

    pub(crate) fn handle_value(&self, h: Handle) -> Option<&V> {
        self.slots.get(h.raw_handle()).map(|e| &e.value)
    }

    pub(crate) fn handle_value_mut(&mut self, h: Handle) -> Option<&mut V> {
        self.slots.get_mut(h.raw_handle()).map(|e| &mut e.value)
    }

    /// Move up to `steps` non-empty buckets from table 0 to table 1,
    /// finishing the rehash once table 0 is drained. Returns buckets moved.
    fn migrate(&mut self, steps: usize) -> usize {
        let mut moved = 0;
        while moved < steps {
            let drained = match &mut self.tables {
                Tables::Single(_) => break,
                Tables::Rehashing { old, new, cursor } => {
                    if old.used > 0 {
                        migrate_bucket(&mut self.slots, &self.dict_type, old, new, cursor);
                        moved += 1;
                    }
                    old.used == 0
                }
            };
            if drained {
                self.finish_rehash();
                break;
            }
        }
        moved
    }

    /// The lazy migration step run by lookups and updates. Skipped while
    /// safe iterators are registered.
    #[inline]
    fn rehash_step(&mut self) {
        if self.safe_iterators == 0 && self.is_rehashing() {
            self.migrate(1);
        }
    }

    fn add_or_find(&mut self, key: K, value: V) -> Added<V> {
        self.rehash_step();
        self.expand_if_needed();

        let hash = self.dict_type.hash(&key);
        if let Some(existing) = self.lookup(hash, |t, k| t.compare(&key, k)) {
            return Added::Exists(existing, value);
        }

        let key = self.dict_type.dup_key(key);
        let value = self.dict_type.dup_value(value);
        let table = self.tables.write_table_mut();
        let index = table.bucket_index(hash);
        let k = self.slots.insert(Entry {
            key,
            value,
            next: table.head(index),
        });
        table.set_head(index, Some(k));
        table.used += 1;
        self.note_alloc(mem::size_of::<Entry<K, V>>());
        Added::Inserted(k)
    }

    /// Growth policy, run before every insert.
    fn expand_if_needed(&mut self) {
        let (size, used) = match &self.tables {
            Tables::Rehashing { .. } => return,
            Tables::Single(t) => (t.size(), t.used),
        };
        let target = if size == 0 {
            INITIAL_SIZE
        } else if used >= size {
            let policy = &self.config.policy;
            let enabled = policy.is_enabled();
            if !enabled {
                if used / size <= policy.force_ratio() {
                    return;
                }
                tracing::warn!(size, used, "load factor above force ratio, growing while resizing is disabled");
            }
            size.max(used).saturating_mul(2)
        } else {
            return;
        };
        if let Err(err) = self.expand(target) {
            tracing::debug!(%err, "growth skipped");
        }
    }

    fn lookup<F>(&self, hash: u64, mut eq: F) -> Option<DefaultKey>
    where
        F: FnMut(&T, &K) -> bool,
    {
        for t in 0..self.tables.count() {
            let Some(table) = self.tables.get(t) else {
                break;
            };
            if !table.is_allocated() {
                continue;
            }
            let mut link = table.head(table.bucket_index(hash));
            while let Some(k) = link {
                let entry = &self.slots[k];
                if eq(&self.dict_type, &entry.key) {
                    return Some(k);
                }
                link = entry.next;
            }
        }
        None
    }

    fn unlink<F>(&mut self, hash: u64, mut eq: F) -> Option<(K, V)>
    where
        F: FnMut(&T, &K) -> bool,
    {
        for t in 0..self.tables.count() {
            let Some(table) = self.tables.get_mut(t) else {
                break;
            };
            if !table.is_allocated() {
                continue;
            }
            let index = table.bucket_index(hash);
            let mut prev: Option<DefaultKey> = None;
            let mut link = table.head(index);
            while let Some(k) = link {
                let next = self.slots[k].next;
                if eq(&self.dict_type, &self.slots[k].key) {
                    match prev {
                        Some(p) => self.slots[p].next = next,
                        None => table.set_head(index, next),
                    }
                    table.used -= 1;
                    let entry = self.slots.remove(k)?;
                    self.note_free(mem::size_of::<Entry<K, V>>());
                    return Some((entry.key, entry.value));
                }
                prev = Some(k);
                link = next;
            }
        }
        None
    }

    fn finish_rehash(&mut self) {
        self.tables = match mem::take(&mut self.tables) {
            Tables::Rehashing { old, new, .. } => {
                debug_assert_eq!(old.used, 0);
                self.release_table(&old);
                self.layout_epoch += 1;
                tracing::debug!(size = new.size(), used = new.used, "rehash complete");
                Tables::Single(new)
            }
            single => single,
        };
    }

    fn allocate_table(&self, capacity: usize) -> BucketTable {
        let table = BucketTable::allocate(capacity);
        self.note_alloc(table.bytes());
        table
    }

    fn release_table(&self, table: &BucketTable) {
        self.note_free(table.bytes());
    }

    #[inline]
    fn note_alloc(&self, bytes: usize) {
        if let Some(hook) = &self.config.alloc {
            hook.on_alloc(bytes);
        }
    }

    #[inline]
    fn note_free(&self, bytes: usize) {
        if let Some(hook) = &self.config.alloc {
            hook.on_free(bytes);
        }
    }
}

impl<K, V, T> Drop for Dict<K, V, T>
where
    T: DictType<K, V>,
{
    fn drop(&mut self) {
        self.clear();
    }
}

/// Move the chain of the next non-empty bucket of `old` into `new`,
/// recomputing each entry's index against `new`'s mask.
fn migrate_bucket<K, V, T>(
    slots: &mut SlotMap<DefaultKey, Entry<K, V>>,
    dict_type: &T,
    old: &mut BucketTable,
    new: &mut BucketTable,
    cursor: &mut usize,
) where
    T: DictType<K, V>,
{
    // Buckets below the cursor are empty, and `old.used > 0` guarantees a
    // non-empty one at or after it.
    debug_assert!(*cursor < old.size());
    while old.head(*cursor).is_none() {
        *cursor += 1;
    }
    let mut link = old.take_head(*cursor);
    while let Some(k) = link {
        let entry = &mut slots[k];
        link = entry.next;
        let index = new.bucket_index(dict_type.hash(&entry.key));
        entry.next = new.head(index);
        new.set_head(index, Some(k));
        old.used -= 1;
        new.used += 1;
    }
    *cursor += 1;
    while *cursor < old.size() && old.head(*cursor).is_none() {
        *cursor += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::{AllocHook, ByteCounter};
    use crate::dict_type::{CaseFoldStrType, IntType, StrType};
    use crate::hash::{int_hash, DjbBuildHasher};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::cell::Cell;
    use std::collections::BTreeSet;
    use std::rc::Rc;
    use std::sync::Arc;

    fn int_dict(n: u32) -> Dict<u32, u32, IntType> {
        let mut d = Dict::with_type(IntType);
        for k in 0..n {
            d.insert(k, k * 10).unwrap();
        }
        d
    }

    fn drain<K, V, T: DictType<K, V>>(d: &mut Dict<K, V, T>) {
        while d.rehash(100) {}
    }

    /// Counts lifecycle hook calls.
    #[derive(Clone, Default)]
    struct Counting {
        dup_keys: Rc<Cell<usize>>,
        destroyed_keys: Rc<Cell<usize>>,
        destroyed_values: Rc<Cell<usize>>,
    }

    impl DictType<u32, String> for Counting {
        fn hash(&self, key: &u32) -> u64 {
            u64::from(int_hash(*key))
        }
        fn compare(&self, a: &u32, b: &u32) -> bool {
            a == b
        }
        fn dup_key(&self, key: u32) -> u32 {
            self.dup_keys.set(self.dup_keys.get() + 1);
            key
        }
        fn destroy_key(&self, _key: u32) {
            self.destroyed_keys.set(self.destroyed_keys.get() + 1);
        }
        fn destroy_value(&self, _value: String) {
            self.destroyed_values.set(self.destroyed_values.get() + 1);
        }
    }

    /// Invariant: growing past capacity 4 starts an incremental rehash, and
    /// every entry is still found once it completes.
    #[test]
    fn fifth_insert_starts_incremental_rehash() {
        let mut d: Dict<&str, i32, StrType> = Dict::with_type(StrType);
        d.insert("a", 1).unwrap();
        d.insert("b", 2).unwrap();
        d.insert("c", 3).unwrap();
        d.insert("d", 4).unwrap();
        assert_eq!(d.table_size(0), INITIAL_SIZE);
        assert!(!d.is_rehashing());

        d.insert("e", 5).unwrap();
        assert_eq!(d.rehash_index(), Some(0));
        assert_eq!(d.table_size(1), 8);
        d.debug_check_invariants();
        d.insert("f", 6).unwrap();
        d.debug_check_invariants();

        drain(&mut d);
        assert!(!d.is_rehashing());
        assert_eq!(d.rehash_index(), None);
        assert_eq!(d.table_size(0), 8);
        assert_eq!(d.fetch(&"a"), Some(&1));
        assert_eq!(d.fetch(&"b"), Some(&2));
        assert_eq!(d.fetch(&"c"), Some(&3));
        assert_eq!(d.len(), 6);
        d.debug_check_invariants();
    }

    /// Invariant: upsert reports insert-vs-overwrite and never grows `len`
    /// for an existing key.
    #[test]
    fn upsert_overwrites_in_place() {
        let mut d: Dict<&str, i32, StrType> = Dict::with_type(StrType);
        assert!(d.upsert("x", 10));
        assert!(!d.upsert("x", 20));
        assert_eq!(d.fetch(&"x"), Some(&20));
        assert_eq!(d.len(), 1);
    }

    /// Invariant: with resizing disabled the table still grows once the load
    /// factor exceeds the force ratio.
    #[test]
    fn force_ratio_overrides_disabled_resizing() {
        let mut d: Dict<u32, u32, IntType> = Dict::with_type(IntType);
        d.policy().disable();
        for k in 0..24 {
            d.insert(k, k).unwrap();
        }
        assert_eq!(d.table_size(0), 4);
        assert!(!d.is_rehashing(), "load factor 5 is not above the ratio");

        d.insert(24, 24).unwrap();
        assert!(d.is_rehashing());
        assert_eq!(d.table_size(1), 64);
        drain(&mut d);
        assert_eq!(d.table_size(0), 64);
        assert_eq!(d.len(), 25);
        d.debug_check_invariants();
    }

    /// Invariant: re-enabling the shared toggle restores normal growth.
    #[test]
    fn reenabled_policy_grows_at_load_factor_one() {
        let mut d: Dict<u32, u32, IntType> = Dict::with_type(IntType);
        let policy = d.policy().clone();
        policy.disable();
        for k in 0..8 {
            d.insert(k, k).unwrap();
        }
        assert_eq!(d.table_size(0), 4);
        policy.enable();
        d.insert(8, 8).unwrap();
        assert!(d.is_rehashing());
        assert_eq!(d.table_size(1), 16);
    }

    /// Invariant: duplicate inserts fail and leave the stored value alone.
    #[test]
    fn duplicate_insert_is_rejected() {
        let mut d = int_dict(3);
        assert_eq!(d.insert(1, 99), Err(DictError::KeyExists));
        assert_eq!(d.fetch(&1), Some(&10));
        assert_eq!(d.len(), 3);
    }

    /// Invariant: removing a missing key is an error with no other effect.
    #[test]
    fn remove_is_idempotent() {
        let mut d = int_dict(3);
        assert_eq!(d.remove(&2), Ok(()));
        assert_eq!(d.remove(&2), Err(DictError::KeyNotFound));
        assert_eq!(d.len(), 2);
        assert!(!d.contains_key(&2));
        d.debug_check_invariants();
    }

    /// Invariant: lookups and removals on a never-used dictionary do not
    /// allocate.
    #[test]
    fn empty_dict_short_circuits() {
        let mut d: Dict<u32, u32, IntType> = Dict::with_type(IntType);
        assert!(d.find(&1).is_none());
        assert_eq!(d.remove(&1), Err(DictError::KeyNotFound));
        assert!(d.random_entry().is_none());
        assert_eq!(d.table_size(0), 0);
        assert!(d.is_empty());
    }

    /// Invariant: destructors run on remove, overwrite and clear, never on
    /// `remove_no_free`.
    #[test]
    fn lifecycle_hooks_fire_where_ownership_ends() {
        let ty = Counting::default();
        let mut d = Dict::with_type(ty.clone());
        for k in 1..=3 {
            d.insert(k, format!("v{k}")).unwrap();
        }
        assert_eq!(ty.dup_keys.get(), 3);

        d.remove(&1).unwrap();
        assert_eq!((ty.destroyed_keys.get(), ty.destroyed_values.get()), (1, 1));

        let (k, v) = d.remove_no_free(&2).unwrap();
        assert_eq!((k, v.as_str()), (2, "v2"));
        assert_eq!((ty.destroyed_keys.get(), ty.destroyed_values.get()), (1, 1));

        assert!(!d.upsert(3, "w3".to_string()));
        assert_eq!(ty.destroyed_values.get(), 2, "overwritten value destroyed");
        assert_eq!(ty.dup_keys.get(), 3, "existing key is not duplicated");

        assert!(d.insert(3, "dup".to_string()).is_err());
        assert_eq!(ty.destroyed_values.get(), 2);

        d.clear();
        assert_eq!((ty.destroyed_keys.get(), ty.destroyed_values.get()), (2, 3));
        assert!(d.is_empty());
        assert_eq!(d.table_size(0), 0);
        drop(d);
        assert_eq!((ty.destroyed_keys.get(), ty.destroyed_values.get()), (2, 3));
    }

    /// Invariant: dropping a dictionary destroys every remaining entry, in
    /// both tables mid-rehash.
    #[test]
    fn drop_destroys_entries_in_both_tables() {
        let ty = Counting::default();
        let mut d = Dict::with_type(ty.clone());
        for k in 0..5 {
            d.insert(k, k.to_string()).unwrap();
        }
        assert!(d.is_rehashing());
        drop(d);
        assert_eq!(ty.destroyed_keys.get(), 5);
        assert_eq!(ty.destroyed_values.get(), 5);
    }

    /// Invariant: `expand` refuses while rehashing and below the population.
    #[test]
    fn expand_rejections() {
        let mut d = int_dict(5);
        assert!(d.is_rehashing());
        assert_eq!(
            d.expand(64),
            Err(DictError::ResizeRejected(ResizeRejection::Rehashing))
        );
        drain(&mut d);
        assert_eq!(
            d.expand(2),
            Err(DictError::ResizeRejected(ResizeRejection::BelowPopulation {
                target: 2,
                len: 5
            }))
        );
        assert_eq!(d.expand(5), Ok(()));
        assert_eq!(d.table_size(1), 8);
    }

    /// Invariant: `resize_to_fit` shrinks to the smallest power of two that
    /// holds every entry, and honors the policy toggle.
    #[test]
    fn resize_to_fit_shrinks_after_removals() {
        let mut d = int_dict(100);
        drain(&mut d);
        assert_eq!(d.table_size(0), 128);
        for k in 10..100 {
            d.remove(&k).unwrap();
        }
        drain(&mut d);

        d.policy().disable();
        assert_eq!(
            d.resize_to_fit(),
            Err(DictError::ResizeRejected(ResizeRejection::Disabled))
        );
        d.policy().enable();

        d.resize_to_fit().unwrap();
        assert_eq!(
            d.resize_to_fit(),
            Err(DictError::ResizeRejected(ResizeRejection::Rehashing))
        );
        drain(&mut d);
        assert_eq!(d.table_size(0), 16);
        for k in 0..10 {
            assert_eq!(d.fetch(&k), Some(&(k * 10)));
        }
        d.debug_check_invariants();
    }

    /// Invariant: handles survive migration; the entry is relinked, not moved.
    #[test]
    fn handles_stay_valid_across_rehash() {
        let mut d: Dict<u32, u32, IntType> = Dict::with_type(IntType);
        let h = d.insert(7, 70).unwrap();
        for k in 100..400 {
            d.insert(k, k).unwrap();
        }
        drain(&mut d);
        assert_eq!(h.key(&d), Some(&7));
        *h.value_mut(&mut d).unwrap() += 1;
        assert_eq!(d.fetch(&7), Some(&71));
        assert_eq!(d.find(&7), Some(h));

        d.remove(&7).unwrap();
        assert!(h.value(&d).is_none(), "stale handle must not resolve");
    }

    #[test]
    fn fetch_mut_updates_value() {
        let mut d = int_dict(6);
        *d.fetch_mut(&3).unwrap() = 333;
        assert_eq!(d.fetch(&3), Some(&333));
        assert!(d.fetch_mut(&42).is_none());
    }

    /// Invariant: every entry is eventually sampled, including mid-rehash.
    #[test]
    fn random_entry_reaches_every_entry() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut d = int_dict(8);
        drain(&mut d);
        let mut seen = BTreeSet::new();
        for _ in 0..2000 {
            let h = d.random_entry_with(&mut rng).unwrap();
            seen.insert(*h.key(&d).unwrap());
        }
        assert_eq!(seen, (0..8).collect());

        // Freeze a rehash halfway with a registered safe iterator.
        d.expand(64).unwrap();
        d.rehash(3);
        assert!(d.is_rehashing());
        let mut it = d.safe_iterator();
        assert!(it.next(&mut d).is_some());
        let mut seen = BTreeSet::new();
        for _ in 0..4000 {
            let h = d.random_entry_with(&mut rng).unwrap();
            seen.insert(*h.key(&d).unwrap());
        }
        assert!(d.is_rehashing());
        it.release(&mut d);
        assert_eq!(seen, (0..8).collect());
    }

    #[test]
    fn random_entry_single_entry() {
        let mut d = int_dict(1);
        let h = d.random_entry().unwrap();
        assert_eq!(h.value(&d), Some(&0));
    }

    /// Invariant: a timed rehash finishes a small table within its budget
    /// and reports the buckets it moved.
    #[test]
    fn rehash_for_duration_drains() {
        let mut d = int_dict(64);
        drain(&mut d);
        d.expand(4096).unwrap();
        let moved = d.rehash_milliseconds(1000);
        assert!(moved > 0 && moved <= 64, "moved {moved}");
        assert!(!d.is_rehashing());
        assert_eq!(d.table_size(0), 4096);
        d.debug_check_invariants();
    }

    /// Invariant: a zero budget stops after one batch, mid-rehash, with the
    /// tables still consistent.
    #[test]
    fn rehash_for_duration_stops_at_budget() {
        let mut d = int_dict(5000);
        drain(&mut d);
        d.expand(1 << 16).unwrap();
        assert_eq!(d.rehash_for_duration(Duration::ZERO), REHASH_BATCH);
        assert!(d.is_rehashing());
        d.debug_check_invariants();
        assert_eq!(d.len(), 5000);
    }

    /// Invariant: a safe iterator pauses only the lazy step; explicit
    /// rehashing drains to completion under it, and the scan still yields
    /// every entry exactly once.
    #[test]
    fn explicit_rehash_completes_under_safe_iterator() {
        let mut d = int_dict(16);
        drain(&mut d);
        d.expand(256).unwrap();
        let mut it = d.safe_iterator();
        let first = it.next(&mut d).unwrap();
        let mut seen = vec![*first.key(&d).unwrap()];

        let cursor = d.rehash_index();
        assert!(d.find(&3).is_some());
        assert_eq!(d.rehash_index(), cursor, "lazy step must stay paused");

        let mut rounds = 0;
        while d.rehash(1) {
            rounds += 1;
            assert!(rounds <= 16, "drain must terminate");
        }
        assert!(!d.is_rehashing());
        assert_eq!(d.table_size(0), 256);

        while let Some(h) = it.next(&mut d) {
            seen.push(*h.key(&d).unwrap());
        }
        it.release(&mut d);
        seen.sort_unstable();
        assert_eq!(seen, (0..16).collect::<Vec<_>>());
        d.debug_check_invariants();
    }

    /// Invariant: a safe scan interleaved with rehash steps, through one
    /// completed rehash and into a second, yields each entry exactly once.
    #[test]
    fn safe_scan_survives_successive_rehashes() {
        let mut d = int_dict(200);
        drain(&mut d);
        d.expand(1024).unwrap();
        let mut restarted = false;
        let mut it = d.safe_iterator();
        let mut seen = BTreeSet::new();
        while let Some(h) = it.next(&mut d) {
            assert!(seen.insert(*h.key(&d).unwrap()), "entry yielded twice");
            d.rehash(2);
            if !d.is_rehashing() && !restarted {
                restarted = true;
                d.expand(2048).unwrap();
            }
        }
        it.release(&mut d);
        assert!(restarted, "first rehash should finish mid-scan");
        assert_eq!(seen, (0..200).collect());
        while d.rehash(100) {}
        assert_eq!(d.table_size(0), 2048);
        d.debug_check_invariants();
    }

    /// Invariant: `for_each_safe` lets the visitor remove what it visits.
    #[test]
    fn for_each_safe_removes_visited() {
        let mut d = int_dict(40);
        d.for_each_safe(|d, h| {
            let k = *h.key(d).unwrap();
            if k % 2 == 1 {
                d.remove(&k).unwrap();
            }
        });
        assert_eq!(d.len(), 20);
        assert_eq!(d.safe_iterators(), 0);
        assert!(d.iter().all(|(_, k, _)| k % 2 == 0));
        d.debug_check_invariants();
    }

    /// Invariant: stats cover both tables mid-rehash and agree with `len`.
    #[test]
    fn stats_cover_both_tables() {
        let mut d = int_dict(5);
        assert!(d.is_rehashing());
        let stats = d.stats();
        let target = stats.rehash_target.clone().unwrap();
        assert_eq!(stats.main.used + target.used, d.len());
        assert_eq!(stats.main.size, 4);
        assert_eq!(target.size, 8);
        assert!(stats.to_string().contains("-- Rehashing into ht[1]:"));

        drain(&mut d);
        let stats = d.stats();
        assert!(stats.rehash_target.is_none());
        assert_eq!(stats.main.total_chain_len, 5);
        assert_eq!(stats.main.histogram.iter().sum::<usize>(), 8);
    }

    /// Invariant: accounted bytes return to zero once everything is freed.
    #[test]
    fn alloc_hook_balances() {
        let counter = Arc::new(ByteCounter::new());
        let hook: Arc<dyn AllocHook> = counter.clone();
        let config = DictConfig::new().with_alloc_hook(hook);
        let mut d: Dict<u32, u32, IntType> = Dict::with_type_and_config(IntType, config.clone());
        for k in 0..50 {
            d.insert(k, k).unwrap();
        }
        assert!(counter.used_memory() > 0);
        for k in 0..25 {
            d.remove(&k).unwrap();
        }
        d.clear();
        assert_eq!(counter.used_memory(), 0);

        let mut d2: Dict<u32, u32, IntType> = Dict::with_type_and_config(IntType, config);
        for k in 0..9 {
            d2.insert(k, k).unwrap();
        }
        drop(d2);
        drop(d);
        assert_eq!(counter.used_memory(), 0);
    }

    #[test]
    fn case_fold_keys_collide() {
        let mut d: Dict<String, i32, CaseFoldStrType> = Dict::with_type(CaseFoldStrType);
        d.insert("Key".to_string(), 1).unwrap();
        assert_eq!(d.fetch(&"KEY".to_string()), Some(&1));
        assert_eq!(d.insert("kEy".to_string(), 2), Err(DictError::KeyExists));
    }

    #[test]
    fn default_type_dict() {
        let mut d: Dict<String, usize> = Dict::new();
        for i in 0..100 {
            d.insert(format!("k{i}"), i).unwrap();
        }
        assert_eq!(d.fetch(&"k42".to_string()), Some(&42));
        assert_eq!(d.iter().count(), 100);
        d.debug_check_invariants();

        let mut djb: Dict<String, usize, DefaultType<DjbBuildHasher>> =
            Dict::with_type(DefaultType::with_hasher(DjbBuildHasher));
        for i in 0..100 {
            djb.insert(format!("k{i}"), i).unwrap();
        }
        assert_eq!(djb.fetch(&"k7".to_string()), Some(&7));
        djb.debug_check_invariants();
    }

    /// Invariant: clear keeps the dictionary usable.
    #[test]
    fn insert_after_clear() {
        let mut d = int_dict(20);
        d.clear();
        assert!(d.is_empty());
        assert!(!d.is_rehashing());
        d.insert(1, 1).unwrap();
        assert_eq!(d.table_size(0), INITIAL_SIZE);
        d.debug_check_invariants();
    }
}
