//! Iteration over a `Dict`.
//!
//! `DictIterator` is a detached cursor: it holds no borrow, so the caller
//! can mutate the dictionary between advances. A safe cursor registers with
//! the dictionary on its first advance, which suspends the lazy migration
//! step, and must be handed back through `release`. Explicit `rehash` calls
//! still run under it: the cursor remembers what it yielded and rescans when
//! table 0 is replaced. An unsafe cursor never registers; the dictionary
//! must not change while it is in use (checked in debug builds).
//!
//! `Iter` is the ordinary borrowing iterator; the shared borrow rules out
//! mutation for its whole lifetime.

use crate::dict::{Dict, Handle};
use crate::dict_type::DictType;
use core::iter::FusedIterator;
use slotmap::{DefaultKey, SecondaryMap};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum IterState {
    Fresh,
    Table0,
    Table1,
    /// Terminal; a new cursor is needed to scan again.
    Exhausted,
}

#[derive(Debug)]
pub struct DictIterator {
    safe: bool,
    registered: bool,
    state: IterState,
    /// Next bucket to load in the current table.
    index: usize,
    entry: Option<DefaultKey>,
    // Saved before yielding, so the caller may remove the yielded entry.
    next_entry: Option<DefaultKey>,
    /// Dictionary the cursor was first advanced on.
    owner: Option<u64>,
    fingerprint: u64,
    epoch: u64,
    /// Entries already yielded by a safe cursor. Keys are versioned, so a
    /// reused slot does not count as visited.
    yielded: SecondaryMap<DefaultKey, ()>,
}

impl DictIterator {
    pub(crate) fn new(safe: bool) -> Self {
        Self {
            safe,
            registered: false,
            state: IterState::Fresh,
            index: 0,
            entry: None,
            next_entry: None,
            owner: None,
            fingerprint: 0,
            epoch: 0,
            yielded: SecondaryMap::new(),
        }
    }

    pub fn is_safe(&self) -> bool {
        self.safe
    }

    pub fn state(&self) -> IterState {
        self.state
    }

    /// Advance to the next entry; `None` once every bucket in scope has been
    /// visited, and on every call after that.
    pub fn next<K, V, T>(&mut self, dict: &mut Dict<K, V, T>) -> Option<Handle>
    where
        T: DictType<K, V>,
    {
        if let Some(owner) = self.owner {
            debug_assert_eq!(owner, dict.id(), "cursor advanced on a different dictionary");
        }
        let scanning = matches!(self.state, IterState::Table0 | IterState::Table1);
        if scanning && !self.safe {
            debug_assert_eq!(
                self.fingerprint,
                dict.fingerprint(),
                "dictionary modified during unsafe iteration"
            );
        }
        if scanning && self.safe && self.epoch != dict.layout_epoch {
            // Table 0 was replaced: scan the new layout from the start.
            self.epoch = dict.layout_epoch;
            self.state = IterState::Table0;
            self.index = 0;
            self.entry = None;
        }
        loop {
            if self.entry.is_some() {
                self.entry = self.next_entry;
            } else {
                let mut table = match self.state {
                    IterState::Exhausted => return None,
                    IterState::Fresh => {
                        self.register(dict);
                        self.state = IterState::Table0;
                        self.index = 0;
                        0
                    }
                    IterState::Table0 => 0,
                    IterState::Table1 => 1,
                };
                if self.index >= dict.table_size(table) {
                    if table == 0 && dict.is_rehashing() {
                        table = 1;
                        self.state = IterState::Table1;
                        self.index = 0;
                    } else {
                        self.state = IterState::Exhausted;
                        return None;
                    }
                }
                self.entry = dict.tables.get(table).and_then(|t| t.head(self.index));
                self.index += 1;
            }
            if let Some(k) = self.entry {
                match dict.slots.get(k) {
                    Some(e) => {
                        self.next_entry = e.next;
                        // Migrated entries can come around again.
                        if self.safe && self.yielded.insert(k, ()).is_some() {
                            continue;
                        }
                        return Some(Handle::new(k));
                    }
                    // The saved link was removed by the caller: end this chain.
                    None => self.entry = None,
                }
            }
        }
    }

    /// Hand the cursor back, unregistering a safe cursor.
    pub fn release<K, V, T>(mut self, dict: &mut Dict<K, V, T>)
    where
        T: DictType<K, V>,
    {
        let same_dict = self.owner.map_or(true, |owner| owner == dict.id());
        debug_assert!(same_dict, "cursor released on a different dictionary");
        if self.registered {
            if same_dict {
                debug_assert!(dict.safe_iterators > 0, "safe iterator count underflow");
                dict.safe_iterators = dict.safe_iterators.saturating_sub(1);
                self.registered = false;
            } else {
                tracing::warn!("safe iterator released on a different dictionary; ignored");
            }
        } else if !self.safe && self.state != IterState::Fresh {
            debug_assert_eq!(
                self.fingerprint,
                dict.fingerprint(),
                "dictionary modified during unsafe iteration"
            );
        }
    }

    fn register<K, V, T>(&mut self, dict: &mut Dict<K, V, T>)
    where
        T: DictType<K, V>,
    {
        self.owner = Some(dict.id());
        if self.safe {
            dict.safe_iterators += 1;
            self.registered = true;
            self.epoch = dict.layout_epoch;
        } else {
            self.fingerprint = dict.fingerprint();
        }
    }
}

impl Drop for DictIterator {
    fn drop(&mut self) {
        if self.registered {
            tracing::warn!("safe iterator dropped without release; lazy rehashing stays paused");
        }
    }
}

/// Borrowing iterator over `(Handle, &K, &V)`, table 0 first.
pub struct Iter<'a, K, V, T>
where
    T: DictType<K, V>,
{
    dict: &'a Dict<K, V, T>,
    table: usize,
    index: usize,
    entry: Option<DefaultKey>,
    remaining: usize,
}

impl<'a, K, V, T> Iter<'a, K, V, T>
where
    T: DictType<K, V>,
{
    pub(crate) fn new(dict: &'a Dict<K, V, T>) -> Self {
        Self {
            dict,
            table: 0,
            index: 0,
            entry: None,
            remaining: dict.len(),
        }
    }
}

impl<'a, K, V, T> Iterator for Iter<'a, K, V, T>
where
    T: DictType<K, V>,
{
    type Item = (Handle, &'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        let dict: &'a Dict<K, V, T> = self.dict;
        loop {
            if let Some(k) = self.entry {
                let e = &dict.slots[k];
                self.entry = e.next;
                self.remaining -= 1;
                return Some((Handle::new(k), &e.key, &e.value));
            }
            let table = dict.tables.get(self.table)?;
            if self.index >= table.size() {
                if self.table == 0 && dict.is_rehashing() {
                    self.table = 1;
                    self.index = 0;
                    continue;
                }
                return None;
            }
            self.entry = table.head(self.index);
            self.index += 1;
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<'a, K, V, T> ExactSizeIterator for Iter<'a, K, V, T> where T: DictType<K, V> {}

impl<'a, K, V, T> FusedIterator for Iter<'a, K, V, T> where T: DictType<K, V> {}

impl<'a, K, V, T> IntoIterator for &'a Dict<K, V, T>
where
    T: DictType<K, V>,
{
    type Item = (Handle, &'a K, &'a V);
    type IntoIter = Iter<'a, K, V, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
