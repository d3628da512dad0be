//! rehash-dict: a chained hash dictionary that grows without pauses by
//! rehashing incrementally, one bucket at a time.
//!
//! Internal Design:
//!
//! Summary
//! - Goal: a resizable associative map whose worst-case operation latency
//!   stays bounded while it grows, parameterized by owner-supplied key and
//!   value operations rather than by trait bounds on `K`/`V`.
//! - Layers:
//!   - `hash`: pure hash functions (djb, case-folding djb, Wang's integer
//!     mix) plus a `Hasher` adapter.
//!   - `DictType<K, V>`: the type descriptor. `hash` and `compare` are
//!     required; `dup_*`/`destroy_*` are optional capabilities with
//!     pass-through defaults.
//!   - `BucketTable`: power-of-two array of chain heads with a size mask.
//!   - `Dict<K, V, T>`: an entry arena plus one or two bucket tables, the
//!     rehash cursor and the safe-iterator count.
//!   - `DictIterator` / `Iter`: detached cursors (safe or unsafe) and the
//!     ordinary borrowing iterator.
//!
//! Constraints
//! - Single writer: no internal locking. Wrap a `Dict` in a lock to share
//!   it across threads.
//! - Entries live in a `slotmap` arena; chains link arena keys. Rehashing
//!   relinks entries and never copies them, so `Handle`s stay valid until
//!   their entry is removed, and stale handles never alias new entries.
//! - Table sizes are powers of two, at least `INITIAL_SIZE`.
//!
//! Incremental rehashing
//! - Growth allocates a second table and sets the cursor to bucket 0 of the
//!   first. Every lookup or update then migrates one non-empty bucket
//!   before doing its own work; `rehash` and `rehash_for_duration` drain
//!   eagerly. When table 0 is empty, table 1 takes its place.
//! - `Tables` is an enum (`Single` / `Rehashing { old, new, cursor }`), so
//!   "rehashing iff two tables exist" holds by construction.
//! - New entries go to table 1 while rehashing; lookups and removals
//!   search table 0 first, then table 1.
//!
//! Growth policy
//! - Before each insert: an unallocated table is initialized to
//!   `INITIAL_SIZE`; at load factor 1 the table doubles, unless the
//!   `ResizePolicy` is disabled, in which case it only doubles once the
//!   load factor exceeds the force ratio (5 by default).
//!
//! Safe iterators
//! - A safe `DictIterator` registers with the dictionary on its first
//!   advance. While any is registered, lookups and updates skip their lazy
//!   migration step, so the caller may insert or remove the entry it was
//!   just given. Explicit `rehash` calls still migrate; the cursor tracks
//!   what it has yielded and rescans when table 0 is replaced, so entries
//!   present for the whole scan come out exactly once. Releasing the cursor
//!   is the caller's job; a forgotten release keeps the lazy step paused.
//!
//! Failure semantics
//! - Duplicate insert, missing key and refused resize are ordinary
//!   `DictError` values.
//! - Failing to allocate bucket storage aborts the process after logging.
//!
//! Non-goals
//! - Concurrent mutation of one instance, persistence, and typing beyond the
//!   descriptor contract.

pub mod alloc;
pub mod config;
pub mod dict;
mod dict_proptest;
pub mod dict_type;
pub mod error;
pub mod hash;
pub mod iter;
pub mod stats;
mod table;
pub mod wrappers;

// Public surface
pub use alloc::{AllocHook, ByteCounter};
pub use config::{DictConfig, ResizePolicy, FORCE_RESIZE_RATIO, INITIAL_SIZE, REHASH_BATCH};
pub use dict::{Dict, Handle};
pub use dict_type::{CaseFoldStrType, DefaultType, DictType, IdentityType, IntType, StrType};
pub use error::{DictError, ResizeRejection};
pub use iter::{DictIterator, Iter, IterState};
pub use stats::{DictStats, TableStats};
pub use table::{next_power, MAX_TABLE_SIZE};
pub use wrappers::{CopyDictionary, RefDictionary};
