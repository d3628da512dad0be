//! Recoverable dictionary errors.
//!
//! Storage allocation failure is not represented here: it aborts the
//! process (see `table::BucketTable::allocate`).

use thiserror::Error;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Error)]
pub enum DictError {
    #[error("key already exists")]
    KeyExists,
    #[error("key not found")]
    KeyNotFound,
    #[error("resize rejected: {0}")]
    ResizeRejected(#[from] ResizeRejection),
}

/// Why an `expand` / `resize_to_fit` request was refused.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Error)]
pub enum ResizeRejection {
    #[error("a rehash is already in progress")]
    Rehashing,
    #[error("target capacity {target} is below the current population {len}")]
    BelowPopulation { target: usize, len: usize },
    #[error("resizing is disabled")]
    Disabled,
}
