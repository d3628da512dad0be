//! Dictionary configuration: growth policy and optional allocation hook.

use crate::alloc::AllocHook;
use core::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Bucket count of a freshly initialized table.
pub const INITIAL_SIZE: usize = 4;

/// Load factor above which tables grow even while resizing is disabled.
pub const FORCE_RESIZE_RATIO: usize = 5;

/// Buckets migrated per batch by `Dict::rehash_for_duration`.
pub const REHASH_BATCH: usize = 100;

/// Growth toggle plus force ratio.
///
/// Clones share the toggle: disabling through one handle disables growth for
/// every dictionary configured with a clone of it (e.g. all dictionaries of
/// a process while a snapshot is being taken).
#[derive(Clone, Debug)]
pub struct ResizePolicy {
    enabled: Arc<AtomicBool>,
    force_ratio: usize,
}

impl ResizePolicy {
    pub fn new() -> Self {
        Self {
            enabled: Arc::new(AtomicBool::new(true)),
            force_ratio: FORCE_RESIZE_RATIO,
        }
    }

    pub fn with_force_ratio(force_ratio: usize) -> Self {
        Self {
            force_ratio,
            ..Self::new()
        }
    }

    pub fn enable(&self) {
        self.enabled.store(true, Ordering::Relaxed);
    }

    pub fn disable(&self) {
        self.enabled.store(false, Ordering::Relaxed);
    }

    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn force_ratio(&self) -> usize {
        self.force_ratio
    }
}

impl Default for ResizePolicy {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Default)]
pub struct DictConfig {
    pub policy: ResizePolicy,
    pub alloc: Option<Arc<dyn AllocHook>>,
}

impl DictConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(mut self, policy: ResizePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_alloc_hook(mut self, hook: Arc<dyn AllocHook>) -> Self {
        self.alloc = Some(hook);
        self
    }
}

impl fmt::Debug for DictConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DictConfig")
            .field("policy", &self.policy)
            .field("alloc", &self.alloc.is_some())
            .finish()
    }
}
