//! Optional allocation accounting.
//!
//! The dictionary reports the logical size of every bucket array and entry
//! it creates or frees. Accounting is advisory telemetry only; it never
//! influences control flow.

use std::sync::Mutex;

pub trait AllocHook: Send + Sync {
    fn on_alloc(&self, bytes: usize);
    fn on_free(&self, bytes: usize);
}

/// Byte counter shared by any number of dictionaries.
#[derive(Debug, Default)]
pub struct ByteCounter {
    used: Mutex<usize>,
}

impl ByteCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes currently accounted as live.
    pub fn used_memory(&self) -> usize {
        // A poisoned counter still holds a meaningful number.
        match self.used.lock() {
            Ok(g) => *g,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn update(&self, f: impl FnOnce(usize) -> usize) {
        let mut g = match self.used.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        *g = f(*g);
    }
}

impl AllocHook for ByteCounter {
    fn on_alloc(&self, bytes: usize) {
        self.update(|used| used.saturating_add(bytes));
    }

    fn on_free(&self, bytes: usize) {
        self.update(|used| {
            debug_assert!(used >= bytes, "ByteCounter underflow");
            used.saturating_sub(bytes)
        });
    }
}
