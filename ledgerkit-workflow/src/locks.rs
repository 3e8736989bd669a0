//! Per-workflow mutual exclusion.
//!
//! Mutations hold an exclusive lock for the full load/advance/persist cycle,
//! keyed by workflow id (or by a creation key before an id exists). A single
//! registry mutex protects only the key-to-lock map; it is never held across
//! I/O, so distinct workflows mutate fully concurrently.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Table of named locks, created on first use and retained for the life of
/// the registry.
#[derive(Default)]
pub struct LockRegistry {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl LockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` while holding the lock for `key`.
    ///
    /// The registry mutex is taken only for the map lookup and released
    /// before the per-key lock is acquired, so a long-running mutation on one
    /// key never blocks lookups or mutations on another.
    pub fn exclusive<R>(&self, key: &str, f: impl FnOnce() -> R) -> R {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(locks.entry(key.to_string()).or_default())
        };
        let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());
        f()
    }
}
