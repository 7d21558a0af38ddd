//! Per-target serialization of loads.
//!
//! Loading the same plugin from two loaders at once races on the runtime's
//! registration tables and on the plugin's one-time init. Callers that may do
//! that wrap the sequence in [`with_target_lock`].

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::Mutex;

static TARGET_LOCKS: Lazy<Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Run `f` while holding the lock for `target`.
///
/// Targets naming the same existing file share a lock. The lock is released
/// when `f` returns or unwinds.
pub fn with_target_lock<T>(target: &str, f: impl FnOnce() -> T) -> T {
    let key = lock_key(target);
    let lock = {
        let mut locks = TARGET_LOCKS.lock();
        Arc::clone(locks.entry(key.clone()).or_default())
    };

    let _prune = PruneOnExit { key: &key, lock: &lock };
    let _guard = lock.lock();
    f()
}

/// Drops the table entry for `key` once no other caller holds or waits on it.
struct PruneOnExit<'a> {
    key: &'a PathBuf,
    lock: &'a Arc<Mutex<()>>,
}

impl Drop for PruneOnExit<'_> {
    fn drop(&mut self) {
        let mut locks = TARGET_LOCKS.lock();
        // One reference in the table, one held by this caller.
        let shared = locks
            .get(self.key)
            .is_some_and(|entry| Arc::ptr_eq(entry, self.lock));
        if shared && Arc::strong_count(self.lock) == 2 {
            locks.remove(self.key);
        }
    }
}

fn lock_key(target: &str) -> PathBuf {
    std::fs::canonicalize(target).unwrap_or_else(|_| PathBuf::from(target))
}
