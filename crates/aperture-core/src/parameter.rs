//! Parameter store — a name -> numeric value map with per-parameter write
//! versioning (specification §3 "Parameter store").
//!
//! Writes are totally ordered per device because every mutation goes
//! through a single mutex; readers always observe the value and version
//! written by some completed `set`, never a torn intermediate state.
//! Notification fan-out is *not* done here — the specification requires
//! notifications to run on the writer's thread after the mutation commits,
//! which means the caller (the Device Core) must snapshot subscribers,
//! release this store's lock, and then invoke callbacks itself. Bundling
//! notification into the store would risk calling back into the Device Core
//! while its own lock is held.

use parking_lot::Mutex;
use std::collections::HashMap;

/// A single parameter's value and write version.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParameterValue {
    pub value: f64,
    /// Monotonically increasing per-parameter write counter. Starts at 1 on
    /// first write so callers can distinguish "never written" (absent) from
    /// "written once".
    pub version: u64,
}

/// Thread-safe name -> value map with per-parameter versioning.
#[derive(Default)]
pub struct ParameterStore {
    inner: Mutex<HashMap<String, ParameterValue>>,
}

impl ParameterStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Write `value` for `name`, bumping its version. Returns the new
    /// `ParameterValue` so the caller can pass it to subscriber
    /// notification without re-acquiring the lock.
    pub fn set(&self, name: &str, value: f64) -> ParameterValue {
        let mut guard = self.inner.lock();
        let entry = guard
            .entry(name.to_string())
            .or_insert(ParameterValue { value: 0.0, version: 0 });
        entry.value = value;
        entry.version += 1;
        *entry
    }

    /// Read the current value and version for `name`, if it has ever been
    /// written.
    pub fn get(&self, name: &str) -> Option<ParameterValue> {
        self.inner.lock().get(name).copied()
    }

    pub fn has(&self, name: &str) -> bool {
        self.inner.lock().contains_key(name)
    }

    /// Snapshot of every known parameter (name, value, version).
    pub fn snapshot(&self) -> Vec<(String, ParameterValue)> {
        self.inner
            .lock()
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_write_has_version_one() {
        let store = ParameterStore::new();
        let v = store.set("gain", 100.0);
        assert_eq!(v.version, 1);
        assert_eq!(v.value, 100.0);
    }

    #[test]
    fn versions_strictly_increase_per_name() {
        let store = ParameterStore::new();
        store.set("gain", 1.0);
        store.set("gain", 2.0);
        let v = store.set("gain", 3.0);
        assert_eq!(v.version, 3);
        assert_eq!(v.value, 3.0);
    }

    #[test]
    fn unrelated_parameters_version_independently() {
        let store = ParameterStore::new();
        store.set("gain", 1.0);
        store.set("offset", 10.0);
        store.set("gain", 2.0);
        assert_eq!(store.get("gain").unwrap().version, 2);
        assert_eq!(store.get("offset").unwrap().version, 1);
    }

    #[test]
    fn get_missing_is_none() {
        let store = ParameterStore::new();
        assert!(store.get("nope").is_none());
        assert!(!store.has("nope"));
    }

    #[test]
    fn snapshot_reflects_all_writes() {
        let store = ParameterStore::new();
        store.set("a", 1.0);
        store.set("b", 2.0);
        let snap = store.snapshot();
        assert_eq!(snap.len(), 2);
    }
}
