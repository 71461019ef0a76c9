//! Shared per-run mapping from stage key to its type-erased output.

use crate::{Error, Result, StageKey};
use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::trace;

type Value = Arc<dyn Any + Send + Sync>;

/// Result store shared by all workers of a run.
///
/// A single lock guards the map. It is held only long enough to insert a
/// value or clone its `Arc`; downcasting and cloning the typed value happen
/// after the lock is released.
#[derive(Default)]
pub struct ResultStore {
    values: Mutex<HashMap<StageKey, Value>>,
}

impl ResultStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<StageKey, Value>> {
        // Stage panics are caught by the scheduler, so a poisoned map is still consistent.
        self.values.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Remove every stored value.
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Store the output of `key`, replacing any previous value.
    pub fn insert<T>(&self, key: &str, value: T)
    where
        T: Send + Sync + 'static,
    {
        trace!(stage = key, "Storing stage output");
        self.lock().insert(key.to_string(), Arc::new(value));
    }

    /// Read a clone of the value stored for `key`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownStage`] if nothing is stored under `key`, or
    /// [`Error::TypeMismatch`] if the stored value is not a `T`.
    pub fn get<T>(&self, key: &str) -> Result<T>
    where
        T: Clone + 'static,
    {
        let value = self
            .lock()
            .get(key)
            .cloned()
            .ok_or_else(|| Error::unknown_stage(key))?;

        value
            .downcast_ref::<T>()
            .cloned()
            .ok_or_else(|| Error::type_mismatch::<T>(key))
    }

    /// Whether a value is stored for `key`.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.lock().contains_key(key)
    }

    /// Number of stored values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl std::fmt::Debug for ResultStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut keys: Vec<StageKey> = self.lock().keys().cloned().collect();
        keys.sort();
        f.debug_struct("ResultStore").field("keys", &keys).finish()
    }
}
