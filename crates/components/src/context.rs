//! The shared execution context passed to every step of a workflow run.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde_json::Value;

use crate::placeholder;
use crate::traits::Params;

/// An independent copy of the context, sorted by key.
pub type ContextSnapshot = BTreeMap<String, Value>;

/// Alias → last-known value map shared by every step of one run.
///
/// Cloning is cheap and yields a handle to the same storage. Every operation
/// takes the lock once, so a reader never observes half of an `update`.
#[derive(Debug, Clone, Default)]
pub struct SharedContext {
    data: Arc<RwLock<HashMap<String, Value>>>,
}

impl SharedContext {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Value>> {
        self.data.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Value>> {
        self.data.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.write().insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.read().get(key).cloned()
    }

    /// Value under `key`, or `default` when the key is absent.
    pub fn get_or(&self, key: &str, default: Value) -> Value {
        self.get(key).unwrap_or(default)
    }

    /// Insert every entry of `entries` under a single lock acquisition.
    pub fn update<I, K>(&self, entries: I)
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let mut data = self.write();
        for (key, value) in entries {
            data.insert(key.into(), value);
        }
    }

    pub fn snapshot(&self) -> ContextSnapshot {
        self.read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn clear(&self) {
        self.write().clear();
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Substitute `{{identifier}}` tokens with their current values.
    ///
    /// Missing identifiers are left verbatim; this never fails.
    pub fn resolve(&self, text: &str) -> String {
        let data = self.read();
        resolve_with(&data, text)
    }

    /// Apply [`resolve`](Self::resolve) to every string inside `value`,
    /// recursing through arrays and objects.
    pub fn resolve_value(&self, value: &Value) -> Value {
        let data = self.read();
        resolve_value_with(&data, value)
    }

    /// Resolve a whole parameter map against one consistent view of the
    /// context.
    pub fn resolve_params(&self, params: &Params) -> Params {
        let data = self.read();
        params
            .iter()
            .map(|(k, v)| (k.clone(), resolve_value_with(&data, v)))
            .collect()
    }
}

fn resolve_with(data: &HashMap<String, Value>, text: &str) -> String {
    placeholder::substitute(text, |key| data.get(key).map(placeholder::stringify))
}

fn resolve_value_with(data: &HashMap<String, Value>, value: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(resolve_with(data, s)),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|v| resolve_value_with(data, v))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), resolve_value_with(data, v)))
                .collect(),
        ),
        other => other.clone(),
    }
}
