//! Secondary index bookkeeping.

use std::collections::HashMap;

use indexmap::IndexSet;
use loops_core::ObjectKey;
use loops_storage::{IndexFn, StorageError};
use serde_json::Value;

/// One named index over one kind.
struct Index {
    func: IndexFn,
    values: HashMap<String, IndexSet<ObjectKey>>,
    entries: HashMap<ObjectKey, Vec<String>>,
}

impl Index {
    fn new(func: IndexFn) -> Self {
        Self {
            func,
            values: HashMap::new(),
            entries: HashMap::new(),
        }
    }

    fn upsert(&mut self, key: &ObjectKey, object: &Value) {
        self.remove(key);
        let mut computed: Vec<String> = (self.func)(object);
        computed.sort();
        computed.dedup();
        if computed.is_empty() {
            return;
        }
        for value in &computed {
            self.values
                .entry(value.clone())
                .or_default()
                .insert(key.clone());
        }
        self.entries.insert(key.clone(), computed);
    }

    fn remove(&mut self, key: &ObjectKey) {
        let Some(previous) = self.entries.remove(key) else {
            return;
        };
        for value in previous {
            if let Some(keys) = self.values.get_mut(&value) {
                keys.shift_remove(key);
                if keys.is_empty() {
                    self.values.remove(&value);
                }
            }
        }
    }

    fn lookup(&self, value: &str) -> Vec<ObjectKey> {
        self.values
            .get(value)
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default()
    }
}

/// All registered indexes, keyed by `(kind, index name)`.
#[derive(Default)]
pub(crate) struct IndexRegistry {
    indexes: HashMap<(String, String), Index>,
}

impl IndexRegistry {
    /// Register (or replace) an index and build it from `existing`.
    pub(crate) fn register<'a>(
        &mut self,
        kind: &str,
        name: &str,
        func: IndexFn,
        existing: impl IntoIterator<Item = (&'a ObjectKey, &'a Value)>,
    ) {
        let mut index = Index::new(func);
        for (key, object) in existing {
            index.upsert(key, object);
        }
        self.indexes
            .insert((kind.to_string(), name.to_string()), index);
    }

    pub(crate) fn on_write(&mut self, kind: &str, key: &ObjectKey, object: &Value) {
        for ((index_kind, _), index) in self.indexes.iter_mut() {
            if index_kind == kind {
                index.upsert(key, object);
            }
        }
    }

    pub(crate) fn on_remove(&mut self, kind: &str, key: &ObjectKey) {
        for ((index_kind, _), index) in self.indexes.iter_mut() {
            if index_kind == kind {
                index.remove(key);
            }
        }
    }

    pub(crate) fn lookup(
        &self,
        kind: &str,
        name: &str,
        value: &str,
    ) -> Result<Vec<ObjectKey>, StorageError> {
        self.indexes
            .get(&(kind.to_string(), name.to_string()))
            .map(|index| index.lookup(value))
            .ok_or_else(|| StorageError::index_not_found(kind, name))
    }
}
