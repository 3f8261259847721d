//! Storage types shared by the store traits and backends.

use std::sync::Arc;

use loops_core::{ObjectKey, Resource};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

use crate::error::StorageError;

/// An object as held by the storage backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredObject {
    /// Kind partition the object lives in.
    pub kind: String,
    /// Namespaced key.
    pub key: ObjectKey,
    /// Version token of this revision.
    pub resource_version: String,
    /// Monotonic creation sequence; lists and index lookups are ordered by it.
    pub sequence: u64,
    /// Full document including `metadata`, `spec` and `status`.
    pub object: Value,
    /// When this revision was written.
    #[serde(with = "time::serde::rfc3339")]
    pub last_updated: OffsetDateTime,
}

impl StoredObject {
    /// Decode the document into a typed record.
    pub fn decode<R: Resource>(&self) -> Result<R, StorageError> {
        Ok(R::from_value(self.object.clone())?)
    }
}

/// Function computing the index values of a stored document.
pub type IndexFn = Arc<dyn Fn(&Value) -> Vec<String> + Send + Sync>;

/// Build an [`IndexFn`] over a typed record.
///
/// Documents that fail to decode as `R` produce no index values.
pub fn typed_index<R, F>(f: F) -> IndexFn
where
    R: Resource,
    F: Fn(&R) -> Vec<String> + Send + Sync + 'static,
{
    Arc::new(move |value: &Value| match R::from_value(value.clone()) {
        Ok(record) => f(&record),
        Err(_) => Vec::new(),
    })
}

/// Extract `metadata.namespace`/`metadata.name` from a document.
pub fn key_from_value(value: &Value) -> Result<ObjectKey, StorageError> {
    let metadata = value
        .get("metadata")
        .ok_or_else(|| StorageError::invalid_object("missing metadata"))?;
    let name = metadata
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let namespace = metadata
        .get("namespace")
        .and_then(Value::as_str)
        .unwrap_or_default();
    Ok(ObjectKey::new(namespace, name))
}
