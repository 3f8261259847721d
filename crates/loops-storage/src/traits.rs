//! Core storage trait for the declarative store.

use async_trait::async_trait;
use loops_core::ObjectKey;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::error::StorageError;
use crate::events::ObjectEvent;
use crate::types::{IndexFn, StoredObject};

/// Storage contract for Kubernetes-style records.
///
/// Objects are JSON documents partitioned by kind and keyed by
/// `(namespace, name)`. Implementations must be thread-safe and are shared as
/// `Arc<dyn ResourceStore>`.
///
/// # Semantics
///
/// - `create` assigns `uid`, `resourceVersion`, `creationTimestamp` and
///   `generation = 1`. When `metadata.name` is empty and `generateName` is set,
///   a random suffix is appended.
/// - `update` writes metadata and spec. A non-empty `resourceVersion` that does
///   not match the stored one yields [`StorageError::VersionConflict`].
///   `generation` is bumped only when `spec` changed. Stored `status` is kept.
/// - `update_status` writes only `status` and never bumps `generation`.
/// - `delete` on an object with finalizers sets `deletionTimestamp` and keeps
///   the object. An update that leaves a deleting object without finalizers
///   purges it.
/// - Index values are recomputed on every write.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Read an object. Returns `None` when absent.
    async fn get(&self, kind: &str, key: &ObjectKey) -> Result<Option<StoredObject>, StorageError>;

    /// List objects of a kind, optionally restricted to one namespace, in creation order.
    async fn list(
        &self,
        kind: &str,
        namespace: Option<&str>,
    ) -> Result<Vec<StoredObject>, StorageError>;

    /// List objects whose named index produced `value`, in creation order.
    async fn list_by_index(
        &self,
        kind: &str,
        index: &str,
        value: &str,
    ) -> Result<Vec<StoredObject>, StorageError>;

    async fn create(&self, kind: &str, object: &Value) -> Result<StoredObject, StorageError>;

    async fn update(&self, kind: &str, object: &Value) -> Result<StoredObject, StorageError>;

    async fn update_status(&self, kind: &str, object: &Value)
    -> Result<StoredObject, StorageError>;

    async fn delete(&self, kind: &str, key: &ObjectKey) -> Result<(), StorageError>;

    /// Register a secondary index. Existing objects of the kind are indexed immediately.
    fn register_index(&self, kind: &str, name: &str, index: IndexFn) -> Result<(), StorageError>;

    /// Subscribe to change events for all kinds.
    fn subscribe(&self) -> broadcast::Receiver<ObjectEvent>;

    /// Returns the backend name for logging.
    fn backend_name(&self) -> &'static str;
}
