use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use loops_core::{ObjectKey, ObjectMeta};
use loops_storage::events::{ObjectEvent, ObjectEventBroadcaster, ObjectOp};
use loops_storage::{IndexFn, ResourceStore, StorageError, StoredObject, key_from_value};
use papaya::HashMap as PapayaHashMap;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio::sync::broadcast;
use tracing::debug;

use crate::index::IndexRegistry;

/// Format: `(kind, namespace/name)`.
pub type StorageKey = (String, ObjectKey);

const GENERATED_SUFFIX_LEN: usize = 5;

/// In-memory declarative store using a papaya lock-free HashMap.
///
/// Reads never block. Writes are serialized by the index lock so a lookup
/// through an index always agrees with the data it points at. The lock is
/// never held across an await point.
pub struct InMemoryStore {
    data: Arc<PapayaHashMap<StorageKey, StoredObject>>,
    indexes: Mutex<IndexRegistry>,
    version_counter: AtomicU64,
    sequence: AtomicU64,
    events: ObjectEventBroadcaster,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            data: Arc::new(PapayaHashMap::new()),
            indexes: Mutex::new(IndexRegistry::default()),
            version_counter: AtomicU64::new(1),
            sequence: AtomicU64::new(1),
            events: ObjectEventBroadcaster::new(),
        }
    }

    /// Number of stored objects across all kinds.
    pub fn len(&self) -> usize {
        self.data.pin().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn next_version(&self) -> String {
        self.version_counter
            .fetch_add(1, Ordering::SeqCst)
            .to_string()
    }

    fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::SeqCst)
    }

    fn load(&self, kind: &str, key: &ObjectKey) -> Option<StoredObject> {
        self.data.pin().get(&(kind.to_string(), key.clone())).cloned()
    }

    fn sorted(mut objects: Vec<StoredObject>) -> Vec<StoredObject> {
        objects.sort_by_key(|o| o.sequence);
        objects
    }

    fn emit(&self, kind: &str, key: ObjectKey, op: ObjectOp) {
        self.events.send(ObjectEvent::new(kind, key, op));
    }

    fn create_sync(&self, kind: &str, object: &Value) -> Result<StoredObject, StorageError> {
        check_kind(kind, object)?;
        let mut object = object.clone();
        let meta = read_meta(&object)?;

        let name = match (meta.name.is_empty(), meta.generate_name.as_deref()) {
            (false, _) => meta.name.clone(),
            (true, Some(prefix)) if !prefix.is_empty() => {
                format!("{prefix}{}", generated_suffix())
            }
            _ => {
                return Err(StorageError::invalid_object(
                    "metadata.name or metadata.generateName is required",
                ));
            }
        };
        let key = ObjectKey::new(&meta.namespace, &name);

        let mut indexes = self.indexes.lock();
        let guard = self.data.pin();
        let storage_key = (kind.to_string(), key.clone());
        if guard.get(&storage_key).is_some() {
            return Err(StorageError::already_exists(kind, key));
        }

        let now = now_utc();
        let version = self.next_version();
        {
            let m = metadata_mut(&mut object)?;
            m.insert("name".into(), Value::String(name));
            m.insert(
                "uid".into(),
                Value::String(uuid::Uuid::new_v4().to_string()),
            );
            m.insert("resourceVersion".into(), Value::String(version.clone()));
            m.insert("generation".into(), Value::from(1));
            m.insert("creationTimestamp".into(), Value::String(format_time(now)?));
            m.remove("deletionTimestamp");
        }

        let stored = StoredObject {
            kind: kind.to_string(),
            key: key.clone(),
            resource_version: version,
            sequence: self.next_sequence(),
            object,
            last_updated: now,
        };
        guard.insert(storage_key, stored.clone());
        indexes.on_write(kind, &key, &stored.object);
        drop(indexes);

        debug!(kind, key = %key, "object created");
        self.emit(kind, key, ObjectOp::Created);
        Ok(stored)
    }

    fn update_sync(&self, kind: &str, object: &Value) -> Result<StoredObject, StorageError> {
        check_kind(kind, object)?;
        let key = key_from_value(object)?;
        let incoming = read_meta(object)?;

        let mut indexes = self.indexes.lock();
        let guard = self.data.pin();
        let storage_key = (kind.to_string(), key.clone());
        let existing = guard
            .get(&storage_key)
            .cloned()
            .ok_or_else(|| StorageError::not_found(kind, key.clone()))?;
        check_version(&incoming, &existing)?;
        let current = read_meta(&existing.object)?;

        let mut next = object.clone();
        {
            let obj = next
                .as_object_mut()
                .ok_or_else(|| StorageError::invalid_object("object must be a JSON map"))?;
            match existing.object.get("status") {
                Some(status) => obj.insert("status".into(), status.clone()),
                None => obj.remove("status"),
            };
        }
        let spec_changed = next.get("spec") != existing.object.get("spec");
        let generation = if spec_changed {
            current.generation + 1
        } else {
            current.generation
        };
        restore_managed_meta(&mut next, &current, generation, &existing.resource_version)?;

        if current.is_deleting() && read_meta(&next)?.finalizers.is_empty() {
            guard.remove(&storage_key);
            indexes.on_remove(kind, &key);
            drop(indexes);

            debug!(kind, key = %key, "last finalizer removed, object purged");
            self.emit(kind, key, ObjectOp::Deleted);
            return Ok(StoredObject {
                object: next,
                ..existing
            });
        }

        if next == existing.object {
            return Ok(existing);
        }

        let stored = self.commit(storage_key, existing, next)?;
        indexes.on_write(kind, &key, &stored.object);
        drop(indexes);

        self.emit(kind, key, ObjectOp::Updated);
        Ok(stored)
    }

    fn update_status_sync(&self, kind: &str, object: &Value) -> Result<StoredObject, StorageError> {
        check_kind(kind, object)?;
        let key = key_from_value(object)?;
        let incoming = read_meta(object)?;

        let mut indexes = self.indexes.lock();
        let guard = self.data.pin();
        let storage_key = (kind.to_string(), key.clone());
        let existing = guard
            .get(&storage_key)
            .cloned()
            .ok_or_else(|| StorageError::not_found(kind, key.clone()))?;
        check_version(&incoming, &existing)?;

        let mut next = existing.object.clone();
        {
            let obj = next
                .as_object_mut()
                .ok_or_else(|| StorageError::internal("stored object is not a JSON map"))?;
            match object.get("status") {
                Some(status) => obj.insert("status".into(), status.clone()),
                None => obj.remove("status"),
            };
        }
        if next == existing.object {
            return Ok(existing);
        }

        let stored = self.commit(storage_key, existing, next)?;
        indexes.on_write(kind, &key, &stored.object);
        drop(indexes);

        self.emit(kind, key, ObjectOp::Updated);
        Ok(stored)
    }

    fn delete_sync(&self, kind: &str, key: &ObjectKey) -> Result<(), StorageError> {
        let mut indexes = self.indexes.lock();
        let guard = self.data.pin();
        let storage_key = (kind.to_string(), key.clone());
        let existing = guard
            .get(&storage_key)
            .cloned()
            .ok_or_else(|| StorageError::not_found(kind, key.clone()))?;
        let meta = read_meta(&existing.object)?;

        if meta.finalizers.is_empty() {
            guard.remove(&storage_key);
            indexes.on_remove(kind, key);
            drop(indexes);

            debug!(kind, key = %key, "object deleted");
            self.emit(kind, key.clone(), ObjectOp::Deleted);
            return Ok(());
        }

        if meta.is_deleting() {
            return Ok(());
        }

        let mut next = existing.object.clone();
        metadata_mut(&mut next)?.insert(
            "deletionTimestamp".into(),
            Value::String(format_time(now_utc())?),
        );
        let stored = self.commit(storage_key, existing, next)?;
        indexes.on_write(kind, key, &stored.object);
        drop(indexes);

        debug!(kind, key = %key, finalizers = ?meta.finalizers, "deletion pending on finalizers");
        self.emit(kind, key.clone(), ObjectOp::Updated);
        Ok(())
    }

    /// Write a new revision of an existing object. Caller holds the index lock.
    fn commit(
        &self,
        storage_key: StorageKey,
        existing: StoredObject,
        mut next: Value,
    ) -> Result<StoredObject, StorageError> {
        let version = self.next_version();
        metadata_mut(&mut next)?.insert("resourceVersion".into(), Value::String(version.clone()));
        let stored = StoredObject {
            resource_version: version,
            object: next,
            last_updated: now_utc(),
            ..existing
        };
        self.data.pin().insert(storage_key, stored.clone());
        Ok(stored)
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryStore")
            .field("objects", &self.len())
            .field("events", &self.events)
            .finish()
    }
}

#[async_trait]
impl ResourceStore for InMemoryStore {
    async fn get(&self, kind: &str, key: &ObjectKey) -> Result<Option<StoredObject>, StorageError> {
        Ok(self.load(kind, key))
    }

    async fn list(
        &self,
        kind: &str,
        namespace: Option<&str>,
    ) -> Result<Vec<StoredObject>, StorageError> {
        let guard = self.data.pin();
        let objects = guard
            .iter()
            .filter(|((k, key), _)| k == kind && namespace.is_none_or(|ns| key.namespace == ns))
            .map(|(_, stored)| stored.clone())
            .collect();
        Ok(Self::sorted(objects))
    }

    async fn list_by_index(
        &self,
        kind: &str,
        index: &str,
        value: &str,
    ) -> Result<Vec<StoredObject>, StorageError> {
        let keys = self.indexes.lock().lookup(kind, index, value)?;
        let objects = keys
            .iter()
            .filter_map(|key| self.load(kind, key))
            .collect();
        Ok(Self::sorted(objects))
    }

    async fn create(&self, kind: &str, object: &Value) -> Result<StoredObject, StorageError> {
        self.create_sync(kind, object)
    }

    async fn update(&self, kind: &str, object: &Value) -> Result<StoredObject, StorageError> {
        self.update_sync(kind, object)
    }

    async fn update_status(
        &self,
        kind: &str,
        object: &Value,
    ) -> Result<StoredObject, StorageError> {
        self.update_status_sync(kind, object)
    }

    async fn delete(&self, kind: &str, key: &ObjectKey) -> Result<(), StorageError> {
        self.delete_sync(kind, key)
    }

    fn register_index(&self, kind: &str, name: &str, index: IndexFn) -> Result<(), StorageError> {
        let mut indexes = self.indexes.lock();
        let guard = self.data.pin();
        let existing = guard
            .iter()
            .filter(|((k, _), _)| k == kind)
            .map(|((_, key), stored)| (key, &stored.object));
        indexes.register(kind, name, index, existing);
        debug!(kind, index = name, "index registered");
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<ObjectEvent> {
        self.events.subscribe()
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

fn check_kind(kind: &str, object: &Value) -> Result<(), StorageError> {
    if !object.is_object() {
        return Err(StorageError::invalid_object("object must be a JSON map"));
    }
    match object.get("kind").and_then(Value::as_str) {
        Some(declared) if declared != kind => Err(StorageError::invalid_object(format!(
            "kind {declared} written to {kind} partition"
        ))),
        _ => Ok(()),
    }
}

fn check_version(incoming: &ObjectMeta, existing: &StoredObject) -> Result<(), StorageError> {
    if !incoming.resource_version.is_empty() && incoming.resource_version != existing.resource_version
    {
        return Err(StorageError::version_conflict(
            &incoming.resource_version,
            &existing.resource_version,
        ));
    }
    Ok(())
}

fn read_meta(object: &Value) -> Result<ObjectMeta, StorageError> {
    let metadata = object
        .get("metadata")
        .cloned()
        .ok_or_else(|| StorageError::invalid_object("missing metadata"))?;
    serde_json::from_value(metadata)
        .map_err(|e| StorageError::invalid_object(format!("invalid metadata: {e}")))
}

fn metadata_mut(object: &mut Value) -> Result<&mut Map<String, Value>, StorageError> {
    object
        .get_mut("metadata")
        .and_then(Value::as_object_mut)
        .ok_or_else(|| StorageError::invalid_object("metadata must be a JSON map"))
}

/// Reset the store-owned metadata fields of `next` to the stored values.
fn restore_managed_meta(
    next: &mut Value,
    current: &ObjectMeta,
    generation: i64,
    resource_version: &str,
) -> Result<(), StorageError> {
    let m = metadata_mut(next)?;
    m.insert("uid".into(), Value::String(current.uid.clone()));
    m.insert("generation".into(), Value::from(generation));
    m.insert(
        "resourceVersion".into(),
        Value::String(resource_version.to_string()),
    );
    match current.creation_timestamp {
        Some(ts) => m.insert("creationTimestamp".into(), Value::String(format_time(ts)?)),
        None => m.remove("creationTimestamp"),
    };
    match current.deletion_timestamp {
        Some(ts) => m.insert("deletionTimestamp".into(), Value::String(format_time(ts)?)),
        None => m.remove("deletionTimestamp"),
    };
    Ok(())
}

fn now_utc() -> OffsetDateTime {
    let now = OffsetDateTime::now_utc();
    now.replace_nanosecond(0).unwrap_or(now)
}

fn format_time(ts: OffsetDateTime) -> Result<String, StorageError> {
    ts.format(&Rfc3339)
        .map_err(|e| StorageError::internal(format!("timestamp formatting failed: {e}")))
}

fn generated_suffix() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..GENERATED_SUFFIX_LEN].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn contact(name: &str, email: &str) -> Value {
        json!({
            "apiVersion": "notification.miloapis.com/v1alpha1",
            "kind": "Contact",
            "metadata": {"name": name, "namespace": "default"},
            "spec": {"email": email}
        })
    }

    fn email_index() -> IndexFn {
        Arc::new(|v: &Value| {
            v["spec"]["email"]
                .as_str()
                .map(|s| vec![s.to_string()])
                .unwrap_or_default()
        })
    }

    #[tokio::test]
    async fn test_create_assigns_identity() {
        let store = InMemoryStore::new();
        let created = store.create("Contact", &contact("alice", "a@x")).await.unwrap();

        let meta = read_meta(&created.object).unwrap();
        assert_eq!(meta.generation, 1);
        assert!(!meta.uid.is_empty());
        assert!(meta.creation_timestamp.is_some());
        assert_eq!(meta.resource_version, created.resource_version);
        assert_eq!(created.key, ObjectKey::new("default", "alice"));
    }

    #[tokio::test]
    async fn test_create_duplicate_fails() {
        let store = InMemoryStore::new();
        store.create("Contact", &contact("alice", "a@x")).await.unwrap();
        let err = store.create("Contact", &contact("alice", "b@x")).await.unwrap_err();
        assert!(err.is_already_exists());
    }

    #[tokio::test]
    async fn test_generate_name() {
        let store = InMemoryStore::new();
        let doc = json!({"metadata": {"generateName": "cgm-", "namespace": "default"}, "spec": {}});
        let created = store.create("ContactGroupMembership", &doc).await.unwrap();
        assert!(created.key.name.starts_with("cgm-"));
        assert_eq!(created.key.name.len(), "cgm-".len() + GENERATED_SUFFIX_LEN);

        let nameless = json!({"metadata": {"namespace": "default"}, "spec": {}});
        let err = store.create("ContactGroupMembership", &nameless).await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidObject { .. }));
    }

    #[tokio::test]
    async fn test_update_bumps_generation_only_on_spec_change() {
        let store = InMemoryStore::new();
        let created = store.create("Contact", &contact("alice", "a@x")).await.unwrap();

        let mut doc = created.object.clone();
        doc["metadata"]["finalizers"] = json!(["example.com/f"]);
        let updated = store.update("Contact", &doc).await.unwrap();
        assert_eq!(updated.object["metadata"]["generation"], 1);
        assert_ne!(updated.resource_version, created.resource_version);

        let mut doc = updated.object.clone();
        doc["spec"]["email"] = json!("b@x");
        let updated = store.update("Contact", &doc).await.unwrap();
        assert_eq!(updated.object["metadata"]["generation"], 2);
    }

    #[tokio::test]
    async fn test_stale_update_conflicts() {
        let store = InMemoryStore::new();
        let created = store.create("Contact", &contact("alice", "a@x")).await.unwrap();

        let mut first = created.object.clone();
        first["spec"]["email"] = json!("b@x");
        store.update("Contact", &first).await.unwrap();

        let mut stale = created.object.clone();
        stale["spec"]["email"] = json!("c@x");
        let err = store.update("Contact", &stale).await.unwrap_err();
        assert!(err.is_version_conflict());
    }

    #[tokio::test]
    async fn test_status_is_a_separate_subresource() {
        let store = InMemoryStore::new();
        let created = store.create("Contact", &contact("alice", "a@x")).await.unwrap();

        let mut doc = created.object.clone();
        doc["status"] = json!({"providers": [{"name": "Loops", "id": "L1"}]});
        doc["spec"]["email"] = json!("ignored@x");
        let updated = store.update_status("Contact", &doc).await.unwrap();
        assert_eq!(updated.object["status"]["providers"][0]["id"], "L1");
        assert_eq!(updated.object["spec"]["email"], "a@x");
        assert_eq!(updated.object["metadata"]["generation"], 1);

        // A spec write keeps the stored status.
        let mut doc = updated.object.clone();
        doc.as_object_mut().unwrap().remove("status");
        doc["spec"]["givenName"] = json!("Alice");
        let updated = store.update("Contact", &doc).await.unwrap();
        assert_eq!(updated.object["status"]["providers"][0]["id"], "L1");
    }

    #[tokio::test]
    async fn test_noop_write_keeps_version() {
        let store = InMemoryStore::new();
        let created = store.create("Contact", &contact("alice", "a@x")).await.unwrap();
        let mut rx = store.subscribe();

        let same = store.update("Contact", &created.object).await.unwrap();
        assert_eq!(same.resource_version, created.resource_version);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_delete_with_finalizers() {
        let store = InMemoryStore::new();
        let mut doc = contact("alice", "a@x");
        doc["metadata"]["finalizers"] = json!(["example.com/f"]);
        store.create("Contact", &doc).await.unwrap();
        let key = ObjectKey::new("default", "alice");

        store.delete("Contact", &key).await.unwrap();
        let pending = store.get("Contact", &key).await.unwrap().unwrap();
        assert!(pending.object["metadata"]["deletionTimestamp"].is_string());

        let mut doc = pending.object.clone();
        doc["metadata"]["finalizers"] = json!([]);
        store.update("Contact", &doc).await.unwrap();
        assert!(store.get("Contact", &key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_missing() {
        let store = InMemoryStore::new();
        let err = store
            .delete("Contact", &ObjectKey::new("default", "nobody"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_index_follows_writes() {
        let store = InMemoryStore::new();
        store.create("Contact", &contact("early", "a@x")).await.unwrap();
        store.register_index("Contact", "email", email_index()).unwrap();
        store.create("Contact", &contact("late", "a@x")).await.unwrap();

        let hits = store.list_by_index("Contact", "email", "a@x").await.unwrap();
        let names: Vec<_> = hits.iter().map(|o| o.key.name.as_str()).collect();
        assert_eq!(names, vec!["early", "late"]);

        store
            .delete("Contact", &ObjectKey::new("default", "early"))
            .await
            .unwrap();
        let hits = store.list_by_index("Contact", "email", "a@x").await.unwrap();
        assert_eq!(hits.len(), 1);

        let err = store.list_by_index("Contact", "missing", "a@x").await.unwrap_err();
        assert!(matches!(err, StorageError::IndexNotFound { .. }));
    }

    #[tokio::test]
    async fn test_list_filters_namespace_and_kind() {
        let store = InMemoryStore::new();
        store.create("Contact", &contact("a", "a@x")).await.unwrap();
        let mut other = contact("b", "b@x");
        other["metadata"]["namespace"] = json!("other");
        store.create("Contact", &other).await.unwrap();

        assert_eq!(store.list("Contact", None).await.unwrap().len(), 2);
        assert_eq!(store.list("Contact", Some("other")).await.unwrap().len(), 1);
        assert!(store.list("ContactGroup", None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_events_are_published() {
        let store = InMemoryStore::new();
        let mut rx = store.subscribe();
        store.create("Contact", &contact("alice", "a@x")).await.unwrap();
        store
            .delete("Contact", &ObjectKey::new("default", "alice"))
            .await
            .unwrap();

        let created = rx.recv().await.unwrap();
        assert_eq!(created.op, ObjectOp::Created);
        assert_eq!(created.kind, "Contact");
        assert_eq!(rx.recv().await.unwrap().op, ObjectOp::Deleted);
    }

    #[tokio::test]
    async fn test_kind_mismatch_rejected() {
        let store = InMemoryStore::new();
        let err = store
            .create("ContactGroup", &contact("alice", "a@x"))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidObject { .. }));
    }
}
