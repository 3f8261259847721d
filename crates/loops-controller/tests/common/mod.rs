#![allow(dead_code)]

use async_trait::async_trait;
use loops_client::{ApiResponse, ContactRequest, LoopsApi, LoopsError};
use loops_core::{
    Contact, ContactGroup, ContactGroupProvider, ContactGroupSpec, ContactSpec, LOOPS_PROVIDER,
    ObjectKey, ObjectMeta,
};
use loops_storage::{
    DynStore, IndexFn, ObjectEvent, ResourceApi, ResourceStore, StorageError, StoredObject,
};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::broadcast;

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Upsert(ContactRequest),
    Delete(String),
}

/// Records every call; answers with the configured status codes, or success.
#[derive(Default)]
pub struct FakeLoops {
    calls: Mutex<Vec<Call>>,
    upsert_status: Mutex<Option<u16>>,
    delete_status: Mutex<Option<u16>>,
}

impl FakeLoops {
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn upserts(&self) -> Vec<ContactRequest> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Upsert(request) => Some(request),
                Call::Delete(_) => None,
            })
            .collect()
    }

    pub fn deletes(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Delete(id) => Some(id),
                Call::Upsert(_) => None,
            })
            .collect()
    }

    pub fn fail_upserts_with(&self, status: Option<u16>) {
        *self.upsert_status.lock() = status;
    }

    pub fn fail_deletes_with(&self, status: Option<u16>) {
        *self.delete_status.lock() = status;
    }

    fn answer(status: Option<u16>) -> Result<ApiResponse, LoopsError> {
        match status {
            Some(status) => Err(LoopsError::Api {
                status,
                body: format!("{{\"success\":false,\"message\":\"status {status}\"}}"),
            }),
            None => Ok(ApiResponse {
                success: true,
                ..Default::default()
            }),
        }
    }
}

#[async_trait]
impl LoopsApi for FakeLoops {
    async fn upsert_contact(&self, request: &ContactRequest) -> Result<ApiResponse, LoopsError> {
        self.calls.lock().push(Call::Upsert(request.clone()));
        Self::answer(*self.upsert_status.lock())
    }

    async fn delete_contact(&self, user_id: &str) -> Result<ApiResponse, LoopsError> {
        self.calls.lock().push(Call::Delete(user_id.to_string()));
        Self::answer(*self.delete_status.lock())
    }
}

pub async fn seed_contact(store: &DynStore, name: &str, email: &str) -> Contact {
    ResourceApi::<Contact>::new(store.clone())
        .create(&Contact::new(
            ObjectMeta::named("default", name),
            ContactSpec {
                email: email.into(),
                given_name: "Test".into(),
                family_name: "User".into(),
            },
        ))
        .await
        .expect("create contact")
}

pub async fn seed_group(store: &DynStore, name: &str, list_id: &str) -> ContactGroup {
    let providers = if list_id.is_empty() {
        Vec::new()
    } else {
        vec![ContactGroupProvider {
            name: LOOPS_PROVIDER.into(),
            id: list_id.into(),
        }]
    };
    ResourceApi::<ContactGroup>::new(store.clone())
        .create(&ContactGroup {
            metadata: ObjectMeta::named("default", name),
            spec: ContactGroupSpec {
                display_name: name.into(),
                providers,
            },
        })
        .await
        .expect("create group")
}

/// Store wrapper that rejects creates of one kind, or answers updates with a
/// version conflict.
pub struct FaultyStore {
    inner: DynStore,
    fail_creates_of: Mutex<Option<&'static str>>,
    conflict_updates: Mutex<bool>,
}

impl FaultyStore {
    pub fn new(inner: DynStore) -> Self {
        Self {
            inner,
            fail_creates_of: Mutex::new(None),
            conflict_updates: Mutex::new(false),
        }
    }

    pub fn fail_creates_of(&self, kind: Option<&'static str>) {
        *self.fail_creates_of.lock() = kind;
    }

    pub fn conflict_updates(&self, enabled: bool) {
        *self.conflict_updates.lock() = enabled;
    }
}

#[async_trait]
impl ResourceStore for FaultyStore {
    async fn get(&self, kind: &str, key: &ObjectKey) -> Result<Option<StoredObject>, StorageError> {
        self.inner.get(kind, key).await
    }

    async fn list(
        &self,
        kind: &str,
        namespace: Option<&str>,
    ) -> Result<Vec<StoredObject>, StorageError> {
        self.inner.list(kind, namespace).await
    }

    async fn list_by_index(
        &self,
        kind: &str,
        index: &str,
        value: &str,
    ) -> Result<Vec<StoredObject>, StorageError> {
        self.inner.list_by_index(kind, index, value).await
    }

    async fn create(&self, kind: &str, object: &Value) -> Result<StoredObject, StorageError> {
        if *self.fail_creates_of.lock() == Some(kind) {
            return Err(StorageError::internal("injected create failure"));
        }
        self.inner.create(kind, object).await
    }

    async fn update(&self, kind: &str, object: &Value) -> Result<StoredObject, StorageError> {
        if *self.conflict_updates.lock() {
            return Err(StorageError::version_conflict("stale", "current"));
        }
        self.inner.update(kind, object).await
    }

    async fn update_status(
        &self,
        kind: &str,
        object: &Value,
    ) -> Result<StoredObject, StorageError> {
        self.inner.update_status(kind, object).await
    }

    async fn delete(&self, kind: &str, key: &ObjectKey) -> Result<(), StorageError> {
        self.inner.delete(kind, key).await
    }

    fn register_index(&self, kind: &str, name: &str, index: IndexFn) -> Result<(), StorageError> {
        self.inner.register_index(kind, name, index)
    }

    fn subscribe(&self) -> broadcast::Receiver<ObjectEvent> {
        self.inner.subscribe()
    }

    fn backend_name(&self) -> &'static str {
        "faulty"
    }
}
