//! Typed access to one record kind.

use std::marker::PhantomData;

use loops_core::{ObjectKey, Resource};
use tracing::warn;

use crate::error::StorageError;
use crate::{DynStore, StorageResult};

/// Typed facade over a [`ResourceStore`](crate::ResourceStore) for kind `R`.
pub struct ResourceApi<R> {
    store: DynStore,
    _kind: PhantomData<fn() -> R>,
}

impl<R> Clone for ResourceApi<R> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            _kind: PhantomData,
        }
    }
}

impl<R: Resource> ResourceApi<R> {
    pub fn new(store: DynStore) -> Self {
        Self {
            store,
            _kind: PhantomData,
        }
    }

    pub fn store(&self) -> &DynStore {
        &self.store
    }

    pub async fn get(&self, key: &ObjectKey) -> StorageResult<Option<R>> {
        match self.store.get(R::KIND, key).await? {
            Some(stored) => Ok(Some(stored.decode()?)),
            None => Ok(None),
        }
    }

    /// Like [`get`](Self::get) but absence is a [`StorageError::NotFound`].
    pub async fn get_required(&self, key: &ObjectKey) -> StorageResult<R> {
        self.get(key)
            .await?
            .ok_or_else(|| StorageError::not_found(R::KIND, key.clone()))
    }

    pub async fn list(&self, namespace: Option<&str>) -> StorageResult<Vec<R>> {
        self.store
            .list(R::KIND, namespace)
            .await?
            .iter()
            .map(|s| s.decode())
            .collect()
    }

    pub async fn list_by_index(&self, index: &str, value: &str) -> StorageResult<Vec<R>> {
        self.store
            .list_by_index(R::KIND, index, value)
            .await?
            .iter()
            .map(|s| s.decode())
            .collect()
    }

    /// Resolve a single object through an index.
    ///
    /// When several objects share the value the oldest one is returned and the
    /// collision is logged.
    pub async fn find_one_by_index(&self, index: &str, value: &str) -> StorageResult<Option<R>> {
        let mut matches = self.list_by_index(index, value).await?;
        if matches.len() > 1 {
            warn!(
                kind = R::KIND,
                index,
                value,
                count = matches.len(),
                "index value matches more than one object, using the first"
            );
        }
        if matches.is_empty() {
            return Ok(None);
        }
        Ok(Some(matches.swap_remove(0)))
    }

    pub async fn create(&self, record: &R) -> StorageResult<R> {
        let stored = self.store.create(R::KIND, &record.to_value()?).await?;
        stored.decode()
    }

    pub async fn update(&self, record: &R) -> StorageResult<R> {
        let stored = self.store.update(R::KIND, &record.to_value()?).await?;
        stored.decode()
    }

    pub async fn update_status(&self, record: &R) -> StorageResult<R> {
        let stored = self.store.update_status(R::KIND, &record.to_value()?).await?;
        stored.decode()
    }

    pub async fn delete(&self, key: &ObjectKey) -> StorageResult<()> {
        self.store.delete(R::KIND, key).await
    }
}
