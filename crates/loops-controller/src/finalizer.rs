//! Named pre-delete hooks.

use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use loops_core::Resource;
use tracing::{debug, warn};

use crate::error::ReconcileError;

/// Cleanup that must succeed before an object is purged.
#[async_trait]
pub trait Finalizer<R>: Send + Sync {
    async fn finalize(&self, object: &mut R) -> Result<(), ReconcileError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FinalizeResult {
    /// The object's finalizer list changed and must be written back.
    pub updated: bool,
}

/// Registry of finalizers keyed by finalizer name.
pub struct Finalizers<R> {
    finalizers: IndexMap<String, Arc<dyn Finalizer<R>>>,
}

impl<R: Resource> Finalizers<R> {
    pub fn new() -> Self {
        Self {
            finalizers: IndexMap::new(),
        }
    }

    pub fn register(
        &mut self,
        key: impl Into<String>,
        finalizer: Arc<dyn Finalizer<R>>,
    ) -> Result<(), ReconcileError> {
        let key = key.into();
        if self.finalizers.contains_key(&key) {
            return Err(ReconcileError::DuplicateFinalizer(key));
        }
        self.finalizers.insert(key, finalizer);
        Ok(())
    }

    /// Ensure registered keys are present on live objects, or run them on deleting ones.
    ///
    /// While deleting, each registered finalizer whose key is on the object runs
    /// once; its key is removed only on success. Failures are collected and
    /// returned together.
    pub async fn finalize(&self, object: &mut R) -> Result<FinalizeResult, ReconcileError> {
        let mut result = FinalizeResult::default();

        if !object.metadata().is_deleting() {
            for key in self.finalizers.keys() {
                if !object.metadata().has_finalizer(key) {
                    object.metadata_mut().finalizers.push(key.clone());
                    result.updated = true;
                }
            }
            return Ok(result);
        }

        let mut errors = Vec::new();
        for (key, finalizer) in &self.finalizers {
            if !object.metadata().has_finalizer(key) {
                continue;
            }
            match finalizer.finalize(object).await {
                Ok(()) => {
                    object.metadata_mut().finalizers.retain(|f| f != key);
                    result.updated = true;
                    debug!(kind = R::KIND, key = %object.key(), finalizer = %key, "finalizer completed");
                }
                Err(err) => {
                    warn!(kind = R::KIND, key = %object.key(), finalizer = %key, error = %err, "finalizer failed");
                    errors.push(ReconcileError::Finalizer {
                        key: key.clone(),
                        source: Box::new(err),
                    });
                }
            }
        }

        match errors.len() {
            0 => Ok(result),
            1 => Err(errors.remove(0)),
            _ => Err(ReconcileError::Aggregate(errors)),
        }
    }
}

impl<R: Resource> Default for Finalizers<R> {
    fn default() -> Self {
        Self::new()
    }
}
