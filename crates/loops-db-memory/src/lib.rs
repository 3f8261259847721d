//! In-memory backend for the declarative store.
//!
//! This crate provides an implementation of the `ResourceStore` trait from
//! `loops-storage`, using a papaya lock-free HashMap for reads and a single
//! write lock that keeps secondary indexes consistent with the data.
//!
//! # Example
//!
//! ```ignore
//! use loops_db_memory::InMemoryStore;
//! use loops_storage::ResourceStore;
//!
//! let store = InMemoryStore::new();
//! let created = store.create("Contact", &serde_json::json!({
//!     "metadata": {"name": "alice", "namespace": "default"},
//!     "spec": {"email": "alice@example.com"}
//! })).await?;
//! ```

mod index;
pub mod storage;

pub use loops_storage::{DynStore, ResourceStore, StorageError, StoredObject};
pub use storage::InMemoryStore;

/// Creates a new shared in-memory store.
pub fn create_store() -> DynStore {
    std::sync::Arc::new(InMemoryStore::new())
}
