//! # loops-storage
//!
//! Storage abstraction for the declarative records the Loops controllers and
//! webhook operate on.
//!
//! This crate defines the contract a backend must honour and does not contain
//! an implementation; see `loops-db-memory` for the in-memory backend.
//!
//! ## Overview
//!
//! The main trait is [`ResourceStore`], which defines:
//! - get / list / create / delete with optimistic concurrency on update
//! - a status sub-resource written independently of spec
//! - named secondary indexes rebuilt on every write
//! - a broadcast of [`ObjectEvent`]s after each successful write
//!
//! Most callers use the typed [`ResourceApi`] facade instead of raw JSON:
//!
//! ```ignore
//! use loops_core::Contact;
//! use loops_storage::ResourceApi;
//!
//! let contacts = ResourceApi::<Contact>::new(store.clone());
//! let contact = contacts.get(&key).await?;
//! ```

mod api;
mod error;
pub mod events;
mod traits;
mod types;

pub use api::ResourceApi;
pub use error::{ErrorCategory, StorageError};
pub use events::{ObjectEvent, ObjectEventBroadcaster, ObjectOp};
pub use traits::ResourceStore;
pub use types::{IndexFn, StoredObject, key_from_value, typed_index};

/// Type alias for a storage result.
pub type StorageResult<T> = Result<T, StorageError>;

/// Type alias for a shared store trait object.
pub type DynStore = std::sync::Arc<dyn ResourceStore>;
