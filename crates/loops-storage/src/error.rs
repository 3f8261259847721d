//! Failures reported by [`ResourceStore`](crate::ResourceStore) backends.

use std::fmt;

use loops_core::{CoreError, ObjectKey};

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("{kind} not found: {key}")]
    NotFound { kind: String, key: ObjectKey },

    /// `expected` is the resourceVersion the writer read, `actual` the stored one.
    #[error("Version conflict: expected {expected}, found {actual}")]
    VersionConflict { expected: String, actual: String },

    #[error("{kind} already exists: {key}")]
    AlreadyExists { kind: String, key: ObjectKey },

    /// Document is not a JSON map, has the wrong kind, or has no name.
    #[error("Invalid object: {message}")]
    InvalidObject { message: String },

    #[error("Index {index} is not registered for {kind}")]
    IndexNotFound { kind: String, index: String },

    /// A stored document could not be converted to or from its typed record.
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl StorageError {
    #[must_use]
    pub fn not_found(kind: impl Into<String>, key: ObjectKey) -> Self {
        Self::NotFound {
            kind: kind.into(),
            key,
        }
    }

    #[must_use]
    pub fn version_conflict(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::VersionConflict {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    #[must_use]
    pub fn already_exists(kind: impl Into<String>, key: ObjectKey) -> Self {
        Self::AlreadyExists {
            kind: kind.into(),
            key,
        }
    }

    #[must_use]
    pub fn invalid_object(message: impl Into<String>) -> Self {
        Self::InvalidObject {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn index_not_found(kind: impl Into<String>, index: impl Into<String>) -> Self {
        Self::IndexNotFound {
            kind: kind.into(),
            index: index.into(),
        }
    }

    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// A stale write. Callers re-read and retry rather than fail.
    #[must_use]
    pub fn is_version_conflict(&self) -> bool {
        matches!(self, Self::VersionConflict { .. })
    }

    #[must_use]
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }

    /// Coarse bucket used as a log field.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::NotFound { .. } => ErrorCategory::NotFound,
            Self::VersionConflict { .. } | Self::AlreadyExists { .. } => ErrorCategory::Conflict,
            Self::InvalidObject { .. }
            | Self::IndexNotFound { .. }
            | Self::Serialization { .. } => ErrorCategory::Validation,
            Self::Internal { .. } => ErrorCategory::Internal,
        }
    }
}

impl From<CoreError> for StorageError {
    fn from(err: CoreError) -> Self {
        Self::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    NotFound,
    Conflict,
    Validation,
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::Validation => "validation",
            Self::Internal => "internal",
        })
    }
}
