use loops_client::LoopsError;
use loops_core::ObjectKey;
use loops_storage::StorageError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Loops request failed: {0}")]
    Provider(#[from] LoopsError),

    #[error("referenced {kind} {key} not found")]
    MissingReference { kind: &'static str, key: ObjectKey },

    #[error("mailing list ID not found for contact group {group}")]
    MissingMailingList { group: ObjectKey },

    #[error("failed to add contact {contact} to the newsletter list: {message}")]
    Newsletter { contact: ObjectKey, message: String },

    #[error("finalizer {0} is already registered")]
    DuplicateFinalizer(String),

    #[error("finalizer {key} failed: {source}")]
    Finalizer {
        key: String,
        #[source]
        source: Box<ReconcileError>,
    },

    #[error("{}", join(.0))]
    Aggregate(Vec<ReconcileError>),

    #[error("reconciler panicked: {0}")]
    Panicked(String),
}

impl ReconcileError {
    /// True when this error, or any error it wraps, is a store version conflict.
    pub fn is_conflict(&self) -> bool {
        match self {
            Self::Storage(err) => err.is_version_conflict(),
            Self::Finalizer { source, .. } => source.is_conflict(),
            Self::Aggregate(errors) => errors.iter().any(Self::is_conflict),
            _ => false,
        }
    }
}

fn join(errors: &[ReconcileError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
