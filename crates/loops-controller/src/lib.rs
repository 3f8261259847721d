//! Reconcilers and control loops that keep Loops in step with the declarative store.

pub mod contact;
pub mod controller;
pub mod error;
pub mod finalizer;
pub mod indexes;
pub mod manager;
pub mod membership;
pub mod status;

pub use contact::{
    CONTACT_CREATED_REASON, CONTACT_FINALIZER, CONTACT_NOT_CREATED_REASON,
    CONTACT_NOT_UPDATED_REASON, CONTACT_READY_CONDITION, CONTACT_SOURCE, CONTACT_UPDATED_REASON,
    ContactReconciler, NEWSLETTER_ADDED_CONDITION, NEWSLETTER_ADDED_REASON,
    NEWSLETTER_NOT_ADDED_REASON, NEWSLETTER_PREFIX,
};
pub use controller::{Action, Controller, ControllerConfig, Reconciler};
pub use error::ReconcileError;
pub use finalizer::{FinalizeResult, Finalizer, Finalizers};
pub use indexes::{
    CONTACT_PROVIDER_ID_INDEX, GROUP_PROVIDER_ID_INDEX, MEMBERSHIP_REMOVAL_INDEX,
    find_contact_by_provider_id, find_group_by_provider_id, find_membership_removal,
    register_indexes,
};
pub use manager::{Manager, ManagerConfig};
pub use membership::{
    ContactGroupMembershipReconciler, MEMBERSHIP_CREATED_REASON, MEMBERSHIP_FINALIZER,
    MEMBERSHIP_NOT_CREATED_REASON, MEMBERSHIP_NOT_FINALIZED_REASON, MEMBERSHIP_READY_CONDITION,
    ResolvedMembership, resolve_references,
};
pub use status::patch_status_if_changed;
