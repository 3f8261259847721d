pub mod condition;
pub mod error;
pub mod meta;
pub mod naming;
pub mod resources;

pub use condition::{
    Condition, ConditionStatus, find_condition, is_condition_true, set_condition,
};
pub use error::{CoreError, Result};
pub use meta::{ObjectKey, ObjectMeta, Resource, ResourceRef};
pub use naming::{membership_name, removal_index_key};
pub use resources::{
    Contact, ContactGroup, ContactGroupMembership, ContactGroupMembershipRemoval,
    ContactGroupMembershipRemovalSpec, ContactGroupMembershipSpec, ContactGroupMembershipStatus,
    ContactGroupProvider, ContactGroupSpec, ContactSpec, ContactStatus, LOOPS_PROVIDER,
    ProviderStatus, set_provider,
};

/// API group/version every record kind in this crate is served under.
pub const API_VERSION: &str = "notification.miloapis.com/v1alpha1";
