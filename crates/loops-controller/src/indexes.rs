//! Secondary indexes the webhook uses to map provider identifiers back to records.

use loops_core::{
    Contact, ContactGroup, ContactGroupMembershipRemoval, LOOPS_PROVIDER, Resource, ResourceRef,
    removal_index_key,
};
use loops_storage::{DynStore, ResourceApi, StorageResult, typed_index};
use tracing::debug;

/// Contact by `status.providers[Loops].id`.
pub const CONTACT_PROVIDER_ID_INDEX: &str = "contact-status-providerID";

/// ContactGroup by `spec.providers[Loops].id`.
pub const GROUP_PROVIDER_ID_INDEX: &str = "group-providerID";

/// ContactGroupMembershipRemoval by `contactName/contactNamespace/groupName/groupNamespace`.
pub const MEMBERSHIP_REMOVAL_INDEX: &str = "group-membership-removal";

/// Register all three indexes. Safe to call more than once on the same store.
pub fn register_indexes(store: &DynStore) -> StorageResult<()> {
    store.register_index(
        Contact::KIND,
        CONTACT_PROVIDER_ID_INDEX,
        typed_index::<Contact, _>(|contact| {
            contact
                .status
                .provider_id(LOOPS_PROVIDER)
                .filter(|id| !id.is_empty())
                .map(|id| vec![id.to_string()])
                .unwrap_or_default()
        }),
    )?;

    store.register_index(
        ContactGroup::KIND,
        GROUP_PROVIDER_ID_INDEX,
        typed_index::<ContactGroup, _>(|group| {
            group
                .provider_id(LOOPS_PROVIDER)
                .filter(|id| !id.is_empty())
                .map(|id| vec![id.to_string()])
                .unwrap_or_default()
        }),
    )?;

    store.register_index(
        ContactGroupMembershipRemoval::KIND,
        MEMBERSHIP_REMOVAL_INDEX,
        typed_index::<ContactGroupMembershipRemoval, _>(|removal| {
            vec![removal_index_key(
                &removal.spec.contact_ref,
                &removal.spec.contact_group_ref,
            )]
        }),
    )?;

    debug!(backend = store.backend_name(), "secondary indexes registered");
    Ok(())
}

pub async fn find_contact_by_provider_id(
    store: &DynStore,
    provider_id: &str,
) -> StorageResult<Option<Contact>> {
    ResourceApi::<Contact>::new(store.clone())
        .find_one_by_index(CONTACT_PROVIDER_ID_INDEX, provider_id)
        .await
}

pub async fn find_group_by_provider_id(
    store: &DynStore,
    provider_id: &str,
) -> StorageResult<Option<ContactGroup>> {
    ResourceApi::<ContactGroup>::new(store.clone())
        .find_one_by_index(GROUP_PROVIDER_ID_INDEX, provider_id)
        .await
}

pub async fn find_membership_removal(
    store: &DynStore,
    contact: &ResourceRef,
    group: &ResourceRef,
) -> StorageResult<Option<ContactGroupMembershipRemoval>> {
    ResourceApi::<ContactGroupMembershipRemoval>::new(store.clone())
        .find_one_by_index(MEMBERSHIP_REMOVAL_INDEX, &removal_index_key(contact, group))
        .await
}
