//! Applies mailing-list events to the declarative store.

use axum::http::StatusCode;
use loops_controller::{
    find_contact_by_provider_id, find_group_by_provider_id, find_membership_removal,
};
use loops_core::{
    Contact, ContactGroup, ContactGroupMembership, ContactGroupMembershipRemoval, ObjectMeta,
    ResourceRef, membership_name,
};
use loops_storage::{DynStore, ResourceApi, StorageError};
use thiserror::Error;
use tracing::{debug, info};

use crate::events::{MailingListEvent, WebhookEvent};

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("event has no contact userId")]
    MissingUserId,

    #[error("event has no mailing list id")]
    MissingMailingListId,

    #[error("no contact with Loops id {0}")]
    ContactNotFound(String),

    #[error("no contact group with Loops mailing list id {0}")]
    GroupNotFound(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl IngestError {
    /// Caller mistakes are 400; store failures are 500 so the provider retries.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

/// The (contact, group) pair an event refers to.
struct Subject {
    contact: Contact,
    group: ContactGroup,
}

impl Subject {
    fn contact_ref(&self) -> ResourceRef {
        self.contact.reference()
    }

    fn group_ref(&self) -> ResourceRef {
        self.group.reference()
    }

    /// Metadata for a record linking the pair, in the contact's namespace.
    fn link_meta(&self) -> ObjectMeta {
        ObjectMeta::named(
            &self.contact.metadata.namespace,
            membership_name(&self.contact_ref(), &self.group_ref()),
        )
    }
}

#[derive(Clone)]
pub struct Ingestor {
    store: DynStore,
    memberships: ResourceApi<ContactGroupMembership>,
    removals: ResourceApi<ContactGroupMembershipRemoval>,
}

impl Ingestor {
    pub fn new(store: DynStore) -> Self {
        Self {
            memberships: ResourceApi::new(store.clone()),
            removals: ResourceApi::new(store.clone()),
            store,
        }
    }

    pub async fn handle(&self, event: &WebhookEvent) -> Result<(), IngestError> {
        let subject = self.resolve(event.mailing_list_event()).await?;
        match event {
            WebhookEvent::MailingListSubscribed(_) => self.subscribed(&subject).await,
            WebhookEvent::MailingListUnsubscribed(_) => self.unsubscribed(&subject).await,
        }
    }

    async fn resolve(&self, event: &MailingListEvent) -> Result<Subject, IngestError> {
        let user_id = event.envelope.contact_identity.user_id.as_str();
        if user_id.is_empty() {
            return Err(IngestError::MissingUserId);
        }
        let contact = find_contact_by_provider_id(&self.store, user_id)
            .await?
            .ok_or_else(|| IngestError::ContactNotFound(user_id.to_string()))?;

        let list_id = event.mailing_list.id.as_str();
        if list_id.is_empty() {
            return Err(IngestError::MissingMailingListId);
        }
        let group = find_group_by_provider_id(&self.store, list_id)
            .await?
            .ok_or_else(|| IngestError::GroupNotFound(list_id.to_string()))?;

        Ok(Subject { contact, group })
    }

    /// Drop any removal tombstone for the pair, then ensure the membership exists.
    async fn subscribed(&self, subject: &Subject) -> Result<(), IngestError> {
        let (contact_ref, group_ref) = (subject.contact_ref(), subject.group_ref());

        if let Some(removal) = find_membership_removal(&self.store, &contact_ref, &group_ref).await? {
            match self.removals.delete(&removal.metadata.key()).await {
                Ok(()) => {
                    info!(removal = %removal.metadata.key(), "membership removal deleted");
                }
                Err(err) if err.is_not_found() => {
                    debug!(removal = %removal.metadata.key(), "membership removal already gone");
                }
                Err(err) => return Err(err.into()),
            }
        }

        let membership = ContactGroupMembership::new(subject.link_meta(), contact_ref, group_ref);
        match self.memberships.create(&membership).await {
            Ok(created) => {
                info!(membership = %created.metadata.key(), "contact group membership created");
                Ok(())
            }
            Err(err) if err.is_already_exists() => self.ensure_live_membership(membership).await,
            Err(err) => Err(err.into()),
        }
    }

    /// The named membership exists. If it is being torn down, its finalizer
    /// will purge it, so the subscription needs a membership of its own.
    async fn ensure_live_membership(
        &self,
        membership: ContactGroupMembership,
    ) -> Result<(), IngestError> {
        let key = membership.metadata.key();
        let named = self.memberships.get(&key).await?;
        if named.as_ref().is_some_and(|m| !m.metadata.is_deleting()) {
            debug!(membership = %key, "contact group membership already exists");
            return Ok(());
        }

        let live = self
            .memberships
            .list(Some(&key.namespace))
            .await?
            .into_iter()
            .find(|m| !m.metadata.is_deleting() && m.spec == membership.spec);
        if let Some(live) = live {
            debug!(membership = %live.metadata.key(), "replacement membership already exists");
            return Ok(());
        }

        let mut replacement = membership;
        replacement.metadata.generate_name = Some(format!("{}-", replacement.metadata.name));
        replacement.metadata.name.clear();
        let created = self.memberships.create(&replacement).await?;
        info!(
            membership = %created.metadata.key(),
            deleting = %key,
            "previous membership is being deleted, created a replacement"
        );
        Ok(())
    }

    /// Record a removal tombstone for the pair unless one exists.
    async fn unsubscribed(&self, subject: &Subject) -> Result<(), IngestError> {
        let (contact_ref, group_ref) = (subject.contact_ref(), subject.group_ref());

        if let Some(removal) = find_membership_removal(&self.store, &contact_ref, &group_ref).await? {
            debug!(removal = %removal.metadata.key(), "membership removal already recorded");
            return Ok(());
        }

        let removal =
            ContactGroupMembershipRemoval::new(subject.link_meta(), contact_ref, group_ref);
        match self.removals.create(&removal).await {
            Ok(created) => {
                info!(removal = %created.metadata.key(), "membership removal created");
                Ok(())
            }
            Err(err) if err.is_already_exists() => {
                debug!(removal = %removal.metadata.key(), "membership removal already exists");
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }
}
