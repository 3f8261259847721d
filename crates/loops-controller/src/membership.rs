//! ContactGroupMembership reconciler: subscribes the contact to the group's
//! Loops mailing list and unsubscribes it on deletion.

use std::sync::Arc;

use async_trait::async_trait;
use loops_client::LoopsApi;
use loops_core::{
    Condition, ConditionStatus, Contact, ContactGroup, ContactGroupMembership, LOOPS_PROVIDER,
    ObjectKey, ResourceRef, find_condition, set_condition, set_provider,
};
use loops_storage::{DynStore, ResourceApi};
use tracing::{error, info};

use crate::controller::{Action, Reconciler};
use crate::error::ReconcileError;
use crate::finalizer::{Finalizer, Finalizers};
use crate::status::patch_status_if_changed;

pub const MEMBERSHIP_FINALIZER: &str = "notification.miloapis.com/loops-contact-group-membership";

pub const MEMBERSHIP_READY_CONDITION: &str = "LoopsContactGroupMembershipReady";
pub const MEMBERSHIP_NOT_CREATED_REASON: &str = "ContactGroupMembershipNotCreated";
pub const MEMBERSHIP_CREATED_REASON: &str = "ContactGroupMembershipCreated";
pub const MEMBERSHIP_NOT_FINALIZED_REASON: &str = "ContactGroupMembershipNotFinalized";

const CONTROLLER_NAME: &str = "loopscontactgroupmembership";

/// Records a membership points at.
#[derive(Debug, Clone)]
pub struct ResolvedMembership {
    pub contact: Contact,
    pub group: ContactGroup,
}

impl ResolvedMembership {
    /// Loops mailing list ID of the group.
    pub fn mailing_list_id(&self) -> Result<&str, ReconcileError> {
        self.group
            .provider_id(LOOPS_PROVIDER)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| ReconcileError::MissingMailingList {
                group: self.group.metadata.key(),
            })
    }
}

async fn get_referenced<R: loops_core::Resource>(
    store: &DynStore,
    reference: &ResourceRef,
) -> Result<R, ReconcileError> {
    let key = reference.key();
    ResourceApi::<R>::new(store.clone())
        .get(&key)
        .await?
        .ok_or(ReconcileError::MissingReference { kind: R::KIND, key })
}

/// Fetch the contact and group a membership references. Both must exist.
pub async fn resolve_references(
    store: &DynStore,
    membership: &ContactGroupMembership,
) -> Result<ResolvedMembership, ReconcileError> {
    let contact = get_referenced::<Contact>(store, &membership.spec.contact_ref).await?;
    let group = get_referenced::<ContactGroup>(store, &membership.spec.contact_group_ref).await?;
    Ok(ResolvedMembership { contact, group })
}

struct RemoveFromListFinalizer {
    store: DynStore,
    memberships: ResourceApi<ContactGroupMembership>,
    loops: Arc<dyn LoopsApi>,
}

impl RemoveFromListFinalizer {
    async fn remove(&self, membership: &ContactGroupMembership) -> Result<(), ReconcileError> {
        let resolved = resolve_references(&self.store, membership).await?;
        let list_id = resolved.mailing_list_id()?;
        self.loops
            .remove_from_mailing_list(&resolved.contact.metadata.uid, list_id)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Finalizer<ContactGroupMembership> for RemoveFromListFinalizer {
    async fn finalize(&self, membership: &mut ContactGroupMembership) -> Result<(), ReconcileError> {
        info!(controller = CONTROLLER_NAME, key = %membership.metadata.key(), "removing contact from Loops mailing list");

        let Err(err) = self.remove(membership).await else {
            return Ok(());
        };

        error!(controller = CONTROLLER_NAME, key = %membership.metadata.key(), error = %err, "failed to remove contact from Loops mailing list");
        let old_status = membership.status.clone();
        let generation = membership.metadata.generation;
        set_condition(
            &mut membership.status.conditions,
            Condition::new(
                MEMBERSHIP_READY_CONDITION,
                ConditionStatus::False,
                MEMBERSHIP_NOT_FINALIZED_REASON,
                format!("Failed to remove Loops contact from mailing list: {err}"),
                generation,
            ),
        );
        patch_status_if_changed(
            &self.memberships,
            membership,
            &old_status,
            &membership.status,
            CONTROLLER_NAME,
        )
        .await?;
        Err(err)
    }
}

pub struct ContactGroupMembershipReconciler {
    store: DynStore,
    memberships: ResourceApi<ContactGroupMembership>,
    loops: Arc<dyn LoopsApi>,
    finalizers: Finalizers<ContactGroupMembership>,
}

impl ContactGroupMembershipReconciler {
    pub fn new(store: DynStore, loops: Arc<dyn LoopsApi>) -> Result<Self, ReconcileError> {
        let memberships = ResourceApi::new(store.clone());
        let mut finalizers = Finalizers::new();
        finalizers.register(
            MEMBERSHIP_FINALIZER,
            Arc::new(RemoveFromListFinalizer {
                store: store.clone(),
                memberships: memberships.clone(),
                loops: loops.clone(),
            }),
        )?;

        Ok(Self {
            store,
            memberships,
            loops,
            finalizers,
        })
    }

    async fn subscribe(
        &self,
        resolved: &ResolvedMembership,
    ) -> Result<(), ReconcileError> {
        let list_id = resolved.mailing_list_id()?;
        self.loops
            .add_to_mailing_list(&resolved.contact.metadata.uid, list_id)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Reconciler for ContactGroupMembershipReconciler {
    type Resource = ContactGroupMembership;

    fn name(&self) -> &'static str {
        CONTROLLER_NAME
    }

    async fn reconcile(&self, key: &ObjectKey) -> Result<Action, ReconcileError> {
        let Some(mut membership) = self.memberships.get(key).await? else {
            info!(controller = CONTROLLER_NAME, key = %key, "membership not found, probably deleted");
            return Ok(Action::Done);
        };

        let finalized = self.finalizers.finalize(&mut membership).await?;
        if finalized.updated {
            return match self.memberships.update(&membership).await {
                Ok(_) => Ok(Action::Done),
                Err(err) if err.is_version_conflict() => {
                    info!(controller = CONTROLLER_NAME, key = %key, "conflict writing finalizers, requeuing");
                    Ok(Action::Requeue)
                }
                Err(err) => Err(err.into()),
            };
        }
        if membership.metadata.is_deleting() {
            return Ok(Action::Done);
        }

        let pending = find_condition(&membership.status.conditions, MEMBERSHIP_READY_CONDITION)
            .is_none_or(|c| c.reason == MEMBERSHIP_NOT_CREATED_REASON);
        if !pending {
            return Ok(Action::Done);
        }

        let resolved = resolve_references(&self.store, &membership).await?;

        let old_status = membership.status.clone();
        let generation = membership.metadata.generation;
        let outcome = self.subscribe(&resolved).await;
        let condition = match &outcome {
            Ok(()) => {
                info!(controller = CONTROLLER_NAME, key = %key, "contact added to Loops mailing list");
                set_provider(
                    &mut membership.status.providers,
                    LOOPS_PROVIDER,
                    &resolved.contact.metadata.uid,
                );
                Condition::new(
                    MEMBERSHIP_READY_CONDITION,
                    ConditionStatus::True,
                    MEMBERSHIP_CREATED_REASON,
                    "Loops contact group membership created on email provider",
                    generation,
                )
            }
            Err(err) => {
                error!(controller = CONTROLLER_NAME, key = %key, error = %err, "failed to add contact to Loops mailing list");
                Condition::new(
                    MEMBERSHIP_READY_CONDITION,
                    ConditionStatus::False,
                    MEMBERSHIP_NOT_CREATED_REASON,
                    format!("Loops contact group membership not created on email provider: {err}"),
                    generation,
                )
            }
        };
        set_condition(&mut membership.status.conditions, condition);

        patch_status_if_changed(
            &self.memberships,
            &membership,
            &old_status,
            &membership.status,
            CONTROLLER_NAME,
        )
        .await?;

        outcome.map(|()| Action::Done)
    }
}
