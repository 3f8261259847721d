//! Contact reconciler: keeps the Loops contact in step with the record and
//! enrols `newsletter-` contacts in the configured newsletter group.

use std::sync::Arc;

use async_trait::async_trait;
use loops_client::{ContactRequest, LoopsApi, LoopsError};
use loops_core::{
    Condition, ConditionStatus, Contact, ContactGroupMembership, LOOPS_PROVIDER, ObjectKey,
    ObjectMeta, ResourceRef, find_condition, is_condition_true, membership_name, set_condition,
    set_provider,
};
use loops_storage::{DynStore, ResourceApi};
use tracing::{error, info, warn};

use crate::controller::{Action, Reconciler};
use crate::error::ReconcileError;
use crate::finalizer::{Finalizer, Finalizers};
use crate::status::patch_status_if_changed;

pub const CONTACT_FINALIZER: &str = "notification.miloapis.com/loops-contact";

pub const CONTACT_READY_CONDITION: &str = "LoopsContactReady";
pub const CONTACT_NOT_CREATED_REASON: &str = "ContactNotCreated";
pub const CONTACT_CREATED_REASON: &str = "ContactCreated";
pub const CONTACT_UPDATED_REASON: &str = "ContactUpdated";
pub const CONTACT_NOT_UPDATED_REASON: &str = "ContactNotUpdated";

pub const NEWSLETTER_ADDED_CONDITION: &str = "NewsLetterAdded";
pub const NEWSLETTER_ADDED_REASON: &str = "NewsLetterAdded";
pub const NEWSLETTER_NOT_ADDED_REASON: &str = "NewsLetterNotAdded";

/// Contacts whose name starts with this are added to the newsletter group.
pub const NEWSLETTER_PREFIX: &str = "newsletter-";

/// `source` attribute recorded on contacts upserted by this controller.
pub const CONTACT_SOURCE: &str = "email-provider-loops-controller";

const CONTROLLER_NAME: &str = "loopscontact";

struct DeleteContactFinalizer {
    loops: Arc<dyn LoopsApi>,
}

#[async_trait]
impl Finalizer<Contact> for DeleteContactFinalizer {
    async fn finalize(&self, contact: &mut Contact) -> Result<(), ReconcileError> {
        info!(controller = CONTROLLER_NAME, key = %contact.metadata.key(), "deleting Loops contact");
        match self.loops.delete_contact(&contact.metadata.uid).await {
            Ok(_) => Ok(()),
            Err(err) if err.is_not_found() => {
                info!(controller = CONTROLLER_NAME, key = %contact.metadata.key(), "Loops contact not found, probably deleted already");
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }
}

pub struct ContactReconciler {
    contacts: ResourceApi<Contact>,
    memberships: ResourceApi<ContactGroupMembership>,
    loops: Arc<dyn LoopsApi>,
    finalizers: Finalizers<Contact>,
    newsletter_group: Option<ResourceRef>,
}

impl ContactReconciler {
    /// `newsletter_group` of `None` disables the newsletter side effect.
    pub fn new(
        store: DynStore,
        loops: Arc<dyn LoopsApi>,
        newsletter_group: Option<ResourceRef>,
    ) -> Result<Self, ReconcileError> {
        let mut finalizers = Finalizers::new();
        finalizers.register(
            CONTACT_FINALIZER,
            Arc::new(DeleteContactFinalizer {
                loops: loops.clone(),
            }),
        )?;

        Ok(Self {
            contacts: ResourceApi::new(store.clone()),
            memberships: ResourceApi::new(store),
            loops,
            finalizers,
            newsletter_group,
        })
    }

    async fn upsert_contact(&self, contact: &Contact) -> Result<(), LoopsError> {
        self.loops
            .upsert_contact(&ContactRequest {
                email: contact.spec.email.clone(),
                user_id: contact.metadata.uid.clone(),
                first_name: contact.spec.given_name.clone(),
                last_name: contact.spec.family_name.clone(),
                source: CONTACT_SOURCE.to_string(),
                subscribed: Some(true),
                ..Default::default()
            })
            .await
            .map(|_| ())
    }

    fn set_ready(
        contact: &mut Contact,
        status: ConditionStatus,
        reason: &str,
        message: String,
    ) {
        let generation = contact.metadata.generation;
        set_condition(
            &mut contact.status.conditions,
            Condition::new(CONTACT_READY_CONDITION, status, reason, message, generation),
        );
    }

    async fn create_remote(&self, contact: &mut Contact) -> Result<(), ReconcileError> {
        match self.upsert_contact(contact).await {
            Ok(()) => {
                info!(controller = CONTROLLER_NAME, key = %contact.metadata.key(), "Loops contact created");
                Self::set_ready(
                    contact,
                    ConditionStatus::True,
                    CONTACT_CREATED_REASON,
                    "Loops contact created on email provider".to_string(),
                );
                let uid = contact.metadata.uid.clone();
                set_provider(&mut contact.status.providers, LOOPS_PROVIDER, &uid);
                Ok(())
            }
            Err(err) if err.is_bad_request() => {
                info!(controller = CONTROLLER_NAME, key = %contact.metadata.key(), error = %err, "bad request when creating Loops contact");
                Self::set_ready(
                    contact,
                    ConditionStatus::False,
                    CONTACT_NOT_CREATED_REASON,
                    format!("Loops contact not created on email provider: {err}"),
                );
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn update_remote(&self, contact: &mut Contact) -> Result<(), ReconcileError> {
        match self.upsert_contact(contact).await {
            Ok(()) => {
                info!(controller = CONTROLLER_NAME, key = %contact.metadata.key(), "Loops contact updated");
                Self::set_ready(
                    contact,
                    ConditionStatus::True,
                    CONTACT_UPDATED_REASON,
                    "Loops contact updated on email provider".to_string(),
                );
                Ok(())
            }
            Err(err) if err.is_bad_request() => {
                info!(controller = CONTROLLER_NAME, key = %contact.metadata.key(), error = %err, "bad request when updating Loops contact");
                Self::set_ready(
                    contact,
                    ConditionStatus::False,
                    CONTACT_NOT_UPDATED_REASON,
                    format!("Loops contact not updated on email provider: {err}"),
                );
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Create the newsletter membership. Returns the error to surface after the status write.
    async fn add_to_newsletter(
        &self,
        contact: &mut Contact,
        group: &ResourceRef,
    ) -> Option<ReconcileError> {
        if is_condition_true(&contact.status.conditions, NEWSLETTER_ADDED_CONDITION) {
            return None;
        }

        let contact_ref = contact.reference();
        let membership = ContactGroupMembership::new(
            ObjectMeta::named(
                &contact.metadata.namespace,
                membership_name(&contact_ref, group),
            ),
            contact_ref,
            group.clone(),
        );

        let generation = contact.metadata.generation;
        let (condition, failure) = match self.memberships.create(&membership).await {
            Ok(_) => {
                info!(controller = CONTROLLER_NAME, key = %contact.metadata.key(), membership = %membership.metadata.name, "newsletter membership created");
                (added_condition(generation), None)
            }
            Err(err) if err.is_already_exists() => {
                info!(controller = CONTROLLER_NAME, key = %contact.metadata.key(), membership = %membership.metadata.name, "newsletter membership already exists");
                (added_condition(generation), None)
            }
            Err(err) => {
                error!(controller = CONTROLLER_NAME, key = %contact.metadata.key(), error = %err, "failed to create newsletter membership");
                let condition = Condition::new(
                    NEWSLETTER_ADDED_CONDITION,
                    ConditionStatus::False,
                    NEWSLETTER_NOT_ADDED_REASON,
                    format!("Contact not added to Newsletter list: {err}"),
                    generation,
                );
                let failure = ReconcileError::Newsletter {
                    contact: contact.metadata.key(),
                    message: err.to_string(),
                };
                (condition, Some(failure))
            }
        };
        set_condition(&mut contact.status.conditions, condition);
        failure
    }
}

fn added_condition(generation: i64) -> Condition {
    Condition::new(
        NEWSLETTER_ADDED_CONDITION,
        ConditionStatus::True,
        NEWSLETTER_ADDED_REASON,
        "Contact added to Newsletter list on email provider.",
        generation,
    )
}

#[async_trait]
impl Reconciler for ContactReconciler {
    type Resource = Contact;

    fn name(&self) -> &'static str {
        CONTROLLER_NAME
    }

    async fn reconcile(&self, key: &ObjectKey) -> Result<Action, ReconcileError> {
        let Some(mut contact) = self.contacts.get(key).await? else {
            info!(controller = CONTROLLER_NAME, key = %key, "contact not found, probably deleted");
            return Ok(Action::Done);
        };

        let finalized = self.finalizers.finalize(&mut contact).await?;
        if finalized.updated {
            return match self.contacts.update(&contact).await {
                Ok(_) => Ok(Action::Done),
                Err(err) if err.is_version_conflict() => {
                    info!(controller = CONTROLLER_NAME, key = %key, "conflict writing finalizers, requeuing");
                    Ok(Action::Requeue)
                }
                Err(err) => Err(err.into()),
            };
        }
        if contact.metadata.is_deleting() {
            return Ok(Action::Done);
        }

        let old_status = contact.status.clone();
        let ready = find_condition(&contact.status.conditions, CONTACT_READY_CONDITION)
            .map(|c| (c.reason.clone(), c.observed_generation));

        match ready {
            None => self.create_remote(&mut contact).await?,
            Some((reason, _)) if reason == CONTACT_NOT_CREATED_REASON => {
                self.create_remote(&mut contact).await?
            }
            Some((_, observed)) if observed != contact.metadata.generation => {
                self.update_remote(&mut contact).await?
            }
            Some(_) => {}
        }

        let newsletter_failure = match &self.newsletter_group {
            Some(group) if contact.metadata.name.starts_with(NEWSLETTER_PREFIX) => {
                self.add_to_newsletter(&mut contact, group).await
            }
            _ => None,
        };

        patch_status_if_changed(
            &self.contacts,
            &contact,
            &old_status,
            &contact.status,
            CONTROLLER_NAME,
        )
        .await?;

        if let Some(failure) = newsletter_failure {
            warn!(controller = CONTROLLER_NAME, key = %key, "newsletter enrolment failed, will retry");
            return Err(failure);
        }

        info!(controller = CONTROLLER_NAME, key = %key, "contact reconciled");
        Ok(Action::Done)
    }
}
