//! Contact, ContactGroup, ContactGroupMembership and ContactGroupMembershipRemoval records.

use serde::{Deserialize, Serialize};

use crate::condition::Condition;
use crate::meta::{ObjectMeta, Resource, ResourceRef};

/// Provider name under which remote identifiers are recorded.
pub const LOOPS_PROVIDER: &str = "Loops";

/// Remote identifier recorded for a provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderStatus {
    pub name: String,
    pub id: String,
}

fn provider_id<'a>(providers: &'a [ProviderStatus], name: &str) -> Option<&'a str> {
    providers
        .iter()
        .find(|p| p.name == name)
        .map(|p| p.id.as_str())
}

/// Record `id` for provider `name`, keeping at most one entry per name.
pub fn set_provider(providers: &mut Vec<ProviderStatus>, name: &str, id: &str) {
    providers.retain(|p| p.name != name);
    providers.push(ProviderStatus {
        name: name.to_string(),
        id: id.to_string(),
    });
}

// ==================== Contact ====================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactSpec {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub given_name: String,
    #[serde(default)]
    pub family_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContactStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub providers: Vec<ProviderStatus>,
}

impl ContactStatus {
    pub fn provider_id(&self, provider: &str) -> Option<&str> {
        provider_id(&self.providers, provider)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: ContactSpec,
    #[serde(default)]
    pub status: ContactStatus,
}

impl Contact {
    pub fn new(metadata: ObjectMeta, spec: ContactSpec) -> Self {
        Self {
            metadata,
            spec,
            status: ContactStatus::default(),
        }
    }

    pub fn reference(&self) -> ResourceRef {
        ResourceRef::new(&self.metadata.name, &self.metadata.namespace)
    }
}

impl Resource for Contact {
    const KIND: &'static str = "Contact";

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

// ==================== ContactGroup ====================

/// Remote mailing list a group maps to for one provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactGroupProvider {
    pub name: String,
    pub id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactGroupSpec {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub display_name: String,
    #[serde(default)]
    pub providers: Vec<ContactGroupProvider>,
}

/// Read-only to this crate's consumers; provisioned upstream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContactGroup {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: ContactGroupSpec,
}

impl ContactGroup {
    /// Remote list ID for the named provider, first match wins.
    pub fn provider_id(&self, provider: &str) -> Option<&str> {
        self.spec
            .providers
            .iter()
            .find(|p| p.name == provider)
            .map(|p| p.id.as_str())
    }

    pub fn reference(&self) -> ResourceRef {
        ResourceRef::new(&self.metadata.name, &self.metadata.namespace)
    }
}

impl Resource for ContactGroup {
    const KIND: &'static str = "ContactGroup";

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

// ==================== ContactGroupMembership ====================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactGroupMembershipSpec {
    pub contact_ref: ResourceRef,
    pub contact_group_ref: ResourceRef,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContactGroupMembershipStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub providers: Vec<ProviderStatus>,
}

impl ContactGroupMembershipStatus {
    pub fn provider_id(&self, provider: &str) -> Option<&str> {
        provider_id(&self.providers, provider)
    }
}

/// Spec references are immutable after creation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContactGroupMembership {
    pub metadata: ObjectMeta,
    pub spec: ContactGroupMembershipSpec,
    #[serde(default)]
    pub status: ContactGroupMembershipStatus,
}

impl ContactGroupMembership {
    pub fn new(metadata: ObjectMeta, contact_ref: ResourceRef, contact_group_ref: ResourceRef) -> Self {
        Self {
            metadata,
            spec: ContactGroupMembershipSpec {
                contact_ref,
                contact_group_ref,
            },
            status: ContactGroupMembershipStatus::default(),
        }
    }
}

impl Resource for ContactGroupMembership {
    const KIND: &'static str = "ContactGroupMembership";

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

// ==================== ContactGroupMembershipRemoval ====================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactGroupMembershipRemovalSpec {
    pub contact_ref: ResourceRef,
    pub contact_group_ref: ResourceRef,
}

/// Tombstone recording that a contact unsubscribed from a group on the provider side.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContactGroupMembershipRemoval {
    pub metadata: ObjectMeta,
    pub spec: ContactGroupMembershipRemovalSpec,
}

impl ContactGroupMembershipRemoval {
    pub fn new(metadata: ObjectMeta, contact_ref: ResourceRef, contact_group_ref: ResourceRef) -> Self {
        Self {
            metadata,
            spec: ContactGroupMembershipRemovalSpec {
                contact_ref,
                contact_group_ref,
            },
        }
    }
}

impl Resource for ContactGroupMembershipRemoval {
    const KIND: &'static str = "ContactGroupMembershipRemoval";

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}
