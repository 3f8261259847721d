//! Deterministic names and composite keys for (contact, group) pairs.

use sha2::{Digest, Sha256};

use crate::meta::ResourceRef;

const NAME_HASH_LEN: usize = 10;

/// Name for a membership or removal record linking `contact` to `group`.
///
/// Every writer derives the name from the same pair so duplicate creates
/// collide on `AlreadyExists` instead of producing a second record.
pub fn membership_name(contact: &ResourceRef, group: &ResourceRef) -> String {
    let mut hasher = Sha256::new();
    hasher.update(
        format!(
            "{}/{}/{}/{}",
            contact.namespace, contact.name, group.namespace, group.name
        )
        .as_bytes(),
    );
    let digest = hex::encode(hasher.finalize());
    format!("{}-{}-{}", group.name, contact.name, &digest[..NAME_HASH_LEN])
}

/// Composite index key `contactName/contactNamespace/groupName/groupNamespace`.
pub fn removal_index_key(contact: &ResourceRef, group: &ResourceRef) -> String {
    format!(
        "{}/{}/{}/{}",
        contact.name, contact.namespace, group.name, group.namespace
    )
}
