use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::LoopsError;

/// Payload for creating or updating a contact. Empty fields are omitted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactRequest {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub email: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub first_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub last_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscribed: Option<bool>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user_group: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub mailing_lists: HashMap<String, bool>,
}

/// Generic response body.
///
/// `id` is an operation identifier, not a stable reference to the contact.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
}

/// Operations the controllers need from the provider.
#[async_trait]
pub trait LoopsApi: Send + Sync {
    /// `PUT /contacts/update`. Idempotent.
    async fn upsert_contact(&self, request: &ContactRequest) -> Result<ApiResponse, LoopsError>;

    /// `POST /contacts/delete`. Not idempotent: a second call yields 404.
    async fn delete_contact(&self, user_id: &str) -> Result<ApiResponse, LoopsError>;

    /// Upsert with `mailingLists = {list_id: true}`.
    async fn add_to_mailing_list(
        &self,
        user_id: &str,
        list_id: &str,
    ) -> Result<ApiResponse, LoopsError> {
        self.upsert_contact(&ContactRequest {
            user_id: user_id.to_string(),
            mailing_lists: HashMap::from([(list_id.to_string(), true)]),
            ..Default::default()
        })
        .await
    }

    /// Upsert with `mailingLists = {list_id: false}`.
    async fn remove_from_mailing_list(
        &self,
        user_id: &str,
        list_id: &str,
    ) -> Result<ApiResponse, LoopsError> {
        self.upsert_contact(&ContactRequest {
            user_id: user_id.to_string(),
            mailing_lists: HashMap::from([(list_id.to_string(), false)]),
            ..Default::default()
        })
        .await
    }
}
