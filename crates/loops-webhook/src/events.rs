//! Typed Loops webhook events.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const MAILING_LIST_SUBSCRIBED: &str = "contact.mailingList.subscribed";
pub const MAILING_LIST_UNSUBSCRIBED: &str = "contact.mailingList.unsubscribed";

/// Fields shared by every event. All default when absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EventEnvelope {
    pub event_name: String,
    pub event_time: i64,
    pub webhook_schema_version: String,
    pub contact_identity: ContactIdentity,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContactIdentity {
    pub id: String,
    pub email: String,
    /// The contact's UID as sent on upsert.
    pub user_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MailingList {
    pub id: String,
    pub name: String,
    pub description: String,
    pub is_public: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MailingListEvent {
    #[serde(flatten)]
    pub envelope: EventEnvelope,
    #[serde(default)]
    pub mailing_list: MailingList,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WebhookEvent {
    MailingListSubscribed(MailingListEvent),
    MailingListUnsubscribed(MailingListEvent),
}

#[derive(Debug, Error)]
pub enum EventParseError {
    #[error("malformed event envelope: {0}")]
    MalformedEnvelope(#[source] serde_json::Error),

    #[error("unknown event type {0:?}")]
    UnknownEvent(String),

    #[error("malformed {event} payload: {source}")]
    MalformedPayload {
        event: String,
        #[source]
        source: serde_json::Error,
    },
}

impl WebhookEvent {
    /// Decode a delivery body, dispatching on `eventName`.
    pub fn parse(body: &[u8]) -> Result<Self, EventParseError> {
        let envelope: EventEnvelope =
            serde_json::from_slice(body).map_err(EventParseError::MalformedEnvelope)?;

        let payload = |event: &str| {
            serde_json::from_slice::<MailingListEvent>(body).map_err(|source| {
                EventParseError::MalformedPayload {
                    event: event.to_string(),
                    source,
                }
            })
        };

        match envelope.event_name.as_str() {
            MAILING_LIST_SUBSCRIBED => Ok(Self::MailingListSubscribed(payload(
                MAILING_LIST_SUBSCRIBED,
            )?)),
            MAILING_LIST_UNSUBSCRIBED => Ok(Self::MailingListUnsubscribed(payload(
                MAILING_LIST_UNSUBSCRIBED,
            )?)),
            _ => Err(EventParseError::UnknownEvent(envelope.event_name)),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::MailingListSubscribed(_) => MAILING_LIST_SUBSCRIBED,
            Self::MailingListUnsubscribed(_) => MAILING_LIST_UNSUBSCRIBED,
        }
    }

    pub fn mailing_list_event(&self) -> &MailingListEvent {
        match self {
            Self::MailingListSubscribed(event) | Self::MailingListUnsubscribed(event) => event,
        }
    }
}
