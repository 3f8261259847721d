//! Loops webhook ingestion.
//!
//! Verifies signed mailing-list deliveries and turns them into
//! ContactGroupMembership and ContactGroupMembershipRemoval records.

pub mod events;
pub mod ingest;
pub mod router;
pub mod verify;

pub use events::{
    ContactIdentity, EventEnvelope, EventParseError, MAILING_LIST_SUBSCRIBED,
    MAILING_LIST_UNSUBSCRIBED, MailingList, MailingListEvent, WebhookEvent,
};
pub use ingest::{IngestError, Ingestor};
pub use router::{DEFAULT_BODY_LIMIT, WEBHOOK_PATH, WebhookState, build_router};
pub use verify::{
    VerificationError, WEBHOOK_ID_HEADER, WEBHOOK_SIGNATURE_HEADER, WEBHOOK_TIMESTAMP_HEADER,
    sign, verify, verify_headers,
};
