use std::sync::Arc;

use async_trait::async_trait;
use axum::body::{Body, Bytes, to_bytes};
use axum::http::{Method, Request, StatusCode, header};
use axum::Router;
use loops_controller::register_indexes;
use loops_core::{
    Contact, ContactGroup, ContactGroupMembership, ContactGroupMembershipRemoval,
    ContactGroupProvider, ContactGroupSpec, ContactSpec, LOOPS_PROVIDER, ObjectKey, ObjectMeta,
    membership_name, set_provider,
};
use loops_db_memory::create_store;
use loops_storage::{
    DynStore, IndexFn, ObjectEvent, ResourceApi, ResourceStore, StorageError, StoredObject,
};
use loops_webhook::{
    WEBHOOK_ID_HEADER, WEBHOOK_PATH, WEBHOOK_SIGNATURE_HEADER, WEBHOOK_TIMESTAMP_HEADER,
    WebhookState, build_router, sign,
};
use serde_json::{Value, json};
use tokio::sync::broadcast;
use tower::ServiceExt;

const SECRET: &str = "whsec_c2VjcmV0LWtleS1mb3ItdGVzdHM=";

struct Fixture {
    store: DynStore,
    router: Router,
    contact: Contact,
    group: ContactGroup,
}

async fn seed(store: &DynStore) -> (Contact, ContactGroup) {
    register_indexes(store).unwrap();

    let contacts = ResourceApi::<Contact>::new(store.clone());
    let mut contact = contacts
        .create(&Contact::new(
            ObjectMeta::named("people", "alice"),
            ContactSpec {
                email: "a@example.com".into(),
                ..Default::default()
            },
        ))
        .await
        .unwrap();
    set_provider(&mut contact.status.providers, LOOPS_PROVIDER, "u1");
    let contact = contacts.update_status(&contact).await.unwrap();

    let group = ResourceApi::<ContactGroup>::new(store.clone())
        .create(&ContactGroup {
            metadata: ObjectMeta::named("groups", "news"),
            spec: ContactGroupSpec {
                display_name: "News".into(),
                providers: vec![ContactGroupProvider {
                    name: LOOPS_PROVIDER.into(),
                    id: "g1".into(),
                }],
            },
        })
        .await
        .unwrap();

    (contact, group)
}

async fn fixture() -> Fixture {
    let store = create_store();
    let (contact, group) = seed(&store).await;
    Fixture {
        router: build_router(WebhookState::new(store.clone(), SECRET), 1024 * 1024),
        store,
        contact,
        group,
    }
}

fn event(name: &str, user_id: &str, list_id: &str) -> Value {
    json!({
        "eventName": name,
        "eventTime": 1734425918,
        "webhookSchemaVersion": "1.0.0",
        "contactIdentity": {"id": "cm1", "email": "a@example.com", "userId": user_id},
        "mailingList": {"id": list_id, "name": "News", "description": "", "isPublic": true}
    })
}

fn subscribed(user_id: &str, list_id: &str) -> Value {
    event("contact.mailingList.subscribed", user_id, list_id)
}

fn unsubscribed(user_id: &str, list_id: &str) -> Value {
    event("contact.mailingList.unsubscribed", user_id, list_id)
}

fn signed(body: &[u8]) -> Request<Body> {
    let signature = sign(SECRET, "msg_1", "1734425918", body).unwrap();
    Request::builder()
        .method(Method::POST)
        .uri(WEBHOOK_PATH)
        .header(header::CONTENT_TYPE, "application/json")
        .header(WEBHOOK_ID_HEADER, "msg_1")
        .header(WEBHOOK_TIMESTAMP_HEADER, "1734425918")
        .header(WEBHOOK_SIGNATURE_HEADER, signature)
        .body(Body::from(body.to_vec()))
        .unwrap()
}

async fn send(router: &Router, request: Request<Body>) -> StatusCode {
    router.clone().oneshot(request).await.unwrap().status()
}

async fn post(router: &Router, body: &Value) -> StatusCode {
    send(router, signed(body.to_string().as_bytes())).await
}

impl Fixture {
    async fn memberships(&self) -> Vec<ContactGroupMembership> {
        ResourceApi::<ContactGroupMembership>::new(self.store.clone())
            .list(None)
            .await
            .unwrap()
    }

    async fn removals(&self) -> Vec<ContactGroupMembershipRemoval> {
        ResourceApi::<ContactGroupMembershipRemoval>::new(self.store.clone())
            .list(None)
            .await
            .unwrap()
    }

    async fn assert_nothing_created(&self) {
        assert!(self.memberships().await.is_empty());
        assert!(self.removals().await.is_empty());
    }
}

#[tokio::test]
async fn subscribed_event_creates_membership() {
    let f = fixture().await;

    assert_eq!(post(&f.router, &subscribed("u1", "g1")).await, StatusCode::OK);

    let memberships = f.memberships().await;
    assert_eq!(memberships.len(), 1);
    let membership = &memberships[0];
    assert_eq!(membership.spec.contact_ref, f.contact.reference());
    assert_eq!(membership.spec.contact_group_ref, f.group.reference());
    assert_eq!(membership.metadata.namespace, "people");
    assert_eq!(
        membership.metadata.name,
        membership_name(&f.contact.reference(), &f.group.reference())
    );
}

#[tokio::test]
async fn subscribed_event_is_idempotent_and_clears_removal() {
    let f = fixture().await;
    assert_eq!(post(&f.router, &unsubscribed("u1", "g1")).await, StatusCode::OK);
    assert_eq!(f.removals().await.len(), 1);

    assert_eq!(post(&f.router, &subscribed("u1", "g1")).await, StatusCode::OK);
    assert_eq!(post(&f.router, &subscribed("u1", "g1")).await, StatusCode::OK);

    assert_eq!(f.memberships().await.len(), 1);
    assert!(f.removals().await.is_empty());
}

#[tokio::test]
async fn subscribe_unsubscribe_subscribe_ends_subscribed() {
    let f = fixture().await;
    for body in [
        subscribed("u1", "g1"),
        unsubscribed("u1", "g1"),
        subscribed("u1", "g1"),
    ] {
        assert_eq!(post(&f.router, &body).await, StatusCode::OK);
    }

    assert_eq!(f.memberships().await.len(), 1);
    assert!(f.removals().await.is_empty());
}

#[tokio::test]
async fn resubscribe_while_membership_is_deleting_keeps_a_membership() {
    let f = fixture().await;
    let memberships = ResourceApi::<ContactGroupMembership>::new(f.store.clone());
    assert_eq!(post(&f.router, &subscribed("u1", "g1")).await, StatusCode::OK);

    // Hold the membership in deletion the way a pending finalizer would.
    let mut held = f.memberships().await.remove(0);
    let key = held.metadata.key();
    held.metadata.finalizers.push("test.example.com/hold".into());
    memberships.update(&held).await.unwrap();
    memberships.delete(&key).await.unwrap();
    assert!(memberships.get_required(&key).await.unwrap().metadata.is_deleting());

    assert_eq!(post(&f.router, &subscribed("u1", "g1")).await, StatusCode::OK);
    assert_eq!(post(&f.router, &subscribed("u1", "g1")).await, StatusCode::OK);

    let mut released = memberships.get_required(&key).await.unwrap();
    released.metadata.finalizers.clear();
    memberships.update(&released).await.unwrap();
    assert!(memberships.get(&key).await.unwrap().is_none());

    let live = f.memberships().await;
    assert_eq!(live.len(), 1);
    assert!(!live[0].metadata.is_deleting());
    assert_ne!(live[0].metadata.name, key.name);
    assert!(live[0].metadata.name.starts_with(&key.name));
    assert_eq!(live[0].spec.contact_ref, f.contact.reference());
    assert_eq!(live[0].spec.contact_group_ref, f.group.reference());
}

#[tokio::test]
async fn duplicate_provider_ids_resolve_to_the_oldest_contact() {
    let f = fixture().await;
    let contacts = ResourceApi::<Contact>::new(f.store.clone());
    let mut newer = contacts
        .create(&Contact::new(
            ObjectMeta::named("people", "alice-copy"),
            ContactSpec {
                email: "copy@example.com".into(),
                ..Default::default()
            },
        ))
        .await
        .unwrap();
    set_provider(&mut newer.status.providers, LOOPS_PROVIDER, "u1");
    contacts.update_status(&newer).await.unwrap();

    assert_eq!(post(&f.router, &subscribed("u1", "g1")).await, StatusCode::OK);

    let memberships = f.memberships().await;
    assert_eq!(memberships.len(), 1);
    assert_eq!(memberships[0].spec.contact_ref, f.contact.reference());
}

#[tokio::test]
async fn unsubscribed_event_records_one_removal() {
    let f = fixture().await;

    assert_eq!(post(&f.router, &unsubscribed("u1", "g1")).await, StatusCode::OK);
    assert_eq!(post(&f.router, &unsubscribed("u1", "g1")).await, StatusCode::OK);

    let removals = f.removals().await;
    assert_eq!(removals.len(), 1);
    assert_eq!(removals[0].spec.contact_ref, f.contact.reference());
    assert_eq!(removals[0].spec.contact_group_ref, f.group.reference());
    assert!(f.memberships().await.is_empty());
}

#[tokio::test]
async fn unsubscribe_leaves_existing_membership_alone() {
    let f = fixture().await;
    assert_eq!(post(&f.router, &subscribed("u1", "g1")).await, StatusCode::OK);

    assert_eq!(post(&f.router, &unsubscribed("u1", "g1")).await, StatusCode::OK);

    let memberships = f.memberships().await;
    assert_eq!(memberships.len(), 1);
    assert!(!memberships[0].metadata.is_deleting());
    assert_eq!(f.removals().await.len(), 1);
}

#[tokio::test]
async fn unresolvable_subjects_are_bad_requests() {
    let f = fixture().await;

    assert_eq!(post(&f.router, &subscribed("", "g1")).await, StatusCode::BAD_REQUEST);
    assert_eq!(post(&f.router, &subscribed("nobody", "g1")).await, StatusCode::BAD_REQUEST);
    assert_eq!(post(&f.router, &subscribed("u1", "")).await, StatusCode::BAD_REQUEST);
    assert_eq!(post(&f.router, &unsubscribed("u1", "missing")).await, StatusCode::BAD_REQUEST);

    f.assert_nothing_created().await;
}

#[tokio::test]
async fn contact_is_resolved_by_provider_id_not_uid() {
    let f = fixture().await;
    let status = post(&f.router, &subscribed(&f.contact.metadata.uid, "g1")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    f.assert_nothing_created().await;
}

#[tokio::test]
async fn unknown_or_malformed_events_are_bad_requests() {
    let f = fixture().await;

    let unknown = event("contact.created", "u1", "g1");
    assert_eq!(post(&f.router, &unknown).await, StatusCode::BAD_REQUEST);

    let status = send(&f.router, signed(b"not json")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let malformed = json!({"eventName": "contact.mailingList.subscribed", "mailingList": 7});
    assert_eq!(post(&f.router, &malformed).await, StatusCode::BAD_REQUEST);

    f.assert_nothing_created().await;
}

#[tokio::test]
async fn bad_signatures_are_unauthorized() {
    let f = fixture().await;
    let body = subscribed("u1", "g1").to_string();

    let mut tampered = signed(body.as_bytes());
    *tampered.body_mut() = Body::from(body.replace("g1", "g2"));
    assert_eq!(send(&f.router, tampered).await, StatusCode::UNAUTHORIZED);

    let mut unsigned = signed(body.as_bytes());
    unsigned.headers_mut().remove(WEBHOOK_SIGNATURE_HEADER);
    assert_eq!(send(&f.router, unsigned).await, StatusCode::UNAUTHORIZED);

    let wrong_secret = build_router(
        WebhookState::new(f.store.clone(), "whsec_b3RoZXIta2V5"),
        1024 * 1024,
    );
    assert_eq!(send(&wrong_secret, signed(body.as_bytes())).await, StatusCode::UNAUTHORIZED);

    f.assert_nothing_created().await;
}

#[tokio::test]
async fn non_post_is_method_not_allowed() {
    let f = fixture().await;
    let response = f
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method(Method::GET)
                .uri(WEBHOOK_PATH)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(response.headers()[header::ALLOW], "POST");
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert!(body.is_empty());
}

#[tokio::test]
async fn oversized_bodies_are_rejected() {
    let f = fixture().await;
    let router = build_router(WebhookState::new(f.store.clone(), SECRET), 64);
    let body = subscribed("u1", "g1").to_string();
    assert!(body.len() > 64);

    let status = send(&router, signed(body.as_bytes())).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
}

/// Wraps a store and breaks index lookups, either by failing or panicking.
struct BrokenStore {
    inner: DynStore,
    panic: bool,
}

#[async_trait]
impl ResourceStore for BrokenStore {
    async fn get(&self, kind: &str, key: &ObjectKey) -> Result<Option<StoredObject>, StorageError> {
        self.inner.get(kind, key).await
    }

    async fn list(
        &self,
        kind: &str,
        namespace: Option<&str>,
    ) -> Result<Vec<StoredObject>, StorageError> {
        self.inner.list(kind, namespace).await
    }

    async fn list_by_index(
        &self,
        _kind: &str,
        _index: &str,
        _value: &str,
    ) -> Result<Vec<StoredObject>, StorageError> {
        if self.panic {
            panic!("index lookup exploded");
        }
        Err(StorageError::internal("index unavailable"))
    }

    async fn create(&self, kind: &str, object: &Value) -> Result<StoredObject, StorageError> {
        self.inner.create(kind, object).await
    }

    async fn update(&self, kind: &str, object: &Value) -> Result<StoredObject, StorageError> {
        self.inner.update(kind, object).await
    }

    async fn update_status(
        &self,
        kind: &str,
        object: &Value,
    ) -> Result<StoredObject, StorageError> {
        self.inner.update_status(kind, object).await
    }

    async fn delete(&self, kind: &str, key: &ObjectKey) -> Result<(), StorageError> {
        self.inner.delete(kind, key).await
    }

    fn register_index(&self, kind: &str, name: &str, index: IndexFn) -> Result<(), StorageError> {
        self.inner.register_index(kind, name, index)
    }

    fn subscribe(&self) -> broadcast::Receiver<ObjectEvent> {
        self.inner.subscribe()
    }

    fn backend_name(&self) -> &'static str {
        "broken"
    }
}

async fn broken_router(panic: bool) -> (DynStore, Router) {
    let inner = create_store();
    seed(&inner).await;
    let store: DynStore = Arc::new(BrokenStore {
        inner: inner.clone(),
        panic,
    });
    (inner, build_router(WebhookState::new(store, SECRET), 1024 * 1024))
}

#[tokio::test]
async fn store_failures_are_internal_errors() {
    let (store, router) = broken_router(false).await;
    assert_eq!(
        post(&router, &subscribed("u1", "g1")).await,
        StatusCode::INTERNAL_SERVER_ERROR
    );
    assert!(
        ResourceApi::<ContactGroupMembership>::new(store)
            .list(None)
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn handler_panics_become_internal_errors() {
    let (_, router) = broken_router(true).await;
    assert_eq!(
        post(&router, &subscribed("u1", "g1")).await,
        StatusCode::INTERNAL_SERVER_ERROR
    );
    // The router keeps serving after a panic.
    assert_eq!(
        post(&router, &subscribed("", "g1")).await,
        StatusCode::BAD_REQUEST
    );
}

#[tokio::test]
async fn method_is_checked_before_the_body_is_read() {
    let f = fixture().await;
    let router = build_router(WebhookState::new(f.store.clone(), SECRET), 16);
    let request = Request::builder()
        .method(Method::GET)
        .uri(WEBHOOK_PATH)
        .body(Body::from(vec![b'x'; 1024]))
        .unwrap();

    assert_eq!(send(&router, request).await, StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn unreadable_body_is_a_server_error() {
    let f = fixture().await;
    let chunks: Vec<Result<Bytes, std::io::Error>> = vec![
        Ok(Bytes::from_static(b"{\"eventName\"")),
        Err(std::io::Error::other("connection reset")),
    ];
    let request = Request::builder()
        .method(Method::POST)
        .uri(WEBHOOK_PATH)
        .header(WEBHOOK_ID_HEADER, "msg_1")
        .header(WEBHOOK_TIMESTAMP_HEADER, "1734425918")
        .header(WEBHOOK_SIGNATURE_HEADER, "v1,AAAA")
        .body(Body::from_stream(futures_util::stream::iter(chunks)))
        .unwrap();

    assert_eq!(send(&f.router, request).await, StatusCode::INTERNAL_SERVER_ERROR);
    f.assert_nothing_created().await;
}
