use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::extract::{DefaultBodyLimit, FromRequest, State};
use axum::http::{HeaderValue, Method, Request, Response, StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::any;
use axum::Router;
use loops_storage::DynStore;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;
use tracing::{Span, error, info, warn};

use crate::events::WebhookEvent;
use crate::ingest::Ingestor;
use crate::verify::verify_headers;

/// Path the Loops webhook is registered under.
pub const WEBHOOK_PATH: &str = "/apis/emailnotification.k8s.io/v1/loops/contactgroupmemberships";

pub const DEFAULT_BODY_LIMIT: usize = 1024 * 1024;

#[derive(Clone)]
pub struct WebhookState {
    ingestor: Ingestor,
    signing_secret: Arc<str>,
}

impl WebhookState {
    pub fn new(store: DynStore, signing_secret: impl Into<Arc<str>>) -> Self {
        Self {
            ingestor: Ingestor::new(store),
            signing_secret: signing_secret.into(),
        }
    }
}

pub fn build_router(state: WebhookState, body_limit: usize) -> Router {
    Router::new()
        .route(WEBHOOK_PATH, any(receive))
        .with_state(state)
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &Request<_>| {
                    tracing::info_span!(
                        "http.request",
                        http.method = %req.method(),
                        http.target = %req.uri(),
                        http.status_code = tracing::field::Empty,
                    )
                })
                .on_response(|res: &Response<_>, latency: Duration, span: &Span| {
                    span.record("http.status_code", tracing::field::display(res.status().as_u16()));
                    info!(
                        http.status = %res.status().as_u16(),
                        elapsed_ms = %latency.as_millis(),
                        "request handled"
                    );
                }),
        )
        .layer(DefaultBodyLimit::max(body_limit))
}

async fn receive(State(state): State<WebhookState>, request: Request<Body>) -> Response<Body> {
    let method = request.method().clone();
    if method != Method::POST {
        warn!(%method, "method not allowed");
        return (
            StatusCode::METHOD_NOT_ALLOWED,
            [(header::ALLOW, HeaderValue::from_static("POST"))],
        )
            .into_response();
    }

    let headers = request.headers().clone();
    let body = match Bytes::from_request(request, &state).await {
        Ok(body) => body,
        // Over `body_limit`.
        Err(rejection) if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE => {
            warn!(error = %rejection.body_text(), "webhook body too large");
            return StatusCode::PAYLOAD_TOO_LARGE.into_response();
        }
        Err(rejection) => {
            error!(error = %rejection.body_text(), "failed to read webhook body");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    if let Err(err) = verify_headers(&headers, &body, &state.signing_secret) {
        warn!(code = err.code(), error = %err, "webhook verification failed");
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let event = match WebhookEvent::parse(&body) {
        Ok(event) => event,
        Err(err) => {
            warn!(error = %err, "rejecting webhook event");
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    let name = event.name();
    match state.ingestor.handle(&event).await {
        Ok(()) => {
            info!(event = name, "webhook event applied");
            StatusCode::OK.into_response()
        }
        Err(err) => {
            let status = err.status();
            if status.is_server_error() {
                error!(event = name, error = %err, "failed to apply webhook event");
            } else {
                warn!(event = name, error = %err, "rejecting webhook event");
            }
            status.into_response()
        }
    }
}

fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response<Body> {
    let message = if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    };
    error!(panic = %message, "panic in webhook handler");
    StatusCode::INTERNAL_SERVER_ERROR.into_response()
}
