//! Signed webhook receiver for the host site's server.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, HeaderName, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::json;
use spool_core::signature::{
    verify_signature, DELIVERY_HEADER, ERROR_HEADER, EVENT_HEADER, SIGNATURE_HEADER,
    TIMESTAMP_HEADER,
};
use spool_core::ContentEvent;
use tokio::sync::Mutex;
use tower_http::cors::{Any, CorsLayer};

use crate::handler::ChangeHandler;

/// Number of recent delivery ids remembered for replay detection.
pub const DELIVERY_LOG_CAPACITY: usize = 1024;

/// Bounded set of delivery ids, oldest evicted first.
#[derive(Debug)]
pub struct DeliveryLog {
    capacity: usize,
    order: VecDeque<String>,
    seen: HashSet<String>,
}

impl Default for DeliveryLog {
    fn default() -> Self {
        Self::with_capacity(DELIVERY_LOG_CAPACITY)
    }
}

impl DeliveryLog {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            order: VecDeque::new(),
            seen: HashSet::new(),
        }
    }

    /// Record `id`; `false` when it was already recorded.
    pub fn begin(&mut self, id: &str) -> bool {
        if self.seen.contains(id) {
            return false;
        }
        if self.order.len() == self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        self.order.push_back(id.to_string());
        self.seen.insert(id.to_string());
        true
    }

    /// Forget `id` so a redelivery is processed again.
    pub fn release(&mut self, id: &str) {
        if self.seen.remove(id) {
            self.order.retain(|entry| entry != id);
        }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

struct ReceiverState<H> {
    secret: String,
    handler: Arc<H>,
    deliveries: Mutex<DeliveryLog>,
}

/// Verifies, deduplicates and dispatches incoming change webhooks.
pub struct WebhookReceiver<H> {
    state: Arc<ReceiverState<H>>,
}

impl<H> Clone for WebhookReceiver<H> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<H: ChangeHandler> WebhookReceiver<H> {
    pub fn new(secret: impl Into<String>, handler: Arc<H>) -> Self {
        Self {
            state: Arc::new(ReceiverState {
                secret: secret.into(),
                handler,
                deliveries: Mutex::new(DeliveryLog::default()),
            }),
        }
    }

    /// Router serving `POST` on `path`, with CORS preflight answered by the layer.
    pub fn router(&self, path: &str) -> Router {
        Router::new()
            .route(path, post(receive::<H>))
            .with_state(Arc::clone(&self.state))
            .layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods([Method::POST, Method::OPTIONS])
                    .allow_headers([
                        CONTENT_TYPE,
                        HeaderName::from_static(SIGNATURE_HEADER),
                        HeaderName::from_static(DELIVERY_HEADER),
                        HeaderName::from_static(EVENT_HEADER),
                        HeaderName::from_static(TIMESTAMP_HEADER),
                    ]),
            )
    }
}

async fn receive<H: ChangeHandler>(
    State(state): State<Arc<ReceiverState<H>>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(signature) = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
    else {
        tracing::warn!("Rejected webhook without signature");
        return error_response(StatusCode::UNAUTHORIZED, "Missing signature");
    };
    if !verify_signature(&state.secret, &body, signature) {
        tracing::warn!("Rejected webhook with invalid signature");
        return error_response(StatusCode::UNAUTHORIZED, "Invalid signature");
    }

    let event: ContentEvent = match serde_json::from_slice(&body) {
        Ok(event) => event,
        Err(error) => {
            tracing::warn!(%error, "Rejected webhook with malformed payload");
            return error_response(StatusCode::BAD_REQUEST, "Invalid JSON payload");
        }
    };

    let delivery_id = headers
        .get(DELIVERY_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    if let Some(id) = delivery_id.as_deref() {
        if !state.deliveries.lock().await.begin(id) {
            tracing::debug!(delivery = id, "Ignoring replayed webhook delivery");
            return (
                StatusCode::OK,
                Json(json!({ "received": true, "duplicate": true })),
            )
                .into_response();
        }
    }

    // Spawned so a panicking handler surfaces as a join error
    let handler = Arc::clone(&state.handler);
    let task_event = event.clone();
    let outcome = tokio::spawn(async move { handler.handle(&task_event).await }).await;

    let message = match outcome {
        Ok(Ok(())) => {
            tracing::info!(
                delivery = delivery_id.as_deref().unwrap_or("none"),
                event = %event.event,
                collection = %event.collection,
                slug = %event.slug,
                "Handled webhook"
            );
            return (StatusCode::OK, Json(json!({ "received": true }))).into_response();
        }
        Ok(Err(error)) => error.to_string(),
        Err(join_error) => format!("handler panicked: {join_error}"),
    };

    if let Some(id) = delivery_id.as_deref() {
        state.deliveries.lock().await.release(id);
    }
    tracing::error!(
        delivery = delivery_id.as_deref().unwrap_or("none"),
        event = %event.event,
        error = %message,
        "Webhook handler failed"
    );
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        [(ERROR_HEADER, "handler_failed")],
        Json(json!({ "error": message })),
    )
        .into_response()
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}
