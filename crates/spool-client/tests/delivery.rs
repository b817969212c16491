//! End-to-end delivery over real sockets.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::get;
use axum::{Json, Router};
use pretty_assertions::assert_eq;
use serde_json::json;
use spool_client::{
    ChangeHandler, ClientError, ContentEvent, ContentEventKind, ContentUpdate, ContentUpdates,
    HandlerError, PullClient, SpoolConfig, SpoolConsumer, UpdateSource, DEFAULT_WEBHOOK_PATH,
};
use spool_core::{Subscription, WebhookDispatcher};
use tokio::net::TcpListener;

const SECRET: &str = "whsec_integration";
const API_KEY: &str = "spk_integration";

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<ContentEvent>>,
}

impl ChangeHandler for Recorder {
    async fn handle(&self, event: &ContentEvent) -> Result<(), HandlerError> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

/// Shares one recorder between the consumer and the test body.
struct Shared(Arc<Recorder>);

impl ChangeHandler for Shared {
    async fn handle(&self, event: &ContentEvent) -> Result<(), HandlerError> {
        self.0.handle(event).await
    }
}

async fn serve(router: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

fn subscription(endpoint_url: String) -> Subscription {
    Subscription {
        id: "sub-1".to_string(),
        site_id: "site-1".to_string(),
        endpoint_url,
        created_at: 0,
    }
}

#[tokio::test]
async fn dispatched_webhook_reaches_the_consumer_handler() {
    let recorder = Arc::new(Recorder::default());
    let config = SpoolConfig::new(API_KEY, "site-1")
        .unwrap()
        .with_webhook_secret(SECRET)
        .unwrap();
    let consumer = SpoolConsumer::new(config, Shared(Arc::clone(&recorder)));
    let base = serve(consumer.webhook_router(DEFAULT_WEBHOOK_PATH).unwrap()).await;

    let dispatcher = WebhookDispatcher::new(SECRET, Duration::from_secs(5)).unwrap();
    let event = ContentEvent {
        event: ContentEventKind::Published,
        collection: "posts".to_string(),
        slug: "hello".to_string(),
        item_id: "item-1".to_string(),
    };
    let report = dispatcher
        .dispatch(
            "site-1",
            &[subscription(format!("{base}{DEFAULT_WEBHOOK_PATH}"))],
            &event,
        )
        .await;

    assert_eq!(report.delivered, 1);
    assert_eq!(report.failed, 0);
    assert_eq!(*recorder.events.lock().unwrap(), vec![event]);
}

#[tokio::test]
async fn mismatched_secret_counts_as_failed_delivery() {
    let recorder = Arc::new(Recorder::default());
    let config = SpoolConfig::new(API_KEY, "site-1")
        .unwrap()
        .with_webhook_secret(SECRET)
        .unwrap();
    let consumer = SpoolConsumer::new(config, Shared(Arc::clone(&recorder)));
    let base = serve(consumer.webhook_router(DEFAULT_WEBHOOK_PATH).unwrap()).await;

    let dispatcher = WebhookDispatcher::new("whsec_other", Duration::from_secs(5)).unwrap();
    let event = ContentEvent {
        event: ContentEventKind::Updated,
        collection: "posts".to_string(),
        slug: "hello".to_string(),
        item_id: "item-1".to_string(),
    };
    let report = dispatcher
        .dispatch(
            "site-1",
            &[subscription(format!("{base}{DEFAULT_WEBHOOK_PATH}"))],
            &event,
        )
        .await;

    assert_eq!(report.delivered, 0);
    assert_eq!(report.failed, 1);
    assert!(recorder.events.lock().unwrap().is_empty());
}

struct PullServer {
    hits: AtomicUsize,
}

async fn content_updates(
    State(server): State<Arc<PullServer>>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, StatusCode> {
    server.hits.fetch_add(1, Ordering::SeqCst);
    let expected = format!("Bearer {API_KEY}");
    let authorized = headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        == Some(expected.as_str());
    if !authorized {
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(Json(json!({
        "items": [{
            "item_id": "item-1",
            "slug": "hello",
            "title": "Hello",
            "collection": "posts",
            "updated_at": 1_700_000_000_000_i64,
        }],
        "timestamp": 1_700_000_000_500_i64,
    })))
}

async fn pull_server() -> (String, Arc<PullServer>) {
    let server = Arc::new(PullServer {
        hits: AtomicUsize::new(0),
    });
    let router = Router::new()
        .route("/sites/{site_id}/content-updates", get(content_updates))
        .with_state(Arc::clone(&server));
    (serve(router).await, server)
}

#[tokio::test]
async fn pull_client_sends_bearer_key_and_decodes_items() {
    let (base, server) = pull_server().await;
    let config = SpoolConfig::new(API_KEY, "site-1")
        .unwrap()
        .with_base_url(&base)
        .unwrap();
    let client = PullClient::new(&config).unwrap();

    let updates = client.fetch_updates().await.unwrap();
    assert_eq!(
        updates,
        ContentUpdates {
            items: vec![ContentUpdate {
                item_id: "item-1".to_string(),
                slug: "hello".to_string(),
                title: "Hello".to_string(),
                collection: "posts".to_string(),
                updated_at: 1_700_000_000_000,
            }],
            timestamp: 1_700_000_000_500,
        }
    );
    assert_eq!(server.hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn pull_client_reports_rejected_key() {
    let (base, _server) = pull_server().await;
    let config = SpoolConfig::new("spk_wrong", "site-1")
        .unwrap()
        .with_base_url(&base)
        .unwrap();
    let client = PullClient::new(&config).unwrap();

    let err = client.fetch_updates().await.unwrap_err();
    assert!(matches!(err, ClientError::Unauthorized(_)));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn poller_seeds_from_live_endpoint_without_notifying() {
    let (base, server) = pull_server().await;
    let recorder = Arc::new(Recorder::default());
    let config = SpoolConfig::new(API_KEY, "site-1")
        .unwrap()
        .with_base_url(&base)
        .unwrap()
        .with_poll_interval(Duration::from_millis(500))
        .unwrap();
    let consumer = SpoolConsumer::new(config, Shared(Arc::clone(&recorder)));
    let poller = consumer.start_polling().unwrap();

    tokio::time::timeout(Duration::from_secs(5), async {
        while poller.tracker().is_empty().await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("poller never fetched");

    poller.shutdown().await;
    assert!(server.hits.load(Ordering::SeqCst) >= 1);
    assert!(recorder.events.lock().unwrap().is_empty());
}
