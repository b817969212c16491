use std::sync::Arc;

use axum::extract::{Path, Request, State};
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, patch, post, put};
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use spool_core::db::{Database, Schema};
use spool_core::dispatch::DispatchReport;
use spool_core::services::{shared_database, ContentChange, ItemInput, SharedDatabase, SyncReport};
use spool_core::{
    ContentService, ContentUpdate, DeliveryMode, LibSqlMirror, Site, SiteRegistry, SiteSummary,
    Subscription, WebhookDispatcher,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::auth::{extract_bearer_token, require_admin, INVALID_SITE_CREDENTIALS};
use crate::config::AppConfig;
use crate::error::AppError;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    registry: SiteRegistry<LibSqlMirror>,
    content: ContentService<LibSqlMirror>,
}

impl AppState {
    /// Open both stores and wire the services described by `config`.
    pub async fn open(config: Arc<AppConfig>) -> spool_core::Result<Self> {
        let db = Database::open(&config.database_path, Schema::Authoritative).await?;
        let mirror = match &config.mirror_remote {
            Some(remote) => LibSqlMirror::open_remote(remote).await?,
            None => LibSqlMirror::open(&config.mirror_path).await?,
        };

        let dispatcher = match config.delivery_mode {
            DeliveryMode::Push => {
                let secret = config.webhook_secret.clone().ok_or_else(|| {
                    spool_core::Error::InvalidInput("Push delivery requires a webhook secret".into())
                })?;
                Some(WebhookDispatcher::new(secret, config.webhook_timeout)?)
            }
            DeliveryMode::Pull => None,
        };

        Ok(Self::new(
            config,
            shared_database(db)?,
            Arc::new(mirror),
            dispatcher,
        ))
    }

    pub fn new(
        config: Arc<AppConfig>,
        db: SharedDatabase,
        mirror: Arc<LibSqlMirror>,
        dispatcher: Option<WebhookDispatcher>,
    ) -> Self {
        let registry = SiteRegistry::new(Arc::clone(&db), Arc::clone(&mirror));
        let content = ContentService::new(db, mirror, dispatcher);
        Self {
            config,
            registry,
            content,
        }
    }

    /// Wait for background mirror writes and webhook deliveries.
    pub async fn drain(&self) -> DispatchReport {
        self.registry.flush_mirror().await;
        self.content.flush_dispatches().await
    }
}

pub fn app_router(state: AppState) -> Router {
    let pull_routes = Router::new()
        .route(
            "/sites/{site_id}/content-updates",
            get(content_updates).options(preflight),
        )
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET, Method::OPTIONS])
                .allow_headers([AUTHORIZATION, CONTENT_TYPE]),
        );

    let admin_routes = Router::new()
        .route("/sites", get(list_sites).post(create_site))
        .route("/sites/verify", post(verify_site))
        .route("/sites/lookup", post(lookup_site))
        .route("/sites/resync", post(resync_sites))
        .route("/sites/{id}", patch(rename_site).delete(delete_site))
        .route("/sites/{id}/rotate-key", post(rotate_key))
        .route(
            "/sites/{id}/subscriptions",
            get(list_subscriptions).post(add_subscription),
        )
        .route(
            "/sites/{id}/collections/{collection}/items/{slug}",
            put(upsert_item).delete(delete_item),
        )
        .route(
            "/sites/{id}/collections/{collection}/items/{slug}/publish",
            post(publish_item).delete(unpublish_item),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_admin_token,
        ));

    Router::new()
        .route("/healthz", get(healthz))
        .merge(pull_routes)
        .nest("/v1/admin", admin_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: i64,
    delivery_mode: &'static str,
}

async fn healthz(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        timestamp: Utc::now().timestamp(),
        delivery_mode: state.config.delivery_mode.as_str(),
    })
}

async fn require_admin_token(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    require_admin(request.headers(), &state.config.admin_token)?;
    Ok(next.run(request).await)
}

#[derive(Debug, Serialize, Deserialize)]
struct ContentUpdatesResponse {
    items: Vec<ContentUpdate>,
    timestamp: i64,
}

async fn content_updates(
    State(state): State<AppState>,
    Path(site_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<ContentUpdatesResponse>, AppError> {
    let api_key = extract_bearer_token(&headers)?;
    if !state.registry.verify_site(&site_id, api_key).await? {
        tracing::warn!(site = %site_id, "Rejected content-updates request");
        return Err(AppError::unauthorized(INVALID_SITE_CREDENTIALS));
    }

    let items = state.content.recent_updates(&site_id).await?;
    tracing::debug!(site = %site_id, items = items.len(), "Served content updates");
    Ok(Json(ContentUpdatesResponse {
        items,
        timestamp: Utc::now().timestamp_millis(),
    }))
}

async fn preflight() -> StatusCode {
    StatusCode::NO_CONTENT
}

#[derive(Debug, Serialize)]
struct SiteList {
    sites: Vec<SiteSummary>,
}

async fn list_sites(State(state): State<AppState>) -> Result<Json<SiteList>, AppError> {
    let sites = state.registry.list_sites().await?;
    Ok(Json(SiteList { sites }))
}

#[derive(Debug, Deserialize)]
struct SiteNameRequest {
    name: String,
}

async fn create_site(
    State(state): State<AppState>,
    Json(request): Json<SiteNameRequest>,
) -> Result<(StatusCode, Json<Site>), AppError> {
    let site = state.registry.create_site(&request.name).await?;
    Ok((StatusCode::CREATED, Json(site)))
}

async fn rename_site(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<SiteNameRequest>,
) -> Result<Json<SiteSummary>, AppError> {
    let site = state.registry.rename_site(&id, &request.name).await?;
    Ok(Json(site.summary()))
}

#[derive(Debug, Serialize)]
struct RotatedKey {
    id: String,
    api_key: String,
}

async fn rotate_key(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<RotatedKey>, AppError> {
    let site = state.registry.rotate_api_key(&id).await?;
    Ok(Json(RotatedKey {
        id: site.id,
        api_key: site.api_key,
    }))
}

#[derive(Debug, Serialize)]
struct Deleted {
    deleted: bool,
}

async fn delete_site(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Deleted>, AppError> {
    let deleted = state.registry.delete_site(&id).await?;
    Ok(Json(Deleted { deleted }))
}

#[derive(Debug, Deserialize)]
struct VerifyRequest {
    site_id: String,
    api_key: String,
}

#[derive(Debug, Serialize)]
struct VerifyResponse {
    valid: bool,
}

async fn verify_site(
    State(state): State<AppState>,
    Json(request): Json<VerifyRequest>,
) -> Result<Json<VerifyResponse>, AppError> {
    let valid = state
        .registry
        .verify_site(&request.site_id, &request.api_key)
        .await?;
    Ok(Json(VerifyResponse { valid }))
}

#[derive(Debug, Deserialize)]
struct LookupRequest {
    api_key: String,
}

#[derive(Debug, Serialize)]
struct LookupResponse {
    site: Option<SiteSummary>,
}

async fn lookup_site(
    State(state): State<AppState>,
    Json(request): Json<LookupRequest>,
) -> Result<Json<LookupResponse>, AppError> {
    let site = state.registry.site_by_api_key(&request.api_key).await?;
    Ok(Json(LookupResponse { site }))
}

async fn resync_sites(State(state): State<AppState>) -> Result<Json<SyncReport>, AppError> {
    Ok(Json(state.registry.resync_all().await?))
}

#[derive(Debug, Deserialize)]
struct SubscriptionRequest {
    endpoint_url: String,
}

#[derive(Debug, Serialize)]
struct SubscriptionList {
    subscriptions: Vec<Subscription>,
}

async fn add_subscription(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<SubscriptionRequest>,
) -> Result<(StatusCode, Json<Subscription>), AppError> {
    let subscription = state
        .registry
        .add_subscription(&id, request.endpoint_url.trim())
        .await?;
    Ok((StatusCode::CREATED, Json(subscription)))
}

async fn list_subscriptions(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SubscriptionList>, AppError> {
    let subscriptions = state.registry.subscriptions(&id).await?;
    Ok(Json(SubscriptionList { subscriptions }))
}

async fn upsert_item(
    State(state): State<AppState>,
    Path((id, collection, slug)): Path<(String, String, String)>,
    Json(input): Json<ItemInput>,
) -> Result<Json<ContentChange>, AppError> {
    let change = state
        .content
        .upsert_item(&id, &collection, &slug, &input)
        .await?;
    Ok(Json(change))
}

async fn publish_item(
    State(state): State<AppState>,
    Path((id, collection, slug)): Path<(String, String, String)>,
) -> Result<Json<ContentChange>, AppError> {
    let change = state
        .content
        .set_published(&id, &collection, &slug, true)
        .await?;
    Ok(Json(change))
}

async fn unpublish_item(
    State(state): State<AppState>,
    Path((id, collection, slug)): Path<(String, String, String)>,
) -> Result<Json<ContentChange>, AppError> {
    let change = state
        .content
        .set_published(&id, &collection, &slug, false)
        .await?;
    Ok(Json(change))
}

async fn delete_item(
    State(state): State<AppState>,
    Path((id, collection, slug)): Path<(String, String, String)>,
) -> Result<Json<ContentChange>, AppError> {
    state
        .content
        .delete_item(&id, &collection, &slug)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::not_found(format!("content item {collection}/{slug}")))
}
