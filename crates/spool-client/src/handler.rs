//! Change handlers and page invalidation.

use std::future::Future;

use serde::Serialize;
use spool_core::ContentEvent;
use thiserror::Error;

/// Failure reported by a change handler.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Reaction to one content change, shared by the webhook and poll paths.
pub trait ChangeHandler: Send + Sync + 'static {
    fn handle(&self, event: &ContentEvent) -> impl Future<Output = Result<(), HandlerError>> + Send;
}

/// Adapter turning an async closure into a [`ChangeHandler`].
pub struct FnHandler<F>(pub F);

pub const fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(ContentEvent) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send,
{
    FnHandler(f)
}

impl<F, Fut> ChangeHandler for FnHandler<F>
where
    F: Fn(ContentEvent) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send,
{
    async fn handle(&self, event: &ContentEvent) -> Result<(), HandlerError> {
        (self.0)(event.clone()).await
    }
}

/// Host-side cache invalidation (e.g. on-demand page revalidation).
pub trait Revalidator: Send + Sync + 'static {
    fn revalidate(&self, path: &str) -> impl Future<Output = Result<(), HandlerError>> + Send;
}

/// Paths to rebuild for an event, deduplicated in first-seen order.
///
/// The home page and sitemap always change; the collection index and the
/// item page are rebuilt for every event, deletions included, so a removed
/// page turns into a 404.
pub fn invalidation_paths(event: &ContentEvent) -> Vec<String> {
    let candidates = [
        "/".to_string(),
        "/sitemap.xml".to_string(),
        format!("/{}", event.collection),
        format!("/{}/{}", event.collection, event.slug),
    ];

    let mut paths: Vec<String> = Vec::with_capacity(candidates.len());
    for path in candidates {
        if !paths.contains(&path) {
            paths.push(path);
        }
    }
    paths
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InvalidationReport {
    pub invalidated: Vec<String>,
    /// `(path, error)` pairs
    pub failed: Vec<(String, String)>,
}

/// Handler that invalidates the pages affected by each change.
pub struct InvalidatingHandler<R> {
    revalidator: R,
}

impl<R: Revalidator> InvalidatingHandler<R> {
    pub const fn new(revalidator: R) -> Self {
        Self { revalidator }
    }

    /// Invalidate every affected path; one failure never skips the rest.
    pub async fn invalidate(&self, event: &ContentEvent) -> InvalidationReport {
        let mut report = InvalidationReport::default();
        for path in invalidation_paths(event) {
            match self.revalidator.revalidate(&path).await {
                Ok(()) => report.invalidated.push(path),
                Err(error) => {
                    tracing::warn!(path = %path, %error, "Invalidation failed");
                    report.failed.push((path, error.0));
                }
            }
        }
        report
    }
}

impl<R: Revalidator> ChangeHandler for InvalidatingHandler<R> {
    /// Fails only when nothing could be invalidated.
    async fn handle(&self, event: &ContentEvent) -> Result<(), HandlerError> {
        let report = self.invalidate(event).await;
        tracing::info!(
            event = %event.event,
            collection = %event.collection,
            slug = %event.slug,
            invalidated = report.invalidated.len(),
            failed = report.failed.len(),
            "Invalidated pages"
        );

        if report.invalidated.is_empty() && !report.failed.is_empty() {
            return Err(HandlerError::new(format!(
                "all {} invalidations failed",
                report.failed.len()
            )));
        }
        Ok(())
    }
}
