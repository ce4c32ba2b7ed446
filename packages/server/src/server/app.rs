//! Application setup and server configuration.

use std::sync::Arc;

use axum::{
    extract::Extension,
    middleware,
    routing::{get, post},
    Router,
};
use sqlx::PgPool;
use tower_http::trace::TraceLayer;

use crate::domains::crm::CrmSync;
use crate::server::middleware::bearer_auth_middleware;
use crate::server::routes::{
    bulk_sync_handler, events_handler, health_handler, list_logs_handler, retry_handler,
};

/// Shared application state
#[derive(Clone)]
pub struct AxumAppState {
    pub db_pool: PgPool,
    pub sync: CrmSync,
}

/// Build the Axum application router
///
/// - `/health` is open
/// - `/api/crm/events` requires `Authorization: Bearer <events token>`
/// - `/admin/crm/*` requires `Authorization: Bearer <admin token>`
///
/// A surface whose token is not configured rejects every request.
pub fn build_app(
    state: AxumAppState,
    admin_api_token: Option<String>,
    events_api_token: Option<String>,
) -> Router {
    let admin_token: Option<Arc<str>> = admin_api_token.map(Into::into);
    let events_token: Option<Arc<str>> = events_api_token.map(Into::into);

    let events = Router::new()
        .route("/api/crm/events", post(events_handler))
        .layer(middleware::from_fn(move |req, next| {
            bearer_auth_middleware(events_token.clone(), req, next)
        }));

    let admin = Router::new()
        .route("/admin/crm/sync/:actor_kind", post(bulk_sync_handler))
        .route("/admin/crm/retry/:log_id", post(retry_handler))
        .route("/admin/crm/logs", get(list_logs_handler))
        .layer(middleware::from_fn(move |req, next| {
            bearer_auth_middleware(admin_token.clone(), req, next)
        }));

    Router::new()
        .route("/health", get(health_handler))
        .merge(events)
        .merge(admin)
        .layer(Extension(state))
        .layer(TraceLayer::new_for_http())
}
