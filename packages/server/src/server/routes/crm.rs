//! CRM sync endpoints.
//!
//! POST /api/crm/events              lifecycle event intake (202, runs detached)
//! POST /admin/crm/sync/:actor_kind  bulk sync, NDJSON progress stream
//! POST /admin/crm/retry/:log_id     replay one audit entry
//! GET  /admin/crm/logs              recent audit entries

use axum::{
    body::Body,
    extract::{Extension, Path, Query},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{error, info};
use uuid::Uuid;

use crate::domains::crm::models::{ActorKind, BackfillFilter, CrmSyncLog};
use crate::domains::crm::{
    list_logs, retry_log_entry, spawn_bulk_sync, LifecycleEvent, RetryError, RetryResult,
};
use crate::server::app::AxumAppState;

pub const NDJSON: &str = "application/x-ndjson";

type ApiError = (StatusCode, Json<Value>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(json!({ "error": message.into() })))
}

/// Accept a lifecycle event and sync it in the background.
///
/// Always 202 once the body parses: the caller's own operation must not wait
/// on, or fail because of, the CRM.
pub async fn events_handler(
    Extension(state): Extension<AxumAppState>,
    Json(event): Json<LifecycleEvent>,
) -> (StatusCode, Json<Value>) {
    let name = event.name();
    state.sync.dispatch(event);
    (
        StatusCode::ACCEPTED,
        Json(json!({ "accepted": true, "event": name })),
    )
}

#[derive(Debug, Deserialize)]
pub struct BulkSyncQuery {
    #[serde(default)]
    filter: BackfillFilter,
}

/// Bulk sync handler.
///
/// Streams one JSON object per line as rows are processed. Closing the
/// connection stops the stream but not the sync.
pub async fn bulk_sync_handler(
    Extension(state): Extension<AxumAppState>,
    Path(actor_kind): Path<String>,
    Query(query): Query<BulkSyncQuery>,
) -> Result<Response, ApiError> {
    let kind: ActorKind = actor_kind
        .parse()
        .map_err(|e: anyhow::Error| api_error(StatusCode::BAD_REQUEST, e.to_string()))?;

    info!(%kind, filter = ?query.filter, "Operator started CRM bulk sync");
    let progress = spawn_bulk_sync(state.sync.deps().clone(), kind, query.filter);

    let lines = ReceiverStream::new(progress)
        .map(|update| serde_json::to_string(&update).map(|line| line + "\n"));

    Ok(([(header::CONTENT_TYPE, NDJSON)], Body::from_stream(lines)).into_response())
}

pub async fn retry_handler(
    Extension(state): Extension<AxumAppState>,
    Path(log_id): Path<Uuid>,
) -> Result<Json<RetryResult>, ApiError> {
    retry_log_entry(state.sync.deps(), log_id)
        .await
        .map(Json)
        .map_err(|e| {
            let status = match &e {
                RetryError::NotFound(_) => StatusCode::NOT_FOUND,
                RetryError::NotReplayable { .. } | RetryError::UnknownEvent(_) => {
                    StatusCode::UNPROCESSABLE_ENTITY
                }
                RetryError::Store(inner) => {
                    error!(%log_id, error = %inner, "CRM retry failed");
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            };
            api_error(status, e.to_string())
        })
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    #[serde(default)]
    failed_only: bool,
    limit: Option<i64>,
}

pub async fn list_logs_handler(
    Extension(state): Extension<AxumAppState>,
    Query(query): Query<LogsQuery>,
) -> Result<Json<Vec<CrmSyncLog>>, ApiError> {
    list_logs(state.sync.deps(), query.failed_only, query.limit)
        .await
        .map(Json)
        .map_err(|e| {
            error!(error = %e, "Failed to list CRM sync logs");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "failed to list logs")
        })
}
