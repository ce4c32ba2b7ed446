//! Operator surface: bulk sync over existing actors, single-entry retry and
//! audit log listing.

use anyhow::{Context, Result};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{error, info};
use uuid::Uuid;

use crate::domains::crm::error::RetryError;
use crate::domains::crm::lifecycle::{patient_signup_complete, practitioner_signup_complete};
use crate::domains::crm::models::{ActorKind, BackfillFilter, CrmSyncLog};
use crate::kernel::ServerDeps;

const PROGRESS_BUFFER: usize = 32;

pub const DEFAULT_LOG_LIMIT: i64 = 50;
pub const MAX_LOG_LIMIT: i64 = 500;

/// One progress update, serialized as a bare JSON object:
/// `{"total":N}`, then `{"done":i,"total":N}` per row, then
/// `{"complete":true,"synced":S}`.
///
/// A run that cannot start ends with a single `{"error":"..."}` instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum BackfillProgress {
    Started { total: usize },
    Row { done: usize, total: usize },
    Complete { complete: bool, synced: usize },
    Aborted { error: String },
}

impl BackfillProgress {
    fn complete(synced: usize) -> Self {
        BackfillProgress::Complete {
            complete: true,
            synced,
        }
    }
}

/// Start a bulk sync on a detached task and return its progress stream.
///
/// Dropping the receiver does not stop the run.
pub fn spawn_bulk_sync(
    deps: ServerDeps,
    kind: ActorKind,
    filter: BackfillFilter,
) -> mpsc::Receiver<BackfillProgress> {
    let (tx, rx) = mpsc::channel(PROGRESS_BUFFER);
    tokio::spawn(async move {
        if let Err(e) = run_bulk_sync(&deps, kind, filter, &tx).await {
            error!(%kind, error = %e, "CRM bulk sync aborted");
            emit(
                &tx,
                BackfillProgress::Aborted {
                    error: format!("{:#}", e),
                },
            )
            .await;
        }
    });
    rx
}

/// Run the signup sync for every selected actor, one at a time.
///
/// Returns the number of actors whose sync ended `Synced`.
pub async fn run_bulk_sync(
    deps: &ServerDeps,
    kind: ActorKind,
    filter: BackfillFilter,
    progress: &mpsc::Sender<BackfillProgress>,
) -> Result<usize> {
    let ids = deps
        .store
        .find_actor_ids(kind, filter)
        .await
        .with_context(|| format!("Failed to load {} rows for bulk sync", kind))?;
    let total = ids.len();
    info!(%kind, ?filter, total, "Starting CRM bulk sync");
    emit(progress, BackfillProgress::Started { total }).await;

    let mut synced = 0;
    for (index, user_id) in ids.into_iter().enumerate() {
        let outcome = match kind {
            ActorKind::Practitioner => practitioner_signup_complete(deps, user_id).await,
            ActorKind::Patient => patient_signup_complete(deps, user_id).await,
        };
        if outcome.is_synced() {
            synced += 1;
        }
        emit(
            progress,
            BackfillProgress::Row {
                done: index + 1,
                total,
            },
        )
        .await;
    }

    info!(%kind, total, synced, "CRM bulk sync complete");
    emit(progress, BackfillProgress::complete(synced)).await;
    Ok(synced)
}

async fn emit(progress: &mpsc::Sender<BackfillProgress>, update: BackfillProgress) {
    // A closed channel only means nobody is watching any more
    let _ = progress.send(update).await;
}

/// Result of replaying one audit entry
#[derive(Debug, Clone, Serialize)]
pub struct RetryResult {
    pub original_log_id: Uuid,
    pub success: bool,
    pub new_log_id: Option<Uuid>,
    pub error: Option<String>,
}

/// Replay a logged CRM call with its original payload and target.
pub async fn retry_log_entry(deps: &ServerDeps, log_id: Uuid) -> Result<RetryResult, RetryError> {
    let entry = deps
        .audit_log
        .find(log_id)
        .await?
        .ok_or(RetryError::NotFound(log_id))?;

    info!(%log_id, event_type = %entry.event_type, "Retrying CRM call");
    let outcome = deps.crm.replay(&entry).await?;

    Ok(RetryResult {
        original_log_id: log_id,
        success: outcome.success,
        new_log_id: outcome.log_id,
        error: outcome.error,
    })
}

/// Most recent audit entries, newest first.
pub async fn list_logs(
    deps: &ServerDeps,
    failed_only: bool,
    limit: Option<i64>,
) -> Result<Vec<CrmSyncLog>> {
    let limit = limit.unwrap_or(DEFAULT_LOG_LIMIT).clamp(1, MAX_LOG_LIMIT);
    deps.audit_log.recent(failed_only, limit).await
}
