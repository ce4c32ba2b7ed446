use thiserror::Error;
use uuid::Uuid;

/// Errors surfaced by the operator retry endpoint. Lifecycle functions never
/// return errors; only operators see these.
#[derive(Debug, Error)]
pub enum RetryError {
    #[error("CRM sync log entry {0} not found")]
    NotFound(Uuid),

    #[error("CRM sync log entry {id} cannot be replayed: {reason}")]
    NotReplayable { id: Uuid, reason: String },

    #[error("Unknown CRM event type: {0}")]
    UnknownEvent(String),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}
