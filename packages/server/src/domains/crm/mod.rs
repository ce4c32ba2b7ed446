//! CRM synchronization domain.
//!
//! Keeps the external CRM eventually consistent with practitioner and patient
//! lifecycle events. Nothing in here returns an error to the code that
//! raised the event; failures end up in `crm_sync_logs` for operators.

pub mod api;
pub mod backfill;
pub mod error;
pub mod events;
pub mod identity;
pub mod lifecycle;
pub mod models;
pub mod notifications;
pub mod stages;

pub use api::{CallOutcome, CrmApi};
pub use backfill::{
    list_logs, retry_log_entry, run_bulk_sync, spawn_bulk_sync, BackfillProgress, RetryResult,
};
pub use error::RetryError;
pub use events::{CrmSync, LifecycleEvent};
pub use identity::{ensure_contact, ContactDetails, ContactLocks, ContactSource, ResolvedContact};
pub use lifecycle::SyncOutcome;
pub use stages::{resolve_stage_id, PatientStage, PractitionerStage};
