//! Lifecycle sync functions, one per domain transition.
//!
//! Every function returns a [`SyncOutcome`] and never an error or panic to
//! its caller. Individual CRM calls are already audited by [`CrmApi`]; the
//! outcome only summarizes whether the whole transition went through.
//!
//! [`CrmApi`]: crate::domains::crm::api::CrmApi

pub mod patient;
pub mod practitioner;

use std::future::Future;
use std::panic::AssertUnwindSafe;

use anyhow::Result;
use futures::FutureExt;
use serde::Serialize;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use highlevel_client::{OpportunityInput, OpportunityStatus};

use crate::domains::crm::models::ActorKind;
use crate::domains::crm::stages::resolve_stage_id;
use crate::kernel::ServerDeps;

pub use patient::{
    patient_appointment_completed, patient_at_risk, patient_churned, patient_first_booking,
    patient_matched, patient_signup_complete,
};
pub use practitioner::{
    practitioner_rejected, practitioner_signup_complete, practitioner_suspended,
    practitioner_verified,
};

/// How a lifecycle transition ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum SyncOutcome {
    Synced,
    /// Nothing to do: the actor, a related row or a stored CRM id is missing
    Skipped(String),
    /// The transition ran but at least one step did not reach the CRM
    Failed(String),
}

impl SyncOutcome {
    pub fn skipped(reason: impl Into<String>) -> Self {
        SyncOutcome::Skipped(reason.into())
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        SyncOutcome::Failed(reason.into())
    }

    pub fn is_synced(&self) -> bool {
        matches!(self, SyncOutcome::Synced)
    }
}

/// Run a transition body, turning errors and panics into `Failed`.
pub(crate) async fn guarded<F>(transition: &'static str, subject_id: Uuid, body: F) -> SyncOutcome
where
    F: Future<Output = Result<SyncOutcome>>,
{
    let outcome = match AssertUnwindSafe(body).catch_unwind().await {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(e)) => {
            error!(transition, %subject_id, error = %e, "CRM sync aborted");
            SyncOutcome::failed(e.to_string())
        }
        Err(_) => {
            error!(transition, %subject_id, "CRM sync panicked");
            SyncOutcome::failed("panicked")
        }
    };

    match &outcome {
        SyncOutcome::Synced => info!(transition, %subject_id, "CRM sync complete"),
        SyncOutcome::Skipped(reason) => debug!(transition, %subject_id, %reason, "CRM sync skipped"),
        SyncOutcome::Failed(reason) => warn!(transition, %subject_id, %reason, "CRM sync incomplete"),
    }
    outcome
}

/// Tracks which CRM steps of one transition failed.
#[derive(Debug, Default)]
pub(crate) struct Steps {
    attempted: usize,
    failed: Vec<&'static str>,
}

impl Steps {
    pub(crate) fn record(&mut self, step: &'static str, ok: bool) -> bool {
        self.attempted += 1;
        if !ok {
            self.failed.push(step);
        }
        ok
    }

    /// Record an optional step; `None` means it was skipped and does not count.
    pub(crate) fn record_optional(&mut self, step: &'static str, result: Option<bool>) {
        if let Some(ok) = result {
            self.record(step, ok);
        }
    }

    pub(crate) fn finish(self) -> SyncOutcome {
        if self.failed.is_empty() {
            SyncOutcome::Synced
        } else {
            SyncOutcome::failed(format!(
                "{} of {} CRM calls failed: {}",
                self.failed.len(),
                self.attempted,
                self.failed.join(", ")
            ))
        }
    }
}

/// Move an opportunity to a named stage of its pipeline.
///
/// `None` when the move was skipped because the opportunity id is absent or
/// the stage could not be resolved.
pub(crate) async fn move_to_stage(
    deps: &ServerDeps,
    opportunity_id: Option<&str>,
    pipeline_id: Option<&str>,
    stage_name: &str,
    user_id: Uuid,
) -> Option<bool> {
    let Some(opportunity_id) = opportunity_id else {
        debug!(%user_id, stage_name, "No CRM opportunity, stage move skipped");
        return None;
    };
    let stage_id = resolve_stage_id(&deps.crm, pipeline_id, stage_name, Some(user_id)).await?;

    Some(
        deps.crm
            .move_opportunity_stage(opportunity_id, &stage_id, Some(user_id))
            .await,
    )
}

/// Create an open opportunity for the actor in `stage_name` and save its id.
///
/// `Ok(None)` when the pipeline is unset or the stage cannot be resolved.
pub(crate) async fn open_opportunity(
    deps: &ServerDeps,
    kind: ActorKind,
    user_id: Uuid,
    contact_id: &str,
    pipeline_id: Option<&str>,
    stage_name: &str,
    name: String,
) -> Result<Option<bool>> {
    let stage_id = resolve_stage_id(&deps.crm, pipeline_id, stage_name, Some(user_id)).await;
    let (Some(pipeline_id), Some(stage_id)) = (pipeline_id, stage_id) else {
        warn!(%user_id, %kind, stage_name, "Pipeline stage not resolvable, opportunity skipped");
        return Ok(None);
    };

    let input = OpportunityInput {
        pipeline_id: Some(pipeline_id.to_string()),
        name: Some(name),
        pipeline_stage_id: Some(stage_id),
        status: Some(OpportunityStatus::Open),
        contact_id: Some(contact_id.to_string()),
        monetary_value: None,
    };
    let Some(opportunity) = deps.crm.create_opportunity(&input, Some(user_id)).await else {
        return Ok(Some(false));
    };
    deps.store
        .save_opportunity_id(kind, user_id, &opportunity.id)
        .await?;
    Ok(Some(true))
}

/// Lowercase, with runs of non-alphanumerics collapsed to single dashes.
pub fn slugify(value: &str) -> String {
    let mut slug = String::with_capacity(value.len());
    for c in value.trim().chars() {
        if c.is_alphanumeric() {
            slug.extend(c.to_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    slug.trim_end_matches('-').to_string()
}

pub fn discipline_tag(discipline: &str) -> String {
    format!("discipline-{}", slugify(discipline))
}

pub fn goal_tag(goal: &str) -> String {
    format!("goal-{}", slugify(goal))
}

pub(crate) fn tags(names: &[&str]) -> Vec<String> {
    names.iter().map(|name| name.to_string()).collect()
}

/// Date stamp used in notes
pub(crate) fn today() -> String {
    chrono::Utc::now().format("%Y-%m-%d").to_string()
}
