//! Pipeline stages and stage-name resolution.
//!
//! Stage names are the stable contract with the CRM; stage ids are looked up
//! on every call so pipeline edits in the CRM take effect immediately.

use uuid::Uuid;

use crate::domains::crm::api::CrmApi;

/// Stages of the practitioner onboarding pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PractitionerStage {
    PendingVerification,
    VerifiedAndLive,
    Rejected,
}

impl PractitionerStage {
    pub const ALL: [PractitionerStage; 3] = [
        PractitionerStage::PendingVerification,
        PractitionerStage::VerifiedAndLive,
        PractitionerStage::Rejected,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            PractitionerStage::PendingVerification => "Pending Verification",
            PractitionerStage::VerifiedAndLive => "Verified & Live",
            PractitionerStage::Rejected => "Rejected",
        }
    }
}

/// Stages of the patient engagement pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatientStage {
    InQueue,
    Matched,
    FirstSessionBooked,
    ActivePatient,
    AtRisk,
    Churned,
}

impl PatientStage {
    pub const ALL: [PatientStage; 6] = [
        PatientStage::InQueue,
        PatientStage::Matched,
        PatientStage::FirstSessionBooked,
        PatientStage::ActivePatient,
        PatientStage::AtRisk,
        PatientStage::Churned,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            PatientStage::InQueue => "In Queue",
            PatientStage::Matched => "Matched",
            PatientStage::FirstSessionBooked => "First Session Booked",
            PatientStage::ActivePatient => "Active Patient",
            PatientStage::AtRisk => "At Risk",
            PatientStage::Churned => "Churned",
        }
    }
}

/// Resolve a stage name to its id within a pipeline.
///
/// Matches case-insensitively; the first match wins if the CRM has duplicate
/// names. `None` when the pipeline id is unset or nothing matches.
pub async fn resolve_stage_id(
    crm: &CrmApi,
    pipeline_id: Option<&str>,
    stage_name: &str,
    user_id: Option<Uuid>,
) -> Option<String> {
    let pipeline_id = pipeline_id?;

    let wanted = stage_name.trim().to_lowercase();
    let stages = crm.get_pipeline_stages(pipeline_id, user_id).await;
    let found = stages
        .into_iter()
        .find(|stage| stage.name.trim().to_lowercase() == wanted)
        .map(|stage| stage.id);

    if found.is_none() {
        tracing::warn!(pipeline_id, stage_name, "CRM pipeline stage not found");
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::test_dependencies::{MockCrmTransport, TestDependencies, PATIENT_PIPELINE_ID};
    use highlevel_client::Endpoint;

    #[tokio::test]
    async fn resolves_case_insensitively() {
        let test = TestDependencies::new();
        let deps = test.deps();

        let id = resolve_stage_id(&deps.crm, Some(PATIENT_PIPELINE_ID), "first session BOOKED", None)
            .await;

        assert_eq!(id, test.transport.stage_id(PATIENT_PIPELINE_ID, "First Session Booked"));
        assert!(id.is_some());
    }

    #[tokio::test]
    async fn resolves_renamed_non_ascii_stage() {
        let test = TestDependencies::new().mock_transport(
            MockCrmTransport::new().with_pipeline("pipe-x", "Patients", &["  ÉTAPE Spéciale "]),
        );
        let deps = test.deps();

        let id = resolve_stage_id(&deps.crm, Some("pipe-x"), "étape spéciale", None).await;

        assert_eq!(id.as_deref(), Some("pipe-x-stage-1"));
    }

    #[tokio::test]
    async fn unknown_stage_is_none() {
        let test = TestDependencies::new();
        let deps = test.deps();

        let id = resolve_stage_id(&deps.crm, Some(PATIENT_PIPELINE_ID), "Graduated", None).await;

        assert!(id.is_none());
    }

    #[tokio::test]
    async fn unset_pipeline_is_none_without_network() {
        let test = TestDependencies::new();
        let deps = test.deps();

        let id = resolve_stage_id(&deps.crm, None, "Matched", None).await;

        assert!(id.is_none());
        assert_eq!(
            test.transport
                .count_matching(|e| matches!(e, Endpoint::ListPipelines)),
            0
        );
    }

    #[tokio::test]
    async fn every_resolution_fetches_stages() {
        let test = TestDependencies::new();
        let deps = test.deps();

        resolve_stage_id(&deps.crm, Some(PATIENT_PIPELINE_ID), "Matched", None).await;
        resolve_stage_id(&deps.crm, Some(PATIENT_PIPELINE_ID), "Matched", None).await;

        assert_eq!(
            test.transport
                .count_matching(|e| matches!(e, Endpoint::ListPipelines)),
            2
        );
        assert_eq!(test.store.audit_entries().len(), 2);
    }

    #[test]
    fn stage_names_are_distinct() {
        let names: std::collections::HashSet<_> =
            PatientStage::ALL.iter().map(|s| s.name()).collect();
        assert_eq!(names.len(), PatientStage::ALL.len());
    }
}
