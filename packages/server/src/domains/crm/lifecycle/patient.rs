//! Patient engagement pipeline: In Queue, Matched, First Session Booked,
//! Active Patient, then At Risk or Churned.

use anyhow::Result;
use highlevel_client::{ContactInput, CustomFieldValue, OpportunityInput, OpportunityStatus};
use tracing::debug;
use uuid::Uuid;

use super::{goal_tag, guarded, move_to_stage, open_opportunity, tags, today, Steps, SyncOutcome};
use crate::domains::crm::identity::{ensure_contact, ContactDetails, ContactSource};
use crate::domains::crm::models::{ActorKind, PatientProfile};
use crate::domains::crm::stages::PatientStage;
use crate::kernel::ServerDeps;

const NOT_FOUND: &str = "patient not found";
const NO_CONTACT: &str = "patient has no CRM contact";

/// Week of the programme a newly signed-up patient starts in
const FIRST_PROGRAMME_WEEK: &str = "1";

/// Signup complete: link or create the contact, record profile custom fields,
/// open an opportunity In Queue and add a summary note.
pub async fn patient_signup_complete(deps: &ServerDeps, patient_id: Uuid) -> SyncOutcome {
    guarded(
        "patient_signup_complete",
        patient_id,
        signup_complete(deps, patient_id),
    )
    .await
}

async fn signup_complete(deps: &ServerDeps, patient_id: Uuid) -> Result<SyncOutcome> {
    let Some(patient) = deps.store.find_patient(patient_id).await? else {
        return Ok(SyncOutcome::skipped(NOT_FOUND));
    };
    let user_id = Some(patient_id);

    let mut signup_tags = tags(&["patient", "in-queue"]);
    signup_tags.extend(
        patient
            .goals
            .iter()
            .filter(|goal| !goal.trim().is_empty())
            .map(|goal| goal_tag(goal)),
    );

    let details = ContactDetails {
        kind: ActorKind::Patient,
        user_id: patient_id,
        first_name: patient.first_name.clone(),
        last_name: patient.last_name.clone(),
        email: patient.email.clone(),
        phone: patient.phone.clone(),
        tags: signup_tags.clone(),
    };
    let Some(contact) = ensure_contact(deps, &details).await? else {
        return Ok(SyncOutcome::failed("CRM contact could not be resolved"));
    };

    let mut steps = Steps::default();

    if contact.source != ContactSource::Created {
        steps.record(
            "add_tags",
            deps.crm.add_tags(&contact.id, &signup_tags, user_id).await,
        );
    }

    let profile_fields = ContactInput {
        custom_fields: profile_fields(&patient),
        ..Default::default()
    };
    steps.record(
        "update_contact",
        deps.crm
            .update_contact(&contact.id, &profile_fields, user_id)
            .await
            .is_some(),
    );

    match patient.crm_opportunity_id.as_deref() {
        Some(existing) => debug!(opportunity_id = existing, "Patient opportunity already exists"),
        None => steps.record_optional(
            "create_opportunity",
            open_opportunity(
                deps,
                ActorKind::Patient,
                patient_id,
                &contact.id,
                deps.crm_config.patient_pipeline_id.as_deref(),
                PatientStage::InQueue.name(),
                format!("{} - Patient", patient.full_name()),
            )
            .await?,
        ),
    }

    steps.record(
        "add_note",
        deps.crm
            .add_note(&contact.id, &signup_note(&patient), user_id)
            .await,
    );

    Ok(steps.finish())
}

fn profile_fields(patient: &PatientProfile) -> Vec<CustomFieldValue> {
    let mut fields = Vec::new();
    if let Some(level) = &patient.motivation_level {
        fields.push(CustomFieldValue::new("motivation_level", level));
    }
    if let Some(diet) = &patient.diet_type {
        fields.push(CustomFieldValue::new("diet_type", diet));
    }
    fields.push(CustomFieldValue::new("programme_week", FIRST_PROGRAMME_WEEK));
    fields
}

fn signup_note(patient: &PatientProfile) -> String {
    let mut lines = vec![format!("Patient signup completed on {}.", today())];
    if !patient.goals.is_empty() {
        lines.push(format!("Goals: {}", patient.goals.join(", ")));
    }
    if let Some(level) = &patient.motivation_level {
        lines.push(format!("Motivation level: {}", level));
    }
    if let Some(diet) = &patient.diet_type {
        lines.push(format!("Diet type: {}", diet));
    }
    lines.join("\n")
}

/// Matched with a practitioner: leave the queue, move to Matched and note who.
pub async fn patient_matched(deps: &ServerDeps, patient_id: Uuid, practitioner_id: Uuid) -> SyncOutcome {
    guarded(
        "patient_matched",
        patient_id,
        matched(deps, patient_id, practitioner_id),
    )
    .await
}

async fn matched(deps: &ServerDeps, patient_id: Uuid, practitioner_id: Uuid) -> Result<SyncOutcome> {
    let Some(patient) = deps.store.find_patient(patient_id).await? else {
        return Ok(SyncOutcome::skipped(NOT_FOUND));
    };
    let Some(contact_id) = patient.crm_contact_id.as_deref() else {
        return Ok(SyncOutcome::skipped(NO_CONTACT));
    };
    let Some(practitioner_name) = deps.store.find_user_name(practitioner_id).await? else {
        return Ok(SyncOutcome::skipped("practitioner not found"));
    };
    let user_id = Some(patient_id);
    let mut steps = Steps::default();

    steps.record(
        "remove_tags",
        deps.crm.remove_tags(contact_id, &tags(&["in-queue"]), user_id).await,
    );
    steps.record(
        "add_tags",
        deps.crm
            .add_tags(contact_id, &tags(&["matched", "active"]), user_id)
            .await,
    );
    steps.record_optional(
        "move_stage",
        move_to_stage(
            deps,
            patient.crm_opportunity_id.as_deref(),
            deps.crm_config.patient_pipeline_id.as_deref(),
            PatientStage::Matched.name(),
            patient_id,
        )
        .await,
    );
    steps.record(
        "add_note",
        deps.crm
            .add_note(
                contact_id,
                &format!("Matched with practitioner {} on {}.", practitioner_name, today()),
                user_id,
            )
            .await,
    );

    Ok(steps.finish())
}

pub async fn patient_first_booking(deps: &ServerDeps, patient_id: Uuid) -> SyncOutcome {
    guarded("patient_first_booking", patient_id, first_booking(deps, patient_id)).await
}

async fn first_booking(deps: &ServerDeps, patient_id: Uuid) -> Result<SyncOutcome> {
    let Some(patient) = deps.store.find_patient(patient_id).await? else {
        return Ok(SyncOutcome::skipped(NOT_FOUND));
    };
    let Some(contact_id) = patient.crm_contact_id.as_deref() else {
        return Ok(SyncOutcome::skipped(NO_CONTACT));
    };
    let mut steps = Steps::default();

    steps.record(
        "add_tags",
        deps.crm
            .add_tags(contact_id, &tags(&["first-booking"]), Some(patient_id))
            .await,
    );
    steps.record_optional(
        "move_stage",
        move_to_stage(
            deps,
            patient.crm_opportunity_id.as_deref(),
            deps.crm_config.patient_pipeline_id.as_deref(),
            PatientStage::FirstSessionBooked.name(),
            patient_id,
        )
        .await,
    );

    Ok(steps.finish())
}

/// Appointment completed: move to Active Patient and set the opportunity value
/// to the patient's lifetime revenue in major units.
///
/// Needs only the stored opportunity id; the session note is added when a
/// contact id is stored too.
pub async fn patient_appointment_completed(deps: &ServerDeps, appointment_id: Uuid) -> SyncOutcome {
    guarded(
        "patient_appointment_completed",
        appointment_id,
        appointment_completed(deps, appointment_id),
    )
    .await
}

async fn appointment_completed(deps: &ServerDeps, appointment_id: Uuid) -> Result<SyncOutcome> {
    let Some(appointment) = deps.store.find_appointment(appointment_id).await? else {
        return Ok(SyncOutcome::skipped("appointment not found"));
    };
    let patient_id = appointment.patient_id;
    let Some(patient) = deps.store.find_patient(patient_id).await? else {
        return Ok(SyncOutcome::skipped(NOT_FOUND));
    };
    let Some(opportunity_id) = patient.crm_opportunity_id.as_deref() else {
        return Ok(SyncOutcome::skipped("patient has no CRM opportunity"));
    };
    let user_id = Some(patient_id);
    let mut steps = Steps::default();

    steps.record_optional(
        "move_stage",
        move_to_stage(
            deps,
            Some(opportunity_id),
            deps.crm_config.patient_pipeline_id.as_deref(),
            PatientStage::ActivePatient.name(),
            patient_id,
        )
        .await,
    );

    let revenue_minor = deps.store.completed_revenue_minor(patient_id).await?;
    let value = OpportunityInput {
        monetary_value: Some(minor_to_major(revenue_minor)),
        ..Default::default()
    };
    steps.record(
        "update_opportunity",
        deps.crm
            .update_opportunity(opportunity_id, &value, user_id)
            .await
            .is_some(),
    );

    if let Some(contact_id) = patient.crm_contact_id.as_deref() {
        let session = appointment
            .session_type
            .as_deref()
            .unwrap_or("Session");
        let note = format!(
            "{} completed on {}.",
            session,
            appointment.starts_at.format("%Y-%m-%d")
        );
        steps.record(
            "add_note",
            deps.crm.add_note(contact_id, &note, user_id).await,
        );
    }

    Ok(steps.finish())
}

fn minor_to_major(amount_minor: i64) -> f64 {
    amount_minor as f64 / 100.0
}

/// At risk: tag, start the re-engagement workflow when one is configured,
/// move to At Risk.
pub async fn patient_at_risk(deps: &ServerDeps, patient_id: Uuid) -> SyncOutcome {
    guarded("patient_at_risk", patient_id, at_risk(deps, patient_id)).await
}

async fn at_risk(deps: &ServerDeps, patient_id: Uuid) -> Result<SyncOutcome> {
    let Some(patient) = deps.store.find_patient(patient_id).await? else {
        return Ok(SyncOutcome::skipped(NOT_FOUND));
    };
    let Some(contact_id) = patient.crm_contact_id.as_deref() else {
        return Ok(SyncOutcome::skipped(NO_CONTACT));
    };
    let user_id = Some(patient_id);
    let mut steps = Steps::default();

    steps.record(
        "add_tags",
        deps.crm.add_tags(contact_id, &tags(&["at-risk"]), user_id).await,
    );
    match deps.crm_config.reengagement_workflow_id.as_deref() {
        Some(workflow_id) => {
            steps.record(
                "trigger_workflow",
                deps.crm
                    .trigger_workflow(contact_id, workflow_id, user_id)
                    .await,
            );
        }
        None => debug!(%patient_id, "No re-engagement workflow configured"),
    }
    steps.record_optional(
        "move_stage",
        move_to_stage(
            deps,
            patient.crm_opportunity_id.as_deref(),
            deps.crm_config.patient_pipeline_id.as_deref(),
            PatientStage::AtRisk.name(),
            patient_id,
        )
        .await,
    );

    Ok(steps.finish())
}

/// Churned: swap `active` for `churned`, move to Churned, mark lost.
pub async fn patient_churned(deps: &ServerDeps, patient_id: Uuid) -> SyncOutcome {
    guarded("patient_churned", patient_id, churned(deps, patient_id)).await
}

async fn churned(deps: &ServerDeps, patient_id: Uuid) -> Result<SyncOutcome> {
    let Some(patient) = deps.store.find_patient(patient_id).await? else {
        return Ok(SyncOutcome::skipped(NOT_FOUND));
    };
    let Some(contact_id) = patient.crm_contact_id.as_deref() else {
        return Ok(SyncOutcome::skipped(NO_CONTACT));
    };
    let user_id = Some(patient_id);
    let opportunity_id = patient.crm_opportunity_id.as_deref();
    let mut steps = Steps::default();

    steps.record(
        "remove_tags",
        deps.crm.remove_tags(contact_id, &tags(&["active"]), user_id).await,
    );
    steps.record(
        "add_tags",
        deps.crm.add_tags(contact_id, &tags(&["churned"]), user_id).await,
    );
    steps.record_optional(
        "move_stage",
        move_to_stage(
            deps,
            opportunity_id,
            deps.crm_config.patient_pipeline_id.as_deref(),
            PatientStage::Churned.name(),
            patient_id,
        )
        .await,
    );
    if let Some(opportunity_id) = opportunity_id {
        let lost = OpportunityInput {
            status: Some(OpportunityStatus::Lost),
            ..Default::default()
        };
        steps.record(
            "update_opportunity",
            deps.crm
                .update_opportunity(opportunity_id, &lost, user_id)
                .await
                .is_some(),
        );
    }

    Ok(steps.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::crm::models::appointment::STATUS_COMPLETED;
    use crate::kernel::test_dependencies::{
        appointment_fixture, patient_fixture, practitioner_fixture, MockCrmTransport,
        MockSyncStore, TestDependencies, PATIENT_PIPELINE_ID,
    };
    use chrono::{Duration, Utc};
    use highlevel_client::Endpoint;

    fn linked_patient() -> PatientProfile {
        let mut patient = patient_fixture("Quinn", "One", &["Better Sleep"]);
        patient.crm_contact_id = Some("c-q1".to_string());
        patient.crm_opportunity_id = Some("opp-q1".to_string());
        patient
    }

    fn crm_for(patient: &PatientProfile) -> MockCrmTransport {
        MockCrmTransport::new()
            .with_default_pipelines()
            .with_contact("c-q1", &patient.email)
            .with_opportunity("opp-q1", PATIENT_PIPELINE_ID, None)
    }

    fn stage_of(test: &TestDependencies, opportunity_id: &str) -> Option<String> {
        test.transport.opportunity(opportunity_id).unwrap()["pipelineStageId"]
            .as_str()
            .map(str::to_string)
    }

    #[tokio::test]
    async fn signup_tags_goals_and_writes_profile_fields() {
        let patient = patient_fixture("Quinn", "One", &["Better Sleep", "Lose Weight"]);
        let test = TestDependencies::new()
            .mock_store(MockSyncStore::new().with_patient(patient.clone()));

        let outcome = patient_signup_complete(&test.deps(), patient.user_id).await;

        assert_eq!(outcome, SyncOutcome::Synced);
        let stored = test.store.patient(patient.user_id).unwrap();
        let contact = test.transport.contact(stored.crm_contact_id.as_deref().unwrap()).unwrap();
        for tag in ["patient", "in-queue", "goal-better-sleep", "goal-lose-weight"] {
            assert!(contact.tags.contains(&tag.to_string()), "missing tag {}", tag);
        }
        assert!(contact
            .custom_fields
            .contains(&CustomFieldValue::new("programme_week", "1")));
        assert!(contact
            .custom_fields
            .contains(&CustomFieldValue::new("motivation_level", "high")));

        let opportunity_id = stored.crm_opportunity_id.unwrap();
        let opportunity = test.transport.opportunity(&opportunity_id).unwrap();
        assert_eq!(opportunity["name"], "Quinn One - Patient");
        assert_eq!(
            stage_of(&test, &opportunity_id),
            test.transport.stage_id(PATIENT_PIPELINE_ID, "In Queue")
        );
    }

    #[tokio::test]
    async fn signup_without_pipeline_still_links_contact() {
        let patient = patient_fixture("Quinn", "One", &[]);
        let test = TestDependencies::new()
            .without_pipelines()
            .mock_store(MockSyncStore::new().with_patient(patient.clone()));

        let outcome = patient_signup_complete(&test.deps(), patient.user_id).await;

        assert_eq!(outcome, SyncOutcome::Synced);
        let stored = test.store.patient(patient.user_id).unwrap();
        assert!(stored.crm_contact_id.is_some());
        assert!(stored.crm_opportunity_id.is_none());
        assert!(test.transport.opportunities().is_empty());
    }

    #[tokio::test]
    async fn matched_swaps_queue_tags_and_names_practitioner() {
        let patient = linked_patient();
        let practitioner = practitioner_fixture("Mo", "Reid", "Nutrition");
        let test = TestDependencies::new()
            .mock_transport(crm_for(&patient))
            .mock_store(
                MockSyncStore::new()
                    .with_patient(patient.clone())
                    .with_practitioner(practitioner.clone()),
            );
        let deps = test.deps();
        deps.crm
            .add_tags("c-q1", &tags(&["in-queue"]), None)
            .await;

        let outcome = patient_matched(&deps, patient.user_id, practitioner.user_id).await;

        assert_eq!(outcome, SyncOutcome::Synced);
        let contact = test.transport.contact("c-q1").unwrap();
        assert!(!contact.tags.contains(&"in-queue".to_string()));
        assert!(contact.tags.contains(&"matched".to_string()));
        assert!(contact.tags.contains(&"active".to_string()));
        assert_eq!(
            stage_of(&test, "opp-q1"),
            test.transport.stage_id(PATIENT_PIPELINE_ID, "Matched")
        );
        assert!(test.transport.notes_for("c-q1")[0].contains("Mo Reid"));
    }

    #[tokio::test]
    async fn completed_appointment_sets_lifetime_revenue() {
        let mut patient = patient_fixture("Quinn", "One", &[]);
        patient.crm_opportunity_id = Some("opp-q1".to_string());
        let practitioner_id = Uuid::new_v4();
        let now = Utc::now();
        let third = appointment_fixture(patient.user_id, practitioner_id, STATUS_COMPLETED, 2000, now);
        let store = MockSyncStore::new()
            .with_patient(patient.clone())
            .with_appointment(appointment_fixture(
                patient.user_id,
                practitioner_id,
                STATUS_COMPLETED,
                5000,
                now - Duration::days(14),
            ))
            .with_appointment(appointment_fixture(
                patient.user_id,
                practitioner_id,
                STATUS_COMPLETED,
                3000,
                now - Duration::days(7),
            ))
            .with_appointment(appointment_fixture(
                patient.user_id,
                practitioner_id,
                "cancelled",
                9900,
                now - Duration::days(3),
            ))
            .with_appointment(third.clone());
        let test = TestDependencies::new()
            .mock_transport(
                MockCrmTransport::new()
                    .with_default_pipelines()
                    .with_opportunity("opp-q1", PATIENT_PIPELINE_ID, None),
            )
            .mock_store(store);

        let outcome = patient_appointment_completed(&test.deps(), third.id).await;

        assert_eq!(outcome, SyncOutcome::Synced);
        let opportunity = test.transport.opportunity("opp-q1").unwrap();
        assert_eq!(opportunity["monetaryValue"].as_f64(), Some(100.0));
        assert_eq!(
            stage_of(&test, "opp-q1"),
            test.transport.stage_id(PATIENT_PIPELINE_ID, "Active Patient")
        );
        // No contact id stored, so no note
        assert_eq!(
            test.transport
                .count_matching(|e| matches!(e, Endpoint::AddNote { .. })),
            0
        );
    }

    #[tokio::test]
    async fn at_risk_triggers_configured_workflow() {
        let patient = linked_patient();
        let test = TestDependencies::new()
            .with_reengagement_workflow("wf-reengage")
            .mock_transport(crm_for(&patient))
            .mock_store(MockSyncStore::new().with_patient(patient.clone()));

        let outcome = patient_at_risk(&test.deps(), patient.user_id).await;

        assert_eq!(outcome, SyncOutcome::Synced);
        assert_eq!(
            test.transport.workflow_triggers(),
            vec![("c-q1".to_string(), "wf-reengage".to_string())]
        );
        assert_eq!(
            stage_of(&test, "opp-q1"),
            test.transport.stage_id(PATIENT_PIPELINE_ID, "At Risk")
        );
    }

    #[tokio::test]
    async fn at_risk_without_workflow_skips_trigger() {
        let patient = linked_patient();
        let test = TestDependencies::new()
            .mock_transport(crm_for(&patient))
            .mock_store(MockSyncStore::new().with_patient(patient.clone()));

        patient_at_risk(&test.deps(), patient.user_id).await;

        assert!(test.transport.workflow_triggers().is_empty());
    }

    #[tokio::test]
    async fn churned_marks_lost() {
        let patient = linked_patient();
        let test = TestDependencies::new()
            .mock_transport(crm_for(&patient))
            .mock_store(MockSyncStore::new().with_patient(patient.clone()));

        let outcome = patient_churned(&test.deps(), patient.user_id).await;

        assert_eq!(outcome, SyncOutcome::Synced);
        let opportunity = test.transport.opportunity("opp-q1").unwrap();
        assert_eq!(opportunity["status"], "lost");
        let contact = test.transport.contact("c-q1").unwrap();
        assert!(contact.tags.contains(&"churned".to_string()));
    }

    #[tokio::test]
    async fn unknown_stage_is_skipped_not_failed() {
        let patient = linked_patient();
        let test = TestDependencies::new()
            .mock_transport(
                MockCrmTransport::new()
                    .with_pipeline(PATIENT_PIPELINE_ID, "Patients", &["Something Else"])
                    .with_contact("c-q1", &patient.email)
                    .with_opportunity("opp-q1", PATIENT_PIPELINE_ID, None),
            )
            .mock_store(MockSyncStore::new().with_patient(patient.clone()));

        let outcome = patient_first_booking(&test.deps(), patient.user_id).await;

        assert_eq!(outcome, SyncOutcome::Synced);
        assert_eq!(
            test.transport
                .count_matching(|e| matches!(e, Endpoint::UpdateOpportunity { .. })),
            0
        );
    }

    #[tokio::test]
    async fn missing_rows_are_silent() {
        let test = TestDependencies::new();
        let deps = test.deps();

        assert!(matches!(
            patient_churned(&deps, Uuid::new_v4()).await,
            SyncOutcome::Skipped(_)
        ));
        assert!(matches!(
            patient_appointment_completed(&deps, Uuid::new_v4()).await,
            SyncOutcome::Skipped(_)
        ));
        assert!(test.store.audit_entries().is_empty());
    }
}
