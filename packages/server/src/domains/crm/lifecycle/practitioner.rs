//! Practitioner onboarding pipeline: Pending Verification, then Verified & Live
//! or Rejected. Suspension is tracked by tag only.

use anyhow::Result;
use highlevel_client::{OpportunityInput, OpportunityStatus};
use tracing::debug;
use uuid::Uuid;

use super::{
    discipline_tag, guarded, move_to_stage, open_opportunity, tags, today, Steps, SyncOutcome,
};
use crate::domains::crm::identity::{ensure_contact, ContactDetails, ContactSource};
use crate::domains::crm::models::{ActorKind, PractitionerProfile};
use crate::domains::crm::stages::PractitionerStage;
use crate::kernel::ServerDeps;

const NO_CONTACT: &str = "practitioner has no CRM contact";

/// Signup complete: link or create the contact, open an opportunity in
/// Pending Verification and record the practitioner's credentials.
pub async fn practitioner_signup_complete(deps: &ServerDeps, practitioner_id: Uuid) -> SyncOutcome {
    guarded(
        "practitioner_signup_complete",
        practitioner_id,
        signup_complete(deps, practitioner_id),
    )
    .await
}

async fn signup_complete(deps: &ServerDeps, practitioner_id: Uuid) -> Result<SyncOutcome> {
    let Some(practitioner) = deps.store.find_practitioner(practitioner_id).await? else {
        return Ok(SyncOutcome::skipped("practitioner not found"));
    };
    let user_id = Some(practitioner_id);

    let mut signup_tags = tags(&["practitioner", "onboarding-complete"]);
    if let Some(discipline) = practitioner.discipline.as_deref().filter(|d| !d.trim().is_empty()) {
        signup_tags.push(discipline_tag(discipline));
    }

    let details = ContactDetails {
        kind: ActorKind::Practitioner,
        user_id: practitioner_id,
        first_name: practitioner.first_name.clone(),
        last_name: practitioner.last_name.clone(),
        email: practitioner.email.clone(),
        phone: practitioner.phone.clone(),
        tags: signup_tags.clone(),
    };
    let Some(contact) = ensure_contact(deps, &details).await? else {
        return Ok(SyncOutcome::failed("CRM contact could not be resolved"));
    };

    let mut steps = Steps::default();

    // Contacts that already existed never received the signup tags
    if contact.source != ContactSource::Created {
        steps.record(
            "add_tags",
            deps.crm.add_tags(&contact.id, &signup_tags, user_id).await,
        );
    }

    match practitioner.crm_opportunity_id.as_deref() {
        Some(existing) => debug!(opportunity_id = existing, "Practitioner opportunity already exists"),
        None => steps.record_optional(
            "create_opportunity",
            open_opportunity(
                deps,
                ActorKind::Practitioner,
                practitioner_id,
                &contact.id,
                deps.crm_config.practitioner_pipeline_id.as_deref(),
                PractitionerStage::PendingVerification.name(),
                format!("{} - Practitioner", practitioner.full_name()),
            )
            .await?,
        ),
    }

    steps.record(
        "add_note",
        deps.crm
            .add_note(&contact.id, &credentials_note(&practitioner), user_id)
            .await,
    );

    Ok(steps.finish())
}

fn credentials_note(practitioner: &PractitionerProfile) -> String {
    let mut lines = vec![format!("Practitioner signup completed on {}.", today())];
    if let Some(discipline) = &practitioner.discipline {
        lines.push(format!("Discipline: {}", discipline));
    }
    if let Some(qualifications) = &practitioner.qualifications {
        lines.push(format!("Qualifications: {}", qualifications));
    }
    if let Some(years) = practitioner.years_experience {
        lines.push(format!("Years of experience: {}", years));
    }
    if let Some(body) = &practitioner.registration_body {
        lines.push(format!("Registration body: {}", body));
    }
    lines.join("\n")
}

/// Verified: tag, move to Verified & Live, add a dated note.
pub async fn practitioner_verified(deps: &ServerDeps, practitioner_id: Uuid) -> SyncOutcome {
    guarded("practitioner_verified", practitioner_id, verified(deps, practitioner_id)).await
}

async fn verified(deps: &ServerDeps, practitioner_id: Uuid) -> Result<SyncOutcome> {
    let Some(practitioner) = deps.store.find_practitioner(practitioner_id).await? else {
        return Ok(SyncOutcome::skipped("practitioner not found"));
    };
    let Some(contact_id) = practitioner.crm_contact_id.as_deref() else {
        return Ok(SyncOutcome::skipped(NO_CONTACT));
    };
    let user_id = Some(practitioner_id);
    let mut steps = Steps::default();

    steps.record(
        "add_tags",
        deps.crm.add_tags(contact_id, &tags(&["verified"]), user_id).await,
    );
    steps.record_optional(
        "move_stage",
        move_to_stage(
            deps,
            practitioner.crm_opportunity_id.as_deref(),
            deps.crm_config.practitioner_pipeline_id.as_deref(),
            PractitionerStage::VerifiedAndLive.name(),
            practitioner_id,
        )
        .await,
    );
    steps.record(
        "add_note",
        deps.crm
            .add_note(contact_id, &format!("Practitioner verified on {}.", today()), user_id)
            .await,
    );

    Ok(steps.finish())
}

/// Rejected: tag, move to Rejected, mark the opportunity lost, note the reason.
pub async fn practitioner_rejected(
    deps: &ServerDeps,
    practitioner_id: Uuid,
    reason: &str,
) -> SyncOutcome {
    guarded(
        "practitioner_rejected",
        practitioner_id,
        rejected(deps, practitioner_id, reason),
    )
    .await
}

async fn rejected(deps: &ServerDeps, practitioner_id: Uuid, reason: &str) -> Result<SyncOutcome> {
    let Some(practitioner) = deps.store.find_practitioner(practitioner_id).await? else {
        return Ok(SyncOutcome::skipped("practitioner not found"));
    };
    let Some(contact_id) = practitioner.crm_contact_id.as_deref() else {
        return Ok(SyncOutcome::skipped(NO_CONTACT));
    };
    let user_id = Some(practitioner_id);
    let opportunity_id = practitioner.crm_opportunity_id.as_deref();
    let mut steps = Steps::default();

    steps.record(
        "add_tags",
        deps.crm.add_tags(contact_id, &tags(&["rejected"]), user_id).await,
    );
    steps.record_optional(
        "move_stage",
        move_to_stage(
            deps,
            opportunity_id,
            deps.crm_config.practitioner_pipeline_id.as_deref(),
            PractitionerStage::Rejected.name(),
            practitioner_id,
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
    steps.record(
        "add_note",
        deps.crm
            .add_note(
                contact_id,
                &format!("Application rejected on {}. Reason: {}", today(), reason),
                user_id,
            )
            .await,
    );

    Ok(steps.finish())
}

/// Suspended: tag and note only; the pipeline position is left alone.
pub async fn practitioner_suspended(
    deps: &ServerDeps,
    practitioner_id: Uuid,
    reason: &str,
) -> SyncOutcome {
    guarded(
        "practitioner_suspended",
        practitioner_id,
        suspended(deps, practitioner_id, reason),
    )
    .await
}

async fn suspended(deps: &ServerDeps, practitioner_id: Uuid, reason: &str) -> Result<SyncOutcome> {
    let Some(contact_id) = deps
        .store
        .find_contact_id(ActorKind::Practitioner, practitioner_id)
        .await?
    else {
        return Ok(SyncOutcome::skipped(NO_CONTACT));
    };
    let user_id = Some(practitioner_id);
    let mut steps = Steps::default();

    steps.record(
        "add_tags",
        deps.crm.add_tags(&contact_id, &tags(&["suspended"]), user_id).await,
    );
    steps.record(
        "add_note",
        deps.crm
            .add_note(
                &contact_id,
                &format!("Account suspended on {}. Reason: {}", today(), reason),
                user_id,
            )
            .await,
    );

    Ok(steps.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::test_dependencies::{
        practitioner_fixture, MockCrmTransport, MockSyncStore, TestDependencies, TransportFailure,
        PRACTITIONER_PIPELINE_ID,
    };
    use highlevel_client::Endpoint;

    fn with_practitioner(profile: PractitionerProfile) -> TestDependencies {
        TestDependencies::new().mock_store(MockSyncStore::new().with_practitioner(profile))
    }

    #[tokio::test]
    async fn acupuncture_signup_tags_and_opens_opportunity() {
        let profile = practitioner_fixture("Pat", "One", "Acupuncture");
        let test = with_practitioner(profile.clone());

        let outcome = practitioner_signup_complete(&test.deps(), profile.user_id).await;

        assert_eq!(outcome, SyncOutcome::Synced);
        let stored = test.store.practitioner(profile.user_id).unwrap();
        let contact = test.transport.contact(stored.crm_contact_id.as_deref().unwrap()).unwrap();
        for tag in ["practitioner", "onboarding-complete", "discipline-acupuncture"] {
            assert!(contact.tags.contains(&tag.to_string()), "missing tag {}", tag);
        }

        let opportunities = test.transport.opportunities();
        assert_eq!(opportunities.len(), 1);
        let opportunity = &opportunities[0];
        assert_eq!(opportunity["name"], "Pat One - Practitioner");
        assert_eq!(opportunity["pipelineId"], PRACTITIONER_PIPELINE_ID);
        assert_eq!(
            opportunity["pipelineStageId"].as_str(),
            test.transport
                .stage_id(PRACTITIONER_PIPELINE_ID, "Pending Verification")
                .as_deref()
        );
        assert_eq!(opportunity["status"], "open");
        assert_eq!(stored.crm_opportunity_id.as_deref(), opportunity["id"].as_str());

        let notes = test.transport.notes_for(&contact.id);
        assert_eq!(notes.len(), 1);
        assert!(notes[0].contains("Discipline: Acupuncture"));
    }

    #[tokio::test]
    async fn signup_of_existing_remote_contact_adds_tags_separately() {
        let profile = practitioner_fixture("Pat", "One", "Acupuncture");
        let test = with_practitioner(profile.clone()).mock_transport(
            MockCrmTransport::new()
                .with_default_pipelines()
                .with_contact("c-remote", &profile.email),
        );

        practitioner_signup_complete(&test.deps(), profile.user_id).await;

        assert_eq!(test.transport.contacts().len(), 1);
        let contact = test.transport.contact("c-remote").unwrap();
        assert!(contact.tags.contains(&"discipline-acupuncture".to_string()));
    }

    #[tokio::test]
    async fn signup_twice_keeps_one_contact_and_one_opportunity() {
        let profile = practitioner_fixture("Pat", "One", "Acupuncture");
        let test = with_practitioner(profile.clone());
        let deps = test.deps();

        practitioner_signup_complete(&deps, profile.user_id).await;
        practitioner_signup_complete(&deps, profile.user_id).await;

        assert_eq!(test.transport.contacts().len(), 1);
        assert_eq!(test.transport.opportunities().len(), 1);
    }

    #[tokio::test]
    async fn verified_moves_stage_and_never_creates() {
        let mut profile = practitioner_fixture("Pat", "One", "Acupuncture");
        profile.crm_contact_id = Some("c-1".to_string());
        profile.crm_opportunity_id = Some("opp-1".to_string());
        let test = with_practitioner(profile.clone()).mock_transport(
            MockCrmTransport::new()
                .with_default_pipelines()
                .with_contact("c-1", &profile.email)
                .with_opportunity("opp-1", PRACTITIONER_PIPELINE_ID, None),
        );

        let outcome = practitioner_verified(&test.deps(), profile.user_id).await;

        assert_eq!(outcome, SyncOutcome::Synced);
        assert_eq!(
            test.transport.opportunity("opp-1").unwrap()["pipelineStageId"].as_str(),
            test.transport
                .stage_id(PRACTITIONER_PIPELINE_ID, "Verified & Live")
                .as_deref()
        );
        assert!(test.transport.contact("c-1").unwrap().tags.contains(&"verified".to_string()));
        assert_eq!(
            test.transport
                .count_matching(|e| matches!(e, Endpoint::CreateContact)),
            0
        );
    }

    #[tokio::test]
    async fn verified_without_contact_is_a_silent_skip() {
        let profile = practitioner_fixture("Pat", "One", "Acupuncture");
        let test = with_practitioner(profile.clone());

        let outcome = practitioner_verified(&test.deps(), profile.user_id).await;

        assert!(matches!(outcome, SyncOutcome::Skipped(_)));
        assert!(test.transport.requests().is_empty());
        assert!(test.store.audit_entries().is_empty());
    }

    #[tokio::test]
    async fn rejected_marks_lost_and_keeps_reason_verbatim() {
        let mut profile = practitioner_fixture("Pat", "One", "Acupuncture");
        profile.crm_contact_id = Some("c-1".to_string());
        profile.crm_opportunity_id = Some("opp-1".to_string());
        let test = with_practitioner(profile.clone()).mock_transport(
            MockCrmTransport::new()
                .with_default_pipelines()
                .with_contact("c-1", &profile.email)
                .with_opportunity("opp-1", PRACTITIONER_PIPELINE_ID, None),
        );
        let reason = "Registration <unverifiable> & expired";

        let outcome = practitioner_rejected(&test.deps(), profile.user_id, reason).await;

        assert_eq!(outcome, SyncOutcome::Synced);
        let opportunity = test.transport.opportunity("opp-1").unwrap();
        assert_eq!(opportunity["status"], "lost");
        assert_eq!(
            opportunity["pipelineStageId"].as_str(),
            test.transport.stage_id(PRACTITIONER_PIPELINE_ID, "Rejected").as_deref()
        );
        assert!(test.transport.notes_for("c-1")[0].ends_with(reason));
    }

    #[tokio::test]
    async fn suspended_tags_without_stage_move() {
        let mut profile = practitioner_fixture("Pat", "One", "Acupuncture");
        profile.crm_contact_id = Some("c-1".to_string());
        profile.crm_opportunity_id = Some("opp-1".to_string());
        let test = with_practitioner(profile.clone()).mock_transport(
            MockCrmTransport::new()
                .with_default_pipelines()
                .with_contact("c-1", &profile.email),
        );

        let outcome = practitioner_suspended(&test.deps(), profile.user_id, "Complaint under review").await;

        assert_eq!(outcome, SyncOutcome::Synced);
        assert!(test.transport.contact("c-1").unwrap().tags.contains(&"suspended".to_string()));
        assert_eq!(
            test.transport
                .count_matching(|e| matches!(e, Endpoint::UpdateOpportunity { .. } | Endpoint::ListPipelines)),
            0
        );
    }

    #[tokio::test]
    async fn missing_practitioner_writes_no_audit_entries() {
        let test = TestDependencies::new();

        let outcome = practitioner_signup_complete(&test.deps(), Uuid::new_v4()).await;

        assert!(matches!(outcome, SyncOutcome::Skipped(_)));
        assert!(test.store.audit_entries().is_empty());
    }

    #[tokio::test]
    async fn failing_crm_still_returns() {
        let profile = practitioner_fixture("Pat", "One", "Acupuncture");
        let test = with_practitioner(profile.clone());
        test.transport.fail_with(TransportFailure::Network);

        let outcome = practitioner_signup_complete(&test.deps(), profile.user_id).await;

        assert!(matches!(outcome, SyncOutcome::Failed(_)));
        assert!(test.store.practitioner(profile.user_id).unwrap().crm_contact_id.is_none());
    }

    #[tokio::test]
    async fn store_outage_fails_without_reaching_crm() {
        let profile = practitioner_fixture("Pat", "One", "Acupuncture");
        let test = with_practitioner(profile.clone());
        test.store.fail_store();

        let outcome = practitioner_signup_complete(&test.deps(), profile.user_id).await;

        assert_eq!(outcome, SyncOutcome::failed("connection refused"));
        assert!(test.transport.requests().is_empty());
        assert!(test.store.audit_entries().is_empty());

        test.store.recover_store();
        let outcome = practitioner_signup_complete(&test.deps(), profile.user_id).await;
        assert_eq!(outcome, SyncOutcome::Synced);
    }
}
