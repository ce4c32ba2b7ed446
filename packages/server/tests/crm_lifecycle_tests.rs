//! End-to-end lifecycle journeys
//!
//! Each test drives one actor through its whole pipeline via `CrmSync`, the
//! same entry point the event endpoint uses, and checks where the CRM ends up.

use chrono::Utc;
use crm_sync::domains::crm::models::appointment::STATUS_COMPLETED;
use crm_sync::domains::crm::{CrmSync, LifecycleEvent, SyncOutcome};
use crm_sync::kernel::test_dependencies::{
    appointment_fixture, patient_fixture, practitioner_fixture, MockSyncStore, TestDependencies,
    TransportFailure, PATIENT_PIPELINE_ID, PRACTITIONER_PIPELINE_ID,
};
use uuid::Uuid;

fn stage_of(test: &TestDependencies, opportunity_id: &str) -> Option<String> {
    test.transport.opportunity(opportunity_id)?["pipelineStageId"]
        .as_str()
        .map(str::to_string)
}

#[tokio::test]
async fn patient_journey_from_signup_to_churn() {
    let patient = patient_fixture("Nia", "Stone", &["More Energy"]);
    let practitioner = practitioner_fixture("Ola", "Vance", "Nutrition");
    let appointment = appointment_fixture(
        patient.user_id,
        practitioner.user_id,
        STATUS_COMPLETED,
        4500,
        Utc::now(),
    );
    let test = TestDependencies::new().mock_store(
        MockSyncStore::new()
            .with_patient(patient.clone())
            .with_practitioner(practitioner.clone())
            .with_appointment(appointment.clone())
            .with_care_relationship(patient.user_id, practitioner.user_id),
    );
    let sync = CrmSync::new(test.deps());
    let patient_id = patient.user_id;

    let steps = [
        (
            LifecycleEvent::PatientSignupComplete { patient_id },
            "In Queue",
        ),
        (
            LifecycleEvent::PatientMatched {
                patient_id,
                practitioner_id: practitioner.user_id,
            },
            "Matched",
        ),
        (
            LifecycleEvent::PatientFirstBooking { patient_id },
            "First Session Booked",
        ),
        (
            LifecycleEvent::AppointmentCompleted {
                appointment_id: appointment.id,
            },
            "Active Patient",
        ),
        (LifecycleEvent::PatientAtRisk { patient_id }, "At Risk"),
        (LifecycleEvent::PatientChurned { patient_id }, "Churned"),
    ];

    for (event, expected_stage) in steps {
        let name = event.name();
        assert_eq!(sync.handle(event).await, SyncOutcome::Synced, "{}", name);

        let opportunity_id = test
            .store
            .patient(patient_id)
            .and_then(|p| p.crm_opportunity_id)
            .expect("opportunity stored after signup");
        assert_eq!(
            stage_of(&test, &opportunity_id),
            test.transport.stage_id(PATIENT_PIPELINE_ID, expected_stage),
            "stage after {}",
            name
        );
    }

    let stored = test.store.patient(patient_id).unwrap();
    let contact = test
        .transport
        .contact(stored.crm_contact_id.as_deref().unwrap())
        .unwrap();
    for tag in ["patient", "goal-more-energy", "matched", "at-risk", "churned"] {
        assert!(contact.tags.contains(&tag.to_string()), "missing tag {}", tag);
    }
    for tag in ["in-queue", "active"] {
        assert!(!contact.tags.contains(&tag.to_string()), "stale tag {}", tag);
    }

    let opportunity = test
        .transport
        .opportunity(stored.crm_opportunity_id.as_deref().unwrap())
        .unwrap();
    assert_eq!(opportunity["monetaryValue"].as_f64(), Some(45.0));
    assert_eq!(opportunity["status"], "lost");

    assert_eq!(test.transport.contacts().len(), 1);
    assert_eq!(test.transport.opportunities().len(), 1);
    assert!(test.store.audit_entries().iter().all(|log| log.success));
}

#[tokio::test]
async fn practitioner_journey_from_signup_to_verified() {
    let practitioner = practitioner_fixture("Ivo", "Hart", "Osteopathy");
    let practitioner_id = practitioner.user_id;
    let test = TestDependencies::new()
        .mock_store(MockSyncStore::new().with_practitioner(practitioner.clone()));
    let sync = CrmSync::new(test.deps());

    let outcome = sync
        .handle(LifecycleEvent::PractitionerSignupComplete { practitioner_id })
        .await;
    assert_eq!(outcome, SyncOutcome::Synced);

    let outcome = sync
        .handle(LifecycleEvent::PractitionerVerified { practitioner_id })
        .await;
    assert_eq!(outcome, SyncOutcome::Synced);

    let stored = test.store.practitioner(practitioner_id).unwrap();
    let contact_id = stored.crm_contact_id.unwrap();
    let opportunity_id = stored.crm_opportunity_id.unwrap();
    assert_eq!(
        stage_of(&test, &opportunity_id),
        test.transport
            .stage_id(PRACTITIONER_PIPELINE_ID, "Verified & Live")
    );

    let contact = test.transport.contact(&contact_id).unwrap();
    for tag in ["practitioner", "onboarding-complete", "discipline-osteopathy", "verified"] {
        assert!(contact.tags.contains(&tag.to_string()), "missing tag {}", tag);
    }
    assert_eq!(test.transport.notes_for(&contact_id).len(), 2);
}

#[tokio::test]
async fn crm_outage_never_reaches_the_caller_and_is_audited() {
    let patient = patient_fixture("Uma", "Reed", &[]);
    let test =
        TestDependencies::new().mock_store(MockSyncStore::new().with_patient(patient.clone()));
    test.transport.fail_with(TransportFailure::Network);
    let sync = CrmSync::new(test.deps());

    let outcome = sync
        .handle(LifecycleEvent::PatientSignupComplete {
            patient_id: patient.user_id,
        })
        .await;

    assert!(matches!(outcome, SyncOutcome::Failed(_)));
    let stored = test.store.patient(patient.user_id).unwrap();
    assert!(stored.crm_contact_id.is_none());
    let entries = test.store.audit_entries();
    assert!(!entries.is_empty());
    assert!(entries.iter().all(|log| !log.success && log.error.is_some()));
}

#[tokio::test]
async fn events_for_unknown_actors_are_skipped_quietly() {
    let test = TestDependencies::new();
    let sync = CrmSync::new(test.deps());

    let outcome = sync
        .handle(LifecycleEvent::PatientChurned {
            patient_id: Uuid::new_v4(),
        })
        .await;

    assert!(matches!(outcome, SyncOutcome::Skipped(_)));
    assert!(test.transport.requests().is_empty());
    assert!(test.store.audit_entries().is_empty());
}
