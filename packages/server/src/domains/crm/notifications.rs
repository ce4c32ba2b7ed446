//! SMS notifications sent through the CRM's conversations API.
//!
//! Best effort: a patient without a stored contact id gets no message, and no
//! contact is created for them.

use anyhow::Result;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domains::crm::lifecycle::{guarded, SyncOutcome};
use crate::kernel::ServerDeps;

const FALLBACK_PRACTITIONER: &str = "your practitioner";

pub fn reminder_message(
    first_name: &str,
    practitioner: &str,
    starts_at: DateTime<Utc>,
    join_link: Option<&str>,
) -> String {
    let mut message = format!(
        "Hi {}, a reminder that your session with {} is at {}.",
        first_name,
        practitioner,
        starts_at.format("%H:%M on %a %-d %b")
    );
    if let Some(link) = join_link.filter(|l| !l.trim().is_empty()) {
        message.push_str(&format!(" Join here: {}", link));
    }
    message
}

pub fn nudge_message(first_name: &str, practitioner: &str, days_since_checkin: i64) -> String {
    format!(
        "Hi {}, we haven't had a check-in from you in {} days. {} would love to hear how you're getting on.",
        first_name, days_since_checkin, practitioner
    )
}

/// Remind the patient of an upcoming appointment.
pub async fn appointment_reminder(deps: &ServerDeps, appointment_id: Uuid) -> SyncOutcome {
    guarded(
        "appointment_reminder",
        appointment_id,
        send_reminder(deps, appointment_id),
    )
    .await
}

async fn send_reminder(deps: &ServerDeps, appointment_id: Uuid) -> Result<SyncOutcome> {
    let Some(appointment) = deps.store.find_appointment(appointment_id).await? else {
        return Ok(SyncOutcome::skipped("appointment not found"));
    };
    let Some(patient) = deps.store.find_patient(appointment.patient_id).await? else {
        return Ok(SyncOutcome::skipped("patient not found"));
    };
    let Some(contact_id) = patient.crm_contact_id.as_deref() else {
        return Ok(SyncOutcome::skipped("patient has no CRM contact"));
    };

    let practitioner = deps
        .store
        .find_user_name(appointment.practitioner_id)
        .await?
        .unwrap_or_else(|| FALLBACK_PRACTITIONER.to_string());
    let message = reminder_message(
        &patient.first_name,
        &practitioner,
        appointment.starts_at,
        appointment.video_join_url.as_deref(),
    );

    Ok(sent(
        deps.crm
            .send_sms(contact_id, &message, Some(patient.user_id))
            .await,
    ))
}

/// Nudge a patient who has not checked in for a while.
pub async fn low_checkin_nudge(
    deps: &ServerDeps,
    patient_id: Uuid,
    days_since_checkin: i64,
) -> SyncOutcome {
    guarded(
        "low_checkin_nudge",
        patient_id,
        send_nudge(deps, patient_id, days_since_checkin),
    )
    .await
}

async fn send_nudge(deps: &ServerDeps, patient_id: Uuid, days_since_checkin: i64) -> Result<SyncOutcome> {
    let Some(patient) = deps.store.find_patient(patient_id).await? else {
        return Ok(SyncOutcome::skipped("patient not found"));
    };
    let Some(contact_id) = patient.crm_contact_id.as_deref() else {
        return Ok(SyncOutcome::skipped("patient has no CRM contact"));
    };

    let practitioner = deps
        .store
        .assigned_practitioner_name(patient_id)
        .await?
        .unwrap_or_else(|| FALLBACK_PRACTITIONER.to_string());
    let message = nudge_message(&patient.first_name, &practitioner, days_since_checkin);

    Ok(sent(
        deps.crm
            .send_sms(contact_id, &message, Some(patient_id))
            .await,
    ))
}

fn sent(ok: bool) -> SyncOutcome {
    if ok {
        SyncOutcome::Synced
    } else {
        SyncOutcome::failed("SMS was not accepted")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::test_dependencies::{
        appointment_fixture, patient_fixture, practitioner_fixture, MockSyncStore, TestDependencies,
    };
    use chrono::TimeZone;

    #[test]
    fn reminder_includes_join_link_only_when_present() {
        let at = Utc.with_ymd_and_hms(2026, 3, 5, 14, 30, 0).unwrap();

        assert_eq!(
            reminder_message("Quinn", "Mo Reid", at, None),
            "Hi Quinn, a reminder that your session with Mo Reid is at 14:30 on Thu 5 Mar."
        );
        assert!(reminder_message("Quinn", "Mo Reid", at, Some("https://v.example/r"))
            .ends_with(" Join here: https://v.example/r"));
    }

    #[tokio::test]
    async fn reminder_is_sent_to_stored_contact() {
        let mut patient = patient_fixture("Quinn", "One", &[]);
        patient.crm_contact_id = Some("c-q1".to_string());
        let practitioner = practitioner_fixture("Mo", "Reid", "Nutrition");
        let appointment = appointment_fixture(
            patient.user_id,
            practitioner.user_id,
            "scheduled",
            5000,
            Utc::now(),
        );
        let test = TestDependencies::new().mock_store(
            MockSyncStore::new()
                .with_patient(patient.clone())
                .with_practitioner(practitioner)
                .with_appointment(appointment.clone()),
        );

        let outcome = appointment_reminder(&test.deps(), appointment.id).await;

        assert_eq!(outcome, SyncOutcome::Synced);
        let messages = test.transport.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].0, "c-q1");
        assert!(messages[0].1.starts_with("Hi Quinn, a reminder that your session with Mo Reid"));
        assert!(messages[0].1.contains("Join here: https://video.example.com/room/abc"));
    }

    #[tokio::test]
    async fn nudge_falls_back_to_generic_practitioner() {
        let mut patient = patient_fixture("Quinn", "One", &[]);
        patient.crm_contact_id = Some("c-q1".to_string());
        let test = TestDependencies::new()
            .mock_store(MockSyncStore::new().with_patient(patient.clone()));

        low_checkin_nudge(&test.deps(), patient.user_id, 9).await;

        assert_eq!(
            test.transport.messages()[0].1,
            "Hi Quinn, we haven't had a check-in from you in 9 days. your practitioner would love to hear how you're getting on."
        );
    }

    #[tokio::test]
    async fn nudge_names_assigned_practitioner() {
        let mut patient = patient_fixture("Quinn", "One", &[]);
        patient.crm_contact_id = Some("c-q1".to_string());
        let practitioner = practitioner_fixture("Mo", "Reid", "Nutrition");
        let test = TestDependencies::new().mock_store(
            MockSyncStore::new()
                .with_patient(patient.clone())
                .with_practitioner(practitioner.clone())
                .with_care_relationship(patient.user_id, practitioner.user_id),
        );

        low_checkin_nudge(&test.deps(), patient.user_id, 5).await;

        assert!(test.transport.messages()[0].1.contains("Mo Reid would love"));
    }

    #[tokio::test]
    async fn no_contact_means_no_message_and_no_create() {
        let patient = patient_fixture("Quinn", "One", &[]);
        let test = TestDependencies::new()
            .mock_store(MockSyncStore::new().with_patient(patient.clone()));

        let outcome = low_checkin_nudge(&test.deps(), patient.user_id, 9).await;

        assert!(matches!(outcome, SyncOutcome::Skipped(_)));
        assert!(test.transport.requests().is_empty());
        assert!(test.store.audit_entries().is_empty());
    }
}
