//! Lifecycle events accepted from the rest of the application and the
//! dispatcher that routes each one to its sync function.

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::debug;
use uuid::Uuid;

use crate::domains::crm::lifecycle::{self, SyncOutcome};
use crate::domains::crm::notifications;
use crate::kernel::ServerDeps;

/// A domain transition the CRM should reflect.
///
/// Wire format is internally tagged: `{"type": "patient_matched", ...}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LifecycleEvent {
    PractitionerSignupComplete { practitioner_id: Uuid },
    PractitionerVerified { practitioner_id: Uuid },
    PractitionerRejected { practitioner_id: Uuid, reason: String },
    PractitionerSuspended { practitioner_id: Uuid, reason: String },
    PatientSignupComplete { patient_id: Uuid },
    PatientMatched { patient_id: Uuid, practitioner_id: Uuid },
    PatientFirstBooking { patient_id: Uuid },
    AppointmentCompleted { appointment_id: Uuid },
    PatientAtRisk { patient_id: Uuid },
    PatientChurned { patient_id: Uuid },
    AppointmentReminder { appointment_id: Uuid },
    LowCheckinNudge { patient_id: Uuid, days_since_checkin: i64 },
}

impl LifecycleEvent {
    pub fn name(&self) -> &'static str {
        match self {
            LifecycleEvent::PractitionerSignupComplete { .. } => "practitioner_signup_complete",
            LifecycleEvent::PractitionerVerified { .. } => "practitioner_verified",
            LifecycleEvent::PractitionerRejected { .. } => "practitioner_rejected",
            LifecycleEvent::PractitionerSuspended { .. } => "practitioner_suspended",
            LifecycleEvent::PatientSignupComplete { .. } => "patient_signup_complete",
            LifecycleEvent::PatientMatched { .. } => "patient_matched",
            LifecycleEvent::PatientFirstBooking { .. } => "patient_first_booking",
            LifecycleEvent::AppointmentCompleted { .. } => "appointment_completed",
            LifecycleEvent::PatientAtRisk { .. } => "patient_at_risk",
            LifecycleEvent::PatientChurned { .. } => "patient_churned",
            LifecycleEvent::AppointmentReminder { .. } => "appointment_reminder",
            LifecycleEvent::LowCheckinNudge { .. } => "low_checkin_nudge",
        }
    }
}

/// Entry point the application calls when a domain event occurs
#[derive(Clone)]
pub struct CrmSync {
    deps: ServerDeps,
}

impl CrmSync {
    pub fn new(deps: ServerDeps) -> Self {
        Self { deps }
    }

    pub fn deps(&self) -> &ServerDeps {
        &self.deps
    }

    /// Run the event's sync inline and return how it ended.
    pub async fn handle(&self, event: LifecycleEvent) -> SyncOutcome {
        let deps = &self.deps;
        match event {
            LifecycleEvent::PractitionerSignupComplete { practitioner_id } => {
                lifecycle::practitioner_signup_complete(deps, practitioner_id).await
            }
            LifecycleEvent::PractitionerVerified { practitioner_id } => {
                lifecycle::practitioner_verified(deps, practitioner_id).await
            }
            LifecycleEvent::PractitionerRejected {
                practitioner_id,
                reason,
            } => lifecycle::practitioner_rejected(deps, practitioner_id, &reason).await,
            LifecycleEvent::PractitionerSuspended {
                practitioner_id,
                reason,
            } => lifecycle::practitioner_suspended(deps, practitioner_id, &reason).await,
            LifecycleEvent::PatientSignupComplete { patient_id } => {
                lifecycle::patient_signup_complete(deps, patient_id).await
            }
            LifecycleEvent::PatientMatched {
                patient_id,
                practitioner_id,
            } => lifecycle::patient_matched(deps, patient_id, practitioner_id).await,
            LifecycleEvent::PatientFirstBooking { patient_id } => {
                lifecycle::patient_first_booking(deps, patient_id).await
            }
            LifecycleEvent::AppointmentCompleted { appointment_id } => {
                lifecycle::patient_appointment_completed(deps, appointment_id).await
            }
            LifecycleEvent::PatientAtRisk { patient_id } => {
                lifecycle::patient_at_risk(deps, patient_id).await
            }
            LifecycleEvent::PatientChurned { patient_id } => {
                lifecycle::patient_churned(deps, patient_id).await
            }
            LifecycleEvent::AppointmentReminder { appointment_id } => {
                notifications::appointment_reminder(deps, appointment_id).await
            }
            LifecycleEvent::LowCheckinNudge {
                patient_id,
                days_since_checkin,
            } => notifications::low_checkin_nudge(deps, patient_id, days_since_checkin).await,
        }
    }

    /// Fire and forget: run the event's sync on a detached task.
    ///
    /// The handle may be dropped; it exists so tests can wait for completion.
    pub fn dispatch(&self, event: LifecycleEvent) -> JoinHandle<SyncOutcome> {
        debug!(event = event.name(), "Dispatching CRM sync");
        let sync = self.clone();
        tokio::spawn(async move { sync.handle(event).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::test_dependencies::{practitioner_fixture, MockSyncStore, TestDependencies};
    use serde_json::json;

    #[test]
    fn events_use_snake_case_type_tag() {
        let id = Uuid::new_v4();
        let event: LifecycleEvent = serde_json::from_value(json!({
            "type": "practitioner_rejected",
            "practitioner_id": id,
            "reason": "Expired registration",
        }))
        .unwrap();

        assert_eq!(
            event,
            LifecycleEvent::PractitionerRejected {
                practitioner_id: id,
                reason: "Expired registration".to_string(),
            }
        );
        assert_eq!(event.name(), "practitioner_rejected");
    }

    #[test]
    fn unknown_event_type_is_rejected() {
        let parsed = serde_json::from_value::<LifecycleEvent>(json!({"type": "patient_graduated"}));
        assert!(parsed.is_err());
    }

    #[tokio::test]
    async fn dispatch_runs_detached() {
        let profile = practitioner_fixture("Pat", "One", "Acupuncture");
        let test = TestDependencies::new()
            .mock_store(MockSyncStore::new().with_practitioner(profile.clone()));
        let sync = CrmSync::new(test.deps());

        let outcome = sync
            .dispatch(LifecycleEvent::PractitionerSignupComplete {
                practitioner_id: profile.user_id,
            })
            .await
            .unwrap();

        assert_eq!(outcome, SyncOutcome::Synced);
        assert!(test.store.practitioner(profile.user_id).unwrap().crm_contact_id.is_some());
    }
}
