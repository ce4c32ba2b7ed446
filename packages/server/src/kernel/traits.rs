// Trait definitions for dependency injection
//
// These are INFRASTRUCTURE traits only - no business logic.
// CRM lifecycle rules live in domains/crm and use these traits.
//
// Naming convention: Base* for trait names (e.g., BaseCrmTransport, BaseAuditLog)

use anyhow::Result;
use async_trait::async_trait;
use highlevel_client::{ApiRequest, ApiResponse};
use uuid::Uuid;

use crate::domains::crm::models::{
    ActorKind, Appointment, BackfillFilter, CrmSyncLog, NewCrmSyncLog, PatientProfile,
    PractitionerProfile,
};

// =============================================================================
// CRM Transport Trait (Infrastructure - raw HTTP to the CRM)
// =============================================================================

#[async_trait]
pub trait BaseCrmTransport: Send + Sync {
    /// Execute one request.
    ///
    /// `Err` means the exchange never completed (network, timeout). Any HTTP
    /// status, including 4xx/5xx, comes back as `Ok` with the parsed body.
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse>;
}

// =============================================================================
// Audit Log Trait (Infrastructure - append-only call log)
// =============================================================================

#[async_trait]
pub trait BaseAuditLog: Send + Sync {
    /// Append one entry and return it as stored
    async fn record(&self, entry: NewCrmSyncLog) -> Result<CrmSyncLog>;

    async fn find(&self, id: Uuid) -> Result<Option<CrmSyncLog>>;

    /// Newest first
    async fn recent(&self, failed_only: bool, limit: i64) -> Result<Vec<CrmSyncLog>>;
}

// =============================================================================
// Sync Store Trait (Infrastructure - the primary store slice the sync touches)
// =============================================================================

#[async_trait]
pub trait BaseSyncStore: Send + Sync {
    async fn find_practitioner(&self, user_id: Uuid) -> Result<Option<PractitionerProfile>>;

    async fn find_patient(&self, user_id: Uuid) -> Result<Option<PatientProfile>>;

    async fn find_appointment(&self, appointment_id: Uuid) -> Result<Option<Appointment>>;

    /// "First Last" for any user
    async fn find_user_name(&self, user_id: Uuid) -> Result<Option<String>>;

    async fn assigned_practitioner_name(&self, patient_id: Uuid) -> Result<Option<String>>;

    /// Sum of the patient's completed appointment amounts, minor units
    async fn completed_revenue_minor(&self, patient_id: Uuid) -> Result<i64>;

    async fn find_contact_id(&self, kind: ActorKind, user_id: Uuid) -> Result<Option<String>>;

    async fn save_contact_id(&self, kind: ActorKind, user_id: Uuid, contact_id: &str)
        -> Result<()>;

    async fn save_opportunity_id(
        &self,
        kind: ActorKind,
        user_id: Uuid,
        opportunity_id: &str,
    ) -> Result<()>;

    async fn find_actor_ids(&self, kind: ActorKind, filter: BackfillFilter) -> Result<Vec<Uuid>>;
}
