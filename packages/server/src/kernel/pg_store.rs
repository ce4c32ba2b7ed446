//! PostgreSQL implementations of the sync store and audit log traits.
//!
//! Thin delegation to the sqlx models in `domains::crm::models`.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::domains::crm::models::{
    actor, ActorKind, Appointment, BackfillFilter, CrmSyncLog, NewCrmSyncLog, PatientProfile,
    PractitionerProfile,
};
use crate::kernel::{BaseAuditLog, BaseSyncStore};

#[derive(Clone)]
pub struct PostgresSyncStore {
    pool: PgPool,
}

impl PostgresSyncStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BaseSyncStore for PostgresSyncStore {
    async fn find_practitioner(&self, user_id: Uuid) -> Result<Option<PractitionerProfile>> {
        PractitionerProfile::find_by_user_id(user_id, &self.pool).await
    }

    async fn find_patient(&self, user_id: Uuid) -> Result<Option<PatientProfile>> {
        PatientProfile::find_by_user_id(user_id, &self.pool).await
    }

    async fn find_appointment(&self, appointment_id: Uuid) -> Result<Option<Appointment>> {
        Appointment::find_by_id(appointment_id, &self.pool).await
    }

    async fn find_user_name(&self, user_id: Uuid) -> Result<Option<String>> {
        actor::find_user_name(user_id, &self.pool).await
    }

    async fn assigned_practitioner_name(&self, patient_id: Uuid) -> Result<Option<String>> {
        PatientProfile::assigned_practitioner_name(patient_id, &self.pool).await
    }

    async fn completed_revenue_minor(&self, patient_id: Uuid) -> Result<i64> {
        Appointment::completed_total_minor(patient_id, &self.pool).await
    }

    async fn find_contact_id(&self, kind: ActorKind, user_id: Uuid) -> Result<Option<String>> {
        actor::find_contact_id(kind, user_id, &self.pool).await
    }

    async fn save_contact_id(
        &self,
        kind: ActorKind,
        user_id: Uuid,
        contact_id: &str,
    ) -> Result<()> {
        actor::update_contact_id(kind, user_id, contact_id, &self.pool).await
    }

    async fn save_opportunity_id(
        &self,
        kind: ActorKind,
        user_id: Uuid,
        opportunity_id: &str,
    ) -> Result<()> {
        actor::update_opportunity_id(kind, user_id, opportunity_id, &self.pool).await
    }

    async fn find_actor_ids(&self, kind: ActorKind, filter: BackfillFilter) -> Result<Vec<Uuid>> {
        actor::find_actor_ids(kind, filter, &self.pool).await
    }
}

#[derive(Clone)]
pub struct PostgresAuditLog {
    pool: PgPool,
}

impl PostgresAuditLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BaseAuditLog for PostgresAuditLog {
    async fn record(&self, entry: NewCrmSyncLog) -> Result<CrmSyncLog> {
        entry.into_log().insert(&self.pool).await
    }

    async fn find(&self, id: Uuid) -> Result<Option<CrmSyncLog>> {
        CrmSyncLog::find_by_id(id, &self.pool).await
    }

    async fn recent(&self, failed_only: bool, limit: i64) -> Result<Vec<CrmSyncLog>> {
        CrmSyncLog::find_recent(failed_only, limit, &self.pool).await
    }
}
