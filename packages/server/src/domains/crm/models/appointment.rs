use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

pub const STATUS_COMPLETED: &str = "completed";

/// Appointment row, read-only from the sync's point of view
#[derive(sqlx::FromRow, Debug, Clone)]
pub struct Appointment {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub practitioner_id: Uuid,
    pub status: String,
    /// Price in minor currency units (pence/cents)
    pub amount_minor: Option<i64>,
    pub session_type: Option<String>,
    pub starts_at: DateTime<Utc>,
    pub video_join_url: Option<String>,
}

impl Appointment {
    pub async fn find_by_id(id: Uuid, pool: &PgPool) -> Result<Option<Self>> {
        sqlx::query_as::<_, Self>(
            r#"
            SELECT id, patient_id, practitioner_id, status, amount_minor,
                   session_type, starts_at, video_join_url
            FROM appointments
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(Into::into)
    }

    /// Sum of completed appointment amounts for a patient, in minor units
    pub async fn completed_total_minor(patient_id: Uuid, pool: &PgPool) -> Result<i64> {
        let total: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT SUM(amount_minor)::BIGINT
            FROM appointments
            WHERE patient_id = $1 AND status = $2
            "#,
        )
        .bind(patient_id)
        .bind(STATUS_COMPLETED)
        .fetch_one(pool)
        .await?;
        Ok(total.unwrap_or(0))
    }
}
