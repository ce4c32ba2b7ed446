use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

/// Kind of outbound CRM call recorded in the audit log
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CrmEvent {
    CreateContact,
    UpdateContact,
    LookupByEmail,
    AddTag,
    RemoveTag,
    CreateOpportunity,
    UpdateOpportunity,
    MoveStage,
    GetStages,
    AddNote,
    SendSms,
    TriggerWorkflow,
}

impl CrmEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            CrmEvent::CreateContact => "create_contact",
            CrmEvent::UpdateContact => "update_contact",
            CrmEvent::LookupByEmail => "lookup_by_email",
            CrmEvent::AddTag => "add_tag",
            CrmEvent::RemoveTag => "remove_tag",
            CrmEvent::CreateOpportunity => "create_opportunity",
            CrmEvent::UpdateOpportunity => "update_opportunity",
            CrmEvent::MoveStage => "move_stage",
            CrmEvent::GetStages => "get_stages",
            CrmEvent::AddNote => "add_note",
            CrmEvent::SendSms => "send_sms",
            CrmEvent::TriggerWorkflow => "trigger_workflow",
        }
    }
}

impl std::fmt::Display for CrmEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CrmEvent {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "create_contact" => Ok(CrmEvent::CreateContact),
            "update_contact" => Ok(CrmEvent::UpdateContact),
            "lookup_by_email" => Ok(CrmEvent::LookupByEmail),
            "add_tag" => Ok(CrmEvent::AddTag),
            "remove_tag" => Ok(CrmEvent::RemoveTag),
            "create_opportunity" => Ok(CrmEvent::CreateOpportunity),
            "update_opportunity" => Ok(CrmEvent::UpdateOpportunity),
            "move_stage" => Ok(CrmEvent::MoveStage),
            "get_stages" => Ok(CrmEvent::GetStages),
            "add_note" => Ok(CrmEvent::AddNote),
            "send_sms" => Ok(CrmEvent::SendSms),
            "trigger_workflow" => Ok(CrmEvent::TriggerWorkflow),
            _ => Err(anyhow::anyhow!("Invalid CRM event type: {}", s)),
        }
    }
}

/// One outbound CRM call and its outcome. Rows are never updated; a retry
/// appends a new row.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct CrmSyncLog {
    pub id: Uuid,
    pub event_type: String,
    pub user_id: Option<Uuid>,
    pub contact_id: Option<String>,
    /// Opportunity, pipeline or workflow id the call addressed, if not the contact
    pub target_id: Option<String>,
    pub request_payload: serde_json::Value,
    pub response_payload: Option<serde_json::Value>,
    pub success: bool,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Input for appending an audit row
#[derive(Debug, Clone)]
pub struct NewCrmSyncLog {
    pub event: CrmEvent,
    pub user_id: Option<Uuid>,
    pub contact_id: Option<String>,
    pub target_id: Option<String>,
    pub request_payload: serde_json::Value,
    pub response_payload: Option<serde_json::Value>,
    pub success: bool,
    pub error: Option<String>,
}

impl NewCrmSyncLog {
    /// Materialize the row with a fresh id and timestamp.
    pub fn into_log(self) -> CrmSyncLog {
        CrmSyncLog {
            id: Uuid::new_v4(),
            event_type: self.event.as_str().to_string(),
            user_id: self.user_id,
            contact_id: self.contact_id,
            target_id: self.target_id,
            request_payload: self.request_payload,
            response_payload: self.response_payload,
            success: self.success,
            error: self.error,
            created_at: Utc::now(),
        }
    }
}

impl CrmSyncLog {
    pub fn event(&self) -> Result<CrmEvent> {
        self.event_type.parse()
    }

    pub async fn insert(&self, pool: &PgPool) -> Result<Self> {
        sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO crm_sync_logs (
                id, event_type, user_id, contact_id, target_id,
                request_payload, response_payload, success, error, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING *
            "#,
        )
        .bind(self.id)
        .bind(&self.event_type)
        .bind(self.user_id)
        .bind(&self.contact_id)
        .bind(&self.target_id)
        .bind(&self.request_payload)
        .bind(&self.response_payload)
        .bind(self.success)
        .bind(&self.error)
        .bind(self.created_at)
        .fetch_one(pool)
        .await
        .map_err(Into::into)
    }

    pub async fn find_by_id(id: Uuid, pool: &PgPool) -> Result<Option<Self>> {
        sqlx::query_as::<_, Self>("SELECT * FROM crm_sync_logs WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await
            .map_err(Into::into)
    }

    /// Most recent entries first, optionally only failures
    pub async fn find_recent(failed_only: bool, limit: i64, pool: &PgPool) -> Result<Vec<Self>> {
        sqlx::query_as::<_, Self>(
            r#"
            SELECT *
            FROM crm_sync_logs
            WHERE ($1 = false OR success = false)
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(failed_only)
        .bind(limit)
        .fetch_all(pool)
        .await
        .map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_names_round_trip_through_strings() {
        for event in [
            CrmEvent::CreateContact,
            CrmEvent::LookupByEmail,
            CrmEvent::MoveStage,
            CrmEvent::TriggerWorkflow,
        ] {
            assert_eq!(event.as_str().parse::<CrmEvent>().unwrap(), event);
        }
        assert!("delete_contact".parse::<CrmEvent>().is_err());
    }

    #[test]
    fn serde_name_matches_stored_name() {
        let json = serde_json::to_value(CrmEvent::AddTag).unwrap();
        assert_eq!(json, serde_json::json!("add_tag"));
    }
}
