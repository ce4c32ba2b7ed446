use anyhow::Result;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

/// Which of the two actor types (and therefore which pipeline) a row belongs to
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ActorKind {
    Practitioner,
    Patient,
}

impl ActorKind {
    fn profile_table(&self) -> &'static str {
        match self {
            ActorKind::Practitioner => "practitioner_profiles",
            ActorKind::Patient => "patient_profiles",
        }
    }
}

impl std::fmt::Display for ActorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActorKind::Practitioner => write!(f, "practitioner"),
            ActorKind::Patient => write!(f, "patient"),
        }
    }
}

impl std::str::FromStr for ActorKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "practitioner" | "practitioners" => Ok(ActorKind::Practitioner),
            "patient" | "patients" => Ok(ActorKind::Patient),
            _ => Err(anyhow::anyhow!("Invalid actor kind: {}", s)),
        }
    }
}

/// Row selection for bulk sync
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BackfillFilter {
    /// Rows without a stored CRM contact id
    #[default]
    Unsynced,
    All,
}

/// Practitioner profile joined with its user row
#[derive(sqlx::FromRow, Debug, Clone)]
pub struct PractitionerProfile {
    pub user_id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub discipline: Option<String>,
    pub qualifications: Option<String>,
    pub years_experience: Option<i32>,
    pub registration_body: Option<String>,
    pub crm_contact_id: Option<String>,
    pub crm_opportunity_id: Option<String>,
}

/// Patient profile joined with its user row
#[derive(sqlx::FromRow, Debug, Clone)]
pub struct PatientProfile {
    pub user_id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub goals: Vec<String>,
    pub motivation_level: Option<String>,
    pub diet_type: Option<String>,
    pub crm_contact_id: Option<String>,
    pub crm_opportunity_id: Option<String>,
}

impl PractitionerProfile {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    pub async fn find_by_user_id(user_id: Uuid, pool: &PgPool) -> Result<Option<Self>> {
        sqlx::query_as::<_, Self>(
            r#"
            SELECT u.id AS user_id, u.first_name, u.last_name, u.email, u.phone,
                   p.discipline, p.qualifications, p.years_experience, p.registration_body,
                   p.crm_contact_id, p.crm_opportunity_id
            FROM practitioner_profiles p
            JOIN users u ON u.id = p.user_id
            WHERE p.user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(pool)
        .await
        .map_err(Into::into)
    }
}

impl PatientProfile {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    pub async fn find_by_user_id(user_id: Uuid, pool: &PgPool) -> Result<Option<Self>> {
        sqlx::query_as::<_, Self>(
            r#"
            SELECT u.id AS user_id, u.first_name, u.last_name, u.email, u.phone,
                   p.goals, p.motivation_level, p.diet_type,
                   p.crm_contact_id, p.crm_opportunity_id
            FROM patient_profiles p
            JOIN users u ON u.id = p.user_id
            WHERE p.user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(pool)
        .await
        .map_err(Into::into)
    }

    /// Name of the practitioner currently caring for this patient, if any
    pub async fn assigned_practitioner_name(
        patient_id: Uuid,
        pool: &PgPool,
    ) -> Result<Option<String>> {
        sqlx::query_scalar::<_, String>(
            r#"
            SELECT u.first_name || ' ' || u.last_name
            FROM care_relationships cr
            JOIN users u ON u.id = cr.practitioner_id
            WHERE cr.patient_id = $1 AND cr.status = 'active'
            ORDER BY cr.created_at DESC
            LIMIT 1
            "#,
        )
        .bind(patient_id)
        .fetch_optional(pool)
        .await
        .map_err(Into::into)
    }
}

/// Display name of any user ("First Last")
pub async fn find_user_name(user_id: Uuid, pool: &PgPool) -> Result<Option<String>> {
    sqlx::query_scalar::<_, String>(
        "SELECT first_name || ' ' || last_name FROM users WHERE id = $1",
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await
    .map_err(Into::into)
}

/// Stored CRM contact id for an actor
pub async fn find_contact_id(kind: ActorKind, user_id: Uuid, pool: &PgPool) -> Result<Option<String>> {
    let sql = format!(
        "SELECT crm_contact_id FROM {} WHERE user_id = $1",
        kind.profile_table()
    );
    let row: Option<Option<String>> = sqlx::query_scalar(&sql)
        .bind(user_id)
        .fetch_optional(pool)
        .await?;
    Ok(row.flatten())
}

pub async fn update_contact_id(
    kind: ActorKind,
    user_id: Uuid,
    contact_id: &str,
    pool: &PgPool,
) -> Result<()> {
    let sql = format!(
        "UPDATE {} SET crm_contact_id = $2 WHERE user_id = $1",
        kind.profile_table()
    );
    sqlx::query(&sql)
        .bind(user_id)
        .bind(contact_id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn update_opportunity_id(
    kind: ActorKind,
    user_id: Uuid,
    opportunity_id: &str,
    pool: &PgPool,
) -> Result<()> {
    let sql = format!(
        "UPDATE {} SET crm_opportunity_id = $2 WHERE user_id = $1",
        kind.profile_table()
    );
    sqlx::query(&sql)
        .bind(user_id)
        .bind(opportunity_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// User ids of actors selected for bulk sync, oldest first
pub async fn find_actor_ids(
    kind: ActorKind,
    filter: BackfillFilter,
    pool: &PgPool,
) -> Result<Vec<Uuid>> {
    let condition = match filter {
        BackfillFilter::Unsynced => "WHERE crm_contact_id IS NULL",
        BackfillFilter::All => "",
    };
    let sql = format!(
        "SELECT user_id FROM {} {} ORDER BY created_at ASC",
        kind.profile_table(),
        condition
    );
    sqlx::query_scalar::<_, Uuid>(&sql)
        .fetch_all(pool)
        .await
        .map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn actor_kind_parses_singular_and_plural() {
        assert_eq!("practitioners".parse::<ActorKind>().unwrap(), ActorKind::Practitioner);
        assert_eq!("patient".parse::<ActorKind>().unwrap(), ActorKind::Patient);
        assert!("admin".parse::<ActorKind>().is_err());
    }
}
