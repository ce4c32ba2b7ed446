use axum::{extract::Extension, http::StatusCode, Json};
use serde::Serialize;

use crate::server::app::AxumAppState;

#[derive(Serialize)]
pub struct HealthResponse {
    status: String,
    database: DatabaseHealth,
    connection_pool: ConnectionPoolHealth,
    crm: CrmHealth,
}

#[derive(Serialize)]
pub struct DatabaseHealth {
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Serialize)]
pub struct ConnectionPoolHealth {
    size: u32,
    idle_connections: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_connections: Option<u32>,
}

/// CRM configuration only; the CRM itself is not called
#[derive(Serialize)]
pub struct CrmHealth {
    credentials_configured: bool,
    practitioner_pipeline_configured: bool,
    patient_pipeline_configured: bool,
    reengagement_workflow_configured: bool,
}

/// Health check endpoint
///
/// Checks database connectivity and reports pool utilization and which CRM
/// settings are present. A missing CRM setting does not make the service
/// unhealthy, since CRM sync degrades to logged no-ops.
///
/// Returns 200 OK if the database answers, 503 Service Unavailable otherwise.
pub async fn health_handler(
    Extension(state): Extension<AxumAppState>,
) -> (StatusCode, Json<HealthResponse>) {
    let db_health = match tokio::time::timeout(
        std::time::Duration::from_secs(5),
        sqlx::query("SELECT 1").execute(&state.db_pool),
    )
    .await
    {
        Ok(Ok(_)) => DatabaseHealth {
            status: "ok".to_string(),
            error: None,
        },
        Ok(Err(e)) => DatabaseHealth {
            status: "error".to_string(),
            error: Some(format!("Query failed: {}", e)),
        },
        Err(_) => DatabaseHealth {
            status: "error".to_string(),
            error: Some("Query timeout (>5s)".to_string()),
        },
    };

    let pool_options = state.db_pool.options();
    let pool_health = ConnectionPoolHealth {
        size: state.db_pool.size(),
        idle_connections: state.db_pool.num_idle(),
        max_connections: Some(pool_options.get_max_connections()),
    };

    let deps = state.sync.deps();
    let crm_health = CrmHealth {
        credentials_configured: deps.crm.is_configured(),
        practitioner_pipeline_configured: deps.crm_config.practitioner_pipeline_id.is_some(),
        patient_pipeline_configured: deps.crm_config.patient_pipeline_id.is_some(),
        reengagement_workflow_configured: deps.crm_config.reengagement_workflow_id.is_some(),
    };

    let is_healthy = db_health.status == "ok";

    let overall_status = if is_healthy {
        "healthy"
    } else {
        "unhealthy"
    };

    let status_code = if is_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status_code,
        Json(HealthResponse {
            status: overall_status.to_string(),
            database: db_health,
            connection_pool: pool_health,
            crm: crm_health,
        }),
    )
}
