use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    /// Bearer token for the operator endpoints. Admin routes reject every
    /// request when unset.
    pub admin_api_token: Option<String>,
    /// Bearer token the application presents when posting lifecycle events.
    /// Event intake rejects every request when unset.
    pub events_api_token: Option<String>,
    pub crm: CrmConfig,
}

/// CRM settings. Every value is optional: a missing credential or pipeline
/// degrades the affected calls to logged no-ops.
#[derive(Debug, Clone, Default)]
pub struct CrmConfig {
    pub api_key: Option<String>,
    pub location_id: Option<String>,
    pub practitioner_pipeline_id: Option<String>,
    pub patient_pipeline_id: Option<String>,
    pub reengagement_workflow_id: Option<String>,
    pub base_url: Option<String>,
    pub timeout_secs: u64,
}

impl CrmConfig {
    /// API key and location id, when both are present.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (self.api_key.as_deref(), self.location_id.as_deref()) {
            (Some(key), Some(location)) => Some((key, location)),
            _ => None,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Ok(Self {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .context("PORT must be a valid number")?,
            admin_api_token: optional_var("ADMIN_API_TOKEN"),
            events_api_token: optional_var("EVENTS_API_TOKEN"),
            crm: CrmConfig::from_env()?,
        })
    }
}

impl CrmConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            api_key: optional_var("GHL_API_KEY"),
            location_id: optional_var("GHL_LOCATION_ID"),
            practitioner_pipeline_id: optional_var("GHL_PRACTITIONER_PIPELINE_ID"),
            patient_pipeline_id: optional_var("GHL_PATIENT_PIPELINE_ID"),
            reengagement_workflow_id: optional_var("GHL_REENGAGEMENT_WORKFLOW_ID"),
            base_url: optional_var("GHL_BASE_URL"),
            timeout_secs: env::var("GHL_TIMEOUT_SECS")
                .unwrap_or_else(|_| "15".to_string())
                .parse()
                .context("GHL_TIMEOUT_SECS must be a valid number")?,
        })
    }
}

/// Read an env var, treating empty values as unset.
fn optional_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credentials_require_key_and_location() {
        let mut crm = CrmConfig {
            api_key: Some("key".into()),
            ..Default::default()
        };
        assert!(crm.credentials().is_none());

        crm.location_id = Some("loc".into());
        assert_eq!(crm.credentials(), Some(("key", "loc")));
    }
}
