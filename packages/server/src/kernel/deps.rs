//! Server dependencies for the CRM sync (using traits for testability)
//!
//! This module provides the central dependency container passed to every
//! lifecycle function. External services sit behind trait abstractions so
//! tests can swap in the mocks from `test_dependencies`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use highlevel_client::{ApiRequest, ApiResponse, HighLevelClient, HighLevelOptions};
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;

use crate::config::CrmConfig;
use crate::domains::crm::api::CrmApi;
use crate::domains::crm::identity::ContactLocks;
use crate::kernel::{BaseAuditLog, BaseCrmTransport, BaseSyncStore, PostgresAuditLog, PostgresSyncStore};

// =============================================================================
// HighLevelClient Adapter (implements BaseCrmTransport trait)
// =============================================================================

/// Wrapper around HighLevelClient that implements BaseCrmTransport trait
pub struct HighLevelAdapter(pub Arc<HighLevelClient>);

impl HighLevelAdapter {
    pub fn new(client: Arc<HighLevelClient>) -> Self {
        Self(client)
    }

    /// Build the adapter when credentials are configured, `None` otherwise.
    pub fn from_config(config: &CrmConfig) -> Result<Option<Self>> {
        let Some((api_key, location_id)) = config.credentials() else {
            return Ok(None);
        };

        let mut options = HighLevelOptions::new(api_key, location_id);
        if let Some(base_url) = &config.base_url {
            options.base_url = base_url.clone();
        }
        options.timeout = Duration::from_secs(config.timeout_secs);

        let client = HighLevelClient::new(options).context("Failed to build HighLevel client")?;
        Ok(Some(Self::new(Arc::new(client))))
    }
}

#[async_trait]
impl BaseCrmTransport for HighLevelAdapter {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse> {
        self.0
            .send(request)
            .await
            .map_err(|e| anyhow::anyhow!("{}", e))
    }
}

// =============================================================================
// ServerDeps
// =============================================================================

/// Dependencies accessible to lifecycle functions (using traits for testability)
#[derive(Clone)]
pub struct ServerDeps {
    pub store: Arc<dyn BaseSyncStore>,
    pub audit_log: Arc<dyn BaseAuditLog>,
    /// Audited CRM client; every call writes one audit row
    pub crm: CrmApi,
    pub crm_config: Arc<CrmConfig>,
    /// Serializes identity resolution per actor within this process
    pub contact_locks: ContactLocks,
}

impl ServerDeps {
    /// Create new ServerDeps with the given dependencies.
    ///
    /// `transport` is `None` when CRM credentials are missing; every CRM call
    /// then short-circuits to a failed audit entry.
    pub fn new(
        store: Arc<dyn BaseSyncStore>,
        audit_log: Arc<dyn BaseAuditLog>,
        transport: Option<Arc<dyn BaseCrmTransport>>,
        crm_config: CrmConfig,
    ) -> Self {
        let crm = CrmApi::new(transport, audit_log.clone());
        Self {
            store,
            audit_log,
            crm,
            crm_config: Arc::new(crm_config),
            contact_locks: ContactLocks::default(),
        }
    }

    /// Production wiring: Postgres-backed store and audit log, HighLevel transport.
    pub fn from_pool(pool: PgPool, crm_config: CrmConfig) -> Result<Self> {
        let transport = HighLevelAdapter::from_config(&crm_config)?
            .map(|adapter| Arc::new(adapter) as Arc<dyn BaseCrmTransport>);

        if transport.is_none() {
            tracing::warn!("CRM credentials not configured; CRM sync calls will be logged and skipped");
        }

        Ok(Self::new(
            Arc::new(PostgresSyncStore::new(pool.clone())),
            Arc::new(PostgresAuditLog::new(pool)),
            transport,
            crm_config,
        ))
    }
}
