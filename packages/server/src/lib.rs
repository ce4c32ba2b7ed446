// CRM Sync - API Core
//
// Keeps the external CRM (HighLevel) in step with practitioner and patient
// lifecycle events, with every outbound call recorded in crm_sync_logs.
//
// Domain logic lives in domains/crm; infrastructure traits and their
// Postgres/HTTP/mock implementations live in kernel.

pub mod config;
pub mod domains;
pub mod kernel;
pub mod server;

pub use config::*;
