//! Kernel module - server infrastructure and dependencies.

pub mod deps;
pub mod pg_store;
pub mod test_dependencies;
pub mod traits;

pub use deps::{HighLevelAdapter, ServerDeps};
pub use pg_store::{PostgresAuditLog, PostgresSyncStore};
pub use test_dependencies::TestDependencies;
pub use traits::*;
