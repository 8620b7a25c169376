//! Repository boundary
//!
//! The worker only needs two things from the store: an audit context for the
//! next write and an idempotent upsert keyed by the entity's natural key.
//! Applying the same entity twice must leave the store, and its audit trail,
//! as after a single application.

pub mod postgres;

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

use crate::transform::CanonicalEntity;

pub use postgres::PgRepository;

/// Source user recorded for every write made by the worker
pub const AUDIT_SOURCE_USER: &str = "canonicalizer";

#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Write refused: {0}")]
    Refused(String),
}

impl RepositoryError {
    /// Whether retrying the same write later can succeed
    ///
    /// Connection, pool and I/O failures are transient, as are Postgres
    /// connection exceptions (class 08), serialization failures, deadlocks and
    /// operator shutdowns. Constraint and data errors are not.
    pub fn is_transient(&self) -> bool {
        match self {
            RepositoryError::Unavailable(_) => true,
            RepositoryError::Refused(_) => false,
            RepositoryError::Database(e) => match e {
                sqlx::Error::Io(_)
                | sqlx::Error::Tls(_)
                | sqlx::Error::PoolTimedOut
                | sqlx::Error::PoolClosed
                | sqlx::Error::WorkerCrashed
                | sqlx::Error::Protocol(_) => true,
                sqlx::Error::Database(db) => db
                    .code()
                    .map(|code| {
                        code.starts_with("08")
                            || matches!(code.as_ref(), "40001" | "40P01" | "57P01" | "57P03")
                    })
                    .unwrap_or(false),
                _ => false,
            },
        }
    }
}

/// Audit context applied to the next upsert
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditContext {
    pub source_system: String,
    pub source_user: String,
}

#[async_trait]
pub trait Repository: Send {
    fn set_audit_context(&mut self, source_system: &str, source_user: &str);

    async fn upsert(&mut self, entity: &CanonicalEntity) -> Result<(), RepositoryError>;
}

/// Repository that only logs what it would write
#[derive(Debug, Default)]
pub struct DryRunRepository {
    audit: Option<AuditContext>,
}

#[async_trait]
impl Repository for DryRunRepository {
    fn set_audit_context(&mut self, source_system: &str, source_user: &str) {
        self.audit = Some(AuditContext {
            source_system: source_system.to_string(),
            source_user: source_user.to_string(),
        });
    }

    async fn upsert(&mut self, entity: &CanonicalEntity) -> Result<(), RepositoryError> {
        let record = serde_json::to_string(entity)
            .map_err(|e| RepositoryError::Refused(e.to_string()))?;
        info!(
            key = entity.natural_key(),
            source_system = self.audit.as_ref().map(|a| a.source_system.as_str()),
            record = %record,
            "Dry run upsert"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(RepositoryError::Unavailable("down".into()).is_transient());
        assert!(RepositoryError::Database(sqlx::Error::PoolTimedOut).is_transient());
        assert!(!RepositoryError::Database(sqlx::Error::RowNotFound).is_transient());
        assert!(!RepositoryError::Refused("check constraint".into()).is_transient());
    }
}
