//! Postgres repository
//!
//! Expects the reference tables and their audit triggers to exist:
//!
//! ```sql
//! countries  (alpha2 PRIMARY KEY, alpha3, alpha4, numeric_code, name_en, name_fr,
//!             status, valid_from, valid_until, remarks)
//! currencies (code PRIMARY KEY, name, numeric_code, minor_units, countries, status)
//! ```
//!
//! The audit context travels as transaction-local settings
//! (`canon.source_system`, `canon.source_user`) for the triggers to read. An
//! upsert that changes nothing does not touch the row, so no trigger fires.

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};
use std::time::Duration;
use tracing::{debug, info, instrument};

use super::{AuditContext, Repository, RepositoryError, AUDIT_SOURCE_USER};
use crate::config::DatabaseConfig;
use crate::transform::{Country, Currency, CanonicalEntity, StatusTable};

/// Create the connection pool
pub async fn create_pool(config: &DatabaseConfig) -> Result<PgPool, RepositoryError> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
        .connect(&config.url)
        .await?;

    info!(
        max_connections = config.max_connections,
        "Database connection pool created"
    );
    Ok(pool)
}

/// One per consumer; clones share the pool but not the audit context
#[derive(Debug, Clone)]
pub struct PgRepository {
    pool: PgPool,
    audit: AuditContext,
}

impl PgRepository {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            audit: AuditContext {
                source_system: String::new(),
                source_user: AUDIT_SOURCE_USER.to_string(),
            },
        }
    }

    async fn apply_audit_context(
        &self,
        tx: &mut Transaction<'_, Postgres>,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "SELECT set_config('canon.source_system', $1, true), \
                    set_config('canon.source_user', $2, true)",
        )
        .bind(&self.audit.source_system)
        .bind(&self.audit.source_user)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl Repository for PgRepository {
    fn set_audit_context(&mut self, source_system: &str, source_user: &str) {
        self.audit = AuditContext {
            source_system: source_system.to_string(),
            source_user: source_user.to_string(),
        };
    }

    #[instrument(skip(self, entity), fields(key = entity.natural_key()))]
    async fn upsert(&mut self, entity: &CanonicalEntity) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;
        self.apply_audit_context(&mut tx).await?;

        let changed = match entity {
            CanonicalEntity::Country(country) => upsert_country(&mut tx, country).await?,
            CanonicalEntity::Currency(currency) => upsert_currency(&mut tx, currency).await?,
        };

        tx.commit().await?;
        debug!(changed, "Upsert applied");
        Ok(())
    }
}

async fn upsert_country(
    tx: &mut Transaction<'_, Postgres>,
    country: &Country,
) -> Result<bool, RepositoryError> {
    let result = sqlx::query(
        r#"
        INSERT INTO countries
            (alpha2, alpha3, alpha4, numeric_code, name_en, name_fr,
             status, valid_from, valid_until, remarks)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        ON CONFLICT (alpha2) DO UPDATE SET
            alpha3 = EXCLUDED.alpha3,
            alpha4 = EXCLUDED.alpha4,
            numeric_code = EXCLUDED.numeric_code,
            name_en = EXCLUDED.name_en,
            name_fr = EXCLUDED.name_fr,
            status = EXCLUDED.status,
            valid_from = EXCLUDED.valid_from,
            valid_until = EXCLUDED.valid_until,
            remarks = EXCLUDED.remarks
        WHERE (countries.alpha3, countries.alpha4, countries.numeric_code,
               countries.name_en, countries.name_fr, countries.status,
               countries.valid_from, countries.valid_until, countries.remarks)
            IS DISTINCT FROM
              (EXCLUDED.alpha3, EXCLUDED.alpha4, EXCLUDED.numeric_code,
               EXCLUDED.name_en, EXCLUDED.name_fr, EXCLUDED.status,
               EXCLUDED.valid_from, EXCLUDED.valid_until, EXCLUDED.remarks)
        "#,
    )
    .bind(&country.alpha2)
    .bind(&country.alpha3)
    .bind(&country.alpha4)
    .bind(&country.numeric)
    .bind(&country.name_en)
    .bind(&country.name_fr)
    .bind(country.status.as_str())
    .bind(country.valid_from.map(|d| d.to_string()))
    .bind(country.valid_until.map(|d| d.to_string()))
    .bind(&country.remarks)
    .execute(&mut **tx)
    .await?;

    Ok(result.rows_affected() > 0)
}

async fn upsert_currency(
    tx: &mut Transaction<'_, Postgres>,
    currency: &Currency,
) -> Result<bool, RepositoryError> {
    let result = sqlx::query(
        r#"
        INSERT INTO currencies
            (code, name, numeric_code, minor_units, countries, status)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (code) DO UPDATE SET
            name = EXCLUDED.name,
            numeric_code = EXCLUDED.numeric_code,
            minor_units = EXCLUDED.minor_units,
            countries = EXCLUDED.countries,
            status = EXCLUDED.status
        WHERE (currencies.name, currencies.numeric_code, currencies.minor_units,
               currencies.countries, currencies.status)
            IS DISTINCT FROM
              (EXCLUDED.name, EXCLUDED.numeric_code, EXCLUDED.minor_units,
               EXCLUDED.countries, EXCLUDED.status)
        "#,
    )
    .bind(&currency.code)
    .bind(&currency.name)
    .bind(&currency.numeric)
    .bind(currency.minor_units.map(i16::from))
    .bind(&currency.countries)
    .bind(currency.status.as_str())
    .execute(&mut **tx)
    .await?;

    Ok(result.rows_affected() > 0)
}
