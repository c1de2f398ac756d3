//! `PostgreSQL` audit record store for the product event pipeline.
//!
//! Implements [`AuditStore`] over a single table keyed by `(pk, sk)`:
//!
//! - Conditional insert (`ON CONFLICT DO NOTHING`), so an existing key is
//!   reported as [`StoreError::KeyConflict`] instead of being overwritten
//! - Time-ordered queries within one partition
//! - Expiry by `ttl`, driven by a periodic sweeper since `PostgreSQL` has no
//!   native row expiry
//!
//! # Example
//!
//! ```no_run
//! use product_audit_postgres::PostgresAuditStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = PostgresAuditStore::connect("postgres://localhost/audit", 10).await?;
//! store.migrate().await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use product_audit_core::audit::{
    AuditInfo, AuditQuery, AuditRecord, AuditStore, SortOrder, StoreError, StoreFuture,
};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{PgPool, Row};

/// Table created by the embedded migrations.
pub const DEFAULT_TABLE: &str = "audit_events";

/// `PostgreSQL`-backed [`AuditStore`].
#[derive(Clone, Debug)]
pub struct PostgresAuditStore {
    pool: PgPool,
    table: String,
}

impl PostgresAuditStore {
    /// Connect with a pool of at most `max_connections`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the database cannot be reached.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| StoreError::Unavailable(format!("Failed to connect: {e}")))?;
        Ok(Self::from_pool(pool))
    }

    /// Store over an existing pool, using [`DEFAULT_TABLE`].
    #[must_use]
    pub fn from_pool(pool: PgPool) -> Self {
        Self {
            pool,
            table: DEFAULT_TABLE.to_string(),
        }
    }

    /// Use `table` instead of [`DEFAULT_TABLE`].
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Rejected`] unless `table` is a plain SQL
    /// identifier (letters, digits and `_`, not starting with a digit, at most
    /// 63 bytes).
    pub fn with_table(mut self, table: impl Into<String>) -> Result<Self, StoreError> {
        let table = table.into();
        if !is_identifier(&table) {
            return Err(StoreError::Rejected(format!("Invalid table name: {table:?}")));
        }
        self.table = table;
        Ok(self)
    }

    /// Table this store reads and writes.
    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    /// The underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run the embedded migrations (creates [`DEFAULT_TABLE`]).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if a migration fails.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Unavailable(format!("Migration failed: {e}")))?;
        Ok(())
    }

    /// Create the configured table and its indexes if missing.
    ///
    /// Same schema as the embedded migrations, for deployments that use a
    /// custom table name.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the DDL fails.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        let table = &self.table;
        let statements = [
            format!(
                "CREATE TABLE IF NOT EXISTS {table} (
                    pk TEXT NOT NULL,
                    sk TEXT NOT NULL,
                    created_at BIGINT NOT NULL,
                    ttl BIGINT NOT NULL,
                    info JSONB NOT NULL,
                    PRIMARY KEY (pk, sk)
                )"
            ),
            format!("CREATE INDEX IF NOT EXISTS idx_{table}_pk_created_at ON {table} (pk, created_at)"),
            format!("CREATE INDEX IF NOT EXISTS idx_{table}_ttl ON {table} (ttl)"),
        ];

        for statement in &statements {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| map_sqlx_error("ensure_schema", &e))?;
        }
        Ok(())
    }

    async fn insert(&self, record: &AuditRecord) -> Result<(), StoreError> {
        let sql = format!(
            "INSERT INTO {} (pk, sk, created_at, ttl, info)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (pk, sk) DO NOTHING",
            self.table
        );

        let result = sqlx::query(&sql)
            .bind(&record.pk)
            .bind(&record.sk)
            .bind(record.created_at)
            .bind(record.ttl)
            .bind(Json(&record.info))
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("put", &e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::KeyConflict {
                pk: record.pk.clone(),
                sk: record.sk.clone(),
            });
        }

        tracing::debug!(pk = %record.pk, sk = %record.sk, "Audit record inserted");
        Ok(())
    }

    async fn select(&self, query: &AuditQuery) -> Result<Vec<AuditRecord>, StoreError> {
        let direction = match query.order {
            SortOrder::Ascending => "ASC",
            SortOrder::Descending => "DESC",
        };
        let sql = format!(
            "SELECT pk, sk, created_at, ttl, info FROM {}
             WHERE pk = $1 AND created_at >= $2 AND created_at <= $3
             ORDER BY created_at {direction}
             LIMIT $4",
            self.table
        );
        let pk = product_audit_core::audit::partition_key(query.event_type);
        let limit = i64::try_from(query.limit).unwrap_or(i64::MAX);

        let rows = sqlx::query(&sql)
            .bind(&pk)
            .bind(query.from_ms.unwrap_or(i64::MIN))
            .bind(query.to_ms.unwrap_or(i64::MAX))
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("query", &e))?;

        rows.iter().map(record_from_row).collect()
    }

    async fn delete_expired(&self, now_epoch_secs: i64) -> Result<u64, StoreError> {
        let sql = format!("DELETE FROM {} WHERE ttl <= $1", self.table);
        let result = sqlx::query(&sql)
            .bind(now_epoch_secs)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("purge_expired", &e))?;
        Ok(result.rows_affected())
    }
}

impl AuditStore for PostgresAuditStore {
    fn put<'a>(&'a self, record: &'a AuditRecord) -> StoreFuture<'a, ()> {
        Box::pin(self.insert(record))
    }

    fn query<'a>(&'a self, query: &'a AuditQuery) -> StoreFuture<'a, Vec<AuditRecord>> {
        Box::pin(self.select(query))
    }

    fn purge_expired(&self, now_epoch_secs: i64) -> StoreFuture<'_, u64> {
        Box::pin(self.delete_expired(now_epoch_secs))
    }
}

fn record_from_row(row: &PgRow) -> Result<AuditRecord, StoreError> {
    let decode = |e: sqlx::Error| StoreError::Serialization(e.to_string());
    let Json(info): Json<AuditInfo> = row.try_get("info").map_err(decode)?;

    Ok(AuditRecord {
        pk: row.try_get("pk").map_err(decode)?,
        sk: row.try_get("sk").map_err(decode)?,
        created_at: row.try_get("created_at").map_err(decode)?,
        ttl: row.try_get("ttl").map_err(decode)?,
        info,
    })
}

/// Connection-level failures are `Unavailable`; everything the server
/// answered with is `Rejected`.
fn map_sqlx_error(operation: &'static str, error: &sqlx::Error) -> StoreError {
    metrics::counter!("audit_store_errors_total", "operation" => operation).increment(1);
    tracing::warn!(operation, error = %error, "Audit store operation failed");

    match error {
        sqlx::Error::Database(db) => StoreError::Rejected(db.to_string()),
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) | sqlx::Error::ColumnNotFound(_) => {
            StoreError::Serialization(error.to_string())
        }
        _ => StoreError::Unavailable(error.to_string()),
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    name.len() <= 63
        && (first.is_ascii_alphabetic() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_names_must_be_plain_identifiers() {
        assert!(is_identifier("audit_events"));
        assert!(is_identifier("_events2"));
        assert!(!is_identifier(""));
        assert!(!is_identifier("2events"));
        assert!(!is_identifier("events; DROP TABLE users"));
        assert!(!is_identifier("audit-events"));
        assert!(!is_identifier(&"a".repeat(64)));
    }
}
