//! Tenant discovery from a bootstrap database.
//!
//! The bootstrap record (`db`) names a catalog database and a query returning
//! one row per tenant with the columns `name`, `jdbc_url`, `username` and
//! `password`. Rows are streamed and decoded in fixed-size batches.
//!
//! Discovery never fails a resolution pass: every error is logged and the
//! pass continues with zero discovered tenants.

use crate::config::PoolSettings;
use crate::db::pool::DbPool;
use crate::error::{DbError, DbResult};
use crate::models::{DatabaseType, ParameterRecord};
use futures_util::future::BoxFuture;
use futures_util::stream::{Stream, TryStreamExt};
use sqlx::{ColumnIndex, Decode, Row, Type};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// Rows decoded per batch while streaming the catalog.
pub const DISCOVERY_FETCH_SIZE: usize = 50;

/// One row of the tenant catalog. Every column is nullable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogRow {
    pub name: Option<String>,
    pub jdbc_url: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Source of additional tenant records, queried with the bootstrap record.
pub trait Discovery: Send + Sync {
    /// Records in catalog order. Empty on any failure.
    fn discover<'a>(&'a self, bootstrap: &'a ParameterRecord)
    -> BoxFuture<'a, Vec<ParameterRecord>>;

    fn name(&self) -> &'static str;
}

/// Discovery disabled: the bootstrap record yields nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDiscovery;

impl Discovery for NoDiscovery {
    fn discover<'a>(
        &'a self,
        _bootstrap: &'a ParameterRecord,
    ) -> BoxFuture<'a, Vec<ParameterRecord>> {
        Box::pin(async { Vec::new() })
    }

    fn name(&self) -> &'static str {
        "none"
    }
}

/// Runs the bootstrap record's `sql` against its own database.
#[derive(Debug, Clone)]
pub struct SqlDiscovery {
    timeout: Duration,
}

impl SqlDiscovery {
    /// Create a discovery whose whole query is bounded by `timeout`.
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn try_discover(&self, bootstrap: &ParameterRecord, sql: &str) -> DbResult<Vec<ParameterRecord>> {
        let url = bootstrap
            .url
            .as_deref()
            .filter(|u| !u.is_empty())
            .ok_or_else(|| DbError::configuration("Bootstrap record has no url"))?;
        let db_type = DatabaseType::resolve(bootstrap.driver.as_deref(), url)?;
        let settings = PoolSettings::from_record(bootstrap)?.single_connection();

        let pool = DbPool::connect(db_type, url, &bootstrap.login(), &settings).await?;
        let result = timeout(self.timeout, read_catalog(&pool, sql)).await;
        pool.close().await;

        let rows = match result {
            Ok(rows) => rows.map_err(|e| DbError::discovery(e.to_string()))?,
            Err(_) => {
                return Err(DbError::timeout(
                    "tenant discovery",
                    self.timeout.as_millis() as u64,
                ));
            }
        };

        Ok(records_from_rows(bootstrap.url_prefix.as_deref(), rows))
    }
}

impl Discovery for SqlDiscovery {
    fn discover<'a>(
        &'a self,
        bootstrap: &'a ParameterRecord,
    ) -> BoxFuture<'a, Vec<ParameterRecord>> {
        Box::pin(async move {
            let Some(sql) = bootstrap.sql.as_deref().filter(|s| !s.trim().is_empty()) else {
                warn!("Bootstrap record has no sql, skipping tenant discovery");
                return Vec::new();
            };

            match self.try_discover(bootstrap, sql).await {
                Ok(records) => {
                    info!(
                        url = %bootstrap.masked_url(),
                        tenants = records.len(),
                        "Discovered tenants"
                    );
                    records
                }
                Err(e) => {
                    error!(
                        url = %bootstrap.masked_url(),
                        error = %e,
                        "Tenant discovery failed, continuing without discovered tenants"
                    );
                    Vec::new()
                }
            }
        })
    }

    fn name(&self) -> &'static str {
        "sql"
    }
}

async fn read_catalog(pool: &DbPool, sql: &str) -> Result<Vec<CatalogRow>, sqlx::Error> {
    impl_db_dispatch!(DbPool, pool, {
        MySql(p) => collect_rows(sqlx::query(sql).fetch(p)).await,
        Postgres(p) => collect_rows(sqlx::query(sql).fetch(p)).await,
        SQLite(p) => collect_rows(sqlx::query(sql).fetch(p)).await,
    })
}

async fn collect_rows<R, S>(rows: S) -> Result<Vec<CatalogRow>, sqlx::Error>
where
    R: Row,
    S: Stream<Item = Result<R, sqlx::Error>>,
    for<'r> Option<String>: Decode<'r, R::Database> + Type<R::Database>,
    for<'i> &'i str: ColumnIndex<R>,
{
    let mut batches = std::pin::pin!(rows.try_chunks(DISCOVERY_FETCH_SIZE));
    let mut catalog = Vec::new();

    while let Some(batch) = batches.try_next().await.map_err(|e| e.1)? {
        debug!(rows = batch.len(), "Decoding catalog batch");
        for row in &batch {
            catalog.push(CatalogRow {
                name: row.try_get("name")?,
                jdbc_url: row.try_get("jdbc_url")?,
                username: row.try_get("username")?,
                password: row.try_get("password")?,
            });
        }
    }

    Ok(catalog)
}

/// Build tenant records from catalog rows.
///
/// A row with a NULL `jdbc_url` keeps an empty url and is later skipped as
/// incomplete.
pub fn records_from_rows(url_prefix: Option<&str>, rows: Vec<CatalogRow>) -> Vec<ParameterRecord> {
    let prefix = url_prefix.unwrap_or_default();
    rows.into_iter()
        .map(|row| ParameterRecord {
            key: row.name,
            url: row.jdbc_url.map(|url| format!("{}{}", prefix, url)),
            user: row.username,
            pass: row.password,
            ..Default::default()
        })
        .collect()
}
