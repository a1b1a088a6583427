//! Connection pools keyed by physical database URL.
//!
//! A [`PoolHandle`] owns every sqlx pool opened against one URL. The pool built
//! at provisioning time authenticates as the record that provisioned it;
//! tenants that share the URL but log in with other credentials get their own
//! sub-pool, created lazily on first use.
//!
//! # Concurrency
//!
//! - `OnceCell` per login gives single-flight sub-pool creation, so concurrent
//!   requests for a new login never open two pools
//! - The login map lock is never held across an await point
//! - `AtomicBool` marks a handle broken once acquisition retries are exhausted

use crate::config::PoolSettings;
use crate::error::{DbError, DbResult};
use crate::models::{DatabaseType, Login, mask_url, sqlx_url};
use chrono::{DateTime, Utc};
use sqlx::pool::{PoolConnection, PoolOptions};
use sqlx::{
    Connection, Database, MySql, MySqlConnection, MySqlPool, PgConnection, PgPool, Postgres,
    Sqlite, SqliteConnection, SqlitePool, mysql::MySqlConnectOptions, postgres::PgConnectOptions,
    sqlite::SqliteConnectOptions,
};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{OnceCell, RwLock};
use tracing::{debug, info, warn};

/// Database-specific connection pool (avoids AnyPool limitations).
#[derive(Debug, Clone)]
pub enum DbPool {
    MySql(MySqlPool),
    Postgres(PgPool),
    SQLite(SqlitePool),
}

/// A connection checked out of a [`DbPool`]. Returned to its pool on drop.
#[derive(Debug)]
pub enum DbConnection {
    MySql(PoolConnection<MySql>),
    Postgres(PoolConnection<Postgres>),
    SQLite(PoolConnection<Sqlite>),
}

impl DbConnection {
    /// Get the database type for this connection.
    pub fn db_type(&self) -> DatabaseType {
        impl_db_dispatch!(DbConnection, self, {
            MySql(_c) => DatabaseType::MySQL,
            Postgres(_c) => DatabaseType::PostgreSQL,
            SQLite(_c) => DatabaseType::SQLite,
        })
    }

    /// Check the connection is still alive.
    pub async fn ping(&mut self) -> DbResult<()> {
        impl_db_dispatch!(DbConnection, self, {
            MySql(c) => c.ping().await?,
            Postgres(c) => c.ping().await?,
            SQLite(c) => c.ping().await?,
        });
        Ok(())
    }
}

fn pool_options<DB: Database>(settings: &PoolSettings) -> PoolOptions<DB> {
    let options = PoolOptions::<DB>::new()
        .max_connections(settings.max_connections)
        .min_connections(settings.min_connections)
        .acquire_timeout(settings.acquire_timeout)
        .idle_timeout(Some(settings.idle_timeout))
        // No idle test period in sqlx: test on hand-out, evict idle, ping on check-in
        .test_before_acquire(true);

    if settings.test_on_checkin {
        options.after_release(|conn, _meta| {
            Box::pin(async move { Ok::<_, sqlx::Error>(conn.ping().await.is_ok()) })
        })
    } else {
        options
    }
}

fn invalid_url(db_type: DatabaseType, err: sqlx::Error) -> DbError {
    DbError::connectivity(
        format!("Invalid {} connection URL: {}", db_type, err),
        match db_type {
            DatabaseType::PostgreSQL => "Check the URL format: postgres://host:5432/db",
            DatabaseType::MySQL => "Check the URL format: mysql://host:3306/db",
            DatabaseType::SQLite => "Check the URL format: sqlite:path/to/db.sqlite",
        },
    )
}

fn postgres_options(url: &str, login: &Login) -> DbResult<PgConnectOptions> {
    let mut options = PgConnectOptions::from_str(sqlx_url(url))
        .map_err(|e| invalid_url(DatabaseType::PostgreSQL, e))?;
    if let Some(user) = &login.user {
        options = options.username(user);
    }
    if let Some(pass) = &login.pass {
        options = options.password(pass);
    }
    Ok(options)
}

fn mysql_options(url: &str, login: &Login) -> DbResult<MySqlConnectOptions> {
    let mut options = MySqlConnectOptions::from_str(sqlx_url(url))
        .map_err(|e| invalid_url(DatabaseType::MySQL, e))?
        .charset("utf8mb4");
    if let Some(user) = &login.user {
        options = options.username(user);
    }
    if let Some(pass) = &login.pass {
        options = options.password(pass);
    }
    Ok(options)
}

fn sqlite_options(url: &str) -> DbResult<SqliteConnectOptions> {
    SqliteConnectOptions::from_str(sqlx_url(url)).map_err(|e| invalid_url(DatabaseType::SQLite, e))
}

/// Generate a helpful suggestion for connection errors.
fn connection_suggestion(db_type: DatabaseType, error: &sqlx::Error) -> String {
    let error_str = error.to_string().to_lowercase();

    if error_str.contains("connection refused") {
        return format!(
            "Check that the {} server is running and accessible",
            db_type
        );
    }

    if error_str.contains("authentication") || error_str.contains("password") {
        return "Verify the tenant's user and pass settings".to_string();
    }

    if error_str.contains("does not exist") || error_str.contains("unknown database") {
        return "Check that the database name exists".to_string();
    }

    if error_str.contains("unable to open database file") {
        return "Check the SQLite file exists, or add ?mode=rwc to create it".to_string();
    }

    "Check the tenant's url, user and pass settings".to_string()
}

fn connect_error(db_type: DatabaseType, url: &str, err: sqlx::Error) -> DbError {
    DbError::connectivity(
        format!("Failed to connect to {}: {}", mask_url(url), err),
        connection_suggestion(db_type, &err),
    )
}

impl DbPool {
    /// Open a pool and its first connection.
    pub async fn connect(
        db_type: DatabaseType,
        url: &str,
        login: &Login,
        settings: &PoolSettings,
    ) -> DbResult<Self> {
        let pool = match db_type {
            DatabaseType::MySQL => DbPool::MySql(
                pool_options::<MySql>(settings)
                    .connect_with(mysql_options(url, login)?)
                    .await
                    .map_err(|e| connect_error(db_type, url, e))?,
            ),
            DatabaseType::PostgreSQL => DbPool::Postgres(
                pool_options::<Postgres>(settings)
                    .connect_with(postgres_options(url, login)?)
                    .await
                    .map_err(|e| connect_error(db_type, url, e))?,
            ),
            DatabaseType::SQLite => DbPool::SQLite(
                pool_options::<Sqlite>(settings)
                    .connect_with(sqlite_options(url)?)
                    .await
                    .map_err(|e| connect_error(db_type, url, e))?,
            ),
        };
        Ok(pool)
    }

    /// Check out a connection.
    pub async fn acquire(&self) -> Result<DbConnection, sqlx::Error> {
        Ok(impl_db_dispatch!(DbPool, self, {
            MySql(p) => DbConnection::MySql(p.acquire().await?),
            Postgres(p) => DbConnection::Postgres(p.acquire().await?),
            SQLite(p) => DbConnection::SQLite(p.acquire().await?),
        }))
    }

    /// Close the connection pool.
    pub async fn close(&self) {
        impl_db_dispatch!(DbPool, self, {
            MySql(p) => p.close().await,
            Postgres(p) => p.close().await,
            SQLite(p) => p.close().await,
        })
    }

    /// Get the database type for this pool.
    pub fn db_type(&self) -> DatabaseType {
        match self {
            DbPool::MySql(_) => DatabaseType::MySQL,
            DbPool::Postgres(_) => DatabaseType::PostgreSQL,
            DbPool::SQLite(_) => DatabaseType::SQLite,
        }
    }

    /// Number of open connections, idle or in use.
    pub fn size(&self) -> u32 {
        impl_db_dispatch!(DbPool, self, {
            MySql(p) => p.size(),
            Postgres(p) => p.size(),
            SQLite(p) => p.size(),
        })
    }

    /// Number of idle connections.
    pub fn num_idle(&self) -> usize {
        impl_db_dispatch!(DbPool, self, {
            MySql(p) => p.num_idle(),
            Postgres(p) => p.num_idle(),
            SQLite(p) => p.num_idle(),
        })
    }

    pub fn is_closed(&self) -> bool {
        impl_db_dispatch!(DbPool, self, {
            MySql(p) => p.is_closed(),
            Postgres(p) => p.is_closed(),
            SQLite(p) => p.is_closed(),
        })
    }
}

/// Open one connection outside any pool and close it again.
///
/// Confirms the database is reachable with the given credentials before pool
/// resources are committed.
pub async fn probe(db_type: DatabaseType, url: &str, login: &Login) -> DbResult<()> {
    let result = match db_type {
        DatabaseType::MySQL => match MySqlConnection::connect_with(&mysql_options(url, login)?).await
        {
            Ok(conn) => conn.close().await,
            Err(e) => Err(e),
        },
        DatabaseType::PostgreSQL => {
            match PgConnection::connect_with(&postgres_options(url, login)?).await {
                Ok(conn) => conn.close().await,
                Err(e) => Err(e),
            }
        }
        DatabaseType::SQLite => match SqliteConnection::connect_with(&sqlite_options(url)?).await {
            Ok(conn) => conn.close().await,
            Err(e) => Err(e),
        },
    };

    result.map_err(|e| connect_error(db_type, url, e))
}

/// All pools opened against one physical database URL.
pub struct PoolHandle {
    url: String,
    db_type: DatabaseType,
    settings: PoolSettings,
    /// Login the primary pool authenticates as.
    owner: Login,
    primary: DbPool,
    /// Sub-pools for other logins. OnceCell ensures single-flight creation.
    logins: RwLock<HashMap<Login, Arc<OnceCell<DbPool>>>>,
    broken: AtomicBool,
    pub created_at: DateTime<Utc>,
}

impl PoolHandle {
    /// Wrap an already connected primary pool.
    pub fn new(
        url: impl Into<String>,
        settings: PoolSettings,
        owner: Login,
        primary: DbPool,
    ) -> Self {
        Self {
            url: url.into(),
            db_type: primary.db_type(),
            settings,
            owner,
            primary,
            logins: RwLock::new(HashMap::new()),
            broken: AtomicBool::new(false),
            created_at: Utc::now(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn masked_url(&self) -> String {
        mask_url(&self.url)
    }

    pub fn db_type(&self) -> DatabaseType {
        self.db_type
    }

    pub fn settings(&self) -> &PoolSettings {
        &self.settings
    }

    /// The pool opened at provisioning time.
    pub fn primary(&self) -> &DbPool {
        &self.primary
    }

    /// True once acquisition retries were exhausted.
    pub fn is_broken(&self) -> bool {
        self.broken.load(Ordering::Acquire)
    }

    /// Get or create the pool for a login.
    pub async fn pool_for(&self, login: &Login) -> DbResult<DbPool> {
        if *login == self.owner {
            return Ok(self.primary.clone());
        }

        let cell = {
            let logins = self.logins.read().await;
            if let Some(cell) = logins.get(login) {
                Arc::clone(cell)
            } else {
                drop(logins);
                let mut logins = self.logins.write().await;
                // Double-check after acquiring write lock
                Arc::clone(logins.entry(login.clone()).or_default())
            }
        };

        let pool = cell
            .get_or_try_init(|| async {
                debug!(
                    url = %self.masked_url(),
                    user = ?login.user,
                    "Creating pool for additional login"
                );
                DbPool::connect(self.db_type, &self.url, login, &self.settings).await
            })
            .await?;

        Ok(pool.clone())
    }

    /// Number of initialized sub-pools for logins other than the owner's.
    pub async fn login_count(&self) -> usize {
        let logins = self.logins.read().await;
        logins.values().filter(|cell| cell.get().is_some()).count()
    }

    /// Check out a connection authenticated as `login`.
    ///
    /// Retries connect and I/O failures up to the configured attempt count.
    /// When every attempt fails and `break_after_acquire_failure` is set, the
    /// handle is marked broken and later calls fail fast until a
    /// reconciliation pass replaces it. A pool that is only busy (every
    /// connection checked out until `acquire_timeout`) returns
    /// [`DbError::Timeout`] at once and is never marked broken.
    pub async fn acquire(&self, login: &Login) -> DbResult<DbConnection> {
        if self.is_broken() {
            return Err(DbError::pool_broken(self.masked_url()));
        }

        let attempts = self.settings.acquire_retry_attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            let result = match self.pool_for(login).await {
                Ok(pool) => match pool.acquire().await {
                    Ok(conn) => return Ok(conn),
                    Err(sqlx::Error::PoolTimedOut) => {
                        debug!(url = %self.masked_url(), "Pool busy, acquire timed out");
                        return Err(DbError::timeout(
                            "connection pool acquire",
                            self.settings.acquire_timeout.as_millis() as u64,
                        ));
                    }
                    Err(e) => DbError::from(e),
                },
                Err(e) => e,
            };

            debug!(
                url = %self.masked_url(),
                attempt,
                error = %result,
                "Connection acquisition failed"
            );
            last_error = Some(result);
            if attempt < attempts {
                tokio::time::sleep(self.settings.acquire_retry_delay).await;
            }
        }

        if self.settings.break_after_acquire_failure {
            self.broken.store(true, Ordering::Release);
            warn!(
                url = %self.masked_url(),
                attempts,
                "Pool marked broken after repeated acquisition failures"
            );
        }

        Err(last_error.unwrap_or_else(|| DbError::pool_broken(self.masked_url())))
    }

    /// Close the primary pool and every login sub-pool.
    pub async fn close_all(&self) {
        // Drain under lock, close outside lock
        let sub_pools: Vec<_> = {
            let mut logins = self.logins.write().await;
            logins.drain().collect()
        };

        for (_, cell) in sub_pools {
            if let Some(pool) = cell.get() {
                pool.close().await;
            }
        }
        self.primary.close().await;
        info!(url = %self.masked_url(), "Closed pool");
    }
}

impl std::fmt::Debug for PoolHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolHandle")
            .field("url", &self.masked_url())
            .field("db_type", &self.db_type)
            .field("settings", &self.settings)
            .field("broken", &self.is_broken())
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}
