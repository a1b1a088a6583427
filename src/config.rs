//! Configuration handling for the tenant router.
//!
//! This module provides process configuration via CLI arguments and environment
//! variables, and the pool tuning derived from each tenant's parameters.

use crate::error::{DbError, DbResult};
use crate::models::ParameterRecord;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_HTTP_HOST: &str = "127.0.0.1";
pub const DEFAULT_HTTP_PORT: u16 = 8080;
pub const DEFAULT_DISCOVERY_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_TENANT_HEADER: &str = "x-tenant";

// Pool configuration defaults
pub const DEFAULT_POOL_TIMEOUT_MS: u64 = 5000;
pub const DEFAULT_IDLE_TIME_MS: u64 = 5000;
pub const DEFAULT_POOL_MAX_SIZE: u32 = 30;
pub const DEFAULT_POOL_MIN_SIZE: u32 = 1;
pub const ACQUIRE_RETRY_ATTEMPTS: u32 = 10;
pub const ACQUIRE_RETRY_DELAY_MS: u64 = 100;

/// Pool tuning for one tenant, parsed from its string-typed parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolSettings {
    pub max_connections: u32,
    pub min_connections: u32,
    /// Maximum wait for a connection from the pool.
    pub acquire_timeout: Duration,
    /// Idle connections older than this are closed.
    pub idle_timeout: Duration,
    /// Attempts before an acquisition failure is reported.
    pub acquire_retry_attempts: u32,
    pub acquire_retry_delay: Duration,
    /// Mark the pool unusable once retries are exhausted.
    pub break_after_acquire_failure: bool,
    /// Ping connections when they are returned to the pool.
    pub test_on_checkin: bool,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_POOL_MAX_SIZE,
            min_connections: DEFAULT_POOL_MIN_SIZE,
            acquire_timeout: Duration::from_millis(DEFAULT_POOL_TIMEOUT_MS),
            idle_timeout: Duration::from_millis(DEFAULT_IDLE_TIME_MS),
            acquire_retry_attempts: ACQUIRE_RETRY_ATTEMPTS,
            acquire_retry_delay: Duration::from_millis(ACQUIRE_RETRY_DELAY_MS),
            break_after_acquire_failure: true,
            test_on_checkin: true,
        }
    }
}

impl PoolSettings {
    /// Build settings from a record, falling back to defaults for blank fields.
    pub fn from_record(record: &ParameterRecord) -> DbResult<Self> {
        let defaults = Self::default();
        let settings = Self {
            max_connections: parse_or(
                "pool.maxSize",
                &record.pool_max_size,
                defaults.max_connections,
            )?,
            min_connections: parse_or(
                "pool.minSize",
                &record.pool_min_size,
                defaults.min_connections,
            )?,
            acquire_timeout: Duration::from_millis(parse_or(
                "pool.timeout",
                &record.pool_timeout,
                DEFAULT_POOL_TIMEOUT_MS,
            )?),
            idle_timeout: Duration::from_millis(parse_or(
                "pool.maxIdleTime",
                &record.idle_time,
                DEFAULT_IDLE_TIME_MS,
            )?),
            ..defaults
        };
        settings.validate()?;
        Ok(settings)
    }

    /// Settings for a short-lived pool holding a single connection.
    pub fn single_connection(&self) -> Self {
        Self {
            max_connections: 1,
            min_connections: 0,
            ..self.clone()
        }
    }

    /// Validate pool settings.
    pub fn validate(&self) -> DbResult<()> {
        if self.max_connections == 0 {
            return Err(DbError::configuration(
                "pool.maxSize must be greater than 0",
            ));
        }
        if self.min_connections > self.max_connections {
            return Err(DbError::configuration(format!(
                "pool.minSize ({}) cannot exceed pool.maxSize ({})",
                self.min_connections, self.max_connections
            )));
        }
        Ok(())
    }
}

fn parse_or<T: std::str::FromStr>(name: &str, value: &Option<String>, default: T) -> DbResult<T> {
    match value.as_deref().map(str::trim) {
        None | Some("") => Ok(default),
        Some(raw) => raw.parse().map_err(|_| {
            DbError::configuration(format!("{} must be a number, got '{}'", name, raw))
        }),
    }
}

/// Configuration for the tenant router host.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "tenant-db-router",
    about = "Routes each request to its tenant's database pool",
    version,
    author
)]
pub struct Config {
    /// Tenant configuration file (properties `key=value` lines, or `.json`).
    #[arg(short, long, value_name = "FILE", env = "MDB_CONFIG")]
    pub config: PathBuf,

    /// HTTP host to bind to
    #[arg(long, default_value = DEFAULT_HTTP_HOST, env = "MDB_HTTP_HOST")]
    pub http_host: String,

    /// HTTP port to bind to
    #[arg(long, default_value_t = DEFAULT_HTTP_PORT, env = "MDB_HTTP_PORT")]
    pub http_port: u16,

    /// Route by this request header instead of the request's host name
    #[arg(long, value_name = "HEADER", env = "MDB_TENANT_HEADER")]
    pub tenant_header: Option<String>,

    /// Deadline for the tenant discovery query, in seconds
    #[arg(
        long,
        default_value_t = DEFAULT_DISCOVERY_TIMEOUT_SECS,
        env = "MDB_DISCOVERY_TIMEOUT"
    )]
    pub discovery_timeout: u64,

    /// Ignore the `db` bootstrap record instead of querying it for tenants
    #[arg(long, env = "MDB_NO_DISCOVERY")]
    pub no_discovery: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "MDB_LOG_LEVEL")]
    pub log_level: String,

    /// Enable JSON logging format
    #[arg(long, env = "MDB_JSON_LOGS")]
    pub json_logs: bool,
}

impl Config {
    /// Get the HTTP bind address.
    pub fn http_bind_addr(&self) -> String {
        format!("{}:{}", self.http_host, self.http_port)
    }

    /// Get the discovery timeout as a Duration.
    pub fn discovery_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.discovery_timeout)
    }
}
