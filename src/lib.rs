//! Tenant DB Router Library
//!
//! Routes each unit of work to the connection pool of its tenant. Flat
//! `mdb.` configuration (optionally extended by a bootstrap catalog query) is
//! reconciled into pooled sqlx connections for PostgreSQL, MySQL and SQLite,
//! and a pluggable key extractor picks the tenant per request.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod resolver;
pub mod routing;
pub mod server;
pub mod settings;
pub mod status;

pub use config::Config;
pub use error::{DbError, DbResult};
pub use resolver::ConfigResolver;
pub use routing::TenantRouter;
