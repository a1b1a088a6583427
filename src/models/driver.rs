//! Driver resolution.
//!
//! Configuration names a driver either by backend name (`postgres`) or by the
//! JDBC class name older deployments carry (`org.postgresql.Driver`). Both
//! resolve to one of the sqlx backends compiled into this binary.

use crate::error::{DbError, DbResult};
use serde::{Deserialize, Serialize};

/// Supported database types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseType {
    PostgreSQL,
    /// Includes MariaDB
    MySQL,
    SQLite,
}

impl DatabaseType {
    /// Resolve a configured driver name.
    pub fn from_driver(driver: &str) -> DbResult<Self> {
        let normalized = driver.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "postgres" | "postgresql" | "pg" | "org.postgresql.driver" => Ok(Self::PostgreSQL),
            "mysql" | "mariadb" | "com.mysql.jdbc.driver" | "com.mysql.cj.jdbc.driver"
            | "org.mariadb.jdbc.driver" => Ok(Self::MySQL),
            "sqlite" | "sqlite3" | "org.sqlite.jdbc" => Ok(Self::SQLite),
            _ => Err(DbError::driver_not_found(
                driver,
                "Use one of: postgres, mysql, mariadb, sqlite (or their JDBC class names)",
            )),
        }
    }

    /// Parse database type from a connection string.
    pub fn from_connection_string(connection_string: &str) -> Option<Self> {
        let lower = sqlx_url(connection_string).to_lowercase();
        if lower.starts_with("postgres://") || lower.starts_with("postgresql://") {
            Some(Self::PostgreSQL)
        } else if lower.starts_with("mysql://") || lower.starts_with("mariadb://") {
            Some(Self::MySQL)
        } else if lower.starts_with("sqlite://") || lower.starts_with("sqlite:") {
            Some(Self::SQLite)
        } else {
            None
        }
    }

    /// Resolve the driver and check it agrees with the URL scheme.
    pub fn resolve(driver: Option<&str>, url: &str) -> DbResult<Self> {
        let driver = driver.filter(|d| !d.is_empty()).ok_or_else(|| {
            DbError::driver_not_found("none", "Set mdb.driver.<tenant> or mdb.driver.all")
        })?;
        let db_type = Self::from_driver(driver)?;

        match Self::from_connection_string(url) {
            Some(scheme_type) if scheme_type == db_type => Ok(db_type),
            Some(scheme_type) => Err(DbError::driver_not_found(
                driver,
                format!(
                    "Driver is {} but the URL is a {} URL",
                    db_type, scheme_type
                ),
            )),
            None => Err(DbError::driver_not_found(
                driver,
                format!("URL scheme is not a {} URL", db_type),
            )),
        }
    }

    /// Get the display name for this database type.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::PostgreSQL => "PostgreSQL",
            Self::MySQL => "MySQL",
            Self::SQLite => "SQLite",
        }
    }
}

impl std::fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Strip a leading `jdbc:` so the URL is one sqlx understands.
pub fn sqlx_url(url: &str) -> &str {
    url.strip_prefix("jdbc:").unwrap_or(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_driver_names() {
        assert_eq!(
            DatabaseType::from_driver("postgres").unwrap(),
            DatabaseType::PostgreSQL
        );
        assert_eq!(
            DatabaseType::from_driver("org.postgresql.Driver").unwrap(),
            DatabaseType::PostgreSQL
        );
        assert_eq!(
            DatabaseType::from_driver("com.mysql.cj.jdbc.Driver").unwrap(),
            DatabaseType::MySQL
        );
        assert_eq!(
            DatabaseType::from_driver(" MariaDB ").unwrap(),
            DatabaseType::MySQL
        );
        assert_eq!(
            DatabaseType::from_driver("org.sqlite.JDBC").unwrap(),
            DatabaseType::SQLite
        );
    }

    #[test]
    fn test_unknown_driver() {
        let result = DatabaseType::from_driver("oracle.jdbc.OracleDriver");
        assert!(matches!(result, Err(DbError::DriverNotFound { .. })));
    }

    #[test]
    fn test_from_connection_string_accepts_jdbc_prefix() {
        assert_eq!(
            DatabaseType::from_connection_string("jdbc:postgresql://localhost/db"),
            Some(DatabaseType::PostgreSQL)
        );
        assert_eq!(
            DatabaseType::from_connection_string("mysql://localhost/db"),
            Some(DatabaseType::MySQL)
        );
        assert_eq!(
            DatabaseType::from_connection_string("sqlite:test.db"),
            Some(DatabaseType::SQLite)
        );
        assert_eq!(
            DatabaseType::from_connection_string("jdbc:oracle:thin:@h:1521"),
            None
        );
    }

    #[test]
    fn test_resolve_rejects_mismatched_scheme() {
        let result = DatabaseType::resolve(Some("mysql"), "postgres://h/db");
        assert!(matches!(result, Err(DbError::DriverNotFound { .. })));
    }

    #[test]
    fn test_resolve_requires_driver() {
        assert!(DatabaseType::resolve(None, "sqlite:a.db").is_err());
        assert!(DatabaseType::resolve(Some(""), "sqlite:a.db").is_err());
        assert_eq!(
            DatabaseType::resolve(Some("sqlite"), "sqlite:a.db").unwrap(),
            DatabaseType::SQLite
        );
    }

    #[test]
    fn test_sqlx_url() {
        assert_eq!(sqlx_url("jdbc:mysql://h/db"), "mysql://h/db");
        assert_eq!(sqlx_url("mysql://h/db"), "mysql://h/db");
    }
}
