//! Pool provisioning for one tenant record.

use crate::config::PoolSettings;
use crate::db::pool::{DbPool, PoolHandle, probe};
use crate::db::registry::Registry;
use crate::error::{DbError, DbResult};
use crate::models::{DatabaseType, ParameterRecord};
use std::sync::Arc;
use tracing::{debug, info};

/// Builds pools and credentials into a registry under construction.
#[derive(Debug, Clone, Copy, Default)]
pub struct PoolProvisioner;

impl PoolProvisioner {
    pub fn new() -> Self {
        Self
    }

    /// Provision `record` into `registry`.
    ///
    /// Resolves the driver, probes the database, then opens a pool keyed by
    /// URL. Tenants sharing a URL share the pool: a second record for a known
    /// URL skips the probe and pool creation. Credentials are inserted only
    /// once every step has succeeded, so a failed record leaves `registry`
    /// unchanged.
    pub async fn provision(&self, record: ParameterRecord, registry: &mut Registry) -> DbResult<()> {
        let key = record
            .key()
            .ok_or_else(|| DbError::invalid_input("Tenant record has no key"))?
            .to_string();
        let url = record
            .url
            .clone()
            .filter(|u| !u.is_empty())
            .ok_or_else(|| DbError::configuration(format!("Tenant '{}' has no url", key)))?;

        let db_type = DatabaseType::resolve(record.driver.as_deref(), &url)?;
        let settings = PoolSettings::from_record(&record)?;

        if registry.has_pool(&url) {
            debug!(tenant = %key, url = %record.masked_url(), "Reusing pool for shared URL");
        } else {
            let login = record.login();
            probe(db_type, &url, &login).await?;
            let pool = DbPool::connect(db_type, &url, &login, &settings).await?;
            registry.insert_pool(Arc::new(PoolHandle::new(&url, settings, login, pool)));
            info!(
                tenant = %key,
                url = %record.masked_url(),
                driver = %db_type,
                "Provisioned pool"
            );
        }

        registry.insert_credentials(Arc::new(record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sqlite_record(key: &str, url: &str) -> ParameterRecord {
        ParameterRecord {
            key: Some(key.into()),
            url: Some(url.into()),
            driver: Some("sqlite".into()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_provision_shares_pool_by_url() {
        let dir = TempDir::new().unwrap();
        let url = format!("sqlite:{}?mode=rwc", dir.path().join("shared.db").display());
        let mut registry = Registry::new();

        PoolProvisioner
            .provision(sqlite_record("a", &url), &mut registry)
            .await
            .unwrap();
        PoolProvisioner
            .provision(sqlite_record("b", &url), &mut registry)
            .await
            .unwrap();

        assert_eq!(registry.tenant_count(), 2);
        assert_eq!(registry.pool_count(), 1);
        assert!(registry.pool(&url).is_some());
    }

    #[tokio::test]
    async fn test_provision_failure_leaves_registry_unchanged() {
        let mut registry = Registry::new();
        let result = PoolProvisioner
            .provision(
                sqlite_record("bad", "sqlite:/nonexistent/dir/bad.db"),
                &mut registry,
            )
            .await;

        assert!(matches!(result, Err(DbError::Connectivity { .. })));
        assert!(registry.is_empty());
        assert_eq!(registry.pool_count(), 0);
    }

    #[tokio::test]
    async fn test_provision_unknown_driver() {
        let mut record = sqlite_record("t", "sqlite:t.db");
        record.driver = Some("com.ibm.db2.jcc.DB2Driver".into());

        let result = PoolProvisioner.provision(record, &mut Registry::new()).await;
        assert!(matches!(result, Err(DbError::DriverNotFound { .. })));
    }

    #[tokio::test]
    async fn test_provision_requires_key_and_url() {
        let mut registry = Registry::new();
        let mut record = sqlite_record("t", "sqlite:t.db");
        record.key = None;
        assert!(matches!(
            PoolProvisioner.provision(record, &mut registry).await,
            Err(DbError::InvalidInput { .. })
        ));

        let mut record = sqlite_record("t", "sqlite:t.db");
        record.url = None;
        assert!(matches!(
            PoolProvisioner.provision(record, &mut registry).await,
            Err(DbError::Configuration { .. })
        ));
    }

    #[tokio::test]
    async fn test_provision_rejects_bad_pool_size() {
        let mut record = sqlite_record("t", "sqlite:t.db");
        record.pool_max_size = Some("many".into());

        let result = PoolProvisioner.provision(record, &mut Registry::new()).await;
        assert!(matches!(result, Err(DbError::Configuration { .. })));
    }
}
