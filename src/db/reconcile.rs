//! Reconciliation of configuration against the live registry.
//!
//! A pass resolves configuration fresh, checks it for drift against the
//! published registry and, only when something changed, rebuilds every pool
//! into a new registry that is then published in one step. Requests already
//! holding the previous snapshot keep using its pools until they finish.

use crate::db::provision::PoolProvisioner;
use crate::db::registry::{Registry, TenantRegistry};
use crate::error::{DbError, DbResult};
use crate::models::ParameterRecord;
use crate::resolver::{
    ALL_KEY, ConfigResolver, ResolvedParameters, apply_parameter, field_for_name, parse_entries,
};
use crate::settings::ConfigSource;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// A tenant that could not be provisioned during a pass.
#[derive(Debug, Clone, Serialize)]
pub struct TenantFailure {
    pub tenant: String,
    pub error: String,
}

/// Result of one reconciliation pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconcileOutcome {
    /// False when configuration matched the registry and nothing was rebuilt.
    pub changed: bool,
    pub provisioned: Vec<String>,
    pub failed: Vec<TenantFailure>,
}

fn differs(desired: Option<&str>, active: Option<&str>) -> bool {
    desired.unwrap_or_default() != active.unwrap_or_default()
}

/// True when `resolved` describes tenants the registry does not hold, or a
/// published pool is broken and must be rebuilt.
///
/// Records missing driver or url are not comparable and are skipped. Each
/// record is compared after inheriting from `all`, under its effective key,
/// on driver, url and user.
pub fn changed(resolved: &ResolvedParameters, active: &Registry) -> bool {
    if active.is_empty() {
        return true;
    }

    if let Some(pool) = active.pools().find(|pool| pool.is_broken()) {
        debug!(url = %pool.masked_url(), "Pool is broken");
        return true;
    }

    let defaults = resolved.get(ALL_KEY).cloned().unwrap_or_default();

    for (id, record) in resolved {
        if id == ALL_KEY {
            continue;
        }
        let mut desired = record.clone();
        desired.inherit(&defaults);
        if !desired.is_complete() {
            continue;
        }

        let key = desired.key().unwrap_or(id);
        let Some(current) = active.get(key) else {
            debug!(tenant = %id, key = %key, "Tenant not in registry");
            return true;
        };

        if differs(desired.driver.as_deref(), current.driver.as_deref())
            || differs(desired.url.as_deref(), current.url.as_deref())
            || differs(desired.user.as_deref(), current.user.as_deref())
        {
            debug!(tenant = %id, key = %key, "Tenant parameters changed");
            return true;
        }
    }

    false
}

/// Drives reconciliation passes and runtime registration.
pub struct Reconciler {
    source: Arc<dyn ConfigSource>,
    resolver: ConfigResolver,
    provisioner: PoolProvisioner,
    registry: Arc<TenantRegistry>,
    /// Serializes passes so provisioning never interleaves.
    pass_lock: Mutex<()>,
}

impl Reconciler {
    pub fn new(
        source: Arc<dyn ConfigSource>,
        resolver: ConfigResolver,
        registry: Arc<TenantRegistry>,
    ) -> Self {
        Self {
            source,
            resolver,
            provisioner: PoolProvisioner::new(),
            registry,
            pass_lock: Mutex::new(()),
        }
    }

    /// The registry this reconciler publishes to.
    pub fn registry(&self) -> &Arc<TenantRegistry> {
        &self.registry
    }

    /// Resolve configuration and rebuild the registry if it drifted.
    ///
    /// A tenant that fails to provision is logged and left out; it never
    /// aborts the pass. Only a failure to read the configuration source is
    /// returned as an error.
    pub async fn check_and_reconcile(&self) -> DbResult<ReconcileOutcome> {
        let _pass = self.pass_lock.lock().await;

        let entries = self.source.entries()?;
        let resolved = self.resolver.resolve(&entries).await;
        let active = self.registry.snapshot().await;

        if !changed(&resolved, &active) {
            debug!(tenants = active.tenant_count(), "Configuration unchanged");
            return Ok(ReconcileOutcome::default());
        }

        info!(records = resolved.len(), "Configuration changed, rebuilding tenant pools");

        let defaults = resolved.get(ALL_KEY).cloned().unwrap_or_default();
        let mut next = Registry::new();
        let mut outcome = ReconcileOutcome {
            changed: true,
            ..Default::default()
        };

        for (id, mut record) in resolved {
            if id == ALL_KEY {
                continue;
            }
            record.inherit(&defaults);
            let key = record.key().unwrap_or(&id).to_string();

            match self.provisioner.provision(record, &mut next).await {
                Ok(()) => outcome.provisioned.push(key),
                Err(e) => {
                    error!(tenant = %id, error = %e, "Cannot connect to tenant database");
                    outcome.failed.push(TenantFailure {
                        tenant: id,
                        error: e.to_string(),
                    });
                }
            }
        }

        next.mark_reconciled();
        info!(
            tenants = next.tenant_count(),
            pools = next.pool_count(),
            failed = outcome.failed.len(),
            "Published tenant registry"
        );
        self.registry.publish(next).await;

        Ok(outcome)
    }

    /// Add one tenant without provisioning a pool for it.
    ///
    /// Entry names may carry the `mdb.` prefix and a tenant suffix, or neither.
    /// The record inherits from the configured `all` record and must end up
    /// with a key.
    pub async fn register_tenant(
        &self,
        entries: BTreeMap<String, String>,
    ) -> DbResult<Arc<ParameterRecord>> {
        let configured = parse_entries(&self.source.entries()?);

        let mut record = ParameterRecord::new();
        for (name, value) in &entries {
            match field_for_name(name) {
                Some(field) => apply_parameter(field, value, &mut record),
                None => warn!(entry = %name, "Unknown registration field, skipping"),
            }
        }
        if let Some(defaults) = configured.get(ALL_KEY) {
            record.inherit(defaults);
        }
        if record.key().is_none() {
            return Err(DbError::invalid_input(
                "Registration needs a key (mdb.key.)",
            ));
        }

        let record = self.registry.register(record).await?;
        info!(
            tenant = ?record.key(),
            url = %record.masked_url(),
            "Registered tenant"
        );
        Ok(record)
    }

    /// Close every pool in the published registry.
    pub async fn shutdown(&self) {
        let _pass = self.pass_lock.lock().await;
        self.registry.close_all().await;
    }
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("resolver", &self.resolver)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(key: &str, driver: &str, url: &str, user: Option<&str>) -> ParameterRecord {
        ParameterRecord {
            key: Some(key.into()),
            driver: Some(driver.into()),
            url: Some(url.into()),
            user: user.map(String::from),
            ..Default::default()
        }
    }

    fn active(records: &[ParameterRecord]) -> Registry {
        let mut registry = Registry::new();
        for r in records {
            registry.insert_credentials(Arc::new(r.clone())).unwrap();
        }
        registry
    }

    #[test]
    fn test_changed_when_registry_empty() {
        assert!(changed(&ResolvedParameters::new(), &Registry::new()));
    }

    #[test]
    fn test_unchanged_for_same_parameters() {
        let mut resolved = ResolvedParameters::new();
        resolved.insert(
            "t1".into(),
            record("t1", "sqlite", "sqlite:t1.db", Some("u")),
        );
        let registry = active(&[record("t1", "sqlite", "sqlite:t1.db", Some("u"))]);

        assert!(!changed(&resolved, &registry));
        // Pure: same answer twice
        assert!(!changed(&resolved, &registry));
    }

    #[test]
    fn test_changed_on_url_or_user() {
        let registry = active(&[record("t1", "sqlite", "sqlite:t1.db", None)]);

        let mut resolved = ResolvedParameters::new();
        resolved.insert("t1".into(), record("t1", "sqlite", "sqlite:t2.db", None));
        assert!(changed(&resolved, &registry));

        resolved.insert(
            "t1".into(),
            record("t1", "sqlite", "sqlite:t1.db", Some("new")),
        );
        assert!(changed(&resolved, &registry));
    }

    #[test]
    fn test_absent_user_equals_empty_user() {
        let registry = active(&[record("t1", "sqlite", "sqlite:t1.db", Some(""))]);
        let mut resolved = ResolvedParameters::new();
        resolved.insert("t1".into(), record("t1", "sqlite", "sqlite:t1.db", None));
        assert!(!changed(&resolved, &registry));
    }

    #[test]
    fn test_changed_uses_effective_key() {
        let registry = active(&[record("acme.example.com", "sqlite", "sqlite:a.db", None)]);
        let mut resolved = ResolvedParameters::new();
        resolved.insert(
            "acme".into(),
            record("acme.example.com", "sqlite", "sqlite:a.db", None),
        );
        assert!(!changed(&resolved, &registry));
    }

    #[test]
    fn test_changed_inherits_driver_from_all() {
        let registry = active(&[record("t1", "sqlite", "sqlite:t1.db", None)]);
        let mut resolved = ResolvedParameters::new();
        resolved.insert(
            ALL_KEY.into(),
            ParameterRecord {
                driver: Some("mysql".into()),
                ..Default::default()
            },
        );
        resolved.insert(
            "t1".into(),
            ParameterRecord {
                key: Some("t1".into()),
                url: Some("sqlite:t1.db".into()),
                ..Default::default()
            },
        );
        assert!(changed(&resolved, &registry));
    }

    #[tokio::test]
    async fn test_changed_when_pool_broken() {
        use crate::config::PoolSettings;
        use crate::db::pool::{DbPool, PoolHandle};
        use crate::models::{DatabaseType, Login};
        use std::time::Duration;

        let dir = tempfile::TempDir::new().unwrap();
        let url = format!("sqlite:{}?mode=rwc", dir.path().join("b.db").display());
        let settings = PoolSettings {
            acquire_retry_attempts: 1,
            acquire_retry_delay: Duration::from_millis(1),
            ..PoolSettings::default()
        };
        let pool = DbPool::connect(DatabaseType::SQLite, &url, &Login::default(), &settings)
            .await
            .unwrap();
        let handle = Arc::new(PoolHandle::new(&url, settings, Login::default(), pool));

        let mut registry = active(&[record("t1", "sqlite", &url, None)]);
        registry.insert_pool(Arc::clone(&handle));
        let mut resolved = ResolvedParameters::new();
        resolved.insert("t1".into(), record("t1", "sqlite", &url, None));
        assert!(!changed(&resolved, &registry));

        handle.primary().close().await;
        assert!(handle.acquire(&Login::default()).await.is_err());
        assert!(handle.is_broken());
        assert!(changed(&resolved, &registry));
    }

    #[test]
    fn test_incomplete_records_are_skipped() {
        let registry = active(&[record("t1", "sqlite", "sqlite:t1.db", None)]);
        let mut resolved = ResolvedParameters::new();
        resolved.insert(
            "t2".into(),
            ParameterRecord {
                key: Some("t2".into()),
                url: Some("sqlite:t2.db".into()),
                ..Default::default()
            },
        );
        assert!(!changed(&resolved, &registry));
    }
}
