//! Active tenant registry.
//!
//! The registry maps tenant keys to their parameters and connection URLs to
//! pools. It is published as an immutable [`Registry`] snapshot behind an
//! `Arc`: readers clone the `Arc` and never observe a half-built pass, a
//! reconciliation pass swaps in a whole new snapshot, and runtime registration
//! copies the current snapshot before appending to it.

use crate::db::pool::PoolHandle;
use crate::error::{DbError, DbResult};
use crate::models::ParameterRecord;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

/// One published generation of credentials and pools.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    credentials: BTreeMap<String, Arc<ParameterRecord>>,
    pools: BTreeMap<String, Arc<PoolHandle>>,
    reconciled_at: Option<DateTime<Utc>>,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a tenant by key.
    pub fn get(&self, key: &str) -> Option<&Arc<ParameterRecord>> {
        self.credentials.get(key)
    }

    /// The first tenant in key order, used as the routing fallback.
    pub fn first(&self) -> Option<&Arc<ParameterRecord>> {
        self.credentials.values().next()
    }

    /// Look up the pool for a connection URL.
    pub fn pool(&self, url: &str) -> Option<&Arc<PoolHandle>> {
        self.pools.get(url)
    }

    pub fn has_pool(&self, url: &str) -> bool {
        self.pools.contains_key(url)
    }

    /// Register a pool under its URL unless one already exists.
    ///
    /// Returns false, leaving the existing pool in place, for a known URL.
    pub fn insert_pool(&mut self, handle: Arc<PoolHandle>) -> bool {
        if self.pools.contains_key(handle.url()) {
            return false;
        }
        self.pools.insert(handle.url().to_string(), handle);
        true
    }

    /// Register a tenant under its key, replacing any previous entry.
    pub fn insert_credentials(&mut self, record: Arc<ParameterRecord>) -> DbResult<()> {
        let key = record
            .key()
            .ok_or_else(|| DbError::invalid_input("Tenant record has no key"))?
            .to_string();
        self.credentials.insert(key, record);
        Ok(())
    }

    /// Tenants in key order.
    pub fn tenants(&self) -> impl Iterator<Item = (&str, &Arc<ParameterRecord>)> {
        self.credentials.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Pools in URL order.
    pub fn pools(&self) -> impl Iterator<Item = &Arc<PoolHandle>> {
        self.pools.values()
    }

    /// Keys of every tenant whose URL is `url`.
    pub fn tenants_for_url(&self, url: &str) -> Vec<&str> {
        self.credentials
            .iter()
            .filter(|(_, record)| record.url.as_deref() == Some(url))
            .map(|(key, _)| key.as_str())
            .collect()
    }

    pub fn tenant_count(&self) -> usize {
        self.credentials.len()
    }

    pub fn pool_count(&self) -> usize {
        self.pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }

    /// When this generation was built by a reconciliation pass.
    pub fn reconciled_at(&self) -> Option<DateTime<Utc>> {
        self.reconciled_at
    }

    pub(crate) fn mark_reconciled(&mut self) {
        self.reconciled_at = Some(Utc::now());
    }
}

/// Process-wide holder of the current [`Registry`] snapshot.
#[derive(Debug, Default)]
pub struct TenantRegistry {
    current: RwLock<Arc<Registry>>,
}

impl TenantRegistry {
    /// Create a registry holder with an empty snapshot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the current snapshot. Cheap: clones an `Arc`.
    pub async fn snapshot(&self) -> Arc<Registry> {
        let current = self.current.read().await;
        Arc::clone(&current)
    }

    /// Replace the current snapshot, returning the one it superseded.
    pub async fn publish(&self, registry: Registry) -> Arc<Registry> {
        let next = Arc::new(registry);
        let mut current = self.current.write().await;
        std::mem::replace(&mut *current, next)
    }

    /// Append one tenant to the current snapshot.
    ///
    /// Copy-on-write under the write lock: readers holding the previous
    /// snapshot are unaffected, and new readers see the complete entry.
    pub async fn register(&self, record: ParameterRecord) -> DbResult<Arc<ParameterRecord>> {
        let record = Arc::new(record);
        let mut current = self.current.write().await;
        Arc::make_mut(&mut current).insert_credentials(Arc::clone(&record))?;
        Ok(record)
    }

    /// Close every pool in the current snapshot and publish an empty one.
    pub async fn close_all(&self) {
        let previous = self.publish(Registry::new()).await;
        for pool in previous.pools() {
            pool.close_all().await;
        }
        info!("All tenant pools closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(key: &str, url: &str) -> ParameterRecord {
        ParameterRecord {
            key: Some(key.into()),
            url: Some(url.into()),
            driver: Some("sqlite".into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_first_is_smallest_key() {
        let mut registry = Registry::new();
        for key in ["charlie", "alpha", "bravo"] {
            registry
                .insert_credentials(Arc::new(record(key, "sqlite:x.db")))
                .unwrap();
        }
        assert_eq!(registry.first().unwrap().key(), Some("alpha"));
    }

    #[test]
    fn test_insert_credentials_requires_key() {
        let mut registry = Registry::new();
        let result = registry.insert_credentials(Arc::new(ParameterRecord::new()));
        assert!(matches!(result, Err(DbError::InvalidInput { .. })));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_tenants_for_url() {
        let mut registry = Registry::new();
        registry
            .insert_credentials(Arc::new(record("a", "sqlite:shared.db")))
            .unwrap();
        registry
            .insert_credentials(Arc::new(record("b", "sqlite:shared.db")))
            .unwrap();
        registry
            .insert_credentials(Arc::new(record("c", "sqlite:other.db")))
            .unwrap();
        assert_eq!(registry.tenants_for_url("sqlite:shared.db"), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_register_does_not_touch_existing_snapshot() {
        let registry = TenantRegistry::new();
        registry.register(record("t1", "sqlite:a.db")).await.unwrap();
        let before = registry.snapshot().await;

        registry.register(record("t2", "sqlite:b.db")).await.unwrap();
        let after = registry.snapshot().await;

        assert_eq!(before.tenant_count(), 1);
        assert_eq!(after.tenant_count(), 2);
        assert!(after.get("t2").is_some());
    }

    #[tokio::test]
    async fn test_publish_returns_previous() {
        let registry = TenantRegistry::new();
        registry.register(record("old", "sqlite:a.db")).await.unwrap();

        let mut next = Registry::new();
        next.insert_credentials(Arc::new(record("new", "sqlite:b.db")))
            .unwrap();
        let previous = registry.publish(next).await;

        assert!(previous.get("old").is_some());
        let current = registry.snapshot().await;
        assert!(current.get("old").is_none());
        assert!(current.get("new").is_some());
    }
}
