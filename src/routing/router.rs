//! Per-request tenant routing.
//!
//! Each lookup reads the registry snapshot published at the time of the call,
//! so a reconciliation pass running concurrently never blocks routing for
//! longer than an `Arc` clone.

use crate::db::pool::{DbConnection, PoolHandle};
use crate::db::registry::{Registry, TenantRegistry};
use crate::error::{DbError, DbResult};
use crate::models::ParameterRecord;
use crate::routing::extractor::{DomainKeyExtractor, KeyExtractor, RequestContext};
use std::sync::Arc;
use tracing::debug;

/// Where one request was routed.
#[derive(Debug, Clone)]
pub struct TenantRoute {
    /// Key the extractor produced for the request.
    pub requested_key: String,
    pub record: Arc<ParameterRecord>,
    /// Pool for the tenant's URL. `None` for tenants registered at runtime
    /// whose URL has not been provisioned.
    pub pool: Option<Arc<PoolHandle>>,
    /// True when the requested key was unknown and the first tenant was used.
    pub fallback: bool,
}

impl TenantRoute {
    /// Key of the tenant actually selected.
    pub fn tenant_key(&self) -> &str {
        self.record.key().unwrap_or_default()
    }

    /// Check out a connection authenticated as this tenant.
    pub async fn acquire(&self) -> DbResult<TenantConnection> {
        let pool = self
            .pool
            .as_ref()
            .ok_or_else(|| DbError::pool_not_found(self.record.masked_url()))?;
        let connection = pool.acquire(&self.record.login()).await?;
        Ok(TenantConnection {
            key: self.tenant_key().to_string(),
            connection,
        })
    }
}

/// A pooled connection bound to the tenant it was acquired for.
#[derive(Debug)]
pub struct TenantConnection {
    pub key: String,
    pub connection: DbConnection,
}

/// Pick the tenant for `key`, or the first tenant in key order.
///
/// Returns the record and whether the fallback was used.
pub fn select<'r>(registry: &'r Registry, key: &str) -> Option<(&'r Arc<ParameterRecord>, bool)> {
    match registry.get(key) {
        Some(record) => Some((record, false)),
        None => registry.first().map(|record| (record, true)),
    }
}

/// Routes requests to tenant pools using one [`KeyExtractor`].
#[derive(Clone)]
pub struct TenantRouter {
    registry: Arc<TenantRegistry>,
    extractor: Arc<dyn KeyExtractor>,
}

impl TenantRouter {
    /// Router using the default domain extractor.
    pub fn new(registry: Arc<TenantRegistry>) -> Self {
        Self {
            registry,
            extractor: Arc::new(DomainKeyExtractor),
        }
    }

    pub fn builder(registry: Arc<TenantRegistry>) -> TenantRouterBuilder {
        TenantRouterBuilder {
            registry,
            extractor: None,
        }
    }

    pub fn extractor_name(&self) -> &'static str {
        self.extractor.name()
    }

    /// Resolve the tenant for a request.
    pub async fn route(&self, ctx: &RequestContext) -> DbResult<TenantRoute> {
        let requested_key = self.extractor.extract(ctx);
        let snapshot = self.registry.snapshot().await;

        let (record, fallback) = select(&snapshot, &requested_key).ok_or(DbError::NoTenants)?;
        if fallback {
            debug!(
                requested = %requested_key,
                tenant = ?record.key(),
                "Unknown tenant key, using first tenant"
            );
        }

        let pool = record
            .url
            .as_deref()
            .and_then(|url| snapshot.pool(url))
            .cloned();

        Ok(TenantRoute {
            requested_key,
            record: Arc::clone(record),
            pool,
            fallback,
        })
    }

    /// Route a request and check out a connection for its tenant.
    pub async fn acquire(&self, ctx: &RequestContext) -> DbResult<TenantConnection> {
        self.route(ctx).await?.acquire().await
    }
}

impl std::fmt::Debug for TenantRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantRouter")
            .field("extractor", &self.extractor.name())
            .finish_non_exhaustive()
    }
}

/// Builder for [`TenantRouter`]. At most one extractor may be registered.
pub struct TenantRouterBuilder {
    registry: Arc<TenantRegistry>,
    extractor: Option<Arc<dyn KeyExtractor>>,
}

impl TenantRouterBuilder {
    /// Register the key extractor. A second registration is an error.
    pub fn key_extractor(mut self, extractor: Arc<dyn KeyExtractor>) -> DbResult<Self> {
        if let Some(existing) = &self.extractor {
            return Err(DbError::configuration(format!(
                "too many key extractors: '{}' is already registered, cannot add '{}'",
                existing.name(),
                extractor.name()
            )));
        }
        self.extractor = Some(extractor);
        Ok(self)
    }

    pub fn build(self) -> TenantRouter {
        TenantRouter {
            registry: self.registry,
            extractor: self
                .extractor
                .unwrap_or_else(|| Arc::new(DomainKeyExtractor)),
        }
    }
}
