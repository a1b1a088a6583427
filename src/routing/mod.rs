//! Request routing.
//!
//! This module selects the tenant pool for each unit of work:
//! - Key extraction strategies (domain or header)
//! - Snapshot lookup with deterministic fallback
//! - axum middleware exposing the route to handlers

pub mod extractor;
pub mod middleware;
pub mod router;

pub use extractor::{DomainKeyExtractor, HeaderKeyExtractor, KeyExtractor, RequestContext};
pub use middleware::tenant_middleware;
pub use router::{TenantConnection, TenantRoute, TenantRouter, TenantRouterBuilder, select};
