//! Database layer.
//!
//! This module provides everything between resolved configuration and a
//! checked-out connection:
//! - Per-URL connection pools with per-login sub-pools
//! - Tenant discovery from a bootstrap database
//! - Provisioning of pools into a registry under construction
//! - The published registry snapshot
//! - Reconciliation passes and runtime registration
//! - Backend dispatch macros

#[macro_use]
pub mod macros;
pub mod discovery;
pub mod pool;
pub mod provision;
pub mod reconcile;
pub mod registry;

pub use discovery::{DISCOVERY_FETCH_SIZE, Discovery, NoDiscovery, SqlDiscovery};
pub use pool::{DbConnection, DbPool, PoolHandle};
pub use provision::PoolProvisioner;
pub use reconcile::{ReconcileOutcome, Reconciler, TenantFailure, changed};
pub use registry::{Registry, TenantRegistry};
