//! Tenant DB Router - Main entry point.
//!
//! Resolves tenant configuration into pooled connections and serves the
//! routing endpoints over HTTP.

use clap::Parser;
use std::sync::Arc;
use tenant_db_router::config::Config;
use tenant_db_router::db::{Discovery, NoDiscovery, Reconciler, SqlDiscovery, TenantRegistry};
use tenant_db_router::resolver::ConfigResolver;
use tenant_db_router::routing::{DomainKeyExtractor, HeaderKeyExtractor, KeyExtractor, TenantRouter};
use tenant_db_router::server::{AppState, HttpServer};
use tenant_db_router::settings::FileSource;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber.with(fmt::layer().json()).init();
    } else {
        subscriber
            .with(fmt::layer().with_target(true).with_thread_ids(false))
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse configuration from command line and environment
    let config = Config::parse();

    // Initialize logging
    init_tracing(&config);

    info!(
        config = %config.config.display(),
        "Starting tenant-db-router v{}",
        env!("CARGO_PKG_VERSION")
    );

    let discovery: Arc<dyn Discovery> = if config.no_discovery {
        Arc::new(NoDiscovery)
    } else {
        Arc::new(SqlDiscovery::new(config.discovery_timeout_duration()))
    };
    let resolver = ConfigResolver::new(discovery);
    let source = Arc::new(FileSource::new(&config.config));
    let registry = Arc::new(TenantRegistry::new());
    let reconciler = Arc::new(Reconciler::new(source, resolver, Arc::clone(&registry)));

    // Initial pass; failures leave the registry empty until /reconcile succeeds
    match reconciler.check_and_reconcile().await {
        Ok(outcome) => info!(
            provisioned = outcome.provisioned.len(),
            failed = outcome.failed.len(),
            "Initial reconciliation finished"
        ),
        Err(e) => error!(error = %e, "Initial reconciliation failed"),
    }
    if registry.snapshot().await.is_empty() {
        warn!("No tenants are available, requests will fail until a reconciliation succeeds");
    }

    let extractor: Arc<dyn KeyExtractor> = match &config.tenant_header {
        Some(header) => Arc::new(HeaderKeyExtractor::new(header)),
        None => Arc::new(DomainKeyExtractor),
    };
    let router = TenantRouter::builder(Arc::clone(&registry))
        .key_extractor(extractor)?
        .build();

    let state = AppState {
        reconciler,
        router: Arc::new(router),
    };
    let server = HttpServer::new(state, config.http_bind_addr());

    if let Err(e) = server.run().await {
        error!(error = %e, "Server error");
        return Err(e.into());
    }

    info!("Server shutdown complete");
    Ok(())
}
