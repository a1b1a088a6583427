//! HTTP host for the tenant router.
//!
//! Endpoints:
//! - `GET /status`: text status report
//! - `POST /reconcile`: run a reconciliation pass, JSON outcome
//! - `POST /tenants`: register a tenant from a JSON object of entries
//! - `GET /route`: the tenant the request routes to, via the tenant middleware

use crate::db::reconcile::{ReconcileOutcome, Reconciler};
use crate::error::{DbError, DbResult};
use crate::models::ParameterRecord;
use crate::routing::{TenantRoute, TenantRouter, tenant_middleware};
use crate::status::status_report;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Extension, Json, Router, middleware};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, warn};

/// Shared state for every handler.
#[derive(Clone)]
pub struct AppState {
    pub reconciler: Arc<Reconciler>,
    pub router: Arc<TenantRouter>,
}

/// JSON view of a [`TenantRoute`].
#[derive(Debug, Serialize)]
pub struct RouteInfo {
    pub requested_key: String,
    pub tenant: String,
    pub url: String,
    pub fallback: bool,
    pub pooled: bool,
}

impl From<&TenantRoute> for RouteInfo {
    fn from(route: &TenantRoute) -> Self {
        Self {
            requested_key: route.requested_key.clone(),
            tenant: route.tenant_key().to_string(),
            url: route.record.masked_url(),
            fallback: route.fallback,
            pooled: route.pool.is_some(),
        }
    }
}

async fn status(State(state): State<AppState>) -> String {
    let snapshot = state.reconciler.registry().snapshot().await;
    status_report(&snapshot)
}

async fn reconcile(State(state): State<AppState>) -> DbResult<Json<ReconcileOutcome>> {
    let outcome = state.reconciler.check_and_reconcile().await?;
    Ok(Json(outcome))
}

async fn register_tenant(
    State(state): State<AppState>,
    Json(entries): Json<BTreeMap<String, String>>,
) -> DbResult<(StatusCode, Json<ParameterRecord>)> {
    let record = state.reconciler.register_tenant(entries).await?;
    Ok((StatusCode::CREATED, Json(ParameterRecord::clone(&record))))
}

async fn route_info(Extension(route): Extension<TenantRoute>) -> Json<RouteInfo> {
    Json(RouteInfo::from(&route))
}

/// Build the axum application.
pub fn app(state: AppState) -> Router {
    let routed: Router<AppState> = Router::new()
        .route("/route", get(route_info))
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state.router),
            tenant_middleware,
        ));

    Router::new()
        .route("/status", get(status))
        .route("/reconcile", post(reconcile))
        .route("/tenants", post(register_tenant))
        .merge(routed)
        .with_state(state)
}

/// HTTP server with graceful shutdown.
pub struct HttpServer {
    state: AppState,
    bind_addr: String,
}

impl HttpServer {
    pub fn new(state: AppState, bind_addr: impl Into<String>) -> Self {
        Self {
            state,
            bind_addr: bind_addr.into(),
        }
    }

    pub fn bind_addr(&self) -> &str {
        &self.bind_addr
    }

    /// Serve until SIGINT or SIGTERM, then close every tenant pool.
    pub async fn run(&self) -> DbResult<()> {
        let listener = TcpListener::bind(&self.bind_addr).await.map_err(|e| {
            DbError::connectivity(
                format!("Failed to bind to {}: {}", self.bind_addr, e),
                "Check that the port is available",
            )
        })?;
        info!(addr = %self.bind_addr, extractor = self.state.router.extractor_name(), "Tenant router listening");

        // Force exit if open connections outlive this after a shutdown signal
        const GRACEFUL_TIMEOUT: Duration = Duration::from_secs(30);

        let shutdown_notify = Arc::new(tokio::sync::Notify::new());
        let shutdown_notify_clone = shutdown_notify.clone();
        let shutdown_signal = async move {
            wait_for_signal().await;
            shutdown_notify_clone.notify_one();
        };

        let server =
            axum::serve(listener, app(self.state.clone())).with_graceful_shutdown(shutdown_signal);

        tokio::select! {
            result = server => {
                match result {
                    Ok(()) => info!("HTTP server stopped"),
                    Err(e) => {
                        error!(error = %e, "HTTP server error");
                        self.state.reconciler.shutdown().await;
                        return Err(DbError::internal(format!("HTTP server error: {}", e)));
                    }
                }
            }
            _ = async {
                shutdown_notify.notified().await;
                info!(
                    timeout_secs = GRACEFUL_TIMEOUT.as_secs(),
                    "Waiting for requests to finish (send signal again to force exit)..."
                );

                tokio::select! {
                    _ = tokio::time::sleep(GRACEFUL_TIMEOUT) => {
                        warn!("Graceful shutdown timeout, forcing exit");
                    }
                    _ = wait_for_signal() => {
                        warn!("Received second signal, forcing immediate exit");
                    }
                }
            } => {}
        }

        info!("Closing tenant pools");
        self.state.reconciler.shutdown().await;
        Ok(())
    }
}

/// Wait for a shutdown signal (SIGINT or SIGTERM).
async fn wait_for_signal() {
    let ctrl_c = signal::ctrl_c();

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
