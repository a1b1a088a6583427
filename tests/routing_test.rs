//! Routing through the HTTP host and the tenant middleware.

use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use serde_json::Value;
use std::sync::Arc;
use tempfile::TempDir;
use tenant_db_router::db::{Reconciler, TenantRegistry};
use tenant_db_router::resolver::ConfigResolver;
use tenant_db_router::routing::{HeaderKeyExtractor, RequestContext, TenantRouter};
use tenant_db_router::server::{AppState, app};
use tenant_db_router::settings::ConfigEntries;
use tokio_test::assert_ok;
use tower::ServiceExt;

fn sqlite_url(dir: &TempDir, name: &str) -> String {
    format!("sqlite:{}?mode=rwc", dir.path().join(name).display())
}

async fn state(entries: ConfigEntries) -> AppState {
    let registry = Arc::new(TenantRegistry::new());
    let reconciler = Arc::new(Reconciler::new(
        Arc::new(entries),
        ConfigResolver::without_discovery(),
        Arc::clone(&registry),
    ));
    assert_ok!(reconciler.check_and_reconcile().await);

    let router = TenantRouter::new(Arc::clone(&registry));
    AppState {
        reconciler,
        router: Arc::new(router),
    }
}

fn tenants(dir: &TempDir) -> ConfigEntries {
    let a = sqlite_url(dir, "a.db");
    let b = sqlite_url(dir, "b.db");
    [
        ("mdb.driver.all".to_string(), "sqlite".to_string()),
        ("mdb.key.a".to_string(), "alpha.example.com".to_string()),
        ("mdb.url.a".to_string(), a),
        ("mdb.key.b".to_string(), "beta.example.com".to_string()),
        ("mdb.url.b".to_string(), b),
    ]
    .into_iter()
    .collect()
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn get(uri: &str, host: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header("host", host)
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn test_route_by_domain() {
    let dir = TempDir::new().unwrap();
    let app = app(state(tenants(&dir)).await);

    let response = app
        .oneshot(get("/route", "Beta.Example.com:8080"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["tenant"], "beta.example.com");
    assert_eq!(body["fallback"], false);
    assert_eq!(body["pooled"], true);
}

#[tokio::test]
async fn test_unknown_host_falls_back_to_first_tenant() {
    let dir = TempDir::new().unwrap();
    let state = state(tenants(&dir)).await;

    for _ in 0..3 {
        let response = app(state.clone())
            .oneshot(get("/route", "unknown.example.org"))
            .await
            .unwrap();
        let body = json_body(response).await;
        assert_eq!(body["tenant"], "alpha.example.com");
        assert_eq!(body["fallback"], true);
        assert_eq!(body["requested_key"], "unknown.example.org");
    }
}

#[tokio::test]
async fn test_empty_registry_is_service_unavailable() {
    let app = app(state(ConfigEntries::new()).await);

    let response = app.oneshot(get("/route", "a.example.com")).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = json_body(response).await;
    assert_eq!(body["error"]["code"], "no_tenants");
}

#[tokio::test]
async fn test_header_extractor() {
    let dir = TempDir::new().unwrap();
    let entries = tenants(&dir);
    let registry = Arc::new(TenantRegistry::new());
    let reconciler = Arc::new(Reconciler::new(
        Arc::new(entries),
        ConfigResolver::without_discovery(),
        Arc::clone(&registry),
    ));
    assert_ok!(reconciler.check_and_reconcile().await);
    let router = TenantRouter::builder(Arc::clone(&registry))
        .key_extractor(Arc::new(HeaderKeyExtractor::default()))
        .unwrap()
        .build();
    let app = app(AppState {
        reconciler,
        router: Arc::new(router),
    });

    let request = Request::builder()
        .uri("/route")
        .header("host", "alpha.example.com")
        .header("x-tenant", "beta.example.com")
        .body(Body::empty())
        .unwrap();
    let body = json_body(app.oneshot(request).await.unwrap()).await;
    assert_eq!(body["tenant"], "beta.example.com");
}

#[tokio::test]
async fn test_router_acquires_tenant_connection() {
    let dir = TempDir::new().unwrap();
    let state = state(tenants(&dir)).await;

    let mut conn = assert_ok!(
        state
            .router
            .acquire(&RequestContext::with_host("alpha.example.com"))
            .await
    );
    assert_eq!(conn.key, "alpha.example.com");
    assert_ok!(conn.connection.ping().await);
}

#[tokio::test]
async fn test_status_and_reconcile_endpoints() {
    let dir = TempDir::new().unwrap();
    let state = state(tenants(&dir)).await;

    let response = app(state.clone())
        .oneshot(get("/status", "localhost"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let report = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(report.contains("Tenants: alpha.example.com"));

    let request = Request::builder()
        .method("POST")
        .uri("/reconcile")
        .body(Body::empty())
        .unwrap();
    let body = json_body(app(state).oneshot(request).await.unwrap()).await;
    assert_eq!(body["changed"], false);
}

#[tokio::test]
async fn test_register_endpoint() {
    let dir = TempDir::new().unwrap();
    let state = state(tenants(&dir)).await;

    let request = Request::builder()
        .method("POST")
        .uri("/tenants")
        .header("content-type", "application/json")
        .body(Body::from(
            r#"{"mdb.key.": "gamma.example.com", "mdb.url.": "sqlite:gamma.db", "mdb.pass.": "pw"}"#,
        ))
        .unwrap();
    let response = app(state.clone()).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = json_body(response).await;
    assert_eq!(body["key"], "gamma.example.com");
    assert_eq!(body["driver"], "sqlite");
    assert!(body.get("pass").is_none());

    // Registered without a pool
    let response = app(state)
        .oneshot(get("/route", "gamma.example.com"))
        .await
        .unwrap();
    let body = json_body(response).await;
    assert_eq!(body["tenant"], "gamma.example.com");
    assert_eq!(body["pooled"], false);
}

#[tokio::test]
async fn test_register_endpoint_requires_key() {
    let dir = TempDir::new().unwrap();
    let state = state(tenants(&dir)).await;

    let request = Request::builder()
        .method("POST")
        .uri("/tenants")
        .header("content-type", "application/json")
        .body(Body::from(r#"{"url": "sqlite:x.db"}"#))
        .unwrap();
    let response = app(state).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
