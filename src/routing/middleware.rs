//! axum middleware attaching the tenant route to each request.

use crate::routing::extractor::RequestContext;
use crate::routing::router::TenantRouter;
use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::warn;

/// Route the request and insert the [`TenantRoute`](crate::routing::TenantRoute)
/// into its extensions. Routing errors end the request with a JSON error body.
pub async fn tenant_middleware(
    State(router): State<Arc<TenantRouter>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let ctx = RequestContext::from_request(&request);

    match router.route(&ctx).await {
        Ok(route) => {
            request.extensions_mut().insert(route);
            next.run(request).await
        }
        Err(e) => {
            warn!(host = ?ctx.host, path = %ctx.path, error = %e, "Request could not be routed");
            e.into_response()
        }
    }
}
