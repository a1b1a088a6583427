//! Tenant key extraction from incoming requests.

use axum::http::{HeaderMap, Request, header};

/// The parts of a request a [`KeyExtractor`] may look at.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// Host name as sent by the client, possibly with a port.
    pub host: Option<String>,
    pub path: String,
    pub headers: HeaderMap,
}

impl RequestContext {
    /// Build a context from a request's URI and headers.
    ///
    /// The `Host` header wins over the URI authority.
    pub fn from_request<B>(request: &Request<B>) -> Self {
        let headers = request.headers().clone();
        let host = headers
            .get(header::HOST)
            .and_then(|v| v.to_str().ok())
            .map(String::from)
            .or_else(|| request.uri().authority().map(|a| a.to_string()));

        Self {
            host,
            path: request.uri().path().to_string(),
            headers,
        }
    }

    /// A context with only a host set.
    pub fn with_host(host: impl Into<String>) -> Self {
        Self {
            host: Some(host.into()),
            ..Default::default()
        }
    }

    /// Header value as text, if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// Strategy deriving the tenant key for one request.
///
/// An empty key never matches a tenant and routes to the fallback.
pub trait KeyExtractor: Send + Sync {
    fn extract(&self, ctx: &RequestContext) -> String;

    fn name(&self) -> &'static str;
}

/// Uses the request's host name, lower-cased and without a port.
#[derive(Debug, Clone, Copy, Default)]
pub struct DomainKeyExtractor;

/// Strip the port (and IPv6 brackets) from a `Host` value.
fn host_name(host: &str) -> &str {
    let host = host.trim();
    if let Some(rest) = host.strip_prefix('[') {
        return rest.split(']').next().unwrap_or(rest);
    }
    match host.rsplit_once(':') {
        Some((name, port)) if port.chars().all(|c| c.is_ascii_digit()) => name,
        _ => host,
    }
}

impl KeyExtractor for DomainKeyExtractor {
    fn extract(&self, ctx: &RequestContext) -> String {
        ctx.host
            .as_deref()
            .map(host_name)
            .unwrap_or_default()
            .to_ascii_lowercase()
    }

    fn name(&self) -> &'static str {
        "domain"
    }
}

/// Reads the tenant key from a request header.
#[derive(Debug, Clone)]
pub struct HeaderKeyExtractor {
    header: String,
}

impl HeaderKeyExtractor {
    pub fn new(header: impl Into<String>) -> Self {
        Self {
            header: header.into().to_ascii_lowercase(),
        }
    }

    pub fn header_name(&self) -> &str {
        &self.header
    }
}

impl Default for HeaderKeyExtractor {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_TENANT_HEADER)
    }
}

impl KeyExtractor for HeaderKeyExtractor {
    fn extract(&self, ctx: &RequestContext) -> String {
        ctx.header(&self.header)
            .map(str::trim)
            .unwrap_or_default()
            .to_string()
    }

    fn name(&self) -> &'static str {
        "header"
    }
}
