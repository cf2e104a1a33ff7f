//! Session-scoped reverse proxy
//!
//! A request for `/{proxy_name}/{path}` is resolved against the caller's
//! session, scrubbed of client-facing headers, forwarded to that proxy's
//! upstream, and relayed back with redirects kept inside the proxy and
//! identifying response headers removed.

pub mod headers;
pub mod upstream;

pub use headers::{INBOUND_DENYLIST, OUTBOUND_DENYLIST, filter_headers};
pub use upstream::{
    HttpConnector, HttpUpstream, ProxyTarget, Upstream, UpstreamConnector, UpstreamPool, UpstreamRequest,
    UpstreamResponse,
};

use crate::error::ProxyError;
use crate::session::Session;
use bytes::Bytes;
use http::header::LOCATION;
use http::{HeaderMap, HeaderValue, Method};
use reqwest::Url;
use std::sync::Arc;

/// Stand-in origin relative redirects are resolved against
const CONTAINED_ORIGIN: &str = "http://proxy.invalid/";

/// An inbound request addressed to one of the session's proxies
#[derive(Debug, Clone)]
pub struct ProxyRequest {
    pub method: Method,
    /// Path after `/{proxy_name}/`
    pub path: String,
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// Prefix the server is mounted under, prepended to rewritten redirects
    pub mount: String,
}

pub struct ProxyDispatcher {
    pool: Arc<UpstreamPool>,
}

impl ProxyDispatcher {
    pub fn new(pool: Arc<UpstreamPool>) -> Self {
        Self { pool }
    }

    pub async fn forward(
        &self,
        session: &Session,
        proxy_name: &str,
        request: ProxyRequest,
    ) -> Result<UpstreamResponse, ProxyError> {
        let target = session.proxy(proxy_name).ok_or_else(|| ProxyError::UnknownProxy {
            name: proxy_name.to_string(),
            valid: session.api_names().join(", "),
        })?;
        let upstream = self.pool.client(target)?;

        let outbound = UpstreamRequest {
            method: request.method,
            path: request.path,
            query: request.query,
            headers: filter_headers(&request.headers, INBOUND_DENYLIST),
            body: request.body,
        };
        log::debug!(
            "Forwarding {} /{}/{} to {}",
            outbound.method,
            proxy_name,
            outbound.path,
            upstream.base_url()
        );

        let mut response = upstream.send(outbound).await?;
        contain_redirect(&mut response.headers, upstream.base_url(), &request.mount, proxy_name)?;
        response.headers = filter_headers(&response.headers, OUTBOUND_DENYLIST);
        Ok(response)
    }
}

/// Rewrite a `Location` header so the client stays behind the proxy.
///
/// Locations under the upstream's base URL become
/// `{mount}/{proxy_name}/{relative-path}`; relative locations pass through;
/// any other absolute location is refused.
pub fn contain_redirect(
    headers: &mut HeaderMap,
    base_url: &str,
    mount: &str,
    proxy_name: &str,
) -> Result<(), ProxyError> {
    let Some(location) = headers.get(LOCATION) else {
        return Ok(());
    };
    let location = location
        .to_str()
        .map_err(|_| ProxyError::Upstream("non-ASCII redirect location".to_string()))?
        .to_string();

    if let Some(rewritten) = rewrite_location(&location, base_url, mount, proxy_name)? {
        let value = HeaderValue::from_str(&rewritten).map_err(|e| ProxyError::Upstream(e.to_string()))?;
        headers.insert(LOCATION, value);
    }
    Ok(())
}

/// `Ok(None)` when the location needs no rewrite
pub fn rewrite_location(
    location: &str,
    base_url: &str,
    mount: &str,
    proxy_name: &str,
) -> Result<Option<String>, ProxyError> {
    let base = base_url.trim_end_matches('/');
    let relative = if location == base {
        Some("")
    } else {
        location.strip_prefix(base).and_then(|rest| rest.strip_prefix('/'))
    };

    if let Some(relative) = relative {
        return Ok(Some(format!(
            "{}/{}/{}",
            mount.trim_end_matches('/'),
            proxy_name,
            relative
        )));
    }
    // Browsers read `\` as `/` and strip tabs and newlines, so resolve the
    // location the way they would before checking where it leads.
    let origin = Url::parse(CONTAINED_ORIGIN).map_err(|e| ProxyError::Upstream(e.to_string()))?;
    match origin.join(location) {
        Ok(resolved) if resolved.origin() == origin.origin() => Ok(None),
        _ => Err(ProxyError::ForbiddenRedirect(location.to_string())),
    }
}
