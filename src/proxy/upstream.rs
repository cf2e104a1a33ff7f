//! Upstream HTTP clients
//!
//! One long-lived client per distinct proxy target, shared by every request
//! using that target and rebuilt once its pool entry expires.

use crate::cache::TtlCache;
use crate::error::ProxyError;
use async_trait::async_trait;
use bytes::Bytes;
use http::header::{COOKIE, HeaderMap, HeaderName, HeaderValue};
use http::{Method, StatusCode};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Where one named proxy forwards to, as written in the session blob
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProxyTarget {
    pub base_url: String,
    /// Query parameters added to every forwarded request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<BTreeMap<String, String>>,
    /// Headers added to every forwarded request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<BTreeMap<String, String>>,
    /// Cookies sent to the upstream; the caller's own cookies never are
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cookies: Option<BTreeMap<String, String>>,
}

impl ProxyTarget {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            params: None,
            headers: None,
            cookies: None,
        }
    }

    /// Stable identity of this target, used to share clients
    pub fn cache_key(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| self.base_url.clone())
    }
}

#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    pub method: Method,
    /// Path relative to the target's base URL
    pub path: String,
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub body: Bytes,
}

#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// A service requests are forwarded to
#[async_trait]
pub trait Upstream: Send + Sync {
    /// Base URL without a trailing slash
    fn base_url(&self) -> &str;

    /// Send one request and buffer the whole response
    async fn send(&self, request: UpstreamRequest) -> Result<UpstreamResponse, ProxyError>;
}

/// Builds upstream clients from targets, validating them on the way
pub trait UpstreamConnector: Send + Sync {
    fn connect(&self, target: &ProxyTarget) -> Result<Arc<dyn Upstream>, ProxyError>;
}

#[derive(Debug, Clone, Default)]
pub struct HttpConnector {
    /// No timeout when unset, for slow or long-lived upstreams
    pub timeout: Option<Duration>,
}

impl HttpConnector {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }
}

impl UpstreamConnector for HttpConnector {
    fn connect(&self, target: &ProxyTarget) -> Result<Arc<dyn Upstream>, ProxyError> {
        Ok(Arc::new(HttpUpstream::new(target, self.timeout)?))
    }
}

pub struct HttpUpstream {
    client: reqwest::Client,
    base_url: String,
    params: Vec<(String, String)>,
}

impl HttpUpstream {
    pub fn new(target: &ProxyTarget, timeout: Option<Duration>) -> Result<Self, ProxyError> {
        let url = Url::parse(&target.base_url)
            .map_err(|e| ProxyError::InvalidTarget(format!("{}: {}", target.base_url, e)))?;
        if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
            return Err(ProxyError::InvalidTarget(format!(
                "{} is not an http(s) URL with a host",
                target.base_url
            )));
        }

        let mut default_headers = HeaderMap::new();
        for (name, value) in target.headers.iter().flatten() {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| ProxyError::InvalidTarget(format!("header {}: {}", name, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| ProxyError::InvalidTarget(format!("header {}: {}", name, e)))?;
            default_headers.insert(name, value);
        }
        if let Some(cookies) = target.cookies.as_ref().filter(|c| !c.is_empty()) {
            let jar = cookies
                .iter()
                .map(|(name, value)| cookie::Cookie::new(name.as_str(), value.as_str()).stripped().to_string())
                .collect::<Vec<_>>()
                .join("; ");
            let value = HeaderValue::from_str(&jar)
                .map_err(|e| ProxyError::InvalidTarget(format!("cookies: {}", e)))?;
            default_headers.insert(COOKIE, value);
        }

        let mut builder = reqwest::Client::builder()
            .default_headers(default_headers)
            .redirect(reqwest::redirect::Policy::none());
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| ProxyError::InvalidTarget(e.to_string()))?;

        Ok(Self {
            client,
            base_url: target.base_url.trim_end_matches('/').to_string(),
            params: target
                .params
                .iter()
                .flatten()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        })
    }

    fn url_for(&self, path: &str, query: Option<&str>) -> Result<Url, ProxyError> {
        let mut url = Url::parse(&format!("{}/{}", self.base_url, path.trim_start_matches('/')))
            .map_err(|e| ProxyError::BadRequest(e.to_string()))?;
        url.set_query(query.filter(|q| !q.is_empty()));
        if !self.params.is_empty() {
            url.query_pairs_mut().extend_pairs(self.params.iter());
        }
        Ok(url)
    }
}

#[async_trait]
impl Upstream for HttpUpstream {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn send(&self, request: UpstreamRequest) -> Result<UpstreamResponse, ProxyError> {
        let url = self.url_for(&request.path, request.query.as_deref())?;
        let response = self
            .client
            .request(request.method, url)
            .headers(request.headers)
            .body(request.body)
            .send()
            .await
            .map_err(|e| ProxyError::Upstream(e.to_string()))?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| ProxyError::Upstream(e.to_string()))?;

        Ok(UpstreamResponse { status, headers, body })
    }
}

/// Clients keyed by target, expiring after the pool's TTL
pub struct UpstreamPool {
    connector: Arc<dyn UpstreamConnector>,
    clients: TtlCache<String, Arc<dyn Upstream>>,
}

impl UpstreamPool {
    pub fn new(connector: Arc<dyn UpstreamConnector>, max_entries: usize, ttl: Duration) -> Self {
        Self {
            connector,
            clients: TtlCache::new(max_entries, ttl),
        }
    }

    /// Shared client for `target`, built on first use or after expiry
    pub fn client(&self, target: &ProxyTarget) -> Result<Arc<dyn Upstream>, ProxyError> {
        let key = target.cache_key();
        if let Some(client) = self.clients.get(&key) {
            return Ok(client);
        }
        let client = self.connector.connect(target)?;
        log::debug!("Created upstream client for {}", target.base_url);
        self.clients.insert(key, client.clone());
        Ok(client)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
