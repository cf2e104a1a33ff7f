//! Proxy sessions
//!
//! A session is a base64 JSON object merged onto [`default_config`]. Keys
//! starting with `proxy_` describe upstream targets and every one of them must
//! build a client before the session is accepted. Sessions are keyed by a
//! hash of their canonical encoding, so equivalent blobs share one entry in
//! the [`SessionStore`].

pub mod secrets;

pub use secrets::{KeyVaultSecrets, SecretProvider, StaticSecret};

use crate::error::SessionError;
use crate::proxy::{ProxyTarget, UpstreamPool};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use dashmap::DashMap;
use serde::Serialize;
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use std::sync::Arc;

pub const PROXY_PREFIX: &str = "proxy_";
/// Path the index redirects to
pub const MAIN_PATH_KEY: &str = "main_path";

/// Configuration every session blob is merged onto
pub fn default_config() -> Map<String, Value> {
    let value = json!({
        "proxy_httpbin": {"base_url": "https://httpbin.org"},
        "proxy_jupyter": {"base_url": "https://wagov.github.io/wasoc-jupyterlite"},
        "main_path": "/jupyter/lab/index.html",
    });
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// Copy of `value` with object keys in sorted order at every level
fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<&String, &Value> = map.iter().collect();
            Value::Object(sorted.into_iter().map(|(k, v)| (k.clone(), canonicalize(v))).collect())
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// Base64 of the key-sorted JSON encoding of `config`
pub fn encode_session(config: &Map<String, Value>) -> String {
    let canonical = canonicalize(&Value::Object(config.clone()));
    STANDARD.encode(canonical.to_string())
}

/// A decoded and validated session
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub key: String,
    /// Canonical encoding of `config`
    pub base64: String,
    #[serde(rename = "session")]
    pub config: Map<String, Value>,
    /// Proxy name to upstream base URL
    pub apis: BTreeMap<String, String>,
    #[serde(skip)]
    proxies: BTreeMap<String, ProxyTarget>,
}

impl Session {
    pub fn proxy(&self, name: &str) -> Option<&ProxyTarget> {
        self.proxies.get(name)
    }

    pub fn api_names(&self) -> Vec<&str> {
        self.apis.keys().map(String::as_str).collect()
    }

    pub fn main_path(&self) -> Option<&str> {
        self.config.get(MAIN_PATH_KEY).and_then(Value::as_str)
    }
}

/// Decode a blob, merge it onto the defaults and validate every proxy.
///
/// Nothing is returned unless the whole session is valid.
pub fn decode_session(blob: &str, pool: &UpstreamPool) -> Result<Session, SessionError> {
    let raw = STANDARD
        .decode(blob.trim())
        .map_err(|e| SessionError::Decode(e.to_string()))?;
    let overrides = match serde_json::from_slice::<Value>(&raw) {
        Ok(Value::Object(map)) => map,
        Ok(_) => return Err(SessionError::Decode("session is not a JSON object".to_string())),
        Err(e) => return Err(SessionError::Decode(e.to_string())),
    };

    let mut config = default_config();
    config.extend(overrides);
    let base64 = encode_session(&config);
    let key = blake3::hash(base64.as_bytes()).to_hex().to_string();

    let mut apis = BTreeMap::new();
    let mut proxies = BTreeMap::new();
    for (item, value) in &config {
        let Some(name) = item.strip_prefix(PROXY_PREFIX) else {
            continue;
        };
        let invalid = |reason: String| SessionError::InvalidProxy {
            name: name.to_string(),
            reason,
        };
        let target: ProxyTarget = serde_json::from_value(value.clone()).map_err(|e| invalid(e.to_string()))?;
        pool.client(&target).map_err(|e| invalid(e.to_string()))?;
        apis.insert(name.to_string(), target.base_url.clone());
        proxies.insert(name.to_string(), target);
    }

    Ok(Session {
        key,
        base64,
        config,
        apis,
        proxies,
    })
}

/// Process-wide table of sessions keyed by content hash
pub struct SessionStore {
    sessions: DashMap<String, Arc<Session>>,
    pool: Arc<UpstreamPool>,
    secrets: Arc<dyn SecretProvider>,
    /// Identifier of the default session blob, if one is configured
    secret_id: Option<String>,
}

impl SessionStore {
    pub fn new(pool: Arc<UpstreamPool>, secrets: Arc<dyn SecretProvider>, secret_id: Option<String>) -> Self {
        Self {
            sessions: DashMap::new(),
            pool,
            secrets,
            secret_id,
        }
    }

    /// Decode and validate without storing
    pub fn decode(&self, blob: &str) -> Result<Session, SessionError> {
        decode_session(blob, &self.pool)
    }

    /// Resolve an explicit blob, or the default session when `blob` is `None`.
    ///
    /// An existing entry with the same key is kept and returned.
    pub async fn resolve(&self, blob: Option<&str>) -> Result<Arc<Session>, SessionError> {
        let session = match blob {
            Some(blob) => self.decode(blob)?,
            None => {
                let blob = self.default_blob().await?;
                self.decode(&blob)?
            }
        };
        Ok(self.intern(session))
    }

    /// Session for a browser presenting `key`, falling back to the default
    /// session when the key is missing, unknown or has no main path.
    pub async fn resolve_for(&self, key: Option<&str>) -> Result<Arc<Session>, SessionError> {
        if let Some(session) = key.and_then(|k| self.get(k)) {
            if session.main_path().is_some() {
                return Ok(session);
            }
        }
        self.resolve(None).await
    }

    pub fn get(&self, key: &str) -> Option<Arc<Session>> {
        self.sessions.get(key).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn intern(&self, session: Session) -> Arc<Session> {
        let key = session.key.clone();
        self.sessions
            .entry(key)
            .or_insert_with(|| {
                log::info!("Loaded session {} with proxies: {}", session.key, session.api_names().join(", "));
                Arc::new(session)
            })
            .value()
            .clone()
    }

    async fn default_blob(&self) -> Result<String, SessionError> {
        let secret_id = self
            .secret_id
            .as_deref()
            .ok_or_else(|| SessionError::SecretUnavailable("KEYVAULT_SESSION_SECRET not set".to_string()))?;
        self.secrets.fetch(secret_id).await
    }
}
