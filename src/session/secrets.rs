use crate::azcli::{CliClient, ErrorPolicy};
use crate::cache::TtlCache;
use crate::error::SessionError;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Source of the base64 session blob named by a secret identifier
#[async_trait]
pub trait SecretProvider: Send + Sync {
    async fn fetch(&self, secret_id: &str) -> Result<String, SessionError>;
}

/// Reads secrets through `keyvault secret show --id <secret_id>`
pub struct KeyVaultSecrets {
    cli: Arc<CliClient>,
    cache: TtlCache<String, String>,
}

impl KeyVaultSecrets {
    pub fn new(cli: Arc<CliClient>, ttl: Duration) -> Self {
        Self {
            cli,
            cache: TtlCache::new(64, ttl),
        }
    }
}

#[async_trait]
impl SecretProvider for KeyVaultSecrets {
    async fn fetch(&self, secret_id: &str) -> Result<String, SessionError> {
        self.cache
            .get_or_try_compute(secret_id.to_string(), || async {
                let secret = self
                    .cli
                    .invoke(["keyvault", "secret", "show", "--id", secret_id], ErrorPolicy::Propagate)
                    .await
                    .map_err(|e| {
                        log::warn!("{}", e);
                        SessionError::SecretUnavailable(secret_id.to_string())
                    })?;
                secret
                    .as_ref()
                    .and_then(|s| s.get("value"))
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .ok_or_else(|| SessionError::SecretUnavailable(secret_id.to_string()))
            })
            .await
    }
}

/// Serves one fixed blob for any identifier
#[derive(Debug, Clone)]
pub struct StaticSecret(pub String);

#[async_trait]
impl SecretProvider for StaticSecret {
    async fn fetch(&self, _secret_id: &str) -> Result<String, SessionError> {
        Ok(self.0.clone())
    }
}
