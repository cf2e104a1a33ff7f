use crate::error::{Error, Result};
use crate::session::{Session, SessionStore, encode_session};
use serde_json::Value;

/// Canonical base64 blob for a JSON session object, ready to store as the
/// session secret
pub fn encode_config(json: &str) -> Result<String> {
    match serde_json::from_str::<Value>(json)? {
        Value::Object(config) => Ok(encode_session(&config)),
        _ => Err(Error::InvalidArguments("session config must be a JSON object".to_string())),
    }
}

/// Decode and validate a blob without storing it
pub fn validate_blob(store: &SessionStore, blob: &str) -> Result<Session> {
    Ok(store.decode(blob)?)
}

/// Validate a JSON session object by way of its encoding
pub fn validate_config(store: &SessionStore, json: &str) -> Result<Session> {
    validate_blob(store, &encode_config(json)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::{HttpConnector, UpstreamPool};
    use crate::session::StaticSecret;
    use std::sync::Arc;
    use std::time::Duration;

    fn store() -> SessionStore {
        let pool = Arc::new(UpstreamPool::new(
            Arc::new(HttpConnector::default()),
            8,
            Duration::from_secs(60),
        ));
        SessionStore::new(pool, Arc::new(StaticSecret(String::new())), None)
    }

    #[test]
    fn test_encode_then_validate() {
        let store = store();
        let blob = encode_config(r#"{"proxy_grafana": {"base_url": "https://grafana.example"}}"#).unwrap();
        let session = validate_blob(&store, &blob).unwrap();
        assert_eq!(session.apis["grafana"], "https://grafana.example");
        assert!(store.is_empty());

        let direct = validate_config(&store, r#"{"proxy_grafana": {"base_url": "https://grafana.example"}}"#).unwrap();
        assert_eq!(direct.key, session.key);
    }

    #[test]
    fn test_encode_rejects_non_objects() {
        assert!(matches!(encode_config("[]"), Err(Error::InvalidArguments(_))));
        assert!(matches!(encode_config("{"), Err(Error::Json(_))));
    }
}
