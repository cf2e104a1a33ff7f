use serde::{Deserialize, Serialize};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub query: QueryConfig,
    pub cache: CacheConfig,
    pub proxy: ProxyConfig,
    pub server: ServerConfig,
}

/// Control-plane and fan-out settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct QueryConfig {
    /// Control-plane binary invoked for every command
    pub cli_binary: String,
    /// Upper bound on concurrently running control-plane invocations
    pub max_threads: usize,
    /// Workspaces per query invocation (one primary plus supplementary ids)
    pub chunk_size: usize,
    /// Probe run across discovered workspaces to confirm they hold incident data
    pub validation_query: String,
    /// Row field carrying the workspace id in the probe's result
    pub validation_field: String,
    pub default_timespan: String,
    /// Log in with a managed identity instead of checking an existing login
    pub use_identity: bool,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            cli_binary: "az".to_string(),
            max_threads: 20,
            chunk_size: 30,
            validation_query: "SecurityIncident | distinct TenantId".to_string(),
            validation_field: "TenantId".to_string(),
            default_timespan: "P7D".to_string(),
            use_identity: false,
        }
    }
}

/// Capacities and TTLs of the memoization layers, in seconds
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    pub max_entries: usize,
    pub command_ttl_secs: u64,
    pub workspace_ttl_secs: u64,
    pub client_ttl_secs: u64,
    pub secret_ttl_secs: u64,
    pub login_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 25600,
            command_ttl_secs: 60,
            workspace_ttl_secs: 24 * 60 * 60,
            client_ttl_secs: 60 * 60,
            secret_ttl_secs: 60 * 60,
            login_ttl_secs: 60 * 60,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProxyConfig {
    /// Request timeout for upstream clients; unset means no timeout
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upstream_timeout_secs: Option<u64>,
    /// Secret identifier holding the process-default session blob
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_secret: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Path prefix the server is mounted under behind a front proxy
    pub root_path: String,
    /// Shared secret gating the query action endpoint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_token: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            root_path: String::new(),
            api_token: None,
        }
    }
}
