use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error for the query utility and proxy
#[derive(Error, Debug)]
pub enum Error {
    #[error("Control-plane error: {0}")]
    Cli(#[from] CliError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Proxy error: {0}")]
    Proxy(#[from] ProxyError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Unknown action '{name}', valid actions: {valid}")]
    UnknownAction { name: String, valid: String },

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Failures talking to the external control-plane binary
#[derive(Error, Debug)]
pub enum CliError {
    #[error("Not authenticated: {0}")]
    NotAuthenticated(String),

    #[error("Failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Command exited with status {status}: {stderr}")]
    Failed { status: i32, stderr: String },

    #[error("Failed to parse command output: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Unexpected command output: {0}")]
    UnexpectedShape(String),

    #[error("Worker pool is closed")]
    PoolClosed,
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Session secret not available: {0}")]
    SecretUnavailable(String),

    #[error("Failed to load session data: {0}")]
    Decode(String),

    #[error("Proxy '{name}' has an invalid configuration: {reason}")]
    InvalidProxy { name: String, reason: String },
}

#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("{name} does not have a valid configuration, see /apis for valid prefixes: {valid}")]
    UnknownProxy { name: String, valid: String },

    #[error("Redirect to {0} not allowed")]
    ForbiddenRedirect(String),

    #[error("Upstream request failed: {0}")]
    Upstream(String),

    #[error("Invalid upstream target: {0}")]
    InvalidTarget(String),

    #[error("Bad request: {0}")]
    BadRequest(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to parse configuration: {0}")]
    ParsingFailed(String),
}
