//! HTTP surface
//!
//! Serves the session-scoped reverse proxy, the session tooling endpoints and
//! the token-gated query actions.
//!
//! ```text
//! GET      /health
//! GET      /main_path             redirect to the session's main path
//! GET|POST /apis                  proxy names and base URLs
//! POST     /config                validate a JSON session object
//! POST     /config_base64         validate a base64 session blob
//! GET      /action/{name}         run a query action (auth_token, args)
//! ANY      /{proxy_name}/{*path}  forwarded to the proxy's upstream
//! ```
//!
//! `root_path` is the prefix a fronting gateway mounts the service under. It
//! is stripped before requests arrive and added back to redirects.

pub mod routes;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    routing::{any, get, post},
};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::context::AppContext;

/// Shared state for route handlers
#[derive(Clone)]
pub struct AppState {
    pub ctx: Arc<AppContext>,
}

impl AppState {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        Self { ctx }
    }

    pub fn root_path(&self) -> &str {
        self.ctx.config.server.root_path.trim_end_matches('/')
    }
}

/// Build the router with every route and request tracing
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(routes::health))
        .route("/main_path", get(routes::main_path))
        .route("/apis", get(routes::apis).post(routes::apis))
        .route("/config", post(routes::config_json))
        .route("/config_base64", post(routes::config_base64))
        .route("/action/{name}", get(routes::action))
        .route("/{proxy_name}/", any(routes::proxy_root))
        .route("/{proxy_name}/{*path}", any(routes::proxy))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub struct QueryServer {
    state: AppState,
}

impl QueryServer {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        Self {
            state: AppState::new(ctx),
        }
    }

    /// Returns the address the server will listen on.
    pub fn addr(&self) -> String {
        let server = &self.state.ctx.config.server;
        format!("{}:{}", server.host, server.port)
    }

    /// Runs the server until Ctrl-C.
    pub async fn run(self) -> Result<(), std::io::Error> {
        let addr: SocketAddr = self
            .addr()
            .parse()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, format!("{}: {}", self.addr(), e)))?;

        let app = router(self.state);
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!("Listening on http://{}", listener.local_addr()?);

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl-C: {}", e);
        return;
    }
    info!("Shutting down");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::Config;
    use crate::proxy::HttpConnector;
    use crate::session::StaticSecret;
    use crate::testing::ScriptedRunner;

    #[test]
    fn test_addr_and_root_path() {
        let mut config = Config::default();
        config.server.port = 9191;
        config.server.root_path = "/proxy/".to_string();
        let ctx = AppContext::build(
            config,
            Arc::new(ScriptedRunner::new(|_| ScriptedRunner::ok_raw(""))),
            Arc::new(HttpConnector::default()),
            Some(Arc::new(StaticSecret(String::new()))),
        );
        let server = QueryServer::new(Arc::new(ctx));
        assert_eq!(server.addr(), "127.0.0.1:9191");
        assert_eq!(server.state.root_path(), "/proxy");
    }
}
