//! # SIEM Query Utils
//!
//! Runs analytics queries across every log-analytics workspace visible to the
//! `az` CLI and serves a reverse proxy whose upstreams come from a base64
//! session blob.
//!
//! ## Features
//!
//! - **Workspace discovery**: lists workspaces in every subscription and keeps
//!   the ones that answer a probe query
//! - **Fan-out queries**: one query over many workspaces, split into chunks and
//!   run on a bounded worker pool, rows returned in a deterministic order
//! - **Memoization**: control-plane results, workspace listings, upstream
//!   clients and secrets each sit in a bounded TTL cache
//! - **Session proxy**: hash-keyed sessions describe which upstreams a browser
//!   may reach; requests and redirects are scrubbed on the way through
//!
//! ## Example
//!
//! ```rust,no_run
//! use siem_query_utils::{AppContext, config::load_config, handlers::run_action};
//!
//! # async fn example() -> siem_query_utils::Result<()> {
//! let ctx = AppContext::from_config(load_config(None)?);
//! let rows = run_action(&ctx, "globalQuery", &["SecurityIncident | count".to_string()]).await?;
//! println!("{}", rows);
//! # Ok(())
//! # }
//! ```

pub mod azcli;
pub mod cache;
pub mod cli;
pub mod common;
pub mod config;
pub mod context;
pub mod error;
pub mod handlers;
pub mod proxy;
pub mod query;
pub mod server;
pub mod session;
pub mod workspace;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types and functions
pub use cache::TtlCache;
pub use context::AppContext;
pub use error::{Error, Result};
pub use query::{FanOutExecutor, FanOutResult};
pub use workspace::{Workspace, WorkspaceDirectory};

use cli::{Commands, SessionCommand};
use common::command_utils::is_command_available;
use config::types::Config;
use std::io::Read;
use std::sync::Arc;

/// The current version of the CLI tool
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub async fn run_command(command: Commands, mut config: Config) -> Result<()> {
    match command {
        Commands::Actions => {
            for action in handlers::ACTIONS {
                println!("{}", action);
            }
            Ok(())
        }
        Commands::Action { name, args } => {
            if !handlers::ACTIONS.contains(&name.as_str()) {
                return Err(Error::UnknownAction {
                    name,
                    valid: handlers::ACTIONS.join(", "),
                });
            }
            let ctx = AppContext::from_config(config);
            ctx.cli.prepare().await?;
            let result = handlers::run_action(&ctx, &name, &args).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
        Commands::Serve { host, port, root_path } => {
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(root_path) = root_path {
                config.server.root_path = root_path;
            }
            let ctx = AppContext::from_config(config);
            if !is_command_available(ctx.cli.binary()).await {
                log::warn!("{} not found in PATH, query actions will fail", ctx.cli.binary());
            } else if let Err(e) = ctx.cli.prepare().await {
                log::warn!("Control plane not ready, actions will fail until it is: {}", e);
            }
            server::QueryServer::new(Arc::new(ctx)).run().await?;
            Ok(())
        }
        Commands::Session(SessionCommand::Encode { json }) => {
            println!("{}", handlers::encode_config(&read_arg(json)?)?);
            Ok(())
        }
        Commands::Session(SessionCommand::Validate { blob }) => {
            let ctx = AppContext::from_config(config);
            let session = handlers::validate_blob(&ctx.sessions, &read_arg(blob)?)?;
            println!("{}", serde_json::to_string_pretty(&session)?);
            Ok(())
        }
    }
}

/// The argument itself, or stdin when it is `-`
fn read_arg(value: String) -> Result<String> {
    if value != "-" {
        return Ok(value);
    }
    let mut input = String::new();
    std::io::stdin().read_to_string(&mut input)?;
    Ok(input.trim().to_string())
}
