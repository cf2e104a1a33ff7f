use crate::config::types::Config;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "siem-query")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Query SIEM workspaces in bulk and proxy session-scoped upstream services")]
#[command(long_about = "Discovers log-analytics workspaces through the az CLI, fans queries out across them in \
bounded parallel chunks, and serves a reverse proxy whose upstreams are described by a base64 session blob.")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging (-v for info, -vv for debug, -vvv for trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Log level used when no -v flag is given
    #[arg(long, global = true, env = "LOG_LEVEL", hide = true)]
    pub log_level: Option<String>,

    /// Shared secret required by the HTTP action endpoint
    #[arg(long, global = true, env = "API_TOKEN", hide_env_values = true)]
    pub api_token: Option<String>,

    /// Key vault secret id holding the default session blob
    #[arg(long, global = true, env = "KEYVAULT_SESSION_SECRET")]
    pub session_secret: Option<String>,

    /// Maximum concurrent control-plane invocations
    #[arg(long, global = true, env = "MAX_THREADS")]
    pub max_threads: Option<usize>,

    /// Set when running under a managed identity; selects identity login
    #[arg(long, global = true, env = "IDENTITY_HEADER", hide = true, hide_env_values = true)]
    pub identity_header: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List the available query actions
    Actions,

    /// Run a query action and print its JSON result
    Action {
        /// Action name (see `actions`)
        name: String,

        /// Positional arguments passed to the action
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// Serve the proxy, session tooling and action endpoints
    Serve {
        /// Host address to bind to
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,

        /// Prefix the service is mounted under behind a gateway
        #[arg(long, value_name = "PATH")]
        root_path: Option<String>,
    },

    /// Prepare and check session blobs
    #[command(subcommand)]
    Session(SessionCommand),
}

#[derive(Subcommand)]
pub enum SessionCommand {
    /// Encode a JSON session object as a base64 blob
    Encode {
        /// JSON object, or `-` to read it from stdin
        #[arg(default_value = "-")]
        json: String,
    },

    /// Decode and validate a base64 session blob
    Validate {
        /// Base64 blob, or `-` to read it from stdin
        #[arg(default_value = "-")]
        blob: String,
    },
}

impl Cli {
    /// Initialize logging based on verbosity level
    pub fn init_logging(&self) {
        if self.quiet {
            return;
        }

        let level = match self.verbose {
            0 => self
                .log_level
                .as_deref()
                .and_then(|l| l.parse().ok())
                .unwrap_or(log::LevelFilter::Warn),
            1 => log::LevelFilter::Info,
            2 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        };

        env_logger::Builder::from_default_env()
            .filter_level(level)
            .init();
    }

    /// Let flags and environment variables win over the config file
    pub fn apply_overrides(&self, config: &mut Config) {
        if let Some(token) = &self.api_token {
            config.server.api_token = Some(token.clone());
        }
        if let Some(secret) = &self.session_secret {
            config.proxy.session_secret = Some(secret.clone());
        }
        if let Some(max_threads) = self.max_threads {
            config.query.max_threads = max_threads;
        }
        if self.identity_header.as_deref().is_some_and(|h| !h.is_empty()) {
            config.query.use_identity = true;
        }
    }
}
