//! Explicitly owned application state
//!
//! Caches, the session table and the worker pool all hang off one
//! [`AppContext`] built from [`Config`], so tests can build as many
//! independent contexts as they like.

use crate::azcli::{Authenticator, CliClient, LoginMethod};
use crate::cache::TtlCache;
use crate::common::command_utils::{CommandRunner, ProcessRunner};
use crate::config::types::Config;
use crate::proxy::{HttpConnector, ProxyDispatcher, UpstreamConnector, UpstreamPool};
use crate::query::FanOutExecutor;
use crate::session::{KeyVaultSecrets, SecretProvider, SessionStore};
use crate::workspace::{ValidationProbe, WorkspaceDirectory};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

pub struct AppContext {
    pub config: Config,
    pub cli: Arc<CliClient>,
    pub executor: Arc<FanOutExecutor>,
    pub workspaces: Arc<WorkspaceDirectory>,
    pub sessions: Arc<SessionStore>,
    pub dispatcher: Arc<ProxyDispatcher>,
}

impl AppContext {
    /// Context talking to the real control-plane binary and real upstreams
    pub fn from_config(config: Config) -> Self {
        let timeout = config.proxy.upstream_timeout_secs.map(Duration::from_secs);
        Self::build(
            config,
            Arc::new(ProcessRunner),
            Arc::new(HttpConnector::new(timeout)),
            None,
        )
    }

    /// Assemble a context from its external collaborators.
    ///
    /// Without a secret provider the default session is read through the
    /// control plane's key vault command.
    pub fn build(
        config: Config,
        runner: Arc<dyn CommandRunner>,
        connector: Arc<dyn UpstreamConnector>,
        secrets: Option<Arc<dyn SecretProvider>>,
    ) -> Self {
        let cache = &config.cache;
        let method = if config.query.use_identity {
            LoginMethod::ManagedIdentity
        } else {
            LoginMethod::ExistingSession
        };

        let cli = Arc::new(CliClient::new(
            config.query.cli_binary.clone(),
            runner,
            Authenticator::new(method, Duration::from_secs(cache.login_ttl_secs)),
            TtlCache::new(cache.max_entries, Duration::from_secs(cache.command_ttl_secs)),
        ));
        let pool = Arc::new(Semaphore::new(config.query.max_threads.max(1)));
        let executor = Arc::new(FanOutExecutor::new(cli.clone(), pool.clone(), config.query.chunk_size));

        let probe = ValidationProbe {
            query: config.query.validation_query.clone(),
            field: config.query.validation_field.clone(),
            timespan: config.query.default_timespan.clone(),
        };
        let workspaces = Arc::new(WorkspaceDirectory::new(
            cli.clone(),
            executor.clone(),
            pool,
            probe,
            Duration::from_secs(cache.workspace_ttl_secs),
        ));

        let upstreams = Arc::new(UpstreamPool::new(
            connector,
            cache.max_entries,
            Duration::from_secs(cache.client_ttl_secs),
        ));
        let secrets = secrets.unwrap_or_else(|| {
            Arc::new(KeyVaultSecrets::new(cli.clone(), Duration::from_secs(cache.secret_ttl_secs)))
        });
        let sessions = Arc::new(SessionStore::new(
            upstreams.clone(),
            secrets,
            config.proxy.session_secret.clone(),
        ));
        let dispatcher = Arc::new(ProxyDispatcher::new(upstreams));

        Self {
            config,
            cli,
            executor,
            workspaces,
            sessions,
            dispatcher,
        }
    }
}
