//! Workspace discovery and validation
//!
//! Discovery lists every subscription, then every log-analytics workspace in
//! each subscription concurrently. A workspace only counts once a probe query
//! run through the fan-out executor comes back with its customer id, since a
//! workspace existing says nothing about whether it carries incident data.
//! The validated set is cached for a day.

use crate::azcli::{CliClient, ErrorPolicy};
use crate::cache::TtlCache;
use crate::error::CliError;
use crate::query::{FanOutExecutor, FanOutResult};
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

const WORKSPACE_LIST_QUERY: &str = "[].[customerId,resourceGroup,name]";

/// A log-analytics workspace, identified by the whole tuple
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workspace {
    pub subscription_id: String,
    pub customer_id: String,
    pub resource_group: String,
    pub name: String,
}

impl Workspace {
    /// Whether `needle` appears in any identifying field
    pub fn matches(&self, needle: &str) -> bool {
        [&self.subscription_id, &self.customer_id, &self.resource_group, &self.name]
            .iter()
            .any(|field| field.contains(needle))
    }
}

impl fmt::Display for Workspace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{} ({})",
            self.subscription_id, self.resource_group, self.name, self.customer_id
        )
    }
}

pub type WorkspaceSet = Arc<BTreeSet<Workspace>>;

/// Settings for the existence probe run over discovered workspaces
#[derive(Debug, Clone)]
pub struct ValidationProbe {
    pub query: String,
    /// Row field holding the responding workspace's customer id
    pub field: String,
    pub timespan: String,
}

impl Default for ValidationProbe {
    fn default() -> Self {
        Self {
            query: "SecurityIncident | distinct TenantId".to_string(),
            field: "TenantId".to_string(),
            timespan: "P7D".to_string(),
        }
    }
}

/// Workspaces found by one discovery pass
#[derive(Debug, Default)]
pub struct Discovery {
    pub workspaces: BTreeSet<Workspace>,
    /// Subscriptions whose workspace listing failed
    pub failed_subscriptions: Vec<String>,
}

pub struct WorkspaceDirectory {
    cli: Arc<CliClient>,
    executor: Arc<FanOutExecutor>,
    pool: Arc<Semaphore>,
    probe: ValidationProbe,
    cache: TtlCache<(), WorkspaceSet>,
}

impl WorkspaceDirectory {
    pub fn new(cli: Arc<CliClient>, executor: Arc<FanOutExecutor>, pool: Arc<Semaphore>, probe: ValidationProbe, ttl: Duration) -> Self {
        Self {
            cli,
            executor,
            pool,
            probe,
            cache: TtlCache::new(1, ttl),
        }
    }

    /// Validated workspaces, served from cache while fresh.
    ///
    /// A pass where a subscription failed to list or a probe chunk failed is
    /// returned but not cached, so the next call tries again.
    pub async fn list_workspaces(&self) -> Result<WorkspaceSet, CliError> {
        if let Some(cached) = self.cache.get(&()) {
            return Ok(cached);
        }

        let discovery = self.discover().await?;
        let (validated, probe) = self.validate(discovery.workspaces).await;
        let validated = Arc::new(validated);

        if discovery.failed_subscriptions.is_empty() && !probe.is_degraded() {
            log::info!("Found {} validated workspaces", validated.len());
            self.cache.insert((), validated.clone());
        } else {
            log::warn!(
                "Workspace listing incomplete ({} of {} probe chunks failed, subscriptions not listed: [{}]); \
                 returning {} workspaces uncached",
                probe.failed_chunks,
                probe.chunks,
                discovery.failed_subscriptions.join(", "),
                validated.len()
            );
        }
        Ok(validated)
    }

    /// First validated workspace, in sorted order, matching `needle`
    pub async fn find(&self, needle: &str) -> Result<Option<Workspace>, CliError> {
        let workspaces = self.list_workspaces().await?;
        Ok(workspaces.iter().find(|ws| ws.matches(needle)).cloned())
    }

    /// Force the next listing to rediscover
    pub fn invalidate(&self) {
        self.cache.clear();
    }

    /// Every workspace visible across all subscriptions, unvalidated.
    ///
    /// Only the subscription listing itself is fatal; a subscription whose
    /// workspaces cannot be listed is skipped and named in the result.
    pub async fn discover(&self) -> Result<Discovery, CliError> {
        let subscriptions: Vec<String> = self
            .cli
            .invoke_list(["account", "list", "--query", "[].id"], ErrorPolicy::Propagate)
            .await?
            .into_iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect();
        log::debug!("Listing workspaces in {} subscriptions", subscriptions.len());

        let listings = join_all(subscriptions.iter().map(|s| self.list_subscription(s))).await;

        let mut discovery = Discovery::default();
        for (subscription, listing) in subscriptions.iter().zip(listings) {
            let rows = match listing {
                Ok(rows) => rows,
                Err(err) => {
                    log::warn!("Could not list workspaces in {}: {}", subscription, err);
                    discovery.failed_subscriptions.push(subscription.clone());
                    continue;
                }
            };
            for row in rows {
                match parse_workspace_row(subscription, &row) {
                    Some(ws) => {
                        discovery.workspaces.insert(ws);
                    }
                    None => log::warn!("Skipping malformed workspace row in {}: {}", subscription, row),
                }
            }
        }
        Ok(discovery)
    }

    async fn list_subscription(&self, subscription: &str) -> Result<Vec<Value>, CliError> {
        let _permit = self.pool.acquire().await.map_err(|_| CliError::PoolClosed)?;
        self.cli
            .invoke_list(
                [
                    "monitor",
                    "log-analytics",
                    "workspace",
                    "list",
                    "--query",
                    WORKSPACE_LIST_QUERY,
                    "--subscription",
                    subscription,
                ],
                ErrorPolicy::Propagate,
            )
            .await
    }

    /// Keep workspaces whose customer id answered the probe, alongside the
    /// probe's own outcome
    pub async fn validate(&self, workspaces: BTreeSet<Workspace>) -> (BTreeSet<Workspace>, FanOutResult) {
        let ids: Vec<String> = workspaces.iter().map(|ws| ws.customer_id.clone()).collect();
        let probe = self
            .executor
            .query_detailed(&ids, &self.probe.query, &self.probe.timespan)
            .await;
        let responded: HashSet<&str> = probe
            .rows
            .iter()
            .filter_map(|row| row.get(&self.probe.field).and_then(Value::as_str))
            .collect();

        let validated = workspaces
            .into_iter()
            .filter(|ws| responded.contains(ws.customer_id.as_str()))
            .collect();
        (validated, probe)
    }
}

fn parse_workspace_row(subscription: &str, row: &Value) -> Option<Workspace> {
    let fields = row.as_array()?;
    let field = |i: usize| fields.get(i).and_then(Value::as_str).map(str::to_string);
    Some(Workspace {
        subscription_id: subscription.to_string(),
        customer_id: field(0)?,
        resource_group: field(1)?,
        name: field(2)?,
    })
}
