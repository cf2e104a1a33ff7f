//! Fan-out analytics queries
//!
//! A query over many workspaces is split into chunks of at most
//! `chunk_size` ids (the control plane accepts one primary workspace plus a
//! list of supplementary ones per invocation). Chunks run concurrently,
//! bounded by the shared worker pool, and their rows are concatenated in
//! chunk order, never completion order.
//!
//! A failing chunk is logged and dropped; the rest of the result stands.

use crate::azcli::{CliClient, ErrorPolicy};
use crate::error::CliError;
use futures_util::future::join_all;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Control-plane limit on workspaces per query invocation
pub const DEFAULT_CHUNK_SIZE: usize = 30;

/// One query invocation's worth of workspaces
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryChunk {
    pub primary: String,
    pub others: Vec<String>,
}

impl QueryChunk {
    pub fn len(&self) -> usize {
        1 + self.others.len()
    }

    /// Arguments for `monitor log-analytics query` over this chunk
    pub fn command(&self, query: &str, timespan: &str) -> Vec<String> {
        let mut args: Vec<String> = [
            "monitor",
            "log-analytics",
            "query",
            "--workspace",
            self.primary.as_str(),
            "--analytics-query",
            query,
            "--timespan",
            timespan,
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        if !self.others.is_empty() {
            args.push("--workspaces".to_string());
            args.extend(self.others.iter().cloned());
        }
        args
    }
}

/// Sort and dedupe `workspace_ids`, then split them into chunks of `chunk_size`
pub fn chunk_workspaces(workspace_ids: &[String], chunk_size: usize) -> Vec<QueryChunk> {
    let mut ids: Vec<&String> = workspace_ids.iter().collect();
    ids.sort();
    ids.dedup();

    ids.chunks(chunk_size.max(1))
        .map(|chunk| QueryChunk {
            primary: chunk[0].clone(),
            others: chunk[1..].iter().map(|s| s.to_string()).collect(),
        })
        .collect()
}

/// Rows from every chunk that succeeded, plus how many did not
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FanOutResult {
    pub rows: Vec<Value>,
    pub chunks: usize,
    pub failed_chunks: usize,
}

impl FanOutResult {
    /// True when at least one chunk failed, so `rows` may be incomplete
    pub fn is_degraded(&self) -> bool {
        self.failed_chunks > 0
    }
}

pub struct FanOutExecutor {
    cli: Arc<CliClient>,
    pool: Arc<Semaphore>,
    chunk_size: usize,
}

impl FanOutExecutor {
    pub fn new(cli: Arc<CliClient>, pool: Arc<Semaphore>, chunk_size: usize) -> Self {
        Self {
            cli,
            pool,
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Rows of `query_text` over every workspace, failed chunks silently dropped
    pub async fn query(&self, workspace_ids: &[String], query_text: &str, timespan: &str) -> Vec<Value> {
        self.query_detailed(workspace_ids, query_text, timespan).await.rows
    }

    pub async fn query_detailed(&self, workspace_ids: &[String], query_text: &str, timespan: &str) -> FanOutResult {
        let chunks = chunk_workspaces(workspace_ids, self.chunk_size);
        log::debug!(
            "Querying {} workspaces in {} chunks",
            workspace_ids.len(),
            chunks.len()
        );

        let pending = chunks
            .iter()
            .map(|chunk| self.run_chunk(chunk.command(query_text, timespan)));
        let results = join_all(pending).await;

        let mut outcome = FanOutResult {
            chunks: chunks.len(),
            ..Default::default()
        };
        for (index, (chunk, result)) in chunks.iter().zip(results).enumerate() {
            match result {
                Ok(rows) => outcome.rows.extend(rows),
                Err(err) => {
                    log::warn!(
                        "Query chunk {}/{} (primary workspace {}, {} workspaces) failed: {}",
                        index + 1,
                        outcome.chunks,
                        chunk.primary,
                        chunk.len(),
                        err
                    );
                    outcome.failed_chunks += 1;
                }
            }
        }

        if outcome.chunks > 0 && outcome.failed_chunks == outcome.chunks {
            log::error!("All {} query chunks failed", outcome.chunks);
        }
        outcome
    }

    async fn run_chunk(&self, args: Vec<String>) -> Result<Vec<Value>, CliError> {
        let _permit = self.pool.acquire().await.map_err(|_| CliError::PoolClosed)?;
        self.cli.invoke_list(args, ErrorPolicy::Propagate).await
    }
}
