//! In-memory control plane, upstreams and clock shared by unit tests

use crate::cache::Clock;
use crate::common::command_utils::{CommandOutput, CommandRunner};
use crate::error::{CliError, ProxyError};
use crate::proxy::{ProxyTarget, Upstream, UpstreamConnector, UpstreamRequest, UpstreamResponse};
use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, HeaderValue, StatusCode};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Instant>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Instant::now()),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock() += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock()
    }
}

type Handler = Box<dyn Fn(&[String]) -> CommandOutput + Send + Sync>;

/// Answers commands from a closure and records every call.
///
/// `account show` is answered with a logged-in account unless
/// [`logged_out`](Self::logged_out) is set. Arguments passed to the handler
/// and recorded in `calls` have the fixed output flags stripped.
pub struct ScriptedRunner {
    handler: Handler,
    calls: Mutex<Vec<Vec<String>>>,
    logged_in: bool,
    delay: Option<Duration>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl ScriptedRunner {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&[String]) -> CommandOutput + Send + Sync + 'static,
    {
        Self {
            handler: Box::new(handler),
            calls: Mutex::new(Vec::new()),
            logged_in: true,
            delay: None,
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn logged_out(mut self) -> Self {
        self.logged_in = false;
        self
    }

    /// Sleep this long inside every call, to observe concurrency
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().clone()
    }

    pub fn count_calls<P>(&self, predicate: P) -> usize
    where
        P: Fn(&[String]) -> bool,
    {
        self.calls.lock().iter().filter(|c| predicate(c.as_slice())).count()
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    pub fn ok_json(value: Value) -> CommandOutput {
        Self::ok_raw(&value.to_string())
    }

    pub fn ok_raw(stdout: &str) -> CommandOutput {
        CommandOutput {
            status: 0,
            stdout: stdout.to_string(),
            stderr: String::new(),
        }
    }

    pub fn failed(stderr: &str) -> CommandOutput {
        CommandOutput {
            status: 1,
            stdout: String::new(),
            stderr: stderr.to_string(),
        }
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, _program: &str, args: &[String]) -> Result<CommandOutput, CliError> {
        let args: Vec<String> = match args.iter().position(|a| a == "--only-show-errors") {
            Some(idx) => args[..idx].to_vec(),
            None => args.to_vec(),
        };
        self.calls.lock().push(args.clone());

        if args.len() >= 2 && args[0] == "account" && args[1] == "show" {
            return Ok(if self.logged_in {
                Self::ok_json(serde_json::json!({"environmentName": "AzureCloud"}))
            } else {
                Self::failed("Please run 'az login' to setup account.")
            });
        }

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let output = (self.handler)(&args);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(output)
    }
}

/// Upstream that records every request and answers with one canned response
pub struct RecordingUpstream {
    base_url: String,
    response: UpstreamResponse,
    seen: Mutex<Vec<UpstreamRequest>>,
}

impl RecordingUpstream {
    pub fn new(base_url: &str, response: UpstreamResponse) -> Self {
        Self {
            base_url: base_url.to_string(),
            response,
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<UpstreamRequest> {
        self.seen.lock().clone()
    }

    /// Response with the given status, headers and a short text body
    pub fn canned(status: StatusCode, headers: &[(&'static str, &'static str)]) -> UpstreamResponse {
        let mut map = HeaderMap::new();
        for (name, value) in headers {
            map.append(*name, HeaderValue::from_static(*value));
        }
        UpstreamResponse {
            status,
            headers: map,
            body: Bytes::from_static(b"upstream body"),
        }
    }
}

#[async_trait]
impl Upstream for RecordingUpstream {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn send(&self, request: UpstreamRequest) -> Result<UpstreamResponse, ProxyError> {
        self.seen.lock().push(request);
        Ok(self.response.clone())
    }
}

/// Upstream whose connection always fails
pub struct UnreachableUpstream {
    base_url: String,
}

impl UnreachableUpstream {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.to_string(),
        }
    }
}

#[async_trait]
impl Upstream for UnreachableUpstream {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn send(&self, request: UpstreamRequest) -> Result<UpstreamResponse, ProxyError> {
        Err(ProxyError::Upstream(format!(
            "error sending request for url ({}/{}): connection refused",
            self.base_url, request.path
        )))
    }
}

/// Hands out the same upstream for every target
pub struct FixedConnector(pub Arc<dyn Upstream>);

impl UpstreamConnector for FixedConnector {
    fn connect(&self, _target: &ProxyTarget) -> Result<Arc<dyn Upstream>, ProxyError> {
        Ok(self.0.clone())
    }
}
