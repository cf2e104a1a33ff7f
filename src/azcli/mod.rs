//! Control-plane CLI client
//!
//! Every command goes out as `<binary> <args...> --only-show-errors -o json`
//! and its stdout is parsed as JSON. Successful results are memoized per exact
//! argument list so repeated calls inside the TTL window never spawn a
//! process. Failures are never cached.
//!
//! Each call site chooses an [`ErrorPolicy`]: propagate the failure, or log it
//! and substitute a fallback value.

pub mod auth;

pub use auth::{Authenticator, LoginMethod};

use crate::cache::TtlCache;
use crate::common::command_utils::CommandRunner;
use crate::error::CliError;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Flags appended to every control-plane command
pub const FIXED_FLAGS: [&str; 3] = ["--only-show-errors", "-o", "json"];

const LOGGED_COMMAND_LEN: usize = 160;

/// What to do when a command fails
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorPolicy {
    Propagate,
    /// Log the failure and return this value instead
    Fallback(Value),
}

pub struct CliClient {
    binary: String,
    runner: Arc<dyn CommandRunner>,
    auth: Authenticator,
    cache: TtlCache<Vec<String>, Option<Value>>,
}

impl CliClient {
    pub fn new(
        binary: impl Into<String>,
        runner: Arc<dyn CommandRunner>,
        auth: Authenticator,
        cache: TtlCache<Vec<String>, Option<Value>>,
    ) -> Self {
        Self {
            binary: binary.into(),
            runner,
            auth,
            cache,
        }
    }

    /// Client with the default 60 second command cache
    pub fn with_defaults(binary: impl Into<String>, runner: Arc<dyn CommandRunner>, method: LoginMethod) -> Self {
        Self::new(
            binary,
            runner,
            Authenticator::new(method, Duration::from_secs(60 * 60)),
            TtlCache::new(25600, Duration::from_secs(60)),
        )
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }

    /// Run a control-plane command.
    ///
    /// Returns `Ok(None)` when the command printed nothing. Authentication
    /// failures are always returned, whatever the policy.
    pub async fn invoke<I, S>(&self, args: I, on_error: ErrorPolicy) -> Result<Option<Value>, CliError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.auth.ensure(&self.binary, self.runner.as_ref()).await?;

        let key: Vec<String> = args.into_iter().map(Into::into).collect();
        let result = self
            .cache
            .get_or_try_compute(key.clone(), || self.run_uncached(&key))
            .await;

        match (result, on_error) {
            (Ok(value), _) => Ok(value),
            (Err(err), ErrorPolicy::Fallback(fallback)) => {
                log::warn!("{}", err);
                Ok(Some(fallback))
            }
            (Err(err), ErrorPolicy::Propagate) => Err(err),
        }
    }

    /// Run a command whose output is a JSON array. No output is an empty list.
    pub async fn invoke_list<I, S>(&self, args: I, on_error: ErrorPolicy) -> Result<Vec<Value>, CliError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        match self.invoke(args, on_error).await? {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(Value::Array(items)) => Ok(items),
            Some(other) => Err(CliError::UnexpectedShape(format!(
                "expected a JSON array, got {}",
                truncate(&other.to_string(), LOGGED_COMMAND_LEN)
            ))),
        }
    }

    /// Allow the CLI to install extensions without prompting. Failure is only logged.
    pub async fn prepare(&self) -> Result<(), CliError> {
        self.invoke(
            ["config", "set", "extension.use_dynamic_install=yes_without_prompt"],
            ErrorPolicy::Fallback(Value::Null),
        )
        .await
        .map(|_| ())
    }

    /// Forget every memoized command result
    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    async fn run_uncached(&self, args: &[String]) -> Result<Option<Value>, CliError> {
        let mut full: Vec<String> = args.to_vec();
        full.extend(FIXED_FLAGS.iter().map(|s| s.to_string()));

        let printable = format!("{} {}", self.binary, full.join(" ")).replace('\n', " ");
        log::debug!("{}", truncate(printable.trim(), LOGGED_COMMAND_LEN));

        let output = self.runner.run(&self.binary, &full).await?;
        if !output.success() {
            return Err(CliError::Failed {
                status: output.status,
                stderr: output.stderr.trim().to_string(),
            });
        }

        let stdout = output.stdout.trim();
        if stdout.is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(stdout)?))
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedRunner;
    use serde_json::json;

    fn client(runner: Arc<ScriptedRunner>) -> CliClient {
        CliClient::with_defaults("az", runner, LoginMethod::ExistingSession)
    }

    #[tokio::test]
    async fn test_appends_fixed_flags_and_parses_json() {
        let runner = Arc::new(ScriptedRunner::new(|_| ScriptedRunner::ok_json(json!({"id": "sub-1"}))));
        let cli = client(runner.clone());

        let value = cli.invoke(["account", "list"], ErrorPolicy::Propagate).await.unwrap();
        assert_eq!(value, Some(json!({"id": "sub-1"})));

        let calls = runner.calls();
        let list = calls.iter().find(|c| c[0] == "account" && c[1] == "list").unwrap();
        assert_eq!(list, &["account", "list", "--only-show-errors", "-o", "json"]);
    }

    #[tokio::test]
    async fn test_identical_calls_are_memoized() {
        let runner = Arc::new(ScriptedRunner::new(|_| ScriptedRunner::ok_json(json!([1, 2]))));
        let cli = client(runner.clone());

        for _ in 0..3 {
            cli.invoke(["monitor", "x"], ErrorPolicy::Propagate).await.unwrap();
        }
        cli.invoke(["monitor", "y"], ErrorPolicy::Propagate).await.unwrap();

        assert_eq!(runner.count_calls(|a| a[0] == "monitor" && a[1] == "x"), 1);
        assert_eq!(runner.count_calls(|a| a[0] == "monitor" && a[1] == "y"), 1);

        cli.clear_cache();
        cli.invoke(["monitor", "x"], ErrorPolicy::Propagate).await.unwrap();
        assert_eq!(runner.count_calls(|a| a[0] == "monitor" && a[1] == "x"), 2);
    }

    #[tokio::test]
    async fn test_empty_output_is_no_result() {
        let runner = Arc::new(ScriptedRunner::new(|_| ScriptedRunner::ok_raw("  \n")));
        let cli = client(runner);
        assert_eq!(cli.invoke(["a"], ErrorPolicy::Propagate).await.unwrap(), None);
        assert!(cli.invoke_list(["a"], ErrorPolicy::Propagate).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_error_policy() {
        let runner = Arc::new(ScriptedRunner::new(|_| ScriptedRunner::failed("ERROR: workspace not found")));
        let cli = client(runner.clone());

        let err = cli.invoke(["bad"], ErrorPolicy::Propagate).await.unwrap_err();
        match err {
            CliError::Failed { stderr, .. } => assert_eq!(stderr, "ERROR: workspace not found"),
            other => panic!("unexpected error {other:?}"),
        }

        let value = cli
            .invoke(["bad"], ErrorPolicy::Fallback(json!({"error": "fallback"})))
            .await
            .unwrap();
        assert_eq!(value, Some(json!({"error": "fallback"})));
        // failures are not memoized
        assert_eq!(runner.count_calls(|a| a[0] == "bad"), 2);
    }

    #[tokio::test]
    async fn test_unauthenticated_ignores_fallback() {
        let runner = Arc::new(ScriptedRunner::new(|_| ScriptedRunner::ok_json(json!([]))).logged_out());
        let cli = client(runner.clone());

        let err = cli
            .invoke(["account", "list"], ErrorPolicy::Fallback(json!([])))
            .await
            .unwrap_err();
        assert!(matches!(err, CliError::NotAuthenticated(_)));
        assert_eq!(runner.count_calls(|a| a[0] == "account" && a[1] == "list"), 0);
    }

    #[tokio::test]
    async fn test_invoke_list_rejects_objects() {
        let runner = Arc::new(ScriptedRunner::new(|_| ScriptedRunner::ok_json(json!({"not": "a list"}))));
        let cli = client(runner);
        let err = cli.invoke_list(["a"], ErrorPolicy::Propagate).await.unwrap_err();
        assert!(matches!(err, CliError::UnexpectedShape(_)));
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("hi", 10), "hi");
    }
}
