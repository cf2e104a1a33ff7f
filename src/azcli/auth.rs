//! Login state for the control-plane CLI
//!
//! The CLI keeps its own token cache on disk; all this tracks is whether we
//! have confirmed a usable login recently. Logins older than `max_age` are
//! refreshed before the next command runs.

use super::FIXED_FLAGS;
use crate::cache::{Clock, SystemClock};
use crate::common::command_utils::CommandRunner;
use crate::error::CliError;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// How the process obtains a control-plane login
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginMethod {
    /// `login --identity` with the host's managed identity
    ManagedIdentity,
    /// Require an existing interactive login (`account show`)
    ExistingSession,
}

#[derive(Debug, Default)]
struct LoginState {
    logged_in: bool,
    login_time: Option<Instant>,
}

pub struct Authenticator {
    method: LoginMethod,
    max_age: Duration,
    state: Mutex<LoginState>,
    clock: Arc<dyn Clock>,
}

impl Authenticator {
    pub fn new(method: LoginMethod, max_age: Duration) -> Self {
        Self {
            method,
            max_age,
            state: Mutex::new(LoginState::default()),
            clock: Arc::new(SystemClock),
        }
    }

    #[cfg(test)]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[cfg(test)]
    async fn is_logged_in(&self) -> bool {
        self.state.lock().await.logged_in
    }

    /// Make sure a fresh login exists, logging in or refreshing as needed.
    ///
    /// Holds the state lock for the duration of a login so concurrent callers
    /// wait for one login instead of racing several.
    pub async fn ensure(&self, binary: &str, runner: &dyn CommandRunner) -> Result<(), CliError> {
        let mut state = self.state.lock().await;
        let now = self.clock.now();

        let stale = match state.login_time {
            Some(at) => now.duration_since(at) > self.max_age,
            None => true,
        };
        if state.logged_in && !stale {
            return Ok(());
        }

        let refresh = state.logged_in;
        state.logged_in = false;
        self.login(binary, runner, refresh).await?;
        state.logged_in = true;
        state.login_time = Some(self.clock.now());
        Ok(())
    }

    async fn login(&self, binary: &str, runner: &dyn CommandRunner, refresh: bool) -> Result<(), CliError> {
        match self.method {
            LoginMethod::ManagedIdentity => {
                if refresh {
                    let output = runner.run(binary, &with_flags(&["logout"])).await?;
                    if !output.success() {
                        log::debug!("logout before refresh failed: {}", output.stderr.trim());
                    }
                }
                log::info!("Logging in to the control plane with managed identity");
                let output = runner.run(binary, &with_flags(&["login", "--identity"])).await?;
                if !output.success() {
                    log::error!("{}", output.stderr.trim());
                    return Err(CliError::NotAuthenticated(output.stderr.trim().to_string()));
                }
                Ok(())
            }
            LoginMethod::ExistingSession => {
                let output = runner.run(binary, &with_flags(&["account", "show"])).await?;
                let account: Option<serde_json::Value> = if output.success() {
                    serde_json::from_str(&output.stdout).ok()
                } else {
                    None
                };
                match account {
                    Some(account) if account.get("environmentName").is_some() => Ok(()),
                    _ => {
                        let reason = if output.stderr.trim().is_empty() {
                            format!("no active login, run `{} login` first", binary)
                        } else {
                            output.stderr.trim().to_string()
                        };
                        log::error!("{}", reason);
                        Err(CliError::NotAuthenticated(reason))
                    }
                }
            }
        }
    }
}

fn with_flags(args: &[&str]) -> Vec<String> {
    args.iter()
        .chain(FIXED_FLAGS.iter())
        .map(|s| s.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ManualClock, ScriptedRunner};

    #[tokio::test]
    async fn test_existing_session_logs_in_once() {
        let runner = ScriptedRunner::new(|_| ScriptedRunner::ok_json(serde_json::json!([])));
        let auth = Authenticator::new(LoginMethod::ExistingSession, Duration::from_secs(3600));

        auth.ensure("az", &runner).await.unwrap();
        auth.ensure("az", &runner).await.unwrap();

        assert!(auth.is_logged_in().await);
        assert_eq!(runner.count_calls(|args| args[0] == "account" && args[1] == "show"), 1);
    }

    #[tokio::test]
    async fn test_logged_out_fails_fast() {
        let runner = ScriptedRunner::new(|_| ScriptedRunner::ok_json(serde_json::json!([]))).logged_out();
        let auth = Authenticator::new(LoginMethod::ExistingSession, Duration::from_secs(3600));

        let err = auth.ensure("az", &runner).await.unwrap_err();
        assert!(matches!(err, CliError::NotAuthenticated(_)));
        assert!(!auth.is_logged_in().await);
    }

    #[tokio::test]
    async fn test_identity_login_refreshes_after_max_age() {
        let runner = ScriptedRunner::new(|_| ScriptedRunner::ok_json(serde_json::json!({})));
        let clock = Arc::new(ManualClock::new());
        let auth = Authenticator::new(LoginMethod::ManagedIdentity, Duration::from_secs(3600))
            .with_clock(clock.clone());

        auth.ensure("az", &runner).await.unwrap();
        clock.advance(Duration::from_secs(3601));
        auth.ensure("az", &runner).await.unwrap();

        assert_eq!(runner.count_calls(|args| args[0] == "login"), 2);
        assert_eq!(runner.count_calls(|args| args[0] == "logout"), 1);
    }
}
