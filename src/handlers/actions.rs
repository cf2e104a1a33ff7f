use crate::context::AppContext;
use crate::error::{Error, Result};
use crate::query::FanOutResult;
use crate::workspace::Workspace;
use serde_json::Value;

/// Named query actions, callable from the command line and over HTTP
pub const ACTIONS: &[&str] = &["listWorkspaces", "globalQuery", "simpleQuery"];

/// Run the action `name` with positional `args` and return its JSON result
pub async fn run_action(ctx: &AppContext, name: &str, args: &[String]) -> Result<Value> {
    log::info!("Running action {} with {} arguments", name, args.len());
    match name {
        "listWorkspaces" => {
            expect_args(name, args, 0, 0)?;
            let workspaces: Vec<Workspace> = list_workspaces(ctx).await?;
            Ok(serde_json::to_value(workspaces)?)
        }
        "globalQuery" => {
            expect_args(name, args, 1, 2)?;
            let timespan = args.get(1).unwrap_or(&ctx.config.query.default_timespan);
            let result = global_query(ctx, &args[0], timespan).await?;
            Ok(serde_json::to_value(result)?)
        }
        "simpleQuery" => {
            expect_args(name, args, 2, 2)?;
            let result = simple_query(ctx, &args[0], &args[1]).await?;
            Ok(serde_json::to_value(result)?)
        }
        _ => Err(Error::UnknownAction {
            name: name.to_string(),
            valid: ACTIONS.join(", "),
        }),
    }
}

pub async fn list_workspaces(ctx: &AppContext) -> Result<Vec<Workspace>> {
    let workspaces = ctx.workspaces.list_workspaces().await?;
    Ok(workspaces.iter().cloned().collect())
}

/// `query` over every validated workspace
pub async fn global_query(ctx: &AppContext, query: &str, timespan: &str) -> Result<FanOutResult> {
    let ids: Vec<String> = ctx
        .workspaces
        .list_workspaces()
        .await?
        .iter()
        .map(|ws| ws.customer_id.clone())
        .collect();
    Ok(ctx.executor.query_detailed(&ids, query, timespan).await)
}

/// `query` over the first validated workspace matching `name`; empty if none do
pub async fn simple_query(ctx: &AppContext, query: &str, name: &str) -> Result<FanOutResult> {
    let Some(workspace) = ctx.workspaces.find(name).await? else {
        log::warn!("No workspace matches '{}'", name);
        return Ok(FanOutResult::default());
    };
    log::debug!("Querying workspace {}", workspace);
    Ok(ctx
        .executor
        .query_detailed(&[workspace.customer_id], query, &ctx.config.query.default_timespan)
        .await)
}

fn expect_args(name: &str, args: &[String], min: usize, max: usize) -> Result<()> {
    if args.len() < min || args.len() > max {
        let expected = if min == max {
            min.to_string()
        } else {
            format!("{} to {}", min, max)
        };
        return Err(Error::InvalidArguments(format!(
            "{} takes {} arguments, got {}",
            name,
            expected,
            args.len()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::command_utils::CommandOutput;
    use crate::config::types::Config;
    use crate::proxy::HttpConnector;
    use crate::session::StaticSecret;
    use crate::testing::ScriptedRunner;
    use serde_json::json;
    use std::sync::Arc;

    fn control_plane(args: &[String]) -> CommandOutput {
        let joined = args.join(" ");
        if joined.starts_with("account list") {
            return ScriptedRunner::ok_json(json!(["sub-a"]));
        }
        if joined.starts_with("monitor log-analytics workspace list") {
            return ScriptedRunner::ok_json(json!([
                ["cid-1", "rg-soc", "alpha"],
                ["cid-2", "rg-soc", "bravo"]
            ]));
        }
        if joined.contains("SecurityIncident | distinct TenantId") {
            return ScriptedRunner::ok_json(json!([{"TenantId": "cid-1"}, {"TenantId": "cid-2"}]));
        }
        if joined.starts_with("monitor log-analytics query") {
            let primary = args.iter().position(|a| a == "--workspace").map(|i| args[i + 1].clone());
            return ScriptedRunner::ok_json(json!([{"workspace": primary, "count": 3}]));
        }
        ScriptedRunner::failed("unexpected command")
    }

    fn context() -> (AppContext, Arc<ScriptedRunner>) {
        let runner = Arc::new(ScriptedRunner::new(control_plane));
        let ctx = AppContext::build(
            Config::default(),
            runner.clone(),
            Arc::new(HttpConnector::default()),
            Some(Arc::new(StaticSecret(String::new()))),
        );
        (ctx, runner)
    }

    #[tokio::test]
    async fn test_list_workspaces_action() {
        let (ctx, _) = context();
        let value = run_action(&ctx, "listWorkspaces", &[]).await.unwrap();
        let names: Vec<&str> = value
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|ws| ws["name"].as_str())
            .collect();
        assert_eq!(names, vec!["alpha", "bravo"]);
    }

    #[tokio::test]
    async fn test_global_query_uses_default_timespan() {
        let (ctx, runner) = context();
        let value = run_action(&ctx, "globalQuery", &["SecurityIncident | count".to_string()])
            .await
            .unwrap();
        assert_eq!(value["chunks"], 1);
        assert_eq!(value["failed_chunks"], 0);
        assert_eq!(value["rows"][0]["workspace"], "cid-1");

        let call = runner
            .calls()
            .into_iter()
            .find(|c| c.contains(&"SecurityIncident | count".to_string()))
            .unwrap();
        assert!(call.contains(&"P7D".to_string()));
        assert!(call.contains(&"cid-2".to_string()));
    }

    #[tokio::test]
    async fn test_simple_query_targets_matching_workspace() {
        let (ctx, _) = context();
        let args = vec!["Heartbeat | count".to_string(), "bravo".to_string()];
        let value = run_action(&ctx, "simpleQuery", &args).await.unwrap();
        assert_eq!(value["rows"][0]["workspace"], "cid-2");

        let args = vec!["Heartbeat | count".to_string(), "zulu".to_string()];
        let value = run_action(&ctx, "simpleQuery", &args).await.unwrap();
        assert_eq!(value["rows"], json!([]));
        assert_eq!(value["chunks"], 0);
    }

    #[tokio::test]
    async fn test_unknown_action_and_bad_arguments() {
        let (ctx, _) = context();
        match run_action(&ctx, "dropTables", &[]).await {
            Err(Error::UnknownAction { valid, .. }) => assert!(valid.contains("globalQuery")),
            other => panic!("unexpected result {other:?}"),
        }
        assert!(matches!(
            run_action(&ctx, "simpleQuery", &["only one".to_string()]).await,
            Err(Error::InvalidArguments(_))
        ));
    }
}
