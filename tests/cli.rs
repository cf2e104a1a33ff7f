use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// Binary run from an empty directory with no global config
fn siem_query(home: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("siem-query").unwrap();
    cmd.current_dir(home.path())
        .env("HOME", home.path())
        .env_remove("KEYVAULT_SESSION_SECRET")
        .env_remove("API_TOKEN")
        .env_remove("MAX_THREADS")
        .env_remove("IDENTITY_HEADER");
    cmd
}

#[test]
fn test_help_lists_subcommands() {
    let home = TempDir::new().unwrap();
    siem_query(&home)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("serve"))
        .stdout(predicate::str::contains("action"))
        .stdout(predicate::str::contains("session"));
}

#[test]
fn test_actions_are_listed() {
    let home = TempDir::new().unwrap();
    siem_query(&home)
        .arg("actions")
        .assert()
        .success()
        .stdout("listWorkspaces\nglobalQuery\nsimpleQuery\n");
}

#[test]
fn test_unknown_action_fails_before_touching_the_control_plane() {
    let home = TempDir::new().unwrap();
    siem_query(&home)
        .args(["action", "dropTables"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown action 'dropTables'"))
        .stderr(predicate::str::contains("listWorkspaces"));
}

#[test]
fn test_session_encode_then_validate() {
    let home = TempDir::new().unwrap();
    let output = siem_query(&home)
        .args(["session", "encode", r#"{"proxy_grafana": {"base_url": "https://grafana.example"}}"#])
        .output()
        .unwrap();
    assert!(output.status.success());
    let blob = String::from_utf8(output.stdout).unwrap().trim().to_string();

    siem_query(&home)
        .args(["session", "validate", &blob])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"grafana\": \"https://grafana.example\""))
        .stdout(predicate::str::contains("\"httpbin\": \"https://httpbin.org\""));
}

#[test]
fn test_session_encode_reads_stdin() {
    let home = TempDir::new().unwrap();
    siem_query(&home)
        .args(["session", "encode"])
        .write_stdin(r#"{"main_path": "/x"}"#)
        .assert()
        .success()
        .stdout(predicate::str::is_empty().not());
}

#[test]
fn test_invalid_session_is_rejected() {
    let home = TempDir::new().unwrap();
    siem_query(&home)
        .args(["session", "validate", "bm90IGpzb24="])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load session data"));
}

#[test]
fn test_broken_local_config_is_reported() {
    let home = TempDir::new().unwrap();
    std::fs::write(home.path().join(".siem-query.toml"), "[query\nmax_threads = ").unwrap();
    siem_query(&home)
        .arg("actions")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to parse configuration"));
}
