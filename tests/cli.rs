use assert_cmd::prelude::*;
use predicates::prelude::*;
use serde_json::{Value, json};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::tempdir;

fn write_config(dir: &Path, base_url: &str, compress: bool) -> PathBuf {
    let path = dir.join("config.yaml");
    let contents = format!(
        "cache_dir: {cache}\nclients:\n  demo:\n    base_url: {base_url}\n    version: v1\n    compress: {compress}\n    rate_limit:\n      attempts: 5\n      decay_minutes: 1\n",
        cache = dir.join("cache").display(),
    );
    fs::write(&path, contents).expect("failed to write config");
    path
}

fn tollgate(config: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("tollgate"));
    cmd.arg("--config")
        .arg(config)
        .env_remove("TOLLGATE_CONFIG")
        .env_remove("TOLLGATE_FORMAT")
        .env_remove("RUST_LOG");
    cmd
}

fn json_stdout(output: &[u8]) -> Value {
    serde_json::from_slice(output).expect("stdout is not JSON")
}

#[test]
fn key_ignores_parameter_order() -> Result<(), Box<dyn std::error::Error>> {
    let temp = tempdir()?;
    let config = write_config(temp.path(), "https://api.example.com", false);

    let first = tollgate(&config)
        .args(["key", "demo", "search", "-p", "q=shoes", "-p", "page=1"])
        .output()?;
    let second = tollgate(&config)
        .args(["key", "demo", "/search/", "-p", "page=1", "-p", "q=shoes"])
        .output()?;

    assert!(first.status.success());
    let key = String::from_utf8(first.stdout)?.trim().to_string();
    assert_eq!(key, String::from_utf8(second.stdout)?.trim());
    assert_eq!(
        key,
        tollgate::cache::cache_key("demo", "search", &json!({"q": "shoes", "page": 1}), "GET", "v1")
    );
    Ok(())
}

#[test]
fn cache_path_uses_configured_dir() -> Result<(), Box<dyn std::error::Error>> {
    let temp = tempdir()?;
    let config = write_config(temp.path(), "https://api.example.com", false);

    let assert = tollgate(&config)
        .args(["cache", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains("cache.db"));

    let stdout = String::from_utf8_lossy(&assert.get_output().stdout);
    assert!(stdout.contains(&temp.path().join("cache").display().to_string()));
    Ok(())
}

#[test]
fn cache_table_follows_compression() -> Result<(), Box<dyn std::error::Error>> {
    let temp = tempdir()?;
    let config = write_config(temp.path(), "https://api.example.com", true);

    let output = tollgate(&config).args(["cache", "table", "demo"]).output()?;
    assert!(output.status.success());
    assert_eq!(String::from_utf8(output.stdout)?.trim(), "demo_responses_compressed");
    Ok(())
}

#[test]
fn webhook_postback_from_file_is_stored() -> Result<(), Box<dyn std::error::Error>> {
    let temp = tempdir()?;
    let config = write_config(temp.path(), "https://api.example.com", true);
    let body = temp.path().join("delivery.json");
    fs::write(
        &body,
        serde_json::to_vec(&json!({
            "status_code": 20000,
            "tasks": [{
                "id": "T1",
                "status_code": 20000,
                "path": ["v1", "serp", "task_get", "advanced", "T1"],
                "data": {"keyword": "shoes"}
            }]
        }))?,
    )?;

    let output = tollgate(&config)
        .args(["--format", "json", "webhook", "postback", "demo", "--tag", "k-123", "--file"])
        .arg(&body)
        .output()?;
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let delivered = json_stdout(&output.stdout);
    assert_eq!(delivered["data"]["cache_key"], "k-123");
    assert_eq!(delivered["data"]["endpoint"], "serp/task_get/advanced");
    assert_eq!(delivered["data"]["tag_supplied"], true);
    assert!(delivered["meta"]["version"].is_string());

    let status = tollgate(&config)
        .args(["--format", "json", "cache", "status"])
        .output()?;
    let status = json_stdout(&status.stdout);
    assert_eq!(status["data"]["tables"][0]["table"], "demo_responses_compressed");
    assert_eq!(status["data"]["tables"][0]["entries"], 1);

    let cleared = tollgate(&config)
        .args(["--format", "json", "cache", "clear", "--client", "demo"])
        .output()?;
    assert_eq!(json_stdout(&cleared.stdout)["data"]["entries_removed"], 1);
    Ok(())
}

#[test]
fn webhook_postback_rejects_provider_failure() -> Result<(), Box<dyn std::error::Error>> {
    let temp = tempdir()?;
    let config = write_config(temp.path(), "https://api.example.com", false);
    let body = temp.path().join("failed.json");
    fs::write(&body, r#"{"status_code": 40501, "status_message": "Invalid Field"}"#)?;

    let output = tollgate(&config)
        .args(["webhook", "postback", "demo", "--file"])
        .arg(&body)
        .output()?;

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("40501"), "unexpected stderr: {}", stderr);
    Ok(())
}

#[test]
fn quota_of_unknown_client_fails() -> Result<(), Box<dyn std::error::Error>> {
    let temp = tempdir()?;
    let config = write_config(temp.path(), "https://api.example.com", false);

    let output = tollgate(&config).args(["quota", "nope"]).output()?;
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("'nope' is not configured"));
    Ok(())
}

#[test]
fn quota_starts_empty() -> Result<(), Box<dyn std::error::Error>> {
    let temp = tempdir()?;
    let config = write_config(temp.path(), "https://api.example.com", false);

    let output = tollgate(&config)
        .args(["--format", "json", "quota", "demo"])
        .output()?;
    assert!(output.status.success());

    let quota = json_stdout(&output.stdout);
    assert_eq!(quota["data"]["attempts"], 0);
    assert_eq!(quota["data"]["remaining"], 5);
    Ok(())
}

#[test]
fn completion_generates_script() -> Result<(), Box<dyn std::error::Error>> {
    let output = Command::new(assert_cmd::cargo::cargo_bin!("tollgate"))
        .args(["completion", "bash"])
        .output()?;
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("tollgate"));
    Ok(())
}

#[cfg_attr(not(feature = "http-tests"), ignore)]
#[test]
fn request_is_served_from_cache_second_time() -> Result<(), Box<dyn std::error::Error>> {
    let mut server = mockito::Server::new();
    let upstream = server
        .mock("GET", "/v1/search")
        .match_query(mockito::Matcher::Any)
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"items": ["a", "b"]}"#)
        .expect(1)
        .create();

    let temp = tempdir()?;
    let config = write_config(temp.path(), &server.url(), false);

    let mut cached = Vec::new();
    for params in [["q=shoes", "page=1"], ["page=1", "q=shoes"]] {
        let output = tollgate(&config)
            .args(["--format", "json", "request", "demo", "search"])
            .args(["-p", params[0], "-p", params[1]])
            .output()?;
        assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
        let result = json_stdout(&output.stdout);
        assert_eq!(result["data"]["response"]["items"][1], "b");
        cached.push(result["data"]["is_cached"].clone());
    }

    assert_eq!(cached, vec![json!(false), json!(true)]);
    upstream.assert();
    Ok(())
}
