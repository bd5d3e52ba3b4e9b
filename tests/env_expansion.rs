//! Integration tests for the full Config::from_file_with_env pipeline.
//!
//! These tests exercise the end-to-end flow: TOML file -> raw parse -> env var
//! expansion -> validation -> final Config with KeySource metadata.
//!
//! Each test uses its own env var names to avoid parallel test interference.

use std::io::Write;

use retrygate::config::{Config, KeySource};
use tempfile::NamedTempFile;

fn write_config(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("create temp config");
    file.write_all(content.as_bytes())
        .expect("write temp config");
    file
}

fn key_source<'a>(sources: &'a [(String, KeySource)], group: &str) -> &'a KeySource {
    sources
        .iter()
        .find(|(name, _)| name == group)
        .map(|(_, s)| s)
        .unwrap_or_else(|| panic!("key source for '{}' should exist", group))
}

/// ${VAR} references in api_key are expanded from the environment.
#[test]
fn test_env_expansion_resolves_api_key() {
    let var_name = "RETRYGATE_TEST_E2E_01_KEY";
    unsafe { std::env::set_var(var_name, "s3cr3t-resolved") };

    let file = write_config(&format!(
        r#"
[server]
listen = "127.0.0.1:19876"

[[upstreams]]
id = "env-test"
prefix = "/env"
api_key = "${{{}}}"

[[upstreams.endpoints]]
url = "10.0.0.1:8080"
"#,
        var_name
    ));

    let (config, key_sources) =
        Config::from_file_with_env(file.path()).expect("config should load");

    let group = config
        .upstreams
        .iter()
        .find(|g| g.id == "env-test")
        .expect("group 'env-test' should exist");
    assert_eq!(
        group.api_key.as_ref().unwrap().expose_secret(),
        "s3cr3t-resolved"
    );
    assert_eq!(*key_source(&key_sources, "env-test"), KeySource::EnvExpanded);

    unsafe { std::env::remove_var(var_name) };
}

/// Missing env vars produce errors naming both the variable and the group.
#[test]
fn test_env_expansion_missing_var_errors() {
    let var_name = "RETRYGATE_TEST_E2E_02_MISSING";
    unsafe { std::env::remove_var(var_name) };

    let file = write_config(&format!(
        r#"
[server]
listen = "127.0.0.1:19877"

[[upstreams]]
id = "missing-test"
prefix = "/missing"
api_key = "${{{}}}"
"#,
        var_name
    ));

    let err = Config::from_file_with_env(file.path())
        .unwrap_err()
        .to_string();
    assert!(err.contains(var_name), "error should name the variable: {}", err);
    assert!(
        err.contains("missing-test"),
        "error should name the group: {}",
        err
    );
}

/// Endpoint urls may reference env vars too, e.g. per-environment hosts.
#[test]
fn test_env_expansion_in_endpoint_url() {
    let host_var = "RETRYGATE_TEST_E2E_03_HOST";
    let port_var = "RETRYGATE_TEST_E2E_03_PORT";
    unsafe {
        std::env::set_var(host_var, "10.1.2.3");
        std::env::set_var(port_var, "9090");
    }

    let file = write_config(&format!(
        r#"
[server]
listen = "127.0.0.1:19878"

[[upstreams]]
id = "url-test"
prefix = "/url"
retry_strategy = "failover"

[[upstreams.endpoints]]
url = "${{{}}}:${{{}}}"
"#,
        host_var, port_var
    ));

    let (config, _) = Config::from_file_with_env(file.path()).expect("config should load");
    assert_eq!(config.upstreams[0].endpoints[0].url, "10.1.2.3:9090");

    unsafe {
        std::env::remove_var(host_var);
        std::env::remove_var(port_var);
    }
}

/// Convention-based discovery: RETRYGATE_<GROUP>_API_KEY.
#[test]
fn test_env_convention_discovers_key() {
    let var_name = "RETRYGATE_CONV_GROUP_API_KEY";
    unsafe { std::env::set_var(var_name, "conventional") };

    let file = write_config(
        r#"
[server]
listen = "127.0.0.1:19879"

[[upstreams]]
id = "conv-group"
prefix = "/conv"
"#,
    );

    let (config, key_sources) =
        Config::from_file_with_env(file.path()).expect("config should load");
    assert_eq!(
        config.upstreams[0].api_key.as_ref().unwrap().expose_secret(),
        "conventional"
    );
    assert_eq!(
        *key_source(&key_sources, "conv-group"),
        KeySource::Convention(var_name.to_string())
    );

    unsafe { std::env::remove_var(var_name) };
}

/// No api_key and no convention var produces KeySource::None.
#[test]
fn test_env_no_key_produces_none_source() {
    unsafe { std::env::remove_var("RETRYGATE_NOKEY_GROUP_API_KEY") };

    let file = write_config(
        r#"
[server]
listen = "127.0.0.1:19880"

[[upstreams]]
id = "nokey-group"
prefix = "/nokey"
"#,
    );

    let (config, key_sources) =
        Config::from_file_with_env(file.path()).expect("config should load");
    assert!(config.upstreams[0].api_key.is_none());
    assert_eq!(*key_source(&key_sources, "nokey-group"), KeySource::None);
}

/// A literal api_key passes through unchanged.
#[test]
fn test_env_literal_key_passthrough() {
    let file = write_config(
        r#"
[server]
listen = "127.0.0.1:19881"

[[upstreams]]
id = "literal-group"
prefix = "/literal"
api_key = "plain-token"
"#,
    );

    let (config, key_sources) =
        Config::from_file_with_env(file.path()).expect("config should load");
    assert_eq!(
        config.upstreams[0].api_key.as_ref().unwrap().expose_secret(),
        "plain-token"
    );
    assert_eq!(*key_source(&key_sources, "literal-group"), KeySource::Literal);
}

/// Expanded configs still go through validation.
#[test]
fn test_env_pipeline_validates_result() {
    let file = write_config(
        r#"
[server]
listen = "127.0.0.1:19882"

[[upstreams]]
id = "bad-strategy"
prefix = "/bad"
retry_strategy = "sometimes"
"#,
    );

    let err = Config::from_file_with_env(file.path())
        .unwrap_err()
        .to_string();
    assert!(err.contains("sometimes"), "error should name the strategy: {}", err);
}

#[test]
fn test_missing_file_reports_path() {
    let err = Config::from_file_with_env("/nonexistent/retrygate.toml")
        .unwrap_err()
        .to_string();
    assert!(err.contains("/nonexistent/retrygate.toml"), "{}", err);
}
