use std::{env, fs};

use cmsgate_server::config::loader::load_config;
use cmsgate_server::config::{CacheBackendKind, Environment, LogFormat};

#[test]
fn config_parsing_and_env_overrides_and_validation() {
    let dir = tempfile::tempdir().expect("tmp dir");
    let path = dir.path().join("cmsgate.toml");

    let toml_content = r#"
environment = "production"

[server]
host = "127.0.0.1"
port = 9090
body_limit_bytes = 2048

[origin]
url = "https://cms.example.com/"
token = "origin-secret"
timeout_ms = 5000

[cache]
backend = "memory"
ttl_secs = 120

[auth]
api_key = "k-123"

[rate_limit]
requests = 10
window_secs = 30

[cors]
allowed_origins = ["https://www.example.com"]

[logging]
level = "debug"
"#;
    fs::write(&path, toml_content).expect("write toml");

    // 1) Valid config parses
    let cfg = load_config(path.to_str()).expect("should parse config");
    assert_eq!(cfg.environment, Environment::Production);
    assert_eq!(cfg.server.port, 9090);
    assert_eq!(cfg.origin.base_url(), "https://cms.example.com");
    assert_eq!(cfg.origin.token(), Some("origin-secret"));
    assert_eq!(cfg.cache.backend, CacheBackendKind::Memory);
    assert_eq!(cfg.cache.ttl_secs, 120);
    assert_eq!(cfg.rate_limit.requests, 10);
    assert_eq!(cfg.rate_limit.analytics_requests, 100);
    assert_eq!(cfg.cors.allowed_origins, vec!["https://www.example.com"]);
    assert_eq!(cfg.log_format(), LogFormat::Json);

    // 2) Env override should win over file
    unsafe {
        env::set_var("CMSGATE__CACHE__TTL_SECS", "30");
        env::set_var("CMSGATE__ORIGIN__URL", "http://origin.internal:1337");
    }
    let cfg_env = load_config(path.to_str()).expect("should parse config with env overrides");
    assert_eq!(cfg_env.cache.ttl_secs, 30);
    assert_eq!(cfg_env.origin.base_url(), "http://origin.internal:1337");
    unsafe {
        env::remove_var("CMSGATE__CACHE__TTL_SECS");
        env::remove_var("CMSGATE__ORIGIN__URL");
    }

    // 3) Production without an API key fails validation
    let no_key = toml_content.replace("api_key = \"k-123\"", "");
    fs::write(&path, no_key).expect("write toml");
    let err = load_config(path.to_str()).expect_err("api key is mandatory in production");
    assert!(err.contains("auth.api_key"), "unexpected error: {err}");

    // 4) Invalid values are rejected
    let bad = toml_content.replace("ttl_secs = 120", "ttl_secs = 0");
    fs::write(&path, bad).expect("write toml");
    assert!(load_config(path.to_str()).is_err());

    // 5) A missing file falls back to defaults
    let absent = dir.path().join("absent.toml");
    let cfg = load_config(absent.to_str()).expect("defaults are valid");
    assert_eq!(cfg.server.port, 8080);
    assert_eq!(cfg.origin.base_url(), "http://localhost:1337");
    assert_eq!(cfg.cache.backend, CacheBackendKind::Redis);
    assert_eq!(cfg.cache.ttl_secs, 300);
}
