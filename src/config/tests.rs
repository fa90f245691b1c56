use super::types::*;
use super::{credentials_from_vcap, AgentConfig};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

fn with_token() -> AgentConfig {
    AgentConfig {
        backend: BackendConfig {
            token: Some("secret".into()),
            ..Default::default()
        },
        ..Default::default()
    }
}

fn service(name: &str, endpoint: &str, ttl_secs: u32) -> ServiceConfig {
    serde_json::from_value(serde_json::json!({
        "service_name": name,
        "endpoint": endpoint,
        "ttl_secs": ttl_secs,
    }))
    .unwrap()
}

fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |key| map.get(key).cloned()
}

#[test]
fn test_parse_bundled_toml_config() {
    let content = std::fs::read_to_string("config.toml").unwrap();
    let cfg = AgentConfig::parse(&content, Path::new("config.toml")).unwrap();
    assert_eq!(cfg.locator.policy, "round_robin");
    assert_eq!(cfg.locator.discover, vec!["lw-erp"]);
    assert_eq!(cfg.services.len(), 1);
    assert_eq!(cfg.services[0].ttl_secs, 300);
    assert!(cfg.validate().is_ok());
}

#[test]
fn test_load_json_config() {
    let json = r#"{
        "backend": { "url": "http://127.0.0.1:9000", "token": "t0k" },
        "locator": { "policy": "affinity", "discover": ["orders", "billing"] },
        "services": [{
            "service_name": "orders",
            "endpoint": "http://10.0.0.1:8080",
            "tags": ["eu"],
            "status": "OUT_OF_SERVICE"
        }]
    }"#;
    let tmp = std::env::temp_dir().join("hermes_discovery_test_config.json");
    std::fs::write(&tmp, json).unwrap();
    let cfg = AgentConfig::load(&tmp).unwrap();
    std::fs::remove_file(&tmp).ok();

    assert_eq!(cfg.locator.discover.len(), 2);
    let options = cfg.services[0].options();
    assert_eq!(options.ttl_secs, 30);
    assert_eq!(options.endpoint_type, "http");
    assert_eq!(options.tags, vec!["eu"]);
    assert_eq!(
        options.status,
        crate::discovery::types::InstanceStatus::OutOfService
    );
}

#[test]
fn test_deserialize_defaults() {
    let cfg: AgentConfig = toml::from_str("").unwrap();
    assert_eq!(cfg.backend.url, "https://servicediscovery.ng.bluemix.net");
    assert_eq!(cfg.backend.request_timeout(), Duration::from_millis(1500));
    assert!(cfg.backend.token.is_none());
    assert_eq!(cfg.locator.refresh_interval_secs, 15);
    assert_eq!(cfg.locator.policy, "random");
    assert!(cfg.services.is_empty());

    let publisher = cfg.publisher.to_publisher_config();
    assert!(publisher.auto_recovery);
    assert_eq!(publisher.retry_delay, Duration::from_secs(5));
    assert_eq!(publisher.deregister_timeout, Duration::from_secs(5));
}

#[test]
fn test_null_collections() {
    let cfg: AgentConfig = serde_json::from_str(
        r#"{"services": null, "locator": {"discover": null}}"#,
    )
    .unwrap();
    assert!(cfg.services.is_empty());
    assert!(cfg.locator.discover.is_empty());
}

#[test]
fn test_validate_requires_token() {
    assert!(AgentConfig::default().validate().is_err());

    let mut cfg = with_token();
    assert!(cfg.validate().is_ok());
    cfg.backend.token = Some(String::new());
    assert!(cfg.validate().is_err());
}

#[test]
fn test_validate_rejects_unknown_policy() {
    let mut cfg = with_token();
    cfg.locator.policy = "least_conn".into();
    assert!(cfg.validate().is_err());
    cfg.locator.policy = "sticky".into();
    assert!(cfg.validate().is_ok());
}

#[test]
fn test_validate_services() {
    let mut cfg = with_token();
    cfg.services = vec![service("", "http://h:1", 30)];
    assert!(cfg.validate().is_err());

    cfg.services = vec![service("orders", "", 30)];
    assert!(cfg.validate().is_err());

    cfg.services = vec![service("orders", "http://h:1", 0)];
    assert!(cfg.validate().is_err());

    cfg.services = vec![service("orders", "http://h:1", 30)];
    assert!(cfg.validate().is_ok());
}

#[test]
fn test_env_overrides() {
    let mut cfg = AgentConfig::default();
    cfg.apply_overrides(vars(&[
        ("HERMES_DISCOVERY_URL", "http://sd.local"),
        ("HERMES_DISCOVERY_TOKEN", "env-token"),
        ("HERMES_DISCOVERY_REFRESH_INTERVAL", "60"),
        ("HERMES_DISCOVERY_POLICY", "round_robin"),
    ]));
    assert_eq!(cfg.backend.url, "http://sd.local");
    assert_eq!(cfg.backend.token.as_deref(), Some("env-token"));
    assert_eq!(cfg.locator.refresh_interval_secs, 60);
    assert_eq!(cfg.locator.policy, "round_robin");
}

#[test]
fn test_env_refresh_interval_not_a_number_is_ignored() {
    let mut cfg = AgentConfig::default();
    cfg.apply_overrides(vars(&[("HERMES_DISCOVERY_REFRESH_INTERVAL", "soon")]));
    assert_eq!(cfg.locator.refresh_interval_secs, 15);
}

const VCAP: &str = r#"{
    "service_discovery": [{
        "name": "sd",
        "credentials": {
            "auth_token": "vcap-token",
            "url": "https://sd.eu-gb.bluemix.net"
        }
    }]
}"#;

#[test]
fn test_credentials_from_vcap() {
    let (url, token) = credentials_from_vcap(VCAP).unwrap().unwrap();
    assert_eq!(url.as_deref(), Some("https://sd.eu-gb.bluemix.net"));
    assert_eq!(token, "vcap-token");

    assert!(credentials_from_vcap(r#"{"cloudantNoSQLDB": []}"#)
        .unwrap()
        .is_none());
    assert!(credentials_from_vcap("not json").is_err());
}

#[test]
fn test_vcap_fallback_only_without_token() {
    let mut cfg = AgentConfig::default();
    cfg.apply_overrides(vars(&[("VCAP_SERVICES", VCAP)]));
    assert_eq!(cfg.backend.token.as_deref(), Some("vcap-token"));
    assert_eq!(cfg.backend.url, "https://sd.eu-gb.bluemix.net");

    let mut cfg = with_token();
    cfg.apply_overrides(vars(&[("VCAP_SERVICES", VCAP)]));
    assert_eq!(cfg.backend.token.as_deref(), Some("secret"));
    assert_eq!(cfg.backend.url, "https://servicediscovery.ng.bluemix.net");
}

#[test]
fn test_malformed_vcap_is_ignored() {
    let mut cfg = AgentConfig::default();
    cfg.apply_overrides(vars(&[("VCAP_SERVICES", "{")]));
    assert!(cfg.backend.token.is_none());
}

#[test]
fn test_unsupported_format() {
    let tmp = std::env::temp_dir().join("hermes_discovery_test.yml");
    std::fs::write(&tmp, "key: value").unwrap();
    assert!(AgentConfig::load(&tmp).is_err());
    std::fs::remove_file(&tmp).ok();
}
