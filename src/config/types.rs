use crate::discovery::publisher::PublisherConfig;
use crate::discovery::types::{deserialize_null_default, InstanceStatus, PublishOptions};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Top-level agent configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default)]
    pub backend: BackendConfig,

    #[serde(default)]
    pub publisher: PublisherSettings,

    #[serde(default)]
    pub locator: LocatorSettings,

    /// Instances this agent keeps registered.
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub services: Vec<ServiceConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default = "default_backend_url")]
    pub url: String,

    /// Bearer token. Falls back to `VCAP_SERVICES` when unset.
    #[serde(default)]
    pub token: Option<String>,

    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: default_backend_url(),
            token: None,
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl BackendConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

pub(crate) fn default_backend_url() -> String {
    "https://servicediscovery.ng.bluemix.net".to_string()
}

fn default_request_timeout_ms() -> u64 {
    1500
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublisherSettings {
    #[serde(default = "default_true")]
    pub auto_recovery: bool,

    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,

    /// Upper bound for deregistration on shutdown.
    #[serde(default = "default_deregister_timeout_secs")]
    pub deregister_timeout_secs: u64,
}

impl Default for PublisherSettings {
    fn default() -> Self {
        Self {
            auto_recovery: true,
            retry_delay_secs: default_retry_delay_secs(),
            deregister_timeout_secs: default_deregister_timeout_secs(),
        }
    }
}

impl PublisherSettings {
    pub fn to_publisher_config(&self) -> PublisherConfig {
        PublisherConfig {
            auto_recovery: self.auto_recovery,
            retry_delay: Duration::from_secs(self.retry_delay_secs),
            deregister_timeout: Duration::from_secs(self.deregister_timeout_secs),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_retry_delay_secs() -> u64 {
    5
}

fn default_deregister_timeout_secs() -> u64 {
    5
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocatorSettings {
    /// Clamped to 15 seconds at minimum.
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,

    /// `random`, `round_robin` or `affinity`.
    #[serde(default = "default_policy")]
    pub policy: String,

    /// Service names to keep discovering.
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub discover: Vec<String>,
}

impl Default for LocatorSettings {
    fn default() -> Self {
        Self {
            refresh_interval_secs: default_refresh_interval_secs(),
            policy: default_policy(),
            discover: Vec::new(),
        }
    }
}

fn default_refresh_interval_secs() -> u64 {
    15
}

fn default_policy() -> String {
    "random".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub service_name: String,

    pub endpoint: String,

    #[serde(default = "default_endpoint_type")]
    pub endpoint_type: String,

    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u32,

    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub tags: Vec<String>,

    #[serde(default)]
    pub status: InstanceStatus,

    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub metadata: HashMap<String, String>,
}

impl ServiceConfig {
    pub fn options(&self) -> PublishOptions {
        PublishOptions {
            endpoint_type: self.endpoint_type.clone(),
            ttl_secs: self.ttl_secs,
            tags: self.tags.clone(),
            status: self.status,
            metadata: self.metadata.clone(),
        }
    }
}

fn default_endpoint_type() -> String {
    "http".to_string()
}

fn default_ttl_secs() -> u32 {
    30
}

/// The `service_discovery` binding inside `VCAP_SERVICES`.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct VcapServices {
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub service_discovery: Vec<VcapBinding>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct VcapBinding {
    pub credentials: VcapCredentials,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct VcapCredentials {
    #[serde(default)]
    pub url: Option<String>,
    pub auth_token: String,
}
