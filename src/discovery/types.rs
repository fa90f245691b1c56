use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;

/// Deserialize a `T` that implements `Default`, treating JSON `null` the same as
/// a missing field (returns `T::default()`).
pub(crate) fn deserialize_null_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstanceStatus {
    #[default]
    Up,
    Down,
    OutOfService,
}

impl InstanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceStatus::Up => "UP",
            InstanceStatus::Down => "DOWN",
            InstanceStatus::OutOfService => "OUT_OF_SERVICE",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    #[serde(rename = "type", default = "default_endpoint_type")]
    pub endpoint_type: String,
    pub value: String,
}

fn default_endpoint_type() -> String {
    "http".to_string()
}

/// Options accepted by `InstancePublisher::publish`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishOptions {
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

impl Default for PublishOptions {
    fn default() -> Self {
        Self {
            endpoint_type: default_endpoint_type(),
            ttl_secs: default_ttl_secs(),
            tags: Vec::new(),
            status: InstanceStatus::Up,
            metadata: HashMap::new(),
        }
    }
}

fn default_ttl_secs() -> u32 {
    30
}

/// Body of `POST /api/v1/instances`.
#[derive(Debug, Clone, Serialize)]
pub struct RegistrationRequest {
    pub service_name: String,
    pub endpoint: Endpoint,
    pub ttl: u32,
    pub status: InstanceStatus,
    pub tags: Vec<String>,
    pub metadata: HashMap<String, String>,
}

impl RegistrationRequest {
    pub fn new(service_name: &str, endpoint_url: &str, options: &PublishOptions) -> Self {
        Self {
            service_name: service_name.to_string(),
            endpoint: Endpoint {
                endpoint_type: options.endpoint_type.clone(),
                value: endpoint_url.to_string(),
            },
            ttl: options.ttl_secs,
            status: options.status,
            tags: options.tags.clone(),
            metadata: options.metadata.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct InstanceLinks {
    #[serde(rename = "self")]
    pub self_link: String,
    pub heartbeat: String,
}

/// Successful registration reply.
#[derive(Debug, Clone, Deserialize)]
pub struct RegistrationResponse {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub ttl: Option<u32>,
    pub links: InstanceLinks,
}

/// One entry of the `GET /api/v1/instances` reply.
#[derive(Debug, Clone, Deserialize)]
pub struct ListedInstance {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub service_name: Option<String>,
    /// Absent when a `fields` projection leaves it out.
    #[serde(default)]
    pub endpoint: Option<Endpoint>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub tags: Vec<String>,
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub ttl: Option<u32>,
    #[serde(default)]
    pub last_heartbeat: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct InstanceListing {
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub instances: Vec<ListedInstance>,
}

impl InstanceListing {
    /// Endpoint values in the order the backend returned them. Entries
    /// without an endpoint are skipped.
    pub fn endpoint_values(&self) -> Vec<String> {
        self.instances
            .iter()
            .filter_map(|i| i.endpoint.as_ref().map(|e| e.value.clone()))
            .collect()
    }
}

/// Extra filters for a one-shot `InstanceLocator::lookup`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LookupOptions {
    pub fields: Vec<String>,
    pub tags: Vec<String>,
    pub status: Option<String>,
}

/// Filters for `GET /api/v1/instances`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstanceQuery {
    pub service_name: String,
    pub fields: Vec<String>,
    pub tags: Vec<String>,
    pub status: Option<String>,
}

impl InstanceQuery {
    /// The query every discovery poll issues: live instances only.
    pub fn live(service_name: &str) -> Self {
        Self {
            service_name: service_name.to_string(),
            status: Some(InstanceStatus::Up.as_str().to_string()),
            ..Default::default()
        }
    }

    pub fn with_options(service_name: &str, options: LookupOptions) -> Self {
        Self {
            service_name: service_name.to_string(),
            fields: options.fields,
            tags: options.tags,
            status: options.status,
        }
    }

    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![("service_name", self.service_name.clone())];
        if !self.fields.is_empty() {
            pairs.push(("fields", self.fields.join(",")));
        }
        if !self.tags.is_empty() {
            pairs.push(("tags", self.tags.join(",")));
        }
        if let Some(status) = &self.status {
            pairs.push(("status", status.clone()));
        }
        pairs
    }
}
