use super::client::DiscoveryBackend;
use super::types::{InstanceListing, InstanceQuery, LookupOptions};
use crate::error::{DiscoveryError, Result};
use crate::selection::SelectionPolicy;
use arc_swap::ArcSwap;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Polls are never scheduled closer than this, to bound backend load.
pub const MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Debug, Clone)]
pub struct LocatorConfig {
    pub refresh_interval: Duration,
}

impl Default for LocatorConfig {
    fn default() -> Self {
        Self {
            refresh_interval: MIN_REFRESH_INTERVAL,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocatorEvent {
    Error {
        service_name: String,
        error: DiscoveryError,
    },
}

/// Keeps a near-real-time list of live instances per service name and picks
/// one per call through the active [`SelectionPolicy`].
#[derive(Clone)]
pub struct InstanceLocator {
    shared: Arc<LocatorShared>,
}

struct LocatorShared {
    backend: Arc<dyn DiscoveryBackend>,
    refresh_interval: Duration,
    /// Last successful poll per service; replaced wholesale, never merged.
    cache: DashMap<String, Arc<Vec<String>>>,
    policy: ArcSwap<Box<dyn SelectionPolicy>>,
    loops: Mutex<HashMap<String, CancellationToken>>,
    events: mpsc::UnboundedSender<LocatorEvent>,
    root: CancellationToken,
}

impl InstanceLocator {
    pub fn new(
        backend: Arc<dyn DiscoveryBackend>,
        policy: Box<dyn SelectionPolicy>,
        config: LocatorConfig,
    ) -> (Self, mpsc::UnboundedReceiver<LocatorEvent>) {
        let refresh_interval = config.refresh_interval.max(MIN_REFRESH_INTERVAL);
        if refresh_interval != config.refresh_interval {
            warn!(
                "locator: refresh interval {:?} below floor, using {:?}",
                config.refresh_interval, refresh_interval
            );
        }

        let (events, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(LocatorShared {
            backend,
            refresh_interval,
            cache: DashMap::new(),
            policy: ArcSwap::from_pointee(policy),
            loops: Mutex::new(HashMap::new()),
            events,
            root: CancellationToken::new(),
        });
        (Self { shared }, rx)
    }

    pub fn refresh_interval(&self) -> Duration {
        self.shared.refresh_interval
    }

    /// Start polling `service_name`. Calling it again for the same name
    /// replaces the running loop and polls immediately.
    pub fn discover_instances(&self, service_name: &str) {
        let cancel = self.shared.root.child_token();
        let previous = self
            .shared
            .lock_loops()
            .insert(service_name.to_string(), cancel.clone());
        if let Some(previous) = previous {
            previous.cancel();
            debug!("locator: discovery rescheduled, service={}", service_name);
        } else {
            info!("locator: discovery started, service={}", service_name);
        }

        let shared = self.shared.clone();
        let service_name = service_name.to_string();
        tokio::spawn(async move {
            loop {
                if cancel.is_cancelled() {
                    return;
                }
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return,
                    _ = shared.poll_once(&service_name) => {}
                }
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(shared.refresh_interval) => {}
                }
            }
        });
    }

    /// Stop polling `service_name`. The cached list is kept.
    pub fn stop_discovery(&self, service_name: &str) -> bool {
        match self.shared.lock_loops().remove(service_name) {
            Some(cancel) => {
                cancel.cancel();
                info!("locator: discovery stopped, service={}", service_name);
                true
            }
            None => false,
        }
    }

    pub fn shutdown(&self) {
        self.shared.root.cancel();
        self.shared.lock_loops().clear();
        info!("locator: shutdown complete");
    }

    /// Pick one cached instance of `service_name`. `None` when the name was
    /// never discovered or has no live instances.
    pub fn select_instance(&self, service_name: &str, args: &[&str]) -> Option<String> {
        let instances = self.shared.cache.get(service_name)?.value().clone();
        if instances.is_empty() {
            return None;
        }
        let policy = self.shared.policy.load();
        policy
            .select(service_name, &instances, args)
            .map(str::to_string)
    }

    pub fn set_instance_selection_policy(&self, policy: Box<dyn SelectionPolicy>) {
        info!("locator: selection policy set to {}", policy.name());
        self.shared.policy.store(Arc::new(policy));
    }

    pub fn policy_name(&self) -> &'static str {
        self.shared.policy.load().name()
    }

    pub fn cached_instances(&self, service_name: &str) -> Option<Vec<String>> {
        self.shared
            .cache
            .get(service_name)
            .map(|entry| entry.value().as_ref().clone())
    }

    /// Every cached service with its instances, sorted by name.
    pub fn snapshot(&self) -> Vec<(String, Vec<String>)> {
        let mut out: Vec<(String, Vec<String>)> = self
            .shared
            .cache
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().as_ref().clone()))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    /// One-shot query that bypasses the cache.
    pub async fn lookup(
        &self,
        service_name: &str,
        options: LookupOptions,
    ) -> Result<InstanceListing> {
        let query = InstanceQuery::with_options(service_name, options);
        let body = self.shared.backend.list_instances(&query).await?.require_ok()?;
        Ok(serde_json::from_str(&body)?)
    }
}

impl LocatorShared {
    fn lock_loops(&self) -> MutexGuard<'_, HashMap<String, CancellationToken>> {
        self.loops.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn poll_once(&self, service_name: &str) {
        let start = Instant::now();
        let result = self.fetch(service_name).await;
        metrics::histogram!(
            "discovery_poll_duration_seconds",
            "service_name" => service_name.to_string(),
        )
        .record(start.elapsed().as_secs_f64());
        match result {
            Ok(instances) => {
                debug!(
                    "locator: polled, service={}, instances={}, duration={:.3}s",
                    service_name,
                    instances.len(),
                    start.elapsed().as_secs_f64(),
                );
                metrics::counter!(
                    "discovery_poll_total",
                    "service_name" => service_name.to_string(),
                    "result" => "success",
                )
                .increment(1);
                metrics::gauge!(
                    "discovery_cached_instances",
                    "service_name" => service_name.to_string(),
                )
                .set(instances.len() as f64);
                self.cache
                    .insert(service_name.to_string(), Arc::new(instances));
            }
            Err(e) => {
                warn!(
                    "locator: poll failed, keeping previous instances, service={}, error={}",
                    service_name, e
                );
                metrics::counter!(
                    "discovery_poll_total",
                    "service_name" => service_name.to_string(),
                    "result" => "error",
                )
                .increment(1);
                if self
                    .events
                    .send(LocatorEvent::Error {
                        service_name: service_name.to_string(),
                        error: e,
                    })
                    .is_err()
                {
                    debug!("locator: event receiver dropped");
                }
            }
        }
    }

    async fn fetch(&self, service_name: &str) -> Result<Vec<String>> {
        let body = self
            .backend
            .list_instances(&InstanceQuery::live(service_name))
            .await?
            .require_ok()?;
        let listing: InstanceListing = serde_json::from_str(&body)?;
        Ok(listing.endpoint_values())
    }
}
