use super::client::{BackendResponse, DiscoveryBackend};
use super::types::{InstanceLinks, PublishOptions, RegistrationRequest, RegistrationResponse};
use crate::error::{DiscoveryError, Result};
use http::StatusCode;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Delay before retrying a failed registration or a failed heartbeat.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct PublisherConfig {
    /// Re-register automatically once a registration is found expired.
    pub auto_recovery: bool,
    pub retry_delay: Duration,
    /// Upper bound for best-effort deregistration on shutdown.
    pub deregister_timeout: Duration,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            auto_recovery: true,
            retry_delay: DEFAULT_RETRY_DELAY,
            deregister_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublisherEvent {
    Registered(String),
    Expired(String),
    Error {
        service_name: String,
        error: DiscoveryError,
    },
}

/// Per-name lifecycle. A name with no record is unregistered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationState {
    Registering,
    Registered,
    Expired,
    /// Absorbing: the backend rejected the token.
    Unauthorized,
}

impl RegistrationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RegistrationState::Registering => "registering",
            RegistrationState::Registered => "registered",
            RegistrationState::Expired => "expired",
            RegistrationState::Unauthorized => "unauthorized",
        }
    }
}

/// Wall time for reporting, monotonic time for TTL arithmetic.
#[derive(Debug, Clone, Copy)]
struct HeartbeatStamp {
    wall: SystemTime,
    mono: Instant,
}

impl HeartbeatStamp {
    fn now() -> Self {
        Self {
            wall: SystemTime::now(),
            mono: Instant::now(),
        }
    }
}

struct RegistrationRecord {
    endpoint: String,
    options: PublishOptions,
    state: RegistrationState,
    instance_id: Option<String>,
    links: Option<InstanceLinks>,
    last_heartbeat: Option<HeartbeatStamp>,
    heartbeat_interval: Duration,
    heartbeat_running: bool,
    cancel: CancellationToken,
}

impl RegistrationRecord {
    fn new(endpoint: &str, options: PublishOptions, cancel: CancellationToken) -> Self {
        let heartbeat_interval = heartbeat_interval(options.ttl_secs);
        Self {
            endpoint: endpoint.to_string(),
            options,
            state: RegistrationState::Registering,
            instance_id: None,
            links: None,
            last_heartbeat: None,
            heartbeat_interval,
            heartbeat_running: false,
            cancel,
        }
    }

    fn ttl(&self) -> Duration {
        Duration::from_secs(self.options.ttl_secs as u64)
    }
}

/// Point-in-time view of one registration.
#[derive(Debug, Clone)]
pub struct RegistrationSnapshot {
    pub service_name: String,
    pub endpoint: String,
    pub state: RegistrationState,
    pub instance_id: Option<String>,
    pub last_heartbeat: Option<SystemTime>,
    pub heartbeat_interval: Duration,
}

/// Heartbeat interval = TTL / 3, never below one second.
pub fn heartbeat_interval(ttl_secs: u32) -> Duration {
    Duration::from_secs((ttl_secs / 3).max(1) as u64)
}

/// Registers service instances with the discovery backend and keeps them
/// alive.
///
/// Every name owns at most one registration task and one heartbeat task, both
/// tied to the name's cancellation token. Events are delivered on the channel
/// returned by [`InstancePublisher::new`].
#[derive(Clone)]
pub struct InstancePublisher {
    shared: Arc<PublisherShared>,
}

struct PublisherShared {
    backend: Arc<dyn DiscoveryBackend>,
    config: PublisherConfig,
    records: Mutex<HashMap<String, RegistrationRecord>>,
    events: mpsc::UnboundedSender<PublisherEvent>,
    root: CancellationToken,
}

enum Beat {
    Next(Duration),
    Stop,
}

impl InstancePublisher {
    pub fn new(
        backend: Arc<dyn DiscoveryBackend>,
        config: PublisherConfig,
    ) -> (Self, mpsc::UnboundedReceiver<PublisherEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(PublisherShared {
            backend,
            config,
            records: Mutex::new(HashMap::new()),
            events,
            root: CancellationToken::new(),
        });
        (Self { shared }, rx)
    }

    /// Publish `endpoint_url` under `service_name`.
    ///
    /// Returns as soon as the arguments are validated; the registration itself
    /// runs in the background and reports through events. A call made while a
    /// registration for the same name is in flight only refreshes the options
    /// that attempt will use.
    pub fn publish(
        &self,
        service_name: &str,
        endpoint_url: &str,
        options: PublishOptions,
    ) -> Result<()> {
        if service_name.is_empty() {
            return Err(DiscoveryError::InvalidArgument(
                "service_name must be provided".to_string(),
            ));
        }
        if endpoint_url.is_empty() {
            return Err(DiscoveryError::InvalidArgument(
                "endpoint_url must be provided".to_string(),
            ));
        }

        let spawn = {
            let mut records = self.shared.lock_records();
            match records.get_mut(service_name) {
                Some(record) if record.state == RegistrationState::Registering => {
                    record.endpoint = endpoint_url.to_string();
                    record.options = options;
                    debug!(
                        "publisher: registration already in flight, service={}",
                        service_name
                    );
                    None
                }
                Some(record) => {
                    record.endpoint = endpoint_url.to_string();
                    record.options = options;
                    record.state = RegistrationState::Registering;
                    Some(record.cancel.clone())
                }
                None => {
                    let cancel = self.shared.root.child_token();
                    records.insert(
                        service_name.to_string(),
                        RegistrationRecord::new(endpoint_url, options, cancel.clone()),
                    );
                    Some(cancel)
                }
            }
        };

        if let Some(cancel) = spawn {
            self.shared
                .clone()
                .spawn_registration(service_name.to_string(), cancel);
        }
        Ok(())
    }

    pub fn get_last_heartbeat(&self, service_name: &str) -> Option<SystemTime> {
        self.shared
            .lock_records()
            .get(service_name)
            .and_then(|r| r.last_heartbeat)
            .map(|s| s.wall)
    }

    pub fn state(&self, service_name: &str) -> Option<RegistrationState> {
        self.shared.lock_records().get(service_name).map(|r| r.state)
    }

    pub fn registrations(&self) -> Vec<RegistrationSnapshot> {
        let records = self.shared.lock_records();
        let mut out: Vec<RegistrationSnapshot> = records
            .iter()
            .map(|(name, r)| RegistrationSnapshot {
                service_name: name.clone(),
                endpoint: r.endpoint.clone(),
                state: r.state,
                instance_id: r.instance_id.clone(),
                last_heartbeat: r.last_heartbeat.map(|s| s.wall),
                heartbeat_interval: r.heartbeat_interval,
            })
            .collect();
        out.sort_by(|a, b| a.service_name.cmp(&b.service_name));
        out
    }

    /// Stop keeping `service_name` alive and remove it from the backend.
    /// Returns `false` if the name was never published.
    pub async fn unpublish(&self, service_name: &str) -> bool {
        let Some(record) = self.shared.lock_records().remove(service_name) else {
            return false;
        };
        record.cancel.cancel();
        if let Some(links) = record.links {
            self.shared.deregister(service_name, &links.self_link).await;
        }
        info!("publisher: unpublished, service={}", service_name);
        true
    }

    /// Cancel every loop, then deregister all known instances, bounded by
    /// `deregister_timeout`. Deregistration failures are logged only.
    pub async fn shutdown(&self) {
        self.shared.root.cancel();

        let targets: Vec<(String, String)> = self
            .shared
            .lock_records()
            .iter()
            .filter_map(|(name, r)| {
                r.links
                    .as_ref()
                    .map(|l| (name.clone(), l.self_link.clone()))
            })
            .collect();

        let deregistrations = targets
            .iter()
            .map(|(name, link)| self.shared.deregister(name, link));

        if tokio::time::timeout(
            self.shared.config.deregister_timeout,
            futures_util::future::join_all(deregistrations),
        )
        .await
        .is_err()
        {
            warn!(
                "publisher: deregistration timed out after {:?}",
                self.shared.config.deregister_timeout
            );
        }
        info!("publisher: shutdown complete, instances={}", targets.len());
    }
}

impl PublisherShared {
    fn lock_records(&self) -> MutexGuard<'_, HashMap<String, RegistrationRecord>> {
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn emit(&self, event: PublisherEvent) {
        if self.events.send(event).is_err() {
            debug!("publisher: event receiver dropped");
        }
    }

    fn spawn_registration(self: Arc<Self>, service_name: String, cancel: CancellationToken) {
        tokio::spawn(async move {
            self.run_registration(&service_name, &cancel).await;
        });
    }

    async fn run_registration(self: &Arc<Self>, service_name: &str, cancel: &CancellationToken) {
        loop {
            let request = {
                let records = self.lock_records();
                let Some(record) = records.get(service_name) else {
                    return;
                };
                if cancel.is_cancelled() {
                    return;
                }
                RegistrationRequest::new(service_name, &record.endpoint, &record.options)
            };

            info!(
                "publisher: registering, service={}, endpoint={}",
                service_name, request.endpoint.value
            );

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                r = self.backend.register(&request) => r,
            };

            if !self.handle_registration(service_name, cancel, result) {
                return;
            }

            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(self.config.retry_delay) => {}
            }
        }
    }

    /// Returns `true` when the registration should be retried.
    fn handle_registration(
        self: &Arc<Self>,
        service_name: &str,
        cancel: &CancellationToken,
        result: Result<BackendResponse>,
    ) -> bool {
        let resp = match result {
            Ok(resp) => resp,
            Err(e) => {
                let retry = e.is_retryable();
                warn!(
                    "publisher: register failed, service={}, retry={}, error={}",
                    service_name, retry, e
                );
                count_register(service_name, "error");
                self.emit(PublisherEvent::Error {
                    service_name: service_name.to_string(),
                    error: e,
                });
                return retry;
            }
        };

        if resp.status == StatusCode::UNAUTHORIZED {
            error!(
                "publisher: register unauthorized, giving up, service={}, body={}",
                service_name, resp.body
            );
            count_register(service_name, "unauthorized");
            if let Some(record) = self.lock_records().get_mut(service_name) {
                record.state = RegistrationState::Unauthorized;
            }
            self.emit(PublisherEvent::Error {
                service_name: service_name.to_string(),
                error: DiscoveryError::Unauthorized(resp.body),
            });
            return false;
        }

        if !resp.status.is_success() {
            warn!(
                "publisher: register rejected, retrying in {:?}, service={}, status={}",
                self.config.retry_delay, service_name, resp.status
            );
            count_register(service_name, "rejected");
            return true;
        }

        let registration: RegistrationResponse = match serde_json::from_str(&resp.body) {
            Ok(r) => r,
            Err(e) => {
                warn!(
                    "publisher: unreadable registration reply, retrying, service={}, error={}",
                    service_name, e
                );
                count_register(service_name, "error");
                self.emit(PublisherEvent::Error {
                    service_name: service_name.to_string(),
                    error: e.into(),
                });
                return true;
            }
        };

        self.on_registered(service_name, cancel, registration);
        false
    }

    fn on_registered(
        self: &Arc<Self>,
        service_name: &str,
        cancel: &CancellationToken,
        registration: RegistrationResponse,
    ) {
        let start_heartbeat = {
            let mut records = self.lock_records();
            let Some(record) = records.get_mut(service_name) else {
                return;
            };
            if cancel.is_cancelled() {
                return;
            }
            if let Some(ttl) = registration.ttl.filter(|t| *t != record.options.ttl_secs) {
                warn!(
                    "publisher: backend adjusted ttl, service={}, requested={}, granted={}",
                    service_name, record.options.ttl_secs, ttl
                );
            }
            record.instance_id = registration.id;
            record.links = Some(registration.links);
            record.state = RegistrationState::Registered;
            record.heartbeat_interval = heartbeat_interval(record.options.ttl_secs);
            record.last_heartbeat = Some(HeartbeatStamp::now());
            !std::mem::replace(&mut record.heartbeat_running, true)
        };

        info!("publisher: registered, service={}", service_name);
        count_register(service_name, "success");

        if start_heartbeat {
            let shared = self.clone();
            let name = service_name.to_string();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                shared.run_heartbeat(&name, &cancel).await;
            });
        }

        self.emit(PublisherEvent::Registered(service_name.to_string()));
    }

    async fn run_heartbeat(self: &Arc<Self>, service_name: &str, cancel: &CancellationToken) {
        let Some(mut delay) = self
            .lock_records()
            .get(service_name)
            .map(|r| r.heartbeat_interval)
        else {
            return;
        };
        debug!(
            "publisher: heartbeat started, service={}, interval={:?}",
            service_name, delay
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }

            let link = {
                let mut records = self.lock_records();
                let Some(record) = records.get_mut(service_name) else {
                    return;
                };
                if record.state == RegistrationState::Unauthorized {
                    record.heartbeat_running = false;
                    debug!(
                        "publisher: heartbeat stopped, unauthorized, service={}",
                        service_name
                    );
                    return;
                }
                match record.links.as_ref() {
                    Some(links) => links.heartbeat.clone(),
                    None => return,
                }
            };

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                r = self.backend.heartbeat(&link) => r,
            };

            match self.handle_heartbeat(service_name, cancel, result) {
                Beat::Next(next) => delay = next,
                Beat::Stop => return,
            }
        }
    }

    fn handle_heartbeat(
        self: &Arc<Self>,
        service_name: &str,
        cancel: &CancellationToken,
        result: Result<BackendResponse>,
    ) -> Beat {
        match result {
            Ok(resp) if resp.status == StatusCode::OK => {
                let mut records = self.lock_records();
                let Some(record) = records.get_mut(service_name) else {
                    return Beat::Stop;
                };
                let stamp = HeartbeatStamp::now();
                if record
                    .last_heartbeat
                    .map_or(true, |prev| stamp.mono >= prev.mono)
                {
                    record.last_heartbeat = Some(stamp);
                }
                debug!("publisher: heartbeat sent, service={}", service_name);
                count_heartbeat(service_name, "success");
                Beat::Next(record.heartbeat_interval)
            }
            Ok(resp) if resp.status == StatusCode::GONE => {
                warn!(
                    "publisher: heartbeat rejected, registration gone, service={}",
                    service_name
                );
                count_heartbeat(service_name, "gone");
                self.expire(service_name, cancel);
                Beat::Stop
            }
            other => {
                let reason = match &other {
                    Ok(resp) => format!("status={}", resp.status),
                    Err(e) => format!("error={}", e),
                };
                count_heartbeat(service_name, "error");

                let lapsed = {
                    let records = self.lock_records();
                    let Some(record) = records.get(service_name) else {
                        return Beat::Stop;
                    };
                    let elapsed = record
                        .last_heartbeat
                        .map(|s| Instant::now().saturating_duration_since(s.mono))
                        .unwrap_or(Duration::ZERO);
                    elapsed >= record.ttl()
                };

                if lapsed {
                    warn!(
                        "publisher: heartbeat failed past TTL, service={}, {}",
                        service_name, reason
                    );
                    self.expire(service_name, cancel);
                    Beat::Stop
                } else {
                    warn!(
                        "publisher: heartbeat failed, retrying in {:?}, service={}, {}",
                        self.config.retry_delay, service_name, reason
                    );
                    Beat::Next(self.config.retry_delay)
                }
            }
        }
    }

    /// The calling heartbeat loop terminates after this.
    fn expire(self: &Arc<Self>, service_name: &str, cancel: &CancellationToken) {
        let recover = {
            let mut records = self.lock_records();
            let Some(record) = records.get_mut(service_name) else {
                return;
            };
            if cancel.is_cancelled() {
                return;
            }
            record.heartbeat_running = false;
            if record.state == RegistrationState::Unauthorized {
                return;
            }
            record.last_heartbeat = None;
            match record.state {
                // A re-publish is already in flight and will restart the heartbeat.
                RegistrationState::Registering => false,
                _ if self.config.auto_recovery => {
                    record.state = RegistrationState::Registering;
                    true
                }
                _ => {
                    record.state = RegistrationState::Expired;
                    false
                }
            }
        };

        error!("publisher: registration expired, service={}", service_name);
        metrics::counter!(
            "discovery_expired_total",
            "service_name" => service_name.to_string(),
        )
        .increment(1);
        self.emit(PublisherEvent::Expired(service_name.to_string()));

        if recover {
            info!("publisher: auto-recovering, service={}", service_name);
            self.clone()
                .spawn_registration(service_name.to_string(), cancel.clone());
        }
    }

    async fn deregister(&self, service_name: &str, self_link: &str) {
        match self.backend.deregister(self_link).await {
            Ok(resp) if resp.status.is_success() => {
                info!("publisher: deregistered, service={}", service_name);
            }
            Ok(resp) => {
                warn!(
                    "publisher: deregister failed, service={}, status={}",
                    service_name, resp.status
                );
            }
            Err(e) => {
                warn!(
                    "publisher: deregister failed, service={}, error={}",
                    service_name, e
                );
            }
        }
    }
}

fn count_register(service_name: &str, result: &'static str) {
    metrics::counter!(
        "discovery_register_total",
        "service_name" => service_name.to_string(),
        "result" => result,
    )
    .increment(1);
}

fn count_heartbeat(service_name: &str, result: &'static str) {
    metrics::counter!(
        "discovery_heartbeat_total",
        "service_name" => service_name.to_string(),
        "result" => result,
    )
    .increment(1);
}
