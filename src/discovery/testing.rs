//! Scripted in-memory backend for unit tests driven by tokio's paused clock.

use super::client::{BackendResponse, DiscoveryBackend};
use super::types::{InstanceQuery, RegistrationRequest};
use crate::error::{DiscoveryError, Result};
use async_trait::async_trait;
use http::StatusCode;
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub(crate) enum Call {
    Register(RegistrationRequest),
    Heartbeat(String),
    List(InstanceQuery),
    Deregister(String),
}

/// Replies are consumed in order; the last one repeats forever.
#[derive(Default)]
struct Script {
    replies: Mutex<VecDeque<Result<BackendResponse>>>,
}

impl Script {
    fn push(&self, reply: Result<BackendResponse>) {
        self.replies.lock().unwrap().push_back(reply);
    }

    fn next(&self) -> Result<BackendResponse> {
        let mut replies = self.replies.lock().unwrap();
        if replies.len() > 1 {
            return replies.pop_front().unwrap();
        }
        replies
            .front()
            .cloned()
            .unwrap_or_else(|| Err(DiscoveryError::Transient("no scripted reply".into())))
    }
}

#[derive(Default)]
pub(crate) struct ScriptedBackend {
    register: Script,
    heartbeat: Script,
    list: Script,
    deregister: Script,
    calls: Mutex<Vec<(Instant, Call)>>,
}

pub(crate) fn reply(status: u16, body: &str) -> Result<BackendResponse> {
    Ok(BackendResponse::new(
        StatusCode::from_u16(status).unwrap(),
        body,
    ))
}

pub(crate) fn transport_error() -> Result<BackendResponse> {
    Err(DiscoveryError::Transient("connection refused".into()))
}

pub(crate) const REGISTERED_BODY: &str =
    r#"{"id":"x","ttl":30,"links":{"self":"/i/x","heartbeat":"/i/x/hb"}}"#;

impl ScriptedBackend {
    pub(crate) fn on_register(&self, r: Result<BackendResponse>) -> &Self {
        self.register.push(r);
        self
    }

    pub(crate) fn on_heartbeat(&self, r: Result<BackendResponse>) -> &Self {
        self.heartbeat.push(r);
        self
    }

    pub(crate) fn on_list(&self, r: Result<BackendResponse>) -> &Self {
        self.list.push(r);
        self
    }

    pub(crate) fn on_deregister(&self, r: Result<BackendResponse>) -> &Self {
        self.deregister.push(r);
        self
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push((Instant::now(), call));
    }

    pub(crate) fn calls(&self) -> Vec<(Instant, Call)> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn registrations(&self) -> Vec<(Instant, RegistrationRequest)> {
        self.calls()
            .into_iter()
            .filter_map(|(at, c)| match c {
                Call::Register(r) => Some((at, r)),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn heartbeats(&self) -> Vec<(Instant, String)> {
        self.calls()
            .into_iter()
            .filter_map(|(at, c)| match c {
                Call::Heartbeat(link) => Some((at, link)),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn lists(&self) -> Vec<(Instant, InstanceQuery)> {
        self.calls()
            .into_iter()
            .filter_map(|(at, c)| match c {
                Call::List(q) => Some((at, q)),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn deregistrations(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|(_, c)| match c {
                Call::Deregister(link) => Some(link),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl DiscoveryBackend for ScriptedBackend {
    async fn register(&self, registration: &RegistrationRequest) -> Result<BackendResponse> {
        self.record(Call::Register(registration.clone()));
        self.register.next()
    }

    async fn heartbeat(&self, heartbeat_link: &str) -> Result<BackendResponse> {
        self.record(Call::Heartbeat(heartbeat_link.to_string()));
        self.heartbeat.next()
    }

    async fn list_instances(&self, query: &InstanceQuery) -> Result<BackendResponse> {
        self.record(Call::List(query.clone()));
        self.list.next()
    }

    async fn deregister(&self, self_link: &str) -> Result<BackendResponse> {
        self.record(Call::Deregister(self_link.to_string()));
        self.deregister.next()
    }
}
