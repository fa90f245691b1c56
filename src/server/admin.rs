use super::AgentState;
use bytes::Bytes;
use http::header::{HeaderValue, CONTENT_TYPE};
use http::StatusCode;
use http_body_util::{BodyExt, Full};
use hyper::{Request, Response};

pub type BoxBody = http_body_util::combinators::BoxBody<Bytes, hyper::Error>;

fn full_body(data: impl Into<Bytes>) -> BoxBody {
    Full::new(data.into())
        .map_err(|never| match never {})
        .boxed()
}

fn respond(
    status: StatusCode,
    content_type: &'static str,
    body: impl Into<Bytes>,
) -> Response<BoxBody> {
    let mut resp = Response::new(full_body(body));
    *resp.status_mut() = status;
    resp.headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    resp
}

fn json(value: &serde_json::Value) -> Response<BoxBody> {
    let body = serde_json::to_string_pretty(value).unwrap_or_default();
    respond(StatusCode::OK, "application/json", body)
}

pub fn handle_admin<B>(req: &Request<B>, state: &AgentState) -> Response<BoxBody> {
    match req.uri().path() {
        "/health" | "/healthz" => json(&serde_json::json!({
            "status": "ok",
            "backend": state.config.backend.url,
        })),

        "/metrics" => respond(
            StatusCode::OK,
            "text/plain; version=0.0.4; charset=utf-8",
            state.metrics.render(),
        ),

        "/registrations" => {
            let registrations: Vec<serde_json::Value> = state
                .publisher
                .registrations()
                .iter()
                .map(|r| {
                    serde_json::json!({
                        "service_name": r.service_name,
                        "endpoint": r.endpoint,
                        "state": r.state.as_str(),
                        "instance_id": r.instance_id,
                        "heartbeat_interval_secs": r.heartbeat_interval.as_secs(),
                        "last_heartbeat": r
                            .last_heartbeat
                            .map(|t| humantime::format_rfc3339_seconds(t).to_string()),
                    })
                })
                .collect();
            json(&serde_json::Value::Array(registrations))
        }

        "/instances" => {
            let services: serde_json::Map<String, serde_json::Value> = state
                .locator
                .snapshot()
                .into_iter()
                .map(|(name, instances)| (name, serde_json::json!(instances)))
                .collect();
            json(&serde_json::json!({
                "policy": state.locator.policy_name(),
                "refresh_interval_secs": state.locator.refresh_interval().as_secs(),
                "services": services,
            }))
        }

        _ => respond(StatusCode::NOT_FOUND, "application/json", r#"{"error":"not found"}"#),
    }
}
