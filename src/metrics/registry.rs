use anyhow::Result;
use metrics::{describe_counter, describe_gauge, describe_histogram, Unit};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};

/// Histogram bucket boundaries for backend round-trips (seconds).
const LATENCY_BUCKETS: &[f64] = &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 1.5, 2.5, 5.0];

/// Thin handle around the global metrics recorder.
///
/// After `Metrics::install()` the `metrics` crate macros can be used anywhere
/// in the crate. The `PrometheusHandle` is retained for rendering `/metrics`.
#[derive(Clone)]
pub struct Metrics {
    handle: PrometheusHandle,
}

impl Metrics {
    /// Install the global Prometheus recorder and register metric descriptions.
    /// Call once at startup.
    pub fn install() -> Result<Self> {
        let handle = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("_duration_seconds".to_string()),
                LATENCY_BUCKETS,
            )?
            .install_recorder()?;

        // publisher
        describe_counter!(
            "discovery_register_total",
            Unit::Count,
            "Registration attempts by result"
        );
        describe_counter!(
            "discovery_heartbeat_total",
            Unit::Count,
            "Heartbeat attempts by result"
        );
        describe_counter!(
            "discovery_expired_total",
            Unit::Count,
            "Registrations the backend no longer recognised"
        );

        // locator
        describe_counter!(
            "discovery_poll_total",
            Unit::Count,
            "Instance list polls by result"
        );
        describe_histogram!(
            "discovery_poll_duration_seconds",
            Unit::Seconds,
            "Instance list poll round-trip time"
        );
        describe_gauge!(
            "discovery_cached_instances",
            Unit::Count,
            "Instances in the last successful poll per service"
        );

        Ok(Self { handle })
    }

    /// Render all metrics in Prometheus text exposition format.
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

#[cfg(test)]
impl Metrics {
    /// A handle backed by a recorder that is never installed globally.
    pub(crate) fn detached() -> Self {
        Self {
            handle: PrometheusBuilder::new().build_recorder().handle(),
        }
    }
}
