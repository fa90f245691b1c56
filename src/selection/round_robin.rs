use super::SelectionPolicy;
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Rotation over the cached list using a modular counter.
///
/// Each service name gets its own cursor, so sharing one policy object across
/// services does not interleave their rotations.
#[derive(Debug, Default)]
pub struct RoundRobinPolicy {
    cursors: DashMap<String, AtomicUsize>,
}

impl RoundRobinPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_cursor(&self, service_name: &str) -> usize {
        if let Some(cursor) = self.cursors.get(service_name) {
            return cursor.fetch_add(1, Ordering::Relaxed);
        }
        self.cursors
            .entry(service_name.to_string())
            .or_default()
            .fetch_add(1, Ordering::Relaxed)
    }
}

impl SelectionPolicy for RoundRobinPolicy {
    fn select<'a>(
        &self,
        service_name: &str,
        instances: &'a [String],
        _args: &[&str],
    ) -> Option<&'a str> {
        if instances.is_empty() {
            return None;
        }
        let idx = self.next_cursor(service_name) % instances.len();
        Some(instances[idx].as_str())
    }

    fn name(&self) -> &'static str {
        "round_robin"
    }
}
