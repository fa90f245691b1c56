use crate::config::AgentConfig;
use crate::discovery::{InstanceLocator, InstancePublisher};
use crate::metrics::Metrics;
use std::sync::Arc;

/// Everything the admin endpoint reads. Cloning is cheap.
#[derive(Clone)]
pub struct AgentState {
    pub config: Arc<AgentConfig>,
    pub publisher: InstancePublisher,
    pub locator: InstanceLocator,
    pub metrics: Metrics,
}
