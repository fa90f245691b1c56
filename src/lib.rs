pub mod config;
pub mod discovery;
pub mod error;
pub mod metrics;
pub mod selection;
pub mod server;

pub use discovery::{InstanceLocator, InstancePublisher};
pub use error::{DiscoveryError, Result};
pub use selection::SelectionPolicy;
