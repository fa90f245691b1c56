pub mod client;
pub mod locator;
pub mod publisher;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use client::{BackendResponse, DiscoveryBackend, HttpBackend};
pub use locator::{InstanceLocator, LocatorConfig, LocatorEvent};
pub use publisher::{InstancePublisher, PublisherConfig, PublisherEvent, RegistrationState};
pub use types::{InstanceListing, InstanceStatus, LookupOptions, PublishOptions};
