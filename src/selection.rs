pub mod affinity;
pub mod random;
pub mod round_robin;

pub use affinity::AffinityPolicy;
pub use random::RandomPolicy;
pub use round_robin::RoundRobinPolicy;

/// Picks one instance out of the cached list for a service.
///
/// `args` are the extra selector arguments handed to
/// `InstanceLocator::select_instance` (e.g. a client id for affinity).
pub trait SelectionPolicy: Send + Sync {
    fn select<'a>(
        &self,
        service_name: &str,
        instances: &'a [String],
        args: &[&str],
    ) -> Option<&'a str>;

    fn name(&self) -> &'static str;
}

/// Build a policy from its configuration name.
pub fn policy_from_name(name: &str) -> Option<Box<dyn SelectionPolicy>> {
    match name {
        "random" => Some(Box::new(RandomPolicy)),
        "round_robin" | "roundrobin" => Some(Box::new(RoundRobinPolicy::new())),
        "affinity" | "sticky" => Some(Box::new(AffinityPolicy)),
        _ => None,
    }
}
