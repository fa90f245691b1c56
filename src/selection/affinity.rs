use super::random::RandomPolicy;
use super::SelectionPolicy;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Sticky selection: maps a client id (first selector argument) to the
/// instance whose hash is numerically closest to the client's hash.
///
/// Falls back to a random pick when no client id is given.
#[derive(Debug, Default, Clone, Copy)]
pub struct AffinityPolicy;

fn hash_key(key: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    hasher.finish()
}

impl SelectionPolicy for AffinityPolicy {
    fn select<'a>(
        &self,
        _service_name: &str,
        instances: &'a [String],
        args: &[&str],
    ) -> Option<&'a str> {
        let Some(client_id) = args.first().filter(|c| !c.is_empty()) else {
            return RandomPolicy::pick(instances);
        };

        let target = hash_key(client_id);
        instances
            .iter()
            .min_by_key(|instance| hash_key(instance).abs_diff(target))
            .map(String::as_str)
    }

    fn name(&self) -> &'static str {
        "affinity"
    }
}
