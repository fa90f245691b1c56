use super::SelectionPolicy;
use rand::Rng;

/// Uniform random pick.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomPolicy;

impl RandomPolicy {
    pub fn pick<'a>(instances: &'a [String]) -> Option<&'a str> {
        if instances.is_empty() {
            return None;
        }
        let idx = rand::thread_rng().gen_range(0..instances.len());
        Some(instances[idx].as_str())
    }
}

impl SelectionPolicy for RandomPolicy {
    fn select<'a>(
        &self,
        _service_name: &str,
        instances: &'a [String],
        _args: &[&str],
    ) -> Option<&'a str> {
        Self::pick(instances)
    }

    fn name(&self) -> &'static str {
        "random"
    }
}
