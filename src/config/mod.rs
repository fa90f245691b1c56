pub mod types;

#[cfg(test)]
mod tests;

pub use types::*;

use crate::selection::policy_from_name;
use anyhow::Result;
use std::path::Path;

impl AgentConfig {
    /// Load configuration from a file (if it exists), apply environment
    /// variable overrides, then validate. A missing file means built-in
    /// defaults; the token can then come from the environment.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config: AgentConfig = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            Self::parse(&content, path)?
        } else {
            tracing::info!("config file not found at {}, using defaults", path.display());
            AgentConfig::default()
        };

        config.apply_env_overrides();

        config.validate()?;
        tracing::info!(
            services = config.services.len(),
            discover = config.locator.discover.len(),
            backend = %config.backend.url,
            "loaded discovery agent configuration"
        );
        Ok(config)
    }

    fn parse(content: &str, path: &Path) -> Result<Self> {
        Ok(match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => toml::from_str(content)?,
            Some("json") => serde_json::from_str(content)?,
            Some(ext) => anyhow::bail!("unsupported config format: .{ext}, use .toml or .json"),
            None => anyhow::bail!("config file has no extension, use .toml or .json"),
        })
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Connection settings only. Service definitions stay in the file.
    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(v) = var("HERMES_DISCOVERY_URL") {
            self.backend.url = v;
        }
        if let Some(v) = var("HERMES_DISCOVERY_TOKEN") {
            self.backend.token = Some(v);
        }
        if let Some(v) = var("HERMES_DISCOVERY_REFRESH_INTERVAL") {
            if let Ok(n) = v.parse::<u64>() {
                self.locator.refresh_interval_secs = n;
            }
        }
        if let Some(v) = var("HERMES_DISCOVERY_POLICY") {
            self.locator.policy = v;
        }

        let has_token = self.backend.token.as_deref().is_some_and(|t| !t.is_empty());
        if !has_token {
            if let Some(vcap) = var("VCAP_SERVICES") {
                match credentials_from_vcap(&vcap) {
                    Ok(Some((url, token))) => {
                        tracing::info!("config: using service_discovery credentials from VCAP_SERVICES");
                        if let Some(url) = url {
                            self.backend.url = url;
                        }
                        self.backend.token = Some(token);
                    }
                    Ok(None) => {}
                    Err(e) => tracing::warn!("config: ignoring malformed VCAP_SERVICES, error={}", e),
                }
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self.backend.token.as_deref() {
            Some(t) if !t.is_empty() => {}
            _ => anyhow::bail!(
                "backend token is required (set backend.token, HERMES_DISCOVERY_TOKEN or VCAP_SERVICES)"
            ),
        }
        if self.backend.url.trim().is_empty() {
            anyhow::bail!("backend url must not be empty");
        }
        if self.backend.request_timeout_ms == 0 {
            anyhow::bail!("backend request_timeout_ms must be > 0");
        }
        if policy_from_name(&self.locator.policy).is_none() {
            anyhow::bail!(
                "unknown selection policy '{}', use random, round_robin or affinity",
                self.locator.policy
            );
        }
        for name in &self.locator.discover {
            if name.is_empty() {
                anyhow::bail!("locator.discover has an empty service name");
            }
        }
        for svc in &self.services {
            if svc.service_name.is_empty() {
                anyhow::bail!("service with endpoint '{}' has empty service_name", svc.endpoint);
            }
            if svc.endpoint.is_empty() {
                anyhow::bail!("service '{}' has empty endpoint", svc.service_name);
            }
            if svc.ttl_secs == 0 {
                anyhow::bail!("service '{}' has ttl_secs 0", svc.service_name);
            }
        }
        Ok(())
    }
}

/// Extract `(url, auth_token)` of the first `service_discovery` binding.
pub fn credentials_from_vcap(raw: &str) -> Result<Option<(Option<String>, String)>> {
    let vcap: VcapServices = serde_json::from_str(raw)?;
    Ok(vcap
        .service_discovery
        .into_iter()
        .next()
        .map(|b| (b.credentials.url, b.credentials.auth_token)))
}
