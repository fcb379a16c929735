use std::fs;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use nexcrm_auth::AccessPolicy;

pub const BYPASS_ROLES_ENV: &str = "NEXCRM_BYPASS_ROLES";
pub const STORE_TIMEOUT_ENV: &str = "NEXCRM_STORE_TIMEOUT_MS";
pub const POLICY_CONFIG_ENV: &str = "NEXCRM_POLICY_CONFIG";

/// Engine configuration sourced from environment variables, optionally
/// overridden by a JSON file.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub policy: AccessPolicy,
    /// Upper bound for each store call; `None` leaves calls unbounded.
    pub store_timeout: Option<Duration>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct EngineConfigOverride {
    bypass_roles: Option<Vec<String>>,
    store_timeout_ms: Option<u64>,
}

impl EngineConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as `from_env`, reading variables through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup(BYPASS_ROLES_ENV) {
            config.policy = AccessPolicy::with_bypass_roles(split_list(&raw));
        }
        if let Some(raw) = lookup(STORE_TIMEOUT_ENV) {
            let millis: u64 = raw
                .trim()
                .parse()
                .with_context(|| format!("parse {STORE_TIMEOUT_ENV}"))?;
            config.store_timeout = Some(Duration::from_millis(millis));
        }
        if let Some(path) = lookup(POLICY_CONFIG_ENV) {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("read {POLICY_CONFIG_ENV}: {path}"))?;
            config.apply_json(&contents)?;
        }

        tracing::debug!(
            bypass_roles = config.policy.bypass_roles.len(),
            store_timeout_ms = config.store_timeout.map(|d| d.as_millis() as u64),
            "engine config loaded"
        );
        Ok(config)
    }

    /// Apply a JSON override document; absent keys keep their current value.
    pub fn apply_json(&mut self, contents: &str) -> Result<()> {
        let overrides: EngineConfigOverride =
            serde_json::from_str(contents).with_context(|| "parse engine config json")?;
        if let Some(roles) = overrides.bypass_roles {
            self.policy = AccessPolicy::with_bypass_roles(roles);
        }
        if let Some(millis) = overrides.store_timeout_ms {
            self.store_timeout = Some(Duration::from_millis(millis));
        }
        Ok(())
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_without_environment() {
        let config = EngineConfig::from_lookup(lookup(&[])).unwrap();
        assert!(config.policy.bypass_roles.contains("admin"));
        assert!(config.policy.bypass_roles.contains("Super Admin"));
        assert_eq!(config.store_timeout, None);
    }

    #[test]
    fn environment_overrides_defaults() {
        let config = EngineConfig::from_lookup(lookup(&[
            (BYPASS_ROLES_ENV, " owner , root ,"),
            (STORE_TIMEOUT_ENV, "250"),
        ]))
        .unwrap();
        assert_eq!(config.policy.bypass_roles.len(), 2);
        assert!(config.policy.bypass_roles.contains("owner"));
        assert!(!config.policy.bypass_roles.contains("admin"));
        assert_eq!(config.store_timeout, Some(Duration::from_millis(250)));
    }

    #[test]
    fn bad_timeout_is_an_error() {
        let err = EngineConfig::from_lookup(lookup(&[(STORE_TIMEOUT_ENV, "soon")])).unwrap_err();
        assert!(err.to_string().contains(STORE_TIMEOUT_ENV));
    }

    #[test]
    fn json_overrides_only_present_keys() {
        let mut config = EngineConfig::from_lookup(lookup(&[(STORE_TIMEOUT_ENV, "100")])).unwrap();
        config.apply_json(r#"{"bypass_roles": ["Owner"]}"#).unwrap();
        assert!(config.policy.bypass_roles.contains("Owner"));
        assert_eq!(config.store_timeout, Some(Duration::from_millis(100)));

        assert!(config.apply_json(r#"{"bypass": []}"#).is_err());
    }

    #[test]
    fn missing_config_file_is_reported() {
        let err = EngineConfig::from_lookup(lookup(&[(POLICY_CONFIG_ENV, "/nonexistent/nexcrm.json")]))
            .unwrap_err();
        assert!(err.to_string().contains("/nonexistent/nexcrm.json"));
    }
}
