use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use cachebroker_engine::ProviderConfig;

const MIN_RECOVERY_WINDOW_DAYS: u32 = 7;
const MAX_RECOVERY_WINDOW_DAYS: u32 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretBackend {
    Memory,
    Kubernetes,
}

impl FromStr for SecretBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "memory" => Ok(SecretBackend::Memory),
            "kubernetes" => Ok(SecretBackend::Kubernetes),
            other => bail!(
                "unknown secret backend '{}' (expected 'memory' or 'kubernetes')",
                other
            ),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub server_host: String,
    pub server_port: u16,
    pub secrets_path: String,
    pub secret_backend: SecretBackend,
    pub secret_namespace: String,
    pub recovery_window_days: u32,
    pub call_timeout: Duration,
    pub simulated_settle_polls: u32,
    pub parameter_group_family: String,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let recovery_window_days: u32 = var("BROKER_RECOVERY_WINDOW_DAYS", "7")
            .parse()
            .context("BROKER_RECOVERY_WINDOW_DAYS must be a number of days")?;
        if !(MIN_RECOVERY_WINDOW_DAYS..=MAX_RECOVERY_WINDOW_DAYS).contains(&recovery_window_days) {
            bail!(
                "BROKER_RECOVERY_WINDOW_DAYS must be between {} and {}, got {}",
                MIN_RECOVERY_WINDOW_DAYS,
                MAX_RECOVERY_WINDOW_DAYS,
                recovery_window_days
            );
        }

        let call_timeout_secs: u64 = var("BROKER_CALL_TIMEOUT_SECS", "30")
            .parse()
            .context("BROKER_CALL_TIMEOUT_SECS must be a number of seconds")?;
        if call_timeout_secs == 0 {
            bail!("BROKER_CALL_TIMEOUT_SECS must be greater than zero");
        }

        Ok(Self {
            server_host: var("BROKER_HOST", "0.0.0.0"),
            server_port: var("BROKER_PORT", "8080")
                .parse()
                .context("BROKER_PORT must be a valid port number")?,
            secrets_path: var("BROKER_SECRETS_PATH", "cachebroker"),
            secret_backend: var("BROKER_SECRET_BACKEND", "memory").parse()?,
            secret_namespace: var("BROKER_SECRET_NAMESPACE", "cachebroker"),
            recovery_window_days,
            call_timeout: Duration::from_secs(call_timeout_secs),
            simulated_settle_polls: var("BROKER_SIMULATED_SETTLE_POLLS", "2")
                .parse()
                .context("BROKER_SIMULATED_SETTLE_POLLS must be a number")?,
            parameter_group_family: var("BROKER_PARAMETER_GROUP_FAMILY", "redis7"),
        })
    }

    pub fn provider_config(&self) -> ProviderConfig {
        ProviderConfig {
            secrets_base_path: self.secrets_path.clone(),
            recovery_window_days: self.recovery_window_days,
            call_timeout: self.call_timeout,
            default_parameter_group_family: self.parameter_group_family.clone(),
            ..Default::default()
        }
    }
}

/// Base URL of a running broker, for CLI subcommands
pub fn api_url() -> String {
    std::env::var("BROKER_API_URL").unwrap_or_else(|_| "http://localhost:8080".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config.server_host, "0.0.0.0");
        assert_eq!(config.server_port, 8080);
        assert_eq!(config.secrets_path, "cachebroker");
        assert_eq!(config.secret_backend, SecretBackend::Memory);
        assert_eq!(config.recovery_window_days, 7);
        assert_eq!(config.call_timeout, Duration::from_secs(30));
        assert_eq!(config.simulated_settle_polls, 2);
    }

    #[test]
    fn test_overrides_flow_into_provider_config() {
        let config = load(&[
            ("BROKER_SECRETS_PATH", "brokers/prod"),
            ("BROKER_RECOVERY_WINDOW_DAYS", "30"),
            ("BROKER_CALL_TIMEOUT_SECS", "5"),
            ("BROKER_SECRET_BACKEND", "kubernetes"),
        ])
        .unwrap();
        assert_eq!(config.secret_backend, SecretBackend::Kubernetes);

        let provider = config.provider_config();
        assert_eq!(provider.secrets_base_path, "brokers/prod");
        assert_eq!(provider.recovery_window_days, 30);
        assert_eq!(provider.call_timeout, Duration::from_secs(5));
        assert_eq!(provider.broker_name, "cachebroker");
    }

    #[test]
    fn test_recovery_window_bounds() {
        assert!(load(&[("BROKER_RECOVERY_WINDOW_DAYS", "6")]).is_err());
        assert!(load(&[("BROKER_RECOVERY_WINDOW_DAYS", "31")]).is_err());
        assert!(load(&[("BROKER_RECOVERY_WINDOW_DAYS", "week")]).is_err());
    }

    #[test]
    fn test_invalid_values() {
        assert!(load(&[("BROKER_PORT", "http")]).is_err());
        assert!(load(&[("BROKER_CALL_TIMEOUT_SECS", "0")]).is_err());
        assert!(load(&[("BROKER_SECRET_BACKEND", "vault")]).is_err());
    }
}
