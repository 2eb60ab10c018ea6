use anyhow::{Context, Result};
use ethers::types::Address;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;

use crate::types::RiskProfile;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RebalancerConfig {
    // Account and chain
    pub chain_id: u64,
    pub wallet_address: Address,

    // Collaborator endpoints
    pub analytics_endpoint: String,
    pub execution_endpoint: String,

    // Monitoring
    pub position_ids: Vec<String>,
    pub cycle_interval_secs: u64,
    pub metrics_port: u16,

    // Strategy
    pub risk_profile: RiskProfile,
    pub min_utilization_pct: f64,
    pub high_volatility_pct: f64,
    pub swap_imbalance_threshold: f64,
    pub dry_run: bool,

    pub advisor: AdvisorConfig,
    pub notifier: NotifierConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvisorConfig {
    pub enabled: bool,
    pub endpoint: String,
    pub model: String,
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifierConfig {
    pub webhook_url: Option<String>,
}

impl Default for RebalancerConfig {
    fn default() -> Self {
        Self {
            chain_id: 137,
            wallet_address: Address::zero(),

            analytics_endpoint:
                "https://api.thegraph.com/subgraphs/name/uniswap/uniswap-v3-polygon".to_string(),
            execution_endpoint: "http://127.0.0.1:8900".to_string(),

            position_ids: Vec::new(),
            cycle_interval_secs: 300,
            metrics_port: 9102,

            risk_profile: RiskProfile::Medium,
            min_utilization_pct: 20.0,
            high_volatility_pct: 5.0,
            swap_imbalance_threshold: 0.10,
            dry_run: true,

            advisor: AdvisorConfig {
                enabled: false,
                endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
                model: "gpt-4o-mini".to_string(),
                api_key: None,
            },
            notifier: NotifierConfig { webhook_url: None },
        }
    }
}

impl RebalancerConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults for anything unset.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        let mut config = Self::default();

        if let Ok(chain) = env::var("CHAIN_ID") {
            config.chain_id = chain.parse().context("Invalid CHAIN_ID")?;
        }
        if let Ok(wallet) = env::var("WALLET_ADDRESS") {
            config.wallet_address = wallet.parse().context("Invalid WALLET_ADDRESS")?;
        }
        if let Ok(endpoint) = env::var("ANALYTICS_ENDPOINT") {
            config.analytics_endpoint = endpoint;
        }
        if let Ok(endpoint) = env::var("EXECUTION_ENDPOINT") {
            config.execution_endpoint = endpoint;
        }
        if let Ok(ids) = env::var("POSITION_IDS") {
            config.position_ids = ids
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Ok(interval) = env::var("CYCLE_INTERVAL_SECS") {
            config.cycle_interval_secs = interval.parse().context("Invalid CYCLE_INTERVAL_SECS")?;
        }
        if let Ok(port) = env::var("METRICS_PORT") {
            config.metrics_port = port.parse().context("Invalid METRICS_PORT")?;
        }
        if let Ok(profile) = env::var("RISK_PROFILE") {
            config.risk_profile = profile
                .parse()
                .map_err(|e: String| anyhow::anyhow!(e))
                .context("Invalid RISK_PROFILE")?;
        }
        if let Ok(min_util) = env::var("MIN_UTILIZATION_PCT") {
            config.min_utilization_pct = min_util.parse().unwrap_or(config.min_utilization_pct);
        }
        if let Ok(high_vol) = env::var("HIGH_VOLATILITY_PCT") {
            config.high_volatility_pct = high_vol.parse().unwrap_or(config.high_volatility_pct);
        }
        if let Ok(threshold) = env::var("SWAP_IMBALANCE_THRESHOLD") {
            config.swap_imbalance_threshold =
                threshold.parse().unwrap_or(config.swap_imbalance_threshold);
        }
        if let Ok(dry_run) = env::var("DRY_RUN") {
            config.dry_run = dry_run.parse().unwrap_or(true);
        }

        if let Ok(enabled) = env::var("ADVISOR_ENABLED") {
            config.advisor.enabled = enabled.parse().unwrap_or(false);
        }
        if let Ok(endpoint) = env::var("ADVISOR_ENDPOINT") {
            config.advisor.endpoint = endpoint;
        }
        if let Ok(model) = env::var("ADVISOR_MODEL") {
            config.advisor.model = model;
        }
        if let Ok(key) = env::var("ADVISOR_API_KEY") {
            config.advisor.api_key = Some(key);
        }
        if let Ok(url) = env::var("NOTIFY_WEBHOOK_URL") {
            config.notifier.webhook_url = Some(url);
        }

        Ok(config)
    }

    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path).context("Failed to read config file")?;
        toml::from_str(&content).context("Failed to parse config file")
    }

    pub fn validate(&self) -> Result<()> {
        if self.cycle_interval_secs == 0 {
            anyhow::bail!("cycle_interval_secs must be positive");
        }
        if self.analytics_endpoint.is_empty() || self.execution_endpoint.is_empty() {
            anyhow::bail!("analytics and execution endpoints must be set");
        }
        if !(0.0..=100.0).contains(&self.min_utilization_pct) {
            anyhow::bail!("min_utilization_pct must be within [0, 100]");
        }
        if self.high_volatility_pct <= 0.0 {
            anyhow::bail!("high_volatility_pct must be positive");
        }
        if self.swap_imbalance_threshold <= 0.0 || self.swap_imbalance_threshold >= 1.0 {
            anyhow::bail!("swap_imbalance_threshold must be between 0 and 1");
        }
        if self.advisor.enabled {
            if self.advisor.api_key.is_none() {
                anyhow::bail!("ADVISOR_API_KEY required when the advisor is enabled");
            }
            if self.advisor.endpoint.is_empty() || self.advisor.model.is_empty() {
                anyhow::bail!("advisor endpoint and model must be set when enabled");
            }
        }
        if !self.dry_run && self.wallet_address == Address::zero() {
            anyhow::bail!("wallet_address required for live execution");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_validates() {
        let config = RebalancerConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = RebalancerConfig::default();
        config.swap_imbalance_threshold = 1.5;
        assert!(config.validate().is_err());

        config = RebalancerConfig::default();
        config.cycle_interval_secs = 0;
        assert!(config.validate().is_err());

        // Advisor enabled without credentials
        config = RebalancerConfig::default();
        config.advisor.enabled = true;
        config.advisor.api_key = None;
        assert!(config.validate().is_err());

        // Live mode without a wallet
        config = RebalancerConfig::default();
        config.dry_run = false;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_env_overrides() {
        env::set_var("RISK_PROFILE", "aggressive");
        env::set_var("POSITION_IDS", "12345, 67890");
        env::set_var("CYCLE_INTERVAL_SECS", "120");

        let config = RebalancerConfig::from_env().unwrap();
        assert_eq!(config.risk_profile, RiskProfile::Aggressive);
        assert_eq!(config.position_ids, vec!["12345", "67890"]);
        assert_eq!(config.cycle_interval_secs, 120);

        env::remove_var("RISK_PROFILE");
        env::remove_var("POSITION_IDS");
        env::remove_var("CYCLE_INTERVAL_SECS");
    }

    #[test]
    fn test_from_file_round_trip() {
        let config = RebalancerConfig::default();
        let serialized = toml::to_string(&config).unwrap();

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(serialized.as_bytes()).unwrap();

        let loaded = RebalancerConfig::from_file(file.path()).unwrap();
        assert_eq!(loaded.chain_id, config.chain_id);
        assert_eq!(loaded.risk_profile, config.risk_profile);
        assert_eq!(loaded.dry_run, config.dry_run);
    }
}
