//! Runtime settings and per-seller agent configuration

use clap::{Args, ValueEnum};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::error::{AgentError, Result};
use crate::types::SellerId;

/// Load a `.env` file from the working directory if one exists.
///
/// Must run before [`AgentSettings`] is parsed so that `env = ...` fallbacks see it.
pub fn load_env() {
    if let Ok(path) = dotenvy::dotenv() {
        tracing::debug!("Loaded environment from {}", path.display());
    }
}

/// Process-wide runtime settings. Every flag can also come from the environment.
#[derive(Args, Clone, Debug)]
pub struct AgentSettings {
    /// Number of queue workers
    #[arg(long, env = "NEGOTIATOR_WORKERS", default_value_t = 2)]
    pub workers: usize,

    /// Queue poll interval in milliseconds
    #[arg(long, env = "NEGOTIATOR_POLL_INTERVAL_MS", default_value_t = 250)]
    pub poll_interval_ms: u64,

    /// Wall-clock budget for one decision, in milliseconds
    #[arg(long, env = "NEGOTIATOR_DECISION_TIMEOUT_MS", default_value_t = 2_000)]
    pub decision_timeout_ms: u64,

    /// Maximum number of reasoning steps before the decision fails closed
    #[arg(long, env = "NEGOTIATOR_MAX_REASONING_STEPS", default_value_t = 4)]
    pub max_reasoning_steps: u32,

    /// Rounds after which the agent must close the negotiation
    #[arg(long, env = "NEGOTIATOR_MAX_ROUNDS", default_value_t = 10)]
    pub max_rounds: u32,

    /// Lifetime of a new negotiation in hours
    #[arg(long, env = "NEGOTIATOR_NEGOTIATION_TTL_HOURS", default_value_t = 168)]
    pub negotiation_ttl_hours: i64,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            workers: 2,
            poll_interval_ms: 250,
            decision_timeout_ms: 2_000,
            max_reasoning_steps: 4,
            max_rounds: 10,
            negotiation_ttl_hours: 168,
        }
    }
}

impl AgentSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn decision_timeout(&self) -> Duration {
        Duration::from_millis(self.decision_timeout_ms)
    }

    pub fn negotiation_ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(self.negotiation_ttl_hours)
    }

    /// Reject settings the dispatch layer cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(AgentError::InvalidConfig("workers must be at least 1".to_string()));
        }
        if self.poll_interval_ms == 0 {
            return Err(AgentError::InvalidConfig(
                "poll interval must be non-zero".to_string(),
            ));
        }
        if self.decision_timeout_ms == 0 {
            return Err(AgentError::InvalidConfig(
                "decision timeout must be non-zero".to_string(),
            ));
        }
        if self.max_reasoning_steps == 0 {
            return Err(AgentError::InvalidConfig(
                "max reasoning steps must be at least 1".to_string(),
            ));
        }
        if self.max_rounds == 0 {
            return Err(AgentError::InvalidConfig("max rounds must be at least 1".to_string()));
        }
        if self.negotiation_ttl_hours <= 0 {
            return Err(AgentError::InvalidConfig(
                "negotiation ttl must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// How hard the agent holds out on the seller's behalf
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Aggressiveness {
    Passive,
    #[default]
    Moderate,
    Aggressive,
}

impl Aggressiveness {
    /// Shift applied to the seller's discount factor. A more patient seller
    /// (higher factor) captures more of the surplus.
    pub fn patience_shift(&self) -> f64 {
        match self {
            Aggressiveness::Passive => -0.03,
            Aggressiveness::Moderate => 0.0,
            Aggressiveness::Aggressive => 0.03,
        }
    }
}

/// Per-seller tunables
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SellerAgentConfiguration {
    pub agent_enabled: bool,
    pub aggressiveness: Aggressiveness,
    /// Fraction of the listing price at or above which offers are accepted outright
    pub auto_accept_threshold: f64,
    /// Fraction of the listing price below which the agent will not counter
    pub min_acceptable_ratio: f64,
    pub response_delay_minutes: u32,
}

impl Default for SellerAgentConfiguration {
    fn default() -> Self {
        Self {
            agent_enabled: true,
            aggressiveness: Aggressiveness::Moderate,
            auto_accept_threshold: 0.95,
            min_acceptable_ratio: 0.70,
            response_delay_minutes: 0,
        }
    }
}

impl SellerAgentConfiguration {
    pub fn validate(&self) -> Result<()> {
        let in_unit = |v: f64| v.is_finite() && v > 0.0 && v <= 1.0;
        if !in_unit(self.auto_accept_threshold) {
            return Err(AgentError::InvalidConfig(format!(
                "auto accept threshold must be in (0, 1], got {}",
                self.auto_accept_threshold
            )));
        }
        if !in_unit(self.min_acceptable_ratio) {
            return Err(AgentError::InvalidConfig(format!(
                "min acceptable ratio must be in (0, 1], got {}",
                self.min_acceptable_ratio
            )));
        }
        if self.min_acceptable_ratio > self.auto_accept_threshold {
            return Err(AgentError::InvalidConfig(
                "min acceptable ratio cannot exceed the auto accept threshold".to_string(),
            ));
        }
        Ok(())
    }

    pub fn response_delay(&self) -> chrono::Duration {
        chrono::Duration::minutes(i64::from(self.response_delay_minutes))
    }
}

/// Seller configuration store. Entries are created with defaults on first
/// access and are never deleted, only reset.
#[derive(Clone, Default)]
pub struct SellerConfigStore {
    configs: Arc<RwLock<HashMap<SellerId, SellerAgentConfiguration>>>,
}

impl SellerConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a seller's configuration, creating the default entry if needed
    pub async fn get(&self, seller: SellerId) -> SellerAgentConfiguration {
        if let Some(config) = self.configs.read().await.get(&seller) {
            return config.clone();
        }

        let mut configs = self.configs.write().await;
        configs
            .entry(seller)
            .or_insert_with(|| {
                tracing::debug!("Creating default agent configuration for {}", seller);
                SellerAgentConfiguration::default()
            })
            .clone()
    }

    /// Replace a seller's configuration
    pub async fn update(&self, seller: SellerId, config: SellerAgentConfiguration) -> Result<()> {
        config.validate()?;
        self.configs.write().await.insert(seller, config);
        tracing::info!("Updated agent configuration for {}", seller);
        Ok(())
    }

    /// Reset a seller's configuration to the defaults
    pub async fn reset(&self, seller: SellerId) -> SellerAgentConfiguration {
        let config = SellerAgentConfiguration::default();
        self.configs.write().await.insert(seller, config.clone());
        config
    }

    pub async fn len(&self) -> usize {
        self.configs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.configs.read().await.is_empty()
    }
}
