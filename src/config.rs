//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Secrets (API keys, the trigger secret) are referenced by env-var name
//! in the config and resolved at runtime via `std::env::var`.

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use secrecy::SecretString;
use serde::Deserialize;
use std::fs;

use crate::types::{PickboardError, RunScope};

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub competition: CompetitionConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub market_data: MarketDataConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub trigger: TriggerConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CompetitionConfig {
    /// Competition resolved when a trigger doesn't name one.
    pub id: String,
    /// First day of week 1.
    pub start_date: NaiveDate,
}

impl Default for CompetitionConfig {
    fn default() -> Self {
        Self {
            id: "default".to_string(),
            start_date: NaiveDate::from_ymd_opt(2026, 1, 5).unwrap_or_default(),
        }
    }
}

impl CompetitionConfig {
    /// Competition week containing `date` (1-based, clamped to week 1).
    pub fn week_for(&self, date: NaiveDate) -> u32 {
        let days = (date - self.start_date).num_days();
        if days < 0 {
            1
        } else {
            (days / 7) as u32 + 1
        }
    }

    /// Default scope: this competition, current week.
    pub fn current_scope(&self) -> RunScope {
        RunScope::new(self.id.clone(), self.week_for(Utc::now().date_naive()))
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EngineConfig {
    /// Minimum delay between sequential equity quote requests.
    pub equity_request_delay_ms: u64,
    /// How long a run lease stays valid before another run may steal it.
    pub lease_ttl_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            equity_request_delay_ms: 1200,
            lease_ttl_secs: 900,
        }
    }
}

/// Point table for terminal branches.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ScoringConfig {
    pub target_base_points: Decimal,
    /// Bonus at confidence 100; scales linearly down to 0.
    pub confidence_bonus_max: Decimal,
    pub stop_loss_points: Decimal,
    pub expiry_win_points: Decimal,
    pub expiry_loss_points: Decimal,
    /// HOLD picks are correct when |move %| stays within this band.
    pub hold_tolerance_pct: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            target_base_points: dec!(10),
            confidence_bonus_max: dec!(5),
            stop_loss_points: dec!(-5),
            expiry_win_points: dec!(3),
            expiry_loss_points: dec!(-2),
            hold_tolerance_pct: 2.0,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MarketDataConfig {
    pub equity_base_url: String,
    /// Env var holding the equity quote API key.
    pub equity_api_key_env: String,
    pub crypto_base_url: String,
    pub request_timeout_secs: u64,
}

impl Default for MarketDataConfig {
    fn default() -> Self {
        Self {
            equity_base_url: "https://finnhub.io/api/v1".to_string(),
            equity_api_key_env: "FINNHUB_API_KEY".to_string(),
            crypto_base_url: "https://api.coingecko.com/api/v3".to_string(),
            request_timeout_secs: 15,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub database_url: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://data/pickboard.db".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TriggerConfig {
    pub port: u16,
    /// Env var holding the shared trigger secret.
    pub secret_env: String,
    /// Accept `?manual=true` requests without the secret.
    pub allow_manual: bool,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            port: 8088,
            secret_env: "PICKBOARD_TRIGGER_SECRET".to_string(),
            allow_manual: false,
        }
    }
}

impl TriggerConfig {
    /// The configured trigger secret, if its env var is set and non-empty.
    pub fn secret(&self) -> Option<SecretString> {
        AppConfig::resolve_secret(&self.secret_env)
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::from_toml(&contents).with_context(|| format!("Failed to parse config file: {path}"))
    }

    /// Parse and validate configuration from a TOML string.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), PickboardError> {
        if self.competition.id.trim().is_empty() {
            return Err(PickboardError::Config("competition.id must not be empty".into()));
        }
        if self.engine.lease_ttl_secs == 0 {
            return Err(PickboardError::Config("engine.lease_ttl_secs must be > 0".into()));
        }
        if self.scoring.hold_tolerance_pct < 0.0 {
            return Err(PickboardError::Config(
                "scoring.hold_tolerance_pct must be >= 0".into(),
            ));
        }
        Ok(())
    }

    /// Resolve an environment variable name to its value.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }

    /// Resolve a secret-holding env var. Unset and blank both mean no secret.
    pub fn resolve_secret(env_name: &str) -> Option<SecretString> {
        Self::resolve_env(env_name)
            .ok()
            .filter(|s| !s.trim().is_empty())
            .map(SecretString::new)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
