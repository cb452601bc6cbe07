//! Application configuration
//! Mission: Load every engine's tunables from TOML + environment overrides
//!
//! Mirrors the teacher's `Config::from_env` pattern (env-var parsing with
//! defaults), but adds a TOML file layer underneath since this crate has
//! far more knobs than a handful of env vars can comfortably carry.

use serde::Deserialize;
use std::path::Path;

use crate::error::{BrainError, BrainResult};

/// Equity-tier thresholds and the leverage cap unlocked at each tier.
#[derive(Debug, Clone, Deserialize)]
pub struct EquityTierConfig {
    pub start_p2: f64,
    pub full_p2: f64,
    pub start_p3: f64,
    /// Leverage caps, monotonically non-increasing with tier risk:
    /// [micro, small, medium, large, institutional].
    pub leverage_caps: [f64; 5],
}

impl Default for EquityTierConfig {
    fn default() -> Self {
        Self {
            start_p2: 1_500.0,
            full_p2: 5_000.0,
            start_p3: 25_000.0,
            leverage_caps: [3.0, 5.0, 8.0, 12.0, 20.0],
        }
    }
}

/// PerformanceTracker tunables.
#[derive(Debug, Clone, Deserialize)]
pub struct PerformanceConfig {
    pub window_days: i64,
    pub min_trade_count: usize,
    pub malus_threshold: f64,
    pub bonus_threshold: f64,
    pub malus_multiplier: f64,
    pub bonus_multiplier: f64,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            window_days: 30,
            min_trade_count: 10,
            malus_threshold: 0.0,
            bonus_threshold: 2.0,
            malus_multiplier: 0.5,
            bonus_multiplier: 1.2,
        }
    }
}

/// RiskGuardian tunables.
#[derive(Debug, Clone, Deserialize)]
pub struct RiskConfig {
    pub max_position_notional: f64,
    pub symbol_whitelist: Vec<String>,
    pub min_stop_multiplier: f64,
    pub cost_veto_enabled: bool,
    pub base_fee_bps: f64,
    pub min_expectancy_ratio: f64,
    pub max_latency_veto_ms: f64,
    pub max_account_leverage: f64,
    pub max_correlation: f64,
    pub correlation_penalty: f64,
    pub correlation_update_interval_secs: i64,
    pub latency_soft_penalty_floor_ms: f64,
    pub latency_soft_penalty_ceiling_ms: f64,
    pub latency_soft_penalty_factor: f64,
    pub tail_exponent_veto_threshold: f64,
    pub tail_leverage_cap: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_position_notional: 250_000.0,
            symbol_whitelist: Vec::new(),
            min_stop_multiplier: 1.5,
            cost_veto_enabled: true,
            base_fee_bps: 4.0,
            min_expectancy_ratio: 2.0,
            max_latency_veto_ms: 500.0,
            max_account_leverage: 10.0,
            max_correlation: 0.8,
            correlation_penalty: 0.5,
            correlation_update_interval_secs: 60,
            latency_soft_penalty_floor_ms: 200.0,
            latency_soft_penalty_ceiling_ms: 500.0,
            latency_soft_penalty_factor: 0.75,
            tail_exponent_veto_threshold: 2.0,
            tail_leverage_cap: 3.0,
        }
    }
}

/// CapitalFlowManager tunables.
#[derive(Debug, Clone, Deserialize)]
pub struct TreasuryConfig {
    pub target_allocation: f64,
    pub sweep_threshold: f64,
    pub reserve_limit: f64,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub equity_increase_sweep_trigger: f64,
}

impl Default for TreasuryConfig {
    fn default() -> Self {
        Self {
            target_allocation: 10_000.0,
            sweep_threshold: 1.2,
            reserve_limit: 2_000.0,
            max_retries: 5,
            retry_base_delay_ms: 250,
            equity_increase_sweep_trigger: 0.10,
        }
    }
}

/// Order-routing tunables.
#[derive(Debug, Clone, Deserialize)]
pub struct RouterConfig {
    pub min_order_size: f64,
    pub max_order_size: f64,
    pub time_slices: u32,
    pub market_data_timeout_secs: i64,
    pub enable_co_location: bool,
    pub enable_network_optimization: bool,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            min_order_size: 1.0,
            max_order_size: 1_000_000.0,
            time_slices: 10,
            market_data_timeout_secs: 5,
            enable_co_location: true,
            enable_network_optimization: true,
        }
    }
}

/// HFT processor tunables.
#[derive(Debug, Clone, Deserialize)]
pub struct HftConfig {
    pub max_latency_micros: u64,
    pub batch_size: usize,
    pub batch_timeout_micros: u64,
    pub priority_queue_size: usize,
    pub preallocated_objects: usize,
    pub failure_threshold: u32,
    pub circuit_breaker_threshold_micros: u64,
    pub recovery_time_ms: u64,
}

impl Default for HftConfig {
    fn default() -> Self {
        Self {
            max_latency_micros: 10_000,
            batch_size: 64,
            batch_timeout_micros: 500,
            priority_queue_size: 4_096,
            preallocated_objects: 1_024,
            failure_threshold: 5,
            circuit_breaker_threshold_micros: 5_000,
            recovery_time_ms: 30_000,
        }
    }
}

/// Auth / HMAC boundary tunables.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub jwt_expiration_hours: i64,
    pub hmac_secret: String,
    pub hmac_algorithm: String,
    pub timestamp_tolerance_secs: i64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: "dev-only-change-me".to_string(),
            jwt_expiration_hours: 24,
            hmac_secret: "dev-only-change-me".to_string(),
            hmac_algorithm: "sha256".to_string(),
            timestamp_tolerance_secs: 300,
        }
    }
}

/// Top-level application configuration.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub database_path: String,
    #[serde(default)]
    pub initial_capital: f64,
    #[serde(default)]
    pub equity_tiers: EquityTierConfig,
    #[serde(default)]
    pub performance: PerformanceConfig,
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub treasury: TreasuryConfig,
    #[serde(default)]
    pub router: RouterConfig,
    #[serde(default)]
    pub hft: HftConfig,
    #[serde(default)]
    pub auth: AuthConfig,
}

impl Config {
    /// Load from `path` (TOML) if it exists, then apply environment
    /// variable overrides for the handful of operational knobs operators
    /// most often need to flip without touching the file.
    pub fn load(path: impl AsRef<Path>) -> BrainResult<Self> {
        dotenv::dotenv().ok();

        let mut cfg = if path.as_ref().exists() {
            let raw = std::fs::read_to_string(&path)
                .map_err(|e| BrainError::Configuration(format!("reading config file: {e}")))?;
            toml::from_str(&raw)
                .map_err(|e| BrainError::Configuration(format!("parsing config file: {e}")))?
        } else {
            Self::default()
        };

        if let Ok(port) = std::env::var("PORT") {
            cfg.port = port
                .parse()
                .map_err(|_| BrainError::Configuration("PORT must be a u16".to_string()))?;
        }
        if cfg.port == 0 {
            cfg.port = 8080;
        }
        if cfg.database_path.is_empty() {
            cfg.database_path = std::env::var("DATABASE_PATH").unwrap_or_else(|_| "./brain.db".to_string());
        }
        if cfg.initial_capital <= 0.0 {
            cfg.initial_capital = std::env::var("INITIAL_CAPITAL")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(1_000.0);
        }
        if let Ok(secret) = std::env::var("JWT_SECRET") {
            cfg.auth.jwt_secret = secret;
        }
        if let Ok(secret) = std::env::var("HMAC_SECRET") {
            cfg.auth.hmac_secret = secret;
        }

        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> BrainResult<()> {
        if self.equity_tiers.start_p2 >= self.equity_tiers.full_p2
            || self.equity_tiers.full_p2 > self.equity_tiers.start_p3
        {
            return Err(BrainError::Configuration(
                "equity tier thresholds must satisfy start_p2 < full_p2 <= start_p3".to_string(),
            ));
        }
        for window in self.equity_tiers.leverage_caps.windows(2) {
            if window[1] < window[0] {
                return Err(BrainError::Configuration(
                    "leverage caps must be monotonically non-decreasing with tier size".to_string(),
                ));
            }
        }
        if self.treasury.sweep_threshold <= 1.0 {
            return Err(BrainError::Configuration(
                "treasury.sweep_threshold must exceed 1.0".to_string(),
            ));
        }
        if self.auth.jwt_secret.is_empty() || self.auth.hmac_secret.is_empty() {
            return Err(BrainError::Configuration(
                "jwt_secret and hmac_secret must be set".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        let cfg = Config {
            port: 8080,
            database_path: "./brain.db".to_string(),
            initial_capital: 1_000.0,
            ..Default::default()
        };
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn rejects_bad_tier_thresholds() {
        let mut cfg = Config {
            port: 8080,
            database_path: "./brain.db".to_string(),
            initial_capital: 1_000.0,
            ..Default::default()
        };
        cfg.equity_tiers.full_p2 = cfg.equity_tiers.start_p2 - 1.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_non_monotonic_leverage_caps() {
        let mut cfg = Config {
            port: 8080,
            database_path: "./brain.db".to_string(),
            initial_capital: 1_000.0,
            ..Default::default()
        };
        cfg.equity_tiers.leverage_caps = [5.0, 3.0, 8.0, 12.0, 20.0];
        assert!(cfg.validate().is_err());
    }
}
