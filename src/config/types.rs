//! Configuration types

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
///
/// Built once at startup and handed to every component; nothing reads
/// configuration from globals afterwards.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Order submission and fill waiting
    #[serde(default)]
    pub execution: ExecutionConfig,
    /// Order record reconciliation
    #[serde(default)]
    pub reconciler: ReconcilerConfig,
    /// Decision engine thresholds
    #[serde(default)]
    pub engine: EngineConfig,
    /// Fallback commission rates
    #[serde(default)]
    pub fees: FeeConfig,
    /// Keyed lock behaviour
    #[serde(default)]
    pub locks: LockConfig,
    /// Batch drift reconciliation
    #[serde(default)]
    pub batch: BatchConfig,
    /// Evaluation loop
    #[serde(default)]
    pub monitor: MonitorConfig,
    /// Plans to seed at startup
    #[serde(default)]
    pub plans: Vec<PlanConfig>,
    /// General application settings
    #[serde(default)]
    pub settings: AppSettings,
}

/// Order execution configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Delay between fill polls in milliseconds
    #[serde(default = "default_fill_poll_interval")]
    pub fill_poll_interval_ms: u64,
    /// Fill deadline for opening orders in milliseconds
    #[serde(default = "default_open_fill_timeout")]
    pub open_fill_timeout_ms: u64,
    /// Fill deadline for closing orders in milliseconds
    #[serde(default = "default_close_fill_timeout")]
    pub close_fill_timeout_ms: u64,
    /// Account runs in hedge (dual position side) mode
    #[serde(default = "default_true")]
    pub hedge_mode: bool,
}

impl ExecutionConfig {
    pub fn fill_poll_interval(&self) -> Duration {
        Duration::from_millis(self.fill_poll_interval_ms)
    }

    pub fn open_fill_timeout(&self) -> Duration {
        Duration::from_millis(self.open_fill_timeout_ms)
    }

    pub fn close_fill_timeout(&self) -> Duration {
        Duration::from_millis(self.close_fill_timeout_ms)
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            fill_poll_interval_ms: default_fill_poll_interval(),
            open_fill_timeout_ms: default_open_fill_timeout(),
            close_fill_timeout_ms: default_close_fill_timeout(),
            hedge_mode: true,
        }
    }
}

fn default_fill_poll_interval() -> u64 {
    200
}

fn default_open_fill_timeout() -> u64 {
    5_000
}

fn default_close_fill_timeout() -> u64 {
    15_000
}

fn default_true() -> bool {
    true
}

/// Order reconciler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcilerConfig {
    /// Attempts to find a record that the stream reported before REST stored it
    #[serde(default = "default_unknown_retry_attempts")]
    pub unknown_retry_attempts: u32,
    /// First backoff delay in milliseconds
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,
    /// Backoff cap in milliseconds
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
    /// Deadline for a single exchange request in milliseconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            unknown_retry_attempts: default_unknown_retry_attempts(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
            request_timeout_ms: default_request_timeout(),
        }
    }
}

fn default_unknown_retry_attempts() -> u32 {
    5
}

fn default_initial_backoff() -> u64 {
    100
}

fn default_max_backoff() -> u64 {
    1_600
}

fn default_request_timeout() -> u64 {
    10_000
}

/// Decision engine thresholds; every `_pct` value is in percent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// PnL% at which the trailing stop activates
    #[serde(default = "default_trailing_activation")]
    pub trailing_activation_pct: Decimal,
    /// Share of the high-water mark kept on retrace
    #[serde(default = "default_trailing_retrace_ratio")]
    pub trailing_retrace_ratio: Decimal,
    /// Round-trip commission subtracted from the retrace level
    #[serde(default = "default_commission_buffer")]
    pub commission_buffer_pct: Decimal,
    /// Default PnL% at or below which an averaging order is placed
    #[serde(default = "default_averaging_trigger")]
    pub averaging_trigger_pct: Decimal,
    /// Default PnL% at or below which a main position gets hedged
    #[serde(default = "default_hedge_trigger")]
    pub hedge_trigger_pct: Decimal,
    /// Hedges allowed per session
    #[serde(default = "default_max_hedges")]
    pub max_hedges: u32,
    /// Best hedge leg PnL% at or below which the protective exit arms
    #[serde(default = "default_protective_best")]
    pub protective_arm_best_pct: Decimal,
    /// Worst hedge leg PnL% at or below which the protective exit arms
    #[serde(default = "default_protective_worst")]
    pub protective_arm_worst_pct: Decimal,
    /// Degradation of the best leg below its baseline that fires the exit
    #[serde(default = "default_protective_degrade")]
    pub protective_degrade_pct: Decimal,
    /// Seconds an armed protective exit stays armed
    #[serde(default = "default_protective_window")]
    pub protective_window_seconds: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            trailing_activation_pct: default_trailing_activation(),
            trailing_retrace_ratio: default_trailing_retrace_ratio(),
            commission_buffer_pct: default_commission_buffer(),
            averaging_trigger_pct: default_averaging_trigger(),
            hedge_trigger_pct: default_hedge_trigger(),
            max_hedges: default_max_hedges(),
            protective_arm_best_pct: default_protective_best(),
            protective_arm_worst_pct: default_protective_worst(),
            protective_degrade_pct: default_protective_degrade(),
            protective_window_seconds: default_protective_window(),
        }
    }
}

fn default_trailing_activation() -> Decimal {
    dec!(0.10)
}

fn default_trailing_retrace_ratio() -> Decimal {
    dec!(0.80)
}

fn default_commission_buffer() -> Decimal {
    dec!(0.036)
}

fn default_averaging_trigger() -> Decimal {
    dec!(-3.00)
}

fn default_hedge_trigger() -> Decimal {
    dec!(-1.50)
}

fn default_max_hedges() -> u32 {
    3
}

fn default_protective_best() -> Decimal {
    dec!(-0.20)
}

fn default_protective_worst() -> Decimal {
    dec!(-0.50)
}

fn default_protective_degrade() -> Decimal {
    dec!(0.10)
}

fn default_protective_window() -> u64 {
    300
}

/// Commission rates as fractions (0.0004 = 0.04%)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeConfig {
    #[serde(default = "default_maker_rate")]
    pub maker_rate: Decimal,
    #[serde(default = "default_taker_rate")]
    pub taker_rate: Decimal,
}

impl Default for FeeConfig {
    fn default() -> Self {
        Self {
            maker_rate: default_maker_rate(),
            taker_rate: default_taker_rate(),
        }
    }
}

fn default_maker_rate() -> Decimal {
    dec!(0.0002)
}

fn default_taker_rate() -> Decimal {
    dec!(0.00018)
}

/// Keyed lock configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    /// Maximum wait for a plan or session lock in milliseconds
    #[serde(default = "default_lock_timeout")]
    pub acquire_timeout_ms: u64,
}

impl LockConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            acquire_timeout_ms: default_lock_timeout(),
        }
    }
}

fn default_lock_timeout() -> u64 {
    30_000
}

/// Batch reconciliation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Plans handled per worker chunk
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Chunks processed concurrently
    #[serde(default = "default_workers")]
    pub workers: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            workers: default_workers(),
        }
    }
}

fn default_chunk_size() -> usize {
    10
}

fn default_workers() -> usize {
    4
}

/// Evaluation loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Delay between evaluation ticks in milliseconds
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,
    /// Ticks between plan reconciliation sweeps
    #[serde(default = "default_sweep_interval_ticks")]
    pub sweep_interval_ticks: u32,
}

impl MonitorConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval(),
            sweep_interval_ticks: default_sweep_interval_ticks(),
        }
    }
}

fn default_tick_interval() -> u64 {
    1_000
}

fn default_sweep_interval_ticks() -> u32 {
    60
}

/// Seed definition of a trading plan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanConfig {
    pub symbol: String,
    #[serde(default = "default_leverage")]
    pub leverage: u32,
    pub amount_per_trade: Decimal,
    pub lot_size: Decimal,
    pub tick_size: Decimal,
    #[serde(default)]
    pub min_size: Decimal,
}

fn default_leverage() -> u32 {
    10
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppSettings {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_engine_constants() {
        let config = AppConfig::default();
        assert_eq!(config.engine.trailing_activation_pct, dec!(0.10));
        assert_eq!(config.engine.averaging_trigger_pct, dec!(-3.00));
        assert_eq!(config.execution.fill_poll_interval(), Duration::from_millis(200));
        assert_eq!(config.execution.close_fill_timeout(), Duration::from_secs(15));
        assert_eq!(config.reconciler.unknown_retry_attempts, 5);
        assert!(config.plans.is_empty());
    }
}
