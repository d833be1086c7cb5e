//! Configuration loader

use config::{Config, Environment, File};
use std::path::Path;

use super::types::AppConfig;
use crate::common::errors::{Result, TradeError};

/// Load configuration from file and environment variables
///
/// Priority (highest to lowest):
/// 1. Environment variables (prefixed with APP__)
/// 2. Configuration file (TOML format)
/// 3. Default values
pub fn load_config(config_path: Option<&str>) -> Result<AppConfig> {
    // Pick up a .env file if one exists
    dotenvy::dotenv().ok();

    let mut builder = Config::builder();

    if let Some(path) = config_path {
        if Path::new(path).exists() {
            builder = builder.add_source(File::with_name(path).required(false));
        }
    }

    builder = builder.add_source(
        Environment::with_prefix("APP")
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder
        .build()
        .map_err(|e| TradeError::Configuration(e.to_string()))?;

    let app: AppConfig = config
        .try_deserialize()
        .map_err(|e| TradeError::Configuration(e.to_string()))?;

    validate(&app)?;
    Ok(app)
}

/// Reject configurations that would make the engine misbehave
pub fn validate(config: &AppConfig) -> Result<()> {
    if config.execution.fill_poll_interval_ms == 0 {
        return Err(TradeError::Configuration(
            "execution.fill_poll_interval_ms must be positive".to_string(),
        ));
    }
    if config.batch.chunk_size == 0 || config.batch.workers == 0 {
        return Err(TradeError::Configuration(
            "batch.chunk_size and batch.workers must be positive".to_string(),
        ));
    }
    if config.monitor.tick_interval_ms == 0 || config.monitor.sweep_interval_ticks == 0 {
        return Err(TradeError::Configuration(
            "monitor.tick_interval_ms and monitor.sweep_interval_ticks must be positive".to_string(),
        ));
    }
    if config.reconciler.request_timeout_ms == 0 {
        return Err(TradeError::Configuration(
            "reconciler.request_timeout_ms must be positive".to_string(),
        ));
    }
    if config.reconciler.initial_backoff_ms > config.reconciler.max_backoff_ms {
        return Err(TradeError::Configuration(
            "reconciler.initial_backoff_ms exceeds max_backoff_ms".to_string(),
        ));
    }
    for plan in &config.plans {
        if plan.symbol.trim().is_empty() {
            return Err(TradeError::Configuration("plan with empty symbol".to_string()));
        }
    }
    Ok(())
}
