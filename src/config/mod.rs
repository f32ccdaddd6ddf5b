//! Application Configuration
//!
//! Scan tuning and replay settings stored in TOML format. Detector
//! thresholds are model properties and stay compile-time constants; only
//! session-level behavior is configurable.

use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::aggregate::ResultAggregatorConfig;

/// Application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Cross-frame consensus settings
    pub aggregation: AggregationSettings,
    /// Pipeline stage toggles
    pub pipeline: PipelineSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            aggregation: AggregationSettings::default(),
            pipeline: PipelineSettings::default(),
        }
    }
}

/// Cross-frame consensus settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregationSettings {
    /// Matching frames required before the card number is final
    pub required_agreement_count: Option<u32>,
    /// Total aggregation budget in milliseconds, from the first valid frame
    pub max_total_aggregation_time_ms: u64,
}

impl Default for AggregationSettings {
    fn default() -> Self {
        Self {
            required_agreement_count: Some(5),
            max_total_aggregation_time_ms: 10_000,
        }
    }
}

impl AggregationSettings {
    pub fn to_aggregator_config(&self) -> ResultAggregatorConfig {
        ResultAggregatorConfig {
            required_agreement_count: self.required_agreement_count,
            max_total_aggregation_time: Duration::from_millis(self.max_total_aggregation_time_ms),
        }
    }
}

/// Pipeline stage toggles
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSettings {
    /// Extract the cardholder name and expiry alongside the number
    pub run_name_extraction: bool,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            run_name_extraction: false,
        }
    }
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: AppConfig = toml::from_str(&content)?;
    Ok(config)
}

/// Save configuration to file
pub fn save_config(config: &AppConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}
