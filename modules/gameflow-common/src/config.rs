use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::event::Priority;

/// Engine tuning, supplied at construction.
/// Every field has a default so a partial TOML file is enough.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Default number of events per submitted batch when the host splits input.
    pub batch_size: usize,
    /// Size of each concurrent dispatch group when draining a batch.
    pub max_concurrency: usize,
    /// Default per-processor timeout.
    pub timeout_ms: u64,
    /// Retries after the first attempt.
    pub retry_attempts: u32,
    /// Backoff unit: delay before retry n is `2^n * retry_base_delay_ms`.
    pub retry_base_delay_ms: u64,
    pub tick_interval_ms: u64,
    pub sweep_interval_ms: u64,
    pub max_batches_per_tick: usize,
    pub max_events_per_tick: usize,
    /// Side-effect recursion bound for effect application.
    pub max_effect_depth: usize,
    /// Dispatched events kept for lookup.
    pub history_limit: usize,
    pub notification_capacity: usize,
    pub priority_weights: PriorityWeights,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            max_concurrency: 5,
            timeout_ms: 5_000,
            retry_attempts: 3,
            retry_base_delay_ms: 100,
            tick_interval_ms: 100,
            sweep_interval_ms: 1_000,
            max_batches_per_tick: 5,
            max_events_per_tick: 10,
            max_effect_depth: 8,
            history_limit: 1_000,
            notification_capacity: 1_024,
            priority_weights: PriorityWeights::default(),
        }
    }
}

impl EngineConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms.max(1))
    }

    /// Group size for batch fan-out. Never zero.
    pub fn group_size(&self) -> usize {
        self.max_concurrency.max(1)
    }

    pub fn log_summary(&self) {
        tracing::info!(
            batch_size = self.batch_size,
            max_concurrency = self.max_concurrency,
            timeout_ms = self.timeout_ms,
            retry_attempts = self.retry_attempts,
            retry_base_delay_ms = self.retry_base_delay_ms,
            tick_interval_ms = self.tick_interval_ms,
            sweep_interval_ms = self.sweep_interval_ms,
            max_effect_depth = self.max_effect_depth,
            "Engine config loaded"
        );
    }
}

/// Numeric weight per priority category. Higher drains first.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PriorityWeights {
    pub low: u32,
    pub normal: u32,
    pub high: u32,
    pub critical: u32,
}

impl Default for PriorityWeights {
    fn default() -> Self {
        Self {
            low: 1,
            normal: 2,
            high: 3,
            critical: 4,
        }
    }
}

impl PriorityWeights {
    pub fn weight(&self, priority: Priority) -> u32 {
        match priority {
            Priority::Low => self.low,
            Priority::Normal => self.normal,
            Priority::High => self.high,
            Priority::Critical => self.critical,
        }
    }
}

/// Load and parse a TOML engine config file.
pub fn load_config(path: &Path) -> Result<EngineConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

pub fn parse_config(content: &str) -> Result<EngineConfig> {
    let config: EngineConfig = toml::from_str(content)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = parse_config(
            r#"
            max_concurrency = 2
            retry_attempts = 1

            [priority_weights]
            critical = 100
            "#,
        )
        .unwrap();
        assert_eq!(config.max_concurrency, 2);
        assert_eq!(config.retry_attempts, 1);
        assert_eq!(config.timeout_ms, 5_000);
        assert_eq!(config.priority_weights.weight(Priority::Critical), 100);
        assert_eq!(config.priority_weights.weight(Priority::Low), 1);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(parse_config("max_concurency = 2").is_err());
    }

    #[test]
    fn zero_concurrency_still_forms_groups() {
        let config = EngineConfig {
            max_concurrency: 0,
            ..Default::default()
        };
        assert_eq!(config.group_size(), 1);
    }

    #[test]
    fn load_config_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "tick_interval_ms = 50").unwrap();
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.tick_interval(), Duration::from_millis(50));

        let missing = load_config(Path::new("/definitely/not/here.toml"));
        assert!(missing.is_err());
    }
}
