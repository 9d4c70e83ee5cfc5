//! Job wiring for a pre-aggregate stage.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::error::PreAggregateError;

/// Topic shared by every instance under the GLOBAL strategy.
pub const DEFAULT_CONTROL_TOPIC: &str = "topic-frequency-pre-aggregate";

/// Address of the control broker.
pub const DEFAULT_BROKER_ADDRESS: &str = "127.0.0.1:1883";

/// Number of recent flush intervals kept by the latency histogram.
pub const DEFAULT_HISTOGRAM_WINDOW: usize = 500;

/// Largest count threshold accepted. Adjustments are signed deltas, so the
/// threshold must stay representable as `i64`.
pub const MAX_COUNT_LIMIT: u64 = i64::MAX as u64;

/// Scope over which a threshold adjustment is broadcast and applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PreAggregateStrategy {
    /// One shared topic; every parallel instance applies the same message.
    #[default]
    Global,
    /// One topic per instance (`<base>-<subtask_index>`).
    Local,
    /// Reserved. Would need a trigger per key and per-key addressed messages.
    PerKey,
}

impl PreAggregateStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            PreAggregateStrategy::Global => "GLOBAL",
            PreAggregateStrategy::Local => "LOCAL",
            PreAggregateStrategy::PerKey => "PER_KEY",
        }
    }
}

impl fmt::Display for PreAggregateStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PreAggregateStrategy {
    type Err = PreAggregateError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "GLOBAL" => Ok(PreAggregateStrategy::Global),
            "LOCAL" => Ok(PreAggregateStrategy::Local),
            "PER_KEY" | "PERKEY" => Ok(PreAggregateStrategy::PerKey),
            other => Err(PreAggregateError::Configuration(format!(
                "unknown pre-aggregate strategy '{other}', expected GLOBAL, LOCAL or PER_KEY"
            ))),
        }
    }
}

/// Configuration of one pre-aggregate stage.
///
/// Every parallel instance of the stage is built from the same config; the
/// instance index only matters when resolving LOCAL topics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreAggregateConfig {
    /// Coordination scope for threshold adjustments.
    pub strategy: PreAggregateStrategy,
    /// Initial count threshold. Must be greater than 0.
    pub max_count: u64,
    /// Optional time threshold bounding latency for low-traffic keys.
    pub max_time_ms: Option<u64>,
    /// Control topic (GLOBAL) or topic prefix (LOCAL).
    pub control_topic: String,
    /// Control broker address (`host:port`).
    pub broker_address: String,
    /// Sliding window size of the flush-interval histogram.
    pub histogram_window: usize,
}

impl Default for PreAggregateConfig {
    fn default() -> Self {
        Self {
            strategy: PreAggregateStrategy::Global,
            max_count: 1,
            max_time_ms: None,
            control_topic: DEFAULT_CONTROL_TOPIC.to_string(),
            broker_address: DEFAULT_BROKER_ADDRESS.to_string(),
            histogram_window: DEFAULT_HISTOGRAM_WINDOW,
        }
    }
}

impl PreAggregateConfig {
    /// Create a GLOBAL config with the given count threshold.
    pub fn new(max_count: u64) -> Self {
        Self {
            max_count,
            ..Self::default()
        }
    }

    pub fn with_strategy(mut self, strategy: PreAggregateStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_max_time(mut self, max_time: Duration) -> Self {
        self.max_time_ms = Some(max_time.as_millis() as u64);
        self
    }

    pub fn with_control_topic(mut self, topic: impl Into<String>) -> Self {
        self.control_topic = topic.into();
        self
    }

    pub fn with_broker_address(mut self, address: impl Into<String>) -> Self {
        self.broker_address = address.into();
        self
    }

    pub fn with_histogram_window(mut self, window: usize) -> Self {
        self.histogram_window = window;
        self
    }

    /// Time threshold as a [`Duration`], if configured.
    pub fn max_time(&self) -> Option<Duration> {
        self.max_time_ms.map(Duration::from_millis)
    }

    /// Reject configurations the operator cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.max_count == 0 {
            return Err(PreAggregateError::Configuration(
                "pre-aggregation count must be greater than 0".to_string(),
            )
            .into());
        }
        if self.max_count > MAX_COUNT_LIMIT {
            return Err(PreAggregateError::Configuration(format!(
                "pre-aggregation count {} exceeds {}",
                self.max_count, MAX_COUNT_LIMIT
            ))
            .into());
        }
        if self.max_time_ms == Some(0) {
            return Err(PreAggregateError::Configuration(
                "pre-aggregation time threshold must be greater than 0ms".to_string(),
            )
            .into());
        }
        if self.histogram_window == 0 {
            return Err(PreAggregateError::Configuration(
                "histogram window must hold at least one sample".to_string(),
            )
            .into());
        }
        if self.control_topic.trim().is_empty() {
            return Err(PreAggregateError::Configuration(
                "control topic must not be empty".to_string(),
            )
            .into());
        }
        Ok(())
    }

    /// Parse and validate a JSON job config. Missing fields take defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| PreAggregateError::Configuration(format!("malformed config: {e}")))?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
