//! Flush triggers for the pre-aggregate stage.
//!
//! A trigger is a two-state machine (accumulating / firing). The operator asks
//! it after every record; when it answers [`TriggerResult::Fire`] the operator
//! flushes the bundle before looking at the next record.
//!
//! The threshold half of a trigger ([`TriggerControl`]) is shared with the
//! control plane, which may change `max_count` from another thread while the
//! record path keeps counting.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::Result;

use crate::config::{MAX_COUNT_LIMIT, PreAggregateConfig, PreAggregateStrategy};
use crate::error::PreAggregateError;
use crate::types::SubtaskIndex;

/// The answer a trigger gives to the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerResult {
    /// Keep accumulating into the bundle.
    Continue,
    /// Flush the bundle now.
    Fire,
}

impl TriggerResult {
    /// Return true if the bundle should be flushed.
    pub fn is_fire(self) -> bool {
        matches!(self, TriggerResult::Fire)
    }
}

/// Element-independent part of a trigger, shared with the control plane.
///
/// Every method takes `&self`: implementations must tolerate `set_max_count`
/// racing with the record path.
pub trait TriggerControl: Send + Sync {
    /// Reset the element count to zero (back to accumulating).
    fn reset(&self);

    /// Timer callback. Fires unconditionally and resets.
    fn time_trigger(&self) -> TriggerResult;

    /// Change the count threshold.
    ///
    /// Returns true if the threshold changed. Values of 0 and values equal to
    /// the current threshold are ignored with a diagnostic.
    fn set_max_count(&self, new_max_count: u64, subtask_index: SubtaskIndex) -> bool;

    fn max_count(&self) -> u64;

    /// Elements counted since the last reset.
    fn count(&self) -> u64;

    fn max_time(&self) -> Option<Duration>;

    fn strategy(&self) -> PreAggregateStrategy;

    /// Human-readable description of the firing rule.
    fn explain(&self) -> String;
}

/// Decides, per element, whether the bundle should be flushed.
pub trait PreAggregateTrigger<T>: TriggerControl {
    /// Called once for every element after it entered the bundle.
    fn on_element(&self, element: &T) -> TriggerResult;
}

// ── CountTrigger ──────────────────────────────────────────────────────────────

/// Fires every `max_count` elements, and optionally on a time cadence.
///
/// `count` and `max_count` are atomics: the record path increments and resets
/// `count`, the control plane swaps `max_count`.
#[derive(Debug)]
pub struct CountTrigger {
    count: AtomicU64,
    max_count: AtomicU64,
    max_time: Option<Duration>,
    strategy: PreAggregateStrategy,
}

impl CountTrigger {
    /// Create a GLOBAL count trigger.
    pub fn new(max_count: u64) -> Result<Self> {
        Self::with_strategy(max_count, PreAggregateStrategy::Global)
    }

    /// Create a count trigger for the given coordination strategy.
    pub fn with_strategy(max_count: u64, strategy: PreAggregateStrategy) -> Result<Self> {
        if max_count == 0 {
            return Err(PreAggregateError::Configuration(
                "pre-aggregation count must be greater than 0".to_string(),
            )
            .into());
        }
        if max_count > MAX_COUNT_LIMIT {
            return Err(PreAggregateError::Configuration(format!(
                "pre-aggregation count {} exceeds {}",
                max_count, MAX_COUNT_LIMIT
            ))
            .into());
        }
        Ok(Self {
            count: AtomicU64::new(0),
            max_count: AtomicU64::new(max_count),
            max_time: None,
            strategy,
        })
    }

    /// Also fire on the time cadence driven by the runtime.
    pub fn with_max_time(mut self, max_time: Duration) -> Self {
        self.max_time = Some(max_time);
        self
    }

    /// Build the trigger described by a validated config.
    pub fn from_config(config: &PreAggregateConfig) -> Result<Self> {
        config.validate()?;
        let trigger = Self::with_strategy(config.max_count, config.strategy)?;
        Ok(match config.max_time() {
            Some(max_time) => trigger.with_max_time(max_time),
            None => trigger,
        })
    }
}

impl TriggerControl for CountTrigger {
    fn reset(&self) {
        self.count.store(0, Ordering::Release);
    }

    fn time_trigger(&self) -> TriggerResult {
        self.reset();
        TriggerResult::Fire
    }

    fn set_max_count(&self, new_max_count: u64, subtask_index: SubtaskIndex) -> bool {
        if new_max_count == 0 {
            tracing::warn!(
                "subtask[{}] rejected max_count {}: threshold must be greater than 0",
                subtask_index,
                new_max_count
            );
            return false;
        }
        let previous = self.max_count.swap(new_max_count, Ordering::AcqRel);
        if previous == new_max_count {
            tracing::info!(
                "subtask[{}] max_count not changed: {}",
                subtask_index,
                new_max_count
            );
            false
        } else {
            tracing::info!(
                "subtask[{}] max_count {} -> {}",
                subtask_index,
                previous,
                new_max_count
            );
            true
        }
    }

    fn max_count(&self) -> u64 {
        self.max_count.load(Ordering::Acquire)
    }

    fn count(&self) -> u64 {
        self.count.load(Ordering::Acquire)
    }

    fn max_time(&self) -> Option<Duration> {
        self.max_time
    }

    fn strategy(&self) -> PreAggregateStrategy {
        self.strategy
    }

    fn explain(&self) -> String {
        match self.max_time {
            Some(max_time) => format!(
                "maxCount [{}] maxTime [{}ms] strategy [{}]",
                self.max_count(),
                max_time.as_millis(),
                self.strategy
            ),
            None => format!("maxCount [{}] strategy [{}]", self.max_count(), self.strategy),
        }
    }
}

impl<T> PreAggregateTrigger<T> for CountTrigger {
    fn on_element(&self, _element: &T) -> TriggerResult {
        let count = self.count.fetch_add(1, Ordering::AcqRel) + 1;
        if count >= self.max_count() {
            self.reset();
            TriggerResult::Fire
        } else {
            TriggerResult::Continue
        }
    }
}

#[cfg(test)]
#[path = "tests/trigger_tests.rs"]
mod tests;
