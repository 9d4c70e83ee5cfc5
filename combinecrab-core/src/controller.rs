//! Threshold controller for the control plane.
//!
//! [`GlobalState`] separates computing a new threshold from applying it:
//! the baseline (`interval_current`) is captured once, a pending value
//! (`interval_new`) is computed at most once per adjustment cycle, and the
//! pending value must be [`consume`](GlobalState::consume)d after it has been
//! applied before another adjustment is accepted. Duplicate deliveries of the
//! same control message inside one cycle are therefore no-ops.
//!
//! [`AdaptiveController`] owns the state behind a mutex and runs the whole
//! cycle (baseline → pending → apply → consume) for one operator instance. It
//! is driven only by the control listener thread; the record path never takes
//! its lock.

use std::sync::{Arc, Mutex};

use anyhow::Result;

use crate::error::PreAggregateError;
use crate::metrics;
use crate::trigger::TriggerControl;
use crate::types::SubtaskIndex;

/// Current vs. pending threshold of one operator instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalState {
    interval_current: Option<i64>,
    interval_new: Option<i64>,
    validated: bool,
    overloaded: bool,
}

impl GlobalState {
    pub fn new() -> Self {
        Self {
            interval_current: None,
            interval_new: None,
            validated: true,
            overloaded: false,
        }
    }

    /// Set the baseline. Only the first call has an effect.
    ///
    /// Returns true if the baseline was set by this call.
    pub fn set_interval_current(&mut self, interval: i64) -> bool {
        if self.interval_current.is_some() {
            tracing::trace!("interval_current already set");
            return false;
        }
        self.interval_current = Some(interval);
        true
    }

    /// Compute `pending = current + inc` if no adjustment is pending.
    ///
    /// Returns the pending value, whether computed now or earlier in this
    /// cycle, or `None` if no baseline is set yet.
    pub fn increment_interval_new(&mut self, inc: i64) -> Option<i64> {
        self.propose(|current| current.saturating_add(inc))
    }

    /// Compute `pending = current - dec` if no adjustment is pending.
    pub fn decrement_interval_new(&mut self, dec: i64) -> Option<i64> {
        self.propose(|current| current.saturating_sub(dec))
    }

    fn propose(&mut self, compute: impl FnOnce(i64) -> i64) -> Option<i64> {
        match (self.interval_current, self.interval_new) {
            (_, Some(pending)) => {
                tracing::debug!("interval_new already set to {}", pending);
                Some(pending)
            }
            (Some(current), None) => {
                let pending = compute(current);
                self.interval_new = Some(pending);
                Some(pending)
            }
            (None, None) => {
                tracing::warn!("interval_current is not set, adjustment ignored");
                None
            }
        }
    }

    pub fn interval_current(&self) -> Option<i64> {
        self.interval_current
    }

    pub fn interval_new(&self) -> Option<i64> {
        self.interval_new
    }

    /// Whether an adjustment is computed but not yet consumed.
    pub fn has_pending(&self) -> bool {
        self.interval_new.is_some()
    }

    /// Clear the pending value once it has been applied.
    pub fn consume(&mut self) -> Option<i64> {
        self.interval_new.take()
    }

    pub fn is_validated(&self) -> bool {
        self.validated
    }

    pub fn set_validated(&mut self, validated: bool) {
        self.validated = validated;
    }

    pub fn is_overloaded(&self) -> bool {
        self.overloaded
    }

    pub fn set_overloaded(&mut self, overloaded: bool) {
        self.overloaded = overloaded;
    }
}

impl Default for GlobalState {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of handling one control message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdjustmentOutcome {
    /// A threshold was computed and waits for [`AdaptiveController::apply_pending`].
    Pending(i64),
    /// The trigger threshold changed.
    Applied { previous: u64, current: u64 },
    /// The computed threshold equals the current one.
    Unchanged(u64),
    /// The computed threshold is not positive; the trigger kept its value.
    Rejected(i64),
    /// An adjustment was already pending; this one was dropped.
    DuplicateIgnored(i64),
    /// No baseline could be established.
    NoBaseline,
}

impl AdjustmentOutcome {
    /// Metric label for this outcome.
    pub fn label(&self) -> &'static str {
        match self {
            AdjustmentOutcome::Pending(_) => "pending",
            AdjustmentOutcome::Applied { .. } => "applied",
            AdjustmentOutcome::Unchanged(_) => "unchanged",
            AdjustmentOutcome::Rejected(_) => "rejected",
            AdjustmentOutcome::DuplicateIgnored(_) => "duplicate",
            AdjustmentOutcome::NoBaseline => "no_baseline",
        }
    }
}

/// Parse a control payload: a UTF-8 signed integer, surrounding whitespace
/// ignored.
pub fn parse_adjustment(payload: &[u8]) -> Result<i64> {
    let text = std::str::from_utf8(payload).map_err(|_| {
        PreAggregateError::InvalidAdjustment(String::from_utf8_lossy(payload).into_owned())
    })?;
    text.trim()
        .parse::<i64>()
        .map_err(|_| PreAggregateError::InvalidAdjustment(text.to_string()).into())
}

/// Applies control messages to one operator instance's trigger.
pub struct AdaptiveController {
    state: Mutex<GlobalState>,
    trigger: Arc<dyn TriggerControl>,
    subtask_index: SubtaskIndex,
}

impl AdaptiveController {
    pub fn new(trigger: Arc<dyn TriggerControl>, subtask_index: SubtaskIndex) -> Self {
        Self {
            state: Mutex::new(GlobalState::new()),
            trigger,
            subtask_index,
        }
    }

    pub fn subtask_index(&self) -> SubtaskIndex {
        self.subtask_index
    }

    /// Copy of the controller state.
    pub fn state(&self) -> GlobalState {
        self.state.lock().expect("controller state poisoned").clone()
    }

    /// Compute a pending threshold from `delta` without applying it.
    ///
    /// The baseline is captured from the trigger on the first call.
    pub fn propose(&self, delta: i64) -> AdjustmentOutcome {
        let mut state = self.state.lock().expect("controller state poisoned");
        self.propose_locked(&mut state, delta)
    }

    /// Apply the pending threshold (if any) to the trigger and consume it.
    pub fn apply_pending(&self) -> Option<AdjustmentOutcome> {
        let mut state = self.state.lock().expect("controller state poisoned");
        self.apply_locked(&mut state)
    }

    /// Run one full adjustment cycle for `delta`.
    ///
    /// Non-negative deltas increment the baseline, negative deltas decrement
    /// it. The resulting threshold is applied and consumed under one lock.
    pub fn on_adjustment(&self, delta: i64) -> AdjustmentOutcome {
        let outcome = {
            let mut state = self.state.lock().expect("controller state poisoned");
            match self.propose_locked(&mut state, delta) {
                AdjustmentOutcome::Pending(_) => self
                    .apply_locked(&mut state)
                    .unwrap_or(AdjustmentOutcome::NoBaseline),
                other => other,
            }
        };
        metrics::record_adjustment(outcome.label());
        outcome
    }

    /// Parse a raw payload and run an adjustment cycle for it.
    pub fn on_payload(&self, payload: &[u8]) -> Result<AdjustmentOutcome> {
        let delta = parse_adjustment(payload)?;
        Ok(self.on_adjustment(delta))
    }

    fn propose_locked(&self, state: &mut GlobalState, delta: i64) -> AdjustmentOutcome {
        let baseline = i64::try_from(self.trigger.max_count()).unwrap_or(i64::MAX);
        state.set_interval_current(baseline);
        if let Some(pending) = state.interval_new() {
            tracing::debug!(
                "subtask[{}] adjustment {} ignored, {} still pending",
                self.subtask_index,
                delta,
                pending
            );
            return AdjustmentOutcome::DuplicateIgnored(pending);
        }
        let pending = if delta >= 0 {
            state.increment_interval_new(delta)
        } else {
            state.decrement_interval_new(delta.saturating_neg())
        };
        match pending {
            Some(pending) => AdjustmentOutcome::Pending(pending),
            None => AdjustmentOutcome::NoBaseline,
        }
    }

    fn apply_locked(&self, state: &mut GlobalState) -> Option<AdjustmentOutcome> {
        let pending = state.interval_new()?;
        let previous = self.trigger.max_count();
        let outcome = if pending <= 0 {
            tracing::warn!(
                "subtask[{}] rejected max_count {}: threshold must be greater than 0",
                self.subtask_index,
                pending
            );
            AdjustmentOutcome::Rejected(pending)
        } else if self
            .trigger
            .set_max_count(pending as u64, self.subtask_index)
        {
            AdjustmentOutcome::Applied {
                previous,
                current: pending as u64,
            }
        } else {
            AdjustmentOutcome::Unchanged(previous)
        };
        state.consume();
        Some(outcome)
    }
}

impl std::fmt::Debug for AdaptiveController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdaptiveController")
            .field("subtask_index", &self.subtask_index)
            .field("state", &self.state())
            .field("max_count", &self.trigger.max_count())
            .finish()
    }
}

#[cfg(test)]
#[path = "tests/controller_tests.rs"]
mod tests;
