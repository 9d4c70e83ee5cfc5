//! Flush-latency tracking and metric emission.
//!
//! [`LatencyHistogram`] keeps the most recent flush intervals of one operator
//! instance in memory. Every sample is also forwarded to the `metrics` facade,
//! so a host that installs a recorder (Prometheus, statsd, ...) sees the same
//! data; without a recorder the calls are no-ops.

use std::collections::VecDeque;

use ::metrics::{counter, histogram};

use crate::config::DEFAULT_HISTOGRAM_WINDOW;

pub const FLUSH_INTERVAL_MS: &str = "combinecrab_flush_interval_ms";
pub const FLUSHES_TOTAL: &str = "combinecrab_flushes_total";
pub const FLUSHED_KEYS_TOTAL: &str = "combinecrab_flushed_keys_total";
pub const EMITTED_RECORDS_TOTAL: &str = "combinecrab_emitted_records_total";
pub const ADJUSTMENTS_TOTAL: &str = "combinecrab_adjustments_total";

/// Sliding-window reservoir of flush intervals in milliseconds.
#[derive(Debug, Clone)]
pub struct LatencyHistogram {
    window: usize,
    samples: VecDeque<u64>,
}

impl LatencyHistogram {
    /// Keep at most `window` samples (at least one).
    pub fn new(window: usize) -> Self {
        let window = window.max(1);
        Self {
            window,
            samples: VecDeque::with_capacity(window),
        }
    }

    /// Record one interval, evicting the oldest sample when full.
    pub fn update(&mut self, interval_ms: u64) {
        if self.samples.len() == self.window {
            self.samples.pop_front();
        }
        self.samples.push_back(interval_ms);
    }

    pub fn window(&self) -> usize {
        self.window
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Most recent sample.
    pub fn last(&self) -> Option<u64> {
        self.samples.back().copied()
    }

    pub fn snapshot(&self) -> HistogramSnapshot {
        let mut sorted: Vec<u64> = self.samples.iter().copied().collect();
        sorted.sort_unstable();
        HistogramSnapshot { sorted }
    }
}

impl Default for LatencyHistogram {
    fn default() -> Self {
        Self::new(DEFAULT_HISTOGRAM_WINDOW)
    }
}

/// Point-in-time view of a [`LatencyHistogram`].
#[derive(Debug, Clone, PartialEq)]
pub struct HistogramSnapshot {
    sorted: Vec<u64>,
}

impl HistogramSnapshot {
    pub fn count(&self) -> usize {
        self.sorted.len()
    }

    pub fn min(&self) -> Option<u64> {
        self.sorted.first().copied()
    }

    pub fn max(&self) -> Option<u64> {
        self.sorted.last().copied()
    }

    pub fn mean(&self) -> Option<f64> {
        if self.sorted.is_empty() {
            return None;
        }
        let total: u64 = self.sorted.iter().sum();
        Some(total as f64 / self.sorted.len() as f64)
    }

    /// Nearest-rank percentile, `quantile` in `[0.0, 1.0]`.
    pub fn percentile(&self, quantile: f64) -> Option<u64> {
        if self.sorted.is_empty() {
            return None;
        }
        let quantile = quantile.clamp(0.0, 1.0);
        let rank = (quantile * self.sorted.len() as f64).ceil() as usize;
        let index = rank.saturating_sub(1).min(self.sorted.len() - 1);
        Some(self.sorted[index])
    }
}

// ── Facade ────────────────────────────────────────────────────────────────────

pub fn record_flush_interval(interval_ms: u64) {
    histogram!(FLUSH_INTERVAL_MS).record(interval_ms as f64);
}

pub fn record_flush(keys: usize, outputs: usize) {
    counter!(FLUSHES_TOTAL).increment(1);
    counter!(FLUSHED_KEYS_TOTAL).increment(keys as u64);
    counter!(EMITTED_RECORDS_TOTAL).increment(outputs as u64);
}

pub fn record_adjustment(outcome: &'static str) {
    counter!(ADJUSTMENTS_TOTAL, "outcome" => outcome).increment(1);
}

#[cfg(test)]
#[path = "tests/metrics_tests.rs"]
mod tests;
