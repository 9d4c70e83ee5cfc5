//! User merge logic for the pre-aggregate stage.
//!
//! ## Example
//!
//! ```ignore
//! struct MaxCombine;
//!
//! impl CombineFunction<String, i64, (String, i64), (String, i64)> for MaxCombine {
//!     fn add_input(&mut self, acc: Option<i64>, input: (String, i64)) -> Result<i64> {
//!         Ok(acc.map_or(input.1, |current| current.max(input.1)))
//!     }
//!
//!     fn collect(&mut self, bundle: &Bundle<String, i64>, out: &mut Vec<(String, i64)>) -> Result<()> {
//!         for (key, max) in bundle {
//!             out.push((key.clone(), *max));
//!         }
//!         Ok(())
//!     }
//! }
//! ```

use std::hash::Hash;

use anyhow::Result;

use crate::bundle::Bundle;

/// Merge and emit logic applied before the shuffle.
///
/// - `K`: grouping key
/// - `V`: accumulator kept in the bundle
/// - `IN`: input record
/// - `OUT`: partial aggregate sent downstream
///
/// The merge must be associative and commutative over the inputs seen since
/// the last flush; the engine does not check it.
pub trait CombineFunction<K, V, IN, OUT>: Send {
    /// Fold `input` into the accumulator for its key.
    ///
    /// `accumulator` is `None` the first time a key is seen after a flush.
    fn add_input(&mut self, accumulator: Option<V>, input: IN) -> Result<V>;

    /// Turn the bundle into zero or more outputs per key.
    ///
    /// Called only at flush time. The bundle is cleared right after this
    /// returns; outputs pushed before an error are discarded.
    fn collect(&mut self, bundle: &Bundle<K, V>, out: &mut Vec<OUT>) -> Result<()>;
}

// ============================================================================
// SumCountCombine: sum + count per key (partial average)
// ============================================================================

/// Partial average: running sum and number of samples.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SumCount {
    pub sum: f64,
    pub count: u64,
}

impl SumCount {
    pub fn new(sum: f64, count: u64) -> Self {
        Self { sum, count }
    }

    /// One-sample accumulator.
    pub fn of(value: f64) -> Self {
        Self::new(value, 1)
    }

    /// Combine two partials (second-phase merge).
    pub fn merge(self, other: SumCount) -> SumCount {
        SumCount::new(self.sum + other.sum, self.count + other.count)
    }

    pub fn average(&self) -> Option<f64> {
        if self.count == 0 {
            None
        } else {
            Some(self.sum / self.count as f64)
        }
    }
}

/// Pre-aggregates `(key, value)` samples into `(key, SumCount)` partials.
#[derive(Debug, Clone, Copy, Default)]
pub struct SumCountCombine;

impl<K> CombineFunction<K, SumCount, (K, f64), (K, SumCount)> for SumCountCombine
where
    K: Clone + Eq + Hash + Send,
{
    fn add_input(&mut self, accumulator: Option<SumCount>, input: (K, f64)) -> Result<SumCount> {
        Ok(match accumulator {
            Some(acc) => SumCount::new(acc.sum + input.1, acc.count + 1),
            None => SumCount::of(input.1),
        })
    }

    fn collect(
        &mut self,
        bundle: &Bundle<K, SumCount>,
        out: &mut Vec<(K, SumCount)>,
    ) -> Result<()> {
        out.reserve(bundle.len());
        for (key, partial) in bundle {
            out.push((key.clone(), *partial));
        }
        Ok(())
    }
}

// ============================================================================
// CountCombine: occurrences per key
// ============================================================================

/// Counts occurrences of each key, ignoring the payload (word-count style).
#[derive(Debug, Clone, Copy, Default)]
pub struct CountCombine;

impl<K, T> CombineFunction<K, u64, (K, T), (K, u64)> for CountCombine
where
    K: Clone + Eq + Hash + Send,
{
    fn add_input(&mut self, accumulator: Option<u64>, _input: (K, T)) -> Result<u64> {
        Ok(accumulator.unwrap_or(0) + 1)
    }

    fn collect(&mut self, bundle: &Bundle<K, u64>, out: &mut Vec<(K, u64)>) -> Result<()> {
        out.reserve(bundle.len());
        for (key, count) in bundle {
            out.push((key.clone(), *count));
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/function_tests.rs"]
mod tests;
