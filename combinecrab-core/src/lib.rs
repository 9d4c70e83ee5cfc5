//! # CombineCrab Core
//!
//! Adaptive local pre-aggregation for keyed stream pipelines.
//!
//! A [`PreAggregateOperator`](pre_aggregate::PreAggregateOperator) runs in
//! front of a network shuffle and folds records that share a key into one
//! partial accumulator, flushing when its trigger fires. The flush threshold
//! can be retuned at runtime over a pub/sub control channel without
//! restarting the pipeline.
//!
//! - [`function`]: the [`CombineFunction`](function::CombineFunction) contract
//!   and reference combiners.
//! - [`bundle`]: per-instance key → accumulator buffer.
//! - [`trigger`]: flush decision with an atomically adjustable threshold.
//! - [`controller`]: current/pending threshold bookkeeping for adjustments.
//! - [`control`]: control channels (in-memory and framed TCP) and the
//!   listener thread.
//! - [`pre_aggregate`]: the operator tying everything together.
//! - [`operator`], [`channel`], [`task`]: the minimal runtime that drives it.
//! - [`config`], [`error`], [`metrics`]: job wiring, error taxonomy, flush
//!   latency tracking.

pub mod bundle;
pub mod channel;
pub mod config;
pub mod control;
pub mod controller;
pub mod error;
pub mod function;
pub mod metrics;
pub mod operator;
pub mod pre_aggregate;
pub mod task;
pub mod trigger;
pub mod types;

pub use config::{PreAggregateConfig, PreAggregateStrategy};
pub use error::PreAggregateError;
pub use pre_aggregate::PreAggregateOperator;
