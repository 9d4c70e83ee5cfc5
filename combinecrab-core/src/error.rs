//! Error taxonomy for the pre-aggregate stage.
//!
//! Public operations return [`anyhow::Result`]; the variants below are attached
//! as the error itself or as context, so callers can classify a failure with
//! `err.downcast_ref::<PreAggregateError>()`.
//!
//! Only [`PreAggregateError::Combine`] is allowed to fail a running operator.
//! Control-plane failures are logged and the operator keeps its static
//! threshold.

use std::fmt;

use thiserror::Error;

/// Errors raised by the pre-aggregate stage and its control plane.
#[derive(Debug, Error)]
pub enum PreAggregateError {
    /// Invalid job wiring, fatal at construction.
    #[error("invalid pre-aggregate configuration: {0}")]
    Configuration(String),

    /// The user combine function failed; the task must fail.
    #[error("combine function failed in {0}")]
    Combine(CombinePhase),

    /// Connecting or subscribing to the control channel failed.
    #[error("control channel unavailable for topic '{topic}'")]
    ControlChannel { topic: String },

    /// A control payload could not be parsed as a signed integer.
    #[error("invalid adjustment payload {0:?}")]
    InvalidAdjustment(String),
}

/// Which half of the combine contract raised an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CombinePhase {
    AddInput,
    Collect,
}

impl fmt::Display for CombinePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CombinePhase::AddInput => f.write_str("add_input"),
            CombinePhase::Collect => f.write_str("collect"),
        }
    }
}

/// Classify an [`anyhow::Error`] raised anywhere in this crate.
pub fn classify(err: &anyhow::Error) -> Option<&PreAggregateError> {
    err.downcast_ref::<PreAggregateError>()
}
