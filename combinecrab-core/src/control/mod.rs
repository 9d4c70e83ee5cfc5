//! Out-of-band control plane.
//!
//! A [`ControlChannel`] hands out [`ControlSubscription`]s: streams of raw
//! payloads published to one topic. Two transports are provided:
//!
//! - [`memory::InMemoryBroker`]: in-process pub/sub, used by tests and
//!   single-process jobs.
//! - [`tcp::TcpControlChannel`]: client of the framed TCP broker served by
//!   [`tcp::ControlBrokerServer`].
//!
//! [`listener::ControlListener`] drains a subscription on its own thread and
//! feeds an [`AdaptiveController`](crate::controller::AdaptiveController).

pub mod frame;
pub mod listener;
pub mod memory;
pub mod tcp;

use std::fmt;
use std::time::Duration;

use anyhow::{Result, anyhow};
use crossbeam_channel::{Receiver, RecvTimeoutError, TryRecvError};

use crate::config::PreAggregateStrategy;
use crate::types::SubtaskIndex;

pub use listener::ControlListener;
pub use memory::InMemoryBroker;
pub use tcp::{ControlBrokerServer, TcpControlChannel, publish_once};

/// Pub/sub source of control payloads.
pub trait ControlChannel: Send + Sync {
    /// Start receiving payloads published to `topic`.
    ///
    /// Every payload published after this returns is delivered.
    fn subscribe(&self, topic: &str) -> Result<ControlSubscription>;
}

/// Topic an instance listens on, or `None` if the strategy has no topic.
pub fn topic_for(
    strategy: PreAggregateStrategy,
    base: &str,
    subtask_index: SubtaskIndex,
) -> Option<String> {
    match strategy {
        PreAggregateStrategy::Global => Some(base.to_string()),
        PreAggregateStrategy::Local => Some(format!("{}-{}", base, subtask_index)),
        PreAggregateStrategy::PerKey => None,
    }
}

/// Receiving end of one topic subscription.
///
/// Dropping the subscription runs the transport's close hook (if any), which
/// releases the broker-side registration.
pub struct ControlSubscription {
    topic: String,
    receiver: Receiver<Vec<u8>>,
    closer: Option<Box<dyn FnOnce() + Send>>,
}

impl ControlSubscription {
    pub fn new(topic: impl Into<String>, receiver: Receiver<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            receiver,
            closer: None,
        }
    }

    /// Run `closer` when the subscription is dropped.
    pub fn with_closer(mut self, closer: impl FnOnce() + Send + 'static) -> Self {
        self.closer = Some(Box::new(closer));
        self
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Block until the next payload arrives.
    pub fn recv(&self) -> Result<Vec<u8>> {
        self.receiver
            .recv()
            .map_err(|_| anyhow!("control subscription '{}' closed", self.topic))
    }

    /// Wait at most `timeout`. Returns `Ok(None)` on timeout.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<Vec<u8>>> {
        match self.receiver.recv_timeout(timeout) {
            Ok(payload) => Ok(Some(payload)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => {
                Err(anyhow!("control subscription '{}' closed", self.topic))
            }
        }
    }

    pub fn try_recv(&self) -> Result<Option<Vec<u8>>> {
        match self.receiver.try_recv() {
            Ok(payload) => Ok(Some(payload)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => {
                Err(anyhow!("control subscription '{}' closed", self.topic))
            }
        }
    }
}

impl fmt::Debug for ControlSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControlSubscription")
            .field("topic", &self.topic)
            .field("queued", &self.receiver.len())
            .finish()
    }
}

impl Drop for ControlSubscription {
    fn drop(&mut self) {
        if let Some(closer) = self.closer.take() {
            closer();
        }
    }
}

#[cfg(test)]
#[path = "tests/control_tests.rs"]
mod tests;
