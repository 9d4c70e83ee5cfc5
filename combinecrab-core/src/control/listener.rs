use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::Result;

use super::ControlSubscription;
use crate::controller::{AdaptiveController, AdjustmentOutcome};

/// How long the listener blocks before re-checking its shutdown flag.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Thread draining one control subscription into an [`AdaptiveController`].
///
/// Payloads still queued when [`stop`](Self::stop) is called are dropped.
pub struct ControlListener {
    topic: String,
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl ControlListener {
    pub fn spawn(
        subscription: ControlSubscription,
        controller: Arc<AdaptiveController>,
    ) -> Result<Self> {
        Self::spawn_with_poll_interval(subscription, controller, DEFAULT_POLL_INTERVAL)
    }

    pub fn spawn_with_poll_interval(
        subscription: ControlSubscription,
        controller: Arc<AdaptiveController>,
        poll_interval: Duration,
    ) -> Result<Self> {
        let topic = subscription.topic().to_string();
        let shutdown = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&shutdown);
        let handle = thread::Builder::new()
            .name(format!("control-listener-{}", controller.subtask_index()))
            .spawn(move || run(subscription, &controller, &flag, poll_interval))?;
        Ok(Self {
            topic,
            shutdown,
            handle: Some(handle),
        })
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Signal shutdown and wait for the thread to exit.
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::warn!("control listener for '{}' panicked", self.topic);
            }
        }
    }
}

impl Drop for ControlListener {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(
    subscription: ControlSubscription,
    controller: &AdaptiveController,
    shutdown: &AtomicBool,
    poll_interval: Duration,
) {
    let subtask = controller.subtask_index();
    while !shutdown.load(Ordering::Acquire) {
        let payload = match subscription.recv_timeout(poll_interval) {
            Ok(Some(payload)) => payload,
            Ok(None) => continue,
            Err(err) => {
                tracing::warn!("subtask[{}] control listener stopped: {}", subtask, err);
                return;
            }
        };
        if shutdown.load(Ordering::Acquire) {
            break;
        }
        match controller.on_payload(&payload) {
            Ok(AdjustmentOutcome::Applied { previous, current }) => tracing::info!(
                "subtask[{}] adjustment on '{}': max_count {} -> {}",
                subtask,
                subscription.topic(),
                previous,
                current
            ),
            Ok(AdjustmentOutcome::DuplicateIgnored(pending)) => tracing::debug!(
                "subtask[{}] duplicate adjustment ignored, pending {}",
                subtask,
                pending
            ),
            Ok(outcome) => tracing::debug!("subtask[{}] adjustment {:?}", subtask, outcome),
            Err(err) => tracing::warn!("subtask[{}] dropped control message: {}", subtask, err),
        }
    }
    tracing::debug!("subtask[{}] control listener shut down", subtask);
}

#[cfg(test)]
#[path = "tests/listener_tests.rs"]
mod tests;
