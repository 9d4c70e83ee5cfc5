//! Bounded local channels between tasks.
//!
//! Thin wrappers over crossbeam-channel carrying [`StreamElement`]s. A full
//! channel blocks the sender, which is how backpressure reaches the source.

use std::time::Duration;

use anyhow::{Result, anyhow};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, bounded};

use crate::types::StreamElement;

/// Default channel buffer size.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Clone)]
pub struct LocalChannelSender<T> {
    sender: Sender<StreamElement<T>>,
}

impl<T> LocalChannelSender<T> {
    /// Blocks while the channel is full.
    pub fn send(&self, element: StreamElement<T>) -> Result<()> {
        self.sender
            .send(element)
            .map_err(|_| anyhow!("channel closed: receiver dropped"))
    }

    /// Fails if the channel is full or closed.
    pub fn try_send(&self, element: StreamElement<T>) -> Result<()> {
        self.sender
            .try_send(element)
            .map_err(|e| anyhow!("failed to send: {}", e))
    }
}

pub struct LocalChannelReceiver<T> {
    receiver: Receiver<StreamElement<T>>,
}

impl<T> LocalChannelReceiver<T> {
    /// Block until an element is available.
    pub fn recv(&self) -> Result<StreamElement<T>> {
        self.receiver
            .recv()
            .map_err(|_| anyhow!("channel closed: sender dropped"))
    }

    /// Wait at most `timeout`. Returns `Ok(None)` on timeout.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<StreamElement<T>>> {
        match self.receiver.recv_timeout(timeout) {
            Ok(element) => Ok(Some(element)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(anyhow!("channel closed: sender dropped")),
        }
    }

    /// Returns `Ok(None)` if nothing is queued.
    pub fn try_recv(&self) -> Result<Option<StreamElement<T>>> {
        match self.receiver.try_recv() {
            Ok(element) => Ok(Some(element)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(anyhow!("channel closed: sender dropped")),
        }
    }

    /// Elements currently queued.
    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }
}

/// Create a bounded local channel pair.
pub fn local_channel<T>(capacity: usize) -> (LocalChannelSender<T>, LocalChannelReceiver<T>) {
    let (sender, receiver) = bounded(capacity);
    (
        LocalChannelSender { sender },
        LocalChannelReceiver { receiver },
    )
}

/// Create a local channel with [`DEFAULT_CHANNEL_CAPACITY`].
pub fn local_channel_default<T>() -> (LocalChannelSender<T>, LocalChannelReceiver<T>) {
    local_channel(DEFAULT_CHANNEL_CAPACITY)
}

#[cfg(test)]
#[path = "tests/channel_tests.rs"]
mod tests;
