use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use crossbeam_channel::{Sender, unbounded};

use super::{ControlChannel, ControlSubscription};

type SubscriberId = u64;

#[derive(Debug, Default)]
struct Topics {
    next_id: AtomicU64,
    subscribers: Mutex<HashMap<String, Vec<(SubscriberId, Sender<Vec<u8>>)>>>,
}

impl Topics {
    fn remove(&self, topic: &str, id: SubscriberId) {
        let mut subscribers = self.subscribers.lock().expect("broker topics poisoned");
        if let Some(senders) = subscribers.get_mut(topic) {
            senders.retain(|(sid, _)| *sid != id);
            if senders.is_empty() {
                subscribers.remove(topic);
            }
        }
    }
}

/// In-process pub/sub broker.
///
/// Cloning shares the same topic table.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBroker {
    topics: Arc<Topics>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver `payload` to every live subscriber of `topic`.
    ///
    /// Returns the number of subscribers that received it.
    pub fn publish(&self, topic: &str, payload: impl Into<Vec<u8>>) -> usize {
        let payload = payload.into();
        let mut subscribers = self
            .topics
            .subscribers
            .lock()
            .expect("broker topics poisoned");
        let Some(senders) = subscribers.get_mut(topic) else {
            tracing::debug!("no subscriber for topic '{}'", topic);
            return 0;
        };
        senders.retain(|(_, sender)| sender.send(payload.clone()).is_ok());
        senders.len()
    }

    /// Live subscribers of `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .subscribers
            .lock()
            .expect("broker topics poisoned")
            .get(topic)
            .map_or(0, Vec::len)
    }
}

impl ControlChannel for InMemoryBroker {
    fn subscribe(&self, topic: &str) -> Result<ControlSubscription> {
        let (sender, receiver) = unbounded();
        let id = self.topics.next_id.fetch_add(1, Ordering::Relaxed);
        self.topics
            .subscribers
            .lock()
            .expect("broker topics poisoned")
            .entry(topic.to_string())
            .or_default()
            .push((id, sender));
        tracing::debug!("in-memory subscription {} to '{}'", id, topic);

        let topics = Arc::clone(&self.topics);
        let owned_topic = topic.to_string();
        Ok(ControlSubscription::new(topic, receiver)
            .with_closer(move || topics.remove(&owned_topic, id)))
    }
}

#[cfg(test)]
#[path = "tests/memory_tests.rs"]
mod tests;
