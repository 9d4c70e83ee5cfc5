//! Framed TCP control broker and its blocking client.
//!
//! The broker is a topic router: a connection sends `Subscribe` frames for the
//! topics it wants and gets a `Subscribed` frame back once the topic is
//! registered. Every `Publish` frame is fanned out as a `Message` frame to each
//! connection subscribed to the same topic. Publishes are not acknowledged and
//! nothing is persisted or retained.

use std::collections::HashMap;
use std::net::{Shutdown, SocketAddr, TcpStream as StdTcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use crossbeam_channel::unbounded;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use super::frame::{
    ControlFrame, ControlFrameType, read_frame, read_frame_blocking, write_frame,
    write_frame_blocking,
};
use super::{ControlChannel, ControlSubscription};
use crate::error::PreAggregateError;

/// Default timeout for the blocking connect done at operator open.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

type ConnectionId = u64;

// ============================================================================
// Broker
// ============================================================================

#[derive(Default)]
struct TopicTable {
    next_connection: AtomicU64,
    subscribers: RwLock<HashMap<String, Vec<(ConnectionId, mpsc::UnboundedSender<ControlFrame>)>>>,
}

impl TopicTable {
    fn register(
        &self,
        topic: String,
        connection: ConnectionId,
        sender: mpsc::UnboundedSender<ControlFrame>,
    ) {
        let mut subscribers = self.subscribers.write().expect("topic table poisoned");
        let entry = subscribers.entry(topic).or_default();
        if !entry.iter().any(|(id, _)| *id == connection) {
            entry.push((connection, sender));
        }
    }

    fn publish(&self, topic: &str, payload: &[u8]) -> usize {
        let subscribers = self.subscribers.read().expect("topic table poisoned");
        subscribers.get(topic).map_or(0, |senders| {
            senders
                .iter()
                .filter(|(_, sender)| {
                    sender
                        .send(ControlFrame::message(topic, payload.to_vec()))
                        .is_ok()
                })
                .count()
        })
    }

    fn remove_connection(&self, connection: ConnectionId) {
        let mut subscribers = self.subscribers.write().expect("topic table poisoned");
        subscribers.retain(|_, senders| {
            senders.retain(|(id, _)| *id != connection);
            !senders.is_empty()
        });
    }

    fn subscriber_count(&self, topic: &str) -> usize {
        self.subscribers
            .read()
            .expect("topic table poisoned")
            .get(topic)
            .map_or(0, Vec::len)
    }
}

/// Topic-routing control broker.
///
/// Cloning shares the topic table, so a clone can be queried while another
/// one is serving.
#[derive(Clone, Default)]
pub struct ControlBrokerServer {
    topics: Arc<TopicTable>,
}

impl ControlBrokerServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `addr` and serve until the task is cancelled.
    pub async fn serve_addr(&self, addr: SocketAddr) -> Result<()> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind control broker on {}", addr))?;
        self.serve(listener).await
    }

    /// Accept connections on an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        tracing::info!("control broker listening on {}", listener.local_addr()?);
        loop {
            let (stream, peer) = listener.accept().await?;
            let topics = Arc::clone(&self.topics);
            let connection = topics.next_connection.fetch_add(1, Ordering::Relaxed);
            tokio::spawn(async move {
                tracing::debug!("control connection {} from {}", connection, peer);
                if let Err(err) = handle_connection(&topics, connection, stream).await {
                    tracing::debug!("control connection {} closed: {}", connection, err);
                }
                topics.remove_connection(connection);
            });
        }
    }

    /// Connections currently subscribed to `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics.subscriber_count(topic)
    }
}

async fn handle_connection(
    topics: &TopicTable,
    connection: ConnectionId,
    stream: TcpStream,
) -> Result<()> {
    let (mut read_half, mut write_half) = stream.into_split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ControlFrame>();

    tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if write_frame(&mut write_half, &frame).await.is_err() {
                break;
            }
        }
    });

    loop {
        let frame = read_frame(&mut read_half).await?;
        match frame.frame_type {
            ControlFrameType::Subscribe => {
                tracing::info!("connection {} subscribed to '{}'", connection, frame.topic);
                let ack = ControlFrame::subscribed(frame.topic.clone());
                topics.register(frame.topic, connection, tx.clone());
                // Queued behind any message routed since registration.
                if tx.send(ack).is_err() {
                    return Err(anyhow!("control connection {} writer closed", connection));
                }
            }
            ControlFrameType::Publish => {
                let delivered = topics.publish(&frame.topic, &frame.payload);
                tracing::debug!(
                    "published {} bytes on '{}' to {} subscriber(s)",
                    frame.payload.len(),
                    frame.topic,
                    delivered
                );
            }
            ControlFrameType::Message | ControlFrameType::Subscribed => {
                tracing::warn!(
                    "connection {} sent a broker-only {:?} frame, ignored",
                    connection,
                    frame.frame_type
                );
            }
        }
    }
}

// ============================================================================
// Client
// ============================================================================

/// Blocking client of a [`ControlBrokerServer`].
///
/// Each subscription opens its own connection, waits (up to the connect
/// timeout) for the broker to confirm the topic is registered, then starts a
/// reader thread that forwards `Message` payloads into the subscription.
/// Anything published after `subscribe` returns is delivered. Dropping the
/// subscription shuts the socket down, which ends the reader thread.
#[derive(Debug, Clone)]
pub struct TcpControlChannel {
    address: String,
    connect_timeout: Duration,
}

impl TcpControlChannel {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    fn connect(&self) -> Result<StdTcpStream> {
        let addrs = self
            .address
            .to_socket_addrs()
            .with_context(|| format!("cannot resolve control broker '{}'", self.address))?;
        let mut last_err = None;
        for addr in addrs {
            match StdTcpStream::connect_timeout(&addr, self.connect_timeout) {
                Ok(stream) => return Ok(stream),
                Err(err) => last_err = Some(err),
            }
        }
        Err(match last_err {
            Some(err) => anyhow!("connect to control broker '{}' failed: {}", self.address, err),
            None => anyhow!("control broker '{}' resolved to no address", self.address),
        })
    }
}

impl ControlChannel for TcpControlChannel {
    fn subscribe(&self, topic: &str) -> Result<ControlSubscription> {
        let control_error = || PreAggregateError::ControlChannel {
            topic: topic.to_string(),
        };
        let mut stream = self.connect().with_context(control_error)?;
        stream.set_nodelay(true).with_context(control_error)?;
        write_frame_blocking(&mut stream, &ControlFrame::subscribe(topic))
            .with_context(control_error)?;

        let (sender, receiver) = unbounded();
        stream
            .set_read_timeout(Some(self.connect_timeout))
            .with_context(control_error)?;
        loop {
            let frame = read_frame_blocking(&mut stream)
                .context("no subscription acknowledgement from control broker")
                .with_context(control_error)?;
            match frame.frame_type {
                ControlFrameType::Subscribed if frame.topic == topic => break,
                ControlFrameType::Message => {
                    let _ = sender.send(frame.payload);
                }
                other => tracing::warn!(
                    "unexpected {:?} frame while subscribing to '{}'",
                    other,
                    topic
                ),
            }
        }
        stream.set_read_timeout(None).with_context(control_error)?;

        let mut reader = stream.try_clone().with_context(control_error)?;
        let reader_topic = topic.to_string();
        thread::Builder::new()
            .name(format!("control-reader-{}", topic))
            .spawn(move || {
                loop {
                    match read_frame_blocking(&mut reader) {
                        Ok(frame) if frame.frame_type == ControlFrameType::Message => {
                            if sender.send(frame.payload).is_err() {
                                break;
                            }
                        }
                        Ok(frame) => tracing::warn!(
                            "unexpected {:?} frame on subscription '{}'",
                            frame.frame_type,
                            reader_topic
                        ),
                        Err(err) => {
                            tracing::debug!("subscription '{}' reader stopped: {}", reader_topic, err);
                            break;
                        }
                    }
                }
            })
            .with_context(control_error)?;

        tracing::info!("subscribed to '{}' on {}", topic, self.address);
        Ok(ControlSubscription::new(topic, receiver).with_closer(move || {
            let _ = stream.shutdown(Shutdown::Both);
        }))
    }
}

/// Publish one payload and disconnect.
pub async fn publish_once(address: &str, topic: &str, payload: impl Into<Vec<u8>>) -> Result<()> {
    let mut stream = TcpStream::connect(address)
        .await
        .with_context(|| format!("connect to control broker '{}' failed", address))?;
    write_frame(&mut stream, &ControlFrame::publish(topic, payload)).await?;
    Ok(())
}

#[cfg(test)]
#[path = "tests/tcp_tests.rs"]
mod tests;
