use std::io::{Read, Write};

use anyhow::{Result, anyhow};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound on a frame body; control payloads are tiny integers.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

/// Control frame type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ControlFrameType {
    /// Client → broker: deliver `topic` messages to this connection.
    Subscribe = 1,
    /// Client → broker: fan `payload` out to subscribers of `topic`.
    Publish = 2,
    /// Broker → client: a payload published to a subscribed topic.
    Message = 3,
    /// Broker → client: the subscription to `topic` is registered.
    Subscribed = 4,
}

impl TryFrom<u8> for ControlFrameType {
    type Error = anyhow::Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(ControlFrameType::Subscribe),
            2 => Ok(ControlFrameType::Publish),
            3 => Ok(ControlFrameType::Message),
            4 => Ok(ControlFrameType::Subscribed),
            other => Err(anyhow!("unknown control frame type: {}", other)),
        }
    }
}

/// Wire frame: `[len:u32][type:u8][topic_len:u16][topic:utf8][payload:bytes]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlFrame {
    pub frame_type: ControlFrameType,
    pub topic: String,
    pub payload: Vec<u8>,
}

impl ControlFrame {
    pub fn new(frame_type: ControlFrameType, topic: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            frame_type,
            topic: topic.into(),
            payload,
        }
    }

    pub fn subscribe(topic: impl Into<String>) -> Self {
        Self::new(ControlFrameType::Subscribe, topic, Vec::new())
    }

    pub fn publish(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self::new(ControlFrameType::Publish, topic, payload.into())
    }

    pub fn message(topic: impl Into<String>, payload: Vec<u8>) -> Self {
        Self::new(ControlFrameType::Message, topic, payload)
    }

    pub fn subscribed(topic: impl Into<String>) -> Self {
        Self::new(ControlFrameType::Subscribed, topic, Vec::new())
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let topic = self.topic.as_bytes();
        if topic.len() > u16::MAX as usize {
            return Err(anyhow!("control topic too long: {} bytes", topic.len()));
        }
        let body_len = 1 + 2 + topic.len() + self.payload.len();
        if body_len > MAX_FRAME_LEN {
            return Err(anyhow!("control frame too large: {} bytes", body_len));
        }
        let mut out = Vec::with_capacity(4 + body_len);
        out.extend_from_slice(&(body_len as u32).to_be_bytes());
        out.push(self.frame_type as u8);
        out.extend_from_slice(&(topic.len() as u16).to_be_bytes());
        out.extend_from_slice(topic);
        out.extend_from_slice(&self.payload);
        Ok(out)
    }

    pub fn decode(body: &[u8]) -> Result<Self> {
        if body.len() < 3 {
            return Err(anyhow!("control frame body too short: {}", body.len()));
        }
        let frame_type = ControlFrameType::try_from(body[0])?;
        let topic_len = u16::from_be_bytes([body[1], body[2]]) as usize;
        let topic_end = 3 + topic_len;
        if body.len() < topic_end {
            return Err(anyhow!(
                "control frame topic truncated: need {} bytes, have {}",
                topic_end,
                body.len()
            ));
        }
        let topic = std::str::from_utf8(&body[3..topic_end])
            .map_err(|e| anyhow!("control frame topic is not utf-8: {}", e))?
            .to_string();
        Ok(Self {
            frame_type,
            topic,
            payload: body[topic_end..].to_vec(),
        })
    }
}

fn check_len(body_len: usize) -> Result<()> {
    if body_len > MAX_FRAME_LEN {
        return Err(anyhow!("control frame too large: {} bytes", body_len));
    }
    Ok(())
}

pub async fn read_frame<R>(reader: &mut R) -> Result<ControlFrame>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;
    let body_len = u32::from_be_bytes(len_buf) as usize;
    check_len(body_len)?;
    let mut body = vec![0u8; body_len];
    reader.read_exact(&mut body).await?;
    ControlFrame::decode(&body)
}

pub async fn write_frame<W>(writer: &mut W, frame: &ControlFrame) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&frame.encode()?).await?;
    writer.flush().await?;
    Ok(())
}

/// Blocking variant of [`read_frame`] for thread-based clients.
pub fn read_frame_blocking<R: Read>(reader: &mut R) -> Result<ControlFrame> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf)?;
    let body_len = u32::from_be_bytes(len_buf) as usize;
    check_len(body_len)?;
    let mut body = vec![0u8; body_len];
    reader.read_exact(&mut body)?;
    ControlFrame::decode(&body)
}

/// Blocking variant of [`write_frame`].
pub fn write_frame_blocking<W: Write>(writer: &mut W, frame: &ControlFrame) -> Result<()> {
    writer.write_all(&frame.encode()?)?;
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
#[path = "tests/frame_tests.rs"]
mod tests;
