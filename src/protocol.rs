//! Control-plane framing and message vocabulary.
//!
//! Every control message on a stream transport is framed as two big-endian
//! `u32` words followed by the payload:
//!
//! ```text
//! u32 total_length   (4 + payload length)
//! u32 type           (message type code)
//! bytes payload      (UTF-8 JSON unless noted)
//! ```
//!
//! `total_length` counts the bytes after the length word itself, so the
//! payload is `total_length - 4` bytes. Frames over 1 MiB are rejected
//! before the body is read.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound on `total_length`, a guard on the allocator.
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Message types on the control channel, with their stable wire codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum MessageType {
    /// Client to server, carries the JSON test configuration.
    TestStart = 1,
    /// Server to client, acknowledges the configuration.
    TestStartAck = 2,
    /// Reserved, never sent.
    TestRunning = 3,
    /// Receiver to sender, carries the JSON end-of-test block.
    TestEnd = 4,
    /// Receiver to sender, one per elapsed second.
    Interval = 5,
    /// Either direction, carries a JSON error description.
    Error = 6,
}

impl MessageType {
    /// Maps a wire code back to a type.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] for a code outside the enumeration.
    pub fn from_code(code: u32) -> Result<Self> {
        match code {
            1 => Ok(MessageType::TestStart),
            2 => Ok(MessageType::TestStartAck),
            3 => Ok(MessageType::TestRunning),
            4 => Ok(MessageType::TestEnd),
            5 => Ok(MessageType::Interval),
            6 => Ok(MessageType::Error),
            other => Err(Error::Protocol(format!("unknown message type: {}", other))),
        }
    }
}

/// A framed control message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub msg_type: MessageType,
    pub data: Vec<u8>,
}

/// Encodes a message into its wire form.
///
/// # Errors
///
/// Returns [`Error::MessageTooLarge`] when the payload would push the frame
/// over the 1 MiB cap. Nothing is written in that case.
///
/// # Examples
///
/// ```
/// use wireperf::protocol::{encode_message, MessageType};
///
/// let frame = encode_message(MessageType::TestStartAck, b"{}").unwrap();
/// assert_eq!(&frame[..8], &[0, 0, 0, 6, 0, 0, 0, 2]);
/// ```
pub fn encode_message(msg_type: MessageType, data: &[u8]) -> Result<Vec<u8>> {
    let total_length = 4 + data.len();
    if total_length > MAX_MESSAGE_SIZE {
        return Err(Error::MessageTooLarge(total_length));
    }
    let mut frame = Vec::with_capacity(4 + total_length);
    frame.extend_from_slice(&(total_length as u32).to_be_bytes());
    frame.extend_from_slice(&(msg_type as u32).to_be_bytes());
    frame.extend_from_slice(data);
    Ok(frame)
}

/// Writes one framed message and flushes.
///
/// A partial write leaves the stream in an unspecified state; callers must
/// close the connection on error.
pub async fn write_message<W>(writer: &mut W, msg_type: MessageType, data: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode_message(msg_type, data)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads one framed message.
///
/// # Errors
///
/// - [`Error::MessageTooLarge`] when the length prefix exceeds 1 MiB,
///   checked before the body is allocated.
/// - [`Error::Protocol`] when the prefix is shorter than the type word or
///   the type code is unknown.
/// - [`Error::Io`] on EOF or short read.
pub async fn read_message<R>(reader: &mut R) -> Result<Message>
where
    R: AsyncRead + Unpin,
{
    let total_length = reader.read_u32().await? as usize;
    if total_length > MAX_MESSAGE_SIZE {
        return Err(Error::MessageTooLarge(total_length));
    }
    if total_length < 4 {
        return Err(Error::Protocol(format!(
            "frame length {} shorter than type word",
            total_length
        )));
    }

    let code = reader.read_u32().await?;
    let msg_type = MessageType::from_code(code)?;

    let mut data = vec![0u8; total_length - 4];
    reader.read_exact(&mut data).await?;

    Ok(Message { msg_type, data })
}

/// JSON test configuration carried in TEST_START.
///
/// All fields are optional on the wire. Fields the data plane does not
/// consume (`tos`, `flowlabel`, `title`, ...) are parsed and carried for
/// compatibility with other implementations but otherwise ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TestConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parallel: Option<u32>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub reverse: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub window: Option<usize>,
    #[serde(rename = "len", skip_serializing_if = "Option::is_none")]
    pub length: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bandwidth: Option<u64>,

    // Passthrough fields, parsed and ignored.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fqrate: Option<i64>,
    #[serde(rename = "pacing_timer", skip_serializing_if = "Option::is_none")]
    pub pacing: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub burst: Option<u32>,
    #[serde(rename = "bidirectional", skip_serializing_if = "std::ops::Not::not")]
    pub bidir: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tos: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flowlabel: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra_data: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub get_server_output: bool,
    #[serde(rename = "udp_counters_64bit", skip_serializing_if = "std::ops::Not::not")]
    pub udp_counters_64bit: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub zerocopy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub omit: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blockcount: Option<i64>,
}

impl TestConfig {
    /// Negotiated protocol, defaulting to TCP when absent.
    pub fn protocol(&self) -> Result<crate::config::Protocol> {
        crate::config::Protocol::from_wire(self.protocol.as_deref().unwrap_or(""))
    }

    /// Test duration in seconds; `time` wins over `duration`, and a missing
    /// or zero value falls back to 10.
    pub fn duration_secs(&self) -> u64 {
        match self.time.filter(|t| *t > 0).or(self.duration.filter(|t| *t > 0)) {
            Some(secs) => secs,
            None => 10,
        }
    }
}
