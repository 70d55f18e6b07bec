//! Session protocol
//!
//! This module defines the messages exchanged between the coordinator, its
//! workers and the client. Every stream message is a single signed 32-bit
//! integer: a data value, a count, a port, or one of the control codes in
//! [`ControlMessage`].
//!
//! # Message Flow
//!
//! ```text
//! Client                     Coordinator                 Worker k
//!   |<--- UDP "<port>" --------|                            |
//!   |---- TCP connect -------->|                            |
//!   |---- worker count K ----->|                            |
//!   |                          |--- spawn, bind ----------->|
//!   |<--- K ports -------------|                            |
//!   |---- TCP connect ------------------------------------->|
//!   |---- data values ------------------------------------->|
//!   |---- TERMINATE_STREAM -------------------------------->|
//!   |---- QUERY_* ------------>|                            |
//!   |<--- answer --------------|                            |
//!   |---- CLOSE_CONNECTION --->|--- stop ------------------>|
//! ```
//!
//! # Message Framing
//!
//! Messages have a fixed size, so no length prefix is needed:
//!
//! ```text
//! [4 bytes: i32, big-endian]
//! ```
//!
//! The discovery datagram is the bound port as ASCII decimal, with no
//! terminator.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Size of one encoded message in bytes
pub const MESSAGE_LEN: usize = 4;

/// Reserved integer values with protocol meaning
///
/// Several codes share a value because they are only ever interpreted on
/// one channel: `0` means "close" to the coordinator and "end of stream" to
/// a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMessage {
    /// Session or worker idle timeout (internal)
    ClientTimeout,
    /// Request the total sum over all workers
    QuerySumComplete,
    /// Request the id of the worker with the largest sum
    QueryMaxSumWorker,
    /// Request the total number of data items
    QueryNumberCount,
    /// End the session
    CloseConnection,
    /// End one worker's data stream
    TerminateStream,
    /// Reply to an unrecognized query code
    InvalidQuery,
}

impl ControlMessage {
    /// The integer sent over the wire for this code
    pub const fn value(self) -> i32 {
        match self {
            ControlMessage::ClientTimeout => -1,
            ControlMessage::QuerySumComplete => 1,
            ControlMessage::QueryMaxSumWorker => 2,
            ControlMessage::QueryNumberCount => 3,
            ControlMessage::CloseConnection => 0,
            ControlMessage::TerminateStream => 0,
            ControlMessage::InvalidQuery => -1,
        }
    }

    /// Interpret a message received on the primary channel
    ///
    /// Returns `None` for values that are not a client query.
    pub fn from_query_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(ControlMessage::CloseConnection),
            1 => Some(ControlMessage::QuerySumComplete),
            2 => Some(ControlMessage::QueryMaxSumWorker),
            3 => Some(ControlMessage::QueryNumberCount),
            _ => None,
        }
    }

    /// Whether a value received on a worker channel ends the stream
    pub fn is_stream_terminator(value: i32) -> bool {
        value == ControlMessage::TerminateStream.value()
    }
}

/// Encode one message
pub fn encode_message(value: i32) -> [u8; MESSAGE_LEN] {
    value.to_be_bytes()
}

/// Decode one message
pub fn decode_message(buf: [u8; MESSAGE_LEN]) -> i32 {
    i32::from_be_bytes(buf)
}

/// Clamp a 64-bit aggregate into a wire value
///
/// Saturates instead of wrapping so an overflowing sum can never be
/// mistaken for a small value or a control code.
pub fn saturate_i64(value: i64) -> i32 {
    value.clamp(i32::MIN as i64, i32::MAX as i64) as i32
}

/// Clamp an unsigned count into a wire value
pub fn saturate_u64(value: u64) -> i32 {
    value.min(i32::MAX as u64) as i32
}

/// Parse the discovery datagram payload
pub fn parse_port_datagram(payload: &[u8]) -> Option<u16> {
    let text = std::str::from_utf8(payload).ok()?;
    text.trim().parse::<u16>().ok().filter(|&port| port != 0)
}

/// Build the discovery datagram payload
pub fn port_datagram(port: u16) -> Vec<u8> {
    port.to_string().into_bytes()
}

/// Read one message from a stream
///
/// Not cancel safe: dropping the future mid-read loses the partial bytes.
pub async fn read_message<R: AsyncRead + Unpin>(stream: &mut R) -> std::io::Result<i32> {
    let mut buf = [0u8; MESSAGE_LEN];
    stream.read_exact(&mut buf).await?;
    Ok(decode_message(buf))
}

/// Write one message to a stream and flush it
pub async fn write_message<W>(stream: &mut W, value: i32) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    stream.write_all(&encode_message(value)).await?;
    stream.flush().await
}
