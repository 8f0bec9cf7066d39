// Wire format for process-group traffic, shared by the TCP transport and the relay

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use uuid::Uuid;

use crate::matrix::Distance;

/// Bumped whenever `RelayMessage` or `Frame` change incompatibly
pub const PROTOCOL_VERSION: u32 = 1;

/// Maximum encoded message size (64MB)
pub const MESSAGE_SIZE_LIMIT: usize = 64 * 1024 * 1024;

/// Collective operation a frame belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CollectiveOp {
    /// One row from a root to every other rank
    Broadcast,
    /// Arrival at, and release from, a barrier
    Barrier,
    /// One scalar per rank combined on a root
    Reduce,
    /// Ok/failed vote exchanged by every pair of ranks
    Agree,
    /// Row blocks collected on a root
    Gather,
    /// Group-wide abort notice
    Abort,
}

/// Data carried by a frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Payload {
    Row(Vec<Distance>),
    Scalar(f64),
    Vote { ok: bool, reason: Option<String> },
    Signal,
    Abort { reason: String },
}

/// Point-to-point message between two ranks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Sending rank
    pub source: u32,
    /// Receiving rank
    pub dest: u32,
    /// Sequence number of the collective on the sender
    pub seq: u64,
    /// Collective this frame belongs to
    pub op: CollectiveOp,
    pub payload: Payload,
}

impl Frame {
    pub fn new(source: u32, dest: u32, seq: u64, op: CollectiveOp, payload: Payload) -> Self {
        Self {
            source,
            dest,
            seq,
            op,
            payload,
        }
    }

    /// Abort notice from `source` to `dest`
    pub fn abort(source: u32, dest: u32, reason: impl Into<String>) -> Self {
        Self::new(
            source,
            dest,
            0,
            CollectiveOp::Abort,
            Payload::Abort {
                reason: reason.into(),
            },
        )
    }

    pub fn is_abort(&self) -> bool {
        self.op == CollectiveOp::Abort
    }

    /// Approximate size of this frame in bytes.
    ///
    /// Raw field sizes only; the CBOR encoding differs slightly.
    pub fn size_bytes(&self) -> usize {
        // source (4) + dest (4) + seq (8) + op (1)
        let fixed = 4 + 4 + 8 + 1;
        let payload = match &self.payload {
            Payload::Row(row) => row.len() * std::mem::size_of::<Distance>(),
            Payload::Scalar(_) => 8,
            Payload::Vote { reason, .. } => 1 + reason.as_ref().map_or(0, String::len),
            Payload::Signal => 0,
            Payload::Abort { reason } => reason.len(),
        };
        fixed + payload
    }
}

/// Messages exchanged between a rank and the relay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RelayMessage {
    /// First message of every connection: join `session` as `rank` of `size`
    Hello {
        session: Uuid,
        rank: u32,
        size: u32,
        version: u32,
    },
    /// Every rank of the session has joined
    Ready { session: Uuid },
    /// The relay refused the join
    Rejected { reason: String },
    /// Traffic routed by `Frame::dest`
    Frame(Frame),
    /// A rank disconnected without saying goodbye
    PeerLost { rank: u32 },
    /// Orderly departure of a rank
    Goodbye,
}

/// Read a length-prefixed CBOR message from an async stream
pub async fn read_message<T, M>(io: &mut T) -> io::Result<M>
where
    T: AsyncRead + Unpin,
    M: DeserializeOwned,
{
    // u32 length prefix (big-endian)
    let mut len_buf = [0u8; 4];
    io.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf) as usize;

    if len > MESSAGE_SIZE_LIMIT {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Message size {} exceeds limit {}", len, MESSAGE_SIZE_LIMIT),
        ));
    }

    let mut buf = vec![0u8; len];
    io.read_exact(&mut buf).await?;

    ciborium::from_reader(&buf[..]).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

/// Write a length-prefixed CBOR message to an async stream
pub async fn write_message<T, M>(io: &mut T, message: &M) -> io::Result<()>
where
    T: AsyncWrite + Unpin,
    M: Serialize,
{
    let mut buf = Vec::new();
    ciborium::into_writer(message, &mut buf)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

    if buf.len() > MESSAGE_SIZE_LIMIT {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!(
                "Message size {} exceeds limit {}",
                buf.len(),
                MESSAGE_SIZE_LIMIT
            ),
        ));
    }

    let len = buf.len() as u32;
    io.write_all(&len.to_be_bytes()).await?;
    io.write_all(&buf).await?;
    io.flush().await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::INFINITY;
    use std::io::Cursor;

    fn row_frame(row: Vec<Distance>) -> Frame {
        Frame::new(1, 2, 7, CollectiveOp::Broadcast, Payload::Row(row))
    }

    #[tokio::test]
    async fn test_frame_stream_roundtrip() {
        let msg = RelayMessage::Frame(row_frame(vec![0, 3, INFINITY, -2]));

        let mut write_buf = Vec::new();
        write_message(&mut write_buf, &msg).await.unwrap();

        let mut read_buf = Cursor::new(write_buf);
        let decoded: RelayMessage = read_message(&mut read_buf).await.unwrap();
        assert_eq!(msg, decoded);
    }

    #[tokio::test]
    async fn test_consecutive_messages() {
        let session = Uuid::new_v4();
        let mut buf = Vec::new();
        write_message(
            &mut buf,
            &RelayMessage::Hello {
                session,
                rank: 0,
                size: 2,
                version: PROTOCOL_VERSION,
            },
        )
        .await
        .unwrap();
        write_message(&mut buf, &RelayMessage::Goodbye).await.unwrap();

        let mut cursor = Cursor::new(buf);
        let first: RelayMessage = read_message(&mut cursor).await.unwrap();
        let second: RelayMessage = read_message(&mut cursor).await.unwrap();
        assert!(matches!(first, RelayMessage::Hello { rank: 0, size: 2, .. }));
        assert_eq!(second, RelayMessage::Goodbye);
    }

    #[tokio::test]
    async fn test_read_size_limit_enforcement() {
        let mut buf = Vec::new();
        write_message(&mut buf, &RelayMessage::Goodbye).await.unwrap();

        let large_len: u32 = (MESSAGE_SIZE_LIMIT + 1) as u32;
        buf[0..4].copy_from_slice(&large_len.to_be_bytes());

        let mut cursor = Cursor::new(buf);
        let result: io::Result<RelayMessage> = read_message(&mut cursor).await;
        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn test_malformed_cbor() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&6u32.to_be_bytes());
        buf.extend_from_slice(&[0xFF; 6]);

        let mut cursor = Cursor::new(buf);
        let result: io::Result<RelayMessage> = read_message(&mut cursor).await;
        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn test_incomplete_read() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&100u32.to_be_bytes());
        buf.extend_from_slice(&[0x01, 0x02, 0x03]);

        let mut cursor = Cursor::new(buf);
        let result: io::Result<RelayMessage> = read_message(&mut cursor).await;
        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_abort_frame() {
        let frame = Frame::abort(3, 0, "matrix file missing");
        assert!(frame.is_abort());
        assert_eq!(frame.source, 3);
        assert_eq!(
            frame.payload,
            Payload::Abort {
                reason: "matrix file missing".into()
            }
        );
    }

    #[test]
    fn test_size_bytes() {
        let frame = row_frame(vec![1; 10]);
        assert_eq!(frame.size_bytes(), 17 + 40);
        let signal = Frame::new(0, 1, 0, CollectiveOp::Barrier, Payload::Signal);
        assert_eq!(signal.size_bytes(), 17);
    }
}
