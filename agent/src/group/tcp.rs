//! TCP transport through a rowcast relay
//!
//! Every rank opens one connection to the relay, announces its session,
//! rank and group size, and waits until the whole group has joined. The
//! relay then routes each frame to the connection of `frame.dest`.

use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{BufReader, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::transport::Transport;
use super::wire::{read_message, write_message, Frame, RelayMessage, PROTOCOL_VERSION};
use super::ProcessGroup;
use crate::errors::{AgentError, Result};

/// One rank's connection to the relay
pub struct TcpTransport {
    rank: u32,
    session: Uuid,
    reader: BufReader<OwnedReadHalf>,
    writer: BufWriter<OwnedWriteHalf>,
}

impl TcpTransport {
    /// Join `session` as `rank` of `size` through the relay at `relay_addr`.
    ///
    /// Returns once the relay reports that every rank has joined, or fails
    /// after `rendezvous_timeout`.
    pub async fn connect(
        relay_addr: &str,
        session: Uuid,
        rank: usize,
        size: usize,
        rendezvous_timeout: Duration,
    ) -> Result<Self> {
        let rank = u32::try_from(rank)
            .map_err(|_| AgentError::Config(format!("rank {} is too large", rank)))?;
        let size = u32::try_from(size)
            .map_err(|_| AgentError::Config(format!("group of {} is too large", size)))?;

        tokio::time::timeout(
            rendezvous_timeout,
            Self::join(relay_addr, session, rank, size),
        )
        .await
        .map_err(|_| {
            AgentError::Network(format!(
                "group {} did not assemble within {:?}",
                session, rendezvous_timeout
            ))
        })?
    }

    async fn join(relay_addr: &str, session: Uuid, rank: u32, size: u32) -> Result<Self> {
        let stream = TcpStream::connect(relay_addr).await.map_err(|e| {
            AgentError::Network(format!("cannot reach relay at {}: {}", relay_addr, e))
        })?;
        stream.set_nodelay(true)?;

        let (read_half, write_half) = stream.into_split();
        let mut transport = Self {
            rank,
            session,
            reader: BufReader::new(read_half),
            writer: BufWriter::new(write_half),
        };

        let hello = RelayMessage::Hello {
            session,
            rank,
            size,
            version: PROTOCOL_VERSION,
        };
        write_message(&mut transport.writer, &hello).await?;
        debug!(session = %session, rank = rank, size = size, "Sent hello to relay");

        loop {
            match read_message(&mut transport.reader).await? {
                RelayMessage::Ready { session: ready } if ready == session => break,
                RelayMessage::Rejected { reason } => {
                    return Err(AgentError::Network(format!("relay rejected join: {}", reason)))
                }
                other => warn!(message = ?other, "Ignoring relay message before ready"),
            }
        }

        info!(
            session = %session,
            rank = rank,
            size = size,
            relay = %relay_addr,
            "Joined process group"
        );
        Ok(transport)
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn send(&mut self, frame: Frame) -> Result<()> {
        write_message(&mut self.writer, &RelayMessage::Frame(frame)).await?;
        Ok(())
    }

    async fn recv(&mut self) -> Result<Frame> {
        loop {
            match read_message(&mut self.reader).await? {
                RelayMessage::Frame(frame) => return Ok(frame),
                RelayMessage::PeerLost { rank } => {
                    return Err(AgentError::Network(format!(
                        "rank {} left session {} unexpectedly",
                        rank, self.session
                    )))
                }
                other => warn!(rank = self.rank, message = ?other, "Ignoring relay message"),
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        write_message(&mut self.writer, &RelayMessage::Goodbye).await?;
        debug!(rank = self.rank, session = %self.session, "Left process group");
        Ok(())
    }
}

/// Connect to the relay and wrap the connection in a group handle.
pub async fn connect_group(
    relay_addr: &str,
    session: Uuid,
    rank: usize,
    size: usize,
    rendezvous_timeout: Duration,
) -> Result<ProcessGroup> {
    let transport =
        TcpTransport::connect(relay_addr, session, rank, size, rendezvous_timeout).await?;
    ProcessGroup::new(rank, size, session, Box::new(transport))
}
