//! Session rendezvous and frame routing
//!
//! Each connection joins one session as one rank. Once every rank of the
//! session has joined, all of them receive `Ready` and the relay forwards
//! each `Frame` to the connection of its `dest` rank. A rank that drops
//! without `Goodbye` is reported to the rest of its session as `PeerLost`.

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use rowcast::group::wire::{read_message, write_message, Frame, RelayMessage, PROTOCOL_VERSION};
use tokio::io::{AsyncWrite, BufReader, BufWriter};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

use crate::config::RelayConfig;
use crate::errors::{RelayError, Result};
use crate::events::{handle_relay_event, RelayEvent};

type Outbox = mpsc::UnboundedSender<RelayMessage>;

struct Session {
    size: u32,
    members: HashMap<u32, Outbox>,
    ready: bool,
}

/// Every live session, keyed by id
#[derive(Default)]
struct Registry {
    sessions: HashMap<Uuid, Session>,
}

impl Registry {
    /// Add `rank` to `session`. Returns whether the session is now complete,
    /// or the reason the join is refused.
    fn join(
        &mut self,
        limits: &RelayConfig,
        session: Uuid,
        rank: u32,
        size: u32,
        outbox: Outbox,
    ) -> std::result::Result<bool, String> {
        if size == 0 || size as usize > limits.max_group_size {
            return Err(format!(
                "group size {} outside 1..={}",
                size, limits.max_group_size
            ));
        }
        if rank >= size {
            return Err(format!("rank {} outside group of {}", rank, size));
        }
        if !self.sessions.contains_key(&session) && self.sessions.len() >= limits.max_sessions {
            return Err(format!(
                "relay already hosts {} sessions",
                limits.max_sessions
            ));
        }

        let entry = self.sessions.entry(session).or_insert_with(|| Session {
            size,
            members: HashMap::new(),
            ready: false,
        });
        if entry.size != size {
            return Err(format!(
                "session {} has {} ranks, not {}",
                session, entry.size, size
            ));
        }
        if entry.ready {
            return Err(format!("session {} has already started", session));
        }
        if entry.members.contains_key(&rank) {
            return Err(format!("rank {} already joined session {}", rank, session));
        }

        entry.members.insert(rank, outbox);
        if entry.members.len() < size as usize {
            return Ok(false);
        }

        entry.ready = true;
        for member in entry.members.values() {
            // A closed outbox belongs to a connection that is already leaving
            let _ = member.send(RelayMessage::Ready { session });
        }
        Ok(true)
    }

    /// Hand `frame` to its destination. If the destination is gone, the
    /// sender is told so instead.
    fn forward(&self, session: &Uuid, frame: Frame) -> Option<RelayEvent> {
        let Some(entry) = self.sessions.get(session) else {
            return None;
        };
        let (source, dest) = (frame.source, frame.dest);

        let delivered = entry
            .members
            .get(&dest)
            .map(|outbox| outbox.send(RelayMessage::Frame(frame)).is_ok())
            .unwrap_or(false);
        if delivered {
            return None;
        }

        if let Some(sender) = entry.members.get(&source) {
            let _ = sender.send(RelayMessage::PeerLost { rank: dest });
        }
        Some(RelayEvent::Unroutable {
            session: *session,
            source,
            dest,
        })
    }

    /// Remove `rank` from `session`. Returns whether the session is now empty
    /// and closed.
    fn leave(&mut self, session: Uuid, rank: u32, clean: bool) -> bool {
        let Some(entry) = self.sessions.get_mut(&session) else {
            return false;
        };
        entry.members.remove(&rank);

        if entry.ready && !clean {
            for member in entry.members.values() {
                let _ = member.send(RelayMessage::PeerLost { rank });
            }
        }

        if entry.members.is_empty() {
            self.sessions.remove(&session);
            return true;
        }
        false
    }

    #[cfg(test)]
    fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

/// Accept connections on `listener` until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, limits: RelayConfig, shutdown: F) -> Result<()>
where
    F: Future<Output = ()>,
{
    let registry = Arc::new(Mutex::new(Registry::default()));
    let limits = Arc::new(limits);
    handle_relay_event(&RelayEvent::Listening {
        addr: listener.local_addr()?,
    });

    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                tracing::info!("Relay shutting down");
                break;
            }

            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to accept connection");
                        continue;
                    }
                };

                let registry = Arc::clone(&registry);
                let limits = Arc::clone(&limits);
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, peer, registry, limits).await {
                        tracing::debug!(peer = %peer, error = %e, "Connection ended with error");
                    }
                });
            }
        }
    }

    Ok(())
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    registry: Arc<Mutex<Registry>>,
    limits: Arc<RelayConfig>,
) -> Result<()> {
    stream.set_nodelay(true)?;
    let (read_half, write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut writer = BufWriter::new(write_half);

    let handshake_timeout = limits.handshake_timeout();
    let hello: RelayMessage = tokio::time::timeout(handshake_timeout, read_message(&mut reader))
        .await
        .map_err(|_| {
            RelayError::Handshake(format!(
                "{} sent no hello within {:?}",
                peer, handshake_timeout
            ))
        })??;

    let (session, rank, size) = match hello {
        RelayMessage::Hello {
            session,
            rank,
            size,
            version,
        } if version == PROTOCOL_VERSION => (session, rank, size),
        RelayMessage::Hello { version, .. } => {
            let reason = format!(
                "protocol version {} not supported (relay speaks {})",
                version, PROTOCOL_VERSION
            );
            return reject(&mut writer, peer, reason).await;
        }
        _ => return reject(&mut writer, peer, "expected hello".to_string()).await,
    };

    let (outbox, mut inbox) = mpsc::unbounded_channel();
    let joined = registry
        .lock()
        .await
        .join(&limits, session, rank, size, outbox);
    match joined {
        Ok(ready) => {
            handle_relay_event(&RelayEvent::Joined {
                session,
                rank,
                size,
                peer,
            });
            if ready {
                handle_relay_event(&RelayEvent::SessionReady { session, size });
            }
        }
        Err(reason) => return reject(&mut writer, peer, reason).await,
    }

    // The registry holds the only sender, so this ends once the rank leaves
    let writer_task = tokio::spawn(async move {
        while let Some(message) = inbox.recv().await {
            write_message(&mut writer, &message).await?;
        }
        Ok::<_, RelayError>(())
    });

    let clean = loop {
        match read_message::<_, RelayMessage>(&mut reader).await {
            Ok(RelayMessage::Frame(frame)) if frame.source == rank => {
                if let Some(event) = registry.lock().await.forward(&session, frame) {
                    handle_relay_event(&event);
                }
            }
            Ok(RelayMessage::Frame(frame)) => {
                tracing::warn!(
                    session = %session,
                    rank = rank,
                    claimed_source = frame.source,
                    "Dropping frame with forged source"
                );
            }
            Ok(RelayMessage::Goodbye) => break true,
            Ok(other) => {
                tracing::warn!(session = %session, rank = rank, message = ?other, "Ignoring message");
            }
            Err(e) => {
                tracing::debug!(session = %session, rank = rank, error = %e, "Read failed");
                break false;
            }
        }
    };

    let closed = registry.lock().await.leave(session, rank, clean);
    handle_relay_event(&RelayEvent::Left {
        session,
        rank,
        clean,
    });
    if closed {
        handle_relay_event(&RelayEvent::SessionClosed { session });
    }

    match writer_task.await {
        Ok(result) => result,
        Err(e) => Err(RelayError::Network(format!("writer task failed: {}", e))),
    }
}

async fn reject<W>(writer: &mut W, peer: SocketAddr, reason: String) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    handle_relay_event(&RelayEvent::Rejected {
        peer,
        reason: reason.clone(),
    });
    write_message(writer, &RelayMessage::Rejected { reason }).await?;
    Ok(())
}
