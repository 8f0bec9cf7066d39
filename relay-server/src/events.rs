use std::net::SocketAddr;
use uuid::Uuid;

/// Things the relay reports about its sessions
#[derive(Debug, Clone, PartialEq)]
pub enum RelayEvent {
    Listening {
        addr: SocketAddr,
    },
    Joined {
        session: Uuid,
        rank: u32,
        size: u32,
        peer: SocketAddr,
    },
    SessionReady {
        session: Uuid,
        size: u32,
    },
    Rejected {
        peer: SocketAddr,
        reason: String,
    },
    /// A rank addressed a frame to a rank that is not connected
    Unroutable {
        session: Uuid,
        source: u32,
        dest: u32,
    },
    Left {
        session: Uuid,
        rank: u32,
        clean: bool,
    },
    SessionClosed {
        session: Uuid,
    },
}

/// Log a relay event
pub fn handle_relay_event(event: &RelayEvent) {
    match event {
        RelayEvent::Listening { addr } => {
            tracing::info!(address = %addr, "Listening on address");
        }

        RelayEvent::Joined {
            session,
            rank,
            size,
            peer,
        } => {
            tracing::info!(
                session = %session,
                rank = rank,
                size = size,
                peer = %peer,
                "Rank joined session"
            );
        }

        RelayEvent::SessionReady { session, size } => {
            tracing::info!(session = %session, size = size, "Session assembled");
        }

        RelayEvent::Rejected { peer, reason } => {
            tracing::warn!(peer = %peer, reason = %reason, "Connection rejected");
        }

        RelayEvent::Unroutable {
            session,
            source,
            dest,
        } => {
            tracing::warn!(
                session = %session,
                source = source,
                dest = dest,
                "Dropping frame for disconnected rank"
            );
        }

        RelayEvent::Left {
            session,
            rank,
            clean,
        } => {
            if *clean {
                tracing::debug!(session = %session, rank = rank, "Rank left session");
            } else {
                tracing::warn!(session = %session, rank = rank, "Rank disconnected without goodbye");
            }
        }

        RelayEvent::SessionClosed { session } => {
            tracing::info!(session = %session, "Session closed");
        }
    }
}
