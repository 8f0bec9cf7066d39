//! In-process transport: every rank is a task in the same OS process

use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::transport::Transport;
use super::wire::Frame;
use super::ProcessGroup;
use crate::errors::{AgentError, Result};

/// Channel endpoints of one rank in an in-process group
pub struct LocalTransport {
    rank: usize,
    /// Sender into every other rank's inbox; `None` at our own position
    peers: Vec<Option<mpsc::UnboundedSender<Frame>>>,
    inbox: mpsc::UnboundedReceiver<Frame>,
}

impl LocalTransport {
    /// Fully connected transports for `size` ranks, in rank order.
    pub fn mesh(size: usize) -> Vec<LocalTransport> {
        let (senders, receivers): (Vec<_>, Vec<_>) =
            (0..size).map(|_| mpsc::unbounded_channel()).unzip();

        receivers
            .into_iter()
            .enumerate()
            .map(|(rank, inbox)| LocalTransport {
                rank,
                peers: senders
                    .iter()
                    .enumerate()
                    .map(|(peer, tx)| (peer != rank).then(|| tx.clone()))
                    .collect(),
                inbox,
            })
            .collect()
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn send(&mut self, frame: Frame) -> Result<()> {
        let dest = frame.dest as usize;
        let tx = self
            .peers
            .get(dest)
            .and_then(Option::as_ref)
            .ok_or_else(|| {
                AgentError::Protocol(format!("rank {} cannot send to rank {}", self.rank, dest))
            })?;

        tx.send(frame)
            .map_err(|_| AgentError::Network(format!("rank {} is no longer running", dest)))
    }

    async fn recv(&mut self) -> Result<Frame> {
        self.inbox.recv().await.ok_or_else(|| {
            AgentError::Network(format!("every peer of rank {} has left the group", self.rank))
        })
    }

    async fn close(&mut self) -> Result<()> {
        self.peers.clear();
        Ok(())
    }
}

/// Build all `size` handles of an in-process group, in rank order.
pub fn local_group(size: usize) -> Result<Vec<ProcessGroup>> {
    if size == 0 {
        return Err(AgentError::Config("process group is empty".into()));
    }
    let session = Uuid::new_v4();
    LocalTransport::mesh(size)
        .into_iter()
        .enumerate()
        .map(|(rank, transport)| ProcessGroup::new(rank, size, session, Box::new(transport)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::group::wire::{CollectiveOp, Payload};

    #[tokio::test]
    async fn test_mesh_delivers_in_order() {
        let mut mesh = LocalTransport::mesh(2);
        let mut b = mesh.pop().unwrap();
        let mut a = mesh.pop().unwrap();

        for seq in 0..3 {
            a.send(Frame::new(0, 1, seq, CollectiveOp::Barrier, Payload::Signal))
                .await
                .unwrap();
        }
        for seq in 0..3 {
            assert_eq!(b.recv().await.unwrap().seq, seq);
        }
    }

    #[tokio::test]
    async fn test_send_to_self_is_rejected() {
        let mut mesh = LocalTransport::mesh(2);
        let err = mesh[0]
            .send(Frame::new(0, 0, 0, CollectiveOp::Barrier, Payload::Signal))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Protocol(_)));
    }

    #[tokio::test]
    async fn test_recv_fails_once_all_peers_are_gone() {
        let mut mesh = LocalTransport::mesh(2);
        let b = mesh.pop().unwrap();
        let mut a = mesh.pop().unwrap();
        drop(b);
        assert!(matches!(a.recv().await, Err(AgentError::Network(_))));
    }

    #[test]
    fn test_local_group_ranks() {
        let groups = local_group(3).unwrap();
        let ranks: Vec<usize> = groups.iter().map(|g| g.rank()).collect();
        assert_eq!(ranks, vec![0, 1, 2]);
        assert!(groups.iter().all(|g| g.size() == 3));
        assert!(groups.iter().all(|g| g.session() == groups[0].session()));
        assert!(local_group(0).is_err());
    }
}
