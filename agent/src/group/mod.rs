//! Process-group runtime
//!
//! A [`ProcessGroup`] is one rank's handle on a fixed group of `size` ranks.
//! It provides the collectives the relaxation needs (broadcast, barrier,
//! reductions, an all-gather vote, row gathering) on top of any
//! [`Transport`] that can move frames between two ranks.
//!
//! Every collective consumes one sequence number. All ranks issue the same
//! collectives in the same order, so `(source, seq)` names exactly one frame
//! and frames that arrive early are parked until their collective runs.

pub mod local;
pub mod tcp;
pub mod transport;
pub mod wire;

pub use local::{local_group, LocalTransport};
pub use tcp::{connect_group, TcpTransport};
pub use transport::Transport;
pub use wire::{CollectiveOp, Frame, Payload, RelayMessage};

use std::collections::VecDeque;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::errors::{AgentError, Result};
use crate::matrix::Distance;

/// Combining operator for [`ProcessGroup::reduce`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReduceOp {
    Max,
    Sum,
}

impl ReduceOp {
    pub fn apply(self, a: f64, b: f64) -> f64 {
        match self {
            ReduceOp::Max => a.max(b),
            ReduceOp::Sum => a + b,
        }
    }
}

/// One rank's handle on its process group
pub struct ProcessGroup {
    rank: usize,
    size: usize,
    session: Uuid,
    transport: Box<dyn Transport>,
    next_seq: u64,
    /// Frames received before the collective that consumes them
    parked: VecDeque<Frame>,
}

impl ProcessGroup {
    pub fn new(
        rank: usize,
        size: usize,
        session: Uuid,
        transport: Box<dyn Transport>,
    ) -> Result<Self> {
        if size == 0 || rank >= size {
            return Err(AgentError::Config(format!(
                "rank {} outside group of {}",
                rank, size
            )));
        }
        if u32::try_from(size).is_err() {
            return Err(AgentError::Config(format!("group of {} is too large", size)));
        }

        Ok(Self {
            rank,
            size,
            session,
            transport,
            next_seq: 0,
            parked: VecDeque::new(),
        })
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn session(&self) -> Uuid {
        self.session
    }

    /// Rank 0 collects reductions and gathered output.
    pub fn is_coordinator(&self) -> bool {
        self.rank == 0
    }

    /// Send `buf` from `root` to every rank.
    ///
    /// On return every rank holds an identical copy of root's buffer.
    pub async fn broadcast(&mut self, root: usize, buf: &mut [Distance]) -> Result<()> {
        self.check_rank(root)?;
        let seq = self.take_seq();

        if self.rank == root {
            for dest in self.others() {
                self.send_to(dest, seq, CollectiveOp::Broadcast, Payload::Row(buf.to_vec()))
                    .await?;
            }
        } else {
            match self.recv_from(root, seq, CollectiveOp::Broadcast).await? {
                Payload::Row(row) if row.len() == buf.len() => buf.copy_from_slice(&row),
                Payload::Row(row) => {
                    return Err(AgentError::Protocol(format!(
                        "broadcast from rank {} carried {} elements, expected {}",
                        root,
                        row.len(),
                        buf.len()
                    )))
                }
                other => return Err(unexpected(CollectiveOp::Broadcast, &other)),
            }
        }

        trace!(rank = self.rank, root = root, seq = seq, "Broadcast complete");
        Ok(())
    }

    /// Block until every rank has reached the barrier.
    pub async fn barrier(&mut self) -> Result<()> {
        let seq = self.take_seq();

        if self.rank == 0 {
            for source in 1..self.size {
                self.recv_from(source, seq, CollectiveOp::Barrier).await?;
            }
            for dest in 1..self.size {
                self.send_to(dest, seq, CollectiveOp::Barrier, Payload::Signal)
                    .await?;
            }
        } else {
            self.send_to(0, seq, CollectiveOp::Barrier, Payload::Signal)
                .await?;
            self.recv_from(0, seq, CollectiveOp::Barrier).await?;
        }

        debug!(rank = self.rank, seq = seq, "Barrier passed");
        Ok(())
    }

    /// Combine one value per rank onto `root`. Returns `Some` only on `root`.
    pub async fn reduce(&mut self, value: f64, op: ReduceOp, root: usize) -> Result<Option<f64>> {
        self.check_rank(root)?;
        let seq = self.take_seq();

        if self.rank != root {
            self.send_to(root, seq, CollectiveOp::Reduce, Payload::Scalar(value))
                .await?;
            return Ok(None);
        }

        let mut acc = value;
        for source in self.others() {
            match self.recv_from(source, seq, CollectiveOp::Reduce).await? {
                Payload::Scalar(v) => acc = op.apply(acc, v),
                other => return Err(unexpected(CollectiveOp::Reduce, &other)),
            }
        }
        Ok(Some(acc))
    }

    /// Group-wide go/no-go vote.
    ///
    /// Each rank contributes `None` if it is ready or `Some(reason)` if it is
    /// not. Every rank gets the same verdict: `Ok(())` only when all ranks
    /// are ready, otherwise `GroupFailure` naming the lowest failing rank.
    pub async fn agree(&mut self, local_failure: Option<String>) -> Result<()> {
        let seq = self.take_seq();
        let ok = local_failure.is_none();

        for dest in self.others() {
            let vote = Payload::Vote {
                ok,
                reason: local_failure.clone(),
            };
            self.send_to(dest, seq, CollectiveOp::Agree, vote).await?;
        }

        let mut first_failure = local_failure.map(|reason| (self.rank, reason));
        for source in self.others() {
            match self.recv_from(source, seq, CollectiveOp::Agree).await? {
                Payload::Vote { ok: true, .. } => {}
                Payload::Vote { ok: false, reason } => {
                    if first_failure.as_ref().map_or(true, |(rank, _)| source < *rank) {
                        first_failure = Some((source, reason.unwrap_or_default()));
                    }
                }
                other => return Err(unexpected(CollectiveOp::Agree, &other)),
            }
        }

        match first_failure {
            Some((rank, reason)) => {
                warn!(
                    rank = self.rank,
                    failed_rank = rank,
                    reason = %reason,
                    "Group cannot proceed"
                );
                Err(AgentError::GroupFailure { rank, reason })
            }
            None => Ok(()),
        }
    }

    /// Concatenate every rank's rows, in rank order, on `root`.
    ///
    /// Returns `Some` only on `root`.
    pub async fn gather_rows(
        &mut self,
        root: usize,
        local: &[Distance],
    ) -> Result<Option<Vec<Distance>>> {
        self.check_rank(root)?;
        let seq = self.take_seq();

        if self.rank != root {
            self.send_to(root, seq, CollectiveOp::Gather, Payload::Row(local.to_vec()))
                .await?;
            return Ok(None);
        }

        let mut all = Vec::new();
        for source in 0..self.size {
            if source == root {
                all.try_reserve(local.len())?;
                all.extend_from_slice(local);
                continue;
            }
            match self.recv_from(source, seq, CollectiveOp::Gather).await? {
                Payload::Row(rows) => {
                    all.try_reserve(rows.len())?;
                    all.extend(rows);
                }
                other => return Err(unexpected(CollectiveOp::Gather, &other)),
            }
        }
        Ok(Some(all))
    }

    /// Tell every other rank to stop. Best effort: peers that are already
    /// gone are skipped.
    pub async fn abort(&mut self, reason: &str) {
        warn!(rank = self.rank, reason = %reason, "Aborting process group");
        for dest in self.others() {
            let frame = Frame::abort(self.rank as u32, dest as u32, reason);
            if let Err(e) = self.transport.send(frame).await {
                debug!(rank = self.rank, dest = dest, error = %e, "Abort not delivered");
            }
        }
    }

    /// Leave the group. Call once every collective has completed.
    pub async fn finalize(mut self) -> Result<()> {
        if !self.parked.is_empty() {
            warn!(
                rank = self.rank,
                parked = self.parked.len(),
                "Leaving group with undelivered frames"
            );
        }
        self.transport.close().await
    }

    fn take_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    fn others(&self) -> impl Iterator<Item = usize> {
        let me = self.rank;
        (0..self.size).filter(move |&r| r != me)
    }

    fn check_rank(&self, rank: usize) -> Result<()> {
        if rank >= self.size {
            return Err(AgentError::Config(format!(
                "rank {} outside group of {}",
                rank, self.size
            )));
        }
        Ok(())
    }

    async fn send_to(
        &mut self,
        dest: usize,
        seq: u64,
        op: CollectiveOp,
        payload: Payload,
    ) -> Result<()> {
        let frame = Frame::new(self.rank as u32, dest as u32, seq, op, payload);
        trace!(dest = dest, seq = seq, op = ?op, bytes = frame.size_bytes(), "Sending frame");
        self.transport.send(frame).await
    }

    /// Wait for the frame `source` sent for collective `seq`.
    async fn recv_from(&mut self, source: usize, seq: u64, op: CollectiveOp) -> Result<Payload> {
        let wanted = |f: &Frame| f.source as usize == source && f.seq == seq;

        if let Some(pos) = self.parked.iter().position(wanted) {
            if let Some(frame) = self.parked.remove(pos) {
                return check_op(frame, op);
            }
        }

        loop {
            let frame = self.transport.recv().await?;

            if frame.is_abort() {
                let reason = match frame.payload {
                    Payload::Abort { reason } => reason,
                    _ => String::from("unspecified"),
                };
                return Err(AgentError::Aborted {
                    rank: frame.source as usize,
                    reason,
                });
            }
            if frame.dest as usize != self.rank {
                return Err(AgentError::Protocol(format!(
                    "rank {} received a frame for rank {}",
                    self.rank, frame.dest
                )));
            }
            if wanted(&frame) {
                return check_op(frame, op);
            }
            if frame.source as usize == source && frame.seq < seq {
                return Err(AgentError::Protocol(format!(
                    "stale frame seq {} from rank {} while waiting for seq {}",
                    frame.seq, source, seq
                )));
            }

            trace!(
                rank = self.rank,
                source = frame.source,
                seq = frame.seq,
                "Parking early frame"
            );
            self.parked.push_back(frame);
        }
    }
}

fn check_op(frame: Frame, op: CollectiveOp) -> Result<Payload> {
    if frame.op != op {
        return Err(AgentError::Protocol(format!(
            "expected {:?} frame from rank {}, got {:?}",
            op, frame.source, frame.op
        )));
    }
    Ok(frame.payload)
}

fn unexpected(op: CollectiveOp, payload: &Payload) -> AgentError {
    AgentError::Protocol(format!("unexpected payload for {:?}: {:?}", op, payload))
}
