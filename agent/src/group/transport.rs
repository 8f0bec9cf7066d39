use async_trait::async_trait;

use super::wire::Frame;
use crate::errors::Result;

/// Point-to-point delivery of frames between the ranks of one group.
///
/// Frames between a given pair of ranks arrive in the order they were sent;
/// frames from different senders may interleave arbitrarily.
#[async_trait]
pub trait Transport: Send {
    /// Deliver `frame` to `frame.dest`.
    async fn send(&mut self, frame: Frame) -> Result<()>;

    /// Next frame addressed to this rank, from any sender.
    async fn recv(&mut self) -> Result<Frame>;

    /// Leave the group in an orderly way.
    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}
