//! Post-run timing reduction
//!
//! Purely observational: nothing here feeds back into the matrix.

use std::fmt;
use std::time::Duration;

use crate::errors::{AgentError, Result};
use crate::group::{ProcessGroup, ReduceOp};

/// Elapsed-time summary held by the coordinator after a run
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimingReport {
    pub order: usize,
    pub processes: usize,
    /// Slowest rank's loop time (end-to-end latency)
    pub max_elapsed: Duration,
    /// Sum of every rank's loop time
    pub total_elapsed: Duration,
}

impl TimingReport {
    /// Parallel speedup against a separately measured serial run.
    pub fn speedup(&self, serial: Duration) -> Option<f64> {
        let max = self.max_elapsed.as_secs_f64();
        (max > 0.0).then(|| serial.as_secs_f64() / max)
    }

    /// Speedup divided by process count.
    pub fn efficiency(&self, serial: Duration) -> Option<f64> {
        self.speedup(serial)
            .map(|speedup| speedup / self.processes.max(1) as f64)
    }

    /// Mean per-rank loop time.
    pub fn mean_elapsed(&self) -> Duration {
        self.total_elapsed / self.processes.max(1) as u32
    }
}

impl fmt::Display for TimingReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Floyd, matrix size {}, {} processes. Elapsed time {:6.4} seconds, Total time {:6.4} seconds",
            self.order,
            self.processes,
            self.max_elapsed.as_secs_f64(),
            self.total_elapsed.as_secs_f64()
        )
    }
}

/// Reduce every rank's `elapsed` onto rank 0.
///
/// Collective. Returns `Some` on rank 0 only.
pub async fn aggregate(
    group: &mut ProcessGroup,
    elapsed: Duration,
    order: usize,
) -> Result<Option<TimingReport>> {
    let seconds = elapsed.as_secs_f64();
    let max = group.reduce(seconds, ReduceOp::Max, 0).await?;
    let sum = group.reduce(seconds, ReduceOp::Sum, 0).await?;

    match (max, sum) {
        (Some(max), Some(sum)) => Ok(Some(TimingReport {
            order,
            processes: group.size(),
            max_elapsed: to_duration(max)?,
            total_elapsed: to_duration(sum)?,
        })),
        _ => Ok(None),
    }
}

fn to_duration(seconds: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(seconds)
        .map_err(|e| AgentError::Protocol(format!("invalid elapsed time {}: {}", seconds, e)))
}
