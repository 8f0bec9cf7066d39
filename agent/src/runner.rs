//! Per-rank driver: load, validate, relax, report

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use futures::future::{BoxFuture, FutureExt};
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, error, info, info_span, Instrument};
use uuid::Uuid;

use crate::engine::{compute_shortest_paths, RelaxationStats};
use crate::errors::{AgentError, Result};
use crate::group::{connect_group, local_group, ProcessGroup};
use crate::matrix::gather::collect_matrix;
use crate::matrix::{load_row_block, GatheredMatrix};
use crate::timing::{self, TimingReport};

/// What a run should collect on the coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    /// Gather the matrix as loaded, before relaxation
    pub gather_initial: bool,
    /// Gather the relaxed matrix
    pub gather_result: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            gather_initial: false,
            gather_result: true,
        }
    }
}

/// One rank's view of a finished run. Matrices and timing are `Some` on
/// rank 0 only, and only when requested.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub rank: usize,
    pub stats: RelaxationStats,
    pub elapsed: Duration,
    pub initial: Option<GatheredMatrix>,
    pub result: Option<GatheredMatrix>,
    pub timing: Option<TimingReport>,
}

/// Run one rank of the group over the matrix file at `path`.
///
/// Collective. On a failure only this rank has seen, the rest of the group
/// is aborted before the error is returned.
pub async fn run_rank(
    mut group: ProcessGroup,
    path: PathBuf,
    options: RunOptions,
) -> Result<RunOutcome> {
    let span = info_span!("rank", rank = group.rank(), session = %group.session());

    async move {
        match drive(&mut group, &path, options).await {
            Ok(outcome) => {
                group.finalize().await?;
                Ok(outcome)
            }
            Err(e) => {
                if !e.is_group_wide() {
                    group.abort(&e.to_string()).await;
                }
                Err(e)
            }
        }
    }
    .instrument(span)
    .await
}

async fn drive(group: &mut ProcessGroup, path: &Path, options: RunOptions) -> Result<RunOutcome> {
    let loaded = load_row_block(path, group.rank(), group.size());
    group
        .agree(loaded.as_ref().err().map(ToString::to_string))
        .await?;
    let mut matrix = loaded?;
    debug!(rows = matrix.local_row_count(), "Row block loaded");

    let initial = if options.gather_initial {
        collect_matrix(group, &matrix, 0).await?
    } else {
        None
    };

    group.barrier().await?;
    let started = Instant::now();
    let stats = compute_shortest_paths(group, &mut matrix).await?;
    let elapsed = started.elapsed();

    let timing = timing::aggregate(group, elapsed, matrix.order()).await?;
    match &timing {
        Some(report) if group.is_coordinator() => info!(
            order = report.order,
            processes = report.processes,
            max_secs = report.max_elapsed.as_secs_f64(),
            total_secs = report.total_elapsed.as_secs_f64(),
            "Relaxation complete"
        ),
        _ => debug!(elapsed_secs = elapsed.as_secs_f64(), "Local relaxation complete"),
    }

    let result = if options.gather_result {
        collect_matrix(group, &matrix, 0).await?
    } else {
        None
    };

    Ok(RunOutcome {
        rank: group.rank(),
        stats,
        elapsed,
        initial,
        result,
        timing,
    })
}

/// Run a whole group of `processes` ranks as tasks in this process.
///
/// Returns rank 0's outcome, or the error of the lowest failing rank.
pub async fn run_local(path: &Path, processes: usize, options: RunOptions) -> Result<RunOutcome> {
    let groups = local_group(processes)?;
    info!(processes = processes, path = %path.display(), "Starting in-process group");

    let ranks = groups
        .into_iter()
        .map(|group| run_rank(group, path.to_path_buf(), options).boxed())
        .collect();
    join_ranks(ranks).await
}

/// Spawn one task per rank and wait for all of them.
///
/// A rank whose task panics can no longer take part in any collective, so
/// the remaining tasks are cancelled rather than left waiting on it.
async fn join_ranks(ranks: Vec<BoxFuture<'static, Result<RunOutcome>>>) -> Result<RunOutcome> {
    let handles: Vec<_> = ranks.into_iter().map(tokio::spawn).collect();
    let aborts: Vec<AbortHandle> = handles.iter().map(JoinHandle::abort_handle).collect();

    let mut pending: FuturesUnordered<_> = handles
        .into_iter()
        .enumerate()
        .map(|(rank, handle)| async move { (rank, handle.await) })
        .collect();

    let mut results: Vec<Option<Result<RunOutcome>>> = aborts.iter().map(|_| None).collect();
    while let Some((rank, joined)) = pending.next().await {
        let result = match joined {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => continue,
            Err(e) => {
                error!(rank = rank, error = %e, "Rank task failed, cancelling the group");
                aborts.iter().for_each(AbortHandle::abort);
                Err(AgentError::Protocol(format!("rank {} task failed: {}", rank, e)))
            }
        };
        results[rank] = Some(result);
    }

    let mut coordinator = None;
    for (rank, result) in results.into_iter().enumerate() {
        match result {
            Some(Err(e)) => return Err(e),
            Some(Ok(outcome)) if rank == 0 => coordinator = Some(outcome),
            _ => {}
        }
    }
    coordinator.ok_or_else(|| AgentError::Protocol("rank 0 produced no outcome".into()))
}

/// Join a multi-process group through the relay and run one rank of it.
pub async fn run_worker(
    relay_addr: &str,
    session: Uuid,
    rank: usize,
    size: usize,
    rendezvous_timeout: Duration,
    path: PathBuf,
    options: RunOptions,
) -> Result<RunOutcome> {
    let group = connect_group(relay_addr, session, rank, size, rendezvous_timeout).await?;
    run_rank(group, path, options).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::{write_matrix, INFINITY};
    use tempfile::TempDir;

    fn cycle_file(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("cycle.bin");
        let inf = INFINITY;
        write_matrix(
            &path,
            4,
            &[0, 3, inf, inf, inf, 0, 1, inf, inf, inf, 0, 2, 5, inf, inf, 0],
        )
        .unwrap();
        path
    }

    #[tokio::test]
    async fn test_run_local_collects_on_coordinator() {
        let dir = TempDir::new().unwrap();
        let path = cycle_file(&dir);
        let options = RunOptions {
            gather_initial: true,
            gather_result: true,
        };

        let outcome = run_local(&path, 2, options).await.unwrap();
        assert_eq!(outcome.rank, 0);
        assert_eq!(outcome.initial.unwrap().get(0, 2), INFINITY);
        assert_eq!(outcome.result.unwrap().get(1, 0), 8);

        let timing = outcome.timing.unwrap();
        assert_eq!(timing.processes, 2);
        assert_eq!(timing.order, 4);
        assert!(timing.total_elapsed >= timing.max_elapsed);
    }

    #[tokio::test]
    async fn test_run_local_without_gather() {
        let dir = TempDir::new().unwrap();
        let path = cycle_file(&dir);
        let options = RunOptions {
            gather_initial: false,
            gather_result: false,
        };

        let outcome = run_local(&path, 4, options).await.unwrap();
        assert!(outcome.initial.is_none());
        assert!(outcome.result.is_none());
        assert_eq!(outcome.stats.iterations, 4);
    }

    #[tokio::test]
    async fn test_run_local_too_many_processes() {
        let dir = TempDir::new().unwrap();
        let path = cycle_file(&dir);

        match run_local(&path, 5, RunOptions::default()).await {
            Err(AgentError::GroupFailure { rank, reason }) => {
                assert_eq!(rank, 0);
                assert!(reason.contains("Shape error"), "{}", reason);
            }
            other => panic!("expected group failure, got {:?}", other.map(|o| o.rank)),
        }
    }

    async fn crashing_rank() -> Result<RunOutcome> {
        panic!("relaxation blew up")
    }

    #[tokio::test]
    async fn test_panicking_rank_cancels_waiting_ranks() {
        let ranks = vec![
            std::future::pending::<Result<RunOutcome>>().boxed(),
            crashing_rank().boxed(),
            std::future::pending::<Result<RunOutcome>>().boxed(),
        ];

        let joined = tokio::time::timeout(Duration::from_secs(5), join_ranks(ranks))
            .await
            .expect("waiting ranks were left hanging");
        match joined {
            Err(AgentError::Protocol(msg)) => assert!(msg.contains("rank 1"), "{}", msg),
            other => panic!("expected task failure, got {:?}", other.map(|o| o.rank)),
        }
    }

    #[tokio::test]
    async fn test_run_local_zero_processes() {
        let dir = TempDir::new().unwrap();
        let path = cycle_file(&dir);
        assert!(matches!(
            run_local(&path, 0, RunOptions::default()).await,
            Err(AgentError::Config(_))
        ));
    }
}
