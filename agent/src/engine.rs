//! Distributed all-pairs shortest-path relaxation
//!
//! Every rank runs the same loop over pivot vertices `k = 0..N`:
//! 1. The owner of global row `k` copies that row into the pivot buffer.
//! 2. The pivot buffer is broadcast from its owner to every rank.
//! 3. Each rank relaxes all of its own rows through `k` without further
//!    communication.
//!
//! After iteration `k`, every local entry `(i, j)` holds the shortest known
//! path from `i` to `j` whose intermediate vertices are all `<= k`.

use tracing::{debug, info, trace};

use crate::errors::{AgentError, Result};
use crate::group::ProcessGroup;
use crate::matrix::{Distance, DistributedMatrix, INFINITY};
use crate::partition::{self, RowBlock};

/// What one rank did during a relaxation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelaxationStats {
    /// Pivot iterations completed (N)
    pub iterations: usize,
    /// Pivot rows this rank broadcast
    pub pivots_owned: usize,
    /// Rows relaxed by this rank in every iteration
    pub local_rows: usize,
}

/// Relax `matrix` in place until it holds all-pairs shortest paths.
///
/// Collective: every rank of `group` must call this with its own row
/// block. Local preconditions (matching group, supported shape, pivot
/// buffer allocation) are voted on before the first broadcast, so either
/// every rank enters the loop or every rank returns the same error.
pub async fn compute_shortest_paths(
    group: &mut ProcessGroup,
    matrix: &mut DistributedMatrix,
) -> Result<RelaxationStats> {
    let prepared = prepare(group, matrix);
    group
        .agree(prepared.as_ref().err().map(ToString::to_string))
        .await?;
    let mut pivot = prepared?;

    let n = matrix.order();
    let p = group.size();
    let rank = group.rank();
    let block = matrix.block();

    info!(
        rank = rank,
        processes = p,
        order = n,
        first_row = block.first,
        rows = block.count,
        "Starting relaxation"
    );

    let mut pivots_owned = 0;
    for k in 0..n {
        let root = partition::owner(k, p, n);

        if root == rank {
            // The row is copied, not lent: it is relaxed below in this same
            // iteration.
            let local = k - block.first;
            pivot.copy_from_slice(matrix.row(local));
            pivots_owned += 1;
        }

        group.broadcast(root, &mut pivot).await?;
        matrix.relax(k, &pivot);

        trace!(rank = rank, k = k, root = root, "Pivot relaxed");
    }

    debug!(rank = rank, pivots_owned = pivots_owned, "Relaxation finished");

    Ok(RelaxationStats {
        iterations: n,
        pivots_owned,
        local_rows: block.count,
    })
}

/// Local checks that must pass on every rank before any broadcast.
fn prepare(group: &ProcessGroup, matrix: &DistributedMatrix) -> Result<Vec<Distance>> {
    if matrix.rank() != group.rank() || matrix.group_size() != group.size() {
        return Err(AgentError::Config(format!(
            "row block belongs to rank {} of {}, but this is rank {} of {}",
            matrix.rank(),
            matrix.group_size(),
            group.rank(),
            group.size()
        )));
    }

    let n = matrix.order();
    partition::validate_group(group.size(), n)?;

    let expected = RowBlock::of(group.rank(), n, group.size());
    if matrix.block() != expected {
        return Err(AgentError::Shape(format!(
            "rank {} holds rows {:?}, partition assigns {:?}",
            group.rank(),
            matrix.block(),
            expected
        )));
    }

    let mut pivot = Vec::new();
    pivot.try_reserve_exact(n)?;
    pivot.resize(n, INFINITY);
    Ok(pivot)
}
