//! Row-block storage for a distributed distance matrix
//!
//! Each rank holds only its own contiguous block of rows, stored row-major
//! with `order` elements per row. The loader, gatherer and generator that
//! move whole matrices in and out of files live in the submodules.

pub mod gather;
pub mod generate;
pub mod loader;

pub use gather::GatheredMatrix;
pub use generate::generate_matrix;
pub use loader::{load_row_block, read_header, read_matrix, write_matrix, MatrixHeader};

use crate::errors::{AgentError, Result};
use crate::partition::{self, RowBlock};

/// Matrix element type; matches the 32-bit integers of the file format.
pub type Distance = i32;

/// Sentinel for "no path".
pub const INFINITY: Distance = Distance::MAX;

/// Length of the path `a` then `b`.
///
/// Anything involving `INFINITY` stays `INFINITY`, and finite sums saturate
/// instead of wrapping, so a relaxation can never be fooled by overflow.
#[inline]
pub fn path_add(a: Distance, b: Distance) -> Distance {
    if a == INFINITY || b == INFINITY {
        INFINITY
    } else {
        a.saturating_add(b)
    }
}

/// Relax every row of `rows` through pivot vertex `k`.
///
/// `rows` holds whole rows of `n` elements; `pivot` is row `k` of the
/// global matrix. The column-`k` value of each row is read once before the
/// row is rewritten.
pub fn relax_rows(rows: &mut [Distance], n: usize, k: usize, pivot: &[Distance]) {
    debug_assert_eq!(pivot.len(), n);
    if n == 0 {
        return;
    }
    debug_assert_eq!(rows.len() % n, 0);

    for row in rows.chunks_exact_mut(n) {
        let through_k = row[k];
        if through_k == INFINITY {
            continue;
        }
        for (cell, &tail) in row.iter_mut().zip(pivot) {
            let candidate = path_add(through_k, tail);
            if candidate < *cell {
                *cell = candidate;
            }
        }
    }
}

/// The rows of the global matrix owned by one rank.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistributedMatrix {
    rank: usize,
    group_size: usize,
    order: usize,
    block: RowBlock,
    data: Vec<Distance>,
}

impl DistributedMatrix {
    /// Wrap already-loaded rows for `rank` of a group of `group_size`.
    ///
    /// `data` must hold exactly the rows the partition assigns to `rank`.
    pub fn from_rows(
        rank: usize,
        group_size: usize,
        order: usize,
        data: Vec<Distance>,
    ) -> Result<Self> {
        partition::validate_group(group_size, order)?;
        if rank >= group_size {
            return Err(AgentError::Config(format!(
                "rank {} outside group of {}",
                rank, group_size
            )));
        }

        let block = RowBlock::of(rank, order, group_size);
        if data.len() != block.count * order {
            return Err(AgentError::Shape(format!(
                "rank {} expected {} rows of {} elements, got {} elements",
                rank,
                block.count,
                order,
                data.len()
            )));
        }

        Ok(Self {
            rank,
            group_size,
            order,
            block,
            data,
        })
    }

    /// Cut this rank's block out of a full row-major `order x order` matrix.
    pub fn from_global(
        rank: usize,
        group_size: usize,
        order: usize,
        global: &[Distance],
    ) -> Result<Self> {
        if global.len() != order * order {
            return Err(AgentError::Shape(format!(
                "{} elements do not form a {}x{} matrix",
                global.len(),
                order,
                order
            )));
        }
        partition::validate_group(group_size, order)?;
        let block = RowBlock::of(rank.min(group_size - 1), order, group_size);
        let rows = global[block.first * order..block.end() * order].to_vec();
        Self::from_rows(rank, group_size, order, rows)
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn group_size(&self) -> usize {
        self.group_size
    }

    /// Number of rows and columns of the global matrix (N).
    pub fn order(&self) -> usize {
        self.order
    }

    pub fn block(&self) -> RowBlock {
        self.block
    }

    pub fn local_row_count(&self) -> usize {
        self.block.count
    }

    /// Global index of local row `local_row`.
    pub fn global_row_index(&self, local_row: usize) -> usize {
        self.block.first + local_row
    }

    /// Local index of global row `global_row`, if this rank owns it.
    pub fn local_row_index(&self, global_row: usize) -> Option<usize> {
        self.block
            .contains(global_row)
            .then(|| global_row - self.block.first)
    }

    /// # Panics
    /// Panics if `local_row` or `col` is out of range.
    pub fn get(&self, local_row: usize, col: usize) -> Distance {
        self.data[self.index(local_row, col)]
    }

    /// # Panics
    /// Panics if `local_row` or `col` is out of range.
    pub fn set(&mut self, local_row: usize, col: usize, value: Distance) {
        let idx = self.index(local_row, col);
        self.data[idx] = value;
    }

    /// Local row `local_row` as a slice of `order` elements.
    pub fn row(&self, local_row: usize) -> &[Distance] {
        let start = local_row * self.order;
        &self.data[start..start + self.order]
    }

    /// All owned rows, row-major.
    pub fn as_slice(&self) -> &[Distance] {
        &self.data
    }

    /// Relax every owned row through pivot vertex `k`.
    pub fn relax(&mut self, k: usize, pivot: &[Distance]) {
        relax_rows(&mut self.data, self.order, k, pivot);
    }

    pub fn into_rows(self) -> Vec<Distance> {
        self.data
    }

    fn index(&self, local_row: usize, col: usize) -> usize {
        assert!(
            local_row < self.block.count && col < self.order,
            "element ({}, {}) outside {}x{} block",
            local_row,
            col,
            self.block.count,
            self.order
        );
        local_row * self.order + col
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INF: Distance = INFINITY;

    #[test]
    fn test_path_add_guards_sentinel() {
        assert_eq!(path_add(3, 4), 7);
        assert_eq!(path_add(INF, 4), INF);
        assert_eq!(path_add(4, INF), INF);
        assert_eq!(path_add(INF, INF), INF);
        assert_eq!(path_add(-5, INF), INF);
        assert_eq!(path_add(Distance::MAX - 1, 10), INF);
        assert_eq!(path_add(-2, 5), 3);
    }

    #[test]
    fn test_relax_rows_uses_pre_pass_pivot_column() {
        // row = [0, 4, INF], pivot row 1 = [INF, 0, 1]
        let mut rows = vec![0, 4, INF];
        relax_rows(&mut rows, 3, 1, &[INF, 0, 1]);
        assert_eq!(rows, vec![0, 4, 5]);
    }

    #[test]
    fn test_relax_rows_skips_unreachable_pivot() {
        let mut rows = vec![0, INF, 9, INF, 0, 1];
        relax_rows(&mut rows, 3, 1, &[2, 0, 1]);
        assert_eq!(rows, vec![0, INF, 9, 2, 0, 1]);
    }

    #[test]
    fn test_relax_pivot_row_against_itself_is_idempotent() {
        let pivot = vec![5, 0, 7];
        let mut rows = pivot.clone();
        relax_rows(&mut rows, 3, 1, &pivot);
        assert_eq!(rows, pivot);
    }

    #[test]
    fn test_from_global_slices_own_block() {
        let global: Vec<Distance> = (0..16).collect();
        let m = DistributedMatrix::from_global(1, 3, 4, &global).unwrap();
        // 4 rows over 3 ranks: offsets 0, 1, 2 with sizes 1, 1, 2
        assert_eq!(m.block(), RowBlock { first: 1, count: 1 });
        assert_eq!(m.row(0), &[4, 5, 6, 7]);

        let last = DistributedMatrix::from_global(2, 3, 4, &global).unwrap();
        assert_eq!(last.local_row_count(), 2);
        assert_eq!(last.global_row_index(1), 3);
        assert_eq!(last.get(1, 2), 14);
    }

    #[test]
    fn test_local_row_index() {
        let global = vec![0; 25];
        let m = DistributedMatrix::from_global(1, 2, 5, &global).unwrap();
        assert_eq!(m.block(), RowBlock { first: 2, count: 3 });
        assert_eq!(m.local_row_index(1), None);
        assert_eq!(m.local_row_index(2), Some(0));
        assert_eq!(m.local_row_index(4), Some(2));
        assert_eq!(m.local_row_index(5), None);
    }

    #[test]
    fn test_set_and_get() {
        let mut m = DistributedMatrix::from_rows(0, 1, 2, vec![0, 1, 2, 3]).unwrap();
        m.set(1, 0, 42);
        assert_eq!(m.get(1, 0), 42);
        assert_eq!(m.as_slice(), &[0, 1, 42, 3]);
    }

    #[test]
    #[should_panic(expected = "outside")]
    fn test_get_out_of_range() {
        let m = DistributedMatrix::from_rows(0, 1, 2, vec![0, 1, 2, 3]).unwrap();
        m.get(0, 2);
    }

    #[test]
    fn test_from_rows_rejects_wrong_length() {
        let err = DistributedMatrix::from_rows(0, 2, 4, vec![0; 4]).unwrap_err();
        assert!(matches!(err, AgentError::Shape(_)));
    }

    #[test]
    fn test_from_rows_rejects_more_ranks_than_rows() {
        let err = DistributedMatrix::from_rows(0, 3, 2, vec![0; 2]).unwrap_err();
        assert!(matches!(err, AgentError::Shape(_)));
    }

    #[test]
    fn test_from_rows_rejects_bad_rank() {
        let err = DistributedMatrix::from_rows(2, 2, 4, vec![0; 8]).unwrap_err();
        assert!(matches!(err, AgentError::Config(_)));
    }

    #[test]
    fn test_from_global_rejects_non_square() {
        let err = DistributedMatrix::from_global(0, 1, 3, &[0; 8]).unwrap_err();
        assert!(matches!(err, AgentError::Shape(_)));
    }
}
