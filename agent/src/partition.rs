//! Block-row partitioning of an N-row matrix over P ranks
//!
//! Rank `id` owns the half-open global row range
//! `[floor(id*N/P), floor((id+1)*N/P))`. Block sizes differ by at most one
//! and the blocks tile `[0, N)` exactly. Every function here is pure, so any
//! rank can compute any other rank's layout without communication.

use crate::errors::{AgentError, Result};

/// Rank that owns global row `index`.
///
/// Defined for `0 <= index < n` and `1 <= p <= n`; the result is in `[0, p)`.
pub fn owner(index: usize, p: usize, n: usize) -> usize {
    debug_assert!(index < n && p >= 1 && p <= n);
    ((p as u64 * (index as u64 + 1) - 1) / n as u64) as usize
}

/// Number of rows owned by rank `id`.
pub fn block_size(id: usize, n: usize, p: usize) -> usize {
    block_offset(id + 1, n, p) - block_offset(id, n, p)
}

/// Global index of the first row owned by rank `id`.
pub fn block_offset(id: usize, n: usize, p: usize) -> usize {
    (id as u64 * n as u64 / p as u64) as usize
}

/// Contiguous global row range owned by one rank
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowBlock {
    /// Global index of the first owned row
    pub first: usize,
    /// Number of owned rows
    pub count: usize,
}

impl RowBlock {
    /// Block owned by rank `id` in a group of `p` over `n` rows.
    pub fn of(id: usize, n: usize, p: usize) -> Self {
        Self {
            first: block_offset(id, n, p),
            count: block_size(id, n, p),
        }
    }

    /// One past the last owned global row
    pub fn end(&self) -> usize {
        self.first + self.count
    }

    pub fn contains(&self, row: usize) -> bool {
        row >= self.first && row < self.end()
    }
}

/// Row blocks of every rank, in rank order.
pub fn block_layout(n: usize, p: usize) -> Vec<RowBlock> {
    (0..p).map(|id| RowBlock::of(id, n, p)).collect()
}

/// Reject group/matrix combinations that would leave a rank without rows.
pub fn validate_group(p: usize, n: usize) -> Result<()> {
    if n == 0 {
        return Err(AgentError::Shape("matrix has no rows".into()));
    }
    if p == 0 {
        return Err(AgentError::Config("process group is empty".into()));
    }
    if p > n {
        return Err(AgentError::Shape(format!(
            "{} processes exceed {} matrix rows",
            p, n
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_layout_10_rows_4_ranks() {
        let layout = block_layout(10, 4);
        let sizes: Vec<usize> = layout.iter().map(|b| b.count).collect();
        let offsets: Vec<usize> = layout.iter().map(|b| b.first).collect();
        assert_eq!(sizes, vec![2, 3, 2, 3]);
        assert_eq!(offsets, vec![0, 2, 5, 7]);
    }

    #[test]
    fn test_partition_covers_rows_exactly() {
        for n in 1..=40 {
            for p in 1..=n {
                let layout = block_layout(n, p);
                let mut next = 0;
                for block in &layout {
                    assert_eq!(block.first, next, "gap or overlap at n={} p={}", n, p);
                    next = block.end();
                }
                assert_eq!(next, n);
                assert_eq!(layout.iter().map(|b| b.count).sum::<usize>(), n);
            }
        }
    }

    #[test]
    fn test_block_sizes_are_balanced() {
        for n in 1..=40usize {
            for p in 1..=n {
                let floor = n / p;
                let ceil = n.div_ceil(p);
                for id in 0..p {
                    let size = block_size(id, n, p);
                    assert!(
                        size == floor || size == ceil,
                        "n={} p={} id={} size={}",
                        n,
                        p,
                        id,
                        size
                    );
                }
            }
        }
    }

    #[test]
    fn test_owner_matches_block_ranges() {
        for n in 1..=40 {
            for p in 1..=n {
                let layout = block_layout(n, p);
                for index in 0..n {
                    let id = owner(index, p, n);
                    assert!(id < p);
                    assert!(layout[id].contains(index), "n={} p={} index={}", n, p, index);
                }
            }
        }
    }

    #[test]
    fn test_single_rank_owns_everything() {
        assert_eq!(RowBlock::of(0, 7, 1), RowBlock { first: 0, count: 7 });
        assert!((0..7).all(|i| owner(i, 1, 7) == 0));
    }

    #[test]
    fn test_one_row_per_rank() {
        for id in 0..6 {
            assert_eq!(RowBlock::of(id, 6, 6), RowBlock { first: id, count: 1 });
            assert_eq!(owner(id, 6, 6), id);
        }
    }

    #[test]
    fn test_validate_group() {
        assert!(validate_group(1, 1).is_ok());
        assert!(validate_group(4, 4).is_ok());
        assert!(matches!(validate_group(5, 4), Err(AgentError::Shape(_))));
        assert!(matches!(validate_group(1, 0), Err(AgentError::Shape(_))));
        assert!(matches!(validate_group(0, 3), Err(AgentError::Config(_))));
    }
}
