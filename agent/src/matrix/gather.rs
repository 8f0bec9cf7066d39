//! Reassembling the full matrix on one rank for display

use std::fmt;

use super::{Distance, DistributedMatrix, INFINITY};
use crate::errors::{AgentError, Result};
use crate::group::ProcessGroup;

/// A complete `order x order` matrix held by the gathering rank
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatheredMatrix {
    order: usize,
    data: Vec<Distance>,
}

impl GatheredMatrix {
    pub fn new(order: usize, data: Vec<Distance>) -> Result<Self> {
        if data.len() != order * order {
            return Err(AgentError::Shape(format!(
                "{} elements do not form a {}x{} matrix",
                data.len(),
                order,
                order
            )));
        }
        Ok(Self { order, data })
    }

    pub fn order(&self) -> usize {
        self.order
    }

    /// # Panics
    /// Panics if `row` or `col` is not below the order.
    pub fn get(&self, row: usize, col: usize) -> Distance {
        assert!(
            row < self.order && col < self.order,
            "element ({}, {}) outside {}x{} matrix",
            row,
            col,
            self.order,
            self.order
        );
        self.data[row * self.order + col]
    }

    pub fn as_slice(&self) -> &[Distance] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<Distance> {
        self.data
    }
}

fn cell(value: Distance) -> String {
    if value == INFINITY {
        "inf".to_string()
    } else {
        value.to_string()
    }
}

impl fmt::Display for GatheredMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cells: Vec<String> = self.data.iter().map(|&v| cell(v)).collect();
        let width = cells.iter().map(String::len).max().unwrap_or(1);

        for row in cells.chunks(self.order.max(1)) {
            let line: Vec<String> = row.iter().map(|c| format!("{:>width$}", c)).collect();
            writeln!(f, "{}", line.join(" "))?;
        }
        Ok(())
    }
}

/// Gather every rank's rows onto `root`.
///
/// Collective: every rank must call it. Returns `Some` only on `root`.
pub async fn collect_matrix(
    group: &mut ProcessGroup,
    matrix: &DistributedMatrix,
    root: usize,
) -> Result<Option<GatheredMatrix>> {
    match group.gather_rows(root, matrix.as_slice()).await? {
        Some(rows) => Ok(Some(GatheredMatrix::new(matrix.order(), rows)?)),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::group::local_group;

    #[test]
    fn test_display_aligns_columns() {
        let m = GatheredMatrix::new(2, vec![0, INFINITY, 12, 0]).unwrap();
        assert_eq!(m.to_string(), "  0 inf\n 12   0\n");
    }

    #[test]
    fn test_new_rejects_wrong_length() {
        assert!(GatheredMatrix::new(3, vec![0; 4]).is_err());
    }

    #[test]
    #[should_panic(expected = "outside 2x2 matrix")]
    fn test_get_rejects_column_past_order() {
        // (0, 2) would otherwise land on (1, 0)
        let m = GatheredMatrix::new(2, vec![0, 1, 2, 0]).unwrap();
        m.get(0, 2);
    }

    #[tokio::test]
    async fn test_collect_matrix_on_root_only() {
        let global: Vec<Distance> = (0..25).collect();
        let groups = local_group(3).unwrap();

        let handles: Vec<_> = groups
            .into_iter()
            .map(|mut group| {
                let global = global.clone();
                tokio::spawn(async move {
                    let m = DistributedMatrix::from_global(group.rank(), group.size(), 5, &global)
                        .unwrap();
                    collect_matrix(&mut group, &m, 0).await
                })
            })
            .collect();

        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.unwrap().unwrap());
        }

        let root = results[0].as_ref().unwrap();
        assert_eq!(root.as_slice(), global.as_slice());
        assert_eq!(root.get(3, 1), 16);
        assert!(results[1].is_none());
        assert!(results[2].is_none());
    }
}
