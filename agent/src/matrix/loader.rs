//! Binary matrix files
//!
//! Layout: `rows: i32`, `cols: i32`, then `rows * cols` elements of type
//! `i32` in row-major order. Everything is little-endian.

use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::Path;

use tracing::{debug, info};

use super::{Distance, DistributedMatrix};
use crate::errors::{AgentError, Result};
use crate::partition::{self, RowBlock};

/// Bytes occupied by the two dimension fields.
pub const HEADER_LEN: u64 = 8;

const ELEMENT_LEN: usize = std::mem::size_of::<Distance>();

/// Dimensions stored at the start of a matrix file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatrixHeader {
    pub rows: usize,
    pub cols: usize,
}

impl MatrixHeader {
    /// Order of the matrix, or a shape error if it is not square.
    pub fn square_order(&self) -> Result<usize> {
        if self.rows != self.cols {
            return Err(AgentError::Shape(format!(
                "matrix is not square ({}x{})",
                self.rows, self.cols
            )));
        }
        Ok(self.rows)
    }
}

/// Read the two dimension fields.
pub fn read_header<R: Read>(reader: &mut R) -> Result<MatrixHeader> {
    let rows = read_dimension(reader, "row count")?;
    let cols = read_dimension(reader, "column count")?;
    Ok(MatrixHeader { rows, cols })
}

fn read_dimension<R: Read>(reader: &mut R, what: &str) -> Result<usize> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf).map_err(|e| truncated(e, what))?;
    let value = i32::from_le_bytes(buf);
    usize::try_from(value)
        .map_err(|_| AgentError::Matrix(format!("negative {} {}", what, value)))
}

fn truncated(e: std::io::Error, what: &str) -> AgentError {
    if e.kind() == ErrorKind::UnexpectedEof {
        AgentError::Matrix(format!("file ends before {}", what))
    } else {
        AgentError::Io(e)
    }
}

/// Fail with a format error unless the file holds at least `end` bytes.
///
/// Checked before any element storage is reserved, so a header that
/// overstates the matrix costs nothing.
fn ensure_len(file_len: u64, end: Option<u64>, what: &str) -> Result<()> {
    match end {
        Some(end) if end <= file_len => Ok(()),
        Some(end) => Err(AgentError::Matrix(format!(
            "file ends before {} ({} bytes, header implies {})",
            what, file_len, end
        ))),
        None => Err(AgentError::Matrix(format!("dimensions overflow before {}", what))),
    }
}

/// Byte offset just past `count` elements starting at element `first`.
fn element_end(first: usize, count: usize) -> Option<u64> {
    let elements = u64::try_from(first.checked_add(count)?).ok()?;
    elements
        .checked_mul(ELEMENT_LEN as u64)?
        .checked_add(HEADER_LEN)
}

/// Read `count` elements, failing with a resource error if the buffer
/// cannot be reserved.
fn read_elements<R: Read>(reader: &mut R, count: usize, what: &str) -> Result<Vec<Distance>> {
    let mut data = Vec::new();
    data.try_reserve_exact(count)?;

    let mut buf = [0u8; ELEMENT_LEN];
    for _ in 0..count {
        reader.read_exact(&mut buf).map_err(|e| truncated(e, what))?;
        data.push(Distance::from_le_bytes(buf));
    }
    Ok(data)
}

/// Load the rows that `rank` owns in a group of `group_size`.
///
/// Only the header and this rank's own block are read, so every rank can
/// load independently from a shared file.
pub fn load_row_block(path: &Path, rank: usize, group_size: usize) -> Result<DistributedMatrix> {
    let file = File::open(path).map_err(|e| {
        tracing::error!(path = %path.display(), error = %e, "Failed to open matrix file");
        e
    })?;
    let file_len = file.metadata()?.len();
    let mut reader = BufReader::new(file);

    let header = read_header(&mut reader)?;
    let order = header.square_order()?;
    partition::validate_group(group_size, order)?;
    if rank >= group_size {
        return Err(AgentError::Config(format!(
            "rank {} outside group of {}",
            rank, group_size
        )));
    }

    let block = RowBlock::of(rank, order, group_size);
    let first = block.first * order;
    let count = block.count * order;
    ensure_len(file_len, element_end(first, count), "end of row block")?;

    let offset = HEADER_LEN + (first * ELEMENT_LEN) as u64;
    reader.seek(SeekFrom::Start(offset))?;

    debug!(
        rank = rank,
        first_row = block.first,
        rows = block.count,
        order = order,
        "Reading row block"
    );

    let data = read_elements(&mut reader, count, "end of row block")?;
    DistributedMatrix::from_rows(rank, group_size, order, data)
}

/// Read a whole matrix file.
pub fn read_matrix(path: &Path) -> Result<(MatrixHeader, Vec<Distance>)> {
    let file = File::open(path)?;
    let file_len = file.metadata()?.len();
    let mut reader = BufReader::new(file);
    let header = read_header(&mut reader)?;
    let count = header
        .rows
        .checked_mul(header.cols)
        .ok_or_else(|| AgentError::Matrix("dimensions overflow".into()))?;
    ensure_len(file_len, element_end(0, count), "end of matrix data")?;
    let data = read_elements(&mut reader, count, "end of matrix data")?;
    Ok((header, data))
}

/// Write a square `order x order` matrix.
pub fn write_matrix(path: &Path, order: usize, data: &[Distance]) -> Result<()> {
    if data.len() != order * order {
        return Err(AgentError::Shape(format!(
            "{} elements do not form a {}x{} matrix",
            data.len(),
            order,
            order
        )));
    }
    let dim = i32::try_from(order)
        .map_err(|_| AgentError::Shape(format!("order {} does not fit the file header", order)))?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let mut writer = BufWriter::new(File::create(path)?);
    writer.write_all(&dim.to_le_bytes())?;
    writer.write_all(&dim.to_le_bytes())?;
    for value in data {
        writer.write_all(&value.to_le_bytes())?;
    }
    writer.flush()?;

    info!(path = %path.display(), order = order, "Matrix written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::INFINITY;
    use std::io::Cursor;
    use tempfile::TempDir;

    fn raw_file(rows: i32, cols: i32, data: &[i32]) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&rows.to_le_bytes());
        bytes.extend_from_slice(&cols.to_le_bytes());
        for v in data {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        bytes
    }

    #[test]
    fn test_read_header() {
        let mut cursor = Cursor::new(raw_file(3, 4, &[]));
        let header = read_header(&mut cursor).unwrap();
        assert_eq!(header, MatrixHeader { rows: 3, cols: 4 });
        assert!(matches!(header.square_order(), Err(AgentError::Shape(_))));
    }

    #[test]
    fn test_read_header_negative_dimension() {
        let mut cursor = Cursor::new(raw_file(-1, 4, &[]));
        assert!(matches!(read_header(&mut cursor), Err(AgentError::Matrix(_))));
    }

    #[test]
    fn test_read_header_truncated() {
        let mut cursor = Cursor::new(vec![1u8, 0, 0]);
        assert!(matches!(read_header(&mut cursor), Err(AgentError::Matrix(_))));
    }

    #[test]
    fn test_write_then_load_blocks() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("m.bin");
        let data: Vec<Distance> = (0..25).collect();
        write_matrix(&path, 5, &data).unwrap();

        let mut rows = Vec::new();
        for rank in 0..3 {
            let block = load_row_block(&path, rank, 3).unwrap();
            assert_eq!(block.order(), 5);
            rows.extend_from_slice(block.as_slice());
        }
        assert_eq!(rows, data);
    }

    #[test]
    fn test_read_matrix_whole_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("m.bin");
        let data = vec![0, INFINITY, 3, 0];
        write_matrix(&path, 2, &data).unwrap();

        let (header, loaded) = read_matrix(&path).unwrap();
        assert_eq!(header, MatrixHeader { rows: 2, cols: 2 });
        assert_eq!(loaded, data);
    }

    #[test]
    fn test_load_rejects_non_square() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("m.bin");
        std::fs::write(&path, raw_file(2, 3, &[0; 6])).unwrap();
        let err = load_row_block(&path, 0, 1).unwrap_err();
        assert!(matches!(err, AgentError::Shape(_)));
    }

    #[test]
    fn test_load_rejects_too_many_ranks() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("m.bin");
        write_matrix(&path, 2, &[0, 1, 1, 0]).unwrap();
        let err = load_row_block(&path, 0, 3).unwrap_err();
        assert!(matches!(err, AgentError::Shape(_)));
    }

    #[test]
    fn test_load_truncated_data() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("m.bin");
        std::fs::write(&path, raw_file(3, 3, &[0; 5])).unwrap();

        // rank 0 owns row 0 only and can read it
        assert!(load_row_block(&path, 0, 3).is_ok());
        // rank 2 owns row 2, which is missing
        let err = load_row_block(&path, 2, 3).unwrap_err();
        assert!(matches!(err, AgentError::Matrix(_)));
    }

    #[test]
    fn test_oversized_header_fails_before_reading() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("liar.bin");
        std::fs::write(&path, raw_file(46341, 46341, &[])).unwrap();

        match load_row_block(&path, 0, 1) {
            Err(AgentError::Matrix(msg)) => assert!(msg.contains("end of row block"), "{}", msg),
            other => panic!("expected format error, got {:?}", other),
        }
        assert!(matches!(read_matrix(&path), Err(AgentError::Matrix(_))));

        // Only the last rank's block lies past the end
        std::fs::write(&path, raw_file(16384, 16384, &[])).unwrap();
        assert!(matches!(
            load_row_block(&path, 16383, 16384),
            Err(AgentError::Matrix(_))
        ));
    }

    #[test]
    fn test_element_end_overflow() {
        assert_eq!(element_end(0, 0), Some(HEADER_LEN));
        assert_eq!(element_end(2, 3), Some(HEADER_LEN + 20));
        assert_eq!(element_end(usize::MAX, 1), None);
        assert!(matches!(
            ensure_len(100, None, "data"),
            Err(AgentError::Matrix(_))
        ));
    }

    #[test]
    fn test_load_missing_file() {
        let err = load_row_block(Path::new("/nonexistent/matrix.bin"), 0, 1).unwrap_err();
        assert!(matches!(err, AgentError::Io(_)));
    }

    #[test]
    fn test_write_rejects_wrong_length() {
        let dir = TempDir::new().unwrap();
        let err = write_matrix(&dir.path().join("m.bin"), 3, &[0; 4]).unwrap_err();
        assert!(matches!(err, AgentError::Shape(_)));
    }
}
