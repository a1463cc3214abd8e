//! Matrix-block and scalar value types.
//!
//! The cache treats matrix values as opaque byte blobs with dimension
//! metadata; only sizes, sparsity, and bit-identity matter here. The actual
//! block layout belongs to the embedding runtime.

use std::sync::Arc;

/// Sparsity below which a block is kept in sparse format in memory.
pub const SPARSITY_TURN_POINT: f64 = 0.4;

/// Per-block bookkeeping overhead counted into the in-memory size.
const BLOCK_HEADER_SIZE: u64 = 40;

/// Serialized block header size (dimensions, nnz, payload length).
const DISK_HEADER_SIZE: u64 = 16;

/// An opaque matrix block: dimension metadata plus a serialized payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatrixBlock {
    rows: u64,
    cols: u64,
    nnz: u64,
    payload: Vec<u8>,
}

impl MatrixBlock {
    /// Creates a block from dimension metadata and a serialized payload.
    #[must_use]
    pub fn new(rows: u64, cols: u64, nnz: u64, payload: Vec<u8>) -> Self {
        Self {
            rows,
            cols,
            nnz,
            payload,
        }
    }

    /// Creates a dense block with a zeroed payload of `rows * cols` cells
    /// at 8 bytes per cell. Convenience for tests and benchmarks.
    #[must_use]
    pub fn dense(rows: u64, cols: u64) -> Self {
        let cells = usize::try_from(rows * cols).unwrap_or(usize::MAX);
        Self::new(rows, cols, rows * cols, vec![0u8; cells * 8])
    }

    /// Number of rows.
    #[must_use]
    pub fn num_rows(&self) -> u64 {
        self.rows
    }

    /// Number of columns.
    #[must_use]
    pub fn num_cols(&self) -> u64 {
        self.cols
    }

    /// Number of non-zero cells.
    #[must_use]
    pub fn num_nonzeros(&self) -> u64 {
        self.nnz
    }

    /// Serialized payload bytes.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Fraction of non-zero cells, in `[0, 1]`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn sparsity(&self) -> f64 {
        sparsity(self.rows, self.cols, self.nnz)
    }

    /// Whether this block is held in sparse format in memory.
    #[must_use]
    pub fn is_in_sparse_format(&self) -> bool {
        evaluate_sparse_format(self.rows, self.cols, self.nnz)
    }

    /// In-memory size in bytes.
    #[must_use]
    pub fn in_memory_size(&self) -> u64 {
        BLOCK_HEADER_SIZE + self.payload.len() as u64
    }

    /// Estimated serialized size on disk for a block of the given shape.
    #[must_use]
    pub fn estimate_on_disk_size(rows: u64, cols: u64, nnz: u64) -> u64 {
        if evaluate_sparse_format(rows, cols, nnz) {
            // sparse cells carry row/col indices next to the value
            DISK_HEADER_SIZE + nnz * 16
        } else {
            DISK_HEADER_SIZE + rows * cols * 8
        }
    }
}

/// Fraction of non-zero cells for the given shape.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn sparsity(rows: u64, cols: u64, nnz: u64) -> f64 {
    if rows == 0 || cols == 0 {
        return 0.0;
    }
    nnz as f64 / (rows as f64 * cols as f64)
}

/// In-memory format rule: sparse iff sparsity is below the turn point and
/// the block has more than one column.
#[must_use]
pub fn evaluate_sparse_format(rows: u64, cols: u64, nnz: u64) -> bool {
    sparsity(rows, cols, nnz) < SPARSITY_TURN_POINT && cols > 1
}

/// A scalar runtime value.
#[derive(Debug, Clone, PartialEq)]
pub enum ScalarObject {
    /// 64-bit float.
    F64(f64),
    /// 64-bit integer.
    I64(i64),
    /// Boolean.
    Bool(bool),
    /// String.
    Str(String),
}

impl ScalarObject {
    /// In-memory size in bytes.
    #[must_use]
    pub fn size(&self) -> u64 {
        match self {
            Self::F64(_) | Self::I64(_) => 8,
            Self::Bool(_) => 1,
            Self::Str(s) => s.len() as u64,
        }
    }
}

/// A cacheable runtime value: a matrix blob or a scalar.
#[derive(Debug, Clone, PartialEq)]
pub enum Data {
    /// Matrix block, shared so rebinding a cached value is cheap.
    Matrix(Arc<MatrixBlock>),
    /// Scalar value.
    Scalar(ScalarObject),
}

impl Data {
    /// True for matrix values.
    #[must_use]
    pub fn is_matrix(&self) -> bool {
        matches!(self, Self::Matrix(_))
    }

    /// The matrix block, if any.
    #[must_use]
    pub fn as_matrix(&self) -> Option<&Arc<MatrixBlock>> {
        match self {
            Self::Matrix(mb) => Some(mb),
            Self::Scalar(_) => None,
        }
    }

    /// The scalar value, if any.
    #[must_use]
    pub fn as_scalar(&self) -> Option<&ScalarObject> {
        match self {
            Self::Scalar(so) => Some(so),
            Self::Matrix(_) => None,
        }
    }

    /// In-memory size of the payload in bytes.
    #[must_use]
    pub fn in_memory_size(&self) -> u64 {
        match self {
            Self::Matrix(mb) => mb.in_memory_size(),
            Self::Scalar(so) => so.size(),
        }
    }
}
