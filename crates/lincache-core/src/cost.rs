//! Cost model: spill-time and recompute estimates for cached entries.
//!
//! Spill decisions compare the measured execution time of an entry against
//! the estimated round-trip time of writing and re-reading its block. The
//! recompute estimate scores an instruction from its input shapes when no
//! measurement is available.

use crate::context::ExecutionContext;
use crate::data::{self, MatrixBlock};
use crate::error::{Error, Result};
use crate::instruction::Instruction;

const MIB: f64 = 1024.0 * 1024.0;
const GFLOP: f64 = (1u64 << 30) as f64;

/// Bandwidth model for local-filesystem spill IO.
///
/// Implementations estimate from shape and sparsity only; no IO happens
/// here.
pub trait IoCostEstimator: Send + Sync {
    /// Estimated seconds to write a block of the given shape to local disk.
    fn fs_write_time(&self, rows: u64, cols: u64, sparsity: f64) -> f64;

    /// Estimated seconds to read a block of the given shape from local disk.
    fn fs_read_time(&self, rows: u64, cols: u64, sparsity: f64) -> f64;
}

/// Flat-bandwidth IO model.
#[derive(Debug, Clone)]
pub struct StaticBandwidthModel {
    /// Sustained read bandwidth in MiB/s.
    pub read_mb_per_sec: f64,
    /// Sustained write bandwidth in MiB/s.
    pub write_mb_per_sec: f64,
}

impl Default for StaticBandwidthModel {
    fn default() -> Self {
        Self {
            read_mb_per_sec: 200.0,
            write_mb_per_sec: 100.0,
        }
    }
}

#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn shape_disk_mb(rows: u64, cols: u64, sparsity: f64) -> f64 {
    let nnz = (sparsity * rows as f64 * cols as f64) as u64;
    MatrixBlock::estimate_on_disk_size(rows, cols, nnz) as f64 / MIB
}

impl IoCostEstimator for StaticBandwidthModel {
    fn fs_write_time(&self, rows: u64, cols: u64, sparsity: f64) -> f64 {
        shape_disk_mb(rows, cols, sparsity) / self.write_mb_per_sec
    }

    fn fs_read_time(&self, rows: u64, cols: u64, sparsity: f64) -> f64 {
        shape_disk_mb(rows, cols, sparsity) / self.read_mb_per_sec
    }
}

/// Estimated serialized size of a block, in MiB.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn disk_size_mb(mb: &MatrixBlock) -> f64 {
    MatrixBlock::estimate_on_disk_size(mb.num_rows(), mb.num_cols(), mb.num_nonzeros()) as f64
        / MIB
}

/// Estimated round-trip spill time (write plus re-read), in milliseconds.
#[must_use]
pub fn spill_time_ms(mb: &MatrixBlock, io: &dyn IoCostEstimator) -> f64 {
    let (r, c, s) = (mb.num_rows(), mb.num_cols(), mb.sparsity());
    (io.fs_write_time(r, c, s) + io.fs_read_time(r, c, s)) * 1000.0
}

/// Estimated work to recompute an instruction's output, in GFLOPs.
///
/// Closed-form expressions over the input dimensions and sparsity, per
/// instruction category. Scalar-producing instructions cost 0.
///
/// # Errors
///
/// Returns [`Error::Unsupported`] for opcodes the model cannot score.
#[allow(clippy::cast_precision_loss, clippy::too_many_lines)]
pub fn recompute_nflops(inst: &Instruction, ctx: &ExecutionContext) -> Result<f64> {
    if !inst.output().matrix {
        return Ok(0.0);
    }
    if let Some(first) = inst.inputs().first() {
        if !first.matrix {
            return Ok(0.0);
        }
    }

    let opcode = inst.opcode();
    let nflops = if opcode.contains("spoof") {
        // fused operators carry no closed-form estimate
        0.0
    } else {
        match opcode {
            "tsmm" => {
                let mo = ctx.get_matrix(&inst.inputs()[0].name)?;
                let (r, c, s) = dims(&mo);
                let sparse = mo.is_in_sparse_format();
                if inst.is_tsmm_left() {
                    if sparse {
                        r * c * s * c * s / 2.0
                    } else {
                        r * c * s * c / 2.0
                    }
                } else if sparse {
                    r * c * s + r * c * s * c * s / 2.0
                } else {
                    r * c * r / 2.0
                }
            }
            "ba+*" => {
                let mo1 = ctx.get_matrix(&inst.inputs()[0].name)?;
                let mo2 = ctx.get_matrix(&inst.inputs()[1].name)?;
                let (r1, c1, s1) = dims(&mo1);
                let (_, c2, s2) = dims(&mo2);
                let lsparse = mo1.is_in_sparse_format();
                let rsparse = mo2.is_in_sparse_format();
                match (lsparse, rsparse) {
                    (false, false) => {
                        let s1_eff = if c2 > 1.0 { s1 } else { 1.0 };
                        2.0 * (r1 * c1 * s1_eff * c2) / 2.0
                    }
                    (true, false) => 2.0 * (r1 * c1 * s1 * c2) / 2.0,
                    (false, true) | (true, true) => 2.0 * (r1 * c1 * s1 * c2 * s2) / 2.0,
                }
            }
            "*" | "/" | "+" => {
                // dimensions of the inputs and the output coincide
                let mo = ctx.get_matrix(&inst.inputs()[0].name)?;
                let (r, c, _) = dims(&mo);
                r * c
            }
            "solve" => {
                let mo = ctx.get_matrix(&inst.inputs()[0].name)?;
                let (r, c, _) = dims(&mo);
                r * c * c
            }
            "rightIndex" | "leftIndex" => {
                let mo = ctx.get_matrix(&inst.inputs()[0].name)?;
                let (r, c, s) = dims(&mo);
                if mo.is_in_sparse_format() {
                    r * c * s
                } else {
                    r * c
                }
            }
            "groupedagg" => {
                let target = inst
                    .params()
                    .get("target")
                    .ok_or_else(|| Error::Unsupported("groupedagg without target".into()))?;
                let mo = ctx.get_matrix(target)?;
                let (r, _, _) = dims(&mo);
                let xga = match inst.params().get("fn").map(String::as_str) {
                    Some("sum") => 4.0,
                    Some("count") => 1.0,
                    _ => 0.0,
                };
                2.0 * r + xga * r
            }
            "r'" => {
                let mo = ctx.get_matrix(&inst.inputs()[0].name)?;
                let (r, c, s) = dims(&mo);
                if mo.is_in_sparse_format() {
                    r * c * s
                } else {
                    r * c
                }
            }
            "append" => {
                let mo1 = ctx.get_matrix(&inst.inputs()[0].name)?;
                let mo2 = ctx.get_matrix(&inst.inputs()[1].name)?;
                side_cells(&mo1) + side_cells(&mo2)
            }
            other => {
                return Err(Error::Unsupported(format!(
                    "no recompute estimate for opcode '{other}'"
                )))
            }
        }
    };

    Ok(nflops / GFLOP)
}

#[allow(clippy::cast_precision_loss)]
fn dims(mb: &MatrixBlock) -> (f64, f64, f64) {
    (
        mb.num_rows() as f64,
        mb.num_cols() as f64,
        data::sparsity(mb.num_rows(), mb.num_cols(), mb.num_nonzeros()),
    )
}

fn side_cells(mb: &MatrixBlock) -> f64 {
    let (r, c, s) = dims(mb);
    if mb.is_in_sparse_format() {
        r * c * s
    } else {
        r * c
    }
}
