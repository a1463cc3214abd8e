//! Tests for `cost` module

use super::context::ExecutionContext;
use super::cost::*;
use super::data::{Data, MatrixBlock};
use super::instruction::{Instruction, Operand};
use rustc_hash::FxHashMap;
use std::sync::Arc;

fn ctx_with_matrix(name: &str, rows: u64, cols: u64, nnz: u64) -> ExecutionContext {
    let mut ctx = ExecutionContext::new();
    ctx.set_variable(
        name,
        Data::Matrix(Arc::new(MatrixBlock::new(rows, cols, nnz, Vec::new()))),
    );
    ctx
}

// ========== IO model ==========

#[test]
fn test_static_bandwidth_model_scales_with_size() {
    let io = StaticBandwidthModel::default();
    let small = io.fs_write_time(100, 100, 1.0);
    let large = io.fs_write_time(1000, 1000, 1.0);
    assert!(large > small);
    assert!(io.fs_read_time(1000, 1000, 1.0) < io.fs_write_time(1000, 1000, 1.0));
}

#[test]
fn test_spill_time_sums_write_and_read() {
    let io = StaticBandwidthModel {
        read_mb_per_sec: 100.0,
        write_mb_per_sec: 100.0,
    };
    let mb = MatrixBlock::new(1024, 1024, 1024 * 1024, Vec::new());
    // 8 MiB dense block at 100 MiB/s each way: 160 ms
    let ms = spill_time_ms(&mb, &io);
    assert!((ms - 160.0).abs() / 160.0 < 0.05, "got {ms}");
}

#[test]
fn test_disk_size_mb_dense() {
    let mb = MatrixBlock::new(1024, 1024, 1024 * 1024, Vec::new());
    assert!((disk_size_mb(&mb) - 8.0).abs() < 0.01);
}

// ========== Recompute estimates ==========

#[test]
fn test_tsmm_left_dense() {
    let ctx = ctx_with_matrix("X", 1000, 100, 100_000);
    let inst = Instruction::new(
        "tsmm",
        vec![Operand::matrix("X")],
        Operand::matrix("R"),
    );
    // r*c*s*c/2 with s=1: 1000*100*100/2 = 5e6 flops
    let gflops = recompute_nflops(&inst, &ctx).unwrap();
    assert!((gflops - 5e6 / (1u64 << 30) as f64).abs() < 1e-9);
}

#[test]
fn test_ba_mult_dense_dense() {
    let mut ctx = ctx_with_matrix("A", 100, 200, 20_000);
    ctx.set_variable(
        "B",
        Data::Matrix(Arc::new(MatrixBlock::new(200, 50, 10_000, Vec::new()))),
    );
    let inst = Instruction::new(
        "ba+*",
        vec![Operand::matrix("A"), Operand::matrix("B")],
        Operand::matrix("C"),
    );
    // 2*(r1*c1*s1*c2)/2 with s1=1: 100*200*50 = 1e6 flops
    let gflops = recompute_nflops(&inst, &ctx).unwrap();
    assert!((gflops - 1e6 / (1u64 << 30) as f64).abs() < 1e-9);
}

#[test]
fn test_cellwise_binary() {
    let ctx = ctx_with_matrix("A", 300, 40, 12_000);
    let inst = Instruction::new(
        "*",
        vec![Operand::matrix("A"), Operand::matrix("A")],
        Operand::matrix("C"),
    );
    let gflops = recompute_nflops(&inst, &ctx).unwrap();
    assert!((gflops - 12_000.0 / (1u64 << 30) as f64).abs() < 1e-9);
}

#[test]
fn test_groupedagg_uses_params() {
    let ctx = ctx_with_matrix("T", 1000, 1, 1000);
    let mut params = FxHashMap::default();
    params.insert("target".to_string(), "T".to_string());
    params.insert("fn".to_string(), "sum".to_string());
    let inst = Instruction::new("groupedagg", vec![Operand::matrix("T")], Operand::matrix("G"))
        .with_params(params);
    // 2*r + 4*r = 6000 flops
    let gflops = recompute_nflops(&inst, &ctx).unwrap();
    assert!((gflops - 6000.0 / (1u64 << 30) as f64).abs() < 1e-12);
}

#[test]
fn test_scalar_output_costs_zero() {
    let ctx = ctx_with_matrix("X", 1000, 100, 100_000);
    let inst = Instruction::new("nrow", vec![Operand::matrix("X")], Operand::scalar("n"));
    assert!(recompute_nflops(&inst, &ctx).unwrap().abs() < f64::EPSILON);
}

#[test]
fn test_spoof_costs_zero() {
    let ctx = ctx_with_matrix("X", 10, 10, 100);
    let inst = Instruction::new(
        "spoofCellwise_f1",
        vec![Operand::matrix("X")],
        Operand::matrix("R"),
    );
    assert!(recompute_nflops(&inst, &ctx).unwrap().abs() < f64::EPSILON);
}

#[test]
fn test_unsupported_opcode_errors() {
    let ctx = ctx_with_matrix("X", 10, 10, 100);
    let inst = Instruction::new("qr", vec![Operand::matrix("X")], Operand::matrix("R"));
    let err = recompute_nflops(&inst, &ctx).unwrap_err();
    assert_eq!(err.code(), "LNC-003");
}
