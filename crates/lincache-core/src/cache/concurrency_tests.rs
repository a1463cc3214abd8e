//! Placeholder coordination and lock-contention tests.
//!
//! Uses join-with-timeout watchdogs so a regression shows up as a test
//! failure instead of a hung suite.

use super::*;
use crate::config::CacheConfig;
use crate::context::ExecutionContext;
use crate::data::{Data, MatrixBlock};
use crate::instruction::{Instruction, Operand};
use crate::lineage::LineageItem;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const WATCHDOG: Duration = Duration::from_secs(10);

fn test_config(limit: u64) -> CacheConfig {
    CacheConfig {
        max_memory_bytes: Some(limit * 20),
        cache_fraction: 0.05,
        ..CacheConfig::default()
    }
}

fn shared_inst(tag: &str) -> Instruction {
    Instruction::new(
        "tsmm",
        vec![Operand::matrix(format!("{tag}_in"))],
        Operand::matrix(format!("{tag}_out")),
    )
}

fn traced_ctx(tag: &str) -> ExecutionContext {
    let mut ctx = ExecutionContext::new();
    ctx.lineage_mut()
        .set(format!("{tag}_in"), LineageItem::literal(tag));
    ctx
}

fn patterned_block(seed: u8, size: usize) -> Arc<MatrixBlock> {
    let payload: Vec<u8> = (0..size).map(|i| seed.wrapping_add(i as u8)).collect();
    Arc::new(MatrixBlock::new(1, size as u64 / 8, size as u64 / 8, payload))
}

// ========== At-most-one producer ==========

#[test]
fn test_single_producer_per_key() {
    let cache = Arc::new(LineageCache::new(test_config(1_000_000)).unwrap());
    let computed = Arc::new(AtomicUsize::new(0));
    let inst = shared_inst("K");
    let value = patterned_block(3, 4_096);

    // this thread probes first and becomes the producer
    let mut ctx = traced_ctx("K");
    assert!(!cache.reuse_instruction(&inst, &mut ctx));
    computed.fetch_add(1, Ordering::SeqCst);

    // a second thread sees the placeholder and blocks until the value lands
    let waiter = {
        let cache = Arc::clone(&cache);
        let inst = inst.clone();
        let computed = Arc::clone(&computed);
        thread::spawn(move || {
            let mut ctx = traced_ctx("K");
            if !cache.reuse_instruction(&inst, &mut ctx) {
                computed.fetch_add(1, Ordering::SeqCst);
                return None;
            }
            ctx.get_variable("K_out")
        })
    };

    thread::sleep(Duration::from_millis(50));
    ctx.set_variable("K_out", Data::Matrix(Arc::clone(&value)));
    cache.put_value(&inst, &ctx, 200 * 1_000_000);

    let waited = waiter.join().expect("waiter panicked");
    assert_eq!(computed.load(Ordering::SeqCst), 1, "exactly one producer");
    assert_eq!(waited, Some(Data::Matrix(value)));
    assert_eq!(cache.resident_len(), 1);
}

// ========== Contention ==========

#[test]
fn test_no_deadlock_under_mixed_load() {
    let cache = Arc::new(LineageCache::new(test_config(1_000_000)).unwrap());
    let completed = Arc::new(AtomicBool::new(false));

    let driver = {
        let cache = Arc::clone(&cache);
        let completed = Arc::clone(&completed);
        thread::spawn(move || {
            let mut handles = vec![];
            for t in 0..4u8 {
                let cache = Arc::clone(&cache);
                handles.push(thread::spawn(move || {
                    for i in 0..100u64 {
                        let tag = format!("k{}", i % 10);
                        let inst = shared_inst(&tag);
                        let mut ctx = traced_ctx(&tag);
                        if !cache.reuse_instruction(&inst, &mut ctx) {
                            ctx.set_variable(
                                format!("{tag}_out"),
                                Data::Matrix(patterned_block(t, 2_048)),
                            );
                            cache.put_value(&inst, &ctx, 150 * 1_000_000);
                        }
                        let _ = cache.stats();
                        let _ = cache.bytes_resident();
                    }
                }));
            }
            for h in handles {
                h.join().expect("worker panicked");
            }
            completed.store(true, Ordering::SeqCst);
        })
    };

    let start = std::time::Instant::now();
    while !completed.load(Ordering::SeqCst) {
        assert!(
            start.elapsed() < WATCHDOG,
            "cache operations did not complete within the watchdog"
        );
        thread::sleep(Duration::from_millis(10));
    }
    driver.join().expect("driver panicked");

    // ten distinct lineages, one entry each
    assert_eq!(cache.resident_len(), 10);
}

#[test]
fn test_concurrent_probes_agree_on_value() {
    let cache = Arc::new(LineageCache::new(test_config(1_000_000)).unwrap());
    let inst = shared_inst("V");
    let mut ctx = traced_ctx("V");
    assert!(!cache.reuse_instruction(&inst, &mut ctx));

    let mut waiters = vec![];
    for _ in 0..8 {
        let cache = Arc::clone(&cache);
        let inst = inst.clone();
        waiters.push(thread::spawn(move || {
            let mut ctx = traced_ctx("V");
            assert!(cache.reuse_instruction(&inst, &mut ctx));
            ctx.get_variable("V_out").unwrap()
        }));
    }

    thread::sleep(Duration::from_millis(20));
    let value = patterned_block(9, 1_024);
    ctx.set_variable("V_out", Data::Matrix(Arc::clone(&value)));
    cache.put_value(&inst, &ctx, 120 * 1_000_000);

    for waiter in waiters {
        let got = waiter.join().expect("waiter panicked");
        assert_eq!(got, Data::Matrix(Arc::clone(&value)));
    }
    assert_eq!(cache.resident_len(), 1);
    assert_eq!(cache.stats().mem_writes, 1);
}
