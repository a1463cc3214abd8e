//! Admission oracle: which instructions are cacheable at all, and which
//! outputs the optimizer has marked as worth caching.

use crate::config::{CacheConfig, ReuseCacheType};
use crate::context::ExecutionContext;
use crate::instruction::Instruction;

/// Built-in allow-list of reusable opcodes. Overridable via
/// [`CacheConfig::reusable_opcodes`].
pub const DEFAULT_REUSABLE_OPCODES: &[&str] = &[
    "tsmm",
    "ba+*",
    "*",
    "/",
    "+",
    "nrow",
    "ncol",
    "rightIndex",
    "leftIndex",
    "groupedagg",
    "r'",
    "append",
    "solve",
];

/// Whether the instruction's results are worth considering for reuse.
///
/// Fused (`spoof`) operators are always reusable; `append` only when one
/// operand is a column vector, because general appends are cheap relative to
/// their footprint.
#[must_use]
pub fn is_reusable(inst: &Instruction, ctx: &ExecutionContext, config: &CacheConfig) -> bool {
    let opcode = inst.opcode();
    if opcode.contains("spoof") {
        return true;
    }

    let listed = match &config.reusable_opcodes {
        Some(opcodes) => opcodes.iter().any(|op| op.eq_ignore_ascii_case(opcode)),
        None => DEFAULT_REUSABLE_OPCODES
            .iter()
            .any(|op| op.eq_ignore_ascii_case(opcode)),
    };
    if !listed {
        return false;
    }

    if opcode.eq_ignore_ascii_case("append") {
        return is_vector_append(inst, ctx);
    }
    true
}

fn is_vector_append(inst: &Instruction, ctx: &ExecutionContext) -> bool {
    let [in1, in2, ..] = inst.inputs() else {
        return false;
    };
    if !in1.matrix || !in2.matrix {
        return false;
    }
    let (Ok(mo1), Ok(mo2)) = (ctx.get_matrix(&in1.name), ctx.get_matrix(&in2.name)) else {
        return false;
    };
    mo1.num_cols() == 1 || mo2.num_cols() == 1
}

/// Whether the output may be inserted into the cache.
///
/// With compiler-assisted rewrites off, everything is admissible. Otherwise
/// matrix outputs must carry the optimizer mark; the gate applies to full
/// reuse only, because partial reuse handles loop-carried operations that
/// full reuse would pollute the cache with.
#[must_use]
pub fn is_marked_for_caching(
    inst: &Instruction,
    ctx: &ExecutionContext,
    config: &CacheConfig,
) -> bool {
    if !config.comp_assisted_rw {
        return true;
    }
    if inst.output().matrix {
        !(config.cache_type == ReuseCacheType::Full && !ctx.is_marked(&inst.output().name))
    } else {
        true
    }
}
