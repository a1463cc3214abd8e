//! Instruction descriptors as seen by the cache.
//!
//! The cache never executes instructions; it only needs the opcode, the
//! operand shapes (resolved through the symbol table), and the traced
//! lineage of the inputs.

use rustc_hash::FxHashMap;
use std::sync::Arc;

use crate::context::ExecutionContext;
use crate::lineage::LineageItem;

/// A typed operand reference.
#[derive(Debug, Clone)]
pub struct Operand {
    /// Variable name in the symbol table.
    pub name: String,
    /// Whether the operand is a matrix (as opposed to a scalar).
    pub matrix: bool,
}

impl Operand {
    /// Creates a matrix operand.
    #[must_use]
    pub fn matrix(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            matrix: true,
        }
    }

    /// Creates a scalar operand.
    #[must_use]
    pub fn scalar(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            matrix: false,
        }
    }
}

/// One runtime instruction: opcode, inputs, and the output it binds.
#[derive(Debug, Clone)]
pub struct Instruction {
    opcode: String,
    inputs: Vec<Operand>,
    output: Operand,
    params: FxHashMap<String, String>,
    tsmm_left: bool,
}

impl Instruction {
    /// Creates an instruction descriptor.
    #[must_use]
    pub fn new(opcode: impl Into<String>, inputs: Vec<Operand>, output: Operand) -> Self {
        Self {
            opcode: opcode.into(),
            inputs,
            output,
            params: FxHashMap::default(),
            tsmm_left: true,
        }
    }

    /// Attaches named parameters (parameterized builtins such as
    /// `groupedagg` carry their aggregation function here).
    #[must_use]
    pub fn with_params(mut self, params: FxHashMap<String, String>) -> Self {
        self.params = params;
        self
    }

    /// Selects the transpose side of a `tsmm` (`X' %*% X` vs `X %*% X'`).
    #[must_use]
    pub fn with_tsmm_left(mut self, left: bool) -> Self {
        self.tsmm_left = left;
        self
    }

    /// The opcode.
    #[must_use]
    pub fn opcode(&self) -> &str {
        &self.opcode
    }

    /// Input operands, in order.
    #[must_use]
    pub fn inputs(&self) -> &[Operand] {
        &self.inputs
    }

    /// The output operand.
    #[must_use]
    pub fn output(&self) -> &Operand {
        &self.output
    }

    /// Named parameters.
    #[must_use]
    pub fn params(&self) -> &FxHashMap<String, String> {
        &self.params
    }

    /// Whether a `tsmm` multiplies from the left.
    #[must_use]
    pub fn is_tsmm_left(&self) -> bool {
        self.tsmm_left
    }

    /// Builds the output lineage DAG from the traced inputs.
    ///
    /// Inputs without a traced lineage (constants, untraced variables)
    /// become literal leaves carrying the operand name.
    #[must_use]
    pub fn lineage_item(&self, ctx: &ExecutionContext) -> Arc<LineageItem> {
        let inputs: Vec<Arc<LineageItem>> = self
            .inputs
            .iter()
            .map(|op| {
                ctx.lineage()
                    .get(&op.name)
                    .unwrap_or_else(|| LineageItem::literal(op.name.as_str()))
            })
            .collect();
        LineageItem::instruction(self.opcode.as_str(), inputs)
    }
}
