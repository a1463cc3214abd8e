//! Execution context: the runtime seam the cache operates against.
//!
//! A symbol table binding variable names to values, the lineage trace map
//! binding names to the DAGs that produced them, and the optimizer's
//! marked-for-caching set.

use rustc_hash::{FxHashMap, FxHashSet};
use std::sync::Arc;

use crate::data::{Data, MatrixBlock, ScalarObject};
use crate::error::{Error, Result};
use crate::lineage::LineageItem;

/// Name-to-lineage bindings for the current scope.
#[derive(Debug, Default)]
pub struct LineageMap {
    map: FxHashMap<String, Arc<LineageItem>>,
}

impl LineageMap {
    /// Looks up the lineage bound to a variable name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<LineageItem>> {
        self.map.get(name).cloned()
    }

    /// Binds a lineage DAG to a variable name.
    pub fn set(&mut self, name: impl Into<String>, item: Arc<LineageItem>) {
        self.map.insert(name.into(), item);
    }

    /// Removes a binding.
    pub fn remove(&mut self, name: &str) -> Option<Arc<LineageItem>> {
        self.map.remove(name)
    }
}

/// Symbol table plus lineage trace for one execution scope.
#[derive(Debug, Default)]
pub struct ExecutionContext {
    variables: FxHashMap<String, Data>,
    lineage: LineageMap,
    marked: FxHashSet<String>,
}

impl ExecutionContext {
    /// Creates an empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up a variable.
    #[must_use]
    pub fn get_variable(&self, name: &str) -> Option<Data> {
        self.variables.get(name).cloned()
    }

    /// Binds a variable, replacing any previous binding.
    pub fn set_variable(&mut self, name: impl Into<String>, value: Data) {
        self.variables.insert(name.into(), value);
    }

    /// Removes a variable binding and returns it.
    pub fn remove_variable(&mut self, name: &str) -> Option<Data> {
        self.variables.remove(name)
    }

    /// Releases a data object no longer referenced by the symbol table.
    ///
    /// Hook for runtimes with guarded buffers; values here are dropped.
    pub fn cleanup_data_object(&mut self, value: Data) {
        drop(value);
    }

    /// Looks up a variable that must be a matrix.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Internal`] if the variable is unbound or scalar.
    pub fn get_matrix(&self, name: &str) -> Result<Arc<MatrixBlock>> {
        match self.variables.get(name) {
            Some(Data::Matrix(mb)) => Ok(Arc::clone(mb)),
            Some(Data::Scalar(_)) => Err(Error::Internal(format!(
                "variable '{name}' is scalar, expected matrix"
            ))),
            None => Err(Error::Internal(format!("variable '{name}' is unbound"))),
        }
    }

    /// Binds a matrix to an instruction's output variable.
    pub fn set_matrix_output(&mut self, name: impl Into<String>, value: Arc<MatrixBlock>) {
        self.variables.insert(name.into(), Data::Matrix(value));
    }

    /// Binds a scalar to an instruction's output variable.
    pub fn set_scalar_output(&mut self, name: impl Into<String>, value: ScalarObject) {
        self.variables.insert(name.into(), Data::Scalar(value));
    }

    /// The lineage trace map.
    #[must_use]
    pub fn lineage(&self) -> &LineageMap {
        &self.lineage
    }

    /// Mutable access to the lineage trace map.
    pub fn lineage_mut(&mut self) -> &mut LineageMap {
        &mut self.lineage
    }

    /// Marks an output variable as cache-worthy (set by the optimizer's
    /// compiler-assisted rewrite pass).
    pub fn mark_for_caching(&mut self, name: impl Into<String>) {
        self.marked.insert(name.into());
    }

    /// Whether the optimizer marked this output variable.
    #[must_use]
    pub fn is_marked(&self, name: &str) -> bool {
        self.marked.contains(name)
    }
}
