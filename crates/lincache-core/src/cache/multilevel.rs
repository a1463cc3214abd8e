//! Function-scope (multi-level) reuse.
//!
//! A function call produces `n` named outputs; each gets a synthetic key
//! `funcName{i+1}` over the call's input lineages. The call is reused only
//! when every output hits with a materialized value, and outputs are
//! published after execution only when every one of them can be published.
//! Outputs are semantically linked: caching some but not others would break
//! later reuse of the whole return set.

use rustc_hash::FxHashSet;
use std::sync::Arc;

use crate::cache::engine::LineageCache;
use crate::context::ExecutionContext;
use crate::error::Result;
use crate::lineage::{self, LineageItem};

fn synthetic_output_key(
    func_name: &str,
    index: usize,
    output: &str,
    li_inputs: &[Arc<LineageItem>],
) -> Arc<LineageItem> {
    LineageItem::with_data(output, format!("{func_name}{}", index + 1), li_inputs.to_vec())
}

impl LineageCache {
    /// Probes all outputs of a function call.
    ///
    /// On full success the cached values are bound into the context under
    /// the output names, and the calling scope's lineage is rewritten to
    /// the original producing items (chased via the entries' `orig_item`).
    /// Any miss installs placeholders for later insertion and reports the
    /// whole call as not reusable.
    ///
    /// # Errors
    ///
    /// Propagates rehydration IO failures from the underlying probes.
    pub fn reuse_function_outputs(
        &self,
        func_name: &str,
        outputs: &[String],
        li_inputs: &[Arc<LineageItem>],
        ctx: &mut ExecutionContext,
    ) -> Result<bool> {
        if self.config().cache_type.is_none() || !self.config().cache_type.is_multilevel_reuse() {
            return Ok(false);
        }

        let mut reuse = !outputs.is_empty();
        let mut bound_values = Vec::with_capacity(outputs.len());
        let mut bound_lineages = Vec::with_capacity(outputs.len());
        for (i, output) in outputs.iter().enumerate() {
            let li = synthetic_output_key(func_name, i, output, li_inputs);
            match self.reuse_item(&li)? {
                Some(entry) => match entry.try_value() {
                    Some(data) => {
                        let orig = entry.orig_item().unwrap_or_else(|| Arc::clone(&li));
                        bound_values.push((output.clone(), data));
                        bound_lineages.push((output.clone(), orig));
                    }
                    // another thread is still producing this output
                    None => reuse = false,
                },
                // placeholder installed; this call site is the producer,
                // but all outputs still need probing so each gets one
                None => reuse = false,
            }
        }

        if reuse {
            for (var, val) in bound_values {
                if let Some(old) = ctx.remove_variable(&var) {
                    if old != val {
                        ctx.cleanup_data_object(old);
                    }
                }
                ctx.set_variable(var, val);
            }
            for (var, li) in bound_lineages {
                ctx.lineage_mut().set(var, li);
            }
        }
        Ok(reuse)
    }

    /// Publishes the outputs of an executed function call, all or nothing.
    ///
    /// An output is publishable when its bound lineage exists, both the
    /// synthetic key and the bound lineage probe as hits (the body's own
    /// execution cached the value), and the bound DAG reaches no
    /// data-generation node. If any output is not publishable, every
    /// placeholder of the call is removed.
    pub fn put_value_function_outputs(
        &self,
        func_name: &str,
        outputs: &[String],
        li_inputs: &[Arc<LineageItem>],
        ctx: &ExecutionContext,
        exec_time_ns: u64,
    ) {
        if self.config().cache_type.is_none() || !self.config().cache_type.is_multilevel_reuse() {
            return;
        }

        let boundary: FxHashSet<u64> = li_inputs.iter().map(|li| li.id()).collect();
        let mut pairs = Vec::with_capacity(outputs.len());
        let mut all_cacheable = true;
        for (i, output) in outputs.iter().enumerate() {
            let li = synthetic_output_key(func_name, i, output, li_inputs);
            let bound = ctx.lineage().get(output);
            let cacheable = match &bound {
                Some(bound_li) => {
                    self.probe(&li)
                        && self.probe(bound_li)
                        && !lineage::contains_rand_datagen(&boundary, bound_li)
                }
                None => false,
            };
            if !cacheable {
                all_cacheable = false;
            }
            pairs.push((li, bound));
        }

        if all_cacheable {
            for (li, bound) in pairs {
                if let Some(bound_li) = bound {
                    self.put_value_item(&li, &bound_li, exec_time_ns);
                }
            }
        } else {
            let mut inner = self.inner_lock();
            for (li, _) in pairs {
                self.drop_placeholder_locked(&mut inner, &li);
            }
        }
    }
}
