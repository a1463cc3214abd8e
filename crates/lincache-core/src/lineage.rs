//! Lineage DAG nodes used as cache keys.
//!
//! A [`LineageItem`] records one computation step: an opcode, a data literal,
//! and ordered edges to the items that produced its inputs. Items are
//! immutable and shared via `Arc`, so the structural hash is materialized at
//! construction (constant time, because input hashes are already memoized).
//!
//! Traversals are iterative with side visit-sets keyed by node id, so deep
//! DAGs cannot overflow the native stack and shared sub-DAGs are visited at
//! most once.

use rustc_hash::{FxHashMap, FxHashSet, FxHasher};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::{Error, Result};

/// Opcode prefix marking dedup nodes.
pub const DEDUP_OPCODE_PREFIX: &str = "dedup";

/// Reserved opcode prefix for placeholder items marking patch points inside
/// dedup DAGs. A placeholder has exactly one input and is transparent for
/// hashing and equality.
pub const PLACEHOLDER_OPCODE_PREFIX: &str = "IN#";

/// Opcodes that produce non-deterministic data; lineages reaching one of
/// these must not be cached across executions.
const DATAGEN_OPCODES: &[&str] = &["rand", "seq", "sample", "time"];

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn next_id() -> u64 {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

/// Derived category of a lineage item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineageItemType {
    /// Leaf without an opcode (a literal value or variable binding).
    Literal,
    /// Leaf with an opcode (data creation, e.g. a read).
    Creation,
    /// Inner node with an opcode.
    Instruction,
    /// Node with the `dedup` opcode prefix; compares through its patch DAG.
    Dedup,
}

/// One node of a lineage DAG.
///
/// Equality and hashing are structural: two items are equal iff, after
/// rewriting dedup nodes to their patch DAGs and bypassing placeholders on
/// both sides, their opcode, data, and input sequences match.
pub struct LineageItem {
    id: u64,
    opcode: String,
    data: String,
    inputs: Vec<Arc<LineageItem>>,
    dedup_patch: Option<Arc<LineageItem>>,
    hash: u64,
}

impl LineageItem {
    fn build(
        data: String,
        opcode: String,
        inputs: Vec<Arc<LineageItem>>,
        dedup_patch: Option<Arc<LineageItem>>,
    ) -> Arc<Self> {
        let hash = Self::compute_hash(&opcode, &data, &inputs, dedup_patch.as_deref());
        Arc::new(Self {
            id: next_id(),
            opcode,
            data,
            inputs,
            dedup_patch,
            hash,
        })
    }

    /// Creates a literal leaf (no opcode).
    pub fn literal(data: impl Into<String>) -> Arc<Self> {
        Self::build(data.into(), String::new(), Vec::new(), None)
    }

    /// Creates a data-creation leaf (opcode, no inputs).
    pub fn creation(data: impl Into<String>, opcode: impl Into<String>) -> Arc<Self> {
        Self::build(data.into(), opcode.into(), Vec::new(), None)
    }

    /// Creates an instruction node over the given inputs.
    pub fn instruction(opcode: impl Into<String>, inputs: Vec<Arc<Self>>) -> Arc<Self> {
        Self::build(String::new(), opcode.into(), inputs, None)
    }

    /// Creates an instruction node carrying a data payload, e.g. the
    /// synthetic per-output keys of function-scope reuse.
    pub fn with_data(
        data: impl Into<String>,
        opcode: impl Into<String>,
        inputs: Vec<Arc<Self>>,
    ) -> Arc<Self> {
        Self::build(data.into(), opcode.into(), inputs, None)
    }

    /// Creates a dedup node whose canonical form is the given patch DAG.
    pub fn dedup(
        opcode: impl Into<String>,
        inputs: Vec<Arc<Self>>,
        patch: Arc<Self>,
    ) -> Arc<Self> {
        Self::build(String::new(), opcode.into(), inputs, Some(patch))
    }

    fn compute_hash(
        opcode: &str,
        data: &str,
        inputs: &[Arc<Self>],
        dedup_patch: Option<&Self>,
    ) -> u64 {
        // Placeholders hash as their single input, dedup nodes as their
        // patch root, so patched and unpatched forms collide as required.
        if opcode.starts_with(PLACEHOLDER_OPCODE_PREFIX) {
            if let Some(inner) = inputs.first() {
                return inner.hash;
            }
        }
        if let Some(patch) = dedup_patch {
            return patch.hash;
        }
        let mut h = combine(hash_str(opcode), hash_str(data));
        for li in inputs {
            h = combine(h, li.hash);
        }
        h
    }

    /// Process-unique id, assigned at construction.
    ///
    /// Used for diagnostics and spill file naming only; never part of
    /// equality.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The opcode; empty for literal leaves.
    #[must_use]
    pub fn opcode(&self) -> &str {
        &self.opcode
    }

    /// The data payload (literal value or output-variable binding).
    #[must_use]
    pub fn data(&self) -> &str {
        &self.data
    }

    /// Ordered input edges.
    #[must_use]
    pub fn inputs(&self) -> &[Arc<Self>] {
        &self.inputs
    }

    /// The canonical patch DAG of a dedup node.
    #[must_use]
    pub fn dedup_patch(&self) -> Option<&Arc<Self>> {
        self.dedup_patch.as_ref()
    }

    /// Memoized structural hash.
    #[must_use]
    pub fn hash_value(&self) -> u64 {
        self.hash
    }

    /// True for nodes without inputs.
    #[must_use]
    pub fn is_leaf(&self) -> bool {
        self.inputs.is_empty()
    }

    /// True for nodes carrying an opcode.
    #[must_use]
    pub fn is_instruction(&self) -> bool {
        !self.opcode.is_empty()
    }

    /// True for placeholder patch points.
    #[must_use]
    pub fn is_placeholder(&self) -> bool {
        self.opcode.starts_with(PLACEHOLDER_OPCODE_PREFIX)
    }

    /// True for dedup nodes.
    #[must_use]
    pub fn is_dedup(&self) -> bool {
        self.opcode.starts_with(DEDUP_OPCODE_PREFIX)
    }

    /// Derived category of this node.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LineageInvariant`] for an inner node without an
    /// opcode: such a node cannot be a literal.
    pub fn item_type(&self) -> Result<LineageItemType> {
        if self.is_dedup() {
            return Ok(LineageItemType::Dedup);
        }
        match (self.is_leaf(), self.is_instruction()) {
            (true, true) => Ok(LineageItemType::Creation),
            (true, false) => Ok(LineageItemType::Literal),
            (false, true) => Ok(LineageItemType::Instruction),
            (false, false) => Err(Error::LineageInvariant(format!(
                "inner node {} with empty opcode cannot be a literal",
                self.id
            ))),
        }
    }

    /// Follows dedup-patch and placeholder indirections to the node that
    /// participates in comparison.
    fn resolved(&self) -> &Self {
        let mut cur = self;
        loop {
            if let Some(patch) = &cur.dedup_patch {
                cur = patch;
                continue;
            }
            if cur.is_placeholder() {
                if let Some(inner) = cur.inputs.first() {
                    cur = inner;
                    continue;
                }
            }
            return cur;
        }
    }

    /// Structural DAG equality.
    ///
    /// Iterative DFS over node pairs; a side set of already-compared id
    /// pairs guarantees termination on shared sub-DAGs and keeps the
    /// comparison symmetric. Dedup nodes are rewritten to their patch DAGs
    /// and placeholders are bypassed on both sides.
    #[must_use]
    pub fn equals(&self, other: &Self) -> bool {
        let mut stack: Vec<(&Self, &Self)> = vec![(self, other)];
        let mut seen: FxHashSet<(u64, u64)> = FxHashSet::default();
        while let Some((x, y)) = stack.pop() {
            let x = x.resolved();
            let y = y.resolved();
            if std::ptr::eq(x, y) {
                continue;
            }
            if !seen.insert((x.id, y.id)) {
                continue;
            }
            if x.hash != y.hash
                || x.opcode != y.opcode
                || x.data != y.data
                || x.inputs.len() != y.inputs.len()
            {
                return false;
            }
            for (xi, yi) in x.inputs.iter().zip(y.inputs.iter()) {
                stack.push((xi, yi));
            }
        }
        true
    }

    /// Bottom-up clone of the DAG rooted here, assigning a fresh id to every
    /// node while preserving sharing.
    ///
    /// Used when an entry's key must be detached from a recursively owned
    /// DAG.
    #[must_use]
    pub fn deep_copy(root: &Arc<Self>) -> Arc<Self> {
        let mut copies: FxHashMap<u64, Arc<Self>> = FxHashMap::default();
        let mut stack: Vec<(Arc<Self>, bool)> = vec![(Arc::clone(root), false)];
        while let Some((node, expanded)) = stack.pop() {
            if copies.contains_key(&node.id) {
                continue;
            }
            if expanded {
                let inputs = node
                    .inputs
                    .iter()
                    .map(|i| Arc::clone(&copies[&i.id]))
                    .collect();
                let patch = node
                    .dedup_patch
                    .as_ref()
                    .map(|p| Arc::clone(&copies[&p.id]));
                let copy = Self::build(node.data.clone(), node.opcode.clone(), inputs, patch);
                copies.insert(node.id, copy);
            } else {
                stack.push((Arc::clone(&node), true));
                for i in &node.inputs {
                    if !copies.contains_key(&i.id) {
                        stack.push((Arc::clone(i), false));
                    }
                }
                if let Some(p) = &node.dedup_patch {
                    if !copies.contains_key(&p.id) {
                        stack.push((Arc::clone(p), false));
                    }
                }
            }
        }
        Arc::clone(&copies[&root.id])
    }
}

impl PartialEq for LineageItem {
    fn eq(&self, other: &Self) -> bool {
        self.equals(other)
    }
}

impl Eq for LineageItem {}

impl Hash for LineageItem {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash);
    }
}

impl fmt::Debug for LineageItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LineageItem")
            .field("id", &self.id)
            .field("opcode", &self.opcode)
            .field("data", &self.data)
            .field("inputs", &self.inputs.iter().map(|i| i.id).collect::<Vec<_>>())
            .finish()
    }
}

impl fmt::Display for LineageItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}) ", self.id)?;
        if self.is_leaf() && !self.is_instruction() {
            return write!(f, "lit: {}", self.data);
        }
        write!(f, "{}", self.opcode)?;
        if !self.data.is_empty() {
            write!(f, " [{}]", self.data)?;
        }
        let ids: Vec<String> = self.inputs.iter().map(|i| i.id.to_string()).collect();
        write!(f, " ({})", ids.join(","))
    }
}

fn hash_str(s: &str) -> u64 {
    let mut hasher = FxHasher::default();
    s.hash(&mut hasher);
    hasher.finish()
}

// Order-sensitive combiner so that permuted input sequences hash apart.
fn combine(acc: u64, h: u64) -> u64 {
    acc ^ h
        .wrapping_add(0x9e37_79b9_7f4a_7c15)
        .wrapping_add(acc << 6)
        .wrapping_add(acc >> 2)
}

/// Applies `f` to every node reachable from `root` exactly once, descending
/// through inputs and dedup patch DAGs. Iterative, so DAG depth is not
/// bounded by the native stack.
pub fn for_each_node(root: &Arc<LineageItem>, mut f: impl FnMut(&Arc<LineageItem>)) {
    let mut seen: FxHashSet<u64> = FxHashSet::default();
    let mut stack: Vec<Arc<LineageItem>> = vec![Arc::clone(root)];
    while let Some(node) = stack.pop() {
        if !seen.insert(node.id) {
            continue;
        }
        f(&node);
        for i in &node.inputs {
            stack.push(Arc::clone(i));
        }
        if let Some(p) = &node.dedup_patch {
            stack.push(Arc::clone(p));
        }
    }
}

/// Reports whether the DAG rooted at `root` reaches a data-generation
/// opcode, stopping the walk at the `boundary` node ids (the caller's
/// function inputs, whose lineage is accounted for separately).
#[must_use]
pub fn contains_rand_datagen(boundary: &FxHashSet<u64>, root: &Arc<LineageItem>) -> bool {
    let mut seen: FxHashSet<u64> = FxHashSet::default();
    let mut stack: Vec<Arc<LineageItem>> = vec![Arc::clone(root)];
    while let Some(node) = stack.pop() {
        if boundary.contains(&node.id) || !seen.insert(node.id) {
            continue;
        }
        if DATAGEN_OPCODES.contains(&node.opcode.as_str()) {
            return true;
        }
        for i in &node.inputs {
            stack.push(Arc::clone(i));
        }
        if let Some(p) = &node.dedup_patch {
            stack.push(Arc::clone(p));
        }
    }
    false
}

/// Longest path (in edges) from `root` to any leaf.
///
/// Shallow DAGs have low reuse leverage; the `dagheight` eviction policy
/// evicts them first.
#[must_use]
pub fn dag_height(root: &Arc<LineageItem>) -> u32 {
    let mut heights: FxHashMap<u64, u32> = FxHashMap::default();
    let mut stack: Vec<(Arc<LineageItem>, bool)> = vec![(Arc::clone(root), false)];
    while let Some((node, expanded)) = stack.pop() {
        if heights.contains_key(&node.id) {
            continue;
        }
        if expanded {
            let h = node
                .inputs
                .iter()
                .map(|i| heights.get(&i.id).copied().unwrap_or(0) + 1)
                .max()
                .unwrap_or(0);
            heights.insert(node.id, h);
        } else {
            stack.push((Arc::clone(&node), true));
            for i in &node.inputs {
                if !heights.contains_key(&i.id) {
                    stack.push((Arc::clone(i), false));
                }
            }
        }
    }
    heights.get(&root.id).copied().unwrap_or(0)
}
