//! Lattice nodes and their arena.
//!
//! Nodes form several intrusive lists at once: `bnext` chains nodes sharing
//! a begin position, `enext` chains nodes sharing an end position, and
//! `prev`/`next` trace the best path after search. All links are stable
//! indices into the arena, which frees every node at once on clear.

use bitflags::bitflags;

use crate::dict::{Token, TokenAttributes};

/// Stable index of a node inside its arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub(crate) u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NodeType {
    #[default]
    Normal,
    Bos,
    Eos,
    /// Predecessor on the best path is fixed by a caller constraint.
    Constrained,
    /// Virtual node for previously committed text.
    History,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct NodeAttributes: u32 {
        /// Node survives `reset_node_cost` with its wcost reverted, so
        /// incremental prediction can reuse it.
        const CACHE_ENABLED = 1 << 0;
        const SPELLING_CORRECTION = 1 << 1;
        const USER_DICTIONARY = 1 << 2;
        const SUFFIX_DICTIONARY = 1 << 3;
        const NO_VARIANTS_EXPANSION = 1 << 4;
        /// User input starts with a particle; suppresses the segment
        /// boundary right after the history.
        const STARTS_WITH_PARTICLE = 1 << 5;
        const PARTIALLY_KEY_CONSUMED = 1 << 6;
        const KEY_EXPANDED = 1 << 7;
    }
}

/// One word hypothesis in the lattice.
#[derive(Debug, Clone, Default)]
pub struct Node {
    pub prev: Option<NodeId>,
    pub next: Option<NodeId>,
    /// Next node starting at the same position.
    pub bnext: Option<NodeId>,
    /// Next node ending at the same position.
    pub enext: Option<NodeId>,
    /// When set, only this predecessor is allowed; any other transition
    /// costs `INVALID_PENALTY_COST`.
    pub constrained_prev: Option<NodeId>,

    pub rid: u16,
    pub lid: u16,
    /// Byte offsets into the lattice key.
    pub begin_pos: usize,
    pub end_pos: usize,

    /// Word cost; may be adjusted after lookup (penalties, cache).
    pub wcost: i32,
    /// Accumulated best-path cost from BOS.
    pub cost: i32,
    /// Word cost as produced by the lookup; never mutated afterwards.
    pub raw_wcost: i32,

    pub node_type: NodeType,
    pub attributes: NodeAttributes,

    /// Reading (user input slice).
    pub key: String,
    /// Actual search key when it differs from `key` (expanded lookups).
    pub actual_key: String,
    /// Surface form.
    pub value: String,
}

impl Node {
    pub(crate) fn init_from_token(&mut self, token: &Token) {
        *self = Node::default();
        self.rid = token.rid;
        self.lid = token.lid;
        self.wcost = token.cost;
        if token.attributes.contains(TokenAttributes::SPELLING_CORRECTION) {
            self.attributes |= NodeAttributes::SPELLING_CORRECTION;
        }
        if token.attributes.contains(TokenAttributes::SUFFIX_DICTIONARY) {
            self.attributes |= NodeAttributes::SUFFIX_DICTIONARY;
        }
        if token.attributes.contains(TokenAttributes::USER_DICTIONARY) {
            self.attributes |= NodeAttributes::USER_DICTIONARY;
            self.attributes |= NodeAttributes::NO_VARIANTS_EXPANSION;
        }
        self.key = token.key.clone();
        self.value = token.value.clone();
    }
}

/// Bump allocator owning every node of one lattice.
#[derive(Debug)]
pub struct NodeArena {
    nodes: Vec<Node>,
    max_nodes_size: usize,
}

pub(crate) const DEFAULT_MAX_NODES_SIZE: usize = 8192;

impl Default for NodeArena {
    fn default() -> Self {
        Self {
            nodes: Vec::new(),
            max_nodes_size: DEFAULT_MAX_NODES_SIZE,
        }
    }
}

impl NodeArena {
    pub fn new_node(&mut self) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node::default());
        id
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.index()]
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Per-lookup node budget; also the rebuild threshold for `update_key`.
    pub fn max_nodes_size(&self) -> usize {
        self.max_nodes_size
    }

    pub fn set_max_nodes_size(&mut self, size: usize) {
        self.max_nodes_size = size;
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
    }
}
