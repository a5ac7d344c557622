//! Bunsetsu boundary decisions and edge penalties.
//!
//! The production rule tables are compiled from dictionary data; the
//! converter only needs the trait below. `RuleSegmenter` is a table-driven
//! implementation for embedders and tests.

use std::cmp::Ordering;

use crate::converter::node::{Node, NodeAttributes, NodeType};
use crate::flat::{FlatMap, FlatSet};

pub trait Segmenter {
    /// Pure rule lookup on connection ids.
    fn is_boundary_rule(&self, rid: u16, lid: u16) -> bool;

    /// Extra word cost for a node that starts the conversion key.
    fn prefix_penalty(&self, lid: u16) -> i32;

    /// Extra word cost for a node that ends the lattice key.
    fn suffix_penalty(&self, rid: u16) -> i32;

    /// Boundary decision between two adjacent nodes.
    ///
    /// BOS/EOS always bound a segment. In single-segment mode nothing else
    /// does, which is what makes prediction produce one segment. A node
    /// flagged `STARTS_WITH_PARTICLE` keeps the particle glued to the
    /// following content word; the input "かみにかく" should stay one
    /// bunsetsu so both 紙|に書く and 紙二角 survive.
    fn is_boundary(&self, lnode: &Node, rnode: &Node, is_single_segment: bool) -> bool {
        if lnode.node_type == NodeType::Bos || rnode.node_type == NodeType::Eos {
            return true;
        }
        if is_single_segment {
            return false;
        }
        if lnode.attributes.contains(NodeAttributes::STARTS_WITH_PARTICLE) {
            return false;
        }
        self.is_boundary_rule(lnode.rid, rnode.lid)
    }
}

/// Segmenter driven by an explicit (rid, lid) boundary table and per-id
/// penalty tables.
pub struct RuleSegmenter {
    boundaries: FlatSet<(u16, u16)>,
    prefix_penalties: FlatMap<u16, i32>,
    suffix_penalties: FlatMap<u16, i32>,
}

fn cmp_pair(a: &(u16, u16), b: &(u16, u16)) -> Ordering {
    a.cmp(b)
}

impl RuleSegmenter {
    pub fn new(
        boundaries: Vec<(u16, u16)>,
        prefix_penalties: Vec<(u16, i32)>,
        suffix_penalties: Vec<(u16, i32)>,
    ) -> Self {
        Self {
            boundaries: FlatSet::with_cmp(boundaries, cmp_pair),
            prefix_penalties: FlatMap::new(prefix_penalties),
            suffix_penalties: FlatMap::new(suffix_penalties),
        }
    }
}

impl Segmenter for RuleSegmenter {
    fn is_boundary_rule(&self, rid: u16, lid: u16) -> bool {
        self.boundaries.contains(&(rid, lid))
    }

    fn prefix_penalty(&self, lid: u16) -> i32 {
        self.prefix_penalties.find_or_null(&lid).copied().unwrap_or(0)
    }

    fn suffix_penalty(&self, rid: u16) -> i32 {
        self.suffix_penalties.find_or_null(&rid).copied().unwrap_or(0)
    }
}
