//! Shortest-path search over the lattice.
//!
//! `viterbi` is the exact search used for conversion; it honors segment
//! boundaries and constrained nodes. `prediction_viterbi` contracts nodes by
//! POS id for speed; prediction creates no weakly-connected nodes, so the
//! contraction loses nothing it needs.

use tracing::{debug_span, warn};

use crate::dict::connection::{CachingConnector, Connector};

use super::lattice::Lattice;
use super::node::NodeId;
use super::segments::Segments;
use super::VERY_BIG_COST;

/// Relax every node beginning at `pos`. Nodes that would cross
/// `right_boundary` are marked unreachable; the caller derives boundaries
/// from the caller-declared segment layout.
fn viterbi_internal(lattice: &mut Lattice, connector: &Connector, pos: usize, right_boundary: usize) {
    let mut conn = CachingConnector::new(connector);
    let mut cur = lattice.begin_nodes(pos);
    while let Some(rnode_id) = cur {
        let (bnext, end_pos, lid, wcost, constrained_prev) = {
            let rnode = lattice.node(rnode_id);
            (rnode.bnext, rnode.end_pos, rnode.lid, rnode.wcost, rnode.constrained_prev)
        };
        cur = bnext;

        if end_pos > right_boundary {
            lattice.node_mut(rnode_id).prev = None;
            continue;
        }

        conn.reset_if_necessary(lid);

        if let Some(cp) = constrained_prev {
            let (cp_reachable, cp_cost, cp_rid) = {
                let cp_node = lattice.node(cp);
                (cp_node.prev.is_some(), cp_node.cost, cp_node.rid)
            };
            let rnode = lattice.node_mut(rnode_id);
            if !cp_reachable {
                rnode.prev = None;
            } else {
                rnode.prev = Some(cp);
                rnode.cost = cp_cost + wcost + conn.transition_cost(cp_rid, lid);
            }
            continue;
        }

        let mut best_cost = VERY_BIG_COST;
        let mut best_node = None;
        let mut lcur = lattice.end_nodes(pos);
        while let Some(lnode_id) = lcur {
            let (enext, prev, cost, rid) = {
                let lnode = lattice.node(lnode_id);
                (lnode.enext, lnode.prev, lnode.cost, lnode.rid)
            };
            lcur = enext;
            if prev.is_none() {
                continue;
            }
            let cost = cost + conn.transition_cost(rid, lid);
            if cost < best_cost {
                best_cost = cost;
                best_node = Some(lnode_id);
            }
        }

        let rnode = lattice.node_mut(rnode_id);
        rnode.prev = best_node;
        rnode.cost = best_cost + wcost;
    }
}

/// Reconstruct the forward best path from the `prev` pointers. Fails when
/// the back-walk does not terminate at BOS, which means the lattice was not
/// connected.
fn link_best_path(lattice: &mut Lattice) -> bool {
    let eos = match lattice.eos_node() {
        Some(eos) => eos,
        None => return false,
    };
    let mut node = eos;
    let mut prev = None;
    while let Some(p) = lattice.node(node).prev {
        lattice.node_mut(p).next = Some(node);
        prev = Some(p);
        node = p;
    }

    if lattice.bos_node() != prev {
        warn!("viterbi back-walk did not reach BOS");
        return false;
    }
    true
}

/// Exact Viterbi over the whole lattice, segment by segment.
pub(crate) fn viterbi(segments: &Segments, lattice: &mut Lattice, connector: &Connector) -> bool {
    let _span = debug_span!("viterbi", key_len = lattice.key().len()).entered();
    let key_len = lattice.key().len();

    // BOS step: relax nodes starting at position 0 directly.
    {
        let bos = match lattice.bos_node() {
            Some(bos) => bos,
            None => return false,
        };
        let (bos_cost, bos_rid) = {
            let node = lattice.node(bos);
            (node.cost, node.rid)
        };
        let right_boundary = segments.segment(0).key.len();
        let mut cur = lattice.begin_nodes(0);
        while let Some(rnode_id) = cur {
            let (bnext, end_pos, lid, wcost) = {
                let rnode = lattice.node(rnode_id);
                debug_assert!(rnode.constrained_prev.is_none());
                (rnode.bnext, rnode.end_pos, rnode.lid, rnode.wcost)
            };
            cur = bnext;
            if end_pos > right_boundary {
                continue;
            }
            let rnode = lattice.node_mut(rnode_id);
            rnode.prev = Some(bos);
            rnode.cost = bos_cost + connector.transition_cost(bos_rid, lid) + wcost;
        }
    }

    // First segment: BOS already handled the left boundary.
    let mut left_boundary = 0;
    {
        let right_boundary = left_boundary + segments.segment(0).key.len();
        for pos in left_boundary + 1..right_boundary {
            viterbi_internal(lattice, connector, pos, right_boundary);
        }
        left_boundary = right_boundary;
    }

    for segment in &segments.segments[1..] {
        let right_boundary = left_boundary + segment.key.len();
        for pos in left_boundary..right_boundary {
            viterbi_internal(lattice, connector, pos, right_boundary);
        }
        left_boundary = right_boundary;
    }

    // EOS step.
    {
        let eos = match lattice.eos_node() {
            Some(eos) => eos,
            None => return false,
        };
        let (eos_lid, eos_wcost) = {
            let node = lattice.node(eos);
            debug_assert!(node.constrained_prev.is_none());
            (node.lid, node.wcost)
        };
        let mut best_cost = VERY_BIG_COST;
        let mut best_node = None;
        let mut lcur = lattice.end_nodes(key_len);
        while let Some(lnode_id) = lcur {
            let (enext, prev, cost, rid) = {
                let lnode = lattice.node(lnode_id);
                (lnode.enext, lnode.prev, lnode.cost, lnode.rid)
            };
            lcur = enext;
            if prev.is_none() {
                continue;
            }
            let cost = cost + connector.transition_cost(rid, eos_lid);
            if cost < best_cost {
                best_cost = cost;
                best_node = Some(lnode_id);
            }
        }
        let eos_node = lattice.node_mut(eos);
        eos_node.prev = best_node;
        eos_node.cost = best_cost + eos_wcost;
    }

    link_best_path(lattice)
}

/// Sorted vector of (id, (cost, node)) pairs; the id population per position
/// is small (tens), so a vector with binary search beats a tree map.
struct BestMap {
    entries: Vec<(u16, (i32, Option<NodeId>))>,
}

impl BestMap {
    fn new() -> Self {
        Self {
            entries: Vec::with_capacity(128),
        }
    }

    fn clear(&mut self) {
        self.entries.clear();
    }

    fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keep the minimum-cost entry per id.
    fn offer(&mut self, id: u16, cost: i32, node: Option<NodeId>) {
        match self.entries.binary_search_by_key(&id, |e| e.0) {
            Ok(i) => {
                if cost < self.entries[i].1 .0 {
                    self.entries[i].1 = (cost, node);
                }
            }
            Err(i) => self.entries.insert(i, (id, (cost, node))),
        }
    }

    /// Register an id with no path yet.
    fn ensure(&mut self, id: u16) {
        if let Err(i) = self.entries.binary_search_by_key(&id, |e| e.0) {
            self.entries.insert(i, (id, (i32::MAX, None)));
        }
    }

    fn get(&self, id: u16) -> Option<(i32, Option<NodeId>)> {
        self.entries
            .binary_search_by_key(&id, |e| e.0)
            .ok()
            .map(|i| self.entries[i].1)
    }
}

/// One contracted relaxation pass over `[calc_begin_pos, calc_end_pos]`.
///
/// `lbest[rid]` holds the cheapest left node per right id, `rbest[lid]` the
/// cheapest accumulated path per left id; relaxing the cross product touches
/// each (rid, lid) pair once instead of each node pair.
fn prediction_viterbi_internal(
    lattice: &mut Lattice,
    connector: &Connector,
    calc_begin_pos: usize,
    calc_end_pos: usize,
) {
    debug_assert!(calc_begin_pos <= calc_end_pos);
    let mut lbest = BestMap::new();
    let mut rbest = BestMap::new();

    for pos in calc_begin_pos..=calc_end_pos {
        lbest.clear();
        for lnode_id in lattice.enext_iter(lattice.end_nodes(pos)).collect::<Vec<_>>() {
            let lnode = lattice.node(lnode_id);
            lbest.offer(lnode.rid, lnode.cost, Some(lnode_id));
        }
        if lbest.is_empty() {
            continue;
        }

        rbest.clear();
        let rnode_ids: Vec<NodeId> = lattice.bnext_iter(lattice.begin_nodes(pos)).collect();
        for &rnode_id in &rnode_ids {
            let rnode = lattice.node(rnode_id);
            if rnode.end_pos > calc_end_pos {
                continue;
            }
            rbest.ensure(rnode.lid);
        }
        if rbest.is_empty() {
            continue;
        }

        for &(rid, (lcost, lnode)) in &lbest.entries {
            for entry in &mut rbest.entries {
                let cost = lcost + connector.transition_cost(rid, entry.0);
                if cost < entry.1 .0 {
                    entry.1 = (cost, lnode);
                }
            }
        }

        for &rnode_id in &rnode_ids {
            let (end_pos, lid, wcost) = {
                let rnode = lattice.node(rnode_id);
                (rnode.end_pos, rnode.lid, rnode.wcost)
            };
            if end_pos > calc_end_pos {
                continue;
            }
            if let Some((cost, Some(prev))) = rbest.get(lid) {
                let rnode = lattice.node_mut(rnode_id);
                rnode.cost = cost + wcost;
                rnode.prev = Some(prev);
            }
        }
    }
}

/// Contracted Viterbi for prediction. History nodes are relaxed first so
/// nodes bridging the history boundary see finished predecessors.
pub(crate) fn prediction_viterbi(segments: &Segments, lattice: &mut Lattice, connector: &Connector) -> bool {
    let _span = debug_span!("prediction_viterbi", key_len = lattice.key().len()).entered();
    let key_length = lattice.key().len();
    let history_length: usize = segments.history_segments().iter().map(|s| s.key.len()).sum();

    prediction_viterbi_internal(lattice, connector, 0, history_length);
    prediction_viterbi_internal(lattice, connector, history_length, key_length);

    link_best_path(lattice)
}
