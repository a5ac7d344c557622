//! N-best path enumeration between two boundary nodes.
//!
//! After Viterbi every node carries its exact best-path cost, which serves
//! as a consistent A* heuristic: the search walks backwards from alternative
//! end nodes, always expanding the lowest f = (exact cost to BOS) + (cost
//! accumulated back to the end node). The first produced candidate is the
//! Viterbi path itself; the filter then decides which alternatives survive.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use tracing::debug;

use crate::dict::connection::Connector;
use crate::dict::{PosMatcher, UserDictionary};
use crate::segmenter::Segmenter;
use crate::suggestion::SuggestionFilter;

use super::candidate_filter::{CandidateFilter, FilterResult};
use super::lattice::Lattice;
use super::node::{Node, NodeAttributes, NodeId, NodeType};
use super::request::ConversionRequest;
use super::segments::{Candidate, CandidateAttributes, Segment};
use super::INVALID_PENALTY_COST;

/// Cost window for alternative paths: 500 * ln(1000).
const COST_DIFF: i32 = 3453;
const WEAK_CONNECTED_PENALTY: i32 = 3453;
const MAX_TRIAL: usize = 500;
const FREE_LIST_SIZE: usize = 512;

/// Which transitions of a candidate path must coincide with grammatical
/// bunsetsu boundaries.
///
/// For a candidate spanning nodes B and C of `|A|B|C|D|`:
/// - `Strict`: A-B and C-D must be boundaries, B-C must not.
/// - `OnlyMid`: only B-C is checked (must not be a boundary); used for
///   caller-fixed segment boundaries.
/// - `OnlyEdge`: only A-B and C-D are checked; an edge that is not a
///   grammatical boundary stays valid but is penalized as weakly
///   connected. Used for realtime single-segment conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BoundaryCheckMode {
    #[default]
    Strict,
    OnlyMid,
    OnlyEdge,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NBestOptions {
    pub boundary_mode: BoundaryCheckMode,
    /// Record inner segment boundaries on produced candidates.
    pub fill_inner_segment_info: bool,
    /// Build candidates from only the first inner segment of each path.
    pub build_from_only_first_inner_segment: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BoundaryCheckResult {
    Valid,
    /// Valid, but the edge deserves a penalty.
    ValidWeakConnected,
    Invalid,
}

#[derive(Debug, Clone, Copy)]
struct QueueElement {
    node: NodeId,
    next: Option<u32>,
    /// f(x) = h(x) + g(x); h(x) is the node's exact Viterbi cost.
    fx: i32,
    /// Accumulated path cost back to the end node; becomes the candidate
    /// cost when the path completes.
    gx: i32,
    /// Transition-cost part of g(x), excluding edges.
    structure_gx: i32,
    /// Word-cost part of g(x).
    w_gx: i32,
}

/// Min-heap entry; ties break on the element index so ordering is
/// deterministic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct HeapEntry {
    fx: i32,
    idx: u32,
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other.fx.cmp(&self.fx).then(other.idx.cmp(&self.idx))
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

pub struct NBestGenerator<'a> {
    segmenter: &'a dyn Segmenter,
    connector: &'a Connector,
    pos_matcher: &'a dyn PosMatcher,
    lattice: &'a Lattice,

    begin_node: Option<NodeId>,
    end_node: Option<NodeId>,

    agenda: BinaryHeap<HeapEntry>,
    elements: Vec<QueueElement>,
    top_nodes: Vec<NodeId>,
    filter: CandidateFilter<'a>,
    viterbi_result_checked: bool,
    options: NBestOptions,
}

impl<'a> NBestGenerator<'a> {
    pub fn new(
        user_dictionary: &'a dyn UserDictionary,
        segmenter: &'a dyn Segmenter,
        connector: &'a Connector,
        pos_matcher: &'a dyn PosMatcher,
        lattice: &'a Lattice,
        suggestion_filter: &'a SuggestionFilter,
    ) -> Self {
        Self {
            segmenter,
            connector,
            pos_matcher,
            lattice,
            begin_node: None,
            end_node: None,
            agenda: BinaryHeap::with_capacity(FREE_LIST_SIZE),
            elements: Vec::with_capacity(FREE_LIST_SIZE),
            top_nodes: Vec::new(),
            filter: CandidateFilter::new(user_dictionary, pos_matcher, suggestion_filter),
            viterbi_result_checked: false,
            options: NBestOptions::default(),
        }
    }

    /// Restart enumeration for the span between `begin_node` and
    /// `end_node` (both exclusive).
    pub fn reset(&mut self, begin_node: NodeId, end_node: NodeId, options: NBestOptions) {
        self.agenda.clear();
        self.elements.clear();
        self.top_nodes.clear();
        self.filter.reset();
        self.viterbi_result_checked = false;
        self.options = options;
        self.begin_node = Some(begin_node);
        self.end_node = Some(end_node);

        let end = self.lattice.node(end_node);
        // Seed with alternative end nodes within the cost window. Nodes
        // sharing the end node's lid or predecessor would enumerate the
        // same paths again.
        let mut cur = self.lattice.begin_nodes(end.begin_pos);
        while let Some(id) = cur {
            let node = self.lattice.node(id);
            cur = node.bnext;
            if id == end_node
                || (node.lid != end.lid
                    && node.cost - end.cost <= COST_DIFF
                    && node.prev != end.prev)
            {
                let elem = self.new_element(id, None, node.cost, 0, 0, 0);
                self.agenda.push(HeapEntry {
                    fx: node.cost,
                    idx: elem,
                });
            }
        }
    }

    /// Fill `segment` with up to `expand_size` filtered candidates.
    pub fn set_candidates(
        &mut self,
        request: &ConversionRequest,
        original_key: &str,
        expand_size: usize,
        segment: &mut Segment,
    ) {
        while segment.candidates.len() < expand_size {
            match self.next(request, original_key) {
                Some(candidate) => segment.candidates.push(candidate),
                None => break,
            }
        }
    }

    fn new_element(
        &mut self,
        node: NodeId,
        next: Option<u32>,
        fx: i32,
        gx: i32,
        structure_gx: i32,
        w_gx: i32,
    ) -> u32 {
        let idx = self.elements.len() as u32;
        self.elements.push(QueueElement {
            node,
            next,
            fx,
            gx,
            structure_gx,
            w_gx,
        });
        idx
    }

    fn next(&mut self, request: &ConversionRequest, original_key: &str) -> Option<Candidate> {
        let begin_node = self.begin_node?;
        let end_node = self.end_node?;

        // The candidate cost is assembled from marginalized edge costs:
        // for a path |left|n1|n2|n3|right|,
        //   cost = (left.cost - begin.cost) + trans + wcosts + trans
        //        + (right.cost - end.cost)
        //   structure_cost = internal transitions only
        //   wcost = word costs plus internal transitions
        // On the Viterbi path both marginal terms are exactly zero.
        if !self.viterbi_result_checked {
            let (result, candidate) = self.insert_top_result(request, original_key);
            match result {
                FilterResult::Good => return candidate,
                FilterResult::StopEnumeration => return None,
                FilterResult::Bad => {}
            }
        }

        let begin = node_copy(self.lattice, begin_node);
        let end = node_copy(self.lattice, end_node);
        let mut num_trials = 0;

        while let Some(entry) = self.agenda.pop() {
            let top = self.elements[entry.idx as usize];
            let rnode_id = top.node;
            let rnode = node_copy(self.lattice, rnode_id);

            num_trials += 1;
            if num_trials > MAX_TRIAL {
                debug!(num_trials, "too many trials");
                return None;
            }

            if rnode.end_pos == begin.end_pos {
                // Reached the goal. The elements strictly between top and
                // the seed element are the candidate path, left to right.
                let mut nodes = Vec::new();
                let mut cur = top.next;
                while let Some(i) = cur {
                    let elem = self.elements[i as usize];
                    if elem.next.is_none() {
                        break;
                    }
                    nodes.push(elem.node);
                    cur = elem.next;
                }
                debug_assert!(!nodes.is_empty());

                let candidate = if self.options.build_from_only_first_inner_segment {
                    let prefix_len = self.first_inner_segment_len(&nodes);
                    nodes.truncate(prefix_len);
                    self.make_prefix_candidate(&nodes)
                } else {
                    self.make_candidate(top.gx, top.structure_gx, top.w_gx, &nodes)
                };

                let top_nodes = std::mem::take(&mut self.top_nodes);
                let result = self.filter.filter(
                    request,
                    original_key,
                    &candidate,
                    &top_nodes,
                    &nodes,
                    self.lattice,
                );
                self.top_nodes = top_nodes;
                match result {
                    FilterResult::Good => return Some(candidate),
                    FilterResult::StopEnumeration => return None,
                    FilterResult::Bad => continue,
                }
            }

            // Expand to the left.
            let is_right_edge = rnode.begin_pos == end.begin_pos;
            let is_left_edge = rnode.begin_pos == begin.end_pos;
            debug_assert!(!(is_right_edge && is_left_edge));
            let is_edge = is_right_edge || is_left_edge;

            let mut best_left: Option<(i32, NodeId, i32, i32, i32)> = None;
            let mut cur = self.lattice.end_nodes(rnode.begin_pos);
            while let Some(lnode_id) = cur {
                let lnode = node_copy(self.lattice, lnode_id);
                cur = lnode.enext;

                // An lnode overlapping the begin node's right boundary can
                // never be part of this span.
                let is_valid_position =
                    !(lnode.begin_pos < begin.end_pos && begin.end_pos < lnode.end_pos);
                if !is_valid_position {
                    continue;
                }

                if is_left_edge {
                    // Cost-based admissibility at the left edge.
                    if lnode.cost - begin.cost > COST_DIFF {
                        continue;
                    }
                    // Searching another node with the begin node's rid
                    // cannot produce a new value; the edge cost depends on
                    // the rid alone.
                    if lnode.rid == begin.rid && lnode_id != begin_node {
                        continue;
                    }
                }

                let boundary_result = self.boundary_check(&lnode, &rnode, is_edge);
                if boundary_result == BoundaryCheckResult::Invalid {
                    continue;
                }

                let transition_cost = self.transition_cost(lnode_id, &lnode, &rnode);

                let (mut cost_diff, mut structure_cost_diff, mut wcost_diff);
                if is_right_edge {
                    // (rnode.cost - end.cost) approximates the marginalized
                    // cost of the alternative end node.
                    cost_diff = transition_cost + (rnode.cost - end.cost);
                    structure_cost_diff = 0;
                    wcost_diff = 0;
                } else if is_left_edge {
                    cost_diff = transition_cost + rnode.wcost + (lnode.cost - begin.cost);
                    structure_cost_diff = 0;
                    wcost_diff = rnode.wcost;
                } else {
                    cost_diff = transition_cost + rnode.wcost;
                    structure_cost_diff = transition_cost;
                    wcost_diff = transition_cost + rnode.wcost;
                }

                if boundary_result == BoundaryCheckResult::ValidWeakConnected {
                    cost_diff += WEAK_CONNECTED_PENALTY;
                    structure_cost_diff += WEAK_CONNECTED_PENALTY / 2;
                    wcost_diff += WEAK_CONNECTED_PENALTY / 2;
                }

                let gx = cost_diff + top.gx;
                // lnode.cost is h(x): the exact cost from BOS after Viterbi.
                let fx = lnode.cost + gx;
                let structure_gx = structure_cost_diff + top.structure_gx;
                let w_gx = wcost_diff + top.w_gx;

                if is_left_edge {
                    // Any left-edge node completes the same value, so one
                    // best element per expansion is enough.
                    if best_left.map_or(true, |(best_fx, ..)| best_fx > fx) {
                        best_left = Some((fx, lnode_id, gx, structure_gx, w_gx));
                    }
                } else {
                    let elem =
                        self.new_element(lnode_id, Some(entry.idx), fx, gx, structure_gx, w_gx);
                    self.agenda.push(HeapEntry { fx, idx: elem });
                }
            }

            if let Some((fx, lnode_id, gx, structure_gx, w_gx)) = best_left {
                let elem = self.new_element(lnode_id, Some(entry.idx), fx, gx, structure_gx, w_gx);
                self.agenda.push(HeapEntry { fx, idx: elem });
            }
        }

        None
    }

    /// Submit the Viterbi best path first, so the filter's top candidate is
    /// always the optimal one.
    fn insert_top_result(
        &mut self,
        request: &ConversionRequest,
        original_key: &str,
    ) -> (FilterResult, Option<Candidate>) {
        let begin_node = self.begin_node.expect("reset before use");
        let end_node = self.end_node.expect("reset before use");
        self.viterbi_result_checked = true;

        let begin = node_copy(self.lattice, begin_node);
        let end = node_copy(self.lattice, end_node);

        let mut nodes = Vec::new();
        let mut total_wcost = 0i32;
        let mut cur = begin.next;
        while let Some(id) = cur {
            if id == end_node {
                break;
            }
            nodes.push(id);
            if nodes.len() > 1 {
                total_wcost += self.lattice.node(id).wcost;
            }
            cur = self.lattice.node(id).next;
        }
        if nodes.is_empty() {
            return (FilterResult::Bad, None);
        }

        let first = self.lattice.node(nodes[0]);
        let end_prev_cost = end
            .prev
            .map(|id| self.lattice.node(id).cost)
            .unwrap_or(0);
        let cost = end.cost - begin.cost - end.wcost;
        let structure_cost = end_prev_cost - first.cost - total_wcost;
        let wcost = end_prev_cost - first.cost + first.wcost;

        let mut candidate = if self.options.build_from_only_first_inner_segment {
            let prefix_len = self.first_inner_segment_len(&nodes);
            nodes.truncate(prefix_len);
            self.make_prefix_candidate(&nodes)
        } else {
            self.make_candidate(cost, structure_cost, wcost, &nodes)
        };
        if self.options.boundary_mode == BoundaryCheckMode::OnlyEdge {
            candidate.attributes |= CandidateAttributes::REALTIME_CONVERSION;
        }

        self.top_nodes = nodes.clone();
        let top_nodes = std::mem::take(&mut self.top_nodes);
        let result = self.filter.filter(
            request,
            original_key,
            &candidate,
            &top_nodes,
            &nodes,
            self.lattice,
        );
        self.top_nodes = top_nodes;
        (result, Some(candidate))
    }

    fn make_candidate(
        &self,
        cost: i32,
        structure_cost: i32,
        wcost: i32,
        nodes: &[NodeId],
    ) -> Candidate {
        debug_assert!(!nodes.is_empty());
        let mut candidate = Candidate {
            lid: self.lattice.node(nodes[0]).lid,
            rid: self.lattice.node(*nodes.last().unwrap()).rid,
            cost,
            structure_cost,
            wcost,
            ..Candidate::default()
        };

        let mut is_functional = false;
        for &id in nodes {
            let node = self.lattice.node(id);
            if !is_functional && !self.pos_matcher.is_functional(node.lid) {
                candidate.content_value.push_str(&node.value);
                candidate.content_key.push_str(&node.key);
            } else {
                is_functional = true;
            }
            candidate.key.push_str(&node.key);
            candidate.value.push_str(&node.value);

            let next_is_constrained = node
                .next
                .map(|next| self.lattice.node(next).constrained_prev == Some(id))
                .unwrap_or(false);
            if node.constrained_prev.is_some() || next_is_constrained {
                // Resegmented or history-extended paths depend on their
                // neighborhood.
                candidate.attributes |= CandidateAttributes::CONTEXT_SENSITIVE;
            }
            if node.attributes.contains(NodeAttributes::SPELLING_CORRECTION) {
                candidate.attributes |= CandidateAttributes::SPELLING_CORRECTION;
            }
            if node.attributes.contains(NodeAttributes::NO_VARIANTS_EXPANSION) {
                candidate.attributes |= CandidateAttributes::NO_VARIANTS_EXPANSION;
            }
            if node.attributes.contains(NodeAttributes::USER_DICTIONARY) {
                candidate.attributes |= CandidateAttributes::USER_DICTIONARY;
            }
            if node.attributes.contains(NodeAttributes::SUFFIX_DICTIONARY) {
                candidate.attributes |= CandidateAttributes::SUFFIX_DICTIONARY;
            }
        }

        if candidate.content_value.is_empty() || candidate.content_key.is_empty() {
            candidate.content_value = candidate.value.clone();
            candidate.content_key = candidate.key.clone();
        }

        if self.options.fill_inner_segment_info {
            self.fill_inner_segment_info(nodes, &mut candidate);
        }
        candidate
    }

    /// Inner segments let user-history prediction learn from realtime
    /// conversion results.
    fn fill_inner_segment_info(&self, nodes: &[NodeId], candidate: &mut Candidate) {
        let first = self.lattice.node(nodes[0]);
        let mut key_len = first.key.len();
        let mut value_len = first.value.len();
        let mut content_key_len = key_len;
        let mut content_value_len = value_len;
        let mut is_content_boundary = false;
        if self.pos_matcher.is_functional(first.rid) {
            is_content_boundary = true;
            content_key_len = 0;
            content_value_len = 0;
        }

        for window in nodes.windows(2) {
            let lnode = self.lattice.node(window[0]);
            let rnode = self.lattice.node(window[1]);
            if self.segmenter.is_boundary(lnode, rnode, false) {
                candidate.push_inner_segment_boundary(
                    key_len,
                    value_len,
                    content_key_len,
                    content_value_len,
                );
                key_len = 0;
                value_len = 0;
                content_key_len = 0;
                content_value_len = 0;
                is_content_boundary = false;
            }
            key_len += rnode.key.len();
            value_len += rnode.value.len();
            if is_content_boundary {
                continue;
            }
            // The content span closes after a content noun or pronoun meets
            // a functional word: for 走っ+た the stem 走っ is incomplete
            // and should not be learned alone.
            if (self.pos_matcher.is_content_noun(lnode.rid) || self.pos_matcher.is_pronoun(lnode.rid))
                && self.pos_matcher.is_functional(rnode.lid)
            {
                is_content_boundary = true;
            } else {
                content_key_len += rnode.key.len();
                content_value_len += rnode.value.len();
            }
        }
        candidate.push_inner_segment_boundary(key_len, value_len, content_key_len, content_value_len);
    }

    /// Length in nodes of the path's first inner segment.
    fn first_inner_segment_len(&self, nodes: &[NodeId]) -> usize {
        for (i, window) in nodes.windows(2).enumerate() {
            let lnode = self.lattice.node(window[0]);
            let rnode = self.lattice.node(window[1]);
            if self.segmenter.is_boundary(lnode, rnode, false) {
                return i + 1;
            }
        }
        nodes.len()
    }

    /// Candidate over a path prefix; costs are recomputed over the prefix
    /// because the queue element costs cover the whole path.
    fn make_prefix_candidate(&self, nodes: &[NodeId]) -> Candidate {
        let mut wcost_sum = 0i32;
        let mut structure = 0i32;
        for (i, &id) in nodes.iter().enumerate() {
            wcost_sum += self.lattice.node(id).wcost;
            if i > 0 {
                let lnode = node_copy(self.lattice, nodes[i - 1]);
                let rnode = node_copy(self.lattice, id);
                structure += self.transition_cost(nodes[i - 1], &lnode, &rnode);
            }
        }
        let cost = wcost_sum + structure;
        self.make_candidate(cost, structure, cost, nodes)
    }

    fn boundary_check(&self, lnode: &Node, rnode: &Node, is_edge: bool) -> BoundaryCheckResult {
        // Constrained nodes carry their own boundary through
        // `constrained_prev`; the grammar does not apply.
        if lnode.node_type == NodeType::Constrained || rnode.node_type == NodeType::Constrained {
            return BoundaryCheckResult::Valid;
        }
        let is_boundary = lnode.node_type == NodeType::History
            || self.segmenter.is_boundary(lnode, rnode, false);
        match self.options.boundary_mode {
            BoundaryCheckMode::Strict => {
                if is_edge != is_boundary {
                    BoundaryCheckResult::Invalid
                } else {
                    BoundaryCheckResult::Valid
                }
            }
            BoundaryCheckMode::OnlyMid => {
                if !is_edge && is_boundary {
                    BoundaryCheckResult::Invalid
                } else {
                    BoundaryCheckResult::Valid
                }
            }
            BoundaryCheckMode::OnlyEdge => {
                if is_edge && !is_boundary {
                    // Segmented for a non-grammatical reason; keep it but
                    // penalize.
                    BoundaryCheckResult::ValidWeakConnected
                } else {
                    BoundaryCheckResult::Valid
                }
            }
        }
    }

    fn transition_cost(&self, lnode_id: NodeId, lnode: &Node, rnode: &Node) -> i32 {
        if let Some(cp) = rnode.constrained_prev {
            if cp != lnode_id {
                return INVALID_PENALTY_COST;
            }
        }
        self.connector.transition_cost(lnode.rid, rnode.lid)
    }
}

/// Copy out the fields the search reads, so lattice borrows stay short.
fn node_copy(lattice: &Lattice, id: NodeId) -> Node {
    lattice.node(id).clone()
}
