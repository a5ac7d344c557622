//! Resegmentation: alternative decompositions inserted into the lattice
//! before search.
//!
//! Compound dictionary entries hide useful splits: "1はい" (number +
//! counter), "お1" (prefix + number), and full names like 田中麗奈. Each
//! rule inserts the split as a pair of constrained nodes, so the split can
//! win on cost but never recombines with foreign neighbors.

use tracing::debug;

use crate::unicode::{self, Script};

use super::lattice::Lattice;
use super::node::{NodeId, NodeType};
use super::segments::{SegmentType, Segments};
use super::{ImmutableConverter, INVALID_PENALTY_COST, MIN_COST};

fn is_ascii_digit_byte(b: u8) -> bool {
    b.is_ascii_digit()
}

/// Split off the leading run of ASCII digits.
fn decompose_number_and_suffix(input: &str) -> (&str, &str) {
    let pos = input.bytes().take_while(|&b| is_ascii_digit_byte(b)).count();
    input.split_at(pos)
}

/// Split off the trailing run of ASCII digits.
fn decompose_prefix_and_number(input: &str) -> (&str, &str) {
    let tail = input.bytes().rev().take_while(|&b| is_ascii_digit_byte(b)).count();
    input.split_at(input.len() - tail)
}

struct CompoundInfo {
    key: String,
    value: String,
    lid: u16,
    rid: u16,
    wcost: i32,
}

impl<'a> ImmutableConverter<'a> {
    /// Resegmentation over the conversion range, then constrained nodes for
    /// caller-fixed values.
    pub(super) fn resegment(
        &self,
        segments: &Segments,
        history_key: &str,
        conversion_key: &str,
        lattice: &mut Lattice,
    ) {
        for pos in history_key.len()..history_key.len() + conversion_key.len() {
            self.apply_resegment_rules(pos, lattice);
        }

        // A FixedValue segment becomes a single constrained node with a
        // prohibitively good cost; search cannot avoid it.
        let mut segments_pos = 0usize;
        for segment in &segments.segments {
            if segment.segment_type == SegmentType::FixedValue {
                if let Some(candidate) = segment.candidates.first() {
                    let rnode = lattice.new_node();
                    {
                        let node = lattice.node_mut(rnode);
                        node.lid = candidate.lid;
                        node.rid = candidate.rid;
                        node.wcost = MIN_COST;
                        node.value = candidate.value.clone();
                        node.key = segment.key.clone();
                        node.node_type = NodeType::Constrained;
                        node.bnext = None;
                    }
                    lattice.insert(segments_pos, rnode);
                }
            }
            segments_pos += segment.key.len();
        }
    }

    /// The first rule that fires at a position wins.
    pub(super) fn apply_resegment_rules(&self, pos: usize, lattice: &mut Lattice) {
        if self.resegment_arabic_number_and_suffix(pos, lattice) {
            return;
        }
        if self.resegment_prefix_and_arabic_number(pos, lattice) {
            return;
        }
        self.resegment_personal_name(pos, lattice);
    }

    fn compounds_at<F>(&self, pos: usize, lattice: &Lattice, pred: F) -> Vec<CompoundInfo>
    where
        F: Fn(&CompoundInfo) -> bool,
    {
        lattice
            .bnext_iter(lattice.begin_nodes(pos))
            .map(|id| {
                let node = lattice.node(id);
                CompoundInfo {
                    key: node.key.clone(),
                    value: node.value.clone(),
                    lid: node.lid,
                    rid: node.rid,
                    wcost: node.wcost,
                }
            })
            .filter(pred)
            .collect()
    }

    /// "1はい" style compounds: a number POS on the left id, something else
    /// on the right, digits leading both key and value.
    pub(super) fn resegment_arabic_number_and_suffix(&self, pos: usize, lattice: &mut Lattice) -> bool {
        let compounds = self.compounds_at(pos, lattice, |c| {
            !c.value.is_empty()
                && !c.key.is_empty()
                && self.pos_matcher().is_number(c.lid)
                && !self.pos_matcher().is_number(c.rid)
                && c.value.as_bytes()[0].is_ascii_digit()
                && c.key.as_bytes()[0].is_ascii_digit()
        });

        let mut modified = false;
        for compound in compounds {
            let (number_value, suffix_value) = decompose_number_and_suffix(&compound.value);
            let (number_key, suffix_key) = decompose_number_and_suffix(&compound.key);
            if suffix_value.is_empty() || suffix_key.is_empty() {
                continue;
            }
            if number_value != number_key {
                debug!("incompatible key/value number pair");
                continue;
            }

            // -1 so the resegmented pair beats the compound on cost.
            let wcost = (compound.wcost / 2 - 1).max(0);

            let number_node = lattice.new_node();
            {
                let node = lattice.node_mut(number_node);
                node.key = number_key.to_string();
                node.value = number_value.to_string();
                node.lid = compound.lid;
                node.rid = 0; // transition cost 0 to 0 is free
                node.wcost = wcost;
                node.node_type = NodeType::Normal;
                node.bnext = None;
            }
            let number_key_len = number_key.len();
            lattice.insert(pos, number_node);

            let suffix_node = lattice.new_node();
            {
                let node = lattice.node_mut(suffix_node);
                node.key = suffix_key.to_string();
                node.value = suffix_value.to_string();
                node.lid = 0;
                node.rid = compound.rid;
                node.wcost = wcost;
                node.node_type = NodeType::Normal;
                node.bnext = None;
                node.constrained_prev = Some(number_node);
            }
            lattice.insert(pos + number_key_len, suffix_node);

            debug!(compound = %compound.value, "resegmented number+suffix");
            modified = true;
        }
        modified
    }

    /// Words ending in digits, e.g. "ドラクエ3". No POS check here; words
    /// ending in Arabic numbers are rare enough already.
    pub(super) fn resegment_prefix_and_arabic_number(&self, pos: usize, lattice: &mut Lattice) -> bool {
        let compounds = self.compounds_at(pos, lattice, |c| {
            c.value.len() > 1
                && c.key.len() > 1
                && !c.value.as_bytes()[0].is_ascii_digit()
                && !c.key.as_bytes()[0].is_ascii_digit()
                && c.value.as_bytes()[c.value.len() - 1].is_ascii_digit()
                && c.key.as_bytes()[c.key.len() - 1].is_ascii_digit()
        });

        let mut modified = false;
        for compound in compounds {
            let (prefix_value, number_value) = decompose_prefix_and_number(&compound.value);
            let (prefix_key, number_key) = decompose_prefix_and_number(&compound.key);
            if prefix_value.is_empty() || prefix_key.is_empty() {
                continue;
            }
            if number_value != number_key {
                debug!("incompatible key/value number pair");
                continue;
            }

            let wcost = (compound.wcost / 2 - 1).max(0);

            let prefix_node = lattice.new_node();
            {
                let node = lattice.node_mut(prefix_node);
                node.key = prefix_key.to_string();
                node.value = prefix_value.to_string();
                node.lid = compound.lid;
                node.rid = 0;
                node.wcost = wcost;
                node.node_type = NodeType::Normal;
                node.bnext = None;
            }
            let prefix_key_len = prefix_key.len();
            lattice.insert(pos, prefix_node);

            let number_node = lattice.new_node();
            {
                let node = lattice.node_mut(number_node);
                node.key = number_key.to_string();
                node.value = number_value.to_string();
                node.lid = 0;
                node.rid = compound.rid;
                node.wcost = wcost;
                node.node_type = NodeType::Normal;
                node.bnext = None;
                node.constrained_prev = Some(prefix_node);
            }
            lattice.insert(pos + prefix_key_len, number_node);

            debug!(compound = %compound.value, "resegmented prefix+number");
            modified = true;
        }
        modified
    }

    /// Last-name + first-name compounds like 田中麗奈: find the best split
    /// supported by lattice nodes and a segment boundary, and insert both
    /// halves with the compound's cost shared between them.
    pub(super) fn resegment_personal_name(&self, pos: usize, lattice: &mut Lattice) -> bool {
        let compounds = self.compounds_at(pos, lattice, |c| {
            c.lid == self.last_name_id && c.rid == self.first_name_id
        });

        let mut modified = false;
        for compound in compounds {
            let len = unicode::chars_len(&compound.value);
            // One-char halves like 林健 deliver more side effects than
            // value.
            if len <= 2 {
                continue;
            }
            if unicode::is_script(&compound.value, Script::Katakana) {
                continue;
            }

            // Constrained search inside the compound:
            // 1. last.value + first.value == compound.value
            // 2. exactly two words
            // 3. a segment boundary between them
            // 4. POS constraints checked below (4a / 4b)
            let mut best: Option<(NodeId, NodeId)> = None;
            let mut best_cost = i32::MAX;

            let mut lcur = lattice.begin_nodes(pos);
            while let Some(lnode_id) = lcur {
                let lnode_key_len;
                {
                    let lnode = lattice.node(lnode_id);
                    lcur = lnode.bnext;
                    if compound.value.len() <= lnode.value.len()
                        || compound.key.len() <= lnode.key.len()
                        || !compound.value.starts_with(lnode.value.as_str())
                    {
                        continue;
                    }
                    lnode_key_len = lnode.key.len();
                }
                let mut rcur = lattice.begin_nodes(pos + lnode_key_len);
                while let Some(rnode_id) = rcur {
                    let lnode = lattice.node(lnode_id);
                    let rnode = lattice.node(rnode_id);
                    rcur = rnode.bnext;
                    if lnode.value.len() + rnode.value.len() == compound.value.len()
                        && compound.value == format!("{}{}", lnode.value, rnode.value)
                        && self.segmenter().is_boundary(lnode, rnode, false)
                    {
                        let cost = lnode.wcost + self.get_cost(lnode_id, rnode_id, lattice);
                        if cost < best_cost {
                            best = Some((lnode_id, rnode_id));
                            best_cost = cost;
                        }
                    }
                }
            }

            let Some((best_last_id, best_first_id)) = best else {
                continue;
            };
            let best_last = lattice.node(best_last_id);
            let best_first = lattice.node(best_first_id);

            // 4a: at least one half carries a name POS for long names.
            if len >= 4
                && best_last.lid != self.last_name_id
                && best_first.rid != self.first_name_id
            {
                continue;
            }
            // 4b: both halves for three-character names.
            if len == 3
                && (best_last.lid != self.last_name_id || best_first.rid != self.first_name_id)
            {
                continue;
            }

            // Split the compound cost evenly assuming the canonical
            // last→first transition:
            //   last.wcost + transition + first.wcost == compound.wcost
            let wcost = (compound.wcost - self.last_to_first_name_transition_cost) / 2;

            let (last_key, last_value) = (best_last.key.clone(), best_last.value.clone());
            let (first_key, first_value) = (best_first.key.clone(), best_first.value.clone());

            let last_name_node = lattice.new_node();
            {
                let node = lattice.node_mut(last_name_node);
                node.key = last_key.clone();
                node.value = last_value;
                node.lid = compound.lid;
                node.rid = self.last_name_id;
                node.wcost = wcost;
                node.node_type = NodeType::Normal;
                node.bnext = None;
            }
            lattice.insert(pos, last_name_node);

            let first_name_node = lattice.new_node();
            {
                let node = lattice.node_mut(first_name_node);
                node.key = first_key;
                node.value = first_value;
                node.lid = self.first_name_id;
                node.rid = compound.rid;
                node.wcost = wcost;
                node.node_type = NodeType::Normal;
                node.bnext = None;
                node.constrained_prev = Some(last_name_node);
            }
            lattice.insert(pos + last_key.len(), first_name_node);

            debug!(compound = %compound.value, "resegmented personal name");
            modified = true;
        }
        modified
    }

    /// Transition + word cost of `rnode` after `lnode`, honoring
    /// constrained predecessors.
    fn get_cost(&self, lnode_id: NodeId, rnode_id: NodeId, lattice: &Lattice) -> i32 {
        let lnode = lattice.node(lnode_id);
        let rnode = lattice.node(rnode_id);
        if let Some(cp) = rnode.constrained_prev {
            if cp != lnode_id {
                return INVALID_PENALTY_COST;
            }
        }
        self.connector().transition_cost(lnode.rid, rnode.lid) + rnode.wcost
    }
}
