//! Rejects low-quality, duplicate, or grammatically implausible candidates
//! during n-best enumeration, and tells the generator when to stop.
//!
//! The filter is stateful: it remembers the first accepted (top) candidate
//! and every accepted surface so later decisions can compare against them.

use std::collections::HashSet;

use crate::dict::{PosMatcher, UserDictionary};
use crate::suggestion::SuggestionFilter;
use crate::unicode::{self, Script};

use super::lattice::Lattice;
use super::node::{Node, NodeId, NodeType};
use super::request::{ConversionRequest, RequestType};
use super::segments::{Candidate, CandidateAttributes};

const SIZE_THRESHOLD_FOR_WEAK_COMPOUND: usize = 10;
/// How many candidates we expand at most.
const MAX_CANDIDATES_SIZE: usize = 200;

// The cost is a scaled log probability: cost = -500 * ln(prob). For two
// candidates with prob(A) = C * prob(B), cost(B) - cost(A) = 500 * ln(C),
// so filtering compares absolute cost differences:
//   C       500 * ln(C)
//   10      1151
//   100     2302
//   1000    3453
//   1000000 6907
const MIN_COST: i64 = 100;
const COST_OFFSET: i64 = 6907;
const STRUCTURE_COST_OFFSET: i64 = 3453;
const MIN_STRUCTURE_COST_OFFSET: i64 = 1151;
const STOP_ENUMERATION_CACHE_SIZE: usize = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterResult {
    /// Insert the candidate into the list.
    Good,
    /// Drop the candidate and keep enumerating.
    Bad,
    /// Drop the candidate and stop enumerating.
    StopEnumeration,
}

pub struct CandidateFilter<'a> {
    user_dictionary: &'a dyn UserDictionary,
    pos_matcher: &'a dyn PosMatcher,
    suggestion_filter: &'a SuggestionFilter,
    seen: HashSet<String>,
    top_candidate: Option<Candidate>,
}

impl<'a> CandidateFilter<'a> {
    pub fn new(
        user_dictionary: &'a dyn UserDictionary,
        pos_matcher: &'a dyn PosMatcher,
        suggestion_filter: &'a SuggestionFilter,
    ) -> Self {
        Self {
            user_dictionary,
            pos_matcher,
            suggestion_filter,
            seen: HashSet::new(),
            top_candidate: None,
        }
    }

    pub fn reset(&mut self) {
        self.seen.clear();
        self.top_candidate = None;
    }

    pub fn filter(
        &mut self,
        request: &ConversionRequest,
        original_key: &str,
        candidate: &Candidate,
        top_nodes: &[NodeId],
        nodes: &[NodeId],
        lattice: &Lattice,
    ) -> FilterResult {
        if request.request_type == RequestType::ReverseConversion {
            // The rules below are designed for forward conversion; reverse
            // conversion only deduplicates.
            return if self.seen.insert(candidate.value.clone()) {
                FilterResult::Good
            } else {
                FilterResult::Bad
            };
        }
        let result = self.filter_internal(request, original_key, candidate, top_nodes, nodes, lattice);
        if result == FilterResult::Good {
            self.seen.insert(candidate.value.clone());
        }
        result
    }

    fn filter_internal(
        &mut self,
        request: &ConversionRequest,
        original_key: &str,
        candidate: &Candidate,
        top_nodes: &[NodeId],
        nodes: &[NodeId],
        lattice: &Lattice,
    ) -> FilterResult {
        debug_assert!(!nodes.is_empty());
        let pm = self.pos_matcher;
        let n = |id: NodeId| lattice.node(id);

        if self.check_request_type(request, original_key, candidate, nodes, lattice) != FilterResult::Good {
            return FilterResult::Bad;
        }

        // Duplicate surfaces never help, whatever produced them; only user
        // dictionary entries are allowed to repeat.
        if !candidate.attributes.contains(CandidateAttributes::USER_DICTIONARY)
            && self.seen.contains(&candidate.value)
        {
            return FilterResult::Bad;
        }

        // Costs of constrained nodes tend to be overestimated; context
        // sensitive candidates skip the whole body and never become the
        // filter's top candidate.
        if candidate.attributes.contains(CandidateAttributes::CONTEXT_SENSITIVE) {
            return FilterResult::Good;
        }

        if request.is_mobile()
            && request.is_prediction()
            && is_noisy_number_candidate(pm, nodes, lattice)
        {
            return FilterResult::Bad;
        }

        let candidate_size = self.seen.len();
        if self.top_candidate.is_none() || candidate_size == 0 {
            self.top_candidate = Some(candidate.clone());
        }
        let top = self.top_candidate.clone().expect("top candidate set above");

        // Isolated words and general symbols must form single-node
        // candidates on their own.
        if nodes.len() > 1
            && nodes
                .iter()
                .any(|&id| is_isolated_word_or_general_symbol(pm, n(id).lid))
        {
            return FilterResult::Bad;
        }
        if is_isolated_word_or_general_symbol(pm, n(nodes[0]).lid) {
            let prev_ok = is_normal_or_constrained(n(nodes[0]).prev.map(|id| n(id)));
            let next_ok = is_normal_or_constrained(n(nodes[0]).next.map(|id| n(id)));
            if prev_ok || next_ok {
                return FilterResult::Bad;
            }
        }

        if self.user_dictionary.is_suppressed_entry(&candidate.key, &candidate.value)
            || (candidate.key != candidate.content_key
                && candidate.value != candidate.content_value
                && self
                    .user_dictionary
                    .is_suppressed_entry(&candidate.content_key, &candidate.content_value))
        {
            return FilterResult::Bad;
        }

        // User dictionary entries are kept even when they duplicate.
        if candidate.attributes.contains(CandidateAttributes::USER_DICTIONARY) {
            return FilterResult::Good;
        }

        if candidate_size + 1 >= MAX_CANDIDATES_SIZE {
            return FilterResult::StopEnumeration;
        }

        if self.seen.contains(&candidate.value) {
            return FilterResult::Bad;
        }

        // Suppress "書います", "買いて" and similar: a Kagyo-ta connection
        // verb must be followed by a te-suffix or nothing else among verb
        // suffixes, and a Wagyo-renyo connection verb must not take a
        // te-suffix.
        if unicode::script_type(&n(nodes[0]).value) != Some(Script::Hiragana) {
            if nodes.len() >= 2 {
                let first = n(nodes[0]);
                let second = n(nodes[1]);
                if pm.is_kagyo_ta_connection_verb(first.rid)
                    && pm.is_verb_suffix(second.lid)
                    && !pm.is_te_suffix(second.lid)
                {
                    return FilterResult::Bad;
                }
                if pm.is_wagyo_renyo_connection_verb(first.rid) && pm.is_te_suffix(second.lid) {
                    return FilterResult::Bad;
                }
            }
            let first = n(nodes[0]);
            if first.lid != first.rid {
                // Same shapes inside a single compound entry.
                if pm.is_kagyo_ta_connection_verb(first.lid)
                    && pm.is_verb_suffix(first.rid)
                    && !pm.is_te_suffix(first.rid)
                {
                    return FilterResult::Bad;
                }
                if pm.is_wagyo_renyo_connection_verb(first.lid) && pm.is_te_suffix(first.rid) {
                    return FilterResult::Bad;
                }
            }
        }

        // Single token and single character candidates are never dropped.
        if nodes.len() == 1 {
            return FilterResult::Good;
        }
        if unicode::chars_len(&candidate.value) == 1 {
            return FilterResult::Good;
        }

        let is_noisy_weak_compound = is_noisy_weak_compound(pm, nodes, lattice);
        let is_connected_weak_compound = is_connected_weak_compound(pm, nodes, lattice);

        if is_noisy_weak_compound && candidate_size >= 1 {
            return FilterResult::Bad;
        }
        if is_connected_weak_compound && candidate_size >= SIZE_THRESHOLD_FOR_WEAK_COMPOUND {
            return FilterResult::Bad;
        }

        // Keep candidates whose connection ids match the top candidate with
        // no internal structure; they are grammatical twins of the top.
        if !is_noisy_weak_compound
            && top.structure_cost == 0
            && candidate.lid == top.lid
            && candidate.rid == top.rid
        {
            return FilterResult::Good;
        }

        // "好かっ|たり" vs "良かっ|たり": same hiragana functional suffix as
        // the top candidate means the stem is just another valid word.
        if !is_noisy_weak_compound
            && top.content_value != top.value
            && unicode::is_script(top.functional_value(), Script::Hiragana)
            && top.functional_value() == candidate.functional_value()
        {
            return FilterResult::Good;
        }

        // Katakana transliteration checks. Realtime conversion whole-path
        // candidates legitimately start with alphabet runs, so they skip
        // this.
        if !candidate.attributes.contains(CandidateAttributes::REALTIME_CONVERSION) {
            let first = n(nodes[0]);
            let is_top_english_t13n = unicode::is_script(&first.key, Script::Hiragana)
                && unicode::is_english_transliteration(&first.value);
            for &id in &nodes[1..] {
                let node = n(id);
                // Transliterations may only be the prefix of a candidate.
                if unicode::is_script(&node.key, Script::Hiragana)
                    && unicode::is_english_transliteration(&node.value)
                {
                    return FilterResult::Bad;
                }
                // The node right after a transliteration prefix must be
                // functional.
                if is_top_english_t13n && !pm.is_functional(node.lid) {
                    return FilterResult::Bad;
                }
            }
        }

        let top_cost = (top.cost as i64).max(MIN_COST);
        let top_structure_cost = (top.structure_cost as i64).max(MIN_COST);

        // When the top candidate is a compound its structure cost is zero,
        // which would filter ordinary runner-up candidates; relax the gates
        // for the first few.
        if is_compound_candidate(top_nodes, lattice)
            && candidate_size < 3
            && (candidate.cost as i64) < top_cost + 2302
            && (candidate.structure_cost as i64) < 6907
        {
            return FilterResult::Good;
        }

        // Personal names are kept even when rare: the cost gate is disabled
        // for them and only the structure gate applies.
        let cost_offset: i64 = if candidate.lid == pm.last_name_id() || candidate.lid == pm.first_name_id()
        {
            i64::MAX - top_cost
        } else {
            COST_OFFSET
        };

        if top_cost.saturating_add(cost_offset) < candidate.cost as i64
            && top_structure_cost + MIN_STRUCTURE_COST_OFFSET < candidate.structure_cost as i64
        {
            if candidate_size < STOP_ENUMERATION_CACHE_SIZE {
                // A structure-cost rejection can still be followed by valid
                // candidates, so enumeration continues for a while.
                return FilterResult::Bad;
            }
            return FilterResult::StopEnumeration;
        }

        if top_structure_cost.max(MIN_STRUCTURE_COST_OFFSET) + STRUCTURE_COST_OFFSET
            < candidate.structure_cost as i64
        {
            return FilterResult::Bad;
        }

        // Filter paths with multiple independent number nodes, like
        // "2|十三重" or "4|重|5|号室". "1|0|円" stays because consecutive
        // digits share a lid.
        if nodes.len() >= 2 {
            let mut number_nodes = 0;
            let mut prev_lid = 0u16;
            for &id in nodes {
                let node = n(id);
                if unicode::is_script(&node.key, Script::Number) {
                    continue;
                }
                if let Some(first_char) = node.value.chars().next() {
                    let script = unicode::char_script(first_char);
                    if script == Script::Number && prev_lid != node.lid {
                        number_nodes += 1;
                    } else if script == Script::Kanji
                        && unicode::is_kanji_numeral(first_char)
                        && prev_lid != node.lid
                    {
                        number_nodes += 1;
                    }
                }
                prev_lid = node.lid;
            }
            if number_nodes >= 2 {
                return FilterResult::Bad;
            }
        }

        FilterResult::Good
    }

    /// Suggestion-filter screening for prediction and suggestion requests.
    fn check_request_type(
        &self,
        request: &ConversionRequest,
        original_key: &str,
        candidate: &Candidate,
        nodes: &[NodeId],
        lattice: &Lattice,
    ) -> FilterResult {
        match request.request_type {
            RequestType::Prediction if original_key == candidate.key => {
                // Prediction is explicitly triggered, and the user typed the
                // exact reading; even an unfavorable word may be what they
                // want.
                FilterResult::Good
            }
            RequestType::Prediction | RequestType::Suggestion => {
                if self.suggestion_filter.is_bad_suggestion(&candidate.value) {
                    return FilterResult::Bad;
                }
                for &id in nodes {
                    if self.suggestion_filter.is_bad_suggestion(&lattice.node(id).value) {
                        return FilterResult::Bad;
                    }
                }
                FilterResult::Good
            }
            _ => FilterResult::Good,
        }
    }
}

fn is_isolated_word_or_general_symbol(pm: &dyn PosMatcher, id: u16) -> bool {
    pm.is_isolated_word(id) || pm.is_general_symbol(id)
}

fn is_normal_or_constrained(node: Option<&Node>) -> bool {
    matches!(
        node.map(|n| n.node_type),
        Some(NodeType::Normal) | Some(NodeType::Constrained)
    )
}

/// A compound candidate is exactly one dictionary entry whose connection
/// ids differ; multi-node compounds are handled by the weak-compound rules.
fn is_compound_candidate(nodes: &[NodeId], lattice: &Lattice) -> bool {
    nodes.len() == 1 && {
        let node = lattice.node(nodes[0]);
        node.lid != node.rid
    }
}

/// Weak compounds are "prefix + content" shapes. A *noisy* weak compound
/// pairs a prefix with the wrong kind of content and is dropped as soon as
/// one good candidate exists.
fn is_noisy_weak_compound(pm: &dyn PosMatcher, nodes: &[NodeId], lattice: &Lattice) -> bool {
    if nodes.len() <= 1 {
        return false;
    }
    let first = lattice.node(nodes[0]);
    let second = lattice.node(nodes[1]);
    if first.lid != first.rid {
        // The first node is a compound dictionary entry.
        return false;
    }
    if pm.is_weak_compound_filler_prefix(first.lid) {
        // A word starting with a filler is always noise.
        return true;
    }
    if second.lid != second.rid {
        // A compound in second position is noise unless it looks like an
        // anti-phrase continuation (content noun followed by a particle
        // that may begin a segment, e.g. とともに).
        let is_possible_anti_phrase_connection = pm.is_content_noun(first.rid)
            && pm.is_acceptable_particle_at_begin_of_segment(second.lid);
        if !is_possible_anti_phrase_connection {
            return true;
        }
    }
    if pm.is_weak_compound_noun_prefix(first.lid) && !pm.is_weak_compound_noun_suffix(second.lid) {
        return true;
    }
    if pm.is_weak_compound_verb_prefix(first.lid) && !pm.is_weak_compound_verb_suffix(second.lid) {
        return true;
    }
    false
}

/// A *connected* weak compound matches prefix and content kinds; it is
/// acceptable near the top of the list but dropped once enough candidates
/// have been emitted.
fn is_connected_weak_compound(pm: &dyn PosMatcher, nodes: &[NodeId], lattice: &Lattice) -> bool {
    if nodes.len() <= 1 {
        return false;
    }
    let first = lattice.node(nodes[0]);
    let second = lattice.node(nodes[1]);
    if first.lid != first.rid || second.lid != second.rid {
        return false;
    }
    if pm.is_weak_compound_noun_prefix(first.lid) && pm.is_weak_compound_noun_suffix(second.lid) {
        return true;
    }
    if pm.is_weak_compound_verb_prefix(first.lid) && pm.is_weak_compound_verb_suffix(second.lid) {
        return true;
    }
    false
}

/// Mobile prediction filter for converted numbers in odd contexts, like
/// "にいく" → "2行く" or "しんじゅくに" → "新宿2".
fn is_noisy_number_candidate(pm: &dyn PosMatcher, nodes: &[NodeId], lattice: &Lattice) -> bool {
    let is_converted_number = |node: &Node| {
        node.lid == node.rid
            && unicode::is_script(&node.key, Script::Hiragana)
            && (pm.is_number(node.lid) || pm.is_kanji_number(node.rid))
    };
    for (i, &id) in nodes.iter().enumerate() {
        if !is_converted_number(lattice.node(id)) {
            continue;
        }
        if i + 1 < nodes.len() {
            let next = lattice.node(nodes[i + 1]);
            if !is_converted_number(next) && !pm.is_counter_suffix_word(next.lid) {
                return true;
            }
        }
        if i >= 1 && pm.is_unique_noun(lattice.node(nodes[i - 1]).rid) {
            return true;
        }
    }
    false
}
