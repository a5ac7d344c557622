//! The immutable converter: lattice construction, search and candidate
//! packaging for one conversion request.
//!
//! "Immutable" means stateless across calls: everything the converter needs
//! arrives through [`Modules`] and the per-call [`Segments`], and nothing it
//! learns is written back anywhere. The lattice cached inside `Segments` is
//! purely an optimization for incremental prediction.

pub mod candidate_filter;
pub mod lattice;
pub mod lookup;
pub mod nbest;
pub mod node;
pub mod request;
pub mod segments;

mod resegment;
mod viterbi;

#[cfg(test)]
pub(crate) mod testutil;
#[cfg(test)]
mod tests;

use tracing::{debug_span, warn};

use crate::dict::connection::Connector;
use crate::dict::{DictionaryLookup, PosGroup, PosMatcher, UserDictionary};
use crate::segmenter::Segmenter;
use crate::settings::settings;
use crate::suggestion::SuggestionFilter;
use crate::unicode::{self, Script};

use self::lattice::Lattice;
use self::lookup::{
    add_character_type_nodes, BaseNodeListBuilder, KeyCorrectedNodeListBuilder, KeyCorrectorProvider,
    PredictiveNodeListBuilder, PrefixLookupNodeListBuilder,
};
use self::nbest::{BoundaryCheckMode, NBestGenerator, NBestOptions};
use self::node::{NodeAttributes, NodeId, NodeType};
use self::request::{ConversionRequest, RequestType};
use self::segments::{Candidate, CandidateAttributes, Segment, SegmentType, Segments};

pub(crate) const MAX_COST: i32 = 32767;
pub(crate) const MIN_COST: i32 = -32767;
/// Reasonably big cost; new costs are still computed on top of it, so it
/// must stay far from `i32::MAX`.
pub(crate) const VERY_BIG_COST: i32 = i32::MAX >> 2;
/// Transition cost of violating a `constrained_prev` link.
pub(crate) const INVALID_PENALTY_COST: i32 = 100_000;

const MAX_SEGMENTS_SIZE: usize = 256;
const MAX_CHAR_LENGTH: usize = 1024;
/// 200 characters in UTF-8.
const MAX_CHAR_LENGTH_FOR_REVERSE_CONVERSION: usize = 600;

const ONLY_FIRST_SEGMENT_OFFSET: i32 = 300;
/// 500 * ln(100).
const COST_DIFF_FOR_SIMILAR_REALTIME: i32 = 2302;
/// 500 * ln(500).
const MAX_COST_DIFF_FOR_FIRST_INNER_SEGMENT: i32 = 3107;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConvertError {
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
    #[error("failed to build lattice: {0}")]
    LatticeBuildFailed(&'static str),
    #[error("shortest-path search failed")]
    SearchFailed,
}

/// Read-only collaborators of one converter instance. All of them must be
/// safe for concurrent reads; the converter itself takes no locks.
pub struct Modules<'a> {
    pub dictionary: &'a dyn DictionaryLookup,
    pub suffix_dictionary: &'a dyn DictionaryLookup,
    pub user_dictionary: &'a dyn UserDictionary,
    pub connector: &'a Connector,
    pub segmenter: &'a dyn Segmenter,
    pub pos_matcher: &'a dyn PosMatcher,
    pub pos_group: &'a PosGroup,
    pub suggestion_filter: &'a SuggestionFilter,
    pub key_corrector: Option<&'a dyn KeyCorrectorProvider>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InsertCandidatesType {
    /// Normal conversion: one output segment per bunsetsu.
    MultiSegments,
    /// Realtime conversion: the whole path as one segment.
    SingleSegment,
    /// Append only the first segment's candidates.
    OnlyFirstSegment,
    /// Candidates built from the first inner segment of each n-best path.
    FirstInnerSegment,
}

pub struct ImmutableConverter<'a> {
    dictionary: &'a dyn DictionaryLookup,
    suffix_dictionary: &'a dyn DictionaryLookup,
    user_dictionary: &'a dyn UserDictionary,
    connector: &'a Connector,
    segmenter: &'a dyn Segmenter,
    pos_matcher: &'a dyn PosMatcher,
    pos_group: &'a PosGroup,
    suggestion_filter: &'a SuggestionFilter,
    key_corrector: Option<&'a dyn KeyCorrectorProvider>,

    pub(crate) first_name_id: u16,
    pub(crate) last_name_id: u16,
    number_id: u16,
    unknown_id: u16,
    pub(crate) last_to_first_name_transition_cost: i32,
}

impl<'a> ImmutableConverter<'a> {
    pub fn new(modules: Modules<'a>) -> Self {
        let first_name_id = modules.pos_matcher.first_name_id();
        let last_name_id = modules.pos_matcher.last_name_id();
        Self {
            dictionary: modules.dictionary,
            suffix_dictionary: modules.suffix_dictionary,
            user_dictionary: modules.user_dictionary,
            connector: modules.connector,
            segmenter: modules.segmenter,
            pos_matcher: modules.pos_matcher,
            pos_group: modules.pos_group,
            suggestion_filter: modules.suggestion_filter,
            key_corrector: modules.key_corrector,
            first_name_id,
            last_name_id,
            number_id: modules.pos_matcher.number_id(),
            unknown_id: modules.pos_matcher.unknown_id(),
            last_to_first_name_transition_cost: modules
                .connector
                .transition_cost(last_name_id, first_name_id),
        }
    }

    pub(crate) fn segmenter(&self) -> &dyn Segmenter {
        self.segmenter
    }

    pub(crate) fn pos_matcher(&self) -> &dyn PosMatcher {
        self.pos_matcher
    }

    pub(crate) fn connector(&self) -> &Connector {
        self.connector
    }

    /// Run one conversion. On success the conversion segments are replaced
    /// with candidate lists; on failure segments are untouched except for
    /// history normalization.
    pub fn convert_for_request(
        &self,
        request: &ConversionRequest,
        segments: &mut Segments,
    ) -> Result<(), ConvertError> {
        let _span = debug_span!("convert_for_request", ?request.request_type).entered();
        let is_prediction = request.is_prediction();

        let mut lattice = self.get_lattice(segments, is_prediction);
        let result = self.convert_with_lattice(request, segments, &mut lattice);
        segments.put_cached_lattice(lattice);
        if let Err(err) = &result {
            warn!(%err, "conversion failed");
        }
        result
    }

    fn convert_with_lattice(
        &self,
        request: &ConversionRequest,
        segments: &mut Segments,
        lattice: &mut Lattice,
    ) -> Result<(), ConvertError> {
        self.make_lattice(request, segments, lattice)?;

        let group = make_group(segments);

        if request.is_prediction() {
            if !viterbi::prediction_viterbi(segments, lattice, self.connector) {
                return Err(ConvertError::SearchFailed);
            }
        } else if !viterbi::viterbi(segments, lattice, self.connector) {
            return Err(ConvertError::SearchFailed);
        }

        self.make_segments(request, lattice, &group, segments);
        Ok(())
    }

    /// Reuse the cached lattice only for incremental prediction over the
    /// same history; anything else starts clean. Even an unchanged key must
    /// be rebuilt when the history position moved (partial submission).
    fn get_lattice(&self, segments: &mut Segments, is_prediction: bool) -> Lattice {
        let mut lattice = segments.take_cached_lattice();

        let history_key: String = segments.history_segments().iter().map(|s| s.key.as_str()).collect();
        let conversion_key: String = segments
            .conversion_segments()
            .iter()
            .map(|s| s.key.as_str())
            .collect();

        if !is_prediction
            || unicode::chars_len(&conversion_key) <= 1
            || lattice.history_end_pos() != history_key.len()
        {
            lattice.clear();
        }
        lattice
    }

    fn make_lattice(
        &self,
        request: &ConversionRequest,
        segments: &mut Segments,
        lattice: &mut Lattice,
    ) -> Result<(), ConvertError> {
        if segments.segments_size() >= MAX_SEGMENTS_SIZE {
            return Err(ConvertError::InvalidInput("too many segments"));
        }

        normalize_history_segments(segments);

        if segments.history_segments().iter().any(|s| s.key.is_empty()) {
            return Err(ConvertError::InvalidInput("history segment has an empty key"));
        }

        let is_reverse = request.is_reverse();
        let is_prediction = request.is_prediction();

        // Reverse conversion and prediction accept exactly one free
        // conversion segment; their output is always a single segment.
        if is_reverse || is_prediction {
            let conversion = segments.conversion_segments();
            if conversion.len() != 1 || conversion[0].segment_type != SegmentType::Free {
                return Err(ConvertError::InvalidInput(
                    "constrained request in reverse/prediction mode",
                ));
            }
        }

        let conversion_key: String = segments
            .conversion_segments()
            .iter()
            .map(|s| s.key.as_str())
            .collect();
        let max_char_len = if is_reverse {
            MAX_CHAR_LENGTH_FOR_REVERSE_CONVERSION
        } else {
            MAX_CHAR_LENGTH
        };
        if conversion_key.is_empty() || conversion_key.len() >= max_char_len {
            return Err(ConvertError::InvalidInput("conversion key is empty or too long"));
        }

        let mut history_key: String = segments
            .history_segments()
            .iter()
            .map(|s| s.key.as_str())
            .collect();
        // An overlong total is almost always stale history; dropping it is
        // better than failing the conversion.
        if history_key.len() + conversion_key.len() >= max_char_len {
            warn!("history too long, dropping history segments");
            segments.clear_history_segments();
            history_key.clear();
        }

        let key = format!("{history_key}{conversion_key}");
        lattice.update_key(&key);
        lattice.reset_node_cost();

        if is_reverse {
            // Reverse lookups per prefix are slow; prime the cache once.
            self.dictionary.populate_reverse_lookup_cache(&key);
        }

        let mut is_valid_lattice = true;
        if !self.make_lattice_nodes_for_history_segments(segments, request, lattice)
            || lattice.end_nodes(history_key.len()).is_none()
        {
            is_valid_lattice = false;
        }

        if is_valid_lattice {
            self.make_lattice_nodes_for_conversion_segments(segments, request, &history_key, lattice);
        }

        if is_reverse {
            self.dictionary.clear_reverse_lookup_cache();
        }

        // Realtime-conversion style lookups for desktop prediction; mobile
        // showed no benefit in experiments.
        if is_prediction && !request.is_mobile() {
            self.make_lattice_nodes_for_predictive_nodes(segments, request, lattice);
        }

        if !is_valid_lattice {
            return Err(ConvertError::LatticeBuildFailed("history nodes unreachable"));
        }

        if lattice.end_nodes(key.len()).is_none() {
            return Err(ConvertError::LatticeBuildFailed("no node reaches the key end"));
        }

        self.apply_prefix_suffix_penalty(&conversion_key, lattice);

        if request.request_type == RequestType::Conversion {
            self.resegment(segments, &history_key, &conversion_key, lattice);
        }

        Ok(())
    }

    /// Dictionary lookup at `begin_pos` plus the synthetic character-type
    /// nodes. The returned chain is not yet inserted into the lattice.
    pub(crate) fn lookup(
        &self,
        begin_pos: usize,
        request: &ConversionRequest,
        is_reverse: bool,
        is_prediction: bool,
        lattice: &mut Lattice,
    ) -> NodeId {
        let key_substr = lattice.key()[begin_pos..].to_string();
        let limit = lattice.arena().max_nodes_size();

        let result = if is_reverse {
            let mut builder = BaseNodeListBuilder::new(lattice.arena_mut(), limit);
            self.dictionary.lookup_reverse(&key_substr, request, &mut builder);
            builder.result()
        } else if is_prediction {
            // Only keys longer than what previous lookups saw at this
            // position can produce new nodes.
            let min_key_length = lattice.cache_info(begin_pos) + 1;
            let mut builder =
                PrefixLookupNodeListBuilder::new(lattice.arena_mut(), limit, min_key_length, true);
            self.dictionary.lookup_prefix(&key_substr, request, &mut builder);
            let result = builder.result();
            lattice.set_cache_info(begin_pos, key_substr.len());
            result
        } else {
            let mut builder = BaseNodeListBuilder::new(lattice.arena_mut(), limit);
            self.dictionary.lookup_prefix(&key_substr, request, &mut builder);
            builder.result()
        };

        add_character_type_nodes(
            lattice.arena_mut(),
            &key_substr,
            self.number_id,
            self.unknown_id,
            result,
        )
    }

    fn make_lattice_nodes_for_history_segments(
        &self,
        segments: &Segments,
        request: &ConversionRequest,
        lattice: &mut Lattice,
    ) -> bool {
        let is_reverse = request.is_reverse();
        let is_prediction = request.is_prediction();
        let history_segments_size = segments.history_segments_size();

        let mut segments_pos = 0usize;

        for s in 0..history_segments_size {
            let segment = segments.segment(s);
            if !segment.is_history() {
                warn!("inconsistent history");
                return false;
            }
            if segment.key.is_empty() || segment.candidates.is_empty() {
                warn!("invalid history: segment has no key or candidate");
                return false;
            }
            let candidate = segment.candidate(0).clone();

            // A virtual node pinning the committed value over its reading.
            let rnode = lattice.new_node();
            {
                let node = lattice.node_mut(rnode);
                node.lid = candidate.lid;
                node.rid = candidate.rid;
                node.wcost = 0;
                node.value = candidate.value.clone();
                node.key = segment.key.clone();
                node.node_type = NodeType::History;
                node.bnext = None;
            }
            lattice.insert(segments_pos, rnode);
            let rnode_key_len = lattice.node(rnode).key.len();

            // For the last history segment also offer an EOS-like variant
            // so Viterbi can choose between continuing the context and
            // starting fresh.
            if s + 1 == history_segments_size && candidate.rid != 0 {
                let rnode2 = lattice.new_node();
                {
                    let node = lattice.node_mut(rnode2);
                    node.lid = candidate.lid;
                    node.rid = 0;
                    node.wcost = 0;
                    node.value = candidate.value.clone();
                    node.key = segment.key.clone();
                    node.node_type = NodeType::History;
                    node.bnext = None;
                }
                lattice.insert(segments_pos, rnode2);
            }

            // Lookup for entries overlapping history and conversion, e.g.
            // history 及川(おいかわ) + input たくや finds 及川卓也 and
            // inserts 卓也 as a context-sensitive node. Disabled for
            // prediction where it produces noisy realtime candidates.
            if !is_prediction && s + 1 == history_segments_size {
                let head = self.lookup(segments_pos, request, is_reverse, is_prediction, lattice);
                let compounds: Vec<(String, String, u16, u16, i32)> = lattice
                    .bnext_iter(Some(head))
                    .map(|id| {
                        let n = lattice.node(id);
                        (n.key.clone(), n.value.clone(), n.lid, n.rid, n.wcost)
                    })
                    .collect();
                for (c_key, c_value, c_lid, c_rid, c_wcost) in compounds {
                    if c_key.len() <= segment.key.len()
                        || c_value.len() <= candidate.value.len()
                        || !c_key.starts_with(segment.key.as_str())
                        || !c_value.starts_with(candidate.value.as_str())
                    {
                        continue;
                    }
                    // Both sides must share a POS group.
                    if self.pos_group.group(candidate.lid) != self.pos_group.group(c_lid) {
                        continue;
                    }

                    let new_node = lattice.new_node();
                    {
                        let node = lattice.node_mut(new_node);
                        node.key = c_key[segment.key.len()..].to_string();
                        node.value = c_value[candidate.value.len()..].to_string();
                        node.rid = c_rid;
                        node.lid = c_lid;
                        node.node_type = NodeType::Normal;
                        node.bnext = None;
                        // Scale the compound cost by the consumed part and
                        // cancel the transition from the history.
                        node.wcost = c_wcost * candidate.value.len() as i32 / c_value.len() as i32
                            - self.connector.transition_cost(candidate.rid, c_lid);
                        node.constrained_prev = Some(rnode);
                    }
                    lattice.insert(segments_pos + rnode_key_len, new_node);
                }
            }

            segments_pos += segment.key.len();
        }
        lattice.set_history_end_pos(segments_pos);
        true
    }

    fn make_lattice_nodes_for_conversion_segments(
        &self,
        segments: &Segments,
        request: &ConversionRequest,
        history_key: &str,
        lattice: &mut Lattice,
    ) {
        let is_conversion = request.request_type == RequestType::Conversion;
        let is_reverse = request.is_reverse();
        let is_prediction = request.is_prediction();

        // The key corrector is skipped once the user moved a boundary; the
        // resize tells us the uncorrected reading is intended.
        let corrector = if is_conversion && !segments.resized && request.use_key_corrector {
            self.key_corrector
                .and_then(|provider| provider.create(lattice.key(), history_key.len()))
        } else {
            None
        };

        let key_len = lattice.key().len();
        for pos in history_key.len()..key_len {
            if lattice.end_nodes(pos).is_none() {
                continue;
            }
            let rnode = self.lookup(pos, request, is_reverse, is_prediction, lattice);

            // When the input continues committed text with a particle
            // ("はにで..."), record it so segmentation keeps the particle
            // attached.
            if !history_key.is_empty() && pos == history_key.len() {
                let chain: Vec<NodeId> = lattice.bnext_iter(Some(rnode)).collect();
                for id in chain {
                    let node = lattice.node_mut(id);
                    if node.lid == node.rid {
                        // Compounds are excluded.
                        let lid = node.lid;
                        if self.pos_matcher.is_acceptable_particle_at_begin_of_segment(lid) {
                            node.attributes |= NodeAttributes::STARTS_WITH_PARTICLE;
                        }
                    }
                }
            }

            lattice.insert(pos, rnode);
            self.insert_corrected_nodes(pos, request, corrector.as_deref(), lattice);
        }
    }

    fn insert_corrected_nodes(
        &self,
        pos: usize,
        request: &ConversionRequest,
        corrector: Option<&dyn lookup::KeyCorrector>,
        lattice: &mut Lattice,
    ) {
        let Some(corrector) = corrector else {
            return;
        };
        let Some(prefix) = corrector.corrected_prefix(pos) else {
            return;
        };
        let prefix = prefix.to_string();
        let original_key = lattice.key().to_string();

        let mut builder =
            KeyCorrectedNodeListBuilder::new(lattice.arena_mut(), pos, &original_key, corrector);
        self.dictionary.lookup_prefix(&prefix, request, &mut builder);
        if let Some(head) = builder.finish() {
            lattice.insert(pos, head);
        }
    }

    /// Predictive augmentation for long conversion keys: complete the tail
    /// of the input from the suffix and system dictionaries.
    fn make_lattice_nodes_for_predictive_nodes(
        &self,
        segments: &Segments,
        request: &ConversionRequest,
        lattice: &mut Lattice,
    ) {
        let conversion_key: String = segments
            .conversion_segments()
            .iter()
            .map(|s| s.key.as_str())
            .collect();
        debug_assert!(lattice.key().ends_with(&conversion_key));
        let char_lens: Vec<usize> = conversion_key.chars().map(|c| c.len_utf8()).collect();

        let predictive = &settings().predictive;
        if char_lens.len() < predictive.min_key_len {
            return;
        }

        let key_len = lattice.key().len();

        // Suffix dictionary: short functional tails.
        {
            let max_suffix_len = predictive.suffix_max.min(char_lens.len());
            let mut pos = key_len;
            for suffix_len in 1..=max_suffix_len {
                pos -= char_lens[char_lens.len() - suffix_len];
                let lookup_key = lattice.key()[pos..].to_string();
                let limit = lattice.arena().max_nodes_size();
                let mut builder =
                    PredictiveNodeListBuilder::new(lattice.arena_mut(), limit, self.pos_matcher);
                self.suffix_dictionary
                    .lookup_predictive(&lookup_key, request, &mut builder);
                if let Some(head) = builder.result() {
                    lattice.insert(pos, head);
                }
            }
        }

        // System dictionary: longer content-word completions.
        {
            let max_suffix_len = predictive.system_max.min(char_lens.len());
            let mut pos = key_len;
            for suffix_len in 1..=max_suffix_len {
                pos -= char_lens[char_lens.len() - suffix_len];
                if suffix_len < predictive.system_min {
                    continue;
                }
                let lookup_key = lattice.key()[pos..].to_string();
                let limit = lattice.arena().max_nodes_size();
                let mut builder =
                    PredictiveNodeListBuilder::new(lattice.arena_mut(), limit, self.pos_matcher);
                self.dictionary
                    .lookup_predictive(&lookup_key, request, &mut builder);
                if let Some(head) = builder.result() {
                    lattice.insert(pos, head);
                }
            }
        }
    }

    /// Penalize words unlikely to start the user's input at the conversion
    /// start, and words unlikely to end it at the key end. This settles
    /// 好む vs この|無 and 大|代 vs 代々 preferences.
    fn apply_prefix_suffix_penalty(&self, conversion_key: &str, lattice: &mut Lattice) {
        let key_len = lattice.key().len();
        debug_assert!(conversion_key.len() <= key_len);
        let start = key_len - conversion_key.len();

        let mut cur = lattice.begin_nodes(start);
        while let Some(id) = cur {
            let lid = lattice.node(id).lid;
            let penalty = self.segmenter.prefix_penalty(lid);
            let node = lattice.node_mut(id);
            node.wcost += penalty;
            cur = node.bnext;
        }

        let mut cur = lattice.end_nodes(key_len);
        while let Some(id) = cur {
            let rid = lattice.node(id).rid;
            let penalty = self.segmenter.suffix_penalty(rid);
            let node = lattice.node_mut(id);
            node.wcost += penalty;
            cur = node.enext;
        }
    }

    fn make_segments(
        &self,
        request: &ConversionRequest,
        lattice: &Lattice,
        group: &[u16],
        segments: &mut Segments,
    ) {
        match request.request_type {
            RequestType::Conversion | RequestType::ReverseConversion => {
                self.insert_candidates_for_conversion(request, lattice, group, segments);
            }
            _ => {
                self.insert_candidates_for_prediction(request, lattice, group, segments);
            }
        }
    }

    fn insert_candidates_for_conversion(
        &self,
        request: &ConversionRequest,
        lattice: &Lattice,
        group: &[u16],
        segments: &mut Segments,
    ) {
        // Reverse conversion needs exactly one result.
        let max_candidates_size = if request.is_reverse() {
            1
        } else {
            request.max_conversion_candidates_size
        };

        // New segments are appended after the existing conversion segments,
        // which are kept alive during insertion because the n-best
        // generator reads their boundary constraints; the old ones are
        // erased afterwards.
        let old_conversion_segments_size = segments.conversion_segments_size();
        self.insert_candidates(
            request,
            segments,
            lattice,
            group,
            max_candidates_size,
            InsertCandidatesType::MultiSegments,
        );
        if old_conversion_segments_size > 0 {
            segments.erase_segments(segments.history_segments_size(), old_conversion_segments_size);
        }
    }

    fn insert_candidates_for_prediction(
        &self,
        request: &ConversionRequest,
        lattice: &Lattice,
        group: &[u16],
        segments: &mut Segments,
    ) {
        if !request.create_partial_candidates {
            // Desktop (or mobile with a physical keyboard).
            self.insert_candidates(
                request,
                segments,
                lattice,
                group,
                request.max_conversion_candidates_size,
                InsertCandidatesType::SingleSegment,
            );
            if request.auto_partial_suggestion {
                self.insert_first_segment_to_candidates(
                    request,
                    segments,
                    lattice,
                    group,
                    request.max_conversion_candidates_size,
                    request.mixed_conversion,
                );
            }
            return;
        }

        self.insert_candidates_for_realtime_with_candidate_checker(request, lattice, group, segments);
    }

    /// Mobile realtime conversion: a handful of whole-path candidates, then
    /// partial candidates built from the first inner segment of each n-best
    /// path, checked against prefixes and cost gaps.
    fn insert_candidates_for_realtime_with_candidate_checker(
        &self,
        request: &ConversionRequest,
        lattice: &Lattice,
        group: &[u16],
        segments: &mut Segments,
    ) {
        let mut added: std::collections::HashSet<String> = std::collections::HashSet::new();
        let mut tmp_segments = segments.clone();

        {
            // Whole-path candidates.
            let realtime_top_size = settings().candidates.realtime_top_size;
            self.insert_candidates(
                request,
                &mut tmp_segments,
                lattice,
                group,
                realtime_top_size,
                InsertCandidatesType::SingleSegment,
            );
            if tmp_segments.conversion_segments_size() == 0
                || tmp_segments.conversion_segment(0).candidates.is_empty()
            {
                return;
            }
            let top_cand = tmp_segments.conversion_segment(0).candidate(0).clone();
            let top_boundary = boundary_key_info(&top_cand);
            // Similar candidates share the top candidate's segmentation;
            // stop adding them once the character budget runs out.
            let mut remaining_char_coverage = settings().candidates.single_segment_char_coverage;
            for (i, c) in tmp_segments.conversion_segment(0).candidates.iter().enumerate() {
                if c.cost - top_cand.cost > COST_DIFF_FOR_SIMILAR_REALTIME {
                    continue;
                }
                if i != 0 && boundary_key_info(c) == top_boundary && remaining_char_coverage < 0 {
                    continue;
                }
                added.insert(c.value.clone());
                remaining_char_coverage -= unicode::chars_len(&c.value) as i32;
                segments.conversion_segment_mut(0).candidates.push(c.clone());
            }
        }
        tmp_segments.conversion_segment_mut(0).candidates.clear();

        {
            // First-inner-segment candidates for each n-best path.
            let target_len = segments.conversion_segment(0).candidates.len();
            let budget = request
                .max_conversion_candidates_size
                .saturating_sub(target_len);
            self.insert_candidates(
                request,
                &mut tmp_segments,
                lattice,
                group,
                budget,
                InsertCandidatesType::FirstInnerSegment,
            );

            let target_key_len = segments.conversion_segment(0).key.len();
            let mut checker = FirstInnerSegmentCandidateChecker::new(
                target_key_len,
                MAX_COST_DIFF_FOR_FIRST_INNER_SEGMENT,
            );
            let candidates: Vec<Candidate> =
                tmp_segments.conversion_segment(0).candidates.clone();
            for mut c in candidates {
                if added.contains(&c.value) {
                    continue;
                }
                if c.key.len() != target_key_len {
                    // The suffix penalty only lands on nodes ending the
                    // lattice; partial candidates pay it explicitly.
                    let suffix_penalty = self.segmenter.suffix_penalty(c.rid);
                    c.wcost += suffix_penalty;
                    c.cost += suffix_penalty;
                    c.attributes |= CandidateAttributes::PARTIALLY_KEY_CONSUMED;
                    c.consumed_key_size = unicode::chars_len(&c.key);
                }
                if !checker.is_good_candidate(&c) {
                    continue;
                }
                checker.add_entry(&c);
                added.insert(c.value.clone());
                segments.conversion_segment_mut(0).candidates.push(c);
            }
        }
    }

    /// Append cost-rebased first-segment candidates after single-segment
    /// results, so "私の" can compete with "私の名前は".
    fn insert_first_segment_to_candidates(
        &self,
        request: &ConversionRequest,
        segments: &mut Segments,
        lattice: &Lattice,
        group: &[u16],
        max_candidates_size: usize,
        allow_exact: bool,
    ) {
        let only_first_segment_candidate_pos = segments.conversion_segment(0).candidates.len();
        self.insert_candidates(
            request,
            segments,
            lattice,
            group,
            max_candidates_size,
            InsertCandidatesType::OnlyFirstSegment,
        );
        if segments.conversion_segment(0).candidates.len() <= only_first_segment_candidate_pos {
            return;
        }

        // First-segment candidates are intrinsically cheaper than whole
        // sentence results; rebase their costs so the two groups merge.
        let first_segment = segments.conversion_segment(0);
        let base_cost_diff = (first_segment.candidate(0).cost
            - first_segment
                .candidate(only_first_segment_candidate_pos)
                .cost)
            .max(0);
        let base_wcost_diff = (first_segment.candidate(0).wcost
            - first_segment
                .candidate(only_first_segment_candidate_pos)
                .wcost)
            .max(0);
        let segment_key_len = first_segment.key.len();

        let segment = segments.conversion_segment_mut(0);
        let mut i = only_first_segment_candidate_pos;
        while i < segment.candidates.len() {
            let candidate = &mut segment.candidates[i];
            if candidate.key.len() >= segment_key_len {
                if allow_exact {
                    candidate.consumed_key_size = unicode::chars_len(&candidate.key);
                    i += 1;
                } else {
                    // The candidate consumed the entire key, e.g. ナノは
                    // for なのは; not a partial result at all.
                    segment.candidates.remove(i);
                }
                continue;
            }
            candidate.cost += base_cost_diff + ONLY_FIRST_SEGMENT_OFFSET;
            candidate.wcost += base_wcost_diff + ONLY_FIRST_SEGMENT_OFFSET;
            debug_assert!(!candidate
                .attributes
                .contains(CandidateAttributes::PARTIALLY_KEY_CONSUMED));
            candidate.attributes |= CandidateAttributes::PARTIALLY_KEY_CONSUMED;
            candidate.consumed_key_size = unicode::chars_len(&candidate.key);
            i += 1;
        }
    }

    fn insert_candidates(
        &self,
        request: &ConversionRequest,
        segments: &mut Segments,
        lattice: &Lattice,
        group: &[u16],
        max_candidates_size: usize,
        insert_type: InsertCandidatesType,
    ) {
        let Some(bos) = lattice.bos_node() else {
            return;
        };

        // Skip history nodes: candidates are generated for the conversion
        // range only.
        let mut prev = bos;
        let mut cur = lattice.node(bos).next;
        while let Some(id) = cur {
            let node = lattice.node(id);
            if node.next.is_some() && node.node_type == NodeType::History {
                prev = id;
                cur = node.next;
            } else {
                break;
            }
        }

        let expand_size = max_candidates_size.clamp(1, settings().candidates.max_expand);
        let is_single_segment = matches!(
            insert_type,
            InsertCandidatesType::SingleSegment | InsertCandidatesType::FirstInnerSegment
        );

        let mut nbest = NBestGenerator::new(
            self.user_dictionary,
            self.segmenter,
            self.connector,
            self.pos_matcher,
            lattice,
            self.suggestion_filter,
        );

        let original_key: String = segments
            .conversion_segments()
            .iter()
            .map(|s| s.key.as_str())
            .collect();

        let mut begin_pos: Option<usize> = None;
        let mut cur = lattice.node(prev).next;
        while let Some(node_id) = cur {
            let node = lattice.node(node_id);
            let Some(next_id) = node.next else {
                break;
            };
            if begin_pos.is_none() {
                begin_pos = Some(node.begin_pos);
            }

            if !self.is_segment_end_node(request, segments, node_id, group, is_single_segment, lattice)
            {
                cur = Some(next_id);
                continue;
            }

            let seg_idx = self.get_insert_target_segment(
                lattice,
                group,
                insert_type,
                begin_pos.expect("set above"),
                node_id,
                segments,
            );

            let mut options = NBestOptions::default();
            match insert_type {
                InsertCandidatesType::SingleSegment | InsertCandidatesType::FirstInnerSegment => {
                    // Realtime conversion.
                    options.boundary_mode = BoundaryCheckMode::OnlyEdge;
                    options.fill_inner_segment_info = true;
                }
                InsertCandidatesType::MultiSegments | InsertCandidatesType::OnlyFirstSegment => {
                    if segments.segments[seg_idx].segment_type == SegmentType::FixedBoundary {
                        // The user fixed this boundary; skip edge checks.
                        options.boundary_mode = BoundaryCheckMode::OnlyMid;
                    }
                }
            }
            if insert_type == InsertCandidatesType::FirstInnerSegment {
                options.build_from_only_first_inner_segment = true;
            }

            nbest.reset(prev, next_id, options);
            nbest.set_candidates(request, &original_key, expand_size, &mut segments.segments[seg_idx]);

            if matches!(
                insert_type,
                InsertCandidatesType::MultiSegments | InsertCandidatesType::SingleSegment
            ) {
                self.insert_dummy_candidates(&mut segments.segments[seg_idx], expand_size);
            }

            if lattice.node(node_id).node_type == NodeType::Constrained {
                segments.segments[seg_idx].segment_type = SegmentType::FixedValue;
            }

            if insert_type == InsertCandidatesType::OnlyFirstSegment {
                break;
            }
            begin_pos = None;
            prev = node_id;
            cur = Some(next_id);
        }
    }

    /// Does the best path end a segment after `node`?
    fn is_segment_end_node(
        &self,
        request: &ConversionRequest,
        segments: &Segments,
        node_id: NodeId,
        group: &[u16],
        is_single_segment: bool,
        lattice: &Lattice,
    ) -> bool {
        let node = lattice.node(node_id);
        let next_id = node.next.expect("caller checked next");
        let next = lattice.node(next_id);

        if next.node_type == NodeType::Eos {
            return true;
        }

        // Reverse conversion groups consecutive white space into one
        // segment: "ほん むりょう" → ほん | " " | むりょう.
        if request.is_reverse() {
            let this_is_ws = unicode::is_whitespace_only(&node.key);
            let next_is_ws = unicode::is_whitespace_only(&next.key);
            if this_is_ws {
                return !next_is_ws;
            }
            if next_is_ws {
                return true;
            }
        }

        let old_segment = segments.segment(group[node.begin_pos] as usize);
        // Within one caller-fixed segment no boundary may be created.
        if group[node.begin_pos] == group[next.begin_pos]
            && old_segment.segment_type == SegmentType::FixedBoundary
        {
            return false;
        }
        // Crossing into the next declared segment always ends one.
        if group[node.begin_pos] != group[next.begin_pos] {
            return true;
        }

        if node.node_type == NodeType::Constrained {
            return true;
        }

        self.segmenter.is_boundary(node, next, is_single_segment)
    }

    /// Index of the segment candidates should go into, creating it for
    /// multi-segment conversion.
    fn get_insert_target_segment(
        &self,
        lattice: &Lattice,
        group: &[u16],
        insert_type: InsertCandidatesType,
        begin_pos: usize,
        node_id: NodeId,
        segments: &mut Segments,
    ) -> usize {
        if insert_type != InsertCandidatesType::MultiSegments {
            // Realtime conversion produces exactly one segment.
            return segments.segments_size() - 1;
        }

        let node = lattice.node(node_id);
        let key = lattice.key()[begin_pos..node.end_pos].to_string();
        let segment_type = segments.segment(group[node.begin_pos] as usize).segment_type;
        segments.add_segment(Segment::new(key, segment_type));
        segments.segments_size() - 1
    }

    /// Guarantee fallback candidates: a katakana-content variant, the plain
    /// hiragana reading, and the full katakana reading.
    fn insert_dummy_candidates(&self, segment: &mut Segment, expand_size: usize) {
        let has_value = |segment: &Segment, value: &str| {
            segment.candidates.iter().any(|c| c.value == value)
        };
        let top_candidate = segment.candidates.first().cloned();
        let mut last_candidate = segment.candidates.last().cloned();

        // Katakana content + original functional suffix, e.g. サッカーの
        // for さっかーの.
        if let (Some(top), Some(last)) = (top_candidate.clone(), last_candidate.clone()) {
            let dummy_content = unicode::hiragana_to_katakana(&top.content_key);
            let dummy_value = format!("{}{}", dummy_content, top.functional_value());
            if segment.candidates.len() < expand_size
                && !top.functional_key().is_empty()
                && unicode::is_script(&top.content_key, Script::Hiragana)
                && !has_value(segment, &dummy_value)
            {
                let mut new_candidate = top.clone();
                new_candidate.content_value = dummy_content;
                new_candidate.value = dummy_value;
                new_candidate.cost = last.cost + 1;
                new_candidate.wcost = last.wcost + 1;
                new_candidate.structure_cost = last.structure_cost + 1;
                new_candidate.attributes = CandidateAttributes::empty();
                // Inner segment boundaries cannot be carried over to an
                // altered value; leave them empty.
                new_candidate.inner_segment_boundary.clear();
                last_candidate = Some(new_candidate.clone());
                segment.candidates.push(new_candidate);
            }
        }

        // The reading itself.
        if segment.candidates.is_empty()
            || (segment.candidates.len() < expand_size
                && unicode::is_script(&segment.key, Script::Hiragana)
                && !has_value(segment, &segment.key))
        {
            let mut new_candidate = last_candidate.clone().unwrap_or_default();
            new_candidate.inner_segment_boundary.clear();
            new_candidate.key = segment.key.clone();
            new_candidate.value = segment.key.clone();
            new_candidate.content_key = segment.key.clone();
            new_candidate.content_value = segment.key.clone();
            if let Some(last) = &last_candidate {
                new_candidate.cost = last.cost + 1;
                new_candidate.wcost = last.wcost + 1;
                new_candidate.structure_cost = last.structure_cost + 1;
            }
            new_candidate.attributes = CandidateAttributes::empty();
            new_candidate.consumed_key_size = 0;
            // Choosing シ for し must not make later しました become
            // シました; one-character candidates are context sensitive.
            if unicode::chars_len(&new_candidate.key) <= 1 {
                new_candidate.attributes |= CandidateAttributes::CONTEXT_SENSITIVE;
            }
            last_candidate = Some(new_candidate.clone());
            segment.candidates.push(new_candidate);
        }

        // Full katakana reading.
        let katakana_value = unicode::hiragana_to_katakana(&segment.key);
        if let Some(last) = &last_candidate {
            if !segment.candidates.is_empty()
                && segment.candidates.len() < expand_size
                && unicode::is_script(&katakana_value, Script::Katakana)
                && !has_value(segment, &katakana_value)
            {
                let mut new_candidate = Candidate {
                    key: segment.key.clone(),
                    value: katakana_value.clone(),
                    content_key: segment.key.clone(),
                    content_value: katakana_value,
                    cost: last.cost + 1,
                    wcost: last.wcost + 1,
                    structure_cost: last.structure_cost + 1,
                    lid: last.lid,
                    rid: last.rid,
                    ..Candidate::default()
                };
                if unicode::chars_len(&new_candidate.key) <= 1 {
                    new_candidate.attributes |= CandidateAttributes::CONTEXT_SENSITIVE;
                }
                segment.candidates.push(new_candidate);
            }
        }

        debug_assert!(!segment.candidates.is_empty());
    }
}

/// Position → declared-segment index, per byte, with a final sentinel.
fn make_group(segments: &Segments) -> Vec<u16> {
    let mut group = Vec::new();
    for (i, segment) in segments.segments.iter().enumerate() {
        for _ in 0..segment.key.len() {
            group.push(i as u16);
        }
    }
    group.push(segments.segments_size() as u16);
    group
}

/// Fold full-width ASCII in history to half width, and collapse pure-number
/// history values to their last digit: numbers are generative, so only the
/// last digit carries ranking signal.
fn normalize_history_segments(segments: &mut Segments) {
    for segment in segments.history_segments_mut() {
        if segment.candidates.is_empty() {
            continue;
        }
        let segment_key_len = segment.key.len();
        let candidate = &mut segment.candidates[0];
        let history_key = if candidate.key.len() > segment_key_len {
            candidate.key.clone()
        } else {
            segment.key.clone()
        };
        let mut key = unicode::full_width_ascii_to_half_width(&history_key);
        candidate.value = unicode::full_width_ascii_to_half_width(&candidate.value);
        candidate.content_value = unicode::full_width_ascii_to_half_width(&candidate.content_value);
        candidate.content_key = unicode::full_width_ascii_to_half_width(&candidate.content_key);
        candidate.key = key.clone();
        segment.key = key.clone();

        if key.len() > 1
            && key == candidate.value
            && key == candidate.content_value
            && key == candidate.content_key
            && unicode::is_script(&key, Script::Number)
        {
            if let Some(last) = key.chars().last().filter(|c| c.is_ascii_digit()) {
                key = last.to_string();
                segment.key = key.clone();
                candidate.key = key.clone();
                candidate.value = key.clone();
                candidate.content_value = key.clone();
                candidate.content_key = key;
            }
        }
    }
}

/// Inner-segment reading spans of a candidate, for spotting same-shaped
/// realtime candidates.
fn boundary_key_info(candidate: &Candidate) -> Vec<usize> {
    candidate
        .inner_segment_boundary
        .iter()
        .map(|b| b.key_len)
        .collect()
}

/// Filters first-inner-segment candidates: drops candidates whose value
/// extends an already-added prefix, and candidates too far above the best
/// kanji candidate.
struct FirstInnerSegmentCandidateChecker {
    target_key_len: usize,
    cost_max_diff: i32,
    min_cost: Option<i32>,
    added_values: Vec<String>,
}

impl FirstInnerSegmentCandidateChecker {
    fn new(target_key_len: usize, cost_max_diff: i32) -> Self {
        Self {
            target_key_len,
            cost_max_diff,
            min_cost: None,
            added_values: Vec::new(),
        }
    }

    fn is_good_candidate(&self, candidate: &Candidate) -> bool {
        if candidate.key.len() != self.target_key_len && self.is_prefix_added(&candidate.value) {
            // A longer variant of an added candidate; the single-segment
            // candidate is exempt.
            return false;
        }
        if let Some(min_cost) = self.min_cost {
            if candidate.cost - min_cost > self.cost_max_diff {
                return false;
            }
        }
        true
    }

    fn add_entry(&mut self, candidate: &Candidate) {
        self.added_values.push(candidate.value.clone());
        if unicode::contains_script(&candidate.value, Script::Kanji) {
            // Non-kanji entries can be suspiciously cheap; only kanji
            // candidates set the reference cost.
            self.min_cost = Some(match self.min_cost {
                Some(min) => min.min(candidate.cost),
                None => candidate.cost,
            });
        }
    }

    fn is_prefix_added(&self, value: &str) -> bool {
        self.added_values.iter().any(|v| value.starts_with(v.as_str()))
    }
}
