//! Segments, segments' candidates, and the session-cached lattice.

use bitflags::bitflags;

use super::lattice::Lattice;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct CandidateAttributes: u32 {
        /// Depends on its neighbors; must not be moved across contexts.
        const CONTEXT_SENSITIVE = 1 << 0;
        const SPELLING_CORRECTION = 1 << 1;
        const NO_VARIANTS_EXPANSION = 1 << 2;
        const USER_DICTIONARY = 1 << 3;
        const SUFFIX_DICTIONARY = 1 << 4;
        /// Produced by realtime (single-segment) conversion.
        const REALTIME_CONVERSION = 1 << 5;
        /// Consumes only a prefix of the segment key; see
        /// `consumed_key_size`.
        const PARTIALLY_KEY_CONSUMED = 1 << 6;
    }
}

/// One content-word / functional-suffix grouping inside a single-segment
/// candidate. Lengths are in bytes of the candidate's key/value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InnerSegmentBoundary {
    pub key_len: usize,
    pub value_len: usize,
    pub content_key_len: usize,
    pub content_value_len: usize,
}

#[derive(Debug, Clone, Default)]
pub struct Candidate {
    pub key: String,
    pub value: String,
    /// Stem without trailing functional suffix; always a prefix of `key`.
    pub content_key: String,
    /// Always a prefix of `value`.
    pub content_value: String,
    pub cost: i32,
    pub wcost: i32,
    /// Sum of transition costs internal to the candidate.
    pub structure_cost: i32,
    pub lid: u16,
    pub rid: u16,
    pub attributes: CandidateAttributes,
    pub inner_segment_boundary: Vec<InnerSegmentBoundary>,
    /// Characters of the segment key consumed by a partial candidate.
    pub consumed_key_size: usize,
}

impl Candidate {
    /// Functional part of the key (after the content stem).
    pub fn functional_key(&self) -> &str {
        &self.key[self.content_key.len().min(self.key.len())..]
    }

    /// Functional part of the value.
    pub fn functional_value(&self) -> &str {
        &self.value[self.content_value.len().min(self.value.len())..]
    }

    pub fn push_inner_segment_boundary(
        &mut self,
        key_len: usize,
        value_len: usize,
        content_key_len: usize,
        content_value_len: usize,
    ) {
        self.inner_segment_boundary.push(InnerSegmentBoundary {
            key_len,
            value_len,
            content_key_len,
            content_value_len,
        });
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SegmentType {
    /// Boundary and value are both up to the converter.
    #[default]
    Free,
    /// Boundary is fixed by the user, value is free.
    FixedBoundary,
    /// Both boundary and value are fixed.
    FixedValue,
    /// Committed in a previous conversion.
    History,
    /// Submitted in this session.
    Submitted,
}

#[derive(Debug, Clone, Default)]
pub struct Segment {
    pub key: String,
    pub segment_type: SegmentType,
    pub candidates: Vec<Candidate>,
}

impl Segment {
    pub fn new(key: impl Into<String>, segment_type: SegmentType) -> Self {
        Self {
            key: key.into(),
            segment_type,
            candidates: Vec::new(),
        }
    }

    pub fn candidate(&self, i: usize) -> &Candidate {
        &self.candidates[i]
    }

    pub fn is_history(&self) -> bool {
        matches!(self.segment_type, SegmentType::History | SegmentType::Submitted)
    }
}

/// History plus conversion segments, with a lattice cached across calls so
/// incremental prediction can reuse looked-up nodes.
#[derive(Debug, Default)]
pub struct Segments {
    pub segments: Vec<Segment>,
    /// Set when the user moved a segment boundary; disables the key
    /// corrector.
    pub resized: bool,
    cached_lattice: Lattice,
}

impl Clone for Segments {
    fn clone(&self) -> Self {
        // The cached lattice is per-session scratch; clones start fresh.
        Self {
            segments: self.segments.clone(),
            resized: self.resized,
            cached_lattice: Lattice::default(),
        }
    }
}

impl Segments {
    pub fn segments_size(&self) -> usize {
        self.segments.len()
    }

    pub fn segment(&self, i: usize) -> &Segment {
        &self.segments[i]
    }

    pub fn segment_mut(&mut self, i: usize) -> &mut Segment {
        &mut self.segments[i]
    }

    /// Leading History/Submitted segments.
    pub fn history_segments_size(&self) -> usize {
        self.segments.iter().take_while(|s| s.is_history()).count()
    }

    pub fn history_segments(&self) -> &[Segment] {
        &self.segments[..self.history_segments_size()]
    }

    pub fn history_segments_mut(&mut self) -> &mut [Segment] {
        let n = self.history_segments_size();
        &mut self.segments[..n]
    }

    pub fn conversion_segments(&self) -> &[Segment] {
        &self.segments[self.history_segments_size()..]
    }

    pub fn conversion_segments_size(&self) -> usize {
        self.segments_size() - self.history_segments_size()
    }

    pub fn conversion_segment(&self, i: usize) -> &Segment {
        &self.segments[self.history_segments_size() + i]
    }

    pub fn conversion_segment_mut(&mut self, i: usize) -> &mut Segment {
        let n = self.history_segments_size();
        &mut self.segments[n + i]
    }

    pub fn add_segment(&mut self, segment: Segment) -> &mut Segment {
        self.segments.push(segment);
        self.segments.last_mut().unwrap()
    }

    pub fn erase_segments(&mut self, start: usize, count: usize) {
        let end = (start + count).min(self.segments.len());
        self.segments.drain(start..end);
    }

    pub fn clear_history_segments(&mut self) {
        let n = self.history_segments_size();
        self.segments.drain(..n);
    }

    pub(crate) fn take_cached_lattice(&mut self) -> Lattice {
        std::mem::take(&mut self.cached_lattice)
    }

    pub(crate) fn put_cached_lattice(&mut self, lattice: Lattice) {
        self.cached_lattice = lattice;
    }
}
