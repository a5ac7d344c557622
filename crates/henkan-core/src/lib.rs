//! Immutable kana-kanji converter core.
//!
//! Builds a word lattice from dictionary lookups, runs a cost-based Viterbi
//! search over it, then enumerates near-optimal alternatives with A* and a
//! stateful candidate filter. Dictionary backends, the segmenter rule tables
//! and POS predicates are consumed through traits; this crate owns the
//! lattice, the search and the candidate pipeline.

pub mod converter;
pub mod dict;
pub mod flat;
pub mod segmenter;
pub mod settings;
pub mod suggestion;
pub mod unicode;
