//! Dictionary-facing interfaces consumed by the converter.
//!
//! The converter never owns dictionary storage; system, suffix and user
//! dictionaries are reached through the traits below. Lookups stream
//! [`Token`]s into a callback which decides whether traversal continues.

pub mod connection;
pub mod connection_io;

use bitflags::bitflags;

use crate::converter::request::ConversionRequest;

bitflags! {
    /// Token-level flags carried from dictionary storage into lattice nodes.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct TokenAttributes: u8 {
        const SPELLING_CORRECTION = 1 << 0;
        const USER_DICTIONARY = 1 << 1;
        const SUFFIX_DICTIONARY = 1 << 2;
    }
}

/// One dictionary entry produced by a lookup.
#[derive(Debug, Clone, Default)]
pub struct Token {
    pub key: String,
    pub value: String,
    pub cost: i32,
    pub lid: u16,
    pub rid: u16,
    pub attributes: TokenAttributes,
}

/// Traversal verdict returned by a lookup callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupResult {
    /// Keep streaming tokens.
    Continue,
    /// Skip remaining tokens for the current key, move to the next key.
    NextKey,
    /// Stop the lookup entirely.
    Done,
}

/// Receives `(key, actual_key, token)` triples from a dictionary traversal.
/// `actual_key` differs from `key` when the dictionary expanded the lookup
/// key (e.g. kana-modifier-insensitive matching).
pub trait TokenCallback {
    fn on_token(&mut self, key: &str, actual_key: &str, token: &Token) -> LookupResult;
}

/// Prefix / predictive / reverse lookup over one dictionary.
pub trait DictionaryLookup {
    /// Stream entries whose key is a prefix of `key`.
    fn lookup_prefix(&self, key: &str, request: &ConversionRequest, callback: &mut dyn TokenCallback);

    /// Stream entries whose key has `key` as a prefix.
    fn lookup_predictive(
        &self,
        key: &str,
        request: &ConversionRequest,
        callback: &mut dyn TokenCallback,
    );

    /// Stream entries whose *value* is a prefix of `key` (reading lookup).
    fn lookup_reverse(&self, key: &str, request: &ConversionRequest, callback: &mut dyn TokenCallback);

    /// Reverse lookups for every prefix of `key` are about to happen; cache
    /// what is needed to serve them. Paired with
    /// [`clear_reverse_lookup_cache`](Self::clear_reverse_lookup_cache) on
    /// every exit path.
    fn populate_reverse_lookup_cache(&self, _key: &str) {}

    fn clear_reverse_lookup_cache(&self) {}
}

/// Suppressed-entry check backed by the user dictionary.
pub trait UserDictionary {
    fn is_suppressed_entry(&self, key: &str, value: &str) -> bool;
}

/// POS-class predicates over connection ids. Implementations are generated
/// from dictionary data; the defaults make every class empty so test doubles
/// only override what they exercise.
pub trait PosMatcher {
    fn number_id(&self) -> u16;
    fn unknown_id(&self) -> u16;
    fn first_name_id(&self) -> u16;
    fn last_name_id(&self) -> u16;

    fn is_number(&self, _id: u16) -> bool {
        false
    }
    fn is_kanji_number(&self, _id: u16) -> bool {
        false
    }
    fn is_counter_suffix_word(&self, _id: u16) -> bool {
        false
    }
    fn is_unique_noun(&self, _id: u16) -> bool {
        false
    }
    fn is_functional(&self, _id: u16) -> bool {
        false
    }
    fn is_suffix_word(&self, _id: u16) -> bool {
        false
    }
    fn is_content_noun(&self, _id: u16) -> bool {
        false
    }
    fn is_pronoun(&self, _id: u16) -> bool {
        false
    }
    fn is_acceptable_particle_at_begin_of_segment(&self, _id: u16) -> bool {
        false
    }
    fn is_kagyo_ta_connection_verb(&self, _id: u16) -> bool {
        false
    }
    fn is_wagyo_renyo_connection_verb(&self, _id: u16) -> bool {
        false
    }
    fn is_te_suffix(&self, _id: u16) -> bool {
        false
    }
    fn is_verb_suffix(&self, _id: u16) -> bool {
        false
    }
    fn is_weak_compound_filler_prefix(&self, _id: u16) -> bool {
        false
    }
    fn is_weak_compound_noun_prefix(&self, _id: u16) -> bool {
        false
    }
    fn is_weak_compound_noun_suffix(&self, _id: u16) -> bool {
        false
    }
    fn is_weak_compound_verb_prefix(&self, _id: u16) -> bool {
        false
    }
    fn is_weak_compound_verb_suffix(&self, _id: u16) -> bool {
        false
    }
    fn is_isolated_word(&self, _id: u16) -> bool {
        false
    }
    fn is_general_symbol(&self, _id: u16) -> bool {
        false
    }
}

/// Coarse POS grouping used by the history-overlap lookup: a compound may
/// extend a history candidate only when both sides fall in the same group.
#[derive(Debug, Clone, Default)]
pub struct PosGroup {
    groups: Vec<u8>,
}

impl PosGroup {
    pub fn new(groups: Vec<u8>) -> Self {
        Self { groups }
    }

    pub fn group(&self, id: u16) -> u8 {
        self.groups.get(id as usize).copied().unwrap_or(0)
    }
}
