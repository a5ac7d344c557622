//! Shared mock collaborators for converter tests.

use std::cell::RefCell;
use std::collections::HashSet;

use crate::dict::connection::Connector;
use crate::dict::{
    DictionaryLookup, LookupResult, PosGroup, PosMatcher, Token, TokenAttributes, TokenCallback,
    UserDictionary,
};
use crate::segmenter::RuleSegmenter;
use crate::suggestion::SuggestionFilter;

use super::{ImmutableConverter, Modules};

// POS ids used across converter tests.
pub(crate) const NOUN: u16 = 10;
pub(crate) const PARTICLE: u16 = 20;
pub(crate) const VERB: u16 = 30;
pub(crate) const ADJECTIVE: u16 = 35;
pub(crate) const NUMBER: u16 = 40;
pub(crate) const UNKNOWN: u16 = 50;
pub(crate) const LAST_NAME: u16 = 60;
pub(crate) const FIRST_NAME: u16 = 61;
pub(crate) const SUFFIX_WORD: u16 = 70;
pub(crate) const ISOLATED_WORD: u16 = 80;
pub(crate) const GENERAL_SYMBOL: u16 = 81;
pub(crate) const NUM_POS_IDS: u16 = 100;

pub(crate) fn token(key: &str, value: &str, cost: i32, lid: u16, rid: u16) -> Token {
    Token {
        key: key.to_string(),
        value: value.to_string(),
        cost,
        lid,
        rid,
        attributes: TokenAttributes::empty(),
    }
}

/// In-memory dictionary with recorded predictive lookups.
#[derive(Default)]
pub(crate) struct TestDictionary {
    entries: Vec<(String, Vec<Token>)>,
    pub predictive_lookups: RefCell<Vec<String>>,
}

impl TestDictionary {
    pub fn new(entries: Vec<(&str, Vec<Token>)>) -> Self {
        Self {
            entries: entries
                .into_iter()
                .map(|(k, tokens)| (k.to_string(), tokens))
                .collect(),
            predictive_lookups: RefCell::new(Vec::new()),
        }
    }

    pub fn add(&mut self, key: &str, value: &str, cost: i32, lid: u16, rid: u16) {
        let tok = token(key, value, cost, lid, rid);
        if let Some((_, tokens)) = self.entries.iter_mut().find(|(k, _)| k == key) {
            tokens.push(tok);
        } else {
            self.entries.push((key.to_string(), vec![tok]));
        }
    }
}

impl DictionaryLookup for TestDictionary {
    fn lookup_prefix(
        &self,
        key: &str,
        _request: &super::request::ConversionRequest,
        callback: &mut dyn TokenCallback,
    ) {
        for (entry_key, tokens) in &self.entries {
            if !key.starts_with(entry_key.as_str()) {
                continue;
            }
            for tok in tokens {
                match callback.on_token(entry_key, entry_key, tok) {
                    LookupResult::Continue => {}
                    LookupResult::NextKey => break,
                    LookupResult::Done => return,
                }
            }
        }
    }

    fn lookup_predictive(
        &self,
        key: &str,
        _request: &super::request::ConversionRequest,
        callback: &mut dyn TokenCallback,
    ) {
        self.predictive_lookups.borrow_mut().push(key.to_string());
        for (entry_key, tokens) in &self.entries {
            if !entry_key.starts_with(key) {
                continue;
            }
            for tok in tokens {
                match callback.on_token(entry_key, entry_key, tok) {
                    LookupResult::Continue => {}
                    LookupResult::NextKey => break,
                    LookupResult::Done => return,
                }
            }
        }
    }

    fn lookup_reverse(
        &self,
        key: &str,
        _request: &super::request::ConversionRequest,
        callback: &mut dyn TokenCallback,
    ) {
        // Reverse lookup streams tokens whose surface is a prefix of `key`,
        // with reading and surface swapped.
        for (entry_key, tokens) in &self.entries {
            for tok in tokens {
                if !key.starts_with(tok.value.as_str()) {
                    continue;
                }
                let reversed = Token {
                    key: tok.value.clone(),
                    value: entry_key.clone(),
                    cost: tok.cost,
                    lid: tok.lid,
                    rid: tok.rid,
                    attributes: tok.attributes,
                };
                match callback.on_token(&reversed.key, &reversed.key, &reversed) {
                    LookupResult::Continue => {}
                    LookupResult::NextKey => break,
                    LookupResult::Done => return,
                }
            }
        }
    }
}

#[derive(Default)]
pub(crate) struct TestUserDictionary {
    pub suppressed: HashSet<(String, String)>,
}

impl UserDictionary for TestUserDictionary {
    fn is_suppressed_entry(&self, key: &str, value: &str) -> bool {
        self.suppressed.contains(&(key.to_string(), value.to_string()))
    }
}

/// Table-driven POS matcher over the test id constants.
#[derive(Default)]
pub(crate) struct TestPosMatcher;

impl PosMatcher for TestPosMatcher {
    fn number_id(&self) -> u16 {
        NUMBER
    }
    fn unknown_id(&self) -> u16 {
        UNKNOWN
    }
    fn first_name_id(&self) -> u16 {
        FIRST_NAME
    }
    fn last_name_id(&self) -> u16 {
        LAST_NAME
    }
    fn is_number(&self, id: u16) -> bool {
        id == NUMBER
    }
    fn is_functional(&self, id: u16) -> bool {
        id == PARTICLE || id == SUFFIX_WORD
    }
    fn is_suffix_word(&self, id: u16) -> bool {
        id == SUFFIX_WORD
    }
    fn is_content_noun(&self, id: u16) -> bool {
        id == NOUN
    }
    fn is_acceptable_particle_at_begin_of_segment(&self, id: u16) -> bool {
        id == PARTICLE
    }
    fn is_isolated_word(&self, id: u16) -> bool {
        id == ISOLATED_WORD
    }
    fn is_general_symbol(&self, id: u16) -> bool {
        id == GENERAL_SYMBOL
    }
}

/// Segmenter used by most converter tests: a bunsetsu ends after a particle
/// or suffix word, and between the two halves of a personal name.
pub(crate) fn test_segmenter() -> RuleSegmenter {
    let mut boundaries = Vec::new();
    for lid in [NOUN, VERB, ADJECTIVE, NUMBER, UNKNOWN, LAST_NAME] {
        boundaries.push((PARTICLE, lid));
        boundaries.push((SUFFIX_WORD, lid));
    }
    boundaries.push((LAST_NAME, FIRST_NAME));
    RuleSegmenter::new(boundaries, vec![], vec![])
}

/// Dictionary covering the common scenario words.
pub(crate) fn test_dictionary() -> TestDictionary {
    let mut dict = TestDictionary::default();
    dict.add("きょう", "今日", 3000, NOUN, NOUN);
    dict.add("きょう", "京", 4500, NOUN, NOUN);
    dict.add("は", "は", 2000, PARTICLE, PARTICLE);
    dict.add("いい", "いい", 3500, ADJECTIVE, ADJECTIVE);
    dict.add("てんき", "天気", 4000, NOUN, NOUN);
    dict.add("わたし", "私", 3000, NOUN, NOUN);
    dict.add("の", "の", 1500, PARTICLE, PARTICLE);
    dict.add("なまえ", "名前", 3200, NOUN, NOUN);
    dict.add("なかの", "中ノ", 4200, NOUN, NOUN);
    dict.add("です", "です", 2500, SUFFIX_WORD, SUFFIX_WORD);
    dict.add("しんこう", "進行", 3000, NOUN, NOUN);
    dict.add("しんこう", "信仰", 3400, NOUN, NOUN);
    dict.add("しんこう", "深耕", 3800, NOUN, NOUN);
    dict.add("する", "する", 2000, VERB, VERB);
    dict
}

/// Owns every collaborator so tests can build a converter with one call.
pub(crate) struct TestHarness {
    pub dictionary: TestDictionary,
    pub suffix_dictionary: TestDictionary,
    pub user_dictionary: TestUserDictionary,
    pub connector: Connector,
    pub segmenter: RuleSegmenter,
    pub pos_matcher: TestPosMatcher,
    pub pos_group: PosGroup,
    pub suggestion_filter: SuggestionFilter,
}

impl Default for TestHarness {
    fn default() -> Self {
        Self {
            dictionary: test_dictionary(),
            suffix_dictionary: TestDictionary::default(),
            user_dictionary: TestUserDictionary::default(),
            connector: Connector::uniform(NUM_POS_IDS, 3000),
            segmenter: test_segmenter(),
            pos_matcher: TestPosMatcher,
            pos_group: PosGroup::default(),
            suggestion_filter: SuggestionFilter::empty(),
        }
    }
}

impl TestHarness {
    pub fn converter(&self) -> ImmutableConverter<'_> {
        ImmutableConverter::new(Modules {
            dictionary: &self.dictionary,
            suffix_dictionary: &self.suffix_dictionary,
            user_dictionary: &self.user_dictionary,
            connector: &self.connector,
            segmenter: &self.segmenter,
            pos_matcher: &self.pos_matcher,
            pos_group: &self.pos_group,
            suggestion_filter: &self.suggestion_filter,
            key_corrector: None,
        })
    }
}
