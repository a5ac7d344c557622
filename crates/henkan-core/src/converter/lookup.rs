//! Builders that turn dictionary tokens into lattice node chains, plus the
//! synthetic character-type nodes appended after every lookup.

use crate::dict::{PosMatcher, Token, TokenCallback};
use crate::settings::settings;
use crate::unicode::{char_form, char_script, Script};

use super::node::{NodeArena, NodeAttributes, NodeId};
use super::MAX_COST;

pub(crate) const DEFAULT_NUMBER_COST: i32 = 3000;

/// Collects tokens into a bnext chain, newest first.
pub(crate) struct BaseNodeListBuilder<'a> {
    arena: &'a mut NodeArena,
    limit: isize,
    result: Option<NodeId>,
}

impl<'a> BaseNodeListBuilder<'a> {
    pub fn new(arena: &'a mut NodeArena, limit: usize) -> Self {
        Self {
            arena,
            limit: limit as isize,
            result: None,
        }
    }

    pub fn result(&self) -> Option<NodeId> {
        self.result
    }

    fn new_node_from_token(&mut self, actual_key: &str, token: &Token) -> NodeId {
        let id = self.arena.new_node();
        let node = self.arena.node_mut(id);
        node.init_from_token(token);
        node.raw_wcost = node.wcost;
        if actual_key != token.key {
            node.actual_key = actual_key.to_string();
            node.attributes |= NodeAttributes::KEY_EXPANDED;
        }
        id
    }

    fn prepend(&mut self, id: NodeId) {
        self.arena.node_mut(id).bnext = self.result;
        self.result = Some(id);
        self.limit -= 1;
    }
}

impl TokenCallback for BaseNodeListBuilder<'_> {
    fn on_token(&mut self, _key: &str, actual_key: &str, token: &Token) -> crate::dict::LookupResult {
        let id = self.new_node_from_token(actual_key, token);
        self.prepend(id);
        if self.limit <= 0 {
            crate::dict::LookupResult::Done
        } else {
            crate::dict::LookupResult::Continue
        }
    }
}

/// Prefix-lookup builder that skips token keys shorter than
/// `min_key_length`. Prediction lookups pass the cached length so repeated
/// lookups at one position only see newly reachable keys.
pub(crate) struct PrefixLookupNodeListBuilder<'a> {
    inner: BaseNodeListBuilder<'a>,
    min_key_length: usize,
    cache_enabled: bool,
}

impl<'a> PrefixLookupNodeListBuilder<'a> {
    pub fn new(arena: &'a mut NodeArena, limit: usize, min_key_length: usize, cache_enabled: bool) -> Self {
        Self {
            inner: BaseNodeListBuilder::new(arena, limit),
            min_key_length,
            cache_enabled,
        }
    }

    pub fn result(&self) -> Option<NodeId> {
        self.inner.result()
    }
}

impl TokenCallback for PrefixLookupNodeListBuilder<'_> {
    fn on_token(&mut self, _key: &str, actual_key: &str, token: &Token) -> crate::dict::LookupResult {
        if token.key.len() < self.min_key_length {
            return crate::dict::LookupResult::NextKey;
        }
        let id = self.inner.new_node_from_token(actual_key, token);
        if self.cache_enabled {
            self.inner.arena.node_mut(id).attributes |= NodeAttributes::CACHE_ENABLED;
        }
        self.inner.prepend(id);
        if self.inner.limit <= 0 {
            crate::dict::LookupResult::Done
        } else {
            crate::dict::LookupResult::Continue
        }
    }
}

/// Predictive-lookup builder. Predictive nodes complete text the user has
/// not typed yet, so they start with a base penalty and get POS-dependent
/// adjustments on top.
pub(crate) struct PredictiveNodeListBuilder<'a, 'p> {
    inner: BaseNodeListBuilder<'a>,
    pos_matcher: &'p dyn PosMatcher,
}

impl<'a, 'p> PredictiveNodeListBuilder<'a, 'p> {
    pub fn new(arena: &'a mut NodeArena, limit: usize, pos_matcher: &'p dyn PosMatcher) -> Self {
        Self {
            inner: BaseNodeListBuilder::new(arena, limit),
            pos_matcher,
        }
    }

    pub fn result(&self) -> Option<NodeId> {
        self.inner.result()
    }
}

impl TokenCallback for PredictiveNodeListBuilder<'_, '_> {
    fn on_token(&mut self, _key: &str, actual_key: &str, token: &Token) -> crate::dict::LookupResult {
        let costs = &settings().predictive_cost;
        let id = self.inner.new_node_from_token(actual_key, token);
        let (lid, rid) = {
            let node = self.inner.arena.node(id);
            (node.lid, node.rid)
        };

        let mut additional_cost = costs.default_penalty;
        if self.pos_matcher.is_suffix_word(rid) && self.pos_matcher.is_suffix_word(lid) {
            additional_cost -= costs.suffix_word_bonus;
        }
        if self.pos_matcher.is_unique_noun(rid) || self.pos_matcher.is_unique_noun(lid) {
            additional_cost += costs.unique_noun_penalty;
        }
        if self.pos_matcher.is_number(rid) || self.pos_matcher.is_number(lid) {
            additional_cost += costs.number_penalty;
        }
        self.inner.arena.node_mut(id).wcost += additional_cost;

        self.inner.prepend(id);
        if self.inner.limit <= 0 {
            crate::dict::LookupResult::Done
        } else {
            crate::dict::LookupResult::Continue
        }
    }
}

/// Maps positions of a misspelling-corrected key back to the user's
/// original key.
pub trait KeyCorrector {
    /// Corrected key suffix starting at original position `pos`, if the
    /// corrector has a correction there.
    fn corrected_prefix(&self, pos: usize) -> Option<&str>;

    /// Length in the original key corresponding to `corrected_len` bytes of
    /// the corrected key at `pos`. `None` when the span straddles a
    /// correction.
    fn original_offset(&self, pos: usize, corrected_len: usize) -> Option<usize>;

    /// Extra word cost for nodes found through the corrected key.
    fn corrected_cost_penalty(&self, key: &str) -> i32;
}

/// Creates a per-conversion [`KeyCorrector`] for a lattice key.
pub trait KeyCorrectorProvider {
    fn create(&self, key: &str, history_len: usize) -> Option<Box<dyn KeyCorrector>>;
}

/// Builder for corrected lookups. Nodes keep the *original* key slice so
/// the lattice stays aligned with what the user typed; appends in lookup
/// order.
pub(crate) struct KeyCorrectedNodeListBuilder<'a, 'c> {
    arena: &'a mut NodeArena,
    pos: usize,
    original_lookup_key: &'c str,
    corrector: &'c dyn KeyCorrector,
    result: Option<NodeId>,
    tail: Option<NodeId>,
}

impl<'a, 'c> KeyCorrectedNodeListBuilder<'a, 'c> {
    pub fn new(
        arena: &'a mut NodeArena,
        pos: usize,
        original_lookup_key: &'c str,
        corrector: &'c dyn KeyCorrector,
    ) -> Self {
        Self {
            arena,
            pos,
            original_lookup_key,
            corrector,
            result: None,
            tail: None,
        }
    }

    pub fn result(&self) -> Option<NodeId> {
        self.result
    }

    pub fn finish(self) -> Option<NodeId> {
        if let Some(tail) = self.tail {
            self.arena.node_mut(tail).bnext = None;
        }
        self.result
    }
}

impl TokenCallback for KeyCorrectedNodeListBuilder<'_, '_> {
    fn on_token(&mut self, _key: &str, _actual_key: &str, token: &Token) -> crate::dict::LookupResult {
        let offset = match self.corrector.original_offset(self.pos, token.key.len()) {
            Some(offset) if offset > 0 => offset,
            _ => return crate::dict::LookupResult::NextKey,
        };
        let id = self.arena.new_node();
        {
            let node = self.arena.node_mut(id);
            node.init_from_token(token);
            node.raw_wcost = node.wcost;
            node.key = self.original_lookup_key[self.pos..self.pos + offset].to_string();
        }
        let penalty = self.corrector.corrected_cost_penalty(&self.arena.node(id).key);
        self.arena.node_mut(id).wcost += penalty;

        match self.tail {
            None => self.result = Some(id),
            Some(tail) => self.arena.node_mut(tail).bnext = Some(id),
        }
        self.tail = Some(id);
        crate::dict::LookupResult::Continue
    }
}

/// Prepend the synthetic character-type nodes for `key_substr`:
/// a one-character node (number POS for digits, unknown otherwise), and for
/// alphabet/katakana a node spanning the longest run of the same script and
/// form. These guarantee connectivity when the dictionary has no entry.
pub(crate) fn add_character_type_nodes(
    arena: &mut NodeArena,
    key_substr: &str,
    number_id: u16,
    unknown_id: u16,
    nodes: Option<NodeId>,
) -> NodeId {
    let first_char = key_substr.chars().next().expect("non-empty lookup key");
    let first_script = char_script(first_char);
    let first_form = char_form(first_char);

    let one_char = &key_substr[..first_char.len_utf8()];
    let head = {
        let id = arena.new_node();
        let node = arena.node_mut(id);
        if first_script == Script::Number {
            node.lid = number_id;
            node.rid = number_id;
            node.wcost = DEFAULT_NUMBER_COST;
        } else {
            node.lid = unknown_id;
            node.rid = unknown_id;
            node.wcost = MAX_COST;
        }
        node.key = one_char.to_string();
        node.value = one_char.to_string();
        node.bnext = nodes;
        id
    };

    if first_script == Script::Number {
        return head;
    }
    if first_script != Script::Alphabet && first_script != Script::Katakana {
        return head;
    }

    // Span the run of identical script and form.
    let mut run_len = first_char.len_utf8();
    let mut num_chars = 1;
    for c in key_substr[first_char.len_utf8()..].chars() {
        if char_script(c) != first_script || char_form(c) != first_form {
            break;
        }
        run_len += c.len_utf8();
        num_chars += 1;
    }

    if num_chars > 1 {
        let run = &key_substr[..run_len];
        let id = arena.new_node();
        let node = arena.node_mut(id);
        node.lid = unknown_id;
        node.rid = unknown_id;
        node.wcost = MAX_COST / 2;
        node.key = run.to_string();
        node.value = run.to_string();
        node.bnext = Some(head);
        return id;
    }

    head
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dict::{LookupResult, TokenAttributes};

    fn token(key: &str, value: &str, cost: i32, lid: u16, rid: u16) -> Token {
        Token {
            key: key.to_string(),
            value: value.to_string(),
            cost,
            lid,
            rid,
            attributes: TokenAttributes::empty(),
        }
    }

    #[test]
    fn test_base_builder_prepends() {
        let mut arena = NodeArena::default();
        let mut builder = BaseNodeListBuilder::new(&mut arena, 10);
        builder.on_token("か", "か", &token("か", "蚊", 100, 1, 1));
        builder.on_token("かき", "かき", &token("かき", "柿", 200, 1, 1));
        let head = builder.result().unwrap();
        assert_eq!(arena.node(head).value, "柿");
        let second = arena.node(head).bnext.unwrap();
        assert_eq!(arena.node(second).value, "蚊");
        assert_eq!(arena.node(second).raw_wcost, 100);
    }

    #[test]
    fn test_base_builder_limit() {
        let mut arena = NodeArena::default();
        let mut builder = BaseNodeListBuilder::new(&mut arena, 1);
        let verdict = builder.on_token("か", "か", &token("か", "蚊", 100, 1, 1));
        assert_eq!(verdict, LookupResult::Done);
    }

    #[test]
    fn test_prefix_builder_min_key_length() {
        let mut arena = NodeArena::default();
        let mut builder = PrefixLookupNodeListBuilder::new(&mut arena, 10, "かき".len(), true);
        assert_eq!(
            builder.on_token("か", "か", &token("か", "蚊", 100, 1, 1)),
            LookupResult::NextKey
        );
        builder.on_token("かき", "かき", &token("かき", "柿", 200, 1, 1));
        let head = builder.result().unwrap();
        assert_eq!(arena.node(head).value, "柿");
        assert!(arena.node(head).attributes.contains(NodeAttributes::CACHE_ENABLED));
    }

    #[test]
    fn test_predictive_builder_penalties() {
        struct Pm;
        impl PosMatcher for Pm {
            fn number_id(&self) -> u16 {
                40
            }
            fn unknown_id(&self) -> u16 {
                50
            }
            fn first_name_id(&self) -> u16 {
                61
            }
            fn last_name_id(&self) -> u16 {
                60
            }
            fn is_suffix_word(&self, id: u16) -> bool {
                id == 70
            }
            fn is_number(&self, id: u16) -> bool {
                id == 40
            }
        }
        let mut arena = NodeArena::default();
        let mut builder = PredictiveNodeListBuilder::new(&mut arena, 10, &Pm);
        builder.on_token("です", "です", &token("です", "です", 100, 70, 70));
        builder.on_token("に", "に", &token("に", "2", 100, 40, 40));
        builder.on_token("か", "か", &token("か", "蚊", 100, 1, 1));

        let mut values = std::collections::HashMap::new();
        let mut cur = builder.result();
        while let Some(id) = cur {
            let node = arena.node(id);
            values.insert(node.value.clone(), node.wcost);
            cur = node.bnext;
        }
        assert_eq!(values["蚊"], 100 + 900);
        assert_eq!(values["です"], 100 + 900 - 700);
        assert_eq!(values["2"], 100 + 900 + 4000);
    }

    #[test]
    fn test_character_type_nodes_digit() {
        let mut arena = NodeArena::default();
        let head = add_character_type_nodes(&mut arena, "2かい", 40, 50, None);
        let node = arena.node(head);
        assert_eq!(node.value, "2");
        assert_eq!(node.lid, 40);
        assert_eq!(node.wcost, DEFAULT_NUMBER_COST);
        assert!(node.bnext.is_none());
    }

    #[test]
    fn test_character_type_nodes_katakana_run() {
        let mut arena = NodeArena::default();
        let head = add_character_type_nodes(&mut arena, "テストか", 40, 50, None);
        // Head is the multi-char run node, then the one-char node.
        let node = arena.node(head);
        assert_eq!(node.value, "テスト");
        assert_eq!(node.wcost, MAX_COST / 2);
        let one = arena.node(node.bnext.unwrap());
        assert_eq!(one.value, "テ");
        assert_eq!(one.wcost, MAX_COST);
    }

    #[test]
    fn test_character_type_nodes_hiragana_single() {
        let mut arena = NodeArena::default();
        let head = add_character_type_nodes(&mut arena, "かき", 40, 50, None);
        let node = arena.node(head);
        assert_eq!(node.value, "か");
        assert!(node.bnext.is_none());
    }
}
