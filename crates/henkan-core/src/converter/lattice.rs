//! The conversion lattice: an arena of word nodes indexed by begin and end
//! byte position.
//!
//! The lattice is created once per session and reused. `update_key` keeps
//! nodes from the unchanged key prefix alive so that incremental prediction
//! does not repeat dictionary lookups for text the user already typed.

use tracing::debug;

use super::node::{Node, NodeArena, NodeAttributes, NodeId, NodeType};

/// Extra slots past the key length, so off-the-end reads during incremental
/// updates stay in bounds.
const POSITION_SLACK: usize = 4;

#[derive(Debug, Default)]
pub struct Lattice {
    key: String,
    arena: NodeArena,
    begin_nodes: Vec<Option<NodeId>>,
    end_nodes: Vec<Option<NodeId>>,
    /// Longest key length already looked up at each position; lets
    /// prediction lookups skip token lengths they have already seen.
    cache_info: Vec<usize>,
    /// Byte offset where the conversion key starts (history before it).
    history_end_pos: usize,
}

impl Lattice {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn has_lattice(&self) -> bool {
        !self.begin_nodes.is_empty()
    }

    pub fn history_end_pos(&self) -> usize {
        self.history_end_pos
    }

    pub fn set_history_end_pos(&mut self, pos: usize) {
        self.history_end_pos = pos;
    }

    pub fn new_node(&mut self) -> NodeId {
        self.arena.new_node()
    }

    pub fn node(&self, id: NodeId) -> &Node {
        self.arena.node(id)
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        self.arena.node_mut(id)
    }

    pub fn arena(&self) -> &NodeArena {
        &self.arena
    }

    pub fn arena_mut(&mut self) -> &mut NodeArena {
        &mut self.arena
    }

    /// Head of the bnext chain of nodes starting at `pos`.
    pub fn begin_nodes(&self, pos: usize) -> Option<NodeId> {
        self.begin_nodes.get(pos).copied().flatten()
    }

    /// Head of the enext chain of nodes ending at `pos`.
    pub fn end_nodes(&self, pos: usize) -> Option<NodeId> {
        self.end_nodes.get(pos).copied().flatten()
    }

    /// The BOS node; alias of `end_nodes(0)`.
    pub fn bos_node(&self) -> Option<NodeId> {
        self.end_nodes(0)
    }

    /// The EOS node; alias of `begin_nodes(key.len())`.
    pub fn eos_node(&self) -> Option<NodeId> {
        self.begin_nodes(self.key.len())
    }

    pub fn cache_info(&self, pos: usize) -> usize {
        self.cache_info.get(pos).copied().unwrap_or(0)
    }

    pub fn set_cache_info(&mut self, pos: usize, len: usize) {
        if pos < self.cache_info.len() {
            self.cache_info[pos] = len;
        }
    }

    /// Iterate a bnext chain starting from `head`.
    pub fn bnext_iter(&self, head: Option<NodeId>) -> impl Iterator<Item = NodeId> + '_ {
        ChainIter {
            lattice: self,
            cur: head,
            next: |n: &Node| n.bnext,
        }
    }

    /// Iterate an enext chain starting from `head`.
    pub fn enext_iter(&self, head: Option<NodeId>) -> impl Iterator<Item = NodeId> + '_ {
        ChainIter {
            lattice: self,
            cur: head,
            next: |n: &Node| n.enext,
        }
    }

    pub fn clear(&mut self) {
        self.key.clear();
        self.begin_nodes.clear();
        self.end_nodes.clear();
        self.cache_info.clear();
        self.arena.clear();
        self.history_end_pos = 0;
    }

    /// Reset the lattice for `key`, installing fresh BOS and EOS sentinels.
    pub fn set_key(&mut self, key: String) {
        self.clear();
        let size = key.len();
        self.key = key;
        self.begin_nodes = vec![None; size + POSITION_SLACK];
        self.end_nodes = vec![None; size + POSITION_SLACK];
        self.cache_info = vec![0; size + POSITION_SLACK];
        let bos = self.init_bos_node(0);
        self.end_nodes[0] = Some(bos);
        let eos = self.init_eos_node(size);
        self.begin_nodes[size] = Some(eos);
    }

    fn init_bos_node(&mut self, pos: usize) -> NodeId {
        let id = self.arena.new_node();
        let node = self.arena.node_mut(id);
        node.value = "BOS".to_string();
        node.node_type = NodeType::Bos;
        node.begin_pos = pos;
        node.end_pos = pos;
        id
    }

    fn init_eos_node(&mut self, pos: usize) -> NodeId {
        let id = self.arena.new_node();
        let node = self.arena.node_mut(id);
        node.value = "EOS".to_string();
        node.node_type = NodeType::Eos;
        node.begin_pos = pos;
        node.end_pos = pos;
        id
    }

    /// Insert the bnext chain starting at `head` so that every node begins
    /// at `pos`. Each node is prepended to the enext chain of its end
    /// position; the whole chain is spliced in front of any nodes already
    /// beginning at `pos`.
    pub fn insert(&mut self, pos: usize, head: NodeId) {
        let key_len = self.key.len();
        let mut cur = Some(head);
        while let Some(id) = cur {
            let end_pos = {
                let node = self.arena.node_mut(id);
                let end_pos = (pos + node.key.len()).min(key_len);
                node.begin_pos = pos;
                node.end_pos = end_pos;
                node.prev = None;
                node.next = None;
                node.cost = 0;
                end_pos
            };
            let old_end_head = self.end_nodes[end_pos];
            let node = self.arena.node_mut(id);
            node.enext = old_end_head;
            cur = node.bnext;
            self.end_nodes[end_pos] = Some(id);
        }

        match self.begin_nodes[pos] {
            None => self.begin_nodes[pos] = Some(head),
            Some(old_head) => {
                // Splice: the chain's tail points at the previous head.
                let mut tail = head;
                while let Some(next) = self.arena.node(tail).bnext {
                    tail = next;
                }
                self.arena.node_mut(tail).bnext = Some(old_head);
                self.begin_nodes[pos] = Some(head);
            }
        }
    }

    /// Update the key in place, keeping nodes from the common prefix when
    /// that is cheaper than a full rebuild.
    pub fn update_key(&mut self, new_key: &str) {
        let common_len = common_prefix_len(&self.key, new_key);

        if common_len <= self.key.len() / 2 {
            self.set_key(new_key.to_string());
            return;
        }

        // A bloated arena means many dead nodes; rebuilding reclaims them.
        if self.arena.node_count() > self.arena.max_nodes_size() {
            self.set_key(new_key.to_string());
            return;
        }

        self.shrink_key(common_len);
        self.add_suffix(&new_key[common_len..]);
    }

    fn add_suffix(&mut self, suffix_key: &str) {
        if suffix_key.is_empty() {
            return;
        }
        let old_size = self.key.len();
        let new_size = old_size + suffix_key.len();

        self.begin_nodes.resize(new_size + POSITION_SLACK, None);
        self.end_nodes.resize(new_size + POSITION_SLACK, None);
        for slot in &mut self.begin_nodes[old_size..] {
            *slot = None;
        }
        for slot in &mut self.end_nodes[old_size + 1..] {
            *slot = None;
        }

        let bos = self.init_bos_node(0);
        self.end_nodes[0] = Some(bos);
        let eos = self.init_eos_node(new_size);
        self.begin_nodes[new_size] = Some(eos);

        self.cache_info.resize(new_size + POSITION_SLACK, 0);
        self.key.push_str(suffix_key);
    }

    /// Truncate the key to `new_len` bytes, dropping every node that ends
    /// past the new length and reinstalling EOS.
    pub fn shrink_key(&mut self, new_len: usize) {
        let old_len = self.key.len();
        debug_assert!(new_len <= old_len);
        if new_len == old_len {
            return;
        }

        for pos in 0..new_len {
            self.unlink_from_begin_chain(pos, |node| node.end_pos <= new_len);
        }

        for pos in new_len..=old_len {
            self.begin_nodes[pos] = None;
        }
        for pos in new_len + 1..=old_len {
            self.end_nodes[pos] = None;
        }
        let eos = self.init_eos_node(new_len);
        self.begin_nodes[new_len] = Some(eos);

        for pos in 0..new_len {
            self.cache_info[pos] = self.cache_info[pos].min(new_len - pos);
        }
        for slot in &mut self.cache_info[new_len..] {
            *slot = 0;
        }

        self.key.truncate(new_len);
    }

    /// Prepare reused nodes for a fresh search: cache-enabled nodes revert
    /// to their raw word cost, everything else is unlinked.
    pub fn reset_node_cost(&mut self) {
        for pos in 0..=self.key.len() {
            self.unlink_from_begin_chain(pos, |node| {
                matches!(node.node_type, NodeType::Bos | NodeType::Eos)
                    || node.attributes.contains(NodeAttributes::CACHE_ENABLED)
            });
            self.unlink_from_end_chain(pos, |node| {
                matches!(node.node_type, NodeType::Bos | NodeType::Eos)
                    || node.attributes.contains(NodeAttributes::CACHE_ENABLED)
            });
        }
        // Revert costs once, after both chains have been filtered.
        for pos in 0..=self.key.len() {
            let mut cur = self.begin_nodes(pos);
            while let Some(id) = cur {
                let node = self.arena.node_mut(id);
                if node.attributes.contains(NodeAttributes::CACHE_ENABLED) {
                    node.wcost = node.raw_wcost;
                }
                cur = node.bnext;
            }
        }
        debug!(node_count = self.arena.node_count(), "reset_node_cost");
    }

    fn unlink_from_begin_chain(&mut self, pos: usize, keep: impl Fn(&Node) -> bool) {
        let mut prev: Option<NodeId> = None;
        let mut cur = self.begin_nodes.get(pos).copied().flatten();
        while let Some(id) = cur {
            let (next, kept) = {
                let node = self.arena.node(id);
                (node.bnext, keep(node))
            };
            if kept {
                prev = Some(id);
            } else {
                match prev {
                    None => self.begin_nodes[pos] = next,
                    Some(p) => self.arena.node_mut(p).bnext = next,
                }
            }
            cur = next;
        }
    }

    fn unlink_from_end_chain(&mut self, pos: usize, keep: impl Fn(&Node) -> bool) {
        let mut prev: Option<NodeId> = None;
        let mut cur = self.end_nodes.get(pos).copied().flatten();
        while let Some(id) = cur {
            let (next, kept) = {
                let node = self.arena.node(id);
                (node.enext, keep(node))
            };
            if kept {
                prev = Some(id);
            } else {
                match prev {
                    None => self.end_nodes[pos] = next,
                    Some(p) => self.arena.node_mut(p).enext = next,
                }
            }
            cur = next;
        }
    }
}

struct ChainIter<'a> {
    lattice: &'a Lattice,
    cur: Option<NodeId>,
    next: fn(&Node) -> Option<NodeId>,
}

impl Iterator for ChainIter<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let id = self.cur?;
        self.cur = (self.next)(self.lattice.node(id));
        Some(id)
    }
}

/// Longest common prefix in bytes, aligned to character boundaries.
fn common_prefix_len(a: &str, b: &str) -> usize {
    let mut len = 0;
    for (ca, cb) in a.chars().zip(b.chars()) {
        if ca != cb {
            break;
        }
        len += ca.len_utf8();
    }
    len
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push_word(lattice: &mut Lattice, pos: usize, key: &str, value: &str) -> NodeId {
        let id = lattice.new_node();
        {
            let node = lattice.node_mut(id);
            node.key = key.to_string();
            node.value = value.to_string();
            node.bnext = None;
        }
        lattice.insert(pos, id);
        id
    }

    #[test]
    fn test_set_key_installs_sentinels() {
        let mut lattice = Lattice::default();
        lattice.set_key("きょう".to_string());
        assert!(lattice.has_lattice());
        assert_eq!(lattice.key(), "きょう");

        let bos = lattice.bos_node().unwrap();
        assert_eq!(lattice.node(bos).node_type, NodeType::Bos);
        let eos = lattice.eos_node().unwrap();
        assert_eq!(lattice.node(eos).node_type, NodeType::Eos);
        assert_eq!(lattice.node(eos).begin_pos, "きょう".len());
    }

    #[test]
    fn test_insert_links_chains() {
        let mut lattice = Lattice::default();
        lattice.set_key("きょうは".to_string());

        let kyou = push_word(&mut lattice, 0, "きょう", "今日");
        let ki = push_word(&mut lattice, 0, "き", "木");

        // Both nodes start at 0; the newer insertion becomes the head.
        let begins: Vec<NodeId> = lattice.bnext_iter(lattice.begin_nodes(0)).collect();
        assert_eq!(begins, vec![ki, kyou]);

        assert_eq!(lattice.node(kyou).begin_pos, 0);
        assert_eq!(lattice.node(kyou).end_pos, "きょう".len());
        let ends: Vec<NodeId> = lattice.enext_iter(lattice.end_nodes("きょう".len())).collect();
        assert_eq!(ends, vec![kyou]);
        let ends: Vec<NodeId> = lattice.enext_iter(lattice.end_nodes("き".len())).collect();
        assert_eq!(ends, vec![ki]);
    }

    #[test]
    fn test_insert_chain_splice() {
        let mut lattice = Lattice::default();
        lattice.set_key("かき".to_string());
        let a = push_word(&mut lattice, 0, "か", "蚊");

        // Insert a two-node chain at the same position.
        let b = lattice.new_node();
        let c = lattice.new_node();
        lattice.node_mut(b).key = "かき".to_string();
        lattice.node_mut(b).value = "柿".to_string();
        lattice.node_mut(c).key = "か".to_string();
        lattice.node_mut(c).value = "可".to_string();
        lattice.node_mut(b).bnext = Some(c);
        lattice.insert(0, b);

        let begins: Vec<NodeId> = lattice.bnext_iter(lattice.begin_nodes(0)).collect();
        assert_eq!(begins, vec![b, c, a]);
    }

    #[test]
    fn test_end_pos_clamped_to_key_length() {
        let mut lattice = Lattice::default();
        lattice.set_key("か".to_string());
        let id = push_word(&mut lattice, 0, "かき", "柿");
        assert_eq!(lattice.node(id).end_pos, "か".len());
    }

    #[test]
    fn test_update_key_keeps_common_prefix_nodes() {
        let mut lattice = Lattice::default();
        lattice.set_key("きょうはいい".to_string());
        let kyou = push_word(&mut lattice, 0, "きょう", "今日");
        push_word(&mut lattice, "きょう".len(), "はいい", "は良い");

        // Same prefix, new tail: きょうは + れ
        lattice.update_key("きょうはれ");
        assert_eq!(lattice.key(), "きょうはれ");

        // 今日 ends within the common prefix and must survive.
        let begins: Vec<NodeId> = lattice.bnext_iter(lattice.begin_nodes(0)).collect();
        assert!(begins.contains(&kyou));
        // The node spanning past the common prefix is gone.
        assert!(lattice.begin_nodes("きょう".len()).is_none());
        // EOS sits at the new length.
        let eos = lattice.eos_node().unwrap();
        assert_eq!(lattice.node(eos).node_type, NodeType::Eos);
    }

    #[test]
    fn test_update_key_short_prefix_rebuilds() {
        let mut lattice = Lattice::default();
        lattice.set_key("あいうえお".to_string());
        push_word(&mut lattice, 0, "あい", "愛");
        lattice.update_key("あかさたな");
        // LCP "あ" is <= half the old key, so everything was rebuilt.
        assert_eq!(lattice.key(), "あかさたな");
        assert!(lattice.begin_nodes(0).is_none() || {
            let head = lattice.begin_nodes(0).unwrap();
            lattice.node(head).node_type != NodeType::Normal
        });
    }

    #[test]
    fn test_shrink_key_clamps_cache_info() {
        let mut lattice = Lattice::default();
        lattice.set_key("あいうえお".to_string());
        lattice.set_cache_info(0, "あいうえお".len());
        lattice.shrink_key("あいうえ".len());
        assert_eq!(lattice.key(), "あいうえ");
        assert_eq!(lattice.cache_info(0), "あいうえ".len());
    }

    #[test]
    fn test_reset_node_cost_reverts_cached_and_drops_rest() {
        let mut lattice = Lattice::default();
        lattice.set_key("かき".to_string());

        let cached = push_word(&mut lattice, 0, "か", "蚊");
        {
            let node = lattice.node_mut(cached);
            node.attributes |= NodeAttributes::CACHE_ENABLED;
            node.raw_wcost = 500;
            node.wcost = 1400; // adjusted after lookup
        }
        let plain = push_word(&mut lattice, 0, "かき", "柿");

        lattice.reset_node_cost();

        let begins: Vec<NodeId> = lattice.bnext_iter(lattice.begin_nodes(0)).collect();
        assert!(begins.contains(&cached));
        assert!(!begins.contains(&plain));
        assert_eq!(lattice.node(cached).wcost, 500);
        // The plain node also left its end chain.
        assert!(lattice.end_nodes("かき".len()).is_none());
    }

    #[test]
    fn test_common_prefix_len_char_aligned() {
        assert_eq!(common_prefix_len("きょう", "きょは"), "きょ".len());
        assert_eq!(common_prefix_len("abc", "abd"), 2);
        assert_eq!(common_prefix_len("", "abc"), 0);
    }
}
