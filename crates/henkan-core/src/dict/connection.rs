//! Connection cost matrix and its Viterbi-tuned cache.

use memmap2::Mmap;

pub(super) const MAGIC: &[u8; 4] = b"HKCX";
pub(super) const VERSION: u8 = 1;
/// Fixed header: magic(4) + version(1) + num_ids(2) + resolution(2).
pub(super) const HEADER_SIZE: usize = 4 + 1 + 2 + 2;

/// Backing storage for cost data: either owned or memory-mapped.
pub(super) enum CostStorage {
    Owned(Vec<i16>),
    Mapped(Mmap),
}

/// Transition cost matrix mapping (rid, lid) → cost, where `rid` is the
/// right id of the left node and `lid` the left id of the right node.
pub struct Connector {
    pub(super) num_ids: u16,
    pub(super) resolution: u16,
    pub(super) storage: CostStorage,
}

impl Connector {
    /// Large sentinel for forbidden transitions.
    pub const INVALID_COST: i32 = 30000;

    /// Create an owned matrix. `costs` is row-major with `rid` as the row.
    pub fn new_owned(num_ids: u16, resolution: u16, costs: Vec<i16>) -> Self {
        debug_assert_eq!(costs.len(), num_ids as usize * num_ids as usize);
        Self {
            num_ids,
            resolution,
            storage: CostStorage::Owned(costs),
        }
    }

    /// Matrix with every transition at `cost` (test helper).
    pub fn uniform(num_ids: u16, cost: i16) -> Self {
        Self::new_owned(num_ids, 1, vec![cost; num_ids as usize * num_ids as usize])
    }

    pub fn transition_cost(&self, rid: u16, lid: u16) -> i32 {
        let idx = (rid as usize)
            .saturating_mul(self.num_ids as usize)
            .saturating_add(lid as usize);
        let cost = match &self.storage {
            CostStorage::Owned(costs) => costs.get(idx).copied().unwrap_or(0),
            CostStorage::Mapped(mmap) => {
                let byte_offset = HEADER_SIZE + idx * 2;
                mmap.get(byte_offset..byte_offset + 2)
                    .map(|b| i16::from_le_bytes([b[0], b[1]]))
                    .unwrap_or(0)
            }
        };
        cost as i32
    }

    pub fn num_ids(&self) -> u16 {
        self.num_ids
    }

    /// Quantization step of the stored costs. 1 means lossless.
    pub fn resolution(&self) -> u16 {
        self.resolution
    }
}

const CACHE_SIZE: usize = 2048;

/// Wrapper minimizing `Connector::transition_cost` calls inside Viterbi.
///
/// Viterbi's inner loop fixes the right node, so `rnode.lid` is constant
/// while `lnode.rid` varies. A one-dimensional array keyed by `lnode.rid`
/// caches that row slice; it is invalidated only when the right node's lid
/// changes, which is rare because nodes at one position cluster by lid.
/// Ids at or above the cache size bypass the cache; frequent POS ids are
/// small, so the hit rate stays high.
pub struct CachingConnector<'a> {
    connector: &'a Connector,
    cache: [i32; CACHE_SIZE],
    cache_lid: u16,
}

impl<'a> CachingConnector<'a> {
    pub fn new(connector: &'a Connector) -> Self {
        Self {
            connector,
            cache: [-1; CACHE_SIZE],
            cache_lid: u16::MAX,
        }
    }

    pub fn reset_if_necessary(&mut self, rnode_lid: u16) {
        if self.cache_lid != rnode_lid {
            self.cache.fill(-1);
            self.cache_lid = rnode_lid;
        }
    }

    pub fn transition_cost(&mut self, lnode_rid: u16, rnode_lid: u16) -> i32 {
        debug_assert_eq!(self.cache_lid, rnode_lid);
        if lnode_rid as usize >= CACHE_SIZE {
            return self.connector.transition_cost(lnode_rid, rnode_lid);
        }
        if self.cache[lnode_rid as usize] != -1 {
            return self.cache[lnode_rid as usize];
        }
        let cost = self.connector.transition_cost(lnode_rid, rnode_lid);
        self.cache[lnode_rid as usize] = cost;
        cost
    }
}
