//! Bounded cache of finalized vote results
//!
//! Already-decided heights keep being asked about: duplicate network
//! deliveries, peers that fell behind, and the local node's own catch-up
//! path all consult this cache instead of re-running the protocol. The
//! cache is FIFO-bounded; once capacity is exceeded the oldest-inserted
//! consensus key is silently evicted.

use crate::message::{ConsensusKey, VoteResultData, VoteStage, FINAL_VIEW};
use pocbft_core::ViewNumber;
use std::collections::{BTreeMap, HashMap, VecDeque};
use tracing::{debug, warn};

/// Default number of recent consensus keys retained
pub const DEFAULT_RESULT_CACHE_CAPACITY: usize = 6;

/// FIFO-evicting map of finalized vote results
#[derive(Debug)]
pub struct ConfirmedResultCache {
    capacity: usize,
    insertion_order: VecDeque<ConsensusKey>,
    results: HashMap<ConsensusKey, BTreeMap<ViewNumber, VoteResultData>>,
}

impl ConfirmedResultCache {
    /// Create a cache retaining at most `capacity` consensus keys
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            insertion_order: VecDeque::new(),
            results: HashMap::new(),
        }
    }

    /// Record a finalized result for a key and view. Stage-one results are
    /// rejected (logged, no-op): agreement is only ever reached on
    /// stage-two evidence. Returns whether the result was stored.
    pub fn record(&mut self, key: ConsensusKey, view: ViewNumber, result: VoteResultData) -> bool {
        if result.stage == VoteStage::One {
            warn!(%key, view, "rejecting stage-one vote result");
            return false;
        }

        if !self.results.contains_key(&key) {
            self.insertion_order.push_back(key);
            if self.insertion_order.len() > self.capacity {
                if let Some(oldest) = self.insertion_order.pop_front() {
                    self.results.remove(&oldest);
                    debug!(evicted = %oldest, "result cache capacity reached");
                }
            }
        }
        self.results.entry(key).or_default().insert(view, result);
        true
    }

    /// Look up a result for a key and view. An entry under the
    /// [`FINAL_VIEW`] sentinel answers for every view.
    pub fn get(&self, key: &ConsensusKey, view: ViewNumber) -> Option<&VoteResultData> {
        let views = self.results.get(key)?;
        views.get(&FINAL_VIEW).or_else(|| views.get(&view))
    }

    /// Whether a result exists for the exact view or the final-view
    /// sentinel. Sole authority consulted before re-answering a height the
    /// node may have fallen behind on.
    pub fn has_result(&self, key: &ConsensusKey, view: ViewNumber) -> bool {
        self.get(key, view).is_some()
    }

    /// Number of consensus keys currently cached
    pub fn len(&self) -> usize {
        self.results.len()
    }

    /// Check if the cache is empty
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Drop every cached result
    pub fn clear(&mut self) {
        self.insertion_order.clear();
        self.results.clear();
    }
}

impl Default for ConfirmedResultCache {
    fn default() -> Self {
        Self::new(DEFAULT_RESULT_CACHE_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pocbft_core::Hash;

    fn create_test_result(height: u64, view: ViewNumber, stage: VoteStage) -> VoteResultData {
        VoteResultData {
            consensus_key: ConsensusKey::new(height, 1),
            view,
            stage,
            payload_hash: Hash::digest(&height.to_be_bytes()),
            vote_count: 4,
            voters: vec![],
            view_start_time: 1_000_000,
        }
    }

    #[test]
    fn test_record_and_lookup() {
        let mut cache = ConfirmedResultCache::new(4);
        let key = ConsensusKey::new(42, 1);

        assert!(!cache.has_result(&key, 0));
        assert!(cache.record(key, 0, create_test_result(42, 0, VoteStage::Two)));
        assert!(cache.has_result(&key, 0));
        assert!(!cache.has_result(&key, 1));
    }

    #[test]
    fn test_stage_one_result_rejected() {
        let mut cache = ConfirmedResultCache::new(4);
        let key = ConsensusKey::new(42, 1);

        assert!(!cache.record(key, 0, create_test_result(42, 0, VoteStage::One)));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_final_view_sentinel_answers_all_views() {
        let mut cache = ConfirmedResultCache::new(4);
        let key = ConsensusKey::new(42, 1);

        cache.record(key, FINAL_VIEW, create_test_result(42, 2, VoteStage::Two));
        assert!(cache.has_result(&key, 0));
        assert!(cache.has_result(&key, 7));
        assert_eq!(cache.get(&key, 0).unwrap().view, 2);
    }

    #[test]
    fn test_fifo_eviction() {
        let mut cache = ConfirmedResultCache::new(3);
        for height in 1..=5u64 {
            let key = ConsensusKey::new(height, 1);
            cache.record(key, 0, create_test_result(height, 0, VoteStage::Two));
        }

        assert_eq!(cache.len(), 3);
        assert!(!cache.has_result(&ConsensusKey::new(1, 1), 0));
        assert!(!cache.has_result(&ConsensusKey::new(2, 1), 0));
        assert!(cache.has_result(&ConsensusKey::new(3, 1), 0));
        assert!(cache.has_result(&ConsensusKey::new(5, 1), 0));
    }

    #[test]
    fn test_multiple_views_share_one_capacity_slot() {
        let mut cache = ConfirmedResultCache::new(2);
        let key = ConsensusKey::new(42, 1);

        cache.record(key, 0, create_test_result(42, 0, VoteStage::Two));
        cache.record(key, 1, create_test_result(42, 1, VoteStage::Two));
        assert_eq!(cache.len(), 1);
        assert!(cache.has_result(&key, 0));
        assert!(cache.has_result(&key, 1));
    }

    #[test]
    fn test_clear() {
        let mut cache = ConfirmedResultCache::new(2);
        let key = ConsensusKey::new(42, 1);
        cache.record(key, 0, create_test_result(42, 0, VoteStage::Two));
        cache.clear();
        assert!(cache.is_empty());
        assert!(!cache.has_result(&key, 0));
    }
}
