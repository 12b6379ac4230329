//! Buffer for votes that arrive ahead of the local node
//!
//! Out-of-order network delivery routinely hands a node votes for heights
//! or packing slots it has not locally reached. Those votes accumulate
//! here, keyed by consensus key, until the node catches up and merges the
//! buffered session into the active one.

use crate::message::{ConsensusKey, VoteMessage};
use crate::session::VoteSession;
use crate::ConsensusResult;
use pocbft_core::BlockNumber;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use tracing::debug;

/// Holds not-yet-applicable vote sessions keyed by consensus key
#[derive(Debug, Default)]
pub struct FutureVoteBuffer {
    sessions: HashMap<ConsensusKey, VoteSession>,
}

impl FutureVoteBuffer {
    /// Create an empty buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a vote for a key the node has not reached yet. A session is
    /// lazily created for an unseen key using the current session's agent
    /// count; the validator-set size is assumed stable across the small
    /// height window the buffer tolerates.
    pub fn record(
        &mut self,
        msg: VoteMessage,
        agent_count: usize,
        byzantine_percent: u8,
    ) -> ConsensusResult<()> {
        let key = msg.consensus_key();
        match self.sessions.entry(key) {
            Entry::Occupied(mut entry) => {
                entry.get_mut().accept_message(msg);
            }
            Entry::Vacant(entry) => {
                debug!(%key, "buffering vote for future session");
                entry.insert(VoteSession::from_message(
                    agent_count,
                    byzantine_percent,
                    msg,
                )?);
            }
        }
        Ok(())
    }

    /// Remove and return the buffered session for a key, if any
    pub fn take(&mut self, key: &ConsensusKey) -> Option<VoteSession> {
        self.sessions.remove(key)
    }

    /// Drop every buffered session whose height is behind the node's
    /// position; they can never become relevant again. Returns how many
    /// entries were pruned.
    pub fn prune_below(&mut self, height: BlockNumber) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|key, _| key.height >= height);
        let pruned = before - self.sessions.len();
        if pruned > 0 {
            debug!(height, pruned, "pruned stale buffered sessions");
        }
        pruned
    }

    /// Number of buffered sessions
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Check if the buffer is empty
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Drop all buffered sessions
    pub fn clear(&mut self) {
        self.sessions.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::VoteStage;
    use pocbft_core::{Address, Hash, ViewNumber};

    fn create_test_vote(height: u64, sender_seed: u8, view: ViewNumber) -> VoteMessage {
        VoteMessage {
            round_index: height,
            packing_index_of_round: 1,
            vote_round: view,
            vote_stage: VoteStage::One,
            block_height: height,
            round_start_time: 1_000_000,
            sender: Address::new([sender_seed; 20]),
            payload_hash: Hash::digest(b"payload"),
            timestamp: 1_000_100,
        }
    }

    #[test]
    fn test_record_creates_session_lazily() {
        let mut buffer = FutureVoteBuffer::new();
        assert!(buffer.is_empty());

        buffer.record(create_test_vote(50, 1, 0), 10, 34).unwrap();
        buffer.record(create_test_vote(50, 2, 0), 10, 34).unwrap();
        assert_eq!(buffer.len(), 1);

        let session = buffer.take(&ConsensusKey::new(50, 1)).unwrap();
        assert_eq!(session.view_data(0).unwrap().stage_count(VoteStage::One), 2);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_distinct_keys_get_distinct_sessions() {
        let mut buffer = FutureVoteBuffer::new();
        buffer.record(create_test_vote(50, 1, 0), 10, 34).unwrap();
        buffer.record(create_test_vote(51, 1, 0), 10, 34).unwrap();
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn test_prune_below() {
        let mut buffer = FutureVoteBuffer::new();
        for height in 48..=52 {
            buffer.record(create_test_vote(height, 1, 0), 10, 34).unwrap();
        }

        let pruned = buffer.prune_below(51);
        assert_eq!(pruned, 3);
        assert_eq!(buffer.len(), 2);
        assert!(buffer.take(&ConsensusKey::new(51, 1)).is_some());
        assert!(buffer.take(&ConsensusKey::new(50, 1)).is_none());
    }

    #[test]
    fn test_clear() {
        let mut buffer = FutureVoteBuffer::new();
        buffer.record(create_test_vote(50, 1, 0), 10, 34).unwrap();
        buffer.clear();
        assert!(buffer.is_empty());
    }
}
