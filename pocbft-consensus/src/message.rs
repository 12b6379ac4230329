//! Vote protocol messages and identifiers

use pocbft_core::{Address, BlockNumber, Hash, PackingIndex, Timestamp, ViewNumber};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Sentinel view number marking "the final result regardless of which view
/// produced it". Its presence in the confirmed-result cache short-circuits
/// all further lookups for that consensus key.
pub const FINAL_VIEW: ViewNumber = ViewNumber::MAX;

/// Voting stage within a view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VoteStage {
    /// Pre-vote / proposal acknowledgment
    One,
    /// Pre-commit / confirmation
    Two,
}

impl fmt::Display for VoteStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VoteStage::One => write!(f, "stage-one"),
            VoteStage::Two => write!(f, "stage-two"),
        }
    }
}

/// Composite identifier of the thing being voted on: one block height and
/// the packing slot of its scheduled proposer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConsensusKey {
    /// Block height being voted on
    pub height: BlockNumber,
    /// Packing slot of the scheduled proposer within the round
    pub packing_index: PackingIndex,
}

impl ConsensusKey {
    /// Create a new consensus key
    pub fn new(height: BlockNumber, packing_index: PackingIndex) -> Self {
        Self {
            height,
            packing_index,
        }
    }
}

impl fmt::Display for ConsensusKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.height, self.packing_index)
    }
}

/// A single validator's vote for one stage of one view
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteMessage {
    /// Block height the vote belongs to
    pub round_index: BlockNumber,
    /// Packing slot of the scheduled proposer
    pub packing_index_of_round: PackingIndex,
    /// View number the vote was cast in
    pub vote_round: ViewNumber,
    /// Stage the vote was cast at
    pub vote_stage: VoteStage,
    /// Height of the block referenced by the payload
    pub block_height: BlockNumber,
    /// Start time of the round the vote belongs to (milliseconds)
    pub round_start_time: Timestamp,
    /// Packing address of the voting validator
    pub sender: Address,
    /// Hash of the block payload being voted on
    pub payload_hash: Hash,
    /// Time the vote was created (milliseconds)
    pub timestamp: Timestamp,
}

impl VoteMessage {
    /// Key of the voting subject this message belongs to
    pub fn consensus_key(&self) -> ConsensusKey {
        ConsensusKey::new(self.round_index, self.packing_index_of_round)
    }
}

/// Outcome of one finalized view: the quorum of stage-two votes that agreed
/// on a payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteResultData {
    /// Voting subject the result belongs to
    pub consensus_key: ConsensusKey,
    /// View that produced the result
    pub view: ViewNumber,
    /// Stage the quorum was reached at (always [`VoteStage::Two`])
    pub stage: VoteStage,
    /// Payload hash the quorum agreed on
    pub payload_hash: Hash,
    /// Number of matching votes
    pub vote_count: usize,
    /// Addresses of the agreeing voters, sorted
    pub voters: Vec<Address>,
    /// Start time of the view that produced the result (milliseconds)
    pub view_start_time: Timestamp,
}
