//! Per-height vote session state machine
//!
//! A [`VoteSession`] tracks the entire voting lifetime of one block height:
//! the current view number, the current stage, and the per-view message
//! maps. Stage advancement, finalization, and view switching all live here;
//! queue draining and result publication belong to the engine.

use crate::message::{ConsensusKey, VoteMessage, VoteResultData, VoteStage};
use crate::threshold::{thresholds, Thresholds};
use pocbft_core::{Address, Hash, Timestamp, ViewNumber};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info, warn};

/// What [`VoteSession::accept_message`] did with an inbound vote
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOutcome {
    /// Newly recorded, or replaced the sender's previous message for the
    /// same view and stage
    Recorded,
    /// Identical re-delivery of an already-recorded message
    Duplicate,
    /// Dropped: stage-one vote arriving after the session finalized
    AfterFinalize,
}

/// Messages recorded for one view (one round-attempt).
///
/// Each stage keeps at most one message per sender; a later message from
/// the same sender replaces the earlier one, no history is kept.
#[derive(Debug, Clone)]
pub struct VoteRoundData {
    view_start_time: Timestamp,
    stage_one: HashMap<Address, VoteMessage>,
    stage_two: HashMap<Address, VoteMessage>,
}

impl VoteRoundData {
    fn new(view_start_time: Timestamp) -> Self {
        Self {
            view_start_time,
            stage_one: HashMap::new(),
            stage_two: HashMap::new(),
        }
    }

    /// Start time of the view (milliseconds)
    pub fn view_start_time(&self) -> Timestamp {
        self.view_start_time
    }

    /// Number of distinct senders recorded at a stage
    pub fn stage_count(&self, stage: VoteStage) -> usize {
        self.stage_map(stage).len()
    }

    fn stage_map(&self, stage: VoteStage) -> &HashMap<Address, VoteMessage> {
        match stage {
            VoteStage::One => &self.stage_one,
            VoteStage::Two => &self.stage_two,
        }
    }

    fn stage_map_mut(&mut self, stage: VoteStage) -> &mut HashMap<Address, VoteMessage> {
        match stage {
            VoteStage::One => &mut self.stage_one,
            VoteStage::Two => &mut self.stage_two,
        }
    }

    /// The payload hash with the most votes at a stage, with its count.
    /// Ties break toward the smaller hash so the answer is deterministic.
    fn leading_payload(&self, stage: VoteStage) -> Option<(Hash, usize)> {
        let mut tally: HashMap<Hash, usize> = HashMap::new();
        for msg in self.stage_map(stage).values() {
            *tally.entry(msg.payload_hash).or_insert(0) += 1;
        }
        tally
            .into_iter()
            .max_by(|(hash_a, count_a), (hash_b, count_b)| {
                count_a.cmp(count_b).then(hash_b.cmp(hash_a))
            })
    }

    /// Sorted senders whose vote at a stage references the payload
    fn voters_for(&self, stage: VoteStage, payload: &Hash) -> Vec<Address> {
        let mut voters: Vec<Address> = self
            .stage_map(stage)
            .iter()
            .filter(|(_, msg)| &msg.payload_hash == payload)
            .map(|(addr, _)| *addr)
            .collect();
        voters.sort();
        voters
    }
}

/// Mutable state for one block height's entire voting lifetime
#[derive(Debug, Clone)]
pub struct VoteSession {
    consensus_key: ConsensusKey,
    agent_count: usize,
    thresholds: Thresholds,
    round_start_time: Timestamp,
    current_view: ViewNumber,
    current_stage: VoteStage,
    view_map: BTreeMap<ViewNumber, VoteRoundData>,
    finalized: Option<VoteResultData>,
    view_switches: u64,
}

impl VoteSession {
    /// Create a session from local scheduling, i.e. the node knows it is
    /// about to vote on this height. Starts at view 0, stage one.
    pub fn new(
        consensus_key: ConsensusKey,
        agent_count: usize,
        byzantine_percent: u8,
        round_start_time: Timestamp,
    ) -> crate::ConsensusResult<Self> {
        let thresholds = thresholds(agent_count, byzantine_percent)?;
        let mut view_map = BTreeMap::new();
        view_map.insert(0, VoteRoundData::new(round_start_time));
        Ok(Self {
            consensus_key,
            agent_count,
            thresholds,
            round_start_time,
            current_view: 0,
            current_stage: VoteStage::One,
            view_map,
            finalized: None,
            view_switches: 0,
        })
    }

    /// Create a session reactively from the first valid message observed
    /// for a not-yet-seen consensus key. The view is seeded from the
    /// message and the message itself is recorded.
    pub fn from_message(
        agent_count: usize,
        byzantine_percent: u8,
        msg: VoteMessage,
    ) -> crate::ConsensusResult<Self> {
        let mut session = Self::new(
            msg.consensus_key(),
            agent_count,
            byzantine_percent,
            msg.round_start_time,
        )?;
        session.current_view = msg.vote_round;
        session.accept_message(msg);
        Ok(session)
    }

    /// Voting subject of the session
    pub fn consensus_key(&self) -> ConsensusKey {
        self.consensus_key
    }

    /// Validator-set size the thresholds were derived from
    pub fn agent_count(&self) -> usize {
        self.agent_count
    }

    /// Agreement thresholds, fixed for the session's lifetime
    pub fn thresholds(&self) -> Thresholds {
        self.thresholds
    }

    /// Start time of the round being voted on (milliseconds)
    pub fn round_start_time(&self) -> Timestamp {
        self.round_start_time
    }

    /// Currently active view number
    pub fn current_view(&self) -> ViewNumber {
        self.current_view
    }

    /// Currently active stage
    pub fn current_stage(&self) -> VoteStage {
        self.current_stage
    }

    /// Whether a view has reached stage-two quorum
    pub fn is_finalized(&self) -> bool {
        self.finalized.is_some()
    }

    /// The finalized result, if any
    pub fn result(&self) -> Option<&VoteResultData> {
        self.finalized.as_ref()
    }

    /// Number of view switches the session has performed
    pub fn view_switches(&self) -> u64 {
        self.view_switches
    }

    /// Recorded data for one view
    pub fn view_data(&self, view: ViewNumber) -> Option<&VoteRoundData> {
        self.view_map.get(&view)
    }

    /// Record one inbound vote.
    ///
    /// Stage-one votes are refused once the session has finalized, and an
    /// identical re-delivery of an already-recorded message is a no-op;
    /// both are expected under lossy-network conditions and only logged.
    /// Anything else records (or overwrites) the sender's entry for the
    /// message's view and stage.
    pub fn accept_message(&mut self, msg: VoteMessage) -> MessageOutcome {
        if self.finalized.is_some() && msg.vote_stage == VoteStage::One {
            debug!(
                key = %self.consensus_key,
                sender = %msg.sender,
                "dropping stage-one vote for finalized session"
            );
            return MessageOutcome::AfterFinalize;
        }

        let data = self
            .view_map
            .entry(msg.vote_round)
            .or_insert_with(|| VoteRoundData::new(msg.round_start_time));
        let map = data.stage_map_mut(msg.vote_stage);
        if map.get(&msg.sender) == Some(&msg) {
            debug!(
                key = %self.consensus_key,
                sender = %msg.sender,
                view = msg.vote_round,
                stage = %msg.vote_stage,
                "ignoring duplicate vote"
            );
            return MessageOutcome::Duplicate;
        }
        map.insert(msg.sender, msg);
        MessageOutcome::Recorded
    }

    /// Advance to stage two once the current view's stage-one entries
    /// reach the pass threshold on a single payload. Returns whether the
    /// stage advanced.
    pub fn try_advance_stage(&mut self) -> bool {
        if self.finalized.is_some() || self.current_stage != VoteStage::One {
            return false;
        }
        let Some(data) = self.view_map.get(&self.current_view) else {
            return false;
        };
        match data.leading_payload(VoteStage::One) {
            Some((payload, count)) if count >= self.thresholds.min_pass_count => {
                self.current_stage = VoteStage::Two;
                debug!(
                    key = %self.consensus_key,
                    view = self.current_view,
                    %payload,
                    count,
                    "stage-one quorum reached, advancing to stage two"
                );
                true
            }
            _ => false,
        }
    }

    /// Finalize once the current view's stage-two entries reach the pass
    /// threshold on a single payload. Returns the result only on the call
    /// that finalizes, so callers observe finalization exactly once.
    pub fn try_finalize(&mut self) -> Option<VoteResultData> {
        if self.finalized.is_some() || self.current_stage != VoteStage::Two {
            return None;
        }
        let data = self.view_map.get(&self.current_view)?;
        let (payload, count) = data.leading_payload(VoteStage::Two)?;
        if count < self.thresholds.min_pass_count {
            return None;
        }

        let voters = data.voters_for(VoteStage::Two, &payload);
        let result = VoteResultData {
            consensus_key: self.consensus_key,
            view: self.current_view,
            stage: VoteStage::Two,
            payload_hash: payload,
            vote_count: voters.len(),
            voters,
            view_start_time: data.view_start_time,
        };
        info!(
            key = %self.consensus_key,
            view = self.current_view,
            payload = %result.payload_hash,
            votes = result.vote_count,
            "view finalized"
        );
        self.finalized = Some(result.clone());
        Some(result)
    }

    /// Run the stage-advance and finalize checks against whatever is
    /// currently stored for the active view.
    pub fn re_evaluate(&mut self) -> Option<VoteResultData> {
        self.try_advance_stage();
        self.try_finalize()
    }

    /// Adopt an externally received stage-two result for this session.
    /// Returns false (no-op) for stage-one results or when already
    /// finalized.
    pub fn adopt_result(&mut self, result: VoteResultData) -> bool {
        if result.stage == VoteStage::One {
            warn!(key = %self.consensus_key, "refusing to adopt stage-one result");
            return false;
        }
        if self.finalized.is_some() {
            return false;
        }
        info!(
            key = %self.consensus_key,
            view = result.view,
            "adopting externally confirmed result"
        );
        self.finalized = Some(result);
        true
    }

    /// Move the session to a new view, either on timeout (`trigger_time`
    /// is `None`) or because a higher-view message arrived
    /// (`trigger_time` carries that message's round start time).
    ///
    /// All stored views are preserved. A stored entry for the target view
    /// whose start time predates the trigger is stale local state: it is
    /// discarded, replaced, and logged as a protocol anomaly.
    pub fn switch_view(
        &mut self,
        next_view: ViewNumber,
        new_view_start_time: Timestamp,
        trigger_time: Option<Timestamp>,
    ) {
        match self.view_map.get(&next_view) {
            Some(existing) => {
                if let Some(trigger) = trigger_time {
                    if existing.view_start_time < trigger {
                        warn!(
                            key = %self.consensus_key,
                            view = next_view,
                            stored = existing.view_start_time,
                            trigger,
                            "stale stored view state, replacing"
                        );
                        self.view_map
                            .insert(next_view, VoteRoundData::new(new_view_start_time));
                    }
                }
            }
            None => {
                self.view_map
                    .insert(next_view, VoteRoundData::new(new_view_start_time));
            }
        }

        info!(
            key = %self.consensus_key,
            from = self.current_view,
            to = next_view,
            "switching view"
        );
        self.current_view = next_view;
        self.current_stage = VoteStage::One;
        self.view_switches += 1;
    }

    /// Re-apply every message stored in another session for the same
    /// consensus key, typically one that accumulated in the future-vote
    /// buffer before this node reached the height.
    pub fn merge(&mut self, other: VoteSession) {
        if other.consensus_key != self.consensus_key {
            warn!(
                ours = %self.consensus_key,
                theirs = %other.consensus_key,
                "refusing to merge session for different consensus key"
            );
            return;
        }
        let mut merged = 0usize;
        for (_, data) in other.view_map {
            for msg in data.stage_one.into_values().chain(data.stage_two.into_values()) {
                if self.accept_message(msg) == MessageOutcome::Recorded {
                    merged += 1;
                }
            }
        }
        debug!(key = %self.consensus_key, merged, "merged buffered session");
    }
}
