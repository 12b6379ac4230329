//! Vote coordination engine
//!
//! [`ConsensusEngine`] is the single logical owner of the current
//! [`VoteSession`]. Three single-consumer worker tasks drain the stage-one,
//! stage-two, and result queues and apply every message to the shared state
//! under one lock; finalized results and outbound broadcasts are published
//! as [`ConsensusEvent`]s. The engine is instantiated once per chain and
//! shared by handle, no global state.

use crate::cache::ConfirmedResultCache;
use crate::config::PocBftConfig;
use crate::future::FutureVoteBuffer;
use crate::message::{ConsensusKey, VoteMessage, VoteResultData, VoteStage, FINAL_VIEW};
use crate::session::{MessageOutcome, VoteSession};
use crate::{ConsensusError, ConsensusResult};
use pocbft_core::{Address, BlockNumber, Hash, PackingIndex, Timestamp, ViewNumber};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Consensus events
#[derive(Debug, Clone)]
pub enum ConsensusEvent {
    /// A view reached stage-two quorum; fired once per finalized view
    Finalized {
        consensus_key: ConsensusKey,
        result: VoteResultData,
    },
    /// The current session moved to a new view
    ViewSwitched {
        consensus_key: ConsensusKey,
        view: ViewNumber,
    },
    /// A message the local node originated should be broadcast to peers
    Broadcast { message: VoteMessage },
}

/// Engine statistics for monitoring
#[derive(Debug, Clone, Copy, Default)]
pub struct EngineStats {
    /// Inbound votes pulled from the stage queues
    pub messages_processed: u64,
    /// Inbound results pulled from the result queue
    pub results_processed: u64,
    /// View switches performed across all sessions
    pub view_switches: u64,
    /// Sessions currently parked in the future-vote buffer
    pub buffered_sessions: usize,
    /// Consensus keys currently held in the confirmed-result cache
    pub confirmed_keys: usize,
}

/// State guarded by the engine's single lock. Transitions such as a
/// session switch touch the current pointer and the buffer together, so
/// they share one mutex.
struct EngineState {
    current: Option<VoteSession>,
    future: FutureVoteBuffer,
    participating: bool,
    messages_processed: u64,
    results_processed: u64,
    view_switches: u64,
}

/// Inbound queue receivers, parked until the workers are spawned
struct EngineQueues {
    stage_one_rx: mpsc::UnboundedReceiver<VoteMessage>,
    stage_two_rx: mpsc::UnboundedReceiver<VoteMessage>,
    result_rx: mpsc::UnboundedReceiver<VoteResultData>,
}

/// PoCBFT vote coordination engine
pub struct ConsensusEngine {
    /// Configuration
    config: PocBftConfig,
    /// Current session and future buffer, under the single write lock
    state: Mutex<EngineState>,
    /// Finalized results; append/evict-only, so queries use the read side
    /// without touching the engine lock
    confirmed: RwLock<ConfirmedResultCache>,
    /// Stage-one inbound queue
    stage_one_tx: mpsc::UnboundedSender<VoteMessage>,
    /// Stage-two inbound queue
    stage_two_tx: mpsc::UnboundedSender<VoteMessage>,
    /// Result inbound queue
    result_tx: mpsc::UnboundedSender<VoteResultData>,
    /// Receivers handed to the worker tasks on spawn
    queues: Mutex<Option<EngineQueues>>,
    /// Event sender for notifications
    event_sender: Mutex<Option<mpsc::UnboundedSender<ConsensusEvent>>>,
}

impl ConsensusEngine {
    /// Create a new engine
    pub fn new(config: PocBftConfig) -> ConsensusResult<Arc<Self>> {
        config.validate()?;

        let (stage_one_tx, stage_one_rx) = mpsc::unbounded_channel();
        let (stage_two_tx, stage_two_rx) = mpsc::unbounded_channel();
        let (result_tx, result_rx) = mpsc::unbounded_channel();

        Ok(Arc::new(Self {
            confirmed: RwLock::new(ConfirmedResultCache::new(config.result_cache_capacity)),
            config,
            state: Mutex::new(EngineState {
                current: None,
                future: FutureVoteBuffer::new(),
                participating: false,
                messages_processed: 0,
                results_processed: 0,
                view_switches: 0,
            }),
            stage_one_tx,
            stage_two_tx,
            result_tx,
            queues: Mutex::new(Some(EngineQueues {
                stage_one_rx,
                stage_two_rx,
                result_rx,
            })),
            event_sender: Mutex::new(None),
        }))
    }

    /// Set event sender for notifications
    pub fn set_event_sender(&self, sender: mpsc::UnboundedSender<ConsensusEvent>) {
        *self.event_sender.lock().unwrap() = Some(sender);
    }

    /// Spawn the three single-consumer worker tasks. Each queue is drained
    /// by exactly one consumer, so application order within a queue is
    /// FIFO.
    pub fn spawn_workers(self: Arc<Self>) -> ConsensusResult<()> {
        let queues = self
            .queues
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| ConsensusError::Session("workers already spawned".to_string()))?;
        let EngineQueues {
            mut stage_one_rx,
            mut stage_two_rx,
            mut result_rx,
        } = queues;

        let engine = Arc::clone(&self);
        tokio::spawn(async move {
            while let Some(msg) = stage_one_rx.recv().await {
                engine.process_vote(msg);
            }
        });

        let engine = Arc::clone(&self);
        tokio::spawn(async move {
            while let Some(msg) = stage_two_rx.recv().await {
                engine.process_vote(msg);
            }
        });

        let engine = Arc::clone(&self);
        tokio::spawn(async move {
            while let Some(result) = result_rx.recv().await {
                engine.process_result(result);
            }
        });

        Ok(())
    }

    /// Start voting fresh on a height this node scheduled locally.
    /// Returns the consensus key of the installed session.
    pub fn init_session(
        &self,
        height: BlockNumber,
        packing_index: PackingIndex,
        agent_count: usize,
        round_start_time: Timestamp,
    ) -> ConsensusResult<ConsensusKey> {
        let session = VoteSession::new(
            ConsensusKey::new(height, packing_index),
            agent_count,
            self.config.byzantine_percent,
            round_start_time,
        )?;
        Ok(self.install_session(session))
    }

    /// Start voting reactively from the first inbound message observed for
    /// an unseen height.
    pub fn init_session_from_message(
        &self,
        agent_count: usize,
        first_message: VoteMessage,
    ) -> ConsensusResult<ConsensusKey> {
        let session = VoteSession::from_message(
            agent_count,
            self.config.byzantine_percent,
            first_message,
        )?;
        Ok(self.install_session(session))
    }

    /// Feed one authenticated inbound vote. Outcomes are observed through
    /// events, not synchronously.
    pub fn submit_message(&self, stage: VoteStage, msg: VoteMessage) -> ConsensusResult<()> {
        let tx = match stage {
            VoteStage::One => &self.stage_one_tx,
            VoteStage::Two => &self.stage_two_tx,
        };
        tx.send(msg)
            .map_err(|_| ConsensusError::Session("inbound vote queue closed".to_string()))
    }

    /// Feed one externally confirmed vote result
    pub fn submit_result(&self, result: VoteResultData) -> ConsensusResult<()> {
        self.result_tx
            .send(result)
            .map_err(|_| ConsensusError::Session("inbound result queue closed".to_string()))
    }

    /// Build, broadcast, and locally apply this node's own vote for the
    /// current view.
    pub fn cast_vote(
        &self,
        sender: Address,
        stage: VoteStage,
        payload_hash: Hash,
    ) -> ConsensusResult<VoteMessage> {
        let msg = {
            let state = self.state.lock().unwrap();
            let session = state
                .current
                .as_ref()
                .ok_or_else(|| ConsensusError::Session("no active vote session".to_string()))?;
            let key = session.consensus_key();
            VoteMessage {
                round_index: key.height,
                packing_index_of_round: key.packing_index,
                vote_round: session.current_view(),
                vote_stage: stage,
                block_height: key.height,
                round_start_time: session.round_start_time(),
                sender,
                payload_hash,
                timestamp: now_millis(),
            }
        };
        self.emit(vec![ConsensusEvent::Broadcast {
            message: msg.clone(),
        }]);
        self.submit_message(stage, msg.clone())?;
        Ok(msg)
    }

    /// Timer collaborator entry point: switch to the next view when the
    /// current one failed to finalize within the configured window.
    pub fn on_view_timeout(&self) {
        let mut events = Vec::new();
        {
            let mut guard = self.state.lock().unwrap();
            let state = &mut *guard;
            if !state.participating {
                return;
            }
            let Some(session) = state.current.as_mut() else {
                return;
            };
            if session.is_finalized() {
                debug!(key = %session.consensus_key(), "view timeout after finalization, ignoring");
                return;
            }
            let current = session.current_view();
            if current >= FINAL_VIEW - 1 {
                warn!(key = %session.consensus_key(), "view number space exhausted");
                return;
            }
            let next = current + 1;
            session.switch_view(next, now_millis(), None);
            state.view_switches += 1;

            let key = session.consensus_key();
            events.push(ConsensusEvent::ViewSwitched {
                consensus_key: key,
                view: next,
            });
            if let Some(result) = session.re_evaluate() {
                self.store_result(&result);
                events.push(ConsensusEvent::Finalized {
                    consensus_key: key,
                    result,
                });
            }
        }
        self.emit(events);
    }

    /// Total reset, used when the node's validator rights are revoked.
    /// Every inbound message is dropped afterwards until a session is
    /// explicitly re-initialized.
    pub fn clear_all(&self) {
        let mut state = self.state.lock().unwrap();
        state.current = None;
        state.future.clear();
        state.participating = false;
        self.confirmed.write().unwrap().clear();
        info!("consensus state cleared, dropping inbound messages");
    }

    /// Whether a finalized result exists for the key and view (or its
    /// final-view sentinel). Read path only; never takes the engine lock.
    pub fn has_result(&self, key: &ConsensusKey, view: ViewNumber) -> bool {
        self.confirmed.read().unwrap().has_result(key, view)
    }

    /// Fetch a finalized result for the key and view, if present
    pub fn get_result(&self, key: &ConsensusKey, view: ViewNumber) -> Option<VoteResultData> {
        self.confirmed.read().unwrap().get(key, view).cloned()
    }

    /// Key of the session currently being driven
    pub fn current_key(&self) -> Option<ConsensusKey> {
        self.state
            .lock()
            .unwrap()
            .current
            .as_ref()
            .map(|s| s.consensus_key())
    }

    /// View of the session currently being driven
    pub fn current_view(&self) -> Option<ViewNumber> {
        self.state
            .lock()
            .unwrap()
            .current
            .as_ref()
            .map(|s| s.current_view())
    }

    /// Stage of the session currently being driven
    pub fn current_stage(&self) -> Option<VoteStage> {
        self.state
            .lock()
            .unwrap()
            .current
            .as_ref()
            .map(|s| s.current_stage())
    }

    /// Whether the node is participating in consensus
    pub fn is_participating(&self) -> bool {
        self.state.lock().unwrap().participating
    }

    /// Engine configuration
    pub fn config(&self) -> &PocBftConfig {
        &self.config
    }

    /// Current engine statistics
    pub fn stats(&self) -> EngineStats {
        let state = self.state.lock().unwrap();
        EngineStats {
            messages_processed: state.messages_processed,
            results_processed: state.results_processed,
            view_switches: state.view_switches,
            buffered_sessions: state.future.len(),
            confirmed_keys: self.confirmed.read().unwrap().len(),
        }
    }

    /// Install a new current session: merge anything buffered for its key,
    /// prune the buffer below its height, and re-count what was merged.
    fn install_session(&self, mut session: VoteSession) -> ConsensusKey {
        let key = session.consensus_key();
        let mut events = Vec::new();
        {
            let mut state = self.state.lock().unwrap();
            if let Some(buffered) = state.future.take(&key) {
                session.merge(buffered);
            }
            state.future.prune_below(key.height);
            if let Some(result) = session.re_evaluate() {
                self.store_result(&result);
                events.push(ConsensusEvent::Finalized {
                    consensus_key: key,
                    result,
                });
            }
            info!(%key, agent_count = session.agent_count(), "installed vote session");
            state.current = Some(session);
            state.participating = true;
        }
        self.emit(events);
        key
    }

    /// Apply one inbound vote to the shared state
    fn process_vote(&self, msg: VoteMessage) {
        let mut events = Vec::new();
        {
            let mut guard = self.state.lock().unwrap();
            let state = &mut *guard;
            if !state.participating {
                debug!("dropping inbound vote, consensus not active");
                return;
            }
            state.messages_processed += 1;

            let key = msg.consensus_key();
            match state.current.as_mut() {
                Some(session) if session.consensus_key() == key => {
                    let view = msg.vote_round;
                    let round_start = msg.round_start_time;
                    let outcome = session.accept_message(msg);
                    if outcome == MessageOutcome::Recorded {
                        if view > session.current_view()
                            && view < FINAL_VIEW
                            && !session.is_finalized()
                        {
                            session.switch_view(view, round_start, Some(round_start));
                            state.view_switches += 1;
                            events.push(ConsensusEvent::ViewSwitched {
                                consensus_key: key,
                                view,
                            });
                        }
                        if let Some(result) = session.re_evaluate() {
                            self.store_result(&result);
                            events.push(ConsensusEvent::Finalized {
                                consensus_key: key,
                                result,
                            });
                        }
                    }
                }
                Some(session) => {
                    let current_height = session.consensus_key().height;
                    let agent_count = session.agent_count();
                    if key.height < current_height {
                        debug!(%key, current_height, "dropping vote behind local height");
                    } else if let Err(e) =
                        state
                            .future
                            .record(msg, agent_count, self.config.byzantine_percent)
                    {
                        warn!(%key, error = %e, "failed to buffer future vote");
                    }
                }
                None => {
                    debug!(%key, "dropping vote, no active session");
                }
            }
        }
        self.emit(events);
    }

    /// Apply one inbound result to the shared state
    fn process_result(&self, result: VoteResultData) {
        let mut events = Vec::new();
        {
            let mut state = self.state.lock().unwrap();
            if !state.participating {
                debug!("dropping inbound result, consensus not active");
                return;
            }
            state.results_processed += 1;

            let key = result.consensus_key;
            if result.stage == VoteStage::One {
                warn!(%key, "dropping stage-one vote result");
                return;
            }
            if self.confirmed.read().unwrap().has_result(&key, result.view) {
                debug!(%key, view = result.view, "dropping already-confirmed result");
                return;
            }

            let adopted = match state.current.as_mut() {
                Some(session) if session.consensus_key() == key => {
                    session.adopt_result(result.clone())
                }
                _ => false,
            };
            if adopted {
                self.store_result(&result);
                events.push(ConsensusEvent::Finalized {
                    consensus_key: key,
                    result,
                });
            } else {
                self.confirmed
                    .write()
                    .unwrap()
                    .record(key, result.view, result);
            }
        }
        self.emit(events);
    }

    /// Record a result that finalized the local session: under its view
    /// and under the final-view sentinel, which answers every later lookup
    /// for the key.
    fn store_result(&self, result: &VoteResultData) {
        let mut confirmed = self.confirmed.write().unwrap();
        confirmed.record(result.consensus_key, result.view, result.clone());
        confirmed.record(result.consensus_key, FINAL_VIEW, result.clone());
    }

    /// Send event notifications
    fn emit(&self, events: Vec<ConsensusEvent>) {
        if events.is_empty() {
            return;
        }
        let sender = self.event_sender.lock().unwrap().clone();
        if let Some(sender) = sender {
            for event in events {
                if sender.send(event).is_err() {
                    warn!("failed to send consensus event");
                    break;
                }
            }
        }
    }
}

fn now_millis() -> Timestamp {
    chrono::Utc::now().timestamp_millis() as Timestamp
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROUND_START: Timestamp = 1_000_000;

    fn create_test_engine() -> Arc<ConsensusEngine> {
        ConsensusEngine::new(PocBftConfig::default()).unwrap()
    }

    fn create_test_vote(
        height: u64,
        sender_seed: u8,
        view: ViewNumber,
        stage: VoteStage,
        payload: Hash,
    ) -> VoteMessage {
        VoteMessage {
            round_index: height,
            packing_index_of_round: 1,
            vote_round: view,
            vote_stage: stage,
            block_height: height,
            round_start_time: ROUND_START,
            sender: Address::new([sender_seed; 20]),
            payload_hash: payload,
            timestamp: ROUND_START + sender_seed as u64,
        }
    }

    fn create_test_result(height: u64, view: ViewNumber, stage: VoteStage) -> VoteResultData {
        VoteResultData {
            consensus_key: ConsensusKey::new(height, 1),
            view,
            stage,
            payload_hash: Hash::digest(b"block"),
            vote_count: 4,
            voters: vec![],
            view_start_time: ROUND_START,
        }
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<ConsensusEvent>) -> Vec<ConsensusEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_two_stage_flow_finalizes() {
        let engine = create_test_engine();
        let (tx, mut rx) = mpsc::unbounded_channel();
        engine.set_event_sender(tx);

        let key = engine.init_session(42, 1, 10, ROUND_START).unwrap();
        assert!(engine.is_participating());
        let payload = Hash::digest(b"block");

        // min_pass_count = 4 for N=10, p=34
        for seed in 1..=4 {
            engine.process_vote(create_test_vote(42, seed, 0, VoteStage::One, payload));
        }
        assert_eq!(engine.current_stage(), Some(VoteStage::Two));

        for seed in 1..=4 {
            engine.process_vote(create_test_vote(42, seed, 0, VoteStage::Two, payload));
        }

        let finalized: Vec<_> = drain(&mut rx)
            .into_iter()
            .filter(|e| matches!(e, ConsensusEvent::Finalized { .. }))
            .collect();
        assert_eq!(finalized.len(), 1);
        assert!(engine.has_result(&key, 0));
        // Final-view sentinel answers any view
        assert!(engine.has_result(&key, 9));
    }

    #[test]
    fn test_duplicate_votes_never_double_count() {
        let engine = create_test_engine();
        engine.init_session(42, 1, 10, ROUND_START).unwrap();
        let payload = Hash::digest(b"block");

        let msg = create_test_vote(42, 1, 0, VoteStage::One, payload);
        for _ in 0..4 {
            engine.process_vote(msg.clone());
        }
        // Four deliveries of one sender's vote are one vote
        assert_eq!(engine.current_stage(), Some(VoteStage::One));
    }

    #[test]
    fn test_stage_one_only_never_finalizes() {
        let engine = create_test_engine();
        let key = engine.init_session(42, 1, 10, ROUND_START).unwrap();
        let payload = Hash::digest(b"block");

        for seed in 1..=8 {
            engine.process_vote(create_test_vote(42, seed, 0, VoteStage::One, payload));
        }
        assert!(!engine.has_result(&key, 0));
    }

    #[test]
    fn test_future_votes_survive_until_catch_up() {
        let engine = create_test_engine();
        let (tx, mut rx) = mpsc::unbounded_channel();
        engine.set_event_sender(tx);

        engine.init_session(42, 1, 10, ROUND_START).unwrap();
        let payload = Hash::digest(b"next block");

        // A full quorum for height 43 arrives while we are still at 42
        for seed in 1..=4 {
            engine.process_vote(create_test_vote(43, seed, 0, VoteStage::One, payload));
            engine.process_vote(create_test_vote(43, seed, 0, VoteStage::Two, payload));
        }
        assert_eq!(engine.stats().buffered_sessions, 1);
        drain(&mut rx);

        // Catching up merges the buffered votes and finalizes immediately
        let key = engine.init_session(43, 1, 10, ROUND_START + 10_000).unwrap();
        let finalized: Vec<_> = drain(&mut rx)
            .into_iter()
            .filter(|e| matches!(e, ConsensusEvent::Finalized { .. }))
            .collect();
        assert_eq!(finalized.len(), 1);
        assert!(engine.has_result(&key, 0));
        assert_eq!(engine.stats().buffered_sessions, 0);
    }

    #[test]
    fn test_votes_behind_height_dropped() {
        let engine = create_test_engine();
        engine.init_session(42, 1, 10, ROUND_START).unwrap();
        let payload = Hash::digest(b"old block");

        engine.process_vote(create_test_vote(41, 1, 0, VoteStage::One, payload));
        assert_eq!(engine.stats().buffered_sessions, 0);
    }

    #[test]
    fn test_view_timeout_switches_and_counts_stored_votes() {
        let engine = create_test_engine();
        let (tx, mut rx) = mpsc::unbounded_channel();
        engine.set_event_sender(tx);
        let payload = Hash::digest(b"block");

        engine.init_session(42, 1, 10, ROUND_START).unwrap();

        // Votes for view 1 of the next height arrive early and get buffered
        for seed in 1..=4 {
            engine.process_vote(create_test_vote(43, seed, 1, VoteStage::One, payload));
        }

        engine.init_session(43, 1, 10, ROUND_START + 10_000).unwrap();
        assert_eq!(engine.current_view(), Some(0));
        // Merged view-1 votes are stored but not counted at view 0
        assert_eq!(engine.current_stage(), Some(VoteStage::One));

        // Only two of four required stage-two votes for view 0
        for seed in 1..=2 {
            engine.process_vote(create_test_vote(43, seed, 0, VoteStage::Two, payload));
        }

        engine.on_view_timeout();
        assert_eq!(engine.current_view(), Some(1));
        // The stage-one votes stored for view 1 are immediately counted
        assert_eq!(engine.current_stage(), Some(VoteStage::Two));
        assert!(drain(&mut rx)
            .iter()
            .any(|e| matches!(e, ConsensusEvent::ViewSwitched { view: 1, .. })));
    }

    #[test]
    fn test_higher_view_message_switches_view() {
        let engine = create_test_engine();
        engine.init_session(42, 1, 10, ROUND_START).unwrap();
        let payload = Hash::digest(b"block");

        engine.process_vote(create_test_vote(42, 1, 3, VoteStage::One, payload));
        assert_eq!(engine.current_view(), Some(3));
        assert_eq!(engine.stats().view_switches, 1);
    }

    #[test]
    fn test_result_adoption_finalizes_current_session() {
        let engine = create_test_engine();
        let (tx, mut rx) = mpsc::unbounded_channel();
        engine.set_event_sender(tx);

        let key = engine.init_session(42, 1, 10, ROUND_START).unwrap();
        engine.process_result(create_test_result(42, 0, VoteStage::Two));

        assert!(engine.has_result(&key, 0));
        assert_eq!(
            drain(&mut rx)
                .iter()
                .filter(|e| matches!(e, ConsensusEvent::Finalized { .. }))
                .count(),
            1
        );

        // Re-delivery is answered by the cache, no second event
        engine.process_result(create_test_result(42, 0, VoteStage::Two));
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_stage_one_result_dropped() {
        let engine = create_test_engine();
        let key = engine.init_session(42, 1, 10, ROUND_START).unwrap();

        engine.process_result(create_test_result(42, 0, VoteStage::One));
        assert!(!engine.has_result(&key, 0));
    }

    #[test]
    fn test_clear_all_resets_everything() {
        let engine = create_test_engine();
        let key = engine.init_session(42, 1, 10, ROUND_START).unwrap();
        let payload = Hash::digest(b"block");

        for seed in 1..=4 {
            engine.process_vote(create_test_vote(42, seed, 0, VoteStage::One, payload));
            engine.process_vote(create_test_vote(42, seed, 0, VoteStage::Two, payload));
        }
        assert!(engine.has_result(&key, 0));

        engine.clear_all();
        assert!(!engine.is_participating());
        assert!(engine.current_key().is_none());
        assert!(!engine.has_result(&key, 0));

        // Inbound messages are dropped until a session is re-initialized
        engine.process_vote(create_test_vote(42, 5, 0, VoteStage::One, payload));
        assert_eq!(engine.stats().messages_processed, 8);
    }

    #[test]
    fn test_init_session_from_message() {
        let engine = create_test_engine();
        let payload = Hash::digest(b"block");

        let first = create_test_vote(42, 1, 2, VoteStage::One, payload);
        let key = engine.init_session_from_message(10, first).unwrap();

        assert_eq!(key, ConsensusKey::new(42, 1));
        assert_eq!(engine.current_view(), Some(2));
    }

    #[tokio::test]
    async fn test_worker_pipeline_finalizes() {
        let engine = create_test_engine();
        let (tx, mut rx) = mpsc::unbounded_channel();
        engine.set_event_sender(tx);
        engine.clone().spawn_workers().unwrap();

        let key = engine.init_session(42, 1, 10, ROUND_START).unwrap();
        let payload = Hash::digest(b"block");

        for seed in 1..=4 {
            engine
                .submit_message(
                    VoteStage::One,
                    create_test_vote(42, seed, 0, VoteStage::One, payload),
                )
                .unwrap();
        }
        for seed in 1..=4 {
            engine
                .submit_message(
                    VoteStage::Two,
                    create_test_vote(42, seed, 0, VoteStage::Two, payload),
                )
                .unwrap();
        }

        loop {
            match rx.recv().await {
                Some(ConsensusEvent::Finalized {
                    consensus_key,
                    result,
                }) => {
                    assert_eq!(consensus_key, key);
                    assert_eq!(result.vote_count, 4);
                    break;
                }
                Some(_) => continue,
                None => panic!("event channel closed before finalization"),
            }
        }
        assert!(engine.has_result(&key, 0));
    }

    #[tokio::test]
    async fn test_spawn_workers_twice_fails() {
        let engine = create_test_engine();
        assert!(engine.clone().spawn_workers().is_ok());
        assert!(engine.clone().spawn_workers().is_err());
    }

    #[tokio::test]
    async fn test_cast_vote_broadcasts_and_applies() {
        let engine = create_test_engine();
        let (tx, mut rx) = mpsc::unbounded_channel();
        engine.set_event_sender(tx);
        engine.clone().spawn_workers().unwrap();

        let key = engine.init_session(42, 1, 10, ROUND_START).unwrap();
        let payload = Hash::digest(b"block");

        for seed in 1..=4u8 {
            let msg = engine
                .cast_vote(Address::new([seed; 20]), VoteStage::One, payload)
                .unwrap();
            assert_eq!(msg.consensus_key(), key);
        }
        for seed in 1..=4u8 {
            engine
                .cast_vote(Address::new([seed; 20]), VoteStage::Two, payload)
                .unwrap();
        }

        let mut broadcasts = 0;
        loop {
            match rx.recv().await {
                Some(ConsensusEvent::Broadcast { .. }) => broadcasts += 1,
                Some(ConsensusEvent::Finalized { consensus_key, .. }) => {
                    assert_eq!(consensus_key, key);
                    break;
                }
                Some(_) => continue,
                None => panic!("event channel closed before finalization"),
            }
        }
        assert_eq!(broadcasts, 8);
    }
}
