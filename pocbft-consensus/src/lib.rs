//! PoCBFT round-based block-voting consensus engine
//!
//! This crate decides, for every block height, which validator proposes the
//! block, collects a two-stage vote among validators, determines when a
//! voting round has reached Byzantine-safe agreement, and escalates to new
//! voting rounds (view changes) on disagreement without losing votes that
//! arrive out of order.
//!
//! The engine never performs network or disk I/O itself: the network layer
//! feeds it already-authenticated vote messages through per-stage inbound
//! queues, and finalized results plus outbound broadcasts are delivered as
//! [`ConsensusEvent`]s.

pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod future;
pub mod message;
pub mod round;
pub mod session;
pub mod threshold;

pub use cache::ConfirmedResultCache;
pub use config::PocBftConfig;
pub use engine::{ConsensusEngine, ConsensusEvent, EngineStats};
pub use error::{ConsensusError, ConsensusResult};
pub use future::FutureVoteBuffer;
pub use message::{ConsensusKey, VoteMessage, VoteResultData, VoteStage, FINAL_VIEW};
pub use round::{MemberDirectory, Round, RoundMember, RoundScheduler, Validator};
pub use session::{MessageOutcome, VoteSession};
pub use threshold::{thresholds, Thresholds};
