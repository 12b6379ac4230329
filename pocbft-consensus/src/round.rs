//! Deterministic validator rotation and round scheduling

use crate::{ConsensusError, ConsensusResult};
use pocbft_core::{Address, Hash, Timestamp};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Validator eligible to participate in a round. Consumed read-only;
/// identity is immutable for the lifetime of the round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validator {
    /// Address the validator packs and votes under
    pub packing_address: Address,
    /// Validator public key
    pub public_key: Vec<u8>,
    /// Credit (voting weight) of the validator
    pub credit: u64,
}

/// Ordered set of validators eligible to participate in a round,
/// supplied externally per block height.
#[derive(Debug, Clone, Default)]
pub struct MemberDirectory {
    validators: Vec<Validator>,
}

impl MemberDirectory {
    /// Create a directory from the per-height validator list
    pub fn new(validators: Vec<Validator>) -> Self {
        Self { validators }
    }

    /// Number of validators in the directory
    pub fn len(&self) -> usize {
        self.validators.len()
    }

    /// Check if the directory is empty
    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    /// All validators, in the externally supplied order
    pub fn validators(&self) -> &[Validator] {
        &self.validators
    }

    /// Check whether an address belongs to the directory
    pub fn contains(&self, address: &Address) -> bool {
        self.validators
            .iter()
            .any(|v| &v.packing_address == address)
    }
}

/// One validator slot within a round
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundMember {
    /// Packing order within the round, 1-based and stable for the
    /// lifetime of the round
    pub order: u16,
    /// The validator occupying the slot
    pub validator: Validator,
}

/// Deterministic proposal/packing order of validators for one block height.
///
/// Rounds are replaced, never mutated in place, when membership changes or
/// a reorg occurs.
#[derive(Debug, Clone)]
pub struct Round {
    members: Vec<RoundMember>,
    round_start_time: Timestamp,
}

impl Round {
    /// Members in packing order
    pub fn members(&self) -> &[RoundMember] {
        &self.members
    }

    /// Start time of the round (milliseconds)
    pub fn round_start_time(&self) -> Timestamp {
        self.round_start_time
    }

    /// Number of members in the round
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Check if the round is empty
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Look up a member by its 1-based packing order
    pub fn locate_by_order(&self, order: u16) -> ConsensusResult<&RoundMember> {
        if order == 0 || order as usize > self.members.len() {
            return Err(ConsensusError::InvalidOrder {
                order,
                member_count: self.members.len(),
            });
        }
        Ok(&self.members[order as usize - 1])
    }

    /// Look up a member by packing address
    pub fn locate_by_address(&self, address: &Address) -> Option<&RoundMember> {
        self.members
            .iter()
            .find(|m| &m.validator.packing_address == address)
    }

    /// Find the first member whose packing address is one of the local
    /// node's addresses. `None` means the node is not a participant.
    pub fn locate_local_slot(&self, local_addresses: &[Address]) -> Option<&RoundMember> {
        self.members
            .iter()
            .find(|m| local_addresses.contains(&m.validator.packing_address))
    }
}

/// Builds deterministic rounds from a validator directory
pub struct RoundScheduler;

impl RoundScheduler {
    /// Construct the round for one block height.
    ///
    /// Members are sorted ascending by the double hash of the packing
    /// address concatenated with the big-endian round start time; the very
    /// first round ever omits the time component since no prior round
    /// exists. The resulting ordering is a pure function of its inputs.
    pub fn build_round(
        directory: &MemberDirectory,
        round_start_time: Timestamp,
        is_genesis: bool,
    ) -> ConsensusResult<Round> {
        if directory.is_empty() {
            return Err(ConsensusError::EmptyValidatorSet);
        }

        let mut keyed: Vec<(Hash, &Validator)> = directory
            .validators()
            .iter()
            .map(|v| {
                (
                    sort_key(&v.packing_address, round_start_time, is_genesis),
                    v,
                )
            })
            .collect();
        keyed.sort_by(|a, b| a.0.as_bytes().cmp(b.0.as_bytes()));

        let members = keyed
            .into_iter()
            .enumerate()
            .map(|(i, (_, validator))| RoundMember {
                order: (i + 1) as u16,
                validator: validator.clone(),
            })
            .collect::<Vec<_>>();

        debug!(
            member_count = members.len(),
            round_start_time, is_genesis, "built round"
        );

        Ok(Round {
            members,
            round_start_time,
        })
    }
}

/// Ordering key for one validator. Hash inputs are unique per validator,
/// so ties are impossible.
fn sort_key(address: &Address, round_start_time: Timestamp, is_genesis: bool) -> Hash {
    let mut input = Vec::with_capacity(28);
    input.extend_from_slice(address.as_bytes());
    if !is_genesis {
        input.extend_from_slice(&round_start_time.to_be_bytes());
    }
    Hash::double_digest(&input)
}
