//! Byzantine agreement thresholds
//!
//! The three agreement bars used by the vote protocol: the minimum vote
//! count to accept a proposal, the minimum to conclude the minority cannot
//! outvote, and the minimum for the overall Byzantine-safety guarantee to
//! hold. They are derived once per vote session and never recomputed
//! mid-flight.

use crate::{ConsensusError, ConsensusResult};

/// Agreement thresholds for one vote session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thresholds {
    /// Minimum matching votes to accept a proposal
    pub min_pass_count: usize,
    /// Minimum votes to safely conclude the minority cannot outvote
    pub min_cover_count: usize,
    /// Minimum votes required for the Byzantine-safety guarantee
    pub min_byzantine_count: usize,
}

/// Compute the agreement thresholds for a validator count and a configured
/// Byzantine tolerance percent.
///
/// `byzantine_percent` must lie strictly between 0 and 100; the boundary
/// values are rejected rather than silently clamped.
pub fn thresholds(agent_count: usize, byzantine_percent: u8) -> ConsensusResult<Thresholds> {
    if agent_count == 0 {
        return Err(ConsensusError::EmptyValidatorSet);
    }
    if byzantine_percent == 0 || byzantine_percent >= 100 {
        return Err(ConsensusError::InvalidByzantinePercent(byzantine_percent));
    }

    let min_pass_count = ceil_percent(agent_count, byzantine_percent);
    let cover_percent = 100 - byzantine_percent;
    let min_cover_count = ceil_percent(agent_count, cover_percent);
    let min_byzantine_count = min_pass_count.min(2 * min_cover_count);

    Ok(Thresholds {
        min_pass_count,
        min_cover_count,
        min_byzantine_count,
    })
}

fn ceil_percent(count: usize, percent: u8) -> usize {
    (count * percent as usize).div_ceil(100)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worked_example() {
        // N=10, p=34: pass=ceil(3.4)=4, cover=ceil(6.6)=7, byz=min(4,14)=4
        let t = thresholds(10, 34).unwrap();
        assert_eq!(t.min_pass_count, 4);
        assert_eq!(t.min_cover_count, 7);
        assert_eq!(t.min_byzantine_count, 4);
    }

    #[test]
    fn test_invalid_percent_rejected() {
        assert!(matches!(
            thresholds(10, 0),
            Err(ConsensusError::InvalidByzantinePercent(0))
        ));
        assert!(matches!(
            thresholds(10, 100),
            Err(ConsensusError::InvalidByzantinePercent(100))
        ));
        assert!(matches!(
            thresholds(10, 250),
            Err(ConsensusError::InvalidByzantinePercent(250))
        ));
    }

    #[test]
    fn test_zero_agents_rejected() {
        assert!(matches!(
            thresholds(0, 34),
            Err(ConsensusError::EmptyValidatorSet)
        ));
    }

    #[test]
    fn test_threshold_inequalities_hold() {
        for agent_count in 1..=100 {
            for percent in 1..=99u8 {
                let t = thresholds(agent_count, percent).unwrap();
                assert!(
                    t.min_byzantine_count <= t.min_pass_count,
                    "byzantine bound exceeded pass count at N={agent_count} p={percent}"
                );
                assert!(
                    t.min_byzantine_count <= 2 * t.min_cover_count,
                    "byzantine bound exceeded cover bound at N={agent_count} p={percent}"
                );
                assert!(t.min_pass_count >= 1);
                assert!(t.min_pass_count <= agent_count);
                assert!(t.min_cover_count <= agent_count);
            }
        }
    }
}
