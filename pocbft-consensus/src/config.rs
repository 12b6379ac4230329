//! Consensus engine configuration

use crate::cache::DEFAULT_RESULT_CACHE_CAPACITY;
use crate::{ConsensusError, ConsensusResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// PoCBFT consensus configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PocBftConfig {
    /// Byzantine tolerance percent, strictly between 0 and 100
    pub byzantine_percent: u8,
    /// Window without finalization before a view switch, in milliseconds
    pub view_timeout_ms: u64,
    /// Number of recent consensus keys kept in the confirmed-result cache
    pub result_cache_capacity: usize,
}

impl Default for PocBftConfig {
    fn default() -> Self {
        Self {
            byzantine_percent: 34,
            view_timeout_ms: 10_000, // 10 seconds per view attempt
            result_cache_capacity: DEFAULT_RESULT_CACHE_CAPACITY,
        }
    }
}

impl PocBftConfig {
    /// Create a new configuration
    pub fn new(byzantine_percent: u8, view_timeout_ms: u64) -> Self {
        Self {
            byzantine_percent,
            view_timeout_ms,
            result_cache_capacity: DEFAULT_RESULT_CACHE_CAPACITY,
        }
    }

    /// Load configuration from file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> ConsensusResult<Self> {
        let content = fs::read_to_string(path.as_ref())
            .map_err(|e| ConsensusError::Config(format!("Failed to read config file: {}", e)))?;

        let config: PocBftConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> ConsensusResult<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path.as_ref(), content)
            .map_err(|e| ConsensusError::Config(format!("Failed to write config file: {}", e)))?;
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConsensusResult<()> {
        if self.byzantine_percent == 0 || self.byzantine_percent >= 100 {
            return Err(ConsensusError::Config(
                "Byzantine percent must lie strictly between 0 and 100".to_string(),
            ));
        }

        if self.view_timeout_ms == 0 {
            return Err(ConsensusError::Config(
                "View timeout must be greater than 0".to_string(),
            ));
        }

        if self.result_cache_capacity == 0 {
            return Err(ConsensusError::Config(
                "Result cache capacity must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Get the view timeout as a Duration
    pub fn view_timeout(&self) -> Duration {
        Duration::from_millis(self.view_timeout_ms)
    }

    /// Set the view timeout
    pub fn with_view_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.view_timeout_ms = timeout_ms;
        self
    }

    /// Set the result cache capacity
    pub fn with_result_cache_capacity(mut self, capacity: usize) -> Self {
        self.result_cache_capacity = capacity;
        self
    }
}
