use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::timing::MAX_QUEUE_CAPACITY;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] ron::error::SpannedError),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Events each track can hold. Power of two, at most 32768.
    pub queue_capacity: usize,
    pub max_tracks: usize,
    /// Largest block processed in one pass; bigger buffers are split.
    pub max_block_frames: usize,
    /// Used when the output target reports no channel count of its own.
    pub channels: usize,
    /// How far behind the clock (in frames) a scheduled event may arrive and
    /// still be played, at the start of the buffer. Older events are dropped.
    pub late_event_tolerance: u64,
    pub default_volume: f32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            max_tracks: 128,
            max_block_frames: 4096,
            channels: 2,
            late_event_tolerance: 1024,
            default_volume: 1.0,
        }
    }
}

impl SchedulerConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let ron_string = fs::read_to_string(path)?;
        Self::from_ron_str(&ron_string)
    }

    pub fn from_ron_str(source: &str) -> Result<Self, ConfigError> {
        let config: SchedulerConfig = ron::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.queue_capacity.is_power_of_two() || self.queue_capacity > MAX_QUEUE_CAPACITY {
            return Err(ConfigError::Invalid(format!(
                "queue_capacity must be a power of two no larger than {MAX_QUEUE_CAPACITY}, got {}",
                self.queue_capacity
            )));
        }
        if self.max_tracks == 0 {
            return Err(ConfigError::Invalid("max_tracks must be at least 1".into()));
        }
        if self.max_block_frames == 0 {
            return Err(ConfigError::Invalid(
                "max_block_frames must be at least 1".into(),
            ));
        }
        if self.channels == 0 {
            return Err(ConfigError::Invalid("channels must be at least 1".into()));
        }
        if !self.default_volume.is_finite() || self.default_volume < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "default_volume must be a finite, non-negative number, got {}",
                self.default_volume
            )));
        }
        Ok(())
    }
}
