use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

pub const TIME_LIMIT_RANGE_SECS: (u32, u32) = (10, 300);
pub const SAMPLING_RATE_RANGE_HZ: (u32, u32) = (1, 100);

/// Run parameters chosen before start. Frozen while a session is active.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ExperimentConfig {
    pub time_limit_secs: u32,
    pub sampling_rate_hz: u32,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            time_limit_secs: 60,
            sampling_rate_hz: 10,
        }
    }
}

impl ExperimentConfig {
    pub fn new(time_limit_secs: u32, sampling_rate_hz: u32) -> Result<Self> {
        let config = Self {
            time_limit_secs,
            sampling_rate_hz,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let (min_limit, max_limit) = TIME_LIMIT_RANGE_SECS;
        if !(min_limit..=max_limit).contains(&self.time_limit_secs) {
            bail!(
                "time limit {}s outside {}..={}s",
                self.time_limit_secs,
                min_limit,
                max_limit
            );
        }

        let (min_rate, max_rate) = SAMPLING_RATE_RANGE_HZ;
        if !(min_rate..=max_rate).contains(&self.sampling_rate_hz) {
            bail!(
                "sampling rate {}Hz outside {}..={}Hz",
                self.sampling_rate_hz,
                min_rate,
                max_rate
            );
        }

        Ok(())
    }

    pub fn time_limit_ms(&self) -> u64 {
        u64::from(self.time_limit_secs) * 1000
    }
}
