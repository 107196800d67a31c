//! Sample pipeline: raw stream payload -> typed reading -> series + aggregates.
//!
//! Decoding is strict per experiment: a payload that does not carry the
//! fields of the active experiment is rejected and the caller drops it. The
//! series itself never evicts; the preview window is a view computed on read.

use anyhow::{Context, Result};

use crate::models::{CountReading, ExperimentKind, MotionReading, Reading};

/// Rows shown in the recent-readings table unless the full history is asked for.
pub const PREVIEW_ROWS: usize = 20;

pub fn decode(kind: ExperimentKind, raw: &str) -> Result<Reading> {
    match kind {
        ExperimentKind::Oscillation => {
            let reading: CountReading =
                serde_json::from_str(raw).context("malformed oscillation sample")?;
            Ok(Reading::Count(reading))
        }
        ExperimentKind::Kinematics => {
            let reading: MotionReading =
                serde_json::from_str(raw).context("malformed kinematics sample")?;
            Ok(Reading::Motion(reading.rounded()))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Appended,
    /// The reading's time reached the configured limit; the session must stop.
    LimitReached,
}

/// Full history of one session plus the clock and counters derived from it.
#[derive(Debug, Clone, Default)]
pub struct SeriesBuffer {
    readings: Vec<Reading>,
    elapsed_ms: u64,
    current_count: u64,
    max_count: u64,
}

impl SeriesBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ingest(&mut self, reading: Reading, time_limit_secs: u32) -> IngestOutcome {
        self.elapsed_ms = seconds_to_ms(reading.time());
        if let Some(count) = reading.count() {
            self.current_count = count;
            self.max_count = self.max_count.max(count);
        }
        self.readings.push(reading);

        if reading.time() >= f64::from(time_limit_secs) {
            IngestOutcome::LimitReached
        } else {
            IngestOutcome::Appended
        }
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn readings(&self) -> &[Reading] {
        &self.readings
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed_ms
    }

    pub fn current_count(&self) -> u64 {
        self.current_count
    }

    pub fn max_count(&self) -> u64 {
        self.max_count
    }

    /// Counts per second over the elapsed run; zero before any time has passed.
    pub fn rate(&self) -> f64 {
        if self.elapsed_ms == 0 {
            return 0.0;
        }
        self.current_count as f64 / (self.elapsed_ms as f64 / 1000.0)
    }

    pub fn progress_percent(&self, time_limit_ms: u64) -> f64 {
        if time_limit_ms == 0 {
            return 100.0;
        }
        (self.elapsed_ms as f64 / time_limit_ms as f64 * 100.0).min(100.0)
    }

    /// Newest-first view: the last [`PREVIEW_ROWS`] readings, or everything.
    pub fn preview(&self, show_all: bool) -> Vec<Reading> {
        let take = if show_all {
            self.readings.len()
        } else {
            PREVIEW_ROWS
        };
        self.readings.iter().rev().take(take).copied().collect()
    }
}

fn seconds_to_ms(seconds: f64) -> u64 {
    if seconds.is_finite() && seconds > 0.0 {
        (seconds * 1000.0).round() as u64
    } else {
        0
    }
}
