use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{DeviceStatus, ExperimentConfig, ExperimentKind};
use crate::pipeline::SeriesBuffer;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum SessionState {
    #[default]
    Idle,
    Connecting,
    Running,
    Paused,
    Stopped,
}

impl SessionState {
    /// A run is in progress (possibly paused); a new start is rejected.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SessionState::Connecting | SessionState::Running | SessionState::Paused
        )
    }

    /// States in which the stream connection must be open, and the only ones
    /// in which samples are accepted.
    pub fn wants_stream(&self) -> bool {
        matches!(self, SessionState::Connecting | SessionState::Running)
    }

    /// Device reachability is polled only outside a run.
    pub fn polls_device(&self) -> bool {
        matches!(self, SessionState::Idle | SessionState::Stopped)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub experiment: ExperimentKind,
    pub session_id: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub config: ExperimentConfig,
    pub sample_count: usize,
    pub elapsed_ms: u64,
    pub progress_percent: f64,
    pub current_count: u64,
    pub max_count: u64,
    pub rate: f64,
    pub device_connected: bool,
    pub error: Option<String>,
}

/// Everything one experiment view owns: run state, series, device view and
/// the banner error. Mutated only through the controller.
#[derive(Debug)]
pub struct SessionData {
    pub state: SessionState,
    pub experiment: ExperimentKind,
    pub config: ExperimentConfig,
    pub session_id: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub series: SeriesBuffer,
    pub device: DeviceStatus,
    pub selected_experiment: Option<String>,
    pub error: Option<String>,
    /// Bumped on every stream open. Events tagged with an older value belong
    /// to a connection that has since been closed.
    pub generation: u64,
    /// Set while `start` talks to the bridge, before the state moves.
    pub starting: bool,
}

impl SessionData {
    pub fn new(experiment: ExperimentKind, config: ExperimentConfig) -> Self {
        Self {
            state: SessionState::Idle,
            experiment,
            config,
            session_id: None,
            started_at: None,
            series: SeriesBuffer::new(),
            device: DeviceStatus::default(),
            selected_experiment: None,
            error: None,
            generation: 0,
            starting: false,
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.state,
            experiment: self.experiment,
            session_id: self.session_id.clone(),
            started_at: self.started_at,
            config: self.config,
            sample_count: self.series.len(),
            elapsed_ms: self.series.elapsed_ms(),
            progress_percent: self.series.progress_percent(self.config.time_limit_ms()),
            current_count: self.series.current_count(),
            max_count: self.series.max_count(),
            rate: self.series.rate(),
            device_connected: self.device.connected,
            error: self.error.clone(),
        }
    }

    pub fn set_config(&mut self, config: ExperimentConfig) -> Result<()> {
        if self.state.is_active() {
            bail!("configuration is frozen while a session is active");
        }
        config.validate()?;
        self.config = config;
        Ok(())
    }

    /// Claims the right to start. A second caller is refused until the first
    /// either begins or releases.
    pub fn reserve_start(&mut self) -> Result<()> {
        if self.state.is_active() || self.starting {
            bail!("session already active");
        }
        self.starting = true;
        Ok(())
    }

    pub fn release_start(&mut self) {
        self.starting = false;
    }

    /// Moves to `Connecting`. History is cleared only when the clock is at
    /// zero; a restart after stop keeps what was recorded. Returns whether the
    /// history was cleared.
    pub fn begin(&mut self, now: DateTime<Utc>) -> Result<bool> {
        if self.state.is_active() {
            bail!("session already active");
        }

        let fresh = self.series.elapsed_ms() == 0;
        if fresh {
            self.series.clear();
            self.session_id = Some(Uuid::new_v4().to_string());
            self.started_at = Some(now);
        } else if self.session_id.is_none() {
            self.session_id = Some(Uuid::new_v4().to_string());
            self.started_at = Some(now);
        }

        self.state = SessionState::Connecting;
        self.starting = false;
        self.error = None;
        Ok(fresh)
    }

    pub fn mark_connected(&mut self) -> bool {
        if self.state == SessionState::Connecting {
            self.state = SessionState::Running;
            true
        } else {
            false
        }
    }

    pub fn pause(&mut self) -> Result<()> {
        if self.state != SessionState::Running {
            bail!("can only pause a running session (state: {:?})", self.state);
        }
        self.state = SessionState::Paused;
        Ok(())
    }

    pub fn resume(&mut self) -> Result<()> {
        if self.state != SessionState::Paused {
            bail!("can only resume a paused session (state: {:?})", self.state);
        }
        self.state = SessionState::Running;
        Ok(())
    }

    /// Returns false when there was nothing to stop.
    pub fn stop(&mut self) -> bool {
        if !self.state.is_active() {
            return false;
        }
        self.state = SessionState::Stopped;
        self.error = None;
        true
    }

    /// Backs out of a run whose stream could not be opened. Recorded data
    /// stays; the state lands where a manual stop would have left it.
    pub fn abandon_run(&mut self, error: impl Into<String>) {
        self.state = if self.series.elapsed_ms() == 0 && self.series.is_empty() {
            SessionState::Idle
        } else {
            SessionState::Stopped
        };
        self.starting = false;
        self.error = Some(error.into());
    }

    pub fn reset(&mut self) -> Result<()> {
        if self.state.wants_stream() {
            bail!("cannot reset while a run is in progress");
        }
        self.series.clear();
        self.state = SessionState::Idle;
        self.session_id = None;
        self.started_at = None;
        self.error = None;
        Ok(())
    }
}
