use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{bail, Result};
use chrono::Utc;
use log::{debug, error, info, warn};
use tokio::{
    sync::{broadcast, mpsc, Mutex},
    task::JoinHandle,
    time::{self, Duration},
};
use tokio_util::sync::CancellationToken;

use crate::{
    bridge::{ConfigureRequest, SensorBridge},
    export::{build_record, to_csv, write_csv, RunSummary},
    models::{AvailableExperiment, ExperimentConfig, ExperimentKind, Reading},
    pipeline::{self, IngestOutcome},
    stream::{ConnectionManager, StreamEvent, RECONNECT_DELAY},
};

use super::{
    events::{ControllerEvent, EventBus, NoticeLevel},
    monitor::status_loop,
    state::{SessionData, SessionSnapshot},
};

const STREAM_BUFFER: usize = 1024;

pub const RECONNECTING_MESSAGE: &str = "Connection lost. Reconnecting...";

/// Timing knobs. Defaults are the production values; tests shrink them.
#[derive(Debug, Clone, Copy)]
pub struct Timing {
    pub reconnect_delay: Duration,
    pub status_poll_interval: Duration,
    /// Wait after a firmware switch before probing the device again.
    pub firmware_settle_delay: Duration,
    pub firmware_probe_interval: Duration,
    pub firmware_probe_attempts: u32,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            reconnect_delay: RECONNECT_DELAY,
            status_poll_interval: Duration::from_millis(5000),
            firmware_settle_delay: Duration::from_millis(3000),
            firmware_probe_interval: Duration::from_millis(1000),
            firmware_probe_attempts: 10,
        }
    }
}

struct MonitorTask {
    handle: JoinHandle<()>,
    cancel_token: CancellationToken,
}

/// One experiment view's session: run state, stream connection, series and
/// the reachability poller, kept consistent with each other.
///
/// After every state change [`reconcile`](Self::reconcile) opens the stream
/// if the state wants one and closes it otherwise, and does the same for the
/// device poller.
pub struct TelemetryController<B: SensorBridge> {
    bridge: Arc<B>,
    session: Arc<Mutex<SessionData>>,
    connection: Arc<Mutex<ConnectionManager<B>>>,
    monitor: Arc<Mutex<Option<MonitorTask>>>,
    events: EventBus,
    timing: Timing,
}

impl<B: SensorBridge> Clone for TelemetryController<B> {
    fn clone(&self) -> Self {
        Self {
            bridge: Arc::clone(&self.bridge),
            session: Arc::clone(&self.session),
            connection: Arc::clone(&self.connection),
            monitor: Arc::clone(&self.monitor),
            events: self.events.clone(),
            timing: self.timing,
        }
    }
}

impl<B: SensorBridge> TelemetryController<B> {
    pub fn new(bridge: B, config: ExperimentConfig) -> Self {
        Self::with_timing(bridge, config, Timing::default())
    }

    pub fn with_timing(bridge: B, config: ExperimentConfig, timing: Timing) -> Self {
        let bridge = Arc::new(bridge);
        let experiment = bridge.experiment();
        Self {
            connection: Arc::new(Mutex::new(ConnectionManager::new(
                bridge.clone(),
                timing.reconnect_delay,
            ))),
            bridge,
            session: Arc::new(Mutex::new(SessionData::new(experiment, config))),
            monitor: Arc::new(Mutex::new(None)),
            events: EventBus::new(),
            timing,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ControllerEvent> {
        self.events.subscribe()
    }

    pub fn experiment(&self) -> ExperimentKind {
        self.bridge.experiment()
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        self.session.lock().await.snapshot()
    }

    pub async fn readings(&self) -> Vec<Reading> {
        self.session.lock().await.series.readings().to_vec()
    }

    /// Recent-readings table: newest first, last 20 unless `show_all`.
    pub async fn preview(&self, show_all: bool) -> Vec<Reading> {
        self.session.lock().await.series.preview(show_all)
    }

    pub async fn is_stream_open(&self) -> bool {
        self.connection.lock().await.is_open()
    }

    /// Brings the view up: starts reachability polling for the current state.
    pub async fn activate(&self) -> Result<()> {
        self.reconcile().await
    }

    pub async fn configure(&self, config: ExperimentConfig) -> Result<()> {
        self.session.lock().await.set_config(config)?;
        self.emit_state_changed().await;
        Ok(())
    }

    /// Configures and starts the bridge, then opens the stream. The start is
    /// reserved before any bridge call, so a concurrent second start is
    /// refused without touching the bridge.
    pub async fn start(&self) -> Result<SessionSnapshot> {
        let (config, experiment) = {
            let mut session = self.session.lock().await;
            if session.state.is_active() || session.starting {
                bail!("session already active");
            }
            let experiment = session.experiment;

            if !self.bridge.has_credentials() {
                drop(session);
                self.events
                    .notify_blocking(NoticeLevel::Error, "Please log in to run experiments.");
                bail!("no auth token; refusing to start");
            }
            if !session.device.connected {
                drop(session);
                self.events.notify_blocking(
                    NoticeLevel::Error,
                    format!(
                        "{} not connected. Please check hardware.",
                        experiment.sensor_label()
                    ),
                );
                bail!("device not reachable");
            }

            session.reserve_start()?;
            (session.config, experiment)
        };

        if let Err(err) = self.start_on_bridge(config, experiment).await {
            self.session.lock().await.release_start();
            return Err(err);
        }

        let cleared = {
            let mut session = self.session.lock().await;
            match session.begin(Utc::now()) {
                Ok(cleared) => cleared,
                Err(err) => {
                    session.release_start();
                    return Err(err);
                }
            }
        };
        info!(
            "Starting {} session ({}s @ {}Hz, history {})",
            experiment.as_str(),
            config.time_limit_secs,
            config.sampling_rate_hz,
            if cleared { "cleared" } else { "kept" }
        );

        if let Err(err) = self.reconcile().await {
            if let Err(stop_err) = self.bridge.stop().await {
                error!("Error stopping experiment on bridge: {stop_err:#}");
            }
            return Err(err);
        }

        let message = match experiment {
            ExperimentKind::Kinematics => "Experiment started",
            ExperimentKind::Oscillation => "Counting started",
        };
        self.events.notify(NoticeLevel::Success, message);
        self.emit_state_changed().await;
        Ok(self.snapshot().await)
    }

    async fn start_on_bridge(
        &self,
        config: ExperimentConfig,
        experiment: ExperimentKind,
    ) -> Result<()> {
        let request = ConfigureRequest {
            frequency: config.sampling_rate_hz,
            duration: config.time_limit_secs,
            mode: experiment.configure_mode().map(str::to_string),
        };
        if let Err(err) = self.bridge.configure(&request).await {
            error!("Configure rejected: {err:#}");
            self.events
                .notify_blocking(NoticeLevel::Error, "Failed to configure experiment");
            return Err(err.context("bridge rejected configuration"));
        }
        self.events
            .notify(NoticeLevel::Success, "Experiment configured successfully");

        if let Err(err) = self.bridge.start().await {
            error!("Start rejected: {err:#}");
            self.events
                .notify_blocking(NoticeLevel::Error, format!("Failed to start: {err}"));
            return Err(err.context("bridge rejected start"));
        }
        Ok(())
    }

    pub async fn pause(&self) -> Result<SessionSnapshot> {
        let experiment = {
            let mut session = self.session.lock().await;
            session.pause()?;
            session.experiment
        };
        self.reconcile().await?;

        let message = match experiment {
            ExperimentKind::Kinematics => "Experiment paused",
            ExperimentKind::Oscillation => "Counting paused",
        };
        self.events.notify(NoticeLevel::Info, message);
        self.emit_state_changed().await;
        Ok(self.snapshot().await)
    }

    pub async fn resume(&self) -> Result<SessionSnapshot> {
        let experiment = {
            let mut session = self.session.lock().await;
            session.resume()?;
            session.experiment
        };
        self.reconcile().await?;

        let message = match experiment {
            ExperimentKind::Kinematics => "Experiment resumed",
            ExperimentKind::Oscillation => "Counting resumed",
        };
        self.events.notify(NoticeLevel::Info, message);
        self.emit_state_changed().await;
        Ok(self.snapshot().await)
    }

    /// Manual stop and the time-limit stop share this path. Stopping a
    /// session that is not active changes nothing and notifies nobody.
    pub async fn stop(&self) -> Result<SessionSnapshot> {
        let (changed, experiment, final_count) = {
            let mut session = self.session.lock().await;
            let changed = session.stop();
            (changed, session.experiment, session.series.current_count())
        };
        if !changed {
            return Ok(self.snapshot().await);
        }

        self.reconcile().await?;

        if let Err(err) = self.bridge.stop().await {
            error!("Error stopping experiment on bridge: {err:#}");
        }

        let message = match experiment {
            ExperimentKind::Kinematics => "Experiment stopped".to_string(),
            ExperimentKind::Oscillation => format!("Counting stopped. Final count: {final_count}"),
        };
        self.events.notify(NoticeLevel::Info, message);
        self.emit_state_changed().await;
        Ok(self.snapshot().await)
    }

    pub async fn reset(&self) -> Result<SessionSnapshot> {
        let experiment = {
            let session = self.session.lock().await;
            if session.state.wants_stream() {
                bail!("cannot reset while a run is in progress");
            }
            session.experiment
        };

        if let Err(err) = self.bridge.reset().await {
            self.events
                .notify(NoticeLevel::Error, format!("Reset failed: {err}"));
            return Err(err.context("bridge rejected reset"));
        }

        self.session.lock().await.reset()?;
        self.reconcile().await?;

        let message = match experiment {
            ExperimentKind::Kinematics => "Data cleared",
            ExperimentKind::Oscillation => "Counter reset",
        };
        self.events.notify(NoticeLevel::Info, message);
        self.emit_state_changed().await;
        Ok(self.snapshot().await)
    }

    /// Unmount: closes the stream, cancels any reconnect wait and stops
    /// polling. The session state is left as is.
    pub async fn shutdown(&self) -> Result<()> {
        self.stop_monitor().await;
        self.connection.lock().await.close().await?;
        Ok(())
    }

    pub async fn csv(&self) -> Option<String> {
        let session = self.session.lock().await;
        to_csv(session.experiment, session.series.readings())
    }

    /// Writes the series to `dir`. Does nothing for an empty series.
    pub async fn export_csv(&self, dir: &Path) -> Result<Option<PathBuf>> {
        let (experiment, readings) = {
            let session = self.session.lock().await;
            (session.experiment, session.series.readings().to_vec())
        };

        let written = write_csv(dir, experiment, &readings)?;
        if written.is_some() {
            self.events
                .notify(NoticeLevel::Success, "CSV exported successfully");
        }
        Ok(written)
    }

    /// Submits the series to the profile store. Failures become notices and
    /// leave the data in memory for a manual retry; nothing is retried here.
    pub async fn save_to_profile(&self) -> bool {
        let record = {
            let session = self.session.lock().await;
            if session.series.is_empty() {
                drop(session);
                self.events.notify(NoticeLevel::Warning, "No data to save.");
                return false;
            }
            if !self.bridge.has_credentials() {
                drop(session);
                self.events
                    .notify(NoticeLevel::Warning, "Please log in to save data.");
                return false;
            }

            let summary = RunSummary {
                kind: session.experiment,
                config: session.config,
                device: &session.device,
                selected_experiment: session.selected_experiment.as_deref(),
                final_count: session.series.current_count(),
                max_count: session.series.max_count(),
            };
            build_record(session.series.readings(), &summary, Utc::now())
        };

        match self.bridge.save_data(&record).await {
            Ok(()) => {
                info!("Saved {} readings to profile", record.data.len());
                self.events
                    .notify(NoticeLevel::Success, "Data saved to your profile!");
                true
            }
            Err(err) => {
                error!("Failed to save experiment data: {err:#}");
                self.events.notify(NoticeLevel::Error, "Failed to save data.");
                false
            }
        }
    }

    pub async fn available_experiments(&self) -> Result<Vec<AvailableExperiment>> {
        self.bridge.available_experiments().await
    }

    /// Asks the bridge to flash the firmware for `experiment_type`, then
    /// probes until the device answers again. Returns whether it came back.
    pub async fn select_experiment(&self, experiment_type: &str) -> Result<bool> {
        {
            let session = self.session.lock().await;
            if session.state.is_active() || session.starting {
                bail!("cannot switch experiment during a run");
            }
            if !session.device.connected {
                let label = session.experiment.sensor_label();
                drop(session);
                self.events.notify(
                    NoticeLevel::Error,
                    format!("{label} not connected. Please check hardware."),
                );
                bail!("device not reachable");
            }
        }

        self.events
            .notify(NoticeLevel::Info, "Starting firmware upload...");
        if let Err(err) = self.bridge.select_experiment(experiment_type).await {
            self.events
                .notify(NoticeLevel::Error, format!("Upload failed: {err}"));
            return Err(err.context("experiment selection failed"));
        }
        self.events
            .notify(NoticeLevel::Success, "Firmware uploaded successfully");

        time::sleep(self.timing.firmware_settle_delay).await;
        self.events.notify(NoticeLevel::Info, "Verifying connection...");

        let attempts = self.timing.firmware_probe_attempts.max(1);
        for attempt in 1..=attempts {
            match self.bridge.status().await {
                Ok(status) if status.connected => {
                    {
                        let mut session = self.session.lock().await;
                        session.device = status;
                        session.selected_experiment = Some(experiment_type.to_string());
                        session.error = None;
                    }
                    self.events
                        .notify(NoticeLevel::Success, "Sensor ready for experiments!");
                    self.emit_state_changed().await;
                    return Ok(true);
                }
                Ok(_) => debug!("Device not back yet (probe {attempt}/{attempts})"),
                Err(err) => debug!("Probe {attempt}/{attempts} failed: {err:#}"),
            }
            if attempt < attempts {
                time::sleep(self.timing.firmware_probe_interval).await;
            }
        }

        self.session.lock().await.selected_experiment = Some(experiment_type.to_string());
        self.events
            .notify(NoticeLevel::Warning, "Sensor not responding");
        Ok(false)
    }

    /// One reachability check. Results are applied only while polling is
    /// meant to run; a check racing a start is discarded.
    pub async fn refresh_device_status(&self) -> bool {
        let result = self.bridge.status().await;

        let mut session = self.session.lock().await;
        if !session.state.polls_device() || session.starting {
            return session.device.connected;
        }

        let was_connected = session.device.connected;
        let label = session.experiment.sensor_label();
        match result {
            Ok(status) => {
                session.error = if status.connected {
                    None
                } else {
                    Some(format!("{label} not connected"))
                };
                session.device = status;
            }
            Err(err) => {
                debug!("Status check failed: {err:#}");
                session.device.connected = false;
                session.error = Some("Cannot reach sensor bridge".to_string());
            }
        }

        let now_connected = session.device.connected;
        let snapshot = session.snapshot();
        drop(session);

        if !was_connected && now_connected {
            self.events
                .notify(NoticeLevel::Success, format!("{label} connected"));
        }
        self.events.emit_state(snapshot);
        now_connected
    }

    /// Makes the stream and the poller match the current state.
    ///
    /// A state that wants a stream never outlives a refused open: the run is
    /// abandoned, polling resumes and the caller gets an error.
    async fn reconcile(&self) -> Result<()> {
        let (polls_device, refused) = {
            let mut connection = self.connection.lock().await;
            let mut session = self.session.lock().await;
            let state = session.state;
            let mut refused = None;

            if state.wants_stream() && !connection.is_open() {
                session.generation += 1;
                let generation = session.generation;
                let reachable = session.device.connected;

                let (tx, rx) = mpsc::channel(STREAM_BUFFER);
                if connection.open(reachable, tx) {
                    self.spawn_consumer(generation, rx);
                } else {
                    warn!("Stream not opened for {state:?} session; abandoning run");
                    let message = if reachable {
                        "Please log in to run experiments.".to_string()
                    } else {
                        format!(
                            "{} not connected. Please check hardware.",
                            session.experiment.sensor_label()
                        )
                    };
                    session.abandon_run(message.clone());
                    refused = Some(message);
                }
            }

            let polls_device = session.state.polls_device();
            drop(session);
            if !state.wants_stream() && connection.is_open() {
                connection.close().await?;
            }
            (polls_device, refused)
        };

        self.sync_monitor(polls_device).await;
        if let Some(message) = refused {
            self.events.notify_blocking(NoticeLevel::Error, message.clone());
            self.emit_state_changed().await;
            bail!("stream not opened: {message}");
        }
        Ok(())
    }

    async fn sync_monitor(&self, polls_device: bool) {
        if polls_device {
            self.ensure_monitor().await;
        } else {
            self.stop_monitor().await;
        }
    }

    fn spawn_consumer(&self, generation: u64, mut rx: mpsc::Receiver<StreamEvent>) {
        let controller = self.clone();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if let Err(err) = controller.handle_stream_event(generation, event).await {
                    error!("Stream event handling failed: {err:#}");
                }
            }
            debug!("Stream consumer for connection {generation} exited");
        });
    }

    async fn handle_stream_event(&self, generation: u64, event: StreamEvent) -> Result<()> {
        let mut session = self.session.lock().await;
        if session.generation != generation || !session.state.wants_stream() {
            debug!("Dropping {event:?} from closed connection {generation}");
            return Ok(());
        }

        match event {
            StreamEvent::Connected => {
                session.mark_connected();
                session.error = None;
                let snapshot = session.snapshot();
                drop(session);

                self.events
                    .notify(NoticeLevel::Success, "Data stream connected");
                self.events.emit_state(snapshot);
            }
            StreamEvent::Error(message) => {
                warn!("Stream error: {message}");
                session.error = Some(RECONNECTING_MESSAGE.to_string());
                let snapshot = session.snapshot();
                drop(session);

                self.events.notify(NoticeLevel::Warning, RECONNECTING_MESSAGE);
                self.events.emit_state(snapshot);
            }
            StreamEvent::Sample(raw) => {
                let reading = match pipeline::decode(session.experiment, &raw) {
                    Ok(reading) => reading,
                    Err(err) => {
                        warn!("Discarding malformed sample {raw:?}: {err:#}");
                        return Ok(());
                    }
                };

                let limit = session.config.time_limit_secs;
                let outcome = session.series.ingest(reading, limit);
                let snapshot = session.snapshot();
                drop(session);

                self.events.emit_state(snapshot);
                if outcome == IngestOutcome::LimitReached {
                    info!("Time limit of {limit}s reached at t={}s", reading.time());
                    self.stop().await?;
                }
            }
            StreamEvent::Closed => debug!("Stream connection {generation} closed"),
        }
        Ok(())
    }

    async fn ensure_monitor(&self) {
        let mut monitor = self.monitor.lock().await;
        if monitor.is_some() {
            return;
        }

        let cancel_token = CancellationToken::new();
        let handle = tokio::spawn(status_loop(
            self.clone(),
            self.timing.status_poll_interval,
            cancel_token.clone(),
        ));
        *monitor = Some(MonitorTask {
            handle,
            cancel_token,
        });
    }

    async fn stop_monitor(&self) {
        if let Some(task) = self.monitor.lock().await.take() {
            task.cancel_token.cancel();
            task.handle.abort();
        }
    }

    async fn emit_state_changed(&self) {
        let snapshot = self.session.lock().await.snapshot();
        self.events.emit_state(snapshot);
    }
}
