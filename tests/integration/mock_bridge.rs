//! In-memory sensor bridge for integration tests.
//!
//! Every REST call is recorded. Stream connections are scripted: each
//! `open_stream` pops the next [`StreamScript`]; an empty script queue yields
//! a connection that stays open and silent.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures_lite::{stream, StreamExt};
use tokio::sync::{broadcast, mpsc};
use tokio::time::{self, Duration, Instant};

use labstream_lib::bridge::{ConfigureRequest, EventStream, SensorBridge};
use labstream_lib::export::SavedRecord;
use labstream_lib::models::{AvailableExperiment, DeviceStatus, ExperimentConfig, ExperimentKind};
use labstream_lib::session::{ControllerEvent, Notice, TelemetryController, Timing};

pub type Feed = mpsc::UnboundedSender<Result<String>>;

pub enum StreamScript {
    Refuse(&'static str),
    Feed(mpsc::UnboundedReceiver<Result<String>>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum BridgeCall {
    Status,
    Configure(ConfigureRequest),
    Start,
    Stop,
    Reset,
    Save,
    SelectExperiment(String),
}

#[derive(Default)]
struct Shared {
    connected: bool,
    credentials: bool,
    /// `configure` takes this long to answer.
    configure_delay: Option<Duration>,
    /// The device drops off while `configure` is in flight.
    offline_while_configuring: bool,
    /// Status probes answered "disconnected" after a firmware switch.
    offline_probes: u32,
    fail_configure: bool,
    fail_save: bool,
    fail_reset: bool,
    calls: Vec<BridgeCall>,
    scripts: VecDeque<StreamScript>,
    opens: Vec<Instant>,
    saved: Vec<SavedRecord>,
}

#[derive(Clone)]
pub struct MockBridge {
    kind: ExperimentKind,
    shared: Arc<Mutex<Shared>>,
}

#[allow(dead_code)]
impl MockBridge {
    pub fn new(kind: ExperimentKind) -> Self {
        Self {
            kind,
            shared: Arc::new(Mutex::new(Shared {
                connected: true,
                credentials: true,
                ..Shared::default()
            })),
        }
    }

    pub fn without_credentials(self) -> Self {
        self.revoke_credentials();
        self
    }

    pub fn revoke_credentials(&self) {
        self.shared.lock().unwrap().credentials = false;
    }

    pub fn slow_configure(&self, delay: Duration) {
        self.shared.lock().unwrap().configure_delay = Some(delay);
    }

    /// `configure` knocks the device offline for `delay`, then it returns.
    pub fn flap_during_configure(&self, delay: Duration) {
        let mut shared = self.shared.lock().unwrap();
        shared.configure_delay = Some(delay);
        shared.offline_while_configuring = true;
    }

    pub fn set_connected(&self, connected: bool) {
        self.shared.lock().unwrap().connected = connected;
    }

    pub fn fail_configure(&self) {
        self.shared.lock().unwrap().fail_configure = true;
    }

    pub fn fail_save(&self) {
        self.shared.lock().unwrap().fail_save = true;
    }

    pub fn fail_reset(&self) {
        self.shared.lock().unwrap().fail_reset = true;
    }

    /// After the next firmware switch the device stays dark for `probes`
    /// status calls. `u32::MAX` keeps it dark.
    pub fn offline_after_switch(&self, probes: u32) {
        self.shared.lock().unwrap().offline_probes = probes;
    }

    /// Queues a connection fed through the returned sender. Dropping the
    /// sender ends the stream as if the bridge hung up.
    pub fn script_feed(&self) -> Feed {
        let (tx, rx) = mpsc::unbounded_channel();
        self.shared
            .lock()
            .unwrap()
            .scripts
            .push_back(StreamScript::Feed(rx));
        tx
    }

    pub fn script_refusal(&self, reason: &'static str) {
        self.shared
            .lock()
            .unwrap()
            .scripts
            .push_back(StreamScript::Refuse(reason));
    }

    pub fn opens(&self) -> Vec<Instant> {
        self.shared.lock().unwrap().opens.clone()
    }

    pub fn calls(&self) -> Vec<BridgeCall> {
        self.shared.lock().unwrap().calls.clone()
    }

    pub fn count(&self, call: &BridgeCall) -> usize {
        self.calls().iter().filter(|c| *c == call).count()
    }

    pub fn configure_calls(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, BridgeCall::Configure(_)))
            .count()
    }

    pub fn saved(&self) -> Vec<SavedRecord> {
        self.shared.lock().unwrap().saved.clone()
    }

    fn record(&self, call: BridgeCall) {
        self.shared.lock().unwrap().calls.push(call);
    }
}

#[async_trait]
impl SensorBridge for MockBridge {
    fn experiment(&self) -> ExperimentKind {
        self.kind
    }

    fn has_credentials(&self) -> bool {
        self.shared.lock().unwrap().credentials
    }

    async fn status(&self) -> Result<DeviceStatus> {
        let mut shared = self.shared.lock().unwrap();
        shared.calls.push(BridgeCall::Status);
        if shared.offline_probes > 0 && !shared.connected {
            if shared.offline_probes != u32::MAX {
                shared.offline_probes -= 1;
            }
            if shared.offline_probes == 0 {
                shared.connected = true;
            }
        }
        Ok(DeviceStatus {
            connected: shared.connected,
            device_info: None,
            current_count: None,
        })
    }

    async fn configure(&self, request: &ConfigureRequest) -> Result<()> {
        let (delay, flap) = {
            let mut shared = self.shared.lock().unwrap();
            shared.calls.push(BridgeCall::Configure(request.clone()));
            if shared.fail_configure {
                return Err(anyhow!("configure rejected"));
            }
            if shared.offline_while_configuring {
                shared.connected = false;
            }
            (shared.configure_delay, shared.offline_while_configuring)
        };

        if let Some(delay) = delay {
            time::sleep(delay).await;
        }
        if flap {
            self.set_connected(true);
        }
        Ok(())
    }

    async fn start(&self) -> Result<()> {
        self.record(BridgeCall::Start);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.record(BridgeCall::Stop);
        Ok(())
    }

    async fn reset(&self) -> Result<()> {
        self.record(BridgeCall::Reset);
        if self.shared.lock().unwrap().fail_reset {
            return Err(anyhow!("bridge busy"));
        }
        Ok(())
    }

    async fn open_stream(&self) -> Result<EventStream> {
        let script = {
            let mut shared = self.shared.lock().unwrap();
            shared.opens.push(Instant::now());
            shared.scripts.pop_front()
        };

        match script {
            Some(StreamScript::Refuse(reason)) => Err(anyhow!(reason)),
            Some(StreamScript::Feed(rx)) => Ok(stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|item| (item, rx))
            })
            .boxed()),
            None => Ok(stream::pending::<Result<String>>().boxed()),
        }
    }

    async fn save_data(&self, record: &SavedRecord) -> Result<()> {
        let mut shared = self.shared.lock().unwrap();
        shared.calls.push(BridgeCall::Save);
        if shared.fail_save {
            return Err(anyhow!("HTTP 500"));
        }
        shared.saved.push(record.clone());
        Ok(())
    }

    async fn available_experiments(&self) -> Result<Vec<AvailableExperiment>> {
        Ok(vec![
            AvailableExperiment {
                experiment_type: "distance".into(),
                name: "Distance".into(),
                firmware: Some("distance.hex".into()),
            },
            AvailableExperiment {
                experiment_type: "oscillation".into(),
                name: "Oscillation counter".into(),
                firmware: None,
            },
        ])
    }

    async fn select_experiment(&self, experiment_type: &str) -> Result<()> {
        let mut shared = self.shared.lock().unwrap();
        shared
            .calls
            .push(BridgeCall::SelectExperiment(experiment_type.to_string()));
        if shared.offline_probes > 0 {
            shared.connected = false;
        }
        Ok(())
    }
}

// ── Harness helpers ───────────────────────────────────────────

/// Lets spawned workers and consumers run without moving the paused clock.
pub async fn settle() {
    for _ in 0..200 {
        tokio::task::yield_now().await;
    }
}

pub fn config(time_limit_secs: u32) -> ExperimentConfig {
    ExperimentConfig::new(time_limit_secs, 10).unwrap()
}

/// Controller with a reachable device already observed by the poller.
pub async fn ready_controller(
    bridge: &MockBridge,
    time_limit_secs: u32,
) -> TelemetryController<MockBridge> {
    let controller =
        TelemetryController::with_timing(bridge.clone(), config(time_limit_secs), Timing::default());
    controller.activate().await.unwrap();
    settle().await;
    assert!(controller.snapshot().await.device_connected);
    controller
}

pub fn notices(events: &mut broadcast::Receiver<ControllerEvent>) -> Vec<Notice> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let ControllerEvent::Notice(notice) = event {
            out.push(notice);
        }
    }
    out
}

pub fn messages(events: &mut broadcast::Receiver<ControllerEvent>) -> Vec<String> {
    notices(events).into_iter().map(|n| n.message).collect()
}

pub fn count_sample(time: f64, count: u64) -> Result<String> {
    Ok(format!(r#"{{"time":{time},"count":{count}}}"#))
}

pub fn motion_sample(time: f64, displacement: f64) -> Result<String> {
    Ok(format!(
        r#"{{"time":{time},"displacement":{displacement},"velocity":0.1,"acceleration":-0.02}}"#
    ))
}
