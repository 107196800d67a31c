pub mod bridge;
pub mod export;
pub mod models;
pub mod pipeline;
pub mod session;
pub mod settings;
pub mod stream;
pub mod utils;

use anyhow::{Context, Result};
use log::{info, warn};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::{self, Duration};

use bridge::{BridgeClient, SensorBridge};
use session::{ControllerEvent, NoticeLevel, SessionState, TelemetryController};
use settings::{default_settings_path, SettingsStore};

const DEVICE_WAIT_STEP: Duration = Duration::from_millis(500);

pub fn run() -> Result<()> {
    let level = if settings::debug_mode() {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    env_logger::Builder::from_default_env()
        .filter_level(level)
        .init();

    log::info!("labstream starting up...");

    let store = SettingsStore::new(default_settings_path())?;
    info!("Settings loaded from {}", store.path().display());

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;

    runtime.block_on(run_session(store))
}

async fn run_session(store: SettingsStore) -> Result<()> {
    let settings = store.get();
    let config = settings.experiment_config()?;
    let client = BridgeClient::new(
        settings.bridge_url.clone(),
        settings.experiment,
        settings.token.clone(),
    )?;
    if !client.has_credentials() {
        warn!("No LABSTREAM_TOKEN set; the bridge will refuse to stream");
    }

    let controller = TelemetryController::new(client, config);
    tokio::spawn(print_events(controller.subscribe()));
    controller.activate().await?;

    let outcome = drive(&controller).await;

    if let Err(err) = controller.stop().await {
        warn!("Stop during shutdown failed: {err:#}");
    }
    controller.shutdown().await?;
    outcome?;

    if let Some(path) = controller.export_csv(&settings.export_dir).await? {
        info!("Readings written to {}", path.display());
    } else {
        info!("No readings recorded; nothing exported");
    }
    if settings.save_to_profile {
        controller.save_to_profile().await;
    }
    Ok(())
}

/// Waits for the device, runs one session until it stops on its own or the
/// user hits ctrl-c.
async fn drive<B: SensorBridge>(controller: &TelemetryController<B>) -> Result<()> {
    info!("Waiting for the sensor...");
    loop {
        if controller.snapshot().await.device_connected {
            break;
        }
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted before the sensor came up");
                return Ok(());
            }
            _ = time::sleep(DEVICE_WAIT_STEP) => {}
        }
    }

    let mut events = controller.subscribe();
    controller.start().await?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted; stopping session");
                return Ok(());
            }
            event = events.recv() => match event {
                Ok(ControllerEvent::StateChanged(snapshot))
                    if snapshot.state == SessionState::Stopped => return Ok(()),
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => return Ok(()),
            },
        }
    }
}

async fn print_events(mut events: broadcast::Receiver<ControllerEvent>) {
    let mut last_logged_second = None;
    loop {
        match events.recv().await {
            Ok(ControllerEvent::Notice(notice)) => match notice.level {
                NoticeLevel::Error => log::error!("{}", notice.message),
                NoticeLevel::Warning => log::warn!("{}", notice.message),
                NoticeLevel::Info | NoticeLevel::Success => log::info!("{}", notice.message),
            },
            Ok(ControllerEvent::StateChanged(snapshot)) => {
                let second = snapshot.elapsed_ms / 1000;
                if snapshot.state == SessionState::Running && last_logged_second != Some(second) {
                    last_logged_second = Some(second);
                    info!(
                        "{:>5.1}% | {} samples | count {} | {:.2}/s",
                        snapshot.progress_percent,
                        snapshot.sample_count,
                        snapshot.current_count,
                        snapshot.rate
                    );
                }
            }
            Err(RecvError::Lagged(skipped)) => warn!("Event printer lagged by {skipped}"),
            Err(RecvError::Closed) => break,
        }
    }
}
