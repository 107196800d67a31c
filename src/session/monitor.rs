use tokio::time::{Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::bridge::SensorBridge;

use super::controller::TelemetryController;

const ENABLE_LOGS: bool = false;

use crate::{log_debug, log_info};

/// Polls device reachability every `interval` until cancelled. The first
/// check runs immediately.
pub async fn status_loop<B: SensorBridge>(
    controller: TelemetryController<B>,
    interval: Duration,
    cancel_token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    log_info!("Device status polling started ({}ms)", interval.as_millis());

    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let connected = tokio::select! {
            _ = cancel_token.cancelled() => break,
            connected = controller.refresh_device_status() => connected,
        };
        log_debug!("Device reachable: {connected}");
    }

    log_info!("Device status polling stopped");
}
