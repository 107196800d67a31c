use std::sync::Arc;

use futures_lite::StreamExt;
use tokio::sync::mpsc;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::bridge::SensorBridge;

// Set to false to silence connection chatter from this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

/// Fixed delay between a transport failure and the next connection attempt.
pub const RECONNECT_DELAY: Duration = Duration::from_millis(3000);

/// What the connection worker tells its single consumer.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Connected,
    /// The connection broke; a reconnect is already scheduled.
    Error(String),
    /// Raw `data` payload of one event, not yet decoded.
    Sample(String),
    /// The worker has exited and will publish nothing more.
    Closed,
}

/// Keeps one stream connection alive until cancelled.
///
/// Every failure (connect error, read error, bridge hanging up) drops the
/// connection, reports `Error` and waits `reconnect_delay` before trying
/// again. There is no attempt cap and the delay never grows.
pub async fn stream_loop<B: SensorBridge>(
    bridge: Arc<B>,
    events: mpsc::Sender<StreamEvent>,
    cancel_token: CancellationToken,
    reconnect_delay: Duration,
) {
    let experiment = bridge.experiment().as_str();
    let mut attempt: u64 = 0;

    'connect: loop {
        attempt += 1;
        let opened = tokio::select! {
            _ = cancel_token.cancelled() => break 'connect,
            opened = bridge.open_stream() => opened,
        };

        let failure = match opened {
            Ok(mut stream) => {
                log_info!("{experiment} stream connected (attempt {attempt})");
                if !publish(&events, &cancel_token, StreamEvent::Connected).await {
                    break 'connect;
                }

                loop {
                    let next = tokio::select! {
                        _ = cancel_token.cancelled() => break 'connect,
                        next = stream.next() => next,
                    };

                    match next {
                        Some(Ok(payload)) => {
                            log_debug!("{experiment} sample: {payload}");
                            if !publish(&events, &cancel_token, StreamEvent::Sample(payload)).await {
                                break 'connect;
                            }
                        }
                        Some(Err(err)) => break format!("{err:#}"),
                        None => break "stream ended by bridge".to_string(),
                    }
                }
            }
            Err(err) => format!("{err:#}"),
        };

        log_warn!(
            "{experiment} stream lost: {failure}; reconnecting in {}ms",
            reconnect_delay.as_millis()
        );
        if !publish(&events, &cancel_token, StreamEvent::Error(failure)).await {
            break 'connect;
        }

        tokio::select! {
            _ = cancel_token.cancelled() => break 'connect,
            _ = tokio::time::sleep(reconnect_delay) => {}
        }
    }

    let _ = events.try_send(StreamEvent::Closed);
    log_info!("{experiment} stream worker exiting");
}

/// Sends unless cancelled first. False means the worker should exit.
async fn publish(
    events: &mpsc::Sender<StreamEvent>,
    cancel_token: &CancellationToken,
    event: StreamEvent,
) -> bool {
    tokio::select! {
        _ = cancel_token.cancelled() => false,
        sent = events.send(event) => sent.is_ok(),
    }
}
