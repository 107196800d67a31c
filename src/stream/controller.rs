use std::sync::Arc;

use anyhow::{Context, Result};
use log::{info, warn};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::bridge::SensorBridge;

use super::loop_worker::{stream_loop, StreamEvent};

/// Owns at most one live stream worker.
pub struct ConnectionManager<B: SensorBridge> {
    bridge: Arc<B>,
    reconnect_delay: Duration,
    handle: Option<JoinHandle<()>>,
    cancel_token: Option<CancellationToken>,
}

impl<B: SensorBridge> ConnectionManager<B> {
    pub fn new(bridge: Arc<B>, reconnect_delay: Duration) -> Self {
        Self {
            bridge,
            reconnect_delay,
            handle: None,
            cancel_token: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.handle.is_some()
    }

    /// Spawns the stream worker publishing into `events`. No-op returning
    /// false when already open, when there is no auth token, or when the
    /// device was not reported reachable.
    pub fn open(&mut self, device_reachable: bool, events: mpsc::Sender<StreamEvent>) -> bool {
        if self.handle.is_some() {
            return false;
        }
        if !self.bridge.has_credentials() {
            warn!("Refusing to open stream without an auth token");
            return false;
        }
        if !device_reachable {
            warn!("Refusing to open stream: device not reachable");
            return false;
        }

        let cancel_token = CancellationToken::new();
        let handle = tokio::spawn(stream_loop(
            self.bridge.clone(),
            events,
            cancel_token.clone(),
            self.reconnect_delay,
        ));

        self.handle = Some(handle);
        self.cancel_token = Some(cancel_token);
        info!("Stream connection opened");
        true
    }

    /// Cancels the worker, including any pending reconnect wait, and waits for
    /// it to exit. Returns whether a connection was actually open.
    pub async fn close(&mut self) -> Result<bool> {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }

        match self.handle.take() {
            Some(handle) => {
                handle.await.context("stream worker task failed to join")?;
                info!("Stream connection closed");
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

impl<B: SensorBridge> Drop for ConnectionManager<B> {
    fn drop(&mut self) {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }
    }
}
