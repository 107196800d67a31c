//! Sensor bridge seam: REST calls plus the push stream of sample payloads.

mod client;
mod sse;

pub use client::BridgeClient;
pub use sse::SseDecoder;

use anyhow::Result;
use async_trait::async_trait;
use futures_lite::stream::Boxed;
use serde::Serialize;

use crate::export::SavedRecord;
use crate::models::{AvailableExperiment, DeviceStatus, ExperimentKind};

/// Raw `data` payloads of one stream connection, in transport order. An `Err`
/// item means the connection broke; the stream ending means the bridge hung up.
pub type EventStream = Boxed<Result<String>>;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ConfigureRequest {
    pub frequency: u32,
    pub duration: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
}

#[async_trait]
pub trait SensorBridge: Send + Sync + 'static {
    /// Experiment whose endpoints this bridge handle talks to.
    fn experiment(&self) -> ExperimentKind;

    /// Whether a usable auth token is present. Without one no stream is opened.
    fn has_credentials(&self) -> bool;

    async fn status(&self) -> Result<DeviceStatus>;

    async fn configure(&self, request: &ConfigureRequest) -> Result<()>;

    async fn start(&self) -> Result<()>;

    async fn stop(&self) -> Result<()>;

    async fn reset(&self) -> Result<()>;

    async fn open_stream(&self) -> Result<EventStream>;

    async fn save_data(&self, record: &SavedRecord) -> Result<()>;

    async fn available_experiments(&self) -> Result<Vec<AvailableExperiment>>;

    async fn select_experiment(&self, experiment_type: &str) -> Result<()>;
}
