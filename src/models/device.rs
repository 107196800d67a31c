use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Reachability report from the bridge's `status` endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeviceStatus {
    pub connected: bool,
    #[serde(default, alias = "device_info")]
    pub device_info: Option<serde_json::Value>,
    /// Counter value the oscillation bridge reports while idle.
    #[serde(default, alias = "current_count")]
    pub current_count: Option<u64>,
}

impl DeviceStatus {
    pub fn sensor_type(&self) -> Option<&str> {
        self.device_info
            .as_ref()
            .and_then(|info| info.get("sensor_type"))
            .and_then(|value| value.as_str())
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StatusEnvelope {
    Wrapped { status: DeviceStatus },
    Bare(DeviceStatus),
}

/// Accepts both `{ "status": { .. } }` and the bare status object.
pub fn parse_status(body: &str) -> Result<DeviceStatus> {
    let envelope: StatusEnvelope =
        serde_json::from_str(body).context("malformed bridge status response")?;
    Ok(match envelope {
        StatusEnvelope::Wrapped { status } => status,
        StatusEnvelope::Bare(status) => status,
    })
}

/// Firmware image the bridge can flash for an experiment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AvailableExperiment {
    #[serde(rename = "type")]
    pub experiment_type: String,
    pub name: String,
    #[serde(default)]
    pub firmware: Option<String>,
}
