use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

use crate::models::{DeviceStatus, ExperimentConfig, ExperimentKind, Reading};

/// Body of `POST save_data`: the full series plus run metadata.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SavedRecord {
    pub data: Vec<Reading>,
    pub metadata: SaveMetadata,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SaveMetadata {
    pub duration: u32,
    pub sampling_rate: u32,
    pub timestamp: String,
    pub sensor_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub experiment_type: Option<String>,
}

/// Everything about a finished run that goes into the metadata block.
pub struct RunSummary<'a> {
    pub kind: ExperimentKind,
    pub config: ExperimentConfig,
    pub device: &'a DeviceStatus,
    pub selected_experiment: Option<&'a str>,
    pub final_count: u64,
    pub max_count: u64,
}

pub fn build_record(readings: &[Reading], summary: &RunSummary<'_>, at: DateTime<Utc>) -> SavedRecord {
    let timestamp = at.to_rfc3339_opts(SecondsFormat::Millis, true);

    let metadata = match summary.kind {
        ExperimentKind::Oscillation => SaveMetadata {
            duration: summary.config.time_limit_secs,
            sampling_rate: summary.config.sampling_rate_hz,
            timestamp,
            sensor_type: "OSI".to_string(),
            final_count: Some(summary.final_count),
            max_count: Some(summary.max_count),
            experiment_type: None,
        },
        ExperimentKind::Kinematics => SaveMetadata {
            duration: summary.config.time_limit_secs,
            sampling_rate: summary.config.sampling_rate_hz,
            timestamp,
            sensor_type: summary.device.sensor_type().unwrap_or("unknown").to_string(),
            final_count: None,
            max_count: None,
            experiment_type: Some(
                summary
                    .selected_experiment
                    .unwrap_or(summary.kind.as_str())
                    .to_string(),
            ),
        },
    };

    SavedRecord {
        data: readings.to_vec(),
        metadata,
    }
}
