use serde::{Deserialize, Serialize};

/// Which experiment view the session drives. Each one talks to its own
/// bridge prefix and produces its own reading shape.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "camelCase")]
pub enum ExperimentKind {
    /// Distance sensor: displacement, velocity and acceleration over time.
    #[default]
    Kinematics,
    /// Oscillation counter: cumulative count over time.
    Oscillation,
}

impl ExperimentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExperimentKind::Kinematics => "kinematics",
            ExperimentKind::Oscillation => "oscillation",
        }
    }

    /// Path segment under the bridge base URL.
    pub fn endpoint_prefix(&self) -> &'static str {
        match self {
            ExperimentKind::Kinematics => "api/sensor",
            ExperimentKind::Oscillation => "api/osi",
        }
    }

    /// File name prefix for CSV downloads.
    pub fn export_prefix(&self) -> &'static str {
        match self {
            ExperimentKind::Kinematics => "experiment",
            ExperimentKind::Oscillation => "oscillation_count",
        }
    }

    pub fn csv_header(&self) -> &'static str {
        match self {
            ExperimentKind::Kinematics => {
                "Time (s),Displacement (m),Velocity (m/s),Acceleration (m/s²)"
            }
            ExperimentKind::Oscillation => "Time (s),Count",
        }
    }

    /// Measurement mode sent with `configure`; the counter firmware takes none.
    pub fn configure_mode(&self) -> Option<&'static str> {
        match self {
            ExperimentKind::Kinematics => Some("distance"),
            ExperimentKind::Oscillation => None,
        }
    }

    /// Human label used in notifications.
    pub fn sensor_label(&self) -> &'static str {
        match self {
            ExperimentKind::Kinematics => "Distance sensor",
            ExperimentKind::Oscillation => "OSI sensor",
        }
    }
}

impl std::str::FromStr for ExperimentKind {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "kinematics" | "distance" | "displacement" => Ok(ExperimentKind::Kinematics),
            "oscillation" | "osi" => Ok(ExperimentKind::Oscillation),
            other => Err(anyhow::anyhow!("unknown experiment kind '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct CountReading {
    pub time: f64,
    pub count: u64,
    /// Firmware-side sample index; not part of the saved record.
    #[serde(default, skip_serializing)]
    pub sample: Option<u64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct MotionReading {
    pub time: f64,
    pub displacement: f64,
    pub velocity: f64,
    pub acceleration: f64,
}

impl MotionReading {
    /// Clamp to the precision the bridge claims for each quantity.
    pub fn rounded(self) -> Self {
        Self {
            time: self.time,
            displacement: round_to(self.displacement, 4),
            velocity: round_to(self.velocity, 3),
            acceleration: round_to(self.acceleration, 3),
        }
    }
}

/// One decoded sample. Serializes flat, without a variant tag, which is the
/// shape the profile store expects in `data`.
#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
#[serde(untagged)]
pub enum Reading {
    Count(CountReading),
    Motion(MotionReading),
}

impl Reading {
    pub fn time(&self) -> f64 {
        match self {
            Reading::Count(r) => r.time,
            Reading::Motion(r) => r.time,
        }
    }

    pub fn count(&self) -> Option<u64> {
        match self {
            Reading::Count(r) => Some(r.count),
            Reading::Motion(_) => None,
        }
    }
}

pub(crate) fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}
