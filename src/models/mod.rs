mod config;
mod device;
mod reading;

pub use config::{ExperimentConfig, SAMPLING_RATE_RANGE_HZ, TIME_LIMIT_RANGE_SECS};
pub use device::{parse_status, AvailableExperiment, DeviceStatus};
pub use reading::{CountReading, ExperimentKind, MotionReading, Reading};
