mod controller;
mod events;
mod monitor;
mod state;

pub use controller::{TelemetryController, Timing, RECONNECTING_MESSAGE};
pub use events::{ControllerEvent, EventBus, Notice, NoticeLevel, NOTICE_TTL};
pub use state::{SessionData, SessionSnapshot, SessionState};
