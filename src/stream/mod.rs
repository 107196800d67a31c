pub mod controller;
pub mod loop_worker;

pub use controller::ConnectionManager;
pub use loop_worker::{StreamEvent, RECONNECT_DELAY};
