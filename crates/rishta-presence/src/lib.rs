pub mod tracker;
pub mod typing;

pub use tracker::{PresenceConfig, PresenceTracker, Visibility};
pub use tracker::{HEARTBEAT_INTERVAL, STATUS_POLL_INTERVAL, TYPING_QUIET_PERIOD};
