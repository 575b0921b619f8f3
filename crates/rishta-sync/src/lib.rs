pub mod error;
pub mod events;
pub mod reconcile;
pub mod scroll;
pub mod state;
pub mod synchronizer;

pub use error::SyncError;
pub use events::SyncEvent;
pub use scroll::{ScrollCommand, ViewportMetrics};
pub use state::ChatState;
pub use synchronizer::{SyncConfig, Synchronizer, POLL_INTERVAL};
