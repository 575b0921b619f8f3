pub mod config;
pub mod error;
pub mod http;
pub mod memory;
pub mod store;

pub use config::RemoteConfig;
pub use error::RemoteError;
pub use http::HttpStore;
pub use memory::MemoryStore;
pub use store::RemoteStore;
