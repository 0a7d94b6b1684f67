//! Configuration schema and file-backed store

mod schema;
mod store;

pub use schema::{AppConfig, AudioConfig, DeviceConfig, RoutingConfig};
pub use store::{ConfigChange, ConfigStore};
